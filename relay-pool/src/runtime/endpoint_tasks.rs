//! One task per endpoint, plus deadline timers.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawns `run(address)` for every address without waiting on any of them.
pub(crate) fn spawn_per_endpoint<R, Fut>(addresses: &[String], run: R) -> Vec<JoinHandle<()>>
where
    R: Fn(String) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    addresses
        .iter()
        .map(|address| tokio::spawn(run(address.clone())))
        .collect()
}

/// Runs `on_elapsed` once `after` has elapsed, unless the handle is aborted first.
pub(crate) fn spawn_deadline<D>(after: Duration, on_elapsed: D) -> JoinHandle<()>
where
    D: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        on_elapsed();
    })
}
