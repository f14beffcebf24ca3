//! Structured event names and field formatting shared by the pool layers.
//!
//! The library only emits `tracing` events. Installing a subscriber is left to
//! binaries and tests.

pub mod events {
    pub const REGISTRY_ENDPOINT_CREATED: &str = "registry.endpoint_created";
    pub const REGISTRY_RECONNECT: &str = "registry.reconnect";
    pub const REGISTRY_CONNECT_FAILED: &str = "registry.connect_failed";
    pub const REGISTRY_ENDPOINT_CLOSED: &str = "registry.endpoint_closed";

    pub const FANOUT_STARTED: &str = "fanout.started";
    pub const FANOUT_ENDPOINT_UNAVAILABLE: &str = "fanout.endpoint_unavailable";
    pub const FANOUT_ENDPOINT_SUBSCRIBED: &str = "fanout.endpoint_subscribed";
    pub const FANOUT_ENDPOINT_CAUGHT_UP: &str = "fanout.endpoint_caught_up";
    pub const FANOUT_ENDPOINT_CLOSED: &str = "fanout.endpoint_closed";
    pub const FANOUT_DUPLICATE_DROPPED: &str = "fanout.duplicate_dropped";
    pub const FANOUT_TERMINAL: &str = "fanout.terminal";
    pub const FANOUT_TERMINAL_TIMEOUT: &str = "fanout.terminal_timeout";
    pub const FANOUT_ALL_CLOSED: &str = "fanout.all_closed";
    pub const FANOUT_STOPPED: &str = "fanout.stopped";

    pub const QUERY_RESOLVED: &str = "query.resolved";
    pub const QUERY_TIMEOUT: &str = "query.timeout";

    pub const PUBLISH_ENDPOINT_UNAVAILABLE: &str = "publish.endpoint_unavailable";
    pub const PUBLISH_ACK: &str = "publish.ack";
}

pub mod fields {
    /// Terminal trigger recorded on `fanout.terminal` events.
    pub fn terminal_cause(timed_out: bool) -> &'static str {
        if timed_out {
            "timeout"
        } else {
            "all_caught_up"
        }
    }

    /// Compact rendering of an address list for log fields.
    pub fn format_addresses(addresses: &[String]) -> String {
        format!("[{}]", addresses.join(", "))
    }
}
