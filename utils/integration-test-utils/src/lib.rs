/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Scripted relay endpoints for exercising `relay-pool` without a network.

mod logging;
mod scripted;

pub use logging::init_logging;
pub use scripted::{
    CatchUp, ConnectBehavior, PublishBehavior, RelayScript, ScriptedConnector, ScriptedEndpoint,
    TestEvent, TestFilter,
};
