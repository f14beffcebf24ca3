/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
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

//! Data-plane layer.
//!
//! Owns the per-endpoint sessions of every call: the merged subscription
//! engine (fan-out, fan-in, dedupe, terminal detection), publish fan-out with
//! address-tagged acknowledgements, and the token-keyed listener registries
//! both expose to callers.

pub(crate) mod fanout_subscription;
pub(crate) mod listeners;
pub(crate) mod publish_fanout;
