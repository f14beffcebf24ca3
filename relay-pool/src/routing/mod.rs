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

//! Provenance and duplicate-suppression layer.
//!
//! Tracks which endpoints delivered each event identity across the whole pool
//! and composes the per-subscription dedupe predicate applied to every
//! incoming event before it reaches listeners.

pub(crate) mod dedupe;
pub(crate) mod seen_tracker;
