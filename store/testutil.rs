// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Utilities for automated testing against [`crate::SessionStore`].

use crate::session_store::SessionStore;

static INIT: std::sync::Once = std::sync::Once::new();

/// Performs process-wide test initialization: sets up `tracing` output and
/// pins the process time zone so timestamp-formatting tests are
/// deterministic regardless of the machine they run on.
pub fn init() {
    INIT.call_once(|| {
        base::tracing_setup::install_for_tests();
        base::time::testutil::init_zone();
    });
}

/// Builds an in-memory [`SessionStore`] for tests, with the default table
/// prefix.
pub fn test_store() -> SessionStore {
    init();
    SessionStore::open_in_memory("").expect("in-memory session store should open")
}
