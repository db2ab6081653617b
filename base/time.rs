// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

// Session timestamps arrive as plain `jiff::Timestamp` values from the
// embedder and are never parsed from a string, so this only keeps the
// process-wide zone used to format log and session output deterministically.

//! A process-wide time zone, shared by `tracing` output and session
//! timestamp formatting.

/// The zone used to render timestamps in logs and session listings.
///
/// Assigned once from `jiff::tz::TimeZone::system()` at startup; tests pin it
/// to a known political zone so formatted output is deterministic.
static GLOBAL_ZONE: std::sync::OnceLock<jiff::tz::TimeZone> = std::sync::OnceLock::new();

pub fn init_zone<F: FnOnce() -> jiff::tz::TimeZone>(f: F) {
    GLOBAL_ZONE.get_or_init(f);
}

pub fn global_zone() -> jiff::tz::TimeZone {
    GLOBAL_ZONE
        .get()
        .cloned()
        .unwrap_or_else(jiff::tz::TimeZone::UTC)
}

pub mod testutil {
    pub fn init_zone() {
        super::init_zone(|| {
            jiff::tz::TimeZone::get("America/Los_Angeles")
                .expect("America/Los_Angeles should exist")
        })
    }
}
