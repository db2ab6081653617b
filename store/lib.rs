// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Durable per-location counting sessions: one table, plus the
//! JSON-column helpers it relies on.

pub mod json;
pub mod session_store;

// Used by `#[cfg(test)]` modules in this crate and by the dependent crate's
// integration tests; `#[cfg(test)]` itself is not passed on to dependents.
pub mod testutil;

pub use crate::session_store::{Page, Session, SessionStore, SharedSessionStore};
