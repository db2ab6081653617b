// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Ambient infrastructure shared by the counting engine and the session
//! store: errors, clocks, graceful shutdown, timestamp helpers, and
//! `tracing` setup.

pub mod clock;
mod error;
mod hash;
pub mod shutdown;
pub mod time;
pub mod tracing_setup;

pub use crate::error::{Error, ErrorKind, ResultExt};
pub use crate::hash::{FastHashMap, FastHashSet};

/// A `parking_lot`-backed mutex. Aliased so call sites read `base::Mutex`
/// the same way they read `base::Error`, and so the backing implementation
/// can change in one place.
pub type Mutex<T> = parking_lot::Mutex<T>;

/// Companion condition variable for [`Mutex`].
pub type Condvar = parking_lot::Condvar;
