// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Fast, non-cryptographic hash collections.
//!
//! `std::collections::HashMap`'s default hasher is DoS-resistant but slow for
//! the small, trusted, process-internal maps this workspace uses (locations,
//! track ids, engine registries). `ahash` is already a dependency of this
//! crate; alias it the way `fnv`/`ahash`-based workspaces typically do.

use std::collections::{HashMap, HashSet};

pub type FastHashMap<K, V> = HashMap<K, V, ahash::RandomState>;
pub type FastHashSet<T> = HashSet<T, ahash::RandomState>;
