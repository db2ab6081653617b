// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `EngineRegistry`: map of location → engine, with
//! at-most-one-engine-per-location creation and safe teardown.
//!
//! A single `base::Mutex` guards a `base::FastHashMap` of per-location
//! engines, contended only at startup/reconfiguration.

use crate::engine::CountingEngine;
use base::FastHashMap;
use std::sync::Arc;

/// Process-wide map of location → [`CountingEngine`].
///
/// The mutex is held only around map mutation, never around engine
/// lifecycle I/O.
pub struct EngineRegistry {
    engines: base::Mutex<FastHashMap<String, Arc<CountingEngine>>>,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineRegistry {
    pub fn new() -> Self {
        EngineRegistry {
            engines: base::Mutex::new(FastHashMap::default()),
        }
    }

    /// Returns the engine for `location`, creating it with `factory` if it
    /// does not yet exist. `factory` runs at most once per location even
    /// under concurrent callers, because it runs while the
    /// registry lock is held.
    pub fn ensure<F>(&self, location: &str, factory: F) -> Arc<CountingEngine>
    where
        F: FnOnce() -> Arc<CountingEngine>,
    {
        let mut engines = self.engines.lock();
        engines
            .entry(location.to_string())
            .or_insert_with(factory)
            .clone()
    }

    pub fn get(&self, location: &str) -> Option<Arc<CountingEngine>> {
        self.engines.lock().get(location).cloned()
    }

    /// Atomically removes `location`'s engine from the map, then stops it.
    /// The stop itself runs after the map lock is released, so a slow
    /// shutdown never blocks unrelated `ensure`/`get` calls.
    pub fn remove(&self, location: &str) {
        let engine = self.engines.lock().remove(location);
        if let Some(engine) = engine {
            engine.stop();
        }
    }

    pub fn has(&self, location: &str) -> bool {
        self.engines.lock().contains_key(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocationConfig;
    use crate::events::EventBus;
    use base::clock::RealClocks;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn new_engine(location: &str) -> Arc<CountingEngine> {
        CountingEngine::new(
            LocationConfig::for_test(location),
            Arc::new(EventBus::new()),
            Arc::new(store::SessionStore::open_in_memory("").unwrap()),
            Arc::new(RealClocks {}),
        )
    }

    #[test]
    fn ensure_creates_once_and_reuses() {
        let registry = EngineRegistry::new();
        let calls = AtomicUsize::new(0);
        let e1 = registry.ensure("dock-1", || {
            calls.fetch_add(1, Ordering::SeqCst);
            new_engine("dock-1")
        });
        let e2 = registry.ensure("dock-1", || {
            calls.fetch_add(1, Ordering::SeqCst);
            new_engine("dock-1")
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&e1, &e2));
    }

    #[test]
    fn remove_drops_entry_and_has_reports_false() {
        let registry = EngineRegistry::new();
        registry.ensure("dock-1", || new_engine("dock-1"));
        assert!(registry.has("dock-1"));
        registry.remove("dock-1");
        assert!(!registry.has("dock-1"));
        assert!(registry.get("dock-1").is_none());
    }

    #[test]
    fn concurrent_ensure_creates_exactly_one_engine() {
        let registry = Arc::new(EngineRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let registry = registry.clone();
                    let calls = calls.clone();
                    scope.spawn(move || {
                        registry.ensure("dock-1", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            new_engine("dock-1")
                        })
                    })
                })
                .collect();
            let engines: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            for e in &engines[1..] {
                assert!(Arc::ptr_eq(&engines[0], e));
            }
        });
    }
}
