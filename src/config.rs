// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Configuration adapter: a
//! read-only typed view into per-location settings, handed to a
//! `CountingEngine` at construction.
//!
//! Parsing an on-disk settings document into these types, including the
//! nested `-`-separated form field flattening and the `users`/`server`/
//! `general`/`db`/`form` top-level document, is the excluded HTTP/
//! settings-editor collaborator's job; this module only defines the typed
//! value that collaborator would construct and hand to an engine.

use crate::geom::Vertex;
use std::path::PathBuf;

/// Tracker parameters, with the stated defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfig {
    pub max_age: u32,
    pub min_hits: u32,
    pub iou_threshold: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            max_age: 30,
            min_hits: 3,
            iou_threshold: 0.3,
        }
    }
}

/// Probabilistic training-sample persistence settings.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetSamplingConfig {
    pub path: PathBuf,
    pub enabled: bool,
    pub probability: f64,
    /// `None` means "no class filter".
    pub classes: Option<Vec<i32>>,
}

/// An RGB overlay color, `(r, g, b)`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Color(pub u8, pub u8, pub u8);

/// Per-location configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct LocationConfig {
    pub location: String,
    pub label: String,
    pub source_uri: String,
    pub weights_path: String,
    pub confidence: f32,
    pub iou: f32,
    pub device: String,
    pub vid_stride: u32,
    /// `None` means "all configured classes".
    pub classes_allow: Option<Vec<i32>>,
    pub counting_area: Vec<Vertex>,
    pub overlay_color: Color,
    pub display_scale: u32,
    pub display_quality: u8,
    pub indicator_size: u32,
    pub target_fps: f64,
    pub start_total_count: Option<i64>,
    pub dataset_sampling: Option<DatasetSamplingConfig>,
    pub tracker: TrackerConfig,
    /// When set, the ingestion loop overlays an FPS string on the display
    /// frame.
    pub debug: bool,
}

impl LocationConfig {
    /// A minimal config suitable as a starting point for tests, with no
    /// dataset sampling and a 100x100 counting area at the frame origin.
    #[cfg(any(test, feature = "test-support"))]
    pub fn for_test(location: impl Into<String>) -> Self {
        LocationConfig {
            location: location.into(),
            label: "test location".to_string(),
            source_uri: "test.mp4".to_string(),
            weights_path: "test.weights".to_string(),
            confidence: 0.5,
            iou: 0.45,
            device: "cpu".to_string(),
            vid_stride: 1,
            classes_allow: None,
            counting_area: vec![(0, 0), (100, 0), (100, 100), (0, 100)],
            overlay_color: Color(255, 0, 0),
            display_scale: 100,
            display_quality: 80,
            indicator_size: 4,
            target_fps: 10.0,
            start_total_count: None,
            dataset_sampling: None,
            tracker: TrackerConfig::default(),
            debug: false,
        }
    }
}
