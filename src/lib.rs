// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! A multi-camera object-counting service: each configured location runs a
//! [`engine::CountingEngine`] that reads frames from a [`video::VideoSource`],
//! detects and tracks objects crossing a configured counting area, and
//! persists/publishes the running counts.
//!
//! Routing, HTML rendering, authentication, the settings editor, model
//! training, update installation, system-info reporting, and loading this
//! crate's configuration from a file are all out of scope here; this crate
//! assumes an embedder constructs [`config::LocationConfig`] values and talks
//! to an [`engine::CountingEngine`]/[`registry::EngineRegistry`] directly.
//!
//! The per-stream worker thread, event-channel, and locked-state idioms
//! this crate uses carry over from a video-recording service's own worker
//! pipeline; the recording pipeline and retention/storage machinery do not.

pub mod config;
pub mod dataset_sampler;
pub mod detect;
pub mod engine;
pub mod events;
pub mod frame_server;
pub mod geom;
pub mod overlay;
pub mod registry;
pub mod track;
pub mod video;

pub use config::{Color, DatasetSamplingConfig, LocationConfig, TrackerConfig};
pub use dataset_sampler::DatasetSampler;
pub use detect::{BBox, DetectParams, Detection, Detector, InferenceBackend, RawDetection, SsdDetector, YoloDetector};
pub use engine::{CountSnapshot, CountingEngine, EngineStatus, SaveCountResult};
pub use events::{Event, EventBus, NotificationKind, WireStatus};
pub use frame_server::FrameServer;
pub use geom::{Point, Vertex};
pub use registry::EngineRegistry;
pub use track::{IouTracker, Track, Tracker};
pub use video::{FrameDecoder, FrameDecoderOpener, ThreadedVideoSource, VideoSource};
