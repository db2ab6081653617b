// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `Detector`: given a frame, returns bounding boxes
//! with confidence scores, filtered by class/confidence/IOU.
//!
//! Two structurally distinct detector variants exist,
//! [`YoloDetector`] and [`SsdDetector`], differing in how they invoke an
//! injected [`InferenceBackend`] capability. Neural inference itself is out
//! of scope here; both variants share the same confidence/class-allow-list
//! filtering.

use crate::video::Frame;
use base::{err, Error, ErrorKind};

/// An axis-aligned bounding box in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection-over-union against `other`.
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let iw = (ix2 - ix1).max(0.0);
        let ih = (iy2 - iy1).max(0.0);
        let intersection = iw * ih;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// A single filtered detection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class_id: i32,
}

/// A detection straight from an [`InferenceBackend`], before confidence/
/// class filtering is applied.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class_id: i32,
}

/// Per-call detection parameters.
#[derive(Clone, Debug)]
pub struct DetectParams<'a> {
    pub confidence: f32,
    pub iou: f32,
    pub device: &'a str,
    pub vid_stride: u32,
    /// `None` means "all configured classes".
    pub classes_allow: Option<&'a [i32]>,
}

/// Injected neural-inference capability: loads model weights and runs raw
/// inference on a frame, returning unfiltered boxes/confidences/classes.
/// YOLO/SSD backends plug in here.
pub trait InferenceBackend: Send {
    fn load(&mut self, weights_path: &str, device: &str) -> Result<(), Error>;
    fn is_loaded(&self) -> bool;
    fn infer(&self, frame: &Frame) -> Result<Vec<RawDetection>, Error>;
}

/// The `Detector` contract.
pub trait Detector: Send {
    fn load_model(&mut self, weights_path: &str, device: &str) -> Result<(), Error>;
    fn detect(&self, frame: &Frame, params: &DetectParams) -> Result<Vec<Detection>, Error>;
}

/// Confidence/class-allow-list filtering shared by every `Detector`
/// implementation.
fn filter(raw: Vec<RawDetection>, params: &DetectParams) -> Vec<Detection> {
    raw.into_iter()
        .filter(|d| d.confidence >= params.confidence)
        .filter(|d| match params.classes_allow {
            None => true,
            Some(allow) => allow.contains(&d.class_id),
        })
        .map(|d| Detection {
            bbox: d.bbox,
            confidence: d.confidence,
            class_id: d.class_id,
        })
        .collect()
}

fn require_loaded<B: InferenceBackend>(backend: &B) -> Result<(), Error> {
    if !backend.is_loaded() {
        return Err(err!(FailedPrecondition, msg("detector model is not loaded")));
    }
    Ok(())
}

/// A YOLO-family detector: single-pass dense prediction, confidence/class
/// filtering applied to the backend's raw output as described above.
pub struct YoloDetector<B: InferenceBackend> {
    backend: B,
}

impl<B: InferenceBackend> YoloDetector<B> {
    pub fn new(backend: B) -> Self {
        YoloDetector { backend }
    }
}

impl<B: InferenceBackend> Detector for YoloDetector<B> {
    fn load_model(&mut self, weights_path: &str, device: &str) -> Result<(), Error> {
        if !std::path::Path::new(weights_path).exists() {
            return Err(err!(NotFound, msg("model weights not found at {weights_path:?}")));
        }
        self.backend.load(weights_path, device).map_err(|e| {
            Error::wrap(ErrorKind::Internal, e)
        })
    }

    fn detect(&self, frame: &Frame, params: &DetectParams) -> Result<Vec<Detection>, Error> {
        require_loaded(&self.backend)?;
        let raw = self.backend.infer(frame)?;
        Ok(filter(raw, params))
    }
}

/// An SSD-family detector: multi-scale anchor boxes followed by the
/// backend's own non-max suppression; this crate applies the same
/// confidence/class filtering on top.
pub struct SsdDetector<B: InferenceBackend> {
    backend: B,
}

impl<B: InferenceBackend> SsdDetector<B> {
    pub fn new(backend: B) -> Self {
        SsdDetector { backend }
    }
}

impl<B: InferenceBackend> Detector for SsdDetector<B> {
    fn load_model(&mut self, weights_path: &str, device: &str) -> Result<(), Error> {
        if !std::path::Path::new(weights_path).exists() {
            return Err(err!(NotFound, msg("model weights not found at {weights_path:?}")));
        }
        self.backend.load(weights_path, device).map_err(|e| {
            Error::wrap(ErrorKind::Internal, e)
        })
    }

    fn detect(&self, frame: &Frame, params: &DetectParams) -> Result<Vec<Detection>, Error> {
        require_loaded(&self.backend)?;
        let raw = self.backend.infer(frame)?;
        Ok(filter(raw, params))
    }
}
