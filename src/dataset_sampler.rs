// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `DatasetSampler`: probabilistically persist
//! annotated frames to disk as training samples.
//!
//! The probability roll, the "did `total_count` just increase" check, and
//! the class-filter test against `DatasetSamplingConfig` all use engine
//! state the sampler itself doesn't have, so they're the ingestion loop's
//! job; this module only does the write once the
//! engine has decided to call it, matching the narrow
//! `sample(frame, detected_class_ids)` contract.

use crate::video::Frame;
use base::{err, Error, ErrorKind};
use image::codecs::jpeg::JpegEncoder;
use image::ImageEncoder;
use std::path::{Path, PathBuf};
use tracing::debug;

/// JPEG quality for persisted training samples.
const SAMPLE_QUALITY: u8 = 100;

/// Writes sampled frames under a configured base directory.
pub struct DatasetSampler {
    base_dir: PathBuf,
}

impl DatasetSampler {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        DatasetSampler {
            base_dir: base_dir.into(),
        }
    }

    /// Persists `frame` as a training sample for `location`. `detected_class_ids`
    /// is informational only: filtering against the configured save-class
    /// list already happened before this was called.
    pub fn sample(
        &self,
        location: &str,
        frame: &Frame,
        detected_class_ids: &[i32],
        now_unix_secs: i64,
    ) -> Result<PathBuf, Error> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| Error::wrap(ErrorKind::Internal, e))?;
        let filename = format!("{}_{}.jpg", sanitize(location), now_unix_secs);
        let path = self.base_dir.join(filename);
        debug!(?path, classes = ?detected_class_ids, "writing dataset sample");
        write_jpeg(&path, frame)?;
        Ok(path)
    }
}

fn write_jpeg(path: &Path, frame: &Frame) -> Result<(), Error> {
    let file = std::fs::File::create(path).map_err(|e| Error::wrap(ErrorKind::Internal, e))?;
    let mut writer = std::io::BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut writer, SAMPLE_QUALITY);
    encoder
        .write_image(
            frame.as_raw(),
            frame.width(),
            frame.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| err!(Internal, msg("jpeg encode failed: {e}")))
}

/// Strips every character not in `[A-Za-z0-9_-]`.
fn sanitize(location: &str) -> String {
    location
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_unsafe_characters() {
        assert_eq!(sanitize("dock 1/!@#"), "dock1");
        assert_eq!(sanitize("dock-1_east"), "dock-1_east");
    }

    #[test]
    fn sample_writes_a_jpeg_file_under_the_base_dir() {
        let dir = std::env::temp_dir().join(format!("cvcounter-test-{}", std::process::id()));
        let sampler = DatasetSampler::new(&dir);
        let frame = image::RgbImage::new(4, 4);
        let path = sampler.sample("dock-1", &frame, &[1, 2], 1_700_000_000).unwrap();
        assert!(path.exists());
        assert_eq!(path.file_name().unwrap(), "dock-1_1700000000.jpg");
        std::fs::remove_dir_all(&dir).ok();
    }
}
