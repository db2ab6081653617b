// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `FrameServer`: on-demand MJPEG producer that
//! samples an engine's latest annotated frame, rescales, and JPEG-encodes
//! it for a connected viewer.
//!
//! Produces a plain `futures::Stream`, not an HTTP response; wiring that
//! stream into a response body is the excluded HTTP layer's job. Built with
//! `futures::stream::unfold` rather than an `async-stream` macro, since the
//! latter isn't already a dependency here.

use crate::engine::CountingEngine;
use crate::video::Frame;
use base::{err, Error, ErrorKind};
use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageEncoder;
use std::sync::Arc;
use std::time::Duration;

/// MJPEG multipart boundary token.
const BOUNDARY: &str = "frame";

/// Poll interval when no frame is yet available.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Per-stream state for `futures::stream::unfold`, which doubles as the
/// "clear `viewer_attached` on drop" guard: when the
/// consumer stops polling and drops the stream, `unfold` drops this value
/// along with it.
struct UnfoldState {
    engine: Arc<CountingEngine>,
    scale_percent: u32,
    quality: u8,
}

impl Drop for UnfoldState {
    fn drop(&mut self) {
        self.engine.set_viewer_attached(false);
    }
}

/// Produces the MJPEG multipart byte stream for one attached viewer.
///
/// Sets `engine`'s `viewer_attached` flag for the stream's lifetime so the
/// ingestion loop performs the annotation overlay, and
/// clears it again when the stream is dropped.
pub struct FrameServer {
    engine: Arc<CountingEngine>,
}

impl FrameServer {
    pub fn new(engine: Arc<CountingEngine>) -> Self {
        FrameServer { engine }
    }

    /// Starts the MJPEG stream. `scale_percent` and `quality` are the
    /// location's configured `display_scale`/`display_quality`.
    pub fn stream(self, scale_percent: u32, quality: u8) -> impl Stream<Item = Result<Bytes, Error>> {
        self.engine.set_viewer_attached(true);
        let state = UnfoldState {
            engine: self.engine,
            scale_percent,
            quality,
        };
        futures::stream::unfold(state, |state| async move {
            loop {
                match state.engine.latest_frame() {
                    Some(frame) => {
                        let part = encode_part(&frame, state.scale_percent, state.quality);
                        return Some((part, state));
                    }
                    None => {
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                }
            }
        })
    }
}

fn encode_part(frame: &Frame, scale_percent: u32, quality: u8) -> Result<Bytes, Error> {
    let resized = resize(frame, scale_percent);
    let jpeg = encode_jpeg(&resized, quality)?;
    let mut buf = BytesMut::with_capacity(jpeg.len() + 64);
    buf.put_slice(format!("\r\n--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n").as_bytes());
    buf.put_slice(&jpeg);
    buf.put_slice(b"\r\n");
    Ok(buf.freeze())
}

fn resize(frame: &Frame, scale_percent: u32) -> Frame {
    if scale_percent == 100 {
        return frame.clone();
    }
    let scale_percent = scale_percent.max(1);
    let width = (frame.width() * scale_percent / 100).max(1);
    let height = (frame.height() * scale_percent / 100).max(1);
    image::imageops::resize(frame, width, height, FilterType::Triangle)
}

fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .write_image(frame.as_raw(), frame.width(), frame.height(), image::ExtendedColorType::Rgb8)
        .map_err(|e| err!(Internal, msg("jpeg encode failed: {e}")))?;
    Ok(out)
}
