// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `VideoSource`: opens and reads frames from a URL
//! or file path, reconnecting on failure and rate-limiting to a target FPS.
//!
//! The retry-with-backoff wrapping a single connection attempt, and the
//! test-injection trait used for the underlying decoder, follow the same
//! split as a `Streamer::run`/`run_once` pair: the engine depends on the
//! `VideoSource` trait, never on a concrete RTSP/file decode backend, which
//! is an injected capability.

use base::clock::Clocks;
use base::{err, Error, ErrorKind};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A single decoded video frame.
pub type Frame = image::RgbImage;

/// Backoff between reconnect attempts.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

/// Injected frame-decoding capability: opens a concrete connection (RTSP,
/// RTMP, HTTP, TCP, or a local file/device) and yields frames from it. The
/// actual decode backend (ffmpeg, a file reader, ...) is not specified
/// here.
pub trait FrameDecoder: Send {
    /// Reads the next frame, or `Ok(None)` on a transient read failure that
    /// does not itself warrant tearing down the connection.
    fn read(&mut self) -> Result<Option<Frame>, Error>;
}

/// Opens a [`FrameDecoder`] for a source URI. A trait (rather than a free
/// function) so tests can inject a decoder that fails or disconnects on
/// cue.
pub trait FrameDecoderOpener: Send + Sync {
    fn open(&self, uri: &str) -> Result<Box<dyn FrameDecoder>, Error>;
}

/// Classifies `uri` as a live stream or a local file/device.
pub fn is_stream(uri: &str) -> bool {
    const STREAM_SCHEMES: &[&str] = &["rtsp://", "rtmp://", "http://", "https://", "tcp://"];
    STREAM_SCHEMES.iter().any(|scheme| uri.starts_with(scheme))
}

/// The `VideoSource` contract.
pub trait VideoSource: Send {
    fn open(&mut self) -> Result<(), Error>;
    fn read(&mut self) -> Result<Option<Frame>, Error>;
    fn reconnect(&mut self) -> Result<(), Error>;
    fn close(&mut self);
    fn is_stream(&self) -> bool;
    /// 1 / (time between the two most recent successful reads), or 0.0
    /// before two reads have happened.
    fn actual_fps(&self) -> f64;
    fn reconnect_count(&self) -> u32;
}

/// Reference `VideoSource` implementation generic over an injected
/// [`FrameDecoderOpener`].
///
/// For live streams, a dedicated OS thread runs the decoder and overwrites
/// a single shared "latest frame" slot (drop-oldest); `read()` polls that
/// slot. For files, `read()` calls the decoder directly and sleeps to hold
/// `target_fps`: a threaded reader for live streams, and synchronous reads
/// at the target FPS for files.
pub struct ThreadedVideoSource<C: Clocks + Clone> {
    uri: String,
    target_fps: f64,
    is_stream: bool,
    opener: Arc<dyn FrameDecoderOpener>,
    clocks: C,

    // File mode: decoder lives here and is read directly.
    file_decoder: Option<Box<dyn FrameDecoder>>,

    // Stream mode: background thread owns the decoder; this side only
    // touches the shared slot and the shutdown flag.
    latest: Arc<base::Mutex<Option<Frame>>>,
    shutdown: Arc<AtomicBool>,
    reader_thread: Option<std::thread::JoinHandle<()>>,

    consecutive_misses: u32,
    reconnect_count: Arc<AtomicU32>,
    last_read_at: Option<Duration>,
    actual_fps: f64,
}

impl<C: Clocks + Clone> ThreadedVideoSource<C> {
    pub fn new(uri: impl Into<String>, target_fps: f64, opener: Arc<dyn FrameDecoderOpener>, clocks: C) -> Self {
        let uri = uri.into();
        let is_stream = is_stream(&uri);
        ThreadedVideoSource {
            uri,
            target_fps,
            is_stream,
            opener,
            clocks,
            file_decoder: None,
            latest: Arc::new(base::Mutex::new(None)),
            shutdown: Arc::new(AtomicBool::new(false)),
            reader_thread: None,
            consecutive_misses: 0,
            reconnect_count: Arc::new(AtomicU32::new(0)),
            last_read_at: None,
            actual_fps: 0.0,
        }
    }

    fn spawn_reader_thread(&mut self) -> Result<(), Error> {
        let decoder = self.opener.open(&self.uri)?;
        let latest = self.latest.clone();
        let shutdown = self.shutdown.clone();
        let mut decoder = decoder;
        self.reader_thread = Some(
            std::thread::Builder::new()
                .name(format!("video-{}", self.uri))
                .spawn(move || {
                    while !shutdown.load(Ordering::Relaxed) {
                        match decoder.read() {
                            Ok(Some(frame)) => {
                                *latest.lock() = Some(frame);
                            }
                            Ok(None) => {}
                            Err(_) => break,
                        }
                    }
                })
                .expect("spawning video reader thread should not fail"),
        );
        Ok(())
    }

    fn stop_reader_thread(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
        self.shutdown.store(false, Ordering::Relaxed);
    }

    fn record_read(&mut self) {
        let now = self.clocks.monotonic();
        if let Some(prev) = self.last_read_at {
            let delta = now.saturating_sub(prev);
            if delta > Duration::ZERO {
                self.actual_fps = 1.0 / delta.as_secs_f64();
            }
        }
        self.last_read_at = Some(now);
        self.consecutive_misses = 0;
        self.reconnect_count.store(0, Ordering::Relaxed);
    }
}

impl<C: Clocks + Clone> VideoSource for ThreadedVideoSource<C> {
    fn open(&mut self) -> Result<(), Error> {
        if self.is_stream {
            self.spawn_reader_thread()
        } else {
            self.file_decoder = Some(self.opener.open(&self.uri)?);
            Ok(())
        }
    }

    fn read(&mut self) -> Result<Option<Frame>, Error> {
        let frame = if self.is_stream {
            self.latest.lock().take()
        } else {
            match self.file_decoder.as_mut() {
                Some(d) => d.read()?,
                None => {
                    return Err(err!(
                        FailedPrecondition,
                        msg("read() called before open() on {}", self.uri)
                    ))
                }
            }
        };

        match frame {
            Some(f) => {
                self.record_read();
                if self.target_fps > 0.0 {
                    self.clocks.sleep(Duration::from_secs_f64(1.0 / self.target_fps));
                }
                Ok(Some(f))
            }
            None => {
                self.consecutive_misses += 1;
                if self.consecutive_misses >= 2 {
                    self.reconnect()?;
                }
                Ok(None)
            }
        }
    }

    fn reconnect(&mut self) -> Result<(), Error> {
        self.close();
        self.clocks.sleep(RECONNECT_BACKOFF);
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_misses = 0;
        self.open().map_err(|e| Error::wrap(ErrorKind::Unavailable, e))
    }

    fn close(&mut self) {
        if self.is_stream {
            self.stop_reader_thread();
        }
        self.file_decoder = None;
    }

    fn is_stream(&self) -> bool {
        self.is_stream
    }

    fn actual_fps(&self) -> f64 {
        self.actual_fps
    }

    fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::Relaxed)
    }
}

impl<C: Clocks + Clone> Drop for ThreadedVideoSource<C> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::clock::SimulatedClocks;
    use std::sync::atomic::AtomicUsize;

    fn test_frame() -> Frame {
        image::RgbImage::new(4, 4)
    }

    struct CountingDecoder {
        reads: Arc<AtomicUsize>,
        fail_after: Option<usize>,
    }

    impl FrameDecoder for CountingDecoder {
        fn read(&mut self) -> Result<Option<Frame>, Error> {
            let n = self.reads.fetch_add(1, Ordering::Relaxed);
            if let Some(fail_after) = self.fail_after {
                if n >= fail_after {
                    return Ok(None);
                }
            }
            Ok(Some(test_frame()))
        }
    }

    struct FixedOpener {
        reads: Arc<AtomicUsize>,
        fail_after: Option<usize>,
    }

    impl FrameDecoderOpener for FixedOpener {
        fn open(&self, _uri: &str) -> Result<Box<dyn FrameDecoder>, Error> {
            Ok(Box::new(CountingDecoder {
                reads: self.reads.clone(),
                fail_after: self.fail_after,
            }))
        }
    }

    #[test]
    fn classifies_stream_vs_file_uris() {
        assert!(is_stream("rtsp://cam.local/1"));
        assert!(is_stream("http://cam.local/snapshot"));
        assert!(!is_stream("/var/video/dock1.mp4"));
        assert!(!is_stream("dock1.mp4"));
    }

    #[test]
    fn file_mode_reads_synchronously_and_rate_limits() {
        let reads = Arc::new(AtomicUsize::new(0));
        let opener = Arc::new(FixedOpener {
            reads: reads.clone(),
            fail_after: None,
        });
        let clocks = SimulatedClocks::new(jiff::Timestamp::UNIX_EPOCH);
        let mut src = ThreadedVideoSource::new("dock1.mp4", 10.0, opener, clocks.clone());
        src.open().unwrap();
        assert!(src.read().unwrap().is_some());
        assert_eq!(clocks.monotonic(), Duration::from_millis(100));
        assert!(src.read().unwrap().is_some());
        assert_eq!(clocks.monotonic(), Duration::from_millis(200));
    }

    #[test]
    fn two_consecutive_misses_trigger_reconnect() {
        let reads = Arc::new(AtomicUsize::new(0));
        let opener = Arc::new(FixedOpener {
            reads: reads.clone(),
            fail_after: Some(0),
        });
        let clocks = SimulatedClocks::new(jiff::Timestamp::UNIX_EPOCH);
        let mut src = ThreadedVideoSource::new("dock1.mp4", 0.0, opener, clocks.clone());
        src.open().unwrap();
        assert!(src.read().unwrap().is_none()); // miss 1: transient
        assert_eq!(src.reconnect_count(), 0);
        assert!(src.read().unwrap().is_none()); // miss 2: triggers reconnect
        assert_eq!(src.reconnect_count(), 1);
        assert_eq!(clocks.monotonic(), RECONNECT_BACKOFF);
    }

    #[test]
    fn successful_read_resets_reconnect_count() {
        let reads = Arc::new(AtomicUsize::new(0));
        // fails the first 2 reads after open (triggering one reconnect),
        // then the freshly reconnected decoder (a fresh CountingDecoder
        // with its own counter) succeeds.
        struct FlakyOnceOpener {
            opens: Arc<AtomicUsize>,
        }
        impl FrameDecoderOpener for FlakyOnceOpener {
            fn open(&self, _uri: &str) -> Result<Box<dyn FrameDecoder>, Error> {
                let n = self.opens.fetch_add(1, Ordering::Relaxed);
                let fail_after = if n == 0 { Some(0) } else { None };
                Ok(Box::new(CountingDecoder {
                    reads: Arc::new(AtomicUsize::new(0)),
                    fail_after,
                }))
            }
        }
        let _ = reads;
        let opens = Arc::new(AtomicUsize::new(0));
        let opener = Arc::new(FlakyOnceOpener { opens });
        let clocks = SimulatedClocks::new(jiff::Timestamp::UNIX_EPOCH);
        let mut src = ThreadedVideoSource::new("dock1.mp4", 0.0, opener, clocks);
        src.open().unwrap();
        assert!(src.read().unwrap().is_none());
        assert!(src.read().unwrap().is_none()); // reconnects here
        assert_eq!(src.reconnect_count(), 1);
        assert!(src.read().unwrap().is_some()); // fresh decoder succeeds
        assert_eq!(src.reconnect_count(), 0);
    }
}
