//! Video decoders are only re-seeked when they drift past the tolerance.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgba, RgbaImage};

use neoncut_common::error::NeoncutResult;
use neoncut_project_model::{MediaItem, Timeline, WatermarkSettings};
use neoncut_render_engine::{FrameQueue, FrameRenderer, MediaHandle, VideoDecoder};

/// Plays forward at `rate` times real speed and counts seeks.
struct SkewedDecoder {
    rate: f64,
    position_secs: f64,
    seeks: Arc<AtomicUsize>,
    frame: Arc<RgbaImage>,
}

impl VideoDecoder for SkewedDecoder {
    fn position_secs(&self) -> f64 {
        self.position_secs
    }

    fn seek(&mut self, secs: f64) -> NeoncutResult<()> {
        self.seeks.fetch_add(1, Ordering::SeqCst);
        self.position_secs = secs;
        Ok(())
    }

    fn frame_at(&mut self, _secs: f64, _wait: Duration) -> Option<Arc<RgbaImage>> {
        self.position_secs += self.rate / 30.0;
        Some(Arc::clone(&self.frame))
    }
}

/// Takes `latency` calls after every (re)start before frames flow, then
/// delivers a burst up to the clock, like a decoder spinning up at a new
/// offset.
struct LateDecoder {
    queue: FrameQueue,
    tx: Option<SyncSender<Arc<RgbaImage>>>,
    sent_secs: f64,
    calls_since_start: u32,
    latency: u32,
    seeks: Arc<AtomicUsize>,
    frame: Arc<RgbaImage>,
}

impl LateDecoder {
    fn restart(&mut self, secs: f64) {
        let (tx, rx) = sync_channel(256);
        self.queue.restart(rx, secs);
        self.tx = Some(tx);
        self.sent_secs = secs;
        self.calls_since_start = 0;
    }
}

impl VideoDecoder for LateDecoder {
    fn position_secs(&self) -> f64 {
        self.queue.position_secs()
    }

    fn seek(&mut self, secs: f64) -> NeoncutResult<()> {
        self.seeks.fetch_add(1, Ordering::SeqCst);
        self.restart(secs);
        Ok(())
    }

    fn frame_at(&mut self, secs: f64, wait: Duration) -> Option<Arc<RgbaImage>> {
        self.calls_since_start += 1;
        if self.calls_since_start > self.latency {
            if let Some(tx) = &self.tx {
                while self.sent_secs <= secs + 1e-9 {
                    let _ = tx.send(Arc::clone(&self.frame));
                    self.sent_secs += 1.0 / 30.0;
                }
            }
        }
        self.queue.advance(secs, wait)
    }

    fn pending_seek_secs(&self) -> Option<f64> {
        self.queue.pending_seek_secs()
    }
}

fn renderer_with(rate: f64) -> (FrameRenderer, Timeline, Arc<AtomicUsize>) {
    let mut timeline = Timeline::new();
    timeline.push_item(MediaItem::video("clip", "clip.mp4", 10.0));

    let seeks = Arc::new(AtomicUsize::new(0));
    let mut renderer = FrameRenderer::new(16, 9, 30);
    renderer.insert_handle(
        "clip",
        MediaHandle::Video(Box::new(SkewedDecoder {
            rate,
            position_secs: 0.0,
            seeks: Arc::clone(&seeks),
            frame: Arc::new(RgbaImage::from_pixel(16, 9, Rgba([9, 9, 9, 255]))),
        })),
    );
    (renderer, timeline, seeks)
}

fn play(renderer: &mut FrameRenderer, timeline: &Timeline, ticks: u32) {
    let watermark = WatermarkSettings::default();
    for k in 0..ticks {
        renderer.render(timeline, &watermark, f64::from(k) / 30.0);
    }
}

#[test]
fn test_in_sync_decoder_is_never_seeked() {
    let (mut renderer, timeline, seeks) = renderer_with(1.0);
    play(&mut renderer, &timeline, 150);
    assert_eq!(seeks.load(Ordering::SeqCst), 0);
}

#[test]
fn test_slow_decoder_is_pulled_back_on_drift() {
    // Half speed falls 0.3s behind after 18 ticks.
    let (mut renderer, timeline, seeks) = renderer_with(0.5);
    play(&mut renderer, &timeline, 30);
    assert_eq!(seeks.load(Ordering::SeqCst), 1);
}

#[test]
fn test_jump_in_clock_forces_seek() {
    let (mut renderer, timeline, seeks) = renderer_with(1.0);
    let watermark = WatermarkSettings::default();
    renderer.render(&timeline, &watermark, 0.0);
    renderer.render(&timeline, &watermark, 4.0);
    assert_eq!(seeks.load(Ordering::SeqCst), 1);
    renderer.render(&timeline, &watermark, 4.0 + 1.0 / 30.0);
    assert_eq!(seeks.load(Ordering::SeqCst), 1);
}

fn late_renderer(latency: u32) -> (FrameRenderer, Timeline, Arc<AtomicUsize>) {
    let mut timeline = Timeline::new();
    timeline.push_item(MediaItem::video("clip", "clip.mp4", 10.0));

    let seeks = Arc::new(AtomicUsize::new(0));
    let mut decoder = LateDecoder {
        queue: FrameQueue::new(30),
        tx: None,
        sent_secs: 0.0,
        calls_since_start: 0,
        latency,
        seeks: Arc::clone(&seeks),
        frame: Arc::new(RgbaImage::from_pixel(16, 9, Rgba([200, 40, 40, 255]))),
    };
    decoder.restart(0.0);

    let mut renderer = FrameRenderer::new(16, 9, 30);
    renderer.insert_handle("clip", MediaHandle::Video(Box::new(decoder)));
    (renderer, timeline, seeks)
}

#[test]
fn test_slow_start_after_open_does_not_reseek() {
    let (mut renderer, timeline, seeks) = late_renderer(20);
    play(&mut renderer, &timeline, 40);
    assert_eq!(seeks.load(Ordering::SeqCst), 0);
}

#[test]
fn test_seek_in_flight_holds_last_frame_without_thrashing() {
    let (mut renderer, timeline, seeks) = late_renderer(20);
    let watermark = WatermarkSettings::default();
    play(&mut renderer, &timeline, 30);
    assert_eq!(seeks.load(Ordering::SeqCst), 0);

    for k in 0..40 {
        let t = 4.0 + f64::from(k) / 30.0;
        let frame = renderer.render(&timeline, &watermark, t);
        assert_ne!(frame.get_pixel(8, 4).0, [0, 0, 0, 255], "black frame at {t}");
    }
    assert_eq!(seeks.load(Ordering::SeqCst), 1);
}
