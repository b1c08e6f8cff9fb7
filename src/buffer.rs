//! Bounded producer/consumer queue of converted text frames.
//!
//! Frame conversion latency is hidden behind consumption cadence: a producer
//! thread pulls raw frames from the scheduler, converts them to text and
//! keeps a bounded queue topped up, while the consumer blocks on
//! [`FrameBuffer::next_frame`] with a bounded timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::chunk::ChunkScheduler;
use crate::error::CastResult;
use crate::glyph_index::GlyphIndex;
use crate::kdtree::DistanceMetric;
use crate::Frame;

/// Pull-based source of decoded raw frames, implemented by the chunk
/// scheduler. The trait is the seam that lets the buffer be exercised
/// without an external encoder.
pub trait FrameSource: Send + Sync + 'static {
    /// Next frame in source time order; `Ok(None)` once exhausted.
    fn next_raw_frame(&self) -> CastResult<Option<Frame>>;
}

impl FrameSource for ChunkScheduler {
    fn next_raw_frame(&self) -> CastResult<Option<Frame>> {
        ChunkScheduler::next_raw_frame(self)
    }
}

/// A live producer/queue pair. A buffer is bound to one seek position; a
/// seek or font change discards the whole buffer and spawns a fresh one, so
/// frames buffered before the change are never delivered after it.
pub struct FrameBuffer {
    rx: Option<Receiver<String>>,
    stop: Arc<AtomicBool>,
    producer: Option<thread::JoinHandle<()>>,
    timeout: Duration,
}

impl FrameBuffer {
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Spawns the producer thread with a queue bounded at `depth` frames.
    pub fn spawn<S: FrameSource>(
        source: Arc<S>,
        index: Arc<GlyphIndex>,
        metric: DistanceMetric,
        depth: usize,
    ) -> Self {
        let (tx, rx) = sync_channel::<String>(depth.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let producer_stop = stop.clone();
        let producer = thread::Builder::new()
            .name("charcast-frames".into())
            .spawn(move || {
                while !producer_stop.load(Ordering::SeqCst) {
                    match source.next_raw_frame() {
                        Ok(Some(frame)) => {
                            let text = index.query(&frame, metric);
                            // Blocks while the queue is full.
                            if tx.send(text).is_err() {
                                break;
                            }
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
            })
            .ok();
        Self {
            rx: Some(rx),
            stop,
            producer,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Blocks until a converted frame is available. `None` means the stream
    /// ended: the producer finished, or no frame arrived within the bounded
    /// timeout, which signals natural end-of-stream rather than a hang.
    pub fn next_frame(&self) -> Option<String> {
        self.rx.as_ref()?.recv_timeout(self.timeout).ok()
    }

    /// Tells the producer to stop feeding the queue. Buffered frames become
    /// unreachable once the buffer itself is dropped. The producer may still
    /// be mid-pull when this returns; [`FrameBuffer::shutdown`] waits.
    pub fn invalidate(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stops the producer and blocks until its thread has exited. Dropping
    /// the receiver first unblocks a producer waiting on a full queue. Once
    /// this returns, no further pull on the source can come from this
    /// buffer, so the source can be repositioned without losing a frame to
    /// the abandoned queue.
    pub fn shutdown(&mut self) {
        self.invalidate();
        self.rx = None;
        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        // No join here: a producer blocked in a slow source pull must not
        // stall drop. Callers that reuse the source call shutdown first.
        self.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CastError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn tiny_index() -> Arc<GlyphIndex> {
        Arc::new(GlyphIndex::from_parts(
            vec![(".", 1, [255.0; 3]), ("#", 1, [0.0; 3])],
            None,
            true,
            1,
        ))
    }

    fn solid_frame(value: u8) -> Frame {
        Frame::new(1, 1, vec![value; 3]).unwrap()
    }

    struct ScriptedSource {
        frames: Mutex<Vec<Frame>>,
        pulls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Frame>) -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(frames),
                pulls: AtomicUsize::new(0),
            })
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_raw_frame(&self) -> CastResult<Option<Frame>> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            let mut frames = self.frames.lock().unwrap();
            if frames.is_empty() {
                Ok(None)
            } else {
                Ok(Some(frames.remove(0)))
            }
        }
    }

    /// Never yields; stands in for a stalled upstream.
    struct StalledSource;

    impl FrameSource for StalledSource {
        fn next_raw_frame(&self) -> CastResult<Option<Frame>> {
            thread::sleep(Duration::from_secs(60));
            Ok(None)
        }
    }

    /// Source with a rewindable cursor; each pull burns one position after
    /// a short delay, like a scheduler decoding a frame.
    struct CursorSource {
        cursor: AtomicUsize,
        limit: usize,
    }

    impl FrameSource for CursorSource {
        fn next_raw_frame(&self) -> CastResult<Option<Frame>> {
            thread::sleep(Duration::from_millis(20));
            let position = self.cursor.fetch_add(1, Ordering::SeqCst);
            if position >= self.limit {
                Ok(None)
            } else {
                Ok(Some(solid_frame(0)))
            }
        }
    }

    struct FailingSource;

    impl FrameSource for FailingSource {
        fn next_raw_frame(&self) -> CastResult<Option<Frame>> {
            Err(CastError::SchedulerStopped)
        }
    }

    #[test]
    fn converts_frames_in_order_then_ends() {
        let source = ScriptedSource::new(vec![
            solid_frame(255),
            solid_frame(0),
            solid_frame(255),
        ]);
        let buffer = FrameBuffer::spawn(source, tiny_index(), DistanceMetric::Manhattan, 8);
        assert_eq!(buffer.next_frame().as_deref(), Some("."));
        assert_eq!(buffer.next_frame().as_deref(), Some("#"));
        assert_eq!(buffer.next_frame().as_deref(), Some("."));
        assert_eq!(buffer.next_frame(), None);
    }

    #[test]
    fn timeout_signals_end_of_stream_not_a_hang() {
        let buffer = FrameBuffer::spawn(
            Arc::new(StalledSource),
            tiny_index(),
            DistanceMetric::Manhattan,
            4,
        )
        .with_timeout(Duration::from_millis(50));
        assert_eq!(buffer.next_frame(), None);
    }

    #[test]
    fn source_errors_end_the_stream_cleanly() {
        let buffer = FrameBuffer::spawn(
            Arc::new(FailingSource),
            tiny_index(),
            DistanceMetric::Manhattan,
            4,
        )
        .with_timeout(Duration::from_millis(200));
        assert_eq!(buffer.next_frame(), None);
    }

    #[test]
    fn shutdown_joins_the_producer_before_the_source_is_reused() {
        let source = Arc::new(CursorSource {
            cursor: AtomicUsize::new(0),
            limit: 4,
        });
        let mut buffer =
            FrameBuffer::spawn(source.clone(), tiny_index(), DistanceMetric::Manhattan, 2);
        assert!(buffer.next_frame().is_some());

        // Tear down while the producer is likely mid-pull, then rewind the
        // source as a seek would. Without the join, the stale producer could
        // consume the rewound frame into the abandoned queue.
        buffer.shutdown();
        source.cursor.store(0, Ordering::SeqCst);

        let buffer = FrameBuffer::spawn(source, tiny_index(), DistanceMetric::Manhattan, 2)
            .with_timeout(Duration::from_millis(500));
        let mut delivered = 0;
        while buffer.next_frame().is_some() {
            delivered += 1;
        }
        assert_eq!(delivered, 4, "a frame was lost across the rewind");
    }

    #[test]
    fn invalidation_stops_the_producer() {
        let source = ScriptedSource::new((0..64).map(|_| solid_frame(0)).collect());
        let counter = source.clone();
        let buffer = FrameBuffer::spawn(source, tiny_index(), DistanceMetric::Manhattan, 2);
        assert!(buffer.next_frame().is_some());
        buffer.invalidate();
        // Give the producer a moment to observe the flag, then check it no
        // longer drains the source (queue depth 2 bounds the overshoot).
        thread::sleep(Duration::from_millis(100));
        let settled = counter.pulls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.pulls.load(Ordering::SeqCst), settled);
        assert!(settled < 64);
    }
}
