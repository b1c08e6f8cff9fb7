//! Sliding-window video chunk scheduling.
//!
//! A [`ChunkScheduler`] keeps two fixed-duration transcoded slices of the
//! source video alive: `curr`, which frames are being read from, and `next`,
//! which a background worker keeps transcoding ahead of consumption. Seeks
//! discard and re-derive the window. Chunk backing files are owned
//! exclusively by the scheduler and removed on every transition away from
//! the window, never left to ambient cleanup.

use std::fs;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::error::{CastError, CastResult};
use crate::ffmpeg::{Transcode, TranscodeJob};
use crate::Frame;

/// Lifecycle of one transcoded chunk. `Deleted` is terminal and reachable
/// from any other state (seek/stop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Pending,
    Running,
    Ready,
    Deleted,
}

struct ChunkStatus {
    state: ChunkState,
    /// Encode failed; the chunk is `Ready` for scheduling purposes but has
    /// no frames. The segment stays unavailable, it is never retried.
    failed: bool,
}

/// One contiguous transcoded slice of the source, backed by a temp file of
/// raw RGB24 frames.
struct Chunk {
    job: TranscodeJob,
    status: Mutex<ChunkStatus>,
    cond: Condvar,
}

impl Chunk {
    fn new(job: TranscodeJob) -> Arc<Self> {
        Arc::new(Self {
            job,
            status: Mutex::new(ChunkStatus {
                state: ChunkState::Pending,
                failed: false,
            }),
            cond: Condvar::new(),
        })
    }

    /// Drives `Pending → Running → Ready`. Called only from the worker
    /// thread, so at most one chunk is ever `Running`.
    fn process(&self, transcoder: &dyn Transcode) {
        {
            let mut status = self.status.lock().unwrap();
            if status.state != ChunkState::Pending {
                return;
            }
            status.state = ChunkState::Running;
        }
        let result = transcoder.transcode(&self.job);
        let mut status = self.status.lock().unwrap();
        if status.state == ChunkState::Deleted {
            // Deleted mid-encode (seek/stop); the output is ours to remove.
            drop(status);
            let _ = fs::remove_file(&self.job.output);
            return;
        }
        if let Err(e) = result {
            warn!(
                start_secs = self.job.start_secs,
                "chunk transcode failed, segment dropped: {e}"
            );
            let _ = fs::remove_file(&self.job.output);
            status.failed = true;
        }
        status.state = ChunkState::Ready;
        self.cond.notify_all();
    }

    /// Blocks until the chunk leaves `Pending`/`Running`. Returns `true`
    /// for `Ready`, `false` for `Deleted`.
    fn wait_ready(&self) -> bool {
        let mut status = self.status.lock().unwrap();
        while matches!(status.state, ChunkState::Pending | ChunkState::Running) {
            status = self.cond.wait(status).unwrap();
        }
        status.state == ChunkState::Ready
    }

    fn failed(&self) -> bool {
        self.status.lock().unwrap().failed
    }

    /// Terminal transition; removes the backing file unless an encode is
    /// still writing it (then `process` removes it on return).
    fn delete(&self) {
        let mut status = self.status.lock().unwrap();
        if status.state == ChunkState::Deleted {
            return;
        }
        let running = status.state == ChunkState::Running;
        status.state = ChunkState::Deleted;
        self.cond.notify_all();
        drop(status);
        if !running {
            let _ = fs::remove_file(&self.job.output);
        }
    }
}

/// Reads fixed-size RGB24 frames back from a ready chunk. Only one reader
/// is ever open per chunk, and only while the chunk is current.
struct ChunkReader {
    reader: BufReader<fs::File>,
    width: u32,
    height: u32,
}

impl ChunkReader {
    fn open(chunk: &Chunk) -> Option<Self> {
        let file = fs::File::open(&chunk.job.output).ok()?;
        Some(Self {
            reader: BufReader::new(file),
            width: chunk.job.width,
            height: chunk.job.height,
        })
    }

    fn next_frame(&mut self) -> Option<Frame> {
        let mut data = vec![0u8; self.width as usize * self.height as usize * 3];
        match self.reader.read_exact(&mut data) {
            Ok(()) => Frame::new(self.width, self.height, data).ok(),
            // A trailing partial frame or any read error ends the chunk.
            Err(_) => None,
        }
    }
}

/// Work handoff between the scheduler and its single background worker.
struct WorkerShared {
    slot: Mutex<Option<Arc<Chunk>>>,
    cond: Condvar,
    shutdown: AtomicBool,
}

struct SchedulerState {
    curr: Option<Arc<Chunk>>,
    next: Option<Arc<Chunk>>,
    /// Start time of `next` in seconds.
    next_time: u32,
    reader: Option<ChunkReader>,
    /// Bumped by every seek; blocked promotions from before the seek detect
    /// the bump and abort instead of clobbering the seek target.
    generation: u64,
    stopped: bool,
}

/// Manages the `curr`/`next` chunk window over one source video.
///
/// All methods take `&self`; the scheduler is shared between the consuming
/// thread and the frame-conversion producer through an [`Arc`].
pub struct ChunkScheduler {
    source: PathBuf,
    frame_rate: u32,
    size: (u32, u32),
    chunk_len: u32,
    duration_secs: f64,
    temp_dir: PathBuf,
    transcoder: Arc<dyn Transcode>,
    shared: Arc<WorkerShared>,
    state: Mutex<SchedulerState>,
}

impl ChunkScheduler {
    /// Creates the scheduler, starts its worker and blocks until the first
    /// chunk (at t = 0) is ready for reading.
    pub fn start(
        source: PathBuf,
        frame_rate: u32,
        size: (u32, u32),
        chunk_len: u32,
        duration_secs: f64,
        transcoder: Arc<dyn Transcode>,
    ) -> CastResult<Arc<Self>> {
        if frame_rate == 0 || chunk_len == 0 {
            return Err(CastError::invalid_parameter(
                "frame rate and chunk length must be at least 1",
            ));
        }
        if duration_secs <= 0.0 {
            return Err(CastError::invalid_parameter("video has no duration"));
        }
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let temp_dir =
            std::env::temp_dir().join(format!("charcast_{}_{}", std::process::id(), stamp));
        fs::create_dir_all(&temp_dir).map_err(|e| CastError::io(&temp_dir, e))?;

        let shared = Arc::new(WorkerShared {
            slot: Mutex::new(None),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let scheduler = Arc::new(Self {
            source,
            frame_rate,
            size,
            chunk_len,
            duration_secs,
            temp_dir,
            transcoder: transcoder.clone(),
            shared: shared.clone(),
            state: Mutex::new(SchedulerState {
                curr: None,
                next: None,
                next_time: 0,
                reader: None,
                generation: 0,
                stopped: false,
            }),
        });
        thread::Builder::new()
            .name("charcast-chunks".into())
            .spawn(move || worker_loop(shared, transcoder))
            .map_err(|e| CastError::io("worker thread", e))?;
        scheduler.seek(0)?;
        Ok(scheduler)
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    fn make_chunk(&self, start_secs: u32) -> Arc<Chunk> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let output = self
            .temp_dir
            .join(format!("chunk_{start_secs}_{stamp}.rgb24"));
        Chunk::new(TranscodeJob {
            source: self.source.clone(),
            start_secs,
            duration_secs: self.chunk_len,
            frame_rate: self.frame_rate,
            width: self.size.0,
            height: self.size.1,
            output,
        })
    }

    fn enqueue(&self, chunk: Arc<Chunk>) {
        let mut slot = self.shared.slot.lock().unwrap();
        // Anything still in the slot has been deleted by the seek that
        // replaced it; the worker would skip it anyway.
        *slot = Some(chunk);
        self.shared.cond.notify_one();
    }

    /// Repositions the window so the next consumed frame is at `secs`.
    /// Out-of-range seeks are silently ignored (best-effort seek bar
    /// semantics). Blocks until the target chunk is ready.
    pub fn seek(&self, secs: i64) -> CastResult<()> {
        let generation;
        {
            let mut state = self.state.lock().unwrap();
            if state.stopped {
                return Err(CastError::SchedulerStopped);
            }
            if secs < 0 || secs as f64 >= self.duration_secs {
                debug!(secs, "ignoring out-of-range seek");
                return Ok(());
            }
            state.generation += 1;
            generation = state.generation;
            if let Some(next) = state.next.take() {
                next.delete();
            }
            state.reader = None;
            state.next_time = secs as u32;
            let chunk = self.make_chunk(state.next_time);
            state.next = Some(chunk.clone());
            drop(state);
            self.enqueue(chunk);
        }
        self.promote_next(generation)
    }

    /// Blocks until `next` is ready, deletes the old `curr`, promotes and
    /// spawns the following chunk unless the video end was reached. Aborts
    /// without side effects when a newer seek superseded `generation` or
    /// another caller already promoted the same chunk.
    fn promote_next(&self, generation: u64) -> CastResult<()> {
        let chunk = {
            let state = self.state.lock().unwrap();
            if state.stopped {
                return Err(CastError::SchedulerStopped);
            }
            if state.generation != generation {
                return Ok(());
            }
            match &state.next {
                Some(chunk) => chunk.clone(),
                // End of video: nothing left to promote.
                None => return Ok(()),
            }
        };

        let ready = chunk.wait_ready();

        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return Err(CastError::SchedulerStopped);
        }
        if state.generation != generation || !ready {
            // Superseded by a seek (the deleter bumped the generation) or
            // deleted outright; never promote a non-ready chunk.
            return Ok(());
        }
        if !state
            .next
            .as_ref()
            .is_some_and(|next| Arc::ptr_eq(next, &chunk))
        {
            // A concurrent caller with the same generation got here first.
            return Ok(());
        }
        state.next = None;
        if let Some(old) = state.curr.take() {
            old.delete();
        }
        state.reader = if chunk.failed() {
            None
        } else {
            ChunkReader::open(&chunk)
        };
        state.curr = Some(chunk);
        state.next_time += self.chunk_len;
        if (state.next_time as f64) < self.duration_secs {
            let next = self.make_chunk(state.next_time);
            state.next = Some(next.clone());
            drop(state);
            self.enqueue(next);
        }
        Ok(())
    }

    /// Pulls the next decoded frame in strict source time order, advancing
    /// across chunk boundaries. `Ok(None)` once the final chunk has been
    /// fully consumed. Not restartable except through [`seek`](Self::seek).
    pub fn next_raw_frame(&self) -> CastResult<Option<Frame>> {
        loop {
            let generation = {
                let mut state = self.state.lock().unwrap();
                if state.stopped {
                    return Err(CastError::SchedulerStopped);
                }
                if let Some(reader) = state.reader.as_mut() {
                    if let Some(frame) = reader.next_frame() {
                        return Ok(Some(frame));
                    }
                    state.reader = None;
                }
                if state.next.is_none() {
                    return Ok(None);
                }
                state.generation
            };
            self.promote_next(generation)?;
        }
    }

    /// Lazily iterate over all remaining decoded frames.
    pub fn iterate(self: &Arc<Self>) -> RawFrames {
        RawFrames {
            scheduler: self.clone(),
            done: false,
        }
    }

    /// Permanently stops the scheduler: deletes both window chunks, wakes
    /// every blocked caller and makes all later operations fail fast with
    /// [`CastError::SchedulerStopped`].
    pub fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.reader = None;
            if let Some(curr) = state.curr.take() {
                curr.delete();
            }
            if let Some(next) = state.next.take() {
                next.delete();
            }
        }
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }
}

impl Drop for ChunkScheduler {
    fn drop(&mut self) {
        self.stop();
        let _ = fs::remove_dir_all(&self.temp_dir);
    }
}

/// Lazy, non-restartable frame sequence over a scheduler.
pub struct RawFrames {
    scheduler: Arc<ChunkScheduler>,
    done: bool,
}

impl Iterator for RawFrames {
    type Item = CastResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.scheduler.next_raw_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Continuously drives whichever chunk is handed over until shutdown.
fn worker_loop(shared: Arc<WorkerShared>, transcoder: Arc<dyn Transcode>) {
    loop {
        let chunk = {
            let mut slot = shared.slot.lock().unwrap();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                match slot.take() {
                    Some(chunk) => break chunk,
                    None => slot = shared.cond.wait(slot).unwrap(),
                }
            }
        };
        chunk.process(transcoder.as_ref());
    }
}
