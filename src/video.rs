//! Video playback and conversion.
//!
//! A [`TextVideo`] plays converted frames in source order from either a live
//! pipeline (probe, chunked transcode, glyph query, bounded buffer) or a
//! persisted render file. Both sides expose the same pull interface, so a
//! caller never cares which it got.

use std::path::Path;
use std::sync::Arc;

use crate::buffer::FrameBuffer;
use crate::cache::{self, MediaKind, TextVideoFile};
use crate::chunk::ChunkScheduler;
use crate::error::{CastError, CastResult};
use crate::ffmpeg::{self, FfmpegTranscoder};
use crate::glyph_index::{FontOptions, GlyphIndex};
use crate::kdtree::DistanceMetric;

/// Playback and sizing knobs for live video conversion.
#[derive(Debug, Clone)]
pub struct VideoOptions {
    /// Output frames per second.
    pub frame_rate: u32,
    /// Seconds of video per transcoded chunk.
    pub chunk_length_secs: u32,
    /// Converted frames buffered ahead of the consumer.
    pub buffer_depth: usize,
    /// Approximate characters per converted frame.
    pub num_characters: u32,
    /// Vertical spacing multiplier of the output medium.
    pub row_spacing: f32,
    pub metric: DistanceMetric,
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            chunk_length_secs: 10,
            buffer_depth: 30,
            num_characters: 5_000,
            row_spacing: 1.0,
            metric: DistanceMetric::Manhattan,
        }
    }
}

impl VideoOptions {
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_chunk_length(mut self, secs: u32) -> Self {
        self.chunk_length_secs = secs;
        self
    }

    pub fn with_buffer_depth(mut self, depth: usize) -> Self {
        self.buffer_depth = depth;
        self
    }

    pub fn with_num_characters(mut self, num_characters: u32) -> Self {
        self.num_characters = num_characters;
        self
    }

    pub fn with_row_spacing(mut self, row_spacing: f32) -> Self {
        self.row_spacing = row_spacing;
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }
}

enum Playback {
    Live {
        scheduler: Arc<ChunkScheduler>,
        buffer: FrameBuffer,
        index: Arc<GlyphIndex>,
    },
    Render(TextVideoFile),
}

/// One playing video, live or replayed.
pub struct TextVideo {
    playback: Playback,
    frame_rate: u32,
    duration_secs: f64,
    metric: DistanceMetric,
    buffer_depth: usize,
    stopped: bool,
}

impl TextVideo {
    /// Opens either a raw video or a text video render file, told apart by
    /// magic number. For render files the font is never loaded.
    pub fn open(
        source: &Path,
        font: &Path,
        font_options: &FontOptions,
        options: &VideoOptions,
    ) -> CastResult<Self> {
        match cache::detect(source)? {
            MediaKind::CachedVideo => {
                let file = TextVideoFile::open(source)?;
                Ok(Self {
                    frame_rate: file.frame_rate(),
                    duration_secs: file.duration_secs(),
                    playback: Playback::Render(file),
                    metric: options.metric,
                    buffer_depth: options.buffer_depth,
                    stopped: false,
                })
            }
            MediaKind::CachedImage => Err(CastError::CacheFormat(format!(
                "'{}' is a text image render, open it as an image",
                source.display()
            ))),
            MediaKind::Raw => {
                let index = Arc::new(GlyphIndex::build(font, font_options)?);
                Self::convert(source, index, options)
            }
        }
    }

    /// Starts the live pipeline against an already built index.
    pub fn convert(
        source: &Path,
        index: Arc<GlyphIndex>,
        options: &VideoOptions,
    ) -> CastResult<Self> {
        let probe = ffmpeg::probe(source)?;
        let size = index.estimate_size(
            (probe.width, probe.height),
            options.num_characters,
            options.row_spacing,
        );
        let scheduler = ChunkScheduler::start(
            source.to_path_buf(),
            options.frame_rate,
            size,
            options.chunk_length_secs,
            probe.duration_secs,
            Arc::new(FfmpegTranscoder),
        )?;
        let buffer = FrameBuffer::spawn(
            scheduler.clone(),
            index.clone(),
            options.metric,
            options.buffer_depth,
        );
        Ok(Self {
            frame_rate: options.frame_rate,
            duration_secs: probe.duration_secs,
            playback: Playback::Live {
                scheduler,
                buffer,
                index,
            },
            metric: options.metric,
            buffer_depth: options.buffer_depth,
            stopped: false,
        })
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    /// Next converted frame in play order; `Ok(None)` at end of stream.
    pub fn next_frame(&mut self) -> CastResult<Option<String>> {
        if self.stopped {
            return Err(CastError::SchedulerStopped);
        }
        match &mut self.playback {
            Playback::Live { buffer, .. } => Ok(buffer.next_frame()),
            Playback::Render(file) => file.next_frame(),
        }
    }

    /// Repositions playback to `secs`. Out-of-range targets are ignored and
    /// playback continues uninterrupted.
    pub fn set_time(&mut self, secs: f64) -> CastResult<()> {
        if self.stopped {
            return Err(CastError::SchedulerStopped);
        }
        if secs < 0.0 || secs >= self.duration_secs {
            return Ok(());
        }
        match &mut self.playback {
            Playback::Live {
                scheduler,
                buffer,
                index,
            } => {
                // Frames queued before the seek must never be delivered
                // after it, and the old producer must have fully exited
                // before the scheduler moves, or an in-flight pull would
                // swallow the seek target into the abandoned queue.
                buffer.shutdown();
                scheduler.seek(secs as i64)?;
                *buffer = FrameBuffer::spawn(
                    scheduler.clone(),
                    index.clone(),
                    self.metric,
                    self.buffer_depth,
                );
                Ok(())
            }
            Playback::Render(file) => file.seek_to_frame((secs * self.frame_rate as f64) as u32),
        }
    }

    /// Switches the live pipeline to a different glyph index; frames already
    /// buffered under the old font are discarded. Replayed renders carry no
    /// pixels and keep their frames.
    pub fn change_font(&mut self, new_index: Arc<GlyphIndex>) -> CastResult<()> {
        if self.stopped {
            return Err(CastError::SchedulerStopped);
        }
        if let Playback::Live {
            scheduler,
            buffer,
            index,
        } = &mut self.playback
        {
            // Same ordering as set_time: join the old producer so its last
            // pull cannot steal a frame from the new buffer.
            buffer.shutdown();
            *index = new_index;
            *buffer = FrameBuffer::spawn(
                scheduler.clone(),
                index.clone(),
                self.metric,
                self.buffer_depth,
            );
        }
        Ok(())
    }

    /// Tears down the pipeline and removes chunk files. Every later call on
    /// this video fails with [`CastError::SchedulerStopped`].
    pub fn stop(&mut self) {
        if let Playback::Live {
            scheduler, buffer, ..
        } = &self.playback
        {
            buffer.invalidate();
            scheduler.stop();
        }
        self.stopped = true;
    }

    /// Rewinds to the start and streams every frame into a render file,
    /// returning the frame count.
    pub fn save(&mut self, path: &Path) -> CastResult<u32> {
        self.set_time(0.0)?;
        let frame_rate = self.frame_rate;
        let frames = std::iter::from_fn(|| match self.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        });
        cache::write_text_video(frames, frame_rate, path)
    }
}

impl Drop for TextVideo {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct Scratch(PathBuf);

    impl Scratch {
        fn new(name: &str) -> Self {
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            Self(std::env::temp_dir().join(format!(
                "charcast_test_{}_{stamp}_{name}",
                std::process::id()
            )))
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
        }
    }

    fn render_with_frames(path: &Path, frames: &[&str], frame_rate: u32) {
        cache::write_text_video(
            frames.iter().map(|f| Ok(f.to_string())),
            frame_rate,
            path,
        )
        .unwrap();
    }

    fn open_render(path: &Path) -> TextVideo {
        TextVideo::open(
            path,
            Path::new("unused.ttf"),
            &FontOptions::default(),
            &VideoOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn render_files_replay_in_order() {
        let scratch = Scratch::new("replay.ctv");
        render_with_frames(&scratch.0, &["a", "b", "c"], 2);
        let mut video = open_render(&scratch.0);
        assert_eq!(video.frame_rate(), 2);
        assert_eq!(video.duration_secs(), 1.5);
        assert_eq!(video.next_frame().unwrap().as_deref(), Some("a"));
        assert_eq!(video.next_frame().unwrap().as_deref(), Some("b"));
        assert_eq!(video.next_frame().unwrap().as_deref(), Some("c"));
        assert_eq!(video.next_frame().unwrap(), None);
    }

    #[test]
    fn set_time_maps_seconds_to_frames() {
        let scratch = Scratch::new("seek.ctv");
        let frames: Vec<String> = (0..10).map(|i| format!("f{i}")).collect();
        let refs: Vec<&str> = frames.iter().map(|s| s.as_str()).collect();
        render_with_frames(&scratch.0, &refs, 2);

        let mut video = open_render(&scratch.0);
        video.set_time(3.0).unwrap();
        assert_eq!(video.next_frame().unwrap().as_deref(), Some("f6"));
        video.set_time(0.0).unwrap();
        assert_eq!(video.next_frame().unwrap().as_deref(), Some("f0"));
    }

    #[test]
    fn out_of_range_set_time_is_ignored() {
        let scratch = Scratch::new("range.ctv");
        render_with_frames(&scratch.0, &["x", "y"], 1);
        let mut video = open_render(&scratch.0);
        video.set_time(-1.0).unwrap();
        video.set_time(100.0).unwrap();
        assert_eq!(video.next_frame().unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn stop_is_permanent() {
        let scratch = Scratch::new("stop.ctv");
        render_with_frames(&scratch.0, &["x"], 1);
        let mut video = open_render(&scratch.0);
        video.stop();
        assert!(matches!(
            video.next_frame(),
            Err(CastError::SchedulerStopped)
        ));
        assert!(matches!(
            video.set_time(0.0),
            Err(CastError::SchedulerStopped)
        ));
    }

    #[test]
    fn save_rewinds_and_copies_every_frame() {
        let source = Scratch::new("save-src.ctv");
        render_with_frames(&source.0, &["one", "two", "three"], 4);
        let mut video = open_render(&source.0);
        // Advance first so save has to rewind.
        assert!(video.next_frame().unwrap().is_some());

        let copy = Scratch::new("save-dst.ctv");
        assert_eq!(video.save(&copy.0).unwrap(), 3);

        let mut replay = open_render(&copy.0);
        assert_eq!(replay.frame_rate(), 4);
        assert_eq!(replay.next_frame().unwrap().as_deref(), Some("one"));
        assert_eq!(replay.next_frame().unwrap().as_deref(), Some("two"));
        assert_eq!(replay.next_frame().unwrap().as_deref(), Some("three"));
        assert_eq!(replay.next_frame().unwrap(), None);
    }

    #[test]
    fn image_renders_are_rejected() {
        let scratch = Scratch::new("image.cti");
        cache::save_text_image("##\n", &scratch.0).unwrap();
        assert!(matches!(
            TextVideo::open(
                &scratch.0,
                Path::new("unused.ttf"),
                &FontOptions::default(),
                &VideoOptions::default(),
            ),
            Err(CastError::CacheFormat(_))
        ));
    }
}
