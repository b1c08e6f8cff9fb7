//! # charcast - font-aware text rendering of images and videos
//!
//! `charcast` converts images and videos into grids of text by matching the
//! rendered color of real font glyphs against image regions, instead of
//! mapping luminance onto a fixed character ramp.
//!
//! ## Features
//!
//! - Builds a searchable index of a font's glyphs (kerning, ligatures and
//!   embedded color included) and finds the best character per image region
//!   with a nearest-neighbor search
//! - Streams video through bounded on-disk chunks so arbitrarily long
//!   sources convert in constant space, with seeking
//! - Persists finished conversions to compact binary render files that
//!   replay without a font or ffmpeg installed
//! - Parallel frame conversion
//!
//! ## Example
//!
//! ```no_run
//! use charcast::{FontOptions, TextImage};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = FontOptions::default().with_render_size(64);
//! let image = TextImage::open(
//!     Path::new("input.png"),
//!     Path::new("DejaVuSansMono.ttf"),
//!     &options,
//!     5_000,
//! )?;
//! println!("{}", image.text());
//! image.save(Path::new("input.cti"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Video
//!
//! Video conversion is pull-based: frames are transcoded, converted and
//! buffered ahead of the consumer, and [`TextVideo::next_frame`] hands them
//! out in source order.
//!
//! ```no_run
//! use charcast::{FontOptions, TextVideo, VideoOptions};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut video = TextVideo::open(
//!     Path::new("clip.mp4"),
//!     Path::new("DejaVuSansMono.ttf"),
//!     &FontOptions::default(),
//!     &VideoOptions::default(),
//! )?;
//! while let Some(frame) = video.next_frame()? {
//!     println!("{frame}");
//! }
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use walkdir::WalkDir;

pub mod buffer;
pub mod cache;
pub mod chunk;
pub mod error;
pub mod ffmpeg;
pub mod glyph_index;
pub mod image;
pub mod kdtree;
pub mod video;

pub use buffer::{FrameBuffer, FrameSource};
pub use cache::{MediaKind, TextVideoFile, TEXT_IMAGE_MAGIC, TEXT_VIDEO_MAGIC};
pub use chunk::ChunkScheduler;
pub use error::{CastError, CastResult};
pub use ffmpeg::{FfmpegTranscoder, MediaProbe, Transcode, TranscodeJob};
pub use glyph_index::{Charset, FontOptions, GlyphIndex};
pub use image::TextImage;
pub use kdtree::DistanceMetric;
pub use video::{TextVideo, VideoOptions};

/// One decoded frame of tightly packed RGB24 pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    /// Wraps raw pixel data, rejecting buffers that do not match the
    /// declared dimensions.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> CastResult<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(CastError::invalid_parameter(format!(
                "frame data is {} bytes, {width}x{height} rgb needs {expected}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// The pixel at `(x, y)`. Callers stay in bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ]
    }
}

/// Directories searched when a font is given by file name rather than path.
pub fn system_font_dirs() -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    if let Some(user) = dirs::font_dir() {
        roots.push(user);
    }
    #[cfg(target_os = "linux")]
    {
        roots.push(PathBuf::from("/usr/share/fonts"));
        roots.push(PathBuf::from("/usr/local/share/fonts"));
        if let Some(home) = dirs::home_dir() {
            roots.push(home.join(".fonts"));
        }
    }
    #[cfg(target_os = "macos")]
    {
        roots.push(PathBuf::from("/Library/Fonts"));
        roots.push(PathBuf::from("/System/Library/Fonts"));
    }
    #[cfg(target_os = "windows")]
    {
        roots.push(PathBuf::from(r"C:\Windows\Fonts"));
    }
    roots
}

/// All `.ttf`/`.otf` files under the system font directories, sorted.
pub fn list_system_fonts() -> Vec<PathBuf> {
    let mut fonts: Vec<PathBuf> = system_font_dirs()
        .iter()
        .flat_map(|root| {
            WalkDir::new(root)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.into_path())
        })
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("ttf") || e.eq_ignore_ascii_case("otf"))
                .unwrap_or(false)
        })
        .collect();
    fonts.sort();
    fonts.dedup();
    fonts
}
