//! Single-image conversion.
//!
//! A [`TextImage`] is either converted live from a raster source or replayed
//! from a persisted render file; the two cases are told apart by magic
//! number, never by file extension.

use std::path::Path;

use image::imageops::FilterType;

use crate::cache::{self, MediaKind};
use crate::error::{CastError, CastResult};
use crate::glyph_index::{FontOptions, GlyphIndex};
use crate::kdtree::DistanceMetric;
use crate::Frame;

/// One converted image.
pub struct TextImage {
    text: String,
    /// The resized source pixels, kept so the image can be re-queried under
    /// a different font. Absent for replayed renders.
    frame: Option<Frame>,
}

impl TextImage {
    /// Opens either a raster image or a text image render file.
    ///
    /// Raster sources are resized so the converted output holds roughly
    /// `num_characters` characters; render files come back verbatim and
    /// ignore the sizing budget.
    pub fn open(
        source: &Path,
        font: &Path,
        options: &FontOptions,
        num_characters: u32,
    ) -> CastResult<Self> {
        match cache::detect(source)? {
            MediaKind::CachedImage => Ok(Self {
                text: cache::load_text_image(source)?,
                frame: None,
            }),
            MediaKind::CachedVideo => Err(CastError::CacheFormat(format!(
                "'{}' is a text video render, open it as a video",
                source.display()
            ))),
            MediaKind::Raw => {
                let index = GlyphIndex::build(font, options)?;
                Self::convert(source, &index, DistanceMetric::default(), num_characters, 1.0)
            }
        }
    }

    /// Converts a raster image against an already built index.
    pub fn convert(
        source: &Path,
        index: &GlyphIndex,
        metric: DistanceMetric,
        num_characters: u32,
        row_spacing: f32,
    ) -> CastResult<Self> {
        if num_characters == 0 {
            return Err(CastError::invalid_parameter(
                "character budget must be at least 1",
            ));
        }
        let img = image::open(source)?;
        let original = (img.width(), img.height());
        let (cols, rows) = index.estimate_size(original, num_characters, row_spacing);
        let resized = img.resize_exact(cols, rows, FilterType::Lanczos3).to_rgb8();
        let frame = Frame::new(cols, rows, resized.into_raw())?;
        Ok(Self::from_frame(frame, index, metric))
    }

    /// Converts an already decoded frame, one character cell per pixel.
    pub fn from_frame(frame: Frame, index: &GlyphIndex, metric: DistanceMetric) -> Self {
        Self {
            text: index.query(&frame, metric),
            frame: Some(frame),
        }
    }

    /// The converted text, rows separated by `\n`.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Re-queries the stored pixels under a different font. Replayed renders
    /// have no pixels to re-query and keep their text unchanged.
    pub fn change_font(&mut self, index: &GlyphIndex, metric: DistanceMetric) {
        if let Some(frame) = &self.frame {
            self.text = index.query(frame, metric);
        }
    }

    /// Writes the render file for this image.
    pub fn save(&self, path: &Path) -> CastResult<()> {
        cache::save_text_image(&self.text, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_glyph_index() -> GlyphIndex {
        GlyphIndex::from_parts(
            vec![(".", 10, [250.0, 250.0, 250.0]), ("#", 10, [10.0, 10.0, 10.0])],
            None,
            true,
            10,
        )
    }

    #[test]
    fn from_frame_converts_and_keeps_the_pixels() {
        let index = two_glyph_index();
        let frame = Frame::new(2, 1, vec![255, 255, 255, 0, 0, 0]).unwrap();
        let mut image = TextImage::from_frame(frame, &index, DistanceMetric::Manhattan);
        assert_eq!(image.text(), ".#");

        // Inverted palette flips the choice without reopening the source.
        let inverted = GlyphIndex::from_parts(
            vec![("#", 10, [250.0, 250.0, 250.0]), (".", 10, [10.0, 10.0, 10.0])],
            None,
            true,
            10,
        );
        image.change_font(&inverted, DistanceMetric::Manhattan);
        assert_eq!(image.text(), "#.");
    }

    #[test]
    fn replayed_render_ignores_font_changes() {
        let mut image = TextImage {
            text: "##\n".to_string(),
            frame: None,
        };
        image.change_font(&two_glyph_index(), DistanceMetric::Manhattan);
        assert_eq!(image.text(), "##\n");
    }

    #[test]
    fn zero_character_budget_is_rejected() {
        let index = two_glyph_index();
        assert!(matches!(
            TextImage::convert(
                Path::new("missing.png"),
                &index,
                DistanceMetric::Manhattan,
                0,
                1.0
            ),
            Err(CastError::InvalidParameter(_))
        ));
    }
}
