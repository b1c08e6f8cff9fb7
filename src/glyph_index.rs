//! Color-to-character index built from a font file.
//!
//! A [`GlyphIndex`] renders every usable character of a font once, records the
//! average color of each rendered glyph, and answers "which character best
//! matches this pixel color" queries through a k-d tree over the normalized
//! averages. It is built once per font configuration and never mutated; a
//! font change always produces a brand-new index.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use ab_glyph::{Font as _, FontRef, PxScale};
use rayon::prelude::*;

use crate::error::{CastError, CastResult};
use crate::kdtree::{DistanceMetric, KdTree};
use crate::{system_font_dirs, Frame};

/// Which characters to consider as output candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Charset {
    /// Printable ASCII.
    #[default]
    Ascii,
    /// Every character the font's character map covers.
    Full,
    /// An explicit set of characters.
    Explicit(BTreeSet<char>),
}

impl Charset {
    pub fn explicit(chars: impl IntoIterator<Item = char>) -> Self {
        Self::Explicit(chars.into_iter().collect())
    }
}

/// Options controlling how a [`GlyphIndex`] is built.
#[derive(Debug, Clone)]
pub struct FontOptions {
    pub charset: Charset,
    /// Color glyphs are rendered with.
    pub text_color: [u8; 3],
    /// Color of the empty cell behind each glyph.
    pub bg_color: [u8; 3],
    /// Prefer embedded raster (color emoji) glyph images when the font
    /// carries them.
    pub use_embedded_color: bool,
    /// Apply horizontal kerning pairs during variable-width layout.
    pub use_kerning: bool,
    /// Fold GSUB ligature substitutions into multi-character candidates.
    pub use_ligatures: bool,
    /// Treat the font as monospace even when advance widths differ.
    pub force_monospace: bool,
    /// Render size in pixels per em.
    pub render_size: u32,
}

impl Default for FontOptions {
    fn default() -> Self {
        Self {
            charset: Charset::Ascii,
            text_color: [0, 0, 0],
            bg_color: [255, 255, 255],
            use_embedded_color: true,
            use_kerning: true,
            use_ligatures: true,
            force_monospace: false,
            render_size: 100,
        }
    }
}

impl FontOptions {
    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn with_colors(mut self, text: [u8; 3], bg: [u8; 3]) -> Self {
        self.text_color = text;
        self.bg_color = bg;
        self
    }

    pub fn with_kerning(mut self, kerning: bool) -> Self {
        self.use_kerning = kerning;
        self
    }

    pub fn with_ligatures(mut self, ligatures: bool) -> Self {
        self.use_ligatures = ligatures;
        self
    }

    pub fn with_force_monospace(mut self, force: bool) -> Self {
        self.force_monospace = force;
        self
    }

    pub fn with_render_size(mut self, px: u32) -> Self {
        self.render_size = px;
        self
    }
}

/// One output candidate: a character (or ligature sequence), its advance
/// width in pixels, and the normalized average color of its rendering.
struct Candidate {
    key: String,
    width_px: u32,
    color: [f32; 3],
}

/// Searchable color→character mapping for one font configuration.
pub struct GlyphIndex {
    candidates: Vec<Candidate>,
    tree: KdTree,
    kerning: Option<HashMap<(char, char), i32>>,
    monospace: bool,
    char_height: u32,
    max_char_width: u32,
}

impl GlyphIndex {
    /// Builds an index from a font file.
    ///
    /// `font_source` is used as-is when it names an existing file, otherwise
    /// it is resolved against the platform font directories.
    ///
    /// # Errors
    ///
    /// [`CastError::FontNotFound`] when the path cannot be resolved,
    /// [`CastError::FontParse`] for unreadable font tables and
    /// [`CastError::InsufficientCharset`] when fewer than two usable
    /// characters survive filtering.
    pub fn build(font_source: &Path, options: &FontOptions) -> CastResult<Self> {
        if options.render_size == 0 {
            return Err(CastError::invalid_parameter(
                "render size must be at least 1 pixel per em",
            ));
        }
        let font_path = resolve_font_path(font_source)?;
        let data = std::fs::read(&font_path).map_err(|e| CastError::io(&font_path, e))?;
        let face = ttf_parser::Face::parse(&data, 0)
            .map_err(|e| CastError::FontParse(e.to_string()))?;
        let render_font = FontRef::try_from_slice(&data)
            .map_err(|e| CastError::FontParse(e.to_string()))?;

        let ppem = options.render_size as f32 / face.units_per_em() as f32;
        let units_to_px = |units: i32| -> i32 { (units as f32 * ppem).round() as i32 };

        let char_height =
            units_to_px(face.ascender() as i32 - face.descender() as i32).max(1) as u32;
        let ascent_px = units_to_px(face.ascender() as i32);

        // Step 1: resolve the charset against the font cmap, keeping the
        // lowest code point per glyph.
        let retained = retained_glyphs(&face, &options.charset);
        let monospace = options.force_monospace || detect_monospace(&face, &retained);

        // Single-character candidates plus folded ligatures.
        let mut keyed: Vec<(String, ttf_parser::GlyphId)> = retained
            .iter()
            .map(|(&gid, &ch)| (ch.to_string(), gid))
            .collect();
        if options.use_ligatures {
            keyed.extend(ligature_candidates(&face, &retained));
        }

        let kerning = if options.use_kerning {
            kerning_pairs(&face, &retained, &units_to_px)
        } else {
            None
        };

        // Advance widths in render pixels; zero-width candidates are out.
        let widths: Vec<(String, ttf_parser::GlyphId, u32)> = keyed
            .into_iter()
            .filter_map(|(key, gid)| {
                let advance = face.glyph_hor_advance(gid)?;
                let px = units_to_px(advance as i32);
                (px > 0).then(|| (key, gid, px as u32))
            })
            .collect();
        let max_char_width = widths.iter().map(|(_, _, w)| *w).max().unwrap_or(1);

        // Render each candidate and compute its average color. A monospace
        // cell is always `max_char_width` wide; variable-width cells match
        // the glyph's own advance. Blank glyphs (average identical to the
        // background) never usefully match non-background content, so they
        // are dropped unless whitespace.
        let scale = PxScale::from(ppem * render_font.height_unscaled());
        let mut rendered: Vec<(String, u32, [f64; 3])> = Vec::with_capacity(widths.len());
        for (key, gid, width_px) in widths {
            let cell_w = if monospace { max_char_width } else { width_px };
            let average = render_average(
                &face,
                &render_font,
                gid,
                scale,
                ascent_px,
                cell_w,
                char_height,
                options,
            );
            let Some(average) = average else { continue };
            let is_blank = (0..3).all(|c| average[c] == options.bg_color[c] as f64);
            if is_blank && !key.chars().all(char::is_whitespace) {
                continue;
            }
            rendered.push((key, width_px, average));
        }

        if rendered.len() < 2 {
            return Err(CastError::InsufficientCharset {
                count: rendered.len(),
            });
        }

        // Min-max normalize per channel to the full [0, 255] range. This
        // equalizes contrast across fonts and color choices before the
        // spatial index is built.
        let averages: Vec<[f64; 3]> = rendered.iter().map(|(_, _, a)| *a).collect();
        let normalized = normalize_averages(&averages);

        let candidates: Vec<Candidate> = rendered
            .into_iter()
            .zip(normalized)
            .map(|((key, width_px, _), color)| Candidate {
                key,
                width_px,
                color,
            })
            .collect();
        let tree = KdTree::build(
            candidates
                .iter()
                .enumerate()
                .map(|(i, c)| (c.color, i as u32))
                .collect(),
        );

        Ok(Self {
            candidates,
            tree,
            kerning,
            monospace,
            char_height,
            max_char_width,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        candidates: Vec<(&str, u32, [f32; 3])>,
        kerning: Option<HashMap<(char, char), i32>>,
        monospace: bool,
        char_height: u32,
    ) -> Self {
        let candidates: Vec<Candidate> = candidates
            .into_iter()
            .map(|(key, width_px, color)| Candidate {
                key: key.to_string(),
                width_px,
                color,
            })
            .collect();
        let max_char_width = candidates.iter().map(|c| c.width_px).max().unwrap_or(1);
        let tree = KdTree::build(
            candidates
                .iter()
                .enumerate()
                .map(|(i, c)| (c.color, i as u32))
                .collect(),
        );
        Self {
            candidates,
            tree,
            kerning,
            monospace,
            char_height,
            max_char_width,
        }
    }

    pub fn is_monospace(&self) -> bool {
        self.monospace
    }

    /// Line height in render pixels (ascender to descender).
    pub fn char_height(&self) -> u32 {
        self.char_height
    }

    /// Widest candidate advance in render pixels.
    pub fn max_char_width(&self) -> u32 {
        self.max_char_width
    }

    /// Number of searchable candidates (ligatures included).
    pub fn num_characters(&self) -> usize {
        self.candidates.len()
    }

    /// Characters available in this index.
    pub fn characters(&self) -> impl Iterator<Item = &str> {
        self.candidates.iter().map(|c| c.key.as_str())
    }

    /// Width/height ratio of one output cell, 1.0 for variable-width fonts.
    pub fn font_aspect_ratio(&self, row_spacing: f32) -> f32 {
        if self.monospace {
            let row_height = (row_spacing * self.char_height as f32).round().max(1.0);
            self.max_char_width as f32 / row_height
        } else {
            1.0
        }
    }

    /// Grid size (columns, rows) a source image should be resized to for
    /// `num_rows` output rows, preserving the source aspect ratio corrected
    /// for the glyph aspect ratio of this font.
    pub fn target_size(
        &self,
        original_size: (u32, u32),
        num_rows: u32,
        row_spacing: f32,
    ) -> (u32, u32) {
        let original_ar = original_size.0 as f32 / original_size.1.max(1) as f32;
        let num_rows = num_rows.max(1);
        let cols = if self.monospace {
            let new_ar = original_ar / self.font_aspect_ratio(row_spacing);
            (num_rows as f32 * new_ar).round()
        } else {
            (num_rows as f32 * original_ar * row_spacing).round()
        };
        (cols.max(1.0) as u32, num_rows)
    }

    /// Grid size for a requested total character budget.
    pub fn estimate_size(
        &self,
        original_size: (u32, u32),
        num_characters: u32,
        row_spacing: f32,
    ) -> (u32, u32) {
        let original_ar = original_size.0 as f32 / original_size.1.max(1) as f32;
        let new_ar = (original_ar / self.font_aspect_ratio(row_spacing)).max(f32::EPSILON);
        let rows = (num_characters as f32 / new_ar).sqrt().round().max(1.0) as u32;
        self.target_size(original_size, rows, row_spacing)
    }

    /// Converts a decoded frame (one pixel per character cell row) into one
    /// line of text per pixel row.
    pub fn query(&self, frame: &Frame, metric: DistanceMetric) -> String {
        if self.monospace {
            self.query_monospace(frame, metric)
        } else {
            self.query_variable_width(frame, metric)
        }
    }

    fn query_monospace(&self, frame: &Frame, metric: DistanceMetric) -> String {
        let rows: Vec<String> = (0..frame.height)
            .into_par_iter()
            .map(|y| {
                let mut line = String::with_capacity(frame.width as usize);
                for x in 0..frame.width {
                    let p = frame.pixel(x, y);
                    let target = [p[0] as f32, p[1] as f32, p[2] as f32];
                    if let Some(idx) = self.tree.nearest(target, metric) {
                        line.push_str(&self.candidates[idx as usize].key);
                    }
                }
                line
            })
            .collect();
        rows.join("\n")
    }

    /// Variable-width layout: each pixel of a row represents `char_height`
    /// horizontal render pixels. A per-row cursor advances by the chosen
    /// candidate's width (kerning-adjusted against the previous character)
    /// and the row terminates once the cursor passes the row's pixel width.
    /// Rows finish after different numbers of characters; each is filled to
    /// completion independently.
    fn query_variable_width(&self, frame: &Frame, metric: DistanceMetric) -> String {
        let line_width = frame.width as i64 * self.char_height as i64;
        let rows: Vec<String> = (0..frame.height)
            .into_par_iter()
            .map(|y| {
                let mut line = String::new();
                let mut cursor: i64 = 0;
                let mut prev_char: Option<char> = None;
                while cursor < line_width {
                    let cell = (cursor / self.char_height as i64) as u32;
                    let p = frame.pixel(cell.min(frame.width - 1), y);
                    let target = [p[0] as f32, p[1] as f32, p[2] as f32];
                    let Some(idx) = self.tree.nearest(target, metric) else {
                        break;
                    };
                    let candidate = &self.candidates[idx as usize];
                    let mut advance = candidate.width_px as i64;
                    if let (Some(kerning), Some(prev)) = (&self.kerning, prev_char) {
                        if let Some(first) = candidate.key.chars().next() {
                            if let Some(adjust) = kerning.get(&(prev, first)) {
                                advance += *adjust as i64;
                            }
                        }
                    }
                    line.push_str(&candidate.key);
                    // A kerning pair can cancel the whole advance; clamp so a
                    // row always makes progress.
                    cursor += advance.max(1);
                    prev_char = candidate.key.chars().last();
                }
                line
            })
            .collect();
        rows.join("\n")
    }
}

fn resolve_font_path(font_source: &Path) -> CastResult<PathBuf> {
    if font_source.is_file() {
        return Ok(font_source.to_path_buf());
    }
    for dir in system_font_dirs() {
        let candidate = dir.join(font_source);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(CastError::FontNotFound {
        path: font_source.to_path_buf(),
    })
}

/// Filter pass over the font cmap: printable characters of the requested
/// charset that the font actually maps, deduplicated so each glyph keeps its
/// lowest code point.
fn retained_glyphs(
    face: &ttf_parser::Face<'_>,
    charset: &Charset,
) -> BTreeMap<ttf_parser::GlyphId, char> {
    let chars: Vec<char> = match charset {
        Charset::Ascii => (0x20u8..0x7f).map(char::from).collect(),
        Charset::Explicit(set) => set.iter().copied().collect(),
        Charset::Full => {
            let mut codepoints = Vec::new();
            if let Some(cmap) = face.tables().cmap {
                for subtable in cmap.subtables {
                    if subtable.is_unicode() {
                        subtable.codepoints(|cp| codepoints.push(cp));
                    }
                }
            }
            codepoints.sort_unstable();
            codepoints.dedup();
            codepoints
                .into_iter()
                .filter_map(char::from_u32)
                .collect()
        }
    };
    let mut retained: BTreeMap<ttf_parser::GlyphId, char> = BTreeMap::new();
    for ch in chars {
        if ch == '\n' || ch.is_control() {
            continue;
        }
        let Some(gid) = face.glyph_index(ch) else {
            continue;
        };
        // BTreeMap iteration above is in code point order only for Explicit
        // sets; compare explicitly so the lowest code point always wins.
        match retained.entry(gid) {
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(ch);
            }
            std::collections::btree_map::Entry::Occupied(mut e) => {
                if ch < *e.get() {
                    e.insert(ch);
                }
            }
        }
    }
    retained
}

/// A font is monospace iff every retained glyph shares one advance width,
/// ignoring zero-width entries.
fn detect_monospace(
    face: &ttf_parser::Face<'_>,
    retained: &BTreeMap<ttf_parser::GlyphId, char>,
) -> bool {
    monospace_from_advances(
        retained
            .keys()
            .filter_map(|&gid| face.glyph_hor_advance(gid)),
    )
}

fn monospace_from_advances(advances: impl IntoIterator<Item = u16>) -> bool {
    let widths: BTreeSet<u16> = advances.into_iter().filter(|&w| w != 0).collect();
    widths.len() <= 1
}

/// Folds GSUB ligature substitution rules into multi-character candidates.
/// Only ligatures whose every component is a retained character are kept,
/// and the first substitution found per component sequence wins.
fn ligature_candidates(
    face: &ttf_parser::Face<'_>,
    retained: &BTreeMap<ttf_parser::GlyphId, char>,
) -> Vec<(String, ttf_parser::GlyphId)> {
    let mut out: Vec<(String, ttf_parser::GlyphId)> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let Some(gsub) = face.tables().gsub else {
        return out;
    };
    for lookup_idx in 0..gsub.lookups.len() {
        let Some(lookup) = gsub.lookups.get(lookup_idx) else {
            continue;
        };
        for sub_idx in 0..lookup.subtables.len() {
            let Some(ttf_parser::gsub::SubstitutionSubtable::Ligature(lig)) = lookup
                .subtables
                .get::<ttf_parser::gsub::SubstitutionSubtable>(sub_idx)
            else {
                continue;
            };
            for (&first_gid, &first_char) in retained {
                let Some(coverage_idx) = lig.coverage.get(first_gid) else {
                    continue;
                };
                let Some(set) = lig.ligature_sets.get(coverage_idx) else {
                    continue;
                };
                for lig_idx in 0..set.len() {
                    let Some(ligature) = set.get(lig_idx) else {
                        continue;
                    };
                    let mut key = String::new();
                    key.push(first_char);
                    let mut all_retained = true;
                    for comp_idx in 0..ligature.components.len() {
                        match ligature
                            .components
                            .get(comp_idx)
                            .and_then(|gid| retained.get(&gid))
                        {
                            Some(&ch) => key.push(ch),
                            None => {
                                all_retained = false;
                                break;
                            }
                        }
                    }
                    if all_retained && key.chars().count() > 1 && seen.insert(key.clone()) {
                        out.push((key, ligature.glyph));
                    }
                }
            }
        }
    }
    out
}

/// Horizontal kerning adjustments between retained character pairs, in
/// render pixels.
fn kerning_pairs(
    face: &ttf_parser::Face<'_>,
    retained: &BTreeMap<ttf_parser::GlyphId, char>,
    units_to_px: &dyn Fn(i32) -> i32,
) -> Option<HashMap<(char, char), i32>> {
    let kern = face.tables().kern?;
    let mut pairs = HashMap::new();
    for subtable in kern.subtables {
        if !subtable.horizontal || subtable.variable {
            continue;
        }
        for (&left_gid, &left_char) in retained {
            for (&right_gid, &right_char) in retained {
                if let Some(value) = subtable.glyphs_kerning(left_gid, right_gid) {
                    let px = units_to_px(value as i32);
                    if px != 0 {
                        pairs.entry((left_char, right_char)).or_insert(px);
                    }
                }
            }
        }
    }
    Some(pairs)
}

/// Average RGB of one glyph rendered into a `cell_w × cell_h` cell.
///
/// Returns `None` when the cell is degenerate. With embedded color enabled
/// the font's raster glyph image (color emoji) takes precedence over the
/// outline; otherwise glyph coverage is blended text-over-background.
#[allow(clippy::too_many_arguments)]
fn render_average(
    face: &ttf_parser::Face<'_>,
    render_font: &FontRef<'_>,
    gid: ttf_parser::GlyphId,
    scale: PxScale,
    ascent_px: i32,
    cell_w: u32,
    cell_h: u32,
    options: &FontOptions,
) -> Option<[f64; 3]> {
    let area = cell_w as f64 * cell_h as f64;
    if area == 0.0 {
        return None;
    }
    if options.use_embedded_color {
        if let Some(avg) = raster_average(face, gid, options) {
            return Some(avg);
        }
    }
    let glyph = ab_glyph::GlyphId(gid.0)
        .with_scale_and_position(scale, ab_glyph::point(0.0, ascent_px as f32));
    let bg = options.bg_color.map(f64::from);
    let text = options.text_color.map(f64::from);
    let mut coverage_sum = 0.0f64;
    if let Some(outlined) = render_font.outline_glyph(glyph) {
        let bounds = outlined.px_bounds();
        outlined.draw(|x, y, c| {
            let px = bounds.min.x as i32 + x as i32;
            let py = bounds.min.y as i32 + y as i32;
            if px >= 0 && (px as u32) < cell_w && py >= 0 && (py as u32) < cell_h {
                coverage_sum += c.clamp(0.0, 1.0) as f64;
            }
        });
    }
    // Every cell pixel starts at the background color; covered pixels blend
    // toward the text color, so the average follows directly.
    let mut avg = [0.0f64; 3];
    for c in 0..3 {
        avg[c] = bg[c] + coverage_sum * (text[c] - bg[c]) / area;
    }
    Some(avg)
}

/// Average of an embedded raster glyph image, alpha-blended over the
/// background color. `None` when the font has no raster image for the glyph
/// or it cannot be decoded.
fn raster_average(
    face: &ttf_parser::Face<'_>,
    gid: ttf_parser::GlyphId,
    options: &FontOptions,
) -> Option<[f64; 3]> {
    let raster = face.glyph_raster_image(gid, u16::MAX)?;
    if raster.format != ttf_parser::RasterImageFormat::PNG {
        return None;
    }
    let decoded = image::load_from_memory(raster.data).ok()?.to_rgba8();
    let (w, h) = decoded.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    let bg = options.bg_color.map(f64::from);
    let mut sum = [0.0f64; 3];
    for px in decoded.pixels() {
        let alpha = px[3] as f64 / 255.0;
        for c in 0..3 {
            sum[c] += bg[c] + alpha * (px[c] as f64 - bg[c]);
        }
    }
    let area = (w * h) as f64;
    Some([sum[0] / area, sum[1] / area, sum[2] / area])
}

/// Per-channel min-max scaling to [0, 255]. A channel with no spread maps
/// to 0 so it stops influencing distances.
fn normalize_averages(averages: &[[f64; 3]]) -> Vec<[f32; 3]> {
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for avg in averages {
        for c in 0..3 {
            min[c] = min[c].min(avg[c]);
            max[c] = max[c].max(avg[c]);
        }
    }
    averages
        .iter()
        .map(|avg| {
            let mut out = [0.0f32; 3];
            for c in 0..3 {
                let spread = max[c] - min[c];
                out[c] = if spread > 0.0 {
                    ((avg[c] - min[c]) / spread * 255.0) as f32
                } else {
                    0.0
                };
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot_hash_index() -> GlyphIndex {
        // Black text on white background, normalized: '.' is mostly
        // background (bright), '#' is mostly ink (dark).
        GlyphIndex::from_parts(
            vec![(".", 10, [255.0, 255.0, 255.0]), ("#", 10, [0.0, 0.0, 0.0])],
            None,
            true,
            10,
        )
    }

    fn frame_of(width: u32, height: u32, pixels: &[[u8; 3]]) -> Frame {
        let data = pixels.iter().flatten().copied().collect();
        Frame::new(width, height, data).unwrap()
    }

    #[test]
    fn white_pixel_maps_to_dot_black_to_hash() {
        let index = dot_hash_index();
        let white = frame_of(1, 1, &[[255, 255, 255]]);
        let black = frame_of(1, 1, &[[0, 0, 0]]);
        assert_eq!(index.query(&white, DistanceMetric::Manhattan), ".");
        assert_eq!(index.query(&black, DistanceMetric::Manhattan), "#");
    }

    #[test]
    fn monospace_output_has_exact_grid_shape() {
        let index = dot_hash_index();
        let pixels: Vec<[u8; 3]> = (0..12)
            .map(|i| if i % 2 == 0 { [255; 3] } else { [0; 3] })
            .collect();
        let text = index.query(&frame_of(4, 3, &pixels), DistanceMetric::Euclidean);
        let lines: Vec<&str> = text.split('\n').collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.chars().count() == 4));
    }

    #[test]
    fn conversion_is_idempotent() {
        let index = dot_hash_index();
        let pixels: Vec<[u8; 3]> = (0..16).map(|i| [(i * 16) as u8; 3]).collect();
        let frame = frame_of(4, 4, &pixels);
        assert_eq!(
            index.query(&frame, DistanceMetric::Manhattan),
            index.query(&frame, DistanceMetric::Manhattan)
        );
    }

    #[test]
    fn variable_width_rows_fill_to_the_pixel_width() {
        // char_height = 10, so each image pixel spans 10 render px. 'w' is
        // wide (20 px), 'i' narrow (5 px): a 3-pixel row is 30 px, which
        // fits "ww" (wider budget exhausted at 40 > 30 after two) versus
        // six 'i's.
        let index = GlyphIndex::from_parts(
            vec![("w", 20, [255.0, 255.0, 255.0]), ("i", 5, [0.0, 0.0, 0.0])],
            None,
            false,
            10,
        );
        let bright = frame_of(3, 1, &[[255; 3], [255; 3], [255; 3]]);
        let dark = frame_of(3, 1, &[[0; 3], [0; 3], [0; 3]]);
        assert_eq!(index.query(&bright, DistanceMetric::Manhattan), "ww");
        assert_eq!(index.query(&dark, DistanceMetric::Manhattan), "iiiiii");
    }

    #[test]
    fn variable_width_rows_may_have_different_lengths() {
        let index = GlyphIndex::from_parts(
            vec![("w", 20, [255.0, 255.0, 255.0]), ("i", 5, [0.0, 0.0, 0.0])],
            None,
            false,
            10,
        );
        let frame = frame_of(2, 2, &[[255; 3], [255; 3], [0; 3], [0; 3]]);
        let text = index.query(&frame, DistanceMetric::Manhattan);
        let lines: Vec<&str> = text.split('\n').collect();
        assert_eq!(lines, vec!["w", "iiii"]);
    }

    #[test]
    fn kerning_shortens_the_cursor_advance() {
        let mut kerning = HashMap::new();
        kerning.insert(('a', 'a'), -5i32);
        // 10 px advance, -5 kerning after the first char: a 30 px row fits
        // "aaaaa" (10 + 5 + 5 + 5 + 5 = 30) instead of three.
        let index = GlyphIndex::from_parts(
            vec![("a", 10, [0.0, 0.0, 0.0]), ("b", 10, [255.0, 255.0, 255.0])],
            Some(kerning),
            false,
            10,
        );
        let dark = frame_of(3, 1, &[[0; 3], [0; 3], [0; 3]]);
        assert_eq!(index.query(&dark, DistanceMetric::Manhattan), "aaaaa");
    }

    #[test]
    fn kerning_never_stalls_a_row() {
        let mut kerning = HashMap::new();
        kerning.insert(('a', 'a'), -10i32);
        let index = GlyphIndex::from_parts(
            vec![("a", 10, [0.0, 0.0, 0.0]), ("b", 10, [255.0, 255.0, 255.0])],
            Some(kerning),
            false,
            10,
        );
        let dark = frame_of(2, 1, &[[0; 3], [0; 3]]);
        // Advance clamps to 1 px, so the row terminates.
        let out = index.query(&dark, DistanceMetric::Manhattan);
        assert!(!out.is_empty() && out.len() <= 20);
    }

    #[test]
    fn one_divergent_advance_width_breaks_monospace() {
        assert!(monospace_from_advances([600, 600, 600, 600]));
        // Zero-width entries (combining marks) are ignored.
        assert!(monospace_from_advances([600, 0, 600]));
        assert!(!monospace_from_advances([600, 600, 700]));
        assert!(monospace_from_advances([]));
    }

    #[test]
    fn normalization_spans_full_range_and_handles_flat_channels() {
        let normalized = normalize_averages(&[
            [10.0, 128.0, 40.0],
            [60.0, 128.0, 90.0],
            [110.0, 128.0, 240.0],
        ]);
        assert_eq!(normalized[0][0], 0.0);
        assert_eq!(normalized[2][0], 255.0);
        // Flat channel maps to 0 instead of NaN.
        assert!(normalized.iter().all(|n| n[1] == 0.0));
        assert_eq!(normalized[2][2], 255.0);
    }

    #[test]
    fn monospace_target_size_preserves_corrected_aspect_ratio() {
        let index = GlyphIndex::from_parts(
            vec![(".", 5, [255.0; 3]), ("#", 5, [0.0; 3])],
            None,
            true,
            10,
        );
        // Font aspect ratio 5/10 = 0.5; a square source at 20 rows needs
        // 40 columns to stay square.
        assert_eq!(index.target_size((500, 500), 20, 1.0), (40, 20));
        // Row spacing stretches rows, widening the grid proportionally.
        assert_eq!(index.target_size((500, 500), 20, 2.0), (80, 20));
    }

    #[test]
    fn estimate_size_approximates_the_character_budget() {
        let index = GlyphIndex::from_parts(
            vec![(".", 5, [255.0; 3]), ("#", 5, [0.0; 3])],
            None,
            true,
            10,
        );
        let (cols, rows) = index.estimate_size((1920, 1080), 5000, 1.0);
        let total = cols * rows;
        assert!((2500..=10000).contains(&total), "total {total}");
        assert!(cols >= 1 && rows >= 1);
    }

    #[test]
    fn missing_font_file_is_a_typed_error() {
        let result = GlyphIndex::build(
            Path::new("definitely-not-a-font-2fa9.ttf"),
            &FontOptions::default(),
        );
        assert!(matches!(result, Err(CastError::FontNotFound { .. })));
    }

    #[test]
    fn zero_render_size_is_rejected() {
        let result = GlyphIndex::build(
            Path::new("x.ttf"),
            &FontOptions::default().with_render_size(0),
        );
        assert!(matches!(result, Err(CastError::InvalidParameter(_))));
    }
}
