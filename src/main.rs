use anyhow::{anyhow, Context, Result};
use charcast::{
    cache, list_system_fonts, Charset, DistanceMetric, FontOptions, TextImage, TextVideo,
    VideoOptions,
};
use clap::{Args as ClapArgs, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Render images and videos as text using real font glyphs.")]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    /// Log pipeline details to standard error
    #[arg(long, global = true, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert an image, or replay a saved image render
    Image {
        /// Input image (PNG, JPG) or .cti render file
        input: PathBuf,

        /// Write a render file instead of printing to stdout
        #[arg(long, short)]
        out: Option<PathBuf>,

        /// Approximate number of characters in the output
        #[arg(long, default_value_t = 5_000)]
        characters: u32,

        /// Vertical spacing multiplier of the target medium
        #[arg(long, default_value_t = 1.0)]
        row_spacing: f32,

        /// Color distance metric: manhattan or euclidean
        #[arg(long, default_value = "manhattan")]
        metric: String,

        #[command(flatten)]
        font: FontArgs,
    },
    /// Convert a video, or replay a saved video render
    Video {
        /// Input video or .ctv render file
        input: PathBuf,

        /// Write a render file instead of printing frames to stdout
        #[arg(long, short)]
        out: Option<PathBuf>,

        /// Output frames per second
        #[arg(long, default_value_t = 30)]
        fps: u32,

        /// Seconds of video transcoded per chunk
        #[arg(long, default_value_t = 10)]
        chunk_length: u32,

        /// Converted frames buffered ahead of playback
        #[arg(long, default_value_t = 30)]
        buffer: usize,

        /// Start playback at this many seconds in
        #[arg(long, default_value_t = 0.0)]
        start: f64,

        /// Approximate number of characters per frame
        #[arg(long, default_value_t = 5_000)]
        characters: u32,

        /// Vertical spacing multiplier of the target medium
        #[arg(long, default_value_t = 1.0)]
        row_spacing: f32,

        /// Color distance metric: manhattan or euclidean
        #[arg(long, default_value = "manhattan")]
        metric: String,

        #[command(flatten)]
        font: FontArgs,
    },
    /// List fonts found in the system font directories
    Fonts,
}

#[derive(ClapArgs, Debug)]
struct FontArgs {
    /// Font file path, or a file name searched in the system font dirs
    #[arg(long, default_value = "DejaVuSansMono.ttf")]
    font: PathBuf,

    /// Characters to draw with: "ascii", "full", or an explicit string
    #[arg(long, default_value = "ascii")]
    charset: String,

    /// Text color as r,g,b
    #[arg(long, default_value = "0,0,0")]
    text_color: String,

    /// Background color as r,g,b
    #[arg(long, default_value = "255,255,255")]
    bg_color: String,

    /// Ignore kerning tables when laying out variable-width output
    #[arg(long, default_value_t = false)]
    no_kerning: bool,

    /// Do not substitute ligatures
    #[arg(long, default_value_t = false)]
    no_ligatures: bool,

    /// Lay out a proportional font on a fixed grid
    #[arg(long, default_value_t = false)]
    force_monospace: bool,

    /// Glyph rasterization height in pixels
    #[arg(long, default_value_t = 100)]
    render_size: u32,
}

impl FontArgs {
    fn to_options(&self) -> Result<FontOptions> {
        let charset = match self.charset.as_str() {
            "ascii" => Charset::Ascii,
            "full" => Charset::Full,
            explicit => Charset::explicit(explicit.chars()),
        };
        Ok(FontOptions::default()
            .with_charset(charset)
            .with_colors(
                parse_color(&self.text_color)?,
                parse_color(&self.bg_color)?,
            )
            .with_kerning(!self.no_kerning)
            .with_ligatures(!self.no_ligatures)
            .with_force_monospace(self.force_monospace)
            .with_render_size(self.render_size))
    }
}

fn parse_color(value: &str) -> Result<[u8; 3]> {
    let parts: Vec<u8> = value
        .split(',')
        .map(|p| p.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("parsing color '{value}'"))?;
    match parts[..] {
        [r, g, b] => Ok([r, g, b]),
        _ => Err(anyhow!("color '{value}' must be r,g,b")),
    }
}

fn parse_metric(value: &str) -> Result<DistanceMetric> {
    Ok(value.parse::<DistanceMetric>()?)
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .init();

    match args.cmd {
        Command::Image {
            input,
            out,
            characters,
            row_spacing,
            metric,
            font,
        } => {
            let metric = parse_metric(&metric)?;
            let options = font.to_options()?;
            let image = match cache::detect(&input)? {
                cache::MediaKind::CachedImage => {
                    TextImage::open(&input, &font.font, &options, characters)?
                }
                cache::MediaKind::CachedVideo => {
                    return Err(anyhow!(
                        "{} is a video render, use the video subcommand",
                        input.display()
                    ))
                }
                cache::MediaKind::Raw => {
                    let index = charcast::GlyphIndex::build(&font.font, &options)?;
                    TextImage::convert(&input, &index, metric, characters, row_spacing)?
                }
            };
            match out {
                Some(path) => {
                    image.save(&path)?;
                    println!("Saved render to {}", path.display());
                }
                None => print!("{}", image.text()),
            }
        }
        Command::Video {
            input,
            out,
            fps,
            chunk_length,
            buffer,
            start,
            characters,
            row_spacing,
            metric,
            font,
        } => {
            let options = VideoOptions::default()
                .with_frame_rate(fps)
                .with_chunk_length(chunk_length)
                .with_buffer_depth(buffer)
                .with_num_characters(characters)
                .with_row_spacing(row_spacing)
                .with_metric(parse_metric(&metric)?);
            let mut video =
                TextVideo::open(&input, &font.font, &font.to_options()?, &options)?;
            match out {
                Some(path) => save_video(&mut video, &path)?,
                None => {
                    if start > 0.0 {
                        video.set_time(start)?;
                    }
                    while let Some(frame) = video.next_frame()? {
                        print!("{frame}");
                    }
                }
            }
        }
        Command::Fonts => {
            for font in list_system_fonts() {
                println!("{}", font.display());
            }
        }
    }
    Ok(())
}

fn save_video(video: &mut TextVideo, path: &PathBuf) -> Result<()> {
    let total = (video.duration_secs() * video.frame_rate() as f64).ceil() as u64;
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message("Converting frames");

    video.set_time(0.0)?;
    let frame_rate = video.frame_rate();
    let frames = std::iter::from_fn(|| match video.next_frame() {
        Ok(Some(frame)) => {
            pb.inc(1);
            Some(Ok(frame))
        }
        Ok(None) => None,
        Err(e) => Some(Err(e)),
    });
    let count = cache::write_text_video(frames, frame_rate, path)?;
    pb.finish_with_message("Done");
    println!("Saved {count} frames to {}", path.display());
    Ok(())
}
