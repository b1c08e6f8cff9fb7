//! Persisted text render files.
//!
//! Pre-rendered conversions are stored in self-describing binary files so
//! replay bypasses font querying and chunk scheduling entirely. All integers
//! are big-endian `u32`. A text image is `magic | utf8`; a text video is
//! `magic | frame_rate | frame_count | offset[frame_count]` followed by
//! length-prefixed UTF-8 frames, where each offset is the absolute byte
//! position of that frame's record, so seeking to a frame is one direct
//! read, never a scan.

use std::fs;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{CastError, CastResult};

/// Magic number of a persisted text image ("CTXI").
pub const TEXT_IMAGE_MAGIC: u32 = 0x4354_5849;
/// Magic number of a persisted text video ("CTXV").
pub const TEXT_VIDEO_MAGIC: u32 = 0x4354_5856;

const INT_SIZE: u64 = 4;
/// magic + frame_rate + frame_count.
const VIDEO_HEADER_SIZE: u64 = 3 * INT_SIZE;

/// What a media path actually contains, decided by magic number detection,
/// never by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    CachedImage,
    CachedVideo,
    /// Anything without a known magic number is treated as raw source media.
    Raw,
}

/// Classifies a file by its leading magic number.
pub fn detect(path: &Path) -> CastResult<MediaKind> {
    let mut file = fs::File::open(path).map_err(|e| CastError::io(path, e))?;
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() {
        return Ok(MediaKind::Raw);
    }
    Ok(match u32::from_be_bytes(magic) {
        TEXT_IMAGE_MAGIC => MediaKind::CachedImage,
        TEXT_VIDEO_MAGIC => MediaKind::CachedVideo,
        _ => MediaKind::Raw,
    })
}

/// Writes a text image render file.
pub fn save_text_image(text: &str, path: &Path) -> CastResult<()> {
    let mut file =
        BufWriter::new(fs::File::create(path).map_err(|e| CastError::io(path, e))?);
    file.write_all(&TEXT_IMAGE_MAGIC.to_be_bytes())
        .and_then(|_| file.write_all(text.as_bytes()))
        .and_then(|_| file.flush())
        .map_err(|e| CastError::io(path, e))
}

/// Reads a text image render file back.
pub fn load_text_image(path: &Path) -> CastResult<String> {
    let mut file = fs::File::open(path).map_err(|e| CastError::io(path, e))?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)
        .map_err(|e| CastError::io(path, e))?;
    if u32::from_be_bytes(magic) != TEXT_IMAGE_MAGIC {
        return Err(CastError::CacheFormat(format!(
            "'{}' is not a text image render",
            path.display()
        )));
    }
    let mut text = String::new();
    file.read_to_string(&mut text)
        .map_err(|e| CastError::io(path, e))?;
    Ok(text)
}

/// Removes its path on drop; keeps intermediate files from outliving a
/// failed or finished write.
struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Streams `frames` into a text video render file, returning the frame
/// count.
///
/// Frames are first written length-prefixed to a sibling `.tmp` file while
/// counting; the final file's offset table is then derived by re-scanning
/// the temporary file's prefixes, so each table entry is the absolute
/// position of its frame in the finished file.
pub fn write_text_video<I>(frames: I, frame_rate: u32, path: &Path) -> CastResult<u32>
where
    I: IntoIterator<Item = CastResult<String>>,
{
    let tmp = TempFileGuard::new(path.with_extension("ctv.tmp"));
    let mut frame_count: u32 = 0;
    {
        let mut file = BufWriter::new(
            fs::File::create(tmp.path()).map_err(|e| CastError::io(tmp.path(), e))?,
        );
        for frame in frames {
            let frame = frame?;
            let bytes = frame.as_bytes();
            file.write_all(&(bytes.len() as u32).to_be_bytes())
                .and_then(|_| file.write_all(bytes))
                .map_err(|e| CastError::io(tmp.path(), e))?;
            frame_count += 1;
        }
        file.flush().map_err(|e| CastError::io(tmp.path(), e))?;
    }

    let mut out =
        BufWriter::new(fs::File::create(path).map_err(|e| CastError::io(path, e))?);
    let io_err = |e| CastError::io(path, e);
    out.write_all(&TEXT_VIDEO_MAGIC.to_be_bytes()).map_err(io_err)?;
    out.write_all(&frame_rate.to_be_bytes()).map_err(io_err)?;
    out.write_all(&frame_count.to_be_bytes()).map_err(io_err)?;

    let frames_offset = VIDEO_HEADER_SIZE + frame_count as u64 * INT_SIZE;
    let mut tmp_file = BufReader::new(
        fs::File::open(tmp.path()).map_err(|e| CastError::io(tmp.path(), e))?,
    );
    // First pass over the prefixes: emit the absolute offset table.
    let mut position: u64 = 0;
    for _ in 0..frame_count {
        out.write_all(&((position + frames_offset) as u32).to_be_bytes())
            .map_err(io_err)?;
        let len = read_u32(&mut tmp_file).map_err(|e| CastError::io(tmp.path(), e))?;
        tmp_file
            .seek_relative(len as i64)
            .map_err(|e| CastError::io(tmp.path(), e))?;
        position += INT_SIZE + len as u64;
    }
    // Second pass: copy the frame records verbatim.
    tmp_file
        .seek(SeekFrom::Start(0))
        .map_err(|e| CastError::io(tmp.path(), e))?;
    std::io::copy(&mut tmp_file, &mut out).map_err(io_err)?;
    out.flush().map_err(io_err)?;
    Ok(frame_count)
}

/// Random-access reader over a text video render file.
pub struct TextVideoFile {
    reader: BufReader<fs::File>,
    path: PathBuf,
    frame_rate: u32,
    frame_count: u32,
}

impl TextVideoFile {
    pub fn open(path: &Path) -> CastResult<Self> {
        let file = fs::File::open(path).map_err(|e| CastError::io(path, e))?;
        let mut reader = BufReader::new(file);
        let magic = read_u32(&mut reader).map_err(|e| CastError::io(path, e))?;
        if magic != TEXT_VIDEO_MAGIC {
            return Err(CastError::CacheFormat(format!(
                "'{}' is not a text video render",
                path.display()
            )));
        }
        let frame_rate = read_u32(&mut reader).map_err(|e| CastError::io(path, e))?;
        let frame_count = read_u32(&mut reader).map_err(|e| CastError::io(path, e))?;
        if frame_rate == 0 {
            return Err(CastError::CacheFormat(format!(
                "'{}' declares a zero frame rate",
                path.display()
            )));
        }
        // Skip the offset table so sequential reads start at frame 0.
        reader
            .seek(SeekFrom::Start(VIDEO_HEADER_SIZE + frame_count as u64 * INT_SIZE))
            .map_err(|e| CastError::io(path, e))?;
        Ok(Self {
            reader,
            path: path.to_path_buf(),
            frame_rate,
            frame_count,
        })
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count as f64 / self.frame_rate as f64
    }

    /// Positions the reader at frame `index` through the offset table: one
    /// table read plus one seek, independent of `index`.
    pub fn seek_to_frame(&mut self, index: u32) -> CastResult<()> {
        if index >= self.frame_count {
            return Err(CastError::invalid_parameter(format!(
                "frame {index} out of range, render has {} frames",
                self.frame_count
            )));
        }
        let table_pos = VIDEO_HEADER_SIZE + index as u64 * INT_SIZE;
        self.reader
            .seek(SeekFrom::Start(table_pos))
            .map_err(|e| CastError::io(&self.path, e))?;
        let offset = read_u32(&mut self.reader).map_err(|e| CastError::io(&self.path, e))?;
        self.reader
            .seek(SeekFrom::Start(offset as u64))
            .map_err(|e| CastError::io(&self.path, e))?;
        Ok(())
    }

    /// Reads the frame at the current position; `None` at end of file.
    pub fn next_frame(&mut self) -> CastResult<Option<String>> {
        let len = match read_u32(&mut self.reader) {
            Ok(len) => len,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(CastError::io(&self.path, e)),
        };
        let mut bytes = vec![0u8; len as usize];
        self.reader
            .read_exact(&mut bytes)
            .map_err(|e| CastError::io(&self.path, e))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| CastError::CacheFormat(format!("frame is not valid UTF-8: {e}")))
    }
}

fn read_u32(reader: &mut impl Read) -> std::io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_path(name: &str) -> TempFileGuard {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        TempFileGuard::new(
            std::env::temp_dir().join(format!("charcast_test_{}_{stamp}_{name}", std::process::id())),
        )
    }

    #[test]
    fn text_image_round_trips_exactly() {
        let guard = scratch_path("image.cti");
        let text = "@@##..\n..##@@\n";
        save_text_image(text, guard.path()).unwrap();
        assert_eq!(detect(guard.path()).unwrap(), MediaKind::CachedImage);
        assert_eq!(load_text_image(guard.path()).unwrap(), text);
    }

    #[test]
    fn detection_is_by_magic_not_extension() {
        let guard = scratch_path("render.png");
        save_text_image("##\n", guard.path()).unwrap();
        assert_eq!(detect(guard.path()).unwrap(), MediaKind::CachedImage);

        let raw = scratch_path("frame.cti");
        fs::write(raw.path(), b"definitely not a render").unwrap();
        assert_eq!(detect(raw.path()).unwrap(), MediaKind::Raw);

        let short = scratch_path("short");
        fs::write(short.path(), b"ab").unwrap();
        assert_eq!(detect(short.path()).unwrap(), MediaKind::Raw);
    }

    #[test]
    fn wrong_magic_is_a_format_error() {
        let guard = scratch_path("video-as-image");
        write_text_video(vec![Ok("x".to_string()), Ok("y".to_string())], 1, guard.path())
            .unwrap();
        assert!(matches!(
            load_text_image(guard.path()),
            Err(CastError::CacheFormat(_))
        ));
    }

    #[test]
    fn text_video_round_trips_in_order() {
        let guard = scratch_path("video.ctv");
        let frames = vec!["first\nframe", "sec⏣nd", "", "fourth"];
        let count = write_text_video(
            frames.iter().map(|f| Ok(f.to_string())),
            24,
            guard.path(),
        )
        .unwrap();
        assert_eq!(count, 4);

        let mut video = TextVideoFile::open(guard.path()).unwrap();
        assert_eq!(video.frame_rate(), 24);
        assert_eq!(video.frame_count(), 4);
        for expected in &frames {
            assert_eq!(video.next_frame().unwrap().as_deref(), Some(*expected));
        }
        assert_eq!(video.next_frame().unwrap(), None);
    }

    #[test]
    fn seek_to_frame_reads_directly_via_the_offset_table() {
        let guard = scratch_path("seek.ctv");
        let frames: Vec<String> = (0..50).map(|i| format!("frame-{i:03}")).collect();
        write_text_video(frames.iter().map(|f| Ok(f.clone())), 10, guard.path()).unwrap();

        let mut video = TextVideoFile::open(guard.path()).unwrap();
        for index in [49u32, 0, 37, 12, 12] {
            video.seek_to_frame(index).unwrap();
            assert_eq!(
                video.next_frame().unwrap().as_deref(),
                Some(frames[index as usize].as_str())
            );
        }
        assert!(matches!(
            video.seek_to_frame(50),
            Err(CastError::InvalidParameter(_))
        ));
    }

    #[test]
    fn offsets_are_absolute_byte_positions() {
        let guard = scratch_path("offsets.ctv");
        write_text_video(vec![Ok("ab".to_string()), Ok("cde".to_string())], 1, guard.path())
            .unwrap();
        let bytes = fs::read(guard.path()).unwrap();
        let offset_0 = u32::from_be_bytes(bytes[12..16].try_into().unwrap()) as usize;
        let offset_1 = u32::from_be_bytes(bytes[16..20].try_into().unwrap()) as usize;
        // Header (12) + table (2 * 4) = 20; record 0 is 4 + 2 bytes long.
        assert_eq!(offset_0, 20);
        assert_eq!(offset_1, 26);
        assert_eq!(&bytes[offset_0 + 4..offset_0 + 6], b"ab");
        assert_eq!(&bytes[offset_1 + 4..offset_1 + 7], b"cde");
    }

    #[test]
    fn failed_frame_aborts_the_write_and_cleans_up() {
        let guard = scratch_path("bad.ctv");
        let frames: Vec<CastResult<String>> = vec![
            Ok("one".to_string()),
            Err(CastError::SchedulerStopped),
        ];
        assert!(write_text_video(frames, 30, guard.path()).is_err());
        let tmp = guard.path().with_extension("ctv.tmp");
        assert!(!tmp.exists(), "temporary file left behind");
    }
}
