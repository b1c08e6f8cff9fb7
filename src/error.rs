use std::path::PathBuf;

pub type CastResult<T> = Result<T, CastError>;

/// Error taxonomy for the conversion core.
///
/// Configuration errors (`FontNotFound`, `InsufficientCharset`,
/// `InvalidDistanceMetric`, `InvalidParameter`) are always surfaced
/// synchronously and never retried. Transcoding failures are not represented
/// here: the affected chunk is logged and dropped instead of failing the
/// pipeline.
#[derive(thiserror::Error, Debug)]
pub enum CastError {
    #[error("font file not found: {path}")]
    FontNotFound { path: PathBuf },

    #[error("could not parse font: {0}")]
    FontParse(String),

    #[error("charset resolved to {count} usable characters, at least 2 required")]
    InsufficientCharset { count: usize },

    #[error("invalid distance metric '{0}', use one of: manhattan, euclidean")]
    InvalidDistanceMetric(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("video player has been stopped")]
    SchedulerStopped,

    #[error("probing media failed: {0}")]
    Probe(String),

    #[error("malformed render file: {0}")]
    CacheFormat(String),

    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CastError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(CastError::FontNotFound {
            path: "missing.ttf".into()
        }
        .to_string()
        .contains("font file not found"));
        assert!(CastError::InsufficientCharset { count: 1 }
            .to_string()
            .contains("at least 2 required"));
        assert!(CastError::InvalidDistanceMetric("chebyshev".into())
            .to_string()
            .contains("chebyshev"));
        assert!(CastError::SchedulerStopped.to_string().contains("stopped"));
    }

    #[test]
    fn io_preserves_path_and_source() {
        let err = CastError::io("out.ctv", std::io::Error::other("disk full"));
        let text = err.to_string();
        assert!(text.contains("out.ctv"));
        assert!(text.contains("disk full"));
    }
}
