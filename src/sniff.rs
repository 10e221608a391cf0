//! Container format detection from leading file bytes.
//!
//! Only the two formats the re-encoder can produce are recognised:
//!
//! ```text
//! PNG   89 50 4E 47 0D 0A 1A 0A   (checked first)
//! JPEG  FF D8
//! ```
//!
//! File extensions are never consulted; saved images are frequently misnamed.

use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8];

/// How many leading bytes are read for detection.
pub const HEADER_LEN: usize = 16;

/// An image container format the pipeline can read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    /// Conventional file extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Png => f.write_str("PNG"),
            ImageFormat::Jpeg => f.write_str("JPEG"),
        }
    }
}

/// The three predicates that must hold before a file is read.
///
/// Always reported together so a failure says exactly which check broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Accessibility {
    pub exists: bool,
    pub is_file: bool,
    pub can_read: bool,
}

impl Accessibility {
    /// Check `path`. Readability is tested by actually opening the file.
    pub fn check(path: &Path) -> Self {
        let metadata = std::fs::metadata(path).ok();
        let exists = metadata.is_some();
        let is_file = metadata.as_ref().is_some_and(|m| m.is_file());
        let can_read = is_file && File::open(path).is_ok();
        Self {
            exists,
            is_file,
            can_read,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.exists && self.is_file && self.can_read
    }
}

impl fmt::Display for Accessibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exists = {}, isFile = {}, canRead = {}",
            self.exists, self.is_file, self.can_read
        )
    }
}

#[derive(Error, Debug)]
pub enum SniffError {
    #[error("File {} is inaccessible ({checks})", path.display())]
    Inaccessible {
        path: PathBuf,
        checks: Accessibility,
    },
    #[error("File {} is neither PNG nor JPEG", path.display())]
    Unsupported { path: PathBuf },
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Classify a header. PNG is checked before JPEG.
///
/// Headers shorter than a magic prefix never match it.
pub fn detect_bytes(header: &[u8]) -> Option<ImageFormat> {
    if header.starts_with(PNG_MAGIC) {
        Some(ImageFormat::Png)
    } else if header.starts_with(JPEG_MAGIC) {
        Some(ImageFormat::Jpeg)
    } else {
        None
    }
}

/// Detect the container format of a file on disk.
pub fn detect(path: &Path) -> Result<ImageFormat, SniffError> {
    let checks = Accessibility::check(path);
    if !checks.is_ok() {
        return Err(SniffError::Inaccessible {
            path: path.to_path_buf(),
            checks,
        });
    }

    let io_err = |source| SniffError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    file.take(HEADER_LEN as u64)
        .read_to_end(&mut header)
        .map_err(io_err)?;

    let format = detect_bytes(&header).ok_or_else(|| SniffError::Unsupported {
        path: path.to_path_buf(),
    })?;
    debug!(path = %path.display(), %format, "Sniffed image format");
    Ok(format)
}

/// Non-failing check used to gate "re-encode" actions.
pub fn is_supported(path: &Path) -> bool {
    detect(path).is_ok()
}
