//! Mapping logical image references to on-disk paths.
//!
//! Saved threads keep their images under a per-owner directory tree rooted
//! at the configured save root:
//!
//! ```text
//! <save_root>/
//! ├── <board_subdir>/
//! │   └── spoiler.<ext>              # Spoiler placeholder, shared per board
//! └── <images_subdir>/
//!     ├── <original>.<ext>           # Full image, stored extension
//!     └── <original>_thumb.<ext>     # Thumbnail, extension from its URL
//! ```
//!
//! The subdirectory names come from the owning collection ([`OwnerContext`]).
//! Nothing here touches the filesystem; it only builds paths.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Fixed stem of the spoiler placeholder image.
pub const SPOILER_STEM: &str = "spoiler";

/// Appended to the original name for thumbnails.
pub const THUMBNAIL_SUFFIX: &str = "_thumb";

/// Used when a spoiler URL yields no extension.
pub const DEFAULT_SPOILER_EXTENSION: &str = "jpg";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Could not derive a file extension from thumbnail url '{url}'")]
    MissingExtension { url: String },
    #[error("Remote image has no thumbnail url to fetch")]
    MissingUrl,
}

/// The collection an image belongs to (a saved thread or its board).
///
/// Implemented by whatever owns the content; the resolver only needs the two
/// subdirectory names and whether the collection lives on local disk.
pub trait OwnerContext {
    /// Directory shared by every thread of the owner's board.
    fn board_subdir(&self) -> PathBuf;
    /// Directory holding this owner's images.
    fn images_subdir(&self) -> PathBuf;
    /// Whether images for this owner are read from disk rather than fetched.
    fn is_local(&self) -> bool;

    /// A `Send` snapshot that can cross to a worker thread.
    fn dirs(&self) -> OwnerDirs {
        OwnerDirs {
            board_subdir: self.board_subdir(),
            images_subdir: self.images_subdir(),
            is_local: self.is_local(),
        }
    }
}

/// Plain-data owner directories, relative to the save root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerDirs {
    pub board_subdir: PathBuf,
    pub images_subdir: PathBuf,
    pub is_local: bool,
}

impl OwnerDirs {
    pub fn new(
        board_subdir: impl Into<PathBuf>,
        images_subdir: impl Into<PathBuf>,
        is_local: bool,
    ) -> Self {
        Self {
            board_subdir: board_subdir.into(),
            images_subdir: images_subdir.into(),
            is_local,
        }
    }

    /// Absolute directory for `location` under `save_root`.
    pub fn directory(&self, save_root: &Path, location: StorageLocation) -> PathBuf {
        match location {
            StorageLocation::Board => save_root.join(&self.board_subdir),
            StorageLocation::Images => save_root.join(&self.images_subdir),
        }
    }
}

impl OwnerContext for OwnerDirs {
    fn board_subdir(&self) -> PathBuf {
        self.board_subdir.clone()
    }

    fn images_subdir(&self) -> PathBuf {
        self.images_subdir.clone()
    }

    fn is_local(&self) -> bool {
        self.is_local
    }

    fn dirs(&self) -> OwnerDirs {
        self.clone()
    }
}

/// Which owner subdirectory a file lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLocation {
    Board,
    Images,
}

impl StorageLocation {
    /// Spoilers (and other board-level files) go to the board directory.
    pub fn for_spoiler(is_spoiler: bool) -> Self {
        if is_spoiler {
            StorageLocation::Board
        } else {
            StorageLocation::Images
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::Board => f.write_str("board"),
            StorageLocation::Images => f.write_str("images"),
        }
    }
}

/// A logical reference to one image of one owner.
///
/// The URLs are only consulted for their extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub owner: OwnerDirs,
    pub original_name: String,
    pub extension: String,
    pub is_thumbnail: bool,
    pub is_spoiler: bool,
    pub thumbnail_url: Option<String>,
    pub spoiler_url: Option<String>,
}

impl ImageReference {
    /// Reference to the full image, stored as `<original_name>.<extension>`.
    pub fn original(
        owner: &dyn OwnerContext,
        original_name: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.dirs(),
            original_name: original_name.into(),
            extension: extension.into(),
            is_thumbnail: false,
            is_spoiler: false,
            thumbnail_url: None,
            spoiler_url: None,
        }
    }

    /// Switch to the thumbnail variant, whose extension comes from `url`.
    pub fn thumbnail(mut self, url: impl Into<String>) -> Self {
        self.is_thumbnail = true;
        self.thumbnail_url = Some(url.into());
        self
    }

    /// Switch to the spoiler placeholder, whose extension comes from `url`.
    pub fn spoiler(mut self, url: impl Into<String>) -> Self {
        self.is_spoiler = true;
        self.spoiler_url = Some(url.into());
        self
    }

    /// Record the thumbnail URL without selecting the thumbnail variant.
    /// Network pass-through needs it even for full-image references.
    pub fn with_thumbnail_url(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }
}

/// A formatted filename together with the directory it belongs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedName {
    pub filename: String,
    pub location: StorageLocation,
}

/// Base for resolving relative references such as `/g/1234s.jpg`.
const RELATIVE_BASE: &str = "http://localhost/";

/// Extension of the last path segment of `url`, without the dot.
///
/// The URL is parsed properly, so the host, query and fragment never
/// contribute; relative references are resolved against a dummy base.
/// Returns `None` when the last segment has no dot, ends with one, or the
/// extension is not purely alphanumeric.
///
/// ```
/// use chan_image::resolve::extension_from_url;
///
/// assert_eq!(extension_from_url("https://i.example/g/1234s.jpg?x=1").as_deref(), Some("jpg"));
/// assert_eq!(extension_from_url("https://i.example/g/1234"), None);
/// assert_eq!(extension_from_url("https://i.example.org"), None);
/// ```
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(RELATIVE_BASE).ok()?.join(url).ok()?
        }
        Err(_) => return None,
    };
    let segment = parsed.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_string())
}

pub fn spoiler_file_name(extension: &str) -> String {
    format!("{SPOILER_STEM}.{extension}")
}

pub fn thumbnail_file_name(original_name: &str, extension: &str) -> String {
    format!("{original_name}{THUMBNAIL_SUFFIX}.{extension}")
}

pub fn original_file_name(original_name: &str, extension: &str) -> String {
    format!("{original_name}.{extension}")
}

/// Format the filename of `reference` and pick its directory.
///
/// Spoiler takes precedence over thumbnail. A thumbnail whose URL has no
/// derivable extension is [`ResolveError::MissingExtension`].
pub fn resolve_filename(reference: &ImageReference) -> Result<ResolvedName, ResolveError> {
    let filename = if reference.is_spoiler {
        let extension = reference
            .spoiler_url
            .as_deref()
            .and_then(extension_from_url)
            .unwrap_or_else(|| DEFAULT_SPOILER_EXTENSION.to_string());
        spoiler_file_name(&extension)
    } else if reference.is_thumbnail {
        let url = reference.thumbnail_url.as_deref().unwrap_or_default();
        let extension =
            extension_from_url(url).ok_or_else(|| ResolveError::MissingExtension {
                url: url.to_string(),
            })?;
        thumbnail_file_name(&reference.original_name, &extension)
    } else {
        original_file_name(&reference.original_name, &reference.extension)
    };

    Ok(ResolvedName {
        filename,
        location: StorageLocation::for_spoiler(reference.is_spoiler),
    })
}

/// Full on-disk path of `reference` under `save_root`.
pub fn resolve_path(save_root: &Path, reference: &ImageReference) -> Result<PathBuf, ResolveError> {
    let name = resolve_filename(reference)?;
    Ok(reference
        .owner
        .directory(save_root, name.location)
        .join(name.filename))
}
