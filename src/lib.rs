//! # chan-image
//!
//! Disk-backed image handling for saved imageboard threads. Images of a saved
//! thread live on disk under a per-thread directory; this crate finds them,
//! checks what they are, rewrites them before upload, and loads them for
//! display without blocking the caller's thread.
//!
//! # Architecture
//!
//! ```text
//! ImageReference ──▶ resolve ──▶ <save_root>/<owner dir>/<filename>
//!                                     │
//!               ┌─────────────────────┴──────────────────────┐
//!               ▼                                            ▼
//!     reencode (upload path)                       bridge (display path)
//!   sniff → decode → rotate/resize/            worker thread: check → decode
//!   perturb → encode into scratch              caller thread: dispatch()
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`sniff`] | Detects PNG and JPEG from the leading bytes of a file |
//! | [`resolve`] | Maps an image reference to a filename and owner directory |
//! | [`scratch`] | Temp artifacts in the scratch directory, with stale sweeping |
//! | [`reencode`] | Rotate, reduce, convert and perturb an image into a new file |
//! | [`bridge`] | Background disk loads delivered on the caller's thread |
//! | [`imaging`] | Codec backend, pure geometry, transform planning |
//! | [`checksum`] | SHA-256 of files for before/after comparison |
//! | [`config`] | `chan-image.toml` loading, validation, merging |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Content Sniffing Over Extensions
//!
//! Saved files are named after the board's filenames, and those extensions
//! lie often enough to matter. Every decision about format is made from the
//! file's magic bytes, never from its name.
//!
//! ## Scratch Files Own Themselves
//!
//! A re-encode produces a [`scratch::TempArtifact`]. Dropping it deletes the
//! file; promoting it moves the file to its final place. Anything an
//! interrupted run left behind is swept the next time an artifact is created
//! in the same directory.
//!
//! ## Thread Affinity in the Type System
//!
//! [`bridge::DiskBridge`] and its handles are built on `Rc` and `RefCell`,
//! so the compiler rejects any attempt to use them from a second thread.
//! Worker results only reach callbacks through
//! [`bridge::DiskBridge::dispatch`].

pub mod bridge;
pub mod checksum;
pub mod config;
pub mod imaging;
pub mod output;
pub mod reencode;
pub mod resolve;
pub mod scratch;
pub mod sniff;

#[cfg(test)]
pub(crate) mod test_helpers;
