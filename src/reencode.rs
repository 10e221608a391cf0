//! Re-encoding a saved image into a fresh temp artifact.
//!
//! Used by the "re-save before upload" action: the image is decoded,
//! optionally scaled and rotated upright, perturbed so its checksum changes,
//! then encoded into a [`TempArtifact`] in the scratch directory. The source
//! file is never written.
//!
//! ## Steps
//!
//! ```text
//! settings + flags all no-op?  ──yes──▶  Reencoded::Original(input)
//!        │ no
//!        ▼
//! sniff ─▶ plan (target format, scale, rotation) ─▶ decode ─▶ scale + rotate
//!        ─▶ change checksum? ──yes──▶ encode baseline, perturb until bytes differ
//!        ─▶ TempArtifact ─▶ encode (or write the perturbed bytes)
//! ```
//!
//! The perturbation runs after resampling, so a resize cannot average it
//! away, and its encoded bytes are compared against an unperturbed encode of
//! the same image. The output therefore differs from what a plain re-encode
//! with the same settings would produce.
//!
//! Metadata never survives: the encoders write pixels only, so every
//! re-encode strips EXIF and friends whether or not `remove_metadata` is set.
//! The flag still forces a re-encode when nothing else would.
//!
//! Any error after the temp file exists drops the [`TempArtifact`], which
//! deletes it; a failed call leaves the scratch directory as it found it.

use crate::imaging::operations::{apply_transform, perturb_random_region, target_format};
use crate::imaging::{
    BackendError, CHECKSUM_ESCALATION, ImageBackend, RandomSource, ReencodeSettings, RustBackend,
    TransformPlan, XorShift, plan_transform,
};
use crate::scratch::{ScratchError, TempArtifact};
use crate::sniff::{self, ImageFormat, SniffError};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Error, Debug)]
pub enum ReencodeError {
    #[error(transparent)]
    Sniff(#[from] SniffError),
    #[error("Image processing failed: {0}")]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Scratch(#[from] ScratchError),
    #[error("IO error writing temp artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// The boolean switches of a re-encode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReencodeFlags {
    /// Rotate JPEGs upright according to their EXIF orientation.
    pub fix_exif: bool,
    /// Force a re-encode so metadata is dropped.
    pub remove_metadata: bool,
    /// Perturb pixels until the encoded bytes differ from a plain re-encode.
    pub change_checksum: bool,
}

impl ReencodeFlags {
    pub fn new(fix_exif: bool, remove_metadata: bool, change_checksum: bool) -> Self {
        Self {
            fix_exif,
            remove_metadata,
            change_checksum,
        }
    }

    pub fn any(&self) -> bool {
        self.fix_exif || self.remove_metadata || self.change_checksum
    }
}

/// Outcome of a re-encode.
#[derive(Debug)]
pub enum Reencoded {
    /// Nothing to do; the input path, untouched.
    Original(PathBuf),
    /// A freshly encoded file. Promote it or it is deleted on drop.
    Artifact {
        artifact: TempArtifact,
        format: ImageFormat,
        width: u32,
        height: u32,
    },
}

impl Reencoded {
    pub fn path(&self) -> &Path {
        match self {
            Reencoded::Original(path) => path,
            Reencoded::Artifact { artifact, .. } => artifact.path(),
        }
    }

    pub fn is_original(&self) -> bool {
        matches!(self, Reencoded::Original(_))
    }
}

/// Re-encode `input` with the production backend and a time-seeded RNG.
///
/// `settings` of `None` means the no-op defaults.
pub fn reencode(
    input: &Path,
    scratch_dir: &Path,
    fix_exif: bool,
    remove_metadata: bool,
    change_checksum: bool,
    settings: Option<ReencodeSettings>,
) -> Result<Reencoded, ReencodeError> {
    let backend = RustBackend::new();
    let mut rng = XorShift::from_entropy();
    reencode_with_backend(
        &backend,
        &mut rng,
        scratch_dir,
        input,
        ReencodeFlags::new(fix_exif, remove_metadata, change_checksum),
        settings,
    )
}

/// Re-encode using a specific backend and randomness source (allows testing
/// with mocks and fixed seeds).
pub fn reencode_with_backend(
    backend: &impl ImageBackend,
    rng: &mut dyn RandomSource,
    scratch_dir: &Path,
    input: &Path,
    flags: ReencodeFlags,
    settings: Option<ReencodeSettings>,
) -> Result<Reencoded, ReencodeError> {
    let settings = settings.unwrap_or_default();

    if settings.is_noop() && !flags.any() {
        debug!(path = %input.display(), "Nothing to change, keeping original");
        return Ok(Reencoded::Original(input.to_path_buf()));
    }

    let sniffed = sniff::detect(input)?;

    let wants_orientation = flags.fix_exif
        && target_format(settings.reencode_type, sniffed) == ImageFormat::Jpeg;
    let orientation = if wants_orientation {
        backend.read_orientation(input)?
    } else {
        None
    };

    let plan = plan_transform(
        &settings,
        sniffed,
        flags.fix_exif,
        flags.change_checksum,
        orientation,
    );
    debug!(
        path = %input.display(),
        source = %sniffed,
        target = %plan.target,
        quality = plan.quality.value(),
        scale = plan.scale,
        rotation = plan.rotation.degrees(),
        change_checksum = plan.change_checksum,
        "Planned re-encode"
    );

    let decoded = backend.decode(input)?;
    let output = if plan.is_geometric() {
        let transformed = apply_transform(&decoded, &plan);
        drop(decoded);
        transformed
    } else {
        decoded
    };
    let (width, height) = (output.width(), output.height());

    let changed = if plan.change_checksum {
        Some(encode_with_changed_checksum(backend, rng, &output, &plan)?)
    } else {
        None
    };

    let artifact = TempArtifact::create(scratch_dir)?;
    {
        let mut writer = BufWriter::new(artifact.writer()?);
        match &changed {
            Some(bytes) => writer.write_all(bytes)?,
            None => backend.encode(&output, plan.target, plan.quality, &mut writer)?,
        }
        writer.flush()?;
    }
    drop(output);

    info!(
        input = %input.display(),
        output = %artifact.path().display(),
        format = %plan.target,
        width,
        height,
        "Re-encoded image"
    );
    Ok(Reencoded::Artifact {
        artifact,
        format: plan.target,
        width,
        height,
    })
}

/// Encode `image` with a perturbation that survives the encoder.
///
/// The unperturbed image is encoded first as a baseline. Each step of
/// [`CHECKSUM_ESCALATION`] perturbs a fresh copy and encodes it; the first
/// result whose bytes differ from the baseline wins. Lossy encoding at low
/// quality can swallow small nudges, which is what the larger steps are for.
fn encode_with_changed_checksum(
    backend: &impl ImageBackend,
    rng: &mut dyn RandomSource,
    image: &DynamicImage,
    plan: &TransformPlan,
) -> Result<Vec<u8>, BackendError> {
    let mut baseline = Vec::new();
    backend.encode(image, plan.target, plan.quality, &mut baseline)?;

    let mut attempt = Vec::new();
    for (step, &(side, nudge)) in CHECKSUM_ESCALATION.iter().enumerate() {
        let mut perturbed = image.clone();
        let Some((x, y)) = perturb_random_region(&mut perturbed, rng, side, nudge) else {
            // Empty image, nothing to perturb
            return Ok(baseline);
        };
        attempt.clear();
        backend.encode(&perturbed, plan.target, plan.quality, &mut attempt)?;
        if attempt != baseline {
            debug!(x, y, side, ?nudge, step, "Perturbed pixels");
            return Ok(attempt);
        }
        trace!(x, y, side, ?nudge, step, "Perturbation lost in encoding, escalating");
    }

    warn!(
        format = %plan.target,
        quality = plan.quality.value(),
        "Encoded bytes unchanged by every perturbation"
    );
    Ok(attempt)
}
