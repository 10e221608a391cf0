use chan_image::bridge::{DiskBridge, LoadError, RequestHandle, RequestState};
use chan_image::imaging::{ReencodeType, RustBackend};
use chan_image::output::{self, LoadReport, ReencodeReport, ResolveReport, SniffReport};
use chan_image::reencode::{self, Reencoded};
use chan_image::resolve::{self, ImageReference, OwnerDirs};
use chan_image::{checksum, config, sniff};
use clap::{Parser, Subcommand};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chan-image")]
#[command(about = "Inspect, re-encode and load images of saved threads")]
#[command(long_about = "\
Inspect, re-encode and load images of saved threads

Saved threads keep their files under a per-thread directory:

  <save_root>/
  └── g/                           # Board directory (spoiler placeholders)
      └── 12345/                   # Images directory of one thread
          ├── 1700000.jpg          # Full image
          └── 1700000_thumb.jpg    # Thumbnail

Formats are detected from file contents, never from extensions. Only PNG
and JPEG are supported.

Run 'chan-image gen-config' to generate a documented chan-image.toml.")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./chan-image.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override save_root from the config
    #[arg(long, global = true)]
    save_root: Option<PathBuf>,

    /// Override scratch_dir from the config
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    /// Log filter, e.g. "debug" (RUST_LOG wins over this)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

/// Which thread a file belongs to.
#[derive(clap::Args, Clone)]
struct OwnerArgs {
    /// Board directory, relative to the save root
    #[arg(long)]
    board_dir: PathBuf,

    /// Images directory, relative to the save root
    #[arg(long)]
    images_dir: PathBuf,

    /// The thread is not saved locally; images come from the network
    #[arg(long)]
    remote: bool,
}

impl OwnerArgs {
    fn owner(&self) -> OwnerDirs {
        OwnerDirs::new(&self.board_dir, &self.images_dir, !self.remote)
    }
}

/// Re-encode overrides. Unset values fall back to the config.
#[derive(clap::Args, Clone)]
struct ReencodeArgs {
    /// JPEG quality, 1-100
    #[arg(long)]
    quality: Option<u32>,

    /// Shrink both sides by this percentage, 0-100
    #[arg(long)]
    reduce: Option<u32>,

    /// Output format
    #[arg(long, value_enum)]
    reencode_type: Option<ReencodeType>,

    /// Rotate JPEGs upright from their EXIF orientation
    #[arg(long)]
    fix_exif: bool,

    /// Re-encode even when nothing else changes
    #[arg(long)]
    remove_metadata: bool,

    /// Perturb pixels so the encoded file hash changes
    #[arg(long)]
    change_checksum: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Detect the format of files from their contents
    Sniff {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show where an image of a thread is stored
    Resolve {
        #[command(flatten)]
        owner: OwnerArgs,

        /// Original filename stem, e.g. 1700000
        #[arg(long)]
        name: String,

        /// Extension of the full image
        #[arg(long, default_value = "jpg")]
        ext: String,

        /// Resolve the thumbnail; its extension is taken from this URL
        #[arg(long, value_name = "URL")]
        thumbnail: Option<String>,

        /// Resolve the spoiler placeholder; its extension is taken from this URL
        #[arg(long, value_name = "URL", num_args = 0..=1, default_missing_value = "")]
        spoiler: Option<String>,
    },
    /// Rewrite an image for upload
    Reencode {
        file: PathBuf,

        #[command(flatten)]
        args: ReencodeArgs,

        /// Where to put the result (default: <stem>_reencoded.<ext> next to the input)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Load images of a thread in the background and report the results
    Load {
        #[command(flatten)]
        owner: OwnerArgs,

        /// Formatted filenames, e.g. 1700000_thumb.jpg
        #[arg(required = true)]
        files: Vec<String>,

        /// Read from the board directory instead of the images directory
        #[arg(long)]
        spoiler: bool,

        /// Decode hint width (default from config)
        #[arg(long)]
        width: Option<u32>,

        /// Decode hint height (default from config)
        #[arg(long)]
        height: Option<u32>,

        /// Give up on loads still pending after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Print a stock chan-image.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(save_root) = cli.save_root {
        config.save_root = save_root;
    }
    if let Some(scratch_dir) = cli.scratch_dir {
        config.scratch_dir = scratch_dir;
    }
    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));
    debug!(?config, "Configuration loaded");

    match cli.command {
        Command::Sniff { files } => {
            let reports: Vec<SniffReport> = files.into_iter().map(sniff_file).collect();
            if cli.json {
                output::print_json(&reports)?;
            } else {
                output::print_sniff_output(&reports);
            }
        }
        Command::Resolve {
            owner,
            name,
            ext,
            thumbnail,
            spoiler,
        } => {
            let mut reference = ImageReference::original(&owner.owner(), name, ext);
            if let Some(url) = thumbnail {
                reference = reference.thumbnail(url);
            }
            if let Some(url) = spoiler {
                reference = reference.spoiler(url);
            }
            let name = resolve::resolve_filename(&reference)?;
            let report = ResolveReport {
                path: resolve::resolve_path(&config.save_root, &reference)?,
                filename: name.filename,
                location: name.location,
            };
            if cli.json {
                output::print_json(&report)?;
            } else {
                output::print_resolve_output(&report);
            }
        }
        Command::Reencode {
            file,
            args,
            output: dest,
        } => {
            let report = run_reencode(&config, &file, &args, dest.as_deref())?;
            if cli.json {
                output::print_json(&report)?;
            } else {
                output::print_reencode_output(&report);
            }
        }
        Command::Load {
            owner,
            files,
            spoiler,
            width,
            height,
            timeout,
        } => {
            let width = width.unwrap_or(config.display.max_width);
            let height = height.unwrap_or(config.display.max_height);
            let reports = run_load(
                &config,
                &owner.owner(),
                &files,
                spoiler,
                (width, height),
                Duration::from_secs(timeout),
            )?;
            if cli.json {
                output::print_json(&reports)?;
            } else {
                output::print_load_output(&reports);
            }
        }
        // Handled before config loading
        Command::GenConfig => {}
    }

    Ok(())
}

/// Log to stderr so `--json` output on stdout stays clean.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn sniff_file(path: PathBuf) -> SniffReport {
    match sniff::detect(&path) {
        Ok(format) => SniffReport {
            path,
            format: Some(format),
            error: None,
        },
        Err(e) => SniffReport {
            path,
            format: None,
            error: Some(e.to_string()),
        },
    }
}

/// `<stem>_reencoded.<ext>` next to `input`.
fn default_output_path(input: &Path, format: sniff::ImageFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    input.with_file_name(format!("{stem}_reencoded.{}", format.extension()))
}

fn run_reencode(
    config: &config::Config,
    input: &Path,
    args: &ReencodeArgs,
    dest: Option<&Path>,
) -> Result<ReencodeReport, Box<dyn std::error::Error>> {
    let mut defaults = config.reencode.clone();
    if let Some(quality) = args.quality {
        defaults.quality = quality;
    }
    if let Some(reduce) = args.reduce {
        defaults.reduce_percent = reduce;
    }
    if let Some(reencode_type) = args.reencode_type {
        defaults.reencode_type = reencode_type;
    }
    let flags = defaults.flags();

    let sha256_before = checksum::hash_file(input)?;
    let result = reencode::reencode(
        input,
        &config.scratch_dir,
        flags.fix_exif || args.fix_exif,
        flags.remove_metadata || args.remove_metadata,
        flags.change_checksum || args.change_checksum,
        Some(defaults.settings()),
    )?;

    match result {
        Reencoded::Original(path) => Ok(ReencodeReport {
            input: input.to_path_buf(),
            output: path,
            reencoded: false,
            format: None,
            width: None,
            height: None,
            sha256_after: sha256_before.clone(),
            sha256_before,
        }),
        Reencoded::Artifact {
            artifact,
            format,
            width,
            height,
        } => {
            let dest = dest
                .map(Path::to_path_buf)
                .unwrap_or_else(|| default_output_path(input, format));
            let output = artifact.promote(&dest)?;
            info!(path = %output.display(), "Wrote re-encoded image");
            Ok(ReencodeReport {
                input: input.to_path_buf(),
                sha256_after: checksum::hash_file(&output)?,
                output,
                reencoded: true,
                format: Some(format),
                width: Some(width),
                height: Some(height),
                sha256_before,
            })
        }
    }
}

fn run_load(
    config: &config::Config,
    owner: &OwnerDirs,
    files: &[String],
    spoiler: bool,
    (width, height): (u32, u32),
    timeout: Duration,
) -> Result<Vec<LoadReport>, Box<dyn std::error::Error>> {
    let bridge = DiskBridge::new(&config.save_root, Arc::new(RustBackend::new()))?;

    let mut requests: Vec<(RequestHandle, Rc<RefCell<Option<LoadError>>>)> = Vec::new();
    for file in files {
        let error = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&error);
        let handle = bridge.request_file(owner, file.as_str(), spoiler, width, height, move |result| {
            if let Err(e) = result {
                *slot.borrow_mut() = Some(e);
            }
        });
        requests.push((handle, error));
    }

    bridge.dispatch_all(timeout);

    let reports = requests
        .into_iter()
        .map(|(handle, error)| {
            let image = handle.image();
            let error = error.borrow().as_ref().map(ToString::to_string).or_else(|| {
                (handle.state() == RequestState::Pending)
                    .then(|| format!("Timed out after {:.1}s", timeout.as_secs_f64()))
            });
            LoadReport {
                id: handle.id(),
                state: handle.state(),
                path: handle.resolved_path(),
                width: image.as_ref().map(|img| img.width()),
                height: image.as_ref().map(|img| img.height()),
                error,
            }
        })
        .collect();

    // Dropping the bridge would join the worker and wait out a stuck decode
    if bridge.pending_count() > 0 {
        let abandoned = bridge.detach();
        warn!(
            abandoned,
            timeout_secs = timeout.as_secs_f64(),
            "Load timed out, leaving the disk worker behind"
        );
    }
    Ok(reports)
}
