#![forbid(unsafe_code)]
//! `mendfs` — maintenance and forensics CLI for MendFS volume images.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use mfs_block::{FileSectorDevice, SectorCache};
use mfs_error::MfsError;
use mfs_maint::{RecoveryMode, analyze, defragment, recover};
use mfs_types::SECTOR_SIZE;
use mfs_vol::Volume;
use std::env::VarError;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Sectors held by the read cache in front of the image file.
const CACHE_SECTORS: usize = 256;

type ImageVolume = Volume<SectorCache<FileSectorDevice>>;

// ── Logging setup ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    const ENV_KEY: &'static str = "MENDFS_LOG_FORMAT";

    fn parse(raw: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(raw.trim(), true).map_err(|_| {
            anyhow::anyhow!(
                "invalid {key}={raw:?}; expected one of: human, json",
                key = Self::ENV_KEY
            )
        })
    }

    fn from_env() -> Result<Option<Self>> {
        match std::env::var(Self::ENV_KEY) {
            Ok(value) => Ok(Some(Self::parse(&value)?)),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => {
                bail!("{key} contains non-UTF-8 bytes", key = Self::ENV_KEY)
            }
        }
    }
}

fn default_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_logging(log_format_override: Option<LogFormat>) -> Result<()> {
    let format = log_format_override
        .or(LogFormat::from_env()?)
        .unwrap_or(LogFormat::Human);

    match format {
        LogFormat::Human => tracing_subscriber::fmt()
            .with_env_filter(default_env_filter())
            .with_target(true)
            .with_level(true)
            .compact()
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to initialize human logger: {err}"))?,
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_env_filter(default_env_filter())
            .with_target(true)
            .with_level(true)
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to initialize JSON logger: {err}"))?,
    }
    Ok(())
}

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "mendfs", about = "MendFS — volume maintenance and forensics toolkit")]
struct Cli {
    /// Log output format (`human` or `json`).
    ///
    /// Precedence: `--log-format` > `MENDFS_LOG_FORMAT` > `human`.
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create and format a fresh volume image.
    Mkfs {
        /// Path of the image file to create.
        image: PathBuf,
        /// Volume size in sectors.
        #[arg(long, default_value_t = 4096)]
        sectors: u32,
    },
    /// List the files in a volume's root directory.
    Ls {
        /// Path to the volume image.
        image: PathBuf,
    },
    /// Copy a host file into the volume (copy-in).
    Put {
        /// Path to the volume image.
        image: PathBuf,
        /// Host file to copy in.
        source: PathBuf,
        /// Name inside the volume (defaults to the source file name).
        #[arg(long)]
        name: Option<String>,
    },
    /// Copy a file out of the volume onto the host (copy-out).
    Get {
        /// Path to the volume image.
        image: PathBuf,
        /// File name inside the volume.
        name: String,
        /// Host path to write (defaults to the name in the current directory).
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the names of files whose content contains a pattern.
    Find {
        /// Path to the volume image.
        image: PathBuf,
        /// Byte pattern to search for.
        pattern: String,
    },
    /// Analyze volume fragmentation.
    Frag {
        /// Path to the volume image.
        image: PathBuf,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Defragment the whole volume (requires exclusive access).
    Defrag {
        /// Path to the volume image.
        image: PathBuf,
    },
    /// Run a recovery pass.
    Recover {
        /// Path to the volume image.
        image: PathBuf,
        /// Recovery mode: 0 = orphaned inodes, 1 = raw salvage, 2 = tail slack.
        #[arg(long)]
        mode: u8,
        /// Directory for recovered artifacts and the evidence ledger.
        #[arg(long, default_value = ".")]
        artifact_dir: PathBuf,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
}

// ── Command implementations ─────────────────────────────────────────────────

fn open_volume(image: &Path) -> Result<ImageVolume> {
    let device = FileSectorDevice::open(image)
        .with_context(|| format!("opening image {}", image.display()))?;
    let volume = Volume::open(SectorCache::new(device, CACHE_SECTORS))
        .with_context(|| format!("mounting volume {}", image.display()))?;
    Ok(volume)
}

fn cmd_mkfs(image: &Path, sectors: u32) -> Result<()> {
    let device = FileSectorDevice::create(image, sectors)
        .with_context(|| format!("creating image {}", image.display()))?;
    let volume = Volume::format(SectorCache::new(device, CACHE_SECTORS))?;
    volume.sync()?;
    println!(
        "formatted {} ({} sectors, {} free)",
        image.display(),
        sectors,
        volume.free_sectors()
    );
    Ok(())
}

fn cmd_ls(image: &Path) -> Result<()> {
    let volume = open_volume(image)?;
    let entries = volume.list()?;
    for entry in &entries {
        let length = volume.read_inode_record(entry.inode_sector)?.length;
        println!("{length:>10}  {}", entry.name);
    }
    println!("{} file(s)", entries.len());
    Ok(())
}

fn cmd_put(image: &Path, source: &Path, name: Option<String>) -> Result<()> {
    let content = std::fs::read(source)
        .with_context(|| format!("reading host file {}", source.display()))?;
    let name = match name {
        Some(name) => name,
        None => source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("no file name in {}", source.display()))?,
    };
    if content.len() > u32::MAX as usize {
        bail!("{} is too large for a volume file", source.display());
    }

    let mut volume = open_volume(image)?;
    volume.create(&name, content.len() as u32)?;
    let written = if content.is_empty() {
        0
    } else {
        let mut handle = volume.open_file(&name)?;
        volume.write_at(&mut handle, 0, &content)?
    };
    volume.sync()?;

    if written < content.len() {
        // A short write is never silent: report exactly how much landed.
        return Err(MfsError::AllocationExhausted {
            name,
            written: written as u64,
            requested: content.len() as u64,
        }
        .into());
    }
    println!("put {name}: {written} bytes");
    Ok(())
}

fn cmd_get(image: &Path, name: &str, out: Option<PathBuf>) -> Result<()> {
    let volume = open_volume(image)?;
    let handle = volume.open_file(name)?;
    let mut content = vec![0_u8; handle.length() as usize];
    let read = volume.read_at(&handle, 0, &mut content)?;
    content.truncate(read);

    let out = out.unwrap_or_else(|| PathBuf::from(name));
    std::fs::write(&out, &content)
        .with_context(|| format!("writing host file {}", out.display()))?;
    println!("get {name}: {read} bytes -> {}", out.display());
    Ok(())
}

fn cmd_find(image: &Path, pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        bail!("empty search pattern");
    }
    let needle = pattern.as_bytes();
    let volume = open_volume(image)?;

    let mut matches = 0_usize;
    for entry in volume.list()? {
        let handle = volume.open_file(&entry.name)?;
        // Sector-sized windows; a match spanning a window boundary is not
        // detected.
        let mut window = [0_u8; SECTOR_SIZE];
        let mut offset = 0_u32;
        loop {
            let read = volume.read_at(&handle, offset, &mut window)?;
            if read == 0 {
                break;
            }
            if window[..read].windows(needle.len()).any(|w| w == needle) {
                println!("{}", entry.name);
                matches += 1;
                break;
            }
            offset += read as u32;
        }
    }
    info!(pattern, matches, "search complete");
    Ok(())
}

fn cmd_frag(image: &Path, json: bool) -> Result<()> {
    let volume = open_volume(image)?;
    let report = analyze(&volume)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

fn cmd_defrag(image: &Path) -> Result<()> {
    let mut volume = open_volume(image)?;
    let report = defragment(&mut volume)?;
    volume.sync()?;
    println!("{report}");
    Ok(())
}

fn cmd_recover(image: &Path, mode: u8, artifact_dir: &Path, json: bool) -> Result<()> {
    let mode = RecoveryMode::from_flag(mode)
        .with_context(|| format!("invalid recovery mode {mode}; expected 0, 1, or 2"))?;
    std::fs::create_dir_all(artifact_dir)
        .with_context(|| format!("creating artifact dir {}", artifact_dir.display()))?;

    let mut volume = open_volume(image)?;
    let report = recover(&mut volume, mode, artifact_dir)?;
    volume.sync()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
        for artifact in &report.artifacts {
            println!("  {artifact}");
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    init_logging(cli.log_format)?;
    match cli.command {
        Command::Mkfs { image, sectors } => cmd_mkfs(&image, sectors),
        Command::Ls { image } => cmd_ls(&image),
        Command::Put {
            image,
            source,
            name,
        } => cmd_put(&image, &source, name),
        Command::Get { image, name, out } => cmd_get(&image, &name, out),
        Command::Find { image, pattern } => cmd_find(&image, &pattern),
        Command::Frag { image, json } => cmd_frag(&image, json),
        Command::Defrag { image } => cmd_defrag(&image),
        Command::Recover {
            image,
            mode,
            artifact_dir,
            json,
        } => cmd_recover(&image, mode, &artifact_dir, json),
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        // Volume errors carry a sysexits code; anything else is generic.
        let code = err
            .downcast_ref::<MfsError>()
            .map_or(1, MfsError::exit_code);
        eprintln!("error: {err:#}");
        std::process::exit(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!(LogFormat::parse("human").unwrap(), LogFormat::Human);
        assert_eq!(LogFormat::parse(" JSON ").unwrap(), LogFormat::Json);
        assert!(LogFormat::parse("yaml").is_err());
    }

    #[test]
    fn mkfs_put_get_round_trip_on_an_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("vol.img");
        let source = dir.path().join("hello.txt");
        let restored = dir.path().join("restored.txt");
        std::fs::write(&source, b"hello from the host").unwrap();

        cmd_mkfs(&image, 1024).unwrap();
        cmd_put(&image, &source, None).unwrap();
        cmd_get(&image, "hello.txt", Some(restored.clone())).unwrap();

        assert_eq!(
            std::fs::read(&restored).unwrap(),
            b"hello from the host".to_vec()
        );
    }

    #[test]
    fn put_reports_allocation_exhaustion_with_progress() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("tiny.img");
        let source = dir.path().join("big.bin");
        std::fs::write(&source, vec![0x99_u8; 64 * SECTOR_SIZE]).unwrap();

        cmd_mkfs(&image, 32).unwrap();
        let err = cmd_put(&image, &source, None).unwrap_err();
        let mfs = err.downcast_ref::<MfsError>().expect("MfsError");
        assert!(
            matches!(
                mfs,
                MfsError::AllocationExhausted { written, requested, .. }
                    if *written < *requested
            ),
            "unexpected error: {mfs:?}"
        );
    }
}
