//! Command-line surface.
//!
//! Thin plumbing over the library: loads key material, opens the device's
//! sequencer, and dispatches to drive/transfer operations. Key derivation
//! is out of scope; the key file simply holds the 64 raw bytes of drive
//! and HMAC key.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use rand::RngCore;

use crate::config::{IntegrityPolicy, KEY_LENGTH, TransferConfig};
use crate::file::{LocalFile, RealFile};
use crate::secret::DriveKeyMaterial;
use crate::sequence::{FileSequencer, NonceSequencer};
use crate::transfer::{FileExporter, FileImporter};
use crate::ui::Bar;
use crate::vault::Drive;

/// Plaintext marker file in the drive root holding the hex drive id.
const DRIVE_ID_FILE: &str = "tidelock.drive";

#[derive(Args)]
struct DriveArgs {
    /// Drive root directory.
    #[arg(short, long)]
    drive: PathBuf,

    /// Key file holding 64 raw bytes: drive key followed by HMAC key.
    #[arg(short, long)]
    key: PathBuf,

    /// Device-local sequencer state file.
    #[arg(long)]
    state: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new drive in an empty directory.
    Init {
        #[command(flatten)]
        drive: DriveArgs,
    },

    /// Register this device for an existing drive and print the auth id
    /// to report to the drive's owner.
    Link {
        #[command(flatten)]
        drive: DriveArgs,
    },

    /// Grant another device a disjoint nonce range.
    Authorize {
        #[command(flatten)]
        drive: DriveArgs,

        /// The other device's auth id (hex).
        #[arg(long)]
        auth_id: String,

        /// Where to write the encrypted authorization artifact.
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Import an authorization artifact produced for this device.
    Adopt {
        #[command(flatten)]
        drive: DriveArgs,

        /// Path to the artifact file.
        #[arg(short, long)]
        artifact: PathBuf,
    },

    /// Permanently revoke this device's nonce sequence for the drive.
    Revoke {
        #[command(flatten)]
        drive: DriveArgs,
    },

    /// Encrypt a file into the drive.
    Import {
        #[command(flatten)]
        drive: DriveArgs,

        /// Plaintext source file.
        #[arg(short, long)]
        input: PathBuf,

        /// Name inside the drive (defaults to the source file name).
        #[arg(short, long)]
        name: Option<String>,

        /// Worker threads.
        #[arg(short, long, default_value_t = 1)]
        threads: usize,

        /// Disable per-chunk integrity tags.
        #[arg(long)]
        no_integrity: bool,

        /// Delete the source after a successful import.
        #[arg(long)]
        delete_source: bool,
    },

    /// Decrypt a file out of the drive.
    Export {
        #[command(flatten)]
        drive: DriveArgs,

        /// Name inside the drive.
        #[arg(short, long)]
        name: String,

        /// Plaintext output path (defaults to the name in the current
        /// directory).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Worker threads.
        #[arg(short, long, default_value_t = 1)]
        threads: usize,

        /// Skip chunk tag verification (salvage mode).
        #[arg(long)]
        skip_verify: bool,

        /// Delete the container after a successful export.
        #[arg(long)]
        delete_source: bool,
    },

    /// List the drive's files with their virtual sizes.
    List {
        #[command(flatten)]
        drive: DriveArgs,
    },
}

#[derive(Parser)]
#[command(name = "tidelock", version, about = "Encrypted virtual file layer: seekable AES-CTR containers with chunked integrity.")]
pub struct App {
    #[command(subcommand)]
    command: Commands,
}

impl App {
    pub fn init() -> Result<Self> {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(Self::parse())
    }

    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::Init { drive } => run_init(&drive),
            Commands::Link { drive } => run_link(&drive),
            Commands::Authorize { drive, auth_id, out } => run_authorize(&drive, &auth_id, &out),
            Commands::Adopt { drive, artifact } => run_adopt(&drive, &artifact),
            Commands::Revoke { drive } => run_revoke(&drive),
            Commands::Import { drive, input, name, threads, no_integrity, delete_source } => {
                run_import(&drive, &input, name, threads, no_integrity, delete_source)
            }
            Commands::Export { drive, name, output, threads, skip_verify, delete_source } => {
                run_export(&drive, &name, output, threads, skip_verify, delete_source)
            }
            Commands::List { drive } => run_list(&drive),
        }
    }
}

fn state_path(args: &DriveArgs) -> PathBuf {
    args.state.clone().unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".tidelock").join("sequences.json"))
            .unwrap_or_else(|| PathBuf::from("tidelock-sequences.json"))
    })
}

fn load_keys(path: &Path, create: bool) -> Result<DriveKeyMaterial> {
    if !path.exists() {
        if !create {
            bail!("key file not found: {}", path.display());
        }
        let mut combined = [0u8; 2 * KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut combined);
        fs::write(path, combined).with_context(|| format!("writing key file {}", path.display()))?;
    }

    let bytes = fs::read(path).with_context(|| format!("reading key file {}", path.display()))?;
    let combined: [u8; 2 * KEY_LENGTH] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("key file must hold exactly {} bytes", 2 * KEY_LENGTH))?;
    Ok(DriveKeyMaterial::from_combined(&combined))
}

fn read_drive_id(args: &DriveArgs) -> Result<String> {
    let path = args.drive.join(DRIVE_ID_FILE);
    let id = fs::read_to_string(&path)
        .with_context(|| format!("no drive marker at {}; run `init` first", path.display()))?;
    Ok(id.trim().to_owned())
}

fn open_drive(args: &DriveArgs) -> Result<Drive> {
    let keys = load_keys(&args.key, false)?;
    let sequencer: Arc<dyn NonceSequencer> = Arc::new(FileSequencer::new(state_path(args))?);
    let drive_id = read_drive_id(args)?;

    let sequence = sequencer
        .get_sequence(&drive_id)?
        .with_context(|| format!("this device is not linked to drive {drive_id}"))?;

    Ok(Drive::open(
        Box::new(LocalFile::new(&args.drive)),
        keys,
        sequencer,
        &drive_id,
        &sequence.auth_id,
    ))
}

fn run_init(args: &DriveArgs) -> Result<()> {
    fs::create_dir_all(&args.drive)?;

    let marker = args.drive.join(DRIVE_ID_FILE);
    if marker.exists() {
        bail!("a drive already exists at {}", args.drive.display());
    }

    let keys = load_keys(&args.key, true)?;
    let sequencer: Arc<dyn NonceSequencer> = Arc::new(FileSequencer::new(state_path(args))?);
    let drive = Drive::create(Box::new(LocalFile::new(&args.drive)), keys, sequencer)?;

    fs::write(&marker, drive.drive_id())?;
    println!("created drive {} at {}", drive.drive_id(), args.drive.display());
    Ok(())
}

fn run_link(args: &DriveArgs) -> Result<()> {
    let keys = load_keys(&args.key, false)?;
    let sequencer: Arc<dyn NonceSequencer> = Arc::new(FileSequencer::new(state_path(args))?);
    let drive_id = read_drive_id(args)?;

    let drive = Drive::link(Box::new(LocalFile::new(&args.drive)), keys, sequencer, &drive_id)?;
    println!("linked drive {drive_id}");
    println!("report this auth id to the drive owner: {}", drive.auth_id());
    Ok(())
}

fn run_authorize(args: &DriveArgs, auth_id: &str, out: &Path) -> Result<()> {
    let drive = open_drive(args)?;
    let package = drive.authorize(auth_id, Box::new(LocalFile::new(out)))?;
    println!(
        "granted nonce range [{}, {}) to {auth_id}; artifact at {}",
        package.start_nonce,
        package.max_nonce,
        out.display()
    );
    Ok(())
}

fn run_adopt(args: &DriveArgs, artifact: &Path) -> Result<()> {
    let drive = open_drive(args)?;
    drive.adopt(Box::new(LocalFile::new(artifact)))?;
    println!("authorization adopted; this device can now write to the drive");
    Ok(())
}

fn run_revoke(args: &DriveArgs) -> Result<()> {
    let drive = open_drive(args)?;
    drive.revoke()?;
    println!("sequence revoked for drive {}", drive.drive_id());
    Ok(())
}

fn run_import(
    args: &DriveArgs,
    input: &Path,
    name: Option<String>,
    threads: usize,
    no_integrity: bool,
    delete_source: bool,
) -> Result<()> {
    let drive = open_drive(args)?;
    let source = LocalFile::new(input);
    if !source.exists() {
        bail!("source not found: {}", input.display());
    }

    let name = name.unwrap_or_else(|| source.name());
    let policy = if no_integrity {
        IntegrityPolicy::Disabled
    } else {
        IntegrityPolicy::default()
    };

    let dest = drive.create_file(&name, policy)?;
    let importer = FileImporter::new(TransferConfig::new(0, threads));

    let bar = Bar::new(source.len()?, "Importing");
    let report = |done: u64, _total: u64| bar.set(done);
    importer.import(&source, &dest, delete_source, Some(&report))?;
    bar.finish();

    println!("imported {} as {name}", input.display());
    Ok(())
}

fn run_export(
    args: &DriveArgs,
    name: &str,
    output: Option<PathBuf>,
    threads: usize,
    skip_verify: bool,
    delete_source: bool,
) -> Result<()> {
    let drive = open_drive(args)?;
    let source = drive.file(name);
    if !source.exists() {
        bail!("no such file in drive: {name}");
    }

    let output = output.unwrap_or_else(|| PathBuf::from(name));
    let dest = LocalFile::new(&output);
    let exporter = FileExporter::new(TransferConfig::new(0, threads));

    let bar = Bar::new(source.virtual_len()?, "Exporting");
    let report = |done: u64, _total: u64| bar.set(done);
    exporter.export(&source, &dest, delete_source, !skip_verify, Some(&report))?;
    bar.finish();

    println!("exported {name} to {}", output.display());
    Ok(())
}

fn run_list(args: &DriveArgs) -> Result<()> {
    let drive = open_drive(args)?;

    for file in drive.list_files()? {
        if file.name() == DRIVE_ID_FILE {
            continue;
        }
        match file.virtual_len() {
            Ok(len) => println!("{:>12}  {}", len, file.name()),
            Err(_) => println!("{:>12}  {} (not a container)", "-", file.name()),
        }
    }
    Ok(())
}
