use std::path::PathBuf;
use std::time::Duration;

use bale_core::config::{
    DEFAULT_STORAGE_ADDRESS, DEFAULT_STORAGE_PATH, ENV_STORAGE_ADDRESS, ENV_STORAGE_ADV_ADDR,
    ENV_STORAGE_PATH,
};
use bale_core::{parse_duration, DigestAlgorithm, StorageOptions};
use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "bale",
    version,
    about = "Store, verify and garbage-collect build artifacts on local disk"
)]
pub struct BaleCli {
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    pub quiet: bool,
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    #[arg(long, global = true, help = "Enable trace logging")]
    pub trace: bool,
    #[arg(long, global = true, help = "Emit {status,message,details} JSON")]
    pub json: bool,
    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,
    #[command(flatten)]
    pub storage: StorageArgs,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    #[arg(
        long,
        global = true,
        env = ENV_STORAGE_PATH,
        default_value = DEFAULT_STORAGE_PATH,
        help = "Directory artifacts are stored in"
    )]
    pub storage_path: PathBuf,
    #[arg(
        long = "storage-addr",
        global = true,
        env = ENV_STORAGE_ADDRESS,
        default_value = DEFAULT_STORAGE_ADDRESS,
        help = "Address the artifact file server binds to"
    )]
    pub storage_address: String,
    #[arg(
        long = "storage-adv-addr",
        global = true,
        env = ENV_STORAGE_ADV_ADDR,
        help = "Address advertised in artifact URLs"
    )]
    pub storage_adv_address: Option<String>,
    #[arg(
        long,
        global = true,
        default_value = "1m",
        value_parser = parse_duration,
        help = "Age after which artifacts can be garbage collected"
    )]
    pub artifact_retention_ttl: Duration,
    #[arg(
        long,
        global = true,
        default_value_t = 2,
        help = "Number of recent artifacts always kept"
    )]
    pub artifact_retention_records: usize,
    #[arg(long, global = true, default_value = "sha256")]
    pub artifact_digest_algo: DigestAlgorithm,
}

impl StorageArgs {
    pub fn options(&self) -> StorageOptions {
        StorageOptions {
            storage_path: self.storage_path.clone(),
            storage_address: self.storage_address.clone(),
            storage_adv_address: self.storage_adv_address.clone(),
            artifact_retention_ttl: self.artifact_retention_ttl,
            artifact_retention_records: self.artifact_retention_records,
            artifact_digest_algo: self.artifact_digest_algo,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Archive a directory as a deterministic tar.gz artifact, then collect garbage.
    Archive(ArchiveArgs),
    /// Copy a file into storage as an artifact.
    Put(PutArgs),
    /// Check a stored artifact against a digest.
    Verify(VerifyArgs),
    /// Delete stale artifacts next to the given one.
    Gc(GcArgs),
    /// Remove an artifact or its siblings.
    Remove(RemoveArgs),
    /// Report whether an artifact is stored.
    Exists(PathArgs),
}

#[derive(Args, Debug)]
pub struct ObjectArgs {
    #[arg(long, help = "Object kind, e.g. GitRepository")]
    pub kind: String,
    #[arg(long, default_value = "default")]
    pub namespace: String,
    #[arg(long)]
    pub name: String,
    #[arg(long, default_value = "")]
    pub revision: String,
}

#[derive(Args, Debug)]
pub struct ArchiveArgs {
    pub dir: PathBuf,
    #[command(flatten)]
    pub object: ObjectArgs,
    #[arg(long, default_value = "source.tar.gz")]
    pub filename: String,
    #[arg(
        long = "ignore",
        value_name = "PATTERN",
        help = "Gitignore-style pattern to leave out (repeatable)"
    )]
    pub ignore: Vec<String>,
    #[arg(long, value_name = "FILE", help = "Read extra patterns from a .sourceignore file")]
    pub ignore_file: Option<PathBuf>,
    #[arg(long, value_name = "NAME", help = "Also point this symlink at the new artifact")]
    pub link: Option<String>,
    #[arg(long, help = "Skip garbage collection after archiving")]
    pub no_gc: bool,
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub gc_timeout: Duration,
}

#[derive(Args, Debug)]
pub struct PutArgs {
    pub file: PathBuf,
    #[command(flatten)]
    pub object: ObjectArgs,
    #[arg(long, help = "Stored file name (defaults to the source file name)")]
    pub filename: Option<String>,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Artifact path relative to the storage root.
    pub path: String,
    #[arg(long)]
    pub digest: String,
}

#[derive(Args, Debug)]
pub struct GcArgs {
    /// Artifact path relative to the storage root.
    pub path: String,
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub timeout: Duration,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Artifact path relative to the storage root.
    pub path: String,
    #[arg(long, conflicts_with = "all_but_current", help = "Remove the artifact's whole directory")]
    pub all: bool,
    #[arg(long, help = "Remove every file next to the artifact except itself")]
    pub all_but_current: bool,
}

#[derive(Args, Debug)]
pub struct PathArgs {
    /// Artifact path relative to the storage root.
    pub path: String,
}
