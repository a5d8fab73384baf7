use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rmfs::config::Config;
use rmfs::fuse::FuseFs;
use rmfs::fuse::mount::mount_unprivileged;
use rmfs::store::memory::MemoryStore;
use rmfs::vfs::fs::RemoteFs;
use rmfs::vfs::mode::{FsMode, ModeCell};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rmfs", version)]
#[command(about = "Mount a remote note/tablet document store as a filesystem", long_about = None)]
struct Cli {
    /// Directory to mount on; defaults to `[mount] mountpoint` from the config.
    #[arg(value_name = "MOUNTPOINT")]
    mountpoint: Option<PathBuf>,

    /// Mode to start in.
    #[arg(short, long, value_enum)]
    mode: Option<FsMode>,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file to use instead of the default location.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write the default config file and exit.
    #[arg(long)]
    write_config: bool,

    /// Populate the store from a local directory tree.
    #[arg(long, value_name = "DIR")]
    source: Option<PathBuf>,

    /// Skip the network check before mounting.
    #[arg(long)]
    offline: bool,
}

#[derive(Debug, Error)]
enum StartupError {
    #[error("no mountpoint given on the command line or in the config file")]
    NoMountpoint,
    #[error("cannot reach {0}, check the network connection")]
    Unreachable(String),
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("{} is already a mount point", .0.display())]
    AlreadyMounted(PathBuf),
}

impl StartupError {
    fn exit_code(&self) -> i32 {
        match self {
            StartupError::NoMountpoint => libc::EINVAL,
            StartupError::Unreachable(_) => libc::EHOSTUNREACH,
            StartupError::NotADirectory(_) => libc::ENOTDIR,
            StartupError::AlreadyMounted(_) => libc::EEXIST,
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn probe(addr: &str, timeout: Duration) -> Result<(), StartupError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            debug!(addr, error = %e, "connectivity probe failed");
            Err(StartupError::Unreachable(addr.to_string()))
        }
        Err(_) => {
            debug!(addr, ?timeout, "connectivity probe timed out");
            Err(StartupError::Unreachable(addr.to_string()))
        }
    }
}

fn check_mountpoint(path: &Path) -> Result<(), StartupError> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => meta,
        _ => return Err(StartupError::NotADirectory(path.to_path_buf())),
    };
    // A mount point sits on a different device than its parent, except `/`
    // which is its own parent.
    if let Ok(parent) = std::fs::metadata(path.join("..")) {
        if parent.dev() != meta.dev() || parent.ino() == meta.ino() {
            return Err(StartupError::AlreadyMounted(path.to_path_buf()));
        }
    }
    Ok(())
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let mountpoint = cli
        .mountpoint
        .or(config.mount.mountpoint)
        .ok_or(StartupError::NoMountpoint)?;

    if !cli.offline {
        let timeout = Duration::from_millis(config.mount.probe_timeout_ms);
        probe(&config.mount.probe_addr, timeout).await?;
    }
    check_mountpoint(&mountpoint)?;

    let store = Arc::new(MemoryStore::new());
    if let Some(source) = &cli.source {
        store
            .import_dir(source)
            .await
            .with_context(|| format!("failed to import {}", source.display()))?;
    }

    let mode = cli.mode.unwrap_or(config.mount.mode);
    let fs = FuseFs::new(RemoteFs::new(store, ModeCell::new(mode), config.render));
    let mut mount_handle = mount_unprivileged(fs, &mountpoint)
        .await
        .with_context(|| format!("failed to mount {}", mountpoint.display()))?;
    info!(mountpoint = %mountpoint.display(), %mode, "mounted");

    let handle = &mut mount_handle;
    tokio::select! {
        res = handle => res.context("filesystem session failed")?,
        _ = signal::ctrl_c() => {
            info!("unmounting");
            mount_handle.unmount().await.context("failed to unmount")?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    if cli.write_config {
        if Config::write_default(&config_path)? {
            info!(path = %config_path.display(), "wrote default config");
        } else {
            warn!(path = %config_path.display(), "config file already exists, not overwriting");
        }
        return Ok(());
    }
    let config = Config::load(&config_path)?;

    if let Err(e) = run(cli, config).await {
        if let Some(startup) = e.downcast_ref::<StartupError>() {
            error!("{startup}");
            std::process::exit(startup.exit_code());
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_args() {
        let cli = Cli::try_parse_from(["rmfs", "/mnt/rm", "-m", "raw", "-vv", "--offline"]).unwrap();
        assert_eq!(cli.mountpoint, Some(PathBuf::from("/mnt/rm")));
        assert_eq!(cli.mode, Some(FsMode::Raw));
        assert_eq!(cli.verbose, 2);
        assert!(cli.offline);
        assert!(!cli.write_config);

        let cli = Cli::try_parse_from(["rmfs", "--write-config"]).unwrap();
        assert!(cli.write_config && cli.mountpoint.is_none());
        assert!(Cli::try_parse_from(["rmfs", "-m", "sideways"]).is_err());
    }

    #[test]
    fn mountpoint_checks() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_mountpoint(dir.path()).is_ok());

        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        let err = check_mountpoint(&file).unwrap_err();
        assert_eq!(err.exit_code(), libc::ENOTDIR);
        let err = check_mountpoint(&dir.path().join("missing")).unwrap_err();
        assert_eq!(err.exit_code(), libc::ENOTDIR);

        let err = check_mountpoint(Path::new("/")).unwrap_err();
        assert_eq!(err.exit_code(), libc::EEXIST);
    }

    #[tokio::test]
    async fn probe_reports_reachability() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(probe(&addr, Duration::from_secs(1)).await.is_ok());
        drop(listener);

        let err = probe(&addr, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.exit_code(), libc::EHOSTUNREACH);
    }
}
