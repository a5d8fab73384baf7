//! Read projection mode and the `.mode` control file.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::inode::CONTROL_ID;
use crate::error::{FsError, FsResult};
use crate::store::FileType;

pub const CONTROL_NAME: &str = ".mode";

/// Which content projection reads, sizes and names reflect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FsMode {
    /// Item metadata dumps, documents report size 0.
    Meta,
    /// Raw archives as `.zip`.
    Raw,
    /// Original uploads (notebooks rendered to PDF).
    Orig,
    /// Annotated PDFs.
    #[default]
    Annot,
}

impl FsMode {
    pub const ALL: [FsMode; 4] = [FsMode::Meta, FsMode::Raw, FsMode::Orig, FsMode::Annot];

    pub fn as_str(&self) -> &'static str {
        match self {
            FsMode::Meta => "meta",
            FsMode::Raw => "raw",
            FsMode::Orig => "orig",
            FsMode::Annot => "annot",
        }
    }
}

/// Content projection a document is served as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Projection {
    Metadata,
    Raw,
    Annotated,
    Original,
}

impl FsMode {
    /// Notebooks have no original file, so `orig` falls back to the render.
    pub fn projection(self, file_type: FileType) -> Projection {
        match self {
            FsMode::Meta => Projection::Metadata,
            FsMode::Raw => Projection::Raw,
            FsMode::Annot => Projection::Annotated,
            FsMode::Orig if file_type == FileType::Notes => Projection::Annotated,
            FsMode::Orig => Projection::Original,
        }
    }
}

impl fmt::Display for FsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsMode {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FsMode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| FsError::InvalidArgument(format!("unknown mode {s:?}")))
    }
}

/// Shared, lock-guarded mode cell. Cloning shares the same cell.
#[derive(Clone, Debug, Default)]
pub struct ModeCell(Arc<RwLock<FsMode>>);

impl ModeCell {
    pub fn new(mode: FsMode) -> Self {
        Self(Arc::new(RwLock::new(mode)))
    }

    pub async fn get(&self) -> FsMode {
        *self.0.read().await
    }

    pub async fn set(&self, mode: FsMode) {
        *self.0.write().await = mode;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    Refresh,
    SetMode(FsMode),
}

impl ControlCommand {
    /// One write payload is one command: trimmed, case-insensitive.
    pub fn parse(payload: &[u8]) -> FsResult<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| FsError::InvalidArgument("control command is not UTF-8".into()))?;
        let command = text.trim().to_lowercase();
        if command == "refresh" {
            return Ok(ControlCommand::Refresh);
        }
        command.parse().map(ControlCommand::SetMode)
    }
}

/// The virtual `.mode` file.
#[derive(Clone, Debug)]
pub struct ModeController {
    mode: ModeCell,
}

impl ModeController {
    pub fn new(mode: ModeCell) -> Self {
        Self { mode }
    }

    pub fn cell(&self) -> &ModeCell {
        &self.mode
    }

    fn line(mode: FsMode) -> String {
        format!("{mode}\n")
    }

    pub async fn size(&self) -> u64 {
        Self::line(self.mode.get().await).len() as u64
    }

    /// Content served to readers: the mode line, or a state dump in `meta` mode.
    pub async fn contents(&self) -> Bytes {
        let mode = self.mode.get().await;
        if mode == FsMode::Meta {
            let dump = serde_json::json!({
                "id": CONTROL_ID,
                "name": CONTROL_NAME,
                "mode": mode,
                "virtual": true,
            });
            return Bytes::from(format!("{dump}\n"));
        }
        Bytes::from(Self::line(mode))
    }

    /// Apply a mode switch right away; `Refresh` is returned for the caller
    /// to forward to the store.
    pub async fn apply(&self, payload: &[u8]) -> FsResult<ControlCommand> {
        let command = ControlCommand::parse(payload)?;
        if let ControlCommand::SetMode(mode) = command {
            self.mode.set(mode).await;
        }
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_commands() {
        assert_eq!(
            ControlCommand::parse(b"  ANNOT\n").unwrap(),
            ControlCommand::SetMode(FsMode::Annot)
        );
        assert_eq!(
            ControlCommand::parse(b"Refresh").unwrap(),
            ControlCommand::Refresh
        );
        for mode in FsMode::ALL {
            let cmd = ControlCommand::parse(mode.as_str().as_bytes()).unwrap();
            assert_eq!(cmd, ControlCommand::SetMode(mode));
        }
        assert!(matches!(
            ControlCommand::parse(b"bogus"),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(ControlCommand::parse(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn orig_renders_notebooks() {
        assert_eq!(FsMode::Orig.projection(FileType::Notes), Projection::Annotated);
        assert_eq!(FsMode::Orig.projection(FileType::Pdf), Projection::Original);
        assert_eq!(FsMode::Annot.projection(FileType::Epub), Projection::Annotated);
        assert_eq!(FsMode::Raw.projection(FileType::Notes), Projection::Raw);
        assert_eq!(FsMode::Meta.projection(FileType::Pdf), Projection::Metadata);
    }

    #[tokio::test]
    async fn switch_and_read_back() {
        let ctl = ModeController::new(ModeCell::new(FsMode::Raw));
        assert_eq!(&ctl.contents().await[..], b"raw\n");
        assert_eq!(ctl.size().await, 4);

        ctl.apply(b"annot").await.unwrap();
        assert_eq!(&ctl.contents().await[..], b"annot\n");

        assert!(ctl.apply(b"bogus").await.is_err());
        assert_eq!(ctl.cell().get().await, FsMode::Annot);

        assert_eq!(ctl.apply(b"refresh\n").await.unwrap(), ControlCommand::Refresh);
        assert_eq!(ctl.cell().get().await, FsMode::Annot);
    }

    #[tokio::test]
    async fn meta_mode_dumps_state() {
        let ctl = ModeController::new(ModeCell::new(FsMode::Meta));
        let dump = ctl.contents().await;
        let v: serde_json::Value = serde_json::from_slice(&dump).unwrap();
        assert_eq!(v["mode"], "meta");
        assert_eq!(v["name"], CONTROL_NAME);
    }
}
