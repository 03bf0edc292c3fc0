//! Turn the in-progress snapshot into a timestamped rotation.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};

use crate::methods::snapshot::{LATEST_NAME, SNAPSHOT_NAME};

/// Rotation name format, expanded with the UTC time of the rotation.
pub const BACKUP_NAME: &str = "%Y.%m.%d-%H.%M.%S";

#[derive(Debug, thiserror::Error)]
pub enum RotateError {
    #[error("snapshot directory {0:?} does not exist")]
    MissingSnapshot(PathBuf),
    #[error("destination rotation {0:?} already exists")]
    DestinationExists(PathBuf),
}

impl RotateError {
    /// Process exit status reported by `rbak rotate`.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            RotateError::MissingSnapshot(_) => 10,
            RotateError::DestinationExists(_) => 20,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotateSettings {
    pub format: String,
    pub latest: String,
    pub snapshot: String,
}

impl Default for RotateSettings {
    fn default() -> Self {
        Self {
            format: BACKUP_NAME.to_string(),
            latest: LATEST_NAME.to_string(),
            snapshot: SNAPSHOT_NAME.to_string(),
        }
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}

/// Rename the snapshot in `root` after `now` and point the latest link at it.
///
/// Returns the path of the new rotation. Nothing is touched when the snapshot is
/// missing or the rotation name is taken.
pub async fn rotate(
    root: &Path,
    settings: &RotateSettings,
    now: chrono::DateTime<chrono::Utc>,
) -> anyhow::Result<PathBuf> {
    let snapshot = root.join(&settings.snapshot);
    if !exists(&snapshot).await {
        return Err(RotateError::MissingSnapshot(snapshot).into());
    }
    let mut rotated_name = String::new();
    write!(rotated_name, "{}", now.format(&settings.format))
        .map_err(|_| anyhow!("invalid rotation format {:?}", settings.format))?;
    let rotated = root.join(&rotated_name);
    if exists(&rotated).await {
        return Err(RotateError::DestinationExists(rotated).into());
    }
    tracing::info!("rotating {:?} to {:?} in {:?}", settings.snapshot, rotated_name, root);
    tokio::fs::rename(&snapshot, &rotated)
        .await
        .with_context(|| format!("failed to rename {snapshot:?} to {rotated:?}"))?;
    let latest = root.join(&settings.latest);
    if tokio::fs::symlink_metadata(&latest)
        .await
        .is_ok_and(|metadata| metadata.file_type().is_symlink())
    {
        tracing::info!("removing old latest link {:?}", latest);
        tokio::fs::remove_file(&latest)
            .await
            .with_context(|| format!("failed to remove {latest:?}"))?;
    }
    tracing::info!("creating latest symlink to {:?}", rotated_name);
    tokio::fs::symlink(&rotated_name, &latest)
        .await
        .with_context(|| format!("failed to link {latest:?} to {rotated_name:?}"))?;
    Ok(rotated)
}
