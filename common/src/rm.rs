use anyhow::{Context, Result, anyhow};
use async_recursion::async_recursion;
use std::os::unix::fs::PermissionsExt;

/// Add `ug+rw` to everything under `path` (and `ug+x` to directories), like `chmod -R ug+rwX`.
///
/// Symlinks are left alone. Needed before removing snapshot trees that were copied
/// with read-only permissions.
#[async_recursion]
pub async fn make_writable(path: &std::path::Path) -> Result<()> {
    let metadata = tokio::fs::symlink_metadata(path)
        .await
        .with_context(|| format!("failed reading metadata from {:?}", &path))?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    let mode = metadata.permissions().mode();
    let wanted = if metadata.is_dir() || mode & 0o111 != 0 {
        mode | 0o770
    } else {
        mode | 0o660
    };
    if wanted != mode {
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(wanted))
            .await
            .with_context(|| format!("failed changing permissions of {:?}", &path))?;
    }
    if !metadata.is_dir() {
        return Ok(());
    }
    let mut entries = tokio::fs::read_dir(path)
        .await
        .with_context(|| format!("cannot open directory {:?} for reading", path))?;
    let mut join_set = tokio::task::JoinSet::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {:?}", &path))?
    {
        let entry_path = entry.path();
        join_set.spawn(async move { make_writable(&entry_path).await });
    }
    while let Some(res) = join_set.join_next().await {
        res??;
    }
    Ok(())
}

/// Remove `path` recursively, removing the entries of each directory in parallel.
///
/// Errors of individual entries do not stop their siblings; they are collected and
/// returned together once the directory has been walked.
#[async_recursion]
pub async fn rm(path: &std::path::Path) -> Result<()> {
    tracing::debug!("remove: {:?}", path);
    let metadata = tokio::fs::symlink_metadata(path)
        .await
        .with_context(|| format!("failed reading metadata from {:?}", &path))?;
    if !metadata.is_dir() {
        return tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("failed removing {:?}", &path));
    }
    let mut entries = tokio::fs::read_dir(path)
        .await
        .with_context(|| format!("cannot open directory {:?} for reading", path))?;
    let mut join_set = tokio::task::JoinSet::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {:?}", &path))?
    {
        let entry_path = entry.path();
        join_set.spawn(async move { rm(&entry_path).await });
    }
    let mut errors = vec![];
    while let Some(res) = join_set.join_next().await {
        if let Err(error) = res? {
            errors.push(error);
        }
    }
    if !errors.is_empty() {
        tracing::debug!("remove: {:?} failed with: {:?}", path, &errors);
        let details = errors
            .iter()
            .map(|error| format!("{error:#}"))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(anyhow!("failed removing {:?}: {}", path, details));
    }
    tokio::fs::remove_dir(path)
        .await
        .with_context(|| format!("failed removing directory {:?}", &path))?;
    tracing::debug!("remove: {:?} succeeded!", path);
    Ok(())
}
