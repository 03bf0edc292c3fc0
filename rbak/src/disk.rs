//! Mounting and unmounting backup disks, used from hooks around a run.

use std::path::Path;

use anyhow::{Context, anyhow};

/// Argv mounting the disk labelled `name` (or whatever fstab says) at `path`.
#[cfg(not(target_os = "macos"))]
#[must_use]
pub fn mount_command(path: &Path, name: Option<&str>) -> Vec<String> {
    let mut argv = vec!["sudo".to_string(), "mount".to_string()];
    if let Some(name) = name {
        argv.extend(["-L".to_string(), name.to_string()]);
    }
    argv.push(path.display().to_string());
    argv
}

#[cfg(not(target_os = "macos"))]
#[must_use]
pub fn unmount_command(path: &Path) -> Vec<String> {
    vec!["sudo".to_string(), "umount".to_string(), path.display().to_string()]
}

/// Argv mounting the volume `name` (by default the last component of `path`) at `path`.
#[cfg(target_os = "macos")]
#[must_use]
pub fn mount_command(path: &Path, name: Option<&str>) -> Vec<String> {
    let name = name.map(str::to_string).unwrap_or_else(|| {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    vec![
        "diskutil".to_string(),
        "mount".to_string(),
        "-mountPoint".to_string(),
        path.display().to_string(),
        name,
    ]
}

#[cfg(target_os = "macos")]
#[must_use]
pub fn unmount_command(path: &Path) -> Vec<String> {
    vec!["diskutil".to_string(), "unmount".to_string(), path.display().to_string()]
}

async fn execute(argv: Vec<String>) -> anyhow::Result<()> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;
    tracing::info!("running {:?}", argv);
    let status = tokio::process::Command::new(program)
        .args(args)
        .status()
        .await
        .with_context(|| format!("failed to run {argv:?}"))?;
    if !status.success() {
        return Err(remote::CommandFailure {
            command: argv,
            status: status.into(),
        }
        .into());
    }
    Ok(())
}

/// Create the mountpoint if needed and mount the disk there.
pub async fn mount(path: &Path, name: Option<&str>) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("cannot create mountpoint {path:?}"))?;
    execute(mount_command(path, name)).await
}

pub async fn unmount(path: &Path) -> anyhow::Result<()> {
    execute(unmount_command(path)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn linux_commands() {
        let path = Path::new("/mnt/backup");
        assert_eq!(mount_command(path, None), vec!["sudo", "mount", "/mnt/backup"]);
        assert_eq!(
            mount_command(path, Some("BACKUP")),
            vec!["sudo", "mount", "-L", "BACKUP", "/mnt/backup"]
        );
        assert_eq!(unmount_command(path), vec!["sudo", "umount", "/mnt/backup"]);
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn macos_commands() {
        let path = Path::new("/Volumes/Backup");
        assert_eq!(
            mount_command(path, None),
            vec!["diskutil", "mount", "-mountPoint", "/Volumes/Backup", "Backup"]
        );
        assert_eq!(unmount_command(path), vec!["diskutil", "unmount", "/Volumes/Backup"]);
    }
}
