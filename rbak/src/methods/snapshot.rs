use async_trait::async_trait;

use super::rsync::{self, RSync};
use super::{Method, MethodConfig};
use crate::directory::depth;
use crate::error::BackupMethodError;
use crate::scope::DirectoryScope;
use crate::{Directory, Hooks, Scope};

pub const NAME: &str = "rsync-snapshot";

/// Directory the next snapshot is built in, relative to the target root.
pub const SNAPSHOT_NAME: &str = "latest.snapshot";
/// Symlink to the most recent completed rotation.
pub const LATEST_NAME: &str = "latest";

/// Incremental rsync into `<snapshot>/<dir>`, hard linking unchanged files against
/// `<latest>/<dir>`. Rotation of the snapshot is left to hooks (`rbak rotate`).
#[derive(Debug)]
pub struct RSyncSnapshot {
    rsync: RSync,
    pub snapshot_name: String,
    pub latest_name: String,
}

impl Default for RSyncSnapshot {
    fn default() -> Self {
        Self {
            rsync: RSync::default(),
            snapshot_name: SNAPSHOT_NAME.to_string(),
            latest_name: LATEST_NAME.to_string(),
        }
    }
}

impl RSyncSnapshot {
    pub fn new(mut config: MethodConfig) -> anyhow::Result<Self> {
        config.check_options(NAME, &["snapshot_name", "latest_name"])?;
        let snapshot_name = config
            .options
            .remove("snapshot_name")
            .unwrap_or_else(|| SNAPSHOT_NAME.to_string());
        let latest_name = config
            .options
            .remove("latest_name")
            .unwrap_or_else(|| LATEST_NAME.to_string());
        Ok(Self {
            rsync: RSync::from_config(config),
            snapshot_name,
            latest_name,
        })
    }

    #[must_use]
    pub fn incremental_path(&self, directory: &Directory) -> String {
        format!("{}/{}", self.snapshot_name.trim_end_matches('/'), directory.path())
    }

    /// `--link-dest` pointing from the incremental path back to the latest rotation.
    #[must_use]
    pub fn link_arguments(&self, directory: &Directory, incremental_path: &str) -> Vec<String> {
        let latest = format!(
            "{}{}/{}",
            "../".repeat(depth(incremental_path)),
            self.latest_name.trim_end_matches('/'),
            directory.path()
        );
        vec!["--link-dest".to_string(), latest]
    }
}

#[async_trait]
impl Method for RSyncSnapshot {
    fn name(&self) -> &'static str {
        NAME
    }

    fn hooks(&self) -> &Hooks {
        &self.rsync.hooks
    }

    fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.rsync.hooks
    }

    async fn call(&self, scope: &DirectoryScope) -> anyhow::Result<()> {
        let directory = scope.backup_directory();
        let incremental_path = self.incremental_path(directory);
        let target = scope.target_scope();
        target.mkdir_p(&incremental_path).await.map_err(|error| {
            error.context(BackupMethodError::new(
                NAME,
                format!("cannot create {incremental_path} on {}", target.server().name),
            ))
        })?;
        let links = self.link_arguments(directory, &incremental_path);
        let argv = self.rsync.argv(NAME, scope, &links, &incremental_path)?;
        rsync::transfer(NAME, scope.master(), argv, directory.path()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_for_nested_directory() -> anyhow::Result<()> {
        let method = RSyncSnapshot::default();
        let directory = Directory::new("var/www")?;
        let incremental = method.incremental_path(&directory);
        assert_eq!(incremental, "latest.snapshot/var/www/");
        assert_eq!(
            method.link_arguments(&directory, &incremental),
            vec!["--link-dest", "../../../latest/var/www/"]
        );
        Ok(())
    }

    #[test]
    fn paths_for_root_directory() -> anyhow::Result<()> {
        let method = RSyncSnapshot::default();
        let directory = Directory::new("")?;
        let incremental = method.incremental_path(&directory);
        assert_eq!(incremental, "latest.snapshot/./");
        assert_eq!(
            method.link_arguments(&directory, &incremental),
            vec!["--link-dest", "../latest/./"]
        );
        Ok(())
    }

    #[test]
    fn names_come_from_options() -> anyhow::Result<()> {
        let mut config = MethodConfig::default();
        config.options.insert("snapshot_name".into(), "incoming".into());
        config.options.insert("latest_name".into(), "current".into());
        let method = RSyncSnapshot::new(config)?;
        let directory = Directory::new("home")?;
        assert_eq!(method.incremental_path(&directory), "incoming/home/");
        assert_eq!(
            method.link_arguments(&directory, "incoming/home/"),
            vec!["--link-dest", "../../current/home/"]
        );
        Ok(())
    }
}
