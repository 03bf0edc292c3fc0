use anyhow::anyhow;
use async_trait::async_trait;

use super::{Method, MethodConfig};
use crate::error::BackupMethodError;
use crate::scope::{DirectoryScope, Runnable};
use crate::{Command, Hooks, Scope};

pub const NAME: &str = "zfs";

/// `zfs send` on the master piped into `zfs receive` on the target.
///
/// Directories name datasets below each server's root, e.g. root `tank` and
/// directory `home` map to the dataset `tank/home`.
#[derive(Debug)]
pub struct Zfs {
    pub command: Vec<String>,
    pub arguments: Vec<String>,
    pub hooks: Hooks,
}

impl Default for Zfs {
    fn default() -> Self {
        Self {
            command: default_command(),
            arguments: vec![],
            hooks: Hooks::new(),
        }
    }
}

fn default_command() -> Vec<String> {
    vec!["zfs".to_string(), "-rnv".to_string()]
}

/// Dataset name for a server path; datasets take no trailing `/`.
fn dataset(path: &str) -> String {
    match path.trim_end_matches('/') {
        "" => "/".to_string(),
        trimmed => trimmed.to_string(),
    }
}

impl Zfs {
    pub fn new(config: MethodConfig) -> anyhow::Result<Self> {
        config.check_options(NAME, &[])?;
        Ok(Self {
            command: config.command.unwrap_or_else(default_command),
            arguments: config.arguments,
            hooks: Hooks::new(),
        })
    }

    fn argv(&self, verb: &str, path: &str) -> Vec<String> {
        let mut argv = self.command.clone();
        argv.push(verb.to_string());
        argv.extend(self.arguments.iter().cloned());
        argv.push(dataset(path));
        argv
    }

    #[must_use]
    pub fn send_command(&self, scope: &DirectoryScope) -> Vec<String> {
        let path = scope.backup_directory().path();
        self.argv("send", &scope.master().server().full_path(path))
    }

    #[must_use]
    pub fn receive_command(&self, scope: &DirectoryScope) -> Vec<String> {
        let path = scope.backup_directory().path();
        self.argv("receive", &scope.target_scope().server().full_path(path))
    }
}

#[async_trait]
impl Method for Zfs {
    fn name(&self) -> &'static str {
        NAME
    }

    fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    async fn call(&self, scope: &DirectoryScope) -> anyhow::Result<()> {
        let directory = scope.backup_directory().path();
        let context = || BackupMethodError::new(NAME, format!("transfer of {directory} failed"));
        let mut sender = scope
            .master()
            .spawn(Command::new(self.send_command(scope)).capture_stdout())
            .await
            .map_err(|error| error.context(context()))?;
        let stream: std::process::Stdio = sender
            .take_stdout()
            .ok_or_else(|| anyhow!("zfs send has no stdout"))?
            .try_into()?;
        let receive = Command::new(self.receive_command(scope)).stdin(stream);
        let (sent, received) =
            futures::join!(sender.check(), scope.target_scope().run(receive));
        received
            .and(sent)
            .map_err(|error| error.context(context()))
    }
}
