use async_trait::async_trait;

use super::{Method, MethodConfig};
use crate::error::BackupMethodError;
use crate::scope::{DirectoryScope, Runnable};
use crate::{Command, Hooks, Scope};

pub const NAME: &str = "scp";

/// Copy each directory with scp, driven from the current server.
#[derive(Debug)]
pub struct Scp {
    pub command: Vec<String>,
    pub arguments: Vec<String>,
    pub hooks: Hooks,
}

impl Default for Scp {
    fn default() -> Self {
        Self {
            command: default_command(),
            arguments: vec![],
            hooks: Hooks::new(),
        }
    }
}

fn default_command() -> Vec<String> {
    vec!["scp".to_string(), "-prB".to_string()]
}

impl Scp {
    pub fn new(config: MethodConfig) -> anyhow::Result<Self> {
        config.check_options(NAME, &[])?;
        Ok(Self {
            command: config.command.unwrap_or_else(default_command),
            arguments: config.arguments,
            hooks: Hooks::new(),
        })
    }

    #[must_use]
    pub fn argv(&self, scope: &DirectoryScope) -> Vec<String> {
        let current = scope.current().server();
        let directory = scope.backup_directory();
        let mut argv = self.command.clone();
        argv.extend(self.arguments.iter().cloned());
        // the trailing `.` copies the contents, so repeated runs do not nest the source
        // inside an existing destination
        argv.push(format!(
            "{}.",
            scope.master().server().connection_string(directory.path(), current)
        ));
        argv.push(
            scope
                .target_scope()
                .server()
                .connection_string(directory.path(), current),
        );
        argv
    }
}

#[async_trait]
impl Method for Scp {
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
        scope
            .current()
            .run(Command::new(self.argv(scope)))
            .await
            .map_err(|error| {
                error.context(BackupMethodError::new(NAME, format!("copy of {directory} failed")))
            })
    }
}
