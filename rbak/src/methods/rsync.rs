use async_trait::async_trait;
use remote::CommandFailure;

use super::{Method, MethodConfig};
use crate::error::BackupMethodError;
use crate::scope::{DirectoryScope, Runnable, ServerScope};
use crate::{Command, Hooks, Scope, Server};

pub const NAME: &str = "rsync";

/// rsync exit status for "partial transfer due to vanished source files".
pub const VANISHED_SOURCE_FILES: i32 = 24;

/// Quote one word of an rsync `-e` command, which rsync splits on whitespace itself.
#[must_use]
pub fn escape(word: &str) -> String {
    if word.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        format!("\"{}\"", word.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        word.to_string()
    }
}

/// `-e <shell>` reaching `target` from `master`, nothing when they share a host.
///
/// rsync appends the host to the `-e` command itself, so the connection command must
/// end with it.
pub fn connect_arguments(
    method: &'static str,
    master: &Server,
    target: &Server,
) -> Result<Vec<String>, BackupMethodError> {
    if master.same_host(target) {
        return Ok(vec![]);
    }
    let mut command = target.connection_command();
    if command.last() != Some(&target.host) {
        return Err(BackupMethodError::new(
            method,
            format!("shell must end with the host name, got {command:?}"),
        ));
    }
    command.pop();
    let shell = command
        .iter()
        .map(|word| escape(word))
        .collect::<Vec<_>>()
        .join(" ");
    Ok(vec!["-e".to_string(), shell])
}

/// Run an rsync argv on the master, tolerating vanished source files.
pub(super) async fn transfer(
    method: &'static str,
    master: &ServerScope,
    argv: Vec<String>,
    what: &str,
) -> anyhow::Result<()> {
    match master.run(Command::new(argv)).await {
        Ok(()) => Ok(()),
        Err(error)
            if error
                .downcast_ref::<CommandFailure>()
                .is_some_and(|failure| failure.status.code() == Some(VANISHED_SOURCE_FILES)) =>
        {
            tracing::warn!("{}: some files vanished before they could be transferred", what);
            Ok(())
        }
        Err(error) => Err(error.context(BackupMethodError::new(
            method,
            format!("transfer of {what} failed"),
        ))),
    }
}

/// Mirror each directory from the master to the target with rsync.
#[derive(Debug)]
pub struct RSync {
    pub command: Vec<String>,
    pub arguments: Vec<String>,
    pub hooks: Hooks,
}

impl Default for RSync {
    fn default() -> Self {
        Self {
            command: default_command(),
            arguments: vec![],
            hooks: Hooks::new(),
        }
    }
}

pub(super) fn default_command() -> Vec<String> {
    vec!["rsync".to_string(), "--stats".to_string()]
}

impl RSync {
    pub fn new(config: MethodConfig) -> anyhow::Result<Self> {
        config.check_options(NAME, &[])?;
        Ok(Self::from_config(config))
    }

    pub(super) fn from_config(config: MethodConfig) -> Self {
        Self {
            command: config.command.unwrap_or_else(default_command),
            arguments: config.arguments,
            hooks: Hooks::new(),
        }
    }

    /// Full argv for copying `source` on the master to `destination` on the target.
    pub(super) fn argv(
        &self,
        method: &'static str,
        scope: &DirectoryScope,
        extra: &[String],
        destination: &str,
    ) -> Result<Vec<String>, BackupMethodError> {
        let master = scope.master().server();
        let target = scope.target_scope().server();
        let directory = scope.backup_directory();
        let mut argv = self.command.clone();
        argv.extend(self.arguments.iter().cloned());
        argv.extend(directory.arguments.iter().cloned());
        argv.extend(connect_arguments(method, master, target)?);
        argv.extend(extra.iter().cloned());
        argv.push(master.connection_string(directory.path(), master));
        argv.push(target.connection_string(destination, master));
        Ok(argv)
    }
}

#[async_trait]
impl Method for RSync {
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
        let argv = self.argv(NAME, scope, &[], directory)?;
        transfer(NAME, scope.master(), argv, directory).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_quotes_only_when_needed() {
        assert_eq!(escape("ssh"), "ssh");
        assert_eq!(escape("-p"), "-p");
        assert_eq!(escape("/keys/my key"), r#""/keys/my key""#);
        assert_eq!(escape(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(escape("it's"), r#""it's""#);
    }

    #[test]
    fn connect_arguments_drop_the_host() -> anyhow::Result<()> {
        let resolver = remote::StaticResolver::new(["laptop"]);
        let laptop = Server::new("laptop");
        let nas = Server::new("nas").with_shell(remote::Shell::ssh(&remote::SshOptions {
            port: Some(2222),
            key: Some("/home/me/.ssh/backup key".into()),
            ..remote::SshOptions::default()
        }));
        let localhost = Server::new("localhost");
        for server in [&laptop, &nas, &localhost] {
            server.resolve(&resolver);
        }
        assert!(connect_arguments(NAME, &laptop, &localhost)?.is_empty());
        assert_eq!(
            connect_arguments(NAME, &laptop, &nas)?,
            vec!["-e", r#"ssh -p 2222 -i "/home/me/.ssh/backup key""#]
        );
        Ok(())
    }

    #[test]
    fn defaults_come_from_config() -> anyhow::Result<()> {
        let rsync = RSync::new(MethodConfig::default())?;
        assert_eq!(rsync.command, vec!["rsync", "--stats"]);
        let custom = RSync::new(MethodConfig {
            command: Some(vec!["sudo".into(), "rsync".into()]),
            arguments: vec!["--archive".into()],
            ..MethodConfig::default()
        })?;
        assert_eq!(custom.command, vec!["sudo", "rsync"]);
        assert_eq!(custom.arguments, vec!["--archive"]);
        Ok(())
    }
}
