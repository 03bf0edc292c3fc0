use serde::{Deserialize, Serialize};

/// Options for the default `ssh` shell.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshOptions {
    pub port: Option<u16>,
    pub key: Option<std::path::PathBuf>,
    pub user: Option<String>,
    pub batch_mode: Option<bool>,
}

/// Builds the command that opens a shell on another host.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Shell {
    pub command: Vec<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl Default for Shell {
    fn default() -> Self {
        Self::ssh(&SshOptions::default())
    }
}

impl Shell {
    #[must_use]
    pub fn new(command: Vec<String>, arguments: Vec<String>) -> Self {
        Self { command, arguments }
    }

    /// `ssh [-p PORT] [-i KEY] [-l USER] [-o BatchMode=yes|no]`
    #[must_use]
    pub fn ssh(options: &SshOptions) -> Self {
        let mut arguments = vec![];
        if let Some(port) = options.port {
            arguments.extend(["-p".to_string(), port.to_string()]);
        }
        if let Some(key) = &options.key {
            arguments.extend(["-i".to_string(), key.display().to_string()]);
        }
        if let Some(user) = &options.user {
            arguments.extend(["-l".to_string(), user.clone()]);
        }
        if let Some(batch_mode) = options.batch_mode {
            let value = if batch_mode { "yes" } else { "no" };
            arguments.extend(["-o".to_string(), format!("BatchMode={value}")]);
        }
        Self {
            command: vec!["ssh".to_string()],
            arguments,
        }
    }

    /// `[command.., arguments.., extra.., host]`
    #[must_use]
    pub fn connection_command(&self, host: &str, extra: &[String]) -> Vec<String> {
        self.command
            .iter()
            .chain(&self.arguments)
            .chain(extra)
            .cloned()
            .chain(std::iter::once(host.to_string()))
            .collect()
    }
}

impl std::fmt::Display for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", crate::shell_join(&self.connection_command("<host>", &[])))
    }
}
