use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use crate::Hooks;

/// How commands reach a server that is not the current host.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Transport {
    /// One shell connection per command
    #[default]
    Spawn,
    /// One long-lived `rbakd` worker per server
    Worker,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerOptions {
    /// Where the backup disk of this server gets mounted
    pub mountpoint: Option<PathBuf>,
    pub transport: Transport,
    /// Worker program name or path
    pub worker: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            mountpoint: None,
            transport: Transport::default(),
            worker: remote::worker::WORKER_PROGRAM.to_string(),
        }
    }
}

/// A host taking part in a backup, identified by `name`.
#[derive(Debug)]
pub struct Server {
    pub name: String,
    /// Address used to connect; defaults to the name
    pub host: String,
    /// Base path every directory is relative to
    pub root: String,
    pub shell: remote::Shell,
    pub options: ServerOptions,
    pub hooks: Hooks,
    resolved: OnceLock<String>,
}

impl Server {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            host: name.to_string(),
            root: "/".to_string(),
            shell: remote::Shell::default(),
            options: ServerOptions::default(),
            hooks: Hooks::new(),
            resolved: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    #[must_use]
    pub fn with_root(mut self, root: &str) -> Self {
        self.root = root.to_string();
        self
    }

    #[must_use]
    pub fn with_shell(mut self, shell: remote::Shell) -> Self {
        self.shell = shell;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolve the host once; later calls return the stored result.
    pub fn resolve(&self, resolver: &dyn remote::Resolver) -> &str {
        self.resolved.get_or_init(|| resolver.resolve(&self.host))
    }

    /// Canonical host, or the configured host if [`Server::resolve`] was never called.
    #[must_use]
    pub fn resolved_host(&self) -> &str {
        self.resolved.get().map_or(self.host.as_str(), String::as_str)
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.resolved_host() == remote::resolve::LOCALHOST
    }

    #[must_use]
    pub fn same_host(&self, other: &Server) -> bool {
        self.resolved_host() == other.resolved_host()
    }

    /// Absolute location of `path` on this server, with a trailing `/`.
    #[must_use]
    pub fn full_path(&self, path: &str) -> String {
        let mut full = PathBuf::from(&self.root);
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => full.push(part),
                Component::ParentDir => {
                    full.pop();
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }
        let full = full.to_string_lossy();
        if full.ends_with('/') {
            full.into_owned()
        } else {
            format!("{full}/")
        }
    }

    /// How a command running on `on` names `path` on this server.
    #[must_use]
    pub fn connection_string(&self, path: &str, on: &Server) -> String {
        let full_path = self.full_path(path);
        if self.same_host(on) {
            full_path
        } else {
            format!("{}:{}", self.host, remote::shell_escape(&full_path))
        }
    }

    #[must_use]
    pub fn connection_command(&self) -> Vec<String> {
        self.shell.connection_command(&self.host, &[])
    }
}

impl std::fmt::Display for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.full_path(""))
    }
}
