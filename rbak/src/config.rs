//! YAML script files.
//!
//! ```yaml
//! master: laptop
//! method:
//!   type: rsync-snapshot
//!   arguments: [--archive, --delete]
//! servers:
//!   - name: laptop
//!     root: /home/me
//!   - name: nas
//!     root: /backup/laptop
//!     shell: { ssh: { port: 2222, batch_mode: true } }
//!     on:
//!       success:
//!         - run: [rbak, rotate]
//!           chdir: root
//!         - run: [rbak, prune, --keep, old]
//!           chdir: root
//! directories:
//!   - Documents
//!   - path: Projects
//!     arguments: [--exclude=target/]
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use common::{Event, Trigger};
use serde::Deserialize;

use crate::error::ConfigurationError;
use crate::methods::{MethodConfig, MethodRegistry};
use crate::scope::{Runnable, ServerScope};
use crate::server::{ServerOptions, Transport};
use crate::{Chdir, Command, Directory, Hooks, Scope, Script, Server};

/// Hooks per event name.
pub type HookTable = HashMap<Event, Vec<HookConfig>>;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptConfig {
    #[serde(default = "default_master")]
    pub master: String,
    pub method: MethodSpec,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub directories: Vec<DirectoryConfig>,
    #[serde(default)]
    pub on: HookTable,
}

fn default_master() -> String {
    remote::resolve::LOCALHOST.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub options: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub on: HookTable,
}

/// Either an explicit shell command or options for the default `ssh`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ShellConfig {
    Custom(remote::Shell),
    Ssh { ssh: remote::SshOptions },
}

impl From<ShellConfig> for remote::Shell {
    fn from(config: ShellConfig) -> Self {
        match config {
            ShellConfig::Custom(shell) => shell,
            ShellConfig::Ssh { ssh } => remote::Shell::ssh(&ssh),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub name: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub shell: Option<ShellConfig>,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default)]
    pub worker: Option<String>,
    #[serde(default)]
    pub mountpoint: Option<std::path::PathBuf>,
    #[serde(default)]
    pub on: HookTable,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DirectoryConfig {
    Path(String),
    Full {
        path: String,
        #[serde(default)]
        arguments: Vec<String>,
        #[serde(default)]
        on: HookTable,
    },
}

/// Which server a hook command runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookServer {
    Target,
    Master,
    Current,
}

/// What a failing hook does to the `try_run` that fired it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// The event fails with the hook's error
    #[default]
    Fail,
    Abort,
    AbortPersistent,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptHook {
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookConfig {
    #[serde(default)]
    pub run: Option<Vec<String>>,
    #[serde(default)]
    pub script: Option<ScriptHook>,
    #[serde(default)]
    pub chdir: Option<Chdir>,
    /// Defaults to the target, or the current server where there is no target
    #[serde(default)]
    pub server: Option<HookServer>,
    #[serde(default)]
    pub on_failure: OnFailure,
}

impl HookConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        match (&self.run, &self.script) {
            (Some(argv), None) if argv.is_empty() => {
                Err(ConfigurationError::new("hook command must not be empty"))
            }
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(ConfigurationError::new(
                "a hook needs exactly one of `run` or `script`",
            )),
        }
    }

    fn server<'a>(&self, scope: &'a dyn Scope) -> Result<&'a ServerScope, ConfigurationError> {
        match self.server {
            Some(HookServer::Master) => Ok(scope.master()),
            Some(HookServer::Current) => Ok(scope.current()),
            Some(HookServer::Target) => scope.target().ok_or_else(|| {
                ConfigurationError::new("hook runs on the target, but this scope has none")
            }),
            None => Ok(scope.target().unwrap_or_else(|| scope.current())),
        }
    }

    async fn execute(&self, scope: &dyn Scope) -> anyhow::Result<()> {
        let server = self.server(scope)?;
        match (&self.run, &self.script) {
            (Some(argv), _) => {
                let mut command = Command::new(expand(argv, server.server())?);
                command.chdir = self.chdir.clone();
                server.run(command).await
            }
            (None, Some(script)) => {
                let args = expand(&script.args, server.server())?;
                server
                    .run_script(&script.name, &script.source, &args, self.chdir.as_ref())
                    .await
            }
            (None, None) => Err(ConfigurationError::new("hook has nothing to run").into()),
        }
    }

    /// Run the hook for `trigger`, turning failures into aborts as configured.
    pub async fn fire(&self, trigger: Trigger<'_, dyn Scope>) -> anyhow::Result<()> {
        match (self.execute(trigger.scope).await, self.on_failure) {
            (Ok(()), _) => Ok(()),
            (Err(error), OnFailure::Fail) => Err(error),
            (Err(error), on_failure) => {
                let persistent = on_failure == OnFailure::AbortPersistent;
                tracing::warn!("{} hook failed, aborting: {:#}", trigger.event, error);
                Err(trigger.abort(persistent))
            }
        }
    }
}

/// Substitute `{root}` and `{mountpoint}` in hook arguments with the values of
/// the server the hook runs on.
fn expand(words: &[String], server: &Server) -> Result<Vec<String>, ConfigurationError> {
    words
        .iter()
        .map(|word| {
            let mut word = word.replace("{root}", &server.root);
            if word.contains("{mountpoint}") {
                let mountpoint = server.options.mountpoint.as_ref().ok_or_else(|| {
                    ConfigurationError::new(format!(
                        "hook uses {{mountpoint}}, but server {} has none",
                        server.name
                    ))
                })?;
                word = word.replace("{mountpoint}", &mountpoint.display().to_string());
            }
            Ok(word)
        })
        .collect()
}

/// Register every hook of `table` on `hooks`.
pub fn install(hooks: &mut Hooks, table: HookTable) -> Result<(), ConfigurationError> {
    for (event, list) in table {
        for hook in list {
            hook.validate()?;
            let hook = Arc::new(hook);
            hooks.on(event, move |trigger| {
                let hook = hook.clone();
                Box::pin(async move { hook.fire(trigger).await })
            });
        }
    }
    Ok(())
}

impl ServerConfig {
    fn build(self) -> anyhow::Result<Server> {
        let mut server = Server::new(&self.name);
        if let Some(host) = &self.host {
            server = server.with_host(host);
        }
        if let Some(root) = &self.root {
            server = server.with_root(root);
        }
        if let Some(shell) = self.shell {
            server = server.with_shell(shell.into());
        }
        let defaults = ServerOptions::default();
        server = server.with_options(ServerOptions {
            mountpoint: self.mountpoint,
            transport: self.transport,
            worker: self.worker.unwrap_or(defaults.worker),
        });
        install(&mut server.hooks, self.on)
            .with_context(|| format!("hooks of server {}", self.name))?;
        Ok(server)
    }
}

impl DirectoryConfig {
    fn build(self) -> anyhow::Result<Directory> {
        let (path, arguments, on) = match self {
            DirectoryConfig::Path(path) => (path, vec![], HookTable::new()),
            DirectoryConfig::Full {
                path,
                arguments,
                on,
            } => (path, arguments, on),
        };
        let mut directory = Directory::new(&path)?.with_arguments(arguments);
        install(&mut directory.hooks, on).with_context(|| format!("hooks of directory {path}"))?;
        Ok(directory)
    }
}

/// Turns parsed configuration into scripts.
#[derive(Debug)]
pub struct Loader {
    pub registry: MethodRegistry,
    pub resolver: Arc<dyn remote::Resolver>,
    pub worker_config: remote::protocol::WorkerConfig,
}

impl Loader {
    pub fn build(&self, config: ScriptConfig) -> anyhow::Result<Script> {
        let MethodSpec {
            kind,
            command,
            arguments,
            options,
            on,
        } = config.method;
        let mut method = self.registry.create(
            &kind,
            MethodConfig {
                command,
                arguments,
                options,
            },
        )?;
        install(method.hooks_mut(), on).with_context(|| format!("hooks of method {kind}"))?;
        let mut hooks = Hooks::new();
        install(&mut hooks, config.on).context("hooks of the script")?;
        let mut builder = Script::builder()
            .master(&config.master)
            .method(method)
            .hooks(hooks)
            .resolver(self.resolver.clone())
            .worker_config(self.worker_config.clone());
        for server in config.servers {
            builder = builder.server(server.build()?);
        }
        for directory in config.directories {
            builder = builder.directory(directory.build()?);
        }
        Ok(builder.build()?)
    }

    pub fn parse(&self, yaml: &str) -> anyhow::Result<Script> {
        let config: ScriptConfig = serde_yaml::from_str(yaml)?;
        self.build(config)
    }

    pub fn load(&self, path: &Path) -> anyhow::Result<Script> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read script {path:?}"))?;
        self.parse(&yaml)
            .with_context(|| format!("invalid script {path:?}"))
    }
}
