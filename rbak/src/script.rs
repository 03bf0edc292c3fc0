use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;

use crate::error::ConfigurationError;
use crate::methods::Method;
use crate::{Directory, Hooks, Scope, Server};

/// One backup job: servers, directories, the master and the method.
///
/// Built through [`Script::builder`]; host names are resolved while building so
/// a finished script knows which of its servers are local.
#[derive(Debug)]
pub struct Script {
    servers: Vec<Arc<Server>>,
    directories: Vec<Arc<Directory>>,
    master: String,
    method: Box<dyn Method>,
    pub hooks: Hooks,
    resolver: Arc<dyn remote::Resolver>,
    worker_config: remote::protocol::WorkerConfig,
    master_server: OnceLock<Arc<Server>>,
    current_server: OnceLock<Arc<Server>>,
}

impl Script {
    #[must_use]
    pub fn builder() -> ScriptBuilder {
        ScriptBuilder::default()
    }

    #[must_use]
    pub fn servers(&self) -> &[Arc<Server>] {
        &self.servers
    }

    #[must_use]
    pub fn directories(&self) -> &[Arc<Directory>] {
        &self.directories
    }

    /// Name (or host) the master was configured with.
    #[must_use]
    pub fn master(&self) -> &str {
        &self.master
    }

    #[must_use]
    pub fn method(&self) -> &dyn Method {
        self.method.as_ref()
    }

    #[must_use]
    pub fn resolver(&self) -> &dyn remote::Resolver {
        self.resolver.as_ref()
    }

    #[must_use]
    pub fn worker_config(&self) -> &remote::protocol::WorkerConfig {
        &self.worker_config
    }

    /// Server called `name`, or failing that the first one on the host `name` resolves to.
    #[must_use]
    pub fn find_named_server(&self, name: &str) -> Option<Arc<Server>> {
        if let Some(server) = self.servers.iter().find(|server| server.name == name) {
            return Some(server.clone());
        }
        let host = self.resolver.resolve(name);
        self.servers
            .iter()
            .find(|server| server.resolved_host() == host)
            .cloned()
    }

    pub fn master_server(&self) -> Result<Arc<Server>, ConfigurationError> {
        if let Some(server) = self.master_server.get() {
            return Ok(server.clone());
        }
        let server = self.find_named_server(&self.master).ok_or_else(|| {
            ConfigurationError::new(format!("could not determine master server {:?}", self.master))
        })?;
        Ok(self.master_server.get_or_init(|| server).clone())
    }

    /// The server this process runs on.
    ///
    /// The master if it is local, else the first local server, else a stand-in for
    /// localhost that is not part of the script.
    pub fn current_server(&self) -> Result<Arc<Server>, ConfigurationError> {
        if let Some(server) = self.current_server.get() {
            return Ok(server.clone());
        }
        let master = self.master_server()?;
        let server = if master.is_local() {
            master
        } else if let Some(server) = self.servers.iter().find(|server| server.is_local()) {
            server.clone()
        } else {
            let localhost = Server::new(remote::resolve::LOCALHOST);
            localhost.resolve(self.resolver.as_ref());
            Arc::new(localhost)
        };
        Ok(self.current_server.get_or_init(|| server).clone())
    }

    pub fn running_on_master(&self) -> Result<bool, ConfigurationError> {
        Ok(self.master_server()?.is_local())
    }
}

pub struct ScriptBuilder {
    servers: Vec<Server>,
    directories: Vec<Directory>,
    master: String,
    method: Option<Box<dyn Method>>,
    hooks: Hooks,
    resolver: Option<Arc<dyn remote::Resolver>>,
    worker_config: remote::protocol::WorkerConfig,
}

impl Default for ScriptBuilder {
    fn default() -> Self {
        Self {
            servers: vec![],
            directories: vec![],
            master: remote::resolve::LOCALHOST.to_string(),
            method: None,
            hooks: Hooks::new(),
            resolver: None,
            worker_config: remote::protocol::WorkerConfig::default(),
        }
    }
}

impl ScriptBuilder {
    #[must_use]
    pub fn server(mut self, server: Server) -> Self {
        self.servers.push(server);
        self
    }

    #[must_use]
    pub fn directory(mut self, directory: Directory) -> Self {
        self.directories.push(directory);
        self
    }

    /// Name or host of the master server, `localhost` by default.
    #[must_use]
    pub fn master(mut self, master: &str) -> Self {
        self.master = master.to_string();
        self
    }

    #[must_use]
    pub fn method(mut self, method: Box<dyn Method>) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn on<F>(mut self, event: common::Event, handler: F) -> Self
    where
        F: for<'a> Fn(common::Trigger<'a, dyn Scope>) -> BoxFuture<'a, anyhow::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.on(event, handler);
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Defaults to [`remote::SystemResolver`].
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn remote::Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn worker_config(mut self, worker_config: remote::protocol::WorkerConfig) -> Self {
        self.worker_config = worker_config;
        self
    }

    pub fn build(self) -> Result<Script, ConfigurationError> {
        let method = self
            .method
            .ok_or_else(|| ConfigurationError::new("no backup method specified"))?;
        let mut names = HashSet::new();
        for server in &self.servers {
            if !names.insert(server.name.as_str()) {
                return Err(ConfigurationError::new(format!(
                    "duplicate server name {:?}",
                    server.name
                )));
            }
        }
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(remote::SystemResolver::new()));
        for server in &self.servers {
            let resolved = server.resolve(resolver.as_ref());
            tracing::debug!("server {} resolves to {}", server.name, resolved);
        }
        let script = Script {
            servers: self.servers.into_iter().map(Arc::new).collect(),
            directories: self.directories.into_iter().map(Arc::new).collect(),
            master: self.master,
            method,
            hooks: self.hooks,
            resolver,
            worker_config: self.worker_config,
            master_server: OnceLock::new(),
            current_server: OnceLock::new(),
        };
        script.current_server()?;
        Ok(script)
    }
}
