//! Execution contexts handed to methods and hooks.
//!
//! A [`ScriptScope`] lives for one run of a script, a [`TargetScope`] for one target
//! server, a [`DirectoryScope`] for one directory on that target. Each exposes the
//! master, the current server and, when there is one, the target through
//! [`ServerScope`]s, which know how to run commands on their server.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use remote::protocol::WorkerConfig;
use remote::{CommandFailure, ExitStatus, LogPipe, Process, ProcessGroup, Worker};

use crate::server::Transport;
use crate::{Chdir, Command, Directory, RBAK_PROGRAM, Script, Server};

/// What hooks see; every scope has a master and a current server.
pub trait Scope: Send + Sync {
    fn script(&self) -> &Script;
    fn master(&self) -> &ServerScope;
    fn current(&self) -> &ServerScope;

    fn target(&self) -> Option<&ServerScope> {
        None
    }

    fn directory(&self) -> Option<&Directory> {
        None
    }
}

#[async_trait]
pub trait Runnable {
    /// Run `command` to completion, failing with [`CommandFailure`] on a non-zero exit.
    async fn run(&self, command: Command) -> anyhow::Result<()>;
}

pub trait ConnectionStringProvider {
    fn full_path(&self, path: &str) -> String;

    /// How a command running on `on` names `path`.
    fn connection_string(&self, path: &str, on: &Server) -> String;
}

impl ConnectionStringProvider for Server {
    fn full_path(&self, path: &str) -> String {
        Server::full_path(self, path)
    }

    fn connection_string(&self, path: &str, on: &Server) -> String {
        Server::connection_string(self, path, on)
    }
}

/// A server as seen from the current host.
#[derive(Debug)]
pub struct ServerScope {
    server: Arc<Server>,
    from: Arc<Server>,
    group: ProcessGroup,
    worker_config: WorkerConfig,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl ServerScope {
    #[must_use]
    pub fn new(
        server: Arc<Server>,
        from: Arc<Server>,
        group: ProcessGroup,
        worker_config: WorkerConfig,
    ) -> Self {
        Self {
            server,
            from,
            group,
            worker_config,
            worker: tokio::sync::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// Whether commands for this server run directly, without a connection.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.server.same_host(&self.from)
    }

    fn working_dir(&self, chdir: &Chdir) -> String {
        match chdir {
            Chdir::Root => self.server.full_path(""),
            Chdir::Path(path) if path.starts_with('/') => path.clone(),
            Chdir::Path(path) => self.server.full_path(path),
        }
    }

    /// Argv that runs `command` on this server from the current host.
    ///
    /// Remote commands that need a working directory go through `rbak spawn` on
    /// the far side, the whole remote argv is escaped for the remote shell.
    #[must_use]
    pub fn command_line(&self, command: &Command) -> Vec<String> {
        if self.is_local() {
            return command.argv.clone();
        }
        let remote_argv = match &command.chdir {
            Some(chdir) => [
                RBAK_PROGRAM.to_string(),
                "--root".to_string(),
                self.working_dir(chdir),
                "spawn".to_string(),
                "--".to_string(),
            ]
            .into_iter()
            .chain(command.argv.iter().cloned())
            .collect(),
            None => command.argv.clone(),
        };
        let mut argv = self.server.connection_command();
        argv.push("--".to_string());
        argv.push(remote::shell_join(&remote_argv));
        argv
    }

    /// Start `command` over a fresh connection.
    ///
    /// Stdout is logged at info unless captured, stderr is always logged at error.
    pub async fn spawn(&self, command: Command) -> anyhow::Result<Running> {
        let argv = self.command_line(&command);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("cannot run an empty command on {}", self.server.name))?;
        tracing::info!("running {:?} on {}", command.argv, self.server.name);
        let mut child = tokio::process::Command::new(program);
        child
            .args(args)
            .stdin(command.stdin.unwrap_or_else(std::process::Stdio::null))
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        if self.is_local()
            && let Some(chdir) = &command.chdir
        {
            child.current_dir(self.working_dir(chdir));
        }
        let mut process = self.group.spawn(&mut child)?;
        let stdout = if command.capture_stdout {
            None
        } else {
            process
                .stdout
                .take()
                .map(|stdout| LogPipe::spawn(stdout, tracing::Level::INFO))
        };
        let stderr = process
            .stderr
            .take()
            .map(|stderr| LogPipe::spawn(stderr, tracing::Level::ERROR));
        Ok(Running {
            process,
            stdout,
            stderr,
        })
    }

    async fn with_worker<'a>(
        &self,
        slot: &'a mut Option<Worker>,
    ) -> anyhow::Result<&'a mut Worker> {
        if slot.is_none() {
            let launch = if self.is_local() {
                remote::worker::Launch::Local
            } else {
                remote::worker::Launch::Remote {
                    shell: &self.server.shell,
                    host: &self.server.host,
                }
            };
            let argv =
                remote::worker::launch_command(launch, &self.server.options.worker, &self.worker_config)?;
            *slot = Some(Worker::connect(&self.group, &self.server.host, &argv).await?);
        }
        slot.as_mut()
            .ok_or_else(|| anyhow!("no worker for {}", self.server.name))
    }

    /// Point the worker at `chdir`, or back at its start directory, as a fresh
    /// shell connection would be.
    async fn enter(&self, worker: &mut Worker, chdir: Option<&Chdir>) -> anyhow::Result<()> {
        match chdir {
            Some(chdir) => {
                worker
                    .set_working_dir(std::path::Path::new(&self.working_dir(chdir)))
                    .await
            }
            None => worker.reset_working_dir().await,
        }
    }

    async fn run_on_worker(&self, command: Command) -> anyhow::Result<()> {
        let mut slot = self.worker.lock().await;
        let worker = self.with_worker(&mut slot).await?;
        self.enter(worker, command.chdir.as_ref()).await?;
        tracing::info!("running {:?} on {} (worker)", command.argv, self.server.name);
        let status = worker.run_command(&command.argv).await?;
        check(command.argv, status)
    }

    /// Install `source` as an executable `name` on this server and run it.
    ///
    /// Scripts always go through a worker, whatever the server's transport.
    pub async fn run_script(
        &self,
        name: &str,
        source: &str,
        args: &[String],
        chdir: Option<&Chdir>,
    ) -> anyhow::Result<()> {
        let mut slot = self.worker.lock().await;
        let worker = self.with_worker(&mut slot).await?;
        self.enter(worker, chdir).await?;
        tracing::info!("running script {} on {}", name, self.server.name);
        let status = worker.run_script(name, source, args).await?;
        check(vec![name.to_string()], status)
    }

    /// Create `path` and its parents; relative paths are taken from the server root.
    pub async fn mkdir_p(&self, path: &str) -> anyhow::Result<()> {
        let full_path = self.server.full_path(path);
        if self.server.options.transport == Transport::Worker {
            let mut slot = self.worker.lock().await;
            let worker = self.with_worker(&mut slot).await?;
            return worker.mkdir_p(std::path::Path::new(&full_path)).await;
        }
        self.run(Command::new(["mkdir", "-p", full_path.as_str()])).await
    }

    /// Shut down the worker, if one was started.
    pub async fn close(&self) -> anyhow::Result<()> {
        match self.worker.lock().await.take() {
            Some(worker) => worker
                .close()
                .await
                .with_context(|| format!("closing the worker on {}", self.server.name)),
            None => Ok(()),
        }
    }
}

fn check(command: Vec<String>, status: ExitStatus) -> anyhow::Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(CommandFailure { command, status }.into())
    }
}

#[async_trait]
impl Runnable for ServerScope {
    async fn run(&self, command: Command) -> anyhow::Result<()> {
        if self.server.options.transport == Transport::Worker && !command.needs_pipes() {
            return self.run_on_worker(command).await;
        }
        self.spawn(command).await?.check().await
    }
}

impl ConnectionStringProvider for ServerScope {
    fn full_path(&self, path: &str) -> String {
        self.server.full_path(path)
    }

    fn connection_string(&self, path: &str, on: &Server) -> String {
        self.server.connection_string(path, on)
    }
}

impl std::fmt::Display for ServerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.server, f)
    }
}

/// A command started by [`ServerScope::spawn`].
#[derive(Debug)]
pub struct Running {
    process: Process,
    stdout: Option<LogPipe>,
    stderr: Option<LogPipe>,
}

impl Running {
    /// The child's stdout, when the command captured it.
    pub fn take_stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.process.stdout.take()
    }

    /// Wait for exit; output is fully drained before returning.
    pub async fn finish(mut self) -> anyhow::Result<ExitStatus> {
        let status = self.process.wait().await?;
        for pipe in [self.stdout, self.stderr].into_iter().flatten() {
            pipe.close().await?;
        }
        Ok(status)
    }

    pub async fn check(self) -> anyhow::Result<()> {
        let command = self.process.command.clone();
        let status = self.finish().await?;
        check(command, status)
    }
}

/// One run of a script.
#[derive(Debug)]
pub struct ScriptScope {
    script: Arc<Script>,
    master: ServerScope,
    current: ServerScope,
}

impl ScriptScope {
    pub fn new(script: Arc<Script>, group: ProcessGroup) -> anyhow::Result<Self> {
        let master = script.master_server()?;
        let current = script.current_server()?;
        let worker_config = script.worker_config().clone();
        Ok(Self {
            master: ServerScope::new(master, current.clone(), group.clone(), worker_config.clone()),
            current: ServerScope::new(current.clone(), current, group, worker_config),
            script,
        })
    }

    pub(crate) fn for_target(self: &Arc<Self>, server: Arc<Server>) -> TargetScope {
        TargetScope {
            target: ServerScope::new(
                server,
                self.current.server.clone(),
                self.master.group.clone(),
                self.script.worker_config().clone(),
            ),
            script: self.clone(),
        }
    }

    /// Shut down the master and current workers.
    pub async fn close(&self) -> anyhow::Result<()> {
        let master = self.master.close().await;
        let current = self.current.close().await;
        master.and(current)
    }
}

impl Scope for ScriptScope {
    fn script(&self) -> &Script {
        &self.script
    }

    fn master(&self) -> &ServerScope {
        &self.master
    }

    fn current(&self) -> &ServerScope {
        &self.current
    }
}

/// Backing up to one target server.
#[derive(Debug)]
pub struct TargetScope {
    script: Arc<ScriptScope>,
    target: ServerScope,
}

impl TargetScope {
    #[must_use]
    pub fn target_scope(&self) -> &ServerScope {
        &self.target
    }

    pub(crate) fn for_directory(self: &Arc<Self>, directory: Arc<Directory>) -> DirectoryScope {
        DirectoryScope {
            target: self.clone(),
            directory,
        }
    }
}

impl Scope for TargetScope {
    fn script(&self) -> &Script {
        self.script.script()
    }

    fn master(&self) -> &ServerScope {
        self.script.master()
    }

    fn current(&self) -> &ServerScope {
        self.script.current()
    }

    fn target(&self) -> Option<&ServerScope> {
        Some(&self.target)
    }
}

/// Backing up one directory to one target server; what a method works on.
#[derive(Debug)]
pub struct DirectoryScope {
    target: Arc<TargetScope>,
    directory: Arc<Directory>,
}

impl DirectoryScope {
    #[must_use]
    pub fn target_scope(&self) -> &ServerScope {
        &self.target.target
    }

    #[must_use]
    pub fn backup_directory(&self) -> &Directory {
        &self.directory
    }
}

impl Scope for DirectoryScope {
    fn script(&self) -> &Script {
        self.target.script()
    }

    fn master(&self) -> &ServerScope {
        self.target.master()
    }

    fn current(&self) -> &ServerScope {
        self.target.current()
    }

    fn target(&self) -> Option<&ServerScope> {
        Some(&self.target.target)
    }

    fn directory(&self) -> Option<&Directory> {
        Some(&self.directory)
    }
}
