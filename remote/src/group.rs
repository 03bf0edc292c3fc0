//! Every child process of a run belongs to one [`ProcessGroup`], which guarantees
//! that no child outlives the run, whatever the outcome of the work that spawned it.

use anyhow::{Context, anyhow};

use crate::error::ExitStatus;

/// Argv of a tokio command, for logs and error messages.
#[must_use]
pub fn describe(command: &tokio::process::Command) -> Vec<String> {
    let command = command.as_std();
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

/// A spawned child. The stdio handles are whatever the command asked to be piped.
#[derive(Debug)]
pub struct Process {
    pub stdin: Option<tokio::process::ChildStdin>,
    pub stdout: Option<tokio::process::ChildStdout>,
    pub stderr: Option<tokio::process::ChildStderr>,
    pub id: Option<u32>,
    pub command: Vec<String>,
    completion: Option<tokio::sync::oneshot::Receiver<std::io::Result<std::process::ExitStatus>>>,
}

impl Process {
    /// Wait for the child to exit. Closes our end of its stdin first.
    pub async fn wait(&mut self) -> anyhow::Result<ExitStatus> {
        drop(self.stdin.take());
        let completion = self
            .completion
            .take()
            .ok_or_else(|| anyhow!("process {:?} was already waited for", self.command))?;
        let status = completion
            .await
            .with_context(|| format!("lost track of process {:?}", self.command))?
            .with_context(|| format!("failed waiting for process {:?}", self.command))?;
        tracing::debug!("process {:?} ({:?}) exited: {:?}", self.command, self.id, status);
        Ok(status.into())
    }
}

/// Cloneable handle on the set of children spawned during one run.
#[derive(Clone, Debug, Default)]
pub struct ProcessGroup {
    tracker: tokio_util::task::TaskTracker,
}

impl ProcessGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of children still being reaped.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    pub fn spawn(&self, command: &mut tokio::process::Command) -> anyhow::Result<Process> {
        let argv = describe(command);
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {argv:?}"))?;
        let id = child.id();
        tracing::debug!("spawned {:?} as pid {:?}", argv, id);
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (sender, receiver) = tokio::sync::oneshot::channel();
        self.tracker.spawn(async move {
            let status = child.wait().await;
            // nobody waiting on the outcome is fine, the child is reaped either way
            let _ = sender.send(status);
        });
        Ok(Process {
            stdin,
            stdout,
            stderr,
            id,
            command: argv,
            completion: Some(receiver),
        })
    }

    /// Spawn `command` and hand its final status to `callback` once it exits.
    pub fn run<F>(&self, command: &mut tokio::process::Command, callback: F) -> anyhow::Result<()>
    where
        F: FnOnce(anyhow::Result<ExitStatus>) + Send + 'static,
    {
        let mut process = self.spawn(command)?;
        self.tracker.spawn(async move {
            callback(process.wait().await);
        });
        Ok(())
    }

    /// Run `block` with a fresh group, then reap every child it spawned.
    ///
    /// Children are awaited even when `block` fails; its result is returned afterwards.
    pub async fn wait<F, Fut, T>(block: F) -> anyhow::Result<T>
    where
        F: FnOnce(ProcessGroup) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let group = Self::new();
        let result = block(group.clone()).await;
        if !group.is_empty() {
            tracing::debug!("waiting for {} child process(es)", group.len());
        }
        group.tracker.close();
        group.tracker.wait().await;
        result
    }
}
