//! Client side of the `rbakd` worker channel.
//!
//! A worker is started either as a local child or through a [`Shell`] connection
//! command, and then driven one request at a time over its stdin/stdout.

use anyhow::Context;

use crate::error::{ConnectionError, ExitStatus};
use crate::group::{Process, ProcessGroup};
use crate::logpipe::{self, LogPipe};
use crate::protocol::{Request, Response, WorkerConfig};
use crate::shell::Shell;
use crate::streams::{RecvStream, SendStream};

pub mod locate;
pub mod server;

/// Default name of the worker binary.
pub const WORKER_PROGRAM: &str = "rbakd";

/// Where to start a worker.
#[derive(Clone, Copy, Debug)]
pub enum Launch<'a> {
    Local,
    Remote { shell: &'a Shell, host: &'a str },
}

/// Full argv that starts `program` as a worker.
///
/// Remote workers are started as `connection command -- program args..`, with the
/// remote part escaped for the remote shell.
pub fn launch_command(
    launch: Launch<'_>,
    program: &str,
    config: &WorkerConfig,
) -> anyhow::Result<Vec<String>> {
    match launch {
        Launch::Local => {
            let binary = locate::find_local_binary(program)?;
            Ok(std::iter::once(binary.display().to_string())
                .chain(config.to_args())
                .collect())
        }
        Launch::Remote { shell, host } => {
            let remote: Vec<String> = std::iter::once(program.to_string())
                .chain(config.to_args())
                .collect();
            let mut argv = shell.connection_command(host, &[]);
            argv.push("--".to_string());
            argv.push(crate::shell_join(&remote));
            Ok(argv)
        }
    }
}

/// A connected worker.
#[derive(Debug)]
pub struct Worker {
    host: String,
    process: Process,
    requests: SendStream<tokio::process::ChildStdin>,
    responses: RecvStream<tokio::process::ChildStdout>,
    stderr: Option<LogPipe>,
    version: common::version::ProtocolVersion,
}

impl Worker {
    /// Spawn `argv` in `group` and wait for a compatible `ready` message.
    pub async fn connect(group: &ProcessGroup, host: &str, argv: &[String]) -> anyhow::Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ConnectionError::new(host, "empty worker command"))?;
        tracing::info!("starting worker for {}: {:?}", host, argv);
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        let mut process = group
            .spawn(&mut command)
            .map_err(|error| ConnectionError::new(host, format!("{error:#}")))?;
        let (Some(stdin), Some(stdout)) = (process.stdin.take(), process.stdout.take()) else {
            return Err(ConnectionError::new(host, "worker stdio is not piped").into());
        };
        let stderr = process
            .stderr
            .take()
            .map(|stderr| LogPipe::spawn(stderr, tracing::Level::ERROR));
        let mut responses = RecvStream::new(stdout);
        let handshake = responses.recv_object::<Response>().await;
        let version = match handshake {
            Ok(Some(Response::Ready { version })) => version,
            Ok(Some(other)) => {
                return Err(ConnectionError::new(host, format!("unexpected handshake {other:?}")).into());
            }
            Ok(None) => {
                let status = process.wait().await?;
                return Err(ConnectionError::new(
                    host,
                    format!("worker exited before the handshake ({status})"),
                )
                .into());
            }
            Err(error) => return Err(ConnectionError::new(host, format!("{error:#}")).into()),
        };
        let current = common::version::ProtocolVersion::current();
        if !current.is_compatible_with(&version) {
            return Err(ConnectionError::new(
                host,
                format!("worker version {version} is not compatible with {current}"),
            )
            .into());
        }
        tracing::debug!("worker for {} ready, version {}", host, version);
        Ok(Self {
            host: host.to_string(),
            process,
            requests: SendStream::new(stdin),
            responses,
            stderr,
            version,
        })
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn version(&self) -> &common::version::ProtocolVersion {
        &self.version
    }

    fn forward(&self, response: Response) -> Option<Response> {
        match response {
            Response::Output { level, line } => {
                logpipe::emit(level.into(), &line);
                None
            }
            Response::Log(message) => {
                crate::tracelog::emit(&self.host, &message);
                None
            }
            other => Some(other),
        }
    }

    async fn request(&mut self, request: &Request) -> anyhow::Result<Option<i32>> {
        tracing::debug!("{}: {:?}", self.host, request);
        self.requests
            .send_object(request)
            .await
            .map_err(|error| ConnectionError::new(&self.host, format!("{error:#}")))?;
        loop {
            let response = self
                .responses
                .recv_object::<Response>()
                .await
                .map_err(|error| ConnectionError::new(&self.host, format!("{error:#}")))?
                .ok_or_else(|| ConnectionError::new(&self.host, "worker closed the connection"))?;
            match self.forward(response) {
                None => {}
                Some(Response::Done {
                    status,
                    error: None,
                }) => return Ok(status),
                Some(Response::Done {
                    error: Some(error), ..
                }) => anyhow::bail!("worker on {} failed: {}", self.host, error),
                Some(other) => {
                    return Err(ConnectionError::new(
                        &self.host,
                        format!("unexpected message {other:?}"),
                    )
                    .into());
                }
            }
        }
    }

    /// Run `argv` on the worker's host; output is logged here as it arrives.
    pub async fn run_command(&mut self, argv: &[String]) -> anyhow::Result<ExitStatus> {
        let status = self
            .request(&Request::RunCommand {
                argv: argv.to_vec(),
            })
            .await?;
        Ok(status.into())
    }

    /// Upload `source` as an executable called `name` and run it with `args`.
    pub async fn run_script(
        &mut self,
        name: &str,
        source: &str,
        args: &[String],
    ) -> anyhow::Result<ExitStatus> {
        let status = self
            .request(&Request::RunScript {
                name: name.to_string(),
                source: source.to_string(),
                args: args.to_vec(),
            })
            .await?;
        Ok(status.into())
    }

    pub async fn mkdir_p(&mut self, path: &std::path::Path) -> anyhow::Result<()> {
        self.request(&Request::MkdirP {
            path: path.to_path_buf(),
        })
        .await
        .with_context(|| format!("mkdir -p {path:?} on {}", self.host))?;
        Ok(())
    }

    pub async fn set_working_dir(&mut self, path: &std::path::Path) -> anyhow::Result<()> {
        self.request(&Request::SetWorkingDir {
            path: path.to_path_buf(),
        })
        .await
        .with_context(|| format!("changing directory to {path:?} on {}", self.host))?;
        Ok(())
    }

    /// Undo [`Worker::set_working_dir`], later commands run where the worker started.
    pub async fn reset_working_dir(&mut self) -> anyhow::Result<()> {
        self.request(&Request::ResetWorkingDir)
            .await
            .with_context(|| format!("resetting the working directory on {}", self.host))?;
        Ok(())
    }

    /// Close the channel and wait for the worker to exit.
    pub async fn close(self) -> anyhow::Result<()> {
        let Self {
            host,
            mut process,
            mut requests,
            mut responses,
            stderr,
            ..
        } = self;
        requests.close().await?;
        drop(requests);
        // late log records still get reported
        while let Some(response) = responses.recv_object::<Response>().await? {
            if let Response::Log(message) = response {
                crate::tracelog::emit(&host, &message);
            }
        }
        let status = process.wait().await?;
        if let Some(stderr) = stderr {
            stderr.close().await?;
        }
        if !status.success() {
            return Err(ConnectionError::new(host, format!("worker exited with {status}")).into());
        }
        tracing::debug!("worker for {} finished", host);
        Ok(())
    }
}
