//! The request loop run by `rbakd`.

use anyhow::{Context, anyhow};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use common::remote_tracing::TracingMessage;

use crate::group::ProcessGroup;
use crate::logpipe::LogPipe;
use crate::protocol::{OutputLevel, Request, Response};
use crate::streams::{RecvStream, SendStream};

type Responder = tokio::sync::mpsc::UnboundedSender<Response>;

/// Private scratch directory, removed when dropped.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create `<tmp>/rbakd-<pid>` with mode 0700.
    ///
    /// Later sessions in the same process get a `.<n>` suffix.
    pub fn create() -> anyhow::Result<Self> {
        static SESSIONS: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);
        let session = SESSIONS.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let name = match session {
            0 => format!("rbakd-{}", std::process::id()),
            n => format!("rbakd-{}.{}", std::process::id(), n),
        };
        let path = std::env::temp_dir().join(name);
        std::fs::DirBuilder::new()
            .mode(0o700)
            .create(&path)
            .with_context(|| format!("failed to create scratch directory {path:?}"))?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_dir_all(&self.path) {
            eprintln!("failed to remove {:?}: {}", self.path, error);
        }
    }
}

fn valid_script_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

struct Session {
    group: ProcessGroup,
    scratch: ScratchDir,
    start_dir: PathBuf,
    working_dir: PathBuf,
    responder: Responder,
}

impl Session {
    fn resolve(&self, path: &Path) -> PathBuf {
        self.working_dir.join(path)
    }

    fn respond(&self, response: Response) -> anyhow::Result<()> {
        self.responder
            .send(response)
            .map_err(|_| anyhow!("response channel closed"))
    }

    fn output_pipe<R>(&self, reader: Option<R>, level: OutputLevel) -> Option<LogPipe>
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let responder = self.responder.clone();
        reader.map(|reader| {
            LogPipe::with_sink(reader, move |line| {
                let _ = responder.send(Response::Output {
                    level,
                    line: line.to_string(),
                });
            })
        })
    }

    async fn run(&self, argv: &[String]) -> anyhow::Result<Option<i32>> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("empty command"))?;
        tracing::info!("running {:?} in {:?}", argv, self.working_dir);
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        let mut process = self.group.spawn(&mut command)?;
        let stdout = self.output_pipe(process.stdout.take(), OutputLevel::Info);
        let stderr = self.output_pipe(process.stderr.take(), OutputLevel::Error);
        let status = process.wait().await;
        for pipe in [stdout, stderr].into_iter().flatten() {
            pipe.close().await?;
        }
        Ok(status?.code())
    }

    async fn install_script(&self, name: &str, source: &str) -> anyhow::Result<PathBuf> {
        if !valid_script_name(name) {
            anyhow::bail!("invalid script name {:?}", name);
        }
        let path = self.scratch.path().join(name);
        tokio::fs::write(&path, source)
            .await
            .with_context(|| format!("failed writing script {path:?}"))?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .await
            .with_context(|| format!("failed making {path:?} executable"))?;
        Ok(path)
    }

    async fn handle(&mut self, request: Request) -> anyhow::Result<Option<i32>> {
        match request {
            Request::RunCommand { argv } => self.run(&argv).await,
            Request::RunScript { name, source, args } => {
                let path = self.install_script(&name, &source).await?;
                let argv: Vec<String> = std::iter::once(path.display().to_string())
                    .chain(args)
                    .collect();
                self.run(&argv).await
            }
            Request::MkdirP { path } => {
                let path = self.resolve(&path);
                tokio::fs::create_dir_all(&path)
                    .await
                    .with_context(|| format!("failed creating {path:?}"))?;
                Ok(Some(0))
            }
            Request::SetWorkingDir { path } => {
                let path = self.resolve(&path);
                let metadata = tokio::fs::metadata(&path)
                    .await
                    .with_context(|| format!("cannot change directory to {path:?}"))?;
                if !metadata.is_dir() {
                    anyhow::bail!("{:?} is not a directory", path);
                }
                tracing::debug!("working directory is now {:?}", path);
                self.working_dir = path;
                Ok(Some(0))
            }
            Request::ResetWorkingDir => {
                self.working_dir.clone_from(&self.start_dir);
                Ok(Some(0))
            }
        }
    }
}

async fn write_responses<W>(
    output: W,
    mut responses: tokio::sync::mpsc::UnboundedReceiver<Response>,
    mut logs: tokio::sync::mpsc::UnboundedReceiver<TracingMessage>,
) -> anyhow::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    // no tracing in here, our own events would come back through `logs`
    let mut stream = SendStream::new(output);
    loop {
        tokio::select! {
            biased;
            response = responses.recv() => match response {
                Some(response) => stream.send_object(&response).await?,
                None => break,
            },
            Some(message) = logs.recv() => stream.send_object(&Response::Log(message)).await?,
        }
    }
    while let Ok(message) = logs.try_recv() {
        stream.send_object(&Response::Log(message)).await?;
    }
    stream.close().await
}

/// Serve requests from `input` until it is closed.
///
/// Announces itself with `ready`, then answers each request with its output and a
/// final `done`. Events of the worker's own log arrive on `logs` and are interleaved
/// as `log` records. The scratch directory is removed on return, also on error.
pub async fn serve<R, W>(
    group: ProcessGroup,
    input: R,
    output: W,
    logs: tokio::sync::mpsc::UnboundedReceiver<TracingMessage>,
) -> anyhow::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let scratch = ScratchDir::create()?;
    let working_dir = std::env::current_dir().context("failed to read the working directory")?;
    let (responder, responses) = tokio::sync::mpsc::unbounded_channel();
    let writer = tokio::spawn(write_responses(output, responses, logs));
    let mut session = Session {
        group,
        scratch,
        start_dir: working_dir.clone(),
        working_dir,
        responder,
    };
    session.respond(Response::Ready {
        version: common::version::ProtocolVersion::current(),
    })?;
    let mut requests = RecvStream::new(input);
    let result = async {
        while let Some(request) = requests.recv_object::<Request>().await? {
            let response = match session.handle(request).await {
                Ok(status) => Response::done(status),
                Err(error) => {
                    tracing::error!("{:#}", &error);
                    Response::failed(&error)
                }
            };
            session.respond(response)?;
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;
    drop(session);
    let written = writer.await?;
    result.and(written)
}

/// [`serve`] over this process's stdin and stdout.
pub async fn serve_stdio(
    logs: tokio::sync::mpsc::UnboundedReceiver<TracingMessage>,
) -> anyhow::Result<()> {
    ProcessGroup::wait(|group| serve(group, tokio::io::stdin(), tokio::io::stdout(), logs)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Client {
        requests: SendStream<tokio::io::WriteHalf<tokio::io::DuplexStream>>,
        responses: RecvStream<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
    }

    impl Client {
        async fn call(&mut self, request: Request) -> anyhow::Result<(Vec<String>, Response)> {
            self.requests.send_object(&request).await?;
            let mut output = vec![];
            loop {
                match self.responses.recv_object::<Response>().await? {
                    Some(Response::Output { line, .. }) => output.push(line),
                    Some(Response::Log(_)) => {}
                    Some(done) => return Ok((output, done)),
                    None => anyhow::bail!("worker went away"),
                }
            }
        }
    }

    fn start(
        logs: tokio::sync::mpsc::UnboundedReceiver<TracingMessage>,
    ) -> (Client, tokio::task::JoinHandle<anyhow::Result<()>>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, client_write) = tokio::io::split(client);
        let handle = tokio::spawn(serve(ProcessGroup::new(), server_read, server_write, logs));
        (
            Client {
                requests: SendStream::new(client_write),
                responses: RecvStream::new(client_read),
            },
            handle,
        )
    }

    #[tokio::test]
    async fn full_session() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let (_log_sender, logs) = tokio::sync::mpsc::unbounded_channel();
        let (mut client, handle) = start(logs);
        match client.responses.recv_object::<Response>().await? {
            Some(Response::Ready { version }) => {
                assert!(version.is_compatible_with(&common::version::ProtocolVersion::current()));
            }
            other => panic!("unexpected handshake {other:?}"),
        }
        let (_, done) = client
            .call(Request::SetWorkingDir {
                path: tmp.path().to_path_buf(),
            })
            .await?;
        assert_eq!(done, Response::done(Some(0)));
        let (_, done) = client
            .call(Request::MkdirP {
                path: "latest.snapshot/home/".into(),
            })
            .await?;
        assert_eq!(done, Response::done(Some(0)));
        assert!(tmp.path().join("latest.snapshot/home").is_dir());
        let (output, done) = client
            .call(Request::RunCommand {
                argv: vec!["sh".into(), "-c".into(), "pwd; echo oops >&2; exit 24".into()],
            })
            .await?;
        assert_eq!(done, Response::done(Some(24)));
        assert!(output.contains(&"oops".to_string()));
        assert!(output.iter().any(|line| line.ends_with(
            tmp.path()
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
        )));
        let (output, done) = client
            .call(Request::RunScript {
                name: "hook".into(),
                source: "#!/bin/sh\necho \"args: $*\"\n".into(),
                args: vec!["a".into(), "b c".into()],
            })
            .await?;
        assert_eq!(done, Response::done(Some(0)));
        assert_eq!(output, vec!["args: a b c"]);
        let (_, done) = client.call(Request::ResetWorkingDir).await?;
        assert_eq!(done, Response::done(Some(0)));
        let (output, _) = client
            .call(Request::RunCommand {
                argv: vec!["pwd".into(), "-P".into()],
            })
            .await?;
        assert_eq!(
            output,
            vec![std::env::current_dir()?.canonicalize()?.display().to_string()]
        );
        drop(client);
        handle.await??;
        Ok(())
    }

    #[tokio::test]
    async fn failures_are_reported_in_done() -> anyhow::Result<()> {
        let (_log_sender, logs) = tokio::sync::mpsc::unbounded_channel();
        let (mut client, handle) = start(logs);
        let _ready = client.responses.recv_object::<Response>().await?;
        let (_, done) = client
            .call(Request::SetWorkingDir {
                path: "/nonexistent/rbak".into(),
            })
            .await?;
        assert!(matches!(done, Response::Done { error: Some(_), .. }));
        let (_, done) = client
            .call(Request::RunScript {
                name: "../escape".into(),
                source: String::new(),
                args: vec![],
            })
            .await?;
        match done {
            Response::Done {
                error: Some(error), ..
            } => assert!(error.contains("invalid script name")),
            other => panic!("unexpected {other:?}"),
        }
        drop(client);
        handle.await??;
        Ok(())
    }

    #[tokio::test]
    async fn forwarded_logs_are_interleaved() -> anyhow::Result<()> {
        let (log_sender, logs) = tokio::sync::mpsc::unbounded_channel();
        let (mut client, handle) = start(logs);
        let _ready = client.responses.recv_object::<Response>().await?;
        let message = TracingMessage {
            timestamp: std::time::SystemTime::now(),
            level: "INFO".to_string(),
            target: "rbakd".to_string(),
            message: "hello from the worker".to_string(),
        };
        log_sender.send(message.clone())?;
        assert_eq!(
            client.responses.recv_object::<Response>().await?,
            Some(Response::Log(message))
        );
        drop(client);
        handle.await??;
        Ok(())
    }

    #[test]
    fn scratch_dir_is_private_and_removed() -> anyhow::Result<()> {
        let scratch = ScratchDir::create()?;
        let path = scratch.path().to_path_buf();
        let mode = std::fs::metadata(&path)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        drop(scratch);
        assert!(!path.exists());
        Ok(())
    }
}
