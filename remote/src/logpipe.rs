use tokio::io::AsyncBufReadExt;

/// Emit `line` at a level chosen at runtime.
pub fn emit(level: tracing::Level, line: &str) {
    match level {
        tracing::Level::ERROR => tracing::error!("{}", line),
        tracing::Level::WARN => tracing::warn!("{}", line),
        tracing::Level::INFO => tracing::info!("{}", line),
        tracing::Level::DEBUG => tracing::debug!("{}", line),
        tracing::Level::TRACE => tracing::trace!("{}", line),
    }
}

/// Background task draining a child's output line by line.
#[derive(Debug)]
pub struct LogPipe {
    handle: tokio::task::JoinHandle<anyhow::Result<usize>>,
}

impl LogPipe {
    /// Forward every line of `reader` to the log at `level`.
    pub fn spawn<R>(reader: R, level: tracing::Level) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        Self::with_sink(reader, move |line| emit(level, line))
    }

    /// Hand every line of `reader` (without its terminator) to `sink`.
    ///
    /// Output that is not valid UTF-8 is converted lossily.
    pub fn with_sink<R, F>(reader: R, mut sink: F) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        F: FnMut(&str) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut reader = tokio::io::BufReader::new(reader);
            let mut buffer = Vec::new();
            let mut lines = 0;
            loop {
                buffer.clear();
                if reader.read_until(b'\n', &mut buffer).await? == 0 {
                    break;
                }
                let line = String::from_utf8_lossy(&buffer);
                sink(line.trim_end_matches(['\n', '\r']));
                lines += 1;
            }
            Ok(lines)
        });
        Self { handle }
    }

    /// Wait for the writer side to close; returns the number of lines seen.
    pub async fn close(self) -> anyhow::Result<usize> {
        self.handle.await?
    }
}
