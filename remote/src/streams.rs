use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};

/// Upper bound on one message; a longer line means the peer is not speaking our protocol.
const MAX_MESSAGE_LENGTH: usize = 16 * 1024 * 1024;

/// Framed send stream for newline-delimited JSON messages.
///
/// Generic over the underlying writer - a child's stdin, our own stdout or any AsyncWrite.
#[derive(Debug)]
pub struct SendStream<W> {
    framed: tokio_util::codec::FramedWrite<W, tokio_util::codec::LinesCodec>,
}

impl<W: AsyncWrite + Unpin> SendStream<W> {
    pub fn new(stream: W) -> Self {
        let framed = tokio_util::codec::FramedWrite::new(
            stream,
            tokio_util::codec::LinesCodec::new_with_max_length(MAX_MESSAGE_LENGTH),
        );
        Self { framed }
    }

    /// Serialize `obj` and flush it to the peer.
    pub async fn send_object<T: serde::Serialize>(&mut self, obj: &T) -> anyhow::Result<()> {
        let line = serde_json::to_string(obj)?;
        self.framed.send(line).await?;
        Ok(())
    }

    pub async fn close(&mut self) -> anyhow::Result<()> {
        SinkExt::<String>::close(&mut self.framed).await?;
        Ok(())
    }
}

/// Framed receive stream for newline-delimited JSON messages.
#[derive(Debug)]
pub struct RecvStream<R> {
    framed: tokio_util::codec::FramedRead<R, tokio_util::codec::LinesCodec>,
}

impl<R: AsyncRead + Unpin> RecvStream<R> {
    pub fn new(stream: R) -> Self {
        let framed = tokio_util::codec::FramedRead::new(
            stream,
            tokio_util::codec::LinesCodec::new_with_max_length(MAX_MESSAGE_LENGTH),
        );
        Self { framed }
    }

    /// Next message, `None` once the peer closed the stream. Blank lines are skipped.
    pub async fn recv_object<T: serde::de::DeserializeOwned>(
        &mut self,
    ) -> anyhow::Result<Option<T>> {
        while let Some(line) = self.framed.next().await {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let obj = serde_json::from_str(&line)
                .map_err(|error| anyhow::anyhow!("malformed message {:?}: {}", line, error))?;
            return Ok(Some(obj));
        }
        Ok(None)
    }
}
