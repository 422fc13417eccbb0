use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Clone, Copy, Debug)]
pub(crate) enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn label(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// Keep draining a worker pipe after the handshake
///
/// The worker would block on a full pipe otherwise. Lines are logged when
/// `log` is set and discarded when it is not. The task ends at EOF.
pub(crate) fn forward<R>(stream: Stream, reader: R, pid: u32, log: bool)
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut segments = reader.split(b'\n');
        loop {
            match segments.next_segment().await {
                Ok(Some(bytes)) => {
                    if !log {
                        continue;
                    }
                    let line = String::from_utf8_lossy(&bytes);
                    let line = line.trim_end();
                    match stream {
                        Stream::Stdout => tracing::debug!(pid, stream = stream.label(), "{}", line),
                        Stream::Stderr => tracing::warn!(pid, stream = stream.label(), "{}", line),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(
                        pid,
                        stream = stream.label(),
                        error = %e,
                        "Stopped reading worker output"
                    );
                    break;
                }
            }
        }
    });
}
