//! Daemon readiness detection.

use bollard::container::LogOutput;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{NodeClientError, Result};

/// Line the IPFS daemon prints once it is serving requests. Matched as a
/// substring of each log line, as the daemon's own final startup line.
pub(crate) const READY_MARKER: &str = "Daemon is ready";

/// Scans a container log stream until the readiness marker appears.
///
/// Succeeds iff the marker is observed before cancellation. Stream errors
/// are surfaced; a stream that ends without the marker is an error, not a
/// silent success.
pub(crate) async fn wait_for_ready<S>(
    container_id: &str,
    mut logs: S,
    token: &CancellationToken,
) -> Result<()>
where
    S: Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>> + Unpin,
{
    let mut buf = String::new();

    loop {
        let chunk = tokio::select! {
            _ = token.cancelled() => {
                return Err(NodeClientError::Cancelled(container_id.to_string()));
            }
            chunk = logs.next() => chunk,
        };

        match chunk {
            Some(Ok(output)) => {
                append_output(&mut buf, &output);
                while let Some(pos) = buf.find('\n') {
                    let line: String = buf.drain(..=pos).collect();
                    if line.contains(READY_MARKER) {
                        return Ok(());
                    }
                }
            }
            Some(Err(e)) => return Err(e.into()),
            // A final unterminated line can still carry the marker.
            None if buf.contains(READY_MARKER) => return Ok(()),
            None => return Err(NodeClientError::StreamEnded(container_id.to_string())),
        }
    }
}

fn append_output(buf: &mut String, output: &LogOutput) {
    // The node runs with a tty, so output usually arrives as Console
    // frames; StdOut covers non-tty daemons.
    match output {
        LogOutput::StdOut { message } | LogOutput::Console { message } => {
            buf.push_str(&String::from_utf8_lossy(message));
        }
        _ => {}
    }
}
