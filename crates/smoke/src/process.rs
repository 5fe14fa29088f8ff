//! Child process plumbing shared by the server and the browser driver

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Line reader over raw child output.
///
/// Bytes that are not valid UTF-8 are replaced rather than rejected, so a
/// stray Latin-1 log line never stops the reader. Partial lines survive a
/// cancelled `next_line`, which makes it safe inside `tokio::select!`.
pub struct OutputLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R> OutputLines<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Next line without its terminator, or `None` at end of stream
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        let mut end = self.buf.len();
        if self.buf[..end].ends_with(b"\n") {
            end -= 1;
        }
        if self.buf[..end].ends_with(b"\r") {
            end -= 1;
        }

        let line = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf.clear();
        Ok(Some(line))
    }
}

/// Drain `lines` into debug logs until the stream ends.
///
/// The read end stays open for the child's whole life; dropping it early
/// would hand the child EPIPE on its next write.
pub fn forward_output<R>(mut lines: OutputLines<R>, stream: &'static str) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(stream, "{}", line),
                Ok(None) => break,
                Err(e) => {
                    warn!(stream, "Stopped reading child output: {}", e);
                    break;
                }
            }
        }
    })
}

/// Send `signal` to the process group led by `pid`
#[cfg(unix)]
pub fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> nix::Result<()> {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    killpg(Pid::from_raw(pid as i32), signal)
}

/// SIGKILL the child's group (unix) and the child itself; errors are ignored
pub fn kill_now(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let _ = signal_group(pid, nix::sys::signal::Signal::SIGKILL);
        }
    }
    let _ = child.start_kill();
}

/// Kills a process group when dropped unless disarmed.
///
/// Covers an `async` start that is cancelled between spawn and hand-over:
/// `kill_on_drop` only reaches the group leader, not what it forked.
pub struct GroupKillGuard {
    pid: Option<u32>,
}

impl GroupKillGuard {
    pub fn new(child: &Child) -> Self {
        Self { pid: child.id() }
    }

    pub fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for GroupKillGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid.take() {
                debug!("Killing abandoned process group {}", pid);
                let _ = signal_group(pid, nix::sys::signal::Signal::SIGKILL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced_not_fatal() {
        let (mut tx, rx) = tokio::io::duplex(256);
        tx.write_all(b"caf\xe9\r\nnext\n").await.unwrap();
        drop(tx);

        let mut lines = OutputLines::new(BufReader::new(rx));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("caf\u{fffd}"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("next"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unterminated_last_line_is_returned() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tx.write_all(b"no newline").await.unwrap();
        drop(tx);

        let mut lines = OutputLines::new(BufReader::new(rx));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("no newline"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_partial_line_survives_cancellation() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut lines = OutputLines::new(BufReader::new(rx));

        tx.write_all(b"listening on ").await.unwrap();
        let first = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            lines.next_line(),
        )
        .await;
        assert!(first.is_err(), "line is not complete yet");

        tx.write_all(b"http://127.0.0.1:8080\n").await.unwrap();
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("listening on http://127.0.0.1:8080")
        );
    }

    #[tokio::test]
    async fn test_forwarder_keeps_draining_after_bad_bytes() {
        let (mut tx, rx) = tokio::io::duplex(16);
        let task = forward_output(OutputLines::new(BufReader::new(rx)), "stdout");

        tx.write_all(b"caf\xe9\n").await.unwrap();
        // More than the pipe holds: only completes if the forwarder still reads
        for _ in 0..32 {
            tx.write_all(b"GET / 200\n").await.unwrap();
        }
        drop(tx);

        task.await.unwrap();
    }
}
