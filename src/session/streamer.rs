use crate::session::registry::{ProcessRecord, ProcessRegistry};
use crate::utils::log_sink::{LogLevel, LogSink};
use futures::stream::{self, Stream};
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const LINE_CHANNEL_CAPACITY: usize = 256;

/// Exit code reported when the process was killed by a signal (negated signal
/// number) or its status could not be collected (-1).
pub fn exit_code_of(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    Output(String),
    Completed { exit_code: i32 },
}

impl StreamLine {
    pub fn is_trailer(&self) -> bool {
        matches!(self, StreamLine::Completed { .. })
    }

    /// Body chunk for chunked `text/plain` responses.
    pub fn to_chunk(&self) -> String {
        match self {
            StreamLine::Output(line) => format!("{}\n", line),
            StreamLine::Completed { .. } => format!("\n{}\n", self),
        }
    }
}

impl fmt::Display for StreamLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamLine::Output(line) => f.write_str(line),
            StreamLine::Completed { exit_code } => {
                write!(f, "[Process completed with exit code: {}]", exit_code)
            }
        }
    }
}

fn decode_line(buf: &mut Vec<u8>) -> String {
    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
        buf.pop();
    }
    String::from_utf8_lossy(buf).into_owned()
}

/// Copies `pipe` into `tx` one line at a time with terminators stripped.
/// Keeps draining after the receiver is gone so the child never blocks on a full pipe.
async fn pump_lines<R>(pipe: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut receiver_open = true;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if receiver_open && tx.send(decode_line(&mut buf)).await.is_err() {
                    receiver_open = false;
                }
            }
            Err(e) => {
                warn!(error = %e, "Error reading process output");
                break;
            }
        }
    }
}

#[cfg(not(unix))]
fn pump_lines_blocking(pipe: std::io::PipeReader, tx: mpsc::Sender<String>) {
    use std::io::BufRead;

    let mut reader = std::io::BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut receiver_open = true;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if receiver_open && tx.blocking_send(decode_line(&mut buf)).is_err() {
                    receiver_open = false;
                }
            }
            Err(e) => {
                warn!(error = %e, "Error reading process output");
                break;
            }
        }
    }
}

/// Read end of the single pipe a child writes both stdout and stderr into,
/// so lines arrive in the order the process wrote them.
#[derive(Debug)]
pub(super) struct MergedOutput {
    #[cfg(unix)]
    reader: tokio::net::unix::pipe::Receiver,
    #[cfg(not(unix))]
    reader: std::io::PipeReader,
}

impl MergedOutput {
    /// Returns the read end plus the child's stdout and stderr handles.
    /// The `Command` holding those handles must be dropped right after spawn,
    /// otherwise the pipe never reaches EOF.
    pub(super) fn open() -> io::Result<(Self, Stdio, Stdio)> {
        let (reader, writer) = std::io::pipe()?;
        let stderr = Stdio::from(writer.try_clone()?);
        #[cfg(unix)]
        let reader = tokio::net::unix::pipe::Receiver::from_owned_fd(reader.into())?;
        Ok((Self { reader }, Stdio::from(writer), stderr))
    }

    fn pump(self, tx: mpsc::Sender<String>) {
        #[cfg(unix)]
        tokio::spawn(pump_lines(self.reader, tx));
        #[cfg(not(unix))]
        tokio::task::spawn_blocking(move || pump_lines_blocking(self.reader, tx));
    }
}

/// Lazy, forward-only sequence of a session's merged output lines,
/// ending with exactly one [`StreamLine::Completed`] trailer.
///
/// Reaching the trailer deregisters the session. Dropping the streamer early
/// leaves the process running and registered.
#[derive(Debug)]
pub struct OutputStreamer {
    pid: u32,
    seq: u64,
    command: String,
    child: Option<Child>,
    lines: mpsc::Receiver<String>,
    registry: ProcessRegistry,
    log: LogSink,
    finished: bool,
}

impl OutputStreamer {
    /// Starts pumping the session's merged output.
    pub(super) fn attach(
        record: &ProcessRecord,
        child: Child,
        output: MergedOutput,
        registry: ProcessRegistry,
        log: LogSink,
    ) -> Self {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        output.pump(tx);

        Self {
            pid: record.id,
            seq: record.seq,
            command: record.command_line.clone(),
            child: Some(child),
            lines: rx,
            registry,
            log,
            finished: false,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Next output line, then the trailer, then `None` forever.
    pub async fn next_line(&mut self) -> Option<StreamLine> {
        if self.finished {
            return None;
        }
        if let Some(line) = self.lines.recv().await {
            return Some(StreamLine::Output(line));
        }

        // The pipe hit EOF; collect the exit status without holding any shared lock.
        let exit_code = match self.child.take() {
            Some(mut child) => match child.wait().await {
                Ok(status) => exit_code_of(&status),
                Err(e) => {
                    warn!(pid = self.pid, error = %e, "Failed to wait for process");
                    -1
                }
            },
            None => -1,
        };
        self.finished = true;

        if self.registry.remove(self.pid, self.seq).is_some() {
            debug!(pid = self.pid, "Deregistered drained session");
        }
        info!(pid = self.pid, command = %self.command, exit_code, "Command finished");
        self.log.append(
            LogLevel::Process,
            format!(
                "Process {} completed with exit code {}: {}",
                self.pid, exit_code, self.command
            ),
        );
        Some(StreamLine::Completed { exit_code })
    }

    /// Drains everything, returning the output lines and the exit code.
    #[cfg(test)]
    pub async fn collect(mut self) -> (Vec<String>, i32) {
        let mut lines = Vec::new();
        let mut exit_code = -1;
        while let Some(item) = self.next_line().await {
            match item {
                StreamLine::Output(line) => lines.push(line),
                StreamLine::Completed { exit_code: code } => exit_code = code,
            }
        }
        (lines, exit_code)
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamLine> + Send + 'static {
        stream::unfold(self, |mut streamer| async move {
            streamer.next_line().await.map(|line| (line, streamer))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailer_text_matches_wire_format() {
        let trailer = StreamLine::Completed { exit_code: 0 };
        assert_eq!(trailer.to_string(), "[Process completed with exit code: 0]");
        assert_eq!(trailer.to_chunk(), "\n[Process completed with exit code: 0]\n");
        assert!(trailer.is_trailer());
        assert_eq!(StreamLine::Output("hi".into()).to_chunk(), "hi\n");
    }

    #[tokio::test]
    async fn pump_strips_terminators_and_keeps_order() {
        let input: &[u8] = b"one\r\ntwo\nthree";
        let (tx, mut rx) = mpsc::channel(8);
        pump_lines(input, tx).await;
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn pump_survives_a_dropped_receiver() {
        let input: &[u8] = b"a\nb\nc\n";
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        pump_lines(input, tx).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn merged_pipe_keeps_write_order_across_streams() {
        let (output, stdout, stderr) = MergedOutput::open().unwrap();
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg("echo a; echo b 1>&2; echo c; echo d 1>&2")
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        let mut child = cmd.spawn().unwrap();
        drop(cmd);

        let (tx, mut rx) = mpsc::channel(8);
        output.pump(tx);
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert_eq!(lines, vec!["a", "b", "c", "d"]);
        assert!(child.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn pump_replaces_invalid_utf8() {
        let input: &[u8] = b"ok\xff\n";
        let (tx, mut rx) = mpsc::channel(8);
        pump_lines(input, tx).await;
        assert_eq!(rx.recv().await.unwrap(), "ok\u{FFFD}");
    }
}
