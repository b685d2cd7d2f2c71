//! Pull channel: line stream from the serial monitor subprocess.
//!
//! Reading happens on two dedicated threads so that a slow or stalled monitor
//! can never delay the UI: one thread performs the blocking reads, the other
//! batches lines and hands them to the queue. The batcher flushes when
//! `batch_max_lines` lines are buffered, when a line arrives at least
//! `batch_interval` after the previous flush, or when the buffer has been idle
//! for `batch_interval`.
//!
//! End-of-file alone does not end the stream: the monitor may close its output
//! and keep running. The stream ends once the process has also exited.

use crate::error::TerminalError;
use crate::line::{Channel, LogLine};
use crate::queue::BoundedLineQueue;
use crate::state::{ChannelState, ConnectionState};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::io::{self, BufRead, BufReader, Read};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often an idle batcher re-checks the running flag.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Batching policy, kept free of I/O and clocks so it can be driven directly.
#[derive(Debug)]
pub struct LineBatcher {
    lines: Vec<String>,
    last_flush: Instant,
    interval: Duration,
    max_lines: usize,
}

impl LineBatcher {
    pub fn new(interval: Duration, max_lines: usize, now: Instant) -> Self {
        Self {
            lines: Vec::with_capacity(max_lines),
            last_flush: now,
            interval,
            max_lines: max_lines.max(1),
        }
    }

    /// Buffer `line` and return a batch if either threshold is reached.
    pub fn push(&mut self, line: String, now: Instant) -> Option<Vec<String>> {
        self.lines.push(line);
        if self.lines.len() >= self.max_lines
            || now.saturating_duration_since(self.last_flush) >= self.interval
        {
            return Some(self.flush(now));
        }
        None
    }

    /// Flush a non-empty buffer whose interval has elapsed without new input.
    pub fn poll(&mut self, now: Instant) -> Option<Vec<String>> {
        match self.deadline() {
            Some(deadline) if now >= deadline => Some(self.flush(now)),
            _ => None,
        }
    }

    /// When [`LineBatcher::poll`] will next flush, if anything is buffered.
    pub fn deadline(&self) -> Option<Instant> {
        (!self.lines.is_empty()).then(|| self.last_flush + self.interval)
    }

    /// Take whatever is left, regardless of thresholds.
    pub fn take(&mut self) -> Option<Vec<String>> {
        (!self.lines.is_empty()).then(|| std::mem::take(&mut self.lines))
    }

    fn flush(&mut self, now: Instant) -> Vec<String> {
        self.last_flush = now;
        std::mem::replace(&mut self.lines, Vec::with_capacity(self.max_lines))
    }
}

enum ReadEvent {
    Line(String),
    End,
    Failed(io::Error),
}

/// Threads servicing one attached stream.
#[derive(Debug)]
pub struct StreamHandle {
    reader: JoinHandle<()>,
    batcher: JoinHandle<()>,
}

impl StreamHandle {
    pub fn is_finished(&self) -> bool {
        self.reader.is_finished() && self.batcher.is_finished()
    }

    /// Block until both threads exit. Only returns once the stream has ended
    /// (end-of-file and process exit), failed, or the running flag is cleared.
    pub fn join(self) {
        let _ = self.reader.join();
        let _ = self.batcher.join();
    }
}

#[derive(Debug, Clone)]
pub struct ProcessStreamSource {
    queue: Arc<BoundedLineQueue>,
    state: Arc<ChannelState>,
    banner_prefix: String,
    batch_interval: Duration,
    batch_max_lines: usize,
    running: CancellationToken,
}

impl ProcessStreamSource {
    pub fn new(
        queue: Arc<BoundedLineQueue>,
        state: Arc<ChannelState>,
        banner_prefix: impl Into<String>,
        batch_interval: Duration,
        batch_max_lines: usize,
        running: CancellationToken,
    ) -> Self {
        Self {
            queue,
            state,
            banner_prefix: banner_prefix.into(),
            batch_interval,
            batch_max_lines,
            running,
        }
    }

    /// Spawn the monitor and start reading its merged stdout/stderr.
    ///
    /// Progress and failures are reported on the pull queue as well as
    /// returned, so callers only need to keep the handles.
    pub fn start(
        &self,
        program: &str,
        args: &[String],
    ) -> Result<(MonitorProcess, StreamHandle), TerminalError> {
        self.state.advance(ConnectionState::Connecting);
        self.queue
            .push(LogLine::status(Channel::Pull, "Starting serial monitor..."));

        let result = MonitorProcess::spawn(program, args).and_then(|(process, output)| {
            // Connected must be recorded before the reader can observe EOF.
            self.state.advance(ConnectionState::Connected);
            let child = process.child.clone();
            match self.attach(output, move || lock(&child).try_wait().ok().flatten()) {
                Ok(handle) => Ok((process, handle)),
                Err(err) => {
                    process.kill();
                    Err(TerminalError::SubprocessSpawnFailed(err))
                }
            }
        });

        match &result {
            Ok(_) => self
                .queue
                .push(LogLine::status(Channel::Pull, "Serial monitor started!")),
            Err(err) => {
                warn!("{err}");
                self.queue.push(LogLine::error(Channel::Pull, err));
                self.state.advance(ConnectionState::Failed);
            }
        }
        result
    }

    /// Start servicing `reader`. After end-of-file, `exit_status` is polled
    /// until it reports the writer's exit; the termination notice carries
    /// that status.
    pub fn attach<R, F>(&self, reader: R, exit_status: F) -> io::Result<StreamHandle>
    where
        R: Read + Send + 'static,
        F: FnMut() -> Option<ExitStatus> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();

        let reader = {
            let running = self.running.clone();
            let prefix = self.banner_prefix.clone();
            thread::Builder::new()
                .name("espterm-monitor-read".into())
                .spawn(move || read_lines(reader, &prefix, &running, &tx))?
        };

        let batcher = {
            let source = self.clone();
            thread::Builder::new()
                .name("espterm-monitor-batch".into())
                .spawn(move || source.run_batcher(rx, exit_status))?
        };

        Ok(StreamHandle { reader, batcher })
    }

    fn run_batcher<F>(&self, rx: mpsc::Receiver<ReadEvent>, mut exit_status: F)
    where
        F: FnMut() -> Option<ExitStatus>,
    {
        let mut batcher = LineBatcher::new(
            self.batch_interval,
            self.batch_max_lines,
            Instant::now(),
        );

        loop {
            let wait = batcher
                .deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_POLL)
                .min(IDLE_POLL);

            match rx.recv_timeout(wait) {
                Ok(ReadEvent::Line(line)) => {
                    if let Some(batch) = batcher.push(line, Instant::now()) {
                        self.emit(batch);
                    }
                }
                Ok(ReadEvent::End) => {
                    self.emit_rest(&mut batcher);
                    let Some(status) = self.wait_for_exit(&mut exit_status) else {
                        debug!("Stopped waiting for monitor exit");
                        break;
                    };
                    let notice = format!("{} ({status})", TerminalError::StreamEnded);
                    info!("{notice}");
                    self.queue.push(LogLine::status(Channel::Pull, notice));
                    self.state.advance(ConnectionState::Closed);
                    break;
                }
                Ok(ReadEvent::Failed(err)) => {
                    self.emit_rest(&mut batcher);
                    let err = TerminalError::StreamReadError(err);
                    warn!("{err}");
                    self.queue.push(LogLine::error(Channel::Pull, &err));
                    self.state.advance(ConnectionState::Failed);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.running.is_cancelled() {
                        self.emit_rest(&mut batcher);
                        break;
                    }
                    if let Some(batch) = batcher.poll(Instant::now()) {
                        self.emit(batch);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.emit_rest(&mut batcher);
                    break;
                }
            }
        }
        debug!("Monitor batcher stopped");
    }

    /// Poll `exit_status` with backoff until it reports an exit. Returns
    /// None if the running flag is cleared first.
    fn wait_for_exit<F>(&self, exit_status: &mut F) -> Option<ExitStatus>
    where
        F: FnMut() -> Option<ExitStatus>,
    {
        let mut interval = Duration::from_millis(5);
        let mut logged = false;
        loop {
            if let Some(status) = exit_status() {
                return Some(status);
            }
            if self.running.is_cancelled() {
                return None;
            }
            if !logged && interval >= IDLE_POLL {
                debug!("Monitor closed its output but is still running");
                logged = true;
            }
            thread::sleep(interval);
            interval = (interval * 2).min(IDLE_POLL);
        }
    }

    fn emit(&self, batch: Vec<String>) {
        self.queue.push(LogLine::output(Channel::Pull, batch.join("\n")));
    }

    fn emit_rest(&self, batcher: &mut LineBatcher) {
        if let Some(batch) = batcher.take() {
            self.emit(batch);
        }
    }
}

fn read_lines<R: Read>(
    reader: R,
    banner_prefix: &str,
    running: &CancellationToken,
    tx: &mpsc::Sender<ReadEvent>,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    while !running.is_cancelled() {
        buf.clear();
        let event = match reader.read_until(b'\n', &mut buf) {
            Ok(0) => ReadEvent::End,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let text = text.trim_end_matches(['\r', '\n']);
                if text.is_empty() || text.starts_with(banner_prefix) {
                    continue;
                }
                ReadEvent::Line(text.to_string())
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => ReadEvent::Failed(err),
        };

        let last = !matches!(event, ReadEvent::Line(_));
        if tx.send(event).is_err() || last {
            break;
        }
    }
    debug!("Monitor reader stopped");
}

fn lock(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The monitor subprocess, running in its own process group.
#[derive(Debug)]
pub struct MonitorProcess {
    child: Arc<Mutex<Child>>,
    pid: u32,
}

impl MonitorProcess {
    /// Spawn `program` with stdout and stderr merged into one pipe.
    pub fn spawn(program: &str, args: &[String]) -> Result<(Self, io::PipeReader), TerminalError> {
        let (output, input) = io::pipe().map_err(TerminalError::SubprocessSpawnFailed)?;
        let stderr = input
            .try_clone()
            .map_err(TerminalError::SubprocessSpawnFailed)?;

        // The command owns our copies of the write end and must be dropped
        // before reading, or end-of-file is never observed.
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(input)
            .stderr(stderr)
            .process_group(0)
            .spawn()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => TerminalError::SubprocessNotFound {
                    program: program.to_string(),
                },
                _ => TerminalError::SubprocessSpawnFailed(err),
            })?;

        let pid = child.id();
        info!(pid, program, ?args, "Started monitor");
        Ok((
            Self {
                child: Arc::new(Mutex::new(child)),
                pid,
            },
            output,
        ))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn try_wait(&self) -> Option<ExitStatus> {
        lock(&self.child).try_wait().ok().flatten()
    }

    /// SIGKILL the process group without waiting.
    pub fn kill(&self) {
        match killpg(Pid::from_raw(self.pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => warn!(pid = self.pid, "Failed to send SIGKILL to monitor: {err}"),
        }
        let _ = lock(&self.child).try_wait();
    }

    /// SIGTERM the process group, then SIGKILL it if it has not exited
    /// within `grace`.
    pub async fn terminate(&self, grace: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.try_wait() {
            return Some(status);
        }

        let group = Pid::from_raw(self.pid as i32);
        match killpg(group, Signal::SIGTERM) {
            Ok(()) => debug!(pid = self.pid, "Sent SIGTERM to monitor"),
            Err(Errno::ESRCH) => {}
            Err(err) => warn!(pid = self.pid, "Failed to send SIGTERM to monitor: {err}"),
        }

        if let Some(status) = self.wait_until(tokio::time::Instant::now() + grace).await {
            return Some(status);
        }

        warn!(
            pid = self.pid,
            "Monitor did not exit within {:.1}s, sending SIGKILL",
            grace.as_secs_f32()
        );
        match killpg(group, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => warn!(pid = self.pid, "Failed to send SIGKILL to monitor: {err}"),
        }
        if let Err(err) = lock(&self.child).kill() {
            debug!("Direct kill of monitor failed: {err}");
        }
        self.wait_until(tokio::time::Instant::now() + Duration::from_millis(500))
            .await
    }

    async fn wait_until(&self, deadline: tokio::time::Instant) -> Option<ExitStatus> {
        let mut interval = Duration::from_millis(20);
        let max_interval = Duration::from_millis(200);
        loop {
            if let Some(status) = self.try_wait() {
                return Some(status);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return None;
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
            interval = (interval * 3 / 2).min(max_interval);
        }
    }
}
