use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use synthctl_types::ProcessState;

use super::command_line::split_command_line;
use super::prompt::Prompt;

/// How long to wait for a prompt when the engine config does not say.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const READ_CHUNK: usize = 4096;

/// How to launch and talk to one engine program.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessConfig {
    /// Program and arguments as one command line.
    pub command: String,
    /// Working directory. `PWD` in the child's environment is set to match.
    pub cwd: Option<PathBuf>,
    pub prompt: Option<Prompt>,
    pub timeout: Duration,
    /// Extra pause after the first prompt before `start` returns.
    pub start_delay: Option<Duration>,
    /// Overrides applied on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Treat stderr as part of the prompt stream (pty-like). When false,
    /// stderr lines are only logged.
    pub merge_stderr: bool,
}

impl ProcessConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            prompt: None,
            timeout: DEFAULT_TIMEOUT,
            start_delay: None,
            env: BTreeMap::new(),
            merge_stderr: true,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn prompt(mut self, prompt: Prompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn merge_stderr(mut self, merge: bool) -> Self {
        self.merge_stderr = merge;
        self
    }
}

/// How a command exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// The prompt was seen.
    Complete,
    /// No prompt within the timeout. The process is still considered running.
    TimedOut,
    /// `stop()` was called while waiting.
    Stopped,
    /// The child closed its output (exited) while waiting.
    Exited,
    /// No process was running; nothing was sent.
    NotRunning,
}

/// Output emitted since the previous prompt, without the prompt itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub output: String,
    pub status: ReplyStatus,
}

impl CommandReply {
    fn new(output: String, status: ReplyStatus) -> Self {
        Self { output, status }
    }

    pub fn not_running() -> Self {
        Self::new(String::new(), ReplyStatus::NotRunning)
    }

    pub fn is_complete(&self) -> bool {
        self.status == ReplyStatus::Complete
    }
}

#[derive(Debug)]
pub enum SupervisorError {
    InvalidCommand(String),
    Spawn { command: String, source: io::Error },
    Io(io::Error),
    /// Another command is in flight (or the engine is still starting).
    Busy,
    AlreadyRunning,
    /// The child exited before showing its first prompt.
    EarlyExit { output: String },
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::InvalidCommand(cmd) => write!(f, "invalid command line: {:?}", cmd),
            SupervisorError::Spawn { command, source } => {
                write!(f, "can't spawn '{}': {}", command, source)
            }
            SupervisorError::Io(e) => write!(f, "engine I/O failed: {}", e),
            SupervisorError::Busy => f.write_str("a command is already in flight"),
            SupervisorError::AlreadyRunning => f.write_str("engine already running"),
            SupervisorError::EarlyExit { .. } => f.write_str("engine exited before its first prompt"),
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::Spawn { source, .. } => Some(source),
            SupervisorError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SupervisorError {
    fn from(e: io::Error) -> Self {
        SupervisorError::Io(e)
    }
}

enum Chunk {
    Data(Vec<u8>),
    Closed,
}

/// The command side of a running child: its input, its merged output stream
/// and whatever arrived after the last prompt.
struct Session {
    stdin: ChildStdin,
    output: Receiver<Chunk>,
    cancel: Receiver<()>,
    open_streams: usize,
    pending: Vec<u8>,
}

/// The lifecycle side of a running child. Kept apart from `Session` so
/// `stop()` never waits behind an in-flight command.
struct Control {
    child: Child,
    cancel: Sender<()>,
}

/// Owns one engine subprocess.
///
/// Commands are strictly one at a time: a `send_command` issued while another
/// is waiting for its prompt fails with [`SupervisorError::Busy`] instead of
/// queueing. `stop()` may be called from any thread at any time and releases
/// a waiting command with [`ReplyStatus::Stopped`].
pub struct ProcessSupervisor {
    name: String,
    config: ProcessConfig,
    state: AtomicU8,
    control: Mutex<Option<Control>>,
    session: Mutex<Option<Session>>,
}

impl ProcessSupervisor {
    pub fn new(name: impl Into<String>, config: ProcessConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: AtomicU8::new(ProcessState::Idle.as_u8()),
            control: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.control).as_ref().map(|c| c.child.id())
    }

    fn set_state(&self, state: ProcessState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn transition(&self, from: ProcessState, to: ProcessState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Spawn the engine and wait for its first prompt.
    ///
    /// Returns the output printed before that prompt. A timeout is not an
    /// error: the partial output comes back with [`ReplyStatus::TimedOut`] and
    /// the process stays running.
    pub fn start(&self) -> Result<CommandReply, SupervisorError> {
        if !self.transition(ProcessState::Idle, ProcessState::Starting) {
            return Err(SupervisorError::AlreadyRunning);
        }
        log::info!(target: "process", "Starting engine {}", self.name);
        log::debug!(target: "process", "{} command: {}", self.name, self.config.command);

        let session = match self.spawn() {
            Ok(session) => session,
            Err(e) => {
                log::error!(target: "process", "Can't start engine {} => {}", self.name, e);
                self.set_state(ProcessState::Idle);
                return Err(e);
            }
        };

        let mut guard = lock(&self.session);
        *guard = Some(session);
        let reply = match (&self.config.prompt, guard.as_mut()) {
            (Some(prompt), Some(session)) => wait_for_prompt(session, prompt, self.config.timeout),
            _ => {
                log::warn!(target: "process", "{}: command prompt is not defined", self.name);
                CommandReply::new(String::new(), ReplyStatus::Complete)
            }
        };

        match reply.status {
            ReplyStatus::Exited => {
                *guard = None;
                drop(guard);
                self.reap();
                log::error!(target: "process", "Engine {} exited during start", self.name);
                return Err(SupervisorError::EarlyExit {
                    output: reply.output,
                });
            }
            ReplyStatus::TimedOut => {
                log::warn!(target: "process", "{}: no prompt within {:?} after start", self.name, self.config.timeout);
            }
            _ => {}
        }
        drop(guard);

        if !self.transition(ProcessState::Starting, ProcessState::Running) {
            // stop() won the race; it has already cleaned up.
            return Ok(CommandReply::new(reply.output, ReplyStatus::Stopped));
        }
        if let Some(delay) = self.config.start_delay {
            thread::sleep(delay);
        }
        Ok(reply)
    }

    fn spawn(&self) -> Result<Session, SupervisorError> {
        let argv = split_command_line(&self.config.command)
            .filter(|argv| !argv.is_empty())
            .ok_or_else(|| SupervisorError::InvalidCommand(self.config.command.clone()))?;

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        if let Some(cwd) = &self.config.cwd {
            // Some engines read PWD rather than getcwd(); keep them in agreement.
            cmd.current_dir(cwd);
            cmd.env("PWD", cwd);
        }
        cmd.envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            command: self.config.command.clone(),
            source,
        })?;

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SupervisorError::Io(io::Error::other("child pipes unavailable")));
        };

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut open_streams = 0;
        let spawned = spawn_reader(format!("{}-stdout", self.name), stdout, tx.clone())
            .and_then(|_| {
                open_streams += 1;
                if self.config.merge_stderr {
                    open_streams += 1;
                    spawn_reader(format!("{}-stderr", self.name), stderr, tx).map(|_| ())
                } else {
                    spawn_stderr_logger(self.name.clone(), stderr).map(|_| ())
                }
            });
        if let Err(e) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SupervisorError::Io(e));
        }

        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(1);
        *lock(&self.control) = Some(Control {
            child,
            cancel: cancel_tx,
        });

        Ok(Session {
            stdin,
            output: rx,
            cancel: cancel_rx,
            open_streams,
            pending: Vec::new(),
        })
    }

    /// Send one line and wait for the next prompt.
    ///
    /// With no process running this logs and returns an empty
    /// [`ReplyStatus::NotRunning`] reply rather than an error.
    pub fn send_command(&self, text: &str) -> Result<CommandReply, SupervisorError> {
        match self.state() {
            ProcessState::Running => {}
            ProcessState::Starting => return Err(SupervisorError::Busy),
            ProcessState::Idle | ProcessState::Stopping => {
                log::warn!(target: "process", "{}: not running, dropping command {:?}", self.name, text);
                return Ok(CommandReply::not_running());
            }
        }

        let mut guard = match self.session.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(SupervisorError::Busy),
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
        };
        let Some(session) = guard.as_mut() else {
            log::warn!(target: "process", "{}: not running, dropping command {:?}", self.name, text);
            return Ok(CommandReply::not_running());
        };

        log::debug!(target: "process", "{} <- {}", self.name, text);
        if let Err(e) = write_line(&mut session.stdin, text) {
            if !self.is_running() {
                return Ok(CommandReply::new(String::new(), ReplyStatus::Stopped));
            }
            log::error!(target: "process", "Can't exec engine command: {} => {}", text, e);
            *guard = None;
            drop(guard);
            self.reap();
            return Err(SupervisorError::Io(e));
        }

        let reply = match &self.config.prompt {
            Some(prompt) => wait_for_prompt(session, prompt, self.config.timeout),
            None => CommandReply::new(String::new(), ReplyStatus::Complete),
        };

        match reply.status {
            ReplyStatus::Exited => {
                log::error!(target: "process", "Engine {} exited while running {:?}", self.name, text);
                *guard = None;
                drop(guard);
                self.reap();
            }
            ReplyStatus::TimedOut => {
                log::warn!(target: "process", "{}: timed out waiting for prompt after {:?}", self.name, text);
            }
            _ => {}
        }
        Ok(reply)
    }

    /// Kill the child and return to `Idle`. Safe to call at any time; a
    /// second call is a no-op.
    pub fn stop(&self) {
        let Some(mut control) = lock(&self.control).take() else {
            log::debug!(target: "process", "{}: stop requested while idle", self.name);
            return;
        };
        self.set_state(ProcessState::Stopping);
        log::info!(target: "process", "Stopping engine {}", self.name);

        let _ = control.cancel.try_send(());
        if let Err(e) = control.child.kill() {
            // InvalidInput means it had already exited.
            if e.kind() != io::ErrorKind::InvalidInput {
                log::error!(target: "process", "Can't stop engine {} => {}", self.name, e);
            }
        }
        let _ = control.child.wait();
        drop(control);

        *lock(&self.session) = None;
        self.set_state(ProcessState::Idle);
    }

    /// Reap the child if it has exited on its own. Returns a description of
    /// the exit when it has.
    pub fn check_health(&self) -> Option<String> {
        let mut control = lock(&self.control);
        let status = match control.as_mut()?.child.try_wait() {
            Ok(Some(status)) => status,
            Ok(None) => return None,
            Err(e) => {
                log::warn!(target: "process", "{}: can't poll child: {}", self.name, e);
                return None;
            }
        };
        control.take();
        drop(control);

        // A waiting command will notice the closed pipes and clean up itself.
        if let Ok(mut session) = self.session.try_lock() {
            *session = None;
        }
        self.set_state(ProcessState::Idle);
        let message = format!("engine {} exited ({})", self.name, status);
        log::warn!(target: "process", "{}", message);
        Some(message)
    }

    /// Forget a child that died or whose pipes broke.
    fn reap(&self) {
        if let Some(mut control) = lock(&self.control).take() {
            let _ = control.child.kill();
            let _ = control.child.wait();
        }
        self.set_state(ProcessState::Idle);
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn write_line(stdin: &mut ChildStdin, text: &str) -> io::Result<()> {
    stdin.write_all(text.as_bytes())?;
    stdin.write_all(b"\n")?;
    stdin.flush()
}

/// Read until the prompt, the deadline, a cancel, or end of output.
fn wait_for_prompt(session: &mut Session, prompt: &Prompt, timeout: Duration) -> CommandReply {
    let Session {
        output,
        cancel,
        open_streams,
        pending,
        ..
    } = session;
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(found) = prompt.find(pending) {
            let text = String::from_utf8_lossy(&pending[..found.start]).into_owned();
            pending.drain(..found.end);
            return CommandReply::new(text, ReplyStatus::Complete);
        }
        if *open_streams == 0 {
            return CommandReply::new(take_text(pending), ReplyStatus::Exited);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return CommandReply::new(take_text(pending), ReplyStatus::TimedOut);
        }

        crossbeam_channel::select! {
            recv(output) -> msg => match msg {
                Ok(Chunk::Data(bytes)) => pending.extend_from_slice(&bytes),
                Ok(Chunk::Closed) => *open_streams = open_streams.saturating_sub(1),
                Err(_) => *open_streams = 0,
            },
            recv(cancel) -> _ => {
                return CommandReply::new(take_text(pending), ReplyStatus::Stopped);
            },
            default(remaining) => {},
        }
    }
}

fn take_text(pending: &mut Vec<u8>) -> String {
    let text = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    text
}

fn spawn_reader<R>(name: String, mut stream: R, tx: Sender<Chunk>) -> io::Result<thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new().name(name).spawn(move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Chunk::Data(buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = tx.send(Chunk::Closed);
    })
}

fn spawn_stderr_logger<R>(name: String, stream: R) -> io::Result<thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{}-stderr", name))
        .spawn(move || {
            for line in BufReader::new(stream).lines() {
                match line {
                    Ok(line) => log::debug!(target: "process", "{} stderr: {}", name, line),
                    Err(_) => break,
                }
            }
        })
}
