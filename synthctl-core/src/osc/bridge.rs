use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rosc::{OscMessage, OscPacket, OscType};

/// Path used to tell an engine where to send feedback, unless configured.
pub const DEFAULT_REGISTER_PATH: &str = "/register";

/// How long the receive loop blocks before re-checking its stop flag.
const RECV_POLL: Duration = Duration::from_millis(50);

const MAX_DATAGRAM: usize = 65_507;

/// Callback for inbound messages: `(message, source)`. May be invoked from the
/// receive thread concurrently with anything else the engine is doing.
pub type OscHandler = Arc<dyn Fn(&OscMessage, SocketAddr) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Debug)]
pub enum BridgeError {
    Bind(io::Error),
    Io(io::Error),
    Encode(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Bind(e) => write!(f, "can't bind OSC receiver: {}", e),
            BridgeError::Io(e) => write!(f, "OSC send failed: {}", e),
            BridgeError::Encode(e) => write!(f, "can't encode OSC message: {}", e),
        }
    }
}

impl std::error::Error for BridgeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// The engine's OSC port. `None` keeps the bridge inert.
    pub target_port: Option<u16>,
    /// Message announcing our receiver URL to the engine. `None` skips it.
    pub register_path: Option<String>,
}

impl BridgeConfig {
    pub fn new(target_port: Option<u16>) -> Self {
        Self {
            target_port,
            register_path: Some(DEFAULT_REGISTER_PATH.to_string()),
        }
    }

    pub fn register_path(mut self, path: Option<String>) -> Self {
        self.register_path = path;
        self
    }
}

type HandlerList = Arc<RwLock<Vec<(HandlerId, Option<String>, OscHandler)>>>;

struct Receiver {
    socket: UdpSocket,
    port: u16,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Local OSC receiver for one engine's feedback, plus the send path to the
/// engine's own port.
pub struct OscBridge {
    name: String,
    config: BridgeConfig,
    handlers: HandlerList,
    next_handler: AtomicU64,
    receiver: Mutex<Option<Receiver>>,
}

impl OscBridge {
    pub fn new(name: impl Into<String>, config: BridgeConfig) -> Self {
        Self {
            name: name.into(),
            config,
            handlers: Arc::new(RwLock::new(Vec::new())),
            next_handler: AtomicU64::new(0),
            receiver: Mutex::new(None),
        }
    }

    pub fn target(&self) -> Option<SocketAddr> {
        self.config
            .target_port
            .map(|port| SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)))
    }

    pub fn target_port(&self) -> Option<u16> {
        self.config.target_port
    }

    /// Port of the local receiver while it is running.
    pub fn local_port(&self) -> Option<u16> {
        lock(&self.receiver).as_ref().map(|r| r.port)
    }

    pub fn is_active(&self) -> bool {
        lock(&self.receiver).is_some()
    }

    /// `osc.udp://` URL of the local receiver.
    pub fn url(&self) -> Option<String> {
        self.local_port()
            .map(|port| format!("osc.udp://{}:{}/", Ipv4Addr::LOCALHOST, port))
    }

    /// Bind an ephemeral receiver, start listening and announce it to the
    /// engine. Without a target port this does nothing and returns `None`.
    pub fn start(&self) -> Result<Option<u16>, BridgeError> {
        let Some(target) = self.target() else {
            log::debug!(target: "osc", "{}: no OSC target, feedback disabled", self.name);
            return Ok(None);
        };
        let mut guard = lock(&self.receiver);
        if let Some(existing) = guard.as_ref() {
            return Ok(Some(existing.port));
        }

        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).map_err(BridgeError::Bind)?;
        let port = socket.local_addr().map_err(BridgeError::Bind)?.port();
        let recv_socket = socket.try_clone().map_err(BridgeError::Bind)?;
        recv_socket
            .set_read_timeout(Some(RECV_POLL))
            .map_err(BridgeError::Bind)?;

        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let running = Arc::clone(&running);
            let handlers = Arc::clone(&self.handlers);
            let name = self.name.clone();
            thread::Builder::new()
                .name(format!("{}-osc", self.name))
                .spawn(move || receive_loop(name, recv_socket, running, handlers))
                .map_err(BridgeError::Bind)?
        };

        log::info!(target: "osc", "{}: OSC target in port {}", self.name, target.port());
        log::info!(target: "osc", "{}: OSC server running in port {}", self.name, port);
        *guard = Some(Receiver {
            socket,
            port,
            running,
            thread: Some(thread),
        });
        drop(guard);

        if let Err(e) = self.register() {
            log::warn!(target: "osc", "{}: feedback registration failed: {}", self.name, e);
        }
        Ok(Some(port))
    }

    /// Tell the engine where to send feedback.
    pub fn register(&self) -> Result<(), BridgeError> {
        let (Some(path), Some(url)) = (self.config.register_path.clone(), self.url()) else {
            return Ok(());
        };
        self.send(&path, vec![OscType::String(url)])
    }

    /// Close the receiver. Safe to call when never started.
    pub fn stop(&self) {
        let Some(mut receiver) = lock(&self.receiver).take() else {
            return;
        };
        receiver.running.store(false, Ordering::Release);
        if let Some(handle) = receiver.thread.take() {
            if handle.join().is_err() {
                log::error!(target: "osc", "{}: OSC receive thread panicked", self.name);
            }
        }
        log::info!(target: "osc", "{}: OSC server stopped", self.name);
    }

    /// Send a message to the engine. A no-op without a target port.
    pub fn send(&self, path: &str, args: Vec<OscType>) -> Result<(), BridgeError> {
        let Some(target) = self.target() else {
            return Ok(());
        };
        let packet = OscPacket::Message(OscMessage {
            addr: path.to_string(),
            args,
        });
        let buf = rosc::encoder::encode(&packet).map_err(|e| BridgeError::Encode(e.to_string()))?;

        // Send from the receiver's socket so replies come back to it.
        let sent = {
            let guard = lock(&self.receiver);
            match guard.as_ref() {
                Some(receiver) => receiver.socket.send_to(&buf, target),
                None => UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
                    .and_then(|s| s.send_to(&buf, target)),
            }
        };
        sent.map_err(BridgeError::Io)?;
        log::trace!(target: "osc", "{} -> {}", self.name, path);
        Ok(())
    }

    /// Register a handler for messages whose path starts with `prefix`
    /// (all messages when `None`).
    pub fn add_handler(&self, prefix: Option<&str>, handler: OscHandler) -> HandlerId {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, prefix.map(str::to_string), handler));
        id
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let before = handlers.len();
        handlers.retain(|(hid, _, _)| *hid != id);
        handlers.len() != before
    }
}

impl Drop for OscBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn receive_loop(name: String, socket: UdpSocket, running: Arc<AtomicBool>, handlers: HandlerList) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while running.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((n, src)) => match rosc::decoder::decode_udp(&buf[..n]) {
                Ok((_, packet)) => handle_packet(&name, &packet, src, &handlers),
                Err(e) => log::debug!(target: "osc", "{}: dropping malformed datagram from {}: {}", name, src, e),
            },
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(e) => {
                log::error!(target: "osc", "{}: OSC receive failed: {}", name, e);
                break;
            }
        }
    }
}

fn handle_packet(name: &str, packet: &OscPacket, src: SocketAddr, handlers: &HandlerList) {
    match packet {
        OscPacket::Message(msg) => dispatch(name, msg, src, handlers),
        OscPacket::Bundle(bundle) => {
            for p in &bundle.content {
                handle_packet(name, p, src, handlers);
            }
        }
    }
}

/// Handlers are snapshotted so they can add or remove handlers themselves.
fn dispatch(name: &str, msg: &OscMessage, src: SocketAddr, handlers: &HandlerList) {
    let matching: Vec<OscHandler> = handlers
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .filter(|(_, prefix, _)| prefix.as_deref().map_or(true, |p| msg.addr.starts_with(p)))
        .map(|(_, _, h)| Arc::clone(h))
        .collect();

    if matching.is_empty() {
        log::debug!(target: "osc", "{}: OSC MESSAGE '{}' from '{}'", name, msg.addr, src);
        for arg in &msg.args {
            log::debug!(target: "osc", "argument {:?}", arg);
        }
        return;
    }
    for handler in matching {
        if catch_unwind(AssertUnwindSafe(|| handler(msg, src))).is_err() {
            log::error!(target: "osc", "{}: handler for '{}' panicked, message dropped", name, msg.addr);
        }
    }
}
