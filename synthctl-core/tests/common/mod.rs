#![allow(dead_code)]
//! Test harness utilities for synthctl-core integration tests.

use std::net::{SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rosc::{OscMessage, OscPacket};
use synthctl_core::process::{ProcessConfig, Prompt};

/// A scripted engine shell: prints a banner and the `> ` prompt, then answers
/// one line at a time.
///
/// - `load X` prints `loaded X`
/// - `where` prints `$PWD` and the shell's working directory
/// - `env NAME` prints the value of `$NAME`
/// - `quit` exits without a prompt
/// - `slow` prints `partial` and never prompts again
/// - `hang` never answers
pub const FAKE_ENGINE: &str = r#"
echo "synth-cli 1.0"
printf '> '
while read -r line; do
  case "$line" in
    "load "*) echo "loaded ${line#load }" ;;
    where) echo "$PWD"; pwd -P ;;
    "env "*) eval "echo \"\$${line#env }\"" ;;
    quit) exit 0 ;;
    slow) echo partial; exec sleep 30 ;;
    hang) exec sleep 30 ;;
    *) echo "unknown: $line" ;;
  esac
  printf '> '
done
"#;

/// Write `body` as a shell script in `dir` and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

/// Config running `script` under /bin/sh with the `> ` prompt.
pub fn shell_config(script: &Path, timeout: Duration) -> ProcessConfig {
    ProcessConfig::new(format!("/bin/sh {}", script.display()))
        .prompt(Prompt::literal("> "))
        .timeout(timeout)
}

/// Poll `cond` until it holds, or panic after `timeout`.
pub fn wait_until(timeout: Duration, what: &str, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("Timed out waiting for {}", what);
}

/// A UDP socket standing in for an engine's OSC port.
pub struct FakeOscPeer {
    pub socket: UdpSocket,
}

impl FakeOscPeer {
    pub fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        Self { socket }
    }

    pub fn port(&self) -> u16 {
        self.socket.local_addr().unwrap().port()
    }

    /// Next message received, with its sender.
    pub fn recv(&self) -> (OscMessage, SocketAddr) {
        let mut buf = [0u8; 4096];
        let (n, from) = self.socket.recv_from(&mut buf).unwrap();
        match rosc::decoder::decode_udp(&buf[..n]).unwrap().1 {
            OscPacket::Message(msg) => (msg, from),
            OscPacket::Bundle(b) => panic!("unexpected bundle: {:?}", b),
        }
    }

    pub fn send(&self, port: u16, msg: OscMessage) {
        let buf = rosc::encoder::encode(&OscPacket::Message(msg)).unwrap();
        self.socket.send_to(&buf, ("127.0.0.1", port)).unwrap();
    }

    pub fn send_raw(&self, port: u16, bytes: &[u8]) {
        self.socket.send_to(bytes, ("127.0.0.1", port)).unwrap();
    }
}
