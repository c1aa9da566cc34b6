//! # synthctl-types
//!
//! Plain data shared by the synthctl crates: declarative controller specs,
//! grouping output, engine process state and preset descriptors.
//! Nothing in here talks to a process or a socket.

mod controller_spec;
mod preset;
mod process;
mod screen;

pub use controller_spec::{AddressSpec, ControllerSpec, ValueRange, MIDI_CC_MAX};
pub use preset::Preset;
pub use process::ProcessState;
pub use screen::{Screen, SCREEN_CAPACITY};

/// Identifier of a processor bound to an engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ProcessorId(u32);

impl ProcessorId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Highest valid MIDI channel (0-based).
pub const MIDI_CHANNEL_MAX: u8 = 15;
