use serde::{Deserialize, Serialize};

/// Lifecycle of an engine subprocess.
///
/// `Idle -> Starting -> Running -> Stopping -> Idle`. A failed spawn goes
/// straight back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}

impl ProcessState {
    pub fn is_running(self) -> bool {
        self == ProcessState::Running
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ProcessState::Idle => 0,
            ProcessState::Starting => 1,
            ProcessState::Running => 2,
            ProcessState::Stopping => 3,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ProcessState::Starting,
            2 => ProcessState::Running,
            3 => ProcessState::Stopping,
            _ => ProcessState::Idle,
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessState::Idle => "idle",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}
