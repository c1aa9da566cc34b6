//! Engine subprocess supervision: spawning, prompt-delimited command exchange
//! and forced termination.

mod command_line;
mod prompt;
mod supervisor;

pub use command_line::split_command_line;
pub use prompt::Prompt;
pub use supervisor::{
    CommandReply, ProcessConfig, ProcessSupervisor, ReplyStatus, SupervisorError,
    DEFAULT_TIMEOUT,
};
