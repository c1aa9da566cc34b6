//! OSC feedback side channel between the controller and an engine.

mod bridge;

pub use bridge::{BridgeConfig, BridgeError, HandlerId, OscBridge, OscHandler, DEFAULT_REGISTER_PATH};
pub use rosc::{OscMessage, OscType};

/// First numeric argument of a message, as f32.
pub fn first_numeric_arg(msg: &OscMessage) -> Option<f32> {
    msg.args.iter().find_map(|arg| match arg {
        OscType::Float(v) => Some(*v),
        OscType::Double(v) => Some(*v as f32),
        OscType::Int(v) => Some(*v as f32),
        OscType::Long(v) => Some(*v as f32),
        OscType::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    })
}
