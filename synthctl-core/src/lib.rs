//! # synthctl-core
//!
//! Supervision and control of external synth engines.
//!
//! An [`Engine`] owns one [`ProcessSupervisor`] (the engine's shell, driven by
//! prompt-delimited commands) and one [`OscBridge`] (optional feedback
//! channel). Processors attached to an engine get a [`ControllerSet`] built
//! from the engine's controller table, and [`group_screens`] lays those
//! controllers out as fixed-size pages for a UI.

pub mod address;
pub mod banks;
pub mod config;
pub mod controller;
pub mod controller_set;
pub mod engine;
pub mod favorites;
pub mod learn;
pub mod osc;
pub mod paths;
pub mod process;
pub mod screens;

pub use address::{AddressError, ResolvedAddress, TemplateVars};
pub use config::{Config, ConfigError, EngineConfig};
pub use controller::{Binding, Controller, ListenerId, ValueListener};
pub use controller_set::{BuildReport, ControllerSet, ControllerSetBuilder};
pub use engine::{Engine, MidiSink, Processor};
pub use favorites::{FavoriteEntry, FavoritesError, PresetFavorites};
pub use learn::MidiLearnRegistry;
pub use osc::{BridgeConfig, BridgeError, OscBridge};
pub use process::{
    CommandReply, ProcessConfig, ProcessSupervisor, Prompt, ReplyStatus, SupervisorError,
};
pub use screens::{group_screens, GroupOptions, ScreenRegistry, UpdateHook};
