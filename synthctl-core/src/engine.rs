//! Engine facade: one supervised process, its OSC bridge and the processors
//! bound to it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use synthctl_types::{ControllerSpec, ProcessState, ProcessorId, Screen, MIDI_CHANNEL_MAX};

use crate::config::{ConfigError, EngineConfig};
use crate::controller::Controller;
use crate::controller_set::{BuildReport, ControllerSet, ControllerSetBuilder};
use crate::learn::MidiLearnRegistry;
use crate::osc::{first_numeric_arg, BridgeConfig, OscBridge, OscHandler, OscType};
use crate::process::{CommandReply, ProcessConfig, ProcessSupervisor, SupervisorError};
use crate::screens::{group_screens, GroupOptions};

/// Outbound MIDI transport for CC-addressed controllers.
pub trait MidiSink: Send + Sync {
    fn send_cc(&self, channel: u8, cc: u8, value: u8);
}

type FeedbackIndex = Arc<RwLock<HashMap<String, Vec<Weak<Controller>>>>>;

/// A logical instance of an engine bound to a MIDI channel.
#[derive(Debug)]
pub struct Processor {
    id: ProcessorId,
    channel: Option<u8>,
    part_index: Option<u32>,
    controllers: ControllerSet,
    screens: Vec<Screen>,
    last_build: BuildReport,
    refresh: bool,
}

impl Processor {
    pub fn id(&self) -> ProcessorId {
        self.id
    }

    pub fn channel(&self) -> Option<u8> {
        self.channel
    }

    pub fn part_index(&self) -> Option<u32> {
        self.part_index
    }

    pub fn controllers(&self) -> &ControllerSet {
        &self.controllers
    }

    pub fn controller(&self, symbol: &str) -> Option<&Arc<Controller>> {
        self.controllers.get(symbol)
    }

    pub fn screens(&self) -> &[Screen] {
        &self.screens
    }

    /// What the most recent controller rebuild did.
    pub fn last_build(&self) -> &BuildReport {
        &self.last_build
    }

    /// Whether the UI should redraw this processor. Reading clears the flag.
    pub fn take_refresh(&mut self) -> bool {
        std::mem::take(&mut self.refresh)
    }
}

pub struct Engine {
    name: String,
    nickname: String,
    specs: Vec<ControllerSpec>,
    supervisor: ProcessSupervisor,
    bridge: OscBridge,
    learn: MidiLearnRegistry,
    processors: Vec<Processor>,
    next_processor: u32,
    feedback: FeedbackIndex,
    midi_out: Option<Arc<dyn MidiSink>>,
    group_options: GroupOptions,
}

impl Engine {
    pub fn new(
        name: impl Into<String>,
        nickname: impl Into<String>,
        specs: Vec<ControllerSpec>,
        process: ProcessConfig,
        bridge: BridgeConfig,
    ) -> Self {
        let name = name.into();
        let supervisor = ProcessSupervisor::new(name.clone(), process);
        let bridge = OscBridge::new(name.clone(), bridge);
        let feedback: FeedbackIndex = Arc::default();
        bridge.add_handler(None, feedback_handler(name.clone(), Arc::clone(&feedback)));
        Self {
            nickname: nickname.into(),
            name,
            specs,
            supervisor,
            bridge,
            learn: MidiLearnRegistry::new(),
            processors: Vec::new(),
            next_processor: 0,
            feedback,
            midi_out: None,
            group_options: GroupOptions::default(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.name.clone(),
            config.nickname(),
            config.controllers.clone(),
            config.process_config()?,
            config.bridge_config(),
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn specs(&self) -> &[ControllerSpec] {
        &self.specs
    }

    pub fn state(&self) -> ProcessState {
        self.supervisor.state()
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn bridge(&self) -> &OscBridge {
        &self.bridge
    }

    pub fn set_midi_sink(&mut self, sink: Option<Arc<dyn MidiSink>>) {
        self.midi_out = sink;
    }

    pub fn set_group_options(&mut self, options: GroupOptions) {
        self.group_options = options;
        for proc in &mut self.processors {
            proc.screens = group_screens(&proc.controllers, options);
            proc.refresh = true;
        }
    }

    /// Launch the engine, then its OSC bridge.
    ///
    /// A bridge failure only disables feedback; the command path stays usable.
    pub fn start(&self) -> Result<CommandReply, SupervisorError> {
        log::info!(target: "engine", "starting {}", self.name);
        let reply = self.supervisor.start()?;
        match self.bridge.start() {
            Ok(Some(port)) => {
                log::info!(target: "engine", "{}: OSC feedback on port {}", self.name, port)
            }
            Ok(None) => {}
            Err(e) => log::warn!(
                target: "engine",
                "{}: running without OSC feedback: {}",
                self.name,
                e
            ),
        }
        Ok(reply)
    }

    pub fn stop(&self) {
        log::info!(target: "engine", "stopping {}", self.name);
        self.bridge.stop();
        self.supervisor.stop();
    }

    pub fn send_command(&self, text: &str) -> Result<CommandReply, SupervisorError> {
        self.supervisor.send_command(text)
    }

    /// Reap a dead engine. Returns a description of the exit if it had died.
    pub fn check_health(&self) -> Option<String> {
        let exit = self.supervisor.check_health()?;
        self.bridge.stop();
        Some(exit)
    }

    pub fn add_processor(&mut self, channel: Option<u8>, part_index: Option<u32>) -> ProcessorId {
        let id = ProcessorId::new(self.next_processor);
        self.next_processor += 1;
        let channel = self.checked_channel(channel);
        self.processors.push(Processor {
            id,
            channel,
            part_index,
            controllers: ControllerSet::new(),
            screens: Vec::new(),
            last_build: BuildReport::default(),
            refresh: true,
        });
        self.refresh_controllers(id, false);
        log::debug!(target: "engine", "{}: added processor {} on channel {:?}", self.name, id, channel);
        id
    }

    pub fn remove_processor(&mut self, id: ProcessorId) -> bool {
        let Some(pos) = self.processors.iter().position(|p| p.id == id) else {
            return false;
        };
        let mut proc = self.processors.remove(pos);
        proc.controllers.clear(&mut self.learn);
        self.rebuild_feedback_index();
        true
    }

    pub fn processor_ids(&self) -> Vec<ProcessorId> {
        self.processors.iter().map(|p| p.id).collect()
    }

    pub fn processor(&self, id: ProcessorId) -> Option<&Processor> {
        self.processors.iter().find(|p| p.id == id)
    }

    pub fn processor_mut(&mut self, id: ProcessorId) -> Option<&mut Processor> {
        self.processors.iter_mut().find(|p| p.id == id)
    }

    pub fn controllers(&self, id: ProcessorId) -> Option<&ControllerSet> {
        self.processor(id).map(Processor::controllers)
    }

    pub fn screens(&self, id: ProcessorId) -> Option<&[Screen]> {
        self.processor(id).map(Processor::screens)
    }

    /// Move a processor to another channel and rebind its controllers.
    pub fn set_processor_channel(&mut self, id: ProcessorId, channel: Option<u8>) -> Option<BuildReport> {
        let channel = self.checked_channel(channel);
        self.processor_mut(id)?.channel = channel;
        self.refresh_controllers(id, false)
    }

    /// Replace the engine's controller table and rebuild every processor.
    pub fn set_specs(&mut self, specs: Vec<ControllerSpec>) {
        self.specs = specs;
        for id in self.processor_ids() {
            self.refresh_controllers(id, false);
        }
    }

    /// Rebuild one processor's controllers and screens from the spec table.
    pub fn refresh_controllers(&mut self, id: ProcessorId, reset: bool) -> Option<BuildReport> {
        let pos = self.processors.iter().position(|p| p.id == id)?;
        let proc = &mut self.processors[pos];
        let report = ControllerSetBuilder::new(&self.name, &self.specs, proc.channel)
            .part_index(proc.part_index)
            .osc_port(self.bridge.target_port())
            .reset_values(reset)
            .build(&mut proc.controllers, &mut self.learn);
        proc.screens = group_screens(&proc.controllers, self.group_options);
        proc.last_build = report.clone();
        proc.refresh = true;
        self.rebuild_feedback_index();
        Some(report)
    }

    /// Out-of-range channels fall back to omni, with a warning.
    fn checked_channel(&self, channel: Option<u8>) -> Option<u8> {
        match channel {
            Some(ch) if ch > MIDI_CHANNEL_MAX => {
                log::warn!(
                    target: "engine",
                    "{}: MIDI channel {} out of range 0..={}, processor listens on all channels",
                    self.name,
                    ch,
                    MIDI_CHANNEL_MAX
                );
                None
            }
            other => other,
        }
    }

    /// Channels in use by processors, or `None` if any processor listens on
    /// every channel.
    pub fn active_midi_channels(&self) -> Option<Vec<u8>> {
        let mut channels = Vec::new();
        for proc in &self.processors {
            let ch = proc.channel?;
            if !channels.contains(&ch) {
                channels.push(ch);
            }
        }
        Some(channels)
    }

    pub fn refresh_all(&mut self, flag: bool) {
        for proc in &mut self.processors {
            proc.refresh = flag;
        }
    }

    /// Route an incoming CC to the controllers bound to it.
    pub fn dispatch_cc(&mut self, channel: u8, cc: u8, value: u8) -> usize {
        self.learn.dispatch_cc(channel, cc, value)
    }

    pub fn learn(&self) -> &MidiLearnRegistry {
        &self.learn
    }

    /// Set a controller from the UI and forward the value to the engine.
    /// Returns the value actually stored.
    pub fn set_controller_value(&self, id: ProcessorId, symbol: &str, value: f32) -> Option<f32> {
        let ctrl = self.processor(id)?.controller(symbol)?;
        let stored = ctrl.set_value(value);
        self.send_controller_value(ctrl);
        Some(stored)
    }

    pub fn send_controller_value(&self, ctrl: &Controller) {
        if let Some(path) = ctrl.osc_path() {
            if let Err(e) = self.bridge.send(&path, vec![osc_value(ctrl)]) {
                log::warn!(target: "engine", "{}: could not send {}: {}", self.name, path, e);
            }
        } else if let Some(cc) = ctrl.midi_cc() {
            match (&self.midi_out, ctrl.channel()) {
                (Some(sink), Some(channel)) => sink.send_cc(channel, cc, ctrl.midi_value()),
                (Some(_), None) => {
                    log::debug!(target: "engine", "{}: {} has no channel", self.name, ctrl.symbol())
                }
                (None, _) => {}
            }
        }
    }

    fn rebuild_feedback_index(&self) {
        let mut index: HashMap<String, Vec<Weak<Controller>>> = HashMap::new();
        for proc in &self.processors {
            for ctrl in proc.controllers.iter() {
                if let Some(path) = ctrl.osc_path() {
                    index.entry(path).or_default().push(Arc::downgrade(ctrl));
                }
            }
        }
        let mut guard = self.feedback.write().unwrap_or_else(|e| e.into_inner());
        *guard = index;
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn osc_value(ctrl: &Controller) -> OscType {
    let range = ctrl.range();
    if range.min.fract() == 0.0 && range.max.fract() == 0.0 {
        OscType::Int(ctrl.value().round() as i32)
    } else {
        OscType::Float(ctrl.value())
    }
}

fn feedback_handler(name: String, index: FeedbackIndex) -> OscHandler {
    Arc::new(move |msg, from| {
        let targets: Vec<Arc<Controller>> = {
            let guard = index.read().unwrap_or_else(|e| e.into_inner());
            guard
                .get(&msg.addr)
                .map(|entries| entries.iter().filter_map(Weak::upgrade).collect())
                .unwrap_or_default()
        };
        if targets.is_empty() {
            log::debug!(target: "osc", "{}: unrecognised OSC message '{}' from '{}'", name, msg.addr, from);
            for arg in &msg.args {
                log::debug!(target: "osc", "argument {:?}", arg);
            }
            return;
        }
        let Some(value) = first_numeric_arg(msg) else {
            log::debug!(target: "osc", "{}: OSC message '{}' has no numeric argument", name, msg.addr);
            return;
        };
        for ctrl in targets {
            ctrl.set_value(value);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::sync::{Mutex, Once};
    use std::time::{Duration, Instant};

    use crate::osc::OscMessage;

    struct CaptureLogger;

    static RECORDS: Mutex<Vec<(String, log::Level, String)>> = Mutex::new(Vec::new());
    static CAPTURE: CaptureLogger = CaptureLogger;

    impl log::Log for CaptureLogger {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            RECORDS.lock().unwrap().push((
                record.target().to_string(),
                record.level(),
                record.args().to_string(),
            ));
        }

        fn flush(&self) {}
    }

    fn capture_logs() {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let _ = log::set_logger(&CAPTURE);
            log::set_max_level(log::LevelFilter::Trace);
        });
    }

    fn logged(target: &str, level: log::Level, needle: &str) -> bool {
        RECORDS
            .lock()
            .unwrap()
            .iter()
            .any(|(t, l, msg)| t == target && *l == level && msg.contains(needle))
    }

    fn specs() -> Vec<ControllerSpec> {
        vec![
            ControllerSpec::osc("cutoff", "/eng/${channel}/cutoff")
                .with_range(0.0, 127.0, 64.0)
                .in_group("filter"),
            ControllerSpec::cc("reso", 70)
                .with_range(0.0, 127.0, 0.0)
                .in_group("filter"),
            ControllerSpec::cc("volume", 7),
        ]
    }

    fn engine() -> Engine {
        Engine::new(
            "Test",
            "T",
            specs(),
            ProcessConfig::new("true"),
            BridgeConfig::new(None),
        )
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<(u8, u8, u8)>>);

    impl MidiSink for RecordingSink {
        fn send_cc(&self, channel: u8, cc: u8, value: u8) {
            self.0.lock().unwrap().push((channel, cc, value));
        }
    }

    #[test]
    fn add_processor_builds_controllers_and_screens() {
        let mut engine = engine();
        let id = engine.add_processor(Some(3), None);
        let proc = engine.processor(id).unwrap();
        assert_eq!(
            proc.controller("cutoff").unwrap().osc_path().as_deref(),
            Some("/eng/3/cutoff")
        );
        let titles: Vec<_> = proc.screens().iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["filter", "Ctrls"]);
        assert_eq!(engine.learn().lookup(70).len(), 1);
    }

    #[test]
    fn remove_processor_drops_learn_entries() {
        let mut engine = engine();
        let a = engine.add_processor(Some(0), None);
        let _b = engine.add_processor(Some(1), None);
        assert_eq!(engine.learn().lookup(7).len(), 2);
        assert!(engine.remove_processor(a));
        assert!(!engine.remove_processor(a));
        assert_eq!(engine.learn().lookup(7).len(), 1);
        assert_eq!(engine.processor_ids().len(), 1);
    }

    #[test]
    fn active_channels() {
        let mut engine = engine();
        assert_eq!(engine.active_midi_channels(), Some(vec![]));
        engine.add_processor(Some(2), None);
        engine.add_processor(Some(5), None);
        engine.add_processor(Some(2), Some(1));
        assert_eq!(engine.active_midi_channels(), Some(vec![2, 5]));
        engine.add_processor(None, None);
        assert_eq!(engine.active_midi_channels(), None);
    }

    #[test]
    fn dispatch_cc_respects_channel() {
        let mut engine = engine();
        let a = engine.add_processor(Some(0), None);
        let b = engine.add_processor(Some(1), None);
        assert_eq!(engine.dispatch_cc(1, 7, 100), 1);
        assert_eq!(engine.processor(a).unwrap().controller("volume").unwrap().value(), 0.0);
        assert_eq!(engine.processor(b).unwrap().controller("volume").unwrap().value(), 100.0);
    }

    #[test]
    fn cc_values_go_to_midi_sink() {
        let mut engine = engine();
        let sink = Arc::new(RecordingSink::default());
        let out: Arc<dyn MidiSink> = sink.clone();
        engine.set_midi_sink(Some(out));
        let id = engine.add_processor(Some(4), None);
        assert_eq!(engine.set_controller_value(id, "reso", 200.0), Some(127.0));
        assert_eq!(*sink.0.lock().unwrap(), vec![(4, 70, 127)]);
        assert_eq!(engine.set_controller_value(id, "missing", 1.0), None);
    }

    #[test]
    fn refresh_flags() {
        let mut engine = engine();
        let id = engine.add_processor(Some(0), None);
        let proc = engine.processor_mut(id).unwrap();
        assert!(proc.take_refresh());
        assert!(!proc.take_refresh());
        engine.refresh_all(true);
        assert!(engine.processor_mut(id).unwrap().take_refresh());
    }

    #[test]
    fn channel_change_rebinds_in_place() {
        let mut engine = engine();
        let id = engine.add_processor(Some(0), None);
        let before = Arc::clone(engine.processor(id).unwrap().controller("cutoff").unwrap());
        before.set_value(10.0);
        let report = engine.set_processor_channel(id, Some(9)).unwrap();
        assert!(report.created.is_empty());
        assert_eq!(before.osc_path().as_deref(), Some("/eng/9/cutoff"));
        assert_eq!(before.value(), 10.0);
    }

    #[test]
    fn spec_change_removes_stale_controllers() {
        let mut engine = engine();
        let id = engine.add_processor(Some(0), None);
        let mut specs = specs();
        specs.retain(|s| s.symbol != "volume");
        engine.set_specs(specs);
        let proc = engine.processor(id).unwrap();
        assert!(proc.controller("volume").is_none());
        assert_eq!(proc.controllers().len(), 2);
        assert!(engine.learn().lookup(7).is_empty());
    }

    #[test]
    fn feedback_handler_updates_matching_controllers() {
        let mut engine = engine();
        let id = engine.add_processor(Some(3), None);
        let handler = feedback_handler("Test".into(), Arc::clone(&engine.feedback));
        let from = "127.0.0.1:9".parse().unwrap();
        handler(
            &OscMessage {
                addr: "/eng/3/cutoff".into(),
                args: vec![OscType::Float(99.0)],
            },
            from,
        );
        handler(
            &OscMessage {
                addr: "/eng/4/cutoff".into(),
                args: vec![OscType::Float(1.0)],
            },
            from,
        );
        let ctrl = engine.processor(id).unwrap().controller("cutoff").unwrap();
        assert_eq!(ctrl.value(), 99.0);
    }

    #[test]
    fn osc_value_type_follows_range() {
        let mut e = engine();
        let id = e.add_processor(Some(0), None);
        let ctrl = Arc::clone(e.processor(id).unwrap().controller("cutoff").unwrap());
        assert_eq!(osc_value(&ctrl), OscType::Int(64));

        e.set_specs(vec![ControllerSpec::osc("gain", "/gain").with_range(0.0, 1.5, 0.5)]);
        let gain = Arc::clone(e.processor(id).unwrap().controller("gain").unwrap());
        assert_eq!(osc_value(&gain), OscType::Float(0.5));
    }

    #[test]
    fn out_of_range_channel_warns_and_falls_back_to_omni() {
        capture_logs();
        let mut engine = engine();
        let id = engine.add_processor(Some(16), None);
        assert_eq!(engine.processor(id).unwrap().channel(), None);
        assert!(logged("engine", log::Level::Warn, "MIDI channel 16 out of range"));

        engine.set_processor_channel(id, Some(200));
        assert!(logged("engine", log::Level::Warn, "MIDI channel 200 out of range"));
        assert_eq!(engine.active_midi_channels(), None);
    }

    #[test]
    fn last_build_reports_skipped_controllers() {
        let mut e = Engine::new(
            "Parts",
            "P",
            vec![
                ControllerSpec::osc("gain", "/part${part_index}/gain"),
                ControllerSpec::cc("volume", 7),
            ],
            ProcessConfig::new("true"),
            BridgeConfig::new(None),
        );
        let id = e.add_processor(Some(0), None);
        let report = e.processor(id).unwrap().last_build();
        assert_eq!(report.created, vec!["volume".to_string()]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "gain");
    }

    #[test]
    fn unrecognised_feedback_is_logged() {
        capture_logs();
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer_port = peer.local_addr().unwrap().port();
        let mut engine = Engine::new(
            "Listener",
            "L",
            specs(),
            ProcessConfig::new("cat"),
            BridgeConfig::new(Some(peer_port)),
        );
        engine.add_processor(Some(3), None);
        engine.start().unwrap();
        let bridge_port = engine.bridge().local_port().unwrap();

        let packet = rosc::OscPacket::Message(OscMessage {
            addr: "/nobody/listens".into(),
            args: vec![OscType::Float(1.0)],
        });
        let buf = rosc::encoder::encode(&packet).unwrap();
        peer.send_to(&buf, ("127.0.0.1", bridge_port)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !logged("osc", log::Level::Debug, "unrecognised OSC message '/nobody/listens'") {
            assert!(Instant::now() < deadline, "unrecognised message was not logged");
            std::thread::sleep(Duration::from_millis(5));
        }

        let handler = feedback_handler("Listener".into(), Arc::clone(&engine.feedback));
        handler(
            &OscMessage {
                addr: "/eng/3/cutoff".into(),
                args: vec![OscType::String("x".into())],
            },
            "127.0.0.1:9".parse().unwrap(),
        );
        assert!(logged("osc", log::Level::Debug, "'/eng/3/cutoff' has no numeric argument"));
        engine.stop();
    }
}
