//! CC → controller associations used to route incoming MIDI.
//!
//! The registry never owns controllers: processors do. Entries are weak and
//! dead ones are pruned on every mutation and dispatch.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use crate::controller::Controller;

#[derive(Default)]
pub struct MidiLearnRegistry {
    by_cc: BTreeMap<u8, Vec<Weak<Controller>>>,
}

impl MidiLearnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `cc` with `ctrl`. Registering the same controller again is a
    /// no-op, and any association it had with a different CC is dropped.
    pub fn register(&mut self, cc: u8, ctrl: &Arc<Controller>) {
        self.forget(ctrl);
        let entries = self.by_cc.entry(cc).or_default();
        entries.push(Arc::downgrade(ctrl));
    }

    /// Remove every association that points at `ctrl`.
    pub fn forget(&mut self, ctrl: &Arc<Controller>) {
        let target = Arc::downgrade(ctrl);
        for entries in self.by_cc.values_mut() {
            entries.retain(|w| w.strong_count() > 0 && !w.ptr_eq(&target));
        }
        self.by_cc.retain(|_, entries| !entries.is_empty());
    }

    /// Live controllers associated with `cc`.
    pub fn lookup(&self, cc: u8) -> Vec<Arc<Controller>> {
        self.by_cc
            .get(&cc)
            .map(|entries| entries.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    /// Apply an incoming CC to every controller bound to it whose channel
    /// matches (controllers without a channel accept any). Returns how many
    /// controllers were updated.
    pub fn dispatch_cc(&mut self, channel: u8, cc: u8, value: u8) -> usize {
        let targets: Vec<Arc<Controller>> = self
            .lookup(cc)
            .into_iter()
            .filter(|ctrl| ctrl.channel().map_or(true, |ch| ch == channel))
            .collect();
        for ctrl in &targets {
            ctrl.set_midi_value(value);
        }
        self.prune();
        targets.len()
    }

    /// Drop entries whose controller has been destroyed.
    pub fn prune(&mut self) {
        for entries in self.by_cc.values_mut() {
            entries.retain(|w| w.strong_count() > 0);
        }
        self.by_cc.retain(|_, entries| !entries.is_empty());
    }

    /// Number of live associations.
    pub fn len(&self) -> usize {
        self.by_cc
            .values()
            .map(|entries| entries.iter().filter(|w| w.strong_count() > 0).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
