//! Live controllers: a spec bound to a channel and a resolved address.
//!
//! Values are shared between the thread issuing engine commands, the OSC
//! feedback thread and MIDI dispatch, so the current value lives in an atomic
//! (f32 bits) and the binding behind a short-lived `RwLock`. Listeners are
//! snapshotted and invoked with no lock held.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};

use synthctl_types::{ControllerSpec, ValueRange, MIDI_CC_MAX};

use crate::address::ResolvedAddress;

/// Change callback: `(controller, new_value)`.
pub type ValueListener = Arc<dyn Fn(&Controller, f32) + Send + Sync>;

/// Handle returned by [`Controller::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Everything a rebuild may change on an existing controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub spec: ControllerSpec,
    pub channel: Option<u8>,
    pub address: ResolvedAddress,
    pub range: ValueRange,
    pub options: BTreeMap<String, String>,
}

pub struct Controller {
    symbol: String,
    binding: RwLock<Binding>,
    value: AtomicU32,
    listeners: Mutex<Vec<(ListenerId, ValueListener)>>,
    next_listener: AtomicU64,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("symbol", &self.symbol)
            .field("address", &self.address())
            .field("channel", &self.channel())
            .field("value", &self.value())
            .finish()
    }
}

impl Controller {
    /// Create a controller seeded with the binding's default value.
    pub fn new(binding: Binding) -> Self {
        let initial = quantize(&binding, binding.range.default);
        Self {
            symbol: binding.spec.symbol.clone(),
            binding: RwLock::new(binding),
            value: AtomicU32::new(initial.to_bits()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    fn binding(&self) -> RwLockReadGuard<'_, Binding> {
        self.binding.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the current binding.
    pub fn snapshot(&self) -> Binding {
        self.binding().clone()
    }

    pub fn name(&self) -> String {
        self.binding().spec.display_name().to_string()
    }

    pub fn channel(&self) -> Option<u8> {
        self.binding().channel
    }

    pub fn address(&self) -> ResolvedAddress {
        self.binding().address.clone()
    }

    pub fn midi_cc(&self) -> Option<u8> {
        self.binding().address.cc()
    }

    pub fn osc_path(&self) -> Option<String> {
        self.binding().address.osc_path().map(str::to_string)
    }

    pub fn range(&self) -> ValueRange {
        self.binding().range
    }

    pub fn group_key(&self) -> Option<String> {
        self.binding().spec.group_key.clone()
    }

    pub fn group_title(&self) -> Option<String> {
        self.binding().spec.group_title.clone()
    }

    pub fn visible_in_ui(&self) -> bool {
        self.binding().spec.visible_in_ui
    }

    pub fn graph_path(&self) -> Option<String> {
        self.binding().spec.graph_path.clone()
    }

    pub fn option(&self, key: &str) -> Option<String> {
        self.binding().options.get(key).cloned()
    }

    pub fn options(&self) -> BTreeMap<String, String> {
        self.binding().options.clone()
    }

    pub fn value(&self) -> f32 {
        f32::from_bits(self.value.load(Ordering::Acquire))
    }

    /// Display label for the current value, if the spec declares labels.
    pub fn value_label(&self) -> Option<String> {
        let binding = self.binding();
        binding
            .spec
            .label_for(&binding.range, self.value())
            .map(str::to_string)
    }

    /// Clamp (and for CC controllers, round) `value`, store it, and notify
    /// listeners if it changed. Returns the stored value.
    pub fn set_value(&self, value: f32) -> f32 {
        let value = {
            let binding = self.binding();
            quantize(&binding, binding.range.clamp(value))
        };
        let previous = f32::from_bits(self.value.swap(value.to_bits(), Ordering::AcqRel));
        if previous != value {
            self.notify(value);
        }
        value
    }

    /// Apply a 7-bit MIDI value, scaled onto the controller's range.
    pub fn set_midi_value(&self, midi: u8) -> f32 {
        let range = self.range();
        let fraction = midi.min(MIDI_CC_MAX) as f32 / MIDI_CC_MAX as f32;
        self.set_value(range.min + fraction * range.span())
    }

    /// Current value scaled to 0..=127.
    pub fn midi_value(&self) -> u8 {
        let range = self.range();
        (range.normalize(self.value()) * MIDI_CC_MAX as f32).round() as u8
    }

    /// Return to the binding's default value.
    pub fn reset(&self) -> f32 {
        let default = self.range().default;
        self.set_value(default)
    }

    /// Replace the binding in place. The current value survives; it is only
    /// clamped if the new range no longer contains it.
    pub fn rebind(&self, binding: Binding) {
        let clamped = {
            let mut guard = self.binding.write().unwrap_or_else(|e| e.into_inner());
            *guard = binding;
            let current = self.value();
            let clamped = quantize(&guard, guard.range.clamp(current));
            (clamped != current).then_some(clamped)
        };
        if let Some(value) = clamped {
            self.value.store(value.to_bits(), Ordering::Release);
            self.notify(value);
        }
    }

    pub fn subscribe(&self, listener: ValueListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn notify(&self, value: f32) {
        let listeners: Vec<ValueListener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(self, value);
        }
    }
}

/// CC-addressed controllers carry integer values.
fn quantize(binding: &Binding, value: f32) -> f32 {
    match binding.address {
        ResolvedAddress::Cc(_) => value.round(),
        ResolvedAddress::Osc(_) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn binding(spec: ControllerSpec, address: ResolvedAddress) -> Binding {
        let range = spec.effective_range();
        Binding {
            spec,
            channel: Some(0),
            address,
            range,
            options: BTreeMap::new(),
        }
    }

    #[test]
    fn seeded_with_default() {
        let spec = ControllerSpec::cc("vol", 7).with_range(0.0, 127.0, 100.0);
        let ctrl = Controller::new(binding(spec, ResolvedAddress::Cc(7)));
        assert_eq!(ctrl.value(), 100.0);
        assert_eq!(ctrl.midi_cc(), Some(7));
        assert_eq!(ctrl.osc_path(), None);
    }

    #[test]
    fn set_value_clamps_and_rounds_cc() {
        let ctrl = Controller::new(binding(ControllerSpec::cc("vol", 7), ResolvedAddress::Cc(7)));
        assert_eq!(ctrl.set_value(300.0), 127.0);
        assert_eq!(ctrl.set_value(10.4), 10.0);
        assert_eq!(ctrl.set_value(-5.0), 0.0);
    }

    #[test]
    fn osc_values_stay_fractional() {
        let spec = ControllerSpec::osc("gain", "/gain").with_range(0.0, 1.0, 0.5);
        let ctrl = Controller::new(binding(spec, ResolvedAddress::Osc("/gain".into())));
        assert_eq!(ctrl.set_value(0.25), 0.25);
    }

    #[test]
    fn listeners_fire_only_on_change() {
        let ctrl = Controller::new(binding(ControllerSpec::cc("vol", 7), ResolvedAddress::Cc(7)));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = ctrl.subscribe(Arc::new(move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        ctrl.set_value(10.0);
        ctrl.set_value(10.0);
        ctrl.set_value(11.0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(ctrl.unsubscribe(id));
        ctrl.set_value(12.0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_may_reenter_controller() {
        let ctrl = Arc::new(Controller::new(binding(
            ControllerSpec::cc("vol", 7),
            ResolvedAddress::Cc(7),
        )));
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        ctrl.subscribe(Arc::new(move |c, v| {
            // Reading back from inside a callback must not deadlock.
            assert_eq!(c.value(), v);
            s.store(c.listener_count(), Ordering::SeqCst);
        }));
        ctrl.set_value(42.0);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rebind_preserves_value_inside_new_range() {
        let ctrl = Controller::new(binding(ControllerSpec::cc("vol", 7), ResolvedAddress::Cc(7)));
        ctrl.set_value(90.0);
        let mut b = ctrl.snapshot();
        b.address = ResolvedAddress::Cc(11);
        b.channel = Some(4);
        ctrl.rebind(b);
        assert_eq!(ctrl.value(), 90.0);
        assert_eq!(ctrl.midi_cc(), Some(11));
        assert_eq!(ctrl.channel(), Some(4));

        let mut b = ctrl.snapshot();
        b.range = ValueRange::new(0.0, 64.0, 0.0);
        ctrl.rebind(b);
        assert_eq!(ctrl.value(), 64.0);
    }

    #[test]
    fn midi_scaling_round_trips_endpoints() {
        let spec = ControllerSpec::osc("gain", "/gain").with_range(0.0, 2.0, 0.0);
        let ctrl = Controller::new(binding(spec, ResolvedAddress::Osc("/gain".into())));
        ctrl.set_midi_value(127);
        assert_eq!(ctrl.value(), 2.0);
        assert_eq!(ctrl.midi_value(), 127);
        ctrl.set_midi_value(0);
        assert_eq!(ctrl.midi_value(), 0);
    }

    #[test]
    fn value_label_follows_value() {
        let spec = ControllerSpec::osc("mode", "/mode").with_labels(["off", "on", "auto"]);
        let ctrl = Controller::new(binding(spec, ResolvedAddress::Osc("/mode".into())));
        assert_eq!(ctrl.value_label().as_deref(), Some("off"));
        ctrl.set_value(2.0);
        assert_eq!(ctrl.value_label().as_deref(), Some("auto"));
    }
}
