//! Reconciling an engine's controller table against a processor's live set.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use synthctl_types::ControllerSpec;

use crate::address::{resolve, AddressError, ResolvedAddress, TemplateVars};
use crate::controller::{Binding, Controller};
use crate::learn::MidiLearnRegistry;

/// Ordered `symbol -> controller` map. Iteration order is the declaration
/// order of the spec table the set was last built from.
#[derive(Debug, Default)]
pub struct ControllerSet {
    order: Vec<String>,
    by_symbol: HashMap<String, Arc<Controller>>,
}

impl ControllerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<&Arc<Controller>> {
        self.by_symbol.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.by_symbol.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Controller>> {
        self.order.iter().filter_map(|s| self.by_symbol.get(s))
    }

    fn insert(&mut self, ctrl: Arc<Controller>) {
        let symbol = ctrl.symbol().to_string();
        if self.by_symbol.insert(symbol.clone(), ctrl).is_none() {
            self.order.push(symbol);
        }
    }

    fn remove(&mut self, symbol: &str) -> Option<Arc<Controller>> {
        let removed = self.by_symbol.remove(symbol)?;
        self.order.retain(|s| s != symbol);
        Some(removed)
    }

    /// Remove every controller, dropping their learn associations.
    pub fn clear(&mut self, learn: &mut MidiLearnRegistry) {
        for ctrl in self.by_symbol.values() {
            learn.forget(ctrl);
        }
        self.order.clear();
        self.by_symbol.clear();
    }

    fn reorder(&mut self, specs: &[ControllerSpec]) {
        let mut order: Vec<String> = Vec::with_capacity(self.order.len());
        for spec in specs {
            if self.by_symbol.contains_key(&spec.symbol) && !order.contains(&spec.symbol) {
                order.push(spec.symbol.clone());
            }
        }
        self.order = order;
    }
}

/// What a build pass did, by symbol.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BuildReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub skipped: Vec<(String, AddressError)>,
}

/// Builds or refreshes a processor's controllers from an engine's spec table.
pub struct ControllerSetBuilder<'a> {
    engine: &'a str,
    specs: &'a [ControllerSpec],
    vars: TemplateVars,
    osc_port: Option<u16>,
    reset_values: bool,
}

impl<'a> ControllerSetBuilder<'a> {
    pub fn new(engine: &'a str, specs: &'a [ControllerSpec], channel: Option<u8>) -> Self {
        Self {
            engine,
            specs,
            vars: TemplateVars::new(channel, None),
            osc_port: None,
            reset_values: false,
        }
    }

    pub fn part_index(mut self, part_index: Option<u32>) -> Self {
        self.vars.part_index = part_index;
        self
    }

    /// Port OSC controllers should report in their `osc_port` option.
    pub fn osc_port(mut self, port: Option<u16>) -> Self {
        self.osc_port = port;
        self
    }

    /// Return existing controllers to their default value while rebuilding.
    pub fn reset_values(mut self, reset: bool) -> Self {
        self.reset_values = reset;
        self
    }

    /// Reconcile `set` against the spec table.
    ///
    /// Stale symbols are removed, existing controllers are rebound in place
    /// (value and listeners survive), new ones are created at their default.
    /// A spec whose address cannot be resolved is skipped; if it was bound
    /// before, its controller is removed.
    pub fn build(&self, set: &mut ControllerSet, learn: &mut MidiLearnRegistry) -> BuildReport {
        let mut report = BuildReport::default();

        let wanted: HashSet<&str> = self.specs.iter().map(|s| s.symbol.as_str()).collect();
        let stale: Vec<String> = set
            .symbols()
            .filter(|s| !wanted.contains(s))
            .map(str::to_string)
            .collect();
        for symbol in stale {
            if let Some(ctrl) = set.remove(&symbol) {
                learn.forget(&ctrl);
                log::debug!(target: "controllers", "{}: removed stale controller {}", self.engine, symbol);
                report.removed.push(symbol);
            }
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for spec in self.specs {
            if !seen.insert(spec.symbol.as_str()) {
                log::warn!(target: "controllers", "{}: duplicate controller symbol {}, keeping the first", self.engine, spec.symbol);
                continue;
            }

            let address = match resolve(&spec.address, &self.vars) {
                Ok(address) => address,
                Err(e) => {
                    log::warn!(target: "controllers", "{}: skipping controller {}: {}", self.engine, spec.symbol, e);
                    if let Some(ctrl) = set.remove(&spec.symbol) {
                        learn.forget(&ctrl);
                        report.removed.push(spec.symbol.clone());
                    }
                    report.skipped.push((spec.symbol.clone(), e));
                    continue;
                }
            };
            if let ResolvedAddress::Osc(ref path) = address {
                log::debug!(target: "controllers", "{}: controller {} OSC path => {}", self.engine, spec.symbol, path);
            }

            let binding = Binding {
                spec: spec.clone(),
                channel: self.vars.channel,
                range: spec.effective_range(),
                options: self.options_for(&address),
                address,
            };

            let ctrl = match set.get(&spec.symbol) {
                Some(existing) => {
                    let existing = Arc::clone(existing);
                    existing.rebind(binding);
                    if self.reset_values {
                        existing.reset();
                    }
                    report.updated.push(spec.symbol.clone());
                    existing
                }
                None => {
                    let ctrl = Arc::new(Controller::new(binding));
                    set.insert(Arc::clone(&ctrl));
                    report.created.push(spec.symbol.clone());
                    ctrl
                }
            };

            match ctrl.midi_cc() {
                Some(cc) => learn.register(cc, &ctrl),
                None => learn.forget(&ctrl),
            }
        }

        set.reorder(self.specs);
        report
    }

    fn options_for(&self, address: &ResolvedAddress) -> BTreeMap<String, String> {
        let mut options = BTreeMap::new();
        options.insert("engine".to_string(), self.engine.to_string());
        if let (ResolvedAddress::Osc(_), Some(port)) = (address, self.osc_port) {
            if port > 0 {
                options.insert("osc_port".to_string(), port.to_string());
            }
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_specs() -> Vec<ControllerSpec> {
        vec![
            ControllerSpec::osc("cutoff", "/eng/${channel}/cutoff")
                .with_range(0.0, 127.0, 64.0)
                .in_group("filter"),
            ControllerSpec::cc("reso", 70)
                .with_range(0.0, 127.0, 0.0)
                .in_group("filter"),
        ]
    }

    #[test]
    fn resolves_addresses_for_channel() {
        let specs = scenario_specs();
        let mut set = ControllerSet::new();
        let mut learn = MidiLearnRegistry::new();
        let report = ControllerSetBuilder::new("eng", &specs, Some(3)).build(&mut set, &mut learn);

        assert_eq!(report.created, vec!["cutoff", "reso"]);
        assert_eq!(
            set.get("cutoff").unwrap().address(),
            ResolvedAddress::Osc("/eng/3/cutoff".into())
        );
        assert_eq!(set.get("reso").unwrap().address(), ResolvedAddress::Cc(70));
        assert_eq!(set.get("cutoff").unwrap().value(), 64.0);
        assert_eq!(learn.lookup(70).len(), 1);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let specs = scenario_specs();
        let mut set = ControllerSet::new();
        let mut learn = MidiLearnRegistry::new();
        let builder = ControllerSetBuilder::new("eng", &specs, Some(3));
        builder.build(&mut set, &mut learn);
        let cutoff = Arc::clone(set.get("cutoff").unwrap());
        cutoff.set_value(100.0);

        let report = builder.build(&mut set, &mut learn);
        assert!(report.created.is_empty());
        assert!(report.removed.is_empty());
        assert_eq!(report.updated, vec!["cutoff", "reso"]);
        assert_eq!(set.symbols().collect::<Vec<_>>(), vec!["cutoff", "reso"]);
        assert!(Arc::ptr_eq(&cutoff, set.get("cutoff").unwrap()));
        assert_eq!(set.get("cutoff").unwrap().value(), 100.0);
        assert_eq!(learn.len(), 1);
    }

    #[test]
    fn forced_reset_restores_defaults() {
        let specs = scenario_specs();
        let mut set = ControllerSet::new();
        let mut learn = MidiLearnRegistry::new();
        ControllerSetBuilder::new("eng", &specs, Some(3)).build(&mut set, &mut learn);
        set.get("cutoff").unwrap().set_value(1.0);
        ControllerSetBuilder::new("eng", &specs, Some(3))
            .reset_values(true)
            .build(&mut set, &mut learn);
        assert_eq!(set.get("cutoff").unwrap().value(), 64.0);
    }

    #[test]
    fn removing_a_spec_removes_exactly_that_controller() {
        let mut specs = scenario_specs();
        specs.push(ControllerSpec::cc("vol", 7));
        let mut set = ControllerSet::new();
        let mut learn = MidiLearnRegistry::new();
        ControllerSetBuilder::new("eng", &specs, Some(0)).build(&mut set, &mut learn);
        let cutoff = Arc::clone(set.get("cutoff").unwrap());

        specs.retain(|s| s.symbol != "reso");
        let report = ControllerSetBuilder::new("eng", &specs, Some(0)).build(&mut set, &mut learn);
        assert_eq!(report.removed, vec!["reso"]);
        assert_eq!(set.symbols().collect::<Vec<_>>(), vec!["cutoff", "vol"]);
        assert!(Arc::ptr_eq(&cutoff, set.get("cutoff").unwrap()));
        assert!(learn.lookup(70).is_empty());
        assert_eq!(learn.lookup(7).len(), 1);
    }

    #[test]
    fn channel_change_rebinds_in_place() {
        let specs = scenario_specs();
        let mut set = ControllerSet::new();
        let mut learn = MidiLearnRegistry::new();
        ControllerSetBuilder::new("eng", &specs, Some(3)).build(&mut set, &mut learn);
        let cutoff = Arc::clone(set.get("cutoff").unwrap());
        cutoff.set_value(99.0);

        ControllerSetBuilder::new("eng", &specs, Some(5)).build(&mut set, &mut learn);
        assert_eq!(cutoff.osc_path().as_deref(), Some("/eng/5/cutoff"));
        assert_eq!(cutoff.channel(), Some(5));
        assert_eq!(cutoff.value(), 99.0);
    }

    #[test]
    fn unresolvable_spec_is_skipped_others_bind() {
        let specs = vec![
            ControllerSpec::osc("part", "/part/${part_index}/vol"),
            ControllerSpec::cc("mod", 1),
        ];
        let mut set = ControllerSet::new();
        let mut learn = MidiLearnRegistry::new();
        let report = ControllerSetBuilder::new("eng", &specs, Some(0)).build(&mut set, &mut learn);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "part");
        assert_eq!(set.symbols().collect::<Vec<_>>(), vec!["mod"]);

        let report = ControllerSetBuilder::new("eng", &specs, Some(0))
            .part_index(Some(2))
            .build(&mut set, &mut learn);
        assert!(report.skipped.is_empty());
        assert_eq!(
            set.get("part").unwrap().osc_path().as_deref(),
            Some("/part/2/vol")
        );
        assert_eq!(set.symbols().collect::<Vec<_>>(), vec!["part", "mod"]);
    }

    #[test]
    fn osc_controllers_carry_port_option() {
        let specs = scenario_specs();
        let mut set = ControllerSet::new();
        let mut learn = MidiLearnRegistry::new();
        ControllerSetBuilder::new("eng", &specs, Some(3))
            .osc_port(Some(9000))
            .build(&mut set, &mut learn);
        assert_eq!(set.get("cutoff").unwrap().option("osc_port").as_deref(), Some("9000"));
        assert_eq!(set.get("reso").unwrap().option("osc_port"), None);
        assert_eq!(set.get("reso").unwrap().option("engine").as_deref(), Some("eng"));
    }

    #[test]
    fn duplicate_symbols_keep_first() {
        let specs = vec![ControllerSpec::cc("a", 1), ControllerSpec::cc("a", 2)];
        let mut set = ControllerSet::new();
        let mut learn = MidiLearnRegistry::new();
        ControllerSetBuilder::new("eng", &specs, Some(0)).build(&mut set, &mut learn);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("a").unwrap().midi_cc(), Some(1));
    }
}
