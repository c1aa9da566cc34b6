use serde::{Deserialize, Serialize};

/// Highest valid MIDI CC number and value.
pub const MIDI_CC_MAX: u8 = 127;

/// Where a controller's value goes: a MIDI CC number, or an OSC path template.
///
/// Templates may reference `${channel}` (alias `${ch}`) and `${part_index}`
/// (alias `${i}`); both the braced and bare `$name` forms are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressSpec {
    Cc(u8),
    Osc(String),
}

impl AddressSpec {
    pub fn is_osc(&self) -> bool {
        matches!(self, AddressSpec::Osc(_))
    }
}

impl From<u8> for AddressSpec {
    fn from(cc: u8) -> Self {
        AddressSpec::Cc(cc)
    }
}

impl From<&str> for AddressSpec {
    fn from(path: &str) -> Self {
        AddressSpec::Osc(path.to_string())
    }
}

/// Numeric range of a controller: `(min, max, default)`.
///
/// Serialized as a three-element array so tables read like `range = [0, 127, 64]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct ValueRange {
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl ValueRange {
    pub fn new(min: f32, max: f32, default: f32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            default: default.clamp(min, max),
        }
    }

    /// Full 7-bit MIDI range with a zero default.
    pub fn midi() -> Self {
        Self::new(0.0, MIDI_CC_MAX as f32, 0.0)
    }

    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    /// Position of `value` within the range, 0.0..=1.0.
    pub fn normalize(&self, value: f32) -> f32 {
        if self.span() <= 0.0 {
            return 0.0;
        }
        (self.clamp(value) - self.min) / self.span()
    }
}

impl Default for ValueRange {
    fn default() -> Self {
        Self::midi()
    }
}

impl From<[f32; 3]> for ValueRange {
    fn from(v: [f32; 3]) -> Self {
        ValueRange::new(v[0], v[1], v[2])
    }
}

impl From<ValueRange> for [f32; 3] {
    fn from(r: ValueRange) -> Self {
        [r.min, r.max, r.default]
    }
}

fn default_visible() -> bool {
    true
}

/// Declarative description of one engine control.
///
/// Engines ship a static, ordered table of these. Optional fields cover every
/// combination the tables use: CC or OSC addressing, with or without a custom
/// range, with or without value labels or an explicit graph path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSpec {
    pub symbol: String,
    /// Display name; falls back to `symbol`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub address: AddressSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<ValueRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_labels: Vec<String>,
    #[serde(default, alias = "group", skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_title: Option<String>,
    #[serde(default = "default_visible")]
    pub visible_in_ui: bool,
    /// Path of the parameter in the engine's plugin graph, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_path: Option<String>,
}

impl ControllerSpec {
    pub fn new(symbol: impl Into<String>, address: impl Into<AddressSpec>) -> Self {
        Self {
            symbol: symbol.into(),
            name: None,
            address: address.into(),
            range: None,
            value_labels: Vec::new(),
            group_key: None,
            group_title: None,
            visible_in_ui: true,
            graph_path: None,
        }
    }

    pub fn cc(symbol: impl Into<String>, cc: u8) -> Self {
        Self::new(symbol, AddressSpec::Cc(cc))
    }

    pub fn osc(symbol: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(symbol, AddressSpec::Osc(template.into()))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_range(mut self, min: f32, max: f32, default: f32) -> Self {
        self.range = Some(ValueRange::new(min, max, default));
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.value_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn in_group(mut self, key: impl Into<String>) -> Self {
        self.group_key = Some(key.into());
        self
    }

    pub fn with_group_title(mut self, title: impl Into<String>) -> Self {
        self.group_title = Some(title.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible_in_ui = false;
        self
    }

    pub fn with_graph_path(mut self, path: impl Into<String>) -> Self {
        self.graph_path = Some(path.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.symbol)
    }

    /// Range used when binding: the declared one, else one derived from the
    /// labels (OSC only), else the MIDI range.
    pub fn effective_range(&self) -> ValueRange {
        if let Some(range) = self.range {
            return range;
        }
        if self.address.is_osc() && !self.value_labels.is_empty() {
            return ValueRange::new(0.0, (self.value_labels.len() - 1) as f32, 0.0);
        }
        ValueRange::midi()
    }

    /// Label for `value`, spreading the labels evenly across `range`.
    pub fn label_for(&self, range: &ValueRange, value: f32) -> Option<&str> {
        if self.value_labels.is_empty() {
            return None;
        }
        let last = self.value_labels.len() - 1;
        let index = (range.normalize(value) * last as f32).round() as usize;
        self.value_labels.get(index.min(last)).map(String::as_str)
    }
}
