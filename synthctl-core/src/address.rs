//! Channel-dependent address resolution for controller specs.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use synthctl_types::{AddressSpec, MIDI_CC_MAX};

/// `${name}` or `$name`.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{(\w+)\}|([A-Za-z_]\w*))").expect("placeholder pattern is valid")
});

/// A spec address with every placeholder substituted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResolvedAddress {
    Cc(u8),
    Osc(String),
}

impl ResolvedAddress {
    pub fn cc(&self) -> Option<u8> {
        match self {
            ResolvedAddress::Cc(cc) => Some(*cc),
            ResolvedAddress::Osc(_) => None,
        }
    }

    pub fn osc_path(&self) -> Option<&str> {
        match self {
            ResolvedAddress::Osc(path) => Some(path),
            ResolvedAddress::Cc(_) => None,
        }
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedAddress::Cc(cc) => write!(f, "CC {}", cc),
            ResolvedAddress::Osc(path) => f.write_str(path),
        }
    }
}

/// Why a spec address could not be bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The template needs a variable the processor does not provide.
    MissingVariable { template: String, variable: String },
    /// The template names a variable nobody knows about.
    UnknownVariable { template: String, variable: String },
    CcOutOfRange(u8),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::MissingVariable { template, variable } => {
                write!(f, "'{}' needs ${{{}}}, which is not set", template, variable)
            }
            AddressError::UnknownVariable { template, variable } => {
                write!(f, "'{}' uses unknown variable ${{{}}}", template, variable)
            }
            AddressError::CcOutOfRange(cc) => {
                write!(f, "CC {} is outside 0..={}", cc, MIDI_CC_MAX)
            }
        }
    }
}

impl std::error::Error for AddressError {}

/// Values available to address templates when binding a processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemplateVars {
    pub channel: Option<u8>,
    pub part_index: Option<u32>,
}

impl TemplateVars {
    pub fn new(channel: Option<u8>, part_index: Option<u32>) -> Self {
        Self {
            channel,
            part_index,
        }
    }

    fn lookup(&self, template: &str, name: &str) -> Result<String, AddressError> {
        let value = match name {
            "channel" | "ch" => self.channel.map(|c| c.to_string()),
            "part_index" | "i" => self.part_index.map(|i| i.to_string()),
            _ => {
                return Err(AddressError::UnknownVariable {
                    template: template.to_string(),
                    variable: name.to_string(),
                })
            }
        };
        value.ok_or_else(|| AddressError::MissingVariable {
            template: template.to_string(),
            variable: name.to_string(),
        })
    }
}

/// Substitute every placeholder in `template`.
pub fn substitute(template: &str, vars: &TemplateVars) -> Result<String, AddressError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        out.push_str(&template[last..whole.start()]);
        out.push_str(&vars.lookup(template, name)?);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Resolve a spec address for a processor. CC numbers pass through unchanged.
pub fn resolve(address: &AddressSpec, vars: &TemplateVars) -> Result<ResolvedAddress, AddressError> {
    match address {
        AddressSpec::Cc(cc) if *cc > MIDI_CC_MAX => Err(AddressError::CcOutOfRange(*cc)),
        AddressSpec::Cc(cc) => Ok(ResolvedAddress::Cc(*cc)),
        AddressSpec::Osc(template) => substitute(template, vars).map(ResolvedAddress::Osc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_braced_and_bare_forms() {
        let vars = TemplateVars::new(Some(3), Some(1));
        assert_eq!(substitute("/eng/${channel}/cutoff", &vars).unwrap(), "/eng/3/cutoff");
        assert_eq!(substitute("/part$i/ch$ch", &vars).unwrap(), "/part1/ch3");
        assert_eq!(
            substitute("/${part_index}/${ch}/x", &vars).unwrap(),
            "/1/3/x"
        );
    }

    #[test]
    fn template_without_placeholders_is_unchanged() {
        let vars = TemplateVars::default();
        assert_eq!(substitute("/master/volume", &vars).unwrap(), "/master/volume");
    }

    #[test]
    fn missing_variable_is_reported() {
        let vars = TemplateVars::new(None, None);
        let err = substitute("/eng/${channel}/cutoff", &vars).unwrap_err();
        assert_eq!(
            err,
            AddressError::MissingVariable {
                template: "/eng/${channel}/cutoff".into(),
                variable: "channel".into()
            }
        );
    }

    #[test]
    fn unknown_variable_is_reported() {
        let vars = TemplateVars::new(Some(0), None);
        assert!(matches!(
            substitute("/x/${bank}", &vars),
            Err(AddressError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn cc_passes_through() {
        let vars = TemplateVars::new(Some(9), None);
        assert_eq!(resolve(&AddressSpec::Cc(70), &vars).unwrap(), ResolvedAddress::Cc(70));
        assert_eq!(
            resolve(&AddressSpec::Cc(200), &vars).unwrap_err(),
            AddressError::CcOutOfRange(200)
        );
    }
}
