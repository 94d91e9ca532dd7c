//! EUI prefix classification.

use crate::config::PrefixRule;
use crate::db::DeviceType;

/// Maps device EUIs to sensor families using a configurable prefix table.
#[derive(Debug, Clone)]
pub struct DeviceClassifier {
    rules: Vec<PrefixRule>,
}

impl DeviceClassifier {
    pub fn new(rules: &[PrefixRule]) -> Self {
        let rules = rules
            .iter()
            .map(|rule| PrefixRule {
                prefix: normalize_eui(&rule.prefix),
                device_type: rule.device_type,
            })
            .filter(|rule| !rule.prefix.is_empty())
            .collect();
        Self { rules }
    }

    /// Classify an EUI. The longest matching prefix wins; among equally long
    /// matches the rule declared first wins. No match yields `Unknown`.
    pub fn classify(&self, eui: &str) -> DeviceType {
        let eui = normalize_eui(eui);
        let mut best: Option<&PrefixRule> = None;
        for rule in &self.rules {
            if !eui.starts_with(&rule.prefix) {
                continue;
            }
            match best {
                Some(current) if current.prefix.len() >= rule.prefix.len() => {}
                _ => best = Some(rule),
            }
        }
        best.map(|rule| rule.device_type)
            .unwrap_or(DeviceType::Unknown)
    }
}

/// Canonical EUI form: trimmed, separators removed, upper-case hex.
pub fn normalize_eui(eui: &str) -> String {
    eui.trim()
        .chars()
        .filter(|c| !matches!(c, '-' | ':' | ' '))
        .collect::<String>()
        .to_uppercase()
}
