//! Tri-state claim flags scoped by context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Context every flag falls back to.
pub const GLOBAL_CONTEXT: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tristate {
    True,
    False,
    #[default]
    Undefined,
}

impl Tristate {
    pub fn from_bool(value: bool) -> Self {
        if value { Tristate::True } else { Tristate::False }
    }
}

/// Flag values per context: `context -> flag -> value`.
///
/// Undefined values are never stored; setting a flag to `Undefined` clears it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimFlags(BTreeMap<String, BTreeMap<String, Tristate>>);

impl ClaimFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, flag: &str, context: &str, value: Tristate) {
        if value == Tristate::Undefined {
            if let Some(entries) = self.0.get_mut(context) {
                entries.remove(flag);
                if entries.is_empty() {
                    self.0.remove(context);
                }
            }
            return;
        }
        self.0
            .entry(context.to_string())
            .or_default()
            .insert(flag.to_string(), value);
    }

    /// Value stored for exactly this context.
    pub fn get(&self, flag: &str, context: &str) -> Tristate {
        self.0
            .get(context)
            .and_then(|entries| entries.get(flag))
            .copied()
            .unwrap_or_default()
    }

    /// Resolve a flag for a set of active contexts, most specific first,
    /// falling back to the global context.
    pub fn resolve(&self, flag: &str, contexts: &[&str]) -> Tristate {
        contexts
            .iter()
            .copied()
            .chain(std::iter::once(GLOBAL_CONTEXT))
            .map(|ctx| self.get(flag, ctx))
            .find(|v| *v != Tristate::Undefined)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `(context, flag, value)` triples in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, Tristate)> {
        self.0.iter().flat_map(|(ctx, entries)| {
            entries
                .iter()
                .map(move |(flag, value)| (ctx.as_str(), flag.as_str(), *value))
        })
    }
}

impl FromIterator<(String, Tristate)> for ClaimFlags {
    /// Collects global-context flags.
    fn from_iter<T: IntoIterator<Item = (String, Tristate)>>(iter: T) -> Self {
        let mut flags = ClaimFlags::new();
        for (flag, value) in iter {
            flags.set(&flag, GLOBAL_CONTEXT, value);
        }
        flags
    }
}
