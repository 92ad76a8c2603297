use serde::*;

/// Settings that shape how a bridge accepts module registrations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Module name prefixes that the native side is expected to strip
    /// before announcing a module. Names which still carry one are rejected.
    pub reserved_prefixes: Vec<String>
}

impl BridgeOptions {
    /// Adds a reserved prefix, returning the modified options.
    pub fn with_reserved_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reserved_prefixes.push(prefix.into());
        self
    }

    /// Removes the first reserved prefix from the given name, if it carries one.
    pub fn strip_reserved_prefix<'a>(&self, name: &'a str) -> &'a str {
        self.reserved_prefixes.iter()
            .find_map(|prefix| name.strip_prefix(prefix.as_str()))
            .unwrap_or(name)
    }
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            reserved_prefixes: vec!["RCT".to_string(), "RK".to_string()]
        }
    }
}
