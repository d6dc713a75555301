//! Typed accessors over string-valued options
//!
//! Values stay plain strings on the wire and in the tree; these helpers
//! interpret them at the boundary.

use super::node::CfgTree;

/// Parse the usual boolean spellings; `None` for anything else.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

pub fn parse_i64(value: &str) -> Option<i64> {
    value.trim().parse().ok()
}

/// Comma-separated list, trimmed, empty items dropped.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl CfgTree {
    pub fn option_as_bool(&self, path: &str) -> Option<bool> {
        parse_bool(self.option_value(path)?)
    }

    pub fn option_as_i64(&self, path: &str) -> Option<i64> {
        parse_i64(self.option_value(path)?)
    }

    pub fn option_as_list(&self, path: &str) -> Option<Vec<String>> {
        Some(parse_list(self.option_value(path)?))
    }
}
