//! Condition expressions used by conditional maps, `#?` boolean suffixes
//! and `#{...}` interpolation.
//!
//! A condition names a module and a member path inside its exports,
//! written `module|member.path`, optionally negated with `~`.

use serde_json::{json, Value};
use std::sync::OnceLock;

/// The environment module that backs the short condition names.
pub const SYSTEM_ENV: &str = "@system-env";

/// Sentinel module id for resolutions that yield nothing.
pub const EMPTY_MODULE: &str = "@empty";

const SYS_CONDITIONS: [&str; 6] = ["browser", "node", "dev", "build", "production", "default"];

/// Host environment flags exposed as the [`SYSTEM_ENV`] module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemEnv {
    pub browser: bool,
    pub node: bool,
    pub production: bool,
    pub builder: bool,
}

impl SystemEnv {
    /// The module exports: builds are never `production` and always `dev`.
    #[must_use]
    pub fn exports(&self) -> Value {
        json!({
            "browser": self.browser,
            "node": self.node,
            "production": !self.builder && self.production,
            "dev": self.builder || !self.production,
            "build": self.builder,
            "default": true,
        })
    }
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub module: String,
    pub prop: String,
    pub negate: bool,
}

/// Parse `module|prop`, `module|~prop`, `~prop` or a bare module.
///
/// Bare environment names (`browser`, `~node`, ...) read from
/// [`SYSTEM_ENV`]. A bare module reads its `default` member.
#[must_use]
pub fn parse_condition(condition: &str) -> Condition {
    let (module, prop, negate) = match condition.rfind('|') {
        Some(idx) => {
            let export = &condition[idx + 1..];
            match export.strip_prefix('~') {
                Some(rest) => (&condition[..idx], rest, true),
                None => (&condition[..idx], export, false),
            }
        }
        None => {
            let (negate, module) = match condition.strip_prefix('~') {
                Some(rest) => (true, rest),
                None => (false, condition),
            };
            if SYS_CONDITIONS.contains(&module) {
                ("", module, negate)
            } else {
                (module, "default", negate)
            }
        }
    };

    Condition {
        module: if module.is_empty() { SYSTEM_ENV } else { module }.to_string(),
        prop: prop.to_string(),
        negate,
    }
}

/// Render a condition back into `module|prop` form.
#[must_use]
pub fn serialize_condition(condition: &Condition) -> String {
    let tilde = if condition.negate { "~" } else { "" };
    format!("{}|{tilde}{}", condition.module, condition.prop)
}

/// Walk a dotted member path through a JSON value.
#[must_use]
pub fn read_member_expression<'v>(path: &str, value: &'v Value) -> Option<&'v Value> {
    path.split('.').try_fold(value, |current, part| current.get(part))
}

/// JavaScript-style truthiness.
#[must_use]
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}

/// Matches a single `#{...}` interpolation.
pub fn interpolation_regex() -> &'static regex_lite::Regex {
    static RE: OnceLock<regex_lite::Regex> = OnceLock::new();
    RE.get_or_init(|| regex_lite::Regex::new(r"#\{[^\}]+\}").expect("interpolation pattern"))
}

/// Split `name#?condition` at the last `#?`.
#[must_use]
pub fn split_boolean_condition(name: &str) -> Option<(&str, &str)> {
    name.rfind("#?").map(|idx| (&name[..idx], &name[idx + 2..]))
}
