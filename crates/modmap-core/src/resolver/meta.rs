//! Load metadata and its precedence rules.
//!
//! Metadata comes from four places, lowest to highest precedence:
//! - global wildcard `meta` patterns (more `/` segments is more specific)
//! - global exact `meta` entries
//! - package `meta` patterns and exact entries, matched on the package subpath
//! - the package level `format`, only when no plugin is involved

use super::Metadata;
use crate::config::LoaderConfig;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A `loader` entry: either a loader module name or `false` to opt out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoaderSetting {
    Named(String),
    Flag(bool),
}

/// Per-module load metadata.
///
/// Every field is optional so that merging can tell "unset" apart from an
/// explicit value. [`MetaFragment::load_defaults`] gives the starting point
/// for a resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader: Option<LoaderSetting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deps: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_load: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub globals: Option<IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_map: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encapsulate_global: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cjs_require_detection: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cjs_defer_deps_execute: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub esm_exports: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_header: Option<Value>,
    /// Keys this crate does not interpret, carried through for the loader.
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl MetaFragment {
    /// Fresh load metadata for a resolution.
    #[must_use]
    pub fn load_defaults() -> Self {
        Self {
            encapsulate_global: Some(false),
            cjs_require_detection: Some(true),
            cjs_defer_deps_execute: Some(false),
            ..Self::default()
        }
    }

    /// Load metadata for a package config document.
    #[must_use]
    pub fn json_document() -> Self {
        Self {
            format: Some("json".to_string()),
            ..Self::load_defaults()
        }
    }

    /// The configured loader plugin name, if any. `loader: false` yields none.
    #[must_use]
    pub fn loader_name(&self) -> Option<&str> {
        match &self.loader {
            Some(LoaderSetting::Named(name)) if !name.is_empty() => Some(name),
            _ => None,
        }
    }
}

/// Merge `source` into `target`.
///
/// Scalars: an unset target field always takes the source value; a set one is
/// overwritten unless `prepend` is true. `deps` are concatenated (source first
/// when prepending) with duplicates dropped. `globals` and unknown object
/// values merge key by key with the same precedence.
pub fn extend_meta(target: &mut MetaFragment, source: &MetaFragment, prepend: bool) {
    merge_scalar(&mut target.format, &source.format, prepend);
    merge_scalar(&mut target.loader, &source.loader, prepend);
    merge_scalar(&mut target.script_load, &source.script_load, prepend);
    merge_scalar(&mut target.nonce, &source.nonce, prepend);
    merge_scalar(&mut target.integrity, &source.integrity, prepend);
    merge_scalar(&mut target.source_map, &source.source_map, prepend);
    merge_scalar(&mut target.exports, &source.exports, prepend);
    merge_scalar(&mut target.encapsulate_global, &source.encapsulate_global, prepend);
    merge_scalar(&mut target.cross_origin, &source.cross_origin, prepend);
    merge_scalar(&mut target.cjs_require_detection, &source.cjs_require_detection, prepend);
    merge_scalar(&mut target.cjs_defer_deps_execute, &source.cjs_defer_deps_execute, prepend);
    merge_scalar(&mut target.esm_exports, &source.esm_exports, prepend);
    merge_scalar(&mut target.auth_header, &source.auth_header, prepend);

    if let Some(deps) = &source.deps {
        let merged = match target.deps.take() {
            None => deps.clone(),
            Some(existing) => {
                let (first, second) = if prepend {
                    (deps.clone(), existing)
                } else {
                    (existing, deps.clone())
                };
                let mut out: Vec<String> = Vec::with_capacity(first.len() + second.len());
                for dep in first.into_iter().chain(second) {
                    if !out.contains(&dep) {
                        out.push(dep);
                    }
                }
                out
            }
        };
        target.deps = Some(merged);
    }

    if let Some(globals) = &source.globals {
        let existing = target.globals.get_or_insert_with(IndexMap::new);
        for (key, value) in globals {
            if prepend && existing.contains_key(key) {
                continue;
            }
            existing.insert(key.clone(), value.clone());
        }
    }

    for (key, value) in &source.extra {
        match target.extra.get_mut(key) {
            None => {
                target.extra.insert(key.clone(), value.clone());
            }
            Some(Value::Object(existing)) if value.is_object() => {
                if let Value::Object(incoming) = value {
                    for (k, v) in incoming {
                        if prepend && existing.contains_key(k) {
                            continue;
                        }
                        existing.insert(k.clone(), v.clone());
                    }
                }
            }
            Some(existing) => {
                if !prepend {
                    *existing = value.clone();
                }
            }
        }
    }
}

fn merge_scalar<T: Clone>(target: &mut Option<T>, source: &Option<T>, prepend: bool) {
    if let Some(value) = source {
        if target.is_none() || !prepend {
            *target = Some(value.clone());
        }
    }
}

/// Match a single-wildcard pattern (`prefix*suffix`) against `name`.
fn wildcard_matches(pattern: &str, wildcard: usize, name: &str) -> bool {
    let prefix = &pattern[..wildcard];
    let suffix = &pattern[wildcard + 1..];
    name.len() >= prefix.len() + suffix.len() && name.starts_with(prefix) && name.ends_with(suffix)
}

/// Walk the meta entries of a package that apply to `sub_path`.
///
/// Wildcard entries come first, in declaration order, with their depth
/// (number of `/` segments); the exact entry, if any, comes last with depth 0.
/// Patterns may carry a leading `./`. Returning `true` from `on_match`
/// stops the walk.
pub fn get_meta_matches<F>(pkg_meta: &IndexMap<String, MetaFragment>, sub_path: &str, mut on_match: F)
where
    F: FnMut(&str, &MetaFragment, usize) -> bool,
{
    for (key, meta) in pkg_meta {
        let pattern = key.strip_prefix("./").unwrap_or(key);
        let Some(wildcard) = pattern.find('*') else {
            continue;
        };
        if wildcard_matches(pattern, wildcard, sub_path)
            && on_match(pattern, meta, pattern.split('/').count())
        {
            return;
        }
    }

    let exact = pkg_meta
        .get_key_value(sub_path)
        .or_else(|| pkg_meta.get_key_value(format!("./{sub_path}").as_str()));
    if let Some((key, meta)) = exact {
        on_match(key, meta, 0);
    }
}

/// Attach load metadata for a normalized identifier.
pub fn set_meta(config: &LoaderConfig, name: &str, metadata: &mut Metadata) {
    let load = metadata.load.get_or_insert_with(MetaFragment::load_defaults);

    let mut best_depth = 0;
    for (pattern, meta) in &config.meta {
        let Some(wildcard) = pattern.find('*') else {
            continue;
        };
        if wildcard_matches(pattern, wildcard, name) {
            let depth = pattern.split('/').count();
            if depth > best_depth {
                best_depth = depth;
            }
            extend_meta(load, meta, best_depth != depth);
        }
    }

    if let Some(meta) = config.meta.get(name) {
        extend_meta(load, meta, false);
    }

    let Some(package_name) = metadata.package_name.as_deref() else {
        return;
    };
    let Some(package) = config.packages.get(package_name) else {
        return;
    };

    if !package.meta.is_empty() {
        let sub_path = name.get(package_name.len() + 1..).unwrap_or_default();
        let mut package_meta = MetaFragment::default();
        let mut best_depth = 0;
        get_meta_matches(&package.meta, sub_path, |_, meta, depth| {
            if depth > best_depth {
                best_depth = depth;
            }
            extend_meta(&mut package_meta, meta, depth != 0 && best_depth > depth);
            false
        });
        extend_meta(load, &package_meta, false);
    }

    if metadata.plugin_name.is_none() && load.format.is_none() {
        load.format.clone_from(&package.format);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PackageConfig;

    fn fragment(json: serde_json::Value) -> MetaFragment {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_extend_overwrites_scalars() {
        let mut target = fragment(serde_json::json!({ "format": "cjs" }));
        extend_meta(&mut target, &fragment(serde_json::json!({ "format": "amd" })), false);
        assert_eq!(target.format.as_deref(), Some("amd"));
    }

    #[test]
    fn test_extend_prepend_keeps_existing() {
        let mut target = fragment(serde_json::json!({ "format": "cjs" }));
        extend_meta(
            &mut target,
            &fragment(serde_json::json!({ "format": "amd", "nonce": "abc" })),
            true,
        );
        assert_eq!(target.format.as_deref(), Some("cjs"));
        assert_eq!(target.nonce.as_deref(), Some("abc"));
    }

    #[test]
    fn test_extend_deps_concatenate_without_duplicates() {
        let mut target = fragment(serde_json::json!({ "deps": ["a", "b"] }));
        extend_meta(&mut target, &fragment(serde_json::json!({ "deps": ["b", "c"] })), false);
        assert_eq!(target.deps.unwrap(), vec!["a", "b", "c"]);

        let mut target = fragment(serde_json::json!({ "deps": ["a"] }));
        extend_meta(&mut target, &fragment(serde_json::json!({ "deps": ["z"] })), true);
        assert_eq!(target.deps.unwrap(), vec!["z", "a"]);
    }

    #[test]
    fn test_extend_globals_merge_by_key() {
        let mut target = fragment(serde_json::json!({ "globals": { "$": "jquery" } }));
        extend_meta(
            &mut target,
            &fragment(serde_json::json!({ "globals": { "$": "zepto", "_": "lodash" } })),
            true,
        );
        let globals = target.globals.unwrap();
        assert_eq!(globals["$"], "jquery");
        assert_eq!(globals["_"], "lodash");
    }

    #[test]
    fn test_loader_false_is_not_a_loader() {
        let meta = fragment(serde_json::json!({ "loader": false }));
        assert_eq!(meta.loader, Some(LoaderSetting::Flag(false)));
        assert!(meta.loader_name().is_none());
        let meta = fragment(serde_json::json!({ "loader": "css" }));
        assert_eq!(meta.loader_name(), Some("css"));
    }

    #[test]
    fn test_unknown_keys_are_kept() {
        let meta = fragment(serde_json::json!({ "format": "esm", "custom": { "a": 1 } }));
        assert_eq!(meta.extra["custom"]["a"], 1);
    }

    #[test]
    fn test_wildcard_specificity() {
        let mut config = LoaderConfig::default();
        config
            .meta
            .insert("https://localhost/lib/*".into(), fragment(serde_json::json!({ "format": "amd" })));
        config
            .meta
            .insert("https://localhost/*".into(), fragment(serde_json::json!({ "format": "cjs", "nonce": "n" })));

        let mut metadata = Metadata::default();
        set_meta(&config, "https://localhost/lib/x.js", &mut metadata);
        let load = metadata.load.unwrap();
        // less specific pattern declared later only fills gaps
        assert_eq!(load.format.as_deref(), Some("amd"));
        assert_eq!(load.nonce.as_deref(), Some("n"));
    }

    #[test]
    fn test_exact_beats_wildcard() {
        let mut config = LoaderConfig::default();
        config
            .meta
            .insert("https://localhost/*.js".into(), fragment(serde_json::json!({ "format": "amd" })));
        config
            .meta
            .insert("https://localhost/a.js".into(), fragment(serde_json::json!({ "format": "global" })));

        let mut metadata = Metadata::default();
        set_meta(&config, "https://localhost/a.js", &mut metadata);
        assert_eq!(metadata.load.unwrap().format.as_deref(), Some("global"));
    }

    #[test]
    fn test_package_meta_and_format() {
        let mut config = LoaderConfig::default();
        let mut package = PackageConfig {
            format: Some("cjs".into()),
            ..PackageConfig::default()
        };
        package
            .meta
            .insert("./vendor/*.js".into(), fragment(serde_json::json!({ "format": "global" })));
        package
            .meta
            .insert("*.ts".into(), fragment(serde_json::json!({ "loader": "ts" })));
        config.packages.insert("https://localhost/pkg".into(), package);

        let mut metadata = Metadata {
            package_name: Some("https://localhost/pkg".into()),
            ..Metadata::default()
        };
        set_meta(&config, "https://localhost/pkg/vendor/sizzle.js", &mut metadata);
        assert_eq!(metadata.load.unwrap().format.as_deref(), Some("global"));

        let mut metadata = Metadata {
            package_name: Some("https://localhost/pkg".into()),
            ..Metadata::default()
        };
        set_meta(&config, "https://localhost/pkg/index.ts", &mut metadata);
        let load = metadata.load.unwrap();
        assert_eq!(load.format.as_deref(), Some("cjs"));
        assert_eq!(load.loader_name(), Some("ts"));
    }

    #[test]
    fn test_package_format_skipped_for_plugins() {
        let mut config = LoaderConfig::default();
        config.packages.insert(
            "https://localhost/pkg".into(),
            PackageConfig {
                format: Some("cjs".into()),
                ..PackageConfig::default()
            },
        );
        let mut metadata = Metadata {
            package_name: Some("https://localhost/pkg".into()),
            plugin_name: Some("https://localhost/text.js".into()),
            ..Metadata::default()
        };
        set_meta(&config, "https://localhost/pkg/a.txt", &mut metadata);
        assert!(metadata.load.unwrap().format.is_none());
    }

    #[test]
    fn test_get_meta_matches_exact_last_with_depth_zero() {
        let mut meta = IndexMap::new();
        meta.insert("lib/*".to_string(), MetaFragment::default());
        meta.insert("./lib/a.js".to_string(), MetaFragment::default());
        let mut seen = Vec::new();
        get_meta_matches(&meta, "lib/a.js", |pattern, _, depth| {
            seen.push((pattern.to_string(), depth));
            false
        });
        assert_eq!(seen, vec![("lib/*".to_string(), 2), ("./lib/a.js".to_string(), 0)]);
    }
}
