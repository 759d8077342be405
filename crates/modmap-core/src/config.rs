//! Loader configuration.
//!
//! [`LoaderConfig`] is the shared state every resolution reads. It only grows
//! after construction: packages get added, package configs become
//! `configured`, config document paths are recorded. Fragments arrive as
//! [`ConfigUpdate`] values (from a JSON config file or a caller) and are merged
//! through the resolver so that package names can be normalized.

use crate::resolver::meta::MetaFragment;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Base URL used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "https://localhost/";

/// Extension appended to package members when the package does not say.
pub const DEFAULT_PACKAGE_EXTENSION: &str = "js";

/// Runtime loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoaderConfig {
    /// Fallback resolution root. Always ends with `/`.
    #[serde(rename = "baseURL")]
    pub base_url: String,

    /// Alias rules, normalized to absolute URLs once `paths_locked` is set.
    pub paths: IndexMap<String, String>,

    /// Whether `paths` have been normalized.
    #[serde(skip)]
    pub paths_locked: bool,

    /// Wildcard `paths` entries already reported, as `key -> normalized`.
    #[serde(skip)]
    pub reported_wildcards: Vec<String>,

    /// Global map for plain specifiers.
    pub map: IndexMap<String, String>,

    /// Registered packages keyed by normalized name.
    pub packages: IndexMap<String, PackageConfig>,

    /// Patterns of requests that need a package config document first.
    pub package_config_paths: Vec<String>,

    /// Config documents that have been requested; never package members.
    #[serde(skip)]
    pub package_config_keys: Vec<String>,

    /// Global load metadata; keys may contain one `*`.
    pub meta: IndexMap<String, MetaFragment>,

    /// Dependency hints keyed by normalized module name.
    pub dep_cache: IndexMap<String, Vec<String>>,

    /// Use `plugin!argument` instead of `argument!plugin`.
    pub plugin_first: bool,

    /// Forward non-deprecation warnings to the host.
    pub warnings: bool,

    /// Production mode, reflected in `@system-env`.
    pub production: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            paths: IndexMap::new(),
            paths_locked: false,
            reported_wildcards: Vec::new(),
            map: IndexMap::new(),
            packages: IndexMap::new(),
            package_config_paths: Vec::new(),
            package_config_keys: Vec::new(),
            meta: IndexMap::new(),
            dep_cache: IndexMap::new(),
            plugin_first: false,
            warnings: false,
            production: false,
        }
    }
}

impl LoaderConfig {
    /// Create a config rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            base_url,
            ..Self::default()
        }
    }

    /// Record a config document path, keeping insertion order and uniqueness.
    pub fn add_package_config_key(&mut self, path: &str) {
        if !self.package_config_keys.iter().any(|k| k == path) {
            self.package_config_keys.push(path.to_string());
        }
    }

    /// Whether `normalized` is a known config document.
    #[must_use]
    pub fn is_package_config_key(&self, normalized: &str) -> bool {
        self.package_config_keys.iter().any(|k| k == normalized)
    }
}

/// Target of a package `map` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MapTarget {
    /// Plain replacement.
    Path(String),
    /// Condition expression to replacement, tried in declaration order.
    Conditional(IndexMap<String, String>),
}

/// `defaultExtension` setting of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultExtension {
    Ext(String),
    Disabled,
}

impl Serialize for DefaultExtension {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Ext(ext) => serializer.serialize_str(ext),
            Self::Disabled => serializer.serialize_bool(false),
        }
    }
}

impl<'de> Deserialize<'de> for DefaultExtension {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Ext(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Self::Ext(DEFAULT_PACKAGE_EXTENSION.to_string()),
            Raw::Flag(false) => Self::Disabled,
            Raw::Ext(ext) if ext.is_empty() => Self::Disabled,
            Raw::Ext(ext) => Self::Ext(ext.trim_start_matches('.').to_string()),
        })
    }
}

/// Configuration of a single package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PackageConfig {
    /// Entry point used when the package itself is requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,

    /// Module format for every member (applies when no plugin is used).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Package-local map, keys relative to the package (`./x`) or plain.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub map: IndexMap<String, MapTarget>,

    /// Package-local meta, keys relative to the package.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub meta: IndexMap<String, MetaFragment>,

    /// Extension added to members; unset means `"js"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_extension: Option<DefaultExtension>,

    /// Dependency hints keyed by package-relative path.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub dep_cache: IndexMap<String, Vec<String>>,

    /// Set once the package's config document has been merged.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub configured: bool,
}

impl PackageConfig {
    /// Effective default extension, `None` when disabled.
    #[must_use]
    pub fn default_extension(&self) -> Option<&str> {
        match &self.default_extension {
            None => Some(DEFAULT_PACKAGE_EXTENSION),
            Some(DefaultExtension::Ext(ext)) => Some(ext),
            Some(DefaultExtension::Disabled) => None,
        }
    }

    /// Merge `other` into this package config.
    ///
    /// With `prefer_existing`, values already present win (used when a fetched
    /// config document is merged under an explicit configuration); otherwise
    /// the incoming values win. Tables merge one level deep.
    pub fn merge(&mut self, other: PackageConfig, prefer_existing: bool) {
        fn scalar<T>(target: &mut Option<T>, value: Option<T>, prefer_existing: bool) {
            if value.is_some() && (target.is_none() || !prefer_existing) {
                *target = value;
            }
        }

        fn table<V>(target: &mut IndexMap<String, V>, incoming: IndexMap<String, V>, prefer_existing: bool) {
            for (key, value) in incoming {
                if prefer_existing && target.contains_key(&key) {
                    continue;
                }
                target.insert(key, value);
            }
        }

        scalar(&mut self.main, other.main, prefer_existing);
        scalar(&mut self.format, other.format, prefer_existing);
        scalar(&mut self.default_extension, other.default_extension, prefer_existing);
        table(&mut self.map, other.map, prefer_existing);
        table(&mut self.dep_cache, other.dep_cache, prefer_existing);

        for (key, meta) in other.meta {
            match self.meta.get_mut(&key) {
                Some(existing) => crate::resolver::meta::extend_meta(existing, &meta, prefer_existing),
                None => {
                    self.meta.insert(key, meta);
                }
            }
        }

        if other.configured {
            self.configured = true;
        }
    }
}

/// A configuration fragment to merge into a [`LoaderConfig`].
///
/// Every field is optional; absent fields leave the current config untouched.
/// Package names, `meta` keys and `packageConfigPaths` are normalized when the
/// fragment is applied by [`crate::Resolver::configure`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigUpdate {
    #[serde(rename = "baseURL", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub paths: IndexMap<String, String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub map: IndexMap<String, String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub packages: IndexMap<String, PackageConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub package_config_paths: Vec<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub meta: IndexMap<String, MetaFragment>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub dep_cache: IndexMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_first: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub production: Option<bool>,
}

impl ConfigUpdate {
    /// Parse a fragment from JSON text.
    pub fn from_json(source: &str, text: &str) -> crate::error::Result<Self> {
        serde_json::from_str(text).map_err(|e| crate::Error::ConfigParse {
            path: source.to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(!config.paths_locked);
        assert!(!config.plugin_first);
    }

    #[test]
    fn test_new_adds_trailing_slash() {
        let config = LoaderConfig::new("file:///app");
        assert_eq!(config.base_url, "file:///app/");
    }

    #[test]
    fn test_package_config_from_json() {
        let pkg: PackageConfig = serde_json::from_value(json!({
            "main": "index.js",
            "defaultExtension": "ts",
            "map": {
                "sizzle": "./vendor/sizzle.js",
                "./index.js": { "~browser": "./index-node.js" }
            },
            "name": "ignored",
            "version": "1.0.0"
        }))
        .unwrap();

        assert_eq!(pkg.main.as_deref(), Some("index.js"));
        assert_eq!(pkg.default_extension(), Some("ts"));
        assert_eq!(pkg.map["sizzle"], MapTarget::Path("./vendor/sizzle.js".into()));
        assert!(matches!(pkg.map["./index.js"], MapTarget::Conditional(_)));
        assert!(!pkg.configured);
    }

    #[test]
    fn test_default_extension_forms() {
        let off: PackageConfig = serde_json::from_value(json!({ "defaultExtension": false })).unwrap();
        assert_eq!(off.default_extension(), None);
        let dotted: PackageConfig = serde_json::from_value(json!({ "defaultExtension": ".ts" })).unwrap();
        assert_eq!(dotted.default_extension(), Some("ts"));
        let unset = PackageConfig::default();
        assert_eq!(unset.default_extension(), Some("js"));
    }

    #[test]
    fn test_merge_prefer_existing() {
        let mut pkg: PackageConfig = serde_json::from_value(json!({
            "main": "lib/main.js",
            "map": { "a": "./a.js" }
        }))
        .unwrap();
        let fetched: PackageConfig = serde_json::from_value(json!({
            "main": "index.js",
            "format": "cjs",
            "map": { "a": "./other.js", "b": "./b.js" }
        }))
        .unwrap();

        pkg.merge(fetched, true);
        assert_eq!(pkg.main.as_deref(), Some("lib/main.js"));
        assert_eq!(pkg.format.as_deref(), Some("cjs"));
        assert_eq!(pkg.map["a"], MapTarget::Path("./a.js".into()));
        assert_eq!(pkg.map["b"], MapTarget::Path("./b.js".into()));
    }

    #[test]
    fn test_merge_incoming_wins() {
        let mut pkg: PackageConfig = serde_json::from_value(json!({ "main": "a.js" })).unwrap();
        pkg.merge(
            serde_json::from_value(json!({ "main": "b.js", "configured": true })).unwrap(),
            false,
        );
        assert_eq!(pkg.main.as_deref(), Some("b.js"));
        assert!(pkg.configured);
    }

    #[test]
    fn test_config_keys_are_unique() {
        let mut config = LoaderConfig::default();
        config.add_package_config_key("https://localhost/p/package.json");
        config.add_package_config_key("https://localhost/p/package.json");
        assert_eq!(config.package_config_keys.len(), 1);
        assert!(config.is_package_config_key("https://localhost/p/package.json"));
    }

    #[test]
    fn test_config_update_parse_error_names_source() {
        let err = ConfigUpdate::from_json("modmap.json", "{ not json").unwrap_err();
        assert!(err.to_string().contains("modmap.json"));
    }

    #[test]
    fn test_map_preserves_declaration_order() {
        let update = ConfigUpdate::from_json(
            "inline",
            r#"{ "map": { "z": "./z.js", "a": "./a.js", "m": "./m.js" } }"#,
        )
        .unwrap();
        let keys: Vec<&str> = update.map.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }
}
