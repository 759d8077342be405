//! Package ownership, config document matching and package-relative rules
//! (default extension, map validity).

use super::meta::{get_meta_matches, MetaFragment};
use super::names::is_boundary_prefix;
use crate::config::{LoaderConfig, PackageConfig};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use regex_lite::Regex;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// The most specific registered package that owns `normalized`.
#[must_use]
pub fn get_package<'p>(packages: &'p IndexMap<String, PackageConfig>, normalized: &str) -> Option<&'p str> {
    let mut best: Option<&str> = None;
    let mut best_len = 0;
    for name in packages.keys() {
        if !is_boundary_prefix(normalized, name) {
            continue;
        }
        let len = name.split('/').count();
        if len > best_len {
            best = Some(name);
            best_len = len;
        }
    }
    best
}

/// A compiled `packageConfigPaths` entry.
#[derive(Debug)]
pub struct ConfigPathPattern {
    /// Length of the package-name portion of the pattern.
    pub length: usize,
    pub regex: Regex,
    pub wildcard: bool,
}

impl ConfigPathPattern {
    pub fn compile(path: &str) -> Result<Self> {
        let last_wildcard = path.rfind('*');
        let last_slash = path.rfind('/').unwrap_or(0);
        let length = last_wildcard.map_or(0, |i| i + 1).max(last_slash);

        let prefix = regex_lite::escape(&path[..length]).replace(r"\*", "[^/]+");
        let regex = Regex::new(&format!("^({prefix})(/|$)"))
            .map_err(|e| Error::InvalidConfig(format!("packageConfigPaths entry {path}: {e}")))?;

        Ok(Self {
            length,
            regex,
            wildcard: last_wildcard.is_some(),
        })
    }
}

/// A request that needs a package config document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageConfigMatch {
    pub package_name: String,
    pub config_path: String,
}

/// Compiles `packageConfigPaths` entries on first use and keeps them.
#[derive(Debug, Default)]
pub struct ConfigPathMatcher {
    compiled: RwLock<HashMap<String, Arc<ConfigPathPattern>>>,
}

impl ConfigPathMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pattern(&self, path: &str) -> Result<Arc<ConfigPathPattern>> {
        if let Some(found) = self
            .compiled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return Ok(Arc::clone(found));
        }

        let compiled = Arc::new(ConfigPathPattern::compile(path)?);
        self.compiled
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Find the most specific config path pattern matching `normalized`.
    ///
    /// A longer match replaces the current best, except that a wildcard
    /// pattern never displaces an exact one.
    pub fn match_path(&self, patterns: &[String], normalized: &str) -> Result<Option<PackageConfigMatch>> {
        let mut best: Option<PackageConfigMatch> = None;
        let mut exact = false;

        for path in patterns {
            let pattern = self.pattern(path)?;
            if normalized.len() < pattern.length {
                continue;
            }
            let Some(captures) = pattern.regex.captures(normalized) else {
                continue;
            };
            let Some(name) = captures.get(1).map(|m| m.as_str()) else {
                continue;
            };

            let replaces = match &best {
                None => true,
                Some(current) => !(exact && pattern.wildcard) && current.package_name.len() < name.len(),
            };
            if replaces {
                exact = !pattern.wildcard;
                best = Some(PackageConfigMatch {
                    package_name: name.to_string(),
                    config_path: format!("{name}{}", &path[pattern.length..]),
                });
            }
        }

        Ok(best)
    }
}

/// Append the package's default extension to `sub_path` where it applies.
///
/// Never applied to the package root, to folders, when disabled, when
/// `skip_extensions` is set, or when an exact meta entry (or a wildcard meta
/// entry with text after its `*`) covers the path.
#[must_use]
pub fn add_default_extension(
    config: &LoaderConfig,
    package: &PackageConfig,
    package_name: &str,
    sub_path: &str,
    skip_extensions: bool,
) -> String {
    let Some(extension) = package.default_extension() else {
        return sub_path.to_string();
    };
    if sub_path.is_empty() || sub_path.ends_with('/') || skip_extensions {
        return sub_path.to_string();
    }

    let meta_match = meta_blocks_extension(&package.meta, sub_path)
        || meta_blocks_extension(&config.meta, &format!("{package_name}/{sub_path}"));
    if meta_match {
        return sub_path.to_string();
    }

    let suffix = format!(".{extension}");
    if sub_path.ends_with(&suffix) {
        sub_path.to_string()
    } else {
        format!("{sub_path}{suffix}")
    }
}

fn meta_blocks_extension(meta: &IndexMap<String, MetaFragment>, sub_path: &str) -> bool {
    let mut blocked = false;
    get_meta_matches(meta, sub_path, |pattern, _, depth| {
        blocked = depth == 0 || !pattern.ends_with('*');
        blocked
    });
    blocked
}

/// Reject recursive maps into a subpath of the matched key.
///
/// `./x -> ./x/y` is allowed for exactly `./x`, not for `./x/z`.
#[must_use]
pub fn valid_mapping(map_match: &str, mapped: &str, path: &str) -> bool {
    !(mapped.starts_with(map_match) && path.len() > map_match.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultExtension;

    fn packages(names: &[&str]) -> IndexMap<String, PackageConfig> {
        names
            .iter()
            .map(|n| ((*n).to_string(), PackageConfig::default()))
            .collect()
    }

    #[test]
    fn test_get_package_most_specific() {
        let pkgs = packages(&["https://localhost/a", "https://localhost/a/b", "https://localhost/ab"]);
        assert_eq!(get_package(&pkgs, "https://localhost/a/b/c.js"), Some("https://localhost/a/b"));
        assert_eq!(get_package(&pkgs, "https://localhost/a/c.js"), Some("https://localhost/a"));
        assert_eq!(get_package(&pkgs, "https://localhost/ab"), Some("https://localhost/ab"));
        assert_eq!(get_package(&pkgs, "https://localhost/abc"), None);
    }

    #[test]
    fn test_config_path_pattern_compile() {
        let p = ConfigPathPattern::compile("https://localhost/packages/*.json").unwrap();
        assert!(p.wildcard);
        assert_eq!(p.length, "https://localhost/packages/*".len());

        let p = ConfigPathPattern::compile("https://localhost/test/package.json").unwrap();
        assert!(!p.wildcard);
        assert_eq!(p.length, "https://localhost/test".len());
    }

    #[test]
    fn test_match_wildcard_path() {
        let matcher = ConfigPathMatcher::new();
        let patterns = vec!["https://localhost/packages/*/package.json".to_string()];

        let m = matcher
            .match_path(&patterns, "https://localhost/packages/new-package/path")
            .unwrap()
            .unwrap();
        assert_eq!(m.package_name, "https://localhost/packages/new-package");
        assert_eq!(m.config_path, "https://localhost/packages/new-package/package.json");

        assert!(matcher
            .match_path(&patterns, "https://localhost/other/x")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_exact_not_displaced_by_wildcard() {
        let matcher = ConfigPathMatcher::new();
        let patterns = vec![
            "https://localhost/packages/test/package.json".to_string(),
            "https://localhost/packages/*/sub/package.json".to_string(),
        ];
        let m = matcher
            .match_path(&patterns, "https://localhost/packages/test/sub/x.js")
            .unwrap()
            .unwrap();
        assert_eq!(m.package_name, "https://localhost/packages/test");
    }

    #[test]
    fn test_longer_exact_wins() {
        let matcher = ConfigPathMatcher::new();
        let patterns = vec![
            "https://localhost/packages/*/package.json".to_string(),
            "https://localhost/packages/test/sub/package.json".to_string(),
        ];
        let m = matcher
            .match_path(&patterns, "https://localhost/packages/test/sub/x.js")
            .unwrap()
            .unwrap();
        assert_eq!(m.package_name, "https://localhost/packages/test/sub");
        assert_eq!(m.config_path, "https://localhost/packages/test/sub/package.json");
    }

    #[test]
    fn test_dots_in_patterns_are_literal() {
        let matcher = ConfigPathMatcher::new();
        let patterns = vec!["https://localhost/a.b/package.json".to_string()];
        assert!(matcher
            .match_path(&patterns, "https://localhost/axb/x.js")
            .unwrap()
            .is_none());
        assert!(matcher
            .match_path(&patterns, "https://localhost/a.b/x.js")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_default_extension_rules() {
        let config = LoaderConfig::default();
        let pkg = PackageConfig::default();

        assert_eq!(add_default_extension(&config, &pkg, "p", "util", false), "util.js");
        assert_eq!(add_default_extension(&config, &pkg, "p", "util.js", false), "util.js");
        assert_eq!(add_default_extension(&config, &pkg, "p", "dir/", false), "dir/");
        assert_eq!(add_default_extension(&config, &pkg, "p", "", false), "");
        assert_eq!(add_default_extension(&config, &pkg, "p", "util", true), "util");

        let disabled = PackageConfig {
            default_extension: Some(DefaultExtension::Disabled),
            ..PackageConfig::default()
        };
        assert_eq!(add_default_extension(&config, &disabled, "p", "util", false), "util");

        let ts = PackageConfig {
            default_extension: Some(DefaultExtension::Ext("ts".into())),
            ..PackageConfig::default()
        };
        assert_eq!(add_default_extension(&config, &ts, "p", "util", false), "util.ts");
    }

    #[test]
    fn test_default_extension_idempotent() {
        let config = LoaderConfig::default();
        let pkg = PackageConfig::default();
        for sub in ["a", "a/b", "a.css", "a.js", "dir/"] {
            let once = add_default_extension(&config, &pkg, "p", sub, false);
            let twice = add_default_extension(&config, &pkg, "p", &once, false);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_meta_blocks_default_extension() {
        let config = LoaderConfig::default();
        let mut pkg = PackageConfig::default();
        pkg.meta.insert("./vendor/sizzle".into(), MetaFragment::default());
        pkg.meta.insert("*.css".into(), MetaFragment::default());
        pkg.meta.insert("lib/*".into(), MetaFragment::default());

        assert_eq!(add_default_extension(&config, &pkg, "p", "vendor/sizzle", false), "vendor/sizzle");
        assert_eq!(add_default_extension(&config, &pkg, "p", "a.css", false), "a.css");
        // trailing wildcard still gets the extension
        assert_eq!(add_default_extension(&config, &pkg, "p", "lib/x", false), "lib/x.js");
    }

    #[test]
    fn test_global_meta_blocks_default_extension() {
        let mut config = LoaderConfig::default();
        config.meta.insert("p/special".into(), MetaFragment::default());
        let pkg = PackageConfig::default();
        assert_eq!(add_default_extension(&config, &pkg, "p", "special", false), "special");
    }

    #[test]
    fn test_valid_mapping() {
        assert!(valid_mapping("./x", "./x/y", "./x"));
        assert!(!valid_mapping("./x", "./x/y", "./x/z"));
        assert!(valid_mapping("./x", "./other", "./x/z"));
    }
}
