//! Core name resolution: relative URLs, the global map, `paths` aliases and
//! the `baseURL` fallback.

use super::condition::{EMPTY_MODULE, SYSTEM_ENV};
use super::names::{apply_paths, get_map_match, resolve_if_not_plain};
use crate::config::LoaderConfig;
use crate::error::Result;
use crate::host::LoaderHost;
use tracing::trace;

/// Turn every `paths` value into an absolute URL and lock the table.
///
/// Values that already resolve against `base_uri` are kept as resolved;
/// anything else is taken relative to `baseURL`. Wildcard values still
/// load but are reported as deprecated.
pub fn normalize_paths(config: &mut LoaderConfig, base_uri: &str, host: &dyn LoaderHost) -> Result<()> {
    let base_url = config.base_url.clone();
    for (key, value) in &mut config.paths {
        let resolved = match resolve_if_not_plain(value, Some(base_uri))? {
            Some(resolved) => resolved,
            None => resolve_if_not_plain(&format!("./{value}"), Some(&base_url))?
                .unwrap_or_else(|| format!("{base_url}{value}")),
        };

        // relocking after configure must not repeat the deprecation
        let entry = format!("{key} -> {resolved}");
        if value.contains('*') && !config.reported_wildcards.contains(&entry) {
            report(
                host,
                config.warnings,
                &format!("Paths configuration \"{key}\" -> \"{value}\" uses wildcards which are no longer supported."),
                true,
            );
            config.reported_wildcards.push(entry);
        }
        *value = resolved;
    }
    config.paths_locked = true;
    Ok(())
}

/// Forward a warning to the host. Deprecations always go through; other
/// warnings only when `warnings` is enabled.
pub fn report(host: &dyn LoaderHost, warnings: bool, message: &str, deprecation: bool) {
    if deprecation || warnings {
        host.warn(message, deprecation);
    }
}

/// Whether the loader always knows `name` without any configuration.
#[must_use]
pub fn is_builtin(name: &str) -> bool {
    name == EMPTY_MODULE || name == SYSTEM_ENV
}

/// Resolve `name` to a URL (or registry id) without package semantics.
///
/// `config.paths` must already be locked.
pub fn core_resolve(
    config: &LoaderConfig,
    base_uri: &str,
    host: &dyn LoaderHost,
    name: &str,
    parent: Option<&str>,
    do_map: bool,
) -> Result<String> {
    if let Some(resolved) = resolve_if_not_plain(name, Some(parent.unwrap_or(base_uri)))? {
        return Ok(apply_paths(&config.paths, &resolved).unwrap_or(resolved));
    }

    let mut name = name.to_string();
    if do_map {
        if let Some(key) = get_map_match(&config.map, &name) {
            let mapped = format!("{}{}", config.map[key], &name[key.len()..]);
            trace!(%name, map = key, %mapped, "global map");
            if let Some(resolved) = resolve_if_not_plain(&mapped, Some(base_uri))? {
                return Ok(resolved);
            }
            name = mapped;
        }
    }

    if is_builtin(&name) || host.registry_has(&name) || name.starts_with("@node/") {
        return Ok(name);
    }

    if let Some(aliased) = apply_paths(&config.paths, &name) {
        trace!(%name, %aliased, "paths");
        return Ok(aliased);
    }

    Ok(format!("{}{name}", config.base_url))
}
