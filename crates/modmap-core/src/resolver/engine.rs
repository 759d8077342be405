//! The resolution pipeline.
//!
//! [`Resolver::normalize`] is the async entry point: it may import condition
//! modules and fetch package config documents through the host.
//! [`Resolver::normalize_sync`] runs the same package rules without any I/O.
//!
//! Shared config sits behind a `std::sync::RwLock`; guards are always
//! released before an `.await`.

use super::condition::{
    interpolation_regex, parse_condition, read_member_expression, serialize_condition,
    split_boolean_condition, truthy, Condition, SystemEnv, EMPTY_MODULE, SYSTEM_ENV,
};
use super::meta::{extend_meta, set_meta, MetaFragment};
use super::names::{get_map_match, resolve_if_not_plain};
use super::package::{add_default_extension, get_package, valid_mapping, ConfigPathMatcher};
use super::paths::{self, normalize_paths, report};
use super::plugin::{combine_plugin_parts, parse_parent_plugin, parse_plugin};
use super::Metadata;
use crate::config::{ConfigUpdate, LoaderConfig, MapTarget, PackageConfig, DEFAULT_BASE_URL};
use crate::error::{Error, Result};
use crate::host::LoaderHost;
use futures::future::{try_join_all, BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

/// Pipeline stages, reported in `debug` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolveState {
    StripBooleanConditional,
    ResolvePlugin,
    InterpolateConditional,
    AttachMeta,
    ResolveConfiguredLoaderPlugin,
    Done,
}

/// Construction options for a [`Resolver`].
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Environment base used for relative names without a parent.
    pub base_uri: String,
    /// Keep conditions symbolic instead of evaluating them.
    pub builder: bool,
    pub browser: bool,
    pub node: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            base_uri: DEFAULT_BASE_URL.to_string(),
            builder: false,
            browser: false,
            node: false,
        }
    }
}

/// Result of [`Resolver::normalize`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolved {
    pub id: String,
    pub metadata: Metadata,
}

type ConfigLoad = Shared<BoxFuture<'static, Result<()>>>;

/// Who owns a normalized name.
enum Ownership {
    Unowned,
    ConfigDocument,
    Package {
        name: String,
        pending_config: Option<String>,
    },
}

/// What applying a package config to a subpath should try.
enum PackageEntry {
    /// The package has no main; the package name is the answer.
    Root,
    Member {
        sub_path: String,
        /// Matched map key and the path it was matched with.
        map_hit: Option<(String, String)>,
    },
}

/// Resolves module names against a shared [`LoaderConfig`].
pub struct Resolver {
    config: Arc<RwLock<LoaderConfig>>,
    host: Arc<dyn LoaderHost>,
    base_uri: String,
    builder: bool,
    env: RwLock<SystemEnv>,
    config_paths: ConfigPathMatcher,
    inflight: Mutex<HashMap<String, ConfigLoad>>,
}

impl Resolver {
    #[must_use]
    pub fn new(config: LoaderConfig, host: Arc<dyn LoaderHost>) -> Self {
        Self::with_options(config, host, ResolverOptions::default())
    }

    #[must_use]
    pub fn with_options(config: LoaderConfig, host: Arc<dyn LoaderHost>, options: ResolverOptions) -> Self {
        let mut base_uri = options.base_uri;
        if !base_uri.ends_with('/') {
            base_uri.push('/');
        }
        let env = SystemEnv {
            browser: options.browser,
            node: options.node,
            production: config.production,
            builder: options.builder,
        };

        Self {
            config: Arc::new(RwLock::new(config)),
            host,
            base_uri,
            builder: options.builder,
            env: RwLock::new(env),
            config_paths: ConfigPathMatcher::new(),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// The shared configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<RwLock<LoaderConfig>> {
        &self.config
    }

    /// A copy of the current configuration.
    #[must_use]
    pub fn snapshot(&self) -> LoaderConfig {
        self.read_config().clone()
    }

    /// A copy of the configuration with `paths` normalized.
    pub fn normalized_snapshot(&self) -> Result<LoaderConfig> {
        self.ensure_paths_locked()?;
        Ok(self.snapshot())
    }

    #[must_use]
    pub fn is_builder(&self) -> bool {
        self.builder
    }

    #[must_use]
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Switch production mode. Builds always report `dev` in `@system-env`.
    pub fn set_production(&self, production: bool, builder: bool) {
        self.write_config().production = production;
        let mut env = self.env.write().unwrap_or_else(PoisonError::into_inner);
        env.production = production;
        env.builder = builder;
    }

    /// Current `@system-env` exports.
    #[must_use]
    pub fn system_env(&self) -> Value {
        self.env.read().unwrap_or_else(PoisonError::into_inner).exports()
    }

    /// Report a warning through the host, honoring the `warnings` flag.
    pub fn warn(&self, message: &str, deprecation: bool) {
        let enabled = self.read_config().warnings;
        report(self.host.as_ref(), enabled, message, deprecation);
    }

    /// Merge a configuration fragment.
    ///
    /// Package names, non-wildcard `meta` keys, `packageConfigPaths` prefixes
    /// and `depCache` keys are normalized before they are stored.
    pub fn configure(&self, update: ConfigUpdate) -> Result<()> {
        let ConfigUpdate {
            base_url,
            paths,
            map,
            packages,
            package_config_paths,
            meta,
            dep_cache,
            plugin_first,
            warnings,
            production,
        } = update;

        if let Some(base_url) = base_url {
            let mut resolved = match resolve_if_not_plain(&base_url, Some(&self.base_uri))? {
                Some(resolved) => resolved,
                None => resolve_if_not_plain(&format!("./{base_url}"), Some(&self.base_uri))?
                    .unwrap_or(base_url),
            };
            if !resolved.ends_with('/') {
                resolved.push('/');
            }
            self.write_config().base_url = resolved;
        }

        {
            let mut config = self.write_config();
            if let Some(plugin_first) = plugin_first {
                config.plugin_first = plugin_first;
            }
            if let Some(warnings) = warnings {
                config.warnings = warnings;
            }
            if !paths.is_empty() {
                config.paths.extend(paths);
                config.paths_locked = false;
            }
            config.map.extend(map);
        }

        if let Some(production) = production {
            self.set_production(production, self.builder);
        }

        for path in package_config_paths {
            let length = path
                .rfind('*')
                .map_or(0, |i| i + 1)
                .max(path.rfind('/').unwrap_or(0));
            let prefix = self.core_resolve(&path[..length], None, false)?;
            let normalized = format!("{prefix}{}", &path[length..]);

            let mut config = self.write_config();
            if !config.package_config_paths.contains(&normalized) {
                config.package_config_paths.push(normalized);
            }
        }

        for (name, package) in packages {
            let key = if name.ends_with('/') { name } else { format!("{name}/") };
            let resolved = self.core_resolve(&key, None, false)?;
            let resolved = resolved.strip_suffix('/').unwrap_or(&resolved).to_string();
            debug!(package = %resolved, "configure package");
            self.write_config()
                .packages
                .entry(resolved)
                .or_default()
                .merge(package, false);
        }

        for (pattern, fragment) in meta {
            let key = if pattern.starts_with('*') {
                pattern
            } else {
                self.core_resolve(&pattern, None, true)?
            };
            let mut config = self.write_config();
            match config.meta.get_mut(&key) {
                Some(existing) => extend_meta(existing, &fragment, false),
                None => {
                    config.meta.insert(key, fragment);
                }
            }
        }

        for (name, deps) in dep_cache {
            let key = self.normalize_sync(&name, None)?;
            let mut config = self.write_config();
            let entry = config.dep_cache.entry(key).or_default();
            for dep in deps {
                if !entry.contains(&dep) {
                    entry.push(dep);
                }
            }
        }

        Ok(())
    }

    /// Metadata describing `parent` as a requester: its plugin argument and
    /// owning package.
    #[must_use]
    pub fn parent_metadata(&self, parent: Option<&str>) -> Metadata {
        let mut metadata = Metadata::default();
        let Some(parent) = parent else {
            return metadata;
        };

        let config = self.read_config();
        if let Some(parsed) = parse_parent_plugin(config.plugin_first, parent) {
            metadata.plugin_name = Some(parsed.plugin);
            metadata.plugin_argument = Some(parsed.argument);
        }
        metadata.package_name = get_package(&config.packages, parent).map(str::to_string);
        metadata
    }

    /// Resolve `name` requested by `parent`.
    pub async fn normalize(&self, name: &str, parent: Option<&str>) -> Result<Resolved> {
        let mut metadata = Metadata::default();
        let id = self.normalize_with(name, parent, &mut metadata, None).await?;
        Ok(Resolved { id, metadata })
    }

    /// Resolve `name`, filling `metadata`.
    ///
    /// Without `parent_metadata` it is derived from `parent`.
    pub fn normalize_with<'a>(
        &'a self,
        name: &'a str,
        parent: Option<&'a str>,
        metadata: &'a mut Metadata,
        parent_metadata: Option<&'a Metadata>,
    ) -> BoxFuture<'a, Result<String>> {
        async move {
            let parent_metadata = match parent_metadata {
                Some(carried) => carried.clone(),
                None => self.parent_metadata(parent),
            };

            debug!(specifier = name, requester = ?parent, state = ?ResolveState::StripBooleanConditional, "normalize");
            let name = self.boolean_conditional(name, parent).await?;

            trace!(specifier = %name, state = ?ResolveState::ResolvePlugin, "normalize");
            let normalized = self
                .plugin_resolve(&name, parent, metadata, &parent_metadata)
                .await?;

            trace!(id = %normalized, state = ?ResolveState::InterpolateConditional, "normalize");
            let normalized = self
                .interpolate_conditional(&normalized, parent, &parent_metadata)
                .await?;

            trace!(id = %normalized, state = ?ResolveState::AttachMeta, "normalize");
            {
                let config = self.read_config();
                set_meta(&config, &normalized, metadata);
            }

            let loader = if metadata.plugin_name.is_none() {
                metadata
                    .load
                    .as_ref()
                    .and_then(MetaFragment::loader_name)
                    .map(str::to_string)
            } else {
                None
            };

            if let Some(loader) = loader {
                trace!(id = %normalized, %loader, state = ?ResolveState::ResolveConfiguredLoaderPlugin, "normalize");
                let carried = metadata.clone();
                let mut loader_metadata = Metadata::default();
                let plugin = self
                    .normalize_with(&loader, Some(&normalized), &mut loader_metadata, Some(&carried))
                    .await?;
                metadata.plugin_name = Some(plugin);
                metadata.plugin_argument = Some(normalized.clone());
            }

            debug!(id = %normalized, state = ?ResolveState::Done, "normalize");
            Ok(normalized)
        }
        .boxed()
    }

    /// Resolve without I/O.
    ///
    /// Conditions are left in place, conditional package maps are an error
    /// and package config documents are never fetched.
    pub fn normalize_sync(&self, name: &str, parent: Option<&str>) -> Result<String> {
        let parent_metadata = self.parent_metadata(parent);
        let effective_parent = parent_metadata.plugin_argument.as_deref().or(parent);
        let mut metadata = Metadata::default();

        let plugin_first = self.read_config().plugin_first;
        if let Some(parsed) = parse_plugin(plugin_first, name) {
            let plugin = self.normalize_sync(&parsed.plugin, parent)?;
            metadata.plugin_name = Some(plugin.clone());
            let argument = self.package_resolve_sync(
                &parsed.argument,
                effective_parent,
                &mut metadata,
                Some(&parent_metadata),
                true,
            )?;
            return Ok(combine_plugin_parts(plugin_first, &argument, &plugin));
        }

        self.package_resolve_sync(name, effective_parent, &mut metadata, Some(&parent_metadata), false)
    }

    /// Older name for [`Resolver::normalize_sync`].
    pub fn decanonicalize(&self, name: &str, parent: Option<&str>) -> Result<String> {
        self.normalize_sync(name, parent)
    }

    /// Dependency hints for a resolved id, normalized.
    ///
    /// Global `depCache` entries are keyed by id and their deps resolve
    /// against it. Package entries are keyed relative to the package and
    /// their deps resolve against the package root.
    pub fn dep_cache_for(&self, id: &str) -> Result<Vec<String>> {
        let mut pending: Vec<(String, String)> = Vec::new();
        {
            let config = self.read_config();
            if let Some(deps) = config.dep_cache.get(id) {
                pending.extend(deps.iter().map(|d| (d.clone(), id.to_string())));
            }
            if let Some(package_name) = get_package(&config.packages, id) {
                let package = &config.packages[package_name];
                let sub_path = id.get(package_name.len() + 1..).unwrap_or_default();
                let package_parent = format!("{package_name}/");
                for key in [format!("./{sub_path}"), sub_path.to_string()] {
                    if let Some(deps) = package.dep_cache.get(&key) {
                        pending.extend(deps.iter().map(|d| (d.clone(), package_parent.clone())));
                    }
                }
            }
        }

        let mut out: Vec<String> = Vec::with_capacity(pending.len());
        for (dep, parent) in pending {
            let normalized = self.normalize_sync(&dep, Some(&parent))?;
            if !out.contains(&normalized) {
                out.push(normalized);
            }
        }
        Ok(out)
    }

    fn read_config(&self) -> RwLockReadGuard<'_, LoaderConfig> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_config(&self) -> RwLockWriteGuard<'_, LoaderConfig> {
        self.config.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_paths_locked(&self) -> Result<()> {
        if self.read_config().paths_locked {
            return Ok(());
        }
        let mut config = self.write_config();
        if !config.paths_locked {
            normalize_paths(&mut config, &self.base_uri, self.host.as_ref())?;
        }
        Ok(())
    }

    fn core_resolve(&self, name: &str, parent: Option<&str>, do_map: bool) -> Result<String> {
        self.ensure_paths_locked()?;
        let config = self.read_config();
        paths::core_resolve(&config, &self.base_uri, self.host.as_ref(), name, parent, do_map)
    }

    async fn boolean_conditional(&self, name: &str, parent: Option<&str>) -> Result<String> {
        let Some((base, condition)) = split_boolean_condition(name) else {
            return Ok(name.to_string());
        };
        let mut condition = parse_condition(condition);

        if self.builder {
            condition.module = self.normalize(&condition.module, parent).await?.id;
            return Ok(format!("{base}#?{}", serialize_condition(&condition)));
        }

        let value = self.resolve_condition(&condition, parent, true).await?;
        if truthy(Some(&value)) {
            Ok(base.to_string())
        } else {
            Ok(EMPTY_MODULE.to_string())
        }
    }

    async fn interpolate_conditional(
        &self,
        name: &str,
        parent: Option<&str>,
        parent_metadata: &Metadata,
    ) -> Result<String> {
        let Some(range) = interpolation_regex().find(name).map(|m| m.range()) else {
            return Ok(name.to_string());
        };
        let (head, tail) = (&name[..range.start], &name[range.end..]);
        let mut condition = parse_condition(&name[range.start + 2..range.end - 1]);

        if self.builder {
            let mut metadata = Metadata::default();
            condition.module = self
                .normalize_with(&condition.module, parent, &mut metadata, Some(parent_metadata))
                .await?;
            return Ok(format!("{head}#{{{}}}{tail}", serialize_condition(&condition)));
        }

        let Value::String(value) = self.resolve_condition(&condition, parent, false).await? else {
            return Err(Error::ConditionType(format!(
                "The condition value for {name} doesn't resolve to a string."
            )));
        };

        if value.contains('/') {
            let location = parent.map(|p| format!(" in {p}")).unwrap_or_default();
            return Err(Error::ConditionType(format!(
                "Unable to interpolate conditional {name}{location}\n\tThe condition value {value} cannot contain a \"/\" separator."
            )));
        }

        Ok(format!("{head}{value}{tail}"))
    }

    async fn resolve_condition(&self, condition: &Condition, parent: Option<&str>, boolean: bool) -> Result<Value> {
        let exports = self.import_condition_module(&condition.module, parent).await?;
        let value = read_member_expression(&condition.prop, &exports);

        if boolean && !matches!(value, Some(Value::Bool(_))) {
            return Err(Error::ConditionType(format!(
                "Condition {} did not resolve to a boolean.",
                serialize_condition(condition)
            )));
        }

        if condition.negate {
            return Ok(Value::Bool(!truthy(value)));
        }
        Ok(value.cloned().unwrap_or(Value::Null))
    }

    fn builtin_exports(&self, module: &str) -> Option<Value> {
        match module {
            SYSTEM_ENV => Some(self.system_env()),
            EMPTY_MODULE => Some(Value::Object(serde_json::Map::new())),
            _ => None,
        }
    }

    async fn import_condition_module(&self, module: &str, parent: Option<&str>) -> Result<Value> {
        if let Some(exports) = self.builtin_exports(module) {
            return Ok(exports);
        }

        let id = self.normalize(module, parent).await?.id;
        if let Some(exports) = self.builtin_exports(&id) {
            return Ok(exports);
        }

        trace!(module = %id, "import condition module");
        self.host.import_module(&id, parent).await
    }

    async fn plugin_resolve(
        &self,
        name: &str,
        parent: Option<&str>,
        metadata: &mut Metadata,
        parent_metadata: &Metadata,
    ) -> Result<String> {
        let plugin_first = self.read_config().plugin_first;
        let effective_parent = parent_metadata.plugin_argument.as_deref().or(parent);

        let Some(parsed) = parse_plugin(plugin_first, name) else {
            return self
                .package_resolve(name, effective_parent, metadata, Some(parent_metadata), false)
                .await;
        };

        metadata.plugin_name = Some(parsed.plugin.clone());
        let mut plugin_metadata = Metadata::default();
        let (argument, plugin) = futures::try_join!(
            self.package_resolve(&parsed.argument, effective_parent, metadata, Some(parent_metadata), true),
            self.normalize_with(&parsed.plugin, parent, &mut plugin_metadata, None),
        )?;

        if argument == plugin {
            return Err(Error::SelfPlugin { plugin });
        }

        let combined = combine_plugin_parts(plugin_first, &argument, &plugin);
        metadata.plugin_argument = Some(argument);
        metadata.plugin_name = Some(plugin);
        Ok(combined)
    }

    fn parent_map_match(&self, name: &str, parent_metadata: Option<&Metadata>, strings_only: bool) -> Option<(String, String)> {
        let package_name = parent_metadata?.package_name.as_deref()?;
        let config = self.read_config();
        let package = config.packages.get(package_name)?;
        let key = get_map_match(&package.map, name)?;
        if strings_only && !matches!(package.map.get(key), Some(MapTarget::Path(_))) {
            return None;
        }
        Some((package_name.to_string(), key.to_string()))
    }

    fn package_resolve<'a>(
        &'a self,
        name: &'a str,
        parent: Option<&'a str>,
        metadata: &'a mut Metadata,
        parent_metadata: Option<&'a Metadata>,
        skip_extensions: bool,
    ) -> BoxFuture<'a, Result<String>> {
        async move {
            if !name.starts_with("./") {
                if let Some((package_name, key)) = self.parent_map_match(name, parent_metadata, false) {
                    if let Some(mapped) = self
                        .do_map(&package_name, &key, name, metadata, skip_extensions)
                        .await?
                    {
                        return Ok(mapped);
                    }
                }
            }

            let normalized = self.core_resolve(name, parent, true)?;

            let (package_name, pending_config) = match self.claim_package(&normalized, metadata)? {
                Ownership::Unowned => return Ok(normalized),
                Ownership::ConfigDocument => {
                    metadata.load = Some(MetaFragment::json_document());
                    return Ok(normalized);
                }
                Ownership::Package { name, pending_config } => (name, pending_config),
            };

            if let Some(config_path) = pending_config {
                self.load_package_config(&package_name, &config_path).await?;
            }

            let sub_path = normalized.get(package_name.len() + 1..).unwrap_or_default();
            self.apply_package_config(&package_name, sub_path, metadata, skip_extensions)
                .await
        }
        .boxed()
    }

    fn package_resolve_sync(
        &self,
        name: &str,
        parent: Option<&str>,
        metadata: &mut Metadata,
        parent_metadata: Option<&Metadata>,
        skip_extensions: bool,
    ) -> Result<String> {
        if !name.starts_with('.') {
            if let Some((package_name, key)) = self.parent_map_match(name, parent_metadata, true) {
                if let Some(mapped) = self.do_map_sync(&package_name, &key, name, metadata, skip_extensions)? {
                    return Ok(mapped);
                }
            }
        }

        let normalized = self.core_resolve(name, parent, true)?;

        let package_name = match self.claim_package(&normalized, metadata)? {
            Ownership::Unowned | Ownership::ConfigDocument => return Ok(normalized),
            Ownership::Package { name, .. } => name,
        };

        let sub_path = normalized.get(package_name.len() + 1..).unwrap_or_default();
        self.apply_package_config_sync(&package_name, sub_path, metadata, skip_extensions)
    }

    /// Find the package owning `normalized`, registering it if needed.
    fn claim_package(&self, normalized: &str, metadata: &mut Metadata) -> Result<Ownership> {
        let config_match = {
            let config = self.read_config();
            self.config_paths
                .match_path(&config.package_config_paths, normalized)?
        };

        let mut config = self.write_config();
        let package_name = match &config_match {
            Some(found) => Some(found.package_name.clone()),
            None => get_package(&config.packages, normalized).map(str::to_string),
        };
        metadata.package_name.clone_from(&package_name);

        let Some(package_name) = package_name else {
            return Ok(Ownership::Unowned);
        };

        if config.is_package_config_key(normalized) {
            metadata.package_name = None;
            return Ok(Ownership::ConfigDocument);
        }

        let package = config.packages.entry(package_name.clone()).or_default();
        let pending_config = config_match
            .filter(|_| !package.configured)
            .map(|found| found.config_path);

        Ok(Ownership::Package {
            name: package_name,
            pending_config,
        })
    }

    /// Fetch and merge a package config document, at most once per package.
    ///
    /// A failed load leaves the table so the next request fetches again.
    async fn load_package_config(&self, package_name: &str, config_path: &str) -> Result<()> {
        self.write_config().add_package_config_key(config_path);

        let load = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            inflight
                .entry(package_name.to_string())
                .or_insert_with(|| {
                    fetch_package_config(
                        Arc::clone(&self.host),
                        Arc::clone(&self.config),
                        package_name.to_string(),
                        config_path.to_string(),
                    )
                })
                .clone()
        };

        let result = load.clone().await;
        if result.is_err() {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            // a newer load may already have taken the slot
            if inflight.get(package_name).is_some_and(|current| current.ptr_eq(&load)) {
                inflight.remove(package_name);
            }
        }
        result
    }

    fn package_entry(&self, package_name: &str, sub_path: &str, skip_extensions: bool) -> PackageEntry {
        let config = self.read_config();
        let Some(package) = config.packages.get(package_name) else {
            return PackageEntry::Root;
        };

        let sub_path = if sub_path.is_empty() {
            match &package.main {
                Some(main) => main.strip_prefix("./").unwrap_or(main).to_string(),
                None => return PackageEntry::Root,
            }
        } else {
            sub_path.to_string()
        };

        let map_hit = package_map_match(&config, package, package_name, &sub_path, skip_extensions);
        PackageEntry::Member { sub_path, map_hit }
    }

    fn package_fallback(&self, package_name: &str, sub_path: &str, skip_extensions: bool) -> String {
        let config = self.read_config();
        let with_extension = match config.packages.get(package_name) {
            Some(package) => add_default_extension(&config, package, package_name, sub_path, skip_extensions),
            None => sub_path.to_string(),
        };
        format!("{package_name}/{with_extension}")
    }

    async fn apply_package_config(
        &self,
        package_name: &str,
        sub_path: &str,
        metadata: &mut Metadata,
        skip_extensions: bool,
    ) -> Result<String> {
        let (sub_path, map_hit) = match self.package_entry(package_name, sub_path, skip_extensions) {
            PackageEntry::Root => return Ok(package_name.to_string()),
            PackageEntry::Member { sub_path, map_hit } => (sub_path, map_hit),
        };

        if let Some((key, map_path)) = map_hit {
            if let Some(mapped) = self
                .do_map(package_name, &key, &map_path, metadata, skip_extensions)
                .await?
            {
                return Ok(mapped);
            }
        }

        Ok(self.package_fallback(package_name, &sub_path, skip_extensions))
    }

    fn apply_package_config_sync(
        &self,
        package_name: &str,
        sub_path: &str,
        metadata: &mut Metadata,
        skip_extensions: bool,
    ) -> Result<String> {
        let (sub_path, map_hit) = match self.package_entry(package_name, sub_path, skip_extensions) {
            PackageEntry::Root => return Ok(package_name.to_string()),
            PackageEntry::Member { sub_path, map_hit } => (sub_path, map_hit),
        };

        if let Some((key, map_path)) = map_hit {
            if let Some(mapped) = self.do_map_sync(package_name, &key, &map_path, metadata, skip_extensions)? {
                return Ok(mapped);
            }
        }

        Ok(self.package_fallback(package_name, &sub_path, skip_extensions))
    }

    fn map_target(&self, package_name: &str, key: &str) -> Option<MapTarget> {
        self.read_config()
            .packages
            .get(package_name)
            .and_then(|p| p.map.get(key).cloned())
    }

    /// Apply the package map entry `key` to `path`.
    ///
    /// `None` means the entry does not apply and the caller falls back.
    fn do_map<'a>(
        &'a self,
        package_name: &'a str,
        key: &'a str,
        path: &'a str,
        metadata: &'a mut Metadata,
        skip_extensions: bool,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        async move {
            let path = path.strip_suffix('/').unwrap_or(path);

            let mapped = match self.map_target(package_name, key) {
                None => return Ok(None),
                Some(MapTarget::Path(mapped)) => mapped,
                Some(MapTarget::Conditional(_)) if self.builder => {
                    return Ok(Some(format!("{package_name}/#:{path}")));
                }
                Some(MapTarget::Conditional(branches)) => {
                    match self.select_branch(&branches, package_name).await? {
                        Some(mapped) => mapped,
                        None => return Ok(None),
                    }
                }
            };

            if !valid_mapping(key, &mapped, path) {
                return Ok(None);
            }

            trace!(package = package_name, key, %mapped, "package map");
            let target = format!("{mapped}{}", path.get(key.len()..).unwrap_or_default());
            let package_parent = format!("{package_name}/");
            let carried = metadata.clone();

            let normalized = self
                .package_resolve(&target, Some(&package_parent), metadata, Some(&carried), skip_extensions)
                .await?;
            let normalized = self
                .interpolate_conditional(&normalized, Some(&package_parent), &carried)
                .await?;
            Ok(Some(normalized))
        }
        .boxed()
    }

    fn do_map_sync(
        &self,
        package_name: &str,
        key: &str,
        path: &str,
        metadata: &mut Metadata,
        skip_extensions: bool,
    ) -> Result<Option<String>> {
        let path = path.strip_suffix('/').unwrap_or(path);

        let mapped = match self.map_target(package_name, key) {
            None => return Ok(None),
            Some(MapTarget::Conditional(_)) => {
                return Err(Error::SyncConditionalUnsupported {
                    map_key: key.to_string(),
                    package: package_name.to_string(),
                })
            }
            Some(MapTarget::Path(mapped)) => mapped,
        };

        if !valid_mapping(key, &mapped, path) {
            return Ok(None);
        }

        let target = format!("{mapped}{}", path.get(key.len()..).unwrap_or_default());
        let package_parent = format!("{package_name}/");
        let carried = metadata.clone();
        self.package_resolve_sync(&target, Some(&package_parent), metadata, Some(&carried), skip_extensions)
            .map(Some)
    }

    /// Pick the first conditional branch whose condition holds.
    ///
    /// All condition modules are imported up front.
    async fn select_branch(&self, branches: &IndexMap<String, String>, package_name: &str) -> Result<Option<String>> {
        let conditions: Vec<Condition> = branches.keys().map(|c| parse_condition(c)).collect();
        let exports = try_join_all(
            conditions
                .iter()
                .map(|c| self.import_condition_module(&c.module, Some(package_name))),
        )
        .await?;

        for ((condition, target), value) in conditions.iter().zip(branches.values()).zip(&exports) {
            let holds = truthy(read_member_expression(&condition.prop, value));
            if holds != condition.negate {
                return Ok(Some(target.clone()));
            }
        }
        Ok(None)
    }
}

/// Map key matching `./sub_path`, retried with the default extension added.
fn package_map_match(
    config: &LoaderConfig,
    package: &PackageConfig,
    package_name: &str,
    sub_path: &str,
    skip_extensions: bool,
) -> Option<(String, String)> {
    if package.map.is_empty() {
        return None;
    }

    let map_path = format!("./{sub_path}");
    if let Some(key) = get_map_match(&package.map, &map_path) {
        return Some((key.to_string(), map_path));
    }

    let extended = format!(
        "./{}",
        add_default_extension(config, package, package_name, sub_path, skip_extensions)
    );
    if extended == map_path {
        return None;
    }
    get_map_match(&package.map, &extended).map(|key| (key.to_string(), extended))
}

fn fetch_package_config(
    host: Arc<dyn LoaderHost>,
    config: Arc<RwLock<LoaderConfig>>,
    package_name: String,
    config_path: String,
) -> ConfigLoad {
    async move {
        debug!(package = %package_name, path = %config_path, "fetching package config");

        let document = host
            .fetch_config_document(&config_path)
            .await
            .map_err(|e| Error::config_fetch(&config_path, e))?;
        let fragment: PackageConfig = serde_json::from_value(document).map_err(|e| {
            Error::config_fetch(
                &config_path,
                Error::ConfigParse {
                    path: config_path.clone(),
                    message: e.to_string(),
                },
            )
        })?;

        let mut guard = config.write().unwrap_or_else(PoisonError::into_inner);
        let package = guard.packages.entry(package_name).or_default();
        package.merge(fragment, true);
        package.configured = true;
        Ok(())
    }
    .boxed()
    .shared()
}
