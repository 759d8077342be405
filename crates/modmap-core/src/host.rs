//! Collaborators the resolver talks to.
//!
//! The resolver never reads files or executes modules itself. Package config
//! documents, condition modules and the registry are reached through a
//! [`LoaderHost`].

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::warn;

/// Services a resolver needs from the surrounding loader.
pub trait LoaderHost: Send + Sync {
    /// Fetch and parse a package configuration document.
    fn fetch_config_document<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Value>>;

    /// Load a condition module and return its exports.
    ///
    /// `name` is already normalized; `parent` is the requesting name.
    fn import_module<'a>(
        &'a self,
        name: &'a str,
        parent: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Value>>;

    /// Whether `name` is already present in the module registry.
    fn registry_has(&self, _name: &str) -> bool {
        false
    }

    /// Report a warning. `deprecation` marks configuration that still works
    /// but is scheduled for removal.
    fn warn(&self, message: &str, deprecation: bool) {
        warn!(deprecation, "{message}");
    }
}

/// In-memory [`LoaderHost`].
///
/// Holds modules, config documents and registry entries in tables and keeps
/// counters so callers can observe what the resolver asked for.
#[derive(Debug, Default)]
pub struct MemoryHost {
    modules: RwLock<HashMap<String, Value>>,
    documents: RwLock<HashMap<String, Value>>,
    registry: RwLock<HashSet<String>>,
    fetch_count: AtomicUsize,
    import_count: AtomicUsize,
    fetched: Mutex<Vec<String>>,
    warnings: Mutex<Vec<(String, bool)>>,
}

impl MemoryHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition module.
    #[must_use]
    pub fn with_module(self, name: impl Into<String>, exports: Value) -> Self {
        self.insert_module(name, exports);
        self
    }

    /// Add a package config document.
    #[must_use]
    pub fn with_document(self, path: impl Into<String>, document: Value) -> Self {
        self.insert_document(path, document);
        self
    }

    /// Mark a name as present in the registry.
    #[must_use]
    pub fn with_registered(self, name: impl Into<String>) -> Self {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into());
        self
    }

    pub fn insert_module(&self, name: impl Into<String>, exports: Value) {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), exports);
    }

    pub fn insert_document(&self, path: impl Into<String>, document: Value) {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), document);
    }

    /// Number of config document fetches so far.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Number of condition module imports so far.
    #[must_use]
    pub fn import_count(&self) -> usize {
        self.import_count.load(Ordering::SeqCst)
    }

    /// Config document paths in fetch order.
    #[must_use]
    pub fn fetched(&self) -> Vec<String> {
        self.fetched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Warnings received, with their deprecation flag.
    #[must_use]
    pub fn warnings(&self) -> Vec<(String, bool)> {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LoaderHost for MemoryHost {
    fn fetch_config_document<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Value>> {
        async move {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            self.fetched
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(path.to_string());

            // let concurrent resolutions interleave with the fetch
            tokio::task::yield_now().await;

            self.documents
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(path)
                .cloned()
                .ok_or_else(|| Error::ModuleNotFound {
                    name: path.to_string(),
                })
        }
        .boxed()
    }

    fn import_module<'a>(
        &'a self,
        name: &'a str,
        _parent: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Value>> {
        async move {
            self.import_count.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;

            self.modules
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(name)
                .cloned()
                .ok_or_else(|| Error::ModuleNotFound {
                    name: name.to_string(),
                })
        }
        .boxed()
    }

    fn registry_has(&self, name: &str) -> bool {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    fn warn(&self, message: &str, deprecation: bool) {
        warn!(deprecation, "{message}");
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((message.to_string(), deprecation));
    }
}
