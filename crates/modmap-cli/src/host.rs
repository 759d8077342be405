//! A [`LoaderHost`] backed by the filesystem and HTTP.
//!
//! Package config documents are read from `file:` URLs with `tokio::fs` and
//! fetched from `http(s):` URLs with `reqwest`. Condition modules come from
//! the settings `conditions` table; `.json` modules not listed there are
//! loaded like config documents.

use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use modmap_core::resolver::resolve_if_not_plain;
use modmap_core::{Error, LoaderHost};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

pub struct FsHost {
    client: reqwest::Client,
    conditions: IndexMap<String, Value>,
    registry: Vec<String>,
}

impl FsHost {
    /// Build a host. Condition keys are resolved against `base`.
    pub fn new(base: &Url, conditions: IndexMap<String, Value>, registry: Vec<String>) -> Self {
        let conditions = conditions
            .into_iter()
            .map(|(key, exports)| {
                let id = resolve_if_not_plain(&key, Some(base.as_str()))
                    .ok()
                    .flatten()
                    .unwrap_or(key);
                (id, exports)
            })
            .collect();

        Self {
            client: reqwest::Client::new(),
            conditions,
            registry,
        }
    }

    async fn read_document(&self, path: &str) -> modmap_core::Result<String> {
        let read_error = |message: String| Error::ConfigRead {
            path: path.to_string(),
            message,
        };

        let url = Url::parse(path).map_err(|e| read_error(e.to_string()))?;
        match url.scheme() {
            "file" => {
                let file = url
                    .to_file_path()
                    .map_err(|()| read_error("not a local file path".to_string()))?;
                tokio::fs::read_to_string(&file)
                    .await
                    .map_err(|e| read_error(e.to_string()))
            }
            "http" | "https" => {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|e| read_error(e.to_string()))?;
                response.text().await.map_err(|e| read_error(e.to_string()))
            }
            other => Err(read_error(format!("unsupported scheme {other}"))),
        }
    }
}

impl LoaderHost for FsHost {
    fn fetch_config_document<'a>(&'a self, path: &'a str) -> BoxFuture<'a, modmap_core::Result<Value>> {
        async move {
            debug!(%path, "reading config document");
            let text = self.read_document(path).await?;
            serde_json::from_str(&text).map_err(|e| Error::ConfigParse {
                path: path.to_string(),
                message: e.to_string(),
            })
        }
        .boxed()
    }

    fn import_module<'a>(
        &'a self,
        name: &'a str,
        _parent: Option<&'a str>,
    ) -> BoxFuture<'a, modmap_core::Result<Value>> {
        async move {
            if let Some(exports) = self.conditions.get(name) {
                return Ok(exports.clone());
            }
            if name.ends_with(".json") {
                return self.fetch_config_document(name).await.map_err(|e| Error::Import {
                    name: name.to_string(),
                    message: e.to_string(),
                });
            }
            Err(Error::ModuleNotFound {
                name: name.to_string(),
            })
        }
        .boxed()
    }

    fn registry_has(&self, name: &str) -> bool {
        self.registry.iter().any(|r| r == name)
    }

    fn warn(&self, message: &str, deprecation: bool) {
        if deprecation {
            warn!("deprecated: {message}");
        } else {
            warn!("{message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(dir: &std::path::Path) -> Url {
        Url::from_directory_path(dir).unwrap()
    }

    #[tokio::test]
    async fn test_reads_file_documents() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().canonicalize().unwrap();
        std::fs::write(dir_path.join("package.json"), r#"{ "main": "index.js" }"#).unwrap();

        let base = base(&dir_path);
        let host = FsHost::new(&base, IndexMap::new(), Vec::new());
        let doc = host
            .fetch_config_document(base.join("package.json").unwrap().as_str())
            .await
            .unwrap();
        assert_eq!(doc["main"], "index.js");
    }

    #[tokio::test]
    async fn test_missing_document() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().canonicalize().unwrap();
        let base = base(&dir_path);
        let host = FsHost::new(&base, IndexMap::new(), Vec::new());

        let err = host
            .fetch_config_document(base.join("missing/package.json").unwrap().as_str())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
    }

    #[tokio::test]
    async fn test_conditions_resolved_against_base() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().canonicalize().unwrap();
        let base = base(&dir_path);

        let mut conditions = IndexMap::new();
        conditions.insert("./env.js".to_string(), serde_json::json!({ "platform": "web" }));
        let host = FsHost::new(&base, conditions, vec!["react".to_string()]);

        let exports = host
            .import_module(base.join("env.js").unwrap().as_str(), None)
            .await
            .unwrap();
        assert_eq!(exports["platform"], "web");
        assert!(host.registry_has("react"));
        assert!(!host.registry_has("vue"));

        let err = host.import_module("file:///nowhere.js", None).await.unwrap_err();
        assert!(matches!(err, Error::ModuleNotFound { .. }));
    }
}
