use thiserror::Error;

/// Result alias used throughout the resolver.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Core error type for modmap operations.
///
/// Errors are `Clone` because a single package configuration fetch can be
/// awaited by several resolutions at once and each of them gets the failure.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(
        "Plugin {plugin} cannot load itself, make sure it is excluded from any wildcard meta configuration via a custom loader: false rule."
    )]
    SelfPlugin { plugin: String },

    #[error("Synchronous conditional normalization not supported sync normalizing {map_key} in {package}")]
    SyncConditionalUnsupported { map_key: String, package: String },

    #[error("{0}")]
    ConditionType(String),

    #[error("Unable to fetch package configuration file {path}\n\t{source}")]
    ConfigFetch {
        path: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Unable to resolve {specifier} to {parent}")]
    InvalidSpecifier { specifier: String, parent: String },

    #[error("Module {name} not found")]
    ModuleNotFound { name: String },

    #[error("Unable to import {name}: {message}")]
    Import { name: String, message: String },

    #[error("Failed to read config at {path}: {message}")]
    ConfigRead { path: String, message: String },

    #[error("Failed to parse config at {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Wrap a failure that happened while loading a package config document.
    #[must_use]
    pub fn config_fetch(path: impl Into<String>, source: Error) -> Self {
        Self::ConfigFetch {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn invalid_specifier(specifier: &str, parent: Option<&str>) -> Self {
        Self::InvalidSpecifier {
            specifier: specifier.to_string(),
            parent: parent.unwrap_or_default().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_fetch_names_path() {
        let err = Error::config_fetch(
            "https://localhost/pkg/package.json",
            Error::ModuleNotFound {
                name: "https://localhost/pkg/package.json".to_string(),
            },
        );
        let msg = err.to_string();
        assert!(msg.starts_with("Unable to fetch package configuration file https://localhost/pkg/package.json"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_self_plugin_message() {
        let err = Error::SelfPlugin {
            plugin: "https://localhost/a.js".to_string(),
        };
        assert!(err.to_string().contains("cannot load itself"));
    }
}
