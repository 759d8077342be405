//! Wires settings, host and resolver together for one CLI invocation.

use crate::host::FsHost;
use crate::settings::Settings;
use miette::{miette, IntoDiagnostic, Result};
use modmap_core::{LoaderConfig, Resolver, ResolverOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Flags that shape the resolver environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvFlags {
    pub builder: bool,
    pub browser: bool,
    pub node: bool,
}

pub struct Session {
    pub resolver: Resolver,
    pub cwd: PathBuf,
    pub base: Url,
}

impl Session {
    /// Load settings and build a configured resolver rooted at `cwd`.
    pub fn open(cwd: &Path, config: Option<&Path>, flags: EnvFlags) -> Result<Self> {
        let cwd = cwd
            .canonicalize()
            .map_err(|e| miette!("Invalid working directory {}: {e}", cwd.display()))?;
        let base = Url::from_directory_path(&cwd)
            .map_err(|()| miette!("Cannot express {} as a file URL", cwd.display()))?;

        let settings = Settings::discover(&cwd, config)?;
        let host = FsHost::new(&base, settings.conditions, settings.registry);

        let options = ResolverOptions {
            base_uri: base.to_string(),
            builder: flags.builder,
            browser: flags.browser,
            node: flags.node,
        };
        let resolver = Resolver::with_options(LoaderConfig::new(base.as_str()), Arc::new(host), options);
        resolver.configure(settings.loader).into_diagnostic()?;

        tracing::debug!(base = %base, "session ready");
        Ok(Self { resolver, cwd, base })
    }

    /// Turn a `--parent` argument into a parent id.
    ///
    /// Absolute URLs pass through; anything else is a path relative to the
    /// working directory.
    pub fn parent_id(&self, parent: &str) -> Result<String> {
        if let Ok(url) = Url::parse(parent) {
            // a drive letter parses as a one-letter scheme
            if url.scheme().len() > 1 {
                return Ok(url.to_string());
            }
        }

        let path = self.cwd.join(parent);
        Url::from_file_path(&path)
            .map(|u| u.to_string())
            .map_err(|()| miette!("Cannot express {} as a file URL", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_roots_base_url_at_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::open(dir.path(), None, EnvFlags::default()).unwrap();
        let config = session.resolver.snapshot();

        assert!(config.base_url.starts_with("file:///"));
        assert!(config.base_url.ends_with('/'));
        assert_eq!(config.base_url, session.base.as_str());
    }

    #[test]
    fn test_parent_id() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::open(dir.path(), None, EnvFlags::default()).unwrap();

        assert_eq!(
            session.parent_id("https://cdn.example/app.js").unwrap(),
            "https://cdn.example/app.js"
        );
        let local = session.parent_id("src/main.js").unwrap();
        assert!(local.starts_with("file:///"));
        assert!(local.ends_with("/src/main.js"));
    }
}
