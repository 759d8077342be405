use crate::session::Session;
use miette::{IntoDiagnostic, Result};
use modmap_core::Metadata;
use serde::Serialize;

/// Resolution result for JSON output.
#[derive(Serialize)]
struct ResolveOutput<'a> {
    specifier: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<&'a str>,
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Metadata>,
    deps: Vec<String>,
}

/// Resolve `specifier`, importing condition modules and fetching package
/// config documents as needed.
pub fn run(session: &Session, specifier: &str, parent: Option<&str>, json: bool) -> Result<()> {
    let parent = parent.map(|p| session.parent_id(p)).transpose()?;

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let resolved = runtime
        .block_on(session.resolver.normalize(specifier, parent.as_deref()))
        .into_diagnostic()?;

    print_result(session, specifier, parent.as_deref(), &resolved.id, Some(&resolved.metadata), json)
}

/// Resolve `specifier` without any I/O.
pub fn run_sync(session: &Session, specifier: &str, parent: Option<&str>, json: bool) -> Result<()> {
    let parent = parent.map(|p| session.parent_id(p)).transpose()?;
    let id = session
        .resolver
        .normalize_sync(specifier, parent.as_deref())
        .into_diagnostic()?;

    print_result(session, specifier, parent.as_deref(), &id, None, json)
}

fn print_result(
    session: &Session,
    specifier: &str,
    parent: Option<&str>,
    id: &str,
    metadata: Option<&Metadata>,
    json: bool,
) -> Result<()> {
    let deps = session.resolver.dep_cache_for(id).into_diagnostic()?;
    tracing::debug!(specifier, id, deps = deps.len(), "resolved");

    if json {
        let out = ResolveOutput {
            specifier,
            parent,
            id,
            metadata,
            deps,
        };
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
        return Ok(());
    }

    println!("{id}");
    for dep in deps {
        println!("  dep {dep}");
    }
    Ok(())
}
