use crate::session::Session;
use miette::{IntoDiagnostic, Result};

/// Print the effective configuration after normalization.
///
/// Always JSON; `--json` only switches to compact output.
pub fn run(session: &Session, json: bool) -> Result<()> {
    let config = session.resolver.normalized_snapshot().into_diagnostic()?;
    let out = if json {
        serde_json::to_string(&config)
    } else {
        serde_json::to_string_pretty(&config)
    }
    .into_diagnostic()?;
    println!("{out}");
    Ok(())
}
