use miette::{IntoDiagnostic, Result};
use modmap_core::{version_string, VERSION};

pub fn run(json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({ "name": "modmap", "version": VERSION });
        println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
    } else {
        println!("{}", version_string());
    }
    Ok(())
}
