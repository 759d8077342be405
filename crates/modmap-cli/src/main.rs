#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::struct_excessive_bools)]

mod commands;
mod host;
mod logging;
mod session;
mod settings;

use clap::Parser;
use miette::Result;
use session::{EnvFlags, Session};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "modmap")]
#[command(author, version, about = "Resolve module specifiers against a loader configuration", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Settings file (defaults to modmap.json in the working directory)
    #[arg(long, global = true, value_name = "FILE", env = "MODMAP_CONFIG")]
    config: Option<PathBuf>,

    /// Keep conditions symbolic instead of evaluating them
    #[arg(long, global = true)]
    builder: bool,

    /// Report `browser` as true in @system-env
    #[arg(long, global = true)]
    browser: bool,

    /// Report `node` as true in @system-env
    #[arg(long, global = true)]
    node: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Resolve a specifier, loading conditions and package configs as needed
    Resolve {
        /// The specifier to resolve (e.g., "jquery", "./utils.js", "style.css!css")
        specifier: String,

        /// Requesting module: a URL or a path relative to the working directory
        #[arg(long)]
        parent: Option<String>,
    },

    /// Resolve a specifier without any I/O
    ResolveSync {
        /// The specifier to resolve
        specifier: String,

        /// Requesting module: a URL or a path relative to the working directory
        #[arg(long)]
        parent: Option<String>,
    },

    /// Print the effective configuration as JSON
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    logging::init(cli.verbose, cli.json);

    let flags = EnvFlags {
        builder: cli.builder,
        browser: cli.browser,
        node: cli.node,
    };

    let command = match cli.command {
        None | Some(Commands::Version) => return commands::version::run(cli.json),
        Some(command) => command,
    };

    let session = Session::open(&cwd, cli.config.as_deref(), flags)?;
    let span = tracing::info_span!("cmd", cwd = %session.cwd.display());
    let _guard = span.enter();

    match command {
        Commands::Resolve { specifier, parent } => {
            commands::resolve::run(&session, &specifier, parent.as_deref(), cli.json)
        }
        Commands::ResolveSync { specifier, parent } => {
            commands::resolve::run_sync(&session, &specifier, parent.as_deref(), cli.json)
        }
        Commands::Config => commands::config::run(&session, cli.json),
        Commands::Version => commands::version::run(cli.json),
    }
}
