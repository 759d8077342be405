#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod config;
pub mod error;
pub mod host;
pub mod resolver;
pub mod version;

pub use config::{ConfigUpdate, DefaultExtension, LoaderConfig, MapTarget, PackageConfig};
pub use error::{Error, Result};
pub use host::{LoaderHost, MemoryHost};
pub use resolver::{Metadata, Resolved, Resolver, ResolverOptions};
pub use version::{version_string, VERSION};
