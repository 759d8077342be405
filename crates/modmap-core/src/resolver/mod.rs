//! Module name resolution.
//!
//! Turns a requested specifier plus the requesting module into a canonical
//! identifier and the load metadata that goes with it. The pipeline runs
//! boolean conditionals, plugin syntax, package and global maps, `paths`,
//! package config loading, `#{}` interpolation and meta attachment.

mod condition;
mod engine;
pub mod meta;
mod names;
mod package;
mod paths;
mod plugin;

pub use condition::{
    parse_condition, serialize_condition, Condition, SystemEnv, EMPTY_MODULE, SYSTEM_ENV,
};
pub use engine::{Resolved, Resolver, ResolverOptions};
pub use meta::{LoaderSetting, MetaFragment};
pub use names::{apply_paths, get_map_match, is_plain, resolve_if_not_plain};
pub use package::{add_default_extension, get_package, valid_mapping, PackageConfigMatch};
pub use plugin::{combine_plugin_parts, parse_parent_plugin, parse_plugin, ParsedPlugin};

use serde::Serialize;

/// What a resolution learned about a module besides its identifier.
///
/// Created fresh for every request. The owning package is referenced by
/// name; its configuration lives in the shared [`crate::LoaderConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_argument: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<MetaFragment>,
}
