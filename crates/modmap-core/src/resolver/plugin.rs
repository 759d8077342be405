//! `argument!plugin` syntax.
//!
//! With `plugin_first` set the order flips to `plugin!argument`.

/// A name split into its argument and plugin parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPlugin {
    pub argument: String,
    pub plugin: String,
}

/// Split a name on its last `!`.
///
/// In argument-first order an empty plugin part (`file.css!`) takes the
/// argument's extension, or the whole argument when it has none.
#[must_use]
pub fn parse_plugin(plugin_first: bool, name: &str) -> Option<ParsedPlugin> {
    let idx = name.rfind('!')?;
    let (before, after) = (&name[..idx], &name[idx + 1..]);

    if plugin_first {
        return Some(ParsedPlugin {
            argument: after.to_string(),
            plugin: before.to_string(),
        });
    }

    let plugin = if after.is_empty() {
        before.rfind('.').map_or(before, |dot| &before[dot + 1..])
    } else {
        after
    };

    Some(ParsedPlugin {
        argument: before.to_string(),
        plugin: plugin.to_string(),
    })
}

/// Split a parent id into its argument and plugin parts.
///
/// Parent ids are already normalized, so argument-first order splits on the
/// first `!` and keeps any plugin chain intact.
#[must_use]
pub fn parse_parent_plugin(plugin_first: bool, parent: &str) -> Option<ParsedPlugin> {
    if plugin_first {
        let idx = parent.rfind('!')?;
        return Some(ParsedPlugin {
            argument: parent[idx + 1..].to_string(),
            plugin: parent[..idx].to_string(),
        });
    }

    let idx = parent.find('!')?;
    Some(ParsedPlugin {
        argument: parent[..idx].to_string(),
        plugin: parent[idx + 1..].to_string(),
    })
}

/// Join a resolved argument and plugin back into one id.
#[must_use]
pub fn combine_plugin_parts(plugin_first: bool, argument: &str, plugin: &str) -> String {
    if plugin_first {
        format!("{plugin}!{argument}")
    } else {
        format!("{argument}!{plugin}")
    }
}
