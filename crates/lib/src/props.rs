//! The namespaced property store.
//!
//! Boot environment configuration lives as user properties on the BE
//! root dataset, all under the `org.zectl` namespace. Plugins get a
//! dotted sub-namespace (`org.zectl.grub`), so a fully qualified name
//! looks like `org.zectl:bootloader` or `org.zectl.grub:boot`. The
//! in-memory set is loaded once per handle and carries provenance so
//! unpersisted defaults are distinguishable from explicit settings.

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{err, Result};

/// The property namespace owned by this tool.
pub const PROP_NAMESPACE: &str = "org.zectl";

/// Maximum length the dataset store accepts for dataset and property
/// names; composed names are validated against this before being
/// handed to the store.
pub(crate) const MAX_NAME_LEN: usize = 256;

/// Provenance of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertySource {
    /// Set directly on the BE root dataset.
    Local,
    /// Received via replication.
    Received,
    /// Compiled-in default, not persisted.
    Default,
}

impl fmt::Display for PropertySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PropertySource::Local => "local",
            PropertySource::Received => "received",
            PropertySource::Default => "default",
        };
        f.write_str(s)
    }
}

/// A property value plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Property {
    pub value: String,
    pub source: PropertySource,
}

impl Property {
    pub fn local(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            source: PropertySource::Local,
        }
    }
}

/// Split a user-supplied property name into `(namespace, suffix)`.
///
/// Without a `:` prefix the core namespace is assumed; with one, the
/// prefix becomes a sub-namespace of the core namespace:
///
/// - `bootloader` parses to `(org.zectl, bootloader)`
/// - `grub:boot` parses to `(org.zectl.grub, boot)`
pub fn parse_qualified_name(input: &str) -> Result<(String, String)> {
    let (namespace, suffix) = match input.split_once(':') {
        Some((prefix, suffix)) => (format!("{PROP_NAMESPACE}.{prefix}"), suffix),
        None => (PROP_NAMESPACE.to_string(), input),
    };
    if namespace.len() + 1 + suffix.len() > MAX_NAME_LEN {
        return Err(err!(
            NameTooLong,
            "Property name '{input}' exceeds max property name length"
        ));
    }
    Ok((namespace, suffix.to_string()))
}

/// The loaded, namespace-scoped property set of a handle.
#[derive(Debug, Clone, Default)]
pub struct PropertySet {
    entries: BTreeMap<String, Property>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a dataset's full user property list, retaining
    /// entries whose qualified name begins with `namespace` followed by
    /// `.` or `:`.
    pub fn filter_by_namespace(all: &BTreeMap<String, Property>, namespace: &str) -> Self {
        let entries = all
            .iter()
            .filter(|(name, _)| {
                name.strip_prefix(namespace)
                    .is_some_and(|rest| rest.starts_with('.') || rest.starts_with(':'))
            })
            .map(|(name, prop)| (name.clone(), prop.clone()))
            .collect();
        Self { entries }
    }

    /// Parse `prefix:name=value` and insert it. Fails if the `=` is
    /// missing or a property of the same qualified name was already
    /// added.
    pub fn add_set_property(&mut self, input: &str) -> Result<()> {
        let (namespace, rest) = parse_qualified_name(input)?;
        let Some((name, value)) = rest.split_once('=') else {
            return Err(err!(
                InvalidConfig,
                "Property '{input}' is missing a '=value' part"
            ));
        };
        let qualified = format!("{namespace}:{name}");
        if self.entries.contains_key(&qualified) {
            return Err(err!(AlreadyExists, "Property '{qualified}' set twice"));
        }
        self.entries.insert(qualified, Property::local(value));
        Ok(())
    }

    /// Look up `namespace:name`, returning the stored value or the
    /// empty string when unset. Callers interpret empty specially
    /// (e.g. "no bootloader configured").
    pub fn get(&self, name: &str, namespace: &str) -> &str {
        self.entry(name, namespace).map(|p| p.value.as_str()).unwrap_or("")
    }

    pub fn entry(&self, name: &str, namespace: &str) -> Option<&Property> {
        self.entries.get(&format!("{namespace}:{name}"))
    }

    /// Add `name=value` under `namespace` as an unpersisted default,
    /// unless a property of that exact qualified name already exists.
    /// Explicitly-set properties are never overwritten, including ones
    /// set to an empty string.
    pub fn add_default(&mut self, name: &str, value: &str, namespace: &str) -> Result<()> {
        let qualified = format!("{namespace}:{name}");
        if qualified.len() > MAX_NAME_LEN {
            return Err(err!(
                NameTooLong,
                "Property name '{qualified}' exceeds max property name length"
            ));
        }
        self.entries.entry(qualified).or_insert(Property {
            value: value.to_string(),
            source: PropertySource::Default,
        });
        Ok(())
    }

    /// Merge every entry of `defaults` whose namespace matches into
    /// this set, without overwriting existing entries.
    pub fn merge_defaults(&mut self, defaults: &PropertySet, namespace: &str) {
        for (qualified, prop) in &defaults.entries {
            let matches = qualified
                .strip_prefix(namespace)
                .is_some_and(|rest| rest.starts_with(':') || rest.starts_with('.'));
            if !matches {
                continue;
            }
            self.entries
                .entry(qualified.clone())
                .or_insert_with(|| prop.clone());
        }
    }

    /// Record a persisted local property under its qualified name.
    pub fn insert_local(&mut self, qualified: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(qualified.into(), Property::local(value));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_parse_qualified_name() -> Result<()> {
        assert_eq!(
            parse_qualified_name("bootloader")?,
            (PROP_NAMESPACE.to_string(), "bootloader".to_string())
        );
        assert_eq!(
            parse_qualified_name("grub:boot")?,
            (format!("{PROP_NAMESPACE}.grub"), "boot".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_parse_qualified_name_too_long() {
        let long = "x".repeat(MAX_NAME_LEN);
        let e = parse_qualified_name(&long).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NameTooLong);
    }

    #[test]
    fn test_add_set_property_roundtrip() -> Result<()> {
        let mut props = PropertySet::new();
        props.add_set_property("grub:boot=/boot")?;
        assert_eq!(props.get("boot", &format!("{PROP_NAMESPACE}.grub")), "/boot");
        Ok(())
    }

    #[test]
    fn test_add_set_property_missing_equals() {
        let mut props = PropertySet::new();
        let e = props.add_set_property("grub:boot").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_add_set_property_duplicate() {
        let mut props = PropertySet::new();
        props.add_set_property("bootloader=grub").unwrap();
        let e = props.add_set_property("bootloader=systemdboot").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_value_may_contain_equals() -> Result<()> {
        let mut props = PropertySet::new();
        props.add_set_property("kernel_options=root=ZFS")?;
        assert_eq!(props.get("kernel_options", PROP_NAMESPACE), "root=ZFS");
        Ok(())
    }

    #[test]
    fn test_merge_defaults_never_overwrites() -> Result<()> {
        let mut props = PropertySet::new();
        // Explicitly set to the empty string; the default must not win.
        props.insert_local(format!("{PROP_NAMESPACE}:bootloader"), "");

        let mut defaults = PropertySet::new();
        defaults.add_default("bootloader", "grub", PROP_NAMESPACE)?;
        defaults.add_default("bootpoolroot", "", PROP_NAMESPACE)?;
        props.merge_defaults(&defaults, PROP_NAMESPACE);

        let entry = props.entry("bootloader", PROP_NAMESPACE).unwrap();
        assert_eq!(entry.value, "");
        assert_eq!(entry.source, PropertySource::Local);
        let added = props.entry("bootpoolroot", PROP_NAMESPACE).unwrap();
        assert_eq!(added.source, PropertySource::Default);
        Ok(())
    }

    #[test]
    fn test_filter_by_namespace() {
        let mut all = BTreeMap::new();
        all.insert("org.zectl:bootloader".to_string(), Property::local("grub"));
        all.insert("org.zectl.grub:boot".to_string(), Property::local("/boot"));
        all.insert("org.zectly:other".to_string(), Property::local("x"));
        all.insert("com.example:foo".to_string(), Property::local("y"));

        let props = PropertySet::filter_by_namespace(&all, PROP_NAMESPACE);
        assert_eq!(props.len(), 2);
        assert_eq!(props.get("bootloader", PROP_NAMESPACE), "grub");
        assert_eq!(props.get("boot", "org.zectl.grub"), "/boot");
    }
}
