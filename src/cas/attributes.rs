//! Attribute values released by the CAS server.

use serde::{Deserialize, Serialize};
use std::collections::{btree_map::Entry, BTreeMap};

/// A CAS attribute element carries either one value or, when repeated, several.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Single(String),
    Multi(Vec<String>),
}

pub type Attributes = BTreeMap<String, AttrValue>;

impl AttrValue {
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::Single(value) => std::slice::from_ref(value),
            Self::Multi(values) => values,
        }
    }

    /// Append another occurrence of the same attribute.
    pub fn push(&mut self, value: String) {
        match self {
            Self::Single(existing) => {
                let first = std::mem::take(existing);
                *self = Self::Multi(vec![first, value]);
            }
            Self::Multi(values) => values.push(value),
        }
    }

    pub fn contains(&self, value: &str) -> bool {
        self.as_slice().iter().any(|candidate| candidate == value)
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multi(values)
    }
}

/// Record one occurrence of `name`; repeated names collapse into a list.
pub fn insert_value(attributes: &mut Attributes, name: &str, value: String) {
    match attributes.entry(name.to_string()) {
        Entry::Occupied(mut entry) => entry.get_mut().push(value),
        Entry::Vacant(entry) => {
            entry.insert(AttrValue::Single(value));
        }
    }
}

/// Keep only the attributes named in `allowlist`.
#[must_use]
pub fn restrict(attributes: Attributes, allowlist: &[String]) -> Attributes {
    attributes
        .into_iter()
        .filter(|(name, _)| allowlist.iter().any(|allowed| allowed == name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_values_become_a_list() {
        let mut attributes = Attributes::new();
        insert_value(&mut attributes, "groups", "staff".into());
        insert_value(&mut attributes, "groups", "sysadmin".into());
        insert_value(&mut attributes, "sn", "Doe".into());
        assert_eq!(
            attributes.get("groups"),
            Some(&AttrValue::Multi(vec!["staff".into(), "sysadmin".into()]))
        );
        assert_eq!(attributes.get("sn"), Some(&AttrValue::Single("Doe".into())));
    }

    #[test]
    fn restrict_drops_unlisted_keys() {
        let mut attributes = Attributes::new();
        attributes.insert("sn".into(), "Doe".into());
        attributes.insert("email".into(), "j@x.com".into());
        let allowlist = vec!["sn".to_string(), "uid".to_string()];

        let restricted = restrict(attributes, &allowlist);
        assert_eq!(restricted.len(), 1);
        assert_eq!(restricted.get("sn"), Some(&AttrValue::Single("Doe".into())));
    }

    #[test]
    fn restrict_with_empty_allowlist_is_empty() {
        let mut attributes = Attributes::new();
        attributes.insert("sn".into(), "Doe".into());
        assert!(restrict(attributes, &[]).is_empty());
    }

    #[test]
    fn serializes_as_string_or_list() {
        let mut attributes = Attributes::new();
        attributes.insert("sn".into(), "Doe".into());
        attributes.insert("groups".into(), vec!["a".to_string(), "b".to_string()].into());
        let json = serde_json::to_value(&attributes).unwrap();
        assert_eq!(json, serde_json::json!({"groups": ["a", "b"], "sn": "Doe"}));
        let back: Attributes = serde_json::from_value(json).unwrap();
        assert_eq!(back, attributes);
    }
}
