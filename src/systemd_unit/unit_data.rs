use std::path::{Path, PathBuf};

use ordered_multimap::list_ordered_multimap::ListOrderedMultimap;

use super::{parse_bool, parser, split_strv};

/// A single `key=value` occurrence, together with the file it came from.
/// `source` is `None` for values that were synthesized rather than parsed.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct DirectiveValue {
    pub(crate) raw: String,
    pub(crate) source: Option<PathBuf>,
}

impl DirectiveValue {
    pub(crate) fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            source: None,
        }
    }

    pub(crate) fn to_bool(&self) -> Option<bool> {
        parse_bool(self.raw.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Entries {
    data: ListOrderedMultimap<String, DirectiveValue>,
}

/// Ordered store of a unit's directives.
///
/// Keys may repeat; every occurrence is kept in file order. The reset
/// semantic (`key=` clears the accumulated list) is applied at lookup time so
/// drop-ins merged later still observe the full history.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct SystemdUnitData {
    sections: ListOrderedMultimap<String, Entries>,
}

impl SystemdUnitData {
    pub(crate) fn new() -> Self {
        Self {
            sections: Default::default(),
        }
    }

    /// Load from a string
    pub(crate) fn load_from_str(data: &str) -> Result<Self, super::Error> {
        parser::Parser::new(data).parse()
    }

    /// Number of unique sections (i.e. with different names)
    pub(crate) fn len(&self) -> usize {
        self.sections.keys_len()
    }

    /// Appends `key=value` to `section`
    pub(crate) fn append<S, K>(&mut self, section: S, key: K, value: impl Into<String>)
    where
        S: Into<String>,
        K: Into<String>,
    {
        self.append_value(section, key, DirectiveValue::new(value));
    }

    pub(crate) fn append_value<S, K>(&mut self, section: S, key: K, value: DirectiveValue)
    where
        S: Into<String>,
        K: Into<String>,
    {
        self.sections
            .entry(section.into())
            .or_insert_entry(Entries::default())
            .into_mut()
            .data
            .append(key.into(), value);
    }

    /// Applies `f` to every raw value in every section, in place.
    pub(crate) fn map_values(&mut self, mut f: impl FnMut(&mut String)) {
        for (_, entries) in self.sections.iter_mut() {
            for (_, value) in entries.data.iter_mut() {
                f(&mut value.raw);
            }
        }
    }

    /// Stamp every value that doesn't have one yet with `source`.
    pub(crate) fn set_source(&mut self, source: &Path) {
        for (_, entries) in self.sections.iter_mut() {
            for (_, value) in entries.data.iter_mut() {
                if value.source.is_none() {
                    value.source = Some(source.to_path_buf());
                }
            }
        }
    }

    pub(crate) fn merge_from(&mut self, other: &SystemdUnitData) {
        for (section, entries) in other.sections.iter() {
            for (key, value) in entries.data.iter() {
                self.append_value(section.clone(), key.clone(), value.clone());
            }
        }
    }

    pub(crate) fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(|k| k.as_str())
    }

    pub(crate) fn section_entries<'a>(
        &'a self,
        name: &str,
    ) -> impl DoubleEndedIterator<Item = (&'a str, &'a DirectiveValue)> + 'a {
        self.sections
            .get(name)
            .into_iter()
            .flat_map(|e| e.data.iter())
            .map(|(k, v)| (k.as_str(), v))
    }

    /// All occurrences of `key` in `section`, in file order, resets included.
    pub(crate) fn lookup_all_raw(&self, section: &str, key: &str) -> Vec<&DirectiveValue> {
        self.sections
            .get(section)
            .map(|e| e.data.get_all(key).collect())
            .unwrap_or_default()
    }

    /// The effective value list for `key`: an empty value resets everything
    /// accumulated before it.
    pub(crate) fn lookup_all_values(&self, section: &str, key: &str) -> Vec<&DirectiveValue> {
        let mut res = Vec::new();
        for v in self.lookup_all_raw(section, key) {
            if v.raw.is_empty() {
                res.clear();
            } else {
                res.push(v);
            }
        }
        res
    }

    pub(crate) fn lookup_all(&self, section: &str, key: &str) -> Vec<String> {
        self.lookup_all_values(section, key)
            .iter()
            .map(|v| v.raw.clone())
            .collect()
    }

    /// Space-separated list values, flattened (e.g. `Wants=a.service b.service`).
    pub(crate) fn lookup_all_strv(&self, section: &str, key: &str) -> Vec<String> {
        self.lookup_all_values(section, key)
            .iter()
            .flat_map(|v| split_strv(v.raw.as_str()))
            .map(String::from)
            .collect()
    }

    /// Like `lookup_all_strv`, but keeping each entry's source file.
    pub(crate) fn lookup_all_strv_values(
        &self,
        section: &str,
        key: &str,
    ) -> Vec<(String, Option<PathBuf>)> {
        self.lookup_all_values(section, key)
            .iter()
            .flat_map(|&v| {
                split_strv(v.raw.as_str()).map(move |s| (s.to_string(), v.source.clone()))
            })
            .collect()
    }

    /// The effective last value for `key` in `section`
    pub(crate) fn lookup_last(&self, section: &str, key: &str) -> Option<String> {
        self.lookup_last_value(section, key).map(|v| v.raw.clone())
    }

    pub(crate) fn lookup_last_value(&self, section: &str, key: &str) -> Option<&DirectiveValue> {
        self.lookup_all_values(section, key).pop()
    }

    pub(crate) fn lookup_bool(&self, section: &str, key: &str) -> Option<bool> {
        self.lookup_last_value(section, key).and_then(|v| v.to_bool())
    }
}
