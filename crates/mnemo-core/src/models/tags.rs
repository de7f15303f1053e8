//! Tag set with case-insensitive membership

use serde::{Deserialize, Serialize};

/// One tag of a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
    /// Tag name, in the casing it was first added with
    pub name: String,
    /// Added locally after the last confirmed sync
    #[serde(default)]
    pub local: bool,
}

/// The tags of a note.
///
/// Names are compared case-insensitively; the casing of the variant that was
/// added first is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(Vec<TagEntry>);

impl TagSet {
    /// Build a clean tag set (no local markers) from names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for name in names {
            set.push(name.as_ref(), false);
        }
        set
    }

    /// Add a tag locally. Returns `false` when it is already present.
    pub fn insert(&mut self, name: &str) -> bool {
        self.push(name, true)
    }

    /// Remove a tag. Returns `false` when it was not present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|entry| !same_tag(&entry.name, name));
        self.0.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|entry| same_tag(&entry.name, name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|entry| entry.name.as_str())
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.names().map(str::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reconcile with the tags the remote reports.
    ///
    /// Tags missing remotely are dropped unless they were added locally
    /// since the last confirmed sync; remote tags missing locally are added.
    pub fn synchronize<I, S>(&mut self, remote: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let remote: Vec<String> = remote
            .into_iter()
            .map(|name| name.as_ref().to_string())
            .collect();

        self.0.retain(|entry| {
            entry.local || remote.iter().any(|name| same_tag(name, &entry.name))
        });
        for name in &remote {
            self.push(name, false);
        }
    }

    /// Forget the local markers once the remote confirmed our tags.
    pub fn mark_synced(&mut self) {
        for entry in &mut self.0 {
            entry.local = false;
        }
    }

    /// Same tags, ignoring case, order and markers.
    pub fn equivalent(&self, other: &Self) -> bool {
        self.len() == other.len() && self.names().all(|name| other.contains(name))
    }

    /// Tags of both sets; entries of `self` come first.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for entry in &other.0 {
            merged.push(&entry.name, entry.local);
        }
        merged
    }

    fn push(&mut self, name: &str, local: bool) -> bool {
        let name = name.trim();
        if name.is_empty() || self.contains(name) {
            return false;
        }
        self.0.push(TagEntry {
            name: name.to_string(),
            local,
        });
        true
    }
}

fn same_tag(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}
