use std::time::SystemTime;

use crate::core::{
    hash::HashMap,
    id::Id,
    match_style::MatchStyle,
    uri::{
        Uri,
        WildcardUri,
    },
};

/// One stored pattern in a [`PatternIndex`].
#[derive(Debug)]
pub struct PatternEntry<T> {
    pub id: Id,
    pub uri: WildcardUri,
    pub match_style: MatchStyle,
    pub created: SystemTime,
    // Insertion order; total order over entries even when created timestamps collide.
    sequence: u64,
    pub value: T,
}

/// Per-match-style snapshot of the IDs stored in a [`PatternIndex`].
///
/// The three lists are disjoint: every entry lives under exactly one match style.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MatchStyleLists {
    pub exact: Vec<Id>,
    pub prefix: Vec<Id>,
    pub wildcard: Vec<Id>,
}

/// An index of URI patterns, answering which stored patterns match a concrete URI.
///
/// Backs both the broker's subscription table and the dealer's registration table. Each entry is
/// keyed structurally by its (URI, match style) pair, so two additions of the same pair share one
/// entry.
pub struct PatternIndex<T> {
    entries: HashMap<Id, PatternEntry<T>>,
    exact: HashMap<WildcardUri, Id>,
    prefix: HashMap<WildcardUri, Id>,
    wildcard: HashMap<WildcardUri, Id>,
    next_sequence: u64,
}

impl<T> Default for PatternIndex<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::default(),
            exact: HashMap::default(),
            prefix: HashMap::default(),
            wildcard: HashMap::default(),
            next_sequence: 0,
        }
    }
}

impl<T> PatternIndex<T> {
    fn uris_for_style(&self, match_style: MatchStyle) -> &HashMap<WildcardUri, Id> {
        match match_style {
            MatchStyle::Exact => &self.exact,
            MatchStyle::Prefix => &self.prefix,
            MatchStyle::Wildcard => &self.wildcard,
        }
    }

    fn uris_for_style_mut(&mut self, match_style: MatchStyle) -> &mut HashMap<WildcardUri, Id> {
        match match_style {
            MatchStyle::Exact => &mut self.exact,
            MatchStyle::Prefix => &mut self.prefix,
            MatchStyle::Wildcard => &mut self.wildcard,
        }
    }

    /// Checks if an entry exists with the given ID.
    pub fn contains_id(&self, id: Id) -> bool {
        self.entries.contains_key(&id)
    }

    /// Looks up the entry stored for the exact (URI, match style) pair.
    pub fn lookup(&self, uri: &WildcardUri, match_style: MatchStyle) -> Option<Id> {
        self.uris_for_style(match_style).get(uri).copied()
    }

    /// Inserts a new entry under a fresh ID.
    ///
    /// Callers must first check [`Self::lookup`]; the structural key must not already be present.
    pub fn insert(&mut self, id: Id, uri: WildcardUri, match_style: MatchStyle, value: T) {
        self.uris_for_style_mut(match_style).insert(uri.clone(), id);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.insert(
            id,
            PatternEntry {
                id,
                uri,
                match_style,
                created: SystemTime::now(),
                sequence,
                value,
            },
        );
    }

    /// Removes an entry by ID.
    pub fn remove(&mut self, id: Id) -> Option<PatternEntry<T>> {
        let entry = self.entries.remove(&id)?;
        self.uris_for_style_mut(entry.match_style).remove(&entry.uri);
        Some(entry)
    }

    pub fn get(&self, id: Id) -> Option<&PatternEntry<T>> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: Id) -> Option<&mut PatternEntry<T>> {
        self.entries.get_mut(&id)
    }

    /// All stored entries matching a concrete URI, across all three match styles.
    ///
    /// Ordered exact, then prefix, then wildcard; deterministic within each style.
    pub fn matches(&self, uri: &Uri) -> Vec<Id> {
        let mut ids = Vec::new();
        if let Some(id) = self.exact.get(&WildcardUri::from(uri)) {
            ids.push(*id);
        }
        let mut prefix = self
            .prefix
            .iter()
            .filter(|(stored, _)| prefix_matches(stored.as_ref(), uri.as_ref()))
            .map(|(_, id)| *id)
            .collect::<Vec<_>>();
        prefix.sort_unstable();
        ids.extend(prefix);
        let mut wildcard = self
            .wildcard
            .iter()
            .filter(|(stored, _)| wildcard_matches(stored, uri))
            .map(|(_, id)| *id)
            .collect::<Vec<_>>();
        wildcard.sort_unstable();
        ids.extend(wildcard);
        ids
    }

    /// The single authoritative entry for a concrete URI.
    ///
    /// Exact matches win over prefix matches, which win over wildcard matches. Within a style the
    /// most specific stored URI wins (longest prefix; most non-empty wildcard components), with
    /// ties broken by earliest creation, then lowest ID.
    pub fn best_match(&self, uri: &Uri) -> Option<Id> {
        if let Some(id) = self.exact.get(&WildcardUri::from(uri)) {
            return Some(*id);
        }
        if let Some(id) = self.best_in_style(uri, MatchStyle::Prefix) {
            return Some(id);
        }
        self.best_in_style(uri, MatchStyle::Wildcard)
    }

    fn best_in_style(&self, uri: &Uri, match_style: MatchStyle) -> Option<Id> {
        self.uris_for_style(match_style)
            .iter()
            .filter(|(stored, _)| match match_style {
                MatchStyle::Exact => stored.as_ref() == uri.as_ref(),
                MatchStyle::Prefix => prefix_matches(stored.as_ref(), uri.as_ref()),
                MatchStyle::Wildcard => wildcard_matches(stored, uri),
            })
            .map(|(stored, id)| {
                let specificity = match match_style {
                    MatchStyle::Prefix => stored.as_ref().len(),
                    _ => stored.split().filter(|component| !component.is_empty()).count(),
                };
                (specificity, self.entries[id].sequence, *id)
            })
            // Highest specificity; for equal specificity, earliest creation.
            .min_by(|(a_specificity, a_sequence, _), (b_specificity, b_sequence, _)| {
                b_specificity
                    .cmp(a_specificity)
                    .then(a_sequence.cmp(b_sequence))
            })
            .map(|(_, _, id)| id)
    }

    /// Snapshot of all stored IDs per match style.
    pub fn list(&self) -> MatchStyleLists {
        let mut lists = MatchStyleLists {
            exact: self.exact.values().copied().collect(),
            prefix: self.prefix.values().copied().collect(),
            wildcard: self.wildcard.values().copied().collect(),
        };
        lists.exact.sort_unstable();
        lists.prefix.sort_unstable();
        lists.wildcard.sort_unstable();
        lists
    }
}

/// Checks if a stored prefix URI matches a concrete URI, aligned on component boundaries.
fn prefix_matches(stored: &str, concrete: &str) -> bool {
    concrete.starts_with(stored)
        && (concrete.len() == stored.len() || concrete.as_bytes()[stored.len()] == b'.')
}

/// Checks if a stored wildcard URI matches a concrete URI.
///
/// Component counts must be equal; empty stored components match any single concrete component.
fn wildcard_matches(stored: &WildcardUri, concrete: &Uri) -> bool {
    let mut stored = stored.split();
    let mut concrete = concrete.split();
    loop {
        match (stored.next(), concrete.next()) {
            (Some(stored), Some(concrete)) => {
                if !stored.is_empty() && stored != concrete {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}
