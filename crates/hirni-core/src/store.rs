//! In-memory study specification: an ordered sequence of [`SpecRecord`]s.
//!
//! A store is loaded in full, changed only through [`SpecStore::merge`], and
//! written back in full. Its order is canonical (see [`crate::sort_key`]) so
//! that repeated derivation over unchanged inputs persists byte-identically.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::IdentityConflictError;
use crate::record::SpecRecord;
use crate::sort_key::OrderKey;

/// Derives the identity key of non-DICOM records.
///
/// DICOM series are always keyed by their series instance UID.
pub trait IdentityScheme: fmt::Debug + Send + Sync {
    fn generic_key(&self, record: &SpecRecord) -> String;
}

/// Built-in identity schemes for generic entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenericIdentity {
    /// The location alone.
    #[default]
    Location,
    /// Entity type and location, so a file and a directory at the same
    /// path stay distinct.
    TypedLocation,
}

impl IdentityScheme for GenericIdentity {
    fn generic_key(&self, record: &SpecRecord) -> String {
        match self {
            Self::Location => record.location.clone(),
            Self::TypedLocation => format!("{}:{}", record.entity_type, record.location),
        }
    }
}

/// What a merge did to one incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeChange {
    pub identity: String,
    pub location: String,
    pub kind: ChangeKind,
}

/// Result of [`SpecStore::merge`].
#[derive(Debug)]
pub struct MergeOutcome {
    pub store: SpecStore,
    /// One entry per accepted incoming record, in input order.
    pub changes: Vec<MergeChange>,
    /// Incoming records rejected for contradicting an earlier candidate,
    /// and stored duplicates dropped for contradicting the first record.
    pub conflicts: Vec<IdentityConflictError>,
    /// Identities that appeared more than once in the store before merging.
    pub collapsed: Vec<String>,
}

impl MergeOutcome {
    /// Whether the merged store differs from the one merged into.
    pub fn changed(&self) -> bool {
        !self.collapsed.is_empty()
            || self
                .changes
                .iter()
                .any(|c| c.kind != ChangeKind::Unchanged)
    }
}

#[derive(Clone)]
pub struct SpecStore {
    records: Vec<SpecRecord>,
    identity: Arc<dyn IdentityScheme>,
}

impl fmt::Debug for SpecStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecStore")
            .field("records", &self.records.len())
            .field("identity", &self.identity)
            .finish()
    }
}

impl Default for SpecStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SpecStore {
    /// An empty store keyed by [`GenericIdentity::Location`].
    pub fn new() -> Self {
        Self::with_identity(Arc::new(GenericIdentity::default()))
    }

    pub fn with_identity(identity: Arc<dyn IdentityScheme>) -> Self {
        Self {
            records: Vec::new(),
            identity,
        }
    }

    /// Wrap records as found, keeping their order.
    pub fn from_records(records: Vec<SpecRecord>) -> Self {
        Self::new().replace_records(records)
    }

    /// Same scheme, different records (order kept).
    pub fn replace_records(mut self, records: Vec<SpecRecord>) -> Self {
        self.records = records;
        self
    }

    pub fn records(&self) -> &[SpecRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<SpecRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpecRecord> {
        self.records.iter()
    }

    pub fn identity_of(&self, record: &SpecRecord) -> String {
        match (&record.uid, record.entity_type.is_dicom_series()) {
            (Some(uid), true) => uid.clone(),
            _ => self.identity.generic_key(record),
        }
    }

    pub fn find(&self, identity: &str) -> Option<&SpecRecord> {
        self.records.iter().find(|r| self.identity_of(r) == identity)
    }

    pub fn order_key(&self, record: &SpecRecord) -> OrderKey {
        OrderKey::new(
            record.entity_type.as_str(),
            &self.identity_of(record),
            &record.location,
        )
    }

    /// Put records into canonical order. The sort is stable.
    pub fn sort(&mut self) {
        let mut keyed: Vec<(OrderKey, SpecRecord)> = std::mem::take(&mut self.records)
            .into_iter()
            .map(|r| (self.order_key(&r), r))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        self.records = keyed.into_iter().map(|(_, r)| r).collect();
    }

    /// Merge candidate records into this store.
    ///
    /// A candidate matching an existing record by identity takes over the
    /// immutable provenance; of its editable fields only those are applied
    /// where the existing field is unapproved or the candidate is itself
    /// approved. Unmatched candidates are appended. The result is sorted.
    pub fn merge(self, incoming: impl IntoIterator<Item = SpecRecord>) -> MergeOutcome {
        let mut store = self;
        let mut conflicts = Vec::new();
        let collapsed = store.collapse_duplicates(&mut conflicts);
        let mut index: HashMap<String, usize> = store
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (store.identity_of(r), i))
            .collect();
        let mut candidates: HashMap<String, SpecRecord> = HashMap::new();
        let mut changes = Vec::new();

        for record in incoming {
            let identity = store.identity_of(&record);

            if let Some(earlier) = candidates.get(&identity)
                && let Some(conflict) = provenance_conflict(&identity, earlier, &record)
            {
                debug!(%identity, key = conflict.key, "conflicting candidates");
                conflicts.push(conflict);
                continue;
            }
            candidates.insert(identity.clone(), record.clone());

            let kind = match index.get(&identity) {
                Some(&i) => {
                    let merged = merge_record(&store.records[i], record);
                    let kind = if merged.content_eq(&store.records[i]) {
                        ChangeKind::Unchanged
                    } else {
                        ChangeKind::Updated
                    };
                    store.records[i] = merged;
                    kind
                }
                None => {
                    index.insert(identity.clone(), store.records.len());
                    store.records.push(record);
                    ChangeKind::Created
                }
            };
            debug!(%identity, ?kind, "merged specification snippet");
            let location = store.records[index[&identity]].location.clone();
            changes.push(MergeChange {
                identity,
                location,
                kind,
            });
        }

        store.sort();
        MergeOutcome {
            store,
            changes,
            conflicts,
            collapsed,
        }
    }

    /// Fold records sharing an identity into the first of them, the way a
    /// candidate is merged. A duplicate with contradicting provenance is
    /// dropped and reported. Returns the identities that were collapsed.
    fn collapse_duplicates(&mut self, conflicts: &mut Vec<IdentityConflictError>) -> Vec<String> {
        let mut first: HashMap<String, usize> = HashMap::new();
        let mut kept: Vec<SpecRecord> = Vec::with_capacity(self.records.len());
        let mut collapsed = Vec::new();

        for record in std::mem::take(&mut self.records) {
            let identity = self.identity_of(&record);
            let Some(i) = first.get(&identity).copied() else {
                first.insert(identity, kept.len());
                kept.push(record);
                continue;
            };
            match provenance_conflict(&identity, &kept[i], &record) {
                Some(conflict) => {
                    debug!(%identity, key = conflict.key, "dropping conflicting duplicate");
                    conflicts.push(conflict);
                }
                None => {
                    debug!(%identity, "collapsing duplicate snippet");
                    kept[i] = merge_record(&kept[i], record);
                }
            }
            if !collapsed.contains(&identity) {
                collapsed.push(identity);
            }
        }
        self.records = kept;
        collapsed
    }

    /// Editable fields holding exactly one distinct non-empty value across
    /// all records. Records lacking a field do not count.
    pub fn uniform_values(&self) -> BTreeMap<String, Value> {
        let mut seen: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
        for record in &self.records {
            for (key, field) in record.fields() {
                if field.is_empty() {
                    continue;
                }
                if let Some(value) = &field.value {
                    let values = seen.entry(key).or_default();
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
            }
        }
        seen.into_iter()
            .filter(|(_, values)| values.len() == 1)
            .map(|(key, values)| (key.to_string(), values[0].clone()))
            .collect()
    }

    /// Seed a brand-new record with the store's uniform values (unapproved).
    ///
    /// Only keys the record's type allows are seeded. Fields the record
    /// already carries are left alone, and records whose identity already
    /// exists are returned unchanged.
    pub fn seed_uniform(&self, mut record: SpecRecord) -> SpecRecord {
        if self.find(&self.identity_of(&record)).is_some() {
            return record;
        }
        for (key, value) in self.uniform_values() {
            if record.entity_type.allows_key(&key) && !record.has_field(&key) {
                debug!(%key, "seeding uniform value");
                record.set_field(&key, crate::Field::derived(value));
            }
        }
        record
    }
}

fn merge_record(existing: &SpecRecord, incoming: SpecRecord) -> SpecRecord {
    let mut fields = existing.clone();
    let mut merged = incoming;
    std::mem::swap(merged.fields_mut(), fields.fields_mut());
    // `merged` now has incoming provenance and existing fields;
    // `fields` holds the incoming fields.
    for (key, candidate) in std::mem::take(fields.fields_mut()) {
        let keep_existing = merged
            .field(&key)
            .is_some_and(|current| current.approved && !candidate.approved);
        if !keep_existing {
            merged.fields_mut().insert(key, candidate);
        }
    }
    merged
}

fn provenance_conflict(
    identity: &str,
    earlier: &SpecRecord,
    later: &SpecRecord,
) -> Option<IdentityConflictError> {
    let pairs: [(&'static str, &str, &str); 4] = [
        ("type", earlier.entity_type.as_str(), later.entity_type.as_str()),
        ("location", &earlier.location, &later.location),
        ("dataset_id", &earlier.dataset_id, &later.dataset_id),
        (
            "dataset_refcommit",
            &earlier.dataset_refcommit,
            &later.dataset_refcommit,
        ),
    ];
    pairs
        .into_iter()
        .find(|(_, a, b)| a != b)
        .map(|(key, a, b)| IdentityConflictError {
            identity: identity.to_string(),
            key,
            existing: a.to_string(),
            incoming: b.to_string(),
        })
}
