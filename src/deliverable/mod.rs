//! Deliverables and manifests.
//!
//! A deliverable is an opaque artifact produced by a worker: a type tag, a
//! content identifier and a self-reported status. The orchestrator never sees
//! content bytes. A manifest is the ordered list of deliverables returned by
//! one worker invocation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

pub mod store;

pub use store::{DeliverableStore, FsDeliverableStore, MemoryDeliverableStore, StoredDeliverable};

/// Self-reported completeness of a deliverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliverableStatus {
    Draft,
    Complete,
}

impl std::fmt::Display for DeliverableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliverableStatus::Draft => write!(f, "draft"),
            DeliverableStatus::Complete => write!(f, "complete"),
        }
    }
}

/// One artifact reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverable {
    /// Type tag matched against phase completion criteria (e.g. "structure")
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque content identifier
    pub id: String,
    pub status: DeliverableStatus,
}

impl Deliverable {
    pub fn new(kind: &str, id: &str, status: DeliverableStatus) -> Self {
        Self {
            kind: kind.to_string(),
            id: id.to_string(),
            status,
        }
    }

    pub fn complete(kind: &str, id: &str) -> Self {
        Self::new(kind, id, DeliverableStatus::Complete)
    }

    pub fn draft(kind: &str, id: &str) -> Self {
        Self::new(kind, id, DeliverableStatus::Draft)
    }

    pub fn is_complete(&self) -> bool {
        self.status == DeliverableStatus::Complete
    }
}

/// Ordered deliverable list returned by a single worker invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Vec<Deliverable>);

impl Manifest {
    pub fn new(deliverables: Vec<Deliverable>) -> Self {
        Self(deliverables)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Deliverable> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Deliverable] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Deliverable> {
        self.0
    }

    /// Distinct type tags present in the manifest.
    pub fn types(&self) -> BTreeSet<&str> {
        self.0.iter().map(|d| d.kind.as_str()).collect()
    }

    /// All entries carrying the given type tag.
    pub fn of_type<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Deliverable> + 'a {
        self.0.iter().filter(move |d| d.kind == kind)
    }

    /// The entries whose type is in `kinds`, in manifest order.
    pub fn restricted_to(&self, kinds: &BTreeSet<String>) -> Manifest {
        Manifest(
            self.0
                .iter()
                .filter(|d| kinds.contains(&d.kind))
                .cloned()
                .collect(),
        )
    }
}

impl From<Vec<Deliverable>> for Manifest {
    fn from(deliverables: Vec<Deliverable>) -> Self {
        Self(deliverables)
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a Deliverable;
    type IntoIter = std::slice::Iter<'a, Deliverable>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Content-address helper for workers that want identifiers derived from bytes.
pub struct ContentId;

impl ContentId {
    /// `sha256:<hex>` identifier for the given content.
    pub fn of(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        format!("sha256:{:x}", hasher.finalize())
    }
}
