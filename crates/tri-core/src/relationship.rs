//! Candidate relationships, the type registry, and the relationship hash.
//!
//! The relationship hash always hashes `sort(source_poi_id,
//! target_poi_id) || type`, so `hash(A,B,T) == hash(B,A,T)` regardless
//! of whether `T` is declared directed or undirected: the hash's job is
//! only to key triangulation (so every worker proposing the same pair
//! and type converges on the same evidence bucket), not to carry
//! direction. Direction lives entirely in the stored record's
//! `source_poi_id`/`target_poi_id` fields, which a worker sets
//! according to the type's semantics (e.g. `CALLS` always
//! caller -> callee). [`TypeRegistry::is_directed`] is metadata
//! consumers can use to decide whether "A T B" implies "B T A"; it does
//! not change hash computation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Closed enumeration of relationship types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelationshipType {
    Calls,
    Defines,
    Imports,
    Uses,
    Extends,
    Implements,
    Contains,
    References,
}

impl RelationshipType {
    /// All known relationship types, in a stable order.
    pub const ALL: [RelationshipType; 8] = [
        RelationshipType::Calls,
        RelationshipType::Defines,
        RelationshipType::Imports,
        RelationshipType::Uses,
        RelationshipType::Extends,
        RelationshipType::Implements,
        RelationshipType::Contains,
        RelationshipType::References,
    ];

    /// Canonical wire name, e.g. `"CALLS"`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calls => "CALLS",
            Self::Defines => "DEFINES",
            Self::Imports => "IMPORTS",
            Self::Uses => "USES",
            Self::Extends => "EXTENDS",
            Self::Implements => "IMPLEMENTS",
            Self::Contains => "CONTAINS",
            Self::References => "REFERENCES",
        }
    }

    /// Parses a wire name back into a [`RelationshipType`].
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

/// Maps each relationship type to whether it is conceptually directed.
///
/// Data-driven by design: the pipeline consults this registry rather
/// than hardcoding directedness, so a future relationship type's
/// semantics can be declared without touching the hash function. This
/// flag does not affect [`relationship_hash`] (see the module docs) —
/// it is for consumers that care whether a relationship implies its
/// reverse.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    directed: BTreeMap<RelationshipType, bool>,
}

impl Default for TypeRegistry {
    /// All eight built-in types are directed: `CALLS` always flows
    /// caller to callee, `EXTENDS` subclass to superclass, and so on.
    fn default() -> Self {
        let mut directed = BTreeMap::new();
        for t in RelationshipType::ALL {
            directed.insert(t, true);
        }
        Self { directed }
    }
}

impl TypeRegistry {
    /// Registry with no types declared (everything defaults to directed
    /// when queried via [`TypeRegistry::is_directed`]).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            directed: BTreeMap::new(),
        }
    }

    /// Overrides a type's directedness. Intended for tests and for
    /// future relationship types introduced without a registry literal.
    pub fn set_directed(&mut self, t: RelationshipType, directed: bool) {
        self.directed.insert(t, directed);
    }

    /// Whether `t` is conceptually directed (`A T B` does not imply
    /// `B T A`). Informational only; see the module docs.
    #[must_use]
    pub fn is_directed(&self, t: RelationshipType) -> bool {
        self.directed.get(&t).copied().unwrap_or(true)
    }
}

/// A directed assertion `(source POI, target POI, type)` proposed by a
/// worker, keyed for triangulation by its [`relationship_hash`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRelationship {
    pub source_poi_id: String,
    pub target_poi_id: String,
    pub rel_type: RelationshipType,
}

impl CandidateRelationship {
    #[must_use]
    pub fn new(
        source_poi_id: impl Into<String>,
        target_poi_id: impl Into<String>,
        rel_type: RelationshipType,
    ) -> Self {
        Self {
            source_poi_id: source_poi_id.into(),
            target_poi_id: target_poi_id.into(),
            rel_type,
        }
    }

    /// Computes this candidate's relationship hash. `registry` is
    /// accepted for forward compatibility with consumers that key hash
    /// computation off type metadata, but today the hash is order
    /// independent for every type (see [`relationship_hash`]).
    #[must_use]
    pub fn hash(&self, registry: &TypeRegistry) -> String {
        relationship_hash(&self.source_poi_id, &self.target_poi_id, self.rel_type, registry)
    }
}

/// Computes the canonical relationship hash: `sort(source_poi_id,
/// target_poi_id) || type`. Always order-independent —
/// `hash(A,B,T) == hash(B,A,T)` — regardless of `registry`'s
/// directedness entry for `rel_type`, so that two workers proposing the
/// same pair and type always land in the same evidence bucket even if
/// one names the pair in reverse order. Deterministic: the same inputs
/// always produce the same digest.
#[must_use]
pub fn relationship_hash(
    source_poi_id: &str,
    target_poi_id: &str,
    rel_type: RelationshipType,
    _registry: &TypeRegistry,
) -> String {
    let mut hasher = Sha256::new();
    let (a, b) = if source_poi_id <= target_poi_id {
        (source_poi_id, target_poi_id)
    } else {
        (target_poi_id, source_poi_id)
    };
    hasher.update(a.as_bytes());
    hasher.update(b"\0");
    hasher.update(b.as_bytes());
    hasher.update(b"\0");
    hasher.update(rel_type.as_str().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directed_type_hash_is_still_order_independent() {
        let reg = TypeRegistry::default();
        let fwd = relationship_hash("fn:foo@a.js:1", "fn:bar@b.js:1", RelationshipType::Calls, &reg);
        let rev = relationship_hash("fn:bar@b.js:1", "fn:foo@a.js:1", RelationshipType::Calls, &reg);
        assert_eq!(fwd, rev, "the hash keys triangulation, not direction; CALLS stays directed via the stored record");
    }

    #[test]
    fn undirected_hash_is_order_independent() {
        let mut reg = TypeRegistry::default();
        reg.set_directed(RelationshipType::References, false);
        let fwd = relationship_hash("a", "b", RelationshipType::References, &reg);
        let rev = relationship_hash("b", "a", RelationshipType::References, &reg);
        assert_eq!(fwd, rev);
    }

    #[test]
    fn hash_is_deterministic() {
        let reg = TypeRegistry::default();
        let h1 = relationship_hash("a", "b", RelationshipType::Imports, &reg);
        let h2 = relationship_hash("a", "b", RelationshipType::Imports, &reg);
        assert_eq!(h1, h2);
    }

    #[test]
    fn different_types_yield_different_hashes() {
        let reg = TypeRegistry::default();
        let calls = relationship_hash("a", "b", RelationshipType::Calls, &reg);
        let uses = relationship_hash("a", "b", RelationshipType::Uses, &reg);
        assert_ne!(calls, uses);
    }

    #[test]
    fn parse_round_trips_all_types() {
        for t in RelationshipType::ALL {
            assert_eq!(RelationshipType::parse(t.as_str()), Some(t));
        }
    }
}
