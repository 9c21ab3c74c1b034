//! Follow edges.
//!
//! Edges are keyed by the unordered pair of their endpoints, so a
//! relationship is stored once no matter which side was merged first.
//! The first observed direction is kept as `source -> target`; seeing the
//! reverse direction later only flips `mutual`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::color::EDGE_COLOR;
use crate::identity::IdentityKey;

/// Canonical edge id: both endpoints, lexically ordered.
///
/// Kept as a pair rather than a joined string since identity keys are
/// opaque and may contain any separator. Serializes as `[lo, hi]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(IdentityKey, IdentityKey);

impl EdgeId {
    /// Id for the pair `(a, b)`; symmetric in its arguments.
    pub fn between(a: &IdentityKey, b: &IdentityKey) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(lo.clone(), hi.clone())
    }

    /// The endpoints, lower key first.
    pub fn endpoints(&self) -> (&IdentityKey, &IdentityKey) {
        (&self.0, &self.1)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.0, self.1)
    }
}

/// A follow relationship between two identities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: IdentityKey,
    pub target: IdentityKey,
    pub weight: f64,
    pub color: String,
    /// Set once both directions have been observed.
    #[serde(default)]
    pub mutual: bool,
}

impl Edge {
    /// `source` follows `target`.
    pub fn follows(source: IdentityKey, target: IdentityKey) -> Self {
        Self {
            id: EdgeId::between(&source, &target),
            source,
            target,
            weight: 1.0,
            color: EDGE_COLOR.to_string(),
            mutual: false,
        }
    }

    /// Whether either endpoint is `id`.
    pub fn touches(&self, id: &IdentityKey) -> bool {
        &self.source == id || &self.target == id
    }

    /// The endpoint opposite `id`, if `id` is an endpoint.
    pub fn other(&self, id: &IdentityKey) -> Option<&IdentityKey> {
        if &self.source == id {
            Some(&self.target)
        } else if &self.target == id {
            Some(&self.source)
        } else {
            None
        }
    }

    /// Whether this edge records `id` following someone.
    pub fn is_outgoing_from(&self, id: &IdentityKey) -> bool {
        &self.source == id || (self.mutual && &self.target == id)
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_symmetric() {
        let a = IdentityKey::new("a");
        let b = IdentityKey::new("b");
        assert_eq!(EdgeId::between(&a, &b), EdgeId::between(&b, &a));
        assert_eq!(Edge::follows(b.clone(), a.clone()).id.endpoints(), (&a, &b));
    }

    #[test]
    fn separator_in_keys_does_not_collide() {
        let left = EdgeId::between(&IdentityKey::new("a|b"), &IdentityKey::new("c"));
        let right = EdgeId::between(&IdentityKey::new("a"), &IdentityKey::new("b|c"));
        assert_ne!(left, right);
        assert_eq!(left.to_string(), right.to_string());
    }

    #[test]
    fn outgoing_respects_direction() {
        let a = IdentityKey::new("a");
        let b = IdentityKey::new("b");
        let mut edge = Edge::follows(a.clone(), b.clone());

        assert!(edge.is_outgoing_from(&a));
        assert!(!edge.is_outgoing_from(&b));

        edge.mutual = true;
        assert!(edge.is_outgoing_from(&b));
        assert_eq!(edge.other(&b), Some(&a));
    }
}
