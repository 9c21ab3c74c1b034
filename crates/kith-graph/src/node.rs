//! Graph nodes and partial node updates.

use serde::{Deserialize, Serialize};

use crate::color::{node_color, NEUTRAL_COLOR};
use crate::identity::{IdentityKey, Profile};

/// Label shown on a node whose profile has not resolved yet.
pub const PLACEHOLDER_LABEL: &str = "Loading...";

/// Layout position owned by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One participant in the graph. The store holds at most one per id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: IdentityKey,
    pub label: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    /// Reputation in `[0, 1]`. `None` means unknown, which is not the
    /// same thing as untrusted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_score: Option<f64>,
    #[serde(default)]
    pub is_focus_identity: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl Node {
    /// A node with a label and its deterministic colour.
    pub fn new(id: IdentityKey, label: impl Into<String>) -> Self {
        let color = node_color(&id);
        Self {
            id,
            label: label.into(),
            color,
            profile: None,
            trust_score: None,
            is_focus_identity: false,
            position: None,
        }
    }

    /// Placeholder inserted before the profile resolves.
    pub fn placeholder(id: IdentityKey) -> Self {
        Self {
            color: NEUTRAL_COLOR.to_string(),
            ..Self::new(id, PLACEHOLDER_LABEL)
        }
    }

    /// Node built from a resolved profile.
    pub fn from_profile(id: IdentityKey, profile: Profile) -> Self {
        let label = profile.label_for(&id);
        Self {
            profile: Some(profile),
            ..Self::new(id, label)
        }
    }

    /// Node with no profile, labelled with the short key.
    pub fn fallback(id: IdentityKey) -> Self {
        let label = id.short();
        Self::new(id, label)
    }

    #[must_use]
    pub fn with_focus(mut self, is_focus: bool) -> Self {
        self.is_focus_identity = is_focus;
        self
    }

    #[must_use]
    pub fn with_trust_score(mut self, score: Option<f64>) -> Self {
        self.trust_score = score.and_then(sanitize_score);
        self
    }

    /// Whether the label is still the loading placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.profile.is_none() && self.label == PLACEHOLDER_LABEL
    }
}

/// Partial update merged over an existing node.
///
/// `None` fields leave the stored value alone. `position` is only ever
/// applied to a node that has none yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdate {
    pub id: IdentityKey,
    pub label: Option<String>,
    pub color: Option<String>,
    pub profile: Option<Profile>,
    pub trust_score: Option<f64>,
    pub is_focus_identity: Option<bool>,
    pub position: Option<Position>,
}

impl NodeUpdate {
    pub fn new(id: IdentityKey) -> Self {
        Self {
            id,
            label: None,
            color: None,
            profile: None,
            trust_score: None,
            is_focus_identity: None,
            position: None,
        }
    }

    /// Enrichment carrying a resolved profile plus the derived label and colour.
    pub fn profile(id: IdentityKey, profile: Profile) -> Self {
        Self {
            label: Some(profile.label_for(&id)),
            color: Some(node_color(&id)),
            profile: Some(profile),
            ..Self::new(id)
        }
    }

    /// Trust score attachment.
    pub fn trust_score(id: IdentityKey, score: f64) -> Self {
        Self {
            trust_score: Some(score),
            ..Self::new(id)
        }
    }

    /// Fold this update into `node`, returning whether anything changed.
    pub(crate) fn apply_to(self, node: &mut Node) -> bool {
        let before = node.clone();
        if let Some(label) = self.label {
            node.label = label;
        }
        if let Some(color) = self.color.filter(|c| !c.is_empty()) {
            node.color = color;
        }
        if let Some(profile) = self.profile {
            node.profile = Some(profile);
        }
        if let Some(score) = self.trust_score.and_then(sanitize_score) {
            node.trust_score = Some(score);
        }
        if let Some(is_focus) = self.is_focus_identity {
            node.is_focus_identity = is_focus;
        }
        if node.position.is_none() {
            node.position = self.position;
        }
        *node != before
    }

    /// Materialise a fresh node, filling missing fields with safe defaults.
    pub(crate) fn into_node(self) -> Node {
        let mut node = Node {
            id: self.id.clone(),
            label: String::new(),
            color: NEUTRAL_COLOR.to_string(),
            profile: None,
            trust_score: None,
            is_focus_identity: false,
            position: None,
        };
        self.apply_to(&mut node);
        node
    }
}

impl From<Node> for NodeUpdate {
    fn from(node: Node) -> Self {
        Self {
            id: node.id,
            label: Some(node.label),
            color: Some(node.color),
            profile: node.profile,
            trust_score: node.trust_score,
            is_focus_identity: Some(node.is_focus_identity),
            position: node.position,
        }
    }
}

/// Clamp a score into `[0, 1]`, dropping NaN.
pub fn sanitize_score(score: f64) -> Option<f64> {
    if score.is_nan() {
        None
    } else {
        Some(score.clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_neutral() {
        let node = Node::placeholder(IdentityKey::new("abc"));
        assert_eq!(node.label, PLACEHOLDER_LABEL);
        assert_eq!(node.color, NEUTRAL_COLOR);
        assert!(node.is_placeholder());
    }

    #[test]
    fn update_keeps_existing_position() {
        let mut node = Node::fallback(IdentityKey::new("abc"));
        node.position = Some(Position::new(1.0, 2.0));

        let update = NodeUpdate {
            position: Some(Position::new(9.0, 9.0)),
            label: Some("renamed".into()),
            ..NodeUpdate::new(node.id.clone())
        };
        assert!(update.apply_to(&mut node));
        assert_eq!(node.position, Some(Position::new(1.0, 2.0)));
        assert_eq!(node.label, "renamed");
    }

    #[test]
    fn empty_update_changes_nothing() {
        let mut node = Node::fallback(IdentityKey::new("abc"));
        let before = node.clone();
        assert!(!NodeUpdate::new(node.id.clone()).apply_to(&mut node));
        assert_eq!(node, before);
    }

    #[test]
    fn missing_fields_degrade_to_defaults() {
        let node = NodeUpdate::new(IdentityKey::new("abc")).into_node();
        assert_eq!(node.label, "");
        assert_eq!(node.color, NEUTRAL_COLOR);
    }

    #[test]
    fn scores_are_sanitized() {
        assert_eq!(sanitize_score(1.7), Some(1.0));
        assert_eq!(sanitize_score(-0.2), Some(0.0));
        assert_eq!(sanitize_score(f64::NAN), None);

        let node = Node::fallback(IdentityKey::new("x")).with_trust_score(Some(f64::NAN));
        assert_eq!(node.trust_score, None);
    }
}
