//! Collision pair routing.
//!
//! The scene host reports collisions as pairs of entity names. Roles are
//! encoded in those names by substring (`"KeyEntity"`, `"metaBoxSkin"`,
//! `"hitEntity_magicBox"`, `"HandJoint:Right_thumbTip"`), so every matching
//! rule lives in [`classify_pair`] and modules only ever see a [`CollisionKind`].

use crate::sensor::{HandJoint, JointName, JOINT_ENTITY_PREFIX};
use serde::{Deserialize, Serialize};

/// Name of the grab-able key proxy.
pub const KEY_ENTITY: &str = "KeyEntity";
/// Name of the collision skin laid over the physical box.
pub const SKIN_ENTITY: &str = "metaBoxSkin";
/// Name of the treasure box's key-turn hit zone.
pub const HIT_ZONE_ENTITY: &str = "hitEntity_magicBox";

/// Whether a contact started or ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPhase {
    Began,
    Ended,
}

/// A collision pair as reported by the scene host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionPairEvent {
    pub name_a: String,
    pub name_b: String,
    pub phase: CollisionPhase,
}

impl CollisionPairEvent {
    pub fn began(name_a: impl Into<String>, name_b: impl Into<String>) -> Self {
        Self {
            name_a: name_a.into(),
            name_b: name_b.into(),
            phase: CollisionPhase::Began,
        }
    }

    pub fn ended(name_a: impl Into<String>, name_b: impl Into<String>) -> Self {
        Self {
            name_a: name_a.into(),
            name_b: name_b.into(),
            phase: CollisionPhase::Ended,
        }
    }

    pub fn kind(&self) -> CollisionKind {
        classify_pair(&self.name_a, &self.name_b)
    }
}

/// Semantic role of a single collider, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColliderRole {
    Joint(JointName),
    Key,
    HitZone,
    Skin,
}

/// What a collision pair means to the box modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionKind {
    /// A hand joint touching the key
    JointOnKey(JointName),
    /// The key inside the treasure box hit zone
    KeyInHitZone,
    /// A hand joint touching the box skin
    JointOnSkin(JointName),
    Unrelated,
}

/// Role of one collider name, if it has one.
pub fn classify_name(name: &str) -> Option<ColliderRole> {
    if name.contains(JOINT_ENTITY_PREFIX) {
        return joint_in_name(name).map(ColliderRole::Joint);
    }
    if name.contains(KEY_ENTITY) {
        return Some(ColliderRole::Key);
    }
    if name.contains(HIT_ZONE_ENTITY) {
        return Some(ColliderRole::HitZone);
    }
    if name.contains(SKIN_ENTITY) {
        return Some(ColliderRole::Skin);
    }
    None
}

/// Classify a collision pair. Order of the two names does not matter.
pub fn classify_pair(name_a: &str, name_b: &str) -> CollisionKind {
    use ColliderRole::*;

    match (classify_name(name_a), classify_name(name_b)) {
        (Some(Joint(j)), Some(Key)) | (Some(Key), Some(Joint(j))) => CollisionKind::JointOnKey(j),
        (Some(Key), Some(HitZone)) | (Some(HitZone), Some(Key)) => CollisionKind::KeyInHitZone,
        (Some(Joint(j)), Some(Skin)) | (Some(Skin), Some(Joint(j))) => {
            CollisionKind::JointOnSkin(j)
        }
        _ => CollisionKind::Unrelated,
    }
}

// Longest contained joint name wins: "indexFingerTip" must not shadow
// "indexFingerIntermediateTip" and vice versa.
fn joint_in_name(name: &str) -> Option<JointName> {
    HandJoint::ALL
        .iter()
        .flat_map(|&joint| [JointName::left(joint), JointName::right(joint)])
        .map(|joint| (joint, joint.entity_name()))
        .filter(|(_, entity)| name.contains(entity.as_str()))
        .max_by_key(|(_, entity)| entity.len())
        .map(|(joint, _)| joint)
}
