// Hand-joint and tracked-object samples fed in by the host's sensor pipeline.

mod joint;
mod state;

pub use joint::{Chirality, HandJoint, JointName, ParseJointError, JOINT_ENTITY_PREFIX};
pub use state::{SensorFeed, SensorSnapshot, SensorState};

use crate::geometry::Pose;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;


/// One joint sample from the latest hand-tracking frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HandJointSample {
    pub joint: JointName,
    pub pose: Pose,
    pub tracked: bool,
}

/// Opaque anchor identifier, stable for the lifetime of one tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorId(pub Uuid);

impl AnchorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AnchorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A recognized physical box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObjectAnchor {
    pub id: AnchorId,
    pub pose: Pose,
    pub tracked: bool,
    /// Identity of the reference object this anchor was matched against
    pub reference_object: String,
}

/// Lifecycle event carried by an anchor update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorEvent {
    Added,
    Updated,
    Removed,
}

/// One element of the object-tracking update stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorUpdate {
    pub event: AnchorEvent,
    pub anchor: TrackedObjectAnchor,
}
