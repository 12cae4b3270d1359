use super::{AnchorEvent, AnchorId, AnchorUpdate, HandJointSample, JointName, TrackedObjectAnchor};
use crate::geometry::Pose;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Pull-based view of the latest sensor data.
pub trait SensorFeed: Send + Sync {
    fn current_joint_poses(&self) -> HashMap<JointName, HandJointSample>;
    fn current_object_anchors(&self) -> HashMap<AnchorId, TrackedObjectAnchor>;

    /// Both maps, taken together for one tick.
    fn snapshot(&self) -> SensorSnapshot {
        SensorSnapshot {
            joints: self.current_joint_poses(),
            anchors: self.current_object_anchors(),
        }
    }
}

/// Latest joint and anchor samples, written concurrently by the feed pumps.
///
/// Joint samples are overwritten frame by frame. Anchors live from `Added`
/// until `Removed`.
#[derive(Clone, Default)]
pub struct SensorState {
    joints: Arc<DashMap<JointName, HandJointSample>>,
    anchors: Arc<DashMap<AnchorId, TrackedObjectAnchor>>,
}

impl SensorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the sample for one joint.
    pub fn update_joint(&self, sample: HandJointSample) {
        self.joints.insert(sample.joint, sample);
    }

    /// Apply an anchor update and return the lifecycle change it caused.
    ///
    /// An `Updated` for an unknown anchor is promoted to `Added`; a `Removed`
    /// for an unknown anchor changes nothing and returns `None`.
    pub fn apply_anchor_update(&self, update: &AnchorUpdate) -> Option<AnchorEvent> {
        let id = update.anchor.id;

        match update.event {
            AnchorEvent::Added | AnchorEvent::Updated => {
                let previous = self.anchors.insert(id, update.anchor.clone());
                match previous {
                    None => Some(AnchorEvent::Added),
                    Some(_) => Some(AnchorEvent::Updated),
                }
            }
            AnchorEvent::Removed => match self.anchors.remove(&id) {
                Some(_) => Some(AnchorEvent::Removed),
                None => {
                    debug!(anchor_id = %id, "Removal for unknown anchor, ignoring");
                    None
                }
            },
        }
    }

    pub fn anchor(&self, id: &AnchorId) -> Option<TrackedObjectAnchor> {
        self.anchors.get(id).map(|a| a.clone())
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    /// Drop every sample (host teardown).
    pub fn clear(&self) {
        self.joints.clear();
        self.anchors.clear();
    }
}

impl SensorFeed for SensorState {
    fn current_joint_poses(&self) -> HashMap<JointName, HandJointSample> {
        self.joints.iter().map(|e| (*e.key(), *e.value())).collect()
    }

    fn current_object_anchors(&self) -> HashMap<AnchorId, TrackedObjectAnchor> {
        self.anchors
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }
}

/// Joint and anchor data as of one tick.
#[derive(Debug, Clone, Default)]
pub struct SensorSnapshot {
    pub joints: HashMap<JointName, HandJointSample>,
    pub anchors: HashMap<AnchorId, TrackedObjectAnchor>,
}

impl SensorSnapshot {
    /// Pose of a joint, or `None` when it is missing or not tracked this frame.
    pub fn joint_pose(&self, joint: JointName) -> Option<Pose> {
        self.joints
            .get(&joint)
            .filter(|sample| sample.tracked)
            .map(|sample| sample.pose)
    }

    /// Pose of an anchor, or `None` when it is missing or tracking is lost.
    pub fn anchor_pose(&self, id: &AnchorId) -> Option<Pose> {
        self.anchors
            .get(id)
            .filter(|anchor| anchor.tracked)
            .map(|anchor| anchor.pose)
    }

    /// Tracked anchors, in stable id order.
    pub fn tracked_anchors(&self) -> Vec<&TrackedObjectAnchor> {
        let mut tracked: Vec<_> = self.anchors.values().filter(|a| a.tracked).collect();
        tracked.sort_by_key(|a| a.id);
        tracked
    }
}
