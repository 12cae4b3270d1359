//! Treasure box: pinch the virtual key, push it into the keyhole and turn.

use super::proxies::ProxySet;
use super::{ModuleContext, TickInput};
use crate::collision::CollisionKind;
use crate::config::{MetaBoxConfig, TreasureConfig};
use crate::geometry::{self, Pose};
use crate::scene::{ProxyHandle, ProxyKind, ProxyParent, ProxySpec};
use crate::sensor::{AnchorId, HandJoint, JointName, SensorSnapshot, TrackedObjectAnchor};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

const THUMB_TIP: JointName = JointName::right(HandJoint::ThumbTip);
const INDEX_BASE: JointName = JointName::right(HandJoint::IndexFingerIntermediateBase);
const WRIST: JointName = JointName::right(HandJoint::Wrist);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreasureState {
    Idle,
    Grabbing,
    HitZoneEntered,
    Opened,
}

impl fmt::Display for TreasureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Grabbing => "grabbing",
            Self::HitZoneEntered => "hit_zone_entered",
            Self::Opened => "opened",
        };
        f.write_str(s)
    }
}

pub struct TreasureLock {
    settings: TreasureConfig,
    skin_scale: f32,

    state: TreasureState,
    /// Thumb tip is touching the key
    is_grabbing: bool,
    /// Key is inside the hit zone
    is_hit: bool,
    /// Unlock is armed; cleared by an unlock, re-armed when the key leaves the hit zone
    is_close: bool,

    key: Option<ProxyHandle>,
    key_pose: Pose,
    proxies: ProxySet,
}

impl TreasureLock {
    pub fn new(config: &MetaBoxConfig) -> Self {
        Self {
            settings: config.treasure.clone(),
            skin_scale: config.skin.scale,
            state: TreasureState::Idle,
            is_grabbing: false,
            is_hit: false,
            is_close: true,
            key: None,
            key_pose: Pose::from_position(Vec3::from(config.treasure.key_spawn_position)),
            proxies: ProxySet::default(),
        }
    }

    pub fn state(&self) -> TreasureState {
        self.state
    }

    pub fn is_grabbing(&self) -> bool {
        self.is_grabbing
    }

    pub fn is_hit(&self) -> bool {
        self.is_hit
    }

    pub fn is_close(&self) -> bool {
        self.is_close
    }

    /// Current key pose in world space.
    pub fn key_pose(&self) -> Pose {
        self.key_pose
    }

    pub async fn on_enter(&mut self, ctx: &ModuleContext<'_>, sensors: &SensorSnapshot) {
        if self.key.is_none() {
            self.reset_flags();
            self.key_pose = Pose::from_position(Vec3::from(self.settings.key_spawn_position));
            self.key = self
                .proxies
                .spawn(
                    ctx.scene,
                    ProxySpec {
                        kind: ProxyKind::Key,
                        parent: ProxyParent::World,
                        local_pose: self.key_pose,
                        scale: 1.0,
                    },
                )
                .await;
        }
        for anchor in sensors.tracked_anchors() {
            self.attach(ctx, anchor.id).await;
        }
    }

    pub async fn on_exit(&mut self, ctx: &ModuleContext<'_>) {
        self.proxies.release_all(ctx.scene).await;
        self.key = None;
        self.reset_flags();
    }

    pub async fn on_anchor_added(&mut self, ctx: &ModuleContext<'_>, anchor: &TrackedObjectAnchor) {
        self.attach(ctx, anchor.id).await;
    }

    pub async fn on_anchor_removed(&mut self, ctx: &ModuleContext<'_>, anchor: AnchorId) {
        self.proxies.release_anchor(ctx.scene, anchor).await;
    }

    pub fn on_collision_begin(&mut self, kind: CollisionKind) {
        match kind {
            CollisionKind::JointOnKey(THUMB_TIP) => self.is_grabbing = true,
            CollisionKind::KeyInHitZone => {
                debug!("Key entered hit zone");
                self.is_hit = true;
            }
            _ => return,
        }
        self.refresh_state();
    }

    pub fn on_collision_end(&mut self, kind: CollisionKind) {
        match kind {
            CollisionKind::JointOnKey(THUMB_TIP) => self.is_grabbing = false,
            CollisionKind::KeyInHitZone => {
                debug!("Key left hit zone");
                self.is_hit = false;
                self.is_close = true;
            }
            _ => return,
        }
        self.refresh_state();
    }

    /// Move the held key with the hand and check for the unlocking turn.
    ///
    /// Missing or untracked joints skip the tick.
    pub fn on_tick(&mut self, ctx: &ModuleContext<'_>, input: &TickInput<'_>) {
        let sensors = input.sensors;
        let (Some(thumb), Some(index)) = (sensors.joint_pose(THUMB_TIP), sensors.joint_pose(INDEX_BASE))
        else {
            return;
        };

        let pinch = geometry::distance(&thumb, &index);
        let wrist = sensors.joint_pose(WRIST);

        if self.is_grabbing && pinch < self.settings.pinch_threshold {
            self.carry_key(ctx, geometry::midpoint(&thumb, &index), wrist.as_ref());
        }

        if self.is_hit && self.is_grabbing {
            if let (Some(wrist), Some(zone)) = (wrist, self.hit_zone_pose(sensors)) {
                self.check_turn(ctx, &wrist, &zone);
            }
        }
    }

    fn carry_key(&mut self, ctx: &ModuleContext<'_>, midpoint: Vec3, wrist: Option<&Pose>) {
        let Some(key) = self.key else {
            return;
        };
        self.key_pose.position = midpoint;
        if let Some(wrist) = wrist {
            self.key_pose.orientation = geometry::key_grip_orientation(wrist.orientation);
        }
        ctx.scene.set_proxy_pose(key, self.key_pose);
    }

    fn check_turn(&mut self, ctx: &ModuleContext<'_>, wrist: &Pose, zone: &Pose) {
        let turn = geometry::quaternion_to_euler_angles(geometry::relative_rotation(wrist, zone));

        if turn.roll <= self.settings.unlock_roll && self.is_close {
            info!(roll = turn.roll, "Key turned, opening treasure box");
            ctx.unlocker.request_unlock("treasure");
            self.is_close = false;
            self.refresh_state();
        }
    }

    /// World pose of the hit zone on the first tracked box that has one.
    fn hit_zone_pose(&self, sensors: &SensorSnapshot) -> Option<Pose> {
        let local = Pose::from_position(Vec3::from(self.settings.hit_zone_offset));
        self.proxies
            .anchors_with(ProxyKind::HitZone)
            .iter()
            .find_map(|id| sensors.anchor_pose(id))
            .map(|anchor| anchor.compose(&local))
    }

    async fn attach(&mut self, ctx: &ModuleContext<'_>, anchor: AnchorId) {
        self.proxies.spawn_skin(ctx.scene, anchor, self.skin_scale).await;
        if !self.proxies.has(anchor, ProxyKind::HitZone) {
            self.proxies
                .spawn(
                    ctx.scene,
                    ProxySpec {
                        kind: ProxyKind::HitZone,
                        parent: ProxyParent::Anchor(anchor),
                        local_pose: Pose::from_position(Vec3::from(self.settings.hit_zone_offset)),
                        scale: self.settings.hit_zone_size,
                    },
                )
                .await;
        }
    }

    fn reset_flags(&mut self) {
        self.is_grabbing = false;
        self.is_hit = false;
        self.is_close = true;
        self.refresh_state();
    }

    fn refresh_state(&mut self) {
        let next = if !self.is_close {
            TreasureState::Opened
        } else if self.is_grabbing && self.is_hit {
            TreasureState::HitZoneEntered
        } else if self.is_grabbing {
            TreasureState::Grabbing
        } else {
            TreasureState::Idle
        };

        if next != self.state {
            info!(from = %self.state, to = %next, "Treasure state changed");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{classify_pair, HIT_ZONE_ENTITY, KEY_ENTITY};
    use crate::scene::InMemoryScene;
    use crate::sensor::HandJointSample;
    use crate::unlock::RecordingUnlocker;
    use glam::Quat;
    use std::f32::consts::FRAC_PI_2;
    use std::time::Duration;

    fn thumb_on_key() -> CollisionKind {
        classify_pair("HandJoint:Right_thumbTip", KEY_ENTITY)
    }

    fn key_in_zone() -> CollisionKind {
        classify_pair(KEY_ENTITY, HIT_ZONE_ENTITY)
    }

    fn box_anchor() -> TrackedObjectAnchor {
        TrackedObjectAnchor {
            id: AnchorId::new(),
            pose: Pose::from_position(Vec3::new(0.0, 1.0, -0.5)),
            tracked: true,
            reference_object: "metaBox".to_string(),
        }
    }

    /// Pinching right hand with the wrist rolled by `roll` about X.
    fn hand(sensors: &mut SensorSnapshot, roll: f32) {
        let wrist = Quat::from_axis_angle(Vec3::X, roll);
        for (joint, position) in [
            (THUMB_TIP, Vec3::new(0.16, 1.18, -0.5)),
            (INDEX_BASE, Vec3::new(0.18, 1.18, -0.5)),
            (WRIST, Vec3::new(0.25, 1.1, -0.45)),
        ] {
            sensors.joints.insert(
                joint,
                HandJointSample {
                    joint,
                    pose: Pose::new(position, wrist),
                    tracked: true,
                },
            );
        }
    }

    struct Rig {
        scene: InMemoryScene,
        unlocker: RecordingUnlocker,
        sensors: SensorSnapshot,
        lock: TreasureLock,
    }

    impl Rig {
        async fn new() -> Self {
            let scene = InMemoryScene::new();
            let unlocker = RecordingUnlocker::new();
            let mut sensors = SensorSnapshot::default();
            let anchor = box_anchor();
            sensors.anchors.insert(anchor.id, anchor);

            let mut lock = TreasureLock::new(&MetaBoxConfig::default());
            let ctx = ModuleContext {
                scene: &scene,
                unlocker: &unlocker,
            };
            lock.on_enter(&ctx, &sensors).await;

            Self {
                scene,
                unlocker,
                sensors,
                lock,
            }
        }

        fn tick_with_roll(&mut self, roll: f32) {
            hand(&mut self.sensors, roll);
            let ctx = ModuleContext {
                scene: &self.scene,
                unlocker: &self.unlocker,
            };
            self.lock.on_tick(
                &ctx,
                &TickInput {
                    sensors: &self.sensors,
                    dt: Duration::from_millis(5),
                },
            );
        }
    }

    #[tokio::test]
    async fn test_enter_spawns_key_skin_and_hit_zone() {
        let rig = Rig::new().await;
        assert_eq!(rig.scene.count_of(ProxyKind::Key), 1);
        assert_eq!(rig.scene.count_of(ProxyKind::Skin), 1);
        assert_eq!(rig.scene.count_of(ProxyKind::HitZone), 1);

        let (_, zone) = rig.scene.find(ProxyKind::HitZone).unwrap();
        assert_eq!(zone.pose.position, Vec3::new(0.16, 0.18, 0.0));
        let (_, key) = rig.scene.find(ProxyKind::Key).unwrap();
        assert_eq!(key.pose.position, Vec3::new(0.0, 1.4, -0.4));
    }

    #[tokio::test]
    async fn test_collision_flags_drive_state() {
        let mut rig = Rig::new().await;
        assert_eq!(rig.lock.state(), TreasureState::Idle);

        rig.lock.on_collision_begin(thumb_on_key());
        assert_eq!(rig.lock.state(), TreasureState::Grabbing);

        rig.lock.on_collision_begin(key_in_zone());
        assert_eq!(rig.lock.state(), TreasureState::HitZoneEntered);

        rig.lock.on_collision_end(thumb_on_key());
        assert_eq!(rig.lock.state(), TreasureState::Idle);
        assert!(rig.lock.is_hit());
    }

    #[tokio::test]
    async fn test_pinch_carries_key_to_midpoint() {
        let mut rig = Rig::new().await;
        rig.lock.on_collision_begin(thumb_on_key());
        rig.tick_with_roll(0.0);

        let (_, key) = rig.scene.find(ProxyKind::Key).unwrap();
        assert!(key.pose.position.abs_diff_eq(Vec3::new(0.17, 1.18, -0.5), 1e-5));
        assert!(key
            .pose
            .orientation
            .abs_diff_eq(geometry::key_grip_orientation(Quat::IDENTITY), 1e-5));
    }

    #[tokio::test]
    async fn test_open_hand_does_not_carry_key() {
        let mut rig = Rig::new().await;
        rig.lock.on_collision_begin(thumb_on_key());
        hand(&mut rig.sensors, 0.0);
        // Spread the fingers well past the pinch threshold
        rig.sensors.joints.get_mut(&INDEX_BASE).unwrap().pose.position = Vec3::new(0.4, 1.18, -0.5);

        let ctx = ModuleContext {
            scene: &rig.scene,
            unlocker: &rig.unlocker,
        };
        rig.lock.on_tick(
            &ctx,
            &TickInput {
                sensors: &rig.sensors,
                dt: Duration::from_millis(5),
            },
        );

        let (_, key) = rig.scene.find(ProxyKind::Key).unwrap();
        assert_eq!(key.pose.position, Vec3::new(0.0, 1.4, -0.4));
    }

    #[tokio::test]
    async fn test_turn_unlocks_once_per_engagement() {
        let mut rig = Rig::new().await;
        rig.lock.on_collision_begin(thumb_on_key());
        rig.lock.on_collision_begin(key_in_zone());

        rig.tick_with_roll(-0.5);
        assert_eq!(rig.unlocker.count(), 0);

        rig.tick_with_roll(-FRAC_PI_2 - 0.2);
        assert_eq!(rig.unlocker.count(), 1);
        assert_eq!(rig.lock.state(), TreasureState::Opened);
        assert!(!rig.lock.is_close());

        // Oscillate across the threshold while still in the hit zone
        for _ in 0..5 {
            rig.tick_with_roll(-0.3);
            rig.tick_with_roll(-FRAC_PI_2 - 0.3);
        }
        assert_eq!(rig.unlocker.count(), 1);

        // Leave and re-enter the hit zone: armed again
        rig.lock.on_collision_end(key_in_zone());
        assert!(rig.lock.is_close());
        assert_eq!(rig.lock.state(), TreasureState::Grabbing);

        rig.lock.on_collision_begin(key_in_zone());
        rig.tick_with_roll(-FRAC_PI_2 - 0.2);
        assert_eq!(rig.unlocker.count(), 2);
    }

    #[tokio::test]
    async fn test_turn_without_grab_does_nothing() {
        let mut rig = Rig::new().await;
        rig.lock.on_collision_begin(key_in_zone());
        rig.tick_with_roll(-FRAC_PI_2 - 0.2);
        assert_eq!(rig.unlocker.count(), 0);
    }

    #[tokio::test]
    async fn test_missing_joints_skip_tick() {
        let mut rig = Rig::new().await;
        rig.lock.on_collision_begin(thumb_on_key());
        rig.lock.on_collision_begin(key_in_zone());

        hand(&mut rig.sensors, -FRAC_PI_2 - 0.2);
        rig.sensors.joints.remove(&THUMB_TIP);

        let ctx = ModuleContext {
            scene: &rig.scene,
            unlocker: &rig.unlocker,
        };
        rig.lock.on_tick(
            &ctx,
            &TickInput {
                sensors: &rig.sensors,
                dt: Duration::from_millis(5),
            },
        );
        assert_eq!(rig.unlocker.count(), 0);
    }

    #[tokio::test]
    async fn test_lost_box_tracking_skips_turn_check() {
        let mut rig = Rig::new().await;
        rig.lock.on_collision_begin(thumb_on_key());
        rig.lock.on_collision_begin(key_in_zone());
        for anchor in rig.sensors.anchors.values_mut() {
            anchor.tracked = false;
        }

        rig.tick_with_roll(-FRAC_PI_2 - 0.2);
        assert_eq!(rig.unlocker.count(), 0);
    }

    #[tokio::test]
    async fn test_exit_releases_everything() {
        let mut rig = Rig::new().await;
        rig.lock.on_collision_begin(thumb_on_key());

        let ctx = ModuleContext {
            scene: &rig.scene,
            unlocker: &rig.unlocker,
        };
        rig.lock.on_exit(&ctx).await;
        rig.lock.on_exit(&ctx).await;

        assert!(rig.scene.is_empty());
        assert_eq!(rig.lock.state(), TreasureState::Idle);
        assert!(!rig.lock.is_grabbing());
    }

    #[tokio::test]
    async fn test_anchor_removal_drops_its_proxies() {
        let rig = Rig::new().await;
        let mut lock = rig.lock;
        let id = *rig.sensors.anchors.keys().next().unwrap();
        let ctx = ModuleContext {
            scene: &rig.scene,
            unlocker: &rig.unlocker,
        };

        lock.on_anchor_removed(&ctx, id).await;
        assert_eq!(rig.scene.count_of(ProxyKind::HitZone), 0);
        assert_eq!(rig.scene.count_of(ProxyKind::Skin), 0);
        assert_eq!(rig.scene.count_of(ProxyKind::Key), 1);
    }
}
