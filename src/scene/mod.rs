// Scene capability surface handed to the box modules by the host.

use crate::collision::{HIT_ZONE_ENTITY, KEY_ENTITY, SKIN_ENTITY};
use crate::geometry::Pose;
use crate::sensor::AnchorId;
use anyhow::{bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Kinds of visual/collision proxies a module can ask the host for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKind {
    /// Invisible collision skin over the physical box
    Skin,
    /// Grab-able virtual key
    Key,
    /// Key-turn target on the treasure box
    HitZone,
}

impl ProxyKind {
    /// Entity name the host must give the proxy; collision routing depends on it.
    pub fn entity_name(&self) -> &'static str {
        match self {
            Self::Skin => SKIN_ENTITY,
            Self::Key => KEY_ENTITY,
            Self::HitZone => HIT_ZONE_ENTITY,
        }
    }
}

/// Where a proxy hangs in the scene graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyParent {
    World,
    Anchor(AnchorId),
}

/// Spawn request for one proxy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProxySpec {
    pub kind: ProxyKind,
    pub parent: ProxyParent,
    /// Pose relative to `parent`
    pub local_pose: Pose,
    /// Uniform scale applied to the proxy's model
    pub scale: f32,
}

/// Opaque handle to a spawned proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyHandle(pub Uuid);

impl fmt::Display for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the core may ask of the 3D scene.
///
/// Spawning can involve asset loading, so it is async; moving a proxy is a
/// plain property write and must be cheap enough to call every tick.
#[async_trait]
pub trait SceneHost: Send + Sync {
    async fn spawn_proxy(&self, spec: ProxySpec) -> Result<ProxyHandle>;

    async fn remove_proxy(&self, handle: ProxyHandle);

    /// Move a proxy, `pose` being relative to its parent.
    fn set_proxy_pose(&self, handle: ProxyHandle, pose: Pose);
}

/// A live proxy in [`InMemoryScene`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRecord {
    pub spec: ProxySpec,
    pub pose: Pose,
}

/// Scene host without a renderer: keeps proxies in a map.
///
/// Used by the replay host and by tests to observe what modules spawn.
#[derive(Clone, Default)]
pub struct InMemoryScene {
    proxies: Arc<DashMap<ProxyHandle, ProxyRecord>>,
    fail_spawns: Arc<AtomicBool>,
}

impl InMemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent spawns fail, as a host would when an asset is missing.
    pub fn set_fail_spawns(&self, fail: bool) {
        self.fail_spawns.store(fail, Ordering::SeqCst);
    }

    pub fn proxy(&self, handle: ProxyHandle) -> Option<ProxyRecord> {
        self.proxies.get(&handle).map(|p| p.clone())
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn count_of(&self, kind: ProxyKind) -> usize {
        self.proxies.iter().filter(|p| p.spec.kind == kind).count()
    }

    /// First live proxy of `kind`, if any.
    pub fn find(&self, kind: ProxyKind) -> Option<(ProxyHandle, ProxyRecord)> {
        self.proxies
            .iter()
            .find(|p| p.spec.kind == kind)
            .map(|p| (*p.key(), p.value().clone()))
    }
}

#[async_trait]
impl SceneHost for InMemoryScene {
    async fn spawn_proxy(&self, spec: ProxySpec) -> Result<ProxyHandle> {
        if self.fail_spawns.load(Ordering::SeqCst) {
            bail!("Failed to load model for {}", spec.kind.entity_name());
        }

        let handle = ProxyHandle(Uuid::new_v4());
        self.proxies.insert(
            handle,
            ProxyRecord {
                spec,
                pose: spec.local_pose,
            },
        );

        info!(
            proxy = %handle,
            name = spec.kind.entity_name(),
            parent = ?spec.parent,
            "Proxy spawned"
        );
        Ok(handle)
    }

    async fn remove_proxy(&self, handle: ProxyHandle) {
        if let Some((_, record)) = self.proxies.remove(&handle) {
            info!(proxy = %handle, name = record.spec.kind.entity_name(), "Proxy removed");
        } else {
            debug!(proxy = %handle, "Removal of unknown proxy, ignoring");
        }
    }

    fn set_proxy_pose(&self, handle: ProxyHandle, pose: Pose) {
        if let Some(mut record) = self.proxies.get_mut(&handle) {
            record.pose = pose;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn key_spec() -> ProxySpec {
        ProxySpec {
            kind: ProxyKind::Key,
            parent: ProxyParent::World,
            local_pose: Pose::from_position(Vec3::new(0.0, 1.4, -0.4)),
            scale: 1.0,
        }
    }

    #[test]
    fn test_entity_names_match_collision_routing() {
        assert_eq!(ProxyKind::Skin.entity_name(), "metaBoxSkin");
        assert_eq!(ProxyKind::Key.entity_name(), "KeyEntity");
        assert_eq!(ProxyKind::HitZone.entity_name(), "hitEntity_magicBox");
    }

    #[tokio::test]
    async fn test_spawn_and_remove() {
        let scene = InMemoryScene::new();
        let handle = scene.spawn_proxy(key_spec()).await.unwrap();

        assert_eq!(scene.len(), 1);
        assert_eq!(scene.count_of(ProxyKind::Key), 1);
        assert_eq!(
            scene.proxy(handle).unwrap().pose.position,
            Vec3::new(0.0, 1.4, -0.4)
        );

        scene.remove_proxy(handle).await;
        assert!(scene.is_empty());

        // Second removal is a no-op
        scene.remove_proxy(handle).await;
        assert!(scene.is_empty());
    }

    #[tokio::test]
    async fn test_set_proxy_pose() {
        let scene = InMemoryScene::new();
        let handle = scene.spawn_proxy(key_spec()).await.unwrap();

        scene.set_proxy_pose(handle, Pose::from_position(Vec3::ONE));
        assert_eq!(scene.proxy(handle).unwrap().pose.position, Vec3::ONE);
    }

    #[tokio::test]
    async fn test_failing_spawns() {
        let scene = InMemoryScene::new();
        scene.set_fail_spawns(true);
        assert!(scene.spawn_proxy(key_spec()).await.is_err());
        assert!(scene.is_empty());
    }
}
