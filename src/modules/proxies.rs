use crate::geometry::Pose;
use crate::scene::{ProxyHandle, ProxyKind, ProxyParent, ProxySpec, SceneHost};
use crate::sensor::AnchorId;
use std::collections::HashMap;
use tracing::warn;

/// Proxies a module has spawned, grouped by parent so they can be torn down
/// per anchor or all at once.
#[derive(Debug, Default)]
pub(crate) struct ProxySet {
    world: Vec<ProxyHandle>,
    anchored: HashMap<AnchorId, Vec<(ProxyKind, ProxyHandle)>>,
}

impl ProxySet {
    /// Spawn a proxy and remember it. Spawn failures are logged and skipped.
    pub async fn spawn(&mut self, scene: &dyn SceneHost, spec: ProxySpec) -> Option<ProxyHandle> {
        let handle = match scene.spawn_proxy(spec).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(
                    name = spec.kind.entity_name(),
                    error = %e,
                    "Failed to spawn proxy, continuing without it"
                );
                return None;
            }
        };

        match spec.parent {
            ProxyParent::World => self.world.push(handle),
            ProxyParent::Anchor(id) => self
                .anchored
                .entry(id)
                .or_default()
                .push((spec.kind, handle)),
        }
        Some(handle)
    }

    /// Spawn the box skin on an anchor, unless that anchor already has one.
    pub async fn spawn_skin(&mut self, scene: &dyn SceneHost, anchor: AnchorId, scale: f32) {
        if self.has(anchor, ProxyKind::Skin) {
            return;
        }
        self.spawn(
            scene,
            ProxySpec {
                kind: ProxyKind::Skin,
                parent: ProxyParent::Anchor(anchor),
                local_pose: Pose::IDENTITY,
                scale,
            },
        )
        .await;
    }

    pub fn has(&self, anchor: AnchorId, kind: ProxyKind) -> bool {
        self.anchored
            .get(&anchor)
            .map_or(false, |proxies| proxies.iter().any(|(k, _)| *k == kind))
    }

    /// Anchors that carry a proxy of `kind`, in stable order.
    pub fn anchors_with(&self, kind: ProxyKind) -> Vec<AnchorId> {
        let mut ids: Vec<_> = self
            .anchored
            .iter()
            .filter(|(_, proxies)| proxies.iter().any(|(k, _)| *k == kind))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub async fn release_anchor(&mut self, scene: &dyn SceneHost, anchor: AnchorId) {
        if let Some(proxies) = self.anchored.remove(&anchor) {
            for (_, handle) in proxies {
                scene.remove_proxy(handle).await;
            }
        }
    }

    pub async fn release_all(&mut self, scene: &dyn SceneHost) {
        for handle in self.world.drain(..) {
            scene.remove_proxy(handle).await;
        }
        for (_, proxies) in self.anchored.drain() {
            for (_, handle) in proxies {
                scene.remove_proxy(handle).await;
            }
        }
    }
}
