use super::{SessionError, SessionEvent};
use crate::collision::{CollisionPairEvent, CollisionPhase};
use crate::config::MetaBoxConfig;
use crate::modules::{
    ModuleCommand, ModuleContext, ModuleKind, ModuleRegistry, ModuleReply, ModuleState, TickInput,
};
use crate::scene::SceneHost;
use crate::sensor::{AnchorEvent, AnchorUpdate, SensorFeed, SensorState};
use crate::unlock::Unlocker;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Shared "switch in progress" flag plus a count of events dropped because of it.
#[derive(Debug, Default)]
pub struct DeliveryGate {
    switching: AtomicBool,
    dropped: AtomicU64,
}

impl DeliveryGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    fn set_switching(&self, switching: bool) {
        self.switching.store(switching, Ordering::SeqCst);
    }

    /// Count a dropped event and tell observers.
    pub(crate) fn record_drop(&self, events: &broadcast::Sender<SessionEvent>, reason: &str) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
        debug!(reason = %reason, "Event dropped during module switch");
        let _ = events.send(SessionEvent::EventDropped {
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }
}

/// Forwards unlocks to the real transport and reports them on the event bus.
struct NotifyingUnlocker {
    inner: Arc<dyn Unlocker>,
    events: broadcast::Sender<SessionEvent>,
}

impl Unlocker for NotifyingUnlocker {
    fn request_unlock(&self, requested_by: &str) {
        let _ = self.events.send(SessionEvent::UnlockRequested {
            requested_by: requested_by.to_string(),
            at: Utc::now(),
        });
        self.inner.request_unlock(requested_by);
    }
}

/// Routes sensor, collision and operator input to the one active module.
///
/// Not thread-safe by itself; the session actor owns it and calls it from a
/// single task, so module state is never touched concurrently.
pub struct ModuleRouter {
    registry: ModuleRegistry,
    active: Option<ModuleKind>,
    last_state: Option<ModuleState>,

    scene: Arc<dyn SceneHost>,
    unlocker: NotifyingUnlocker,
    sensors: SensorState,
    events: broadcast::Sender<SessionEvent>,
    gate: Arc<DeliveryGate>,
}

impl ModuleRouter {
    pub fn new(
        config: &MetaBoxConfig,
        scene: Arc<dyn SceneHost>,
        unlocker: Arc<dyn Unlocker>,
        sensors: SensorState,
        events: broadcast::Sender<SessionEvent>,
        gate: Arc<DeliveryGate>,
    ) -> Self {
        Self {
            registry: ModuleRegistry::new(config),
            active: None,
            last_state: None,
            scene,
            unlocker: NotifyingUnlocker {
                inner: unlocker,
                events: events.clone(),
            },
            sensors,
            events,
            gate,
        }
    }

    pub fn active(&self) -> Option<ModuleKind> {
        self.active
    }

    /// Switch to `kind`. The previous module is fully torn down before the
    /// new one starts, and nothing is delivered until `on_enter` finishes.
    pub async fn activate(&mut self, kind: ModuleKind) {
        if self.active == Some(kind) {
            debug!(module = %kind, "Module already active");
            return;
        }

        self.gate.set_switching(true);
        self.exit_active().await;

        let sensors = self.sensors.snapshot();
        let ctx = ModuleContext {
            scene: self.scene.as_ref(),
            unlocker: &self.unlocker,
        };
        self.registry.get_mut(kind).on_enter(&ctx, &sensors).await;

        self.active = Some(kind);
        self.gate.set_switching(false);

        info!(module = %kind, "Module activated");
        let _ = self.events.send(SessionEvent::ModuleActivated {
            module: kind,
            at: Utc::now(),
        });
        self.publish_state();
    }

    pub async fn deactivate(&mut self) {
        self.gate.set_switching(true);
        self.exit_active().await;
        self.gate.set_switching(false);
    }

    /// Record an anchor update and tell the active module about lifecycle changes.
    ///
    /// Any tracked add or update attaches the module's proxies, so a box that
    /// was untracked at `on_enter` picks them up once tracking returns.
    /// Attaching is idempotent per anchor.
    pub async fn anchor(&mut self, update: &AnchorUpdate) {
        let Some(change) = self.sensors.apply_anchor_update(update) else {
            return;
        };
        let Some(kind) = self.active_module("anchor") else {
            return;
        };

        let ctx = ModuleContext {
            scene: self.scene.as_ref(),
            unlocker: &self.unlocker,
        };
        let module = self.registry.get_mut(kind);
        match change {
            AnchorEvent::Added | AnchorEvent::Updated if update.anchor.tracked => {
                if change == AnchorEvent::Added {
                    info!(anchor_id = %update.anchor.id, "Box anchor added");
                }
                module.on_anchor_added(&ctx, &update.anchor).await;
            }
            AnchorEvent::Added => {
                info!(anchor_id = %update.anchor.id, "Box anchor added untracked, waiting for tracking");
            }
            AnchorEvent::Updated => {}
            AnchorEvent::Removed => {
                info!(anchor_id = %update.anchor.id, "Box anchor removed");
                module.on_anchor_removed(&ctx, update.anchor.id).await;
            }
        }
        self.publish_state();
    }

    pub fn collision(&mut self, event: &CollisionPairEvent) {
        let Some(kind) = self.active_module("collision") else {
            return;
        };

        let module = self.registry.get_mut(kind);
        match event.phase {
            CollisionPhase::Began => module.on_collision_begin(&event.name_a, &event.name_b),
            CollisionPhase::Ended => module.on_collision_end(&event.name_a, &event.name_b),
        }
        self.publish_state();
    }

    pub fn tick(&mut self, dt: Duration) {
        if self.active.is_none() {
            return;
        }
        let Some(kind) = self.active_module("tick") else {
            return;
        };

        let sensors = self.sensors.snapshot();
        let ctx = ModuleContext {
            scene: self.scene.as_ref(),
            unlocker: &self.unlocker,
        };
        self.registry
            .get_mut(kind)
            .on_tick(&ctx, &TickInput { sensors: &sensors, dt });
        self.publish_state();
    }

    pub fn command(&mut self, command: ModuleCommand) -> Result<ModuleReply, SessionError> {
        let kind = self.active.ok_or(SessionError::NoActiveModule)?;

        let ctx = ModuleContext {
            scene: self.scene.as_ref(),
            unlocker: &self.unlocker,
        };
        let reply = self.registry.get_mut(kind).handle(&ctx, command);
        self.publish_state();
        Ok(reply?)
    }

    /// Host teardown: exit the active module. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        self.deactivate().await;
        info!(dropped = self.gate.dropped(), "Session router shut down");
    }

    async fn exit_active(&mut self) {
        let Some(kind) = self.active.take() else {
            return;
        };
        self.last_state = None;

        let ctx = ModuleContext {
            scene: self.scene.as_ref(),
            unlocker: &self.unlocker,
        };
        self.registry.get_mut(kind).on_exit(&ctx).await;

        info!(module = %kind, "Module deactivated");
        let _ = self.events.send(SessionEvent::ModuleDeactivated {
            module: kind,
            at: Utc::now(),
        });
    }

    /// Active module, if any.
    ///
    /// Switches run to completion inside the actor task, so nothing reaching
    /// the router can observe one in progress. Collisions sent during a
    /// switch are dropped on the producer side (`forward_collision`).
    fn active_module(&self, what: &str) -> Option<ModuleKind> {
        if self.active.is_none() {
            debug!(event = %what, "No active module, ignoring");
        }
        self.active
    }

    fn publish_state(&mut self) {
        let Some(kind) = self.active else {
            return;
        };
        let state = self.registry.get(kind).state();
        if self.last_state.as_ref() == Some(&state) {
            return;
        }

        debug!(module = %kind, state = %state, "Module state published");
        self.last_state = Some(state.clone());
        let _ = self.events.send(SessionEvent::StateChanged {
            module: kind,
            state,
            at: Utc::now(),
        });
    }
}
