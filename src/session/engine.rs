use super::router::{DeliveryGate, ModuleRouter};
use super::{SessionCommand, SessionError, SessionEvent};
use crate::collision::CollisionPairEvent;
use crate::config::MetaBoxConfig;
use crate::modules::{ModuleCommand, ModuleKind, ModuleReply};
use crate::scene::SceneHost;
use crate::sensor::{AnchorUpdate, HandJointSample, SensorState};
use crate::unlock::Unlocker;
use futures::{Stream, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct SessionEngine;

impl SessionEngine {
    /// Spawn the session actor on the current tokio runtime.
    pub fn start(
        config: &MetaBoxConfig,
        scene: Arc<dyn SceneHost>,
        unlocker: Arc<dyn Unlocker>,
    ) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::channel(config.session.command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(config.session.event_buffer.max(1));
        let sensors = SensorState::new();
        let gate = Arc::new(DeliveryGate::new());

        let router = ModuleRouter::new(
            config,
            scene,
            unlocker,
            sensors.clone(),
            event_tx.clone(),
            gate.clone(),
        );
        let tick_period = Duration::from_millis(config.session.tick_interval_ms.max(1));
        let task = tokio::spawn(run(router, command_rx, tick_period));

        info!(tick_ms = tick_period.as_millis() as u64, "Session started");

        SessionHandle {
            commands: command_tx,
            events: event_tx,
            sensors,
            gate,
            feeds: Mutex::new(Vec::new()),
            task: tokio::sync::Mutex::new(Some(task)),
        }
    }
}

/// Actor loop: commands and ticks are handled one at a time, in arrival order.
async fn run(
    mut router: ModuleRouter,
    mut commands: mpsc::Receiver<SessionCommand>,
    tick_period: Duration,
) {
    let mut ticker = interval(tick_period);
    // A slow tick must not cause a burst of catch-up ticks
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SessionCommand::Shutdown { done }) => {
                    router.shutdown().await;
                    let _ = done.send(());
                    break;
                }
                Some(command) => handle(&mut router, command).await,
                None => {
                    debug!("All session handles dropped");
                    router.shutdown().await;
                    break;
                }
            },

            now = ticker.tick() => {
                let dt = now.saturating_duration_since(last_tick);
                last_tick = now;
                router.tick(dt);
            }
        }
    }

    info!("Session stopped");
}

async fn handle(router: &mut ModuleRouter, command: SessionCommand) {
    match command {
        SessionCommand::Activate { module, done } => {
            router.activate(module).await;
            let _ = done.send(());
        }
        SessionCommand::Deactivate { done } => {
            router.deactivate().await;
            let _ = done.send(());
        }
        SessionCommand::Anchor(update) => router.anchor(&update).await,
        SessionCommand::Collision(event) => router.collision(&event),
        SessionCommand::Module { command, reply } => {
            let _ = reply.send(router.command(command));
        }
        SessionCommand::Shutdown { done } => {
            // Handled by the loop; only reachable if called directly
            router.shutdown().await;
            let _ = done.send(());
        }
    }
}

/// Host-side handle to a running session.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
    sensors: SensorState,
    gate: Arc<DeliveryGate>,
    feeds: Mutex<Vec<JoinHandle<()>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Shared sensor store, also usable as a [`crate::sensor::SensorFeed`].
    pub fn sensors(&self) -> &SensorState {
        &self.sensors
    }

    /// Events dropped because they arrived during a module switch.
    pub fn dropped_events(&self) -> u64 {
        self.gate.dropped()
    }

    pub fn is_switching(&self) -> bool {
        self.gate.is_switching()
    }

    /// Overwrite a joint sample. Joint data never touches module state directly;
    /// modules read it on the next tick.
    pub fn update_joint(&self, sample: HandJointSample) {
        self.sensors.update_joint(sample);
    }

    /// Activate a module and wait until its `on_enter` has finished.
    pub async fn activate(&self, module: ModuleKind) -> Result<(), SessionError> {
        let (done, wait) = oneshot::channel();
        self.send(SessionCommand::Activate { module, done }).await?;
        wait.await.map_err(|_| SessionError::Closed)
    }

    pub async fn deactivate(&self) -> Result<(), SessionError> {
        let (done, wait) = oneshot::channel();
        self.send(SessionCommand::Deactivate { done }).await?;
        wait.await.map_err(|_| SessionError::Closed)
    }

    pub async fn anchor(&self, update: AnchorUpdate) -> Result<(), SessionError> {
        self.send(SessionCommand::Anchor(update)).await
    }

    /// Deliver a collision pair. Dropped (and counted) while a switch is in progress.
    pub async fn collision(&self, event: CollisionPairEvent) -> Result<(), SessionError> {
        forward_collision(&self.commands, &self.events, &self.gate, event).await
    }

    /// Operator input for the active module.
    pub async fn command(&self, command: ModuleCommand) -> Result<ModuleReply, SessionError> {
        let (reply, wait) = oneshot::channel();
        self.send(SessionCommand::Module { command, reply }).await?;
        wait.await.map_err(|_| SessionError::Closed)?
    }

    /// Pump an object-tracking stream into the session.
    pub fn spawn_anchor_feed<S>(&self, stream: S)
    where
        S: Stream<Item = AnchorUpdate> + Send + 'static,
    {
        let commands = self.commands.clone();
        self.track_feed(tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(update) = stream.next().await {
                if commands.send(SessionCommand::Anchor(update)).await.is_err() {
                    break;
                }
            }
            debug!("Anchor feed ended");
        }));
    }

    /// Pump a hand-tracking stream into the shared sensor store.
    pub fn spawn_joint_feed<S>(&self, stream: S)
    where
        S: Stream<Item = HandJointSample> + Send + 'static,
    {
        let sensors = self.sensors.clone();
        self.track_feed(tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(sample) = stream.next().await {
                sensors.update_joint(sample);
            }
            debug!("Joint feed ended");
        }));
    }

    /// Pump the scene's collision stream into the session.
    pub fn spawn_collision_feed<S>(&self, stream: S)
    where
        S: Stream<Item = CollisionPairEvent> + Send + 'static,
    {
        let commands = self.commands.clone();
        let events = self.events.clone();
        let gate = self.gate.clone();
        self.track_feed(tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(event) = stream.next().await {
                if forward_collision(&commands, &events, &gate, event).await.is_err() {
                    break;
                }
            }
            debug!("Collision feed ended");
        }));
    }

    /// Stop feeds and ticks, exit the active module and close the session.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.abort_feeds();

        let (done, wait) = oneshot::channel();
        self.send(SessionCommand::Shutdown { done }).await?;
        wait.await.map_err(|_| SessionError::Closed)?;

        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Session task ended abnormally");
            }
        }
        Ok(())
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }

    fn track_feed(&self, handle: JoinHandle<()>) {
        match self.feeds.lock() {
            Ok(mut feeds) => feeds.push(handle),
            Err(_) => {
                warn!("Feed registry poisoned, aborting new feed");
                handle.abort();
            }
        }
    }

    fn abort_feeds(&self) {
        if let Ok(mut feeds) = self.feeds.lock() {
            let count = feeds.len();
            for feed in feeds.drain(..) {
                feed.abort();
            }
            if count > 0 {
                info!(feeds = count, "Sensor feeds cancelled");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.abort_feeds();
    }
}

async fn forward_collision(
    commands: &mpsc::Sender<SessionCommand>,
    events: &broadcast::Sender<SessionEvent>,
    gate: &DeliveryGate,
    event: CollisionPairEvent,
) -> Result<(), SessionError> {
    if gate.is_switching() {
        gate.record_drop(events, "collision");
        return Ok(());
    }
    commands
        .send(SessionCommand::Collision(event))
        .await
        .map_err(|_| SessionError::Closed)
}
