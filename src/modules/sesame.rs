//! Passphrase box: knock twice on the box, then say the passphrase.

use super::proxies::ProxySet;
use super::ModuleContext;
use crate::collision::CollisionKind;
use crate::config::{MetaBoxConfig, SesameConfig};
use crate::sensor::{AnchorId, HandJoint, JointName, SensorSnapshot, TrackedObjectAnchor};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SesameState {
    Idle,
    ListeningForKnock,
    Recognizing,
    Unlocked,
}

impl fmt::Display for SesameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ListeningForKnock => "listening_for_knock",
            Self::Recognizing => "recognizing",
            Self::Unlocked => "unlocked",
        };
        f.write_str(s)
    }
}

pub struct SesameLock {
    passphrase: String,
    knocks_required: u32,
    knock_joint: JointName,
    skin_scale: f32,

    state: SesameState,
    knock_count: u32,
    /// Open knock-joint contacts across all skins; a knock counts on 0 -> 1
    contacts: u32,
    transcript: String,
    entered: bool,
    proxies: ProxySet,
}

impl SesameLock {
    pub fn new(config: &MetaBoxConfig) -> Self {
        Self {
            passphrase: config.sesame.passphrase.trim().to_string(),
            knocks_required: config.sesame.knocks_required.max(1),
            knock_joint: knock_joint(&config.sesame),
            skin_scale: config.skin.scale,
            state: SesameState::Idle,
            knock_count: 0,
            contacts: 0,
            transcript: String::new(),
            entered: false,
            proxies: ProxySet::default(),
        }
    }

    pub fn state(&self) -> SesameState {
        self.state
    }

    pub fn knock_count(&self) -> u32 {
        self.knock_count
    }

    /// Latest streamed transcript.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub async fn on_enter(&mut self, ctx: &ModuleContext<'_>, sensors: &SensorSnapshot) {
        if !self.entered {
            self.entered = true;
            if self.state == SesameState::Idle {
                self.transition(SesameState::ListeningForKnock);
            }
        }
        for anchor in sensors.tracked_anchors() {
            self.proxies.spawn_skin(ctx.scene, anchor.id, self.skin_scale).await;
        }
    }

    pub async fn on_exit(&mut self, ctx: &ModuleContext<'_>) {
        self.proxies.release_all(ctx.scene).await;
        if self.entered {
            self.entered = false;
            self.transition(SesameState::Idle);
            self.contacts = 0;
        }
    }

    pub async fn on_anchor_added(&mut self, ctx: &ModuleContext<'_>, anchor: &TrackedObjectAnchor) {
        self.proxies.spawn_skin(ctx.scene, anchor.id, self.skin_scale).await;
    }

    pub async fn on_anchor_removed(&mut self, ctx: &ModuleContext<'_>, anchor: AnchorId) {
        self.proxies.release_anchor(ctx.scene, anchor).await;
    }

    pub fn on_collision_begin(&mut self, kind: CollisionKind) {
        let CollisionKind::JointOnSkin(joint) = kind else {
            return;
        };
        if joint != self.knock_joint {
            return;
        }
        self.contacts = self.contacts.saturating_add(1);
        if self.contacts > 1 {
            debug!(joint = %joint, contacts = self.contacts, "Knock joint still in contact, not counting");
            return;
        }

        if self.state != SesameState::ListeningForKnock {
            return;
        }

        self.knock_count += 1;
        info!(
            knocks = self.knock_count,
            required = self.knocks_required,
            "Knock detected"
        );
        if self.knock_count >= self.knocks_required {
            self.transition(SesameState::Recognizing);
        }
    }

    pub fn on_collision_end(&mut self, kind: CollisionKind) {
        if kind == CollisionKind::JointOnSkin(self.knock_joint) {
            self.contacts = self.contacts.saturating_sub(1);
        }
    }

    /// Feed a streamed (partial or final) speech transcript.
    pub fn on_transcript(&mut self, ctx: &ModuleContext<'_>, text: &str, is_final: bool) {
        if self.state != SesameState::Recognizing {
            debug!(state = %self.state, "Transcript outside recognition, ignoring");
            return;
        }

        self.transcript = text.to_string();

        if text.trim() == self.passphrase {
            info!("Passphrase matched");
            self.transition(SesameState::Unlocked);
            ctx.unlocker.request_unlock("sesame");
        } else if is_final {
            info!(transcript = %text, "Passphrase did not match, listening for knocks again");
            self.transition(SesameState::ListeningForKnock);
        }
    }

    /// Speech recognition could not start (permission denied, no recognizer).
    pub fn on_recognition_unavailable(&mut self, reason: &str) {
        warn!(reason = %reason, state = %self.state, "Speech recognition unavailable");
    }

    pub fn start_listening(&mut self) {
        if self.state == SesameState::Idle {
            self.transition(SesameState::ListeningForKnock);
        }
    }

    pub fn cancel(&mut self) {
        self.transition(SesameState::Idle);
    }

    /// Re-arm after an unlock.
    pub fn reset(&mut self) {
        if self.state == SesameState::Unlocked {
            self.transition(SesameState::ListeningForKnock);
        }
    }

    fn transition(&mut self, next: SesameState) {
        if self.state == next {
            return;
        }
        if self.state == SesameState::ListeningForKnock {
            self.knock_count = 0;
        }
        if next == SesameState::Recognizing {
            self.transcript.clear();
        }
        info!(from = %self.state, to = %next, "Sesame state changed");
        self.state = next;
    }
}

fn knock_joint(config: &SesameConfig) -> JointName {
    config.knock_joint.parse().unwrap_or_else(|e| {
        warn!(error = %e, "Invalid knock joint, using right index fingertip");
        JointName::right(HandJoint::IndexFingerTip)
    })
}
