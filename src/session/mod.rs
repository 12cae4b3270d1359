// Session: single actor that owns the modules and serializes every input.

mod engine;
mod router;

pub use engine::{SessionEngine, SessionHandle};
pub use router::{DeliveryGate, ModuleRouter};

use crate::collision::CollisionPairEvent;
use crate::modules::{CommandError, ModuleCommand, ModuleKind, ModuleReply, ModuleState};
use crate::sensor::AnchorUpdate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;


/// Input to the session actor.
#[derive(Debug)]
pub enum SessionCommand {
    Activate {
        module: ModuleKind,
        done: oneshot::Sender<()>,
    },
    Deactivate {
        done: oneshot::Sender<()>,
    },
    Anchor(AnchorUpdate),
    Collision(CollisionPairEvent),
    Module {
        command: ModuleCommand,
        reply: oneshot::Sender<Result<ModuleReply, SessionError>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Broadcast to observers (UI, logs, tests).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    ModuleActivated {
        module: ModuleKind,
        at: DateTime<Utc>,
    },
    ModuleDeactivated {
        module: ModuleKind,
        at: DateTime<Utc>,
    },
    StateChanged {
        module: ModuleKind,
        state: ModuleState,
        at: DateTime<Utc>,
    },
    UnlockRequested {
        requested_by: String,
        at: DateTime<Utc>,
    },
    EventDropped {
        reason: String,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    NoActiveModule,
    WrongModule {
        active: ModuleKind,
        requested: ModuleKind,
    },
    Rejected(CommandError),
    Closed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NoActiveModule => write!(f, "no module is active"),
            SessionError::WrongModule { active, requested } => {
                write!(f, "{} is not active (active: {})", requested, active)
            }
            SessionError::Rejected(e) => write!(f, "rejected: {}", e),
            SessionError::Closed => write!(f, "session closed"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<CommandError> for SessionError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::WrongModule { active, requested } => {
                SessionError::WrongModule { active, requested }
            }
            other => SessionError::Rejected(other),
        }
    }
}
