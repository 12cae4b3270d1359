// Box modules: one state machine per box type behind a single dispatch enum.

mod proxies;

pub mod flea_market;
pub mod sesame;
pub mod timer;
pub mod treasure;

use crate::collision::{classify_pair, CollisionKind};
use crate::config::MetaBoxConfig;
use crate::scene::SceneHost;
use crate::sensor::{AnchorId, SensorSnapshot, TrackedObjectAnchor};
use crate::unlock::Unlocker;
use flea_market::{FleaMarketTrade, ListingError, Product, ProductDraft, TradeState};
use serde::{Deserialize, Serialize};
use sesame::{SesameLock, SesameState};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use timer::{TimerError, TimerLock, TimerState};
use tracing::debug;
use treasure::{TreasureLock, TreasureState};

/// Host capabilities lent to a module for the duration of one callback.
pub struct ModuleContext<'a> {
    pub scene: &'a dyn SceneHost,
    pub unlocker: &'a dyn Unlocker,
}

/// Input to one polling tick.
pub struct TickInput<'a> {
    pub sensors: &'a SensorSnapshot,
    /// Time since the previous tick
    pub dt: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Sesame,
    Timer,
    Treasure,
    FleaMarket,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 4] = [
        ModuleKind::Sesame,
        ModuleKind::Timer,
        ModuleKind::Treasure,
        ModuleKind::FleaMarket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sesame => "sesame",
            Self::Timer => "timer",
            Self::Treasure => "treasure",
            Self::FleaMarket => "flea_market",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Sesame => 0,
            Self::Timer => 1,
            Self::Treasure => 2,
            Self::FleaMarket => 3,
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown module: {}", s))
    }
}

/// Observable state of one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "module", content = "state", rename_all = "snake_case")]
pub enum ModuleState {
    Sesame(SesameState),
    Timer(TimerState),
    Treasure(TreasureState),
    FleaMarket(TradeState),
}

impl ModuleState {
    pub fn kind(&self) -> ModuleKind {
        match self {
            Self::Sesame(_) => ModuleKind::Sesame,
            Self::Timer(_) => ModuleKind::Timer,
            Self::Treasure(_) => ModuleKind::Treasure,
            Self::FleaMarket(_) => ModuleKind::FleaMarket,
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sesame(s) => write!(f, "sesame:{}", s),
            Self::Timer(s) => write!(f, "timer:{}", s),
            Self::Treasure(s) => write!(f, "treasure:{}", s),
            Self::FleaMarket(s) => write!(f, "flea_market:{}", s),
        }
    }
}

/// Operator or UI input addressed to a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ModuleCommand {
    /// Current state of the active module
    QueryState,

    Transcript { text: String, is_final: bool },
    RecognitionUnavailable { reason: String },
    StartListening,
    CancelListening,
    ResetSesame,

    StartTimer { minutes: u32, seconds: u32 },
    TimerUnlock,

    Stock { draft: ProductDraft },
    ConfirmListing,
    CancelStocking,
    Purchase,
    ResetTrade,
}

impl ModuleCommand {
    /// Module the command is meant for; `None` means whichever is active.
    pub fn target(&self) -> Option<ModuleKind> {
        match self {
            Self::QueryState => None,
            Self::Transcript { .. }
            | Self::RecognitionUnavailable { .. }
            | Self::StartListening
            | Self::CancelListening
            | Self::ResetSesame => Some(ModuleKind::Sesame),
            Self::StartTimer { .. } | Self::TimerUnlock => Some(ModuleKind::Timer),
            Self::Stock { .. }
            | Self::ConfirmListing
            | Self::CancelStocking
            | Self::Purchase
            | Self::ResetTrade => Some(ModuleKind::FleaMarket),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ModuleReply {
    Done,
    State { state: ModuleState },
    Listed { product: Product },
    Purchased { product: Option<Product> },
}

/// A module refused a command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandError {
    WrongModule {
        active: ModuleKind,
        requested: ModuleKind,
    },
    Timer(TimerError),
    Listing(ListingError),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::WrongModule { active, requested } => {
                write!(f, "command for {} sent to {}", requested, active)
            }
            CommandError::Timer(e) => write!(f, "timer: {}", e),
            CommandError::Listing(e) => write!(f, "listing: {}", e),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<TimerError> for CommandError {
    fn from(e: TimerError) -> Self {
        CommandError::Timer(e)
    }
}

impl From<ListingError> for CommandError {
    fn from(e: ListingError) -> Self {
        CommandError::Listing(e)
    }
}

/// Closed set of box modules.
pub enum BoxModule {
    Sesame(SesameLock),
    Timer(TimerLock),
    Treasure(TreasureLock),
    FleaMarket(FleaMarketTrade),
}

impl BoxModule {
    pub fn new(kind: ModuleKind, config: &MetaBoxConfig) -> Self {
        match kind {
            ModuleKind::Sesame => Self::Sesame(SesameLock::new(config)),
            ModuleKind::Timer => Self::Timer(TimerLock::new(config)),
            ModuleKind::Treasure => Self::Treasure(TreasureLock::new(config)),
            ModuleKind::FleaMarket => Self::FleaMarket(FleaMarketTrade::new(config)),
        }
    }

    pub fn kind(&self) -> ModuleKind {
        match self {
            Self::Sesame(_) => ModuleKind::Sesame,
            Self::Timer(_) => ModuleKind::Timer,
            Self::Treasure(_) => ModuleKind::Treasure,
            Self::FleaMarket(_) => ModuleKind::FleaMarket,
        }
    }

    pub fn state(&self) -> ModuleState {
        match self {
            Self::Sesame(m) => ModuleState::Sesame(m.state()),
            Self::Timer(m) => ModuleState::Timer(m.state()),
            Self::Treasure(m) => ModuleState::Treasure(m.state()),
            Self::FleaMarket(m) => ModuleState::FleaMarket(m.state().clone()),
        }
    }

    pub async fn on_enter(&mut self, ctx: &ModuleContext<'_>, sensors: &SensorSnapshot) {
        match self {
            Self::Sesame(m) => m.on_enter(ctx, sensors).await,
            Self::Timer(m) => m.on_enter(ctx, sensors).await,
            Self::Treasure(m) => m.on_enter(ctx, sensors).await,
            Self::FleaMarket(m) => m.on_enter(ctx, sensors).await,
        }
    }

    pub async fn on_exit(&mut self, ctx: &ModuleContext<'_>) {
        match self {
            Self::Sesame(m) => m.on_exit(ctx).await,
            Self::Timer(m) => m.on_exit(ctx).await,
            Self::Treasure(m) => m.on_exit(ctx).await,
            Self::FleaMarket(m) => m.on_exit(ctx).await,
        }
    }

    pub async fn on_anchor_added(&mut self, ctx: &ModuleContext<'_>, anchor: &TrackedObjectAnchor) {
        match self {
            Self::Sesame(m) => m.on_anchor_added(ctx, anchor).await,
            Self::Timer(m) => m.on_anchor_added(ctx, anchor).await,
            Self::Treasure(m) => m.on_anchor_added(ctx, anchor).await,
            Self::FleaMarket(m) => m.on_anchor_added(ctx, anchor).await,
        }
    }

    pub async fn on_anchor_removed(&mut self, ctx: &ModuleContext<'_>, anchor: AnchorId) {
        match self {
            Self::Sesame(m) => m.on_anchor_removed(ctx, anchor).await,
            Self::Timer(m) => m.on_anchor_removed(ctx, anchor).await,
            Self::Treasure(m) => m.on_anchor_removed(ctx, anchor).await,
            Self::FleaMarket(m) => m.on_anchor_removed(ctx, anchor).await,
        }
    }

    /// Route a collision start. Pairs no module cares about are dropped here.
    pub fn on_collision_begin(&mut self, name_a: &str, name_b: &str) {
        let kind = classify_pair(name_a, name_b);
        if kind == CollisionKind::Unrelated {
            return;
        }
        match self {
            Self::Sesame(m) => m.on_collision_begin(kind),
            Self::Treasure(m) => m.on_collision_begin(kind),
            Self::Timer(_) | Self::FleaMarket(_) => {}
        }
    }

    pub fn on_collision_end(&mut self, name_a: &str, name_b: &str) {
        let kind = classify_pair(name_a, name_b);
        if kind == CollisionKind::Unrelated {
            return;
        }
        match self {
            Self::Sesame(m) => m.on_collision_end(kind),
            Self::Treasure(m) => m.on_collision_end(kind),
            Self::Timer(_) | Self::FleaMarket(_) => {}
        }
    }

    pub fn on_tick(&mut self, ctx: &ModuleContext<'_>, input: &TickInput<'_>) {
        match self {
            Self::Timer(m) => m.on_tick(ctx, input),
            Self::Treasure(m) => m.on_tick(ctx, input),
            Self::Sesame(_) | Self::FleaMarket(_) => {}
        }
    }

    /// Apply operator input.
    pub fn handle(
        &mut self,
        ctx: &ModuleContext<'_>,
        command: ModuleCommand,
    ) -> Result<ModuleReply, CommandError> {
        if let Some(requested) = command.target() {
            if requested != self.kind() {
                return Err(CommandError::WrongModule {
                    active: self.kind(),
                    requested,
                });
            }
        }

        match (self, command) {
            (module, ModuleCommand::QueryState) => Ok(ModuleReply::State {
                state: module.state(),
            }),

            (Self::Sesame(m), ModuleCommand::Transcript { text, is_final }) => {
                m.on_transcript(ctx, &text, is_final);
                Ok(ModuleReply::Done)
            }
            (Self::Sesame(m), ModuleCommand::RecognitionUnavailable { reason }) => {
                m.on_recognition_unavailable(&reason);
                Ok(ModuleReply::Done)
            }
            (Self::Sesame(m), ModuleCommand::StartListening) => {
                m.start_listening();
                Ok(ModuleReply::Done)
            }
            (Self::Sesame(m), ModuleCommand::CancelListening) => {
                m.cancel();
                Ok(ModuleReply::Done)
            }
            (Self::Sesame(m), ModuleCommand::ResetSesame) => {
                m.reset();
                Ok(ModuleReply::Done)
            }

            (Self::Timer(m), ModuleCommand::StartTimer { minutes, seconds }) => {
                m.start(minutes, seconds)?;
                Ok(ModuleReply::Done)
            }
            (Self::Timer(m), ModuleCommand::TimerUnlock) => {
                m.operator_unlock(ctx)?;
                Ok(ModuleReply::Done)
            }

            (Self::FleaMarket(m), ModuleCommand::Stock { draft }) => {
                m.open_for_stocking(ctx, &draft)?;
                Ok(ModuleReply::Done)
            }
            (Self::FleaMarket(m), ModuleCommand::ConfirmListing) => {
                let product = m.confirm_listing()?.clone();
                Ok(ModuleReply::Listed { product })
            }
            (Self::FleaMarket(m), ModuleCommand::CancelStocking) => {
                m.cancel_stocking();
                Ok(ModuleReply::Done)
            }
            (Self::FleaMarket(m), ModuleCommand::Purchase) => Ok(ModuleReply::Purchased {
                product: m.purchase(ctx),
            }),
            (Self::FleaMarket(m), ModuleCommand::ResetTrade) => {
                m.reset();
                Ok(ModuleReply::Done)
            }

            (module, command) => {
                // target() already matched the kind, so this pairing is a gap in the table
                debug!(module = %module.kind(), ?command, "Command not handled");
                Ok(ModuleReply::Done)
            }
        }
    }
}

/// Owns exactly one instance of every module. State persists across
/// activations.
pub struct ModuleRegistry {
    modules: Vec<BoxModule>,
}

impl ModuleRegistry {
    pub fn new(config: &MetaBoxConfig) -> Self {
        Self {
            modules: ModuleKind::ALL
                .iter()
                .map(|kind| BoxModule::new(*kind, config))
                .collect(),
        }
    }

    pub fn get(&self, kind: ModuleKind) -> &BoxModule {
        &self.modules[kind.index()]
    }

    pub fn get_mut(&mut self, kind: ModuleKind) -> &mut BoxModule {
        &mut self.modules[kind.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoxModule> {
        self.modules.iter()
    }
}
