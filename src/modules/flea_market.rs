//! Trade box: a seller stocks one item, a buyer purchases it.
//!
//! Not gesture driven. The listing survives module switches so a buyer can
//! pick the box up later.

use super::proxies::ProxySet;
use super::ModuleContext;
use crate::config::MetaBoxConfig;
use crate::sensor::{AnchorId, SensorSnapshot, TrackedObjectAnchor};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub description: String,
    pub price: u32,
}

/// Seller input as typed, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDraft {
    pub name: String,
    pub description: String,
    pub price: Option<i64>,
}

impl ProductDraft {
    pub fn validate(&self) -> Result<Product, ListingError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ListingError::EmptyName);
        }
        let description = self.description.trim();
        if description.is_empty() {
            return Err(ListingError::EmptyDescription);
        }
        let price = match self.price {
            None => return Err(ListingError::MissingPrice),
            Some(p) if p < 0 => return Err(ListingError::NegativePrice(p)),
            Some(p) => u32::try_from(p).map_err(|_| ListingError::PriceOutOfRange(p))?,
        };

        Ok(Product {
            name: name.to_string(),
            description: description.to_string(),
            price,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListingError {
    EmptyName,
    EmptyDescription,
    MissingPrice,
    NegativePrice(i64),
    PriceOutOfRange(i64),
    AlreadyListed,
    NothingToConfirm,
}

impl fmt::Display for ListingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingError::EmptyName => write!(f, "product name is required"),
            ListingError::EmptyDescription => write!(f, "product description is required"),
            ListingError::MissingPrice => write!(f, "price is required"),
            ListingError::NegativePrice(p) => write!(f, "price cannot be negative: {}", p),
            ListingError::PriceOutOfRange(p) => write!(f, "price too large: {}", p),
            ListingError::AlreadyListed => {
                write!(f, "a product is already listed in this box")
            }
            ListingError::NothingToConfirm => write!(f, "no product is being stocked"),
        }
    }
}

impl std::error::Error for ListingError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "product", rename_all = "snake_case")]
pub enum TradeState {
    NotListed,
    /// Box opened for the seller to put the item in
    Stocking(Product),
    Listed(Product),
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotListed => f.write_str("not_listed"),
            Self::Stocking(p) => write!(f, "stocking({})", p.name),
            Self::Listed(p) => write!(f, "listed({})", p.name),
        }
    }
}

pub struct FleaMarketTrade {
    skin_scale: f32,
    state: TradeState,
    last_purchase: Option<Product>,
    proxies: ProxySet,
}

impl FleaMarketTrade {
    pub fn new(config: &MetaBoxConfig) -> Self {
        Self {
            skin_scale: config.skin.scale,
            state: TradeState::NotListed,
            last_purchase: None,
            proxies: ProxySet::default(),
        }
    }

    pub fn state(&self) -> &TradeState {
        &self.state
    }

    /// What the buyer screen shows.
    pub fn listed_product(&self) -> Option<&Product> {
        match &self.state {
            TradeState::Listed(p) => Some(p),
            _ => None,
        }
    }

    pub fn last_purchase(&self) -> Option<&Product> {
        self.last_purchase.as_ref()
    }

    pub async fn on_enter(&mut self, ctx: &ModuleContext<'_>, sensors: &SensorSnapshot) {
        for anchor in sensors.tracked_anchors() {
            self.proxies.spawn_skin(ctx.scene, anchor.id, self.skin_scale).await;
        }
    }

    pub async fn on_exit(&mut self, ctx: &ModuleContext<'_>) {
        self.proxies.release_all(ctx.scene).await;
    }

    pub async fn on_anchor_added(&mut self, ctx: &ModuleContext<'_>, anchor: &TrackedObjectAnchor) {
        self.proxies.spawn_skin(ctx.scene, anchor.id, self.skin_scale).await;
    }

    pub async fn on_anchor_removed(&mut self, ctx: &ModuleContext<'_>, anchor: AnchorId) {
        self.proxies.release_anchor(ctx.scene, anchor).await;
    }

    /// Seller submits a product. The box opens so the item can go in.
    pub fn open_for_stocking(
        &mut self,
        ctx: &ModuleContext<'_>,
        draft: &ProductDraft,
    ) -> Result<(), ListingError> {
        if matches!(self.state, TradeState::Listed(_)) {
            return Err(ListingError::AlreadyListed);
        }
        let product = draft.validate()?;

        info!(name = %product.name, price = product.price, "Opening box for stocking");
        ctx.unlocker.request_unlock("flea_market");
        self.set_state(TradeState::Stocking(product));
        Ok(())
    }

    /// Seller closed the box with the item inside.
    pub fn confirm_listing(&mut self) -> Result<&Product, ListingError> {
        let TradeState::Stocking(product) = &self.state else {
            return Err(ListingError::NothingToConfirm);
        };
        let product = product.clone();
        self.set_state(TradeState::Listed(product));
        self.listed_product().ok_or(ListingError::NothingToConfirm)
    }

    pub fn cancel_stocking(&mut self) {
        if matches!(self.state, TradeState::Stocking(_)) {
            self.set_state(TradeState::NotListed);
        }
    }

    /// Buyer pays. Returns the product on a real purchase, `None` when there
    /// was nothing listed (including a repeated purchase).
    pub fn purchase(&mut self, ctx: &ModuleContext<'_>) -> Option<Product> {
        let TradeState::Listed(product) = &self.state else {
            debug!(state = %self.state, "Purchase with nothing listed, ignoring");
            return None;
        };
        let product = product.clone();

        info!(name = %product.name, price = product.price, "Product purchased, opening box");
        ctx.unlocker.request_unlock("flea_market");
        self.set_state(TradeState::NotListed);
        self.last_purchase = Some(product.clone());
        Some(product)
    }

    pub fn reset(&mut self) {
        self.set_state(TradeState::NotListed);
        self.last_purchase = None;
    }

    fn set_state(&mut self, next: TradeState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Trade state changed");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{InMemoryScene, ProxyKind};
    use crate::unlock::RecordingUnlocker;

    fn draft(name: &str, description: &str, price: Option<i64>) -> ProductDraft {
        ProductDraft {
            name: name.to_string(),
            description: description.to_string(),
            price,
        }
    }

    fn lamp() -> ProductDraft {
        draft("Desk lamp", "Brass, works fine", Some(1200))
    }

    #[test]
    fn test_draft_validation() {
        assert_eq!(draft("", "x", Some(1)).validate(), Err(ListingError::EmptyName));
        assert_eq!(draft("  ", "x", Some(1)).validate(), Err(ListingError::EmptyName));
        assert_eq!(draft("a", "", Some(1)).validate(), Err(ListingError::EmptyDescription));
        assert_eq!(draft("a", "b", None).validate(), Err(ListingError::MissingPrice));
        assert_eq!(draft("a", "b", Some(-5)).validate(), Err(ListingError::NegativePrice(-5)));
        assert_eq!(
            draft("a", "b", Some(i64::from(u32::MAX) + 1)).validate(),
            Err(ListingError::PriceOutOfRange(i64::from(u32::MAX) + 1))
        );

        let free = draft(" Mug ", "Chipped", Some(0)).validate().unwrap();
        assert_eq!(free.name, "Mug");
        assert_eq!(free.price, 0);
    }

    #[test]
    fn test_full_trade() {
        let scene = InMemoryScene::new();
        let unlocker = RecordingUnlocker::new();
        let ctx = ModuleContext {
            scene: &scene,
            unlocker: &unlocker,
        };
        let mut trade = FleaMarketTrade::new(&MetaBoxConfig::default());

        trade.open_for_stocking(&ctx, &lamp()).unwrap();
        assert!(matches!(trade.state(), TradeState::Stocking(_)));
        assert_eq!(unlocker.count(), 1);
        assert!(trade.listed_product().is_none());

        let listed = trade.confirm_listing().unwrap();
        assert_eq!(listed.name, "Desk lamp");
        assert_eq!(trade.listed_product().map(|p| p.price), Some(1200));

        let bought = trade.purchase(&ctx).unwrap();
        assert_eq!(bought.name, "Desk lamp");
        assert_eq!(trade.state(), &TradeState::NotListed);
        assert_eq!(trade.last_purchase(), Some(&bought));
        assert_eq!(unlocker.count(), 2);
    }

    #[test]
    fn test_listing_blocked_while_listed() {
        let scene = InMemoryScene::new();
        let unlocker = RecordingUnlocker::new();
        let ctx = ModuleContext {
            scene: &scene,
            unlocker: &unlocker,
        };
        let mut trade = FleaMarketTrade::new(&MetaBoxConfig::default());
        trade.open_for_stocking(&ctx, &lamp()).unwrap();
        trade.confirm_listing().unwrap();

        let second = draft("Kettle", "Whistles", Some(800));
        assert_eq!(
            trade.open_for_stocking(&ctx, &second),
            Err(ListingError::AlreadyListed)
        );
        assert_eq!(trade.listed_product().map(|p| p.name.as_str()), Some("Desk lamp"));
        assert_eq!(unlocker.count(), 1);
    }

    #[test]
    fn test_double_purchase_is_noop() {
        let scene = InMemoryScene::new();
        let unlocker = RecordingUnlocker::new();
        let ctx = ModuleContext {
            scene: &scene,
            unlocker: &unlocker,
        };
        let mut trade = FleaMarketTrade::new(&MetaBoxConfig::default());

        assert!(trade.purchase(&ctx).is_none());

        trade.open_for_stocking(&ctx, &lamp()).unwrap();
        trade.confirm_listing().unwrap();
        assert!(trade.purchase(&ctx).is_some());
        assert!(trade.purchase(&ctx).is_none());
        assert_eq!(unlocker.count(), 2);
    }

    #[test]
    fn test_purchase_while_stocking_is_noop() {
        let scene = InMemoryScene::new();
        let unlocker = RecordingUnlocker::new();
        let ctx = ModuleContext {
            scene: &scene,
            unlocker: &unlocker,
        };
        let mut trade = FleaMarketTrade::new(&MetaBoxConfig::default());
        trade.open_for_stocking(&ctx, &lamp()).unwrap();

        assert!(trade.purchase(&ctx).is_none());
        assert!(matches!(trade.state(), TradeState::Stocking(_)));
    }

    #[test]
    fn test_invalid_draft_does_not_open_box() {
        let scene = InMemoryScene::new();
        let unlocker = RecordingUnlocker::new();
        let ctx = ModuleContext {
            scene: &scene,
            unlocker: &unlocker,
        };
        let mut trade = FleaMarketTrade::new(&MetaBoxConfig::default());

        let err = trade
            .open_for_stocking(&ctx, &draft("Lamp", "", Some(10)))
            .unwrap_err();
        assert_eq!(err.to_string(), "product description is required");
        assert_eq!(trade.state(), &TradeState::NotListed);
        assert_eq!(unlocker.count(), 0);
    }

    #[test]
    fn test_confirm_and_cancel() {
        let scene = InMemoryScene::new();
        let unlocker = RecordingUnlocker::new();
        let ctx = ModuleContext {
            scene: &scene,
            unlocker: &unlocker,
        };
        let mut trade = FleaMarketTrade::new(&MetaBoxConfig::default());

        assert_eq!(trade.confirm_listing(), Err(ListingError::NothingToConfirm));

        trade.open_for_stocking(&ctx, &lamp()).unwrap();
        trade.cancel_stocking();
        assert_eq!(trade.state(), &TradeState::NotListed);

        // Restocking after a cancel is allowed
        trade.open_for_stocking(&ctx, &lamp()).unwrap();
        assert_eq!(unlocker.count(), 2);
    }

    #[tokio::test]
    async fn test_listing_survives_exit() {
        let scene = InMemoryScene::new();
        let unlocker = RecordingUnlocker::new();
        let ctx = ModuleContext {
            scene: &scene,
            unlocker: &unlocker,
        };
        let mut trade = FleaMarketTrade::new(&MetaBoxConfig::default());

        let anchor = TrackedObjectAnchor {
            id: AnchorId::new(),
            pose: Default::default(),
            tracked: true,
            reference_object: "metaBox".to_string(),
        };
        trade.on_anchor_added(&ctx, &anchor).await;
        assert_eq!(scene.count_of(ProxyKind::Skin), 1);

        trade.open_for_stocking(&ctx, &lamp()).unwrap();
        trade.confirm_listing().unwrap();
        trade.on_exit(&ctx).await;

        assert!(scene.is_empty());
        assert!(trade.listed_product().is_some());
    }

    #[test]
    fn test_state_serializes_with_product() {
        let state = TradeState::Listed(Product {
            name: "Mug".to_string(),
            description: "Chipped".to_string(),
            price: 300,
        });
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "listed");
        assert_eq!(json["product"]["price"], 300);

        let json = serde_json::to_value(TradeState::NotListed).unwrap();
        assert_eq!(json["state"], "not_listed");
    }
}
