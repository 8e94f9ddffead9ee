//! Item kinds a bounty hunter can own.
//!
//! Items are a closed sum type. Serialized items carry a `type` tag (and tools
//! a nested `tool` tag); serde's derived variant table is the one place that
//! maps a tag to its constructor, so an unknown tag fails to decode.

use std::cmp::Ordering;
use std::sync::OnceLock;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ErrorKind;

const DEFAULT_LOOT_DATA: &str = include_str!("../assets/loot.json");

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ItemError {
    #[error("'{item}' cannot be placed in crate '{crate_name}'")]
    NotSpawnable { crate_name: String, item: String },
    #[error("crate '{0}' has nothing in it")]
    EmptyCrate(String),
}

impl ItemError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotSpawnable { .. } => ErrorKind::Validation,
            Self::EmptyCrate(_) => ErrorKind::Precondition,
        }
    }
}

/// Attributes shared by every item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub wiki: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub tech_level: Option<u8>,
    #[serde(default)]
    pub built_in: bool,
}

impl ItemInfo {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_value(mut self, value: i64) -> Self {
        self.value = value;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GameItem {
    Ship(ItemInfo),
    PrimaryWeapon(ItemInfo),
    TurretWeapon(ItemInfo),
    Module(ItemInfo),
    #[serde(rename = "ToolItem")]
    Tool(ToolItem),
}

impl GameItem {
    /// Decode one item from JSON.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON, an unknown `type` or `tool` tag, or a crate
    /// holding something that cannot be spawned.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub const fn info(&self) -> &ItemInfo {
        match self {
            Self::Ship(info)
            | Self::PrimaryWeapon(info)
            | Self::TurretWeapon(info)
            | Self::Module(info) => info,
            Self::Tool(tool) => tool.info(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.info().name
    }

    #[must_use]
    pub const fn value(&self) -> i64 {
        self.info().value
    }

    /// Serialized tag of this item's kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ship(_) => "Ship",
            Self::PrimaryWeapon(_) => "PrimaryWeapon",
            Self::TurretWeapon(_) => "TurretWeapon",
            Self::Module(_) => "Module",
            Self::Tool(_) => "ToolItem",
        }
    }

    /// Whether the item may appear in a crate's pool.
    #[must_use]
    pub const fn is_spawnable(&self) -> bool {
        !matches!(self, Self::Tool(ToolItem::Crate(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool")]
pub enum ToolItem {
    ShipSkin(ShipSkinTool),
    Crate(CrateTool),
}

impl ToolItem {
    #[must_use]
    pub const fn info(&self) -> &ItemInfo {
        match self {
            Self::ShipSkin(skin) => &skin.info,
            Self::Crate(tool) => &tool.info,
        }
    }
}

/// Cosmetic applied to a specific ship hull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipSkinTool {
    #[serde(flatten)]
    pub info: ItemInfo,
    pub ship: String,
}

#[derive(Debug, Deserialize)]
struct CrateData {
    #[serde(flatten)]
    info: ItemInfo,
    #[serde(default)]
    item_pool: Vec<GameItem>,
}

/// A sealed box holding one random item from its pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CrateData")]
pub struct CrateTool {
    #[serde(flatten)]
    info: ItemInfo,
    item_pool: Vec<GameItem>,
}

impl TryFrom<CrateData> for CrateTool {
    type Error = ItemError;

    fn try_from(data: CrateData) -> Result<Self, Self::Error> {
        Self::new(data.info, data.item_pool)
    }
}

impl CrateTool {
    /// # Errors
    ///
    /// [`ItemError::NotSpawnable`] if the pool holds another crate.
    pub fn new(info: ItemInfo, item_pool: Vec<GameItem>) -> Result<Self, ItemError> {
        if let Some(item) = item_pool.iter().find(|item| !item.is_spawnable()) {
            return Err(ItemError::NotSpawnable {
                crate_name: info.name.clone(),
                item: item.name().to_string(),
            });
        }
        Ok(Self { info, item_pool })
    }

    #[must_use]
    pub const fn info(&self) -> &ItemInfo {
        &self.info
    }

    #[must_use]
    pub fn item_pool(&self) -> &[GameItem] {
        &self.item_pool
    }

    /// Pick the item this crate turns into.
    ///
    /// # Errors
    ///
    /// [`ItemError::EmptyCrate`] if the pool is empty.
    pub fn open<R>(&self, rng: &mut R) -> Result<&GameItem, ItemError>
    where
        R: Rng + ?Sized,
    {
        self.item_pool
            .choose(rng)
            .ok_or_else(|| ItemError::EmptyCrate(self.info.name.clone()))
    }

    #[must_use]
    pub fn stats_line(&self) -> String {
        format!("{} possible items", self.item_pool.len())
    }
}

/// A temporary change to an item's price.
///
/// Discounts compare by how much they take off: a multiplier of 0.5 is a
/// bigger discount, and so orders greater, than 0.9.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDiscount {
    pub mult: f64,
    pub desc: String,
}

impl ItemDiscount {
    #[must_use]
    pub fn new(mult: f64, desc: impl Into<String>) -> Self {
        Self {
            mult,
            desc: desc.into(),
        }
    }

    /// Discounted price, rounded down.
    #[must_use]
    pub fn apply(&self, value: i64) -> i64 {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let discounted = (value as f64 * self.mult).floor() as i64;
        discounted
    }
}

impl PartialEq for ItemDiscount {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ItemDiscount {}

impl PartialOrd for ItemDiscount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ItemDiscount {
    fn cmp(&self, other: &Self) -> Ordering {
        other.mult.total_cmp(&self.mult)
    }
}

/// Crate handed to bounty winners, embedded in the crate.
///
/// Falls back to an empty crate if the embedded data fails to load.
#[must_use]
pub fn bounty_crate() -> &'static CrateTool {
    static LOOT: OnceLock<CrateTool> = OnceLock::new();
    LOOT.get_or_init(|| {
        serde_json::from_str(DEFAULT_LOOT_DATA).unwrap_or_else(|_| CrateTool {
            info: ItemInfo::named("Bounty Crate"),
            item_pool: Vec::new(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn items_decode_by_tag() {
        let ship = GameItem::from_json(r#"{"type":"Ship","name":"Groza Mk II","value":8000}"#)
            .unwrap();
        assert_eq!(ship.kind(), "Ship");
        assert_eq!(ship.value(), 8000);

        let skin = GameItem::from_json(
            r#"{"type":"ToolItem","tool":"ShipSkin","name":"Midnight","ship":"Groza Mk II"}"#,
        )
        .unwrap();
        assert!(matches!(skin, GameItem::Tool(ToolItem::ShipSkin(ref s)) if s.ship == "Groza Mk II"));
        assert!(skin.is_spawnable());
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert!(GameItem::from_json(r#"{"type":"Spaceship","name":"x"}"#).is_err());
        assert!(GameItem::from_json(r#"{"type":"ToolItem","tool":"Hammer","name":"x"}"#).is_err());
        assert!(GameItem::from_json(r#"{"name":"x"}"#).is_err());
    }

    #[test]
    fn crates_refuse_nested_crates() {
        let inner = CrateTool::new(
            ItemInfo::named("Inner"),
            vec![GameItem::Module(ItemInfo::named("Shield"))],
        )
        .unwrap();
        let err = CrateTool::new(
            ItemInfo::named("Outer"),
            vec![GameItem::Tool(ToolItem::Crate(inner))],
        )
        .unwrap_err();
        assert_eq!(
            err,
            ItemError::NotSpawnable {
                crate_name: "Outer".into(),
                item: "Inner".into()
            }
        );
        assert_eq!(err.kind(), ErrorKind::Validation);

        let nested = r#"{"type":"ToolItem","tool":"Crate","name":"Outer","item_pool":[
            {"type":"ToolItem","tool":"Crate","name":"Inner","item_pool":[]}
        ]}"#;
        assert!(GameItem::from_json(nested).is_err());
    }

    #[test]
    fn crate_open_picks_from_pool() {
        let pool = vec![
            GameItem::Ship(ItemInfo::named("Groza Mk II")),
            GameItem::PrimaryWeapon(ItemInfo::named("Pulse Laser")),
            GameItem::TurretWeapon(ItemInfo::named("Flak Turret")),
        ];
        let tool = CrateTool::new(ItemInfo::named("Crate"), pool.clone()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        for _ in 0..16 {
            assert!(pool.contains(tool.open(&mut rng).unwrap()));
        }
        assert_eq!(tool.stats_line(), "3 possible items");

        let empty = CrateTool::new(ItemInfo::named("Empty"), Vec::new()).unwrap();
        assert_eq!(
            empty.open(&mut rng),
            Err(ItemError::EmptyCrate("Empty".into()))
        );
    }

    #[test]
    fn discounts_order_by_size() {
        let mut discounts = vec![
            ItemDiscount::new(0.9, "loyalty"),
            ItemDiscount::new(0.5, "clearance"),
            ItemDiscount::new(1.2, "surcharge"),
        ];
        discounts.sort();
        let order: Vec<&str> = discounts.iter().map(|d| d.desc.as_str()).collect();
        assert_eq!(order, vec!["surcharge", "loyalty", "clearance"]);
        assert_eq!(discounts.iter().max().unwrap().apply(1001), 500);
        assert_eq!(ItemDiscount::new(0.5, "a"), ItemDiscount::new(0.5, "b"));
    }

    #[test]
    fn embedded_loot_crate_loads() {
        let loot = bounty_crate();
        assert!(!loot.item_pool().is_empty());
        assert!(loot.item_pool().iter().all(GameItem::is_spawnable));
    }
}
