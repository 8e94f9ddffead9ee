//! Bountyboard Game Engine
//!
//! Platform-agnostic core for the bounty hunting game: deferred-expiry
//! scheduling, route planning over the jump graph, bounty generation and the
//! bounty lifecycle with its reward split. Message rendering, user accounts
//! and storage formats belong to the embedding application.

pub mod bounty;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod criminal;
pub mod items;
pub mod registry;
pub mod route;
pub mod scheduling;

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub use bounty::{
    Bounty, BountyRecord, BountyState, CheckOutcome, CheckedMap, ContributorId, LifecycleError,
    RewardShare, RewardTable,
};
pub use catalog::{Catalog, CatalogError, CriminalTemplate, SolarSystem, SystemGraph, catalog};
pub use config::{
    BountyConfig, BountyIndex, ConfigError, GenerateOptions, GenerationContext, default_reward,
};
pub use criminal::Criminal;
pub use items::{CrateTool, GameItem, ItemDiscount, ItemError, ItemInfo, ShipSkinTool, ToolItem};
pub use registry::{BountyEvent, BountyRegistry, RegistryConfig, RegistryError, SharedBounty};
pub use route::{RouteError, find_route, route_cost};
#[cfg(feature = "async")]
pub use scheduling::{SchedulerDriver, TokioClock};
pub use scheduling::{
    Clock, Effect, ManualClock, Scheduler, SchedulerStats, SystemClock, TaskHandle, TaskId,
};

/// Broad category of a failure, for callers that only need to decide how to
/// respond rather than what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input such as an unknown faction, system or a negative reward.
    Validation,
    /// No free slot; retrying with other input may succeed.
    Capacity,
    /// The operation does not apply to the current state.
    Precondition,
    /// Nothing matches, including unreachable routes.
    NotFound,
}

/// Trait for abstracting catalog loading
/// Platform-specific implementations should provide this
pub trait CatalogLoader {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load factions, criminal templates and the jump graph
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be loaded or is inconsistent.
    fn load_catalog(&self) -> Result<Catalog, Self::Error>;
}

/// Loader for the catalog embedded in this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedCatalog;

impl CatalogLoader for EmbeddedCatalog {
    type Error = std::convert::Infallible;

    fn load_catalog(&self) -> Result<Catalog, Self::Error> {
        Ok(catalog().clone())
    }
}

/// Trait for abstracting bounty board persistence
/// Platform-specific implementations should provide this
pub trait BountyStorage {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Save every bounty on a board
    ///
    /// # Errors
    ///
    /// Returns an error if the board cannot be saved.
    fn save_board(&self, board: &str, records: &[BountyRecord]) -> Result<(), Self::Error>;

    /// Load a saved board
    ///
    /// # Errors
    ///
    /// Returns an error if the board cannot be loaded.
    fn load_board(&self, board: &str) -> Result<Option<Vec<BountyRecord>>, Self::Error>;

    /// Delete a saved board
    ///
    /// # Errors
    ///
    /// Returns an error if the board cannot be deleted.
    fn delete_board(&self, board: &str) -> Result<(), Self::Error>;
}

/// Main engine wiring a catalog source and board storage to registries
pub struct BountyEngine<L, S>
where
    L: CatalogLoader,
    S: BountyStorage,
{
    catalog_loader: L,
    storage: S,
}

impl<L, S> BountyEngine<L, S>
where
    L: CatalogLoader,
    S: BountyStorage,
{
    /// Create a new engine with the provided catalog loader and storage
    pub const fn new(catalog_loader: L, storage: S) -> Self {
        Self {
            catalog_loader,
            storage,
        }
    }

    /// Load the catalog from the configured source
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be loaded.
    pub fn load_catalog(&self) -> Result<Catalog, L::Error> {
        self.catalog_loader.load_catalog()
    }

    /// Build an empty registry over a freshly loaded catalog
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be loaded.
    pub fn open_registry(
        &self,
        config: RegistryConfig,
        scheduler: Scheduler,
        seed: u64,
    ) -> Result<Arc<BountyRegistry>, L::Error> {
        let catalog = self.load_catalog()?;
        Ok(BountyRegistry::with_seed(
            config,
            Arc::new(catalog),
            scheduler,
            seed,
        ))
    }

    /// Generate and list a new bounty
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if generation fails or the board is full.
    pub fn generate_bounty<R>(
        &self,
        registry: &BountyRegistry,
        config: BountyConfig,
        rng: &mut R,
    ) -> Result<SharedBounty, ConfigError>
    where
        R: Rng + ?Sized,
    {
        registry.generate_bounty(config, rng)
    }

    /// Save every bounty listed in `registry`
    ///
    /// # Errors
    ///
    /// Returns an error if the board cannot be saved.
    pub fn save_board(&self, board: &str, registry: &BountyRegistry) -> Result<(), S::Error> {
        let records: Vec<BountyRecord> = registry
            .bounties()
            .iter()
            .map(|bounty| {
                bounty
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .to_record()
            })
            .collect();
        self.storage.save_board(board, &records)
    }

    /// Relist a saved board into `registry`, returning how many bounties
    /// were restored
    ///
    /// Saved bounties skip capacity and uniqueness checks. Each one gets a
    /// fresh expiry timer from its persisted end time, so bounties whose
    /// deadline passed while saved escape on the next scheduler tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the board cannot be loaded or a record no longer
    /// matches the registry's catalog.
    pub fn load_board(&self, board: &str, registry: &BountyRegistry) -> anyhow::Result<usize>
    where
        S::Error: Into<anyhow::Error>,
    {
        let Some(records) = self
            .storage
            .load_board(board)
            .map_err(Into::<anyhow::Error>::into)?
        else {
            return Ok(0);
        };
        let mut restored = 0;
        for record in records {
            let name = record.criminal.name.clone();
            let bounty = Bounty::from_record(record, registry.catalog())
                .map_err(|err| anyhow::anyhow!("cannot restore bounty for {name}: {err}"))?;
            registry.insert(bounty)?;
            restored += 1;
        }
        Ok(restored)
    }

    /// Delete a saved board
    ///
    /// # Errors
    ///
    /// Returns an error if the board cannot be deleted.
    pub fn delete_board(&self, board: &str) -> Result<(), S::Error> {
        self.storage.delete_board(board)
    }
}
