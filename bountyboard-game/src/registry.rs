//! The set of active bounties.
//!
//! A [`BountyRegistry`] owns every listed bounty, enforces per-faction
//! capacity and name uniqueness, and drives the time-based half of the
//! lifecycle through the shared [`Scheduler`]: listing a bounty arms an
//! expiry task at its end time, expiry escapes it and arms a respawn task,
//! and the respawn task either reissues the criminal on a new route or
//! retires it.
//!
//! Locks are always taken registry index first, then a single bounty. The
//! scheduler lock and the event log are leaves. No scheduled effect ever
//! runs while any of them is held.
//!
//! Every task the registry arms knows its own [`TaskId`], and its callback
//! only acts while the bounty still holds that task. Cancelling a task
//! detaches it first, so a callback that was already on its way out of the
//! scheduler finds nothing to act on.

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use chrono::TimeDelta;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ErrorKind;
use crate::bounty::{Bounty, LifecycleError, RewardTable};
use crate::catalog::Catalog;
use crate::config::{BountyConfig, BountyIndex, ConfigError, GenerateOptions, GenerationContext};
use crate::constants::{DEFAULT_RESPAWN_DELAY, LOG_REGISTRY, MAX_BOUNTIES_PER_FACTION};
use crate::criminal::Criminal;
use crate::scheduling::{Scheduler, TaskHandle, TaskId};

/// A listed bounty. Lock it to read or act on it.
pub type SharedBounty = Arc<Mutex<Bounty>>;

const fn default_max_bounties() -> usize {
    MAX_BOUNTIES_PER_FACTION
}

const fn default_respawn_delay_secs() -> u64 {
    DEFAULT_RESPAWN_DELAY.as_secs()
}

/// Runtime knobs for a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_max_bounties")]
    pub max_bounties_per_faction: usize,
    /// Seconds between a bounty escaping and its respawn.
    #[serde(default = "default_respawn_delay_secs")]
    pub respawn_delay_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_bounties_per_faction: default_max_bounties(),
            respawn_delay_secs: default_respawn_delay_secs(),
        }
    }
}

impl RegistryConfig {
    #[must_use]
    pub const fn respawn_delay(&self) -> Duration {
        Duration::from_secs(self.respawn_delay_secs)
    }
}

/// Lifecycle transitions, queued for whatever front-end announces them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BountyEvent {
    Issued {
        name: String,
        faction: String,
        route: Vec<String>,
    },
    Escaped {
        name: String,
    },
    Respawned {
        name: String,
        route: Vec<String>,
    },
    Expired {
        name: String,
    },
    Won {
        name: String,
        rewards: RewardTable,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no active bounty for '{0}'")]
    NotFound(String),
    #[error("the answer for '{0}' has not been found yet")]
    NotWon(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl RegistryError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotWon(_) => ErrorKind::Precondition,
            Self::Config(err) => err.kind(),
            Self::Lifecycle(err) => err.kind(),
        }
    }
}

struct Entry {
    instance: u64,
    name: String,
    faction: String,
    bounty: SharedBounty,
}

#[derive(Default)]
struct Index {
    next_instance: u64,
    entries: HashMap<String, Entry>,
}

impl Index {
    fn faction_count(&self, faction: &str) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.faction == faction)
            .count()
    }

    fn current(&self, key: &str, instance: u64) -> Option<&Entry> {
        self.entries
            .get(key)
            .filter(|entry| entry.instance == instance)
    }
}

/// Capacity view over a locked index.
struct Slots<'a> {
    index: &'a Index,
    capacity: usize,
}

impl BountyIndex for Slots<'_> {
    fn faction_can_make_bounty(&self, faction: &str) -> bool {
        self.index.faction_count(&faction.to_lowercase()) < self.capacity
    }

    fn bounty_name_exists(&self, name: &str) -> bool {
        self.index.entries.contains_key(&key_of(name))
    }
}

fn key_of(name: &str) -> String {
    name.trim().to_lowercase()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of active bounties.
pub struct BountyRegistry {
    config: RegistryConfig,
    catalog: Arc<Catalog>,
    scheduler: Scheduler,
    index: Mutex<Index>,
    events: Mutex<Vec<BountyEvent>>,
    rng: Mutex<ChaCha20Rng>,
    closed: AtomicBool,
    this: Weak<BountyRegistry>,
}

impl std::fmt::Debug for BountyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BountyRegistry")
            .field("config", &self.config)
            .field("bounties", &self.len())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl BountyRegistry {
    /// Registry whose respawns draw from an entropy-seeded generator.
    #[must_use]
    pub fn new(config: RegistryConfig, catalog: Arc<Catalog>, scheduler: Scheduler) -> Arc<Self> {
        Self::build(config, catalog, scheduler, ChaCha20Rng::from_entropy())
    }

    /// Registry whose respawned routes are reproducible.
    #[must_use]
    pub fn with_seed(
        config: RegistryConfig,
        catalog: Arc<Catalog>,
        scheduler: Scheduler,
        seed: u64,
    ) -> Arc<Self> {
        Self::build(config, catalog, scheduler, ChaCha20Rng::seed_from_u64(seed))
    }

    fn build(
        config: RegistryConfig,
        catalog: Arc<Catalog>,
        scheduler: Scheduler,
        rng: ChaCha20Rng,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            catalog,
            scheduler,
            index: Mutex::new(Index::default()),
            events: Mutex::new(Vec::new()),
            rng: Mutex::new(rng),
            closed: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Generate a new NPC bounty from `config` and list it.
    ///
    /// The registry stays locked from capacity checks through insertion, so
    /// concurrent callers can never overfill a faction.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] from generation, or
    /// [`ConfigError::DuplicateName`] if the criminal is already listed.
    pub fn generate_bounty<R>(
        &self,
        config: BountyConfig,
        rng: &mut R,
    ) -> Result<SharedBounty, ConfigError>
    where
        R: Rng + ?Sized,
    {
        self.generate_with(config, rng, GenerateOptions::fresh())
    }

    /// List a bounty on a criminal the caller already has, such as a player.
    ///
    /// # Errors
    ///
    /// As [`Self::generate_bounty`].
    pub fn issue_for<R>(&self, criminal: &Criminal, rng: &mut R) -> Result<SharedBounty, ConfigError>
    where
        R: Rng + ?Sized,
    {
        self.generate_with(
            BountyConfig::for_criminal(criminal),
            rng,
            GenerateOptions::for_criminal(),
        )
    }

    fn generate_with<R>(
        &self,
        mut config: BountyConfig,
        rng: &mut R,
        options: GenerateOptions,
    ) -> Result<SharedBounty, ConfigError>
    where
        R: Rng + ?Sized,
    {
        let now = self.scheduler.clock().utc_now();
        let mut index = lock(&self.index);
        {
            let slots = Slots {
                index: &index,
                capacity: self.config.max_bounties_per_faction,
            };
            let ctx = GenerationContext::new(&self.catalog, &slots, now);
            config.generate(&ctx, rng, options)?;
        }
        let bounty = Bounty::from_config(config, None)?;
        self.list(&mut index, bounty)
    }

    /// List an already-built bounty, typically one reloaded from storage.
    ///
    /// Capacity is not enforced here; duplicate names still are.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateName`] if the criminal is already listed.
    pub fn insert(&self, bounty: Bounty) -> Result<SharedBounty, RegistryError> {
        let mut index = lock(&self.index);
        Ok(self.list(&mut index, bounty)?)
    }

    fn list(&self, index: &mut Index, bounty: Bounty) -> Result<SharedBounty, ConfigError> {
        let name = bounty.criminal().name.clone();
        let key = key_of(&name);
        if index.entries.contains_key(&key) {
            return Err(ConfigError::DuplicateName(name));
        }
        let event = BountyEvent::Issued {
            name: name.clone(),
            faction: bounty.faction().to_string(),
            route: bounty.route().to_vec(),
        };
        let shared = self.install(index, key, bounty);
        log::info!(target: LOG_REGISTRY, "listed bounty for {name}");
        self.record(event);
        Ok(shared)
    }

    /// Put `bounty` under `key` as a new instance and arm its expiry.
    fn install(&self, index: &mut Index, key: String, bounty: Bounty) -> SharedBounty {
        index.next_instance += 1;
        let instance = index.next_instance;
        let end_time = bounty.end_time();
        let name = bounty.criminal().name.clone();
        let faction = bounty.faction().to_string();
        let shared = Arc::new(Mutex::new(bounty));

        if !self.is_closed() {
            let left = end_time - self.scheduler.clock().utc_now();
            let delay = left.max(TimeDelta::zero()).to_std().unwrap_or_default();
            let handle = self.schedule_for(delay, &key, instance, Self::on_expired);
            lock(&shared).arm_expiry(handle);
        }

        index.entries.insert(
            key,
            Entry {
                instance,
                name,
                faction,
                bounty: Arc::clone(&shared),
            },
        );
        shared
    }

    /// Arm a task that calls `on_fire` with the listing it was armed for and
    /// its own id.
    ///
    /// Callers hold the index lock, which every callback takes first, so the
    /// id is always recorded before the callback can read it.
    fn schedule_for(
        &self,
        delay: Duration,
        key: &str,
        instance: u64,
        on_fire: fn(&Self, &str, u64, TaskId),
    ) -> TaskHandle {
        let weak = self.this.clone();
        let key = key.to_string();
        let id = Arc::new(OnceLock::new());
        let fired_id = Arc::clone(&id);
        let handle = self.scheduler.schedule(delay, move || {
            if let (Some(registry), Some(&task)) = (weak.upgrade(), fired_id.get()) {
                on_fire(&registry, &key, instance, task);
            }
        });
        let _ = id.set(handle.id());
        handle
    }

    fn on_expired(&self, key: &str, instance: u64, task: TaskId) {
        if self.is_closed() {
            return;
        }
        let index = lock(&self.index);
        let Some(entry) = index.current(key, instance) else {
            log::debug!(target: LOG_REGISTRY, "ignoring stale expiry for {key}");
            return;
        };
        let mut bounty = lock(&entry.bounty);
        if bounty.expiry_task().map(TaskHandle::id) != Some(task) {
            log::debug!(target: LOG_REGISTRY, "ignoring detached expiry {task} for {key}");
            return;
        }
        let handle = self.schedule_for(
            self.config.respawn_delay(),
            key,
            instance,
            Self::on_respawn,
        );
        match bounty.escape(&handle) {
            Ok(()) => {
                log::info!(target: LOG_REGISTRY, "bounty for {} escaped", entry.name);
                self.record(BountyEvent::Escaped {
                    name: entry.name.clone(),
                });
            }
            Err(err) => {
                handle.cancel();
                log::debug!(target: LOG_REGISTRY, "expiry ignored: {err}");
            }
        }
    }

    fn on_respawn(&self, key: &str, instance: u64, task: TaskId) {
        if self.is_closed() {
            return;
        }
        let mut index = lock(&self.index);
        let Some(entry) = index.current(key, instance) else {
            log::debug!(target: LOG_REGISTRY, "ignoring stale respawn for {key}");
            return;
        };
        let name = entry.name.clone();
        let criminal = {
            let mut bounty = lock(&entry.bounty);
            if bounty.respawn_task().map(TaskHandle::id) != Some(task) {
                log::debug!(target: LOG_REGISTRY, "ignoring detached respawn {task} for {key}");
                return;
            }
            bounty.disarm();
            bounty.criminal().clone()
        };

        if criminal.is_player {
            index.entries.remove(key);
            log::info!(target: LOG_REGISTRY, "player bounty for {name} expired");
            self.record(BountyEvent::Expired { name });
            return;
        }

        match self.reissue(&criminal) {
            Ok(bounty) => {
                let route = bounty.route().to_vec();
                index.entries.remove(key);
                self.install(&mut index, key.to_string(), bounty);
                log::info!(target: LOG_REGISTRY, "bounty for {name} respawned");
                self.record(BountyEvent::Respawned { name, route });
            }
            Err(err) => {
                index.entries.remove(key);
                log::warn!(target: LOG_REGISTRY, "could not respawn {name}: {err}");
                self.record(BountyEvent::Expired { name });
            }
        }
    }

    /// Fresh route and answer for a criminal whose slot is being reused.
    fn reissue(&self, criminal: &Criminal) -> Result<Bounty, ConfigError> {
        let mut config = BountyConfig::for_criminal(criminal);
        let ctx = GenerationContext::unchecked(&self.catalog, self.scheduler.clock().utc_now());
        let options = GenerateOptions {
            force_no_db_check: true,
            ..GenerateOptions::for_criminal()
        };
        config.generate(&ctx, &mut *lock(&self.rng), options)?;
        Bounty::from_config(config, Some(criminal.clone()))
    }

    /// The bounty listed under `name`, matched case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<SharedBounty> {
        lock(&self.index)
            .entries
            .get(&key_of(name))
            .map(|entry| Arc::clone(&entry.bounty))
    }

    /// Delist a bounty and cancel its timers.
    pub fn remove(&self, name: &str) -> Option<SharedBounty> {
        let mut index = lock(&self.index);
        let entry = index.entries.remove(&key_of(name))?;
        lock(&entry.bounty).disarm();
        log::info!(target: LOG_REGISTRY, "removed bounty for {}", entry.name);
        Some(entry.bounty)
    }

    /// Names of every listed criminal, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.index)
            .entries
            .values()
            .map(|entry| entry.name.clone())
            .collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn faction_count(&self, faction: &str) -> usize {
        lock(&self.index).faction_count(&faction.trim().to_lowercase())
    }

    /// Names of listed bounties waiting on a respawn, sorted.
    #[must_use]
    pub fn escaped_names(&self) -> Vec<String> {
        let index = lock(&self.index);
        let mut names: Vec<String> = index
            .entries
            .values()
            .filter(|entry| lock(&entry.bounty).is_escaped())
            .map(|entry| entry.name.clone())
            .collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.index).entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every listed bounty, sorted by criminal name.
    #[must_use]
    pub fn bounties(&self) -> Vec<SharedBounty> {
        let index = lock(&self.index);
        let mut entries: Vec<&Entry> = index.entries.values().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
            .into_iter()
            .map(|entry| Arc::clone(&entry.bounty))
            .collect()
    }

    /// Escape a listed bounty now, respawning it after `delay`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if nothing is listed under `name`, or
    /// [`LifecycleError::AlreadyEscaped`] if it already escaped.
    pub fn escape_bounty(&self, name: &str, delay: Duration) -> Result<TaskHandle, RegistryError> {
        let key = key_of(name);
        let index = lock(&self.index);
        let entry = index
            .entries
            .get(&key)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let handle = self.schedule_for(delay, &key, entry.instance, Self::on_respawn);
        if let Err(err) = lock(&entry.bounty).escape(&handle) {
            handle.cancel();
            return Err(err.into());
        }
        log::info!(target: LOG_REGISTRY, "bounty for {} escaped", entry.name);
        self.record(BountyEvent::Escaped {
            name: entry.name.clone(),
        });
        Ok(handle)
    }

    /// Keep an escaped bounty listed by cancelling its respawn.
    ///
    /// A respawn that has already left the scheduler but not yet taken the
    /// bounty lock is still stopped: it finds its task detached and does
    /// nothing.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] or [`LifecycleError::NotEscaped`].
    pub fn cancel_respawn(&self, name: &str) -> Result<(), RegistryError> {
        let bounty = self
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        lock(&bounty).cancel_respawn()?;
        log::debug!(target: LOG_REGISTRY, "respawn of {name} cancelled");
        Ok(())
    }

    /// Run an escaped bounty's respawn immediately.
    ///
    /// The task is looked up under the locks and fired after they are
    /// released, so its effect is free to take them again. This is the only
    /// way to force a listed bounty's respawn; locking the bounty and forcing
    /// it from there would leave the effect waiting on the caller.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`], or [`LifecycleError::NotEscaped`] when no
    /// respawn is pending, including one cancelled or fired between the
    /// lookup and the firing.
    pub fn force_respawn(&self, name: &str) -> Result<(), RegistryError> {
        let task = {
            let index = lock(&self.index);
            let entry = index
                .entries
                .get(&key_of(name))
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            let bounty = lock(&entry.bounty);
            bounty
                .respawn_task()
                .cloned()
                .ok_or_else(|| LifecycleError::NotEscaped(bounty.criminal().name.clone()))?
        };
        if !task.force_expire(true) {
            return Err(LifecycleError::NotEscaped(name.to_string()).into());
        }
        Ok(())
    }

    /// Close out a bounty whose answer has been found, returning the payout.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`], or [`RegistryError::NotWon`] while the
    /// answer system is still unchecked.
    pub fn resolve_won(&self, name: &str) -> Result<RewardTable, RegistryError> {
        let key = key_of(name);
        let mut index = lock(&self.index);
        let entry = index
            .entries
            .get(&key)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let rewards = {
            let mut bounty = lock(&entry.bounty);
            if !bounty.answer_found() {
                return Err(RegistryError::NotWon(entry.name.clone()));
            }
            bounty.disarm();
            bounty.calc_rewards()
        };
        let name = entry.name.clone();
        index.entries.remove(&key);
        log::info!(target: LOG_REGISTRY, "bounty for {name} won");
        self.record(BountyEvent::Won {
            name,
            rewards: rewards.clone(),
        });
        Ok(rewards)
    }

    fn record(&self, event: BountyEvent) {
        lock(&self.events).push(event);
    }

    /// Take every event recorded since the last drain, oldest first.
    #[must_use]
    pub fn drain_events(&self) -> Vec<BountyEvent> {
        mem::take(&mut *lock(&self.events))
    }

    /// Cancel every timer the registry armed. Bounties stay listed, but no
    /// expiry or respawn will run afterwards.
    pub fn shutdown(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let index = lock(&self.index);
        for entry in index.entries.values() {
            lock(&entry.bounty).disarm();
        }
        log::info!(
            target: LOG_REGISTRY,
            "registry shut down with {} bounties listed",
            index.entries.len()
        );
        index.entries.len()
    }
}

impl BountyIndex for BountyRegistry {
    fn faction_can_make_bounty(&self, faction: &str) -> bool {
        self.faction_count(faction) < self.config.max_bounties_per_faction
    }

    fn bounty_name_exists(&self, name: &str) -> bool {
        lock(&self.index).entries.contains_key(&key_of(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounty::{BountyState, CheckOutcome, ContributorId};
    use crate::catalog::catalog;
    use crate::scheduling::ManualClock;
    use chrono::{DateTime, Utc};
    use std::thread;

    fn origin() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_040, 0).unwrap()
    }

    fn setup(config: RegistryConfig) -> (Arc<ManualClock>, Arc<BountyRegistry>) {
        let clock = Arc::new(ManualClock::new(origin()));
        let scheduler = Scheduler::new(clock.clone());
        let registry =
            BountyRegistry::with_seed(config, Arc::new(catalog().clone()), scheduler, 5);
        (clock, registry)
    }

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(17)
    }

    fn until_end(bounty: &SharedBounty) -> Duration {
        let bounty = lock(bounty);
        (bounty.end_time() - origin()).to_std().unwrap()
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: RegistryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RegistryConfig::default());
        assert_eq!(config.max_bounties_per_faction, MAX_BOUNTIES_PER_FACTION);
        assert_eq!(config.respawn_delay(), DEFAULT_RESPAWN_DELAY);
    }

    #[test]
    fn generation_respects_faction_capacity() {
        let (_, registry) = setup(RegistryConfig {
            max_bounties_per_faction: 2,
            ..RegistryConfig::default()
        });
        let mut rng = rng();
        for _ in 0..2 {
            registry
                .generate_bounty(BountyConfig::new().with_faction("vossk"), &mut rng)
                .unwrap();
        }
        assert_eq!(registry.faction_count("Vossk"), 2);
        assert_eq!(
            registry
                .generate_bounty(BountyConfig::new().with_faction("vossk"), &mut rng)
                .unwrap_err(),
            ConfigError::FactionFull("vossk".into())
        );
        assert!(!registry.faction_can_make_bounty("vossk"));
        assert!(registry.faction_can_make_bounty("terran"));
    }

    #[test]
    fn concurrent_generation_never_overfills() {
        let (_, registry) = setup(RegistryConfig {
            max_bounties_per_faction: 3,
            ..RegistryConfig::default()
        });
        let workers: Vec<_> = (0..8_u64)
            .map(|seed| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let mut rng = ChaCha20Rng::seed_from_u64(seed);
                    let config = BountyConfig::new()
                        .with_faction("terran")
                        .with_name(format!("Wanted {seed}"));
                    registry.generate_bounty(config, &mut rng).is_ok()
                })
            })
            .collect();
        let listed = workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(listed, 3);
        assert_eq!(registry.faction_count("terran"), 3);
    }

    #[test]
    fn duplicate_built_in_names_are_rejected() {
        let (_, registry) = setup(RegistryConfig::default());
        let mut rng = rng();
        registry
            .generate_bounty(BountyConfig::new().with_name("Ganymede Rex"), &mut rng)
            .unwrap();
        assert_eq!(
            registry
                .generate_bounty(BountyConfig::new().with_name("ganymede rex"), &mut rng)
                .unwrap_err(),
            ConfigError::DuplicateName("Ganymede Rex".into())
        );
        assert!(registry.get("GANYMEDE REX").is_some());
    }

    #[test]
    fn expiry_escapes_then_respawns_npc_on_new_instance() {
        let (clock, registry) = setup(RegistryConfig::default());
        let shared = registry
            .generate_bounty(BountyConfig::new().with_name("Halsey Corvin"), &mut rng())
            .unwrap();
        let _ = registry.drain_events();

        clock.advance(until_end(&shared));
        assert_eq!(registry.scheduler().run_due(), 1);
        assert_eq!(lock(&shared).state(), BountyState::Escaped);
        assert_eq!(registry.escaped_names(), vec!["Halsey Corvin".to_string()]);

        clock.advance(registry.config().respawn_delay());
        assert_eq!(registry.scheduler().run_due(), 1);

        let fresh = registry.get("halsey corvin").unwrap();
        assert!(!Arc::ptr_eq(&fresh, &shared));
        assert_eq!(lock(&fresh).state(), BountyState::Active);
        assert!(lock(&fresh).expiry_task().is_some());
        assert!(registry.escaped_names().is_empty());

        let events = registry.drain_events();
        assert!(matches!(events[0], BountyEvent::Escaped { .. }));
        assert!(matches!(events[1], BountyEvent::Respawned { .. }));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn player_bounties_expire_instead_of_respawning() {
        let (_, registry) = setup(RegistryConfig::default());
        let player = Criminal::player("@drifter", "nova");
        registry.issue_for(&player, &mut rng()).unwrap();

        registry
            .escape_bounty("@drifter", Duration::from_secs(30))
            .unwrap();
        registry.force_respawn("@drifter").unwrap();

        assert!(registry.get("@drifter").is_none());
        assert_eq!(registry.faction_count("nova"), 0);
        let events = registry.drain_events();
        assert_eq!(
            events.last(),
            Some(&BountyEvent::Expired {
                name: "@drifter".into()
            })
        );
    }

    #[test]
    fn escaping_twice_keeps_first_respawn() {
        let (_, registry) = setup(RegistryConfig::default());
        registry
            .generate_bounty(BountyConfig::new().with_name("Juno Pike"), &mut rng())
            .unwrap();
        let first = registry
            .escape_bounty("juno pike", Duration::from_secs(60))
            .unwrap();
        let err = registry
            .escape_bounty("juno pike", Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Lifecycle(LifecycleError::AlreadyEscaped(_))
        ));
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(first.is_pending());
        // expiry was cancelled by the escape, the rejected respawn by the registry
        assert_eq!(registry.scheduler().pending_count(), 1);
    }

    #[test]
    fn cancelled_respawn_never_runs() {
        let (clock, registry) = setup(RegistryConfig::default());
        let shared = registry
            .generate_bounty(BountyConfig::new().with_name("Juno Pike"), &mut rng())
            .unwrap();
        registry
            .escape_bounty("Juno Pike", Duration::from_secs(60))
            .unwrap();
        registry.cancel_respawn("Juno Pike").unwrap();

        clock.advance(Duration::from_secs(600));
        assert_eq!(registry.scheduler().run_due(), 0);
        let current = registry.get("Juno Pike").unwrap();
        assert!(Arc::ptr_eq(&current, &shared));
        assert!(matches!(
            registry.cancel_respawn("Juno Pike"),
            Err(RegistryError::Lifecycle(LifecycleError::NotEscaped(_)))
        ));
    }

    #[test]
    fn cancel_wins_over_a_respawn_already_leaving_the_scheduler() {
        let (clock, registry) = setup(RegistryConfig::default());
        let shared = registry
            .generate_bounty(BountyConfig::new().with_name("Juno Pike"), &mut rng())
            .unwrap();
        registry
            .escape_bounty("Juno Pike", Duration::from_secs(60))
            .unwrap();
        let _ = registry.drain_events();
        clock.advance(Duration::from_secs(60));

        // hold the bounty so the fired respawn stalls on it
        let mut guard = lock(&shared);
        let runner = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.scheduler().run_due())
        };
        while registry.scheduler().pending_count() > 0 {
            thread::yield_now();
        }
        guard.cancel_respawn().unwrap();
        drop(guard);

        assert_eq!(runner.join().unwrap(), 1);
        let current = registry.get("Juno Pike").unwrap();
        assert!(Arc::ptr_eq(&current, &shared));
        assert!(!lock(&shared).is_escaped());
        assert!(registry.drain_events().is_empty());
    }

    #[test]
    fn respawn_for_a_detached_task_is_ignored() {
        let (_, registry) = setup(RegistryConfig::default());
        let shared = registry
            .generate_bounty(BountyConfig::new().with_name("Juno Pike"), &mut rng())
            .unwrap();
        let first = registry
            .escape_bounty("Juno Pike", Duration::from_secs(60))
            .unwrap();
        registry.cancel_respawn("Juno Pike").unwrap();
        let second = registry
            .escape_bounty("Juno Pike", Duration::from_secs(60))
            .unwrap();
        let instance = lock(&registry.index).entries["juno pike"].instance;
        let _ = registry.drain_events();

        registry.on_respawn("juno pike", instance, first.id());
        assert!(Arc::ptr_eq(&registry.get("Juno Pike").unwrap(), &shared));
        assert_eq!(lock(&shared).respawn_task(), Some(&second));
        assert!(registry.drain_events().is_empty());

        registry.on_respawn("juno pike", instance, second.id());
        assert!(!Arc::ptr_eq(&registry.get("Juno Pike").unwrap(), &shared));
        assert!(!lock(&shared).is_escaped());
    }

    #[test]
    fn forcing_a_listed_respawn_reissues_right_away() {
        let (_, registry) = setup(RegistryConfig::default());
        let shared = registry
            .generate_bounty(BountyConfig::new().with_name("Osh Tavari"), &mut rng())
            .unwrap();
        assert!(matches!(
            registry.force_respawn("Osh Tavari"),
            Err(RegistryError::Lifecycle(LifecycleError::NotEscaped(_)))
        ));
        let task = registry
            .escape_bounty("Osh Tavari", Duration::from_secs(3600))
            .unwrap();
        let _ = registry.drain_events();

        registry.force_respawn("osh tavari").unwrap();

        assert!(!task.is_pending());
        assert!(!lock(&shared).is_escaped());
        let fresh = registry.get("Osh Tavari").unwrap();
        assert!(!Arc::ptr_eq(&fresh, &shared));
        assert_eq!(lock(&fresh).state(), BountyState::Active);
        assert!(matches!(
            registry.drain_events().as_slice(),
            [BountyEvent::Respawned { .. }]
        ));
        // only the new instance's expiry is left
        assert_eq!(registry.scheduler().pending_count(), 1);
    }

    #[test]
    fn stale_respawn_after_removal_is_ignored() {
        let (clock, registry) = setup(RegistryConfig::default());
        registry
            .generate_bounty(BountyConfig::new().with_name("Juno Pike"), &mut rng())
            .unwrap();
        let task = registry
            .escape_bounty("Juno Pike", Duration::from_secs(60))
            .unwrap();
        let removed = registry.remove("juno pike").unwrap();
        assert!(!task.is_pending());
        assert!(!lock(&removed).is_escaped());

        clock.advance(Duration::from_secs(120));
        assert_eq!(registry.scheduler().run_due(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn resolving_a_win_pays_out_and_delists() {
        let (_, registry) = setup(RegistryConfig::default());
        let shared = registry
            .generate_bounty(BountyConfig::new().with_name("Osh Tavari"), &mut rng())
            .unwrap();
        assert!(matches!(
            registry.resolve_won("Osh Tavari"),
            Err(RegistryError::NotWon(_))
        ));

        let answer = lock(&shared).answer().to_string();
        assert_eq!(
            lock(&shared).check(&answer, ContributorId(9)),
            CheckOutcome::AnswerFound
        );
        let rewards = registry.resolve_won("osh tavari").unwrap();
        assert!(rewards[&ContributorId(9)].won);
        assert!(registry.get("Osh Tavari").is_none());
        assert_eq!(registry.scheduler().pending_count(), 0);
        assert!(matches!(
            registry.drain_events().last(),
            Some(BountyEvent::Won { .. })
        ));
    }

    #[test]
    fn shutdown_cancels_every_timer() {
        let (clock, registry) = setup(RegistryConfig::default());
        let mut rng = rng();
        for faction in ["terran", "vossk", "nova"] {
            registry
                .generate_bounty(BountyConfig::new().with_faction(faction), &mut rng)
                .unwrap();
        }
        registry
            .escape_bounty(&registry.names()[0], Duration::from_secs(1))
            .unwrap();
        assert_eq!(registry.scheduler().pending_count(), 3);

        assert_eq!(registry.shutdown(), 3);
        assert_eq!(registry.scheduler().pending_count(), 0);
        clock.advance(Duration::from_secs(60 * 60 * 24 * 30));
        assert_eq!(registry.scheduler().run_due(), 0);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn unknown_names_report_not_found() {
        let (_, registry) = setup(RegistryConfig::default());
        let err = registry.force_respawn("nobody").unwrap_err();
        assert_eq!(err, RegistryError::NotFound("nobody".into()));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(registry.remove("nobody").is_none());
    }
}
