//! Generation-time staging for bounties.
//!
//! A [`BountyConfig`] starts with any subset of its fields filled in.
//! [`BountyConfig::generate`] validates what was given, randomly fills in the
//! rest, and only then marks the config usable. A failed generation leaves
//! the config exactly as it was.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ErrorKind;
use crate::bounty::{CheckedMap, ContributorId};
use crate::catalog::{Catalog, CriminalTemplate};
use crate::constants::{
    BPOINTS_TO_CREDITS_RATIO, LOG_CONFIG, MAX_GENERATION_ATTEMPTS, ROCKET_ICON, ROUTE_HOP_SECS,
};
use crate::criminal::Criminal;
use crate::route::{RouteError, find_route};

/// Errors raised while generating a bounty configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid faction requested '{0}'")]
    InvalidFaction(String),
    #[error("no bounty slots are available for faction '{0}'")]
    FactionFull(String),
    #[error("no faction has a free bounty slot")]
    AllFactionsFull,
    #[error("every built-in criminal of faction '{0}' already has an active bounty")]
    NoFreeCriminal(String),
    #[error("a bounty for '{0}' is already active")]
    DuplicateName(String),
    #[error("invalid system requested '{0}'")]
    InvalidSystem(String),
    #[error("answer '{0}' is not on the bounty route")]
    AnswerNotOnRoute(String),
    #[error("route must start and end in different systems (got '{0}')")]
    DegenerateRoute(String),
    #[error("the map has no pair of jump-gated systems to route between")]
    NoRouteEndpoints,
    #[error("no route from '{start}' to '{end}'")]
    NoRoute { start: String, end: String },
    #[error("invalid reward requested '{0}'")]
    InvalidReward(i64),
    #[error("saved reward {0} is out of range")]
    RewardOutOfRange(u64),
    #[error("end time {end} must be after issue time {issue}")]
    InvalidTimes {
        issue: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("bounty config has already been generated")]
    AlreadyGenerated,
    #[error("bounty config has not been generated")]
    NotGenerated,
    #[error("a bounty registry is required unless registry checks are skipped")]
    MissingRegistry,
}

impl ConfigError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::FactionFull(_) | Self::AllFactionsFull | Self::NoFreeCriminal(_) => {
                ErrorKind::Capacity
            }
            Self::NoRoute { .. } | Self::NoRouteEndpoints => ErrorKind::NotFound,
            Self::AlreadyGenerated | Self::NotGenerated | Self::MissingRegistry => {
                ErrorKind::Precondition
            }
            Self::InvalidFaction(_)
            | Self::DuplicateName(_)
            | Self::InvalidSystem(_)
            | Self::AnswerNotOnRoute(_)
            | Self::DegenerateRoute(_)
            | Self::InvalidReward(_)
            | Self::RewardOutOfRange(_)
            | Self::InvalidTimes { .. } => ErrorKind::Validation,
        }
    }
}

impl From<RouteError> for ConfigError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::UnknownSystem(name) => Self::InvalidSystem(name),
            RouteError::NoRoute { start, end } => Self::NoRoute { start, end },
        }
    }
}

/// Read access to the set of active bounties, used to enforce per-faction
/// capacity and name uniqueness during generation.
pub trait BountyIndex {
    fn faction_can_make_bounty(&self, faction: &str) -> bool;

    fn bounty_name_exists(&self, name: &str) -> bool;
}

/// Switches controlling how much of a config is checked and regenerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// No existing criminal is supplied; resolve or invent one.
    pub no_criminal: bool,
    /// Keep a supplied checked map, back-filling missing systems.
    pub force_keep_checked: bool,
    /// Skip registry capacity and uniqueness checks.
    pub force_no_db_check: bool,
}

impl GenerateOptions {
    /// A procedurally generated NPC bounty.
    #[must_use]
    pub const fn fresh() -> Self {
        Self {
            no_criminal: true,
            force_keep_checked: false,
            force_no_db_check: false,
        }
    }

    /// A bounty on a criminal the caller already has, such as a player.
    #[must_use]
    pub const fn for_criminal() -> Self {
        Self {
            no_criminal: false,
            force_keep_checked: false,
            force_no_db_check: false,
        }
    }

    /// Trusted reconstruction of a persisted bounty.
    #[must_use]
    pub const fn reload() -> Self {
        Self {
            no_criminal: false,
            force_keep_checked: true,
            force_no_db_check: true,
        }
    }
}

/// Inputs shared by every generation call.
#[derive(Clone, Copy)]
pub struct GenerationContext<'a> {
    pub catalog: &'a Catalog,
    pub index: Option<&'a dyn BountyIndex>,
    pub now: DateTime<Utc>,
}

impl<'a> GenerationContext<'a> {
    #[must_use]
    pub fn new(catalog: &'a Catalog, index: &'a dyn BountyIndex, now: DateTime<Utc>) -> Self {
        Self {
            catalog,
            index: Some(index),
            now,
        }
    }

    /// Context without a registry; only valid with `force_no_db_check`.
    #[must_use]
    pub const fn unchecked(catalog: &'a Catalog, now: DateTime<Utc>) -> Self {
        Self {
            catalog,
            index: None,
            now,
        }
    }
}

/// Every attribute of a bounty, each optional until generated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BountyConfig {
    pub faction: Option<String>,
    pub name: Option<String>,
    pub is_player: bool,
    pub route: Vec<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub answer: Option<String>,
    pub checked: CheckedMap,
    pub reward: Option<i64>,
    pub issue_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub icon: String,
    pub aliases: Vec<String>,
    pub wiki: String,
    pub built_in: bool,
    generated: bool,
}

impl BountyConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Config targeting an existing criminal.
    #[must_use]
    pub fn for_criminal(criminal: &Criminal) -> Self {
        Self {
            faction: Some(criminal.faction.clone()),
            name: Some(criminal.name.clone()),
            is_player: criminal.is_player,
            icon: criminal.icon.clone(),
            aliases: criminal.aliases.clone(),
            wiki: criminal.wiki.clone(),
            built_in: criminal.built_in,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_faction(mut self, faction: impl Into<String>) -> Self {
        self.faction = Some(faction.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_route<I, S>(mut self, route: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.route = route.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self.end = Some(end.into());
        self
    }

    #[must_use]
    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self
    }

    #[must_use]
    pub const fn with_reward(mut self, reward: i64) -> Self {
        self.reward = Some(reward);
        self
    }

    #[must_use]
    pub const fn with_times(mut self, issue: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.issue_time = Some(issue);
        self.end_time = Some(end);
        self
    }

    #[must_use]
    pub fn with_checked(mut self, checked: CheckedMap) -> Self {
        self.checked = checked;
        self
    }

    #[must_use]
    pub const fn is_generated(&self) -> bool {
        self.generated
    }

    /// Validate all given data and randomly generate what is missing.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] on invalid input, exhausted capacity, or an
    /// unreachable route. The config is left untouched on error.
    pub fn generate<R>(
        &mut self,
        ctx: &GenerationContext<'_>,
        rng: &mut R,
        options: GenerateOptions,
    ) -> Result<(), ConfigError>
    where
        R: Rng + ?Sized,
    {
        if self.generated {
            return Err(ConfigError::AlreadyGenerated);
        }
        let index = if options.force_no_db_check {
            None
        } else {
            Some(ctx.index.ok_or(ConfigError::MissingRegistry)?)
        };

        let mut staged = self.clone();
        staged.resolve_criminal(ctx.catalog, index, rng, options.no_criminal)?;
        staged.resolve_route(ctx.catalog, rng)?;
        staged.resolve_answer(ctx.catalog, rng)?;
        staged.resolve_reward()?;
        staged.resolve_times(ctx.now)?;
        staged.resolve_checked(ctx.catalog, options.force_keep_checked);
        staged.generated = true;

        log::debug!(
            target: LOG_CONFIG,
            "generated bounty config for {:?} ({:?}) over {} systems",
            staged.name,
            staged.faction,
            staged.route.len()
        );
        *self = staged;
        Ok(())
    }

    fn resolve_criminal<R>(
        &mut self,
        catalog: &Catalog,
        index: Option<&dyn BountyIndex>,
        rng: &mut R,
        no_criminal: bool,
    ) -> Result<(), ConfigError>
    where
        R: Rng + ?Sized,
    {
        let can_make = |faction: &str| index.is_none_or(|db| db.faction_can_make_bounty(faction));
        let name_taken = |name: &str| index.is_some_and(|db| db.bounty_name_exists(name));

        self.faction = self
            .faction
            .take()
            .map(|faction| faction.trim().to_lowercase())
            .filter(|faction| !faction.is_empty());
        self.name = self
            .name
            .take()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        if !no_criminal {
            let faction = self
                .faction
                .clone()
                .ok_or_else(|| ConfigError::InvalidFaction(String::new()))?;
            if !can_make(&faction) {
                return Err(ConfigError::FactionFull(faction));
            }
            return Ok(());
        }

        if let Some(template) = self.name.as_deref().and_then(|n| catalog.builtin_criminal(n)) {
            self.adopt(template);
            return Ok(());
        }

        let faction = match self.faction.clone() {
            Some(faction) => {
                if !catalog.is_faction(&faction) {
                    return Err(ConfigError::InvalidFaction(faction));
                }
                if !can_make(&faction) {
                    return Err(ConfigError::FactionFull(faction));
                }
                faction
            }
            None => {
                let open: Vec<&String> = catalog
                    .factions()
                    .iter()
                    .filter(|faction| can_make(faction))
                    .collect();
                open.choose(rng)
                    .map(|faction| (*faction).clone())
                    .ok_or(ConfigError::AllFactionsFull)?
            }
        };
        self.faction = Some(faction.clone());

        match self.name.clone() {
            Some(name) => {
                if name_taken(&name) {
                    return Err(ConfigError::DuplicateName(name));
                }
                if self.icon.is_empty() {
                    self.icon = ROCKET_ICON.to_string();
                }
            }
            None => {
                let free: Vec<&CriminalTemplate> = catalog
                    .criminals_of(&faction)
                    .filter(|template| !name_taken(&template.name))
                    .collect();
                let template = free
                    .choose(rng)
                    .copied()
                    .ok_or_else(|| ConfigError::NoFreeCriminal(faction.clone()))?;
                self.adopt(template);
            }
        }
        Ok(())
    }

    fn adopt(&mut self, template: &CriminalTemplate) {
        self.built_in = true;
        self.name = Some(template.name.clone());
        self.faction = Some(template.faction.clone());
        if self.icon.is_empty() {
            self.icon.clone_from(&template.icon);
        }
        if self.aliases.is_empty() {
            self.aliases.clone_from(&template.aliases);
        }
        if self.wiki.is_empty() {
            self.wiki.clone_from(&template.wiki);
        }
    }

    fn resolve_route<R>(&mut self, catalog: &Catalog, rng: &mut R) -> Result<(), ConfigError>
    where
        R: Rng + ?Sized,
    {
        let graph = catalog.systems();
        if !self.route.is_empty() {
            self.route = self
                .route
                .iter()
                .map(|system| {
                    graph
                        .resolve(system)
                        .map(str::to_string)
                        .ok_or_else(|| ConfigError::InvalidSystem(system.clone()))
                })
                .collect::<Result<_, _>>()?;
            return Ok(());
        }

        let canonical = |system: &Option<String>| -> Result<Option<String>, ConfigError> {
            system
                .as_deref()
                .map(|name| {
                    graph
                        .resolve(name)
                        .map(str::to_string)
                        .ok_or_else(|| ConfigError::InvalidSystem(name.to_string()))
                })
                .transpose()
        };
        let fixed_start = canonical(&self.start)?;
        let fixed_end = canonical(&self.end)?;
        if let (Some(start), Some(end)) = (&fixed_start, &fixed_end)
            && start == end
        {
            return Err(ConfigError::DegenerateRoute(start.clone()));
        }

        let gated: Vec<&str> = graph.gated().map(|system| system.name.as_str()).collect();
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let start = match &fixed_start {
                Some(start) => start.clone(),
                None => pick_endpoint(&gated, fixed_end.as_deref(), rng)?,
            };
            let end = match &fixed_end {
                Some(end) => end.clone(),
                None => pick_endpoint(&gated, Some(&start), rng)?,
            };
            match find_route(&start, &end, graph) {
                Ok(route) => {
                    self.start = Some(start);
                    self.end = Some(end);
                    self.route = route;
                    return Ok(());
                }
                Err(RouteError::NoRoute { .. })
                    if fixed_start.is_none() || fixed_end.is_none() =>
                {
                    log::debug!(
                        target: LOG_CONFIG,
                        "no route from {start} to {end}; re-rolling endpoints"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(ConfigError::NoRouteEndpoints)
    }

    fn resolve_answer<R>(&mut self, catalog: &Catalog, rng: &mut R) -> Result<(), ConfigError>
    where
        R: Rng + ?Sized,
    {
        let answer = match self.answer.take() {
            Some(answer) => {
                let canonical = catalog
                    .systems()
                    .resolve(&answer)
                    .ok_or_else(|| ConfigError::InvalidSystem(answer.clone()))?;
                if !self.route.iter().any(|system| system == canonical) {
                    return Err(ConfigError::AnswerNotOnRoute(canonical.to_string()));
                }
                canonical.to_string()
            }
            None => self
                .route
                .choose(rng)
                .cloned()
                .ok_or(ConfigError::NoRouteEndpoints)?,
        };
        self.answer = Some(answer);
        Ok(())
    }

    fn resolve_reward(&mut self) -> Result<(), ConfigError> {
        match self.reward {
            Some(reward) if reward < 0 => Err(ConfigError::InvalidReward(reward)),
            Some(_) => Ok(()),
            None => {
                self.reward = Some(default_reward(self.route.len()));
                Ok(())
            }
        }
    }

    fn resolve_times(&mut self, now: DateTime<Utc>) -> Result<(), ConfigError> {
        let issue = self.issue_time.unwrap_or_else(|| truncate_to_minute(now));
        let end = self.end_time.unwrap_or_else(|| {
            let hops = i64::try_from(self.route.len()).unwrap_or(i64::MAX);
            issue + TimeDelta::seconds(ROUTE_HOP_SECS.saturating_mul(hops))
        });
        if end <= issue {
            return Err(ConfigError::InvalidTimes { issue, end });
        }
        self.issue_time = Some(issue);
        self.end_time = Some(end);
        Ok(())
    }

    fn resolve_checked(&mut self, catalog: &Catalog, keep: bool) {
        let previous = std::mem::take(&mut self.checked);
        let mut checked: BTreeMap<String, Option<ContributorId>> =
            self.route.iter().map(|system| (system.clone(), None)).collect();
        if keep {
            for (system, checker) in previous {
                let key = catalog
                    .systems()
                    .resolve(&system)
                    .map_or(system, str::to_string);
                if let Some(slot) = checked.get_mut(&key) {
                    *slot = checker;
                }
            }
        }
        self.checked = checked;
    }

    /// The criminal described by this config.
    #[must_use]
    pub fn criminal(&self) -> Criminal {
        Criminal {
            name: self.name.clone().unwrap_or_default(),
            faction: self.faction.clone().unwrap_or_default(),
            icon: self.icon.clone(),
            is_player: self.is_player,
            aliases: self.aliases.clone(),
            wiki: self.wiki.clone(),
            built_in: self.built_in,
        }
    }
}

fn pick_endpoint<R>(gated: &[&str], other: Option<&str>, rng: &mut R) -> Result<String, ConfigError>
where
    R: Rng + ?Sized,
{
    let candidates: Vec<&str> = gated
        .iter()
        .copied()
        .filter(|system| Some(*system) != other)
        .collect();
    candidates
        .choose(rng)
        .map(|system| (*system).to_string())
        .ok_or(ConfigError::NoRouteEndpoints)
}

/// Reward pool for a route of `route_len` systems.
#[must_use]
pub fn default_reward(route_len: usize) -> i64 {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let reward = (route_len as f64 * BPOINTS_TO_CREDITS_RATIO).floor() as i64;
    reward
}

fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|at| at.with_nanosecond(0))
        .unwrap_or(at)
}
