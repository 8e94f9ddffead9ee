//! The bounty state machine.
//!
//! ```text
//! Active ──check──▶ Contested ──answer found──▶ Won (registry removes it)
//!    │                  │
//!    └──────escape──────┴──▶ Escaped ──respawn fires──▶ Respawned | Expired
//!                               │
//!                               └──cancel_respawn──▶ Active/Contested
//! ```
//!
//! A bounty holds a respawn task exactly while it is escaped; the two are
//! never updated independently.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ErrorKind;
use crate::catalog::Catalog;
use crate::config::{BountyConfig, ConfigError, GenerateOptions, GenerationContext};
use crate::criminal::Criminal;
use crate::scheduling::TaskHandle;

/// Identity of a user taking part in a hunt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContributorId(pub u64);

impl fmt::Display for ContributorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Route system → the contributor who checked it, `None` while unchecked.
pub type CheckedMap = BTreeMap<String, Option<ContributorId>>;

/// Result of checking one system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CheckOutcome {
    NotOnRoute = 0,
    AlreadyChecked = 1,
    Checked = 2,
    AnswerFound = 3,
}

impl CheckOutcome {
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Whether the check changed the bounty.
    #[must_use]
    pub const fn recorded(self) -> bool {
        matches!(self, Self::Checked | Self::AnswerFound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BountyState {
    /// Listed, nobody has checked anything yet.
    Active,
    /// Listed, at least one system checked.
    Contested,
    /// Waiting for its respawn task.
    Escaped,
}

/// One contributor's standing in [`Bounty::calc_rewards`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardShare {
    pub checked: u32,
    pub reward: u64,
    pub won: bool,
}

pub type RewardTable = BTreeMap<ContributorId, RewardShare>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("bounty for '{0}' has already escaped")]
    AlreadyEscaped(String),
    #[error("bounty for '{0}' is not awaiting respawn")]
    NotEscaped(String),
}

impl LifecycleError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Precondition
    }
}

/// Structural form a bounty is saved in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BountyRecord {
    pub faction: String,
    pub route: Vec<String>,
    pub answer: String,
    pub checked: CheckedMap,
    pub reward: u64,
    pub issue_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub criminal: Criminal,
}

/// A live hunt for one criminal along a fixed route.
#[derive(Debug)]
pub struct Bounty {
    criminal: Criminal,
    faction: String,
    route: Vec<String>,
    answer: String,
    checked: CheckedMap,
    reward: u64,
    issue_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    respawn: Option<TaskHandle>,
    expiry: Option<TaskHandle>,
}

impl Bounty {
    /// Build a bounty from a generated config. Without an explicit criminal
    /// the one described by the config is used.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotGenerated`] if `config` has not been generated.
    pub fn from_config(
        config: BountyConfig,
        criminal: Option<Criminal>,
    ) -> Result<Self, ConfigError> {
        if !config.is_generated() {
            return Err(ConfigError::NotGenerated);
        }
        let criminal = criminal.unwrap_or_else(|| config.criminal());
        let faction = config
            .faction
            .clone()
            .unwrap_or_else(|| criminal.faction.clone());
        let (Some(answer), Some(reward), Some(issue_time), Some(end_time)) = (
            config.answer,
            config.reward,
            config.issue_time,
            config.end_time,
        ) else {
            return Err(ConfigError::NotGenerated);
        };
        let reward = u64::try_from(reward).map_err(|_| ConfigError::InvalidReward(reward))?;
        Ok(Self {
            faction,
            criminal,
            route: config.route,
            answer,
            checked: config.checked,
            reward,
            issue_time,
            end_time,
            respawn: None,
            expiry: None,
        })
    }

    /// Rebuild a bounty from its saved form.
    ///
    /// This is the trusted reload path: registry capacity and uniqueness are
    /// not consulted, but the route and answer are still validated against
    /// the catalog and the checked map is back-filled for any route system
    /// it is missing.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the record names unknown systems, has
    /// inconsistent times, or holds a reward too large to reissue.
    pub fn from_record(record: BountyRecord, catalog: &Catalog) -> Result<Self, ConfigError> {
        if record.route.is_empty() {
            return Err(ConfigError::NoRouteEndpoints);
        }
        let reward = i64::try_from(record.reward)
            .map_err(|_| ConfigError::RewardOutOfRange(record.reward))?;
        let mut criminal = record.criminal;
        criminal.faction = record.faction;
        let mut config = BountyConfig::for_criminal(&criminal)
            .with_route(record.route)
            .with_answer(record.answer)
            .with_reward(reward)
            .with_times(record.issue_time, record.end_time)
            .with_checked(record.checked);
        let ctx = GenerationContext::unchecked(catalog, record.issue_time);
        // every field is supplied, so generation draws nothing from the rng
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        config.generate(&ctx, &mut rng, GenerateOptions::reload())?;
        Self::from_config(config, Some(criminal))
    }

    #[must_use]
    pub fn to_record(&self) -> BountyRecord {
        BountyRecord {
            faction: self.faction.clone(),
            route: self.route.clone(),
            answer: self.answer.clone(),
            checked: self.checked.clone(),
            reward: self.reward,
            issue_time: self.issue_time,
            end_time: self.end_time,
            criminal: self.criminal.clone(),
        }
    }

    #[must_use]
    pub const fn criminal(&self) -> &Criminal {
        &self.criminal
    }

    /// Faction name captured when the bounty was issued.
    #[must_use]
    pub fn faction(&self) -> &str {
        &self.faction
    }

    #[must_use]
    pub fn route(&self) -> &[String] {
        &self.route
    }

    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    #[must_use]
    pub const fn checked(&self) -> &CheckedMap {
        &self.checked
    }

    #[must_use]
    pub const fn reward(&self) -> u64 {
        self.reward
    }

    #[must_use]
    pub const fn issue_time(&self) -> DateTime<Utc> {
        self.issue_time
    }

    #[must_use]
    pub const fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// Time left before the bounty escapes, if any.
    #[must_use]
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        let left = self.end_time - now;
        (left > TimeDelta::zero()).then_some(left)
    }

    #[must_use]
    pub fn state(&self) -> BountyState {
        if self.respawn.is_some() {
            BountyState::Escaped
        } else if self.checked_count() > 0 {
            BountyState::Contested
        } else {
            BountyState::Active
        }
    }

    #[must_use]
    pub const fn is_escaped(&self) -> bool {
        self.respawn.is_some()
    }

    #[must_use]
    pub const fn respawn_task(&self) -> Option<&TaskHandle> {
        self.respawn.as_ref()
    }

    #[must_use]
    pub const fn expiry_task(&self) -> Option<&TaskHandle> {
        self.expiry.as_ref()
    }

    fn route_system(&self, system: &str) -> Option<&str> {
        let wanted = system.trim();
        self.route
            .iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(wanted))
            .map(String::as_str)
    }

    /// Who checked `system`, if anyone.
    #[must_use]
    pub fn checker_of(&self, system: &str) -> Option<ContributorId> {
        let system = self.route_system(system)?;
        self.checked.get(system).copied().flatten()
    }

    #[must_use]
    pub fn is_system_checked(&self, system: &str) -> bool {
        self.checker_of(system).is_some()
    }

    #[must_use]
    pub fn checked_count(&self) -> usize {
        self.checked.values().filter(|checker| checker.is_some()).count()
    }

    #[must_use]
    pub fn answer_found(&self) -> bool {
        self.winner().is_some()
    }

    /// Contributor who checked the answer system.
    #[must_use]
    pub fn winner(&self) -> Option<ContributorId> {
        self.checked.get(&self.answer).copied().flatten()
    }

    /// Record `checker` inspecting `system`.
    ///
    /// The first checker of a system owns it for good; later checks of the
    /// same system, and checks of systems off the route, change nothing.
    /// Finding the answer does not end the bounty.
    ///
    /// Escaped bounties still accept checks. They count if the respawn is
    /// cancelled and are dropped along with the route if it runs.
    pub fn check(&mut self, system: &str, checker: ContributorId) -> CheckOutcome {
        let Some(system) = self.route_system(system).map(str::to_string) else {
            return CheckOutcome::NotOnRoute;
        };
        let slot = self
            .checked
            .get_mut(&system)
            .unwrap_or_else(|| panic!("checked map is missing route system '{system}'"));
        if slot.is_some() {
            return CheckOutcome::AlreadyChecked;
        }
        *slot = Some(checker);
        if system == self.answer {
            CheckOutcome::AnswerFound
        } else {
            CheckOutcome::Checked
        }
    }

    /// Credits owed to every contributor at this point in the hunt.
    ///
    /// Each checked system is worth `reward / route length` (floored) to the
    /// contributor who checked it. The contributor who found the answer is
    /// paid one extra share for every system nobody checked. The pool is
    /// never over-allocated; rounding may leave a remainder.
    #[must_use]
    pub fn calc_rewards(&self) -> RewardTable {
        let mut rewards = RewardTable::new();
        if self.route.is_empty() {
            return rewards;
        }
        let share = self.reward / self.route.len() as u64;
        let unchecked = self
            .route
            .iter()
            .filter(|system| self.checked.get(*system).copied().flatten().is_none())
            .count() as u64;

        for system in &self.route {
            let Some(checker) = self.checked.get(system).copied().flatten() else {
                continue;
            };
            let standing = rewards.entry(checker).or_default();
            standing.checked += 1;
            if *system == self.answer {
                standing.reward += share * (unchecked + 1);
                standing.won = true;
            } else {
                standing.reward += share;
            }
        }
        rewards
    }

    /// Mark the bounty escaped, holding `task` as its pending respawn.
    ///
    /// Any armed expiry timer is cancelled. The bounty keeps its own copy of
    /// the handle; on error the caller still owns `task` and should cancel it.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::AlreadyEscaped`] if a respawn task is already held;
    /// that task stays armed.
    pub fn escape(&mut self, task: &TaskHandle) -> Result<(), LifecycleError> {
        if self.respawn.is_some() {
            return Err(LifecycleError::AlreadyEscaped(self.criminal.name.clone()));
        }
        if let Some(expiry) = self.expiry.take() {
            expiry.cancel();
        }
        self.respawn = Some(task.clone());
        Ok(())
    }

    /// Cancel the pending respawn without running it.
    ///
    /// The task is detached even when the scheduler has already handed its
    /// effect out. Registry respawns check that their task is still attached
    /// before acting, so the cancel wins that race.
    ///
    /// Forcing a respawn goes through [`crate::BountyRegistry::force_respawn`],
    /// which fires the task without holding this bounty.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::NotEscaped`] if no respawn is pending.
    pub fn cancel_respawn(&mut self) -> Result<(), LifecycleError> {
        let task = self
            .respawn
            .take()
            .ok_or_else(|| LifecycleError::NotEscaped(self.criminal.name.clone()))?;
        // false when the effect is already out; it will see the detachment
        task.cancel();
        Ok(())
    }

    pub(crate) fn arm_expiry(&mut self, task: TaskHandle) {
        if let Some(previous) = self.expiry.replace(task) {
            previous.cancel();
        }
    }

    /// Cancel every timer this bounty holds.
    pub fn disarm(&mut self) {
        if let Some(expiry) = self.expiry.take() {
            expiry.cancel();
        }
        if let Some(respawn) = self.respawn.take() {
            respawn.cancel();
        }
    }
}
