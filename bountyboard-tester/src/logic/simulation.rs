use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use bountyboard_game::items::bounty_crate;
use bountyboard_game::{
    BountyConfig, BountyEngine, BountyEvent, BountyRegistry, CheckOutcome, Clock, ContributorId,
    Criminal, EmbeddedCatalog, ManualClock, RegistryConfig, Scheduler, SchedulerStats,
};

use crate::common::MemoryBoards;

/// Fixed start of simulated time; a whole minute so issue times are exact.
const SIM_EPOCH_SECS: i64 = 1_767_225_600;

/// Assertion hook run after a simulation completes.
type SimulationExpectationFn =
    Arc<dyn Fn(&SimulationSummary) -> Result<()> + Send + Sync + 'static>;

#[derive(Clone)]
pub struct SimulationExpectation(SimulationExpectationFn);

impl std::fmt::Debug for SimulationExpectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationExpectation").finish()
    }
}

impl SimulationExpectation {
    pub fn evaluate(&self, summary: &SimulationSummary) -> Result<()> {
        (self.0)(summary)
    }
}

impl<F> From<F> for SimulationExpectation
where
    F: Fn(&SimulationSummary) -> Result<()> + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        Self(Arc::new(f))
    }
}

/// Shape of one simulated stretch of board activity.
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub registry: RegistryConfig,
    pub hunters: u64,
    pub players: usize,
    pub rounds: u32,
    pub round_length: Duration,
    /// Probability that a hunter checks a system on the bounty's route
    /// rather than one picked from the whole map.
    pub on_route_bias: f64,
    pub expectations: Vec<SimulationExpectation>,
}

impl Default for SimulationPlan {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            hunters: 3,
            players: 0,
            rounds: 24,
            round_length: Duration::from_secs(60 * 60 * 6),
            on_route_bias: 0.7,
            expectations: Vec::new(),
        }
    }
}

impl SimulationPlan {
    #[must_use]
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub const fn with_hunters(mut self, hunters: u64) -> Self {
        self.hunters = hunters;
        self
    }

    #[must_use]
    pub const fn with_players(mut self, players: usize) -> Self {
        self.players = players;
        self
    }

    #[must_use]
    pub const fn with_rounds(mut self, rounds: u32, round_length: Duration) -> Self {
        self.rounds = rounds;
        self.round_length = round_length;
        self
    }

    #[must_use]
    pub fn with_expectation(mut self, expectation: impl Into<SimulationExpectation>) -> Self {
        self.expectations.push(expectation.into());
        self
    }
}

/// Everything observed while running a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub seed: u64,
    pub issued: usize,
    pub won: usize,
    pub escaped: usize,
    pub respawned: usize,
    pub expired: usize,
    pub checks: BTreeMap<String, usize>,
    pub credits_pool: u64,
    pub credits_paid: u64,
    pub loot: Vec<String>,
    pub listed_at_end: usize,
    pub restored_at_end: usize,
    pub scheduler: SchedulerStats,
    pub violations: Vec<String>,
}

impl SimulationSummary {
    fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn check_count(&self, outcome: CheckOutcome) -> usize {
        self.checks.get(outcome_label(outcome)).copied().unwrap_or(0)
    }

    fn tally(&mut self, events: Vec<BountyEvent>) {
        for event in events {
            match event {
                BountyEvent::Issued { .. } => self.issued += 1,
                BountyEvent::Escaped { .. } => self.escaped += 1,
                BountyEvent::Respawned { name, .. } => {
                    self.respawned += 1;
                    if name.starts_with('@') {
                        self.violations
                            .push(format!("player bounty {name} respawned"));
                    }
                }
                BountyEvent::Expired { .. } => self.expired += 1,
                BountyEvent::Won { .. } => self.won += 1,
            }
        }
    }
}

const fn outcome_label(outcome: CheckOutcome) -> &'static str {
    match outcome {
        CheckOutcome::NotOnRoute => "not_on_route",
        CheckOutcome::AlreadyChecked => "already_checked",
        CheckOutcome::Checked => "checked",
        CheckOutcome::AnswerFound => "answer_found",
    }
}

fn sim_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(SIM_EPOCH_SECS, 0).unwrap_or_default()
}

/// Run `plan` against a fresh registry on simulated time.
pub fn run_plan(plan: &SimulationPlan, seed: u64) -> Result<SimulationSummary> {
    let clock = Arc::new(ManualClock::new(sim_epoch()));
    let engine = BountyEngine::new(EmbeddedCatalog, MemoryBoards::default());
    let registry = engine.open_registry(
        plan.registry.clone(),
        Scheduler::new(clock.clone()),
        seed,
    )?;
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut summary = SimulationSummary::new(seed);

    issue_players(&registry, plan.players, &mut rng);
    for round in 0..plan.rounds {
        fill_board(&registry, &mut rng);
        for hunter in 1..=plan.hunters {
            hunt_once(&registry, plan, ContributorId(hunter), &mut rng, &mut summary);
        }
        audit(&registry, round, &mut summary);

        clock.advance(plan.round_length);
        let fired = registry.scheduler().run_due();
        log::debug!("round {round}: {fired} timers fired");
        summary.tally(registry.drain_events());
    }

    summary.listed_at_end = registry.len();
    engine.save_board("simulation", &registry)?;
    registry.shutdown();
    summary.scheduler = registry.scheduler().stats();

    let restored = engine.open_registry(
        plan.registry.clone(),
        Scheduler::new(Arc::new(ManualClock::new(clock.utc_now()))),
        seed,
    )?;
    summary.restored_at_end = engine.load_board("simulation", &restored)?;
    if restored.names() != registry.names() {
        summary
            .violations
            .push("restored board lists different bounties".to_string());
    }
    restored.shutdown();
    Ok(summary)
}

fn issue_players(registry: &BountyRegistry, players: usize, rng: &mut ChaCha20Rng) {
    let factions = registry.catalog().factions().to_vec();
    for index in 0..players {
        let Some(faction) = factions.choose(rng) else {
            return;
        };
        let player = Criminal::player(format!("@pilot-{index}"), faction.clone());
        if let Err(err) = registry.issue_for(&player, rng) {
            log::debug!("player bounty for {} not issued: {err}", player.name);
        }
    }
}

/// Issue NPC bounties until generation stops succeeding.
fn fill_board(registry: &BountyRegistry, rng: &mut ChaCha20Rng) {
    let slots = registry.catalog().factions().len() * registry.config().max_bounties_per_faction;
    for _ in 0..slots {
        if registry.generate_bounty(BountyConfig::new(), rng).is_err() {
            break;
        }
    }
}

fn hunt_once(
    registry: &BountyRegistry,
    plan: &SimulationPlan,
    hunter: ContributorId,
    rng: &mut ChaCha20Rng,
    summary: &mut SimulationSummary,
) {
    let bounties = registry.bounties();
    let Some(shared) = bounties.choose(rng) else {
        return;
    };
    let (name, outcome) = {
        let mut bounty = shared.lock().unwrap_or_else(PoisonError::into_inner);
        if bounty.is_escaped() {
            return;
        }
        let system = if rng.gen_bool(plan.on_route_bias) {
            bounty.route().choose(rng).cloned()
        } else {
            let names: Vec<&str> = registry.catalog().systems().names().collect();
            names.choose(rng).map(ToString::to_string)
        };
        let Some(system) = system else {
            return;
        };
        let outcome = bounty.check(&system, hunter);
        (bounty.criminal().name.clone(), outcome)
    };
    *summary
        .checks
        .entry(outcome_label(outcome).to_string())
        .or_default() += 1;

    if outcome == CheckOutcome::AnswerFound {
        let pool = shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reward();
        match registry.resolve_won(&name) {
            Ok(rewards) => {
                let paid: u64 = rewards.values().map(|share| share.reward).sum();
                if paid > pool {
                    summary
                        .violations
                        .push(format!("{name} paid {paid} from a pool of {pool}"));
                }
                summary.credits_pool += pool;
                summary.credits_paid += paid;
                if let Ok(item) = bounty_crate().open(rng) {
                    summary.loot.push(item.name().to_string());
                }
            }
            Err(err) => summary
                .violations
                .push(format!("could not resolve win for {name}: {err}")),
        }
    }
}

fn audit(registry: &BountyRegistry, round: u32, summary: &mut SimulationSummary) {
    let capacity = registry.config().max_bounties_per_faction;
    for faction in registry.catalog().factions() {
        let listed = registry.faction_count(faction);
        if listed > capacity {
            summary.violations.push(format!(
                "round {round}: {faction} lists {listed} bounties over a cap of {capacity}"
            ));
        }
    }
    for shared in registry.bounties() {
        let bounty = shared.lock().unwrap_or_else(PoisonError::into_inner);
        let keys_match = bounty.checked().len() == bounty.route().len()
            && bounty
                .route()
                .iter()
                .all(|system| bounty.checked().contains_key(system));
        if !keys_match {
            summary.violations.push(format!(
                "round {round}: checked map of {} does not match its route",
                bounty.criminal().name
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_plan() -> SimulationPlan {
        SimulationPlan::default().with_rounds(8, Duration::from_secs(60 * 60 * 12))
    }

    #[test]
    fn same_seed_same_summary() {
        let plan = short_plan();
        assert_eq!(run_plan(&plan, 42).unwrap(), run_plan(&plan, 42).unwrap());
    }

    #[test]
    fn simulation_respects_invariants() {
        let plan = short_plan().with_players(3);
        let summary = run_plan(&plan, 7).unwrap();
        assert!(summary.violations.is_empty(), "{:?}", summary.violations);
        assert!(summary.issued > 0);
        assert!(summary.credits_paid <= summary.credits_pool);
        assert!(summary.escaped >= summary.respawned + summary.expired);
        assert_eq!(summary.restored_at_end, summary.listed_at_end);
        assert_eq!(summary.scheduler.pending, 0);
    }
}
