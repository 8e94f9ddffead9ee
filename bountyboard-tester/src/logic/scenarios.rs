use anyhow::{Result, ensure};
use std::time::Duration;

use bountyboard_game::{CheckOutcome, RegistryConfig};

use super::simulation::{SimulationPlan, SimulationSummary};

const HOUR: u64 = 60 * 60;

// Logic test scenario
#[derive(Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub plan: SimulationPlan,
}

impl TestScenario {
    #[must_use]
    pub fn simulation(name: impl Into<String>, plan: SimulationPlan) -> Self {
        Self {
            name: name.into(),
            plan,
        }
    }
}

fn no_violations(summary: &SimulationSummary) -> Result<()> {
    ensure!(
        summary.violations.is_empty(),
        "board invariants broken: {}",
        summary.violations.join("; ")
    );
    Ok(())
}

fn payouts_within_pool(summary: &SimulationSummary) -> Result<()> {
    ensure!(
        summary.credits_paid <= summary.credits_pool,
        "paid {} credits from pools totalling {}",
        summary.credits_paid,
        summary.credits_pool
    );
    ensure!(
        summary.loot.len() == summary.won,
        "{} wins but {} crates opened",
        summary.won,
        summary.loot.len()
    );
    Ok(())
}

fn escapes_account_for_timers(summary: &SimulationSummary) -> Result<()> {
    ensure!(
        summary.escaped >= summary.respawned + summary.expired,
        "{} escapes cannot explain {} respawns and {} expiries",
        summary.escaped,
        summary.respawned,
        summary.expired
    );
    Ok(())
}

fn board_survives_restart(summary: &SimulationSummary) -> Result<()> {
    ensure!(
        summary.restored_at_end == summary.listed_at_end,
        "restored {} of {} bounties",
        summary.restored_at_end,
        summary.listed_at_end
    );
    ensure!(
        summary.scheduler.pending == 0,
        "{} timers still pending after shutdown",
        summary.scheduler.pending
    );
    Ok(())
}

fn baseline(plan: SimulationPlan) -> SimulationPlan {
    plan.with_expectation(no_violations)
        .with_expectation(payouts_within_pool)
        .with_expectation(escapes_account_for_timers)
        .with_expectation(board_survives_restart)
}

fn smoke() -> TestScenario {
    let plan = baseline(SimulationPlan::default()).with_expectation(|summary: &SimulationSummary| {
        ensure!(summary.issued > 0, "no bounties were issued");
        ensure!(
            summary.check_count(CheckOutcome::Checked) + summary.check_count(CheckOutcome::AnswerFound)
                > 0,
            "no hunter ever recorded a check"
        );
        Ok(())
    });
    TestScenario::simulation("Smoke", plan)
}

fn crowded_board() -> TestScenario {
    let plan = SimulationPlan::default()
        .with_registry(RegistryConfig {
            max_bounties_per_faction: 1,
            ..RegistryConfig::default()
        })
        .with_hunters(8)
        .with_rounds(40, Duration::from_secs(4 * HOUR));
    let plan = baseline(plan).with_expectation(|summary: &SimulationSummary| {
        ensure!(
            summary.check_count(CheckOutcome::AlreadyChecked) > 0,
            "eight hunters on one bounty per faction never collided"
        );
        Ok(())
    });
    TestScenario::simulation("Crowded Board", plan)
}

fn player_hunts() -> TestScenario {
    let plan = SimulationPlan::default()
        .with_players(6)
        .with_hunters(1)
        .with_rounds(60, Duration::from_secs(12 * HOUR));
    let plan = baseline(plan).with_expectation(|summary: &SimulationSummary| {
        ensure!(
            summary.issued >= 1,
            "no bounties were issued for the player run"
        );
        Ok(())
    });
    TestScenario::simulation("Player Hunts", plan)
}

fn rapid_respawn() -> TestScenario {
    let plan = SimulationPlan::default()
        .with_registry(RegistryConfig {
            respawn_delay_secs: HOUR,
            ..RegistryConfig::default()
        })
        .with_hunters(1)
        .with_rounds(80, Duration::from_secs(6 * HOUR));
    TestScenario::simulation("Rapid Respawn", baseline(plan))
}

pub fn get_scenario(name: &str) -> Option<TestScenario> {
    match name {
        "smoke" => Some(smoke()),
        "crowded-board" => Some(crowded_board()),
        "player-hunts" => Some(player_hunts()),
        "rapid-respawn" => Some(rapid_respawn()),
        _ => None,
    }
}

pub fn list_scenarios() -> Vec<(&'static str, &'static str)> {
    vec![
        ("smoke", "Default board with a few hunters over six days"),
        (
            "crowded-board",
            "One slot per faction and many hunters racing for checks",
        ),
        ("player-hunts", "Player bounties that must expire, never respawn"),
        (
            "rapid-respawn",
            "Short respawn delay so NPCs cycle through escape many times",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_scenario_resolves() {
        for (key, _) in list_scenarios() {
            let scenario = get_scenario(key).unwrap();
            assert!(!scenario.plan.expectations.is_empty(), "{key}");
        }
        assert!(get_scenario("unknown").is_none());
    }

    #[test]
    fn baseline_flags_violations() {
        let summary = SimulationSummary {
            violations: vec!["round 0: terran lists 4 bounties over a cap of 3".to_string()],
            ..SimulationSummary::default()
        };
        let err = no_violations(&summary).unwrap_err();
        assert!(err.to_string().contains("terran"));

        let summary = SimulationSummary {
            escaped: 1,
            respawned: 1,
            expired: 1,
            ..SimulationSummary::default()
        };
        assert!(escapes_account_for_timers(&summary).is_err());
    }
}
