use anyhow::Result;
use chrono::TimeDelta;
use colored::Colorize;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bountyboard_game::{
    BountyConfig, BountyEngine, BountyEvent, Clock, EmbeddedCatalog, RegistryConfig, Scheduler,
    SchedulerDriver, TokioClock,
};

use crate::common::JsonBoardStore;

/// Settings for a wall-clock run driven by the background scheduler.
#[derive(Debug, Clone)]
pub struct LivePlan {
    pub seed: u64,
    pub bounties: usize,
    pub lifetime: Duration,
    pub respawn_delay: Duration,
    pub run_for: Duration,
    pub board_dir: Option<PathBuf>,
}

/// Events observed during a live run.
#[derive(Debug, Default)]
pub struct LiveReport {
    pub events: Vec<BountyEvent>,
    pub listed_at_end: usize,
}

fn describe(event: &BountyEvent) -> String {
    match event {
        BountyEvent::Issued {
            name,
            faction,
            route,
        } => format!("📜 {name} ({faction}) on {}", route.join(" → ")),
        BountyEvent::Escaped { name } => format!("💨 {name} escaped"),
        BountyEvent::Respawned { name, route } => {
            format!("🔁 {name} is back on {}", route.join(" → "))
        }
        BountyEvent::Expired { name } => format!("⌛ {name} expired"),
        BountyEvent::Won { name, rewards } => {
            format!("🏆 {name} claimed by {} hunters", rewards.len())
        }
    }
}

/// Issue short-lived bounties and let the driver escape and respawn them in
/// real time, printing events as they happen.
pub async fn run_live(plan: &LivePlan) -> Result<LiveReport> {
    let clock = Arc::new(TokioClock::default());
    let scheduler = Scheduler::new(clock.clone());
    let driver = SchedulerDriver::spawn(scheduler.clone());
    let store = JsonBoardStore::new(
        plan.board_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("bountyboard-live")),
    );
    let engine = BountyEngine::new(EmbeddedCatalog, store);
    let registry = engine.open_registry(
        RegistryConfig {
            respawn_delay_secs: plan.respawn_delay.as_secs(),
            ..RegistryConfig::default()
        },
        scheduler,
        plan.seed,
    )?;

    let restored = if plan.board_dir.is_some() {
        engine.load_board("live", &registry)?
    } else {
        0
    };
    if restored > 0 {
        println!("{}", format!("♻️  Restored {restored} saved bounties").cyan());
    }

    let mut rng = ChaCha20Rng::seed_from_u64(plan.seed);
    let lifetime = TimeDelta::from_std(plan.lifetime)?;
    for _ in 0..plan.bounties {
        let issue = clock.utc_now();
        let config = BountyConfig::new().with_times(issue, issue + lifetime);
        if let Err(err) = engine.generate_bounty(&registry, config, &mut rng) {
            log::warn!("stopped issuing: {err}");
            break;
        }
    }

    let mut report = LiveReport::default();
    let deadline = tokio::time::Instant::now() + plan.run_for;
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        for event in registry.drain_events() {
            println!("  {}", describe(&event));
            report.events.push(event);
        }
    }

    report.listed_at_end = registry.len();
    if plan.board_dir.is_some() {
        engine.save_board("live", &registry)?;
    }
    let cancelled = registry.shutdown();
    log::debug!("cancelled {cancelled} timers at shutdown");
    driver.shutdown().await;
    Ok(report)
}
