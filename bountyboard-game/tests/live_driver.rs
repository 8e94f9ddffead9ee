#![cfg(feature = "async")]

use std::sync::Arc;
use std::time::Duration;

use bountyboard_game::{
    BountyConfig, BountyEvent, BountyRegistry, RegistryConfig, Scheduler, SchedulerDriver,
    TokioClock, catalog,
};
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

#[tokio::test(start_paused = true)]
async fn driver_escapes_and_respawns_without_polling() {
    let origin = DateTime::<Utc>::from_timestamp(1_750_000_020, 0).unwrap();
    let scheduler = Scheduler::new(Arc::new(TokioClock::new(origin)));
    let driver = SchedulerDriver::spawn(scheduler.clone());
    let registry = BountyRegistry::with_seed(
        RegistryConfig {
            respawn_delay_secs: 60,
            ..RegistryConfig::default()
        },
        Arc::new(catalog().clone()),
        scheduler,
        11,
    );

    let shared = registry
        .generate_bounty(
            BountyConfig::new().with_name("Nidrel Aum"),
            &mut ChaCha20Rng::seed_from_u64(11),
        )
        .unwrap();
    let lifetime = {
        let bounty = shared.lock().unwrap();
        (bounty.end_time() - bounty.issue_time()).to_std().unwrap()
    };

    tokio::time::sleep(lifetime + Duration::from_secs(1)).await;
    assert_eq!(registry.escaped_names(), vec!["Nidrel Aum".to_string()]);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(registry.escaped_names().is_empty());
    let current = registry.get("Nidrel Aum").unwrap();
    assert!(!Arc::ptr_eq(&current, &shared));

    let events = registry.drain_events();
    assert!(matches!(
        events.as_slice(),
        [
            BountyEvent::Issued { .. },
            BountyEvent::Escaped { .. },
            BountyEvent::Respawned { .. }
        ]
    ));

    registry.shutdown();
    driver.shutdown().await;
}
