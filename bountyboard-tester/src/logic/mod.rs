pub mod live;
pub mod reports;
pub mod scenarios;
pub mod seeds;
pub mod simulation;
pub mod tester;

pub use live::{LivePlan, run_live};
pub use scenarios::{get_scenario, list_scenarios};
pub use seeds::resolve_seed_inputs;
pub use tester::{LogicTester, ScenarioResult};
