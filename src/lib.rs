pub mod animal;
pub mod background;
pub mod batch;
pub mod collection;
pub mod disease;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod report;
pub mod rng;
pub mod scenario;
pub mod seeding;
pub mod snapshot;
pub mod spatial;
pub mod strategy;
pub mod systems;
pub mod time;

pub use background::Background;
pub use batch::{BatchRunner, BatchSettings, TrialOutcome};
pub use engine::{Engine, EngineBuilder, EngineSettings};
pub use error::{SimError, SimResult};
pub use scenario::{Scenario, ScenarioLoader};
