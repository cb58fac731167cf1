mod aging;
mod dispersal;
mod mortality;
mod reporting;
mod reproduction;
mod transmission;

use serde::{Deserialize, Serialize};

use crate::engine::EngineBuilder;
use crate::error::{check_percent, SimError, SimResult};
use crate::time::check_week;

pub use aging::AgingSystem;
pub use dispersal::DispersalSystem;
pub use mortality::MortalitySystem;
pub use reporting::ReportingSystem;
pub use reproduction::ReproductionSystem;
pub use transmission::TransmissionSystem;

fn default_juvenile_mortality() -> f64 {
    0.5
}

fn default_adult_mortality() -> f64 {
    0.3
}

fn default_max_age_weeks() -> u32 {
    416
}

fn default_winter_week() -> u32 {
    6
}

fn default_winter_mortality() -> [f64; 5] {
    [0.0, 5.0, 10.0, 20.0, 35.0]
}

fn default_breeding_week() -> u32 {
    16
}

fn default_litter_mean() -> f64 {
    4.0
}

fn default_litter_std_dev() -> f64 {
    1.0
}

fn default_dispersal_week() -> u32 {
    40
}

fn default_dispersal_distance() -> usize {
    3
}

/// Parameters of the reference animal-behaviour model. Rates are percent
/// per week unless stated otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviourParams {
    #[serde(default = "default_juvenile_mortality")]
    pub juvenile_weekly_mortality: f64,
    #[serde(default = "default_adult_mortality")]
    pub adult_weekly_mortality: f64,
    /// Animals reaching this age die of old age; 0 disables the limit.
    #[serde(default = "default_max_age_weeks")]
    pub max_age_weeks: u32,
    #[serde(default = "default_winter_week")]
    pub winter_week: u32,
    /// One-off winter kill in percent, indexed by winter type, very mild
    /// first.
    #[serde(default = "default_winter_mortality")]
    pub winter_mortality: [f64; 5],
    #[serde(default = "default_breeding_week")]
    pub breeding_week: u32,
    #[serde(default = "default_litter_mean")]
    pub litter_mean: f64,
    #[serde(default = "default_litter_std_dev")]
    pub litter_std_dev: f64,
    #[serde(default = "default_dispersal_week")]
    pub dispersal_week: u32,
    #[serde(default = "default_dispersal_distance")]
    pub dispersal_distance: usize,
}

impl Default for BehaviourParams {
    fn default() -> Self {
        Self {
            juvenile_weekly_mortality: default_juvenile_mortality(),
            adult_weekly_mortality: default_adult_mortality(),
            max_age_weeks: default_max_age_weeks(),
            winter_week: default_winter_week(),
            winter_mortality: default_winter_mortality(),
            breeding_week: default_breeding_week(),
            litter_mean: default_litter_mean(),
            litter_std_dev: default_litter_std_dev(),
            dispersal_week: default_dispersal_week(),
            dispersal_distance: default_dispersal_distance(),
        }
    }
}

impl BehaviourParams {
    pub fn validate(&self) -> SimResult<()> {
        check_percent("juvenile_weekly_mortality", self.juvenile_weekly_mortality)?;
        check_percent("adult_weekly_mortality", self.adult_weekly_mortality)?;
        for rate in self.winter_mortality {
            check_percent("winter_mortality", rate)?;
        }
        check_week(self.winter_week)?;
        check_week(self.breeding_week)?;
        check_week(self.dispersal_week)?;
        if !(self.litter_mean.is_finite() && self.litter_mean >= 0.0) {
            return Err(SimError::validation("litter_mean", "must be finite and >= 0"));
        }
        if !(self.litter_std_dev.is_finite() && self.litter_std_dev >= 0.0) {
            return Err(SimError::validation(
                "litter_std_dev",
                "must be finite and >= 0",
            ));
        }
        Ok(())
    }

    /// Register the behaviour systems in their weekly order.
    pub fn install(&self, builder: EngineBuilder) -> EngineBuilder {
        builder
            .with_system(AgingSystem::new(self.max_age_weeks))
            .with_system(MortalitySystem::new(self))
            .with_system(ReproductionSystem::new(self))
            .with_system(DispersalSystem::new(self))
            .with_system(TransmissionSystem::new())
    }
}
