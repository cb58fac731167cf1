use tracing::debug;

use crate::{
    animal::AgeClass,
    background::Background,
    engine::{System, SystemContext},
    error::SimResult,
    rng::SimRng,
};

use super::BehaviourParams;

/// Background weekly deaths plus a winter kill scaled by severity.
pub struct MortalitySystem {
    juvenile_weekly: f64,
    adult_weekly: f64,
    winter_week: u32,
    winter_mortality: [f64; 5],
}

impl MortalitySystem {
    pub fn new(params: &BehaviourParams) -> Self {
        Self {
            juvenile_weekly: params.juvenile_weekly_mortality,
            adult_weekly: params.adult_weekly_mortality,
            winter_week: params.winter_week,
            winter_mortality: params.winter_mortality,
        }
    }
}

impl System for MortalitySystem {
    fn name(&self) -> &str {
        "mortality"
    }

    fn run(
        &mut self,
        ctx: &SystemContext,
        background: &mut Background,
        rng: &mut SimRng,
    ) -> SimResult<()> {
        let winter_rate = if ctx.now.week == self.winter_week {
            self.winter_mortality[ctx.winter.index()]
        } else {
            0.0
        };
        let mut deaths = 0;
        for animal in background.animals_mut().iter_mut() {
            if !animal.is_alive() {
                continue;
            }
            let weekly = match animal.age_class() {
                AgeClass::Juvenile => self.juvenile_weekly,
                AgeClass::Adult => self.adult_weekly,
            };
            if weekly > 0.0 && rng.uniform() * 100.0 < weekly {
                animal.die();
                deaths += 1;
                continue;
            }
            if winter_rate > 0.0 && rng.percent_at_most(winter_rate) {
                animal.die();
                deaths += 1;
            }
        }
        if deaths > 0 {
            debug!(week = ctx.now.week, deaths, winter = ?ctx.winter, "natural deaths");
        }
        Ok(())
    }
}
