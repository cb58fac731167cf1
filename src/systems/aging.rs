use crate::{
    background::Background,
    engine::{System, SystemContext},
    error::SimResult,
    rng::SimRng,
};

/// Ages every live animal one week; old animals die.
pub struct AgingSystem {
    max_age_weeks: u32,
}

impl AgingSystem {
    pub fn new(max_age_weeks: u32) -> Self {
        Self { max_age_weeks }
    }
}

impl System for AgingSystem {
    fn name(&self) -> &str {
        "aging"
    }

    fn run(
        &mut self,
        _ctx: &SystemContext,
        background: &mut Background,
        _rng: &mut SimRng,
    ) -> SimResult<()> {
        for animal in background.animals_mut().iter_mut() {
            if !animal.is_alive() {
                continue;
            }
            animal.grow_older();
            if self.max_age_weeks > 0 && animal.age_weeks() >= self.max_age_weeks {
                animal.die();
            }
        }
        Ok(())
    }
}
