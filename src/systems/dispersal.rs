use tracing::debug;

use crate::{
    animal::{AgeClass, AnimalId},
    background::Background,
    engine::{System, SystemContext},
    error::SimResult,
    rng::SimRng,
    spatial::{Direction, PathCalculator},
};

use super::BehaviourParams;

/// Juveniles leave home once a year, walking a biased random path in a
/// randomly chosen direction and settling where it ends.
pub struct DispersalSystem {
    dispersal_week: u32,
    distance: usize,
}

impl DispersalSystem {
    pub fn new(params: &BehaviourParams) -> Self {
        Self {
            dispersal_week: params.dispersal_week,
            distance: params.dispersal_distance,
        }
    }
}

impl System for DispersalSystem {
    fn name(&self) -> &str {
        "dispersal"
    }

    fn run(
        &mut self,
        ctx: &SystemContext,
        background: &mut Background,
        rng: &mut SimRng,
    ) -> SimResult<()> {
        if ctx.now.week != self.dispersal_week || self.distance == 0 {
            return Ok(());
        }
        let movers: Vec<AnimalId> = background
            .animals()
            .iter()
            .filter(|a| a.is_alive() && a.age_class() == AgeClass::Juvenile)
            .map(|a| a.id().clone())
            .collect();

        let mut moved = 0;
        for id in movers {
            let start = background.animals().try_get(id.as_str())?.cell().clone();
            let bias = Direction::from_index(rng.below(Direction::ALL.len()));
            let path = PathCalculator::new(background.landscape())
                .calculate_path(&start, self.distance, bias, rng)?;
            if let Some(end) = path.last() {
                background.move_animal(&id, end)?;
                moved += 1;
            }
        }
        debug!(year = ctx.now.year, moved, "juvenile dispersal");
        Ok(())
    }
}
