use tracing::debug;

use crate::{
    animal::{AgeClass, AnimalId, Gender},
    background::Background,
    engine::{System, SystemContext},
    error::SimResult,
    rng::SimRng,
    spatial::CellId,
};

use super::BehaviourParams;

/// Once a year, fertile females that share a cell with an adult male give
/// birth. Cells at carrying capacity produce no young.
pub struct ReproductionSystem {
    breeding_week: u32,
    litter_mean: f64,
    litter_std_dev: f64,
}

impl ReproductionSystem {
    pub fn new(params: &BehaviourParams) -> Self {
        Self {
            breeding_week: params.breeding_week,
            litter_mean: params.litter_mean,
            litter_std_dev: params.litter_std_dev,
        }
    }
}

impl System for ReproductionSystem {
    fn name(&self) -> &str {
        "reproduction"
    }

    fn run(
        &mut self,
        ctx: &SystemContext,
        background: &mut Background,
        rng: &mut SimRng,
    ) -> SimResult<()> {
        if ctx.now.week != self.breeding_week {
            return Ok(());
        }

        // Mothers are fixed before the first birth of the season.
        let mut mothers: Vec<(AnimalId, CellId)> = Vec::new();
        for cell in background.landscape().cells() {
            let has_male = cell.animals().iter().any(|id| {
                background.animal(id).is_some_and(|a| {
                    a.is_alive() && a.gender() == Gender::Male && a.age_class() == AgeClass::Adult
                })
            });
            if !has_male {
                continue;
            }
            for id in cell.animals() {
                if background.animal(id).is_some_and(|a| a.can_give_birth()) {
                    mothers.push((id.clone(), cell.id().clone()));
                }
            }
        }

        let mut births = 0;
        for (mother, cell_id) in mothers {
            // Animals that died earlier this week no longer take up room.
            let (capacity, occupants) = {
                let cell = background.landscape().try_cell(&cell_id)?;
                let live = cell
                    .animals()
                    .iter()
                    .filter(|id| background.animal(id).is_some_and(|a| a.is_alive()))
                    .count();
                (cell.carrying_capacity(), live)
            };
            let room = (capacity.floor() as usize).saturating_sub(occupants);
            if room == 0 {
                continue;
            }
            let litter = rng.gaussian(self.litter_mean, self.litter_std_dev).round();
            let litter = if litter > 0.0 { litter as usize } else { 0 };
            for _ in 0..litter.min(room) {
                let gender = if rng.percent() <= 50 {
                    Gender::Female
                } else {
                    Gender::Male
                };
                background.spawn_animal(gender, 0, &cell_id, Some(mother.clone()))?;
                births += 1;
            }
        }
        debug!(year = ctx.now.year, births, "breeding season");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{grid_cell_id, Landscape};
    use crate::time::{SimTime, WinterType, YearList};

    fn ctx(week: u32) -> SystemContext<'static> {
        SystemContext {
            now: SimTime { year: 1, week },
            winter: WinterType::Normal,
            trial: 0,
            scenario_name: "test",
        }
    }

    fn pair(k: f64) -> Background {
        let years = YearList::from_winters(1, &[WinterType::Normal]).unwrap();
        let mut bg = Background::new(Landscape::hex_grid(1, 1, k).unwrap(), years).unwrap();
        let cell = grid_cell_id(0, 0);
        bg.spawn_animal(Gender::Female, 60, &cell, None).unwrap();
        bg.spawn_animal(Gender::Male, 60, &cell, None).unwrap();
        bg
    }

    #[test]
    fn test_births_only_in_breeding_week_and_capped_by_capacity() {
        let mut params = BehaviourParams::default();
        params.litter_mean = 20.0;
        params.litter_std_dev = 0.0;
        let mut system = ReproductionSystem::new(&params);
        let mut bg = pair(6.0);
        let mut rng = SimRng::seed_from_u64(3);

        system.run(&ctx(params.breeding_week - 1), &mut bg, &mut rng).unwrap();
        assert_eq!(bg.live_count(), 2);

        system.run(&ctx(params.breeding_week), &mut bg, &mut rng).unwrap();
        assert_eq!(bg.live_count(), 6);
        let young: Vec<_> = bg.animals().iter().filter(|a| a.age_weeks() == 0).collect();
        assert_eq!(young.len(), 4);
        assert!(young.iter().all(|a| a.mother().is_some()));
        bg.validate().unwrap();
    }

    #[test]
    fn test_unswept_dead_do_not_count_against_capacity() {
        let mut params = BehaviourParams::default();
        params.litter_mean = 20.0;
        params.litter_std_dev = 0.0;
        let mut system = ReproductionSystem::new(&params);
        let mut bg = pair(6.0);
        let cell = grid_cell_id(0, 0);
        let doomed: Vec<_> = (0..4)
            .map(|_| bg.spawn_animal(Gender::Male, 60, &cell, None).unwrap())
            .collect();
        for id in &doomed {
            bg.animal_mut(id).unwrap().die();
        }

        system
            .run(&ctx(params.breeding_week), &mut bg, &mut SimRng::seed_from_u64(3))
            .unwrap();

        let young = bg.animals().iter().filter(|a| a.age_weeks() == 0).count();
        assert_eq!(young, 4);
    }

    #[test]
    fn test_sterilized_or_lonely_females_do_not_breed() {
        let params = BehaviourParams::default();
        let mut system = ReproductionSystem::new(&params);
        let mut bg = pair(20.0);
        for animal in bg.animals_mut().iter_mut() {
            animal.apply_fertility_control(10);
        }
        system
            .run(&ctx(params.breeding_week), &mut bg, &mut SimRng::seed_from_u64(3))
            .unwrap();
        assert_eq!(bg.live_count(), 2);

        let years = YearList::from_winters(1, &[WinterType::Normal]).unwrap();
        let mut lonely = Background::new(Landscape::hex_grid(1, 1, 20.0).unwrap(), years).unwrap();
        lonely
            .spawn_animal(Gender::Female, 60, &grid_cell_id(0, 0), None)
            .unwrap();
        system
            .run(&ctx(params.breeding_week), &mut lonely, &mut SimRng::seed_from_u64(3))
            .unwrap();
        assert_eq!(lonely.live_count(), 1);
    }
}
