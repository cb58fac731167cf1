use std::sync::Arc;

use tracing::debug;

use crate::{
    animal::AnimalId,
    background::Background,
    engine::{System, SystemContext},
    error::SimResult,
    rng::SimRng,
};

/// Contact transmission between animals sharing a cell. Each infectious
/// animal exposes every other occupant once a week at the disease's
/// contact rate.
pub struct TransmissionSystem;

impl TransmissionSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TransmissionSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for TransmissionSystem {
    fn name(&self) -> &str {
        "transmission"
    }

    fn run(
        &mut self,
        ctx: &SystemContext,
        background: &mut Background,
        rng: &mut SimRng,
    ) -> SimResult<()> {
        let disease = match background.disease() {
            Some(disease) => Arc::clone(disease),
            None => return Ok(()),
        };
        let now = ctx.now;
        let mut new_cases = 0;
        let (landscape, animals) = background.split_mut();
        for cell in landscape.cells() {
            if cell.animal_count() < 2 {
                continue;
            }
            // Spreaders are fixed at the start of the week; a fresh case
            // only incubates.
            let spreaders: Vec<AnimalId> = cell
                .animals()
                .iter()
                .filter(|id| {
                    animals
                        .get(id.as_str())
                        .is_some_and(|a| a.is_infectious(now))
                })
                .cloned()
                .collect();
            for source in &spreaders {
                for target in cell.animals() {
                    if target == source {
                        continue;
                    }
                    let animal = animals.try_get_mut(target.as_str())?;
                    if !animal.can_be_infected(&disease, now) {
                        continue;
                    }
                    if rng.percent_at_most(disease.contact_rate())
                        && animal.infect(&disease, now, Some(source.clone()), rng)
                    {
                        new_cases += 1;
                    }
                }
            }
        }
        if new_cases > 0 {
            debug!(year = now.year, week = now.week, new_cases, "transmission");
        }
        Ok(())
    }
}
