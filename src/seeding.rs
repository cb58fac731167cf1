//! Infections introduced into the population at fixed times.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::animal::{Animal, AnimalId};
use crate::collection::IndexedList;
use crate::disease::Disease;
use crate::error::{check_percent, SimError, SimResult};
use crate::rng::SimRng;
use crate::spatial::{CellId, Landscape};
use crate::time::{check_week, SimTime};

/// Infect `level` percent of a cell's susceptible animals at `time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialInfection {
    pub cell: CellId,
    pub time: SimTime,
    pub level: f64,
}

impl InitialInfection {
    pub fn new(cell: impl Into<CellId>, year: i32, week: u32, level: f64) -> SimResult<Self> {
        let cell = cell.into();
        if cell.as_str().is_empty() {
            return Err(SimError::validation("infection cell", "must not be empty"));
        }
        check_week(week)?;
        Ok(Self {
            cell,
            time: SimTime { year, week },
            level: check_percent("infection level", level)?,
        })
    }

    /// One draw per live occupant; returns the animals newly infected.
    pub fn apply(
        &self,
        landscape: &Landscape,
        animals: &mut IndexedList<Animal>,
        disease: &Arc<Disease>,
        now: SimTime,
        rng: &mut SimRng,
    ) -> SimResult<Vec<AnimalId>> {
        let cell = landscape
            .cell(&self.cell)
            .ok_or_else(|| SimError::MissingKey(self.cell.to_string()))?;
        let mut infected = Vec::new();
        for animal_id in cell.animals() {
            let animal = animals.try_get_mut(animal_id.as_str())?;
            if !animal.is_alive() || !rng.percent_at_most(self.level) {
                continue;
            }
            if animal.infect(disease, now, None, rng) {
                infected.push(animal_id.clone());
            }
        }
        debug!(cell = %self.cell, infected = infected.len(), "seeded infection");
        Ok(infected)
    }
}

/// Initial infections in time order, each fired once.
#[derive(Debug, Clone, Default)]
pub struct InfectionSeeder {
    pending: Vec<InitialInfection>,
    next: usize,
}

impl InfectionSeeder {
    pub fn new(mut infections: Vec<InitialInfection>) -> Self {
        infections.sort_by(|a, b| a.time.cmp(&b.time));
        Self {
            pending: infections,
            next: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        self.next < self.pending.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InitialInfection> {
        self.pending.iter()
    }

    /// Claim the infections scheduled for `now`. Ones whose time passed
    /// before the run reached them are dropped with a warning.
    pub fn take_due(&mut self, now: SimTime) -> &[InitialInfection] {
        while self.next < self.pending.len() && self.pending[self.next].time < now {
            warn!(
                cell = %self.pending[self.next].cell,
                scheduled = %self.pending[self.next].time,
                "initial infection scheduled before the run; skipped"
            );
            self.next += 1;
        }
        let start = self.next;
        while self.next < self.pending.len() && self.pending[self.next].time == now {
            self.next += 1;
        }
        &self.pending[start..self.next]
    }
}
