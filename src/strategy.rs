//! Scheduled population interventions.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::animal::{Animal, AnimalId};
use crate::collection::IndexedList;
use crate::error::{check_percent, SimError, SimResult};
use crate::rng::SimRng;
use crate::spatial::{CellId, Landscape};
use crate::time::{check_week, SimTime};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyKind {
    Cull,
    Vaccinate {
        disease: String,
        effective_period: u32,
    },
    FertilityControl {
        effective_period: u32,
    },
    /// Vaccination and fertility control applied together on one draw.
    Combined {
        disease: String,
        effective_period: u32,
    },
}

impl StrategyKind {
    pub fn label(&self) -> &'static str {
        match self {
            StrategyKind::Cull => "cull",
            StrategyKind::Vaccinate { .. } => "vaccinate",
            StrategyKind::FertilityControl { .. } => "fertility_control",
            StrategyKind::Combined { .. } => "combined",
        }
    }
}

/// What one strategy application did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyEffect {
    /// Animals drawn at or below their cell's level.
    pub affected: Vec<AnimalId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    kind: StrategyKind,
    time: SimTime,
    levels: BTreeMap<CellId, f64>,
}

impl Strategy {
    pub fn new(kind: StrategyKind, year: i32, week: u32) -> SimResult<Self> {
        if year < 0 {
            return Err(SimError::validation(
                "strategy year",
                format!("{year} must be >= 0"),
            ));
        }
        check_week(week)?;
        match &kind {
            StrategyKind::Vaccinate { disease, .. } | StrategyKind::Combined { disease, .. }
                if disease.trim().is_empty() =>
            {
                return Err(SimError::validation(
                    "strategy disease",
                    "must not be empty",
                ));
            }
            _ => {}
        }
        Ok(Self {
            kind,
            time: SimTime { year, week },
            levels: BTreeMap::new(),
        })
    }

    /// Set the percent of animals in `cell` the strategy reaches.
    pub fn set_level(&mut self, cell: impl Into<CellId>, level: f64) -> SimResult<()> {
        let cell = cell.into();
        if cell.as_str().is_empty() {
            return Err(SimError::validation("strategy cell", "must not be empty"));
        }
        self.levels.insert(cell, check_percent("strategy level", level)?);
        Ok(())
    }

    pub fn with_level(mut self, cell: impl Into<CellId>, level: f64) -> SimResult<Self> {
        self.set_level(cell, level)?;
        Ok(self)
    }

    pub fn kind(&self) -> &StrategyKind {
        &self.kind
    }

    pub fn time(&self) -> SimTime {
        self.time
    }

    pub fn year(&self) -> i32 {
        self.time.year
    }

    pub fn week(&self) -> u32 {
        self.time.week
    }

    pub fn levels(&self) -> &BTreeMap<CellId, f64> {
        &self.levels
    }

    pub fn level(&self, cell: &CellId) -> Option<f64> {
        self.levels.get(cell).copied()
    }

    /// Schedule order; strategies in the same week compare equal.
    pub fn cmp_schedule(&self, other: &Strategy) -> Ordering {
        self.time.cmp(&other.time)
    }

    /// Apply to every live animal in the affected cells, one `[1, 100]`
    /// draw per animal. Cells are visited in ID order. Culls walk each
    /// cell's occupants from the last position down.
    pub fn apply(
        &self,
        landscape: &Landscape,
        animals: &mut IndexedList<Animal>,
        now: SimTime,
        rng: &mut SimRng,
    ) -> SimResult<StrategyEffect> {
        // Every target must exist before any animal is touched.
        if let Some(missing) = self.levels.keys().find(|id| landscape.cell(id).is_none()) {
            return Err(SimError::MissingKey(missing.to_string()));
        }
        let mut effect = StrategyEffect::default();
        for (cell_id, level) in &self.levels {
            let cell = landscape.try_cell(cell_id)?;
            let occupants: Vec<&AnimalId> = match self.kind {
                StrategyKind::Cull => cell.animals().iter().rev().collect(),
                _ => cell.animals().iter().collect(),
            };
            for animal_id in occupants {
                let animal = animals.get_mut(animal_id.as_str()).ok_or_else(|| {
                    SimError::Consistency(format!(
                        "cell '{cell_id}' lists unknown animal '{animal_id}'"
                    ))
                })?;
                if !animal.is_alive() {
                    continue;
                }
                if !rng.percent_at_most(*level) {
                    continue;
                }
                match &self.kind {
                    StrategyKind::Cull => animal.die(),
                    StrategyKind::Vaccinate {
                        disease,
                        effective_period,
                    } => animal.vaccinate(disease, *effective_period, now),
                    StrategyKind::FertilityControl { effective_period } => {
                        animal.apply_fertility_control(*effective_period)
                    }
                    StrategyKind::Combined {
                        disease,
                        effective_period,
                    } => {
                        animal.vaccinate(disease, *effective_period, now);
                        animal.apply_fertility_control(*effective_period);
                    }
                }
                effect.affected.push(animal_id.clone());
            }
        }
        debug!(
            strategy = self.kind.label(),
            year = self.time.year,
            week = self.time.week,
            affected = effect.affected.len(),
            "applied strategy"
        );
        Ok(effect)
    }
}

/// Strategies sorted by scheduled time, each fired once.
#[derive(Debug, Clone, Default)]
pub struct StrategyList {
    strategies: Vec<Strategy>,
    next: usize,
}

impl StrategyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping schedule order; equal times keep insertion order.
    pub fn push(&mut self, strategy: Strategy) -> SimResult<()> {
        if let Some(last_fired) = self.next.checked_sub(1).map(|i| &self.strategies[i]) {
            if strategy.time < last_fired.time {
                return Err(SimError::Consistency(format!(
                    "cannot schedule a strategy at {} after {} has fired",
                    strategy.time, last_fired.time
                )));
            }
        }
        self.strategies.push(strategy);
        self.strategies[self.next..].sort_by(Strategy::cmp_schedule);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Strategy> {
        self.strategies.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Strategy> {
        self.strategies.get(index)
    }

    /// Strategies not yet fired.
    pub fn pending(&self) -> &[Strategy] {
        &self.strategies[self.next..]
    }

    /// Claim the strategies scheduled exactly at `now`. Strategies whose
    /// slot has already passed without firing (scheduled before the run
    /// started) are skipped and returned separately.
    pub fn take_due(&mut self, now: SimTime) -> (Range<usize>, Range<usize>) {
        let skipped_start = self.next;
        while self.next < self.strategies.len() && self.strategies[self.next].time < now {
            self.next += 1;
        }
        let skipped = skipped_start..self.next;
        let due_start = self.next;
        while self.next < self.strategies.len() && self.strategies[self.next].time == now {
            self.next += 1;
        }
        (due_start..self.next, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animal::Gender;
    use crate::spatial::grid_cell_id;

    fn population(count: usize) -> (Landscape, IndexedList<Animal>) {
        let mut landscape = Landscape::hex_grid(2, 1, 10.0).unwrap();
        let mut animals = IndexedList::new();
        let cell = grid_cell_id(0, 0);
        for i in 0..count {
            let id = AnimalId::from(format!("a{i}"));
            let gender = if i % 2 == 0 { Gender::Female } else { Gender::Male };
            animals
                .add(Animal::new(id.clone(), gender, 60, cell.clone()).unwrap())
                .unwrap();
            landscape
                .cell_mut(&cell)
                .unwrap()
                .animals_mut()
                .add(id)
                .unwrap();
        }
        (landscape, animals)
    }

    fn now() -> SimTime {
        SimTime::new(1, 10).unwrap()
    }

    #[test]
    fn test_validation() {
        assert!(Strategy::new(StrategyKind::Cull, -1, 10).is_err());
        assert!(Strategy::new(StrategyKind::Cull, 1, 0).is_err());
        assert!(Strategy::new(StrategyKind::Cull, 1, 53).is_err());
        let vaccinate = StrategyKind::Vaccinate {
            disease: "".into(),
            effective_period: 4,
        };
        assert!(Strategy::new(vaccinate, 1, 1).is_err());
        let mut cull = Strategy::new(StrategyKind::Cull, 0, 1).unwrap();
        assert!(cull.set_level("c0r0", 100.5).is_err());
        assert!(cull.set_level("c0r0", -1.0).is_err());
        assert!(cull.set_level("c0r0", 0.0).is_ok());
    }

    #[test]
    fn test_full_cull_kills_everyone() {
        let (landscape, mut animals) = population(5);
        let cull = Strategy::new(StrategyKind::Cull, 1, 10)
            .unwrap()
            .with_level(grid_cell_id(0, 0), 100.0)
            .unwrap();
        let mut rng = SimRng::seed_from_u64(1);
        let effect = cull.apply(&landscape, &mut animals, now(), &mut rng).unwrap();
        assert_eq!(effect.affected.len(), 5);
        assert!(animals.iter().all(|a| !a.is_alive()));
        assert_eq!(effect.affected.first().map(AnimalId::as_str), Some("a4"));
    }

    #[test]
    fn test_zero_level_touches_nobody() {
        let (landscape, mut animals) = population(5);
        let cull = Strategy::new(StrategyKind::Cull, 1, 10)
            .unwrap()
            .with_level(grid_cell_id(0, 0), 0.0)
            .unwrap();
        let effect = cull
            .apply(&landscape, &mut animals, now(), &mut SimRng::seed_from_u64(1))
            .unwrap();
        assert!(effect.affected.is_empty());
        assert!(animals.iter().all(Animal::is_alive));
    }

    #[test]
    fn test_cull_is_deterministic_under_seed() {
        let cull = Strategy::new(StrategyKind::Cull, 1, 10)
            .unwrap()
            .with_level(grid_cell_id(0, 0), 50.0)
            .unwrap();
        let run = || {
            let (landscape, mut animals) = population(40);
            let effect = cull
                .apply(&landscape, &mut animals, now(), &mut SimRng::seed_from_u64(77))
                .unwrap();
            effect.affected
        };
        let first = run();
        let second = run();
        assert_eq!(first, second);
        assert!(!first.is_empty() && first.len() < 40);
    }

    #[test]
    fn test_combined_vaccinates_and_sterilizes() {
        let (landscape, mut animals) = population(4);
        let combined = Strategy::new(
            StrategyKind::Combined {
                disease: "Rabies".into(),
                effective_period: 26,
            },
            1,
            10,
        )
        .unwrap()
        .with_level(grid_cell_id(0, 0), 100.0)
        .unwrap();
        combined
            .apply(&landscape, &mut animals, now(), &mut SimRng::seed_from_u64(3))
            .unwrap();
        for animal in &animals {
            assert_eq!(animal.no_birth_weeks(), 26);
            assert_eq!(
                animal.vaccine_expiry("Rabies"),
                Some(now().absolute_week() + 26)
            );
        }
    }

    #[test]
    fn test_unknown_cell_fails_before_any_action() {
        let (landscape, mut animals) = population(3);
        let cull = Strategy::new(StrategyKind::Cull, 1, 10)
            .unwrap()
            .with_level(grid_cell_id(0, 0), 100.0)
            .unwrap()
            .with_level("nowhere", 100.0)
            .unwrap();
        let err = cull
            .apply(&landscape, &mut animals, now(), &mut SimRng::seed_from_u64(3))
            .unwrap_err();
        assert!(matches!(err, SimError::MissingKey(ref key) if key == "nowhere"));
        assert!(animals.iter().all(Animal::is_alive));
    }

    #[test]
    fn test_list_orders_and_fires_once() {
        let mut list = StrategyList::new();
        let late = Strategy::new(StrategyKind::Cull, 2, 5).unwrap();
        let early = Strategy::new(
            StrategyKind::FertilityControl {
                effective_period: 3,
            },
            1,
            20,
        )
        .unwrap();
        let tie = Strategy::new(StrategyKind::Cull, 1, 20).unwrap();
        list.push(late).unwrap();
        list.push(early).unwrap();
        list.push(tie).unwrap();

        let times: Vec<_> = list.iter().map(Strategy::time).collect();
        assert_eq!(
            times,
            vec![
                SimTime { year: 1, week: 20 },
                SimTime { year: 1, week: 20 },
                SimTime { year: 2, week: 5 }
            ]
        );
        assert_eq!(list.get(0).unwrap().kind().label(), "fertility_control");

        let (due, skipped) = list.take_due(SimTime { year: 1, week: 19 });
        assert!(due.is_empty() && skipped.is_empty());
        let (due, _) = list.take_due(SimTime { year: 1, week: 20 });
        assert_eq!(due, 0..2);
        let (due, _) = list.take_due(SimTime { year: 1, week: 20 });
        assert!(due.is_empty());
        assert_eq!(list.pending().len(), 1);

        let (due, skipped) = list.take_due(SimTime { year: 3, week: 1 });
        assert!(due.is_empty());
        assert_eq!(skipped, 2..3);
        assert!(list.pending().is_empty());
    }

    #[test]
    fn test_cannot_schedule_into_the_past() {
        let mut list = StrategyList::new();
        list.push(Strategy::new(StrategyKind::Cull, 1, 10).unwrap())
            .unwrap();
        list.take_due(SimTime { year: 1, week: 10 });
        assert!(list
            .push(Strategy::new(StrategyKind::Cull, 1, 9).unwrap())
            .is_err());
        assert!(list
            .push(Strategy::new(StrategyKind::Cull, 1, 11).unwrap())
            .is_ok());
    }
}
