//! The state of one trial: landscape, animals, calendar and the scheduled
//! events acting on them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::animal::{AgeClass, Animal, AnimalId, CourseOutcome, Gender};
use crate::collection::IndexedList;
use crate::disease::Disease;
use crate::error::{SimError, SimResult};
use crate::rng::SimRng;
use crate::seeding::InfectionSeeder;
use crate::spatial::{CellId, Landscape};
use crate::strategy::StrategyList;
use crate::time::{SimTime, YearList};

/// Population counts for one week.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Census {
    pub live: usize,
    pub juveniles: usize,
    pub incubating: usize,
    pub infectious: usize,
    pub immune: usize,
}

/// Infection courses resolved in one week.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CourseTally {
    pub died: usize,
    pub recovered: usize,
}

pub struct Background {
    landscape: Landscape,
    animals: IndexedList<Animal>,
    dead_animals: Vec<Animal>,
    years: YearList,
    disease: Option<Arc<Disease>>,
    strategies: StrategyList,
    seeder: InfectionSeeder,
    keep_dead_animals: bool,
    next_serial: u64,
}

impl Background {
    pub fn new(landscape: Landscape, years: YearList) -> SimResult<Self> {
        landscape.validate()?;
        Ok(Self {
            landscape,
            animals: IndexedList::new(),
            dead_animals: Vec::new(),
            years,
            disease: None,
            strategies: StrategyList::new(),
            seeder: InfectionSeeder::default(),
            keep_dead_animals: false,
            next_serial: 0,
        })
    }

    pub fn with_disease(mut self, disease: Arc<Disease>) -> Self {
        self.disease = Some(disease);
        self
    }

    pub fn with_strategies(mut self, strategies: StrategyList) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_seeder(mut self, seeder: InfectionSeeder) -> Self {
        self.seeder = seeder;
        self
    }

    /// Keep removed dead animals in an all-time list instead of dropping
    /// them.
    pub fn keep_dead_animals(mut self, keep: bool) -> Self {
        self.keep_dead_animals = keep;
        self
    }

    pub fn landscape(&self) -> &Landscape {
        &self.landscape
    }

    pub fn landscape_mut(&mut self) -> &mut Landscape {
        &mut self.landscape
    }

    pub fn animals(&self) -> &IndexedList<Animal> {
        &self.animals
    }

    pub fn animal(&self, id: &AnimalId) -> Option<&Animal> {
        self.animals.get(id.as_str())
    }

    pub fn animal_mut(&mut self, id: &AnimalId) -> Option<&mut Animal> {
        self.animals.get_mut(id.as_str())
    }

    pub fn animals_mut(&mut self) -> &mut IndexedList<Animal> {
        &mut self.animals
    }

    /// Landscape for reading while animals are updated in place.
    pub fn split_mut(&mut self) -> (&Landscape, &mut IndexedList<Animal>) {
        (&self.landscape, &mut self.animals)
    }

    pub fn dead_animals(&self) -> &[Animal] {
        &self.dead_animals
    }

    pub fn years(&self) -> &YearList {
        &self.years
    }

    pub fn now(&self) -> SimTime {
        self.years.now()
    }

    pub fn disease(&self) -> Option<&Arc<Disease>> {
        self.disease.as_ref()
    }

    pub fn strategies(&self) -> &StrategyList {
        &self.strategies
    }

    pub fn seeder(&self) -> &InfectionSeeder {
        &self.seeder
    }

    pub fn live_count(&self) -> usize {
        self.animals.len()
    }

    /// Add an animal and list it in its cell.
    pub fn add_animal(&mut self, animal: Animal) -> SimResult<()> {
        let id = animal.id().clone();
        let cell = animal.cell().clone();
        if self.landscape.cell(&cell).is_none() {
            return Err(SimError::MissingKey(cell.to_string()));
        }
        self.animals.add(animal)?;
        if let Err(err) = self.landscape.try_cell_mut(&cell)?.animals_mut().add(id.clone()) {
            self.animals.remove(id.as_str())?;
            return Err(err);
        }
        Ok(())
    }

    /// Create an animal with a fresh serial ID in `cell`.
    pub fn spawn_animal(
        &mut self,
        gender: Gender,
        age_weeks: u32,
        cell: &CellId,
        mother: Option<AnimalId>,
    ) -> SimResult<AnimalId> {
        let id = loop {
            let candidate = AnimalId::from(format!("a{}", self.next_serial));
            self.next_serial += 1;
            if !self.animals.contains_key(candidate.as_str()) {
                break candidate;
            }
        };
        let mut animal = Animal::new(id.clone(), gender, age_weeks, cell.clone())?;
        if let Some(mother) = mother {
            animal = animal.with_mother(mother);
        }
        self.add_animal(animal)?;
        Ok(id)
    }

    /// Move an animal between cells, keeping both occupant lists in step.
    pub fn move_animal(&mut self, id: &AnimalId, to: &CellId) -> SimResult<()> {
        let from = self.animals.try_get(id.as_str())?.cell().clone();
        if &from == to {
            return Ok(());
        }
        self.landscape.try_cell(to)?;
        self.landscape
            .try_cell_mut(&from)?
            .animals_mut()
            .remove(id.as_str())?;
        self.landscape
            .try_cell_mut(to)?
            .animals_mut()
            .add(id.clone())?;
        self.animals.try_get_mut(id.as_str())?.set_cell(to.clone());
        Ok(())
    }

    /// Take dead animals out of the live population and their cells.
    pub fn remove_dead(&mut self) -> SimResult<usize> {
        let removed = self.animals.remove_where(|animal| !animal.is_alive());
        let count = removed.len();
        for animal in removed {
            self.landscape
                .try_cell_mut(animal.cell())?
                .animals_mut()
                .remove(animal.id().as_str())?;
            if self.keep_dead_animals {
                self.dead_animals.push(animal);
            }
        }
        Ok(count)
    }

    /// Fire the strategies scheduled for this week.
    pub fn apply_due_strategies(&mut self, rng: &mut SimRng) -> SimResult<usize> {
        let now = self.now();
        let (due, skipped) = self.strategies.take_due(now);
        for index in skipped {
            if let Some(strategy) = self.strategies.get(index) {
                warn!(
                    strategy = strategy.kind().label(),
                    scheduled = %strategy.time(),
                    "strategy scheduled before the run; skipped"
                );
            }
        }
        let mut fired = 0;
        for index in due {
            let strategy = match self.strategies.get(index) {
                Some(strategy) => strategy,
                None => continue,
            };
            strategy.apply(&self.landscape, &mut self.animals, now, rng)?;
            fired += 1;
        }
        Ok(fired)
    }

    /// Introduce the initial infections scheduled for this week.
    pub fn seed_due_infections(&mut self, rng: &mut SimRng) -> SimResult<usize> {
        let now = self.now();
        let due = self.seeder.take_due(now);
        if due.is_empty() {
            return Ok(0);
        }
        let disease = match &self.disease {
            Some(disease) => disease,
            None => {
                return Err(SimError::Consistency(format!(
                    "{} initial infection(s) due at {now} but no disease is configured",
                    due.len()
                )))
            }
        };
        let mut infected = 0;
        for seed in due {
            infected += seed
                .apply(&self.landscape, &mut self.animals, disease, now, rng)?
                .len();
        }
        Ok(infected)
    }

    /// Resolve every infection whose course ends this week.
    pub fn progress_infections(&mut self) -> CourseTally {
        let now = self.now();
        let mut tally = CourseTally::default();
        for animal in self.animals.iter_mut().filter(|a| a.is_alive()) {
            match animal.resolve_course(now) {
                Some(CourseOutcome::Died) => tally.died += 1,
                Some(CourseOutcome::Recovered) => tally.recovered += 1,
                None => {}
            }
        }
        tally
    }

    /// True while any live animal is incubating or infectious, or an
    /// infection is still to be seeded.
    pub fn disease_present(&self) -> bool {
        let now = self.now();
        self.seeder.has_pending()
            || self
                .animals
                .iter()
                .any(|a| a.is_alive() && a.has_ongoing_infection(now))
    }

    pub fn census(&self) -> Census {
        let now = self.now();
        let mut census = Census::default();
        for animal in self.animals.iter().filter(|a| a.is_alive()) {
            census.live += 1;
            if animal.age_class() == AgeClass::Juvenile {
                census.juveniles += 1;
            }
            match animal.current_infection() {
                Some(i) if i.is_incubating(now) => census.incubating += 1,
                Some(i) if i.is_infectious(now) => census.infectious += 1,
                _ => {}
            }
            if let Some(disease) = &self.disease {
                if animal.is_immune(disease, now) {
                    census.immune += 1;
                }
            }
        }
        census
    }

    /// Compact the animal list.
    pub fn rebuild_animals(&mut self) {
        self.animals = self.animals.rebuild();
        debug!(animals = self.animals.len(), "rebuilt animal list");
    }

    pub fn scramble_animals(&mut self, rng: &mut SimRng) {
        self.animals.scramble_order(rng);
    }

    pub fn advance_week(&mut self) -> SimResult<()> {
        self.years.advance_week()
    }

    /// Check that animals and cell occupant lists agree.
    pub fn validate(&self) -> SimResult<()> {
        self.landscape.validate()?;
        if !self.animals.is_consistent() {
            return Err(SimError::Consistency("animal index is corrupt".into()));
        }
        for animal in &self.animals {
            let cell = self.landscape.try_cell(animal.cell())?;
            if !cell.animals().contains_key(animal.id().as_str()) {
                return Err(SimError::Consistency(format!(
                    "animal '{}' is not listed in cell '{}'",
                    animal.id(),
                    animal.cell()
                )));
            }
        }
        let listed: usize = self.landscape.total_animals();
        if listed != self.animals.len() {
            return Err(SimError::Consistency(format!(
                "cells list {listed} animals but {} are live",
                self.animals.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::grid_cell_id;
    use crate::seeding::InitialInfection;
    use crate::strategy::{Strategy, StrategyKind};
    use crate::time::WinterType;

    fn background() -> Background {
        let landscape = Landscape::hex_grid(3, 3, 10.0).unwrap();
        let years = YearList::from_winters(1, &[WinterType::Normal; 2]).unwrap();
        Background::new(landscape, years).unwrap()
    }

    #[test]
    fn test_spawn_and_move_keep_lists_in_step() {
        let mut bg = background();
        let home = grid_cell_id(1, 1);
        let away = grid_cell_id(2, 2);
        let id = bg.spawn_animal(Gender::Female, 60, &home, None).unwrap();
        assert_eq!(bg.landscape().cell(&home).unwrap().animal_count(), 1);

        bg.move_animal(&id, &away).unwrap();
        assert_eq!(bg.landscape().cell(&home).unwrap().animal_count(), 0);
        assert_eq!(bg.landscape().cell(&away).unwrap().animal_count(), 1);
        assert_eq!(bg.animal(&id).unwrap().cell(), &away);
        bg.validate().unwrap();

        assert!(bg.move_animal(&id, &CellId::from("nowhere")).is_err());
        bg.validate().unwrap();
    }

    #[test]
    fn test_add_animal_rejects_unknown_cell_and_duplicates() {
        let mut bg = background();
        let animal = Animal::new("x", Gender::Male, 10, "nowhere").unwrap();
        assert!(matches!(bg.add_animal(animal), Err(SimError::MissingKey(_))));

        let animal = Animal::new("x", Gender::Male, 10, grid_cell_id(0, 0)).unwrap();
        bg.add_animal(animal.clone()).unwrap();
        assert!(matches!(bg.add_animal(animal), Err(SimError::DuplicateKey(_))));
        bg.validate().unwrap();
    }

    #[test]
    fn test_spawned_ids_skip_existing_keys() {
        let mut bg = background();
        bg.add_animal(Animal::new("a0", Gender::Male, 10, grid_cell_id(0, 0)).unwrap())
            .unwrap();
        let id = bg
            .spawn_animal(Gender::Male, 0, &grid_cell_id(0, 0), None)
            .unwrap();
        assert_eq!(id.as_str(), "a1");
    }

    #[test]
    fn test_remove_dead_keeps_history_when_asked() {
        let mut bg = background().keep_dead_animals(true);
        let cell = grid_cell_id(0, 1);
        let ids: Vec<_> = (0..4)
            .map(|_| bg.spawn_animal(Gender::Male, 60, &cell, None).unwrap())
            .collect();
        bg.animal_mut(&ids[1]).unwrap().die();
        bg.animal_mut(&ids[3]).unwrap().die();
        assert_eq!(bg.remove_dead().unwrap(), 2);
        assert_eq!(bg.live_count(), 2);
        assert_eq!(bg.dead_animals().len(), 2);
        assert_eq!(bg.landscape().cell(&cell).unwrap().animal_count(), 2);
        bg.validate().unwrap();
    }

    #[test]
    fn test_due_cull_empties_cell() {
        let cell = grid_cell_id(1, 1);
        let mut strategies = StrategyList::new();
        strategies
            .push(
                Strategy::new(StrategyKind::Cull, 1, 1)
                    .unwrap()
                    .with_level(cell.clone(), 100.0)
                    .unwrap(),
            )
            .unwrap();
        let mut bg = background().with_strategies(strategies);
        for _ in 0..5 {
            bg.spawn_animal(Gender::Female, 70, &cell, None).unwrap();
        }
        let mut rng = SimRng::seed_from_u64(4);
        assert_eq!(bg.apply_due_strategies(&mut rng).unwrap(), 1);
        bg.remove_dead().unwrap();
        assert_eq!(bg.landscape().cell(&cell).unwrap().animal_count(), 0);
        assert_eq!(bg.apply_due_strategies(&mut rng).unwrap(), 0);
    }

    #[test]
    fn test_due_strategy_on_unknown_cell_is_an_error() {
        let mut strategies = StrategyList::new();
        strategies
            .push(
                Strategy::new(StrategyKind::Cull, 1, 1)
                    .unwrap()
                    .with_level("c9r9", 100.0)
                    .unwrap(),
            )
            .unwrap();
        let mut bg = background().with_strategies(strategies);
        bg.spawn_animal(Gender::Female, 70, &grid_cell_id(0, 0), None)
            .unwrap();
        let err = bg
            .apply_due_strategies(&mut SimRng::seed_from_u64(4))
            .unwrap_err();
        assert!(matches!(err, SimError::MissingKey(ref key) if key == "c9r9"));
    }

    #[test]
    fn test_seeding_without_a_disease_is_an_error() {
        let seeder = InfectionSeeder::new(vec![
            InitialInfection::new(grid_cell_id(0, 0), 1, 1, 50.0).unwrap()
        ]);
        let mut bg = background().with_seeder(seeder);
        bg.spawn_animal(Gender::Female, 70, &grid_cell_id(0, 0), None)
            .unwrap();
        let err = bg
            .seed_due_infections(&mut SimRng::seed_from_u64(4))
            .unwrap_err();
        assert!(matches!(err, SimError::Consistency(_)));
    }

    #[test]
    fn test_disease_presence_follows_infections() {
        let mut bg = background().with_disease(Arc::new(Disease::rabies()));
        assert!(!bg.disease_present());
        let id = bg
            .spawn_animal(Gender::Male, 60, &grid_cell_id(0, 0), None)
            .unwrap();
        let disease = Arc::clone(bg.disease().unwrap());
        let now = bg.now();
        let mut rng = SimRng::seed_from_u64(1);
        assert!(bg.animal_mut(&id).unwrap().infect(&disease, now, None, &mut rng));
        assert!(bg.disease_present());
        assert_eq!(bg.census().live, 1);
        assert_eq!(bg.census().incubating + bg.census().infectious, 1);
    }

    #[test]
    fn test_rebuild_and_scramble_preserve_lookups() {
        let mut bg = background();
        let ids: Vec<_> = (0..20)
            .map(|i| {
                bg.spawn_animal(Gender::Female, i, &grid_cell_id(i % 3, 0), None)
                    .unwrap()
            })
            .collect();
        bg.scramble_animals(&mut SimRng::seed_from_u64(3));
        bg.rebuild_animals();
        for id in &ids {
            assert_eq!(bg.animal(id).unwrap().id(), id);
        }
        bg.validate().unwrap();
    }
}
