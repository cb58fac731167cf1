use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collection::Keyed;
use crate::disease::{Disease, Infection, NaturalImmunity};
use crate::error::{SimError, SimResult};
use crate::rng::SimRng;
use crate::spatial::CellId;
use crate::time::{SimTime, WEEKS_PER_YEAR};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnimalId(String);

impl AnimalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AnimalId {
    fn from(value: &str) -> Self {
        AnimalId(value.to_string())
    }
}

impl From<String> for AnimalId {
    fn from(value: String) -> Self {
        AnimalId(value)
    }
}

impl fmt::Display for AnimalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Keyed for AnimalId {
    fn key(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeClass {
    Juvenile,
    Adult,
}

/// How an infection that reached the end of its course was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseOutcome {
    Died,
    Recovered,
}

#[derive(Debug, Clone)]
pub struct Animal {
    id: AnimalId,
    gender: Gender,
    age_weeks: u32,
    cell: CellId,
    mother: Option<AnimalId>,
    alive: bool,
    infections: Vec<Infection>,
    natural_immunity: BTreeMap<String, NaturalImmunity>,
    /// Absolute week at which vaccine protection lapses, per disease.
    vaccine_expiry: BTreeMap<String, i64>,
    no_birth_weeks: u32,
    list_index: Option<usize>,
}

impl Animal {
    pub fn new(
        id: impl Into<AnimalId>,
        gender: Gender,
        age_weeks: u32,
        cell: impl Into<CellId>,
    ) -> SimResult<Self> {
        let id = id.into();
        let cell = cell.into();
        if id.as_str().is_empty() {
            return Err(SimError::validation("animal id", "must not be empty"));
        }
        if cell.as_str().is_empty() {
            return Err(SimError::validation("animal cell", "must not be empty"));
        }
        Ok(Self {
            id,
            gender,
            age_weeks,
            cell,
            mother: None,
            alive: true,
            infections: Vec::new(),
            natural_immunity: BTreeMap::new(),
            vaccine_expiry: BTreeMap::new(),
            no_birth_weeks: 0,
            list_index: None,
        })
    }

    pub fn with_mother(mut self, mother: AnimalId) -> Self {
        self.mother = Some(mother);
        self
    }

    pub fn id(&self) -> &AnimalId {
        &self.id
    }

    pub fn gender(&self) -> Gender {
        self.gender
    }

    pub fn age_weeks(&self) -> u32 {
        self.age_weeks
    }

    pub fn age_class(&self) -> AgeClass {
        if self.age_weeks < WEEKS_PER_YEAR {
            AgeClass::Juvenile
        } else {
            AgeClass::Adult
        }
    }

    pub fn cell(&self) -> &CellId {
        &self.cell
    }

    pub(crate) fn set_cell(&mut self, cell: CellId) {
        self.cell = cell;
    }

    pub fn mother(&self) -> Option<&AnimalId> {
        self.mother.as_ref()
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Mark the animal dead. It stays in its lists until the scheduler
    /// sweeps the dead out.
    pub fn die(&mut self) {
        self.alive = false;
    }

    /// One week older; the fertility-control counter runs down.
    pub fn grow_older(&mut self) {
        self.age_weeks = self.age_weeks.saturating_add(1);
        self.no_birth_weeks = self.no_birth_weeks.saturating_sub(1);
    }

    pub fn infections(&self) -> &[Infection] {
        &self.infections
    }

    /// The most recent infection, if any.
    pub fn current_infection(&self) -> Option<&Infection> {
        self.infections.last()
    }

    pub fn has_ongoing_infection(&self, now: SimTime) -> bool {
        self.infections.iter().any(|i| i.is_ongoing(now))
    }

    pub fn is_infectious(&self, now: SimTime) -> bool {
        self.alive && self.infections.iter().any(|i| i.is_contagious(now))
    }

    /// Immune through past infection (when the disease confers it) or an
    /// unexpired vaccination.
    pub fn is_immune(&self, disease: &Disease, now: SimTime) -> bool {
        let recovered = disease.becomes_immune()
            && self.natural_immunity.get(disease.name()) == Some(&NaturalImmunity::InfectedRecovered);
        let vaccinated = self
            .vaccine_expiry
            .get(disease.name())
            .is_some_and(|expiry| now.absolute_week() < *expiry);
        recovered || vaccinated
    }

    pub fn natural_immunity(&self, disease: &str) -> Option<NaturalImmunity> {
        self.natural_immunity.get(disease).copied()
    }

    pub fn can_be_infected(&self, disease: &Disease, now: SimTime) -> bool {
        self.alive && !self.has_ongoing_infection(now) && !self.is_immune(disease, now)
    }

    /// Start a new infection if the animal is susceptible; returns whether
    /// it took.
    pub fn infect(
        &mut self,
        disease: &Arc<Disease>,
        now: SimTime,
        source: Option<AnimalId>,
        rng: &mut SimRng,
    ) -> bool {
        if !self.can_be_infected(disease, now) {
            return false;
        }
        self.infections
            .push(Infection::new(Arc::clone(disease), now, source, rng));
        true
    }

    /// Attach an existing infection, e.g. one read back from storage.
    pub fn add_infection(&mut self, infection: Infection) {
        self.infections.push(infection);
    }

    /// Protect against `disease` for `effective_weeks` from `now`.
    pub fn vaccinate(&mut self, disease: &str, effective_weeks: u32, now: SimTime) {
        let expiry = now.absolute_week() + i64::from(effective_weeks);
        let slot = self.vaccine_expiry.entry(disease.to_string()).or_insert(expiry);
        *slot = (*slot).max(expiry);
    }

    pub fn vaccine_expiry(&self, disease: &str) -> Option<i64> {
        self.vaccine_expiry.get(disease).copied()
    }

    pub fn apply_fertility_control(&mut self, effective_weeks: u32) {
        self.no_birth_weeks = self.no_birth_weeks.max(effective_weeks);
    }

    pub fn no_birth_weeks(&self) -> u32 {
        self.no_birth_weeks
    }

    pub fn can_give_birth(&self) -> bool {
        self.alive
            && self.gender == Gender::Female
            && self.age_class() == AgeClass::Adult
            && self.no_birth_weeks == 0
    }

    /// Resolve any infection whose course ends this week: fatal cases kill
    /// the animal, others leave natural immunity behind.
    pub fn resolve_course(&mut self, now: SimTime) -> Option<CourseOutcome> {
        let infection = self.infections.iter().find(|i| i.has_run_course(now))?;
        let outcome = infection.natural_immunity();
        let disease = infection.disease().name().to_string();
        self.natural_immunity.insert(disease, outcome);
        match outcome {
            NaturalImmunity::InfectedDied => {
                self.die();
                Some(CourseOutcome::Died)
            }
            NaturalImmunity::InfectedRecovered => Some(CourseOutcome::Recovered),
        }
    }

    pub fn list_index(&self) -> Option<usize> {
        self.list_index
    }

    pub fn set_list_index(&mut self, index: usize) {
        self.list_index = Some(index);
    }

    pub(crate) fn restore_state(
        &mut self,
        alive: bool,
        no_birth_weeks: u32,
        natural_immunity: BTreeMap<String, NaturalImmunity>,
        vaccine_expiry: BTreeMap<String, i64>,
    ) {
        self.alive = alive;
        self.no_birth_weeks = no_birth_weeks;
        self.natural_immunity = natural_immunity;
        self.vaccine_expiry = vaccine_expiry;
    }

    pub(crate) fn natural_immunity_map(&self) -> &BTreeMap<String, NaturalImmunity> {
        &self.natural_immunity
    }

    pub(crate) fn vaccine_expiry_map(&self) -> &BTreeMap<String, i64> {
        &self.vaccine_expiry
    }
}

impl Keyed for Animal {
    fn key(&self) -> &str {
        self.id.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disease::{DiseaseParams, PeriodDistribution};

    fn disease(chance_of_death: f64, becomes_immune: bool) -> Arc<Disease> {
        Arc::new(
            Disease::new(DiseaseParams {
                name: "Rabies".into(),
                incubation: PeriodDistribution::gaussian(2.0, 0.0).unwrap(),
                infectious: PeriodDistribution::gaussian(1.0, 0.0).unwrap(),
                contact_rate: 50.0,
                chance_of_death,
                becomes_immune,
                recovered_not_infectious: false,
            })
            .unwrap(),
        )
    }

    fn at(year: i32, week: u32) -> SimTime {
        SimTime::new(year, week).unwrap()
    }

    #[test]
    fn test_age_class_and_fertility() {
        let mut vixen = Animal::new("v1", Gender::Female, 51, "c0r0").unwrap();
        assert_eq!(vixen.age_class(), AgeClass::Juvenile);
        assert!(!vixen.can_give_birth());
        vixen.grow_older();
        assert_eq!(vixen.age_class(), AgeClass::Adult);
        assert!(vixen.can_give_birth());

        vixen.apply_fertility_control(2);
        assert!(!vixen.can_give_birth());
        vixen.grow_older();
        vixen.grow_older();
        assert!(vixen.can_give_birth());

        let dog = Animal::new("d1", Gender::Male, 100, "c0r0").unwrap();
        assert!(!dog.can_give_birth());
    }

    #[test]
    fn test_empty_ids_rejected() {
        assert!(Animal::new("", Gender::Male, 1, "c").is_err());
        assert!(Animal::new("a", Gender::Male, 1, "").is_err());
    }

    #[test]
    fn test_fatal_course_kills() {
        let rabies = disease(100.0, false);
        let mut rng = SimRng::seed_from_u64(1);
        let mut fox = Animal::new("f", Gender::Male, 60, "c").unwrap();
        assert!(fox.infect(&rabies, at(1, 1), None, &mut rng));
        // Already carrying an ongoing case.
        assert!(!fox.infect(&rabies, at(1, 2), None, &mut rng));

        assert!(fox.is_infectious(at(1, 3)));
        assert_eq!(fox.resolve_course(at(1, 3)), None);
        assert_eq!(fox.resolve_course(at(1, 4)), Some(CourseOutcome::Died));
        assert!(!fox.is_alive());
        assert_eq!(
            fox.natural_immunity("Rabies"),
            Some(NaturalImmunity::InfectedDied)
        );
    }

    #[test]
    fn test_recovery_confers_immunity_when_disease_allows() {
        let mut rng = SimRng::seed_from_u64(1);
        let immunizing = disease(0.0, true);
        let mut fox = Animal::new("f", Gender::Female, 60, "c").unwrap();
        fox.infect(&immunizing, at(1, 1), None, &mut rng);
        assert_eq!(fox.resolve_course(at(1, 4)), Some(CourseOutcome::Recovered));
        assert!(fox.is_alive());
        assert!(fox.is_immune(&immunizing, at(3, 1)));
        assert!(!fox.infect(&immunizing, at(3, 1), None, &mut rng));

        let non_immunizing = disease(0.0, false);
        let mut other = Animal::new("g", Gender::Female, 60, "c").unwrap();
        other.infect(&non_immunizing, at(1, 1), None, &mut rng);
        other.resolve_course(at(1, 4));
        assert!(!other.is_immune(&non_immunizing, at(3, 1)));
        assert!(other.infect(&non_immunizing, at(3, 1), None, &mut rng));
    }

    #[test]
    fn test_vaccination_expires() {
        let rabies = disease(100.0, false);
        let mut fox = Animal::new("f", Gender::Male, 60, "c").unwrap();
        fox.vaccinate("Rabies", 10, at(1, 50));
        assert!(fox.is_immune(&rabies, at(1, 52)));
        assert!(fox.is_immune(&rabies, at(2, 7)));
        assert!(!fox.is_immune(&rabies, at(2, 8)));

        // A shorter booster does not cut an existing protection short.
        fox.vaccinate("Rabies", 1, at(1, 51));
        assert!(fox.is_immune(&rabies, at(2, 7)));
    }
}
