//! Disease templates and individual infections.
//!
//! An [`Infection`] fixes its periods and outcome when it is created; every
//! state query afterwards is a pure function of the current time.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::animal::AnimalId;
use crate::error::{check_percent, SimError, SimResult};
use crate::rng::SimRng;
use crate::time::SimTime;

/// Number of weekly weights in an empirical period table.
pub const PERIOD_TABLE_WEEKS: usize = 50;

/// Longest period a gaussian draw can produce: one hundred years.
pub const MAX_PERIOD_WEEKS: u32 = 5200;

/// How long an incubation or infectious period lasts, in weeks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodDistribution {
    Gaussian { mean: f64, std_dev: f64 },
    Table(PeriodTable),
}

impl PeriodDistribution {
    pub fn gaussian(mean: f64, std_dev: f64) -> SimResult<Self> {
        if !(mean.is_finite() && mean >= 1.0) {
            return Err(SimError::validation(
                "period mean",
                format!("{mean} must be at least one week"),
            ));
        }
        if mean > f64::from(MAX_PERIOD_WEEKS) {
            return Err(SimError::validation(
                "period mean",
                format!("{mean} exceeds {MAX_PERIOD_WEEKS} weeks"),
            ));
        }
        if !(std_dev.is_finite() && std_dev >= 0.0) {
            return Err(SimError::validation(
                "period standard deviation",
                format!("{std_dev} must be >= 0"),
            ));
        }
        Ok(PeriodDistribution::Gaussian { mean, std_dev })
    }

    pub fn validate(&self) -> SimResult<()> {
        match self {
            PeriodDistribution::Gaussian { mean, std_dev } => {
                Self::gaussian(*mean, *std_dev).map(|_| ())
            }
            PeriodDistribution::Table(table) => PeriodTable::new(&table.weights).map(|_| ()),
        }
    }

    /// Draw a period of at least one week; non-positive draws are redrawn
    /// and long ones capped at [`MAX_PERIOD_WEEKS`].
    pub fn draw(&self, rng: &mut SimRng) -> u32 {
        match self {
            PeriodDistribution::Gaussian { mean, std_dev } => loop {
                let weeks = rng.gaussian(*mean, *std_dev).round();
                if weeks > 0.0 {
                    return weeks.min(f64::from(MAX_PERIOD_WEEKS)) as u32;
                }
            },
            PeriodDistribution::Table(table) => table.draw(rng),
        }
    }
}

/// Empirical distribution: entry `i` is the chance (in percent) that the
/// period lasts `i + 1` weeks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct PeriodTable {
    weights: Vec<f64>,
}

impl PeriodTable {
    /// Accepts up to [`PERIOD_TABLE_WEEKS`] non-negative weights and
    /// re-normalizes them to sum to 100.
    pub fn new(weights: &[f64]) -> SimResult<Self> {
        if weights.len() > PERIOD_TABLE_WEEKS {
            return Err(SimError::validation(
                "period table",
                format!(
                    "{} entries given, at most {PERIOD_TABLE_WEEKS} allowed",
                    weights.len()
                ),
            ));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SimError::validation(
                "period table",
                "weights must be finite and >= 0",
            ));
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(SimError::validation(
                "period table",
                "at least one weight must be positive",
            ));
        }
        let mut normalized = vec![0.0; PERIOD_TABLE_WEEKS];
        for (slot, weight) in normalized.iter_mut().zip(weights) {
            *slot = weight * 100.0 / total;
        }
        Ok(Self {
            weights: normalized,
        })
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn draw(&self, rng: &mut SimRng) -> u32 {
        let target = rng.uniform() * 100.0;
        let mut cumulative = 0.0;
        let mut last_positive = 0;
        for (index, weight) in self.weights.iter().enumerate() {
            if *weight > 0.0 {
                last_positive = index;
            }
            cumulative += weight;
            if target < cumulative {
                return index as u32 + 1;
            }
        }
        // Rounding can leave the total a hair under 100.
        last_positive as u32 + 1
    }
}

impl TryFrom<Vec<f64>> for PeriodTable {
    type Error = SimError;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        PeriodTable::new(&value)
    }
}

impl From<PeriodTable> for Vec<f64> {
    fn from(value: PeriodTable) -> Self {
        value.weights
    }
}

/// Serializable disease description, as found in scenario files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseParams {
    pub name: String,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub incubation: PeriodDistribution,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub infectious: PeriodDistribution,
    /// Percent chance per week that an infectious animal infects each
    /// susceptible animal sharing its cell.
    pub contact_rate: f64,
    /// Percent chance an infection is fatal.
    pub chance_of_death: f64,
    #[serde(default)]
    pub becomes_immune: bool,
    #[serde(default)]
    pub recovered_not_infectious: bool,
}

/// Immutable template shared by every infection of this disease.
#[derive(Debug, Clone, PartialEq)]
pub struct Disease {
    name: String,
    incubation: PeriodDistribution,
    infectious: PeriodDistribution,
    contact_rate: f64,
    chance_of_death: f64,
    becomes_immune: bool,
    recovered_not_infectious: bool,
}

impl Disease {
    pub fn new(params: DiseaseParams) -> SimResult<Self> {
        if params.name.trim().is_empty() {
            return Err(SimError::validation("disease name", "must not be empty"));
        }
        params.incubation.validate()?;
        params.infectious.validate()?;
        Ok(Self {
            name: params.name,
            incubation: params.incubation,
            infectious: params.infectious,
            contact_rate: check_percent("contact rate", params.contact_rate)?,
            chance_of_death: check_percent("chance of death", params.chance_of_death)?,
            becomes_immune: params.becomes_immune,
            recovered_not_infectious: params.recovered_not_infectious,
        })
    }

    /// Fox rabies defaults: about five weeks incubating, one week
    /// infectious, always fatal.
    pub fn rabies() -> Self {
        Self {
            name: "Rabies".to_string(),
            incubation: PeriodDistribution::Gaussian {
                mean: 5.0,
                std_dev: 2.0,
            },
            infectious: PeriodDistribution::Gaussian {
                mean: 1.0,
                std_dev: 0.5,
            },
            contact_rate: 30.0,
            chance_of_death: 100.0,
            becomes_immune: false,
            recovered_not_infectious: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn incubation(&self) -> &PeriodDistribution {
        &self.incubation
    }

    pub fn infectious(&self) -> &PeriodDistribution {
        &self.infectious
    }

    pub fn contact_rate(&self) -> f64 {
        self.contact_rate
    }

    pub fn chance_of_death(&self) -> f64 {
        self.chance_of_death
    }

    pub fn becomes_immune(&self) -> bool {
        self.becomes_immune
    }

    pub fn recovered_not_infectious(&self) -> bool {
        self.recovered_not_infectious
    }

    pub fn params(&self) -> DiseaseParams {
        DiseaseParams {
            name: self.name.clone(),
            incubation: self.incubation.clone(),
            infectious: self.infectious.clone(),
            contact_rate: self.contact_rate,
            chance_of_death: self.chance_of_death,
            becomes_immune: self.becomes_immune,
            recovered_not_infectious: self.recovered_not_infectious,
        }
    }
}

/// What an infection leaves behind once it has run its course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NaturalImmunity {
    InfectedDied,
    InfectedRecovered,
}

#[derive(Debug, Clone)]
pub struct Infection {
    disease: Arc<Disease>,
    onset: SimTime,
    incubation_period: u32,
    infectious_period: u32,
    is_fatal: bool,
    infecting_animal: Option<AnimalId>,
}

impl Infection {
    /// A new case starting at `onset`, with periods and outcome drawn from
    /// the disease.
    pub fn new(
        disease: Arc<Disease>,
        onset: SimTime,
        infecting_animal: Option<AnimalId>,
        rng: &mut SimRng,
    ) -> Self {
        let incubation_period = disease.incubation.draw(rng);
        let infectious_period = disease.infectious.draw(rng);
        let is_fatal = rng.percent_at_most(disease.chance_of_death);
        Self {
            disease,
            onset,
            incubation_period,
            infectious_period,
            is_fatal,
            infecting_animal,
        }
    }

    /// A case with known periods and outcome, e.g. read back from storage.
    pub fn with_periods(
        disease: Arc<Disease>,
        onset: SimTime,
        incubation_period: u32,
        infectious_period: u32,
        is_fatal: bool,
        infecting_animal: Option<AnimalId>,
    ) -> SimResult<Self> {
        check_infectious_period(infectious_period)?;
        Ok(Self {
            disease,
            onset,
            incubation_period,
            infectious_period,
            is_fatal,
            infecting_animal,
        })
    }

    /// A copy with replaced periods. The fatality outcome is carried over.
    pub fn with_overridden_periods(
        &self,
        incubation_period: u32,
        infectious_period: u32,
    ) -> SimResult<Self> {
        check_infectious_period(infectious_period)?;
        Ok(Self {
            incubation_period,
            infectious_period,
            ..self.clone()
        })
    }

    pub fn disease(&self) -> &Arc<Disease> {
        &self.disease
    }

    pub fn onset(&self) -> SimTime {
        self.onset
    }

    pub fn incubation_period(&self) -> u32 {
        self.incubation_period
    }

    pub fn infectious_period(&self) -> u32 {
        self.infectious_period
    }

    pub fn is_fatal(&self) -> bool {
        self.is_fatal
    }

    pub fn infecting_animal(&self) -> Option<&AnimalId> {
        self.infecting_animal.as_ref()
    }

    pub fn natural_immunity(&self) -> NaturalImmunity {
        if self.is_fatal {
            NaturalImmunity::InfectedDied
        } else {
            NaturalImmunity::InfectedRecovered
        }
    }

    fn course_length(&self) -> i64 {
        i64::from(self.incubation_period) + i64::from(self.infectious_period)
    }

    /// Weeks since onset.
    pub fn elapsed(&self, now: SimTime) -> i64 {
        now.weeks_since(self.onset)
    }

    pub fn is_incubating(&self, now: SimTime) -> bool {
        let elapsed = self.elapsed(now);
        elapsed >= 0 && elapsed < i64::from(self.incubation_period)
    }

    pub fn is_infectious(&self, now: SimTime) -> bool {
        let elapsed = self.elapsed(now);
        elapsed >= i64::from(self.incubation_period) && elapsed < self.course_length()
    }

    /// True in exactly one week: the week after the infectious window
    /// closes.
    pub fn has_run_course(&self, now: SimTime) -> bool {
        self.elapsed(now) == self.course_length()
    }

    /// True in every week after the course has been resolved.
    pub fn is_active(&self, now: SimTime) -> bool {
        self.elapsed(now) > self.course_length()
    }

    /// Incubating or infectious.
    pub fn is_ongoing(&self, now: SimTime) -> bool {
        let elapsed = self.elapsed(now);
        elapsed >= 0 && elapsed < self.course_length()
    }

    /// Whether this case can pass the disease on this week.
    pub fn is_contagious(&self, now: SimTime) -> bool {
        self.is_infectious(now) && (self.is_fatal || !self.disease.recovered_not_infectious)
    }
}

fn check_infectious_period(infectious_period: u32) -> SimResult<()> {
    if infectious_period < 1 {
        return Err(SimError::validation(
            "infectious period",
            "must be at least one week",
        ));
    }
    Ok(())
}
