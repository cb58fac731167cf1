//! Simulated calendar: 52-week years tagged with a winter severity.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::rng::SimRng;

pub const WEEKS_PER_YEAR: u32 = 52;

/// Size of the pre-drawn pool winter types are generated from.
pub const WINTER_POOL_SIZE: usize = 1000;

/// A point on the simulated calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimTime {
    pub year: i32,
    pub week: u32,
}

impl SimTime {
    pub fn new(year: i32, week: u32) -> SimResult<Self> {
        check_week(week)?;
        Ok(Self { year, week })
    }

    /// Weeks since year 0, week 0.
    pub fn absolute_week(self) -> i64 {
        i64::from(self.year) * i64::from(WEEKS_PER_YEAR) + i64::from(self.week)
    }

    /// Elapsed weeks from `earlier` to `self`; negative when `earlier` is
    /// in the future.
    pub fn weeks_since(self, earlier: SimTime) -> i64 {
        self.absolute_week() - earlier.absolute_week()
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.year, self.week).cmp(&(other.year, other.week))
    }
}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "year {} week {}", self.year, self.week)
    }
}

pub(crate) fn check_week(week: u32) -> SimResult<u32> {
    if (1..=WEEKS_PER_YEAR).contains(&week) {
        Ok(week)
    } else {
        Err(SimError::validation(
            "week",
            format!("{week} is outside [1, {WEEKS_PER_YEAR}]"),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinterType {
    VeryMild,
    Mild,
    Normal,
    Severe,
    VerySevere,
}

impl WinterType {
    pub const ALL: [WinterType; 5] = [
        WinterType::VeryMild,
        WinterType::Mild,
        WinterType::Normal,
        WinterType::Severe,
        WinterType::VerySevere,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Which end of the severity scale generated winters lean towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinterBias {
    Mild,
    Normal,
    Severe,
}

impl WinterBias {
    /// Percent weight of each [`WinterType`], very mild first.
    pub fn weights(self) -> [u32; 5] {
        match self {
            WinterBias::Mild => [20, 40, 25, 10, 5],
            WinterBias::Normal => [5, 20, 50, 20, 5],
            WinterBias::Severe => [5, 10, 25, 40, 20],
        }
    }

    /// Map a `[1, 100]` draw onto a winter type.
    pub fn pick(self, draw: u32) -> WinterType {
        let mut cumulative = 0;
        for (winter, weight) in WinterType::ALL.iter().zip(self.weights()) {
            cumulative += weight;
            if draw <= cumulative {
                return *winter;
            }
        }
        WinterType::VerySevere
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Year {
    id: i32,
    winter: WinterType,
    current_week: u32,
}

impl Year {
    pub fn new(id: i32, winter: WinterType) -> Self {
        Self {
            id,
            winter,
            current_week: 1,
        }
    }

    /// Rebuild a year mid-way through, e.g. when restoring a saved run.
    pub fn at_week(id: i32, winter: WinterType, current_week: u32) -> SimResult<Self> {
        Ok(Self {
            id,
            winter,
            current_week: check_week(current_week)?,
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn winter(&self) -> WinterType {
        self.winter
    }

    pub fn current_week(&self) -> u32 {
        self.current_week
    }

    pub fn is_last_week(&self) -> bool {
        self.current_week == WEEKS_PER_YEAR
    }
}

/// The ordered years of a run and a cursor on the current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearList {
    years: Vec<Year>,
    current: usize,
}

impl YearList {
    /// Consecutive years from `start_year` with the given winters.
    pub fn from_winters(start_year: i32, winters: &[WinterType]) -> SimResult<Self> {
        if winters.is_empty() {
            return Err(SimError::validation("years", "at least one year is required"));
        }
        let years = winters
            .iter()
            .enumerate()
            .map(|(offset, winter)| Year::new(start_year + offset as i32, *winter))
            .collect();
        Ok(Self { years, current: 0 })
    }

    /// Generate `count` years with winters drawn under `bias`.
    ///
    /// A pool of [`WINTER_POOL_SIZE`] draws is taken up front and cycled,
    /// so the first years are the same however many are requested.
    pub fn generate(
        start_year: i32,
        count: usize,
        bias: WinterBias,
        rng: &mut SimRng,
    ) -> SimResult<Self> {
        let pool: Vec<u32> = (0..WINTER_POOL_SIZE).map(|_| rng.percent()).collect();
        let winters: Vec<WinterType> = (0..count)
            .map(|i| bias.pick(pool[i % WINTER_POOL_SIZE]))
            .collect();
        Self::from_winters(start_year, &winters)
    }

    /// Restore a list with its cursor, as written by a datastore.
    pub fn restore(years: Vec<Year>, current: usize) -> SimResult<Self> {
        if current >= years.len() {
            return Err(SimError::IndexOutOfRange {
                index: current,
                len: years.len(),
            });
        }
        for pair in years.windows(2) {
            if pair[1].id != pair[0].id + 1 {
                return Err(SimError::Consistency(format!(
                    "year {} does not follow year {}",
                    pair[1].id, pair[0].id
                )));
            }
        }
        Ok(Self { years, current })
    }

    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    pub fn current_year(&self) -> &Year {
        &self.years[self.current]
    }

    /// Position of the current year in the list.
    pub fn current_year_num(&self) -> usize {
        self.current
    }

    pub fn start_year(&self) -> i32 {
        self.years[0].id
    }

    pub fn now(&self) -> SimTime {
        let year = self.current_year();
        SimTime {
            year: year.id,
            week: year.current_week,
        }
    }

    pub fn year(&self, id: i32) -> Option<&Year> {
        let offset = id.checked_sub(self.start_year())?;
        usize::try_from(offset)
            .ok()
            .and_then(|offset| self.years.get(offset))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Year> {
        self.years.iter()
    }

    /// True on week 52 of the last year; advancing further is an error.
    pub fn is_final_week(&self) -> bool {
        self.current + 1 == self.years.len() && self.current_year().is_last_week()
    }

    /// Weeks from the current week to the end of the last year, inclusive.
    pub fn remaining_weeks(&self) -> u64 {
        let later_years = (self.years.len() - self.current - 1) as u64;
        let this_year = u64::from(WEEKS_PER_YEAR - self.current_year().current_week + 1);
        later_years * u64::from(WEEKS_PER_YEAR) + this_year
    }

    /// Move forward one week, rolling into the next year after week 52.
    pub fn advance_week(&mut self) -> SimResult<()> {
        let last_index = self.years.len() - 1;
        let year = &mut self.years[self.current];
        if year.current_week < WEEKS_PER_YEAR {
            year.current_week += 1;
            return Ok(());
        }
        if self.current >= last_index {
            return Err(SimError::TimeOverflow(year.id));
        }
        self.current += 1;
        self.years[self.current].current_week = 1;
        Ok(())
    }
}
