use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    background::{Background, Census, CourseTally},
    error::{SimError, SimResult},
    rng::{RngManager, SimRng},
    time::{SimTime, WinterType, WEEKS_PER_YEAR},
};

/// Where in the week a system runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before strategies, infection progression and the dead sweep.
    BeforeRemovingDead,
    /// After the dead have been removed.
    AfterRemovingDead,
}

fn default_rebuild_interval_years() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub scenario_name: String,
    pub seed: u64,
    #[serde(default)]
    pub trial: u64,
    #[serde(default = "default_rebuild_interval_years")]
    pub rebuild_interval_years: u32,
    #[serde(default)]
    pub scramble_weekly: bool,
    #[serde(default)]
    pub abort_on_disease_disappearance: bool,
}

impl EngineSettings {
    pub fn new(scenario_name: impl Into<String>, seed: u64) -> Self {
        Self {
            scenario_name: scenario_name.into(),
            seed,
            trial: 0,
            rebuild_interval_years: default_rebuild_interval_years(),
            scramble_weekly: false,
            abort_on_disease_disappearance: false,
        }
    }
}

pub struct EngineBuilder {
    settings: EngineSettings,
    systems: Vec<Box<dyn System>>,
}

impl EngineBuilder {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            systems: Vec::new(),
        }
    }

    pub fn with_system(mut self, system: impl System + 'static) -> Self {
        self.systems.push(Box::new(system));
        self
    }

    pub fn push_system(&mut self, system: impl System + 'static) {
        self.systems.push(Box::new(system));
    }

    pub fn build(self) -> Engine {
        Engine {
            rng: RngManager::for_trial(self.settings.seed, self.settings.trial),
            systems: self.systems,
            settings: self.settings,
            weeks_run: 0,
        }
    }
}

/// What happened in one simulated week.
#[derive(Debug, Clone, PartialEq)]
pub struct WeekSummary {
    pub time: SimTime,
    pub strategies_fired: usize,
    pub seeded: usize,
    pub courses: CourseTally,
    pub removed_dead: usize,
    pub census: Census,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    RunLengthReached,
    DiseaseDisappeared,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub stop_reason: StopReason,
    pub weeks_run: u64,
    pub final_time: SimTime,
    pub census: Census,
}

pub struct Engine {
    rng: RngManager,
    systems: Vec<Box<dyn System>>,
    settings: EngineSettings,
    weeks_run: u64,
}

impl Engine {
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn weeks_run(&self) -> u64 {
        self.weeks_run
    }

    /// Run one week without advancing the calendar.
    pub fn run_week(&mut self, background: &mut Background) -> SimResult<WeekSummary> {
        let time = background.now();
        let winter = background.years().current_year().winter();
        let year_index = background.years().current_year_num();

        self.run_phase(Phase::BeforeRemovingDead, background, time, winter)?;

        let strategies_fired = background.apply_due_strategies(self.rng.stream("strategies"))?;
        let seeded = background.seed_due_infections(self.rng.stream("seeding"))?;
        let courses = background.progress_infections();
        let removed_dead = background.remove_dead()?;

        if background.live_count() == 0 {
            warn!(
                scenario = %self.settings.scenario_name,
                trial = self.settings.trial,
                year = time.year,
                week = time.week,
                "population extinct"
            );
            return Err(SimError::Extinction {
                year: time.year,
                week: time.week,
            });
        }

        self.run_phase(Phase::AfterRemovingDead, background, time, winter)?;

        let interval = self.settings.rebuild_interval_years as usize;
        if interval > 0 && time.week == WEEKS_PER_YEAR && (year_index + 1) % interval == 0 {
            background.rebuild_animals();
        }
        if self.settings.scramble_weekly {
            background.scramble_animals(self.rng.stream("scramble"));
        }

        self.weeks_run += 1;
        Ok(WeekSummary {
            time,
            strategies_fired,
            seeded,
            courses,
            removed_dead,
            census: background.census(),
        })
    }

    fn run_phase(
        &mut self,
        phase: Phase,
        background: &mut Background,
        now: SimTime,
        winter: WinterType,
    ) -> SimResult<()> {
        let ctx = SystemContext {
            now,
            winter,
            trial: self.settings.trial,
            scenario_name: &self.settings.scenario_name,
        };
        for system in self.systems.iter_mut().filter(|s| s.phase() == phase) {
            let rng = self.rng.stream(system.name());
            system.run(&ctx, background, rng)?;
        }
        Ok(())
    }

    /// Run week by week until the calendar ends, the disease dies out (when
    /// configured to stop then) or `cancel` is raised.
    pub fn run(&mut self, background: &mut Background, cancel: &AtomicBool) -> SimResult<RunOutcome> {
        self.run_with_hook(background, cancel, |_| {})
    }

    pub fn run_with_hook<F>(
        &mut self,
        background: &mut Background,
        cancel: &AtomicBool,
        mut hook: F,
    ) -> SimResult<RunOutcome>
    where
        F: FnMut(&WeekSummary),
    {
        info!(
            scenario = %self.settings.scenario_name,
            trial = self.settings.trial,
            weeks = background.years().remaining_weeks(),
            "trial started"
        );
        let check_disease =
            self.settings.abort_on_disease_disappearance && background.disease().is_some();
        let stop_reason = loop {
            if cancel.load(Ordering::Relaxed) {
                break StopReason::Cancelled;
            }
            let summary = self.run_week(background)?;
            hook(&summary);
            if check_disease && !background.disease_present() {
                break StopReason::DiseaseDisappeared;
            }
            if background.years().is_final_week() {
                break StopReason::RunLengthReached;
            }
            background.advance_week()?;
        };
        let outcome = RunOutcome {
            stop_reason,
            weeks_run: self.weeks_run,
            final_time: background.now(),
            census: background.census(),
        };
        info!(
            scenario = %self.settings.scenario_name,
            trial = self.settings.trial,
            reason = ?outcome.stop_reason,
            weeks = outcome.weeks_run,
            live = outcome.census.live,
            "trial finished"
        );
        debug!(final_time = %outcome.final_time, "trial final time");
        Ok(outcome)
    }
}

pub struct SystemContext<'a> {
    pub now: SimTime,
    pub winter: WinterType,
    pub trial: u64,
    pub scenario_name: &'a str,
}

/// A unit of per-week behaviour plugged into the engine.
pub trait System: Send {
    fn name(&self) -> &str;

    fn phase(&self) -> Phase {
        Phase::BeforeRemovingDead
    }

    fn run(
        &mut self,
        ctx: &SystemContext,
        background: &mut Background,
        rng: &mut SimRng,
    ) -> SimResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animal::Gender;
    use crate::spatial::{grid_cell_id, Landscape};
    use crate::time::YearList;

    struct Recorder {
        phase: Phase,
        seen: std::sync::Arc<std::sync::Mutex<Vec<(Phase, SimTime, usize)>>>,
    }

    impl System for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn phase(&self) -> Phase {
            self.phase
        }

        fn run(
            &mut self,
            ctx: &SystemContext,
            background: &mut Background,
            _rng: &mut SimRng,
        ) -> SimResult<()> {
            self.seen
                .lock()
                .unwrap()
                .push((self.phase, ctx.now, background.live_count()));
            Ok(())
        }
    }

    struct KillAll;

    impl System for KillAll {
        fn name(&self) -> &str {
            "kill_all"
        }

        fn run(
            &mut self,
            _: &SystemContext,
            background: &mut Background,
            _: &mut SimRng,
        ) -> SimResult<()> {
            for animal in background.animals_mut().iter_mut() {
                animal.die();
            }
            Ok(())
        }
    }

    fn background(years: usize) -> Background {
        let years = YearList::from_winters(1, &vec![WinterType::Normal; years]).unwrap();
        let mut bg = Background::new(Landscape::hex_grid(2, 2, 10.0).unwrap(), years).unwrap();
        bg.spawn_animal(Gender::Female, 80, &grid_cell_id(0, 0), None)
            .unwrap();
        bg.spawn_animal(Gender::Male, 80, &grid_cell_id(0, 0), None)
            .unwrap();
        bg
    }

    #[test]
    fn test_runs_every_week_of_every_year() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut engine = EngineBuilder::new(EngineSettings::new("test", 1))
            .with_system(Recorder {
                phase: Phase::AfterRemovingDead,
                seen: seen.clone(),
            })
            .with_system(Recorder {
                phase: Phase::BeforeRemovingDead,
                seen: seen.clone(),
            })
            .build();
        let mut bg = background(2);
        let outcome = engine.run(&mut bg, &AtomicBool::new(false)).unwrap();

        assert_eq!(outcome.stop_reason, StopReason::RunLengthReached);
        assert_eq!(outcome.weeks_run, 104);
        assert_eq!(outcome.final_time, SimTime { year: 2, week: 52 });
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 208);
        assert_eq!(seen[0].0, Phase::BeforeRemovingDead);
        assert_eq!(seen[1].0, Phase::AfterRemovingDead);
    }

    #[test]
    fn test_hook_sees_each_week() {
        let mut engine = EngineBuilder::new(EngineSettings::new("test", 1)).build();
        let mut bg = background(1);
        let mut weeks = Vec::new();
        engine
            .run_with_hook(&mut bg, &AtomicBool::new(false), |summary| {
                weeks.push(summary.time.week)
            })
            .unwrap();
        assert_eq!(weeks.len(), 52);
        assert_eq!(weeks.first().copied(), Some(1));
        assert_eq!(weeks.last().copied(), Some(52));
    }

    #[test]
    fn test_cancel_stops_before_first_week() {
        let mut engine = EngineBuilder::new(EngineSettings::new("test", 1)).build();
        let mut bg = background(1);
        let outcome = engine.run(&mut bg, &AtomicBool::new(true)).unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert_eq!(outcome.weeks_run, 0);
    }

    #[test]
    fn test_extinction_is_fatal() {
        let mut engine = EngineBuilder::new(EngineSettings::new("test", 1))
            .with_system(KillAll)
            .build();
        let mut bg = background(1);
        let err = engine.run(&mut bg, &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, SimError::Extinction { year: 1, week: 1 }));
        assert!(err.is_run_fatal());
    }

    #[test]
    fn test_no_disease_means_no_disappearance_stop() {
        let mut settings = EngineSettings::new("test", 1);
        settings.abort_on_disease_disappearance = true;
        let mut engine = EngineBuilder::new(settings).build();
        let mut bg = background(1);
        let outcome = engine.run(&mut bg, &AtomicBool::new(false)).unwrap();
        assert_eq!(outcome.stop_reason, StopReason::RunLengthReached);
    }

    #[test]
    fn test_disease_disappearance_stops_run() {
        let mut settings = EngineSettings::new("test", 1);
        settings.abort_on_disease_disappearance = true;
        let mut engine = EngineBuilder::new(settings).build();
        let mut bg =
            background(3).with_disease(std::sync::Arc::new(crate::disease::Disease::rabies()));
        let outcome = engine.run(&mut bg, &AtomicBool::new(false)).unwrap();
        assert_eq!(outcome.stop_reason, StopReason::DiseaseDisappeared);
        assert_eq!(outcome.weeks_run, 1);
    }
}
