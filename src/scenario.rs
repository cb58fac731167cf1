use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{
    animal::Gender,
    background::Background,
    batch::{BatchSettings, Trial, TrialFactory},
    disease::{Disease, DiseaseParams},
    engine::{EngineBuilder, EngineSettings},
    error::{SimError, SimResult},
    report::ReportSink,
    rng::RngManager,
    seeding::{InfectionSeeder, InitialInfection},
    snapshot::{JsonSnapshotWriter, SnapshotSystem},
    spatial::{CellId, Landscape, SuperCell, SuperCellId},
    strategy::{Strategy, StrategyKind, StrategyList},
    systems::{BehaviourParams, ReportingSystem},
    time::{WinterBias, WinterType, YearList},
};

fn default_seed() -> u64 {
    42
}

fn default_years() -> usize {
    10
}

fn default_trials() -> u64 {
    1
}

fn default_threads() -> usize {
    4
}

fn default_start_year() -> i32 {
    1
}

fn default_progress_interval_weeks() -> u64 {
    13
}

fn default_rebuild_interval_years() -> u32 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_years")]
    pub years: usize,
    #[serde(default = "default_trials")]
    pub trials: u64,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_start_year")]
    pub start_year: i32,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub winters: WinterSpec,
    pub grid: GridSpec,
    #[serde(default)]
    pub super_cells: Vec<SuperCellSpec>,
    #[serde(default)]
    pub disease: Option<DiseaseParams>,
    #[serde(default)]
    pub strategies: Vec<StrategySpec>,
    #[serde(default)]
    pub initial_infections: Vec<InitialInfectionSpec>,
    #[serde(default)]
    pub initial_animals: Vec<AnimalGroupSpec>,
    #[serde(default)]
    pub behaviour: BehaviourParams,
    #[serde(default)]
    pub options: ScenarioOptions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinterSpec {
    Bias(WinterBias),
    Explicit(Vec<WinterType>),
}

impl Default for WinterSpec {
    fn default() -> Self {
        WinterSpec::Bias(WinterBias::Normal)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GridSpec {
    pub columns: u32,
    pub rows: u32,
    pub carrying_capacity: f64,
    /// Per-cell capacity overrides.
    #[serde(default)]
    pub capacities: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuperCellSpec {
    pub id: String,
    #[serde(default)]
    pub in_resistance: f64,
    #[serde(default)]
    pub out_resistance: f64,
    #[serde(default)]
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategySpec {
    #[serde(flatten)]
    pub kind: StrategyKind,
    pub year: i32,
    pub week: u32,
    pub levels: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitialInfectionSpec {
    pub cell: String,
    pub year: i32,
    pub week: u32,
    pub level: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnimalGroupSpec {
    pub cell: String,
    #[serde(default)]
    pub females: u32,
    #[serde(default)]
    pub males: u32,
    #[serde(default)]
    pub age_weeks: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioOptions {
    #[serde(default)]
    pub scramble_weekly: bool,
    #[serde(default)]
    pub keep_dead_animals: bool,
    #[serde(default)]
    pub abort_on_disease_disappearance: bool,
    #[serde(default = "default_rebuild_interval_years")]
    pub rebuild_interval_years: u32,
    /// 0 disables snapshots.
    #[serde(default)]
    pub snapshot_interval_years: u32,
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
    #[serde(default = "default_progress_interval_weeks")]
    pub progress_interval_weeks: u64,
    /// 0 disables census lines in the report.
    #[serde(default)]
    pub report_interval_weeks: u64,
    #[serde(default)]
    pub capture_population: bool,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            scramble_weekly: false,
            keep_dead_animals: false,
            abort_on_disease_disappearance: false,
            rebuild_interval_years: default_rebuild_interval_years(),
            snapshot_interval_years: 0,
            snapshot_dir: None,
            progress_interval_weeks: default_progress_interval_weeks(),
            report_interval_weeks: 0,
            capture_population: false,
        }
    }
}

pub struct ScenarioLoader {
    base_dir: PathBuf,
}

impl ScenarioLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<Scenario> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        let scenario: Scenario = serde_yaml::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        scenario
            .validate()
            .with_context(|| format!("Invalid scenario {}", path.display()))?;
        Ok(scenario)
    }
}

impl Scenario {
    /// Check everything that can be checked without building a trial.
    pub fn validate(&self) -> SimResult<()> {
        if self.years == 0 {
            return Err(SimError::validation("years", "at least one year is required"));
        }
        if let WinterSpec::Explicit(winters) = &self.winters {
            if winters.len() < self.years {
                return Err(SimError::validation(
                    "winters",
                    format!("{} listed for {} years", winters.len(), self.years),
                ));
            }
        }
        self.behaviour.validate()?;
        if let Some(disease) = &self.disease {
            Disease::new(disease.clone())?;
        }
        let landscape = self.build_landscape()?;
        landscape.validate()?;
        let known = |cell: &str| -> SimResult<()> {
            match landscape.cell(&CellId::from(cell)) {
                Some(_) => Ok(()),
                None => Err(SimError::MissingKey(cell.to_string())),
            }
        };
        for spec in &self.strategies {
            for cell in spec.levels.keys() {
                known(cell.as_str())?;
            }
        }
        for spec in &self.initial_infections {
            known(spec.cell.as_str())?;
        }
        self.check_disease_references()?;
        self.build_strategies()?;
        self.build_seeder()?;
        Ok(())
    }

    /// Seeded infections need a disease, and vaccines must name it.
    fn check_disease_references(&self) -> SimResult<()> {
        let configured = self.disease.as_ref().map(|d| d.name.as_str());
        if configured.is_none() && !self.initial_infections.is_empty() {
            return Err(SimError::validation(
                "initial_infections",
                "listed but no disease is configured",
            ));
        }
        for spec in &self.strategies {
            let named = match &spec.kind {
                StrategyKind::Vaccinate { disease, .. }
                | StrategyKind::Combined { disease, .. } => disease,
                _ => continue,
            };
            if configured != Some(named.as_str()) {
                return Err(SimError::validation(
                    "strategies",
                    format!("{} targets unknown disease '{named}'", spec.kind.label()),
                ));
            }
        }
        Ok(())
    }

    pub fn build_landscape(&self) -> SimResult<Landscape> {
        let mut landscape =
            Landscape::hex_grid(self.grid.columns, self.grid.rows, self.grid.carrying_capacity)?;
        for (cell, capacity) in &self.grid.capacities {
            landscape
                .try_cell_mut(&CellId::from(cell.as_str()))?
                .set_carrying_capacity(*capacity)?;
        }
        for spec in &self.super_cells {
            let id = SuperCellId::from(spec.id.as_str());
            if landscape.super_cell(&id).is_none() {
                landscape.add_super_cell(SuperCell::new(
                    id.clone(),
                    spec.in_resistance,
                    spec.out_resistance,
                )?)?;
            }
            for cell in &spec.cells {
                landscape.assign_super_cell(&CellId::from(cell.as_str()), &id)?;
            }
        }
        Ok(landscape)
    }

    /// Years for `trial`; generated winters come from the trial's own
    /// stream.
    pub fn build_years(&self, trial: u64) -> SimResult<YearList> {
        match &self.winters {
            WinterSpec::Bias(bias) => {
                let mut rng = RngManager::for_trial(self.seed, trial).detached("winters");
                YearList::generate(self.start_year, self.years, *bias, &mut rng)
            }
            WinterSpec::Explicit(winters) => {
                let count = self.years.min(winters.len());
                YearList::from_winters(self.start_year, &winters[..count])
            }
        }
    }

    pub fn build_strategies(&self) -> SimResult<StrategyList> {
        let mut list = StrategyList::new();
        for spec in &self.strategies {
            let mut strategy = Strategy::new(spec.kind.clone(), spec.year, spec.week)?;
            for (cell, level) in &spec.levels {
                strategy.set_level(cell.as_str(), *level)?;
            }
            list.push(strategy)?;
        }
        Ok(list)
    }

    pub fn build_seeder(&self) -> SimResult<InfectionSeeder> {
        let infections = self
            .initial_infections
            .iter()
            .map(|spec| {
                InitialInfection::new(spec.cell.as_str(), spec.year, spec.week, spec.level)
            })
            .collect::<SimResult<Vec<_>>>()?;
        Ok(InfectionSeeder::new(infections))
    }

    pub fn build_background(&self, trial: u64) -> SimResult<Background> {
        let mut background = Background::new(self.build_landscape()?, self.build_years(trial)?)?
            .with_strategies(self.build_strategies()?)
            .with_seeder(self.build_seeder()?)
            .keep_dead_animals(self.options.keep_dead_animals);
        if let Some(params) = &self.disease {
            background = background.with_disease(Arc::new(Disease::new(params.clone())?));
        }
        for group in &self.initial_animals {
            let cell = CellId::from(group.cell.as_str());
            for _ in 0..group.females {
                background.spawn_animal(Gender::Female, group.age_weeks, &cell, None)?;
            }
            for _ in 0..group.males {
                background.spawn_animal(Gender::Male, group.age_weeks, &cell, None)?;
            }
        }
        Ok(background)
    }

    pub fn engine_settings(&self, trial: u64) -> EngineSettings {
        EngineSettings {
            scenario_name: self.name.clone(),
            seed: self.seed,
            trial,
            rebuild_interval_years: self.options.rebuild_interval_years,
            scramble_weekly: self.options.scramble_weekly,
            abort_on_disease_disappearance: self.options.abort_on_disease_disappearance,
        }
    }

    pub fn build_trial(&self, trial: u64, sink: Arc<dyn ReportSink>) -> SimResult<Trial> {
        let mut builder = self
            .behaviour
            .install(EngineBuilder::new(self.engine_settings(trial)));
        if self.options.report_interval_weeks > 0 {
            builder.push_system(ReportingSystem::new(sink, self.options.report_interval_weeks));
        }
        if let Some(dir) = &self.options.snapshot_dir {
            if self.options.snapshot_interval_years > 0 {
                builder.push_system(SnapshotSystem::new(
                    JsonSnapshotWriter::new(dir)?,
                    self.options.snapshot_interval_years,
                ));
            }
        }
        Ok(Trial {
            engine: builder.build(),
            background: self.build_background(trial)?,
        })
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            trials: self.trials,
            threads: self.threads,
            progress_interval_weeks: self.options.progress_interval_weeks,
            capture_population: self.options.capture_population,
        }
    }
}

impl TrialFactory for Scenario {
    fn build(&self, trial: u64, sink: Arc<dyn ReportSink>) -> SimResult<Trial> {
        self.build_trial(trial, sink)
    }
}
