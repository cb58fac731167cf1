//! Periodic population snapshots

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::animal::Gender;
use crate::background::{Background, Census};
use crate::engine::{Phase, System, SystemContext};
use crate::error::SimResult;
use crate::rng::SimRng;
use crate::time::{SimTime, WinterType, WEEKS_PER_YEAR};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub id: String,
    pub super_cell: String,
    pub carrying_capacity: f64,
    pub animals: usize,
    pub infected: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimalSnapshot {
    pub id: String,
    pub gender: Gender,
    pub age_weeks: u32,
    pub cell: String,
    pub infected: bool,
}

/// The state of one trial at the end of a simulated year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationSnapshot {
    pub scenario: String,
    pub trial: u64,
    pub time: SimTime,
    pub winter: WinterType,
    pub timestamp: String,
    pub census: Census,
    pub cells: Vec<CellSnapshot>,
    pub animals: Vec<AnimalSnapshot>,
}

impl PopulationSnapshot {
    pub fn capture(background: &Background, scenario: &str, trial: u64) -> Self {
        let now = background.now();
        let infected = |id: &str| {
            background
                .animals()
                .get(id)
                .is_some_and(|a| a.has_ongoing_infection(now))
        };
        let cells = background
            .landscape()
            .cells()
            .iter()
            .map(|cell| CellSnapshot {
                id: cell.id().to_string(),
                super_cell: cell.super_cell().to_string(),
                carrying_capacity: cell.carrying_capacity(),
                animals: cell.animal_count(),
                infected: cell.animals().keys().filter(|&id| infected(id)).count(),
            })
            .collect();
        let animals = background
            .animals()
            .iter()
            .map(|animal| AnimalSnapshot {
                id: animal.id().to_string(),
                gender: animal.gender(),
                age_weeks: animal.age_weeks(),
                cell: animal.cell().to_string(),
                infected: animal.has_ongoing_infection(now),
            })
            .collect();
        Self {
            scenario: scenario.to_string(),
            trial,
            time: now,
            winter: background.years().current_year().winter(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            census: background.census(),
            cells,
            animals,
        }
    }
}

/// Destination for snapshots.
pub trait SnapshotExporter: Send {
    fn export(&mut self, snapshot: &PopulationSnapshot) -> SimResult<()>;
}

/// Writes `trial_{k:03}/year_{y:04}.json` under an output directory.
pub struct JsonSnapshotWriter {
    output_dir: PathBuf,
}

impl JsonSnapshotWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> SimResult<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    pub fn path_for(&self, trial: u64, year: i32) -> PathBuf {
        self.output_dir
            .join(format!("trial_{trial:03}"))
            .join(format!("year_{year:04}.json"))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> SimResult<PopulationSnapshot> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Snapshot files written for `trial`, oldest year first.
    pub fn list(&self, trial: u64) -> SimResult<Vec<PathBuf>> {
        let dir = self.output_dir.join(format!("trial_{trial:03}"));
        let mut snapshots = Vec::new();
        if !dir.exists() {
            return Ok(snapshots);
        }
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_snapshot = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("year_") && name.ends_with(".json"));
            if is_snapshot {
                snapshots.push(path);
            }
        }
        snapshots.sort();
        Ok(snapshots)
    }
}

impl SnapshotExporter for JsonSnapshotWriter {
    fn export(&mut self, snapshot: &PopulationSnapshot) -> SimResult<()> {
        let path = self.path_for(snapshot.trial, snapshot.time.year);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, snapshot)?;
        writer.flush()?;
        info!(path = %path.display(), live = snapshot.census.live, "snapshot written");
        Ok(())
    }
}

/// Exports a snapshot at the end of every `interval_years`-th year.
pub struct SnapshotSystem {
    exporter: Box<dyn SnapshotExporter>,
    interval_years: u32,
}

impl SnapshotSystem {
    pub fn new(exporter: impl SnapshotExporter + 'static, interval_years: u32) -> Self {
        Self {
            exporter: Box::new(exporter),
            interval_years,
        }
    }

    fn should_snapshot(&self, week: u32, year_index: usize) -> bool {
        self.interval_years > 0
            && week == WEEKS_PER_YEAR
            && (year_index + 1) % self.interval_years as usize == 0
    }
}

impl System for SnapshotSystem {
    fn name(&self) -> &str {
        "snapshot"
    }

    fn phase(&self) -> Phase {
        Phase::AfterRemovingDead
    }

    fn run(
        &mut self,
        ctx: &SystemContext,
        background: &mut Background,
        _rng: &mut SimRng,
    ) -> SimResult<()> {
        if !self.should_snapshot(ctx.now.week, background.years().current_year_num()) {
            return Ok(());
        }
        let snapshot = PopulationSnapshot::capture(background, ctx.scenario_name, ctx.trial);
        self.exporter.export(&snapshot)
    }
}
