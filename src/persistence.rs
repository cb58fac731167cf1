//! Storage of landscapes, calendars and populations.
//!
//! [`Datastore`] is the narrow contract the engine needs; [`JsonDatastore`]
//! keeps everything in one JSON document.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::animal::{Animal, AnimalId, Gender};
use crate::background::Background;
use crate::collection::IndexedList;
use crate::disease::{Disease, Infection, NaturalImmunity};
use crate::error::{SimError, SimResult};
use crate::spatial::{Cell, CellId, Direction, Landscape, SuperCell};
use crate::time::{SimTime, WinterType, Year, YearList};

/// Describes the run that produced a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub scenario: String,
    pub seed: u64,
    pub trial: u64,
    pub written_at: DateTime<Utc>,
    pub crate_version: String,
    #[serde(default)]
    pub notes: BTreeMap<String, String>,
}

impl RunMetadata {
    pub fn new(scenario: impl Into<String>, seed: u64, trial: u64) -> Self {
        Self {
            scenario: scenario.into(),
            seed,
            trial,
            written_at: Utc::now(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            notes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperCellRecord {
    pub id: String,
    pub in_resistance: f64,
    pub out_resistance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub id: String,
    pub super_cell: String,
    pub carrying_capacity: f64,
    pub x: f64,
    pub y: f64,
    /// Neighbour IDs, top first, clockwise.
    pub neighbours: [Option<String>; 6],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandscapeRecord {
    pub super_cells: Vec<SuperCellRecord>,
    pub cells: Vec<CellRecord>,
}

impl LandscapeRecord {
    pub fn capture(landscape: &Landscape) -> Self {
        let super_cells = landscape
            .super_cells()
            .iter()
            .map(|s| SuperCellRecord {
                id: s.id().to_string(),
                in_resistance: s.in_resistance(),
                out_resistance: s.out_resistance(),
            })
            .collect();
        let cells = landscape
            .cells()
            .iter()
            .map(|cell| {
                let (x, y) = cell.location();
                CellRecord {
                    id: cell.id().to_string(),
                    super_cell: cell.super_cell().to_string(),
                    carrying_capacity: cell.carrying_capacity(),
                    x,
                    y,
                    neighbours: cell
                        .neighbours()
                        .clone()
                        .map(|n| n.map(|id| id.as_str().to_string())),
                }
            })
            .collect();
        Self { super_cells, cells }
    }

    pub fn restore(&self) -> SimResult<Landscape> {
        let mut landscape = Landscape::new();
        for record in &self.super_cells {
            landscape.add_super_cell(SuperCell::new(
                record.id.as_str(),
                record.in_resistance,
                record.out_resistance,
            )?)?;
        }
        for record in &self.cells {
            landscape.add_cell(Cell::new(
                record.id.as_str(),
                record.super_cell.as_str(),
                record.carrying_capacity,
                record.x,
                record.y,
            )?)?;
        }
        for record in &self.cells {
            let cell = landscape.try_cell_mut(&CellId::from(record.id.as_str()))?;
            for (slot, neighbour) in record.neighbours.iter().enumerate() {
                cell.set_neighbour(
                    Direction::from_index(slot),
                    neighbour.as_deref().map(CellId::from),
                );
            }
        }
        landscape.validate()?;
        Ok(landscape)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRecord {
    pub id: i32,
    pub winter: WinterType,
    pub current_week: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearsRecord {
    pub years: Vec<YearRecord>,
    pub current: usize,
}

impl YearsRecord {
    pub fn capture(years: &YearList) -> Self {
        Self {
            years: years
                .iter()
                .map(|y| YearRecord {
                    id: y.id(),
                    winter: y.winter(),
                    current_week: y.current_week(),
                })
                .collect(),
            current: years.current_year_num(),
        }
    }

    pub fn restore(&self) -> SimResult<YearList> {
        let years = self
            .years
            .iter()
            .map(|y| Year::at_week(y.id, y.winter, y.current_week))
            .collect::<SimResult<Vec<_>>>()?;
        YearList::restore(years, self.current)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfectionRecord {
    pub disease: String,
    pub onset: SimTime,
    pub incubation_period: u32,
    pub infectious_period: u32,
    pub is_fatal: bool,
    #[serde(default)]
    pub infecting_animal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimalRecord {
    pub id: String,
    pub list_index: usize,
    pub gender: Gender,
    pub age_weeks: u32,
    pub cell: String,
    #[serde(default)]
    pub mother: Option<String>,
    pub alive: bool,
    #[serde(default)]
    pub no_birth_weeks: u32,
    #[serde(default)]
    pub natural_immunity: BTreeMap<String, NaturalImmunity>,
    #[serde(default)]
    pub vaccine_expiry: BTreeMap<String, i64>,
    #[serde(default)]
    pub infections: Vec<InfectionRecord>,
}

impl AnimalRecord {
    pub fn capture(animal: &Animal, list_index: usize) -> Self {
        Self {
            id: animal.id().to_string(),
            list_index,
            gender: animal.gender(),
            age_weeks: animal.age_weeks(),
            cell: animal.cell().to_string(),
            mother: animal.mother().map(|m| m.to_string()),
            alive: animal.is_alive(),
            no_birth_weeks: animal.no_birth_weeks(),
            natural_immunity: animal.natural_immunity_map().clone(),
            vaccine_expiry: animal.vaccine_expiry_map().clone(),
            infections: animal
                .infections()
                .iter()
                .map(|i| InfectionRecord {
                    disease: i.disease().name().to_string(),
                    onset: i.onset(),
                    incubation_period: i.incubation_period(),
                    infectious_period: i.infectious_period(),
                    is_fatal: i.is_fatal(),
                    infecting_animal: i.infecting_animal().map(|a| a.to_string()),
                })
                .collect(),
        }
    }

    /// Rebuild the animal. Infections must name `disease`.
    pub fn restore(&self, disease: Option<&Arc<Disease>>) -> SimResult<Animal> {
        let mut animal = Animal::new(
            self.id.as_str(),
            self.gender,
            self.age_weeks,
            self.cell.as_str(),
        )?;
        if let Some(mother) = &self.mother {
            animal = animal.with_mother(AnimalId::from(mother.as_str()));
        }
        animal.restore_state(
            self.alive,
            self.no_birth_weeks,
            self.natural_immunity.clone(),
            self.vaccine_expiry.clone(),
        );
        for record in &self.infections {
            let disease = disease
                .filter(|d| d.name() == record.disease)
                .ok_or_else(|| {
                    SimError::Consistency(format!(
                        "animal '{}' carries unknown disease '{}'",
                        self.id, record.disease
                    ))
                })?;
            let onset = SimTime::new(record.onset.year, record.onset.week)?;
            animal.add_infection(Infection::with_periods(
                Arc::clone(disease),
                onset,
                record.incubation_period,
                record.infectious_period,
                record.is_fatal,
                record.infecting_animal.as_deref().map(AnimalId::from),
            )?);
        }
        animal.set_list_index(self.list_index);
        Ok(animal)
    }
}

/// Rebuild an animal list in the positions the records were written from.
pub fn restore_animals(
    records: &[AnimalRecord],
    disease: Option<&Arc<Disease>>,
) -> SimResult<IndexedList<Animal>> {
    let mut ordered: Vec<&AnimalRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.list_index);
    let mut animals = IndexedList::with_capacity(ordered.len());
    for (expected, record) in ordered.into_iter().enumerate() {
        if record.list_index != expected {
            return Err(SimError::Consistency(format!(
                "animal '{}' has list index {} where {} was expected",
                record.id, record.list_index, expected
            )));
        }
        animals.add(record.restore(disease)?)?;
    }
    Ok(animals)
}

/// Persistence contract for a single trial's state.
pub trait Datastore {
    fn load_landscape(&self) -> SimResult<Landscape>;

    fn load_years_and_animals(
        &self,
        disease: Option<&Arc<Disease>>,
    ) -> SimResult<(YearList, IndexedList<Animal>)>;

    fn write_landscape(&mut self, landscape: &Landscape) -> SimResult<()>;

    fn write_years_and_animals(
        &mut self,
        years: &YearList,
        animals: &IndexedList<Animal>,
    ) -> SimResult<()>;

    fn metadata(&self) -> SimResult<Option<RunMetadata>>;

    fn write_metadata(&mut self, metadata: &RunMetadata) -> SimResult<()>;

    /// Load everything into a ready-to-run background.
    fn load_background(&self, disease: Option<Arc<Disease>>) -> SimResult<Background> {
        let landscape = self.load_landscape()?;
        let (years, animals) = self.load_years_and_animals(disease.as_ref())?;
        let mut background = Background::new(landscape, years)?;
        if let Some(disease) = disease {
            background = background.with_disease(disease);
        }
        for animal in animals.iter() {
            background.add_animal(animal.clone())?;
        }
        Ok(background)
    }

    /// Write a background's landscape, calendar and live animals.
    fn write_background(&mut self, background: &Background) -> SimResult<()> {
        self.write_landscape(background.landscape())?;
        self.write_years_and_animals(background.years(), background.animals())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    metadata: Option<RunMetadata>,
    #[serde(default)]
    landscape: Option<LandscapeRecord>,
    #[serde(default)]
    years: Option<YearsRecord>,
    #[serde(default)]
    animals: Vec<AnimalRecord>,
}

/// A datastore backed by one JSON file.
pub struct JsonDatastore {
    path: PathBuf,
}

impl JsonDatastore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> SimResult<StoreDocument> {
        if !self.path.exists() {
            return Ok(StoreDocument::default());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    fn update(&self, change: impl FnOnce(&mut StoreDocument)) -> SimResult<()> {
        let mut document = self.read()?;
        change(&mut document);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(&mut writer, &document)?;
        writer.flush()?;
        debug!(path = %self.path.display(), "datastore written");
        Ok(())
    }
}

impl Datastore for JsonDatastore {
    fn load_landscape(&self) -> SimResult<Landscape> {
        self.read()?
            .landscape
            .ok_or_else(|| SimError::MissingKey("landscape".into()))?
            .restore()
    }

    fn load_years_and_animals(
        &self,
        disease: Option<&Arc<Disease>>,
    ) -> SimResult<(YearList, IndexedList<Animal>)> {
        let document = self.read()?;
        let years = document
            .years
            .ok_or_else(|| SimError::MissingKey("years".into()))?
            .restore()?;
        let animals = restore_animals(&document.animals, disease)?;
        Ok((years, animals))
    }

    fn write_landscape(&mut self, landscape: &Landscape) -> SimResult<()> {
        let record = LandscapeRecord::capture(landscape);
        self.update(|document| document.landscape = Some(record))
    }

    fn write_years_and_animals(
        &mut self,
        years: &YearList,
        animals: &IndexedList<Animal>,
    ) -> SimResult<()> {
        let years = YearsRecord::capture(years);
        let animals: Vec<AnimalRecord> = animals
            .iter()
            .enumerate()
            .map(|(index, animal)| AnimalRecord::capture(animal, index))
            .collect();
        self.update(|document| {
            document.years = Some(years);
            document.animals = animals;
        })
    }

    fn metadata(&self) -> SimResult<Option<RunMetadata>> {
        Ok(self.read()?.metadata)
    }

    fn write_metadata(&mut self, metadata: &RunMetadata) -> SimResult<()> {
        let metadata = metadata.clone();
        self.update(|document| document.metadata = Some(metadata))
    }
}
