//! Spatial model - hexagonal cell graph partitioned into super-cells

mod path;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::animal::AnimalId;
use crate::collection::{IndexedList, Keyed};
use crate::error::{check_percent, SimError, SimResult};

pub use path::PathCalculator;

pub const DEFAULT_SUPER_CELL: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CellId {
    fn from(value: &str) -> Self {
        CellId(value.to_string())
    }
}

impl From<String> for CellId {
    fn from(value: String) -> Self {
        CellId(value)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Keyed for CellId {
    fn key(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuperCellId(String);

impl SuperCellId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SuperCellId {
    fn from(value: &str) -> Self {
        SuperCellId(value.to_string())
    }
}

impl From<String> for SuperCellId {
    fn from(value: String) -> Self {
        SuperCellId(value)
    }
}

impl fmt::Display for SuperCellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Neighbor slots of a flat-topped hexagon, clockwise from the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Top,
    TopRight,
    BottomRight,
    Bottom,
    BottomLeft,
    TopLeft,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::Top,
        Direction::TopRight,
        Direction::BottomRight,
        Direction::Bottom,
        Direction::BottomLeft,
        Direction::TopLeft,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Direction {
        Self::ALL[index % 6]
    }

    /// Rotate clockwise by `steps` slots (negative is counter-clockwise).
    pub fn rotate(self, steps: i32) -> Direction {
        let index = (self.index() as i32 + steps).rem_euclid(6);
        Self::ALL[index as usize]
    }

    pub fn opposite(self) -> Direction {
        self.rotate(3)
    }
}

#[derive(Debug, Clone)]
pub struct Cell {
    id: CellId,
    super_cell: SuperCellId,
    carrying_capacity: f64,
    x: f64,
    y: f64,
    neighbours: [Option<CellId>; 6],
    animals: IndexedList<AnimalId>,
}

impl Cell {
    pub fn new(
        id: impl Into<CellId>,
        super_cell: impl Into<SuperCellId>,
        carrying_capacity: f64,
        x: f64,
        y: f64,
    ) -> SimResult<Self> {
        let id = id.into();
        let super_cell = super_cell.into();
        if id.as_str().is_empty() {
            return Err(SimError::validation("cell id", "must not be empty"));
        }
        if super_cell.as_str().is_empty() {
            return Err(SimError::validation("super cell id", "must not be empty"));
        }
        check_capacity(carrying_capacity)?;
        Ok(Self {
            id,
            super_cell,
            carrying_capacity,
            x,
            y,
            neighbours: Default::default(),
            animals: IndexedList::new(),
        })
    }

    pub fn id(&self) -> &CellId {
        &self.id
    }

    pub fn super_cell(&self) -> &SuperCellId {
        &self.super_cell
    }

    pub(crate) fn set_super_cell(&mut self, super_cell: SuperCellId) {
        self.super_cell = super_cell;
    }

    pub fn carrying_capacity(&self) -> f64 {
        self.carrying_capacity
    }

    pub fn set_carrying_capacity(&mut self, carrying_capacity: f64) -> SimResult<()> {
        self.carrying_capacity = check_capacity(carrying_capacity)?;
        Ok(())
    }

    pub fn location(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn neighbour(&self, direction: Direction) -> Option<&CellId> {
        self.neighbours[direction.index()].as_ref()
    }

    /// `None` marks a boundary.
    pub fn set_neighbour(&mut self, direction: Direction, cell: Option<CellId>) {
        self.neighbours[direction.index()] = cell;
    }

    pub fn neighbours(&self) -> &[Option<CellId>; 6] {
        &self.neighbours
    }

    pub fn animals(&self) -> &IndexedList<AnimalId> {
        &self.animals
    }

    pub(crate) fn animals_mut(&mut self) -> &mut IndexedList<AnimalId> {
        &mut self.animals
    }

    pub fn animal_count(&self) -> usize {
        self.animals.len()
    }
}

impl Keyed for Cell {
    fn key(&self) -> &str {
        self.id.as_str()
    }
}

fn check_capacity(carrying_capacity: f64) -> SimResult<f64> {
    if carrying_capacity.is_finite() && carrying_capacity >= 0.0 {
        Ok(carrying_capacity)
    } else {
        Err(SimError::validation(
            "carrying capacity",
            format!("{carrying_capacity} must be a finite value >= 0"),
        ))
    }
}

/// A named partition of cells with movement resistance at its border.
#[derive(Debug, Clone)]
pub struct SuperCell {
    id: SuperCellId,
    in_resistance: f64,
    out_resistance: f64,
    cells: IndexedList<CellId>,
}

impl SuperCell {
    pub fn new(
        id: impl Into<SuperCellId>,
        in_resistance: f64,
        out_resistance: f64,
    ) -> SimResult<Self> {
        let id = id.into();
        if id.as_str().is_empty() {
            return Err(SimError::validation("super cell id", "must not be empty"));
        }
        Ok(Self {
            id,
            in_resistance: check_percent("in resistance", in_resistance)?,
            out_resistance: check_percent("out resistance", out_resistance)?,
            cells: IndexedList::new(),
        })
    }

    pub fn id(&self) -> &SuperCellId {
        &self.id
    }

    pub fn in_resistance(&self) -> f64 {
        self.in_resistance
    }

    pub fn out_resistance(&self) -> f64 {
        self.out_resistance
    }

    pub fn cells(&self) -> &IndexedList<CellId> {
        &self.cells
    }

    pub fn contains(&self, cell: &CellId) -> bool {
        self.cells.contains_key(cell.as_str())
    }
}

impl Keyed for SuperCell {
    fn key(&self) -> &str {
        self.id.as_str()
    }
}

/// The cell arena plus its super-cell partition.
#[derive(Debug, Clone, Default)]
pub struct Landscape {
    cells: IndexedList<Cell>,
    super_cells: IndexedList<SuperCell>,
}

impl Landscape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a `columns` x `rows` flat-topped hex grid in odd-q layout
    /// (odd columns sit half a cell lower). Every cell gets capacity `k` and
    /// belongs to the [`DEFAULT_SUPER_CELL`] partition.
    pub fn hex_grid(columns: u32, rows: u32, k: f64) -> SimResult<Self> {
        if columns == 0 || rows == 0 {
            return Err(SimError::validation(
                "grid size",
                format!("{columns}x{rows} has no cells"),
            ));
        }
        let mut landscape = Landscape::new();
        landscape.add_super_cell(SuperCell::new(DEFAULT_SUPER_CELL, 0.0, 0.0)?)?;

        let row_height = 3f64.sqrt();
        for col in 0..columns {
            for row in 0..rows {
                let x = f64::from(col) * 1.5;
                let offset = if col % 2 == 1 { row_height / 2.0 } else { 0.0 };
                let y = f64::from(row) * row_height + offset;
                landscape.add_cell(Cell::new(
                    grid_cell_id(col, row),
                    DEFAULT_SUPER_CELL,
                    k,
                    x,
                    y,
                )?)?;
            }
        }

        for col in 0..columns {
            for row in 0..rows {
                let from = grid_cell_id(col, row);
                // Bottom, BottomRight and TopRight cover every edge once.
                for direction in [Direction::Bottom, Direction::BottomRight, Direction::TopRight] {
                    if let Some((c, r)) = hex_step(col, row, direction) {
                        if c < columns && r < rows {
                            landscape.connect(&from, direction, &grid_cell_id(c, r))?;
                        }
                    }
                }
            }
        }
        Ok(landscape)
    }

    pub fn add_super_cell(&mut self, super_cell: SuperCell) -> SimResult<()> {
        if !super_cell.cells.is_empty() {
            return Err(SimError::Consistency(format!(
                "super cell '{}' must be added before its cells",
                super_cell.id
            )));
        }
        self.super_cells.add(super_cell)?;
        Ok(())
    }

    /// Add a cell; its super-cell must already exist and records the
    /// membership.
    pub fn add_cell(&mut self, cell: Cell) -> SimResult<()> {
        let super_cell = self
            .super_cells
            .get_mut(cell.super_cell.as_str())
            .ok_or_else(|| {
                SimError::Consistency(format!(
                    "cell '{}' references unknown super cell '{}'",
                    cell.id, cell.super_cell
                ))
            })?;
        if self.cells.contains_key(cell.id.as_str()) {
            return Err(SimError::DuplicateKey(cell.id.to_string()));
        }
        super_cell.cells.add(cell.id.clone())?;
        self.cells.add(cell)?;
        Ok(())
    }

    /// Move a cell into another super-cell. The super-cells own membership;
    /// the cell's back-reference is updated here and nowhere else.
    pub fn assign_super_cell(&mut self, cell_id: &CellId, target: &SuperCellId) -> SimResult<()> {
        if !self.super_cells.contains_key(target.as_str()) {
            return Err(SimError::MissingKey(target.to_string()));
        }
        let current = self.try_cell(cell_id)?.super_cell.clone();
        if &current == target {
            return Ok(());
        }
        self.super_cells
            .try_get_mut(current.as_str())?
            .cells
            .remove(cell_id.as_str())?;
        self.super_cells
            .try_get_mut(target.as_str())?
            .cells
            .add(cell_id.clone())?;
        self.cells
            .try_get_mut(cell_id.as_str())?
            .set_super_cell(target.clone());
        Ok(())
    }

    /// Make `b` the `direction` neighbor of `a` and `a` the opposite
    /// neighbor of `b`.
    pub fn connect(&mut self, a: &CellId, direction: Direction, b: &CellId) -> SimResult<()> {
        if !self.cells.contains_key(b.as_str()) {
            return Err(SimError::MissingKey(b.to_string()));
        }
        self.cells
            .try_get_mut(a.as_str())?
            .set_neighbour(direction, Some(b.clone()));
        self.cells
            .try_get_mut(b.as_str())?
            .set_neighbour(direction.opposite(), Some(a.clone()));
        Ok(())
    }

    pub fn cell(&self, id: &CellId) -> Option<&Cell> {
        self.cells.get(id.as_str())
    }

    pub fn cell_mut(&mut self, id: &CellId) -> Option<&mut Cell> {
        self.cells.get_mut(id.as_str())
    }

    pub fn try_cell(&self, id: &CellId) -> SimResult<&Cell> {
        self.cells.try_get(id.as_str())
    }

    pub fn try_cell_mut(&mut self, id: &CellId) -> SimResult<&mut Cell> {
        self.cells.try_get_mut(id.as_str())
    }

    pub fn cells(&self) -> &IndexedList<Cell> {
        &self.cells
    }

    pub fn super_cell(&self, id: &SuperCellId) -> Option<&SuperCell> {
        self.super_cells.get(id.as_str())
    }

    pub fn super_cells(&self) -> &IndexedList<SuperCell> {
        &self.super_cells
    }

    pub fn super_cell_of(&self, cell: &CellId) -> SimResult<&SuperCell> {
        let owner = self.try_cell(cell)?.super_cell();
        self.super_cells.try_get(owner.as_str())
    }

    pub fn total_animals(&self) -> usize {
        self.cells.iter().map(Cell::animal_count).sum()
    }

    /// Check cross references: membership both ways and neighbor targets.
    pub fn validate(&self) -> SimResult<()> {
        for cell in &self.cells {
            let owner = self.super_cells.get(cell.super_cell.as_str()).ok_or_else(|| {
                SimError::Consistency(format!(
                    "cell '{}' references unknown super cell '{}'",
                    cell.id, cell.super_cell
                ))
            })?;
            if !owner.contains(&cell.id) {
                return Err(SimError::Consistency(format!(
                    "super cell '{}' does not list cell '{}'",
                    owner.id, cell.id
                )));
            }
            for neighbour in cell.neighbours.iter().flatten() {
                if !self.cells.contains_key(neighbour.as_str()) {
                    return Err(SimError::Consistency(format!(
                        "cell '{}' has unknown neighbour '{}'",
                        cell.id, neighbour
                    )));
                }
            }
        }
        for super_cell in &self.super_cells {
            for member in &super_cell.cells {
                let cell = self.try_cell(member)?;
                if cell.super_cell != super_cell.id {
                    return Err(SimError::Consistency(format!(
                        "cell '{}' is listed by '{}' but belongs to '{}'",
                        member, super_cell.id, cell.super_cell
                    )));
                }
            }
        }
        Ok(())
    }
}

pub fn grid_cell_id(col: u32, row: u32) -> CellId {
    CellId(format!("c{col}r{row}"))
}

/// Grid coordinates one step away in odd-q layout; `None` when the step
/// leaves the non-negative quadrant.
fn hex_step(col: u32, row: u32, direction: Direction) -> Option<(u32, u32)> {
    let (col, row) = (i64::from(col), i64::from(row));
    let odd = col % 2 == 1;
    let (dc, dr) = match direction {
        Direction::Top => (0, -1),
        Direction::Bottom => (0, 1),
        Direction::TopRight => (1, if odd { 0 } else { -1 }),
        Direction::BottomRight => (1, if odd { 1 } else { 0 }),
        Direction::TopLeft => (-1, if odd { 0 } else { -1 }),
        Direction::BottomLeft => (-1, if odd { 1 } else { 0 }),
    };
    let (c, r) = (col + dc, row + dr);
    if c < 0 || r < 0 {
        None
    } else {
        Some((c as u32, r as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_rotation() {
        assert_eq!(Direction::Top.rotate(-1), Direction::TopLeft);
        assert_eq!(Direction::TopLeft.rotate(1), Direction::Top);
        assert_eq!(Direction::Bottom.rotate(7), Direction::BottomLeft);
        for direction in Direction::ALL {
            assert_eq!(direction.opposite().opposite(), direction);
        }
        assert_eq!(Direction::TopRight.opposite(), Direction::BottomLeft);
    }

    #[test]
    fn test_cell_validation() {
        assert!(Cell::new("a", "s", -1.0, 0.0, 0.0).is_err());
        assert!(Cell::new("a", "s", f64::NAN, 0.0, 0.0).is_err());
        assert!(Cell::new("", "s", 1.0, 0.0, 0.0).is_err());
        let cell = Cell::new("a", "s", 0.0, 0.0, 0.0).unwrap();
        assert_eq!(cell.neighbours().len(), 6);
        assert!(cell.neighbours().iter().all(Option::is_none));
    }

    #[test]
    fn test_super_cell_resistance_validation() {
        assert!(SuperCell::new("s", -0.5, 0.0).is_err());
        assert!(SuperCell::new("s", 0.0, 100.5).is_err());
        assert!(SuperCell::new("s", 100.0, 0.0).is_ok());
    }

    #[test]
    fn test_hex_grid_neighbours() {
        let grid = Landscape::hex_grid(3, 3, 10.0).unwrap();
        assert_eq!(grid.cells().len(), 9);
        grid.validate().unwrap();

        // Centre of a 3x3 odd-q grid touches every other cell but the
        // two corners above it on the left and right.
        let centre = grid.cell(&grid_cell_id(1, 1)).unwrap();
        assert!(centre.neighbours().iter().all(Option::is_some));
        assert_eq!(centre.neighbour(Direction::Top), Some(&grid_cell_id(1, 0)));
        assert_eq!(
            centre.neighbour(Direction::TopRight),
            Some(&grid_cell_id(2, 1))
        );
        assert_eq!(
            centre.neighbour(Direction::BottomLeft),
            Some(&grid_cell_id(0, 2))
        );

        let corner = grid.cell(&grid_cell_id(0, 0)).unwrap();
        assert_eq!(corner.neighbour(Direction::Top), None);
        assert_eq!(corner.neighbour(Direction::TopLeft), None);
        assert_eq!(corner.neighbour(Direction::BottomLeft), None);
        assert_eq!(
            corner.neighbour(Direction::BottomRight),
            Some(&grid_cell_id(1, 0))
        );
    }

    #[test]
    fn test_hex_grid_links_are_symmetric() {
        let grid = Landscape::hex_grid(5, 4, 1.0).unwrap();
        for cell in grid.cells() {
            for direction in Direction::ALL {
                if let Some(other) = cell.neighbour(direction) {
                    let back = grid.cell(other).unwrap().neighbour(direction.opposite());
                    assert_eq!(back, Some(cell.id()));
                }
            }
        }
    }

    #[test]
    fn test_assign_super_cell_moves_membership() {
        let mut grid = Landscape::hex_grid(2, 2, 1.0).unwrap();
        grid.add_super_cell(SuperCell::new("river", 50.0, 50.0).unwrap())
            .unwrap();
        let id = grid_cell_id(0, 0);
        grid.assign_super_cell(&id, &SuperCellId::from("river"))
            .unwrap();

        assert_eq!(grid.cell(&id).unwrap().super_cell().as_str(), "river");
        assert!(grid
            .super_cell(&SuperCellId::from("river"))
            .unwrap()
            .contains(&id));
        assert!(!grid
            .super_cell(&SuperCellId::from(DEFAULT_SUPER_CELL))
            .unwrap()
            .contains(&id));
        grid.validate().unwrap();

        assert!(grid
            .assign_super_cell(&id, &SuperCellId::from("nowhere"))
            .is_err());
    }

    #[test]
    fn test_cell_with_unknown_super_cell_rejected() {
        let mut landscape = Landscape::new();
        let cell = Cell::new("a", "missing", 1.0, 0.0, 0.0).unwrap();
        assert!(matches!(
            landscape.add_cell(cell),
            Err(SimError::Consistency(_))
        ));
    }
}
