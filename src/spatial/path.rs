use crate::error::SimResult;
use crate::rng::SimRng;

use super::{CellId, Direction, Landscape};

/// Biased random walk over the cell graph.
pub struct PathCalculator<'a> {
    landscape: &'a Landscape,
}

impl<'a> PathCalculator<'a> {
    pub fn new(landscape: &'a Landscape) -> Self {
        Self { landscape }
    }

    /// Walk up to `length` steps from `start`, returning the cells entered
    /// (the start cell excluded).
    ///
    /// Each step turns one slot counter-clockwise from `bias` on a draw of
    /// 1-20, keeps `bias` on 21-80 and turns clockwise on 81-100. The walk
    /// stops early at a boundary, or when crossing into another super-cell
    /// is blocked by the current super-cell's out-resistance or the target's
    /// in-resistance. A short path is a normal result.
    pub fn calculate_path(
        &self,
        start: &CellId,
        length: usize,
        bias: Direction,
        rng: &mut SimRng,
    ) -> SimResult<Vec<CellId>> {
        let mut path = Vec::with_capacity(length);
        let mut current = self.landscape.try_cell(start)?;

        for _ in 0..length {
            let draw = rng.percent();
            let direction = if draw <= 20 {
                bias.rotate(-1)
            } else if draw <= 80 {
                bias
            } else {
                bias.rotate(1)
            };

            let next_id = match current.neighbour(direction) {
                Some(id) => id,
                None => break,
            };
            let next = self.landscape.try_cell(next_id)?;

            if next.super_cell() != current.super_cell() {
                let leaving = self.landscape.super_cell_of(current.id())?;
                if rng.percent_at_most(leaving.out_resistance()) {
                    break;
                }
                let entering = self.landscape.super_cell_of(next.id())?;
                if rng.percent_at_most(entering.in_resistance()) {
                    break;
                }
            }

            path.push(next.id().clone());
            current = next;
        }
        Ok(path)
    }
}
