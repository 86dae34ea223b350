use std::fmt;

use serde::{Deserialize, Serialize};
use surfkin_core::errors::{ErrorInfo, KinError};

/// Index of one generated point.
///
/// Zip enumerations use a flat position, mesh-grid enumerations use one
/// position per literal parameter in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GridIndex {
    /// Position within a zipped sequence.
    Flat(usize),
    /// Per-dimension positions within a mesh grid.
    Grid(Vec<usize>),
}

impl GridIndex {
    /// Positions as a slice-like vector (a flat index is a 1-tuple).
    pub fn positions(&self) -> Vec<usize> {
        match self {
            GridIndex::Flat(idx) => vec![*idx],
            GridIndex::Grid(positions) => positions.clone(),
        }
    }

    /// Row-major offset of the index within a grid of the given shape.
    pub fn row_major_offset(&self, shape: &[usize]) -> Option<usize> {
        let positions = self.positions();
        if positions.len() != shape.len() {
            return None;
        }
        let mut offset = 0usize;
        for (pos, dim) in positions.iter().zip(shape) {
            if pos >= dim {
                return None;
            }
            offset = offset * dim + pos;
        }
        Some(offset)
    }
}

impl fmt::Display for GridIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridIndex::Flat(idx) => write!(f, "{idx}"),
            GridIndex::Grid(positions) => {
                let parts: Vec<String> = positions.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", parts.join(","))
            }
        }
    }
}

/// One enumerated point: its index plus the value position to take from
/// each literal parameter (declaration order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratedPoint {
    /// Index reported to consumers.
    pub index: GridIndex,
    /// Position into each literal parameter's value list.
    pub positions: Vec<usize>,
}

/// Capability shared by all combination strategies: given the lengths of the
/// bound literal parameters, produce the enumeration order.
pub trait Enumeration: Send + Sync {
    /// Short label recorded in reports.
    fn label(&self) -> &'static str;

    /// Ordered list of points to generate.
    fn enumerate(&self, lengths: &[usize]) -> Result<Vec<EnumeratedPoint>, KinError>;

    /// Shape of the resulting index space.
    fn shape(&self, lengths: &[usize]) -> Vec<usize>;
}

/// Positional zip: every literal parameter must have the same length.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zip;

impl Enumeration for Zip {
    fn label(&self) -> &'static str {
        "zip"
    }

    fn enumerate(&self, lengths: &[usize]) -> Result<Vec<EnumeratedPoint>, KinError> {
        let Some(&first) = lengths.first() else {
            return Ok(Vec::new());
        };
        if let Some(&other) = lengths.iter().find(|&&len| len != first) {
            return Err(KinError::ParameterDependency(
                ErrorInfo::new(
                    "param-length-mismatch",
                    "zip generation requires literal parameters of equal length",
                )
                .with_context("expected", first.to_string())
                .with_context("found", other.to_string()),
            ));
        }
        Ok((0..first)
            .map(|idx| EnumeratedPoint {
                index: GridIndex::Flat(idx),
                positions: vec![idx; lengths.len()],
            })
            .collect())
    }

    fn shape(&self, lengths: &[usize]) -> Vec<usize> {
        lengths.first().map(|&len| vec![len]).unwrap_or_default()
    }
}

/// Full Cartesian product, first declared parameter outermost.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshGrid;

impl Enumeration for MeshGrid {
    fn label(&self) -> &'static str {
        "mesh-grid"
    }

    fn enumerate(&self, lengths: &[usize]) -> Result<Vec<EnumeratedPoint>, KinError> {
        if lengths.is_empty() || lengths.contains(&0) {
            return Ok(Vec::new());
        }
        let total: usize = lengths.iter().product();
        let mut points = Vec::with_capacity(total);
        let mut current = vec![0usize; lengths.len()];
        for _ in 0..total {
            points.push(EnumeratedPoint {
                index: GridIndex::Grid(current.clone()),
                positions: current.clone(),
            });
            // odometer, last dimension fastest
            for dim in (0..lengths.len()).rev() {
                current[dim] += 1;
                if current[dim] < lengths[dim] {
                    break;
                }
                current[dim] = 0;
            }
        }
        Ok(points)
    }

    fn shape(&self, lengths: &[usize]) -> Vec<usize> {
        lengths.to_vec()
    }
}

/// Serializable selector for the built-in strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Positional zip (default).
    #[default]
    Zip,
    /// Cartesian mesh grid.
    MeshGrid,
}

impl Strategy {
    /// Enumeration implementing the strategy.
    pub fn enumeration(&self) -> &'static dyn Enumeration {
        match self {
            Strategy::Zip => &Zip,
            Strategy::MeshGrid => &MeshGrid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_rejects_mismatched_lengths() {
        let err = Zip.enumerate(&[3, 2]).unwrap_err();
        assert_eq!(err.info().code, "param-length-mismatch");
    }

    #[test]
    fn mesh_grid_is_row_major() {
        let points = MeshGrid.enumerate(&[2, 3]).unwrap();
        let order: Vec<Vec<usize>> = points.into_iter().map(|p| p.positions).collect();
        assert_eq!(
            order,
            vec![
                vec![0, 0],
                vec![0, 1],
                vec![0, 2],
                vec![1, 0],
                vec![1, 1],
                vec![1, 2]
            ]
        );
    }

    #[test]
    fn row_major_offset_matches_enumeration_order() {
        let shape = [3, 2, 2];
        let points = MeshGrid.enumerate(&shape).unwrap();
        for (expected, point) in points.iter().enumerate() {
            assert_eq!(point.index.row_major_offset(&shape), Some(expected));
        }
        assert_eq!(GridIndex::Grid(vec![3, 0, 0]).row_major_offset(&shape), None);
    }
}
