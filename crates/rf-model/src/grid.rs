//! Grid topology and the discrete operators built from it.
//!
//! The grid is a flat cell list with interior connections; the gradient,
//! divergence and connection-average operators are dense matrices applied to
//! AD values during flux assembly.

use crate::error::{ModelError, ModelResult};
use nalgebra::{DMatrix, DVector};
use rf_core::Real;

/// One interior connection between two cells.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Connection {
    pub first: usize,
    pub second: usize,
    /// Transmissibility of the face between the two cells
    pub trans: Real,
}

/// Static grid data for a run: depths, pore volumes and connectivity.
#[derive(Clone, Debug)]
pub struct Grid {
    depth: Vec<Real>,
    pore_volume: Vec<Real>,
    connections: Vec<Connection>,
}

impl Grid {
    pub fn new(
        depth: Vec<Real>,
        pore_volume: Vec<Real>,
        connections: Vec<Connection>,
    ) -> ModelResult<Self> {
        if depth.len() != pore_volume.len() {
            return Err(ModelError::Config {
                what: "depth and pore volume lengths differ".to_string(),
            });
        }
        if pore_volume.iter().any(|&pv| pv <= 0.0 || !pv.is_finite()) {
            return Err(ModelError::Config {
                what: "pore volumes must be positive and finite".to_string(),
            });
        }
        let nc = depth.len();
        for c in &connections {
            if c.first >= nc || c.second >= nc || c.first == c.second {
                return Err(ModelError::Config {
                    what: format!("bad connection {} - {}", c.first, c.second),
                });
            }
        }
        Ok(Self {
            depth,
            pore_volume,
            connections,
        })
    }

    /// A vertical column of equally sized cells, cell 0 on top.
    pub fn column(num_cells: usize, dz: Real, pore_volume: Real, trans: Real) -> ModelResult<Self> {
        let depth = (0..num_cells).map(|i| (i as Real + 0.5) * dz).collect();
        let connections = (1..num_cells)
            .map(|i| Connection {
                first: i - 1,
                second: i,
                trans,
            })
            .collect();
        Self::new(depth, vec![pore_volume; num_cells], connections)
    }

    pub fn num_cells(&self) -> usize {
        self.depth.len()
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn depth(&self) -> &[Real] {
        &self.depth
    }

    pub fn pore_volume(&self) -> &[Real] {
        &self.pore_volume
    }

    /// Per-connection transmissibilities.
    pub fn trans(&self) -> DVector<Real> {
        DVector::from_iterator(self.connections.len(), self.connections.iter().map(|c| c.trans))
    }

    /// Two-point gradient: maps cell values to `x[first] - x[second]` per
    /// connection.
    pub fn grad_matrix(&self) -> DMatrix<Real> {
        let mut m = DMatrix::zeros(self.connections.len(), self.num_cells());
        for (j, c) in self.connections.iter().enumerate() {
            m[(j, c.first)] = 1.0;
            m[(j, c.second)] = -1.0;
        }
        m
    }

    /// Discrete divergence: adjoint of the gradient, so a positive
    /// connection flux leaves `first` and enters `second`.
    pub fn div_matrix(&self) -> DMatrix<Real> {
        self.grad_matrix().transpose()
    }

    /// Arithmetic average onto connections.
    pub fn caver_matrix(&self) -> DMatrix<Real> {
        let mut m = DMatrix::zeros(self.connections.len(), self.num_cells());
        for (j, c) in self.connections.iter().enumerate() {
            m[(j, c.first)] = 0.5;
            m[(j, c.second)] = 0.5;
        }
        m
    }

    /// Upstream selection per connection given the phase head `dh`: the
    /// upstream cell is `first` when the head is non-negative.
    pub fn upwind_matrix(&self, dh: &DVector<Real>) -> DMatrix<Real> {
        debug_assert_eq!(dh.len(), self.connections.len());
        let mut m = DMatrix::zeros(self.connections.len(), self.num_cells());
        for (j, c) in self.connections.iter().enumerate() {
            let up = if dh[j] >= 0.0 { c.first } else { c.second };
            m[(j, up)] = 1.0;
        }
        m
    }

    /// Gradient of cell depths, per connection.
    pub fn depth_gradient(&self) -> DVector<Real> {
        let depth = DVector::from_column_slice(&self.depth);
        self.grad_matrix() * depth
    }
}
