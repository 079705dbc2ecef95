//! Symbolic Jacobian of the abundance and energy equations.
//!
//! Rows are dY_i/dt followed by the energy generation rate; columns are
//! Y_j followed by the temperature. Screening factors are treated as
//! functions of temperature only.

use crate::equation_engine::{EquationSystem, Expr, Variable};
use crate::error::EvalError;
use crate::rhs::RhsSystem;
use crate::traits::Environment;
use nalgebra::DMatrix;
use nalgebra_sparse::{coo::CooMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JacobianSystem {
    dim: usize,
    /// Row-major, `dim * dim` entries.
    entries: Vec<Expr>,
}

pub struct JacobianBuilder;

impl JacobianBuilder {
    pub fn derive(rhs: &RhsSystem) -> JacobianSystem {
        let n = rhs.len();
        let columns: Vec<Variable> = (0..n)
            .map(Variable::Abundance)
            .chain(std::iter::once(Variable::Temperature))
            .collect();
        let entries: Vec<Expr> = rhs
            .expressions()
            .flat_map(|row| columns.iter().map(move |&wrt| row.diff(wrt)))
            .collect();
        let jacobian = JacobianSystem { dim: n + 1, entries };
        log::debug!(
            "derived {0}x{0} jacobian with {1} nonzero entries",
            jacobian.dim,
            jacobian.sparsity().len()
        );
        jacobian
    }
}

impl JacobianSystem {
    /// Number of rows and columns: species plus one.
    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn entry(&self, row: usize, column: usize) -> &Expr {
        &self.entries[row * self.dim + column]
    }

    pub fn entries(&self) -> &[Expr] {
        &self.entries
    }

    pub fn row(&self, row: usize) -> &[Expr] {
        &self.entries[row * self.dim..(row + 1) * self.dim]
    }

    /// Positions of the entries that are not identically zero.
    pub fn sparsity(&self) -> Vec<(usize, usize)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_zero())
            .map(|(k, _)| (k / self.dim, k % self.dim))
            .collect()
    }

    pub fn compile(&self) -> EquationSystem {
        EquationSystem::new(&self.entries)
    }

    pub fn evaluate<E: Environment + ?Sized>(&self, env: &E) -> Result<Vec<f64>, EvalError> {
        self.entries.iter().map(|e| e.eval(env)).collect()
    }

    pub fn evaluate_dense<E: Environment + ?Sized>(&self, env: &E) -> Result<DMatrix<f64>, EvalError> {
        let values = self.evaluate(env)?;
        Ok(DMatrix::from_row_slice(self.dim, self.dim, &values))
    }

    /// Only the entries in [`sparsity`](Self::sparsity) are stored.
    pub fn evaluate_sparse<E: Environment + ?Sized>(&self, env: &E) -> Result<CsrMatrix<f64>, EvalError> {
        let mut coo = CooMatrix::new(self.dim, self.dim);
        for (i, j) in self.sparsity() {
            coo.push(i, j, self.entry(i, j).eval(env)?);
        }
        Ok(CsrMatrix::from(&coo))
    }
}
