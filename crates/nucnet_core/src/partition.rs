//! Temperature-dependent nuclear partition functions.

use crate::constants::T9_SCALE;
use crate::nucleus::{Nuclide, NuclideId};
use crate::traits::ValueWithDerivative;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Partition function of one nuclide, tabulated on an increasing T9 grid.
///
/// Interpolation is linear in ln(pf) within a segment. Outside the grid the
/// nearest endpoint value is returned with a zero derivative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionFunction {
    temperatures_t9: Vec<f64>,
    ln_values: Vec<f64>,
}

impl PartitionFunction {
    pub fn new(temperatures_t9: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        if temperatures_t9.is_empty() {
            bail!("Partition function grid must not be empty.");
        }
        if temperatures_t9.len() != values.len() {
            bail!(
                "Partition function grid has {} temperatures but {} values.",
                temperatures_t9.len(),
                values.len()
            );
        }
        if temperatures_t9.windows(2).any(|w| w[1] <= w[0]) {
            bail!("Partition function temperatures must be strictly increasing.");
        }
        if let Some(v) = values.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
            bail!("Partition function values must be finite and positive (got {v}).");
        }
        Ok(Self {
            temperatures_t9,
            ln_values: values.iter().map(|v| v.ln()).collect(),
        })
    }

    pub fn temperatures_t9(&self) -> &[f64] {
        &self.temperatures_t9
    }

    /// Value and d/dT at temperature `t` [K].
    pub fn eval(&self, t: f64) -> ValueWithDerivative {
        let t9 = t / T9_SCALE;
        let n = self.temperatures_t9.len();
        if !(t9 > self.temperatures_t9[0]) {
            return ValueWithDerivative::new(self.ln_values[0].exp(), 0.0);
        }
        if t9 >= self.temperatures_t9[n - 1] {
            return ValueWithDerivative::new(self.ln_values[n - 1].exp(), 0.0);
        }
        // First node strictly above t9; the clamps above guarantee 1 <= hi < n.
        let hi = self.temperatures_t9.partition_point(|&x| x <= t9);
        let lo = hi - 1;
        let (t_lo, t_hi) = (self.temperatures_t9[lo], self.temperatures_t9[hi]);
        let slope = (self.ln_values[hi] - self.ln_values[lo]) / (t_hi - t_lo);
        let value = (self.ln_values[lo] + slope * (t9 - t_lo)).exp();
        ValueWithDerivative::new(value, value * slope / T9_SCALE)
    }
}

/// Partition functions by nuclide. Nuclides without an entry use the
/// constant value 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionFunctionTable {
    functions: HashMap<NuclideId, PartitionFunction>,
}

impl PartitionFunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, nuclide: NuclideId, function: PartitionFunction) {
        self.functions.insert(nuclide, function);
    }

    pub fn with(mut self, nuclide: NuclideId, function: PartitionFunction) -> Self {
        self.insert(nuclide, function);
        self
    }

    pub fn get(&self, nuclide: &NuclideId) -> Option<&PartitionFunction> {
        self.functions.get(nuclide)
    }

    pub fn contains(&self, nuclide: &NuclideId) -> bool {
        self.functions.contains_key(nuclide)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn lookup(&self, nuclide: &Nuclide, t: f64) -> ValueWithDerivative {
        match self.functions.get(&nuclide.id()) {
            Some(pf) => pf.eval(t),
            None => ValueWithDerivative::ONE,
        }
    }

    /// Product of partition functions over `nuclei`, with its T-derivative.
    pub fn product(&self, nuclei: &[Nuclide], t: f64) -> ValueWithDerivative {
        nuclei
            .iter()
            .fold(ValueWithDerivative::ONE, |acc, n| acc.times(self.lookup(n, t)))
    }
}
