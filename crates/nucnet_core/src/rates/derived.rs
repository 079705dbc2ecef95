//! Reverse rates from detailed balance.

use super::reaclib::{ReaclibLaw, ReaclibSet};
use super::{multiplicities, Rate, RateLaw};
use crate::constants::{HBAR, K_B, K_B_MEV, M_U, N_A, T9_SCALE};
use crate::nucleus::Nuclide;
use crate::partition::PartitionFunctionTable;
use crate::traits::ValueWithDerivative;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Detailed-balance law: the forward fit with the equilibrium ratio folded
/// into its coefficients, optionally times a partition-function ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedLaw {
    forward: String,
    law: ReaclibLaw,
    use_pf: bool,
    /// Forward reactants; the numerator of the partition-function ratio.
    forward_reactants: Vec<Nuclide>,
    forward_products: Vec<Nuclide>,
    partition_functions: PartitionFunctionTable,
}

fn ln_statistical_weight(nuclei: &[Nuclide]) -> f64 {
    nuclei
        .iter()
        .map(|n| 1.5 * (n.a() as f64).ln() + (n.spin_states() as f64).ln())
        .sum()
}

fn ln_identical_particles(nuclei: &[Nuclide]) -> f64 {
    multiplicities(nuclei)
        .iter()
        .map(|(_, count)| (1..=*count).map(|k| (k as f64).ln()).sum::<f64>())
        .sum()
}

impl DerivedLaw {
    pub(crate) fn from_forward(
        forward: &Rate,
        partition_functions: &PartitionFunctionTable,
        use_pf: bool,
    ) -> Result<Self, String> {
        let sets = match forward.law() {
            RateLaw::Reaclib(law) => law.sets(),
            _ => return Err("the forward rate of a derived rate must be a Reaclib rate".to_string()),
        };
        if forward.is_weak() {
            return Err("the forward rate of a derived rate cannot be a weak rate".to_string());
        }
        if forward.is_reverse() {
            return Err("a derived rate needs a forward rate, not a reverse one".to_string());
        }

        let reactants = forward.reactants();
        let products = forward.products();
        let n_diff = reactants.len() as f64 - products.len() as f64;

        let thermal = M_U * K_B * T9_SCALE / (2.0 * PI * HBAR * HBAR);
        let prefactor = -N_A.ln() * n_diff + ln_statistical_weight(reactants) - ln_statistical_weight(products)
            + ln_identical_particles(products)
            - ln_identical_particles(reactants)
            + 1.5 * n_diff * thermal.ln();
        let q_term = forward.q_value() / (T9_SCALE * K_B_MEV);

        let derived_sets = sets
            .iter()
            .map(|set| {
                let mut a = set.coefficients;
                a[0] += prefactor;
                a[1] -= q_term;
                a[6] += 1.5 * n_diff;
                ReaclibSet::new(a).with_label(set.label.clone())
            })
            .collect();

        let mut table = PartitionFunctionTable::new();
        if use_pf {
            for n in reactants.iter().chain(products) {
                if let Some(pf) = partition_functions.get(&n.id()) {
                    table.insert(n.id(), pf.clone());
                }
            }
        }

        Ok(Self {
            forward: forward.name(),
            law: ReaclibLaw::new(derived_sets),
            use_pf,
            forward_reactants: reactants.to_vec(),
            forward_products: products.to_vec(),
            partition_functions: table,
        })
    }

    /// Name of the forward rate this law was derived from.
    pub fn forward(&self) -> &str {
        &self.forward
    }

    pub fn law(&self) -> &ReaclibLaw {
        &self.law
    }

    pub fn uses_partition_functions(&self) -> bool {
        self.use_pf
    }

    /// Nuclei of this rate that have a tabulated partition function.
    pub fn partition_nuclei(&self) -> Vec<Nuclide> {
        let mut nuclei: Vec<Nuclide> = self
            .forward_reactants
            .iter()
            .chain(&self.forward_products)
            .filter(|n| self.partition_functions.contains(&n.id()))
            .copied()
            .collect();
        nuclei.sort();
        nuclei.dedup();
        nuclei
    }

    pub fn eval(&self, t: f64) -> ValueWithDerivative {
        let base = self.law.eval(t);
        if !self.use_pf {
            return base;
        }
        let z_r = self.partition_functions.product(&self.forward_reactants, t);
        let z_p = self.partition_functions.product(&self.forward_products, t);
        base.times(z_r.over(z_p))
    }
}
