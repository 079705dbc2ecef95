//! Seven-coefficient Reaclib fits.

use crate::constants::{LN_RATE_FLOOR, T9_SCALE};
use crate::traits::ValueWithDerivative;
use serde::{Deserialize, Serialize};

/// One Reaclib fit set:
/// ln r = a0 + a1/T9 + a2 T9^(-1/3) + a3 T9^(1/3) + a4 T9 + a5 T9^(5/3) + a6 ln T9.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaclibSet {
    pub coefficients: [f64; 7],
    /// Source label of the fit (e.g. `nacr`), informational only.
    #[serde(default)]
    pub label: String,
}

impl ReaclibSet {
    pub fn new(coefficients: [f64; 7]) -> Self {
        Self {
            coefficients,
            label: String::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn ln_rate(&self, t9: f64) -> f64 {
        let a = &self.coefficients;
        let t913 = t9.cbrt();
        a[0] + a[1] / t9 + a[2] / t913 + a[3] * t913 + a[4] * t9 + a[5] * t913.powi(5) + a[6] * t9.ln()
    }

    pub fn dln_rate_dt9(&self, t9: f64) -> f64 {
        let a = &self.coefficients;
        let t913 = t9.cbrt();
        -a[1] / (t9 * t9) - a[2] / (3.0 * t913.powi(4)) + a[3] / (3.0 * t913 * t913)
            + a[4]
            + 5.0 / 3.0 * a[5] * t913 * t913
            + a[6] / t9
    }

    /// Rate and d/dT [per K]. Sets below the log floor contribute exactly zero.
    pub fn eval(&self, t: f64) -> ValueWithDerivative {
        if !(t > 0.0) {
            return ValueWithDerivative::ZERO;
        }
        let t9 = t / T9_SCALE;
        let ln_rate = self.ln_rate(t9);
        if !(ln_rate >= LN_RATE_FLOOR) {
            return ValueWithDerivative::ZERO;
        }
        let rate = ln_rate.exp();
        ValueWithDerivative::new(rate, rate * self.dln_rate_dt9(t9) / T9_SCALE)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.coefficients.iter().all(|c| c.is_finite()) {
            Ok(())
        } else {
            Err("Reaclib coefficients must be finite".to_string())
        }
    }
}

/// Sum of one or more fit sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaclibLaw {
    sets: Vec<ReaclibSet>,
}

impl ReaclibLaw {
    pub fn new(sets: Vec<ReaclibSet>) -> Self {
        Self { sets }
    }

    pub fn sets(&self) -> &[ReaclibSet] {
        &self.sets
    }

    pub fn eval(&self, t: f64) -> ValueWithDerivative {
        self.sets.iter().fold(ValueWithDerivative::ZERO, |acc, set| {
            let v = set.eval(t);
            ValueWithDerivative::new(acc.value + v.value, acc.dvalue_dt + v.dvalue_dt)
        })
    }

    pub(crate) fn merged(&self, other: &ReaclibLaw) -> ReaclibLaw {
        let mut sets = self.sets.clone();
        sets.extend(other.sets.iter().cloned());
        ReaclibLaw { sets }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.sets.is_empty() {
            return Err("a Reaclib rate needs at least one fit set".to_string());
        }
        self.sets.iter().try_for_each(ReaclibSet::validate)
    }
}
