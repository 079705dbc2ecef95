//! Weak rates tabulated on a (log10 rho*Ye, log10 T) grid.

use crate::constants::MEV_TO_ERG;
use crate::traits::ValueWithDerivative;
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_10;

/// Rate and neutrino-energy table.
///
/// `log_rate` and `nu_energy` are row-major: one row per density node,
/// one column per temperature node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    log_rhoye: Vec<f64>,
    log_t: Vec<f64>,
    log_rate: Vec<f64>,
    /// Mean neutrino energy per reaction [MeV].
    nu_energy: Vec<f64>,
}

/// Interpolated table entry with temperature derivatives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TabularPoint {
    /// Reaction rate [1/s].
    pub rate: ValueWithDerivative,
    /// Neutrino energy per reaction [MeV].
    pub nu_energy: ValueWithDerivative,
}

struct AxisPosition {
    lo: usize,
    hi: usize,
    frac: f64,
    clamped: bool,
}

fn locate(axis: &[f64], x: f64) -> AxisPosition {
    let n = axis.len();
    if n == 1 {
        return AxisPosition {
            lo: 0,
            hi: 0,
            frac: 0.0,
            clamped: true,
        };
    }
    if !(x > axis[0]) {
        return AxisPosition {
            lo: 0,
            hi: 1,
            frac: 0.0,
            clamped: x < axis[0] || x.is_nan(),
        };
    }
    if x >= axis[n - 1] {
        return AxisPosition {
            lo: n - 2,
            hi: n - 1,
            frac: 1.0,
            clamped: x > axis[n - 1],
        };
    }
    let hi = axis.partition_point(|&v| v <= x);
    let lo = hi - 1;
    AxisPosition {
        lo,
        hi,
        frac: (x - axis[lo]) / (axis[hi] - axis[lo]),
        clamped: false,
    }
}

impl RateTable {
    pub fn new(log_rhoye: Vec<f64>, log_t: Vec<f64>, log_rate: Vec<f64>, nu_energy: Vec<f64>) -> Result<Self, String> {
        if log_rhoye.is_empty() || log_t.is_empty() {
            return Err("rate table axes must not be empty".to_string());
        }
        for (name, axis) in [("log10(rho*Ye)", &log_rhoye), ("log10(T)", &log_t)] {
            if axis.windows(2).any(|w| !(w[1] > w[0])) {
                return Err(format!("rate table axis {name} must be strictly increasing"));
            }
        }
        let size = log_rhoye.len() * log_t.len();
        if log_rate.len() != size || nu_energy.len() != size {
            return Err(format!(
                "rate table expects {size} entries, got {} rates and {} neutrino energies",
                log_rate.len(),
                nu_energy.len()
            ));
        }
        if log_rate.iter().chain(&nu_energy).any(|v| !v.is_finite()) {
            return Err("rate table entries must be finite".to_string());
        }
        Ok(Self {
            log_rhoye,
            log_t,
            log_rate,
            nu_energy,
        })
    }

    pub fn log_rhoye(&self) -> &[f64] {
        &self.log_rhoye
    }

    pub fn log_t(&self) -> &[f64] {
        &self.log_t
    }

    fn entry(&self, values: &[f64], i: usize, j: usize) -> f64 {
        values[i * self.log_t.len() + j]
    }

    /// Bilinear value and its derivative along the temperature axis.
    fn bilinear(&self, values: &[f64], d: &AxisPosition, t: &AxisPosition) -> (f64, f64) {
        let v00 = self.entry(values, d.lo, t.lo);
        let v01 = self.entry(values, d.lo, t.hi);
        let v10 = self.entry(values, d.hi, t.lo);
        let v11 = self.entry(values, d.hi, t.hi);
        let (fx, fy) = (d.frac, t.frac);
        let value = (1.0 - fx) * (1.0 - fy) * v00 + (1.0 - fx) * fy * v01 + fx * (1.0 - fy) * v10 + fx * fy * v11;
        if t.clamped || t.lo == t.hi {
            return (value, 0.0);
        }
        let width = self.log_t[t.hi] - self.log_t[t.lo];
        let slope = ((1.0 - fx) * (v01 - v00) + fx * (v11 - v10)) / width;
        (value, slope)
    }

    /// Interpolates at density*Ye `rho_ye` [g/cm^3] and temperature `t` [K],
    /// clamping to the nearest edge outside the grid.
    pub fn interpolate(&self, rho_ye: f64, t: f64) -> TabularPoint {
        let d = locate(&self.log_rhoye, rho_ye.log10());
        let tp = locate(&self.log_t, t.log10());

        let (log_rate, dlog_rate) = self.bilinear(&self.log_rate, &d, &tp);
        let (e_nu, de_nu) = self.bilinear(&self.nu_energy, &d, &tp);
        let rate = 10f64.powf(log_rate);
        // d(log10 T)/dT = 1/(T ln 10); flat below the grid, T = 0 included.
        let (drate_dt, de_nu_dt) = if tp.clamped || !(t > 0.0) {
            (0.0, 0.0)
        } else {
            (rate * dlog_rate / t, de_nu / (t * LN_10))
        };

        TabularPoint {
            rate: ValueWithDerivative::new(rate, drate_dt),
            nu_energy: ValueWithDerivative::new(e_nu, de_nu_dt),
        }
    }
}

/// Tabular law of a weak rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularLaw {
    table: RateTable,
}

impl TabularLaw {
    pub fn new(table: RateTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RateTable {
        &self.table
    }

    pub fn eval(&self, t: f64, rho_ye: f64) -> ValueWithDerivative {
        self.table.interpolate(rho_ye, t).rate
    }

    /// Neutrino energy-loss power per reaction [erg/s].
    pub fn neutrino_loss(&self, t: f64, rho_ye: f64) -> ValueWithDerivative {
        let point = self.table.interpolate(rho_ye, t);
        point.rate.times(point.nu_energy).scaled(MEV_TO_ERG)
    }
}
