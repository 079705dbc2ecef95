use crate::equation_engine::Symbol;
use crate::screening::PlasmaState;
use num_traits::{Float, FromPrimitive};
use std::collections::HashMap;
use std::fmt::Debug;

/// A trait for types that can be used as scalars in our dynamical systems.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Represents a dynamical system (Flow or Map).
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// x: current state
    /// t: current time
    /// out: buffer to write the result (dx/dt)
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// Supplies numeric values for the leaves of symbolic expressions.
pub trait Environment {
    fn value(&self, symbol: &Symbol) -> Option<f64>;
}

impl Environment for HashMap<Symbol, f64> {
    fn value(&self, symbol: &Symbol) -> Option<f64> {
        self.get(symbol).copied()
    }
}

/// Value of a quantity and its temperature derivative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueWithDerivative {
    pub value: f64,
    pub dvalue_dt: f64,
}

impl ValueWithDerivative {
    pub const ONE: Self = Self {
        value: 1.0,
        dvalue_dt: 0.0,
    };

    pub const ZERO: Self = Self {
        value: 0.0,
        dvalue_dt: 0.0,
    };

    pub fn new(value: f64, dvalue_dt: f64) -> Self {
        Self { value, dvalue_dt }
    }

    /// Product rule.
    pub fn times(self, other: Self) -> Self {
        Self {
            value: self.value * other.value,
            dvalue_dt: self.value * other.dvalue_dt + other.value * self.dvalue_dt,
        }
    }

    /// Quotient rule.
    pub fn over(self, other: Self) -> Self {
        Self {
            value: self.value / other.value,
            dvalue_dt: (other.value * self.dvalue_dt - self.value * other.dvalue_dt) / (other.value * other.value),
        }
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self {
            value: self.value * factor,
            dvalue_dt: self.dvalue_dt * factor,
        }
    }
}

/// Charges and masses of a screened two-body pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreeningPair {
    pub z1: f64,
    pub a1: f64,
    pub z2: f64,
    pub a2: f64,
}

impl ScreeningPair {
    pub fn new(z1: f64, a1: f64, z2: f64, a2: f64) -> Self {
        Self { z1, a1, z2, a2 }
    }
}

/// Electron screening enhancement of a charged-particle rate.
pub trait ScreeningModel {
    fn name(&self) -> &'static str;

    /// Multiplicative enhancement and its temperature derivative.
    fn factor(&self, plasma: &PlasmaState, pair: &ScreeningPair) -> ValueWithDerivative;
}

/// Thermal (neutrino) losses of the plasma outside the reaction network.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ThermalLossValue {
    /// Specific loss rate [erg/g/s].
    pub value: f64,
    pub dvalue_dt: f64,
    pub dvalue_dabar: f64,
    pub dvalue_dzbar: f64,
}

pub trait ThermalLoss {
    fn evaluate(&self, plasma: &PlasmaState) -> ThermalLossValue;
}
