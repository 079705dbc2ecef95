//! Error types for network construction and symbolic evaluation.
//!
//! Structural problems are detected when a [`Rate`](crate::rates::Rate) or
//! [`Network`](crate::network::Network) is built and reported immediately;
//! nothing is ever left partially constructed. Numeric edge cases
//! (clamped interpolation, missing partition functions, ineligible
//! approximation targets) are resolved in place and never surface here.

use crate::equation_engine::Symbol;
use thiserror::Error;

/// Errors raised while constructing rates or networks.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NetworkError {
    /// A rate references a nuclide that is not part of the network.
    #[error("rate {rate} references {nuclide}, which is not in the network")]
    UnknownSpecies { rate: String, nuclide: String },

    /// Reactants and products do not conserve charge and nucleon number.
    #[error(
        "rate {rate} does not conserve Z/A: reactants (Z={z_in}, A={a_in}), products (Z={z_out}, A={a_out})"
    )]
    MassChargeImbalance {
        rate: String,
        z_in: i64,
        a_in: i64,
        z_out: i64,
        a_out: i64,
    },

    /// Two rates provide the same link and no merge was requested.
    #[error("duplicate rates link the same nuclei: {}", rates.join(", "))]
    DuplicateRate { rates: Vec<String> },

    /// The rate definition itself is malformed.
    #[error("invalid rate {rate}: {reason}")]
    InvalidRate { rate: String, reason: String },
}

/// Errors raised while evaluating a symbolic expression numerically.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    /// The environment has no value for a leaf of the expression.
    #[error("no value bound for symbol {0}")]
    UnboundSymbol(Symbol),
}
