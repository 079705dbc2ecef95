//! The `nucnet_core` crate builds nuclear reaction networks and derives the
//! equations that evolve them.
//!
//! Key components:
//! - **Rates**: Reaclib fits, tabulated weak rates, detailed-balance reverse rates and
//!   approximate rates, all evaluated through one `Rate::eval` contract.
//! - **Network**: species arena with index-based rate links, lookups and validation.
//! - **Approximation**: collapses A(a,g)B with its A(a,p)X(p,g)B bridge into effective rates.
//! - **RHS / Jacobian**: symbolic dY/dt, energy generation and their partial derivatives.
//! - **Equation Engine**: expression trees compiled to a bytecode VM for repeated evaluation.
pub mod approximation;
pub mod composition;
pub mod constants;
pub mod equation_engine;
pub mod error;
pub mod evaluation;
pub mod ingest;
pub mod jacobian;
pub mod network;
pub mod nucleus;
pub mod partition;
pub mod rates;
pub mod rhs;
pub mod screening;
pub mod traits;

#[cfg(test)]
mod test_fixtures;
