//! Physical constants in CGS units (energies in MeV where noted).

/// Avogadro's number [1/mol].
pub const N_A: f64 = 6.022_140_76e23;

/// Boltzmann constant [erg/K].
pub const K_B: f64 = 1.380_649e-16;

/// Boltzmann constant [MeV/K].
pub const K_B_MEV: f64 = 8.617_333_262e-11;

/// Reduced Planck constant [erg s].
pub const HBAR: f64 = 1.054_571_817e-27;

/// Atomic mass unit [g].
pub const M_U: f64 = 1.660_539_066_60e-24;

/// Elementary charge [esu].
pub const Q_E: f64 = 4.803_204_71e-10;

pub const M_N_MEV: f64 = 939.565_420_52;
pub const M_P_MEV: f64 = 938.272_088_16;
pub const M_E_MEV: f64 = 0.510_998_95;

/// MeV to erg.
pub const MEV_TO_ERG: f64 = 1.602_176_634e-6;

/// Reaclib temperatures are in units of 10^9 K.
pub const T9_SCALE: f64 = 1.0e9;

/// Log-rate floor below which a Reaclib set contributes nothing.
pub const LN_RATE_FLOOR: f64 = -230.0;
