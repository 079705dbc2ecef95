//! Nuclide identity and physical properties.

use crate::constants::{MEV_TO_ERG, M_E_MEV, M_N_MEV, M_P_MEV};
use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

const ELEMENTS: [&str; 119] = [
    "n", "h", "he", "li", "be", "b", "c", "n", "o", "f", "ne", "na", "mg", "al", "si", "p", "s",
    "cl", "ar", "k", "ca", "sc", "ti", "v", "cr", "mn", "fe", "co", "ni", "cu", "zn", "ga", "ge",
    "as", "se", "br", "kr", "rb", "sr", "y", "zr", "nb", "mo", "tc", "ru", "rh", "pd", "ag", "cd",
    "in", "sn", "sb", "te", "i", "xe", "cs", "ba", "la", "ce", "pr", "nd", "pm", "sm", "eu", "gd",
    "tb", "dy", "ho", "er", "tm", "yb", "lu", "hf", "ta", "w", "re", "os", "ir", "pt", "au", "hg",
    "tl", "pb", "bi", "po", "at", "rn", "fr", "ra", "ac", "th", "pa", "u", "np", "pu", "am", "cm",
    "bk", "cf", "es", "fm", "md", "no", "lr", "rf", "db", "sg", "bh", "hs", "mt", "ds", "rg", "cn",
    "nh", "fl", "mc", "lv", "ts", "og",
];

/// Identity of a nuclear species: charge, mass number and excitation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NuclideId {
    pub z: u32,
    pub a: u32,
    #[serde(default)]
    pub isomer: u8,
}

impl NuclideId {
    pub fn new(z: u32, a: u32) -> Self {
        Self { z, a, isomer: 0 }
    }

    /// Lowercase network name: `n`, `p`, `d`, `t`, otherwise element + A.
    pub fn name(&self) -> String {
        let base = match (self.z, self.a) {
            (0, 1) => "n".to_string(),
            (1, 1) => "p".to_string(),
            (1, 2) => "d".to_string(),
            (1, 3) => "t".to_string(),
            (z, a) => {
                let symbol = ELEMENTS.get(z as usize).copied().unwrap_or("x");
                format!("{symbol}{a}")
            }
        };
        if self.isomer > 0 {
            format!("{base}_{}", self.isomer)
        } else {
            base
        }
    }
}

impl fmt::Display for NuclideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) if name.len() > 1 && self.z > 1 => {
                write!(f, "{}{}", first.to_ascii_uppercase(), chars.as_str())
            }
            _ => write!(f, "{name}"),
        }
    }
}

impl FromStr for NuclideId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim().to_ascii_lowercase();
        let (body, isomer) = match raw.split_once('_') {
            Some((body, tag)) => {
                let isomer: u8 = tag
                    .parse()
                    .map_err(|_| anyhow!("Invalid isomer tag in nuclide name \"{s}\"."))?;
                (body.to_string(), isomer)
            }
            None => (raw.clone(), 0),
        };

        let special = match body.as_str() {
            "n" => Some((0, 1)),
            "p" => Some((1, 1)),
            "d" => Some((1, 2)),
            "t" => Some((1, 3)),
            _ => None,
        };
        if let Some((z, a)) = special {
            return Ok(Self { z, a, isomer });
        }

        let split = body
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| anyhow!("Nuclide name \"{s}\" has no mass number."))?;
        let (symbol, mass) = body.split_at(split);
        let a: u32 = mass
            .parse()
            .map_err(|_| anyhow!("Invalid mass number in nuclide name \"{s}\"."))?;
        // Index 0 is the neutron; element symbols start at hydrogen.
        let z = ELEMENTS
            .iter()
            .skip(1)
            .position(|e| *e == symbol)
            .map(|i| i as u32 + 1)
            .ok_or_else(|| anyhow!("Unknown element \"{symbol}\" in nuclide name \"{s}\"."))?;
        if a < z {
            bail!("Nuclide \"{s}\" has fewer nucleons than protons.");
        }
        Ok(Self { z, a, isomer })
    }
}

/// A nuclear species with the properties the network needs.
///
/// Equality, ordering and hashing use only the [`NuclideId`]; the physical
/// properties ride along. Ordering is by Z, then A, then isomer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Nuclide {
    id: NuclideId,
    /// Ground-state spin degeneracy, 2J + 1.
    spin_states: u32,
    /// Binding energy per nucleon [MeV].
    binding_energy: f64,
}

impl Nuclide {
    pub fn new(z: u32, a: u32) -> Self {
        Self::from_id(NuclideId::new(z, a))
    }

    pub fn from_id(id: NuclideId) -> Self {
        Self {
            id,
            spin_states: 1,
            binding_energy: 0.0,
        }
    }

    /// Parses a network name such as `he4`, `p` or `al26_1`.
    pub fn parse(name: &str) -> Result<Self> {
        Ok(Self::from_id(name.parse()?))
    }

    pub fn with_binding_energy(mut self, per_nucleon_mev: f64) -> Self {
        self.binding_energy = per_nucleon_mev;
        self
    }

    pub fn with_spin_states(mut self, spin_states: u32) -> Self {
        self.spin_states = spin_states.max(1);
        self
    }

    pub fn with_isomer(mut self, isomer: u8) -> Self {
        self.id.isomer = isomer;
        self
    }

    pub fn id(&self) -> NuclideId {
        self.id
    }

    pub fn z(&self) -> u32 {
        self.id.z
    }

    pub fn a(&self) -> u32 {
        self.id.a
    }

    pub fn n(&self) -> u32 {
        self.id.a - self.id.z
    }

    pub fn name(&self) -> String {
        self.id.name()
    }

    pub fn spin_states(&self) -> u32 {
        self.spin_states
    }

    pub fn binding_energy_per_nucleon(&self) -> f64 {
        self.binding_energy
    }

    /// Total binding energy [MeV].
    pub fn binding_energy(&self) -> f64 {
        self.binding_energy * self.id.a as f64
    }

    /// Rest-mass energy of the neutral atom built from free nucleons and
    /// electrons minus the binding energy [erg].
    pub fn mass_energy(&self) -> f64 {
        let z = self.id.z as f64;
        let n = self.n() as f64;
        (n * M_N_MEV + z * (M_P_MEV + M_E_MEV) - self.binding_energy()) * MEV_TO_ERG
    }

    pub fn is_neutron(&self) -> bool {
        self.id.z == 0 && self.id.a == 1
    }

    pub fn is_proton(&self) -> bool {
        self.id.z == 1 && self.id.a == 1
    }

    pub fn is_alpha(&self) -> bool {
        self.id.z == 2 && self.id.a == 4
    }
}

impl PartialEq for Nuclide {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Nuclide {}

impl Hash for Nuclide {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Nuclide {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Nuclide {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for Nuclide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}
