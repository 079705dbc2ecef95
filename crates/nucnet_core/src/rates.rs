//! Reaction rates: participants, classification and temperature laws.
//!
//! A [`Rate`] pairs a sorted reactant/product multiset with a [`RateLaw`].
//! Rates are validated when built (Z/A conservation including the lepton of
//! weak rates, a known arity, a well-formed law), so every `Rate` value in
//! circulation is structurally sound.

pub mod approximate;
pub mod derived;
pub mod reaclib;
pub mod tabular;

pub use approximate::{ApproximateLaw, Bridge, ChildRole};
pub use derived::DerivedLaw;
pub use reaclib::{ReaclibLaw, ReaclibSet};
pub use tabular::{RateTable, TabularLaw, TabularPoint};

use crate::error::NetworkError;
use crate::nucleus::{Nuclide, NuclideId};
use crate::partition::PartitionFunctionTable;
use crate::traits::ValueWithDerivative;
use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lepton channel of a weak rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeakKind {
    ElectronCapture,
    BetaMinus,
    BetaPlus,
}

impl WeakKind {
    /// Change of total nuclear charge, products minus reactants.
    pub fn charge_shift(self) -> i64 {
        match self {
            WeakKind::ElectronCapture | WeakKind::BetaPlus => -1,
            WeakKind::BetaMinus => 1,
        }
    }
}

/// Reaclib chapter (1-11, classified by arity) or tabulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chapter {
    Reaclib(u8),
    Tabular,
}

impl Chapter {
    /// Reaclib chapter for `reactants -> products`, if the arity is one Reaclib knows.
    pub fn from_arity(reactants: usize, products: usize) -> Option<Self> {
        let chapter = match (reactants, products) {
            (1, 1) => 1,
            (1, 2) => 2,
            (1, 3) => 3,
            (2, 1) => 4,
            (2, 2) => 5,
            (2, 3) => 6,
            (2, 4) => 7,
            (3, 1) => 8,
            (3, 2) => 9,
            (4, 2) => 10,
            (1, 4) => 11,
            _ => return None,
        };
        Some(Chapter::Reaclib(chapter))
    }
}

impl fmt::Display for Chapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chapter::Reaclib(c) => write!(f, "{c}"),
            Chapter::Tabular => write!(f, "t"),
        }
    }
}

/// Temperature (and density) dependence of a rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RateLaw {
    Reaclib(ReaclibLaw),
    Tabular(TabularLaw),
    Derived(DerivedLaw),
    Approximate(ApproximateLaw),
}

/// One reaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RateRecord")]
pub struct Rate {
    reactants: Vec<Nuclide>,
    products: Vec<Nuclide>,
    law: RateLaw,
    chapter: Chapter,
    weak: Option<WeakKind>,
    label: String,
    reverse: bool,
    /// Energy release [MeV].
    q_value: f64,
}

/// Serialized form of a [`Rate`]. Deserializing goes through
/// [`RateBuilder::build`], so an unbalanced rate is rejected on the way in.
#[derive(Deserialize)]
struct RateRecord {
    reactants: Vec<Nuclide>,
    products: Vec<Nuclide>,
    law: RateLaw,
    weak: Option<WeakKind>,
    label: String,
    reverse: bool,
    q_value: f64,
}

impl TryFrom<RateRecord> for Rate {
    type Error = NetworkError;

    fn try_from(record: RateRecord) -> Result<Self, Self::Error> {
        RateBuilder {
            reactants: record.reactants,
            products: record.products,
            weak: record.weak,
            label: record.label,
            reverse: record.reverse,
            q_value: Some(record.q_value),
        }
        .build(record.law)
    }
}

/// Collects the participants and flags of a rate before its law is attached.
#[derive(Debug, Clone)]
pub struct RateBuilder {
    reactants: Vec<Nuclide>,
    products: Vec<Nuclide>,
    weak: Option<WeakKind>,
    label: String,
    reverse: bool,
    q_value: Option<f64>,
}

impl RateBuilder {
    pub fn weak(mut self, kind: WeakKind) -> Self {
        self.weak = Some(kind);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn q_value(mut self, q_mev: f64) -> Self {
        self.q_value = Some(q_mev);
        self
    }

    pub fn reaclib(self, sets: Vec<ReaclibSet>) -> Result<Rate, NetworkError> {
        self.build(RateLaw::Reaclib(ReaclibLaw::new(sets)))
    }

    pub fn tabular(self, table: RateTable) -> Result<Rate, NetworkError> {
        self.build(RateLaw::Tabular(TabularLaw::new(table)))
    }

    pub(crate) fn build(mut self, law: RateLaw) -> Result<Rate, NetworkError> {
        self.reactants.sort();
        self.products.sort();
        let name = reaction_string(&self.reactants, &self.products);
        let invalid = |reason: String| NetworkError::InvalidRate {
            rate: name.clone(),
            reason,
        };

        if self.reactants.is_empty() || self.products.is_empty() {
            return Err(invalid("a rate needs at least one reactant and one product".to_string()));
        }

        let sum = |nuclei: &[Nuclide], f: fn(&Nuclide) -> u32| -> i64 { nuclei.iter().map(|n| f(n) as i64).sum() };
        let (z_in, a_in) = (sum(&self.reactants, Nuclide::z), sum(&self.reactants, Nuclide::a));
        let (z_out, a_out) = (sum(&self.products, Nuclide::z), sum(&self.products, Nuclide::a));
        let shift = self.weak.map_or(0, WeakKind::charge_shift);
        if a_in != a_out || z_out != z_in + shift {
            return Err(NetworkError::MassChargeImbalance {
                rate: name.clone(),
                z_in,
                a_in,
                z_out,
                a_out,
            });
        }

        let chapter = match &law {
            RateLaw::Tabular(_) => {
                if self.weak.is_none() {
                    return Err(invalid("tabular rates must be weak rates".to_string()));
                }
                if self.reactants.len() != 1 || self.products.len() != 1 {
                    return Err(invalid("tabular rates must have one reactant and one product".to_string()));
                }
                Chapter::Tabular
            }
            _ => Chapter::from_arity(self.reactants.len(), self.products.len()).ok_or_else(|| {
                invalid(format!(
                    "unsupported arity {} -> {}",
                    self.reactants.len(),
                    self.products.len()
                ))
            })?,
        };

        match &law {
            RateLaw::Reaclib(l) => l.validate().map_err(invalid)?,
            RateLaw::Derived(l) => l.law().validate().map_err(invalid)?,
            RateLaw::Tabular(_) | RateLaw::Approximate(_) => {}
        }

        let q_value = self.q_value.unwrap_or_else(|| {
            let binding = |nuclei: &[Nuclide]| nuclei.iter().map(Nuclide::binding_energy).sum::<f64>();
            binding(&self.products) - binding(&self.reactants)
        });

        Ok(Rate {
            reactants: self.reactants,
            products: self.products,
            law,
            chapter,
            weak: self.weak,
            label: self.label,
            reverse: self.reverse,
            q_value,
        })
    }
}

fn reaction_string(reactants: &[Nuclide], products: &[Nuclide]) -> String {
    let side = |nuclei: &[Nuclide]| nuclei.iter().map(Nuclide::name).collect::<Vec<_>>().join(" + ");
    format!("{} --> {}", side(reactants), side(products))
}

fn factorial(n: u32) -> f64 {
    (1..=n).map(f64::from).product()
}

/// Multiplicities of each distinct nuclide in a sorted list.
pub(crate) fn multiplicities(nuclei: &[Nuclide]) -> Vec<(Nuclide, u32)> {
    let mut out: Vec<(Nuclide, u32)> = Vec::new();
    for n in nuclei {
        match out.last_mut() {
            Some((last, count)) if last == n => *count += 1,
            _ => out.push((*n, 1)),
        }
    }
    out
}

impl Rate {
    pub fn builder(reactants: Vec<Nuclide>, products: Vec<Nuclide>) -> RateBuilder {
        RateBuilder {
            reactants,
            products,
            weak: None,
            label: String::new(),
            reverse: false,
            q_value: None,
        }
    }

    /// Reverse rate of a forward Reaclib rate by detailed balance.
    pub fn derived_from(
        forward: &Rate,
        partition_functions: &PartitionFunctionTable,
        use_pf: bool,
    ) -> Result<Rate, NetworkError> {
        let law = DerivedLaw::from_forward(forward, partition_functions, use_pf).map_err(|reason| {
            NetworkError::InvalidRate {
                rate: forward.name(),
                reason,
            }
        })?;
        Rate::builder(forward.products.clone(), forward.reactants.clone())
            .label("derived")
            .reverse(true)
            .q_value(-forward.q_value)
            .build(RateLaw::Derived(law))
    }

    pub fn reactants(&self) -> &[Nuclide] {
        &self.reactants
    }

    pub fn products(&self) -> &[Nuclide] {
        &self.products
    }

    pub fn law(&self) -> &RateLaw {
        &self.law
    }

    pub fn chapter(&self) -> Chapter {
        self.chapter
    }

    pub fn weak_kind(&self) -> Option<WeakKind> {
        self.weak
    }

    pub fn is_weak(&self) -> bool {
        self.weak.is_some()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    pub fn q_value(&self) -> f64 {
        self.q_value
    }

    pub fn is_tabular(&self) -> bool {
        matches!(self.law, RateLaw::Tabular(_))
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.law, RateLaw::Derived(_))
    }

    pub fn is_approximate(&self) -> bool {
        matches!(self.law, RateLaw::Approximate(_))
    }

    pub fn approximate_law(&self) -> Option<&ApproximateLaw> {
        match &self.law {
            RateLaw::Approximate(l) => Some(l),
            _ => None,
        }
    }

    /// `he4 + c12 --> o16`
    pub fn name(&self) -> String {
        reaction_string(&self.reactants, &self.products)
    }

    /// Identifier usable in generated code: `He4_C12_to_O16`.
    pub fn fname(&self) -> String {
        let side = |nuclei: &[Nuclide]| nuclei.iter().map(|n| n.to_string()).collect::<Vec<_>>().join("_");
        let mut name = format!("{}_to_{}", side(&self.reactants), side(&self.products));
        match &self.law {
            RateLaw::Derived(_) => name.push_str("_derived"),
            RateLaw::Approximate(_) => name.push_str("_approx"),
            RateLaw::Tabular(_) => name.push_str("_weaktab"),
            RateLaw::Reaclib(_) => {}
        }
        name
    }

    /// Compact `A(x,y)B` form, e.g. `c12(a,g)o16`.
    pub fn short_name(&self) -> String {
        let light = |n: &Nuclide| if n.is_alpha() { "a".to_string() } else { n.name() };
        let split = |nuclei: &[Nuclide]| {
            let (heavy, rest) = nuclei.split_last().map_or((None, &[][..]), |(h, r)| (Some(*h), r));
            (heavy, rest.iter().map(light).collect::<Vec<_>>().join("+"))
        };
        let (target, mut projectile) = split(&self.reactants);
        let (residual, mut ejectile) = split(&self.products);
        if projectile.is_empty() {
            projectile = match self.weak {
                Some(WeakKind::ElectronCapture) => "e".to_string(),
                Some(_) => String::new(),
                None => "g".to_string(),
            };
        }
        if ejectile.is_empty() {
            ejectile = if self.weak.is_some() { "nu".to_string() } else { "g".to_string() };
        }
        let name = |n: Option<Nuclide>| n.map(|n| n.name()).unwrap_or_default();
        format!("{}({},{}){}", name(target), projectile, ejectile, name(residual))
    }

    /// Sorted reactant and product identities; rates with equal links are duplicates.
    pub fn link(&self) -> (Vec<NuclideId>, Vec<NuclideId>) {
        (
            self.reactants.iter().map(Nuclide::id).collect(),
            self.products.iter().map(Nuclide::id).collect(),
        )
    }

    pub fn reactant_count(&self, nuclide: &Nuclide) -> u32 {
        self.reactants.iter().filter(|n| *n == nuclide).count() as u32
    }

    pub fn product_count(&self, nuclide: &Nuclide) -> u32 {
        self.products.iter().filter(|n| *n == nuclide).count() as u32
    }

    /// Net change in the number of `nuclide` per reaction.
    pub fn stoichiometry(&self, nuclide: &Nuclide) -> i64 {
        self.product_count(nuclide) as i64 - self.reactant_count(nuclide) as i64
    }

    /// Symmetry factor 1/prod(n_i!) over repeated reactants.
    pub fn prefactor(&self) -> f64 {
        1.0 / multiplicities(&self.reactants)
            .iter()
            .map(|(_, count)| factorial(*count))
            .product::<f64>()
    }

    /// Reaclib electron captures carry an explicit electron fraction factor.
    pub fn uses_electron_fraction(&self) -> bool {
        self.weak == Some(WeakKind::ElectronCapture) && !self.is_tabular()
    }

    pub fn density_exponent(&self) -> i32 {
        let n = self.reactants.len() as i32 - 1;
        if self.uses_electron_fraction() {
            n + 1
        } else {
            n
        }
    }

    /// Unscreened rate coefficient and d/dT at temperature `t` [K] and
    /// density times electron fraction `rho_ye` [g/cm^3].
    pub fn eval(&self, t: f64, rho_ye: f64) -> ValueWithDerivative {
        match &self.law {
            RateLaw::Reaclib(l) => l.eval(t),
            RateLaw::Tabular(l) => l.eval(t, rho_ye),
            RateLaw::Derived(l) => l.eval(t),
            RateLaw::Approximate(l) => l.eval(t, rho_ye),
        }
    }

    /// Neutrino energy-loss power per reaction [erg/s]; zero unless tabular.
    pub fn neutrino_loss(&self, t: f64, rho_ye: f64) -> ValueWithDerivative {
        match &self.law {
            RateLaw::Tabular(l) => l.neutrino_loss(t, rho_ye),
            _ => ValueWithDerivative::ZERO,
        }
    }

    /// Combines the fit sets of two Reaclib rates with the same link.
    pub fn merge_reaclib(&self, other: &Rate) -> Option<Rate> {
        match (&self.law, &other.law) {
            (RateLaw::Reaclib(a), RateLaw::Reaclib(b)) if self.link() == other.link() && self.weak == other.weak => {
                let mut merged = self.clone();
                merged.law = RateLaw::Reaclib(a.merged(b));
                Some(merged)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Parses an `A(x,y)B` reaction name into sorted reactant and product identities.
///
/// Light particles may be written `p`, `n`, `d`, `t` or `a`, repeated with a
/// count prefix (`2a`) or joined with `+`; `g`, `e` and `nu` are ignored.
pub fn parse_reaction_name(name: &str) -> Result<(Vec<NuclideId>, Vec<NuclideId>)> {
    let (target, rest) = name
        .split_once('(')
        .ok_or_else(|| anyhow!("Reaction name \"{name}\" is not of the form A(x,y)B."))?;
    let (inner, residual) = rest
        .split_once(')')
        .ok_or_else(|| anyhow!("Reaction name \"{name}\" is missing ')'."))?;
    let (incoming, outgoing) = inner
        .split_once(',')
        .ok_or_else(|| anyhow!("Reaction name \"{name}\" is missing ','."))?;

    fn particles(list: &str, out: &mut Vec<NuclideId>) -> Result<()> {
        for token in list.split('+').map(str::trim).filter(|t| !t.is_empty()) {
            let digits = token.chars().take_while(char::is_ascii_digit).count();
            let (count, particle) = token.split_at(digits);
            let count: usize = if count.is_empty() { 1 } else { count.parse()? };
            let id: NuclideId = match particle {
                "g" | "e" | "e-" | "e+" | "nu" => continue,
                "a" => NuclideId::new(2, 4),
                other => other.parse()?,
            };
            out.extend(std::iter::repeat(id).take(count));
        }
        Ok(())
    }

    let mut reactants: Vec<NuclideId> = Vec::new();
    let mut products: Vec<NuclideId> = Vec::new();
    if target.trim().is_empty() || residual.trim().is_empty() {
        bail!("Reaction name \"{name}\" needs a target and a residual nucleus.");
    }
    reactants.push(target.trim().parse()?);
    particles(incoming, &mut reactants)?;
    particles(outgoing, &mut products)?;
    products.push(residual.trim().parse()?);
    reactants.sort();
    products.sort();
    Ok((reactants, products))
}
