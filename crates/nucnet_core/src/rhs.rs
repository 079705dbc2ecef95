//! Symbolic right-hand side of the abundance equations.

use crate::constants::N_A;
use crate::equation_engine::{Expr, Symbol};
use crate::network::Network;
use crate::nucleus::{Nuclide, NuclideId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RhsSettings {
    /// Subtract the neutrino losses of tabular weak rates from the energy.
    pub include_neutrino_losses: bool,
    /// Subtract the plasma's thermal neutrino losses from the energy.
    pub include_thermal_losses: bool,
}

impl Default for RhsSettings {
    fn default() -> Self {
        Self {
            include_neutrino_losses: true,
            include_thermal_losses: true,
        }
    }
}

/// dY/dt for every species plus the specific energy generation rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RhsSystem {
    pub species: Vec<Nuclide>,
    pub ydot: Vec<Expr>,
    /// [erg/g/s]
    pub energy: Expr,
}

impl RhsSystem {
    pub fn len(&self) -> usize {
        self.ydot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ydot.is_empty()
    }

    pub fn ydot_of(&self, id: &NuclideId) -> Option<&Expr> {
        let i = self.species.iter().position(|n| n.id() == *id)?;
        self.ydot.get(i)
    }

    /// The abundance equations followed by the energy equation.
    pub fn expressions(&self) -> impl Iterator<Item = &Expr> {
        self.ydot.iter().chain(std::iter::once(&self.energy))
    }
}

impl Network {
    /// Screened coefficient of arena rate `r`. An active approximate rate
    /// is spelled out over the rate symbols of its children.
    pub fn rate_expression(&self, r: usize) -> Expr {
        match (self.approximation_children(r), self.rate(r).approximate_law()) {
            (Some(children), Some(law)) => law.expression(&children.map(|c| Expr::symbol(Symbol::rate(c)))),
            _ => Expr::symbol(Symbol::rate(r)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RhsBuilder {
    pub settings: RhsSettings,
}

impl RhsBuilder {
    pub fn new(settings: RhsSettings) -> Self {
        Self { settings }
    }

    /// `coefficient` times the molar reaction rate of active rate `r`:
    /// prefactor * rate * rho^n * (Ye) * prod Y^count.
    pub fn rate_term(network: &Network, r: usize, coefficient: f64) -> Expr {
        let rate = network.rate(r);
        let link = network.link(r);
        let mut factors = Vec::with_capacity(link.reactants.len() + 4);
        factors.push(Expr::constant(coefficient * rate.prefactor()));
        factors.push(network.rate_expression(r));
        factors.push(Expr::pow(Expr::symbol(Symbol::Density), rate.density_exponent() as f64));
        if rate.uses_electron_fraction() {
            factors.push(Expr::symbol(Symbol::ElectronFraction));
        }
        for &(i, count) in &link.reactants {
            factors.push(Expr::pow(Expr::symbol(Symbol::Abundance(i)), count as f64));
        }
        Expr::product(factors)
    }

    pub fn derive(&self, network: &Network) -> RhsSystem {
        let ydot: Vec<Expr> = (0..network.len())
            .map(|i| {
                Expr::sum(network.touching(i).into_iter().filter_map(|r| {
                    let s = network.link(r).stoichiometry(i);
                    (s != 0).then(|| Self::rate_term(network, r, s as f64))
                }))
            })
            .collect();

        let mut energy: Vec<Expr> = network
            .species()
            .iter()
            .zip(&ydot)
            .map(|(nuclide, dy)| Expr::product([Expr::constant(-N_A * nuclide.mass_energy()), dy.clone()]))
            .collect();
        if self.settings.include_neutrino_losses {
            for (r, rate) in network.rates().iter().enumerate() {
                if !rate.is_tabular() {
                    continue;
                }
                let (i, _) = network.link(r).reactants[0];
                energy.push(Expr::product([
                    Expr::constant(-N_A),
                    Expr::symbol(Symbol::neutrino_loss(r)),
                    Expr::symbol(Symbol::Abundance(i)),
                ]));
            }
        }
        if self.settings.include_thermal_losses {
            energy.push(-Expr::symbol(Symbol::thermal_loss()));
        }

        log::debug!("derived {} abundance equations", ydot.len());
        RhsSystem {
            species: network.species().to_vec(),
            ydot,
            energy: Expr::sum(energy),
        }
    }
}
