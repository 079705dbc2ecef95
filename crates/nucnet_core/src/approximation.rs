//! Steady-state elimination of bridge intermediates.
//!
//! For a capture A(a,g)B that also proceeds through A(a,x)X(x,g)B, with all
//! reverses present, the intermediate X is put in equilibrium and the six
//! rates collapse into one effective forward and one effective reverse rate
//! between A + a and B.

use crate::error::NetworkError;
use crate::network::Network;
use crate::nucleus::{Nuclide, NuclideId};
use crate::rates::{ApproximateLaw, Bridge, Rate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproximationSettings {
    pub bridge: Bridge,
    /// Only eliminate these intermediates; all eligible ones when `None`.
    pub intermediate_nuclei: Option<Vec<NuclideId>>,
}

/// An eliminable intermediate and the rates around it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// A, the heavy reactant of the capture.
    pub target: Nuclide,
    /// B, the capture product.
    pub product: Nuclide,
    /// X, the nucleus being eliminated.
    pub intermediate: Nuclide,
    /// Active rate indices in [`ChildRole::ALL`](crate::rates::ChildRole::ALL) order.
    pub children: [usize; 6],
}

#[derive(Debug, Clone, Default)]
pub struct ApproximationEngine {
    pub settings: ApproximationSettings,
}

impl ApproximationEngine {
    pub fn new(settings: ApproximationSettings) -> Self {
        Self { settings }
    }

    fn intermediate_of(&self, target: &Nuclide) -> NuclideId {
        match self.settings.bridge {
            Bridge::Proton => NuclideId::new(target.z() + 1, target.a() + 3),
            Bridge::Neutron => NuclideId::new(target.z() + 2, target.a() + 3),
        }
    }

    /// Intermediates that match the bridge pattern.
    ///
    /// X qualifies when the network holds A(a,g)B, A(a,x)X, X(x,g)B,
    /// B(g,a)A, B(g,x)X and X(x,a)A as plain rates, and nothing else
    /// touches X. Anything short of that is skipped.
    pub fn candidates(&self, network: &Network) -> Vec<Candidate> {
        let alpha = NuclideId::new(2, 4);
        let particle = self.settings.bridge.particle().id();
        let mut out = Vec::new();

        for (r, rate) in network.rates().iter().enumerate() {
            let reactants = rate.reactants();
            if reactants.len() != 2 || rate.products().len() != 1 || rate.is_weak() || rate.is_approximate() {
                continue;
            }
            let Some(alpha_at) = reactants.iter().position(Nuclide::is_alpha) else {
                continue;
            };
            let target = reactants[1 - alpha_at];
            let product = rate.products()[0];
            let x_id = self.intermediate_of(&target);
            if let Some(allowed) = &self.settings.intermediate_nuclei {
                if !allowed.contains(&x_id) {
                    continue;
                }
            }
            let Some(x) = network.species_index(&x_id) else {
                continue;
            };

            let find = |reactants: &[NuclideId], products: &[NuclideId]| {
                network
                    .rates_by_nuclei(reactants, products)
                    .into_iter()
                    .filter(|&i| !network.rate(i).is_approximate())
                    .last()
            };
            let (a, b) = (target.id(), product.id());
            let found = [
                find(&[alpha, a], &[particle, x_id]),
                find(&[particle, x_id], &[b]),
                find(&[b], &[alpha, a]),
                find(&[b], &[particle, x_id]),
                find(&[particle, x_id], &[alpha, a]),
            ];
            let [Some(ax), Some(xg), Some(ga), Some(gx), Some(xa)] = found else {
                continue;
            };

            let bridge: BTreeSet<usize> = [ax, xg, gx, xa].into();
            let touching: BTreeSet<usize> = network.touching(x).into_iter().collect();
            if touching != bridge {
                continue;
            }

            out.push(Candidate {
                target,
                product,
                intermediate: *network.nuclide(x),
                children: [r, ax, xg, ga, gx, xa],
            });
        }
        out
    }

    /// Network with every candidate intermediate eliminated. Species that no
    /// rate touches afterwards (the intermediate, often the bridge particle)
    /// are dropped. Without candidates the network comes back unchanged.
    pub fn apply(&self, network: &Network) -> Result<Network, NetworkError> {
        let candidates = self.candidates(network);
        if candidates.is_empty() {
            return Ok(network.clone());
        }

        let mut superseded = BTreeSet::new();
        let mut approximate = Vec::with_capacity(2 * candidates.len());
        let mut eliminated = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let children: [Rate; 6] = candidate.children.map(|i| network.rate(i).clone());
            for reverse in [false, true] {
                let law = ApproximateLaw::new(self.settings.bridge, candidate.intermediate, children.clone(), reverse);
                let rate = Rate::approximate(law)?;
                log::info!("using approximate rate {rate}");
                approximate.push(rate);
            }
            superseded.extend(candidate.children);
            eliminated.push(candidate.intermediate);
        }

        for &i in &superseded {
            log::debug!("removing rate {}", network.rate(i));
        }

        let mut rates: Vec<Rate> = (0..network.rates().len())
            .filter(|i| !superseded.contains(i))
            .map(|i| network.rate(i).clone())
            .collect();
        rates.extend(approximate);

        let touched: BTreeSet<Nuclide> = rates
            .iter()
            .flat_map(|r| r.reactants().iter().chain(r.products()).copied())
            .collect();
        let inert = network.inert_nuclides();
        let species: Vec<Nuclide> = network
            .species()
            .iter()
            .filter(|n| touched.contains(n) || inert.contains(n))
            .copied()
            .collect();

        let mut removed = network.removed_rates().to_vec();
        removed.extend(superseded.iter().map(|&i| network.rate(i).clone()));
        let mut approx_nuclides = network.approx_nuclides().to_vec();
        approx_nuclides.extend(eliminated);

        Network::assemble(species, rates, removed, approx_nuclides, *network.settings())
    }
}

#[cfg(test)]
mod tests {
    use super::{ApproximationEngine, ApproximationSettings};
    use crate::composition::Composition;
    use crate::evaluation::RateEvaluation;
    use crate::network::{Network, NetworkSettings};
    use crate::nucleus::{Nuclide, NuclideId};
    use crate::rates::{Bridge, Rate};
    use crate::screening::{NoScreening, PlasmaState, WeakScreening};
    use crate::test_fixtures::{al27, he4, mg24, mg24_bridge_rates, p, reaclib_set, si28};

    fn bridge_network(settings: NetworkSettings) -> Network {
        let (children, _) = mg24_bridge_rates();
        Network::new([p(), he4(), mg24(), al27(), si28()], children.to_vec(), settings).unwrap()
    }

    #[test]
    fn finds_the_al27_bridge() {
        let net = bridge_network(NetworkSettings::default());
        let engine = ApproximationEngine::default();
        let candidates = engine.candidates(&net);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].intermediate, al27());
        assert_eq!(candidates[0].target, mg24());
        assert_eq!(candidates[0].product, si28());

        let restricted = ApproximationEngine::new(ApproximationSettings {
            intermediate_nuclei: Some(vec![NuclideId::new(15, 31)]),
            ..ApproximationSettings::default()
        });
        assert!(restricted.candidates(&net).is_empty());

        let neutron = ApproximationEngine::new(ApproximationSettings {
            bridge: Bridge::Neutron,
            ..ApproximationSettings::default()
        });
        assert!(neutron.candidates(&net).is_empty());
    }

    #[test]
    fn apply_rewrites_the_network() {
        let net = bridge_network(NetworkSettings::default());
        let reduced = ApproximationEngine::default().apply(&net).unwrap();

        let names: Vec<String> = reduced.species().iter().map(Nuclide::name).collect();
        assert_eq!(names, ["he4", "mg24", "si28"]);
        assert_eq!(reduced.approx_nuclides(), &[al27()]);
        assert_eq!(reduced.rates().len(), 2);
        assert!(reduced.rates().iter().all(Rate::is_approximate));
        assert_eq!(reduced.removed_rates().len(), 6);
        assert!(reduced.is_removed(2));
        assert_eq!(reduced.rates()[0].fname(), "He4_Mg24_to_Si28_approx");
        assert!(reduced.rates()[1].is_reverse());

        let children = reduced.approximation_children(0).unwrap();
        assert!(children.iter().all(|&c| reduced.is_removed(c)));
        assert_eq!(reduced.approximation_children(1).unwrap(), children);
        // Children are screened even though they are superseded.
        assert!(reduced
            .screening_map()
            .iter()
            .any(|g| g.rates.contains(&children[0])));
    }

    #[test]
    fn ineligible_intermediate_is_left_alone() {
        // An extra rate touching al27 breaks the pattern.
        let (children, _) = mg24_bridge_rates();
        let mut rates = children.to_vec();
        let al27_ag = Rate::builder(vec![he4(), al27()], vec![Nuclide::new(15, 31)])
            .reaclib(vec![reaclib_set([10.0, -20.0, 0.0, 0.0, 0.0, 0.0, -1.5])])
            .unwrap();
        rates.push(al27_ag);
        let net = Network::from_rates(rates, NetworkSettings::default()).unwrap();
        let engine = ApproximationEngine::default();
        assert!(engine.candidates(&net).is_empty());
        let same = engine.apply(&net).unwrap();
        assert_eq!(same.rates().len(), net.rates().len());
        assert_eq!(same.species(), net.species());
    }

    #[test]
    fn net_flux_matches_steady_state_of_full_network() {
        let net = bridge_network(NetworkSettings::default());
        let reduced = ApproximationEngine::default().apply(&net).unwrap();
        let (t, rho) = (2.5e9, 1.0e7);

        let mut comp = Composition::new(reduced.species().iter().copied());
        comp.set(he4(), 0.3);
        comp.set(mg24(), 0.4);
        comp.set(si28(), 0.3);
        let reduced_ydot = reduced.evaluate_ydots(rho, t, &comp, &WeakScreening);
        let si = reduced.species_index(&si28().id()).unwrap();

        // Screen the full network with the same plasma: p and al27 enter
        // with zero abundance, so the composition moments are unchanged.
        let y = comp.molar_for(net.species());
        let plasma = PlasmaState::from_abundances(t, rho, net.species(), &y);
        let eval = RateEvaluation::new(&net, &plasma, &WeakScreening);
        // The six active rates are the children, in role order.
        let r = |i: usize| eval.rate(i).value;
        let (ax, xg, gx, xa) = (r(1), r(2), r(4), r(5));

        let ia = net.species_index(&he4().id()).unwrap();
        let im = net.species_index(&mg24().id()).unwrap();
        let ib = net.species_index(&si28().id()).unwrap();
        let ip = net.species_index(&p().id()).unwrap();
        let ix = net.species_index(&al27().id()).unwrap();
        let y_p = 1.0e-4;
        let feed = rho * y[ia] * y[im] * ax + y[ib] * gx;
        let mut y_full = y.clone();
        y_full[ip] = y_p;
        y_full[ix] = feed / (rho * y_p * (xg + xa));
        let full_ydot = net.ydots_with(&y_full, &eval);

        assert!(full_ydot[ix].abs() < 1e-10 * feed);
        let expected = full_ydot[ib];
        assert!(
            ((reduced_ydot[si] - expected) / expected).abs() < 1e-10,
            "{} vs {expected}",
            reduced_ydot[si]
        );
    }

    #[test]
    fn unscreened_networks_approximate_too() {
        let settings = NetworkSettings {
            do_screening: false,
            ..NetworkSettings::default()
        };
        let reduced = ApproximationEngine::default().apply(&bridge_network(settings)).unwrap();
        assert!(reduced.screening_map().is_empty());
        let mut comp = Composition::new(reduced.species().iter().copied());
        comp.set_equal();
        let ydot = reduced.evaluate_ydots(1e7, 3e9, &comp, &NoScreening);
        let total: f64 = reduced.species().iter().zip(&ydot).map(|(n, dy)| n.a() as f64 * dy).sum();
        assert!(total.abs() < 1e-12 * ydot.iter().map(|v| v.abs()).fold(0.0, f64::max));
    }
}
