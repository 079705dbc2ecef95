//! Numeric evaluation of a network at one thermodynamic point.
//!
//! [`RateEvaluation`] holds the screened rate coefficients of every rate in
//! the arena. [`NetworkEnvironment`] binds them, together with the
//! abundances and the plasma state, to the symbols of the derived
//! expressions.

use crate::composition::Composition;
use crate::constants::N_A;
use crate::equation_engine::{EquationSystem, Symbol, Variable};
use crate::error::EvalError;
use crate::jacobian::{JacobianBuilder, JacobianSystem};
use crate::network::Network;
use crate::rhs::{RhsBuilder, RhsSettings, RhsSystem};
use crate::screening::{screening_factors, PlasmaState};
use crate::traits::{
    DynamicalSystem, Environment, ScreeningModel, ThermalLoss, ThermalLossValue, ValueWithDerivative,
};
use nalgebra::DMatrix;

/// Screened rate coefficients and neutrino losses of all rates in a network's arena.
#[derive(Debug, Clone)]
pub struct RateEvaluation {
    plasma: PlasmaState,
    rates: Vec<ValueWithDerivative>,
    neutrino_losses: Vec<ValueWithDerivative>,
}

impl RateEvaluation {
    pub fn new(network: &Network, plasma: &PlasmaState, screening: &dyn ScreeningModel) -> Self {
        let all = network.all_rates();
        let rho_ye = plasma.density * plasma.ye;
        let t = plasma.temperature;
        let factors = screening_factors(network.screening_map(), all.len(), plasma, screening);

        let mut rates: Vec<ValueWithDerivative> = all
            .iter()
            .zip(&factors)
            .map(|(rate, factor)| match rate.approximate_law() {
                // Filled in from the children below when the rate is active.
                Some(law) => law.eval(t, rho_ye),
                None => rate.eval(t, rho_ye).times(*factor),
            })
            .collect();
        for r in 0..network.rates().len() {
            if let (Some(children), Some(law)) = (network.approximation_children(r), all[r].approximate_law()) {
                let combined = law.combine(&children.map(|c| rates[c]));
                rates[r] = combined;
            }
        }

        let neutrino_losses = all.iter().map(|rate| rate.neutrino_loss(t, rho_ye)).collect();
        Self {
            plasma: *plasma,
            rates,
            neutrino_losses,
        }
    }

    pub fn plasma(&self) -> &PlasmaState {
        &self.plasma
    }

    /// Screened coefficient of arena rate `i`.
    pub fn rate(&self, i: usize) -> ValueWithDerivative {
        self.rates[i]
    }

    pub fn neutrino_loss(&self, i: usize) -> ValueWithDerivative {
        self.neutrino_losses[i]
    }
}

/// Binds abundances, plasma state and rate values to expression symbols.
#[derive(Debug, Clone)]
pub struct NetworkEnvironment<'a> {
    network: &'a Network,
    y: &'a [f64],
    rates: RateEvaluation,
    thermal: ThermalLossValue,
}

impl<'a> NetworkEnvironment<'a> {
    pub fn new(network: &'a Network, y: &'a [f64], rates: RateEvaluation) -> Self {
        Self {
            network,
            y,
            rates,
            thermal: ThermalLossValue::default(),
        }
    }

    /// Evaluates `model` at the plasma state of the rates.
    pub fn with_thermal_loss(mut self, model: &dyn ThermalLoss) -> Self {
        self.thermal = model.evaluate(&self.rates.plasma);
        self
    }

    pub fn rates(&self) -> &RateEvaluation {
        &self.rates
    }

    fn thermal_partial(&self, partials: &[Variable]) -> Option<f64> {
        let plasma = &self.rates.plasma;
        match partials {
            [] => Some(self.thermal.value),
            [Variable::Temperature] => Some(self.thermal.dvalue_dt),
            [Variable::Abundance(j)] => {
                let z = self.network.nuclide(*j).z() as f64;
                Some(
                    -plasma.abar * plasma.abar * self.thermal.dvalue_dabar
                        + (z - plasma.zbar) * plasma.abar * self.thermal.dvalue_dzbar,
                )
            }
            _ => None,
        }
    }
}

impl Environment for NetworkEnvironment<'_> {
    fn value(&self, symbol: &Symbol) -> Option<f64> {
        let plasma = &self.rates.plasma;
        match symbol {
            Symbol::Abundance(i) => self.y.get(*i).copied(),
            Symbol::Temperature => Some(plasma.temperature),
            Symbol::Density => Some(plasma.density),
            Symbol::ElectronFraction => Some(plasma.ye),
            Symbol::Rate { index, dt_order } => {
                let v = self.rates.rates.get(*index)?;
                match dt_order {
                    0 => Some(v.value),
                    1 => Some(v.dvalue_dt),
                    _ => None,
                }
            }
            Symbol::NeutrinoLoss { index, dt_order } => {
                let v = self.rates.neutrino_losses.get(*index)?;
                match dt_order {
                    0 => Some(v.value),
                    1 => Some(v.dvalue_dt),
                    _ => None,
                }
            }
            Symbol::ThermalLoss { partials } => self.thermal_partial(partials),
        }
    }
}

impl Network {
    /// Screened rates at (rho, T) for the molar abundances `y` in species order.
    pub fn rate_evaluation(&self, rho: f64, t: f64, y: &[f64], screening: &dyn ScreeningModel) -> RateEvaluation {
        let plasma = PlasmaState::from_abundances(t, rho, self.species(), y);
        RateEvaluation::new(self, &plasma, screening)
    }

    /// Molar reaction rate of each active rate [mol/g/s]:
    /// prefactor * rho^n * (Ye) * rate * prod Y.
    pub fn rate_terms_with(&self, y: &[f64], eval: &RateEvaluation) -> Vec<f64> {
        let plasma = eval.plasma();
        self.rates()
            .iter()
            .enumerate()
            .map(|(r, rate)| {
                let mut value = rate.prefactor() * plasma.density.powi(rate.density_exponent()) * eval.rate(r).value;
                if rate.uses_electron_fraction() {
                    value *= plasma.ye;
                }
                self.link(r)
                    .reactants
                    .iter()
                    .fold(value, |acc, &(i, count)| acc * y[i].powi(count as i32))
            })
            .collect()
    }

    /// dY/dt per species.
    pub fn ydots_with(&self, y: &[f64], eval: &RateEvaluation) -> Vec<f64> {
        let terms = self.rate_terms_with(y, eval);
        (0..self.len())
            .map(|i| {
                self.touching(i)
                    .into_iter()
                    .map(|r| self.link(r).stoichiometry(i) as f64 * terms[r])
                    .sum()
            })
            .collect()
    }

    /// (enuc, enu) [erg/g/s]: net energy release with neutrino losses
    /// already subtracted, and the neutrino losses of tabular rates.
    pub fn energy_with(&self, y: &[f64], eval: &RateEvaluation) -> (f64, f64) {
        let ydots = self.ydots_with(y, eval);
        let mass_rate: f64 = self.species().iter().zip(&ydots).map(|(n, dy)| dy * n.mass_energy()).sum();
        let enu: f64 = self
            .rates()
            .iter()
            .enumerate()
            .filter(|(_, rate)| rate.is_tabular())
            .map(|(r, _)| {
                let (i, _) = self.link(r).reactants[0];
                N_A * y[i] * eval.neutrino_loss(r).value
            })
            .sum();
        (-N_A * mass_rate - enu, enu)
    }

    fn at(&self, rho: f64, t: f64, composition: &Composition, screening: &dyn ScreeningModel) -> (Vec<f64>, RateEvaluation) {
        let y = composition.molar_for(self.species());
        let eval = self.rate_evaluation(rho, t, &y, screening);
        (y, eval)
    }

    pub fn evaluate_rates(
        &self,
        rho: f64,
        t: f64,
        composition: &Composition,
        screening: &dyn ScreeningModel,
    ) -> Vec<f64> {
        let (y, eval) = self.at(rho, t, composition, screening);
        self.rate_terms_with(&y, &eval)
    }

    pub fn evaluate_ydots(
        &self,
        rho: f64,
        t: f64,
        composition: &Composition,
        screening: &dyn ScreeningModel,
    ) -> Vec<f64> {
        let (y, eval) = self.at(rho, t, composition, screening);
        self.ydots_with(&y, &eval)
    }

    pub fn evaluate_energy_generation(
        &self,
        rho: f64,
        t: f64,
        composition: &Composition,
        screening: &dyn ScreeningModel,
    ) -> (f64, f64) {
        let (y, eval) = self.at(rho, t, composition, screening);
        self.energy_with(&y, &eval)
    }

    /// Per species, the production and destruction terms summed without sign.
    pub fn evaluate_activity(
        &self,
        rho: f64,
        t: f64,
        composition: &Composition,
        screening: &dyn ScreeningModel,
    ) -> Vec<f64> {
        let terms = self.evaluate_rates(rho, t, composition, screening);
        (0..self.len())
            .map(|i| {
                let count = |side: &[(usize, u32)]| side.iter().find(|(j, _)| *j == i).map_or(0, |(_, c)| *c);
                self.touching(i)
                    .into_iter()
                    .map(|r| {
                        let link = self.link(r);
                        (count(&link.reactants) + count(&link.products)) as f64 * terms[r]
                    })
                    .sum()
            })
            .collect()
    }

    /// Active rates whose term stays below `cutoff_ratio` times the fastest
    /// term at every `(rho, T, composition)` state, with their largest ratio.
    pub fn find_unimportant_rates(
        &self,
        states: &[(f64, f64, Composition)],
        cutoff_ratio: f64,
        screening: &dyn ScreeningModel,
    ) -> Vec<(usize, f64)> {
        let mut largest = vec![0.0_f64; self.rates().len()];
        for (rho, t, composition) in states {
            let terms = self.evaluate_rates(*rho, *t, composition, screening);
            let fastest = terms.iter().copied().fold(0.0, f64::max);
            if fastest <= 0.0 {
                continue;
            }
            for (ratio, term) in largest.iter_mut().zip(&terms) {
                *ratio = ratio.max(term / fastest);
            }
        }
        largest
            .into_iter()
            .enumerate()
            .filter(|(_, ratio)| *ratio < cutoff_ratio)
            .collect()
    }
}

/// Abundance equations of a network compiled at fixed temperature and
/// density, for use by an external integrator.
pub struct NetworkSystem {
    network: Network,
    temperature: f64,
    density: f64,
    screening: Box<dyn ScreeningModel>,
    rhs: RhsSystem,
    jacobian: JacobianSystem,
    compiled_rhs: EquationSystem,
    compiled_jacobian: EquationSystem,
}

impl NetworkSystem {
    pub fn new(network: Network, temperature: f64, density: f64, screening: Box<dyn ScreeningModel>) -> Self {
        let rhs = RhsBuilder::new(RhsSettings {
            include_neutrino_losses: false,
            include_thermal_losses: false,
        })
        .derive(&network);
        let jacobian = JacobianBuilder::derive(&rhs);
        let n = network.len();
        let compiled_rhs = EquationSystem::new(&rhs.ydot);
        let compiled_jacobian = EquationSystem::new((0..n).flat_map(|i| (0..n).map(move |j| (i, j))).map(|(i, j)| jacobian.entry(i, j)));
        Self {
            network,
            temperature,
            density,
            screening,
            rhs,
            jacobian,
            compiled_rhs,
            compiled_jacobian,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn rhs(&self) -> &RhsSystem {
        &self.rhs
    }

    pub fn jacobian_system(&self) -> &JacobianSystem {
        &self.jacobian
    }

    fn environment<'a>(&'a self, y: &'a [f64]) -> NetworkEnvironment<'a> {
        let eval = self.network.rate_evaluation(self.density, self.temperature, y, self.screening.as_ref());
        NetworkEnvironment::new(&self.network, y, eval)
    }

    pub fn try_apply(&self, y: &[f64], out: &mut [f64]) -> Result<(), EvalError> {
        self.compiled_rhs.evaluate(&self.environment(y), out)
    }

    /// d(dY/dt)/dY at `y`, species by species.
    pub fn jacobian(&self, y: &[f64]) -> Result<DMatrix<f64>, EvalError> {
        let n = self.network.len();
        let mut values = vec![0.0; n * n];
        self.compiled_jacobian.evaluate(&self.environment(y), &mut values)?;
        Ok(DMatrix::from_row_slice(n, n, &values))
    }
}

impl DynamicalSystem<f64> for NetworkSystem {
    fn dimension(&self) -> usize {
        self.network.len()
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        if let Err(err) = self.try_apply(x, out) {
            log::error!("network right-hand side could not be evaluated: {err}");
            out.fill(f64::NAN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{NetworkEnvironment, NetworkSystem};
    use crate::composition::Composition;
    use crate::constants::{MEV_TO_ERG, N_A};
    use crate::equation_engine::Symbol;
    use crate::network::{Network, NetworkSettings};
    use crate::nucleus::Nuclide;
    use crate::partition::PartitionFunctionTable;
    use crate::rates::{Rate, RateTable, WeakKind};
    use crate::screening::{IntermediateScreening, NoScreening, PlasmaState, StrongScreening, WeakScreening};
    use crate::test_fixtures::{c12, c12_ag, he4, o16, o16_ag, triple_alpha};
    use crate::traits::{
        DynamicalSystem, Environment, ScreeningModel, ThermalLoss, ThermalLossValue, ValueWithDerivative,
    };

    fn network() -> Network {
        let reverse = Rate::derived_from(&c12_ag(), &PartitionFunctionTable::new(), false).unwrap();
        Network::from_rates(vec![triple_alpha(), c12_ag(), reverse, o16_ag()], NetworkSettings::default()).unwrap()
    }

    fn composition(net: &Network) -> Composition {
        let mut comp = Composition::new(net.species().iter().copied());
        comp.set(he4(), 0.6);
        comp.set(c12(), 0.3);
        comp.set(o16(), 0.1);
        comp
    }

    #[test]
    fn screening_multiplies_raw_rates() {
        let net = network();
        let comp = composition(&net);
        let (rho, t) = (1e6, 3e8);
        let y = comp.molar_for(net.species());
        let plain = net.rate_evaluation(rho, t, &y, &NoScreening);
        let screened = net.rate_evaluation(rho, t, &y, &WeakScreening);
        let plasma = PlasmaState::from_abundances(t, rho, net.species(), &y);
        let pair = crate::traits::ScreeningPair::new(2.0, 4.0, 6.0, 12.0);
        let factor = crate::traits::ScreeningModel::factor(&WeakScreening, &plasma, &pair);
        let expected = plain.rate(1).times(factor);
        assert!((screened.rate(1).value - expected.value).abs() < 1e-12 * expected.value);
        assert!((screened.rate(1).dvalue_dt - expected.dvalue_dt).abs() < 1e-10 * expected.dvalue_dt.abs());
        // The derived reverse is a one-body rate and stays unscreened.
        assert_eq!(screened.rate(2), plain.rate(2));
    }

    #[test]
    fn zero_temperature_gives_zero_rates() {
        let net = network();
        let y = composition(&net).molar_for(net.species());
        let models: [&dyn ScreeningModel; 3] = [&WeakScreening, &StrongScreening, &IntermediateScreening::default()];
        for model in models {
            let eval = net.rate_evaluation(1e7, 0.0, &y, model);
            for r in 0..net.all_rates().len() {
                assert_eq!(eval.rate(r), ValueWithDerivative::ZERO, "{} screening, rate {r}", model.name());
            }
            assert!(net.ydots_with(&y, &eval).iter().all(|dy| *dy == 0.0));
        }
    }

    #[test]
    fn energy_generation_of_a_single_capture() {
        let net = Network::build([he4(), c12(), o16()], vec![c12_ag()]).unwrap();
        let comp = composition(&net);
        let (rho, t) = (1e7, 1e9);
        let terms = net.evaluate_rates(rho, t, &comp, &NoScreening);
        let (enuc, enu) = net.evaluate_energy_generation(rho, t, &comp, &NoScreening);
        assert_eq!(enu, 0.0);
        let expected = N_A * terms[0] * c12_ag().q_value() * MEV_TO_ERG;
        assert!(((enuc - expected) / expected).abs() < 1e-9, "{enuc} vs {expected}");
    }

    #[test]
    fn tabular_neutrino_losses_reduce_energy() {
        let na23 = Nuclide::new(11, 23).with_binding_energy(8.111493);
        let ne23 = Nuclide::new(10, 23).with_binding_energy(7.955256);
        let table = RateTable::new(vec![1.0, 10.0], vec![7.0, 10.0], vec![-2.0; 4], vec![1.5; 4]).unwrap();
        let ec = Rate::builder(vec![na23], vec![ne23])
            .weak(WeakKind::ElectronCapture)
            .tabular(table)
            .unwrap();
        let net = Network::build([ne23, na23], vec![ec]).unwrap();
        let mut comp = Composition::new([ne23, na23]);
        comp.set_equal();
        let (enuc, enu) = net.evaluate_energy_generation(1e8, 1e9, &comp, &NoScreening);
        let y_na = 0.5 / 23.0;
        let expected_enu = N_A * y_na * 0.01 * 1.5 * MEV_TO_ERG;
        assert!(((enu - expected_enu) / expected_enu).abs() < 1e-12);
        let ydots = net.evaluate_ydots(1e8, 1e9, &comp, &NoScreening);
        assert!((ydots[1] + 0.01 * y_na).abs() < 1e-15);
        let released = N_A * 0.01 * y_na * (na23.mass_energy() - ne23.mass_energy());
        assert!(((enuc + enu - released) / released).abs() < 1e-6);
    }

    #[test]
    fn activity_counts_every_term() {
        let net = network();
        let comp = composition(&net);
        let terms = net.evaluate_rates(1e6, 1e9, &comp, &NoScreening);
        let activity = net.evaluate_activity(1e6, 1e9, &comp, &NoScreening);
        // he4: 3 per triple-alpha, 1 per c12(a,g), reverse and o16(a,g).
        let expected = 3.0 * terms[0] + terms[1] + terms[2] + terms[3];
        assert!((activity[0] - expected).abs() < 1e-12 * expected);
    }

    #[test]
    fn unimportant_rates_fall_below_the_cutoff() {
        let net = network();
        let comp = composition(&net);
        let states = vec![(1e6, 1e9, comp.clone()), (1e7, 1.5e9, comp)];
        let slow = net.find_unimportant_rates(&states, 1e-3, &NoScreening);
        assert!(slow.iter().all(|(_, ratio)| *ratio < 1e-3));
        let all = net.find_unimportant_rates(&states, 2.0, &NoScreening);
        assert_eq!(all.len(), net.rates().len());
    }

    struct CubicLoss;

    impl ThermalLoss for CubicLoss {
        fn evaluate(&self, plasma: &PlasmaState) -> ThermalLossValue {
            let t9 = plasma.temperature / 1e9;
            let value = 1e3 * t9.powi(3) * plasma.zbar / plasma.abar;
            ThermalLossValue {
                value,
                dvalue_dt: 3.0 * value / plasma.temperature,
                dvalue_dabar: -value / plasma.abar,
                dvalue_dzbar: value / plasma.zbar,
            }
        }
    }

    #[test]
    fn environment_binds_every_symbol() {
        let net = network();
        let comp = composition(&net);
        let y = comp.molar_for(net.species());
        let eval = net.rate_evaluation(1e6, 1e9, &y, &StrongScreening);
        let env = NetworkEnvironment::new(&net, &y, eval).with_thermal_loss(&CubicLoss);
        assert_eq!(env.value(&Symbol::Abundance(1)), Some(y[1]));
        assert_eq!(env.value(&Symbol::Density), Some(1e6));
        assert!(env.value(&Symbol::rate(1)).is_some());
        assert!(env.value(&Symbol::Rate { index: 1, dt_order: 2 }).is_none());
        assert!(env.value(&Symbol::thermal_loss()).unwrap() > 0.0);
        assert!(env.value(&Symbol::Abundance(99)).is_none());
    }

    #[test]
    fn compiled_system_matches_numeric_ydots() {
        let net = network();
        let comp = composition(&net);
        let y = comp.molar_for(net.species());
        let (rho, t) = (1e6, 1.2e9);
        let expected = net.evaluate_ydots(rho, t, &comp, &WeakScreening);
        let system = NetworkSystem::new(net, t, rho, Box::new(WeakScreening));
        assert_eq!(system.dimension(), 4);
        let mut out = vec![0.0; 4];
        system.apply(0.0, &y, &mut out);
        let scale = expected.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        for (a, b) in out.iter().zip(&expected) {
            assert!((a - b).abs() <= 1e-10 * scale, "{a} vs {b}");
        }
        let jac = system.jacobian(&y).unwrap();
        assert_eq!(jac.nrows(), 4);
        // ne20 only appears as a product, so its column is empty.
        assert!(jac.column(3).iter().all(|v| *v == 0.0));
    }
}
