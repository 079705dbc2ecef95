//! Electron screening of charged-particle rates.
//!
//! A [`PlasmaState`] is built once per evaluation point from (T, rho, Y).
//! Screening models map a plasma state and a two-body pair to a
//! multiplicative enhancement exp(h) and its temperature derivative.

use crate::composition::Composition;
use crate::constants::{K_B, N_A, Q_E};
use crate::nucleus::Nuclide;
use crate::rates::Rate;
use crate::traits::{ScreeningModel, ScreeningPair, ValueWithDerivative};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Composition moments of the plasma at one (T, rho, Y) point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlasmaState {
    pub temperature: f64,
    pub density: f64,
    /// Sum of molar abundances.
    pub ytot: f64,
    pub abar: f64,
    pub zbar: f64,
    pub z2bar: f64,
    /// Electron fraction.
    pub ye: f64,
    /// Electron number density [1/cm^3].
    pub n_e: f64,
    /// Electron coupling parameter e^2 / (a_e k T).
    pub gamma_e: f64,
}

impl PlasmaState {
    /// `species` yields (Z, Y) for every nucleus.
    pub fn new(temperature: f64, density: f64, species: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let (mut ytot, mut zy, mut z2y) = (0.0, 0.0, 0.0);
        for (z, y) in species {
            ytot += y;
            zy += z * y;
            z2y += z * z * y;
        }
        if !(ytot > 0.0) {
            return Self {
                temperature,
                density,
                ytot: 0.0,
                abar: 0.0,
                zbar: 0.0,
                z2bar: 0.0,
                ye: 0.0,
                n_e: 0.0,
                gamma_e: 0.0,
            };
        }
        let abar = 1.0 / ytot;
        let n_e = density * zy * N_A;
        let a_e = (3.0 / (4.0 * PI * n_e)).cbrt();
        Self {
            temperature,
            density,
            ytot,
            abar,
            zbar: abar * zy,
            z2bar: abar * z2y,
            ye: zy,
            n_e,
            gamma_e: Q_E * Q_E / (a_e * K_B * temperature),
        }
    }

    pub fn from_abundances(temperature: f64, density: f64, species: &[Nuclide], y: &[f64]) -> Self {
        Self::new(
            temperature,
            density,
            species.iter().zip(y).map(|(n, y)| (n.z() as f64, *y)),
        )
    }

    pub fn from_composition(temperature: f64, density: f64, composition: &Composition) -> Self {
        Self::new(
            temperature,
            density,
            composition.molar().into_iter().map(|(n, y)| (n.z() as f64, y)),
        )
    }
}

fn exp_factor(h: f64, dh_dt: f64) -> ValueWithDerivative {
    let f = h.exp();
    ValueWithDerivative::new(f, f * dh_dt)
}

/// No enhancement.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScreening;

impl ScreeningModel for NoScreening {
    fn name(&self) -> &'static str {
        "none"
    }

    fn factor(&self, _plasma: &PlasmaState, _pair: &ScreeningPair) -> ValueWithDerivative {
        ValueWithDerivative::ONE
    }
}

/// Salpeter's weak-screening limit (Debye-Hueckel).
#[derive(Debug, Clone, Copy, Default)]
pub struct WeakScreening;

impl WeakScreening {
    pub fn exponent(plasma: &PlasmaState, pair: &ScreeningPair) -> (f64, f64) {
        let t = plasma.temperature;
        let zeta = (plasma.density * (plasma.z2bar + plasma.zbar) / plasma.abar).sqrt();
        let h = pair.z1 * pair.z2 * 1.88e8 * zeta * t.powf(-1.5);
        (h, -1.5 * h / t)
    }
}

impl ScreeningModel for WeakScreening {
    fn name(&self) -> &'static str {
        "weak"
    }

    fn factor(&self, plasma: &PlasmaState, pair: &ScreeningPair) -> ValueWithDerivative {
        let (h, dh) = Self::exponent(plasma, pair);
        exp_factor(h, dh)
    }
}

/// Ion-sphere strong-screening limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrongScreening;

impl StrongScreening {
    pub fn exponent(plasma: &PlasmaState, pair: &ScreeningPair) -> (f64, f64) {
        let (z1, z2) = (pair.z1, pair.z2);
        let f53 = |z: f64| z.powf(5.0 / 3.0);
        let h = 0.9 * (f53(z1 + z2) - f53(z1) - f53(z2)) * plasma.gamma_e;
        (h, -h / plasma.temperature)
    }
}

impl ScreeningModel for StrongScreening {
    fn name(&self) -> &'static str {
        "strong"
    }

    fn factor(&self, plasma: &PlasmaState, pair: &ScreeningPair) -> ValueWithDerivative {
        let (h, dh) = Self::exponent(plasma, pair);
        exp_factor(h, dh)
    }
}

/// Weak screening while it is small, the smaller of the weak and strong
/// limits once it is large, and a linear blend in between.
#[derive(Debug, Clone, Copy)]
pub struct IntermediateScreening {
    pub weak_limit: f64,
    pub strong_limit: f64,
}

impl Default for IntermediateScreening {
    fn default() -> Self {
        Self {
            weak_limit: 0.1,
            strong_limit: 0.3,
        }
    }
}

impl IntermediateScreening {
    pub fn exponent(&self, plasma: &PlasmaState, pair: &ScreeningPair) -> (f64, f64) {
        let (hw, dhw) = WeakScreening::exponent(plasma, pair);
        if hw <= self.weak_limit {
            return (hw, dhw);
        }
        let (hs, dhs) = StrongScreening::exponent(plasma, pair);
        let (hmin, dhmin) = if hs < hw { (hs, dhs) } else { (hw, dhw) };
        if hw >= self.strong_limit {
            return (hmin, dhmin);
        }
        let width = self.strong_limit - self.weak_limit;
        let alpha = (hw - self.weak_limit) / width;
        let dalpha = dhw / width;
        let h = (1.0 - alpha) * hw + alpha * hmin;
        let dh = (1.0 - alpha) * dhw + alpha * dhmin + dalpha * (hmin - hw);
        (h, dh)
    }
}

impl ScreeningModel for IntermediateScreening {
    fn name(&self) -> &'static str {
        "intermediate"
    }

    fn factor(&self, plasma: &PlasmaState, pair: &ScreeningPair) -> ValueWithDerivative {
        let (h, dh) = self.exponent(plasma, pair);
        exp_factor(h, dh)
    }
}

/// What a rate is screened as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScreeningTarget {
    Pair(Nuclide, Nuclide),
    /// he4 + he4, then he4 + be8.
    TripleAlpha,
}

impl ScreeningTarget {
    /// Screening target of `rate`; `None` when it is passed through unscreened.
    ///
    /// Rates are screened on their two lightest charged reactants. With
    /// `symmetric`, reverse rates use their products so that they share
    /// the factor of the forward rate.
    pub fn of(rate: &Rate, symmetric: bool) -> Option<Self> {
        if rate.is_approximate() {
            return None;
        }
        let nuclei = if symmetric && rate.is_reverse() {
            rate.products()
        } else {
            rate.reactants()
        };
        if nuclei.len() == 3 && nuclei.iter().all(Nuclide::is_alpha) {
            return Some(ScreeningTarget::TripleAlpha);
        }
        let mut charged = nuclei.iter().filter(|n| n.z() > 0);
        match (charged.next(), charged.next()) {
            (Some(a), Some(b)) => Some(ScreeningTarget::Pair(*a, *b)),
            _ => None,
        }
    }

    /// Unity for a cold plasma or one without nuclei.
    pub fn factor(&self, model: &dyn ScreeningModel, plasma: &PlasmaState) -> ValueWithDerivative {
        if !(plasma.temperature > 0.0 && plasma.ytot > 0.0) {
            return ValueWithDerivative::ONE;
        }
        let pair = |a: &Nuclide, b: &Nuclide| ScreeningPair::new(a.z() as f64, a.a() as f64, b.z() as f64, b.a() as f64);
        match self {
            ScreeningTarget::Pair(a, b) => model.factor(plasma, &pair(a, b)),
            ScreeningTarget::TripleAlpha => {
                let he4 = Nuclide::new(2, 4);
                let be8 = Nuclide::new(4, 8);
                let first = model.factor(plasma, &pair(&he4, &he4));
                let second = model.factor(plasma, &pair(&he4, &be8));
                first.times(second)
            }
        }
    }
}

/// Rates that share one screening target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningGroup {
    pub target: ScreeningTarget,
    /// Indices into the rate list the map was built from.
    pub rates: Vec<usize>,
}

/// Groups `rates` by screening target, in order of first appearance.
pub fn screening_map(rates: &[Rate], symmetric: bool) -> Vec<ScreeningGroup> {
    let mut groups: Vec<ScreeningGroup> = Vec::new();
    for (i, rate) in rates.iter().enumerate() {
        let Some(target) = ScreeningTarget::of(rate, symmetric) else {
            continue;
        };
        match groups.iter_mut().find(|g| g.target == target) {
            Some(group) => group.rates.push(i),
            None => groups.push(ScreeningGroup { target, rates: vec![i] }),
        }
    }
    groups
}

/// Screening factor per rate index; rates outside the map get 1.
pub fn screening_factors(
    map: &[ScreeningGroup],
    n_rates: usize,
    plasma: &PlasmaState,
    model: &dyn ScreeningModel,
) -> Vec<ValueWithDerivative> {
    let mut factors = vec![ValueWithDerivative::ONE; n_rates];
    for group in map {
        let factor = group.target.factor(model, plasma);
        for &i in &group.rates {
            factors[i] = factor;
        }
    }
    factors
}

#[cfg(test)]
mod tests {
    use super::{
        screening_factors, screening_map, IntermediateScreening, NoScreening, PlasmaState, ScreeningTarget,
        StrongScreening, WeakScreening,
    };
    use crate::nucleus::Nuclide;
    use crate::partition::PartitionFunctionTable;
    use crate::rates::Rate;
    use crate::test_fixtures::{c12, c12_ag, he4, reaclib_set};
    use crate::traits::{ScreeningModel, ScreeningPair, ValueWithDerivative};

    fn plasma(t: f64, rho: f64) -> PlasmaState {
        // Equal mass fractions of he4 and c12.
        PlasmaState::new(t, rho, [(2.0, 0.125), (6.0, 0.5 / 12.0)])
    }

    #[test]
    fn plasma_moments() {
        let p = plasma(1e8, 1e4);
        assert!((p.abar - 6.0).abs() < 1e-12);
        assert!((p.zbar - 3.0).abs() < 1e-12);
        assert!((p.ye - 0.5).abs() < 1e-14);
        assert!((p.z2bar - 6.0 * (4.0 * 0.125 + 36.0 * 0.5 / 12.0)).abs() < 1e-12);
    }

    #[test]
    fn weak_limit_closed_form() {
        let p = plasma(1e8, 1e4);
        let pair = ScreeningPair::new(2.0, 4.0, 6.0, 12.0);
        let f = WeakScreening.factor(&p, &pair);
        let h = 12.0 * 1.88e8 * (1e4 * (p.z2bar + p.zbar) / p.abar).sqrt() / 1e12;
        assert!((f.value - h.exp()).abs() < 1e-12);
        assert!(f.value > 1.0);
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let pair = ScreeningPair::new(2.0, 4.0, 6.0, 12.0);
        let models: [&dyn ScreeningModel; 3] = [&WeakScreening, &StrongScreening, &IntermediateScreening::default()];
        for model in models {
            for (t, rho) in [(1e8, 1e4), (3e8, 1e6), (2e7, 1e8)] {
                let h = t * 1e-6;
                let f = |t| model.factor(&plasma(t, rho), &pair).value;
                let fd = (f(t + h) - f(t - h)) / (2.0 * h);
                let d = model.factor(&plasma(t, rho), &pair).dvalue_dt;
                assert!(
                    (d - fd).abs() <= 1e-6 * d.abs().max(1e-30),
                    "{}: T={t} rho={rho}: {d} vs {fd}",
                    model.name()
                );
            }
        }
    }

    #[test]
    fn intermediate_is_continuous_at_both_limits() {
        let model = IntermediateScreening::default();
        let pair = ScreeningPair::new(2.0, 4.0, 6.0, 12.0);
        // Scan densities so the weak exponent crosses 0.1 and 0.3.
        let mut previous: Option<f64> = None;
        let mut rho: f64 = 1e2;
        while rho < 1e5 {
            let (h, _) = model.exponent(&plasma(1e8, rho), &pair);
            if let Some(prev) = previous {
                assert!((h - prev).abs() < 0.05, "jump at rho={rho}: {prev} -> {h}");
            }
            previous = Some(h);
            rho *= 1.05;
        }
    }

    #[test]
    fn no_screening_is_identity() {
        let f = NoScreening.factor(&plasma(1e8, 1e6), &ScreeningPair::new(2.0, 4.0, 2.0, 4.0));
        assert_eq!(f.value, 1.0);
        assert_eq!(f.dvalue_dt, 0.0);
    }

    #[test]
    fn empty_plasma_is_neutral() {
        let p = PlasmaState::new(1e8, 1e6, [(2.0, 0.0), (6.0, 0.0)]);
        assert_eq!((p.ytot, p.abar, p.zbar, p.z2bar, p.ye), (0.0, 0.0, 0.0, 0.0, 0.0));
        assert_eq!(p.gamma_e, 0.0);
        let f = ScreeningTarget::Pair(he4(), c12()).factor(&WeakScreening, &p);
        assert_eq!(f, ValueWithDerivative::ONE);
    }

    #[test]
    fn cold_plasma_is_unscreened() {
        let cold = plasma(0.0, 1e6);
        let models: [&dyn ScreeningModel; 3] = [&WeakScreening, &StrongScreening, &IntermediateScreening::default()];
        for model in models {
            assert_eq!(ScreeningTarget::TripleAlpha.factor(model, &cold), ValueWithDerivative::ONE);
            assert_eq!(ScreeningTarget::Pair(he4(), c12()).factor(model, &cold), ValueWithDerivative::ONE);
        }
    }

    #[test]
    fn map_groups_rates_by_target() {
        let forward = c12_ag();
        let reverse = Rate::derived_from(&forward, &PartitionFunctionTable::new(), false).unwrap();
        let triple_alpha = Rate::builder(vec![he4(), he4(), he4()], vec![c12()])
            .reaclib(vec![reaclib_set([-0.971052, 0.0, -37.06, 29.3493, -115.507, -10.0, -1.33333])])
            .unwrap();
        let n_decay = Rate::builder(vec![Nuclide::new(0, 1)], vec![Nuclide::new(1, 1)])
            .weak(crate::rates::WeakKind::BetaMinus)
            .reaclib(vec![reaclib_set([-6.78, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])])
            .unwrap();
        let rates = vec![forward, reverse, triple_alpha, n_decay];

        let plain = screening_map(&rates, false);
        assert_eq!(plain.len(), 2);
        assert_eq!(plain[0].target, ScreeningTarget::Pair(he4(), c12()));
        assert_eq!(plain[0].rates, vec![0]);
        assert_eq!(plain[1].target, ScreeningTarget::TripleAlpha);

        let symmetric = screening_map(&rates, true);
        assert_eq!(symmetric[0].rates, vec![0, 1]);

        let p = plasma(1e8, 1e6);
        let factors = screening_factors(&symmetric, rates.len(), &p, &WeakScreening);
        assert_eq!(factors[0], factors[1]);
        assert_eq!(factors[3].value, 1.0);
        let aa = WeakScreening.factor(&p, &ScreeningPair::new(2.0, 4.0, 2.0, 4.0));
        let abe = WeakScreening.factor(&p, &ScreeningPair::new(2.0, 4.0, 4.0, 8.0));
        assert!((factors[2].value - aa.value * abe.value).abs() < 1e-12);
    }
}
