//! Mass-fraction compositions.

use crate::nucleus::Nuclide;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Mass fractions X of a set of nuclei.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    x: BTreeMap<Nuclide, f64>,
}

impl Composition {
    /// Every nucleus starts at a small floor value.
    pub fn new(nuclei: impl IntoIterator<Item = Nuclide>) -> Self {
        Self::with_floor(nuclei, 1e-16)
    }

    pub fn with_floor(nuclei: impl IntoIterator<Item = Nuclide>, small: f64) -> Self {
        Self {
            x: nuclei.into_iter().map(|n| (n, small)).collect(),
        }
    }

    pub fn nuclei(&self) -> impl Iterator<Item = &Nuclide> {
        self.x.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Nuclide, f64)> {
        self.x.iter().map(|(n, x)| (n, *x))
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn get(&self, nuclide: &Nuclide) -> f64 {
        self.x.get(nuclide).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, nuclide: Nuclide, x: f64) {
        self.x.insert(nuclide, x);
    }

    pub fn set_all(&mut self, x: f64) {
        self.x.values_mut().for_each(|v| *v = x);
    }

    pub fn set_equal(&mut self) {
        let x = 1.0 / self.x.len() as f64;
        self.set_all(x);
    }

    /// Roughly solar: p = 0.7, he4 = 0.3 - z, the rest shares `z` equally.
    pub fn set_solar_like(&mut self, z: f64) -> Result<()> {
        let n = self.x.len();
        if n < 3 {
            bail!("A solar-like composition needs at least three nuclei, got {n}.");
        }
        let rest = z / (n - 2) as f64;
        for (nuc, x) in self.x.iter_mut() {
            *x = if nuc.is_proton() {
                0.7
            } else if nuc.is_alpha() {
                0.3 - z
            } else {
                rest
            };
        }
        self.normalize();
        Ok(())
    }

    pub fn sum_x(&self) -> f64 {
        self.x.values().sum()
    }

    pub fn normalize(&mut self) {
        let total = self.sum_x();
        if total > 0.0 {
            self.x.values_mut().for_each(|v| *v /= total);
        }
    }

    /// Molar abundances Y = X / A.
    pub fn molar(&self) -> BTreeMap<Nuclide, f64> {
        self.x.iter().map(|(n, x)| (*n, x / n.a() as f64)).collect()
    }

    /// Molar abundances in the order of `species`; absent species are zero.
    pub fn molar_for(&self, species: &[Nuclide]) -> Vec<f64> {
        species.iter().map(|n| self.get(n) / n.a() as f64).collect()
    }

    pub fn ye(&self) -> f64 {
        let weighted: f64 = self.x.iter().map(|(n, x)| x * n.z() as f64 / n.a() as f64).sum();
        weighted / self.sum_x()
    }

    pub fn abar(&self) -> f64 {
        1.0 / self.x.iter().map(|(n, x)| x / n.a() as f64).sum::<f64>()
    }

    pub fn zbar(&self) -> f64 {
        self.abar() * self.ye()
    }

    /// This composition rebinned onto `nuclei`.
    ///
    /// Each nucleus goes to the heaviest target whose A does not exceed its
    /// own; among targets of that A, the one with the highest Z not above
    /// its own (else the lowest Z). Nuclei lighter than every target go to
    /// the lightest one. Nuclei in `exclude` must be on both sides and map
    /// only onto themselves.
    pub fn bin_as(&self, nuclei: &[Nuclide], exclude: &[Nuclide]) -> Result<Composition> {
        let mut targets = nuclei.to_vec();
        targets.sort_by_key(|n| (n.a(), n.z()));
        targets.dedup();
        let mut binned = Composition::with_floor(targets.iter().copied(), 0.0);

        for kept in exclude {
            if !(targets.contains(kept) && self.x.contains_key(kept)) {
                bail!("Cannot keep {kept} unbinned: it is not in both the original and the new composition.");
            }
            targets.retain(|n| n != kept);
            binned.set(*kept, self.get(kept));
        }

        for (old, x) in self.x.iter().filter(|(n, _)| !exclude.contains(*n)) {
            let Some(lightest) = targets.first() else {
                bail!("No nucleus left to bin {old} into.");
            };
            let target = match targets.iter().map(Nuclide::a).filter(|&a| a <= old.a()).max() {
                None => *lightest,
                Some(a) => {
                    let same_a: Vec<&Nuclide> = targets.iter().filter(|q| q.a() == a).collect();
                    **same_a.iter().rev().find(|q| q.z() <= old.z()).unwrap_or(&same_a[0])
                }
            };
            log::debug!("storing {old} as {target}");
            *binned.x.entry(target).or_insert(0.0) += *x;
        }
        Ok(binned)
    }
}

impl fmt::Display for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, x) in &self.x {
            writeln!(f, "  X({n}) : {x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Composition;
    use crate::nucleus::Nuclide;

    #[test]
    fn equal_mix_moments() {
        let he4 = Nuclide::new(2, 4);
        let c12 = Nuclide::new(6, 12);
        let mut comp = Composition::new([he4, c12]);
        comp.set_equal();
        assert!((comp.sum_x() - 1.0).abs() < 1e-15);
        assert!((comp.ye() - 0.5).abs() < 1e-15);
        // 1/abar = 0.5/4 + 0.5/12
        assert!((comp.abar() - 6.0).abs() < 1e-12);
        assert!((comp.zbar() - 3.0).abs() < 1e-12);
        let y = comp.molar();
        assert!((y[&he4] - 0.125).abs() < 1e-15);
    }

    #[test]
    fn solar_like_normalizes() {
        let nuclei = [Nuclide::new(1, 1), Nuclide::new(2, 4), Nuclide::new(6, 12), Nuclide::new(8, 16)];
        let mut comp = Composition::new(nuclei);
        comp.set_solar_like(0.02).unwrap();
        assert!((comp.sum_x() - 1.0).abs() < 1e-14);
        assert!((comp.get(&Nuclide::new(1, 1)) - 0.7).abs() < 1e-14);
        assert!((comp.get(&Nuclide::new(6, 12)) - 0.01).abs() < 1e-14);

        let mut tiny = Composition::new([Nuclide::new(1, 1)]);
        assert!(tiny.set_solar_like(0.02).is_err());
    }

    #[test]
    fn bin_as_collects_heavier_nuclei_downward() {
        let [p, he4, c12, o16, ne20, mg24] =
            [(1, 1), (2, 4), (6, 12), (8, 16), (10, 20), (12, 24)].map(|(z, a)| Nuclide::new(z, a));
        let mut comp = Composition::new([p, he4, c12, o16, ne20, mg24]);
        for (n, x) in [(p, 0.1), (he4, 0.2), (c12, 0.2), (o16, 0.2), (ne20, 0.2), (mg24, 0.1)] {
            comp.set(n, x);
        }
        let binned = comp.bin_as(&[o16, he4, c12], &[]).unwrap();
        assert_eq!(binned.len(), 3);
        assert!((binned.get(&he4) - 0.3).abs() < 1e-15);
        assert!((binned.get(&c12) - 0.2).abs() < 1e-15);
        assert!((binned.get(&o16) - 0.5).abs() < 1e-15);
        assert!((binned.sum_x() - comp.sum_x()).abs() < 1e-15);
    }

    #[test]
    fn bin_as_breaks_ties_on_charge() {
        let [b14, c14, n14, o14] = [5, 6, 7, 8].map(|z| Nuclide::new(z, 14));
        let mut comp = Composition::with_floor([b14, c14, o14], 0.0);
        comp.set(b14, 0.25);
        comp.set(c14, 0.25);
        comp.set(o14, 0.5);
        let binned = comp.bin_as(&[n14, c14], &[]).unwrap();
        // b14 has a lower Z than either target and falls back to c14.
        assert_eq!(binned.get(&c14), 0.5);
        assert_eq!(binned.get(&n14), 0.5);
    }

    #[test]
    fn bin_as_keeps_excluded_nuclei_exact() {
        let he4 = Nuclide::new(2, 4);
        let c12 = Nuclide::new(6, 12);
        let c13 = Nuclide::new(6, 13);
        let mut comp = Composition::with_floor([he4, c12, c13], 0.0);
        comp.set(he4, 0.5);
        comp.set(c12, 0.3);
        comp.set(c13, 0.2);
        let binned = comp.bin_as(&[he4, c12], &[c12]).unwrap();
        assert_eq!(binned.get(&c12), 0.3);
        assert!((binned.get(&he4) - 0.7).abs() < 1e-15);

        assert!(comp.bin_as(&[he4, c12], &[Nuclide::new(8, 16)]).is_err());
        assert!(comp.bin_as(&[c12], &[c12]).is_err());
    }

    #[test]
    fn molar_for_follows_species_order() {
        let he4 = Nuclide::new(2, 4);
        let mut comp = Composition::new([he4]);
        comp.set(he4, 0.8);
        let y = comp.molar_for(&[Nuclide::new(6, 12), he4]);
        assert_eq!(y, vec![0.0, 0.2]);
    }
}
