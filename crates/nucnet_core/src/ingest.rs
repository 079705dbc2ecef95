//! Conversion of externally parsed rate and nuclide records.
//!
//! Records carry nuclide names (`he4`, `p`, `al26_1`); a [`RateLibrary`]
//! resolves them against the nuclide records it was given, so binding
//! energies and spin states flow into every rate.

use crate::network::{Network, NetworkSettings};
use crate::nucleus::{Nuclide, NuclideId};
use crate::partition::{PartitionFunction, PartitionFunctionTable};
use crate::rates::{parse_reaction_name, Rate, RateTable, ReaclibSet, WeakKind};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub t9: Vec<f64>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NuclideRecord {
    pub name: String,
    /// [MeV]
    #[serde(default)]
    pub binding_energy_per_nucleon: f64,
    /// 2J+1 of the ground state.
    #[serde(default)]
    pub spin_states: Option<u32>,
    #[serde(default)]
    pub partition_function: Option<PartitionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaclibSetRecord {
    #[serde(default)]
    pub label: String,
    pub coefficients: [f64; 7],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaclibRecord {
    pub reactants: Vec<String>,
    pub products: Vec<String>,
    pub sets: Vec<ReaclibSetRecord>,
    #[serde(default)]
    pub weak: Option<WeakKind>,
    #[serde(default)]
    pub reverse: bool,
    /// [MeV]; computed from binding energies when absent.
    #[serde(default)]
    pub q_value: Option<f64>,
}

/// Weak rate on a log10(rho*Ye) x log10(T) grid, rows along density.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularRecord {
    pub reactant: String,
    pub product: String,
    pub weak: WeakKind,
    pub log_rhoye: Vec<f64>,
    pub log_t: Vec<f64>,
    pub log_rate: Vec<f64>,
    /// Neutrino energy per reaction [MeV].
    pub nu_energy: Vec<f64>,
}

/// Reverse of a Reaclib rate already in the library, named `A(x,y)B`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRecord {
    pub forward: String,
    #[serde(default)]
    pub use_partition_functions: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryRecord {
    pub nuclides: Vec<NuclideRecord>,
    pub reaclib: Vec<ReaclibRecord>,
    pub tabular: Vec<TabularRecord>,
    pub derived: Vec<DerivedRecord>,
}

/// Nuclides, partition functions and rates built from records.
#[derive(Debug, Clone, Default)]
pub struct RateLibrary {
    nuclides: BTreeMap<NuclideId, Nuclide>,
    partition_functions: PartitionFunctionTable,
    rates: Vec<Rate>,
}

impl RateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nuclides first, then Reaclib and tabular rates, then derived rates.
    pub fn from_records(record: &LibraryRecord) -> Result<Self> {
        let mut library = Self::new();
        for nuclide in &record.nuclides {
            library.add_nuclide(nuclide)?;
        }
        for rate in &record.reaclib {
            library.add_reaclib(rate)?;
        }
        for rate in &record.tabular {
            library.add_tabular(rate)?;
        }
        for rate in &record.derived {
            library.add_derived(rate)?;
        }
        log::debug!(
            "rate library has {} nuclides and {} rates",
            library.nuclides.len(),
            library.rates.len()
        );
        Ok(library)
    }

    pub fn add_nuclide(&mut self, record: &NuclideRecord) -> Result<Nuclide> {
        let mut nuclide =
            Nuclide::parse(&record.name)?.with_binding_energy(record.binding_energy_per_nucleon);
        if let Some(spin_states) = record.spin_states {
            if spin_states == 0 {
                bail!("Nuclide {} has zero spin states.", record.name);
            }
            nuclide = nuclide.with_spin_states(spin_states);
        }
        if let Some(pf) = &record.partition_function {
            let function = PartitionFunction::new(pf.t9.clone(), pf.values.clone())
                .with_context(|| format!("Partition function of {}", record.name))?;
            self.partition_functions.insert(nuclide.id(), function);
        }
        self.nuclides.insert(nuclide.id(), nuclide);
        Ok(nuclide)
    }

    /// The recorded nuclide with this name.
    pub fn nuclide(&self, name: &str) -> Result<Nuclide> {
        let id: NuclideId = name.parse()?;
        self.nuclides
            .get(&id)
            .copied()
            .ok_or_else(|| anyhow!("Nuclide \"{name}\" has no nuclide record."))
    }

    fn nuclides_named(&self, names: &[String]) -> Result<Vec<Nuclide>> {
        names.iter().map(|n| self.nuclide(n)).collect()
    }

    pub fn add_reaclib(&mut self, record: &ReaclibRecord) -> Result<&Rate> {
        if record.sets.is_empty() {
            bail!(
                "Reaclib record {:?} -> {:?} has no fit sets.",
                record.reactants,
                record.products
            );
        }
        let reactants = self.nuclides_named(&record.reactants)?;
        let products = self.nuclides_named(&record.products)?;
        let mut builder = Rate::builder(reactants, products).reverse(record.reverse);
        if let Some(weak) = record.weak {
            builder = builder.weak(weak);
        }
        if let Some(q) = record.q_value {
            builder = builder.q_value(q);
        }
        if let Some(label) = record.sets.first().map(|s| s.label.as_str()).filter(|l| !l.is_empty()) {
            builder = builder.label(label);
        }
        let sets = record
            .sets
            .iter()
            .map(|s| ReaclibSet::new(s.coefficients).with_label(s.label.clone()))
            .collect();
        let rate = builder
            .reaclib(sets)
            .with_context(|| format!("Reaclib rate {:?} -> {:?}", record.reactants, record.products))?;
        Ok(self.push(rate))
    }

    pub fn add_tabular(&mut self, record: &TabularRecord) -> Result<&Rate> {
        let reactant = self.nuclide(&record.reactant)?;
        let product = self.nuclide(&record.product)?;
        let table = RateTable::new(
            record.log_rhoye.clone(),
            record.log_t.clone(),
            record.log_rate.clone(),
            record.nu_energy.clone(),
        )
        .map_err(|reason| anyhow!("Tabular rate {} -> {}: {reason}", record.reactant, record.product))?;
        let rate = Rate::builder(vec![reactant], vec![product])
            .weak(record.weak)
            .tabular(table)
            .with_context(|| format!("Tabular rate {} -> {}", record.reactant, record.product))?;
        Ok(self.push(rate))
    }

    pub fn add_derived(&mut self, record: &DerivedRecord) -> Result<&Rate> {
        let (mut reactants, mut products) = parse_reaction_name(&record.forward)?;
        reactants.sort();
        products.sort();
        let forward = self
            .rates
            .iter()
            .find(|r| !r.is_reverse() && !r.is_tabular() && r.link() == (reactants.clone(), products.clone()))
            .ok_or_else(|| anyhow!("Derived rate needs forward rate {} in the library.", record.forward))?;
        let rate = Rate::derived_from(forward, &self.partition_functions, record.use_partition_functions)
            .with_context(|| format!("Reverse of {}", record.forward))?;
        Ok(self.push(rate))
    }

    fn push(&mut self, rate: Rate) -> &Rate {
        self.rates.push(rate);
        &self.rates[self.rates.len() - 1]
    }

    pub fn nuclides(&self) -> impl Iterator<Item = &Nuclide> {
        self.nuclides.values()
    }

    pub fn partition_functions(&self) -> &PartitionFunctionTable {
        &self.partition_functions
    }

    pub fn rates(&self) -> &[Rate] {
        &self.rates
    }

    /// Network over every library rate, species inferred from the rates.
    pub fn network(&self, settings: NetworkSettings) -> Result<Network> {
        Network::from_rates(self.rates.clone(), settings).context("Building network from rate library")
    }
}

#[cfg(test)]
mod tests {
    use super::{LibraryRecord, RateLibrary};
    use crate::network::NetworkSettings;
    use crate::nucleus::NuclideId;
    use crate::rates::WeakKind;
    use crate::screening::NoScreening;
    use crate::test_fixtures::c12_ag;

    fn assert_err_contains<T: std::fmt::Debug>(result: anyhow::Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    const HELIUM: &str = r#"{
        "nuclides": [
            {"name": "he4", "binding_energy_per_nucleon": 7.073915},
            {"name": "c12", "binding_energy_per_nucleon": 7.680144},
            {"name": "o16", "binding_energy_per_nucleon": 7.976206,
             "partition_function": {"t9": [1.0, 5.0, 10.0], "values": [1.0, 1.0, 1.1]}}
        ],
        "reaclib": [
            {"reactants": ["he4", "c12"], "products": ["o16"], "sets": [
                {"label": "nac2", "coefficients": [69.6526, -1.39254, 58.9128, -148.273, 9.08324, -0.541041, 70.3554]},
                {"label": "nac2", "coefficients": [254.634, -1.84097, 103.411, -420.567, 64.0874, -12.4624, 137.303]}
            ]}
        ],
        "derived": [{"forward": "c12(a,g)o16"}]
    }"#;

    #[test]
    fn library_from_json_records() {
        let record: LibraryRecord = serde_json::from_str(HELIUM).unwrap();
        let library = RateLibrary::from_records(&record).unwrap();
        assert_eq!(library.nuclides().count(), 3);
        assert!(library.partition_functions().contains(&NuclideId::new(8, 16)));
        assert_eq!(library.rates().len(), 2);
        assert_eq!(library.rates()[0].name(), c12_ag().name());
        assert_eq!(library.rates()[0].law(), c12_ag().law());
        assert_eq!(library.rates()[0].label(), "nac2");
        assert!(library.rates()[1].is_derived());

        let net = library.network(NetworkSettings::default()).unwrap();
        assert_eq!(net.len(), 3);
        assert_eq!(net.rate_pairs().len(), 1);
        let mut comp = crate::composition::Composition::new(net.species().iter().copied());
        comp.set_equal();
        assert!(net.evaluate_rates(1e6, 1e9, &comp, &NoScreening).iter().all(|r| *r > 0.0));
    }

    #[test]
    fn unresolved_names_are_reported() {
        let mut record: LibraryRecord = serde_json::from_str(HELIUM).unwrap();
        record.nuclides.pop();
        assert_err_contains(RateLibrary::from_records(&record), "\"o16\" has no nuclide record");

        let mut record: LibraryRecord = serde_json::from_str(HELIUM).unwrap();
        record.derived[0].forward = "o16(a,g)ne20".to_string();
        assert_err_contains(RateLibrary::from_records(&record), "needs forward rate o16(a,g)ne20");
    }

    #[test]
    fn unbalanced_rates_are_rejected() {
        let mut record: LibraryRecord = serde_json::from_str(HELIUM).unwrap();
        record.reaclib[0].products = vec!["c12".to_string()];
        assert_err_contains(RateLibrary::from_records(&record), "Reaclib rate");
    }

    #[test]
    fn tabular_records() {
        let json = r#"{
            "nuclides": [{"name": "na23"}, {"name": "ne23"}],
            "tabular": [{
                "reactant": "na23", "product": "ne23", "weak": "ElectronCapture",
                "log_rhoye": [1.0, 10.0], "log_t": [7.0, 10.0],
                "log_rate": [-3.0, -2.0, -1.0, 0.0], "nu_energy": [1.0, 1.0, 2.0, 2.0]
            }]
        }"#;
        let record: LibraryRecord = serde_json::from_str(json).unwrap();
        let library = RateLibrary::from_records(&record).unwrap();
        let rate = &library.rates()[0];
        assert!(rate.is_tabular());
        assert_eq!(rate.weak_kind(), Some(WeakKind::ElectronCapture));

        let mut bad = record.clone();
        bad.tabular[0].log_rate.pop();
        assert_err_contains(RateLibrary::from_records(&bad), "expects 4 entries");
    }
}
