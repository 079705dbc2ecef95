//! The reaction network: an arena of species and rates with index-based links.
//!
//! A [`Network`] is built once and never mutated. Operations that change the
//! rate set (removing nuclei, adding rates, approximating intermediates)
//! return a new network.

use crate::error::NetworkError;
use crate::nucleus::{Nuclide, NuclideId};
use crate::rates::{multiplicities, parse_reaction_name, Rate, RateLaw};
use crate::screening::{screening_map, ScreeningGroup};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

/// What to do with two rates that provide the same link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    #[default]
    Reject,
    /// Identical rates collapse into one and Reaclib rates concatenate their fit sets.
    MergeReaclibSets,
}

/// Construction options of a [`Network`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub do_screening: bool,
    /// Screen reverse rates with the pair of their forward rate.
    pub symmetric_screening: bool,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            do_screening: true,
            symmetric_screening: false,
            duplicate_policy: DuplicatePolicy::Reject,
        }
    }
}

/// Species indices and multiplicities of one rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLink {
    pub reactants: Vec<(usize, u32)>,
    pub products: Vec<(usize, u32)>,
}

impl RateLink {
    fn resolve(rate: &Rate, index: &HashMap<NuclideId, usize>) -> Result<Self, NetworkError> {
        let side = |nuclei: &[Nuclide]| -> Result<Vec<(usize, u32)>, NetworkError> {
            multiplicities(nuclei)
                .into_iter()
                .map(|(n, count)| {
                    index
                        .get(&n.id())
                        .map(|&i| (i, count))
                        .ok_or_else(|| NetworkError::UnknownSpecies {
                            rate: rate.name(),
                            nuclide: n.name(),
                        })
                })
                .collect()
        };
        Ok(Self {
            reactants: side(rate.reactants())?,
            products: side(rate.products())?,
        })
    }

    /// Net number of species `i` made per reaction.
    pub fn stoichiometry(&self, i: usize) -> i64 {
        let count = |side: &[(usize, u32)]| side.iter().find(|(j, _)| *j == i).map_or(0, |(_, c)| *c as i64);
        count(&self.products) - count(&self.reactants)
    }
}

/// A forward rate and, if present, its reverse. Indices into [`Network::rates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePair {
    pub forward: Option<usize>,
    pub reverse: Option<usize>,
}

/// Findings of [`Network::validate_against`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// (product, forward rate) where no other forward rate consumes the product.
    pub unconsumed: Vec<(Nuclide, String)>,
    /// (missing rate, rate in this network with the same reactants).
    pub missing: Vec<(String, String)>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.unconsumed.is_empty()
    }
}

/// Species and rates of a reaction network.
///
/// Rates live in one arena: the active rates come first (tabular rates
/// last among them), followed by rates superseded by an approximation.
/// Superseded rates keep their indices so approximate rates can refer to
/// them, but they take no part in the abundance equations.
#[derive(Debug, Clone)]
pub struct Network {
    species: Vec<Nuclide>,
    index: HashMap<NuclideId, usize>,
    approx_nuclides: Vec<Nuclide>,
    rates: Vec<Rate>,
    n_active: usize,
    links: Vec<RateLink>,
    /// Arena indices of the children of each active approximate rate.
    children: Vec<Option<[usize; 6]>>,
    consumed: Vec<Vec<usize>>,
    produced: Vec<Vec<usize>>,
    screening: Vec<ScreeningGroup>,
    settings: NetworkSettings,
}

impl Network {
    /// Builds a network over `nuclides`; every rate must only reference them.
    pub fn new(
        nuclides: impl IntoIterator<Item = Nuclide>,
        rates: Vec<Rate>,
        settings: NetworkSettings,
    ) -> Result<Self, NetworkError> {
        Self::assemble(nuclides.into_iter().collect(), rates, Vec::new(), Vec::new(), settings)
    }

    /// [`Network::new`] with default settings.
    pub fn build(nuclides: impl IntoIterator<Item = Nuclide>, rates: Vec<Rate>) -> Result<Self, NetworkError> {
        Self::new(nuclides, rates, NetworkSettings::default())
    }

    /// Network whose species are exactly the nuclei the rates reference.
    pub fn from_rates(rates: Vec<Rate>, settings: NetworkSettings) -> Result<Self, NetworkError> {
        let nuclides: Vec<Nuclide> = rates
            .iter()
            .flat_map(|r| r.reactants().iter().chain(r.products()).copied())
            .collect();
        Self::new(nuclides, rates, settings)
    }

    pub(crate) fn assemble(
        mut species: Vec<Nuclide>,
        rates: Vec<Rate>,
        removed: Vec<Rate>,
        approx_nuclides: Vec<Nuclide>,
        settings: NetworkSettings,
    ) -> Result<Self, NetworkError> {
        species.sort();
        species.dedup();
        let index: HashMap<NuclideId, usize> = species.iter().enumerate().map(|(i, n)| (n.id(), i)).collect();

        let mut active = dedupe(rates, settings.duplicate_policy)?;
        // Stable: tabular rates move behind all others.
        active.sort_by_key(Rate::is_tabular);

        let links = active
            .iter()
            .map(|r| RateLink::resolve(r, &index))
            .collect::<Result<Vec<_>, _>>()?;

        let n_active = active.len();
        let mut arena = active;
        for rate in removed {
            if !arena[n_active..].contains(&rate) {
                arena.push(rate);
            }
        }
        let mut children = Vec::with_capacity(n_active);
        for i in 0..n_active {
            let Some(kids) = arena[i].approximate_law().map(|law| law.children().to_vec()) else {
                children.push(None);
                continue;
            };
            let mut slots = [0; 6];
            for (slot, child) in slots.iter_mut().zip(kids) {
                *slot = match arena[n_active..].iter().position(|r| *r == child) {
                    Some(p) => n_active + p,
                    None => {
                        arena.push(child);
                        arena.len() - 1
                    }
                };
            }
            children.push(Some(slots));
        }

        let mut consumed = vec![Vec::new(); species.len()];
        let mut produced = vec![Vec::new(); species.len()];
        for (r, link) in links.iter().enumerate() {
            for &(i, _) in &link.reactants {
                consumed[i].push(r);
            }
            for &(i, _) in &link.products {
                produced[i].push(r);
            }
        }

        let screening = if settings.do_screening {
            screening_map(&arena, settings.symmetric_screening)
        } else {
            Vec::new()
        };

        log::debug!(
            "built network with {} species, {} active rates and {} superseded rates",
            species.len(),
            n_active,
            arena.len() - n_active
        );

        Ok(Self {
            species,
            index,
            approx_nuclides,
            rates: arena,
            n_active,
            links,
            children,
            consumed,
            produced,
            screening,
            settings,
        })
    }

    /// New network with `rates` as the active rates. Superseded rates and
    /// eliminated nuclei are kept while an approximate rate among `rates`
    /// still refers to them. Species in `drop` are removed.
    pub(crate) fn rebuild(&self, rates: Vec<Rate>, drop: &[Nuclide]) -> Result<Self, NetworkError> {
        let species = self.species.iter().filter(|n| !drop.contains(n)).copied().collect();
        let laws: Vec<_> = rates.iter().filter_map(Rate::approximate_law).collect();
        let removed = self
            .removed_rates()
            .iter()
            .filter(|r| laws.iter().any(|law| law.children().contains(*r)))
            .cloned()
            .collect();
        let approx_nuclides = self
            .approx_nuclides
            .iter()
            .filter(|n| laws.iter().any(|law| law.intermediate() == **n))
            .copied()
            .collect();
        Self::assemble(species, rates, removed, approx_nuclides, self.settings)
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    pub fn species(&self) -> &[Nuclide] {
        &self.species
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    pub fn species_index(&self, id: &NuclideId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn nuclide(&self, i: usize) -> &Nuclide {
        &self.species[i]
    }

    /// Rates that take part in the abundance equations.
    pub fn rates(&self) -> &[Rate] {
        &self.rates[..self.n_active]
    }

    /// Active rates followed by superseded ones.
    pub fn all_rates(&self) -> &[Rate] {
        &self.rates
    }

    pub fn rate(&self, i: usize) -> &Rate {
        &self.rates[i]
    }

    pub fn is_removed(&self, i: usize) -> bool {
        i >= self.n_active
    }

    pub fn removed_rates(&self) -> &[Rate] {
        &self.rates[self.n_active..]
    }

    pub fn link(&self, r: usize) -> &RateLink {
        &self.links[r]
    }

    pub fn links(&self) -> &[RateLink] {
        &self.links
    }

    /// Arena indices of the six children of an active approximate rate.
    pub fn approximation_children(&self, r: usize) -> Option<[usize; 6]> {
        self.children.get(r).copied().flatten()
    }

    pub fn screening_map(&self) -> &[ScreeningGroup] {
        &self.screening
    }

    /// Active rates with species `i` among their reactants.
    pub fn consuming(&self, i: usize) -> &[usize] {
        &self.consumed[i]
    }

    pub fn producing(&self, i: usize) -> &[usize] {
        &self.produced[i]
    }

    /// Active rates touching species `i`, in rate order.
    pub fn touching(&self, i: usize) -> Vec<usize> {
        let set: BTreeSet<usize> = self.consumed[i].iter().chain(&self.produced[i]).copied().collect();
        set.into_iter().collect()
    }

    /// Species touched by no active rate.
    pub fn inert_nuclides(&self) -> Vec<Nuclide> {
        (0..self.len())
            .filter(|&i| self.consumed[i].is_empty() && self.produced[i].is_empty())
            .map(|i| self.species[i])
            .collect()
    }

    /// Intermediates eliminated by approximations.
    pub fn approx_nuclides(&self) -> &[Nuclide] {
        &self.approx_nuclides
    }

    fn closure(&self, start: usize, forward: bool) -> Vec<usize> {
        let mut seen = vec![false; self.len()];
        let mut queue = VecDeque::from([start]);
        while let Some(i) = queue.pop_front() {
            let edges = if forward { &self.consumed[i] } else { &self.produced[i] };
            for &r in edges {
                let link = &self.links[r];
                let next = if forward { &link.products } else { &link.reactants };
                for &(j, _) in next {
                    if !seen[j] {
                        seen[j] = true;
                        queue.push_back(j);
                    }
                }
            }
        }
        (0..self.len()).filter(|&j| seen[j]).collect()
    }

    /// Every species reachable from species `i` by following rates forward.
    pub fn successors(&self, i: usize) -> Vec<usize> {
        self.closure(i, true)
    }

    /// Every species from which species `i` can be reached.
    pub fn predecessors(&self, i: usize) -> Vec<usize> {
        self.closure(i, false)
    }

    /// (reactant, product, rate) edges of the active rates.
    pub fn adjacency(&self) -> Vec<(usize, usize, usize)> {
        let mut edges = Vec::new();
        for (r, link) in self.links.iter().enumerate() {
            for &(from, _) in &link.reactants {
                for &(to, _) in &link.products {
                    if from != to {
                        edges.push((from, to, r));
                    }
                }
            }
        }
        edges
    }

    /// Exothermic active rates.
    pub fn forward_rates(&self) -> Vec<usize> {
        (0..self.n_active).filter(|&r| self.rates[r].q_value() >= 0.0).collect()
    }

    pub fn reverse_rates(&self) -> Vec<usize> {
        (0..self.n_active).filter(|&r| self.rates[r].q_value() < 0.0).collect()
    }

    fn reverse_among(&self, forward: usize, candidates: &[usize]) -> Option<usize> {
        let rate = &self.rates[forward];
        candidates.iter().copied().find(|&r| {
            let other = &self.rates[r];
            other.reactants() == rate.products() && other.products() == rate.reactants()
        })
    }

    /// The active rate with reactants and products of `forward` swapped.
    pub fn find_reverse(&self, forward: usize) -> Option<usize> {
        self.reverse_among(forward, &self.reverse_rates())
    }

    /// Forward rates with their reverses, then reverse rates left unpaired.
    pub fn rate_pairs(&self) -> Vec<RatePair> {
        let mut reverse = self.reverse_rates();
        let mut pairs = Vec::new();
        for forward in self.forward_rates() {
            let found = self.reverse_among(forward, &reverse);
            if let Some(r) = found {
                reverse.retain(|&x| x != r);
            }
            pairs.push(RatePair {
                forward: Some(forward),
                reverse: found,
            });
        }
        pairs.extend(reverse.into_iter().map(|r| RatePair {
            forward: None,
            reverse: Some(r),
        }));
        pairs
    }

    /// Active rates with exactly these reactants and products.
    pub fn rates_by_nuclei(&self, reactants: &[NuclideId], products: &[NuclideId]) -> Vec<usize> {
        let mut reactants = reactants.to_vec();
        let mut products = products.to_vec();
        reactants.sort();
        products.sort();
        (0..self.n_active)
            .filter(|&r| self.rates[r].link() == (reactants.clone(), products.clone()))
            .collect()
    }

    /// Active rates matching an `A(x,y)B` name.
    pub fn rates_by_name(&self, name: &str) -> Result<Vec<usize>> {
        let (reactants, products) = parse_reaction_name(name)?;
        Ok(self.rates_by_nuclei(&reactants, &products))
    }

    /// Active rate with the given [`Rate::fname`], case-insensitively.
    pub fn rate_by_fname(&self, fname: &str) -> Result<usize> {
        (0..self.n_active)
            .find(|&r| self.rates[r].fname().eq_ignore_ascii_case(fname))
            .ok_or_else(|| anyhow!("Rate identifier \"{fname}\" does not match a rate in this network."))
    }

    /// Sub-network of the rates that only involve `nuclei`. Reverse rates are
    /// kept only with `with_reverse`.
    pub fn linking_nuclei(&self, nuclei: &[NuclideId], with_reverse: bool) -> Result<Self, NetworkError> {
        let keep = |n: &Nuclide| nuclei.contains(&n.id());
        let rates = self
            .rates()
            .iter()
            .filter(|r| with_reverse || !r.is_reverse())
            .filter(|r| r.reactants().iter().chain(r.products()).all(keep))
            .cloned()
            .collect();
        let drop: Vec<Nuclide> = self.species.iter().filter(|n| !keep(n)).copied().collect();
        self.rebuild(rates, &drop)
    }

    /// Removes the nuclei and every active rate that involves them.
    pub fn remove_nuclei(&self, nuclei: &[NuclideId]) -> Result<Self, NetworkError> {
        let gone = |n: &Nuclide| nuclei.contains(&n.id());
        let rates = self
            .rates()
            .iter()
            .filter(|r| !r.reactants().iter().chain(r.products()).any(gone))
            .cloned()
            .collect();
        let drop: Vec<Nuclide> = self.species.iter().filter(|n| gone(n)).copied().collect();
        self.rebuild(rates, &drop)
    }

    /// Removes the active rates with the given indices.
    pub fn remove_rates(&self, indices: &[usize]) -> Result<Self, NetworkError> {
        let rates = (0..self.n_active)
            .filter(|r| !indices.contains(r))
            .map(|r| self.rates[r].clone())
            .collect();
        self.rebuild(rates, &[])
    }

    /// Adds rates not already present; their nuclei join the species.
    pub fn add_rates(&self, rates: impl IntoIterator<Item = Rate>) -> Result<Self, NetworkError> {
        let mut all = self.rates().to_vec();
        for rate in rates {
            if !all.contains(&rate) {
                all.push(rate);
            }
        }
        let mut species = self.species.clone();
        species.extend(all.iter().flat_map(|r| r.reactants().iter().chain(r.products()).copied()));
        Self::assemble(
            species,
            all,
            self.removed_rates().to_vec(),
            self.approx_nuclides.clone(),
            self.settings,
        )
    }

    /// Nuclei whose partition functions some derived rate uses, superseded rates included.
    pub fn nuclei_needing_partition_functions(&self) -> Vec<Nuclide> {
        let mut nuclei: Vec<Nuclide> = self
            .rates
            .iter()
            .filter_map(|r| match r.law() {
                RateLaw::Derived(law) if law.uses_partition_functions() => Some(law.partition_nuclei()),
                _ => None,
            })
            .flatten()
            .collect();
        nuclei.sort();
        nuclei.dedup();
        nuclei
    }

    /// Compares this network to a larger rate collection: forward-rate
    /// products nothing consumes, and rates of `other` sharing reactants
    /// with a rate here but missing from it.
    pub fn validate_against(&self, other: &[Rate], forward_only: bool) -> ValidationReport {
        let mut report = ValidationReport::default();
        let current = self.rates();
        for (r, rate) in current.iter().enumerate() {
            if rate.is_reverse() {
                continue;
            }
            for product in rate.products() {
                let consumed = current
                    .iter()
                    .enumerate()
                    .any(|(o, other)| o != r && !other.is_reverse() && other.reactants().contains(product));
                if !consumed {
                    log::warn!("validation: {product} produced in {rate} never consumed");
                    report.unconsumed.push((*product, rate.name()));
                }
            }
        }
        for rate in current {
            if forward_only && rate.is_reverse() {
                continue;
            }
            for candidate in other.iter().filter(|o| o.reactants() == rate.reactants()) {
                if !current.contains(candidate) {
                    log::warn!(
                        "validation: missing {candidate} as alternative to {rate} (Q = {} MeV)",
                        candidate.q_value()
                    );
                    report.missing.push((candidate.name(), rate.name()));
                }
            }
        }
        report
    }

    /// Per species, the rates consuming and producing it.
    pub fn overview(&self) -> String {
        let mut out = String::new();
        for (i, n) in self.species.iter().enumerate() {
            out.push_str(&format!("{n}\n  consumed by:\n"));
            for &r in &self.consumed[i] {
                out.push_str(&format!("     {}\n", self.rates[r]));
            }
            out.push_str("  produced by:\n");
            for &r in &self.produced[i] {
                out.push_str(&format!("     {}\n", self.rates[r]));
            }
            out.push('\n');
        }
        out
    }

    /// Per species, the forward/reverse pairs whose rates involve it.
    pub fn rate_pair_overview(&self) -> String {
        let pairs = self.rate_pairs();
        let name = |r: Option<usize>| r.map_or_else(|| "-".to_string(), |r| self.rates[r].name());
        let mut out = String::new();
        for (i, n) in self.species.iter().enumerate() {
            out.push_str(&format!("{n}\n"));
            for pair in &pairs {
                let involved = [pair.forward, pair.reverse].into_iter().flatten().any(|r| {
                    let link = &self.links[r];
                    link.reactants.iter().chain(&link.products).any(|&(j, _)| j == i)
                });
                if involved {
                    out.push_str(&format!("     {} <-> {}\n", name(pair.forward), name(pair.reverse)));
                }
            }
        }
        out
    }
}

/// Resolves rates sharing a link (and weak channel) according to `policy`.
fn dedupe(rates: Vec<Rate>, policy: DuplicatePolicy) -> Result<Vec<Rate>, NetworkError> {
    let mut out: Vec<Rate> = Vec::with_capacity(rates.len());
    for rate in rates {
        let existing = out
            .iter()
            .position(|r| r.link() == rate.link() && r.weak_kind() == rate.weak_kind());
        let Some(i) = existing else {
            out.push(rate);
            continue;
        };
        match policy {
            DuplicatePolicy::Reject => {
                return Err(NetworkError::DuplicateRate {
                    rates: vec![out[i].name(), rate.name()],
                })
            }
            DuplicatePolicy::MergeReaclibSets => {
                if covers(&out[i], &rate) {
                    log::warn!("dropping repeated rate {rate}");
                } else if let Some(merged) = out[i].merge_reaclib(&rate) {
                    log::warn!("merging fit sets of duplicate rate {rate}");
                    out[i] = merged;
                } else {
                    return Err(NetworkError::DuplicateRate {
                        rates: vec![out[i].name(), rate.name()],
                    });
                }
            }
        }
    }
    Ok(out)
}

/// Whether `rate` adds nothing to `existing`.
fn covers(existing: &Rate, rate: &Rate) -> bool {
    match (existing.law(), rate.law()) {
        (RateLaw::Reaclib(a), RateLaw::Reaclib(b)) => b.sets().iter().all(|set| a.sets().contains(set)),
        _ => existing == rate,
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rate in self.rates() {
            writeln!(f, "{rate}")?;
        }
        Ok(())
    }
}
