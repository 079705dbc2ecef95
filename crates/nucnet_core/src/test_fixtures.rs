//! Nuclei and rates shared by the unit tests.

use crate::nucleus::Nuclide;
use crate::partition::PartitionFunctionTable;
use crate::rates::{Rate, ReaclibSet};

pub fn he4() -> Nuclide {
    Nuclide::new(2, 4).with_binding_energy(7.073915)
}

pub fn c12() -> Nuclide {
    Nuclide::new(6, 12).with_binding_energy(7.680144)
}

pub fn o16() -> Nuclide {
    Nuclide::new(8, 16).with_binding_energy(7.976206)
}

pub fn ne20() -> Nuclide {
    Nuclide::new(10, 20).with_binding_energy(8.032240)
}

pub fn mg24() -> Nuclide {
    Nuclide::new(12, 24).with_binding_energy(8.260709)
}

pub fn al27() -> Nuclide {
    Nuclide::new(13, 27).with_binding_energy(8.331553)
}

pub fn si28() -> Nuclide {
    Nuclide::new(14, 28).with_binding_energy(8.447744)
}

pub fn p() -> Nuclide {
    Nuclide::new(1, 1)
}

pub fn reaclib_set(coefficients: [f64; 7]) -> ReaclibSet {
    ReaclibSet::new(coefficients)
}

/// c12(a,g)o16 with its non-resonant and resonant sets.
pub fn c12_ag() -> Rate {
    Rate::builder(vec![he4(), c12()], vec![o16()])
        .reaclib(vec![
            reaclib_set([69.6526, -1.39254, 58.9128, -148.273, 9.08324, -0.541041, 70.3554]).with_label("nac2"),
            reaclib_set([254.634, -1.84097, 103.411, -420.567, 64.0874, -12.4624, 137.303]).with_label("nac2"),
        ])
        .unwrap()
}

pub fn o16_ag() -> Rate {
    Rate::builder(vec![he4(), o16()], vec![ne20()])
        .reaclib(vec![reaclib_set([3.88571, -10.3585, 0.0, 0.0, 0.0, 0.0, -1.5])])
        .unwrap()
}

pub fn triple_alpha() -> Rate {
    Rate::builder(vec![he4(), he4(), he4()], vec![c12()])
        .reaclib(vec![reaclib_set([-0.971052, 0.0, -37.06, 29.3493, -115.507, -10.0, -1.33333])])
        .unwrap()
}

/// The six rates around al27 in [`ChildRole::ALL`](crate::rates::ChildRole::ALL)
/// order: mg24(a,g)si28, mg24(a,p)al27, al27(p,g)si28 and their reverses.
pub fn mg24_bridge_rates() -> ([Rate; 6], Nuclide) {
    let ag = Rate::builder(vec![he4(), mg24()], vec![si28()])
        .reaclib(vec![reaclib_set([18.5, -15.6, 0.0, 0.0, 0.0, 0.0, -1.5])])
        .unwrap();
    let ap = Rate::builder(vec![he4(), mg24()], vec![p(), al27()])
        .reaclib(vec![reaclib_set([26.0, -24.0, 0.0, 0.0, 0.0, 0.0, -1.5])])
        .unwrap();
    let pg = Rate::builder(vec![p(), al27()], vec![si28()])
        .reaclib(vec![reaclib_set([21.5, -10.5, 0.0, 0.0, 0.0, 0.0, -1.5])])
        .unwrap();
    let table = PartitionFunctionTable::new();
    let ga = Rate::derived_from(&ag, &table, false).unwrap();
    let gp = Rate::derived_from(&pg, &table, false).unwrap();
    let pa = Rate::derived_from(&ap, &table, false).unwrap();
    ([ag, ap, pg, ga, gp, pa], al27())
}
