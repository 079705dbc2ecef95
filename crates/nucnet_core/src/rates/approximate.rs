//! Effective rates that bridge an eliminated intermediate nucleus.

use super::{Rate, RateLaw};
use crate::equation_engine::Expr;
use crate::error::NetworkError;
use crate::nucleus::Nuclide;
use crate::traits::ValueWithDerivative;
use serde::{Deserialize, Serialize};

/// Light particle that carries the flow through the intermediate nucleus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Bridge {
    /// A(a,p)X(p,g)B
    #[default]
    Proton,
    /// A(a,n)X(n,g)B
    Neutron,
}

impl Bridge {
    pub fn particle(self) -> Nuclide {
        match self {
            Bridge::Proton => Nuclide::new(1, 1),
            Bridge::Neutron => Nuclide::new(0, 1),
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Bridge::Proton => "ap_pg",
            Bridge::Neutron => "an_ng",
        }
    }
}

/// Position of a contributing rate in an approximation, written for the
/// proton bridge (x = p or n).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChildRole {
    /// A(a,g)B
    AlphaGamma,
    /// A(a,x)X
    AlphaBridge,
    /// X(x,g)B
    BridgeGamma,
    /// B(g,a)A
    GammaAlpha,
    /// B(g,x)X
    GammaBridge,
    /// X(x,a)A
    BridgeAlpha,
}

impl ChildRole {
    pub const ALL: [ChildRole; 6] = [
        ChildRole::AlphaGamma,
        ChildRole::AlphaBridge,
        ChildRole::BridgeGamma,
        ChildRole::GammaAlpha,
        ChildRole::GammaBridge,
        ChildRole::BridgeAlpha,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Steady-state combination of six rates through an intermediate X:
///
/// forward: r_ag + r_ax r_xg / (r_xg + r_xa)
/// reverse: r_ga + r_gx r_xa / (r_xg + r_xa)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproximateLaw {
    bridge: Bridge,
    intermediate: Nuclide,
    reverse: bool,
    /// In [`ChildRole::ALL`] order.
    children: Vec<Rate>,
}

impl ApproximateLaw {
    pub fn new(bridge: Bridge, intermediate: Nuclide, children: [Rate; 6], reverse: bool) -> Self {
        Self {
            bridge,
            intermediate,
            reverse,
            children: children.into(),
        }
    }

    pub fn bridge(&self) -> Bridge {
        self.bridge
    }

    pub fn intermediate(&self) -> Nuclide {
        self.intermediate
    }

    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    pub fn children(&self) -> &[Rate] {
        &self.children
    }

    pub fn child(&self, role: ChildRole) -> &Rate {
        &self.children[role.index()]
    }

    /// Combines child values given in [`ChildRole::ALL`] order. When both
    /// exits of the intermediate vanish only the direct channel remains.
    pub fn combine(&self, v: &[ValueWithDerivative; 6]) -> ValueWithDerivative {
        let [ag, ax, xg, ga, gx, xa] = *v;
        let (direct, entry, exit) = if self.reverse { (ga, gx, xa) } else { (ag, ax, xg) };
        let denominator = ValueWithDerivative::new(xg.value + xa.value, xg.dvalue_dt + xa.dvalue_dt);
        if denominator.value == 0.0 {
            return direct;
        }
        let bridged = entry.times(exit).over(denominator);
        ValueWithDerivative::new(direct.value + bridged.value, direct.dvalue_dt + bridged.dvalue_dt)
    }

    /// Symbolic form of [`combine`](Self::combine) over child rate
    /// expressions, with the same fallback to the direct channel.
    pub fn expression(&self, c: &[Expr; 6]) -> Expr {
        let [ag, ax, xg, ga, gx, xa] = c.clone();
        let exits = xg.clone() + xa.clone();
        let (direct, entry, exit) = if self.reverse { (ga, gx, xa) } else { (ag, ax, xg) };
        direct + Expr::product([entry, exit, Expr::guarded_recip(exits)])
    }

    /// Unscreened effective rate.
    pub fn eval(&self, t: f64, rho_ye: f64) -> ValueWithDerivative {
        let mut values = [ValueWithDerivative::ZERO; 6];
        for (value, child) in values.iter_mut().zip(&self.children) {
            *value = child.eval(t, rho_ye);
        }
        self.combine(&values)
    }
}

impl Rate {
    /// Wraps an approximation as a rate linking A + a and B.
    pub fn approximate(law: ApproximateLaw) -> Result<Rate, NetworkError> {
        let capture = law.child(ChildRole::AlphaGamma);
        let (reactants, products, q) = if law.reverse {
            (capture.products().to_vec(), capture.reactants().to_vec(), -capture.q_value())
        } else {
            (capture.reactants().to_vec(), capture.products().to_vec(), capture.q_value())
        };
        let reverse = law.reverse;
        Rate::builder(reactants, products)
            .label(law.bridge.tag())
            .reverse(reverse)
            .q_value(q)
            .build(RateLaw::Approximate(law))
    }
}
