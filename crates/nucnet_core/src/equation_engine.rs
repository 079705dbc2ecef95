use crate::error::EvalError;
use crate::traits::{Environment, Scalar};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

// --- Symbols ---

/// Independent variables the network equations are differentiated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Variable {
    /// Molar abundance Y of the species with this network index.
    Abundance(usize),
    Temperature,
}

/// Named leaves of an expression tree.
///
/// Rates are referenced by their index in the network's rate arena. A rate
/// symbol stands for the *screened* rate coefficient; its temperature
/// derivatives are separate symbols so that differentiation never needs
/// finite differences.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Symbol {
    Abundance(usize),
    Temperature,
    Density,
    ElectronFraction,
    Rate { index: usize, dt_order: u8 },
    /// Neutrino energy-loss power of a tabular weak rate [erg/s per reaction].
    NeutrinoLoss { index: usize, dt_order: u8 },
    /// Externally modelled thermal losses [erg/g/s], with the partials taken so far.
    ThermalLoss { partials: Vec<Variable> },
}

impl Symbol {
    pub fn rate(index: usize) -> Self {
        Symbol::Rate { index, dt_order: 0 }
    }

    pub fn neutrino_loss(index: usize) -> Self {
        Symbol::NeutrinoLoss { index, dt_order: 0 }
    }

    pub fn thermal_loss() -> Self {
        Symbol::ThermalLoss {
            partials: Vec::new(),
        }
    }

    /// Partial derivative of this leaf with respect to `wrt`.
    pub fn derivative(&self, wrt: Variable) -> Expr {
        match (self, wrt) {
            (Symbol::Abundance(i), Variable::Abundance(j)) => {
                if *i == j {
                    Expr::one()
                } else {
                    Expr::zero()
                }
            }
            (Symbol::Temperature, Variable::Temperature) => Expr::one(),
            (Symbol::Rate { index, dt_order }, Variable::Temperature) => Expr::Symbol(Symbol::Rate {
                index: *index,
                dt_order: dt_order + 1,
            }),
            (Symbol::NeutrinoLoss { index, dt_order }, Variable::Temperature) => {
                Expr::Symbol(Symbol::NeutrinoLoss {
                    index: *index,
                    dt_order: dt_order + 1,
                })
            }
            (Symbol::ThermalLoss { partials }, wrt) => {
                let mut partials = partials.clone();
                partials.push(wrt);
                partials.sort();
                Expr::Symbol(Symbol::ThermalLoss { partials })
            }
            _ => Expr::zero(),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Abundance(i) => write!(f, "Y[{i}]"),
            Symbol::Temperature => write!(f, "T"),
            Symbol::Density => write!(f, "rho"),
            Symbol::ElectronFraction => write!(f, "ye"),
            Symbol::Rate { index, dt_order: 0 } => write!(f, "rate[{index}]"),
            Symbol::Rate { index, dt_order: 1 } => write!(f, "drate_dT[{index}]"),
            Symbol::Rate { index, dt_order } => write!(f, "d{dt_order}rate_dT{dt_order}[{index}]"),
            Symbol::NeutrinoLoss { index, dt_order: 0 } => write!(f, "nu_loss[{index}]"),
            Symbol::NeutrinoLoss { index, dt_order } => {
                write!(f, "d{dt_order}nu_loss_dT{dt_order}[{index}]")
            }
            Symbol::ThermalLoss { partials } => {
                if partials.is_empty() {
                    return write!(f, "thermal_loss");
                }
                write!(f, "dthermal_loss")?;
                for p in partials {
                    match p {
                        Variable::Abundance(i) => write!(f, "_dY[{i}]")?,
                        Variable::Temperature => write!(f, "_dT")?,
                    }
                }
                Ok(())
            }
        }
    }
}

// --- Expression tree ---

/// Immutable scalar expression.
///
/// Build expressions through the smart constructors ([`Expr::sum`],
/// [`Expr::product`], [`Expr::pow`], ...) or the arithmetic operators; they
/// flatten nested sums/products, fold constants and drop structural zeros,
/// so a term that cannot contribute is literally `Constant(0.0)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Constant(f64),
    Symbol(Symbol),
    Add(Vec<Expr>),
    Mul(Vec<Expr>),
    /// Base raised to a constant exponent.
    Pow(Box<Expr>, f64),
    Exp(Box<Expr>),
    Ln(Box<Expr>),
    /// 1/x, and zero where x vanishes.
    GuardedRecip(Box<Expr>),
}

impl Expr {
    pub fn zero() -> Self {
        Expr::Constant(0.0)
    }

    pub fn one() -> Self {
        Expr::Constant(1.0)
    }

    pub fn constant(value: f64) -> Self {
        Expr::Constant(value)
    }

    pub fn symbol(symbol: Symbol) -> Self {
        Expr::Symbol(symbol)
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Constant(c) if *c == 0.0)
    }

    pub fn as_constant(&self) -> Option<f64> {
        match self {
            Expr::Constant(c) => Some(*c),
            _ => None,
        }
    }

    pub fn sum(terms: impl IntoIterator<Item = Expr>) -> Self {
        let mut flat = Vec::new();
        let mut constant = 0.0;
        let mut has_constant = false;
        for term in terms {
            match term {
                Expr::Constant(c) => {
                    constant += c;
                    has_constant = true;
                }
                Expr::Add(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if has_constant && constant != 0.0 {
            flat.push(Expr::Constant(constant));
        }
        match flat.len() {
            0 => Expr::zero(),
            1 => flat.pop().unwrap_or_else(Expr::zero),
            _ => Expr::Add(flat),
        }
    }

    /// Product with all constant factors folded into a leading coefficient.
    pub fn product(factors: impl IntoIterator<Item = Expr>) -> Self {
        let mut flat = Vec::new();
        let mut coefficient = 1.0;
        for factor in factors {
            match factor {
                Expr::Constant(c) => coefficient *= c,
                Expr::Mul(inner) => {
                    for f in inner {
                        match f {
                            Expr::Constant(c) => coefficient *= c,
                            other => flat.push(other),
                        }
                    }
                }
                other => flat.push(other),
            }
        }
        if coefficient == 0.0 {
            return Expr::zero();
        }
        if coefficient != 1.0 || flat.is_empty() {
            flat.insert(0, Expr::Constant(coefficient));
        }
        match flat.len() {
            1 => flat.pop().unwrap_or_else(Expr::one),
            _ => Expr::Mul(flat),
        }
    }

    pub fn pow(base: Expr, exponent: f64) -> Self {
        if exponent == 0.0 {
            return Expr::one();
        }
        if exponent == 1.0 {
            return base;
        }
        match base {
            Expr::Constant(c) => Expr::Constant(c.powf(exponent)),
            Expr::Pow(inner, e) => Expr::pow(*inner, e * exponent),
            other => Expr::Pow(Box::new(other), exponent),
        }
    }

    pub fn exp(arg: Expr) -> Self {
        match arg {
            Expr::Constant(c) => Expr::Constant(c.exp()),
            Expr::Ln(inner) => *inner,
            other => Expr::Exp(Box::new(other)),
        }
    }

    pub fn ln(arg: Expr) -> Self {
        match arg {
            Expr::Constant(c) => Expr::Constant(c.ln()),
            Expr::Exp(inner) => *inner,
            other => Expr::Ln(Box::new(other)),
        }
    }

    pub fn recip(arg: Expr) -> Self {
        Expr::pow(arg, -1.0)
    }

    pub fn guarded_recip(arg: Expr) -> Self {
        match arg {
            Expr::Constant(c) => Expr::Constant(guarded_recip(c)),
            other => Expr::GuardedRecip(Box::new(other)),
        }
    }

    /// Symbolic partial derivative.
    pub fn diff(&self, wrt: Variable) -> Expr {
        match self {
            Expr::Constant(_) => Expr::zero(),
            Expr::Symbol(s) => s.derivative(wrt),
            Expr::Add(terms) => Expr::sum(terms.iter().map(|t| t.diff(wrt))),
            Expr::Mul(factors) => {
                let mut terms = Vec::new();
                for (i, factor) in factors.iter().enumerate() {
                    let d = factor.diff(wrt);
                    if d.is_zero() {
                        continue;
                    }
                    let rest = factors
                        .iter()
                        .enumerate()
                        .map(|(j, f)| if i == j { d.clone() } else { f.clone() });
                    terms.push(Expr::product(rest));
                }
                Expr::sum(terms)
            }
            Expr::Pow(base, exponent) => {
                let d = base.diff(wrt);
                if d.is_zero() {
                    return Expr::zero();
                }
                Expr::product([
                    Expr::Constant(*exponent),
                    Expr::pow((**base).clone(), exponent - 1.0),
                    d,
                ])
            }
            Expr::Exp(arg) => {
                let d = arg.diff(wrt);
                if d.is_zero() {
                    return Expr::zero();
                }
                Expr::product([self.clone(), d])
            }
            Expr::Ln(arg) => {
                let d = arg.diff(wrt);
                if d.is_zero() {
                    return Expr::zero();
                }
                Expr::product([d, Expr::recip((**arg).clone())])
            }
            Expr::GuardedRecip(arg) => {
                let d = arg.diff(wrt);
                if d.is_zero() {
                    return Expr::zero();
                }
                Expr::product([Expr::Constant(-1.0), Expr::pow(self.clone(), 2.0), d])
            }
        }
    }

    pub fn eval<E: Environment + ?Sized>(&self, env: &E) -> Result<f64, EvalError> {
        Ok(match self {
            Expr::Constant(c) => *c,
            Expr::Symbol(s) => env
                .value(s)
                .ok_or_else(|| EvalError::UnboundSymbol(s.clone()))?,
            Expr::Add(terms) => {
                let mut acc = 0.0;
                for t in terms {
                    acc += t.eval(env)?;
                }
                acc
            }
            Expr::Mul(factors) => {
                let mut acc = 1.0;
                for f in factors {
                    acc *= f.eval(env)?;
                }
                acc
            }
            Expr::Pow(base, exponent) => power(base.eval(env)?, *exponent),
            Expr::Exp(arg) => arg.eval(env)?.exp(),
            Expr::Ln(arg) => arg.eval(env)?.ln(),
            Expr::GuardedRecip(arg) => guarded_recip(arg.eval(env)?),
        })
    }

    /// Replaces leaves for which `f` returns an expression.
    pub fn substitute(&self, f: &impl Fn(&Symbol) -> Option<Expr>) -> Expr {
        match self {
            Expr::Constant(_) => self.clone(),
            Expr::Symbol(s) => f(s).unwrap_or_else(|| self.clone()),
            Expr::Add(terms) => Expr::sum(terms.iter().map(|t| t.substitute(f))),
            Expr::Mul(factors) => Expr::product(factors.iter().map(|t| t.substitute(f))),
            Expr::Pow(base, exponent) => Expr::pow(base.substitute(f), *exponent),
            Expr::Exp(arg) => Expr::exp(arg.substitute(f)),
            Expr::Ln(arg) => Expr::ln(arg.substitute(f)),
            Expr::GuardedRecip(arg) => Expr::guarded_recip(arg.substitute(f)),
        }
    }

    /// All leaves referenced by this expression.
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<Symbol>) {
        match self {
            Expr::Constant(_) => {}
            Expr::Symbol(s) => {
                out.insert(s.clone());
            }
            Expr::Add(items) | Expr::Mul(items) => {
                for item in items {
                    item.collect_symbols(out);
                }
            }
            Expr::Pow(inner, _) | Expr::Exp(inner) | Expr::Ln(inner) | Expr::GuardedRecip(inner) => {
                inner.collect_symbols(out)
            }
        }
    }

    pub fn depends_on(&self, wrt: Variable) -> bool {
        !self.diff(wrt).is_zero()
    }
}

fn guarded_recip<T: Scalar>(x: T) -> T {
    if x == T::zero() {
        T::zero()
    } else {
        x.recip()
    }
}

fn power<T: Scalar>(base: T, exponent: f64) -> T {
    if exponent.fract() == 0.0 && exponent.abs() <= i32::MAX as f64 {
        base.powi(exponent as i32)
    } else {
        base.powf(T::from_f64(exponent).unwrap_or_else(T::nan))
    }
}

impl Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::sum([self, rhs])
    }
}

impl Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::sum([self, -rhs])
    }
}

impl Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::product([self, rhs])
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::product([Expr::Constant(-1.0), self])
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Constant(value)
    }
}

impl From<Symbol> for Expr {
    fn from(symbol: Symbol) -> Self {
        Expr::Symbol(symbol)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(c) => write!(f, "{c:?}"),
            Expr::Symbol(s) => write!(f, "{s}"),
            Expr::Add(terms) => {
                for (i, t) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " + ")?;
                    }
                    write!(f, "{t}")?;
                }
                Ok(())
            }
            Expr::Mul(factors) => {
                for (i, factor) in factors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "*")?;
                    }
                    match factor {
                        Expr::Add(_) => write!(f, "({factor})")?,
                        _ => write!(f, "{factor}")?,
                    }
                }
                Ok(())
            }
            Expr::Pow(base, exponent) => match **base {
                Expr::Symbol(_) => write!(f, "{base}^{exponent:?}"),
                _ => write!(f, "({base})^{exponent:?}"),
            },
            Expr::Exp(arg) => write!(f, "exp({arg})"),
            Expr::Ln(arg) => write!(f, "ln({arg})"),
            Expr::GuardedRecip(arg) => write!(f, "recip0({arg})"),
        }
    }
}

// --- Bytecode ---

/// OpCodes for the Stack-based Virtual Machine.
/// The VM operates on a stack of `Scalar` values.
#[derive(Debug, Clone, Copy)]
pub enum OpCode {
    /// Pushes a constant onto the stack.
    LoadConst(f64),
    /// Pushes the value bound to a symbol slot onto the stack.
    LoadSlot(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top value (a), pushes a^n for an integer n.
    Powi(i32),
    /// Pops top value (a), pushes a^x.
    Powf(f64),
    Exp,
    Ln,
    /// Pops top value (a), pushes 1/a, or zero when a is zero.
    GuardedRecip,
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stack-based Virtual Machine for evaluating compiled expressions.
///
/// The VM is stateless; `execute` takes the program, the slot values and
/// a scratch stack, and returns the value left on the stack.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(bytecode: &Bytecode, slots: &[T], stack: &mut Vec<T>) -> T {
        stack.clear();

        for op in &bytecode.ops {
            match op {
                OpCode::LoadConst(val) => stack.push(T::from_f64(*val).unwrap_or_else(T::nan)),
                OpCode::LoadSlot(idx) => stack.push(slots[*idx]),
                OpCode::Add => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a + b);
                }
                OpCode::Mul => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(a * b);
                }
                OpCode::Powi(n) => {
                    let a = pop(stack);
                    stack.push(a.powi(*n));
                }
                OpCode::Powf(x) => {
                    let a = pop(stack);
                    stack.push(power(a, *x));
                }
                OpCode::Exp => {
                    let a = pop(stack);
                    stack.push(a.exp());
                }
                OpCode::Ln => {
                    let a = pop(stack);
                    stack.push(a.ln());
                }
                OpCode::GuardedRecip => {
                    let a = pop(stack);
                    stack.push(guarded_recip(a));
                }
            }
        }

        stack.pop().unwrap_or_else(T::zero)
    }
}

// Compiled programs are balanced, so the stack never underflows.
fn pop<T: Scalar>(stack: &mut Vec<T>) -> T {
    stack.pop().unwrap_or_else(T::nan)
}

/// Compiles expressions into `Bytecode`, assigning one slot per distinct symbol.
#[derive(Debug, Default)]
pub struct Compiler {
    slot_map: HashMap<Symbol, usize>,
    symbols: Vec<Symbol>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&mut self, expr: &Expr) -> Bytecode {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops);
        Bytecode { ops }
    }

    /// Symbols in slot order.
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    fn slot(&mut self, symbol: &Symbol) -> usize {
        if let Some(&idx) = self.slot_map.get(symbol) {
            return idx;
        }
        let idx = self.symbols.len();
        self.symbols.push(symbol.clone());
        self.slot_map.insert(symbol.clone(), idx);
        idx
    }

    fn compile_recursive(&mut self, expr: &Expr, ops: &mut Vec<OpCode>) {
        match expr {
            Expr::Constant(c) => ops.push(OpCode::LoadConst(*c)),
            Expr::Symbol(s) => {
                let idx = self.slot(s);
                ops.push(OpCode::LoadSlot(idx));
            }
            Expr::Add(items) | Expr::Mul(items) => {
                let op = if matches!(expr, Expr::Add(_)) {
                    OpCode::Add
                } else {
                    OpCode::Mul
                };
                for (i, item) in items.iter().enumerate() {
                    self.compile_recursive(item, ops);
                    if i > 0 {
                        ops.push(op);
                    }
                }
            }
            Expr::Pow(base, exponent) => {
                self.compile_recursive(base, ops);
                if exponent.fract() == 0.0 && exponent.abs() <= i32::MAX as f64 {
                    ops.push(OpCode::Powi(*exponent as i32));
                } else {
                    ops.push(OpCode::Powf(*exponent));
                }
            }
            Expr::Exp(arg) => {
                self.compile_recursive(arg, ops);
                ops.push(OpCode::Exp);
            }
            Expr::Ln(arg) => {
                self.compile_recursive(arg, ops);
                ops.push(OpCode::Ln);
            }
            Expr::GuardedRecip(arg) => {
                self.compile_recursive(arg, ops);
                ops.push(OpCode::GuardedRecip);
            }
        }
    }
}

// --- Compiled expression sets ---

/// A set of expressions compiled against one shared slot table.
pub struct EquationSystem {
    pub symbols: Vec<Symbol>,
    pub equations: Vec<Bytecode>,
    // Interior mutability for the slot and stack buffers to avoid allocation per call.
    // Note: This makes the system !Sync.
    slots: RefCell<Vec<f64>>,
    stack: RefCell<Vec<f64>>,
}

impl EquationSystem {
    pub fn new<'a>(exprs: impl IntoIterator<Item = &'a Expr>) -> Self {
        let mut compiler = Compiler::new();
        let equations: Vec<Bytecode> = exprs.into_iter().map(|e| compiler.compile(e)).collect();
        let symbols = compiler.symbols().to_vec();
        Self {
            slots: RefCell::new(vec![0.0; symbols.len()]),
            stack: RefCell::new(Vec::with_capacity(64)),
            symbols,
            equations,
        }
    }

    pub fn len(&self) -> usize {
        self.equations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equations.is_empty()
    }

    /// Binds every slot from `env` and evaluates all equations into `out`.
    pub fn evaluate<E: Environment + ?Sized>(&self, env: &E, out: &mut [f64]) -> Result<(), EvalError> {
        let mut slots = self.slots.borrow_mut();
        for (slot, symbol) in slots.iter_mut().zip(&self.symbols) {
            *slot = env
                .value(symbol)
                .ok_or_else(|| EvalError::UnboundSymbol(symbol.clone()))?;
        }
        let mut stack = self.stack.borrow_mut();
        for (value, eq) in out.iter_mut().zip(&self.equations) {
            *value = VM::execute(eq, &slots, &mut stack);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{EquationSystem, Expr, Symbol, Variable};
    use crate::error::EvalError;
    use std::collections::HashMap;

    fn y(i: usize) -> Expr {
        Expr::symbol(Symbol::Abundance(i))
    }

    fn env(values: &[(Symbol, f64)]) -> HashMap<Symbol, f64> {
        values.iter().cloned().collect()
    }

    #[test]
    fn constructors_fold_and_flatten() {
        assert!(Expr::sum([Expr::zero(), Expr::zero()]).is_zero());
        assert!(Expr::product([y(0), Expr::zero(), y(1)]).is_zero());
        assert_eq!(Expr::product([Expr::one(), y(0)]), y(0));
        assert_eq!(Expr::pow(y(0), 1.0), y(0));
        assert_eq!(Expr::pow(y(0), 0.0), Expr::one());

        let nested = Expr::product([Expr::constant(2.0), Expr::product([Expr::constant(3.0), y(0)])]);
        assert_eq!(nested, Expr::Mul(vec![Expr::constant(6.0), y(0)]));

        let sum = (y(0) + y(1)) + y(2);
        match sum {
            Expr::Add(terms) => assert_eq!(terms.len(), 3),
            other => panic!("expected a flat sum, got {other:?}"),
        }
    }

    #[test]
    fn diff_applies_product_and_power_rules() {
        // d/dY0 (3 * Y0^2 * Y1) = 6 * Y0 * Y1
        let expr = Expr::product([Expr::constant(3.0), Expr::pow(y(0), 2.0), y(1)]);
        let d = expr.diff(Variable::Abundance(0));
        let values = env(&[(Symbol::Abundance(0), 0.5), (Symbol::Abundance(1), 2.0)]);
        assert!((d.eval(&values).unwrap() - 6.0).abs() < 1e-14);
        assert!(expr.diff(Variable::Abundance(2)).is_zero());
    }

    #[test]
    fn diff_chains_through_rate_temperature_derivatives() {
        let rate = Expr::symbol(Symbol::rate(4));
        let term = Expr::product([rate, y(0)]);
        let d = term.diff(Variable::Temperature);
        assert_eq!(
            d,
            Expr::Mul(vec![Expr::symbol(Symbol::Rate { index: 4, dt_order: 1 }), y(0)])
        );
    }

    #[test]
    fn diff_of_quotient_matches_quotient_rule() {
        // f = a / (a + b) with a = rate[0], b = rate[1]
        let a = Expr::symbol(Symbol::rate(0));
        let b = Expr::symbol(Symbol::rate(1));
        let f = Expr::product([a.clone(), Expr::recip(a + b)]);
        let d = f.diff(Variable::Temperature);

        let (av, bv, dav, dbv) = (2.0, 3.0, 0.5, -0.25);
        let values = env(&[
            (Symbol::rate(0), av),
            (Symbol::rate(1), bv),
            (Symbol::Rate { index: 0, dt_order: 1 }, dav),
            (Symbol::Rate { index: 1, dt_order: 1 }, dbv),
        ]);
        let expected = (dav * (av + bv) - av * (dav + dbv)) / ((av + bv) * (av + bv));
        assert!((d.eval(&values).unwrap() - expected).abs() < 1e-14);
    }

    #[test]
    fn guarded_reciprocal_vanishes_at_zero() {
        let a = Expr::symbol(Symbol::rate(0));
        let b = Expr::symbol(Symbol::rate(1));
        let f = Expr::product([a.clone(), Expr::guarded_recip(a + b)]);
        let d = f.diff(Variable::Temperature);
        let closed = env(&[
            (Symbol::rate(0), 0.0),
            (Symbol::rate(1), 0.0),
            (Symbol::Rate { index: 0, dt_order: 1 }, 0.0),
            (Symbol::Rate { index: 1, dt_order: 1 }, 0.0),
        ]);
        assert_eq!(f.eval(&closed).unwrap(), 0.0);
        assert_eq!(d.eval(&closed).unwrap(), 0.0);

        let system = EquationSystem::new([&f, &d]);
        let mut out = vec![1.0; 2];
        system.evaluate(&closed, &mut out).unwrap();
        assert_eq!(out, vec![0.0, 0.0]);

        // Away from zero it is the plain quotient.
        let open = env(&[
            (Symbol::rate(0), 2.0),
            (Symbol::rate(1), 3.0),
            (Symbol::Rate { index: 0, dt_order: 1 }, 0.5),
            (Symbol::Rate { index: 1, dt_order: 1 }, -0.25),
        ]);
        let expected = (0.5 * 5.0 - 2.0 * 0.25) / 25.0;
        assert!((f.eval(&open).unwrap() - 0.4).abs() < 1e-15);
        assert!((d.eval(&open).unwrap() - expected).abs() < 1e-14);
        assert_eq!(Expr::guarded_recip(Expr::zero()), Expr::zero());
    }

    #[test]
    fn exp_and_ln_differentiate() {
        let x = Expr::symbol(Symbol::Temperature);
        let values = env(&[(Symbol::Temperature, 1.7)]);
        let d_exp = Expr::exp(Expr::product([Expr::constant(2.0), x.clone()])).diff(Variable::Temperature);
        assert!((d_exp.eval(&values).unwrap() - 2.0 * (3.4f64).exp()).abs() < 1e-10);
        let d_ln = Expr::ln(x).diff(Variable::Temperature);
        assert!((d_ln.eval(&values).unwrap() - 1.0 / 1.7).abs() < 1e-14);
    }

    #[test]
    fn thermal_loss_partials_accumulate() {
        let loss = Expr::symbol(Symbol::thermal_loss());
        let d = loss.diff(Variable::Abundance(2));
        assert_eq!(
            d,
            Expr::symbol(Symbol::ThermalLoss {
                partials: vec![Variable::Abundance(2)]
            })
        );
    }

    #[test]
    fn eval_reports_unbound_symbols() {
        let expr = y(0) * Expr::symbol(Symbol::Density);
        let values = env(&[(Symbol::Abundance(0), 1.0)]);
        assert_eq!(expr.eval(&values), Err(EvalError::UnboundSymbol(Symbol::Density)));
    }

    #[test]
    fn substitute_replaces_leaves() {
        let expr = Expr::product([Expr::symbol(Symbol::rate(0)), y(0)]);
        let replaced = expr.substitute(&|s| match s {
            Symbol::Rate { index: 0, dt_order: 0 } => Some(Expr::constant(2.0)),
            _ => None,
        });
        assert_eq!(replaced, Expr::Mul(vec![Expr::constant(2.0), y(0)]));
    }

    #[test]
    fn compiled_system_matches_tree_evaluation() {
        let a = Expr::symbol(Symbol::rate(0));
        let exprs = vec![
            Expr::product([Expr::constant(-0.5), a.clone(), Expr::pow(y(0), 2.0), Expr::symbol(Symbol::Density)]),
            Expr::sum([Expr::exp(y(1)), Expr::ln(a.clone()), Expr::pow(y(0), 1.5)]),
            Expr::zero(),
        ];
        let values = env(&[
            (Symbol::rate(0), 3.0),
            (Symbol::Abundance(0), 0.2),
            (Symbol::Abundance(1), 0.7),
            (Symbol::Density, 1.0e4),
        ]);
        let system = EquationSystem::new(&exprs);
        let mut out = vec![0.0; 3];
        system.evaluate(&values, &mut out).unwrap();
        for (expr, compiled) in exprs.iter().zip(&out) {
            let direct = expr.eval(&values).unwrap();
            assert!((direct - compiled).abs() <= 1e-12 * direct.abs().max(1.0));
        }
        assert_eq!(system.symbols.len(), 4);
    }

    #[test]
    fn display_renders_infix() {
        let expr = Expr::product([Expr::constant(-1.0), Expr::symbol(Symbol::rate(1)), y(0)]);
        assert_eq!(expr.to_string(), "-1.0*rate[1]*Y[0]");
    }
}
