//! Solver-independent representation of the assembled mathematical program
//!
//! The program is a plain list of variables and linear rows:
//!
//! ```text
//! minimise    cᵀx + c₀
//! subject to  aᵢᵀx {≤, =, ≥} bᵢ      for each constraint i
//!             lⱼ ≤ xⱼ ≤ uⱼ             for each variable j
//!             xⱼ ∈ ℤ                    for integer variables
//! ```
//!
//! Every variable is tagged with the [`Stage`] it belongs to (planning or
//! the operation of one period). The tags let the decomposition controller
//! split one assembled program into a planning problem and per-period
//! subproblems without a second build path.
//!
//! Expressions keep their terms in a `BTreeMap`, so iteration order (and
//! therefore matrix layout) depends only on variable indices.

use std::collections::BTreeMap;
use std::fmt;

/// Handle of a variable in a [`LinearProgram`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(usize);

/// Handle of a constraint row in a [`LinearProgram`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(usize);

impl VariableId {
    #[inline]
    pub fn from_index(index: usize) -> Self {
        VariableId(index)
    }
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl ConstraintId {
    #[inline]
    pub fn from_index(index: usize) -> Self {
        ConstraintId(index)
    }
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Which part of a decomposition a variable belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Investment decisions shared by all periods
    Planning,
    /// Operational decisions of one period (1-based index)
    Operation(usize),
}

/// Variable domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Continuous,
    Integer,
}

/// Row sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    LessEqual,
    Equal,
    GreaterEqual,
}

impl fmt::Display for Sense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sense::LessEqual => write!(f, "<="),
            Sense::Equal => write!(f, "=="),
            Sense::GreaterEqual => write!(f, ">="),
        }
    }
}

/// Variable declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDef {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub domain: Domain,
    pub stage: Stage,
}

impl VariableDef {
    /// Continuous variable in `[0, +∞)`.
    pub fn non_negative(name: impl Into<String>, stage: Stage) -> Self {
        Self {
            name: name.into(),
            lower: 0.0,
            upper: f64::INFINITY,
            domain: Domain::Continuous,
            stage,
        }
    }

    /// Continuous variable in `(-∞, +∞)`.
    pub fn free(name: impl Into<String>, stage: Stage) -> Self {
        Self {
            name: name.into(),
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            domain: Domain::Continuous,
            stage,
        }
    }

    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    pub fn with_upper(mut self, upper: f64) -> Self {
        self.upper = upper;
        self
    }

    pub fn integer(mut self) -> Self {
        self.domain = Domain::Integer;
        self
    }
}

/// Linear expression `Σ cⱼ·xⱼ + c₀`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    terms: BTreeMap<VariableId, f64>,
    constant: f64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: value,
        }
    }

    /// Build from `(variable, coefficient)` pairs; repeated variables are summed.
    pub fn from_terms(terms: impl IntoIterator<Item = (VariableId, f64)>) -> Self {
        let mut expr = Self::new();
        for (var, coef) in terms {
            expr.add_term(var, coef);
        }
        expr
    }

    pub fn add_term(&mut self, var: VariableId, coef: f64) {
        if coef == 0.0 {
            return;
        }
        let entry = self.terms.entry(var).or_insert(0.0);
        *entry += coef;
        if *entry == 0.0 {
            self.terms.remove(&var);
        }
    }

    pub fn add_constant(&mut self, value: f64) {
        self.constant += value;
    }

    /// `self += scale · other`
    pub fn add_scaled(&mut self, other: &LinearExpr, scale: f64) {
        for (&var, &coef) in &other.terms {
            self.add_term(var, scale * coef);
        }
        self.constant += scale * other.constant;
    }

    pub fn with_term(mut self, var: VariableId, coef: f64) -> Self {
        self.add_term(var, coef);
        self
    }

    pub fn terms(&self) -> impl Iterator<Item = (VariableId, f64)> + '_ {
        self.terms.iter().map(|(&v, &c)| (v, c))
    }

    pub fn coefficient(&self, var: VariableId) -> f64 {
        self.terms.get(&var).copied().unwrap_or(0.0)
    }

    pub fn constant_term(&self) -> f64 {
        self.constant
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.constant == 0.0
    }

    /// Value of the expression for a full variable assignment.
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(var, coef)| coef * values.get(var.index()).copied().unwrap_or(0.0))
            .sum::<f64>()
            + self.constant
    }

    /// Clear terms and constant, returning the previous expression.
    pub fn take(&mut self) -> LinearExpr {
        std::mem::take(self)
    }
}

impl From<VariableId> for LinearExpr {
    fn from(var: VariableId) -> Self {
        LinearExpr::new().with_term(var, 1.0)
    }
}

/// A linear row `expr {sense} rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintDef {
    pub name: String,
    pub expr: LinearExpr,
    pub sense: Sense,
    pub rhs: f64,
}

/// Assembled program handed from the builder to the solve stage.
#[derive(Debug, Clone, Default)]
pub struct LinearProgram {
    variables: Vec<VariableDef>,
    constraints: Vec<ConstraintDef>,
    objective: LinearExpr,
    /// Ask the engine to equilibrate rows before solving
    pub scale_constraints: bool,
}

impl LinearProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_variable(&mut self, def: VariableDef) -> VariableId {
        let id = VariableId(self.variables.len());
        self.variables.push(def);
        id
    }

    /// Add `expr {sense} rhs`; the constant of `expr` is moved to the right-hand side.
    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        mut expr: LinearExpr,
        sense: Sense,
        rhs: f64,
    ) -> ConstraintId {
        let rhs = rhs - expr.constant;
        expr.constant = 0.0;
        let id = ConstraintId(self.constraints.len());
        self.constraints.push(ConstraintDef {
            name: name.into(),
            expr,
            sense,
            rhs,
        });
        id
    }

    /// Replace the right-hand side of an existing row.
    pub fn set_rhs(&mut self, id: ConstraintId, rhs: f64) {
        self.constraints[id.0].rhs = rhs;
    }

    /// Tighten or relax the upper bound of an existing variable.
    pub fn set_upper(&mut self, id: VariableId, upper: f64) {
        self.variables[id.0].upper = upper;
    }

    pub fn set_objective(&mut self, objective: LinearExpr) {
        self.objective = objective;
    }

    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    pub fn variable(&self, id: VariableId) -> &VariableDef {
        &self.variables[id.0]
    }

    pub fn constraint(&self, id: ConstraintId) -> &ConstraintDef {
        &self.constraints[id.0]
    }

    pub fn variables(&self) -> &[VariableDef] {
        &self.variables
    }

    pub fn constraints(&self) -> &[ConstraintDef] {
        &self.constraints
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn num_integer_variables(&self) -> usize {
        self.variables
            .iter()
            .filter(|v| v.domain == Domain::Integer)
            .count()
    }

    /// Objective value for a full assignment.
    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.objective.evaluate(values)
    }

    /// Largest violation of any row or bound for the given assignment.
    pub fn max_violation(&self, values: &[f64]) -> f64 {
        let rows = self.constraints.iter().map(|c| {
            let lhs = c.expr.evaluate(values);
            match c.sense {
                Sense::LessEqual => (lhs - c.rhs).max(0.0),
                Sense::GreaterEqual => (c.rhs - lhs).max(0.0),
                Sense::Equal => (lhs - c.rhs).abs(),
            }
        });
        let bounds = self.variables.iter().enumerate().map(|(j, v)| {
            let x = values.get(j).copied().unwrap_or(0.0);
            (v.lower - x).max(0.0).max(x - v.upper)
        });
        rows.chain(bounds).fold(0.0, f64::max)
    }
}
