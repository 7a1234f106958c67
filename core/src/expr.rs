//! Logical / bit-vector expressions.
//!
//! This is the AST exchanged between the exploration engine and the CPU-semantic
//! collaborator: instruction semantics surface as expressions, path constraints are
//! conjunctions of them, and the collaborator's solver consumes them to produce models.
//! Nodes are immutable and shared through [`ExprRef`].

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

// SYMBOLIC VARIABLES
// ================================================================================================

/// Handle to a symbolic variable issued by the CPU-semantic collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::From)]
pub struct VarId(pub usize);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One satisfying assignment, keyed by variable id.
///
/// A `BTreeMap` so that iteration follows the numeric variable order, which is the order
/// byte-indexed inputs were created in.
pub type Model = BTreeMap<VarId, u64>;

// EXPRESSIONS
// ================================================================================================

/// Shared handle to an expression node.
pub type ExprRef = Arc<Expr>;

/// An expression node.
///
/// Bit-vector nodes carry an explicit width; logical nodes are 1 bit wide. Evaluation is
/// total: unresolved variables evaluate to 0, so callers that need exact values must only
/// evaluate var-free nodes (see [`Expr::is_symbolized`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// Bit-vector literal of `size` bits.
    Bv { value: u64, size: u32 },
    /// Reference to a symbolic variable of `size` bits.
    Var { id: VarId, size: u32 },
    /// Logical equality.
    Eq(ExprRef, ExprRef),
    /// Logical conjunction over all children.
    And(Vec<ExprRef>),
    /// Logical disjunction over all children.
    Or(Vec<ExprRef>),
    /// Logical negation.
    Not(ExprRef),
    /// Bitwise and.
    BvAnd(ExprRef, ExprRef),
    /// Bitwise or.
    BvOr(ExprRef, ExprRef),
    /// Bitwise xor.
    BvXor(ExprRef, ExprRef),
    /// Bitwise complement.
    BvNot(ExprRef),
    /// Unsigned less-than.
    Ult(ExprRef, ExprRef),
    /// Unsigned less-than-or-equal.
    Ule(ExprRef, ExprRef),
    /// If-then-else over a logical condition.
    Ite(ExprRef, ExprRef, ExprRef),
}

impl Expr {
    // CONSTRUCTORS
    // --------------------------------------------------------------------------------------------

    /// Returns a bit-vector literal of `size` bits.
    pub fn bv(value: u64, size: u32) -> ExprRef {
        Arc::new(Self::Bv { value, size })
    }

    /// Returns a reference to symbolic variable `id` of `size` bits.
    pub fn var(id: VarId, size: u32) -> ExprRef {
        Arc::new(Self::Var { id, size })
    }

    /// Returns the equality of two nodes.
    pub fn eq(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Arc::new(Self::Eq(lhs, rhs))
    }

    /// Returns the conjunction of `nodes`.
    pub fn land(nodes: Vec<ExprRef>) -> ExprRef {
        Arc::new(Self::And(nodes))
    }

    /// Returns the disjunction of `nodes`.
    pub fn lor(nodes: Vec<ExprRef>) -> ExprRef {
        Arc::new(Self::Or(nodes))
    }

    /// Returns the logical negation of `node`.
    pub fn lnot(node: ExprRef) -> ExprRef {
        Arc::new(Self::Not(node))
    }

    /// Returns the bitwise and of two nodes.
    pub fn bvand(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Arc::new(Self::BvAnd(lhs, rhs))
    }

    /// Returns the bitwise or of two nodes.
    pub fn bvor(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Arc::new(Self::BvOr(lhs, rhs))
    }

    /// Returns the bitwise xor of two nodes.
    pub fn bvxor(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Arc::new(Self::BvXor(lhs, rhs))
    }

    /// Returns the bitwise complement of `node`.
    pub fn bvnot(node: ExprRef) -> ExprRef {
        Arc::new(Self::BvNot(node))
    }

    /// Returns the unsigned less-than of two nodes.
    pub fn ult(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Arc::new(Self::Ult(lhs, rhs))
    }

    /// Returns the unsigned less-than-or-equal of two nodes.
    pub fn ule(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Arc::new(Self::Ule(lhs, rhs))
    }

    /// Returns an if-then-else over a logical condition.
    pub fn ite(cond: ExprRef, then: ExprRef, otherwise: ExprRef) -> ExprRef {
        Arc::new(Self::Ite(cond, then, otherwise))
    }

    // PUBLIC ACCESSORS
    // --------------------------------------------------------------------------------------------

    /// Returns true if the node references at least one symbolic variable.
    pub fn is_symbolized(&self) -> bool {
        match self {
            Self::Bv { .. } => false,
            Self::Var { .. } => true,
            Self::Eq(a, b)
            | Self::BvAnd(a, b)
            | Self::BvOr(a, b)
            | Self::BvXor(a, b)
            | Self::Ult(a, b)
            | Self::Ule(a, b) => a.is_symbolized() || b.is_symbolized(),
            Self::And(nodes) | Self::Or(nodes) => nodes.iter().any(|n| n.is_symbolized()),
            Self::Not(n) | Self::BvNot(n) => n.is_symbolized(),
            Self::Ite(c, t, e) => c.is_symbolized() || t.is_symbolized() || e.is_symbolized(),
        }
    }

    /// Returns true if the root of the node is boolean-sorted.
    pub fn is_logical(&self) -> bool {
        matches!(
            self,
            Self::Eq(..) | Self::And(..) | Self::Or(..) | Self::Not(..) | Self::Ult(..) | Self::Ule(..)
        )
    }

    /// Returns the bit width of the node; logical nodes are 1 bit wide.
    pub fn size(&self) -> u32 {
        match self {
            Self::Bv { size, .. } | Self::Var { size, .. } => *size,
            Self::Eq(..)
            | Self::And(..)
            | Self::Or(..)
            | Self::Not(..)
            | Self::Ult(..)
            | Self::Ule(..) => 1,
            Self::BvAnd(a, _) | Self::BvOr(a, _) | Self::BvXor(a, _) => a.size(),
            Self::BvNot(n) => n.size(),
            Self::Ite(_, t, _) => t.size(),
        }
    }

    /// Collects every variable referenced by the node, paired with its width.
    pub fn variables(&self) -> BTreeSet<(VarId, u32)> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<(VarId, u32)>) {
        match self {
            Self::Bv { .. } => {},
            Self::Var { id, size } => {
                out.insert((*id, *size));
            },
            Self::Eq(a, b)
            | Self::BvAnd(a, b)
            | Self::BvOr(a, b)
            | Self::BvXor(a, b)
            | Self::Ult(a, b)
            | Self::Ule(a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            },
            Self::And(nodes) | Self::Or(nodes) => {
                for node in nodes {
                    node.collect_variables(out);
                }
            },
            Self::Not(n) | Self::BvNot(n) => n.collect_variables(out),
            Self::Ite(c, t, e) => {
                c.collect_variables(out);
                t.collect_variables(out);
                e.collect_variables(out);
            },
        }
    }

    // EVALUATION
    // --------------------------------------------------------------------------------------------

    /// Evaluates a var-free node to a concrete value; unresolved variables evaluate to 0.
    pub fn evaluate(&self) -> u64 {
        self.evaluate_with(&Model::new())
    }

    /// Evaluates the node under `model`; variables absent from the model evaluate to 0.
    pub fn evaluate_with(&self, model: &Model) -> u64 {
        match self {
            Self::Bv { value, size } => value & width_mask(*size),
            Self::Var { id, size } => {
                model.get(id).copied().unwrap_or(0) & width_mask(*size)
            },
            Self::Eq(a, b) => u64::from(a.evaluate_with(model) == b.evaluate_with(model)),
            Self::And(nodes) => u64::from(nodes.iter().all(|n| n.evaluate_with(model) != 0)),
            Self::Or(nodes) => u64::from(nodes.iter().any(|n| n.evaluate_with(model) != 0)),
            Self::Not(n) => u64::from(n.evaluate_with(model) == 0),
            Self::BvAnd(a, b) => a.evaluate_with(model) & b.evaluate_with(model),
            Self::BvOr(a, b) => a.evaluate_with(model) | b.evaluate_with(model),
            Self::BvXor(a, b) => a.evaluate_with(model) ^ b.evaluate_with(model),
            Self::BvNot(n) => !n.evaluate_with(model) & width_mask(n.size()),
            Self::Ult(a, b) => u64::from(a.evaluate_with(model) < b.evaluate_with(model)),
            Self::Ule(a, b) => u64::from(a.evaluate_with(model) <= b.evaluate_with(model)),
            Self::Ite(c, t, e) => {
                if c.evaluate_with(model) != 0 {
                    t.evaluate_with(model)
                } else {
                    e.evaluate_with(model)
                }
            },
        }
    }
}

/// Returns the value mask for a width in bits.
const fn width_mask(size: u32) -> u64 {
    if size >= 64 { u64::MAX } else { (1 << size) - 1 }
}

// TESTS
// ================================================================================================
