//! A bounded model-finder over the core expression language.
//!
//! Good enough for tests, nothing more: unit propagation over conjunctions of equalities
//! followed by a depth-first search over candidate values harvested from the constraint
//! itself. Real deployments plug a real SMT solver in through the collaborator.

use std::collections::BTreeSet;

use koi_core::{Expr, ExprRef, Model, VarId};

/// Hard cap on full-assignment evaluations before the search gives up.
const MAX_EVALUATIONS: usize = 1 << 17;

// MODEL SEARCH
// ================================================================================================

/// Returns one satisfying assignment for `constraint`, or an empty model when none is found.
///
/// A constraint without variables yields the empty model regardless of its truth value,
/// matching solver backends that only report assignments.
pub fn find_model(constraint: &ExprRef) -> Model {
    find_models(constraint, 1).into_iter().next().unwrap_or_default()
}

/// Returns up to `limit` distinct satisfying assignments for `constraint`.
pub fn find_models(constraint: &ExprRef, limit: usize) -> Vec<Model> {
    let constraint = strip_double_negation(constraint);
    let vars: Vec<(VarId, u32)> = constraint.variables().into_iter().collect();
    if vars.is_empty() || limit == 0 {
        return Vec::new();
    }

    // Forced assignments first: equalities that appear as positive conjuncts.
    let mut forced = Model::new();
    if !propagate_equalities(&constraint, &mut forced) {
        return Vec::new();
    }

    let candidates = candidate_values(&constraint);
    let mut models = Vec::new();
    let mut assignment = forced.clone();
    let mut budget = MAX_EVALUATIONS;
    search(
        &constraint,
        &vars,
        &candidates,
        &forced,
        &mut assignment,
        0,
        limit,
        &mut models,
        &mut budget,
    );
    models
}

#[allow(clippy::too_many_arguments)]
fn search(
    constraint: &ExprRef,
    vars: &[(VarId, u32)],
    candidates: &BTreeSet<u64>,
    forced: &Model,
    assignment: &mut Model,
    index: usize,
    limit: usize,
    models: &mut Vec<Model>,
    budget: &mut usize,
) {
    if models.len() >= limit || *budget == 0 {
        return;
    }
    if index == vars.len() {
        *budget -= 1;
        if constraint.evaluate_with(assignment) != 0 {
            models.push(assignment.clone());
        }
        return;
    }

    let (id, size) = vars[index];
    if forced.contains_key(&id) {
        search(constraint, vars, candidates, forced, assignment, index + 1, limit, models, budget);
        return;
    }

    let mask = if size >= 64 { u64::MAX } else { (1u64 << size) - 1 };
    let mut tried = BTreeSet::new();
    for &candidate in candidates {
        let value = candidate & mask;
        if !tried.insert(value) {
            continue;
        }
        assignment.insert(id, value);
        search(constraint, vars, candidates, forced, assignment, index + 1, limit, models, budget);
        if models.len() >= limit || *budget == 0 {
            break;
        }
    }
    assignment.remove(&id);
}

// NORMALIZATION AND PROPAGATION
// ================================================================================================

/// Strips `Not(Not(x))` wrappers so propagation sees through double negation.
fn strip_double_negation(expr: &ExprRef) -> ExprRef {
    if let Expr::Not(inner) = expr.as_ref()
        && let Expr::Not(innermost) = inner.as_ref()
    {
        return strip_double_negation(innermost);
    }
    expr.clone()
}

/// Walks positive conjuncts assigning `var == literal` equalities.
///
/// Returns false on a direct conflict between two forced assignments.
fn propagate_equalities(expr: &ExprRef, forced: &mut Model) -> bool {
    match expr.as_ref() {
        Expr::And(nodes) => nodes.iter().all(|node| {
            let node = strip_double_negation(node);
            propagate_equalities(&node, forced)
        }),
        Expr::Eq(lhs, rhs) => {
            let pair = match (lhs.as_ref(), rhs.as_ref()) {
                (Expr::Var { id, size }, Expr::Bv { value, .. })
                | (Expr::Bv { value, .. }, Expr::Var { id, size }) => Some((*id, *value, *size)),
                _ => None,
            };
            if let Some((id, value, size)) = pair {
                let mask = if size >= 64 { u64::MAX } else { (1u64 << size) - 1 };
                let value = value & mask;
                if let Some(existing) = forced.get(&id) {
                    return *existing == value;
                }
                forced.insert(id, value);
            }
            true
        },
        _ => true,
    }
}

/// Harvests candidate values from every literal in the constraint.
fn candidate_values(expr: &ExprRef) -> BTreeSet<u64> {
    let mut out = BTreeSet::from([0, 1]);
    collect_literals(expr, &mut out);
    out
}

fn collect_literals(expr: &ExprRef, out: &mut BTreeSet<u64>) {
    match expr.as_ref() {
        Expr::Bv { value, .. } => {
            out.insert(*value);
            out.insert(value.wrapping_add(1));
            out.insert(value.wrapping_sub(1));
        },
        Expr::Var { .. } => {},
        Expr::Eq(a, b)
        | Expr::BvAnd(a, b)
        | Expr::BvOr(a, b)
        | Expr::BvXor(a, b)
        | Expr::Ult(a, b)
        | Expr::Ule(a, b) => {
            collect_literals(a, out);
            collect_literals(b, out);
        },
        Expr::And(nodes) | Expr::Or(nodes) => {
            for node in nodes {
                collect_literals(node, out);
            }
        },
        Expr::Not(n) | Expr::BvNot(n) => collect_literals(n, out),
        Expr::Ite(c, t, e) => {
            collect_literals(c, out);
            collect_literals(t, out);
            collect_literals(e, out);
        },
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use koi_core::{Expr, VarId};
    use pretty_assertions::assert_eq;

    use super::{find_model, find_models};

    #[test]
    fn equality_conjunction_is_propagated() {
        let cnstr = Expr::land(vec![
            Expr::eq(Expr::var(VarId(0), 8), Expr::bv(0x73, 8)),
            Expr::eq(Expr::bv(0x65, 8), Expr::var(VarId(1), 8)),
        ]);
        let model = find_model(&cnstr);
        assert_eq!(model[&VarId(0)], 0x73);
        assert_eq!(model[&VarId(1)], 0x65);
    }

    #[test]
    fn negated_equality_avoids_the_literal() {
        let cnstr = Expr::lnot(Expr::eq(Expr::var(VarId(0), 8), Expr::bv(5, 8)));
        let model = find_model(&cnstr);
        assert_ne!(model[&VarId(0)], 5);
    }

    #[test]
    fn double_negation_is_transparent() {
        let eqs = Expr::land(vec![
            Expr::eq(Expr::var(VarId(0), 8), Expr::bv(0x41, 8)),
            Expr::eq(Expr::var(VarId(1), 8), Expr::bv(0x42, 8)),
        ]);
        let cnstr = Expr::lnot(Expr::lnot(eqs));
        let model = find_model(&cnstr);
        assert_eq!(model[&VarId(0)], 0x41);
        assert_eq!(model[&VarId(1)], 0x42);
    }

    #[test]
    fn contradictions_are_unsat() {
        let cnstr = Expr::land(vec![
            Expr::eq(Expr::var(VarId(0), 8), Expr::bv(1, 8)),
            Expr::eq(Expr::var(VarId(0), 8), Expr::bv(2, 8)),
        ]);
        assert!(find_model(&cnstr).is_empty());
    }

    #[test]
    fn var_free_constraints_yield_no_model() {
        let cnstr = Expr::eq(Expr::bv(1, 8), Expr::bv(1, 8));
        assert!(find_model(&cnstr).is_empty());
    }

    #[test]
    fn comparisons_are_searched() {
        let cnstr = Expr::ult(Expr::var(VarId(0), 8), Expr::bv(2, 8));
        let model = find_model(&cnstr);
        assert!(model[&VarId(0)] < 2);
    }

    #[test]
    fn model_enumeration_is_distinct() {
        let cnstr = Expr::ule(Expr::var(VarId(0), 8), Expr::bv(1, 8));
        let models = find_models(&cnstr, 4);
        assert_eq!(models.len(), 2);
        assert_ne!(models[0], models[1]);
    }
}
