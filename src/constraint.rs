//! Constraints: immutable (pattern, expression) pairs with memoised
//! complexity triage.
//!
//! The complexity class decides both what the solver does with a
//! constraint and when: lower weight means more information and a
//! cheaper resolution step, so the solver always picks the
//! lowest-weight constraint first.

use crate::debruijn::{alpha_eq, encode, occurrences};
use crate::error::MatchError;
use crate::expr::{Expr, ExprId, ExprStore};
use crate::subst::Substitution;
use smallvec::SmallVec;
use std::cell::OnceCell;

/// Fixed occurrence estimate for EFA arguments that still contain a
/// metavariable: their real copy count is unknown until instantiation.
pub const EFA_ARG_ESTIMATE: u32 = 2;

/// Complexity class of a constraint, ordered by weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    /// The constraint can never be satisfied.
    Failure,
    /// Pattern and expression are already equal.
    Success,
    /// The pattern is a lone metavariable: solving is one assignment.
    Instantiation,
    /// Pattern and expression are applications of equal arity: solving
    /// decomposes into the zipped children.
    Children,
    /// The pattern is an EFA; the weight is `4 +` the per-argument
    /// occurrence counts (or estimates).
    Efa(u32),
}

impl Complexity {
    /// Numeric weight; lower resolves first.
    pub fn weight(&self) -> u32 {
        match self {
            Complexity::Failure => 0,
            Complexity::Success => 1,
            Complexity::Instantiation => 2,
            Complexity::Children => 3,
            Complexity::Efa(w) => *w,
        }
    }
}

/// Cached per-argument pruning data for an EFA constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgInfo {
    /// Occurrences of the argument in the expression (the estimate
    /// `EFA_ARG_ESTIMATE` when the argument contains a metavariable).
    pub copy_count: u32,
    /// Does the argument contain a metavariable?
    pub has_meta: bool,
}

#[derive(Debug, Clone)]
struct Classified {
    complexity: Complexity,
    args: SmallVec<[ArgInfo; 4]>,
}

/// An immutable (pattern, expression) pair over encoded expressions.
///
/// The expression side is metavariable-free; the pattern may contain
/// free metavariables (the substitution targets) but no bound ones.
/// Complexity is computed on first use and memoised; the constraint is
/// owned by a single problem, so no locking is needed.
#[derive(Debug, Clone)]
pub struct Constraint {
    pattern: ExprId,
    expression: ExprId,
    memo: OnceCell<Classified>,
}

impl Constraint {
    /// Create a constraint, encoding both sides.
    ///
    /// Fails with `InvalidConstraint` when the expression side contains
    /// a metavariable or the pattern binds one.
    pub fn new(pattern: ExprId, expression: ExprId, exprs: &ExprStore) -> Result<Self, MatchError> {
        if exprs.contains_metavariable(expression) {
            return Err(MatchError::InvalidConstraint(
                "expression side contains a metavariable".into(),
            ));
        }
        if binds_a_metavariable(pattern, exprs) {
            return Err(MatchError::InvalidConstraint(
                "pattern binds a metavariable".into(),
            ));
        }
        Ok(Self::new_encoded(
            encode(pattern, exprs),
            encode(expression, exprs),
        ))
    }

    /// Build a constraint from already-encoded, already-validated
    /// sides. Used by the solver when decomposing and substituting.
    pub(crate) fn new_encoded(pattern: ExprId, expression: ExprId) -> Self {
        Self {
            pattern,
            expression,
            memo: OnceCell::new(),
        }
    }

    pub fn pattern(&self) -> ExprId {
        self.pattern
    }

    pub fn expression(&self) -> ExprId {
        self.expression
    }

    /// The memoised complexity class.
    pub fn complexity(&self, exprs: &ExprStore) -> Complexity {
        self.classified(exprs).complexity
    }

    /// Cached pruning data; empty for non-EFA constraints.
    pub fn efa_args(&self, exprs: &ExprStore) -> &[ArgInfo] {
        &self.classified(exprs).args
    }

    /// True when every EFA argument is closed and absent from the
    /// expression: only the constant instantiation can possibly work.
    pub fn can_only_be_constant(&self, exprs: &ExprStore) -> bool {
        matches!(self.complexity(exprs), Complexity::Efa(4))
    }

    /// True when the k-th projection branch is worth trying: the
    /// argument occurs exactly once, or it still contains a
    /// metavariable so its copy count is unknown.
    pub fn can_project(&self, k: usize, exprs: &ExprStore) -> bool {
        self.efa_args(exprs)
            .get(k)
            .map(|info| info.has_meta || info.copy_count == 1)
            .unwrap_or(false)
    }

    /// The zipped children constraints. Valid only when the complexity
    /// is `Children`.
    pub fn children(&self, exprs: &ExprStore) -> Option<Vec<Constraint>> {
        if self.complexity(exprs) != Complexity::Children {
            return None;
        }
        let pc = exprs.as_app(self.pattern)?;
        let ec = exprs.as_app(self.expression)?;
        Some(
            pc.iter()
                .zip(ec.iter())
                .map(|(&p, &e)| Constraint::new_encoded(p, e))
                .collect(),
        )
    }

    /// A new constraint with the substitution applied to the pattern;
    /// the expression side is untouched and the complexity is
    /// recomputed lazily on the new value.
    pub fn after_substituting(&self, sub: &Substitution, exprs: &ExprStore) -> Constraint {
        Constraint::new_encoded(sub.applied_to(self.pattern, exprs), self.expression)
    }

    fn classified(&self, exprs: &ExprStore) -> &Classified {
        self.memo.get_or_init(|| classify(self.pattern, self.expression, exprs))
    }
}

/// Deterministic classification, by first match (see the solver's
/// triage): lone metavariable, EFA, metavariable-free, application.
fn classify(pattern: ExprId, expression: ExprId, exprs: &ExprStore) -> Classified {
    if exprs.is_meta(pattern).is_some() {
        return Classified {
            complexity: Complexity::Instantiation,
            args: SmallVec::new(),
        };
    }

    if let Some((_, args)) = exprs.is_efa(pattern) {
        let infos: SmallVec<[ArgInfo; 4]> = args
            .iter()
            .map(|&arg| {
                if exprs.contains_metavariable(arg) {
                    ArgInfo {
                        copy_count: EFA_ARG_ESTIMATE,
                        has_meta: true,
                    }
                } else {
                    ArgInfo {
                        copy_count: occurrences(arg, expression, exprs),
                        has_meta: false,
                    }
                }
            })
            .collect();
        let weight = 4 + infos.iter().map(|i| i.copy_count).sum::<u32>();
        return Classified {
            complexity: Complexity::Efa(weight),
            args: infos,
        };
    }

    if !exprs.contains_metavariable(pattern) {
        let complexity = if alpha_eq(pattern, expression, exprs) {
            Complexity::Success
        } else {
            Complexity::Failure
        };
        return Classified {
            complexity,
            args: SmallVec::new(),
        };
    }

    // Pattern is an application with metavariables strictly inside.
    let complexity = match (exprs.as_app(pattern), exprs.as_app(expression)) {
        (Some(pc), Some(ec)) if pc.len() == ec.len() => Complexity::Children,
        _ => Complexity::Failure,
    };
    Classified {
        complexity,
        args: SmallVec::new(),
    }
}

/// Does any binder in the expression list a metavariable among its
/// bound variables? Checks both named binders and the slot positions
/// of already-encoded ones.
fn binds_a_metavariable(e: ExprId, exprs: &ExprStore) -> bool {
    let mut stack: SmallVec<[ExprId; 16]> = smallvec::smallvec![e];
    while let Some(x) = stack.pop() {
        match exprs.resolve(x) {
            Some(Expr::App(children)) => {
                if exprs.is_encoded_binder(x).is_some()
                    && children[2..children.len() - 1]
                        .iter()
                        .any(|&slot| exprs.is_meta(slot).is_some())
                {
                    return true;
                }
                stack.extend(children.iter().copied());
            }
            Some(Expr::Bind { head, vars, body }) => {
                if vars.iter().any(|&v| exprs.is_meta(v).is_some()) {
                    return true;
                }
                stack.push(head);
                stack.push(body);
            }
            _ => {}
        }
    }
    false
}

/// Render a constraint pair in the canonical `(P, E)` debug notation.
pub fn format_constraint(
    constraint: &Constraint,
    exprs: &ExprStore,
    symbols: &crate::symbol::SymbolStore,
) -> Result<String, String> {
    let p = crate::expr::format_expr(constraint.pattern(), exprs, symbols)?;
    let e = crate::expr::format_expr(constraint.expression(), exprs, symbols)?;
    Ok(format!("({}, {})", p, e))
}

#[cfg(test)]
#[path = "tests/constraint.rs"]
mod tests;
