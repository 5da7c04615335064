//! Substitutions: metavariable-to-expression rewrites.
//!
//! A substitution replaces every occurrence of one metavariable atom by
//! a fresh copy of its expression. Replacement is simultaneous, so
//! metavariables inside the inserted expression are never re-visited.
//! When the inserted expression is a λ-abstraction landing in the
//! function slot of an EFA, the redex is contracted eagerly.

use crate::debruijn::{beta_contract, beta_reduce};
use crate::error::MatchError;
use crate::expr::{Expr, ExprId, ExprStore};
use crate::symbol::SymId;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use std::hash::{Hash, Hasher};

/// An immutable (metavariable, expression) rewrite.
///
/// Carries the cached set of metavariable names occurring in its
/// expression, kept current by `substitute`.
#[derive(Debug, Clone)]
pub struct Substitution {
    meta: SymId,
    expr: ExprId,
    metas: FxHashSet<SymId>,
}

impl Substitution {
    /// Create a substitution. The first argument must resolve to a
    /// metavariable atom.
    pub fn new(m: ExprId, expr: ExprId, exprs: &ExprStore) -> Result<Self, MatchError> {
        let meta = exprs.is_meta(m).ok_or_else(|| {
            MatchError::InvalidSubstitution("first argument is not a metavariable".into())
        })?;
        Ok(Self::for_name(meta, expr, exprs))
    }

    /// Create a substitution from an already-resolved metavariable name.
    pub(crate) fn for_name(meta: SymId, expr: ExprId, exprs: &ExprStore) -> Self {
        let metas = exprs.metavariables(expr);
        Self { meta, expr, metas }
    }

    /// The metavariable this substitution replaces.
    pub fn meta(&self) -> SymId {
        self.meta
    }

    /// The expression substituted in.
    pub fn expr(&self) -> ExprId {
        self.expr
    }

    /// The metavariable names occurring in the substituted expression.
    pub fn metavariables(&self) -> &FxHashSet<SymId> {
        &self.metas
    }

    /// Apply this substitution to a target, returning the rewritten
    /// expression. EFA redexes produced by the rewrite are contracted.
    ///
    /// Uses an explicit stack to avoid recursion: composite nodes are
    /// visited twice, once to queue their children and once to rebuild
    /// from the result stack.
    pub fn applied_to(&self, target: ExprId, exprs: &ExprStore) -> ExprId {
        let mut work: Vec<(ExprId, bool)> = vec![(target, false)];
        let mut results: Vec<ExprId> = Vec::new();

        while let Some((id, children_done)) = work.pop() {
            if children_done {
                // Children have been processed, now build the result
                match exprs.resolve(id) {
                    Some(Expr::App(children)) => {
                        let n = children.len();
                        let rebuilt: SmallVec<[ExprId; 4]> =
                            results.drain(results.len() - n..).collect();
                        let out = if rebuilt == children {
                            id
                        } else {
                            let new_app = exprs
                                .app(rebuilt)
                                .expect("non-empty application stays non-empty");
                            match beta_contract(new_app, exprs) {
                                // Contraction can put an argument in
                                // function position, exposing a
                                // further redex.
                                Some(contracted) => beta_reduce(contracted, exprs),
                                None => new_app,
                            }
                        };
                        results.push(out);
                    }
                    Some(Expr::Bind { head, vars, body }) => {
                        let new_body = results.pop().expect("body result is present");
                        if new_body == body {
                            results.push(id);
                        } else {
                            results.push(
                                exprs
                                    .bind(head, vars, new_body)
                                    .expect("binder stays well-formed"),
                            );
                        }
                    }
                    _ => {
                        unreachable!("only composite nodes have children_done=true");
                    }
                }
            } else {
                // First visit to this node
                match exprs.resolve(id) {
                    Some(Expr::Meta(name)) if name == self.meta => results.push(self.expr),
                    Some(Expr::App(children)) => {
                        work.push((id, true));
                        // Push children in reverse so the leftmost is
                        // processed first.
                        for &child in children.iter().rev() {
                            work.push((child, false));
                        }
                    }
                    Some(Expr::Bind { body, .. }) => {
                        work.push((id, true));
                        work.push((body, false));
                    }
                    _ => results.push(id),
                }
            }
        }

        assert_eq!(results.len(), 1);
        results.pop().expect("walk leaves one result")
    }

    /// Rewrite the stored expression in place by applying each of the
    /// given substitutions in order, refreshing the cached
    /// metavariable set.
    pub fn substitute(&mut self, others: &[Substitution], exprs: &ExprStore) {
        for other in others {
            self.expr = other.applied_to(self.expr, exprs);
        }
        self.metas = exprs.metavariables(self.expr);
    }

    /// Convenience: a new substitution with `other` applied to the
    /// stored expression.
    pub fn compose(&self, other: &Substitution, exprs: &ExprStore) -> Substitution {
        let mut out = self.clone();
        out.substitute(std::slice::from_ref(other), exprs);
        out
    }
}

impl PartialEq for Substitution {
    fn eq(&self, other: &Self) -> bool {
        self.meta == other.meta && self.expr == other.expr
    }
}

impl Eq for Substitution {}

impl Hash for Substitution {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.meta.hash(state);
        self.expr.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debruijn::make_lambda;
    use crate::test_utils::{ap, m, s, setup};

    #[test]
    fn new_rejects_non_metavariable() {
        let (symbols, exprs) = setup();
        let x = s("x", &symbols, &exprs);
        let y = s("y", &symbols, &exprs);
        let err = Substitution::new(x, y, &exprs).unwrap_err();
        assert!(matches!(err, MatchError::InvalidSubstitution(_)));
    }

    #[test]
    fn caches_metavariables_of_expression() {
        let (symbols, exprs) = setup();
        let a = m("A", &symbols, &exprs);
        let b = m("B", &symbols, &exprs);
        let e = ap("+", &[b, s("x", &symbols, &exprs)], &symbols, &exprs);
        let sub = Substitution::new(a, e, &exprs).unwrap();
        assert_eq!(sub.metavariables().len(), 1);
        assert!(sub.metavariables().contains(&symbols.intern("B")));
    }

    #[test]
    fn applied_to_replaces_every_occurrence() {
        let (symbols, exprs) = setup();
        let a = m("A", &symbols, &exprs);
        let x = s("x", &symbols, &exprs);
        let target = ap("g", &[a, a], &symbols, &exprs);
        let sub = Substitution::new(a, x, &exprs).unwrap();
        assert_eq!(sub.applied_to(target, &exprs), ap("g", &[x, x], &symbols, &exprs));
    }

    #[test]
    fn applied_to_is_simultaneous() {
        let (symbols, exprs) = setup();
        // A ↦ B__ must not be re-substituted even when applied twice
        // over; one application leaves B__ in place.
        let a = m("A", &symbols, &exprs);
        let b = m("B", &symbols, &exprs);
        let sub = Substitution::new(a, b, &exprs).unwrap();
        let target = ap("g", &[a], &symbols, &exprs);
        assert_eq!(sub.applied_to(target, &exprs), ap("g", &[b], &symbols, &exprs));
    }

    #[test]
    fn applied_to_is_idempotent_on_disjoint_domains() {
        let (symbols, exprs) = setup();
        let a = m("A", &symbols, &exprs);
        let x = s("x", &symbols, &exprs);
        let target = ap("g", &[a, x], &symbols, &exprs);
        let sub = Substitution::new(a, x, &exprs).unwrap();
        let once = sub.applied_to(target, &exprs);
        assert_eq!(sub.applied_to(once, &exprs), once);
    }

    #[test]
    fn applied_to_descends_into_binders() {
        let (symbols, exprs) = setup();
        let a = m("A", &symbols, &exprs);
        let x = s("x", &symbols, &exprs);
        let body = ap("P", &[a], &symbols, &exprs);
        let target = crate::test_utils::bind1("∀", "z", body, &symbols, &exprs);
        let sub = Substitution::new(a, x, &exprs).unwrap();
        let out = sub.applied_to(target, &exprs);
        let (_, _, new_body) = exprs.as_bind(out).unwrap();
        assert_eq!(new_body, ap("P", &[x], &symbols, &exprs));
    }

    #[test]
    fn applied_to_beta_reduces_efa_redexes() {
        let (symbols, exprs) = setup();
        // F ↦ λx. g(x, x) applied to @(F, y) contracts to g(y, y).
        let f = m("F", &symbols, &exprs);
        let y = s("y", &symbols, &exprs);
        let g = s("g", &symbols, &exprs);
        let body = exprs.app2(g, exprs.marker(0, 0, None), exprs.marker(0, 0, None));
        let lam = make_lambda(1, body, &exprs);
        let sub = Substitution::new(f, lam, &exprs).unwrap();

        let target = exprs.efa(f, &[y]);
        assert_eq!(sub.applied_to(target, &exprs), exprs.app2(g, y, y));
    }

    #[test]
    fn applied_to_leaves_other_efas_standing() {
        let (symbols, exprs) = setup();
        let f = m("F", &symbols, &exprs);
        let h = m("H", &symbols, &exprs);
        let y = s("y", &symbols, &exprs);
        let sub = Substitution::new(f, y, &exprs).unwrap();
        let target = exprs.efa(h, &[y]);
        assert_eq!(sub.applied_to(target, &exprs), target);
    }

    #[test]
    fn substitute_refreshes_cached_metas() {
        let (symbols, exprs) = setup();
        let a = m("A", &symbols, &exprs);
        let b = m("B", &symbols, &exprs);
        let x = s("x", &symbols, &exprs);
        let mut sub = Substitution::new(a, b, &exprs).unwrap();
        assert!(!sub.metavariables().is_empty());

        let fill = Substitution::new(b, x, &exprs).unwrap();
        sub.substitute(std::slice::from_ref(&fill), &exprs);
        assert_eq!(sub.expr(), x);
        assert!(sub.metavariables().is_empty());
    }

    #[test]
    fn compose_leaves_original_untouched() {
        let (symbols, exprs) = setup();
        let a = m("A", &symbols, &exprs);
        let b = m("B", &symbols, &exprs);
        let x = s("x", &symbols, &exprs);
        let sub = Substitution::new(a, b, &exprs).unwrap();
        let fill = Substitution::new(b, x, &exprs).unwrap();

        let composed = sub.compose(&fill, &exprs);
        assert_eq!(composed.expr(), x);
        assert_eq!(sub.expr(), b);
    }
}
