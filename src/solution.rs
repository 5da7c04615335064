//! Solutions: substitution sets with pairwise-disjoint domains.

use crate::debruijn::alpha_eq;
use crate::expr::{ExprId, ExprStore};
use crate::subst::Substitution;
use crate::symbol::SymId;
use lasso::Key;
use rustc_hash::{FxHashMap, FxHashSet};
use std::hash::{Hash, Hasher};

/// A set of substitutions solving a constraint system.
///
/// Entries are kept in insertion order and mutually composed: once a
/// substitution is added, every earlier entry has it applied to its
/// expression, so `apply` behaves as simultaneous substitution.
#[derive(Debug, Clone, Default)]
pub struct Solution {
    subs: Vec<Substitution>,
}

impl Solution {
    /// The empty solution.
    pub fn empty() -> Self {
        Self { subs: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    /// Iterate over the substitutions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Substitution> {
        self.subs.iter()
    }

    /// The expression assigned to a metavariable, if any.
    pub fn get(&self, meta: SymId) -> Option<ExprId> {
        self.subs
            .iter()
            .find(|s| s.meta() == meta)
            .map(|s| s.expr())
    }

    /// Compose a substitution into the solution: rewrite every existing
    /// entry with it, then append it. Returns false when the domain is
    /// already assigned a different (non-α-equal) expression; the
    /// solution is unchanged in that case.
    pub fn compose(&mut self, sub: Substitution, exprs: &ExprStore) -> bool {
        if let Some(existing) = self.get(sub.meta()) {
            return alpha_eq(existing, sub.expr(), exprs);
        }
        for entry in self.subs.iter_mut() {
            entry.substitute(std::slice::from_ref(&sub), exprs);
        }
        self.subs.push(sub);
        true
    }

    /// Apply every substitution to a pattern. Because entries are
    /// mutually composed, sequential application is simultaneous.
    pub fn apply(&self, pattern: ExprId, exprs: &ExprStore) -> ExprId {
        let mut out = pattern;
        for sub in &self.subs {
            out = sub.applied_to(out, exprs);
        }
        out
    }

    /// The assignment map: metavariable name to expression.
    pub fn assignments(&self) -> FxHashMap<SymId, ExprId> {
        self.subs.iter().map(|s| (s.meta(), s.expr())).collect()
    }

    /// A copy keeping only the assignments for the given metavariables.
    /// Used to hide the helper metavariables imitation introduces.
    pub fn restricted_to(&self, metas: &FxHashSet<SymId>, exprs: &ExprStore) -> Solution {
        let subs = self
            .subs
            .iter()
            .filter(|s| metas.contains(&s.meta()))
            .map(|s| Substitution::for_name(s.meta(), s.expr(), exprs))
            .collect();
        Solution { subs }
    }

    /// Assignment pairs in a canonical order, for order-insensitive
    /// comparison and hashing.
    fn canonical_pairs(&self) -> Vec<(usize, u32)> {
        let mut pairs: Vec<(usize, u32)> = self
            .subs
            .iter()
            .map(|s| (s.meta().into_usize(), s.expr().raw()))
            .collect();
        pairs.sort_unstable();
        pairs
    }
}

impl PartialEq for Solution {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_pairs() == other.canonical_pairs()
    }
}

impl Eq for Solution {}

impl Hash for Solution {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_pairs().hash(state);
    }
}
