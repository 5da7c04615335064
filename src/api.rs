//! Public API for homatch - higher-order pattern matching.
//!
//! This module provides a high-level interface for building
//! expressions, posing constraint systems and driving the solution
//! stream.

use crate::constraint::Constraint;
use crate::error::MatchError;
use crate::expr::ExprStore;
use crate::solution::Solution;
use crate::solver::{MatchOptions, Solutions, Verdict};
use crate::symbol::SymbolStore;

/// The matcher owns the symbol and expression stores and hands out
/// solution streams over constraint systems built against them.
///
/// Independent matchers are fully isolated; a single matcher may be
/// shared across threads for expression construction, while each
/// solution stream is owned by exactly one consumer.
pub struct Matcher {
    symbols: SymbolStore,
    exprs: ExprStore,
}

impl Matcher {
    /// Create a matcher with fresh stores.
    pub fn new() -> Self {
        let symbols = SymbolStore::new();
        let exprs = ExprStore::new(&symbols);
        Self { symbols, exprs }
    }

    /// Get a reference to the symbol store.
    pub fn symbols(&self) -> &SymbolStore {
        &self.symbols
    }

    /// Get a reference to the expression store.
    pub fn exprs(&self) -> &ExprStore {
        &self.exprs
    }

    /// Build a constraint against this matcher's stores.
    pub fn constraint(
        &self,
        pattern: crate::expr::ExprId,
        expression: crate::expr::ExprId,
    ) -> Result<Constraint, MatchError> {
        Constraint::new(pattern, expression, &self.exprs)
    }

    /// Start a lazy solution stream over a constraint system.
    pub fn solutions(&self, constraints: Vec<Constraint>, opts: MatchOptions) -> Solutions<'_> {
        Solutions::new(constraints, &self.exprs, &self.symbols, opts)
    }

    /// Run the stream to its first solution.
    ///
    /// `Ok(None)` means the stream is exhausted with no solution; a
    /// budget overrun is surfaced as `Err(MatchError::Budget)`.
    pub fn first_solution(
        &self,
        constraints: Vec<Constraint>,
        opts: MatchOptions,
    ) -> Result<Option<Solution>, MatchError> {
        let opts = MatchOptions {
            max_solutions: Some(opts.max_solutions.map_or(1, |m| m.min(1))),
            ..opts
        };
        let mut stream = self.solutions(constraints, opts);
        match stream.next() {
            Some(solution) => Ok(Some(solution)),
            None => match stream.verdict() {
                Some(Verdict::OutOfBudget) => Err(MatchError::Budget),
                _ => Ok(None),
            },
        }
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}
