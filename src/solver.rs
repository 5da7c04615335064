//! Problem - the constraint-set solver.
//!
//! The solver is an explicit search tree stepped one notch at a time:
//! `Expand` nodes hold a live problem, `Or` nodes hold pending
//! branches, `Emit` nodes hold a found solution. Stepping is
//! depth-first and left-to-right, so for a fixed input the stream of
//! solutions is deterministic and EFA candidates surface in the order
//! they were enumerated (constant, projections, imitation).

use crate::constraint::{Complexity, Constraint};
use crate::debruijn::{is_free_to_replace, lift, make_lambda};
use crate::expr::{ExprId, ExprStore};
use crate::metrics::{MetricsReport, SearchMetrics};
use crate::solution::Solution;
use crate::subst::Substitution;
use crate::symbol::{SymId, SymbolStore};
use hashbrown::HashSet;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

#[cfg(feature = "tracing")]
use crate::trace::{debug_span, trace};

/// Options for a single solve.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    /// Stop after this many solutions.
    pub max_solutions: Option<usize>,
    /// Abort the search after this many steps, reporting
    /// `Verdict::OutOfBudget` instead of exhaustion.
    pub step_budget: Option<u64>,
    /// Restrict EFA enumeration to projection/imitation chains; the
    /// constant branch is kept only when it is the only branch.
    pub direct: bool,
}

/// Why a solution stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The search space was explored completely.
    Exhausted,
    /// The step budget ran out mid-search.
    OutOfBudget,
    /// The `max_solutions` cap was reached.
    MaxSolutions,
}

/// A mutable set of constraints plus the partial solution accumulated
/// while solving them.
#[derive(Debug, Clone)]
pub struct Problem {
    constraints: Vec<Constraint>,
    solution: Solution,
    /// Metavariables of the original constraint set; emitted solutions
    /// are restricted to these.
    originals: FxHashSet<SymId>,
}

impl Problem {
    /// Create an empty problem.
    pub fn empty() -> Self {
        Self {
            constraints: Vec::new(),
            solution: Solution::empty(),
            originals: FxHashSet::default(),
        }
    }

    /// Create a problem from an initial constraint list.
    pub fn new(constraints: Vec<Constraint>, exprs: &ExprStore) -> Self {
        let mut problem = Self::empty();
        for c in constraints {
            problem.add(c, exprs);
        }
        problem
    }

    /// Add a constraint, recording its pattern metavariables as
    /// solution targets.
    pub fn add(&mut self, constraint: Constraint, exprs: &ExprStore) {
        self.originals
            .extend(exprs.metavariables(constraint.pattern()));
        self.constraints.push(constraint);
    }

    /// Apply a substitution to every constraint pattern in place.
    pub fn substitute(&mut self, sub: &Substitution, exprs: &ExprStore) {
        for c in self.constraints.iter_mut() {
            *c = c.after_substituting(sub, exprs);
        }
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn solution(&self) -> &Solution {
        &self.solution
    }
}

/// Search tree node.
///
/// - `Fail`: dead end, no more solutions
/// - `Or(left, right)`: pending alternatives, left explored first
/// - `Emit(solution, rest)`: yield a solution, continue with rest
/// - `Expand(problem)`: a live problem awaiting its next triage step
#[derive(Debug, Clone)]
enum SearchNode {
    Fail,
    Or(Box<SearchNode>, Box<SearchNode>),
    Emit(Solution, Box<SearchNode>),
    Expand(Problem),
}

/// Result of stepping a node one notch.
enum NodeStep {
    /// Produced a solution and the remaining node.
    Emit(Solution, SearchNode),
    /// No solution yet, but the node advanced.
    Continue(SearchNode),
    /// Exhausted - no more solutions.
    Exhausted,
}

struct SolveCtx<'a> {
    exprs: &'a ExprStore,
    symbols: &'a SymbolStore,
    direct: bool,
    metrics: &'a SearchMetrics,
}

/// Step a node once, depth-first.
fn step_node(node: SearchNode, ctx: &SolveCtx<'_>) -> NodeStep {
    match node {
        SearchNode::Fail => NodeStep::Exhausted,

        SearchNode::Emit(solution, rest) => NodeStep::Emit(solution, *rest),

        SearchNode::Or(left, right) => match step_node(*left, ctx) {
            NodeStep::Emit(solution, new_left) => {
                NodeStep::Emit(solution, SearchNode::Or(Box::new(new_left), right))
            }
            NodeStep::Continue(new_left) => {
                NodeStep::Continue(SearchNode::Or(Box::new(new_left), right))
            }
            NodeStep::Exhausted => NodeStep::Continue(*right),
        },

        SearchNode::Expand(problem) => NodeStep::Continue(expand(problem, ctx)),
    }
}

/// One triage step: pick the lowest-weight constraint and dispatch on
/// its complexity class.
fn expand(mut problem: Problem, ctx: &SolveCtx<'_>) -> SearchNode {
    ctx.metrics.record_step();

    if problem.constraints.is_empty() {
        ctx.metrics.record_solution();
        #[cfg(feature = "tracing")]
        trace!(assignments = problem.solution.len(), "solution_found");
        let restricted = problem
            .solution
            .restricted_to(&problem.originals, ctx.exprs);
        return SearchNode::Emit(restricted, Box::new(SearchNode::Fail));
    }

    // Scan for the cheapest constraint; any failure kills the branch.
    let mut best: Option<(u32, usize)> = None;
    for (idx, c) in problem.constraints.iter().enumerate() {
        let weight = c.complexity(ctx.exprs).weight();
        if weight == 0 {
            #[cfg(feature = "tracing")]
            trace!(constraint = idx, "branch_failed");
            return SearchNode::Fail;
        }
        if best.map_or(true, |(w, _)| weight < w) {
            best = Some((weight, idx));
        }
    }
    let (_, idx) = best.expect("non-empty constraint list has a minimum");

    match problem.constraints[idx].complexity(ctx.exprs) {
        Complexity::Failure => SearchNode::Fail,

        Complexity::Success => {
            problem.constraints.remove(idx);
            SearchNode::Expand(problem)
        }

        Complexity::Instantiation => expand_instantiation(problem, idx, ctx),

        Complexity::Children => {
            let children = match problem.constraints[idx].children(ctx.exprs) {
                Some(children) => children,
                None => return SearchNode::Fail,
            };
            problem.constraints.splice(idx..idx + 1, children);
            SearchNode::Expand(problem)
        }

        Complexity::Efa(_) => expand_efa(problem, idx, ctx),
    }
}

/// Solve a lone-metavariable constraint by committing the assignment.
fn expand_instantiation(mut problem: Problem, idx: usize, ctx: &SolveCtx<'_>) -> SearchNode {
    let constraint = problem.constraints.remove(idx);
    let m = match ctx.exprs.is_meta(constraint.pattern()) {
        Some(m) => m,
        None => return SearchNode::Fail,
    };
    let sub = Substitution::for_name(m, constraint.expression(), ctx.exprs);

    if !guard_passes(&sub, m, &problem, ctx) {
        ctx.metrics.record_prune();
        return SearchNode::Fail;
    }
    if !problem.solution.compose(sub.clone(), ctx.exprs) {
        #[cfg(feature = "tracing")]
        trace!("conflicting_assignment");
        ctx.metrics.record_prune();
        return SearchNode::Fail;
    }
    problem.substitute(&sub, ctx.exprs);
    SearchNode::Expand(problem)
}

/// Enumerate the candidate instantiations of an EFA constraint:
/// constant, enabled projections, imitation of the expression head.
fn expand_efa(problem: Problem, idx: usize, ctx: &SolveCtx<'_>) -> SearchNode {
    #[cfg(feature = "tracing")]
    let _span = debug_span!("expand_efa", constraint = idx).entered();

    let constraint = &problem.constraints[idx];
    let (fname, args) = match ctx.exprs.is_efa(constraint.pattern()) {
        Some(parts) => parts,
        None => return SearchNode::Fail,
    };
    let e = constraint.expression();
    let n = args.len() as u32;

    let constant_only = constraint.can_only_be_constant(ctx.exprs);

    // Projections: x_k can only work when the argument occurs exactly
    // once or its copy count is still unknown.
    let mut projections: Vec<Substitution> = Vec::new();
    if !constant_only {
        for k in 0..args.len() {
            if constraint.can_project(k, ctx.exprs) {
                let body = ctx.exprs.marker(0, k as u32, None);
                let lam = make_lambda(n, body, ctx.exprs);
                projections.push(Substitution::for_name(fname, lam, ctx.exprs));
            } else {
                ctx.metrics.record_prune();
            }
        }
    }

    // Imitation: copy the expression head and hand each remaining
    // child to a fresh helper EFA over the same arguments.
    let imitation = if constant_only {
        None
    } else {
        ctx.exprs.as_app(e).map(|echildren| {
            let markers: SmallVec<[ExprId; 4]> =
                (0..n).map(|j| ctx.exprs.marker(0, j, None)).collect();
            let mut body_children: SmallVec<[ExprId; 4]> = SmallVec::new();
            body_children.push(lift(echildren[0], 1, 0, ctx.exprs));
            for _ in &echildren[1..] {
                let h = ctx.exprs.meta(ctx.symbols.fresh_meta());
                body_children.push(ctx.exprs.efa(h, &markers));
            }
            let body = ctx
                .exprs
                .app(body_children)
                .expect("imitation body is non-empty");
            Substitution::for_name(fname, make_lambda(n, body, ctx.exprs), ctx.exprs)
        })
    };

    // The constant instantiation ignores its arguments entirely. In
    // direct mode it is kept only when nothing else is on offer.
    let constant = {
        let lam = make_lambda(n, lift(e, 1, 0, ctx.exprs), ctx.exprs);
        Substitution::for_name(fname, lam, ctx.exprs)
    };
    let keep_constant =
        constant_only || !ctx.direct || (projections.is_empty() && imitation.is_none());

    let mut candidates: Vec<Substitution> = Vec::new();
    if keep_constant {
        candidates.push(constant);
    }
    if !constant_only {
        candidates.extend(projections);
        candidates.extend(imitation);
    }

    let mut branches: Vec<SearchNode> = Vec::new();
    for sub in candidates {
        if !guard_passes(&sub, fname, &problem, ctx) {
            ctx.metrics.record_prune();
            continue;
        }
        let mut branch = problem.clone();
        if !branch.solution.compose(sub.clone(), ctx.exprs) {
            ctx.metrics.record_prune();
            continue;
        }
        branch.substitute(&sub, ctx.exprs);
        ctx.metrics.record_branch();
        ctx.metrics.record_beta();
        branches.push(SearchNode::Expand(branch));
    }

    #[cfg(feature = "tracing")]
    trace!(branches = branches.len(), "efa_branches");

    let mut iter = branches.into_iter().rev();
    let mut chain = match iter.next() {
        None => SearchNode::Fail,
        Some(node) => node,
    };
    for node in iter {
        chain = SearchNode::Or(Box::new(node), Box::new(chain));
    }
    chain
}

/// Capture guard: the candidate expression must be free to replace
/// every occurrence of the metavariable in every remaining pattern.
fn guard_passes(sub: &Substitution, m: SymId, problem: &Problem, ctx: &SolveCtx<'_>) -> bool {
    problem
        .constraints
        .iter()
        .all(|c| is_free_to_replace(sub.expr(), m, c.pattern(), ctx.exprs))
}

/// Lazy stream of solutions for one problem.
///
/// Drives the search tree one step per iteration; dropping the stream
/// releases all search state. `verdict` reports why the stream ended.
pub struct Solutions<'a> {
    root: SearchNode,
    exprs: &'a ExprStore,
    symbols: &'a SymbolStore,
    opts: MatchOptions,
    /// Dedup set for emitted solutions (set semantics).
    seen: HashSet<Solution>,
    steps: u64,
    emitted: usize,
    verdict: Option<Verdict>,
    metrics: SearchMetrics,
}

impl<'a> Solutions<'a> {
    /// Start a search over a constraint list.
    pub fn new(
        constraints: Vec<Constraint>,
        exprs: &'a ExprStore,
        symbols: &'a SymbolStore,
        opts: MatchOptions,
    ) -> Self {
        let problem = Problem::new(constraints, exprs);
        Self {
            root: SearchNode::Expand(problem),
            exprs,
            symbols,
            opts,
            seen: HashSet::new(),
            steps: 0,
            emitted: 0,
            verdict: None,
            metrics: SearchMetrics::new(),
        }
    }

    /// Why the stream ended; None while solutions may still come.
    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    /// Steps taken so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Snapshot of the search metrics.
    pub fn metrics(&self) -> MetricsReport {
        self.metrics.report()
    }
}

impl<'a> Iterator for Solutions<'a> {
    type Item = Solution;

    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.verdict, Some(Verdict::Exhausted)) {
            return None;
        }
        loop {
            if let Some(max) = self.opts.max_solutions {
                if self.emitted >= max {
                    self.verdict.get_or_insert(Verdict::MaxSolutions);
                    return None;
                }
            }
            if let Some(budget) = self.opts.step_budget {
                if self.steps >= budget {
                    self.verdict.get_or_insert(Verdict::OutOfBudget);
                    return None;
                }
            }
            self.steps += 1;

            let ctx = SolveCtx {
                exprs: self.exprs,
                symbols: self.symbols,
                direct: self.opts.direct,
                metrics: &self.metrics,
            };
            let current = std::mem::replace(&mut self.root, SearchNode::Fail);
            match step_node(current, &ctx) {
                NodeStep::Emit(solution, rest) => {
                    self.root = rest;
                    if self.seen.insert(solution.clone()) {
                        self.emitted += 1;
                        return Some(solution);
                    }
                }
                NodeStep::Continue(rest) => self.root = rest,
                NodeStep::Exhausted => {
                    self.verdict = Some(Verdict::Exhausted);
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/solver.rs"]
mod tests;
