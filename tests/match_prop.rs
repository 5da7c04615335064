use homatch::constraint::Constraint;
use homatch::debruijn::{alpha_eq, decode, encode, min_loose_reach};
use homatch::expr::{ExprId, ExprStore};
use homatch::solver::{MatchOptions, Solutions, Verdict};
use homatch::subst::Substitution;
use homatch::symbol::SymbolStore;
use proptest::prelude::*;
use smallvec::SmallVec;

const FREE_NAMES: [&str; 5] = ["a", "b", "c", "f", "g"];
const HEAD_NAMES: [&str; 3] = ["∀", "∃", "Σ"];
const META_NAMES: [&str; 2] = ["A", "B"];

/// Name-free expression skeleton. `Bound(k)` references the k-th
/// enclosing binder (0 = innermost); out-of-range references fall back
/// to a free symbol so every skeleton is well-formed.
#[derive(Clone, Debug)]
enum RawExpr {
    Free(usize),
    Bound(usize),
    Meta(usize),
    App { head: usize, kids: Vec<RawExpr> },
    Bind { head: usize, body: Box<RawExpr> },
}

fn raw_expr_strategy(with_metas: bool) -> impl Strategy<Value = RawExpr> {
    let leaf = if with_metas {
        prop_oneof![
            (0..FREE_NAMES.len()).prop_map(RawExpr::Free),
            (0..3usize).prop_map(RawExpr::Bound),
            (0..META_NAMES.len()).prop_map(RawExpr::Meta),
        ]
        .boxed()
    } else {
        prop_oneof![
            (0..FREE_NAMES.len()).prop_map(RawExpr::Free),
            (0..3usize).prop_map(RawExpr::Bound),
        ]
        .boxed()
    };

    leaf.prop_recursive(3, 24, 3, |inner| {
        prop_oneof![
            ((0..FREE_NAMES.len()), prop::collection::vec(inner.clone(), 1..3)).prop_map(
                |(head, kids)| RawExpr::App { head, kids }
            ),
            ((0..HEAD_NAMES.len()), inner).prop_map(|(head, body)| RawExpr::Bind {
                head,
                body: Box::new(body),
            }),
        ]
    })
}

/// Metavariable-free skeletons kept small enough that EFA imitation
/// fan-out over them stays cheap to drain.
fn raw_small_ground_strategy() -> impl Strategy<Value = RawExpr> {
    let leaf = prop_oneof![
        (0..FREE_NAMES.len()).prop_map(RawExpr::Free),
        (0..3usize).prop_map(RawExpr::Bound),
    ];

    leaf.prop_recursive(2, 8, 2, |inner| {
        prop_oneof![
            ((0..FREE_NAMES.len()), prop::collection::vec(inner.clone(), 1..3)).prop_map(
                |(head, kids)| RawExpr::App { head, kids }
            ),
            ((0..HEAD_NAMES.len()), inner).prop_map(|(head, body)| RawExpr::Bind {
                head,
                body: Box::new(body),
            }),
        ]
    })
}

/// Render a skeleton against a store, naming the i-th enclosing binder
/// variable `bound_names[depth - 1 - i]`.
fn build(
    raw: &RawExpr,
    bound_names: &[&str],
    depth: usize,
    symbols: &SymbolStore,
    exprs: &ExprStore,
) -> ExprId {
    match raw {
        RawExpr::Free(i) => exprs.sym(symbols.intern(FREE_NAMES[*i])),
        RawExpr::Meta(i) => exprs.meta(symbols.intern(META_NAMES[*i])),
        RawExpr::Bound(k) => {
            if *k < depth {
                exprs.sym(symbols.intern(bound_names[depth - 1 - k]))
            } else {
                exprs.sym(symbols.intern(FREE_NAMES[0]))
            }
        }
        RawExpr::App { head, kids } => {
            let mut children: SmallVec<[ExprId; 4]> = SmallVec::new();
            children.push(exprs.sym(symbols.intern(FREE_NAMES[*head])));
            for kid in kids {
                children.push(build(kid, bound_names, depth, symbols, exprs));
            }
            exprs.app(children).expect("generated application is non-empty")
        }
        RawExpr::Bind { head, body } => {
            let h = exprs.sym(symbols.intern(HEAD_NAMES[*head]));
            let var = exprs.sym(symbols.intern(bound_names[depth]));
            let b = build(body, bound_names, depth + 1, symbols, exprs);
            exprs
                .bind(h, smallvec::smallvec![var], b)
                .expect("generated binder is well-formed")
        }
    }
}

fn setup() -> (SymbolStore, ExprStore) {
    let symbols = SymbolStore::new();
    let exprs = ExprStore::new(&symbols);
    (symbols, exprs)
}

const NAMES_X: [&str; 8] = ["x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7"];
const NAMES_Y: [&str; 8] = ["y0", "y1", "y2", "y3", "y4", "y5", "y6", "y7"];

proptest! {
    /// decode ∘ encode is the identity up to α-equivalence.
    #[test]
    fn encoding_involution(raw in raw_expr_strategy(false)) {
        let (symbols, exprs) = setup();
        let e = build(&raw, &NAMES_X, 0, &symbols, &exprs);
        let round = decode(encode(e, &exprs), &exprs, &symbols);
        prop_assert!(alpha_eq(round, e, &exprs));
    }

    /// encode is idempotent: encoded trees pass through unchanged.
    #[test]
    fn encoding_is_idempotent(raw in raw_expr_strategy(false)) {
        let (symbols, exprs) = setup();
        let e = build(&raw, &NAMES_X, 0, &symbols, &exprs);
        let once = encode(e, &exprs);
        prop_assert_eq!(encode(once, &exprs), once);
    }

    /// Consistently renaming bound variables never changes the encoded
    /// structure, and the encoded forms are α-equal.
    #[test]
    fn alpha_equivalence_soundness(raw in raw_expr_strategy(false)) {
        let (symbols, exprs) = setup();
        let with_x = build(&raw, &NAMES_X, 0, &symbols, &exprs);
        let with_y = build(&raw, &NAMES_Y, 0, &symbols, &exprs);
        prop_assert!(alpha_eq(with_x, with_y, &exprs));
        prop_assert!(alpha_eq(encode(with_x, &exprs), encode(with_y, &exprs), &exprs));
    }

    /// Applying the same substitution twice equals applying it once.
    #[test]
    fn substitution_is_idempotent(
        target_raw in raw_expr_strategy(true),
        value_raw in raw_expr_strategy(false),
    ) {
        let (symbols, exprs) = setup();
        let target = encode(build(&target_raw, &NAMES_X, 0, &symbols, &exprs), &exprs);
        let value = encode(build(&value_raw, &NAMES_Y, 0, &symbols, &exprs), &exprs);
        let a = exprs.meta(symbols.intern(META_NAMES[0]));
        let sub = Substitution::new(a, value, &exprs).expect("A is a metavariable");

        let once = sub.applied_to(target, &exprs);
        let twice = sub.applied_to(once, &exprs);
        prop_assert_eq!(once, twice);
    }

    /// A pattern built by punching metavariable holes into an
    /// expression is always matched back onto it, and every produced
    /// solution reproduces the expression from the pattern.
    #[test]
    fn solutions_preserve_constraints(pattern_raw in raw_expr_strategy(true)) {
        let (symbols, exprs) = setup();
        let pattern = build(&pattern_raw, &NAMES_X, 0, &symbols, &exprs);

        // Ground the metavariable holes with fixed closed expressions.
        let ground_a = {
            let f = exprs.sym(symbols.intern("f"));
            let c = exprs.sym(symbols.intern("c"));
            exprs.app1(f, c)
        };
        let ground_b = exprs.sym(symbols.intern("b"));
        let sub_a = Substitution::new(exprs.meta(symbols.intern("A")), ground_a, &exprs).unwrap();
        let sub_b = Substitution::new(exprs.meta(symbols.intern("B")), ground_b, &exprs).unwrap();
        let expression = sub_b.applied_to(sub_a.applied_to(pattern, &exprs), &exprs);

        let c = Constraint::new(pattern, expression, &exprs).expect("expression side is ground");
        let encoded_pattern = c.pattern();
        let encoded_expression = c.expression();

        let opts = MatchOptions {
            max_solutions: Some(8),
            step_budget: Some(20_000),
            ..MatchOptions::default()
        };
        let stream = Solutions::new(vec![c], &exprs, &symbols, opts);
        let solutions: Vec<_> = stream.collect();
        prop_assert!(!solutions.is_empty(), "grounded pattern must match");
        for sol in &solutions {
            let instantiated = sol.apply(encoded_pattern, &exprs);
            prop_assert!(alpha_eq(instantiated, encoded_expression, &exprs));
        }
    }

    /// Equal inputs produce equal solution streams in equal order.
    #[test]
    fn solving_is_deterministic(pattern_raw in raw_expr_strategy(true)) {
        let (symbols, exprs) = setup();
        let pattern = build(&pattern_raw, &NAMES_X, 0, &symbols, &exprs);
        let ground = exprs.sym(symbols.intern("b"));
        let sub_a = Substitution::new(exprs.meta(symbols.intern("A")), ground, &exprs).unwrap();
        let sub_b = Substitution::new(exprs.meta(symbols.intern("B")), ground, &exprs).unwrap();
        let expression = sub_b.applied_to(sub_a.applied_to(pattern, &exprs), &exprs);

        let opts = MatchOptions {
            max_solutions: Some(8),
            step_budget: Some(20_000),
            ..MatchOptions::default()
        };
        let run = || -> Vec<_> {
            let c = Constraint::new(pattern, expression, &exprs).unwrap();
            Solutions::new(vec![c], &exprs, &symbols, opts).collect()
        };
        prop_assert_eq!(run(), run());
    }

    /// Capture freedom: metavariable holes grounded with closed
    /// expressions never pick up a reference to a pattern-bound
    /// variable, wherever the holes sit in the pattern.
    #[test]
    fn produced_assignments_are_marker_closed(pattern_raw in raw_expr_strategy(true)) {
        let (symbols, exprs) = setup();
        let pattern = build(&pattern_raw, &NAMES_X, 0, &symbols, &exprs);

        let ground_a = {
            let f = exprs.sym(symbols.intern("f"));
            let c = exprs.sym(symbols.intern("c"));
            exprs.app1(f, c)
        };
        let ground_b = exprs.sym(symbols.intern("b"));
        let sub_a = Substitution::new(exprs.meta(symbols.intern("A")), ground_a, &exprs).unwrap();
        let sub_b = Substitution::new(exprs.meta(symbols.intern("B")), ground_b, &exprs).unwrap();
        let expression = sub_b.applied_to(sub_a.applied_to(pattern, &exprs), &exprs);

        let c = Constraint::new(pattern, expression, &exprs).expect("expression side is ground");
        let opts = MatchOptions {
            max_solutions: Some(8),
            step_budget: Some(20_000),
            ..MatchOptions::default()
        };
        let solutions: Vec<_> = Solutions::new(vec![c], &exprs, &symbols, opts).collect();
        prop_assert!(!solutions.is_empty(), "grounded pattern must match");
        for sol in &solutions {
            for entry in sol.iter() {
                prop_assert_eq!(
                    min_loose_reach(entry.expr(), &exprs),
                    None,
                    "an assignment must not reference a pattern-bound variable"
                );
            }
        }
    }

    /// Capture freedom, adversarial shape: a constraint forcing a
    /// metavariable to a bound-variable reference can never combine
    /// with an occurrence of that metavariable under binders, at any
    /// nesting depth. An unguarded solver would report a bogus match
    /// here (the reference lines up with the innermost bound variable).
    #[test]
    fn capture_guard_blocks_binder_crossing(
        depth in 1usize..4,
        head in 0..HEAD_NAMES.len(),
        flip in any::<bool>(),
    ) {
        let (symbols, exprs) = setup();
        let a = exprs.meta(symbols.intern("A"));
        let q = exprs.sym(symbols.intern("Q"));
        let inner = exprs.sym(symbols.intern(NAMES_X[depth - 1]));
        let mut pattern = exprs.app1(q, a);
        let mut expression = exprs.app1(q, inner);
        let h = exprs.sym(symbols.intern(HEAD_NAMES[head]));
        for level in (0..depth).rev() {
            let var = exprs.sym(symbols.intern(NAMES_X[level]));
            pattern = exprs
                .bind(h, smallvec::smallvec![var], pattern)
                .expect("nested binder is well-formed");
            expression = exprs
                .bind(h, smallvec::smallvec![var], expression)
                .expect("nested binder is well-formed");
        }

        let loose = Constraint::new(a, exprs.marker(0, 0, None), &exprs).unwrap();
        let under = Constraint::new(pattern, expression, &exprs).unwrap();
        let constraints = if flip {
            vec![under, loose]
        } else {
            vec![loose, under]
        };

        let mut stream = Solutions::new(constraints, &exprs, &symbols, MatchOptions::default());
        prop_assert_eq!(stream.by_ref().count(), 0, "a capturing assignment must never match");
        prop_assert_eq!(stream.verdict(), Some(Verdict::Exhausted));
    }

    /// Termination: an EFA pattern against an arbitrary closed
    /// expression always exhausts its stream; the budget below is far
    /// above what these inputs need, so hitting it would mean the
    /// search failed to converge.
    #[test]
    fn efa_search_terminates(
        args_raw in prop::collection::vec(raw_expr_strategy(true), 1..3),
        ground_raw in raw_small_ground_strategy(),
        wrap in any::<bool>(),
    ) {
        let (symbols, exprs) = setup();
        let base_depth = if wrap { 1 } else { 0 };
        let f = exprs.meta(symbols.intern("F"));
        let args: Vec<ExprId> = args_raw
            .iter()
            .map(|raw| build(raw, &NAMES_X, base_depth, &symbols, &exprs))
            .collect();
        let mut pattern = exprs.efa(f, &args);
        let mut expression = build(&ground_raw, &NAMES_X, base_depth, &symbols, &exprs);
        if wrap {
            let head = exprs.sym(symbols.intern(HEAD_NAMES[0]));
            let var = exprs.sym(symbols.intern(NAMES_X[0]));
            pattern = exprs
                .bind(head, smallvec::smallvec![var], pattern)
                .expect("wrapper binder is well-formed");
            expression = exprs
                .bind(head, smallvec::smallvec![var], expression)
                .expect("wrapper binder is well-formed");
        }
        let c = Constraint::new(pattern, expression, &exprs).expect("expression side is ground");

        let opts = MatchOptions {
            step_budget: Some(500_000),
            ..MatchOptions::default()
        };
        let mut stream = Solutions::new(vec![c], &exprs, &symbols, opts);
        let solutions = stream.by_ref().count();
        prop_assert_eq!(
            stream.verdict(),
            Some(Verdict::Exhausted),
            "the stream must be finite ({} solutions drained)",
            solutions
        );
    }
}
