//! Solver benchmarks using Criterion.
//!
//! Run with: `cargo bench`
//!
//! These measure the core loops: de Bruijn encoding, first-order
//! decomposition, and EFA branching with imitation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use homatch::constraint::Constraint;
use homatch::debruijn::{decode, encode};
use homatch::expr::{ExprId, ExprStore};
use homatch::solver::{MatchOptions, Solutions};
use homatch::symbol::SymbolStore;
use smallvec::smallvec;

fn setup_stores() -> (SymbolStore, ExprStore) {
    let symbols = SymbolStore::new();
    let exprs = ExprStore::new(&symbols);
    (symbols, exprs)
}

/// Build a tower of n nested binders: ∀x0. ∀x1. ... P(x0, ..., xn-1).
fn build_binder_tower(n: usize, symbols: &SymbolStore, exprs: &ExprStore) -> ExprId {
    let head = exprs.sym(symbols.intern("∀"));
    let p = exprs.sym(symbols.intern("P"));
    let names: Vec<ExprId> = (0..n)
        .map(|i| exprs.sym(symbols.intern(&format!("x{}", i))))
        .collect();

    let mut body_children = smallvec![p];
    body_children.extend(names.iter().copied());
    let mut body = exprs.app(body_children).expect("body is non-empty");
    for &var in names.iter().rev() {
        body = exprs
            .bind(head, smallvec![var], body)
            .expect("tower binder is well-formed");
    }
    body
}

/// Build a wide first-order constraint: (g(A0..An-1), g(c0..cn-1)).
fn build_wide_constraint(n: usize, symbols: &SymbolStore, exprs: &ExprStore) -> Constraint {
    let g = exprs.sym(symbols.intern("g"));
    let mut pattern_children = smallvec![g];
    let mut expr_children = smallvec![g];
    for i in 0..n {
        pattern_children.push(exprs.meta(symbols.intern(&format!("A{}", i))));
        expr_children.push(exprs.sym(symbols.intern(&format!("c{}", i))));
    }
    let pattern = exprs.app(pattern_children).expect("pattern is non-empty");
    let expression = exprs.app(expr_children).expect("expression is non-empty");
    Constraint::new(pattern, expression, exprs).expect("constraint is valid")
}

fn bench_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_decode");
    for depth in [4usize, 16, 64] {
        let (symbols, exprs) = setup_stores();
        let tower = build_binder_tower(depth, &symbols, &exprs);
        group.bench_with_input(BenchmarkId::new("round_trip", depth), &depth, |b, _| {
            b.iter(|| {
                let enc = encode(black_box(tower), &exprs);
                black_box(decode(enc, &exprs, &symbols))
            })
        });
    }
    group.finish();
}

fn bench_first_order_decomposition(c: &mut Criterion) {
    let mut group = c.benchmark_group("first_order");
    for width in [4usize, 16, 64] {
        let (symbols, exprs) = setup_stores();
        let constraint = build_wide_constraint(width, &symbols, &exprs);
        group.bench_with_input(BenchmarkId::new("solve", width), &width, |b, _| {
            b.iter(|| {
                let stream = Solutions::new(
                    vec![black_box(constraint.clone())],
                    &exprs,
                    &symbols,
                    MatchOptions::default(),
                );
                stream.count()
            })
        });
    }
    group.finish();
}

fn bench_efa_imitation(c: &mut Criterion) {
    let (symbols, exprs) = setup_stores();
    let f = exprs.meta(symbols.intern("F"));
    let y = exprs.sym(symbols.intern("y"));
    let g = exprs.sym(symbols.intern("g"));
    let e = exprs.app2(g, y, y);
    let pattern = exprs.efa(f, &[y]);
    let constraint = Constraint::new(pattern, e, &exprs).expect("constraint is valid");

    c.bench_function("efa_imitation_drain", |b| {
        b.iter(|| {
            let stream = Solutions::new(
                vec![black_box(constraint.clone())],
                &exprs,
                &symbols,
                MatchOptions::default(),
            );
            stream.count()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_decode,
    bench_first_order_decomposition,
    bench_efa_imitation
);
criterion_main!(benches);
