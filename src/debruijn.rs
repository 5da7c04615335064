//! De Bruijn encoding of binders.
//!
//! Encoding replaces every named binder with an application of the
//! reserved `λ` head and every bound occurrence with an index marker,
//! so that α-equivalence becomes structural equality (modulo the name
//! hints the markers carry for decoding).
//!
//! Encoded binder shape: `(λ head m1 ... mn body)` where `head` is the
//! original binder head, `mj = Marker { up: 0, pos: j }` records arity
//! and the original name, and in `body` the j-th bound variable under
//! `d` intervening binders becomes `Marker { up: d, pos: j }`.
//!
//! The marker slots and the body count as being inside the binder
//! (their `up = 0` level is the binder itself); the head does not.

use crate::expr::{Expr, ExprId, ExprStore};
use crate::symbol::{SymId, SymbolStore};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

/// Encode an expression: replace named binders with `λ`-applications
/// and bound occurrences with markers. Already-encoded subtrees pass
/// through unchanged, so `encode` is idempotent.
pub fn encode(e: ExprId, exprs: &ExprStore) -> ExprId {
    fn go(e: ExprId, frames: &mut Vec<Vec<SymId>>, exprs: &ExprStore) -> ExprId {
        match exprs.resolve(e) {
            Some(Expr::Sym(name)) => {
                // Innermost frame first: shadowing resolves inward.
                for (up, frame) in frames.iter().rev().enumerate() {
                    if let Some(pos) = frame.iter().position(|&v| v == name) {
                        return exprs.marker(up as u32, pos as u32, Some(name));
                    }
                }
                e
            }
            Some(Expr::App(children)) => {
                let encoded: SmallVec<[ExprId; 4]> =
                    children.iter().map(|&c| go(c, frames, exprs)).collect();
                if encoded == children {
                    e
                } else {
                    exprs
                        .app(encoded)
                        .expect("non-empty application stays non-empty")
                }
            }
            Some(Expr::Bind { head, vars, body }) => {
                let names: Vec<SymId> = vars
                    .iter()
                    .filter_map(|&v| exprs.is_sym(v))
                    .collect();
                let head_enc = go(head, frames, exprs);
                frames.push(names.clone());
                let body_enc = go(body, frames, exprs);
                frames.pop();

                let mut children: SmallVec<[ExprId; 4]> = SmallVec::new();
                children.push(exprs.sym(exprs.lam_head()));
                children.push(head_enc);
                for (j, &name) in names.iter().enumerate() {
                    children.push(exprs.marker(0, j as u32, Some(name)));
                }
                children.push(body_enc);
                exprs
                    .app(children)
                    .expect("encoded binder is non-empty")
            }
            // Metavariables and markers pass through.
            _ => e,
        }
    }

    let mut frames = Vec::new();
    go(e, &mut frames, exprs)
}

/// Decode an encoded expression back to named-binder form.
///
/// Marker name hints are reused where they would not capture a symbol
/// free in the body; otherwise a fresh name is drawn from the symbol
/// store. Loose markers (pointing past the root) decode to themselves.
pub fn decode(e: ExprId, exprs: &ExprStore, symbols: &SymbolStore) -> ExprId {
    fn free_syms(e: ExprId, exprs: &ExprStore, out: &mut FxHashSet<SymId>) {
        let mut stack: SmallVec<[ExprId; 16]> = smallvec::smallvec![e];
        while let Some(x) = stack.pop() {
            match exprs.resolve(x) {
                Some(Expr::Sym(name)) => {
                    out.insert(name);
                }
                Some(Expr::App(children)) => stack.extend(children.iter().copied()),
                Some(Expr::Bind { head, vars, body }) => {
                    stack.push(head);
                    stack.extend(vars.iter().copied());
                    stack.push(body);
                }
                _ => {}
            }
        }
    }

    fn go(
        e: ExprId,
        env: &mut Vec<Vec<SymId>>,
        exprs: &ExprStore,
        symbols: &SymbolStore,
    ) -> ExprId {
        if let Some((head, arity, _body)) = exprs.is_encoded_binder(e) {
            let children = exprs.as_app(e).expect("encoded binder is an application");
            let body = children[children.len() - 1];

            // Pick one name per slot: the recorded hint unless it would
            // capture a symbol free in the body or repeat a sibling.
            let mut avoid = FxHashSet::default();
            free_syms(body, exprs, &mut avoid);
            let mut names: Vec<SymId> = Vec::with_capacity(arity as usize);
            for slot in &children[2..children.len() - 1] {
                let hint = match exprs.resolve(*slot) {
                    Some(Expr::Marker { hint, .. }) => hint,
                    _ => None,
                };
                let name = match hint {
                    Some(h) if !avoid.contains(&h) && !names.contains(&h) => h,
                    _ => symbols.fresh_name(),
                };
                names.push(name);
            }

            let head_dec = go(head, env, exprs, symbols);
            env.push(names.clone());
            let body_dec = go(body, env, exprs, symbols);
            env.pop();

            let vars: SmallVec<[ExprId; 2]> = names.iter().map(|&n| exprs.sym(n)).collect();
            return exprs
                .bind(head_dec, vars, body_dec)
                .expect("decoded binder is well-formed");
        }

        match exprs.resolve(e) {
            Some(Expr::Marker { up, pos, .. }) => {
                let depth = env.len() as u32;
                if up < depth {
                    let frame = &env[env.len() - 1 - up as usize];
                    match frame.get(pos as usize) {
                        Some(&name) => exprs.sym(name),
                        None => e, // malformed position: keep the marker
                    }
                } else {
                    e // loose marker in an open expression
                }
            }
            Some(Expr::App(children)) => {
                let decoded: SmallVec<[ExprId; 4]> = children
                    .iter()
                    .map(|&c| go(c, env, exprs, symbols))
                    .collect();
                if decoded == children {
                    e
                } else {
                    exprs
                        .app(decoded)
                        .expect("non-empty application stays non-empty")
                }
            }
            _ => e,
        }
    }

    let mut env = Vec::new();
    go(e, &mut env, exprs, symbols)
}

/// Structural equality on encoded forms, ignoring marker name hints.
/// Named binders are encoded on the fly, so this decides α-equivalence.
/// Hashconsed id equality is the fast path.
pub fn alpha_eq(a: ExprId, b: ExprId, exprs: &ExprStore) -> bool {
    if a == b {
        return true;
    }
    match (exprs.resolve(a), exprs.resolve(b)) {
        (Some(Expr::Sym(x)), Some(Expr::Sym(y))) => x == y,
        (Some(Expr::Meta(x)), Some(Expr::Meta(y))) => x == y,
        (
            Some(Expr::Marker { up: ua, pos: pa, .. }),
            Some(Expr::Marker { up: ub, pos: pb, .. }),
        ) => ua == ub && pa == pb,
        (Some(Expr::App(xs)), Some(Expr::App(ys))) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(&x, &y)| alpha_eq(x, y, exprs))
        }
        (Some(Expr::Bind { .. }), _) => alpha_eq(encode(a, exprs), b, exprs),
        (_, Some(Expr::Bind { .. })) => alpha_eq(a, encode(b, exprs), exprs),
        _ => false,
    }
}

/// Lift an encoded expression by `by` levels: every marker reaching
/// past `cutoff` enclosing binders has its `up` increased. Used when
/// moving an expression underneath `by` new binders.
pub fn lift(e: ExprId, by: u32, cutoff: u32, exprs: &ExprStore) -> ExprId {
    if by == 0 {
        return e;
    }
    match exprs.resolve(e) {
        Some(Expr::Marker { up, pos, hint }) => {
            if up >= cutoff {
                exprs.marker(up + by, pos, hint)
            } else {
                e
            }
        }
        Some(Expr::App(children)) => {
            let binder = exprs.is_encoded_binder(e).is_some();
            let lifted: SmallVec<[ExprId; 4]> = children
                .iter()
                .enumerate()
                .map(|(i, &c)| {
                    // Marker slots and body sit inside the binder.
                    let inner = binder && i >= 2;
                    lift(c, by, if inner { cutoff + 1 } else { cutoff }, exprs)
                })
                .collect();
            if lifted == children {
                e
            } else {
                exprs
                    .app(lifted)
                    .expect("non-empty application stays non-empty")
            }
        }
        _ => e,
    }
}

/// The smallest outward reach of any loose marker in `e`, or None when
/// every marker is bound inside `e`. A loose marker at binder depth
/// `d` with index `up >= d` reaches `up - d` levels past the root.
pub fn min_loose_reach(e: ExprId, exprs: &ExprStore) -> Option<u32> {
    fn go(e: ExprId, depth: u32, exprs: &ExprStore, best: &mut Option<u32>) {
        match exprs.resolve(e) {
            Some(Expr::Marker { up, .. }) => {
                if up >= depth {
                    let reach = up - depth;
                    if best.map_or(true, |b| reach < b) {
                        *best = Some(reach);
                    }
                }
            }
            Some(Expr::App(children)) => {
                let binder = exprs.is_encoded_binder(e).is_some();
                for (i, &c) in children.iter().enumerate() {
                    let inner = binder && i >= 2;
                    go(c, if inner { depth + 1 } else { depth }, exprs, best);
                }
            }
            _ => {}
        }
    }

    let mut best = None;
    go(e, 0, exprs, &mut best);
    best
}

/// Count the positions in `e` whose subtree structurally matches `sub`
/// shifted to that position's binder depth. This is the occurrence
/// count used by the EFA complexity estimate and pruning predicates.
pub fn occurrences(sub: ExprId, e: ExprId, exprs: &ExprStore) -> u32 {
    fn go(sub: ExprId, e: ExprId, depth: u32, lifts: &mut Vec<Option<ExprId>>, exprs: &ExprStore) -> u32 {
        let idx = depth as usize;
        if lifts.len() <= idx {
            lifts.resize(idx + 1, None);
        }
        let shifted = *lifts[idx].get_or_insert_with(|| lift(sub, depth, 0, exprs));

        let mut count = if alpha_eq(e, shifted, exprs) { 1 } else { 0 };
        if let Some(Expr::App(children)) = exprs.resolve(e) {
            let binder = exprs.is_encoded_binder(e).is_some();
            for (i, &c) in children.iter().enumerate() {
                let inner = binder && i >= 2;
                count += go(sub, c, if inner { depth + 1 } else { depth }, lifts, exprs);
            }
        }
        count
    }

    let mut lifts = vec![Some(sub)];
    go(sub, e, 0, &mut lifts, exprs)
}

/// Build the encoded λ-abstraction `λx1...xn. body` with anonymous
/// marker slots. The caller must have lifted `body` past the new
/// binder already (see `lift`).
pub fn make_lambda(arity: u32, body: ExprId, exprs: &ExprStore) -> ExprId {
    let lam = exprs.sym(exprs.lam_head());
    let mut children: SmallVec<[ExprId; 4]> = SmallVec::new();
    children.push(lam);
    children.push(lam);
    for j in 0..arity {
        children.push(exprs.marker(0, j, None));
    }
    children.push(body);
    exprs.app(children).expect("lambda is non-empty")
}

/// Contract a single β-redex `@(λx1...xn. body, a1, ..., an)`:
/// markers pointing at the eliminated binder are replaced by the
/// corresponding argument (lifted to the local depth) and markers
/// pointing past it are unlifted. Returns None when `e` is not a
/// redex of matching arity.
pub fn beta_contract(e: ExprId, exprs: &ExprStore) -> Option<ExprId> {
    let children = exprs.as_app(e)?;
    if children.len() < 2 || exprs.is_sym(children[0]) != Some(exprs.efa_head()) {
        return None;
    }
    let (arity, body) = exprs.is_lambda(children[1])?;
    let args = &children[2..];
    if args.len() != arity as usize {
        return None;
    }

    fn subst(
        e: ExprId,
        depth: u32,
        args: &[ExprId],
        exprs: &ExprStore,
    ) -> ExprId {
        match exprs.resolve(e) {
            Some(Expr::Marker { up, pos, hint }) => {
                use std::cmp::Ordering::*;
                match up.cmp(&depth) {
                    Equal => match args.get(pos as usize) {
                        Some(&arg) => lift(arg, depth, 0, exprs),
                        None => e, // malformed position: keep the marker
                    },
                    Greater => exprs.marker(up - 1, pos, hint),
                    Less => e,
                }
            }
            Some(Expr::App(children)) => {
                let binder = exprs.is_encoded_binder(e).is_some();
                let rebuilt: SmallVec<[ExprId; 4]> = children
                    .iter()
                    .enumerate()
                    .map(|(i, &c)| {
                        let inner = binder && i >= 2;
                        subst(c, if inner { depth + 1 } else { depth }, args, exprs)
                    })
                    .collect();
                if rebuilt == children {
                    e
                } else {
                    exprs
                        .app(rebuilt)
                        .expect("non-empty application stays non-empty")
                }
            }
            _ => e,
        }
    }

    Some(subst(body, 0, args, exprs))
}

/// β-reduce every redex introduced by EFA instantiation, bottom-up.
/// No other normalisation is performed.
pub fn beta_reduce(e: ExprId, exprs: &ExprStore) -> ExprId {
    match exprs.resolve(e) {
        Some(Expr::App(children)) => {
            let reduced: SmallVec<[ExprId; 4]> = children
                .iter()
                .map(|&c| beta_reduce(c, exprs))
                .collect();
            let rebuilt = if reduced == children {
                e
            } else {
                exprs
                    .app(reduced)
                    .expect("non-empty application stays non-empty")
            };
            match beta_contract(rebuilt, exprs) {
                // Contraction can expose a new redex when an argument
                // lands in function position.
                Some(contracted) => beta_reduce(contracted, exprs),
                None => rebuilt,
            }
        }
        Some(Expr::Bind { head, vars, body }) => {
            let body_r = beta_reduce(body, exprs);
            if body_r == body {
                e
            } else {
                exprs
                    .bind(head, vars, body_r)
                    .expect("binder stays well-formed")
            }
        }
        _ => e,
    }
}

/// Capture guard: may `replacement` stand in for every occurrence of
/// the metavariable `m` inside `pattern`?
///
/// An occurrence at binder depth `b` accepts the replacement only when
/// every loose marker of the replacement reaches at least `b` levels
/// outward; a shorter reach would be captured by a pattern binder.
pub fn is_free_to_replace(
    replacement: ExprId,
    m: SymId,
    pattern: ExprId,
    exprs: &ExprStore,
) -> bool {
    let reach = match min_loose_reach(replacement, exprs) {
        None => return true, // marker-closed: nothing to capture
        Some(r) => r,
    };

    fn go(m: SymId, e: ExprId, depth: u32, reach: u32, exprs: &ExprStore) -> bool {
        match exprs.resolve(e) {
            Some(Expr::Meta(name)) if name == m => reach >= depth,
            Some(Expr::App(children)) => {
                let binder = exprs.is_encoded_binder(e).is_some();
                children.iter().enumerate().all(|(i, &c)| {
                    let inner = binder && i >= 2;
                    go(m, c, if inner { depth + 1 } else { depth }, reach, exprs)
                })
            }
            Some(Expr::Bind { head, vars, body }) => {
                go(m, head, depth, reach, exprs)
                    && vars.iter().all(|&v| go(m, v, depth, reach, exprs))
                    && go(m, body, depth + 1, reach, exprs)
            }
            _ => true,
        }
    }

    go(m, pattern, 0, reach, exprs)
}

#[cfg(test)]
#[path = "tests/debruijn.rs"]
mod tests;
