use crate::expr::{ExprId, ExprStore};
use crate::symbol::SymbolStore;
use smallvec::SmallVec;

pub(crate) fn setup() -> (SymbolStore, ExprStore) {
    let symbols = SymbolStore::new();
    let exprs = ExprStore::new(&symbols);
    (symbols, exprs)
}

/// Build a named symbol expression.
pub(crate) fn s(name: &str, symbols: &SymbolStore, exprs: &ExprStore) -> ExprId {
    exprs.sym(symbols.intern(name))
}

/// Build a metavariable atom.
pub(crate) fn m(name: &str, symbols: &SymbolStore, exprs: &ExprStore) -> ExprId {
    exprs.meta(symbols.intern(name))
}

/// Build an application from a head name and children.
pub(crate) fn ap(
    head: &str,
    children: &[ExprId],
    symbols: &SymbolStore,
    exprs: &ExprStore,
) -> ExprId {
    let mut all: SmallVec<[ExprId; 4]> = SmallVec::new();
    all.push(s(head, symbols, exprs));
    all.extend_from_slice(children);
    exprs.app(all).expect("test application is non-empty")
}

/// Build a single-variable named binder `(head [var] body)`.
pub(crate) fn bind1(
    head: &str,
    var: &str,
    body: ExprId,
    symbols: &SymbolStore,
    exprs: &ExprStore,
) -> ExprId {
    let h = s(head, symbols, exprs);
    let v = s(var, symbols, exprs);
    exprs
        .bind(h, smallvec::smallvec![v], body)
        .expect("test binder is well-formed")
}
