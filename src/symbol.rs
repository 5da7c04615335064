use lasso::{Spur, ThreadedRodeo};
use std::sync::atomic::{AtomicU32, Ordering};

/// A unique identifier for a symbol or metavariable name.
/// This is an interned string ID for fast equality comparison.
pub type SymId = Spur;

/// Name of the reserved EFA head: `@(F, a1, ..., an)` applies the
/// metavariable `F` to arguments.
pub const EFA_HEAD: &str = "@";

/// Name of the reserved encoded-binder head. After de Bruijn encoding
/// every binder is an application of this head.
pub const LAM_HEAD: &str = "λ";

/// Thread-safe symbol store for interning names.
///
/// Guarantees:
/// - Same string always produces same SymId
/// - Different strings always produce different SymIds
/// - SymId can be resolved back to the original string
///
/// The two reserved heads (`@` and `λ`) are interned at construction
/// and available without a lookup. Fresh names drawn from `fresh_meta`
/// and `fresh_name` live in a `#`-prefixed namespace that callers are
/// expected to keep out of user-facing symbols.
pub struct SymbolStore {
    rodeo: ThreadedRodeo,
    efa_head: SymId,
    lam_head: SymId,
    next_fresh: AtomicU32,
}

impl SymbolStore {
    /// Create a new store with the reserved heads interned.
    pub fn new() -> Self {
        let rodeo = ThreadedRodeo::new();
        let efa_head = rodeo.get_or_intern(EFA_HEAD);
        let lam_head = rodeo.get_or_intern(LAM_HEAD);
        Self {
            rodeo,
            efa_head,
            lam_head,
            next_fresh: AtomicU32::new(0),
        }
    }

    /// Intern a name, returning its unique SymId.
    pub fn intern(&self, name: &str) -> SymId {
        self.rodeo.get_or_intern(name)
    }

    /// Resolve a SymId back to its string representation.
    /// Returns None if the SymId was not created by this store.
    pub fn resolve(&self, id: SymId) -> Option<&str> {
        self.rodeo.try_resolve(&id)
    }

    /// Get the SymId for a name if it exists, without interning.
    pub fn get(&self, name: &str) -> Option<SymId> {
        self.rodeo.get(name)
    }

    /// The reserved EFA head `@`.
    pub fn efa_head(&self) -> SymId {
        self.efa_head
    }

    /// The reserved encoded-binder head `λ`.
    pub fn lam_head(&self) -> SymId {
        self.lam_head
    }

    /// Intern a globally fresh metavariable name (`#H0`, `#H1`, ...).
    /// Used for the helper metavariables introduced by EFA imitation.
    pub fn fresh_meta(&self) -> SymId {
        let n = self.next_fresh.fetch_add(1, Ordering::Relaxed);
        self.rodeo.get_or_intern(format!("#H{}", n))
    }

    /// Intern a globally fresh bound-variable name (`#v0`, `#v1`, ...).
    /// Used by `decode` when a marker carries no name hint.
    pub fn fresh_name(&self) -> SymId {
        let n = self.next_fresh.fetch_add(1, Ordering::Relaxed);
        self.rodeo.get_or_intern(format!("#v{}", n))
    }
}

impl Default for SymbolStore {
    fn default() -> Self {
        Self::new()
    }
}
