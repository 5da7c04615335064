use crate::error::MatchError;
use crate::symbol::{SymId, SymbolStore};
use hashbrown::HashMap;
use parking_lot::RwLock;
use rustc_hash::{FxHashSet, FxHasher};
use smallvec::SmallVec;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};

/// Unique identifier for an expression in the store.
/// ExprIds are stable and can be compared for equality; because the
/// store hashconses, id equality implies structural equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u32);

impl ExprId {
    /// Get the raw u32 value (for debugging/display).
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// An expression node.
///
/// `Bind` is the named pre-encoding form; after de Bruijn encoding a
/// binder is an `App` whose first child is the reserved `λ` head (see
/// the `debruijn` module). The marker `hint` is the original bound
/// name, preserved for decoding only; `alpha_eq` ignores it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// A plain symbol.
    Sym(SymId),
    /// A metavariable atom. The flag is part of structural identity.
    Meta(SymId),
    /// De Bruijn marker: position `pos` of the binder `up` levels out.
    Marker {
        up: u32,
        pos: u32,
        hint: Option<SymId>,
    },
    /// Ordered, non-empty application.
    App(SmallVec<[ExprId; 4]>),
    /// Named binder: head symbol, bound symbols, body.
    Bind {
        head: ExprId,
        vars: SmallVec<[ExprId; 2]>,
        body: ExprId,
    },
}

/// Number of shards for hashcons maps (power of 2 for fast modulo).
const NUM_SHARDS: usize = 16;

/// Thread-safe expression store with hashconsing.
///
/// Guarantees:
/// - Structurally equal expressions get the same ExprId
/// - ExprId can be resolved back to the expression
/// - All expressions (including symbols and markers) are hashconsed
///
/// The reserved head ids are captured from the symbol store at
/// construction so shape queries need no string lookups.
pub struct ExprStore {
    /// Central storage of all expressions, indexed by ExprId.
    nodes: RwLock<Vec<Expr>>,
    /// Sharded hashcons maps for reducing contention.
    shards: [RwLock<HashMap<Expr, ExprId>>; NUM_SHARDS],
    /// Counter for generating unique ExprIds.
    next_id: AtomicU32,
    /// Reserved EFA head symbol (`@`).
    efa_head: SymId,
    /// Reserved encoded-binder head symbol (`λ`).
    lam_head: SymId,
}

impl ExprStore {
    /// Create a new empty store bound to a symbol store's reserved heads.
    pub fn new(symbols: &SymbolStore) -> Self {
        let shards = std::array::from_fn(|_| RwLock::new(HashMap::new()));
        Self {
            nodes: RwLock::new(Vec::new()),
            shards,
            next_id: AtomicU32::new(0),
            efa_head: symbols.efa_head(),
            lam_head: symbols.lam_head(),
        }
    }

    /// Intern an expression, returning its ExprId.
    /// If the expression already exists, returns the existing ExprId.
    fn intern(&self, expr: Expr) -> ExprId {
        let shard_idx = Self::shard_index(&expr);
        let shard = &self.shards[shard_idx];

        // Fast path: check if the node exists (read lock)
        {
            let map = shard.read();
            if let Some(&id) = map.get(&expr) {
                return id;
            }
        }

        // Slow path: need to insert (write lock)
        let mut map = shard.write();

        // Double-check after acquiring write lock
        if let Some(&id) = map.get(&expr) {
            return id;
        }

        let id = ExprId(self.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut nodes = self.nodes.write();
            let idx = id.0 as usize;
            if nodes.len() <= idx {
                nodes.resize(
                    idx + 1,
                    Expr::Marker {
                        up: 0,
                        pos: 0,
                        hint: None,
                    }, // placeholder
                );
            }
            nodes[idx] = expr.clone();
        }
        map.insert(expr, id);
        id
    }

    /// Create a plain symbol expression.
    pub fn sym(&self, name: SymId) -> ExprId {
        self.intern(Expr::Sym(name))
    }

    /// Create a metavariable atom.
    pub fn meta(&self, name: SymId) -> ExprId {
        self.intern(Expr::Meta(name))
    }

    /// Create a de Bruijn marker.
    pub fn marker(&self, up: u32, pos: u32, hint: Option<SymId>) -> ExprId {
        self.intern(Expr::Marker { up, pos, hint })
    }

    /// Create an application. Applications must be non-empty.
    pub fn app(&self, children: SmallVec<[ExprId; 4]>) -> Result<ExprId, MatchError> {
        if children.is_empty() {
            return Err(MatchError::MalformedExpression(
                "application with no children".into(),
            ));
        }
        Ok(self.intern(Expr::App(children)))
    }

    /// Create a unary application.
    pub fn app1(&self, head: ExprId, child: ExprId) -> ExprId {
        self.intern(Expr::App(smallvec::smallvec![head, child]))
    }

    /// Create a binary application.
    pub fn app2(&self, head: ExprId, left: ExprId, right: ExprId) -> ExprId {
        self.intern(Expr::App(smallvec::smallvec![head, left, right]))
    }

    /// Create an EFA: `@(f, a1, ..., an)` with `f` a metavariable atom.
    pub fn efa(&self, f: ExprId, args: &[ExprId]) -> ExprId {
        let mut children: SmallVec<[ExprId; 4]> = SmallVec::new();
        children.push(self.sym(self.efa_head));
        children.push(f);
        children.extend_from_slice(args);
        self.intern(Expr::App(children))
    }

    /// Create a named binder. Binders must bind at least one variable,
    /// the head must be a symbol and every bound variable a symbol.
    pub fn bind(
        &self,
        head: ExprId,
        vars: SmallVec<[ExprId; 2]>,
        body: ExprId,
    ) -> Result<ExprId, MatchError> {
        if vars.is_empty() {
            return Err(MatchError::MalformedExpression(
                "binder with no bound variables".into(),
            ));
        }
        if self.is_sym(head).is_none() {
            return Err(MatchError::MalformedExpression(
                "binder head must be a symbol".into(),
            ));
        }
        for v in vars.iter() {
            if self.is_sym(*v).is_none() && self.is_meta(*v).is_none() {
                return Err(MatchError::MalformedExpression(
                    "bound variables must be symbols".into(),
                ));
            }
        }
        Ok(self.intern(Expr::Bind { head, vars, body }))
    }

    /// Resolve an ExprId to its expression.
    /// Returns None if the ExprId is invalid.
    pub fn resolve(&self, id: ExprId) -> Option<Expr> {
        let nodes = self.nodes.read();
        nodes.get(id.0 as usize).cloned()
    }

    /// The reserved EFA head symbol.
    pub fn efa_head(&self) -> SymId {
        self.efa_head
    }

    /// The reserved encoded-binder head symbol.
    pub fn lam_head(&self) -> SymId {
        self.lam_head
    }

    /// Check if an expression is a plain symbol, returning its name.
    pub fn is_sym(&self, id: ExprId) -> Option<SymId> {
        match self.resolve(id)? {
            Expr::Sym(name) => Some(name),
            _ => None,
        }
    }

    /// Check if an expression is a metavariable atom, returning its name.
    pub fn is_meta(&self, id: ExprId) -> Option<SymId> {
        match self.resolve(id)? {
            Expr::Meta(name) => Some(name),
            _ => None,
        }
    }

    /// Check if an expression is a de Bruijn marker, returning (up, pos).
    pub fn is_marker(&self, id: ExprId) -> Option<(u32, u32)> {
        match self.resolve(id)? {
            Expr::Marker { up, pos, .. } => Some((up, pos)),
            _ => None,
        }
    }

    /// Check if an expression is an application, returning its children.
    pub fn as_app(&self, id: ExprId) -> Option<SmallVec<[ExprId; 4]>> {
        match self.resolve(id)? {
            Expr::App(children) => Some(children),
            _ => None,
        }
    }

    /// Check if an expression is a named binder.
    pub fn as_bind(&self, id: ExprId) -> Option<(ExprId, SmallVec<[ExprId; 2]>, ExprId)> {
        match self.resolve(id)? {
            Expr::Bind { head, vars, body } => Some((head, vars, body)),
            _ => None,
        }
    }

    /// Check if an expression is an EFA `@(F, a1, ..., an)` with at
    /// least one argument. Returns the metavariable name and the
    /// argument list.
    pub fn is_efa(&self, id: ExprId) -> Option<(SymId, SmallVec<[ExprId; 4]>)> {
        let children = self.as_app(id)?;
        if children.len() < 3 {
            return None;
        }
        if self.is_sym(children[0]) != Some(self.efa_head) {
            return None;
        }
        let f = self.is_meta(children[1])?;
        Some((f, children[2..].iter().copied().collect()))
    }

    /// Check if an expression is an encoded binder
    /// `(λ head m1 ... mn body)`. Returns (head, arity, body).
    pub fn is_encoded_binder(&self, id: ExprId) -> Option<(ExprId, u32, ExprId)> {
        let children = self.as_app(id)?;
        if children.len() < 4 {
            return None;
        }
        if self.is_sym(children[0]) != Some(self.lam_head) {
            return None;
        }
        let arity = (children.len() - 3) as u32;
        Some((children[1], arity, children[children.len() - 1]))
    }

    /// Check if an expression is an encoded λ-abstraction (an encoded
    /// binder whose head is the reserved `λ` symbol), as produced for
    /// EFA instantiations. Returns (arity, body).
    pub fn is_lambda(&self, id: ExprId) -> Option<(u32, ExprId)> {
        let (head, arity, body) = self.is_encoded_binder(id)?;
        if self.is_sym(head) == Some(self.lam_head) {
            Some((arity, body))
        } else {
            None
        }
    }

    /// Does the expression contain any metavariable atom?
    pub fn contains_metavariable(&self, id: ExprId) -> bool {
        let mut stack: SmallVec<[ExprId; 16]> = smallvec::smallvec![id];
        while let Some(e) = stack.pop() {
            match self.resolve(e) {
                Some(Expr::Meta(_)) => return true,
                Some(Expr::App(children)) => stack.extend(children.iter().copied()),
                Some(Expr::Bind { head, vars, body }) => {
                    stack.push(head);
                    stack.extend(vars.iter().copied());
                    stack.push(body);
                }
                _ => {}
            }
        }
        false
    }

    /// Collect the set of metavariable names occurring in the expression.
    pub fn metavariables(&self, id: ExprId) -> FxHashSet<SymId> {
        let mut out = FxHashSet::default();
        let mut stack: SmallVec<[ExprId; 16]> = smallvec::smallvec![id];
        while let Some(e) = stack.pop() {
            match self.resolve(e) {
                Some(Expr::Meta(name)) => {
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
        out
    }

    /// Get the shard index for an expression (for hashconsing distribution).
    fn shard_index(expr: &Expr) -> usize {
        let mut hasher = FxHasher::default();
        expr.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }
}

/// Render an expression in the canonical tree-source notation:
/// metavariables carry a trailing `__`, markers render as `⟨up.pos⟩`,
/// applications as `(c1 c2 ...)` and named binders as
/// `(head [x y] body)`. This is the stable debug representation.
pub fn format_expr(
    expr: ExprId,
    exprs: &ExprStore,
    symbols: &SymbolStore,
) -> Result<String, String> {
    fn render(
        expr: ExprId,
        exprs: &ExprStore,
        symbols: &SymbolStore,
        out: &mut String,
    ) -> Result<(), String> {
        match exprs.resolve(expr) {
            Some(Expr::Sym(name)) => {
                let s = symbols
                    .resolve(name)
                    .ok_or_else(|| format!("unknown symbol for id {:?}", name))?;
                out.push_str(s);
                Ok(())
            }
            Some(Expr::Meta(name)) => {
                let s = symbols
                    .resolve(name)
                    .ok_or_else(|| format!("unknown symbol for id {:?}", name))?;
                out.push_str(s);
                out.push_str("__");
                Ok(())
            }
            Some(Expr::Marker { up, pos, .. }) => {
                out.push('⟨');
                out.push_str(&up.to_string());
                out.push('.');
                out.push_str(&pos.to_string());
                out.push('⟩');
                Ok(())
            }
            Some(Expr::App(children)) => {
                out.push('(');
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    render(*child, exprs, symbols, out)?;
                }
                out.push(')');
                Ok(())
            }
            Some(Expr::Bind { head, vars, body }) => {
                out.push('(');
                render(head, exprs, symbols, out)?;
                out.push_str(" [");
                for (i, v) in vars.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    render(*v, exprs, symbols, out)?;
                }
                out.push_str("] ");
                render(body, exprs, symbols, out)?;
                out.push(')');
                Ok(())
            }
            None => Err(format!("unknown expression id {:?}", expr)),
        }
    }

    let mut out = String::new();
    render(expr, exprs, symbols, &mut out)?;
    Ok(out)
}
