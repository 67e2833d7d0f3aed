//! Lexical scope analysis.
//!
//! [`ScopeTree`] records, for the module and every `def`/`lambda`, which
//! names it binds, which it reads, which of its locals are captured by
//! nested scopes (and therefore live in cells), and which names it reads
//! from enclosing function scopes.
//!
//! Class bodies are not scopes: their bindings are class attributes, and
//! functions nested in a class body see the scope enclosing the class.
//! Comprehension targets are private to the comprehension; an assignment
//! expression inside a comprehension binds in the enclosing function.

use pyrite_ast::visitor::{Visitor, walk_expr, walk_pattern, walk_stmt};
use pyrite_ast::*;
use pyrite_core::{CompileError, Result, Span};
use rustc_hash::{FxHashMap, FxHashSet};

/// Index of a scope in a [`ScopeTree`]. The module is scope `0`.
pub type ScopeId = usize;

/// Identity of an arena-allocated AST node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(usize);

impl NodeKey {
    pub fn of<T>(node: &T) -> Self {
        NodeKey(std::ptr::from_ref(node) as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Lambda,
}

/// One function-like scope.
#[derive(Debug)]
pub struct Scope<'ast> {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub name: &'ast str,
    pub params: Vec<&'ast str>,
    /// Names bound in this scope (parameters included), in first-binding order.
    pub locals: Vec<&'ast str>,
    pub declared_globals: FxHashSet<&'ast str>,
    pub declared_nonlocals: FxHashSet<&'ast str>,
    nonlocal_spans: Vec<(&'ast str, Span)>,
    /// Locals read by nested scopes, in frame-slot order.
    pub captured: Vec<&'ast str>,
    /// Names read from enclosing function scopes.
    pub free: FxHashSet<&'ast str>,
    /// Locals targeted by `del`.
    pub deleted: FxHashSet<&'ast str>,
    pub is_generator: bool,
    pub children: Vec<ScopeId>,
    uses: Vec<(&'ast str, Span)>,
}

impl<'ast> Scope<'ast> {
    fn new(kind: ScopeKind, parent: Option<ScopeId>, name: &'ast str) -> Self {
        Self {
            kind,
            parent,
            name,
            params: Vec::new(),
            locals: Vec::new(),
            declared_globals: FxHashSet::default(),
            declared_nonlocals: FxHashSet::default(),
            nonlocal_spans: Vec::new(),
            captured: Vec::new(),
            free: FxHashSet::default(),
            deleted: FxHashSet::default(),
            is_generator: false,
            children: Vec::new(),
            uses: Vec::new(),
        }
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.locals.contains(&name)
    }

    pub fn is_captured(&self, name: &str) -> bool {
        self.captured.contains(&name)
    }

    /// Names another scope can rebind: captured cells, `nonlocal` and
    /// `global` declarations.
    pub fn opaque_names(&self) -> impl Iterator<Item = &'ast str> + '_ {
        self.captured
            .iter()
            .chain(&self.declared_nonlocals)
            .chain(&self.declared_globals)
            .copied()
    }

    pub fn has_frame(&self) -> bool {
        !self.captured.is_empty()
    }

    fn bind(&mut self, name: &'ast str) {
        if self.declared_globals.contains(name) || self.declared_nonlocals.contains(name) {
            return;
        }
        if !self.locals.contains(&name) {
            self.locals.push(name);
        }
    }
}

/// Scope facts for a whole module.
#[derive(Debug)]
pub struct ScopeTree<'ast> {
    scopes: Vec<Scope<'ast>>,
    by_node: FxHashMap<NodeKey, ScopeId>,
    /// Class-body bindings per `ClassDef`.
    class_attrs: FxHashMap<NodeKey, Vec<&'ast str>>,
    /// Names any non-module scope reads as module globals.
    observed: FxHashSet<&'ast str>,
    /// Module-level binding counts (assignments, defs, imports, `global` writes).
    module_bindings: FxHashMap<&'ast str, u32>,
}

impl<'ast> ScopeTree<'ast> {
    /// Analyze a module.
    pub fn build(module: &Module<'ast>) -> Result<Self> {
        let mut builder = ScopeBuilder::new();
        builder.walk_module(module);
        if let Some(err) = builder.error.take() {
            return Err(err);
        }
        let mut tree = ScopeTree {
            scopes: builder.scopes,
            by_node: builder.by_node,
            class_attrs: builder.class_attrs,
            observed: FxHashSet::default(),
            module_bindings: builder.module_bindings,
        };
        tree.resolve()?;
        Ok(tree)
    }

    fn resolve(&mut self) -> Result<()> {
        for id in 1..self.scopes.len() {
            let declared_nonlocals = self.scopes[id].nonlocal_spans.clone();
            for (name, span) in declared_nonlocals {
                match self.find_enclosing(id, name) {
                    Some(owner) => self.capture(owner, id, name),
                    None => {
                        return Err(CompileError::unresolved(
                            format!("{name} (no binding for nonlocal)"),
                            span,
                        ));
                    }
                }
            }

            let uses = std::mem::take(&mut self.scopes[id].uses);
            for &(name, _) in &uses {
                let scope = &self.scopes[id];
                if scope.is_local(name) || scope.declared_nonlocals.contains(name) {
                    continue;
                }
                if scope.declared_globals.contains(name) {
                    self.observed.insert(name);
                    continue;
                }
                match self.find_enclosing(id, name) {
                    Some(owner) => self.capture(owner, id, name),
                    None => {
                        self.observed.insert(name);
                    }
                }
            }
            self.scopes[id].uses = uses;

            let globals: Vec<&'ast str> = self.scopes[id].declared_globals.iter().copied().collect();
            for name in globals {
                self.observed.insert(name);
            }
        }
        Ok(())
    }

    /// The nearest enclosing function scope binding `name`.
    fn find_enclosing(&self, id: ScopeId, name: &str) -> Option<ScopeId> {
        let mut current = self.scopes[id].parent;
        while let Some(sid) = current {
            let scope = &self.scopes[sid];
            if scope.kind == ScopeKind::Module || scope.declared_globals.contains(name) {
                return None;
            }
            if scope.is_local(name) {
                return Some(sid);
            }
            current = scope.parent;
        }
        None
    }

    fn capture(&mut self, owner: ScopeId, user: ScopeId, name: &'ast str) {
        let scope = &mut self.scopes[owner];
        if !scope.captured.contains(&name) {
            scope.captured.push(name);
        }
        self.scopes[user].free.insert(name);
    }

    pub fn module(&self) -> &Scope<'ast> {
        &self.scopes[0]
    }

    pub fn get(&self, id: ScopeId) -> &Scope<'ast> {
        &self.scopes[id]
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Scope of a `def` or `lambda` node.
    pub fn scope_of<T>(&self, node: &T) -> Option<ScopeId> {
        self.by_node.get(&NodeKey::of(node)).copied()
    }

    /// Names bound in a class body.
    pub fn class_attrs<T>(&self, class: &T) -> &[&'ast str] {
        self.class_attrs
            .get(&NodeKey::of(class))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether a module-level name is read by some function or written via
    /// `global`, and so needs module-global storage.
    pub fn is_observed(&self, name: &str) -> bool {
        self.observed.contains(name)
    }

    /// Whether `name` is bound at module level (directly or via `global`).
    pub fn is_module_bound(&self, name: &str) -> bool {
        self.module_bindings.contains_key(name)
    }

    /// Number of module-level bindings of `name`.
    pub fn module_binding_count(&self, name: &str) -> u32 {
        self.module_bindings.get(name).copied().unwrap_or(0)
    }

    /// Module names that need global storage, in deterministic order.
    pub fn module_globals(&self) -> Vec<&'ast str> {
        let mut names: Vec<&'ast str> = self
            .module_bindings
            .keys()
            .copied()
            .filter(|n| self.observed.contains(n))
            .collect();
        names.sort_unstable();
        names
    }

    /// Enclosing scopes that own a closure frame, innermost first.
    pub fn env_frames(&self, id: ScopeId) -> Vec<ScopeId> {
        let mut frames = Vec::new();
        let mut current = self.scopes[id].parent;
        while let Some(sid) = current {
            let scope = &self.scopes[sid];
            if scope.kind == ScopeKind::Module {
                break;
            }
            if scope.has_frame() {
                frames.push(sid);
            }
            current = scope.parent;
        }
        frames
    }

    /// Resolve a free variable of scope `id` to `(depth, slot)` in its
    /// environment chain.
    pub fn resolve_free(&self, id: ScopeId, name: &str) -> Option<(usize, usize)> {
        let owner = self.find_enclosing(id, name)?;
        self.env_frames(id)
            .iter()
            .position(|&f| f == owner)
            .and_then(|depth| {
                self.scopes[owner]
                    .captured
                    .iter()
                    .position(|c| *c == name)
                    .map(|slot| (depth, slot))
            })
    }
}

// ============================================================================
// Builder
// ============================================================================

struct WalkFrame<'ast> {
    scope: ScopeId,
    /// Comprehension target sets, innermost last
    comps: Vec<Vec<&'ast str>>,
    /// Class-body namespaces, innermost last
    class_ns: Vec<FxHashSet<&'ast str>>,
    /// Comprehension names of an enclosing scope a lambda may not capture
    blocked: FxHashSet<&'ast str>,
    /// Names of the classes whose bodies are being walked
    class_names: Vec<&'ast str>,
    /// Class whose body directly contains this function
    method_of: Option<&'ast str>,
}

struct ScopeBuilder<'ast> {
    scopes: Vec<Scope<'ast>>,
    by_node: FxHashMap<NodeKey, ScopeId>,
    class_attrs: FxHashMap<NodeKey, Vec<&'ast str>>,
    module_bindings: FxHashMap<&'ast str, u32>,
    frames: Vec<WalkFrame<'ast>>,
    error: Option<CompileError>,
}

impl<'ast> ScopeBuilder<'ast> {
    fn new() -> Self {
        Self {
            scopes: vec![Scope::new(ScopeKind::Module, None, "<module>")],
            by_node: FxHashMap::default(),
            class_attrs: FxHashMap::default(),
            module_bindings: FxHashMap::default(),
            frames: vec![WalkFrame {
                scope: 0,
                comps: Vec::new(),
                class_ns: Vec::new(),
                blocked: FxHashSet::default(),
                class_names: Vec::new(),
                method_of: None,
            }],
            error: None,
        }
    }

    fn fail(&mut self, err: CompileError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn frame(&self) -> &WalkFrame<'ast> {
        // The module frame is never popped.
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut WalkFrame<'ast> {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn current(&self) -> ScopeId {
        self.frame().scope
    }

    fn walk_module(&mut self, module: &Module<'ast>) {
        for stmt in module.body {
            self.visit_stmt(*stmt);
        }
    }

    /// Record a binding of `name` at the current position.
    fn bind(&mut self, name: &'ast str) {
        if let Some(comp) = self.frame_mut().comps.last_mut() {
            if !comp.contains(&name) {
                comp.push(name);
            }
            return;
        }
        if let Some(ns) = self.frame_mut().class_ns.last_mut() {
            ns.insert(name);
            return;
        }
        self.bind_in_scope(name);
    }

    /// Bind in the function scope, skipping comprehension and class levels.
    fn bind_in_scope(&mut self, name: &'ast str) {
        let id = self.current();
        let scope = &mut self.scopes[id];
        if id == 0 || scope.declared_globals.contains(name) {
            *self.module_bindings.entry(name).or_insert(0) += 1;
        }
        if id != 0 {
            scope.bind(name);
        } else if !scope.locals.contains(&name) {
            scope.locals.push(name);
        }
    }

    fn is_comp_bound(&self, name: &str) -> bool {
        self.frame().comps.iter().any(|c| c.contains(&name))
    }

    fn use_name(&mut self, name: &'ast str, span: Span) {
        if self.is_comp_bound(name) {
            return;
        }
        if self.frame().class_ns.last().is_some_and(|ns| ns.contains(name)) {
            return;
        }
        let id = self.current();
        let scope = &self.scopes[id];
        if self.frame().blocked.contains(name) && !scope.is_local(name) {
            self.fail(CompileError::unsupported(
                format!("lambda capturing comprehension variable '{name}'"),
                span,
            ));
            return;
        }
        self.scopes[id].uses.push((name, span));
    }

    fn bind_target(&mut self, target: Expr<'ast>) {
        match target {
            Expr::Name(n) => self.bind(n.id),
            Expr::Tuple(t) | Expr::List(t) => {
                for elt in t.elts {
                    self.bind_target(*elt);
                }
            }
            Expr::Starred(s) => self.bind_target(s.value),
            Expr::Attribute(a) => self.visit_expr(a.value),
            Expr::Subscript(s) => {
                self.visit_expr(s.value);
                self.visit_expr(s.slice);
            }
            other => self.visit_expr(other),
        }
    }

    fn enter_scope<T>(&mut self, node: &T, kind: ScopeKind, name: &'ast str) -> ScopeId {
        let parent = self.current();
        let id = self.scopes.len();
        self.scopes.push(Scope::new(kind, Some(parent), name));
        self.scopes[parent].children.push(id);
        self.by_node.insert(NodeKey::of(node), id);

        let mut blocked = self.frame().blocked.clone();
        for comp in &self.frame().comps {
            blocked.extend(comp.iter().copied());
        }
        let method_of = match kind {
            ScopeKind::Lambda => self.frame().method_of,
            _ => self.frame().class_names.last().copied(),
        };
        self.frames.push(WalkFrame {
            scope: id,
            comps: Vec::new(),
            class_ns: Vec::new(),
            blocked,
            class_names: Vec::new(),
            method_of,
        });
        id
    }

    fn exit_scope(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    fn bind_params(&mut self, id: ScopeId, args: &'ast Arguments<'ast>) {
        for name in args.names() {
            self.scopes[id].params.push(name);
            self.scopes[id].bind(name);
        }
    }

    /// Declarations must be known before any binding in the body.
    fn collect_declarations(&mut self, id: ScopeId, body: &'ast [Stmt<'ast>]) {
        let mut finder = DeclFinder::default();
        for stmt in body {
            finder.visit_stmt(*stmt);
        }
        let scope = &mut self.scopes[id];
        scope.declared_globals.extend(finder.globals);
        for (name, span) in finder.nonlocals {
            if scope.declared_nonlocals.insert(name) {
                scope.nonlocal_spans.push((name, span));
            }
        }
    }

    fn walk_comprehension(
        &mut self,
        generators: &'ast [Comprehension<'ast>],
        elts: &[Expr<'ast>],
        span: Span,
    ) {
        // The first iterable is evaluated in the enclosing scope.
        if let Some(first) = generators.first() {
            self.visit_expr(first.iter);
        }
        self.frame_mut().comps.push(Vec::new());
        for (i, clause) in generators.iter().enumerate() {
            if i > 0 {
                self.visit_expr(clause.iter);
            }
            self.bind_target(clause.target);
            for cond in clause.ifs {
                self.visit_expr(*cond);
            }
        }
        for elt in elts {
            if contains_yield(*elt) {
                self.fail(CompileError::unsupported("yield inside a comprehension", span));
            }
            self.visit_expr(*elt);
        }
        self.frame_mut().comps.pop();
    }

    fn mark_yield(&mut self, span: Span) {
        let id = self.current();
        match self.scopes[id].kind {
            ScopeKind::Function => self.scopes[id].is_generator = true,
            ScopeKind::Module => self.fail(CompileError::unsupported("yield outside a function", span)),
            ScopeKind::Lambda => self.fail(CompileError::unsupported("yield inside a lambda", span)),
        }
    }
}

impl<'ast> Visitor<'ast> for ScopeBuilder<'ast> {
    fn visit_stmt(&mut self, stmt: Stmt<'ast>) {
        match stmt {
            Stmt::Assign(a) => {
                self.visit_expr(a.value);
                for target in a.targets {
                    self.bind_target(*target);
                }
            }
            Stmt::AugAssign(a) => {
                if let Expr::Name(n) = a.target {
                    self.use_name(n.id, n.span);
                }
                self.visit_expr(a.value);
                self.bind_target(a.target);
            }
            Stmt::AnnAssign(a) => {
                if let Some(value) = a.value {
                    self.visit_expr(value);
                }
                self.bind_target(a.target);
            }
            Stmt::For(f) => {
                self.visit_expr(f.iter);
                self.bind_target(f.target);
                for s in f.body.iter().chain(f.orelse) {
                    self.visit_stmt(*s);
                }
            }
            Stmt::With(w) => {
                for item in w.items {
                    self.visit_expr(item.context_expr);
                    if let Some(vars) = item.optional_vars {
                        self.bind_target(vars);
                    }
                }
                for s in w.body {
                    self.visit_stmt(*s);
                }
            }
            Stmt::Delete(d) => {
                for target in d.targets {
                    match target {
                        Expr::Name(n) => {
                            self.bind(n.id);
                            let id = self.current();
                            self.scopes[id].deleted.insert(n.id);
                        }
                        other => self.bind_target(*other),
                    }
                }
            }
            Stmt::Import(i) => {
                for alias in i.names {
                    self.bind(alias.bound_name());
                }
            }
            Stmt::ImportFrom(i) => {
                for alias in i.names {
                    if alias.name != "*" {
                        self.bind(alias.bound_name());
                    }
                }
            }
            Stmt::Global(_) | Stmt::Nonlocal(_) => {}
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_function_def(&mut self, func: &'ast FunctionDef<'ast>) {
        for deco in func.decorators {
            self.visit_expr(*deco);
        }
        for default in func.args.defaults {
            self.visit_expr(*default);
        }
        for default in func.args.kw_defaults.iter().flatten() {
            self.visit_expr(*default);
        }
        self.bind(func.name);

        let id = self.enter_scope(func, ScopeKind::Function, func.name);
        self.collect_declarations(id, func.body);
        self.bind_params(id, func.args);
        for stmt in func.body {
            self.visit_stmt(*stmt);
        }
        self.exit_scope();
    }

    fn visit_class_def(&mut self, class: &'ast ClassDef<'ast>) {
        for deco in class.decorators {
            self.visit_expr(*deco);
        }
        for base in class.bases {
            self.visit_expr(*base);
        }
        for kw in class.keywords {
            self.visit_expr(kw.value);
        }
        self.frame_mut().class_ns.push(FxHashSet::default());
        self.frame_mut().class_names.push(class.name);
        for stmt in class.body {
            self.visit_stmt(*stmt);
        }
        self.frame_mut().class_names.pop();
        let ns = self.frame_mut().class_ns.pop().unwrap_or_default();
        let mut attrs: Vec<&'ast str> = ns.into_iter().collect();
        attrs.sort_unstable();
        self.class_attrs.insert(NodeKey::of(class), attrs);
        self.bind(class.name);
    }

    fn visit_except_handler(&mut self, handler: &'ast ExceptHandler<'ast>) {
        if let Some(typ) = handler.typ {
            self.visit_expr(typ);
        }
        if let Some(name) = handler.name {
            self.bind(name);
        }
        for stmt in handler.body {
            self.visit_stmt(*stmt);
        }
    }

    fn visit_pattern(&mut self, pattern: Pattern<'ast>) {
        match pattern {
            Pattern::As(p) => {
                if let Some(name) = p.name {
                    self.bind(name);
                }
            }
            Pattern::Star(p) => {
                if let Some(name) = p.name {
                    self.bind(name);
                }
            }
            Pattern::Mapping(p) => {
                if let Some(rest) = p.rest {
                    self.bind(rest);
                }
            }
            _ => {}
        }
        walk_pattern(self, pattern);
    }

    fn visit_expr(&mut self, expr: Expr<'ast>) {
        match expr {
            Expr::NamedExpr(n) => {
                self.visit_expr(n.value);
                self.bind_in_scope(n.target);
            }
            Expr::Yield(y) => {
                self.mark_yield(y.span);
                walk_expr(self, expr);
            }
            Expr::YieldFrom(y) => {
                self.mark_yield(y.span);
                walk_expr(self, expr);
            }
            Expr::Let(l) => {
                for binding in l.bindings {
                    self.visit_expr(binding.value);
                    self.bind_in_scope(binding.name);
                }
                self.visit_expr(l.body);
            }
            Expr::Call(call) => {
                // Zero-argument `super()` reads the enclosing class by name.
                if call.func.as_name() == Some("super") && call.args.is_empty() {
                    if let Some(class_name) = self.frame().method_of {
                        self.use_name(class_name, call.span);
                    }
                }
                walk_expr(self, expr);
            }
            _ => walk_expr(self, expr),
        }
    }

    fn visit_name(&mut self, name: &NameExpr<'ast>) {
        self.use_name(name.id, name.span);
    }

    fn visit_lambda(&mut self, lambda: &'ast LambdaExpr<'ast>) {
        for default in lambda.args.defaults {
            self.visit_expr(*default);
        }
        for default in lambda.args.kw_defaults.iter().flatten() {
            self.visit_expr(*default);
        }
        let id = self.enter_scope(lambda, ScopeKind::Lambda, "<lambda>");
        self.bind_params(id, lambda.args);
        self.visit_expr(lambda.body);
        self.exit_scope();
    }

    fn visit_comprehension_expr(&mut self, comp: &'ast ComprehensionExpr<'ast>) {
        self.walk_comprehension(comp.generators, &[comp.elt], comp.span);
    }

    fn visit_dict_comp(&mut self, comp: &'ast DictCompExpr<'ast>) {
        self.walk_comprehension(comp.generators, &[comp.key, comp.value], comp.span);
    }
}

/// Finds `global`/`nonlocal` declarations of one scope, without entering
/// nested scopes.
#[derive(Default)]
struct DeclFinder<'ast> {
    globals: Vec<&'ast str>,
    nonlocals: Vec<(&'ast str, Span)>,
}

impl<'ast> Visitor<'ast> for DeclFinder<'ast> {
    fn visit_stmt(&mut self, stmt: Stmt<'ast>) {
        match stmt {
            Stmt::Global(g) => self.globals.extend(g.names.iter().copied()),
            Stmt::Nonlocal(n) => self.nonlocals.extend(n.names.iter().map(|name| (*name, n.span))),
            Stmt::FunctionDef(_) => {}
            Stmt::ClassDef(c) => {
                for s in c.body {
                    if !matches!(s, Stmt::FunctionDef(_)) {
                        self.visit_stmt(*s);
                    }
                }
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, _expr: Expr<'ast>) {}
}

/// Whether an expression contains `yield`, not counting nested lambdas.
pub fn contains_yield(expr: Expr<'_>) -> bool {
    struct Finder(bool);
    impl<'ast> Visitor<'ast> for Finder {
        fn visit_expr(&mut self, expr: Expr<'ast>) {
            match expr {
                Expr::Yield(_) | Expr::YieldFrom(_) => self.0 = true,
                Expr::Lambda(_) => {}
                _ => walk_expr(self, expr),
            }
        }
    }
    let mut finder = Finder(false);
    finder.visit_expr(expr);
    finder.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;
    use pyrite_core::BinaryOp;

    fn tree<'ast>(module: &Module<'ast>) -> ScopeTree<'ast> {
        ScopeTree::build(module).unwrap()
    }

    #[test]
    fn module_names_observed_by_functions_become_globals() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.assign_name("counter", b.int(0)),
            b.assign_name("scratch", b.int(1)),
            b.func("read", &[], &[b.ret(Some(b.name("counter")))]),
        ]);
        let t = tree(&module);
        assert_eq!(t.module_globals(), vec!["counter"]);
        assert!(t.is_observed("counter"));
        assert!(!t.is_observed("scratch"));
        assert!(t.is_module_bound("scratch"));
    }

    #[test]
    fn captured_locals_and_free_variables() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let inner = b.func(
            "inner",
            &[],
            &[
                b.nonlocal(&["count"]),
                b.aug_assign(b.name("count"), BinaryOp::Add, b.int(1)),
                b.ret(Some(b.name("count"))),
            ],
        );
        let outer = b.func(
            "outer",
            &[],
            &[b.assign_name("count", b.int(0)), inner, b.ret(Some(b.name("inner")))],
        );
        let module = b.module(&[outer]);
        let t = tree(&module);

        let Stmt::FunctionDef(outer_def) = module.body[0] else { unreachable!() };
        let outer_id = t.scope_of(outer_def).unwrap();
        let Stmt::FunctionDef(inner_def) = outer_def.body[1] else { unreachable!() };
        let inner_id = t.scope_of(inner_def).unwrap();

        assert!(t.get(outer_id).is_captured("count"));
        assert!(t.get(inner_id).free.contains("count"));
        assert!(!t.get(inner_id).is_local("count"));
        assert_eq!(t.resolve_free(inner_id, "count"), Some((0, 0)));
        assert_eq!(t.env_frames(inner_id), vec![outer_id]);
    }

    #[test]
    fn nonlocal_without_binding_fails() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[b.func("f", &[], &[b.nonlocal(&["ghost"]), b.pass()])]);
        let err = ScopeTree::build(&module).unwrap_err();
        assert_eq!(err.kind(), pyrite_core::ErrorKind::NameResolution);
    }

    #[test]
    fn comprehension_targets_do_not_leak() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let comp = b.list_comp(
            b.name("x"),
            &[b.comprehension(b.name("x"), b.name("items"), &[])],
        );
        let module = b.module(&[b.func("f", &["items"], &[b.ret(Some(comp))])]);
        let t = tree(&module);
        let Stmt::FunctionDef(def) = module.body[0] else { unreachable!() };
        let id = t.scope_of(def).unwrap();
        assert!(!t.get(id).is_local("x"));
        assert!(!t.is_observed("x"));
    }

    #[test]
    fn walrus_in_comprehension_binds_function_local() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let comp = b.list_comp(
            b.named("last", b.name("x")),
            &[b.comprehension(b.name("x"), b.name("items"), &[])],
        );
        let module = b.module(&[b.func("f", &["items"], &[b.expr_stmt(comp)])]);
        let t = tree(&module);
        let Stmt::FunctionDef(def) = module.body[0] else { unreachable!() };
        assert!(t.get(t.scope_of(def).unwrap()).is_local("last"));
    }

    #[test]
    fn lambda_capturing_comprehension_variable_is_rejected() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let lam = b.lambda(b.params(&[]), b.name("x"));
        let comp = b.list_comp(lam, &[b.comprehension(b.name("x"), b.name("items"), &[])]);
        let module = b.module(&[b.func("f", &["items"], &[b.expr_stmt(comp)])]);
        let err = ScopeTree::build(&module).unwrap_err();
        assert_eq!(err.kind(), pyrite_core::ErrorKind::UnsupportedConstruct);
    }

    #[test]
    fn generator_detection() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[b.func(
            "gen",
            &[],
            &[b.expr_stmt(b.yield_(Some(b.int(1))))],
        )]);
        let t = tree(&module);
        let Stmt::FunctionDef(def) = module.body[0] else { unreachable!() };
        assert!(t.get(t.scope_of(def).unwrap()).is_generator);
    }

    #[test]
    fn methods_skip_class_namespace() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let method = b.func("get", &["self"], &[b.ret(Some(b.name("limit")))]);
        let class = b.class("C", &[], &[b.assign_name("limit", b.int(3)), method]);
        let module = b.module(&[class]);
        let t = tree(&module);
        let Stmt::ClassDef(cls) = module.body[0] else { unreachable!() };
        assert_eq!(t.class_attrs(cls), &["get", "limit"]);
        // `limit` in the method is a module-level lookup, not the class attribute.
        assert!(t.is_observed("limit"));
        assert!(!t.is_module_bound("limit"));
    }

    #[test]
    fn zero_argument_super_observes_class_name() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let init = b.func(
            "__init__",
            &["self"],
            &[b.expr_stmt(b.method_call(b.call_name("super", &[]), "__init__", &[]))],
        );
        let module = b.module(&[b.class("Child", &[b.name("Base")], &[init])]);
        let t = tree(&module);
        assert!(t.is_observed("Child"));
        assert_eq!(t.module_binding_count("Child"), 1);
    }

    #[test]
    fn global_declaration_binds_module_name() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[b.func(
            "init",
            &[],
            &[b.global(&["state"]), b.assign_name("state", b.int(1))],
        )]);
        let t = tree(&module);
        assert!(t.is_module_bound("state"));
        assert!(t.is_observed("state"));
    }
}
