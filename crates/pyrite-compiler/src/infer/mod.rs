//! Type and escape inference.
//!
//! Inference runs per function, after a module-level pre-pass
//! ([`ModuleFacts`]) has inferred the return type of every module-level
//! function so call sites can use it.
//!
//! - [`TypeInferencer::infer`] types one expression. It is pure: the same
//!   expression under the same variable table always gets the same type.
//! - [`TypeInferencer::analyze`] walks a body forward, widening the variable
//!   table at every binding until it stops changing.
//! - [`escape`] computes the set of variables whose values must be boxed.
//! - [`native`] decides which variables get unboxed storage.
//!
//! Inference never fails; anything it cannot type is `Unknown`, which sends
//! code generation down the generic boxed path.
//!
//! # Example
//!
//! ```ignore
//! let facts = ModuleFacts::build(&module, &tree);
//! let mut types = TypeInferencer::new(&facts);
//! let escapes = escape::compute(body, scope);
//! types.analyze(body, &escapes);
//! assert_eq!(types.infer(expr), InferredType::Int);
//! ```

pub mod escape;
pub mod native;

use pyrite_ast::*;
use pyrite_core::{BinaryOp, InferredType, NativeType, UnaryOp, combine_types};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::ScopeTree;
use crate::runtime::builtin_index;

/// Upper bound on forward passes before giving up on a fixpoint.
const MAX_PASSES: usize = 8;

// ============================================================================
// Module Facts
// ============================================================================

/// Facts about module-level definitions, shared by every function compile.
#[derive(Debug, Default)]
pub struct ModuleFacts<'ast> {
    /// Return types of module-level functions.
    returns: FxHashMap<&'ast str, InferredType>,
    /// Module-level class names bound exactly once.
    classes: FxHashSet<&'ast str>,
    /// Every name bound at module level.
    module_bound: FxHashSet<&'ast str>,
}

impl<'ast> ModuleFacts<'ast> {
    /// Infer return types of every module-level function.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn build(module: &Module<'ast>, tree: &ScopeTree<'ast>) -> Self {
        let mut facts = ModuleFacts::default();
        let mut functions = Vec::new();
        for stmt in module.body {
            match stmt {
                Stmt::FunctionDef(f) => {
                    facts.module_bound.insert(f.name);
                    if tree.module_binding_count(f.name) == 1 && f.decorators.is_empty() {
                        functions.push(*f);
                    }
                }
                Stmt::ClassDef(c) => {
                    facts.module_bound.insert(c.name);
                    if tree.module_binding_count(c.name) == 1 && c.decorators.is_empty() {
                        facts.classes.insert(c.name);
                    }
                }
                _ => {}
            }
        }
        facts.module_bound.extend(tree.module().locals.iter().copied());

        // Two rounds let a function see the return type of one defined later.
        for _ in 0..2 {
            for func in functions.iter().copied() {
                let ret = facts.infer_return(func, tree);
                facts.returns.insert(func.name, ret);
            }
        }
        facts
    }

    fn infer_return(&self, func: &'ast FunctionDef<'ast>, tree: &ScopeTree<'ast>) -> InferredType {
        let Some(scope) = tree.scope_of(func).map(|id| tree.get(id)) else {
            return InferredType::Unknown;
        };
        if scope.is_generator {
            return InferredType::Unknown;
        }
        let mut types = TypeInferencer::new(self);
        types.seed_params(func.args);
        types.seed_opaque(scope.opaque_names());
        types.analyze(func.body, &FxHashSet::default());
        let falls_through = !func.body.last().is_some_and(|s| s.is_terminator());
        let mut ret = types.returns.clone().unwrap_or(InferredType::None);
        if falls_through && types.returns.is_some() {
            ret = ret.join(&InferredType::None);
        }
        ret
    }

    pub fn return_type(&self, name: &str) -> Option<&InferredType> {
        self.returns.get(name)
    }

    pub fn is_class(&self, name: &str) -> bool {
        self.classes.contains(name)
    }

    pub fn is_module_bound(&self, name: &str) -> bool {
        self.module_bound.contains(name)
    }
}

// ============================================================================
// Type Inferencer
// ============================================================================

/// Per-function type table.
#[derive(Debug)]
pub struct TypeInferencer<'f, 'ast> {
    facts: &'f ModuleFacts<'ast>,
    vars: FxHashMap<&'ast str, InferredType>,
    /// Comprehension targets currently in scope, innermost last.
    shadow: Vec<(&'ast str, InferredType)>,
    /// Names given native annotations (`x: i64 = ...`, `def f(n: f64)`).
    annotated: FxHashMap<&'ast str, NativeType>,
    /// Joined type of every `return` seen.
    returns: Option<InferredType>,
    /// Variables pinned to an unparameterized list because they escape.
    pinned_lists: FxHashSet<&'ast str>,
    /// Variables another scope can rebind. Always `Unknown`.
    opaque: FxHashSet<&'ast str>,
}

impl<'f, 'ast> TypeInferencer<'f, 'ast> {
    pub fn new(facts: &'f ModuleFacts<'ast>) -> Self {
        Self {
            facts,
            vars: FxHashMap::default(),
            shadow: Vec::new(),
            annotated: FxHashMap::default(),
            returns: None,
            pinned_lists: FxHashSet::default(),
            opaque: FxHashSet::default(),
        }
    }

    pub fn facts(&self) -> &'f ModuleFacts<'ast> {
        self.facts
    }

    /// Seed parameter types. Only native annotations are trusted; every other
    /// parameter starts `Unknown`, which also keeps it from resolving to a
    /// builtin or module function of the same name.
    pub fn seed_params(&mut self, args: &Arguments<'ast>) {
        for arg in args.args.iter().chain(args.kwonlyargs) {
            match arg
                .annotation
                .and_then(|a| a.as_name())
                .and_then(NativeType::from_annotation)
            {
                Some(native) => {
                    self.annotated.insert(arg.name, native);
                    self.vars.insert(arg.name, InferredType::Native(native).boxed());
                }
                None => {
                    self.vars.insert(arg.name, InferredType::Unknown);
                }
            }
        }
        for arg in args.vararg.iter().chain(&args.kwarg) {
            self.vars.insert(arg.name, InferredType::Unknown);
        }
    }

    /// Mark names whose value can change outside this body: captured cells
    /// and names declared `nonlocal` or `global`.
    pub fn seed_opaque(&mut self, names: impl IntoIterator<Item = &'ast str>) {
        for name in names {
            self.opaque.insert(name);
            self.vars.insert(name, InferredType::Unknown);
        }
    }

    /// The current type of a variable.
    pub fn var_type(&self, name: &str) -> InferredType {
        if let Some((_, ty)) = self.shadow.iter().rev().find(|(n, _)| *n == name) {
            return ty.clone();
        }
        self.vars.get(name).cloned().unwrap_or_default()
    }

    /// Whether `name` is a comprehension target currently in scope.
    pub fn is_shadowed(&self, name: &str) -> bool {
        self.shadow.iter().any(|(n, _)| *n == name)
    }

    pub fn annotated_native(&self, name: &str) -> Option<NativeType> {
        self.annotated.get(name).copied()
    }

    /// Variables with a recorded type, sorted by name.
    pub fn typed_vars(&self) -> Vec<(&'ast str, InferredType)> {
        let mut vars: Vec<_> = self.vars.iter().map(|(n, t)| (*n, t.clone())).collect();
        vars.sort_by(|a, b| a.0.cmp(b.0));
        vars
    }

    /// Record that `name` is stored natively.
    pub fn set_native(&mut self, name: &'ast str, native: NativeType) {
        self.vars.insert(name, InferredType::Native(native));
    }

    /// Enter a comprehension target.
    pub fn push_shadow(&mut self, name: &'ast str, ty: InferredType) {
        self.shadow.push((name, ty));
    }

    pub fn pop_shadow(&mut self) {
        self.shadow.pop();
    }

    // ==========================================================================
    // Expressions
    // ==========================================================================

    /// The type of an expression under the current variable table.
    pub fn infer(&self, expr: Expr<'ast>) -> InferredType {
        use InferredType as T;

        match expr {
            Expr::Constant(c) => match c.value {
                Constant::Int(_) => T::Int,
                Constant::Float(_) => T::Float,
                Constant::Bool(_) => T::Bool,
                Constant::Str(_) => T::Str,
                Constant::Bytes(_) => T::Bytes,
                Constant::None => T::None,
                Constant::Ellipsis => T::Unknown,
            },
            Expr::Name(n) => self.var_type(n.id),
            Expr::BinOp(b) => {
                let left = self.infer(b.left);
                let right = self.infer(b.right);
                combine_types(&left, &right, b.op)
            }
            Expr::UnaryOp(u) => {
                let operand = self.infer(u.operand);
                match u.op {
                    UnaryOp::Not => T::Bool,
                    UnaryOp::USub | UnaryOp::UAdd if operand.is_numeric() => operand,
                    UnaryOp::Invert if matches!(operand, T::Int) || operand.is_native_int() => operand,
                    _ => T::Unknown,
                }
            }
            Expr::BoolOp(b) => b
                .values
                .iter()
                .map(|v| self.infer(*v))
                .reduce(|a, b| a.join(&b))
                .unwrap_or_default(),
            Expr::Compare(_) => T::Bool,
            Expr::IfExp(i) => self.infer(i.body).join(&self.infer(i.orelse)),
            Expr::NamedExpr(n) => self.infer(n.value),
            Expr::JoinedStr(_) => T::Str,
            Expr::List(seq) => self.infer_list(seq.elts),
            Expr::Tuple(seq) => {
                if seq.elts.iter().any(|e| matches!(e, Expr::Starred(_))) {
                    T::Unknown
                } else {
                    T::Tuple(seq.elts.iter().map(|e| self.infer(*e).boxed()).collect())
                }
            }
            Expr::Dict(d) => {
                if d.keys.iter().any(Option::is_none) {
                    return T::Dict(None, None);
                }
                let keys = self.uniform(d.keys.iter().flatten().copied());
                let values = self.uniform(d.values.iter().copied());
                T::Dict(keys.map(Box::new), values.map(Box::new))
            }
            Expr::ListComp(c) | Expr::GeneratorExp(c) => {
                let elt = self.with_comprehension(c.generators, |types| types.infer(c.elt).boxed());
                if elt.is_known() {
                    T::list_of(elt)
                } else {
                    T::List(None)
                }
            }
            Expr::DictComp(c) => {
                let (k, v) = self.with_comprehension(c.generators, |types| {
                    (types.infer(c.key).boxed(), types.infer(c.value).boxed())
                });
                let known = |t: InferredType| t.is_known().then(|| Box::new(t));
                T::Dict(known(k), known(v))
            }
            Expr::Lambda(l) => T::Function {
                params: l.args.args.iter().map(|_| T::Unknown).collect(),
                ret: Box::new(T::Unknown),
            },
            Expr::Call(call) => self.infer_call(call),
            Expr::Subscript(s) => self.infer_subscript(s),
            Expr::Let(l) => {
                // Bindings are fresh function locals; the table already has them
                // once the body was analyzed.
                let mut shadow = Vec::new();
                for binding in l.bindings {
                    let ty = self
                        .vars
                        .get(binding.name)
                        .cloned()
                        .unwrap_or_else(|| self.infer(binding.value));
                    shadow.push((binding.name, ty));
                }
                self.with_extra_shadow(shadow, |types| types.infer(l.body))
            }
            Expr::Set(_)
            | Expr::SetComp(_)
            | Expr::Attribute(_)
            | Expr::Yield(_)
            | Expr::YieldFrom(_)
            | Expr::Starred(_)
            | Expr::Slice(_) => T::Unknown,
        }
    }

    fn infer_list(&self, elts: &[Expr<'ast>]) -> InferredType {
        if elts.iter().any(|e| matches!(e, Expr::Starred(_))) {
            return InferredType::List(None);
        }
        match self.uniform(elts.iter().copied()) {
            Some(elem) => InferredType::list_of(elem),
            None => InferredType::List(None),
        }
    }

    /// The common known type of every expression, if they all agree.
    fn uniform(&self, exprs: impl Iterator<Item = Expr<'ast>>) -> Option<InferredType> {
        let mut common: Option<InferredType> = None;
        for expr in exprs {
            let ty = self.infer(expr).boxed();
            if !ty.is_known() {
                return None;
            }
            match &common {
                None => common = Some(ty),
                Some(existing) if *existing == ty => {}
                Some(_) => return None,
            }
        }
        common
    }

    /// Whether `name` refers to the builtin of that name here.
    pub fn is_builtin(&self, name: &str) -> bool {
        builtin_index(name).is_some()
            && !self.vars.contains_key(name)
            && !self.is_shadowed(name)
            && !self.facts.is_module_bound(name)
    }

    fn infer_call(&self, call: &'ast CallExpr<'ast>) -> InferredType {
        use InferredType as T;

        match call.func {
            Expr::Name(n) if self.is_builtin(n.id) => {
                let first = call.args.first().map(|a| self.infer(*a).boxed());
                match n.id {
                    "len" | "int" | "ord" | "hash" | "id" => T::Int,
                    "float" => T::Float,
                    "str" | "repr" | "ascii" | "chr" | "hex" | "bin" | "oct" | "input" | "format" => T::Str,
                    "bool" | "isinstance" | "issubclass" | "callable" | "hasattr" | "any" | "all" => T::Bool,
                    "abs" => first.filter(InferredType::is_numeric).unwrap_or_default(),
                    "round" if call.args.len() == 1 => T::Int,
                    "list" => match first {
                        Some(T::List(elem)) => T::List(elem),
                        _ => T::List(None),
                    },
                    "sorted" => match first {
                        Some(T::List(elem)) => T::List(elem),
                        _ => T::List(None),
                    },
                    "dict" => T::Dict(None, None),
                    "min" | "max" if call.args.len() >= 2 && call.keywords.is_empty() => {
                        let joined = call
                            .args
                            .iter()
                            .map(|a| self.infer(*a).boxed())
                            .reduce(|a, b| a.join(&b))
                            .unwrap_or_default();
                        if joined.is_numeric() { joined } else { T::Unknown }
                    }
                    "sum" => match first {
                        Some(T::List(Some(elem))) if matches!(*elem, T::Int | T::Float) => *elem,
                        _ => T::Unknown,
                    },
                    _ => T::Unknown,
                }
            }
            Expr::Name(n) if !self.vars.contains_key(n.id) && !self.is_shadowed(n.id) => {
                if self.facts.is_class(n.id) {
                    T::Class(n.id.to_string())
                } else {
                    self.facts.return_type(n.id).cloned().unwrap_or_default()
                }
            }
            Expr::Attribute(attr) => {
                let receiver = self.infer(attr.value);
                match (&receiver, attr.attr) {
                    (T::Str, "upper" | "lower" | "strip" | "lstrip" | "rstrip" | "replace" | "title" | "capitalize")
                    | (T::Str, "format" | "join" | "ljust" | "rjust" | "center" | "zfill") => T::Str,
                    (T::Str, "split" | "splitlines") => T::list_of(T::Str),
                    (T::Str, "startswith" | "endswith" | "isdigit" | "isalpha" | "isspace") => T::Bool,
                    (T::Str, "find" | "count" | "index") => T::Int,
                    (T::List(_) | T::Dict(..), "copy") => receiver.clone(),
                    (T::List(Some(elem)), "pop") => (**elem).clone(),
                    (T::List(_), "index" | "count") => T::Int,
                    (T::List(_), "append" | "extend" | "insert" | "sort" | "reverse" | "clear") => T::None,
                    (T::Dict(_, Some(v)), "get") if call.args.len() == 1 => {
                        (**v).clone().join(&T::None)
                    }
                    _ => T::Unknown,
                }
            }
            _ => T::Unknown,
        }
    }

    fn infer_subscript(&self, sub: &'ast SubscriptExpr<'ast>) -> InferredType {
        use InferredType as T;

        let container = self.infer(sub.value);
        if let Expr::Slice(_) = sub.slice {
            return match container {
                T::List(elem) => T::List(elem),
                T::Str => T::Str,
                T::Bytes => T::Bytes,
                _ => T::Unknown,
            };
        }
        match container {
            T::List(Some(elem)) => *elem,
            T::Str => T::Str,
            T::Bytes => T::Int,
            T::Dict(_, Some(value)) => *value,
            T::Tuple(elems) => match sub.slice.as_int() {
                Some(i) => {
                    let len = elems.len() as i64;
                    let index = if i < 0 { i + len } else { i };
                    usize::try_from(index)
                        .ok()
                        .and_then(|i| elems.get(i).cloned())
                        .unwrap_or_default()
                }
                None => {
                    let first = elems.first().cloned().unwrap_or_default();
                    if elems.iter().all(|e| *e == first) { first } else { T::Unknown }
                }
            },
            _ => T::Unknown,
        }
    }

    /// The type of the items produced by iterating `iter`.
    pub fn element_type(&self, iter: Expr<'ast>) -> InferredType {
        use InferredType as T;

        if let Some((name, call)) = iter.as_named_call() {
            if self.is_builtin(name) {
                let arg = |i: usize| call.args.get(i).copied();
                match name {
                    "range" => return T::Int,
                    "enumerate" => {
                        let inner = arg(0).map(|a| self.element_type(a)).unwrap_or_default();
                        return T::Tuple(vec![T::Int, inner]);
                    }
                    "zip" => {
                        return T::Tuple(call.args.iter().map(|a| self.element_type(*a)).collect());
                    }
                    "reversed" | "sorted" | "list" => {
                        return arg(0).map(|a| self.element_type(a)).unwrap_or_default();
                    }
                    _ => {}
                }
            }
        }
        if let Expr::Call(call) = iter {
            if let Expr::Attribute(attr) = call.func {
                if let T::Dict(k, v) = self.infer(attr.value) {
                    let key = k.map(|k| *k).unwrap_or_default();
                    let value = v.map(|v| *v).unwrap_or_default();
                    return match attr.attr {
                        "keys" => key,
                        "values" => value,
                        "items" => T::Tuple(vec![key, value]),
                        _ => T::Unknown,
                    };
                }
            }
        }
        match self.infer(iter) {
            T::List(Some(elem)) => *elem,
            T::Str => T::Str,
            T::Bytes => T::Int,
            T::Dict(Some(key), _) => *key,
            T::Tuple(elems) if !elems.is_empty() && elems.iter().all(|e| *e == elems[0]) => {
                elems[0].clone()
            }
            _ => T::Unknown,
        }
    }

    fn with_comprehension<R>(
        &self,
        generators: &'ast [Comprehension<'ast>],
        f: impl FnOnce(&Self) -> R,
    ) -> R {
        // Targets are resolved clause by clause, each seeing earlier ones.
        let mut scratch = TypeInferencer {
            facts: self.facts,
            vars: self.vars.clone(),
            shadow: self.shadow.clone(),
            annotated: FxHashMap::default(),
            returns: None,
            pinned_lists: FxHashSet::default(),
            opaque: FxHashSet::default(),
        };
        for clause in generators {
            let elem = scratch.element_type(clause.iter);
            scratch.shadow_target(clause.target, elem);
        }
        f(&scratch)
    }

    fn with_extra_shadow<R>(
        &self,
        extra: Vec<(&'ast str, InferredType)>,
        f: impl FnOnce(&Self) -> R,
    ) -> R {
        if extra.is_empty() {
            return f(self);
        }
        let mut shadow = self.shadow.clone();
        shadow.extend(extra);
        let scratch = TypeInferencer {
            facts: self.facts,
            vars: self.vars.clone(),
            shadow,
            annotated: FxHashMap::default(),
            returns: None,
            pinned_lists: FxHashSet::default(),
            opaque: FxHashSet::default(),
        };
        f(&scratch)
    }

    /// Push shadow entries for a comprehension target.
    pub fn shadow_target(&mut self, target: Expr<'ast>, ty: InferredType) -> usize {
        match target {
            Expr::Name(n) => {
                self.push_shadow(n.id, ty);
                1
            }
            Expr::Tuple(t) | Expr::List(t) => {
                let parts = match &ty {
                    InferredType::Tuple(elems) if elems.len() == t.elts.len() => elems.clone(),
                    _ => vec![InferredType::Unknown; t.elts.len()],
                };
                t.elts
                    .iter()
                    .zip(parts)
                    .map(|(elt, part)| self.shadow_target(*elt, part))
                    .sum()
            }
            Expr::Starred(s) => self.shadow_target(s.value, InferredType::List(None)),
            _ => 0,
        }
    }

    // ==========================================================================
    // Bodies
    // ==========================================================================

    /// Populate the variable table from a function or module body.
    ///
    /// `escapes` pins escaping list variables to an unparameterized list,
    /// since code elsewhere may store anything into them.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn analyze(&mut self, body: &'ast [Stmt<'ast>], escapes: &FxHashSet<&'ast str>) {
        self.pinned_lists = escapes.clone();
        for _ in 0..MAX_PASSES {
            let before = self.vars.clone();
            self.returns = None;
            self.analyze_body(body);
            if self.vars == before {
                return;
            }
        }
        // No fixpoint: give up on anything that kept changing.
        tracing::trace!("type inference did not converge; widening to unknown");
        for ty in self.vars.values_mut() {
            if !matches!(ty, InferredType::Int | InferredType::Float | InferredType::Str | InferredType::Bool) {
                *ty = InferredType::Unknown;
            }
        }
    }

    /// Infer a lambda body for its parameters (which stay unknown).
    pub fn analyze_expr(&mut self, expr: Expr<'ast>) {
        self.note_expr(expr);
    }

    fn analyze_body(&mut self, body: &'ast [Stmt<'ast>]) {
        for stmt in body {
            self.analyze_stmt(*stmt);
        }
    }

    fn analyze_stmt(&mut self, stmt: Stmt<'ast>) {
        use InferredType as T;

        match stmt {
            Stmt::Assign(a) => {
                self.note_expr(a.value);
                let ty = self.infer(a.value);
                for target in a.targets {
                    self.assign(*target, ty.clone(), Some(a.value));
                }
            }
            Stmt::AugAssign(a) => {
                self.note_expr(a.value);
                let value = self.infer(a.value);
                match a.target {
                    Expr::Name(n) => {
                        let current = self.var_type(n.id).boxed();
                        let ty = combine_types(&current, &value.boxed(), a.op);
                        self.bind(n.id, ty);
                    }
                    Expr::Subscript(s) => self.store_element(s.value, value),
                    _ => {}
                }
            }
            Stmt::AnnAssign(a) => {
                let declared = a.annotation.as_name().and_then(NativeType::from_annotation);
                if let (Some(native), Expr::Name(n)) = (declared, a.target) {
                    self.annotated.insert(n.id, native);
                }
                if let Some(value) = a.value {
                    self.note_expr(value);
                    let ty = match declared {
                        Some(native) => T::Native(native).boxed(),
                        None => self.infer(value),
                    };
                    self.assign(a.target, ty, Some(value));
                }
            }
            Stmt::For(f) => {
                self.note_expr(f.iter);
                let elem = self.element_type(f.iter);
                self.assign(f.target, elem, None);
                self.analyze_body(f.body);
                self.analyze_body(f.orelse);
            }
            Stmt::While(w) => {
                self.note_expr(w.test);
                self.analyze_body(w.body);
                self.analyze_body(w.orelse);
            }
            Stmt::If(i) => {
                self.note_expr(i.test);
                self.analyze_body(i.body);
                self.analyze_body(i.orelse);
            }
            Stmt::Try(t) => {
                self.analyze_body(t.body);
                for handler in t.handlers {
                    if let Some(name) = handler.name {
                        self.bind(name, T::Unknown);
                    }
                    self.analyze_body(handler.body);
                }
                self.analyze_body(t.orelse);
                self.analyze_body(t.finalbody);
            }
            Stmt::With(w) => {
                for item in w.items {
                    self.note_expr(item.context_expr);
                    if let Some(vars) = item.optional_vars {
                        self.assign(vars, T::Unknown, None);
                    }
                }
                self.analyze_body(w.body);
            }
            Stmt::Match(m) => {
                self.note_expr(m.subject);
                for case in m.cases {
                    let mut names = Vec::new();
                    case.pattern.bindings(&mut names);
                    for name in names {
                        self.bind(name, T::Unknown);
                    }
                    if let Some(guard) = case.guard {
                        self.note_expr(guard);
                    }
                    self.analyze_body(case.body);
                }
            }
            Stmt::Return(r) => {
                let ty = match r.value {
                    Some(value) => {
                        self.note_expr(value);
                        self.infer(value).boxed()
                    }
                    None => T::None,
                };
                self.returns = Some(match self.returns.take() {
                    Some(existing) => existing.join(&ty),
                    None => ty,
                });
            }
            Stmt::FunctionDef(f) => self.bind(f.name, T::Unknown),
            Stmt::ClassDef(c) => self.bind(c.name, T::Unknown),
            Stmt::Import(i) => {
                for alias in i.names {
                    self.bind(alias.bound_name(), T::Unknown);
                }
            }
            Stmt::ImportFrom(i) => {
                for alias in i.names {
                    self.bind(alias.bound_name(), T::Unknown);
                }
            }
            Stmt::Delete(d) => {
                for target in d.targets {
                    if let Expr::Name(n) = target {
                        self.bind(n.id, T::Unknown);
                    }
                }
            }
            Stmt::Expr(e) => {
                self.note_expr(e.value);
                self.note_mutation(e.value);
            }
            Stmt::Raise(r) => {
                for e in r.exc.iter().chain(&r.cause) {
                    self.note_expr(*e);
                }
            }
            Stmt::Assert(a) => self.note_expr(a.test),
            Stmt::Global(_) | Stmt::Nonlocal(_) | Stmt::Pass(_) | Stmt::Break(_) | Stmt::Continue(_) => {}
        }
    }

    /// Widen the type of a variable.
    fn bind(&mut self, name: &'ast str, ty: InferredType) {
        if self.opaque.contains(name) {
            self.vars.insert(name, InferredType::Unknown);
            return;
        }
        let mut ty = ty.boxed();
        if ty.is_list() && self.pinned_lists.contains(name) {
            ty = InferredType::List(None);
        }
        let joined = match self.vars.get(name) {
            Some(existing) => existing.boxed().join(&ty),
            None => ty,
        };
        self.vars.insert(name, joined);
    }

    fn assign(&mut self, target: Expr<'ast>, ty: InferredType, value: Option<Expr<'ast>>) {
        match target {
            Expr::Name(n) => self.bind(n.id, ty),
            Expr::Tuple(t) | Expr::List(t) => {
                let has_star = t.elts.iter().any(|e| matches!(e, Expr::Starred(_)));
                let parts: Vec<InferredType> = match (&ty, value) {
                    (_, Some(Expr::Tuple(src) | Expr::List(src)))
                        if !has_star && src.elts.len() == t.elts.len() =>
                    {
                        src.elts.iter().map(|e| self.infer(*e)).collect()
                    }
                    (InferredType::Tuple(elems), _) if !has_star && elems.len() == t.elts.len() => {
                        elems.clone()
                    }
                    _ => vec![InferredType::Unknown; t.elts.len()],
                };
                for (elt, part) in t.elts.iter().zip(parts) {
                    self.assign(*elt, part, None);
                }
            }
            Expr::Starred(s) => self.assign(s.value, InferredType::List(None), None),
            Expr::Subscript(s) => self.store_element(s.value, ty),
            _ => {}
        }
    }

    /// `xs[i] = value`, `xs.append(value)`: keep a list's element type honest.
    fn store_element(&mut self, container: Expr<'ast>, value: InferredType) {
        let Expr::Name(n) = container else {
            return;
        };
        if let Some(InferredType::List(Some(elem))) = self.vars.get(n.id) {
            if **elem != value.boxed() {
                self.vars.insert(n.id, InferredType::List(None));
            }
        }
    }

    fn note_mutation(&mut self, expr: Expr<'ast>) {
        let Expr::Call(call) = expr else {
            return;
        };
        let Expr::Attribute(attr) = call.func else {
            return;
        };
        match (attr.attr, call.args) {
            ("append", [value]) | ("insert", [_, value]) => {
                let ty = self.infer(*value);
                self.store_element(attr.value, ty);
            }
            ("extend", [other]) => {
                let elem = self.element_type(*other);
                self.store_element(attr.value, elem);
            }
            _ => {}
        }
    }

    /// Record bindings made inside an expression (`:=`, inliner lets).
    fn note_expr(&mut self, expr: Expr<'ast>) {
        let mut walker = BindingWalker::default();
        walker.walk(expr);
        for binding in walker.found {
            match binding {
                ExprBinding::Walrus(name, value) | ExprBinding::Let(name, value) => {
                    let ty = self.infer(value);
                    self.bind(name, ty);
                }
            }
        }
    }
}

enum ExprBinding<'ast> {
    Walrus(&'ast str, Expr<'ast>),
    Let(&'ast str, Expr<'ast>),
}

/// Collects `:=` and let bindings in evaluation order, outside lambdas.
#[derive(Default)]
struct BindingWalker<'ast> {
    found: Vec<ExprBinding<'ast>>,
}

impl<'ast> pyrite_ast::visitor::Visitor<'ast> for BindingWalker<'ast> {
    fn visit_expr(&mut self, expr: Expr<'ast>) {
        match expr {
            Expr::NamedExpr(n) => {
                self.visit_expr(n.value);
                self.found.push(ExprBinding::Walrus(n.target, n.value));
            }
            Expr::Let(l) => {
                for binding in l.bindings {
                    self.visit_expr(binding.value);
                    self.found.push(ExprBinding::Let(binding.name, binding.value));
                }
                self.visit_expr(l.body);
            }
            Expr::Lambda(_) => {}
            _ => pyrite_ast::visitor::walk_expr(self, expr),
        }
    }
}

impl<'ast> BindingWalker<'ast> {
    fn walk(&mut self, expr: Expr<'ast>) {
        use pyrite_ast::visitor::Visitor;
        self.visit_expr(expr);
    }
}

/// Whether a binary operation between these types has a native lowering.
pub fn native_result(left: &InferredType, right: &InferredType, op: BinaryOp) -> Option<NativeType> {
    combine_types(left, right, op).native()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;
    use pyrite_core::CmpOp;

    fn facts_for<'ast>(module: &Module<'ast>) -> (ScopeTree<'ast>, ModuleFacts<'ast>) {
        let tree = ScopeTree::build(module).unwrap();
        let facts = ModuleFacts::build(module, &tree);
        (tree, facts)
    }

    #[test]
    fn constants_and_arithmetic() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[]);
        let (_, facts) = facts_for(&module);
        let types = TypeInferencer::new(&facts);
        assert_eq!(types.infer(b.bin(b.int(1), BinaryOp::Add, b.int(2))), InferredType::Int);
        assert_eq!(types.infer(b.bin(b.int(1), BinaryOp::Div, b.int(2))), InferredType::Float);
        assert_eq!(types.infer(b.bin(b.float(1.0), BinaryOp::Mult, b.int(2))), InferredType::Float);
        assert_eq!(types.infer(b.bin(b.str("a"), BinaryOp::Add, b.str("b"))), InferredType::Str);
        assert_eq!(types.infer(b.cmp(b.int(1), CmpOp::Lt, b.int(2))), InferredType::Bool);
        assert_eq!(types.infer(b.name("unbound")), InferredType::Unknown);
    }

    #[test]
    fn forward_pass_types_loop_accumulators() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let body = b.slice(&[
            b.assign_name("total", b.int(0)),
            b.for_range(
                "i",
                &[b.int(10)],
                &[b.aug_assign(b.name("total"), BinaryOp::Add, b.name("i"))],
            ),
            b.assign_name("avg", b.bin(b.name("total"), BinaryOp::Div, b.int(10))),
        ]);
        let module = b.module(body);
        let (_, facts) = facts_for(&module);
        let mut types = TypeInferencer::new(&facts);
        types.analyze(body, &FxHashSet::default());
        assert_eq!(types.var_type("total"), InferredType::Int);
        assert_eq!(types.var_type("i"), InferredType::Int);
        assert_eq!(types.var_type("avg"), InferredType::Float);
    }

    #[test]
    fn conflicting_assignments_widen() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let body = b.slice(&[
            b.assign_name("x", b.int(0)),
            b.if_(b.name("flag"), &[b.assign_name("x", b.str("s"))], &[]),
        ]);
        let module = b.module(body);
        let (_, facts) = facts_for(&module);
        let mut types = TypeInferencer::new(&facts);
        types.analyze(body, &FxHashSet::default());
        assert_eq!(types.var_type("x"), InferredType::Unknown);
    }

    #[test]
    fn list_element_type_is_conservative() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let body = b.slice(&[
            b.assign_name("xs", b.list(&[b.int(1), b.int(2)])),
            b.assign_name("ys", b.list(&[b.int(1)])),
            b.expr_stmt(b.method_call(b.name("ys"), "append", &[b.str("oops")])),
            b.assign_name("a", b.subscript(b.name("xs"), b.int(0))),
            b.assign_name("c", b.subscript(b.name("ys"), b.int(0))),
        ]);
        let module = b.module(body);
        let (_, facts) = facts_for(&module);
        let mut types = TypeInferencer::new(&facts);
        types.analyze(body, &FxHashSet::default());
        assert_eq!(types.var_type("xs"), InferredType::list_of(InferredType::Int));
        assert_eq!(types.var_type("a"), InferredType::Int);
        assert_eq!(types.var_type("ys"), InferredType::List(None));
        assert_eq!(types.var_type("c"), InferredType::Unknown);
    }

    #[test]
    fn escaping_lists_lose_element_type() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let body = b.slice(&[b.assign_name("xs", b.list(&[b.int(1)]))]);
        let module = b.module(body);
        let (_, facts) = facts_for(&module);
        let mut types = TypeInferencer::new(&facts);
        let escapes: FxHashSet<&str> = ["xs"].into_iter().collect();
        types.analyze(body, &escapes);
        assert_eq!(types.var_type("xs"), InferredType::List(None));
    }

    #[test]
    fn parameters_shadow_builtins_and_module_functions() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[b.func("half", &["x"], &[b.ret(Some(b.name("x")))])]);
        let (_, facts) = facts_for(&module);
        let mut types = TypeInferencer::new(&facts);
        let args = b.params(&["len", "half", "xs"]);
        types.seed_params(&args);
        let body = b.slice(&[
            b.assign_name("n", b.call_name("len", &[b.name("xs")])),
            b.assign_name("h", b.call_name("half", &[b.int(1)])),
        ]);
        types.analyze(body, &FxHashSet::default());
        assert!(!types.is_builtin("len"));
        assert_eq!(types.var_type("n"), InferredType::Unknown);
        assert_eq!(types.var_type("h"), InferredType::Unknown);
    }

    #[test]
    fn rebindable_names_stay_unknown() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let body = b.slice(&[
            b.assign_name("xs", b.list(&[b.int(1), b.int(2)])),
            b.assign_name("n", b.int(0)),
        ]);
        let module = b.module(body);
        let (_, facts) = facts_for(&module);
        let mut types = TypeInferencer::new(&facts);
        types.seed_opaque(["xs"]);
        types.analyze(body, &FxHashSet::default());
        assert_eq!(types.var_type("xs"), InferredType::Unknown);
        assert_eq!(types.var_type("n"), InferredType::Int);
    }

    #[test]
    fn nonlocal_rebinding_hides_return_type() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let swap = b.func("swap", &[], &[b.nonlocal(&["xs"]), b.assign_name("xs", b.str("abc"))]);
        let module = b.module(&[b.func(
            "outer",
            &[],
            &[
                b.assign_name("xs", b.list(&[b.int(1)])),
                swap,
                b.expr_stmt(b.call_name("swap", &[])),
                b.ret(Some(b.name("xs"))),
            ],
        )]);
        let (_, facts) = facts_for(&module);
        assert_eq!(facts.return_type("outer"), Some(&InferredType::Unknown));
    }

    #[test]
    fn module_return_types_reach_call_sites() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.func("half", &["x"], &[b.ret(Some(b.bin(b.name("x"), BinaryOp::Div, b.int(2))))]),
            b.func("name", &[], &[b.ret(Some(b.str("pyrite")))]),
            b.class("Point", &[], &[b.pass()]),
        ]);
        let (_, facts) = facts_for(&module);
        let types = TypeInferencer::new(&facts);
        assert_eq!(types.infer(b.call_name("half", &[b.int(3)])), InferredType::Float);
        assert_eq!(types.infer(b.call_name("name", &[])), InferredType::Str);
        assert_eq!(
            types.infer(b.call_name("Point", &[])),
            InferredType::Class("Point".to_string())
        );
        assert_eq!(types.infer(b.call_name("len", &[b.name("x")])), InferredType::Int);
    }

    #[test]
    fn comprehension_targets_are_scoped() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let comp = b.list_comp(
            b.bin(b.name("v"), BinaryOp::Mult, b.float(2.0)),
            &[b.comprehension(b.name("v"), b.call_name("range", &[b.int(3)]), &[])],
        );
        let module = b.module(&[]);
        let (_, facts) = facts_for(&module);
        let types = TypeInferencer::new(&facts);
        assert_eq!(types.infer(comp), InferredType::list_of(InferredType::Float));
        assert_eq!(types.var_type("v"), InferredType::Unknown);
    }

    #[test]
    fn inference_is_idempotent() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let body = b.slice(&[
            b.assign_name("n", b.int(1)),
            b.while_(
                b.cmp(b.name("n"), CmpOp::Lt, b.int(100)),
                &[b.assign_name("n", b.bin(b.name("n"), BinaryOp::Mult, b.int(2)))],
                &[],
            ),
        ]);
        let module = b.module(body);
        let (_, facts) = facts_for(&module);
        let mut first = TypeInferencer::new(&facts);
        first.analyze(body, &FxHashSet::default());
        let mut second = TypeInferencer::new(&facts);
        second.analyze(body, &FxHashSet::default());
        second.analyze(body, &FxHashSet::default());
        assert_eq!(first.typed_vars(), second.typed_vars());
    }

    #[test]
    fn walrus_binds_in_expression_position() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let body = b.slice(&[b.if_(
            b.cmp(b.named("k", b.float(0.5)), CmpOp::Gt, b.int(0)),
            &[b.pass()],
            &[],
        )]);
        let module = b.module(body);
        let (_, facts) = facts_for(&module);
        let mut types = TypeInferencer::new(&facts);
        types.analyze(body, &FxHashSet::default());
        assert_eq!(types.var_type("k"), InferredType::Float);
    }
}
