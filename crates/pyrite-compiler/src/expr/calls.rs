//! Call lowering.
//!
//! Calls are tried against progressively more general shapes:
//!
//! 1. host interop (`js.op(...)`, `handle.op(...)`)
//! 2. builtins with a dedicated lowering (`len`, `isinstance`, `super`, ...)
//! 3. direct calls to module functions with a fixed positional signature
//! 4. method calls through `call_method`
//! 5. closures through `call_indirect`, anything else through `call_value`

use pyrite_ast::*;
use pyrite_core::{CompileError, InferredType, Result, Span};

use crate::context::direct_name;
use crate::function_compiler::{FunctionCompiler, NameSlot};
use crate::runtime::builtin_func_name;
use crate::scope::LocalType;

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    pub(crate) fn compile_call(&mut self, call: &'ast CallExpr<'ast>) -> Result<()> {
        if self.compile_host_call(call)? || self.compile_host_method(call)? {
            return Ok(());
        }
        match call.func {
            Expr::Name(n) if n.id == "super" && matches!(self.resolve(n.id, n.span), Ok(None)) => {
                if !call.keywords.is_empty() {
                    return Err(CompileError::unsupported("super() takes no keyword arguments", call.span));
                }
                self.compile_super(call)
            }
            Expr::Name(n) if self.is_builtin_name(n.id, n.span) => {
                if self.compile_builtin_call(n.id, call)? {
                    return Ok(());
                }
                self.compile_arg_chain(call.args, call.keywords, call.span)?;
                self.emit("ref.null $ENV");
                self.emit(format!("call {}", builtin_func_name(n.id)));
                Ok(())
            }
            Expr::Name(n) if self.direct_call_target(n.id, call).is_some() => {
                let Some(index) = self.direct_call_target(n.id, call) else {
                    return Err(CompileError::internal("direct target vanished", call.span));
                };
                for arg in call.args {
                    self.compile_expr(*arg)?;
                }
                self.emit(format!("call {}", direct_name(index)));
                Ok(())
            }
            Expr::Attribute(attr) => self.compile_method_call(attr, call),
            callee => {
                let func = self.temp(LocalType::Any);
                let args = self.temp(LocalType::Any);
                self.compile_expr(callee)?;
                self.emit(format!("local.set {func}"));
                self.compile_arg_chain(call.args, call.keywords, call.span)?;
                self.emit(format!("local.set {args}"));
                self.emit_dynamic_call(&func, &args, call.span)
            }
        }
    }

    /// Call the value in `func` with the argument chain in `args`.
    pub(crate) fn emit_dynamic_call(&mut self, func: &str, args: &str, span: Span) -> Result<()> {
        self.emit(format!("local.get {func}"));
        self.emit("ref.test (ref $CLOSURE)");
        self.emitter.if_(Some("(ref null eq)"));
        self.emit(format!("local.get {args}"));
        self.emit(format!("local.get {func}"));
        self.emit("ref.cast (ref $CLOSURE)");
        self.emit("struct.get $CLOSURE $env");
        self.emit(format!("local.get {func}"));
        self.emit("ref.cast (ref $CLOSURE)");
        self.emit("struct.get $CLOSURE $idx");
        self.emit("call_indirect $table (type $FUNC)");
        self.emitter.else_();
        self.emit(format!("local.get {func}"));
        self.emit(format!("local.get {args}"));
        self.rt("call_value", span)?;
        self.emitter.end();
        Ok(())
    }

    /// The function index for a direct call, when `name` is a registered
    /// module function and the call matches its positional arity exactly.
    fn direct_call_target(&self, name: &str, call: &CallExpr<'ast>) -> Option<u32> {
        let target = self.ctx.direct_target(name)?;
        if !call.keywords.is_empty() || call.has_starred() || call.args.len() != target.arity {
            return None;
        }
        match self.resolve(name, call.span) {
            Ok(Some(NameSlot::Global(_))) => Some(target.index),
            Ok(Some(NameSlot::Local(_))) if self.scope_id == 0 => Some(target.index),
            _ => None,
        }
    }

    // ==========================================================================
    // Argument Chains
    // ==========================================================================

    /// Push the `$PAIR` chain for a call's arguments, with keyword arguments
    /// in a trailing `$KWARGS` element.
    pub(crate) fn compile_arg_chain(
        &mut self,
        args: &'ast [Expr<'ast>],
        keywords: &'ast [Keyword<'ast>],
        span: Span,
    ) -> Result<()> {
        if !args.iter().any(|a| matches!(a, Expr::Starred(_))) {
            for arg in args {
                self.compile_expr(*arg)?;
            }
            let has_keywords = !keywords.is_empty();
            if has_keywords {
                self.compile_kwargs_record(keywords, span)?;
            }
            self.push_chain(args.len() + has_keywords as usize);
            return Ok(());
        }

        let acc = self.named_temp("chain", LocalType::Any);
        self.push_none();
        self.emit(format!("local.set {acc}"));
        let mut pending = 0;
        for arg in args {
            match arg {
                Expr::Starred(s) => {
                    if pending > 0 {
                        self.flush_chain_segment(&acc, pending, span)?;
                        pending = 0;
                    }
                    self.emit(format!("local.get {acc}"));
                    self.compile_expr(s.value)?;
                    self.rt("iter_to_chain", s.span)?;
                    self.rt("chain_concat", s.span)?;
                    self.emit(format!("local.set {acc}"));
                }
                _ => {
                    if pending == 0 {
                        self.emit(format!("local.get {acc}"));
                    }
                    self.compile_expr(*arg)?;
                    pending += 1;
                }
            }
        }
        if !keywords.is_empty() {
            if pending == 0 {
                self.emit(format!("local.get {acc}"));
            }
            self.compile_kwargs_record(keywords, span)?;
            pending += 1;
        }
        if pending > 0 {
            self.push_chain(pending);
            self.rt("chain_concat", span)?;
        } else {
            self.emit(format!("local.get {acc}"));
        }
        Ok(())
    }

    /// With `acc` and `count` values on the stack, append them to `acc`.
    fn flush_chain_segment(&mut self, acc: &str, count: usize, span: Span) -> Result<()> {
        self.push_chain(count);
        self.rt("chain_concat", span)?;
        self.emit(format!("local.set {acc}"));
        Ok(())
    }

    /// Push a `$KWARGS` record holding the keyword arguments.
    fn compile_kwargs_record(&mut self, keywords: &'ast [Keyword<'ast>], span: Span) -> Result<()> {
        let dict = self.named_temp("kwargs", LocalType::Any);
        self.compile_keywords_into_dict(&dict, keywords, span)?;
        self.emit(format!("local.get {dict}"));
        self.emit("ref.cast (ref $DICT)");
        self.emit("struct.new $KWARGS");
        Ok(())
    }

    /// Create a dict in `dict` and store every keyword argument in it.
    fn compile_keywords_into_dict(&mut self, dict: &str, keywords: &'ast [Keyword<'ast>], span: Span) -> Result<()> {
        self.rt("dict_new", span)?;
        self.emit(format!("local.set {dict}"));
        for keyword in keywords {
            self.emit(format!("local.get {dict}"));
            match keyword.arg {
                Some(name) => {
                    self.push_str(name);
                    self.compile_expr(keyword.value)?;
                    self.rt("dict_set", keyword.span)?;
                }
                None => {
                    self.compile_expr(keyword.value)?;
                    self.rt("dict_update", keyword.span)?;
                }
            }
        }
        Ok(())
    }

    // ==========================================================================
    // Methods
    // ==========================================================================

    fn compile_method_call(&mut self, attr: &'ast AttributeExpr<'ast>, call: &'ast CallExpr<'ast>) -> Result<()> {
        let plain = call.keywords.is_empty() && !call.has_starred();
        if plain && attr.attr == "append" && call.args.len() == 1 && self.is_known_list(attr.value) {
            self.compile_expr(attr.value)?;
            self.compile_expr(call.args[0])?;
            self.rt("list_append", call.span)?;
            self.push_none();
            return Ok(());
        }
        if attr.attr == "sort"
            && call.args.is_empty()
            && !call.keywords.is_empty()
            && self.is_known_list(attr.value)
        {
            self.compile_expr(attr.value)?;
            self.compile_sort_keywords(call)?;
            self.rt("list_sort", call.span)?;
            self.push_none();
            return Ok(());
        }
        self.compile_expr(attr.value)?;
        self.push_str(attr.attr);
        self.compile_arg_chain(call.args, call.keywords, call.span)?;
        self.rt("call_method", call.span)
    }

    /// Push `key` (or None) and the `reverse` flag as `i32`.
    fn compile_sort_keywords(&mut self, call: &'ast CallExpr<'ast>) -> Result<()> {
        for keyword in call.keywords {
            if !matches!(keyword.arg, Some("key" | "reverse")) {
                return Err(CompileError::unsupported(
                    format!(
                        "unsupported sort keyword '{}'",
                        keyword.arg.unwrap_or("**")
                    ),
                    keyword.span,
                ));
            }
        }
        match call.keyword("key") {
            Some(key) => self.compile_expr(key.value)?,
            None => self.push_none(),
        }
        match call.keyword("reverse") {
            Some(reverse) => self.compile_condition(reverse.value)?,
            None => self.emit("i32.const 0"),
        }
        Ok(())
    }

    // ==========================================================================
    // Builtins
    // ==========================================================================

    /// Builtins with a dedicated lowering. Returns `false` to fall back to the
    /// imported builtin.
    fn compile_builtin_call(&mut self, name: &str, call: &'ast CallExpr<'ast>) -> Result<bool> {
        let positional = !call.has_starred();
        let no_keywords = call.keywords.is_empty();
        match name {
            "print" if positional && !no_keywords => {
                for keyword in call.keywords {
                    if !matches!(keyword.arg, Some("sep" | "end")) {
                        return Err(CompileError::unsupported(
                            format!("unsupported print keyword '{}'", keyword.arg.unwrap_or("**")),
                            keyword.span,
                        ));
                    }
                }
                self.compile_arg_chain(call.args, &[], call.span)?;
                for key in ["sep", "end"] {
                    match call.keyword(key) {
                        Some(k) => self.compile_expr(k.value)?,
                        None => self.push_none(),
                    }
                }
                self.rt("print_with_sep_end", call.span)?;
                self.push_none();
                Ok(true)
            }
            "len" if positional && no_keywords && call.args.len() == 1 => {
                let arg = call.args[0];
                if self.is_known_list(arg) {
                    self.compile_expr(arg)?;
                    self.emit("ref.cast (ref $LIST)");
                    self.emit("struct.get $LIST $len");
                    self.emit("ref.i31");
                    return Ok(true);
                }
                match self.inferred(arg) {
                    InferredType::Str | InferredType::Tuple(_) | InferredType::Dict(..) | InferredType::Bytes => {
                        self.compile_expr(arg)?;
                        self.rt("sequence_length", call.span)?;
                        self.emit("ref.i31");
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
            "isinstance" if positional && no_keywords && call.args.len() == 2 => {
                self.compile_isinstance(call)?;
                self.box_condition();
                Ok(true)
            }
            "sorted" if positional && !no_keywords && call.args.len() == 1 => {
                self.compile_expr(call.args[0])?;
                self.compile_sort_keywords(call)?;
                self.rt("sorted_with_key", call.span)?;
                Ok(true)
            }
            "min" | "max" if positional && call.keywords.len() == 1 && call.keyword("key").is_some() => {
                match call.args {
                    [single] => self.compile_expr(*single)?,
                    many => {
                        for arg in many {
                            self.compile_expr(*arg)?;
                        }
                        self.push_tuple(many.len());
                    }
                }
                if let Some(key) = call.keyword("key") {
                    self.compile_expr(key.value)?;
                }
                self.rt(if name == "min" { "min_with_key" } else { "max_with_key" }, call.span)?;
                Ok(true)
            }
            "enumerate" if positional && call.args.len() == 1 && call.keywords.len() == 1 => {
                let Some(start) = call.keyword("start") else {
                    return Ok(false);
                };
                self.compile_expr(call.args[0])?;
                self.compile_expr(start.value)?;
                self.push_chain(2);
                self.emit("ref.null $ENV");
                self.emit(format!("call {}", builtin_func_name("enumerate")));
                Ok(true)
            }
            "dict" if positional && !no_keywords && call.args.len() <= 1 => {
                let dict = self.named_temp("dict", LocalType::Any);
                self.rt("dict_new", call.span)?;
                self.emit(format!("local.set {dict}"));
                if let Some(source) = call.args.first() {
                    self.emit(format!("local.get {dict}"));
                    self.compile_expr(*source)?;
                    self.rt("dict_update", call.span)?;
                }
                for keyword in call.keywords {
                    self.emit(format!("local.get {dict}"));
                    match keyword.arg {
                        Some(key) => {
                            self.push_str(key);
                            self.compile_expr(keyword.value)?;
                            self.rt("dict_set", keyword.span)?;
                        }
                        None => {
                            self.compile_expr(keyword.value)?;
                            self.rt("dict_update", keyword.span)?;
                        }
                    }
                }
                self.emit(format!("local.get {dict}"));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Calls whose `i32` result can feed a branch directly.
    pub(crate) fn compile_call_condition(&mut self, call: &'ast CallExpr<'ast>) -> Result<bool> {
        match call.func {
            Expr::Name(n)
                if n.id == "isinstance"
                    && call.args.len() == 2
                    && call.keywords.is_empty()
                    && !call.has_starred()
                    && self.is_builtin_name(n.id, n.span) =>
            {
                self.compile_isinstance(call)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn compile_isinstance(&mut self, call: &'ast CallExpr<'ast>) -> Result<()> {
        self.compile_expr(call.args[0])?;
        self.compile_expr(call.args[1])?;
        self.rt("isinstance", call.span)
    }

    /// `super()` inside a method, or the explicit `super(C, obj)`.
    fn compile_super(&mut self, call: &'ast CallExpr<'ast>) -> Result<()> {
        match call.args {
            [] => {
                let (Some(class), Some(receiver)) = (self.class_name, self.self_param) else {
                    return Err(CompileError::unsupported(
                        "super() without arguments outside a method",
                        call.span,
                    ));
                };
                self.load_name(class, call.span)?;
                self.load_name(receiver, call.span)?;
            }
            [class, receiver] => {
                self.compile_expr(*class)?;
                self.compile_expr(*receiver)?;
            }
            _ => {
                return Err(CompileError::unsupported(
                    "super() takes zero or two arguments",
                    call.span,
                ));
            }
        }
        self.rt("make_super", call.span)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{compile_function_text, compile_module_text};
    use bumpalo::Bump;
    use pyrite_ast::*;

    #[test]
    fn known_function_gets_direct_call() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.func("double", &["n"], &[b.ret(Some(b.name("n")))]),
            b.func("run", &[], &[b.ret(Some(b.call_name("double", &[b.int(4)])))]),
        ]);
        let text = compile_module_text(&b, module);
        assert!(text.contains("call $user_func_1_direct"));
    }

    #[test]
    fn unknown_callee_dispatches_on_closure_test() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func("apply", &["f", "x"], &[b.ret(Some(b.call(b.name("f"), &[b.name("x")])))]);
        let text = compile_function_text(&b, def, "apply");
        assert!(text.contains("ref.test (ref $CLOSURE)"));
        assert!(text.contains("call_indirect $table (type $FUNC)"));
        assert!(text.contains("call $call_value"));
    }

    #[test]
    fn keywords_travel_in_kwargs_record() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let call = b.call_kw(b.name("f"), &[b.int(1)], &[b.keyword("scale", b.int(2))]);
        let def = b.func("run", &["f"], &[b.ret(Some(call))]);
        let text = compile_function_text(&b, def, "run");
        assert!(text.contains("call $dict_new"));
        assert!(text.contains("struct.new $KWARGS"));
    }

    #[test]
    fn starred_arguments_concatenate_chains() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let call = b.call(b.name("f"), &[b.int(1), b.starred(b.name("rest"))]);
        let def = b.func("run", &["f", "rest"], &[b.ret(Some(call))]);
        let text = compile_function_text(&b, def, "run");
        assert!(text.contains("call $iter_to_chain"));
        assert!(text.contains("call $chain_concat"));
    }

    #[test]
    fn print_keywords_use_sep_end_entry() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let call = b.call_kw(b.name("print"), &[b.int(1)], &[b.keyword("end", b.str(""))]);
        let def = b.func("show", &[], &[b.expr_stmt(call)]);
        let text = compile_function_text(&b, def, "show");
        assert!(text.contains("call $print_with_sep_end"));
    }

    #[test]
    fn append_on_known_list_skips_method_dispatch() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "build",
            &[],
            &[
                b.assign_name("out", b.list(&[])),
                b.expr_stmt(b.method_call(b.name("out"), "append", &[b.int(1)])),
                b.ret(Some(b.name("out"))),
            ],
        );
        let text = compile_function_text(&b, def, "build");
        assert!(text.contains("call $list_append"));
        assert!(!text.contains("call $call_method"));
    }

    #[test]
    fn len_of_nonlocal_rebound_list_stays_generic() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let swap = b.func("swap", &[], &[b.nonlocal(&["xs"]), b.assign_name("xs", b.str("abc"))]);
        let def = b.func(
            "outer",
            &[],
            &[
                b.assign_name("xs", b.list(&[b.int(1), b.int(2)])),
                swap,
                b.expr_stmt(b.call_name("swap", &[])),
                b.ret(Some(b.call_name("len", &[b.name("xs")]))),
            ],
        );
        let text = compile_function_text(&b, def, "outer");
        assert!(!text.contains("struct.get $LIST $len"));
        assert!(!text.contains("ref.cast (ref $LIST)"));
    }

    #[test]
    fn parameter_named_like_builtin_is_called_dynamically() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let def = b.func(
            "g",
            &["len", "xs"],
            &[
                b.assign_name("n", b.call_name("len", &[b.name("xs")])),
                b.if_(
                    b.cmp(b.name("n"), pyrite_core::CmpOp::Gt, b.int(2)),
                    &[b.expr_stmt(b.call_name("print", &[b.str("big")]))],
                    &[],
                ),
            ],
        );
        let text = compile_function_text(&b, def, "g");
        assert!(text.contains("call_indirect $table (type $FUNC)"));
        assert!(!text.contains("$n_n"));
        assert!(!text.contains("call $to_i64"));
        assert!(!text.contains("call $sequence_length"));
    }
}
