//! Displays and comprehensions.
//!
//! List and tuple displays without starred elements are built inline with
//! `array.new_fixed`. Starred elements, sets and dicts go through the runtime
//! collection operations.
//!
//! Comprehensions compile to inline loops in the enclosing function. Their
//! targets live in fresh temporaries, so they neither leak into nor clobber
//! the function's own variables, while `:=` inside them still binds in the
//! function scope.

use pyrite_ast::*;
use pyrite_core::{Result, Span};

use crate::function_compiler::FunctionCompiler;
use crate::scope::LocalType;
use crate::stmt::IterState;

/// What each comprehension iteration adds to the result.
#[derive(Debug, Clone, Copy)]
enum Element<'ast> {
    List(Expr<'ast>),
    Set(Expr<'ast>),
    Dict(Expr<'ast>, Expr<'ast>),
}

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    pub(crate) fn compile_list(&mut self, s: &'ast SequenceExpr<'ast>) -> Result<()> {
        if s.elts.iter().any(|e| matches!(e, Expr::Starred(_))) {
            return self.compile_starred_list(s.elts, s.span);
        }
        for elt in s.elts {
            self.compile_expr(*elt)?;
        }
        self.emit(format!("array.new_fixed $ARRAY_ANY {}", s.elts.len()));
        self.emit(format!("i32.const {}", s.elts.len()));
        self.emit("struct.new $LIST");
        Ok(())
    }

    pub(crate) fn compile_tuple(&mut self, s: &'ast SequenceExpr<'ast>) -> Result<()> {
        if s.elts.iter().any(|e| matches!(e, Expr::Starred(_))) {
            self.compile_starred_list(s.elts, s.span)?;
            return self.rt("list_to_tuple", s.span);
        }
        for elt in s.elts {
            self.compile_expr(*elt)?;
        }
        self.push_tuple(s.elts.len());
        Ok(())
    }

    fn compile_starred_list(&mut self, elts: &'ast [Expr<'ast>], span: Span) -> Result<()> {
        let list = self.temp(LocalType::Any);
        self.rt("list_new", span)?;
        self.emit(format!("local.set {list}"));
        for elt in elts {
            self.emit(format!("local.get {list}"));
            match elt {
                Expr::Starred(starred) => {
                    self.compile_expr(starred.value)?;
                    self.rt("list_extend", starred.span)?;
                }
                other => {
                    self.compile_expr(*other)?;
                    self.rt("list_append", span)?;
                }
            }
        }
        self.emit(format!("local.get {list}"));
        Ok(())
    }

    pub(crate) fn compile_set(&mut self, s: &'ast SequenceExpr<'ast>) -> Result<()> {
        let set = self.temp(LocalType::Any);
        self.rt("set_new", s.span)?;
        self.emit(format!("local.set {set}"));
        for elt in s.elts {
            match elt {
                Expr::Starred(starred) => {
                    let iter = IterState::new(self);
                    self.compile_expr(starred.value)?;
                    iter.emit_setup(self, starred.span)?;
                    let exhausted = self.label("exhausted");
                    let next = self.label("next");
                    let item = self.temp(LocalType::Any);
                    self.emitter.block(&exhausted, None);
                    self.emitter.loop_(&next);
                    iter.emit_next(self, &item, &exhausted, starred.span)?;
                    self.emit(format!("local.get {set}"));
                    self.emit(format!("local.get {item}"));
                    self.rt("set_add", starred.span)?;
                    self.emit(format!("br {next}"));
                    self.emitter.end();
                    self.emitter.end();
                }
                other => {
                    self.emit(format!("local.get {set}"));
                    self.compile_expr(*other)?;
                    self.rt("set_add", s.span)?;
                }
            }
        }
        self.emit(format!("local.get {set}"));
        Ok(())
    }

    pub(crate) fn compile_dict(&mut self, d: &'ast DictExpr<'ast>) -> Result<()> {
        let dict = self.temp(LocalType::Any);
        self.rt("dict_new", d.span)?;
        self.emit(format!("local.set {dict}"));
        for (key, value) in d.keys.iter().zip(d.values) {
            self.emit(format!("local.get {dict}"));
            match key {
                Some(key) => {
                    self.compile_expr(*key)?;
                    self.compile_expr(*value)?;
                    self.rt("dict_set", d.span)?;
                }
                None => {
                    self.compile_expr(*value)?;
                    self.rt("dict_update", d.span)?;
                }
            }
        }
        self.emit(format!("local.get {dict}"));
        Ok(())
    }

    // ==========================================================================
    // Comprehensions
    // ==========================================================================

    pub(crate) fn compile_list_comp(&mut self, c: &'ast ComprehensionExpr<'ast>) -> Result<()> {
        self.compile_comprehension("list_new", Element::List(c.elt), c.generators, c.span)
    }

    pub(crate) fn compile_set_comp(&mut self, c: &'ast ComprehensionExpr<'ast>) -> Result<()> {
        self.compile_comprehension("set_new", Element::Set(c.elt), c.generators, c.span)
    }

    pub(crate) fn compile_dict_comp(&mut self, c: &'ast DictCompExpr<'ast>) -> Result<()> {
        self.compile_comprehension("dict_new", Element::Dict(c.key, c.value), c.generators, c.span)
    }

    fn compile_comprehension(
        &mut self,
        constructor: &str,
        element: Element<'ast>,
        generators: &'ast [Comprehension<'ast>],
        span: Span,
    ) -> Result<()> {
        let result = self.named_temp("comp", LocalType::Any);
        self.rt(constructor, span)?;
        self.emit(format!("local.set {result}"));
        self.compile_clauses(&result, element, generators, span)?;
        self.emit(format!("local.get {result}"));
        Ok(())
    }

    /// One nested loop per `for` clause, innermost adding the element.
    fn compile_clauses(
        &mut self,
        result: &str,
        element: Element<'ast>,
        generators: &'ast [Comprehension<'ast>],
        span: Span,
    ) -> Result<()> {
        let Some((clause, rest)) = generators.split_first() else {
            return self.add_element(result, element, span);
        };

        // The iterable is evaluated before the clause's own target exists.
        let iter = IterState::new(self);
        self.compile_expr(clause.iter)?;
        iter.emit_setup(self, span)?;

        let element_type = self.types.element_type(clause.iter);
        let shadows = self.types.shadow_target(clause.target, element_type);
        let targets = self.push_comprehension_target(clause.target);

        let exhausted = self.label("exhausted");
        let next = self.label("next");
        let item = self.temp(LocalType::Any);
        self.emitter.block(&exhausted, None);
        self.emitter.loop_(&next);
        iter.emit_next(self, &item, &exhausted, span)?;
        let outcome = self.store_target(clause.target, &item, span).and_then(|()| {
            for cond in clause.ifs {
                self.compile_condition(*cond)?;
                self.emit("i32.eqz");
                self.emit(format!("br_if {next}"));
            }
            self.compile_clauses(result, element, rest, span)
        });
        self.pop_comprehension_targets(targets);
        for _ in 0..shadows {
            self.types.pop_shadow();
        }
        outcome?;
        self.emit(format!("br {next}"));
        self.emitter.end();
        self.emitter.end();
        Ok(())
    }

    fn add_element(&mut self, result: &str, element: Element<'ast>, span: Span) -> Result<()> {
        self.emit(format!("local.get {result}"));
        match element {
            Element::List(elt) => {
                self.compile_expr(elt)?;
                self.rt("list_append", span)
            }
            Element::Set(elt) => {
                self.compile_expr(elt)?;
                self.rt("set_add", span)
            }
            Element::Dict(key, value) => {
                self.compile_expr(key)?;
                self.compile_expr(value)?;
                self.rt("dict_set", span)
            }
        }
    }
}
