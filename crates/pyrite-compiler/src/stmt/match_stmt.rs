//! `match` statements.
//!
//! Every case is a block that the pattern code leaves with `br` to the
//! case's fail label as soon as a test fails. Captures are stored while
//! matching, so a case that fails after a partial match may leave some of
//! its names bound, as in CPython.

use pyrite_ast::*;
use pyrite_core::{CompileError, Result};

use crate::function_compiler::FunctionCompiler;
use crate::scope::LocalType;

impl<'a, 'c, 'ast> FunctionCompiler<'a, 'c, 'ast> {
    pub(crate) fn compile_match(&mut self, m: &'ast MatchStmt<'ast>) -> Result<()> {
        let subject = self.named_temp("subj", LocalType::Any);
        self.compile_expr(m.subject)?;
        self.emit(format!("local.set {subject}"));

        let end = self.label("match_end");
        self.emitter.block(&end, None);
        for (i, case) in m.cases.iter().enumerate() {
            let last = i + 1 == m.cases.len();
            if !last && case.guard.is_none() && case.pattern.is_irrefutable() {
                return Err(CompileError::unsupported(
                    "irrefutable pattern makes remaining patterns unreachable",
                    case.pattern.span(),
                ));
            }
            let fail = self.label("case_fail");
            self.emitter.block(&fail, None);
            self.compile_pattern(case.pattern, &subject, &fail)?;
            if let Some(guard) = case.guard {
                self.compile_condition(guard)?;
                self.emit("i32.eqz");
                self.emit(format!("br_if {fail}"));
            }
            self.compile_body(case.body)?;
            self.emit(format!("br {end}"));
            self.emitter.end();
        }
        self.emitter.end();
        Ok(())
    }

    /// Match the value in `subject`, branching to `fail` on mismatch.
    fn compile_pattern(&mut self, pattern: Pattern<'ast>, subject: &str, fail: &str) -> Result<()> {
        match pattern {
            Pattern::Value(p) => {
                self.emit(format!("local.get {subject}"));
                self.compile_expr(p.value)?;
                self.rt("values_equal", p.span)?;
                self.fail_unless(fail);
                Ok(())
            }
            Pattern::Singleton(p) => {
                self.emit(format!("local.get {subject}"));
                match p.value {
                    Constant::None => self.emit("ref.is_null"),
                    Constant::Bool(b) => {
                        self.push_bool(b);
                        self.emit("ref.eq");
                    }
                    _ => {
                        return Err(CompileError::internal("singleton pattern of a non-singleton", p.span));
                    }
                }
                self.fail_unless(fail);
                Ok(())
            }
            Pattern::As(p) => {
                if let Some(inner) = p.pattern {
                    self.compile_pattern(inner, subject, fail)?;
                }
                if let Some(name) = p.name {
                    self.emit(format!("local.get {subject}"));
                    self.store_name(name, p.span)?;
                }
                Ok(())
            }
            Pattern::Or(p) => {
                let Some((last, alternatives)) = p.patterns.split_last() else {
                    return Ok(());
                };
                let matched = self.label("or_ok");
                self.emitter.block(&matched, None);
                for alt in alternatives {
                    let next = self.label("alt_fail");
                    self.emitter.block(&next, None);
                    self.compile_pattern(*alt, subject, &next)?;
                    self.emit(format!("br {matched}"));
                    self.emitter.end();
                }
                self.compile_pattern(*last, subject, fail)?;
                self.emitter.end();
                Ok(())
            }
            Pattern::Sequence(p) => self.compile_sequence_pattern(p, subject, fail),
            Pattern::Mapping(p) => self.compile_mapping_pattern(p, subject, fail),
            Pattern::Class(p) => self.compile_class_pattern(p, subject, fail),
            Pattern::Star(p) => Err(CompileError::unsupported(
                "star pattern outside a sequence pattern",
                p.span,
            )),
        }
    }

    fn fail_unless(&mut self, fail: &str) {
        self.emit("i32.eqz");
        self.emit(format!("br_if {fail}"));
    }

    /// Match `pattern` against the value on the stack.
    fn match_stacked(&mut self, pattern: Pattern<'ast>, fail: &str) -> Result<()> {
        let item = self.temp(LocalType::Any);
        self.emit(format!("local.set {item}"));
        self.compile_pattern(pattern, &item, fail)
    }

    fn compile_sequence_pattern(
        &mut self,
        p: &'ast SequencePattern<'ast>,
        subject: &str,
        fail: &str,
    ) -> Result<()> {
        let star = p.star_index();
        let count = p.patterns.len();
        self.emit(format!("local.get {subject}"));
        self.rt("is_sequence", p.span)?;
        self.fail_unless(fail);

        let len = self.named_temp("len", LocalType::I32);
        self.emit(format!("local.get {subject}"));
        self.rt("sequence_length", p.span)?;
        self.emit(format!("local.tee {len}"));
        match star {
            Some(_) => {
                self.emit(format!("i32.const {}", count - 1));
                self.emit("i32.lt_s");
            }
            None => {
                self.emit(format!("i32.const {count}"));
                self.emit("i32.ne");
            }
        }
        self.emit(format!("br_if {fail}"));

        for (i, sub) in p.patterns.iter().enumerate() {
            match (star, sub) {
                (_, Pattern::Star(s)) => {
                    let Some(name) = s.name else {
                        continue;
                    };
                    // Everything between the fixed prefix and suffix.
                    self.emit(format!("local.get {subject}"));
                    self.emit(format!("i32.const {i}"));
                    self.emit(format!("local.get {len}"));
                    self.emit(format!("i32.const {}", count - 1 - i));
                    self.emit("i32.sub");
                    self.rt("sequence_rest", s.span)?;
                    self.store_name(name, s.span)?;
                }
                _ if sub.is_wildcard() => {}
                (Some(k), _) if i > k => {
                    self.emit(format!("local.get {subject}"));
                    self.emit(format!("local.get {len}"));
                    self.emit(format!("i32.const {}", count - i));
                    self.emit("i32.sub");
                    self.rt("sequence_get", p.span)?;
                    self.match_stacked(*sub, fail)?;
                }
                _ => {
                    self.emit(format!("local.get {subject}"));
                    self.emit(format!("i32.const {i}"));
                    self.rt("sequence_get", p.span)?;
                    self.match_stacked(*sub, fail)?;
                }
            }
        }
        Ok(())
    }

    fn compile_mapping_pattern(
        &mut self,
        p: &'ast MappingPattern<'ast>,
        subject: &str,
        fail: &str,
    ) -> Result<()> {
        self.emit(format!("local.get {subject}"));
        self.rt("is_mapping", p.span)?;
        self.fail_unless(fail);

        for (key, sub) in p.keys.iter().zip(p.patterns) {
            self.emit(format!("local.get {subject}"));
            self.compile_expr(*key)?;
            self.rt("dict_contains", p.span)?;
            self.fail_unless(fail);
            self.emit(format!("local.get {subject}"));
            self.compile_expr(*key)?;
            self.rt("dict_get", p.span)?;
            self.match_stacked(*sub, fail)?;
        }

        if let Some(rest) = p.rest {
            self.emit(format!("local.get {subject}"));
            for key in p.keys {
                self.compile_expr(*key)?;
            }
            self.push_tuple(p.keys.len());
            self.rt("dict_without_keys", p.span)?;
            self.store_name(rest, p.span)?;
        }
        Ok(())
    }

    fn compile_class_pattern(&mut self, p: &'ast ClassPattern<'ast>, subject: &str, fail: &str) -> Result<()> {
        let cls = self.temp(LocalType::Any);
        self.compile_expr(p.cls)?;
        self.emit(format!("local.set {cls}"));
        self.emit(format!("local.get {subject}"));
        self.emit(format!("local.get {cls}"));
        self.rt("isinstance", p.span)?;
        self.fail_unless(fail);

        if !p.patterns.is_empty() {
            // `__match_args__` lookup; raises TypeError when too few.
            let positional = self.named_temp("pos", LocalType::Any);
            self.emit(format!("local.get {subject}"));
            self.emit(format!("local.get {cls}"));
            self.emit(format!("i32.const {}", p.patterns.len()));
            self.rt("match_positional", p.span)?;
            self.emit(format!("local.set {positional}"));
            for (i, sub) in p.patterns.iter().enumerate() {
                if sub.is_wildcard() {
                    continue;
                }
                self.emit(format!("local.get {positional}"));
                self.emit(format!("i32.const {i}"));
                self.rt("sequence_get", p.span)?;
                self.match_stacked(*sub, fail)?;
            }
        }

        for (attr, sub) in p.kwd_attrs.iter().zip(p.kwd_patterns) {
            self.emit(format!("local.get {subject}"));
            self.push_str(attr);
            self.rt("object_hasattr", p.span)?;
            self.fail_unless(fail);
            if sub.is_wildcard() {
                continue;
            }
            self.emit(format!("local.get {subject}"));
            self.emit_getattr(attr, p.span)?;
            self.match_stacked(*sub, fail)?;
        }
        Ok(())
    }
}
