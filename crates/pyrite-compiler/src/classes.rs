//! Class registry and slotted layouts.
//!
//! Module-level classes are registered before code generation so that
//! attribute lowering in any function can consult them. A class gets a
//! fixed-layout record ([`SlotLayout`]) when it declares string-only
//! `__slots__`, has no bases, decorators or class keywords, is bound once
//! and is never used as a base class. Anything else falls back to the
//! dictionary-backed `$OBJECT` representation.

use pyrite_ast::visitor::{Visitor, walk_class_def, walk_module};
use pyrite_ast::*;
use pyrite_core::Result;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::ScopeTree;
use crate::config::CompilerConfig;
use crate::data::StringPool;
use crate::emit::WatEmitter;
use crate::layout::SlotLayout;
use crate::runtime::{RuntimeUsage, is_builtin_exception};

/// Facts about one module-level class.
#[derive(Debug, Clone)]
pub struct ClassInfo<'ast> {
    pub name: &'ast str,
    /// Single base class name, if any.
    pub base: Option<&'ast str>,
    pub layout: Option<SlotLayout>,
    pub is_exception: bool,
}

/// Classes defined at module level, in source order.
#[derive(Debug, Default)]
pub struct ClassRegistry<'ast> {
    order: Vec<&'ast str>,
    classes: FxHashMap<&'ast str, ClassInfo<'ast>>,
}

impl<'ast> ClassRegistry<'ast> {
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn collect(module: &Module<'ast>, tree: &ScopeTree<'ast>, config: &CompilerConfig) -> Self {
        let mut registry = Self::default();
        for stmt in module.body {
            let Stmt::ClassDef(class) = stmt else {
                continue;
            };
            if tree.module_binding_count(class.name) != 1 {
                continue;
            }
            let base = match class.bases {
                [Expr::Name(n)] if n.id != "object" => Some(n.id),
                _ => None,
            };
            let is_exception = base.is_some_and(|b| {
                is_builtin_exception(b) || registry.classes.get(b).is_some_and(|c| c.is_exception)
            });
            let layout = if config.slotted_layouts && !is_exception {
                slot_layout(class)
            } else {
                None
            };
            registry.order.push(class.name);
            registry.classes.insert(
                class.name,
                ClassInfo {
                    name: class.name,
                    base,
                    layout,
                    is_exception,
                },
            );
        }

        let mut bases = BaseCollector::default();
        walk_module(&mut bases, module);
        for base in bases.names {
            if let Some(info) = registry.classes.get_mut(base) {
                if info.layout.take().is_some() {
                    tracing::warn!(
                        class = base,
                        "class with __slots__ is subclassed; using dictionary layout"
                    );
                }
            }
        }
        for name in &registry.order {
            if let Some(layout) = registry.classes.get(name).and_then(|c| c.layout.as_ref()) {
                tracing::debug!(class = *name, slots = layout.slots.len(), "slotted layout");
            }
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&ClassInfo<'ast>> {
        self.classes.get(name)
    }

    pub fn layout(&self, name: &str) -> Option<&SlotLayout> {
        self.classes.get(name).and_then(|c| c.layout.as_ref())
    }

    pub fn is_exception(&self, name: &str) -> bool {
        self.classes.get(name).is_some_and(|c| c.is_exception)
    }

    /// Slotted classes in source order.
    pub fn slotted(&self) -> impl Iterator<Item = (&'ast str, &SlotLayout)> + '_ {
        self.order
            .iter()
            .filter_map(|name| self.layout(name).map(|l| (*name, l)))
    }

    pub fn slotted_count(&self) -> usize {
        self.slotted().count()
    }

    /// The `(type ...)` definitions of every slotted record.
    pub fn type_definitions(&self) -> Vec<String> {
        self.slotted().map(|(_, l)| l.definition()).collect()
    }

    // ==========================================================================
    // Dispatchers
    // ==========================================================================

    /// `$slotted_getattr` and `$slotted_setattr`: attribute access on any
    /// value, answering slot names of slotted records directly and deferring
    /// everything else to the generic object protocol.
    pub fn dispatchers(
        &self,
        strings: &mut StringPool,
        runtime: &mut RuntimeUsage,
        comments: bool,
    ) -> Result<Vec<String>> {
        if self.slotted_count() == 0 {
            return Ok(Vec::new());
        }
        let span = pyrite_core::Span::default();
        runtime.require("strings_equal", span)?;
        runtime.require("object_getattr", span)?;
        runtime.require("object_setattr", span)?;

        let mut get = WatEmitter::new(comments);
        let mut set = WatEmitter::new(comments);
        for (class, layout) in self.slotted() {
            let ty = format!("(ref ${})", layout.type_name);
            for emitter in [&mut get, &mut set] {
                emitter.comment(format!("class {class}"));
                emitter.emit("local.get $obj");
                emitter.emit(format!("ref.test {ty}"));
                emitter.if_(None);
            }
            for slot in &layout.slots {
                let (offset, len) = strings.intern_str(slot);
                let field = SlotLayout::field_name(slot);
                for emitter in [&mut get, &mut set] {
                    emitter.emit("local.get $name");
                    emitter.emit(format!("i32.const {offset}"));
                    emitter.emit(format!("i32.const {len}"));
                    emitter.emit("struct.new $STRING");
                    emitter.emit("call $strings_equal");
                    emitter.if_(None);
                    emitter.emit("local.get $obj");
                    emitter.emit(format!("ref.cast {ty}"));
                }
                get.emit(format!("struct.get ${} {field}", layout.type_name));
                get.emit("return");
                set.emit("local.get $value");
                set.emit(format!("struct.set ${} {field}", layout.type_name));
                set.emit("return");
                for emitter in [&mut get, &mut set] {
                    emitter.end();
                }
            }
            for emitter in [&mut get, &mut set] {
                emitter.end();
            }
        }
        get.emit("local.get $obj");
        get.emit("local.get $name");
        get.emit("call $object_getattr");
        set.emit("local.get $obj");
        set.emit("local.get $name");
        set.emit("local.get $value");
        set.emit("call $object_setattr");

        Ok(vec![
            format!(
                "(func $slotted_getattr (export \"slotted_getattr\") (param $obj (ref null eq)) (param $name (ref null eq)) (result (ref null eq))\n{})",
                get.finish()
            ),
            format!(
                "(func $slotted_setattr (export \"slotted_setattr\") (param $obj (ref null eq)) (param $name (ref null eq)) (param $value (ref null eq))\n{})",
                set.finish()
            ),
        ])
    }
}

/// The slot names a class body declares, if it qualifies for a fixed layout.
fn slot_layout(class: &ClassDef<'_>) -> Option<SlotLayout> {
    let plain_object = match class.bases {
        [] => true,
        [Expr::Name(n)] => n.id == "object",
        _ => false,
    };
    if !plain_object || !class.decorators.is_empty() || !class.keywords.is_empty() {
        return None;
    }
    let value = class.body.iter().find_map(|stmt| match stmt {
        Stmt::Assign(a) => match a.targets {
            [Expr::Name(n)] if n.id == "__slots__" => Some(a.value),
            _ => None,
        },
        _ => None,
    })?;
    let slots: Vec<String> = match value {
        Expr::Constant(_) => vec![value.as_str()?.to_string()],
        Expr::Tuple(seq) | Expr::List(seq) => seq
            .elts
            .iter()
            .map(|e| e.as_str().map(str::to_string))
            .collect::<Option<_>>()?,
        _ => return None,
    };
    let mut seen = FxHashSet::default();
    if slots.is_empty() || !slots.iter().all(|s| seen.insert(s.as_str())) {
        return None;
    }
    Some(SlotLayout::new(class.name, slots))
}

/// Names used as a single base class anywhere in the module.
#[derive(Default)]
struct BaseCollector<'ast> {
    names: Vec<&'ast str>,
}

impl<'ast> Visitor<'ast> for BaseCollector<'ast> {
    fn visit_class_def(&mut self, class: &'ast ClassDef<'ast>) {
        for base in class.bases {
            if let Some(name) = base.as_name() {
                self.names.push(name);
            }
        }
        walk_class_def(self, class);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;

    fn registry<'ast>(module: &Module<'ast>, config: &CompilerConfig) -> ClassRegistry<'ast> {
        let tree = ScopeTree::build(module).unwrap();
        ClassRegistry::collect(module, &tree, config)
    }

    fn point<'ast>(b: &AstBuilder<'ast>) -> Stmt<'ast> {
        b.class(
            "Point",
            &[],
            &[b.assign_name("__slots__", b.tuple(&[b.str("x"), b.str("y")]))],
        )
    }

    #[test]
    fn slots_give_fixed_layout() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[point(&b)]);
        let classes = registry(&module, &CompilerConfig::default());
        let layout = classes.layout("Point").unwrap();
        assert_eq!(layout.slots, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(classes.slotted_count(), 1);
        assert_eq!(classes.type_definitions().len(), 1);
    }

    #[test]
    fn subclassed_slotted_class_is_downgraded() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[point(&b), b.class("Point3", &[b.name("Point")], &[b.pass()])]);
        let classes = registry(&module, &CompilerConfig::default());
        assert!(classes.layout("Point").is_none());
        assert_eq!(classes.get("Point3").unwrap().base, Some("Point"));
    }

    #[test]
    fn disabled_tier_keeps_dictionary_layout() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[point(&b)]);
        let classes = registry(&module, &CompilerConfig::unoptimized());
        assert!(classes.layout("Point").is_none());
        assert!(classes.get("Point").is_some());
    }

    #[test]
    fn exception_classes_follow_their_base() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[
            b.class("AppError", &[b.name("ValueError")], &[b.pass()]),
            b.class("DbError", &[b.name("AppError")], &[b.pass()]),
            b.class("Plain", &[], &[b.pass()]),
        ]);
        let classes = registry(&module, &CompilerConfig::default());
        assert!(classes.is_exception("AppError"));
        assert!(classes.is_exception("DbError"));
        assert!(!classes.is_exception("Plain"));
    }

    #[test]
    fn dispatchers_cover_every_slot() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let module = b.module(&[point(&b)]);
        let classes = registry(&module, &CompilerConfig::default());
        let mut strings = StringPool::new(0);
        let mut runtime = RuntimeUsage::new();
        let funcs = classes.dispatchers(&mut strings, &mut runtime, false).unwrap();
        assert_eq!(funcs.len(), 2);
        assert!(funcs[0].contains("struct.get $SLOTTED_Point $s_y"));
        assert!(funcs[1].contains("struct.set $SLOTTED_Point $s_x"));
        assert!(runtime.is_used("strings_equal"));
    }
}
