//! Heap type definitions of the generated module.
//!
//! Every boxed value is a subtype of `eq`; `None` is `ref.null eq`. Types are
//! emitted as individual definitions, so structurally identical types are the
//! same type at run time. [`SET`](HEAP_TYPES) keeps an immutable table field
//! to stay distinct from `DICT`, and slotted records are told apart by their
//! class field rather than by their shape.

/// One named heap type definition.
#[derive(Debug, Clone, Copy)]
pub struct HeapType {
    pub name: &'static str,
    pub body: &'static str,
}

const fn ty(name: &'static str, body: &'static str) -> HeapType {
    HeapType { name, body }
}

/// Fixed heap types, in definition order. Later types may refer to earlier
/// ones; `$ENV` and `$ENTRY` refer to themselves.
pub static HEAP_TYPES: &[HeapType] = &[
    ty(
        "PAIR",
        "(struct (field $car (mut (ref null eq))) (field $cdr (mut (ref null eq))))",
    ),
    ty("BOOL", "(struct (field $value i32))"),
    ty("FLOAT", "(struct (field $value f64))"),
    ty("INT64", "(struct (field $value i64))"),
    ty("STRING", "(struct (field $offset i32) (field $len i32))"),
    ty(
        "BYTES",
        "(struct (field $offset i32) (field $len i32) (field $hash (mut i32)))",
    ),
    ty("ARRAY_ANY", "(array (mut (ref null eq)))"),
    ty(
        "ENV",
        "(struct (field $parent (ref null $ENV)) (field $vars (ref $ARRAY_ANY)))",
    ),
    ty(
        "FUNC",
        "(func (param (ref null eq)) (param (ref null $ENV)) (result (ref null eq)))",
    ),
    ty(
        "CLOSURE",
        "(struct (field $env (ref null $ENV)) (field $idx i32))",
    ),
    ty("EMPTY_LIST", "(struct)"),
    ty(
        "ENTRY",
        "(struct (field $key (ref null eq)) (field $value (mut (ref null eq))) (field $hash i32) (field $next (mut (ref null $ENTRY))))",
    ),
    ty("BUCKET_ARRAY", "(array (mut (ref null $ENTRY)))"),
    ty(
        "HASHTABLE",
        "(struct (field $buckets (mut (ref $BUCKET_ARRAY))) (field $size (mut i32)) (field $order (mut (ref null eq))))",
    ),
    ty("DICT", "(struct (field $table (mut (ref $HASHTABLE))))"),
    ty("SET", "(struct (field $table (ref $HASHTABLE)))"),
    ty(
        "LIST",
        "(struct (field $data (mut (ref $ARRAY_ANY))) (field $len (mut i32)))",
    ),
    ty(
        "TUPLE",
        "(struct (field $data (ref $ARRAY_ANY)) (field $len i32))",
    ),
    ty(
        "CLASS",
        "(struct (field $name (ref $STRING)) (field $attrs (ref $DICT)) (field $base (ref null $CLASS)))",
    ),
    ty("INSTANCE_BASE", "(sub (struct (field $class (ref $CLASS))))"),
    ty(
        "OBJECT",
        "(sub final $INSTANCE_BASE (struct (field $class (ref $CLASS)) (field $attrs (ref $DICT))))",
    ),
    ty(
        "SUPER",
        "(struct (field $class (ref $CLASS)) (field $self (ref null eq)))",
    ),
    ty("STATICMETHOD", "(struct (field $func (ref null eq)))"),
    ty("CLASSMETHOD", "(struct (field $func (mut (ref null eq))))"),
    ty(
        "PROPERTY",
        "(struct (field $getter (mut (ref null eq))) (field $setter (mut (ref null eq))) (field $deleter (mut (ref null eq))))",
    ),
    ty(
        "EXCEPTION",
        "(struct (field $type (ref $STRING)) (field $message (ref null eq)) (field $cause (mut (ref null eq))) (field $context (mut (ref null eq))) (field $suppress (mut i32)))",
    ),
    ty(
        "GENERATOR",
        "(struct (field $state (mut i32)) (field $value (mut (ref null eq))) (field $locals (mut (ref null $ARRAY_ANY))) (field $func i32) (field $env (ref null $ENV)) (field $sent (mut (ref null eq))) (field $thrown (mut (ref null eq))))",
    ),
    ty("KWARGS", "(struct (field $dict (ref $DICT)))"),
    ty("ELLIPSIS", "(struct (field $marker f32))"),
];

/// Field layout of one slotted class record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotLayout {
    /// Type name without the leading `$`.
    pub type_name: String,
    pub slots: Vec<String>,
}

impl SlotLayout {
    pub fn new(class_name: &str, slots: Vec<String>) -> Self {
        Self {
            type_name: format!("SLOTTED_{}", crate::scope::mangle(class_name)),
            slots,
        }
    }

    /// Struct field index of a slot; field 0 is the class reference.
    pub fn field_of(&self, slot: &str) -> Option<usize> {
        self.slots.iter().position(|s| s == slot).map(|i| i + 1)
    }

    /// The WAT field name of a slot.
    pub fn field_name(slot: &str) -> String {
        format!("$s_{}", crate::scope::mangle(slot))
    }

    /// The `(type ...)` definition of this record.
    pub fn definition(&self) -> String {
        let mut def = format!(
            "(type ${} (sub final $INSTANCE_BASE (struct (field $class (ref $CLASS))",
            self.type_name
        );
        for slot in &self.slots {
            def.push_str(&format!(" (field {} (mut (ref null eq)))", Self::field_name(slot)));
        }
        def.push_str(")))");
        def
    }
}

/// Render every fixed type definition.
pub fn type_definitions() -> impl Iterator<Item = String> {
    HEAP_TYPES
        .iter()
        .map(|t| format!("(type ${} {})", t.name, t.body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_dict_are_distinct_shapes() {
        let body = |name: &str| HEAP_TYPES.iter().find(|t| t.name == name).unwrap().body;
        assert_ne!(body("SET"), body("DICT"));
    }

    #[test]
    fn references_point_backwards() {
        // Every `$NAME` used inside a body must be defined earlier or be the type itself.
        for (i, t) in HEAP_TYPES.iter().enumerate() {
            for other in &HEAP_TYPES[i + 1..] {
                let needle = format!("${})", other.name);
                assert!(
                    !t.body.contains(&needle),
                    "{} refers forward to {}",
                    t.name,
                    other.name
                );
            }
        }
    }

    #[test]
    fn slotted_record_layout() {
        let layout = SlotLayout::new("Point", vec!["x".into(), "y".into()]);
        assert_eq!(layout.type_name, "SLOTTED_Point");
        assert_eq!(layout.field_of("y"), Some(2));
        assert_eq!(layout.field_of("z"), None);
        let def = layout.definition();
        assert!(def.starts_with("(type $SLOTTED_Point (sub final $INSTANCE_BASE"));
        assert!(def.contains("(field $s_x (mut (ref null eq)))"));
    }
}
