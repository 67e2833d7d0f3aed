//! The inferred-type lattice.
//!
//! [`InferredType`] is the shared vocabulary of the inference engine, the
//! inliner's cost model and the code generator. Native variants describe
//! machine storage (`i32`, `i64`, `f64`) and always refine a boxed numeric
//! type: promoting a variable from boxed to native storage is a pure
//! optimization and never changes observable results.

use std::fmt;

use crate::ops::BinaryOp;

/// Smallest value representable by a native `i32` local.
pub const I32_MIN: i64 = -(1 << 31);
/// Largest value representable by a native `i32` local.
pub const I32_MAX: i64 = (1 << 31) - 1;

/// Smallest value the runtime stores unboxed as an `i31ref`.
pub const I31_MIN: i64 = -(1 << 30);
/// Largest value the runtime stores unboxed as an `i31ref`.
pub const I31_MAX: i64 = (1 << 30) - 1;

/// Whether an integer constant fits a native `i32` slot.
#[inline]
pub fn fits_i32(value: i64) -> bool {
    (I32_MIN..=I32_MAX).contains(&value)
}

/// Whether an integer constant fits an `i31ref`.
#[inline]
pub fn fits_i31(value: i64) -> bool {
    (I31_MIN..=I31_MAX).contains(&value)
}

/// Machine-representable numeric storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NativeType {
    I32,
    I64,
    F64,
}

impl NativeType {
    /// The WebAssembly value type spelling.
    pub fn wasm(self) -> &'static str {
        match self {
            NativeType::I32 => "i32",
            NativeType::I64 => "i64",
            NativeType::F64 => "f64",
        }
    }

    /// Whether this is an integer width.
    pub fn is_int(self) -> bool {
        matches!(self, NativeType::I32 | NativeType::I64)
    }

    /// Parse an explicit annotation name (`i32`, `i64`, `f64`).
    pub fn from_annotation(name: &str) -> Option<Self> {
        match name {
            "i32" => Some(NativeType::I32),
            "i64" => Some(NativeType::I64),
            "f64" => Some(NativeType::F64),
            _ => None,
        }
    }
}

/// A statically inferred type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum InferredType {
    Int,
    Float,
    Bool,
    Str,
    Bytes,
    None,
    /// A list, with the element type when every element agrees.
    List(Option<Box<InferredType>>),
    /// A dict, with key/value types when known.
    Dict(Option<Box<InferredType>>, Option<Box<InferredType>>),
    /// A tuple with statically known element types.
    Tuple(Vec<InferredType>),
    /// A callable with known parameter and return types.
    Function {
        params: Vec<InferredType>,
        ret: Box<InferredType>,
    },
    /// An instance of a user class.
    Class(String),
    /// Native storage refining `Int` (`I32`/`I64`) or `Float` (`F64`).
    Native(NativeType),
    #[default]
    Unknown,
}

impl InferredType {
    pub const I32: InferredType = InferredType::Native(NativeType::I32);
    pub const I64: InferredType = InferredType::Native(NativeType::I64);
    pub const F64: InferredType = InferredType::Native(NativeType::F64);

    /// A list with a known element type.
    pub fn list_of(elem: InferredType) -> Self {
        InferredType::List(Some(Box::new(elem)))
    }

    /// Int or float, boxed or native.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            InferredType::Int | InferredType::Float | InferredType::Native(_)
        )
    }

    pub fn is_native(&self) -> bool {
        matches!(self, InferredType::Native(_))
    }

    pub fn is_native_int(&self) -> bool {
        matches!(self, InferredType::Native(n) if n.is_int())
    }

    /// The native storage kind, if any.
    pub fn native(&self) -> Option<NativeType> {
        match self {
            InferredType::Native(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, InferredType::Unknown)
    }

    /// Whether values of this type are array-backed `$LIST`s at run time.
    pub fn is_list(&self) -> bool {
        matches!(self, InferredType::List(_))
    }

    /// The boxed type a native type refines; other types are returned as-is.
    pub fn boxed(&self) -> InferredType {
        match self {
            InferredType::Native(NativeType::I32 | NativeType::I64) => InferredType::Int,
            InferredType::Native(NativeType::F64) => InferredType::Float,
            other => other.clone(),
        }
    }

    /// Parse a type annotation name.
    pub fn from_annotation(name: &str) -> Self {
        if let Some(native) = NativeType::from_annotation(name) {
            return InferredType::Native(native);
        }
        match name {
            "int" => InferredType::Int,
            "float" => InferredType::Float,
            "bool" => InferredType::Bool,
            "str" => InferredType::Str,
            "bytes" => InferredType::Bytes,
            "None" => InferredType::None,
            "list" => InferredType::List(None),
            "dict" => InferredType::Dict(None, None),
            "tuple" => InferredType::Tuple(Vec::new()),
            _ => InferredType::Unknown,
        }
    }

    /// Least upper bound used when a variable receives several assignments.
    ///
    /// Types only ever widen: disagreeing element types collapse to an
    /// unparameterized container and disagreeing scalars to `Unknown`.
    pub fn join(&self, other: &InferredType) -> InferredType {
        if self == other {
            return self.clone();
        }
        match (self, other) {
            (InferredType::Native(_), _) | (_, InferredType::Native(_))
                if self.boxed() == other.boxed() =>
            {
                self.boxed()
            }
            (InferredType::List(a), InferredType::List(b)) => match (a, b) {
                (Some(a), Some(b)) if a == b => InferredType::List(Some(a.clone())),
                _ => InferredType::List(None),
            },
            (InferredType::Dict(..), InferredType::Dict(..)) => InferredType::Dict(None, None),
            (InferredType::Tuple(a), InferredType::Tuple(b)) if a.len() == b.len() => {
                InferredType::Tuple(a.iter().zip(b).map(|(x, y)| x.join(y)).collect())
            }
            _ => InferredType::Unknown,
        }
    }
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferredType::Int => f.write_str("int"),
            InferredType::Float => f.write_str("float"),
            InferredType::Bool => f.write_str("bool"),
            InferredType::Str => f.write_str("str"),
            InferredType::Bytes => f.write_str("bytes"),
            InferredType::None => f.write_str("None"),
            InferredType::List(None) => f.write_str("list"),
            InferredType::List(Some(elem)) => write!(f, "list[{elem}]"),
            InferredType::Dict(Some(k), Some(v)) => write!(f, "dict[{k}, {v}]"),
            InferredType::Dict(..) => f.write_str("dict"),
            InferredType::Tuple(elems) => {
                f.write_str("tuple[")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{elem}")?;
                }
                f.write_str("]")
            }
            InferredType::Function { ret, .. } => write!(f, "function -> {ret}"),
            InferredType::Class(name) => f.write_str(name),
            InferredType::Native(n) => f.write_str(n.wasm()),
            InferredType::Unknown => f.write_str("?"),
        }
    }
}

/// Result type of a binary operation.
///
/// Native pairs keep their width, a native operand paired with a boxed one
/// keeps the native width, and any float involvement produces a float.
pub fn combine_types(left: &InferredType, right: &InferredType, op: BinaryOp) -> InferredType {
    use InferredType as T;
    use NativeType::*;

    if let (Some(l), Some(r)) = (left.native(), right.native()) {
        return match (l, r) {
            (F64, _) | (_, F64) if op.is_float_native_op() => T::F64,
            (F64, _) | (_, F64) => T::Float,
            (_, _) if op == BinaryOp::Div => T::F64,
            (I32, I32) if op.is_int_native_op() => T::I32,
            (I64, I64) | (I32, I64) | (I64, I32) if op.is_int_native_op() => T::I64,
            _ => T::Unknown,
        };
    }

    match (left, right) {
        (T::Native(I32), T::Int) | (T::Int, T::Native(I32)) if op.is_int_native_op() => {
            return T::I32;
        }
        (T::Native(I64), T::Int) | (T::Int, T::Native(I64)) if op.is_int_native_op() => {
            return T::I64;
        }
        (T::Native(F64), T::Float | T::Int) | (T::Float | T::Int, T::Native(F64))
            if op.is_float_native_op() =>
        {
            return T::F64;
        }
        _ => {}
    }

    if op == BinaryOp::Div {
        return T::Float;
    }

    let float_op = matches!(
        op,
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mult | BinaryOp::FloorDiv | BinaryOp::Mod | BinaryOp::Pow
    );
    let is_floatish = |t: &T| matches!(t, T::Float | T::Native(F64));
    if float_op && (is_floatish(left) || is_floatish(right)) {
        return T::Float;
    }

    match (left.boxed(), right.boxed(), op) {
        (T::Int, T::Int, BinaryOp::Pow) => T::Unknown,
        (T::Int, T::Int, BinaryOp::MatMult) => T::Unknown,
        (T::Int, T::Int, _) => T::Int,
        (T::Str, T::Str, BinaryOp::Add) => T::Str,
        (T::Str, T::Int, BinaryOp::Mult) | (T::Int, T::Str, BinaryOp::Mult) => T::Str,
        (T::Str, _, BinaryOp::Mod) => T::Str,
        (T::List(a), T::List(b), BinaryOp::Add) => {
            if a == b {
                T::List(a)
            } else {
                T::List(None)
            }
        }
        (T::List(a), T::Int, BinaryOp::Mult) | (T::Int, T::List(a), BinaryOp::Mult) => T::List(a),
        (T::Tuple(mut a), T::Tuple(b), BinaryOp::Add) if !a.is_empty() && !b.is_empty() => {
            a.extend(b);
            T::Tuple(a)
        }
        _ => T::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InferredType as T;

    #[test]
    fn native_pairs_keep_width() {
        assert_eq!(combine_types(&T::I32, &T::I32, BinaryOp::Add), T::I32);
        assert_eq!(combine_types(&T::I64, &T::I64, BinaryOp::Mult), T::I64);
        assert_eq!(combine_types(&T::F64, &T::F64, BinaryOp::Sub), T::F64);
    }

    #[test]
    fn mixed_native_widths_promote() {
        assert_eq!(combine_types(&T::I32, &T::I64, BinaryOp::Add), T::I64);
        assert_eq!(combine_types(&T::I64, &T::F64, BinaryOp::Add), T::F64);
    }

    #[test]
    fn native_with_boxed_keeps_native() {
        assert_eq!(combine_types(&T::I32, &T::Int, BinaryOp::Add), T::I32);
        assert_eq!(combine_types(&T::Int, &T::I64, BinaryOp::RShift), T::I64);
        assert_eq!(combine_types(&T::F64, &T::Float, BinaryOp::Mult), T::F64);
        assert_eq!(combine_types(&T::Int, &T::F64, BinaryOp::Div), T::F64);
    }

    #[test]
    fn true_division_is_float() {
        assert_eq!(combine_types(&T::Int, &T::Int, BinaryOp::Div), T::Float);
        assert_eq!(combine_types(&T::I32, &T::I32, BinaryOp::Div), T::F64);
    }

    #[test]
    fn float_involvement_produces_float() {
        assert_eq!(combine_types(&T::Float, &T::Int, BinaryOp::Add), T::Float);
        assert_eq!(combine_types(&T::Int, &T::Float, BinaryOp::FloorDiv), T::Float);
    }

    #[test]
    fn sequences() {
        assert_eq!(combine_types(&T::Str, &T::Str, BinaryOp::Add), T::Str);
        assert_eq!(combine_types(&T::Int, &T::Str, BinaryOp::Mult), T::Str);
        let ints = T::list_of(T::Int);
        assert_eq!(combine_types(&ints, &ints, BinaryOp::Add), ints);
        assert_eq!(
            combine_types(&ints, &T::list_of(T::Str), BinaryOp::Add),
            T::List(None)
        );
        assert_eq!(combine_types(&ints, &T::Int, BinaryOp::Mult), ints);
    }

    #[test]
    fn unrelated_operands_are_unknown() {
        assert_eq!(combine_types(&T::Str, &T::Int, BinaryOp::Add), T::Unknown);
        assert_eq!(combine_types(&T::Unknown, &T::Int, BinaryOp::Add), T::Unknown);
    }

    #[test]
    fn join_widens() {
        assert_eq!(T::Int.join(&T::Int), T::Int);
        assert_eq!(T::I32.join(&T::Int), T::Int);
        assert_eq!(T::Int.join(&T::Str), T::Unknown);
        assert_eq!(T::list_of(T::Int).join(&T::list_of(T::Str)), T::List(None));
    }

    #[test]
    fn native_range_constants() {
        assert!(fits_i32(I32_MAX));
        assert!(!fits_i32(I32_MAX + 1));
        assert!(fits_i31(-(1 << 30)));
        assert!(!fits_i31(1 << 30));
    }

    #[test]
    fn annotation_names() {
        assert_eq!(T::from_annotation("i32"), T::I32);
        assert_eq!(T::from_annotation("float"), T::Float);
        assert_eq!(T::from_annotation("Point"), T::Unknown);
    }
}
