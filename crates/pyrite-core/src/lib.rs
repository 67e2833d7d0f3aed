//! Shared vocabulary for the pyrite compiler crates.
//!
//! ## Modules
//!
//! - [`span`]: source locations carried by every AST node and error
//! - [`error`]: the fatal [`CompileError`] taxonomy
//! - [`ops`]: operator enums shared by the AST and type lattice
//! - [`types`]: the inferred-type lattice and binary-operator combination table

pub mod error;
pub mod ops;
pub mod span;
pub mod types;

pub use error::{CompileError, ErrorKind, Result};
pub use ops::{BinaryOp, BoolOp, CmpOp, UnaryOp};
pub use span::Span;
pub use types::{InferredType, NativeType, combine_types, fits_i31, fits_i32};
