//! Input node vocabulary of the pyrite compiler.
//!
//! Trees are allocated in a [`bumpalo::Bump`] arena owned by the caller. All
//! node types are `Copy`: leaves are stored inline and composite nodes are
//! `&'ast` references into the arena.
//!
//! ## Modules
//!
//! - [`expr`]: expression nodes, including the inliner's [`Expr::Let`]
//! - [`stmt`]: statement nodes, parameter lists and [`Module`]
//! - [`pattern`]: `match` patterns
//! - [`builder`]: [`AstBuilder`] for constructing trees in code
//! - [`visitor`]: read-only [`Visitor`](visitor::Visitor) traversal

pub mod builder;
pub mod expr;
pub mod pattern;
pub mod stmt;
pub mod visitor;

pub use builder::AstBuilder;
pub use expr::*;
pub use pattern::*;
pub use stmt::*;
