//! Whole-module and per-function AST analyses.
//!
//! These passes are read-only: they never rewrite the tree and never emit
//! code. Code generation consults their results.
//!
//! - [`scopes`]: lexical scopes, cells, free variables and module globals
//! - [`effects`]: per-body summaries of side effects and bound names
//! - [`yields`]: numbering and placement checks for generator suspension points

pub mod effects;
pub mod scopes;
pub mod yields;

pub use effects::Effects;
pub use scopes::{NodeKey, Scope, ScopeId, ScopeKind, ScopeTree, contains_yield};
pub use yields::YieldPoints;
