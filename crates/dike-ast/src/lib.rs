//! # Dike AST
//!
//! Arena-based tree model for the Dike policy interpreter.
//!
//! This crate provides the foundational structures shared by the lowering
//! pipeline and the evaluator:
//!
//! - [`Ast`] - the node arena, with children stored as indices and symbol
//!   tables kept in an external map rebuilt per pass
//! - [`NodeKind`] - the closed vocabulary of node tags
//! - [`Location`] - source spans and synthetic text, compared by view
//! - [`Schema`] - the well-formedness DSL checked at every pass boundary
//! - [`to_json`] / [`dump_tree`] - canonical rendering
//!
//! ## Example
//!
//! ```rust
//! use dike_ast::{build, Ast, NodeKind};
//!
//! let mut ast = Ast::new();
//! let term = build!(ast, (Term (Scalar (JSONInt ^ "42"))));
//! assert_eq!(ast.kind(term), NodeKind::Term);
//! assert_eq!(dike_ast::to_json(&ast, term), "42");
//! ```

pub mod arena;
pub mod kind;
pub mod location;
pub mod render;
pub mod wf;

pub use arena::{Ast, NodeId};
pub use kind::NodeKind;
pub use location::{Location, Source};
pub use render::{dump_tree, format_float, strip_quotes, to_json};
pub use wf::{one, opt, rep, rep1, Field, Schema, Violation};
