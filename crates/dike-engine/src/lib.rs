//! # Dike Engine
//!
//! A Rego policy interpreter: surface reader, multi-pass lowering pipeline,
//! and a unification-based evaluator.
//!
//! The engine lowers policy modules through a sequence of well-formedness
//! checked intermediate forms into a small normal form of unification
//! expressions, then evaluates the query by propagating sets of candidate
//! values through a dependency-ordered rule body.
//!
//! ## Example
//!
//! ```rust
//! use dike_engine::Interpreter;
//!
//! let mut interpreter = Interpreter::new();
//! interpreter
//!     .add_module(
//!         "authz.rego",
//!         r#"
//! package authz
//!
//! default allow = false
//!
//! allow { input.user == "root" }
//! "#,
//!     )
//!     .unwrap();
//! interpreter.add_input_json(r#"{"user": "root"}"#).unwrap();
//! assert_eq!(interpreter.query("data.authz.allow").unwrap(), "true\n");
//! ```

pub mod args;
pub mod builtins;
pub mod error;
pub mod interpreter;
pub mod json;
pub mod lexer;
pub mod passes;
pub mod reader;
pub mod resolver;
pub mod rewrite;
pub mod unifier;
pub mod value;
pub mod variable;

pub use builtins::BuiltIns;
pub use error::{EngineError, Result};
pub use interpreter::Interpreter;
pub use unifier::{unify_body, EvalContext};
pub use value::{Value, ValueDef, Values};
pub use variable::Variable;
