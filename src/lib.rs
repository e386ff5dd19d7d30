//! # Datalog Explorer
//!
//! A bottom-up Datalog engine: parse a program, compute its least fixpoint,
//! answer its queries.
//!
//! ## Features
//!
//! - Facts, rules and `?` queries in one program text, `%` comments
//! - Semi-naive evaluation with per-position fact indexes
//! - Stratified negation (`not p(X)`) and comparisons (`X <> Y`, `N >= 10`)
//! - Conjunctive queries; bindings in variable order
//! - Optional iteration and time budgets
//! - `serde` support (default feature), async helpers (`async` feature)
//!
//! ## Example
//!
//! ```rust
//! use datalog_explorer::execute;
//!
//! let execution = execute("
//!     parent(alice, bob). parent(alice, bart). parent(bob, carol).
//!     ancestor(X, Y) :- parent(X, Y).
//!     ancestor(X, Y) :- ancestor(X, Z), parent(Z, Y).
//!     sibling(A, B) :- parent(P, A), parent(P, B), A <> B.
//!     ancestor(alice, Who)?
//!     sibling(bob, B)?
//! ").unwrap();
//!
//! let ancestors: Vec<String> = execution.answers()[0]
//!     .bindings
//!     .iter()
//!     .map(ToString::to_string)
//!     .collect();
//! assert_eq!(ancestors, ["Who: bob", "Who: bart", "Who: carol"]);
//! assert_eq!(execution.answers()[1].bindings[0].get("B"), Some("bart"));
//! ```

/// Errors and result alias.
pub mod error;
/// Terms, expressions, literals, rules and queries.
pub mod term;
pub mod unify;
/// Program text parser.
pub mod parser;
pub mod program;
/// Fixpoint evaluation.
pub mod engine;
pub mod query;
pub mod session;
#[cfg(feature = "async")]
mod asynchronous;

pub use engine::{EvalOptions, Fixpoint};
pub use error::{Error, ErrorKind, Result};
pub use parser::{parse_clauses, parse_program, parse_query, Clause};
pub use program::{Inspection, PredicateGroup, Program};
pub use query::{answer, Binding};
pub use session::{execute, Answer, Execution, Session};
pub use term::{Comparison, Expr, Literal, PredicateKey, Query, Rule, Term};
pub use unify::{unify, Substitution};
