//! An embeddable logic programming engine.
//!
//! Programs are Horn clauses built with the constructors in [`ast`],
//! compiled to a compact register bytecode and resolved by a
//! backtracking virtual machine with first-argument clause indexing.
//! A [`Machine`] is a shareable knowledge base: clones are cheap,
//! queries on any clone see clauses asserted through any other, and
//! in-flight queries are isolated from concurrent writes.
//!
//! ```
//! use hornlog::ast::{cst, fact, goal, rule, var};
//! use hornlog::{Machine, Value};
//!
//! # fn main() -> Result<(), hornlog::Error> {
//! let machine = Machine::new(vec![
//!     fact("edge", vec![cst("a"), cst("b")]),
//!     fact("edge", vec![cst("b"), cst("c")]),
//!     rule(
//!         "path",
//!         vec![var("X"), var("Y")],
//!         vec![goal("edge", vec![var("X"), var("Y")])],
//!     ),
//! ])?;
//!
//! for solution in machine.query(vec![goal("path", vec![cst("a"), var("Y")])])? {
//!     assert_eq!(solution?.get("Y"), Some(&Value::from("b")));
//! }
//! # Ok(())
//! # }
//! ```

pub mod ast;
mod codegen;
mod constants;
pub mod errors;
mod indexing;
mod instructions;
mod machine;
pub mod value;

pub use errors::{CompileError, EngineError, Error};
pub use machine::{Machine, QuerySolutions, Solution};
pub use value::{HostObject, Value};
