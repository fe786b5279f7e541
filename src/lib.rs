//! Lowers structured control flow (labels and `goto`, iterator `yield`,
//! `await`, `try`/`finally`) into a single dispatch loop over an integer
//! state variable.

pub mod ast;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod logging;
pub mod lower;
pub mod parser;
pub mod printer;
pub mod services;

pub use error::{Error, LoweringError, LoweringResult};
pub use lower::{
    FinallyHandler, IteratorBlock, StateMachineKind, rewrite_async_function,
    rewrite_iterator_block, rewrite_normal_function,
};
pub use services::{DefaultServices, LoweringServices};
