//! Error types for the lowering pass and the command-line driver.

use thiserror::Error;

use crate::parser::ParseError;

/// Internal-consistency violations detected while lowering a body. The
/// caller validated the tree, so each of these is a compiler bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoweringError {
    #[error("label `{0}` was never bound to a state")]
    UnresolvedLabel(String),

    #[error("no enclosing target for `{0}`")]
    MissingBranchTarget(String),

    #[error("yield with a value reached the jump rewriter")]
    UnexpectedYield,

    #[error("await reached the jump rewriter")]
    UnexpectedAwait,

    #[error("try with a catch clause guards a yield")]
    YieldInsideTryCatch,

    #[error("{kind} inside a {clause} clause")]
    SuspensionInHandler {
        kind: &'static str,
        clause: &'static str,
    },

    #[error("return with a value inside an iterator block")]
    ReturnValueInIterator,

    #[error("state {id} of loop `{loop_label}` enqueued twice")]
    StateEnqueuedTwice { id: i32, loop_label: String },

    #[error("deferred work item has an empty cursor stack")]
    EmptyCursorStack,
}

pub type LoweringResult<T> = Result<T, LoweringError>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("internal compiler error: {0}")]
    Lowering(#[from] LoweringError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
