//! Expression evaluation capability.
//!
//! The agent only sees the [`Evaluator`] trait. Evaluation is synchronous
//! and CPU-bound, so callers run it on a blocking thread and hand it a
//! [`CancellationToken`] that fires when the attempt's deadline elapses.

mod arithmetic;

pub use arithmetic::ArithmeticEvaluator;

use tokio_util::sync::CancellationToken;

use crate::error::EvalError;

/// Parse-and-evaluate capability consumed by the agent.
pub trait Evaluator: Send + Sync {
    /// Evaluate `expression`, returning its value rendered as a string.
    ///
    /// Implementations should poll `cancel` and return
    /// [`EvalError::Cancelled`] promptly once it fires.
    fn evaluate(&self, expression: &str, cancel: &CancellationToken) -> Result<String, EvalError>;

    /// Check that `expression` is well-formed without evaluating it.
    fn check_syntax(&self, expression: &str) -> Result<(), EvalError>;
}
