//! Evaluation
//!
//! This module brings graph nodes up to date.
//!
//! # Overview
//!
//! Callers register one function per function type, then ask a
//! [`BuildDriver`] to evaluate some root keys. A round:
//!
//! 1. Starts the roots that are not up to date.
//! 2. Runs functions on a pool of worker threads. Functions pull their
//!    dependencies through an [`Environment`] and restart once the missing
//!    ones are done.
//! 3. Re-checks dirty nodes dependency group by dependency group, and only
//!    runs their function if something they read actually changed.
//! 4. Fails the members of any dependency cycle, and reports every root's
//!    value or error in an [`EvaluationResult`].
//!
//! Between rounds the driver invalidates, injects or deletes nodes.

mod context;
mod cycle;
mod driver;
mod error;
mod evaluator;
mod function;
mod interrupt;
mod options;
mod progress;
mod result;
mod session;

pub use context::Environment;
pub use cycle::{CycleDescriber, CycleInfo, CycleReporter};
pub use driver::BuildDriver;
pub use error::{ErrorInfo, ErrorInfoOf, ErrorOrigin, EvalError, PanicPayload};
pub use function::{ComputeResult, Computed, FunctionRegistry, SkyFunction};
pub use interrupt::InterruptHandle;
pub use options::{EvaluationOptions, KEEP_GOING_ENV, THREADS_ENV};
pub use progress::{EvaluatedOutcome, EvaluationProgress, NullProgress};
pub use result::EvaluationResult;
pub use session::EvaluatorSession;
