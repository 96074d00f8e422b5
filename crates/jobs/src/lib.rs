//! Job dispatcher for the Scrivo job service.
//!
//! The public operation application code calls: run a named action with
//! a typed payload over the shared connection and get back a typed
//! artifact or a typed failure. Business-level declines are values;
//! only transport-level problems are errors.

pub mod dispatcher;

pub use dispatcher::{Artifact, Dispatcher, JobError, JobOutcome, JobRequest};
