//! Built-in provider backends.
//!
//! Cloud drivers plug in through the registry from their own crates; the
//! backends here are the ones the worker ships with: `local` executes build
//! scripts in a subprocess, `fake` is the deterministic backend the
//! scenario suites drive.

pub mod fake;
pub mod local;

pub use fake::FakeProvider;
pub use local::LocalProvider;
