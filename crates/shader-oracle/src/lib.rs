#![forbid(unsafe_code)]

//! Differential-testing oracle for GPU shader compilers.
//!
//! A candidate shader is reconditioned, run against several compiler/driver
//! backends, and the captured buffers are partitioned into byte-equality
//! classes. The outcome is folded into one deterministic error signature,
//! which a generated interestingness script re-derives so an external
//! program reducer can shrink the test case while preserving the exact
//! failure it originally exhibited.
//!
//! The pipeline is strictly sequential: one shader, one backend at a time,
//! outcomes collected in backend declaration order. That order also assigns
//! the signature bit indices, so signatures are reproducible for an
//! unchanged backend list.

pub mod backend;
pub mod collaborators;
pub mod config;
pub mod divergence;
pub mod error;
pub mod harness;
pub mod interestingness;
pub mod pipeline;
pub mod reduction;
pub mod runner;
pub mod signature;
pub mod workdir;
pub mod wrapper_elimination;

pub use backend::{BackendFamily, BackendSpec};
pub use error::OracleError;
pub use pipeline::Pipeline;
pub use signature::{ErrorSignature, SignatureBase};
