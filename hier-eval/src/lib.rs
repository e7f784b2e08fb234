//! hier-eval: command-line evaluation of hierarchical attention ASR models.

pub mod cli;
pub mod eval;
