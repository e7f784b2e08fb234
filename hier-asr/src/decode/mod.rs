//! Hierarchical beam-search decoding.

pub mod align;
pub mod beam;
pub mod hierarchical;
mod joint;
pub mod request;

pub use beam::{Hypothesis, SearchParams, beam_search};
pub use hierarchical::{DecodeOutput, HierarchicalDecoder};
pub use request::DecodeRequest;
