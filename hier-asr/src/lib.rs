//! hier-asr: evaluation of hierarchical (word + character) attention ASR models.
//!
//! A hierarchical model has a main decoder emitting words and a sub decoder
//! emitting characters, both attending over one shared encoder. This crate
//! restores such a model, optionally fuses recurrent language models into
//! either decoder, beam-searches both tasks and scores the outputs as WER and
//! CER.
//!
//! # Architecture
//!
//! - [`traits::AsrModel`], [`traits::LanguageModel`]: single-step decoder
//!   interfaces the search drives
//! - [`traits::ModelFactory`]: instantiates models for a config's backend;
//!   [`backend::onnx::OnnxFactory`] serves ONNX Runtime graphs
//! - [`assemble::assemble`]: builds the decoding model once per run
//! - [`decode::HierarchicalDecoder`]: beam search over both tasks with the
//!   joint decoding, unknown-word resolution and oracle-alignment modifiers
//! - [`evaluate::evaluate`]: decodes a split and aggregates error rates
//!
//! # Quick Start
//!
//! ```ignore
//! use hier_asr::assemble::{AssemblyRequest, assemble};
//! use hier_asr::backend::onnx::OnnxFactory;
//! use hier_asr::config::{CONFIG_FILE, load_config};
//! use hier_asr::decode::DecodeRequest;
//! use hier_asr::evaluate::evaluate;
//! use ort::session::Session;
//!
//! let config = load_config(model_dir.join(CONFIG_FILE), true)?;
//! let bundle = source.open("eval1")?;
//!
//! let factory = OnnxFactory::new(Session::builder()?);
//! let (mut model, epoch) = assemble(config, &bundle, &request, &factory)?;
//!
//! let report = evaluate(&mut model, &bundle, &DecodeRequest::greedy(&profile), 1)?;
//! println!("WER {:.2}%", report.scores.wer);
//! ```

pub mod assemble;
pub mod audio;
pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod corpus;
pub mod dataset;
pub mod decode;
pub mod error;
pub mod evaluate;
pub mod glm;
pub mod lm;
pub mod metrics;
pub mod traits;
pub mod types;
pub mod vocab;

#[cfg(test)]
pub(crate) mod test_support;
