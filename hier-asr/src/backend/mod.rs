//! Inference backends implementing [`crate::traits::ModelFactory`].

pub mod onnx;
