//! Evaluate command - assemble the model once and score every split.

use crate::cli::EvalConfig;
use color_eyre::Section;
use eyre::{Context, Result};
use hier_asr::assemble::{AssembledModel, AssemblyRequest, assemble};
use hier_asr::backend::onnx::OnnxFactory;
use hier_asr::config::{CONFIG_FILE, ModelConfig, load_config};
use hier_asr::dataset::{DataSource, DatasetBundle};
use hier_asr::evaluate::{EvaluationReport, SplitAccumulator, evaluate};
use hier_asr::types::Task;
#[allow(unused_imports)]
use ort::execution_providers::*;
use ort::session::Session;
use ort::session::builder::SessionBuilder;
use std::path::Path;
use std::time::Instant;

pub fn execute(config: EvalConfig) -> Result<()> {
    let model_config: ModelConfig = load_config(config.model_path.join(CONFIG_FILE), true)
        .with_suggestion(|| format!("train a model into {:?} first", config.model_path.display()))?;

    let source = DataSource::for_model(&config.data_save_path, config.profile.name, &model_config)?;

    let mut splits = config.eval_sets.iter();
    let first = match splits.next() {
        Some(name) => source.open(name)?,
        None => eyre::bail!("no evaluation split given"),
    };

    let (mut model, epoch) = build_model(&config, model_config, &first)?;

    log_settings(&config, &model, epoch);

    let bundles = std::iter::once(Ok(first)).chain(splits.map(|name| source.open(name)));

    let mut acc = SplitAccumulator::default();
    for bundle in bundles {
        let bundle = bundle?;
        let start = Instant::now();

        let report = evaluate(&mut model, &bundle, &config.decode, config.batch_size)
            .wrap_err_with(|| format!("failed to evaluate {:?}", bundle.name))?;

        tracing::info!(
            split = %report.split,
            utterances = report.num_utterances(),
            duration = %format_secs(start.elapsed().as_secs_f32()),
            "split evaluated"
        );
        tracing::info!(split = %report.split, "WER (main): {:.2}%", report.scores.wer);
        tracing::info!(split = %report.split, "WER (sub): {:.2}%", report.scores.wer_sub);
        tracing::info!(split = %report.split, "CER (sub): {:.2}%", report.scores.cer_sub);

        log_rows(&report);

        if let Some(dir) = &config.report_dir {
            write_report(dir, &report)?;
        }

        acc.add(report.scores);
    }

    let mean = acc.reported_mean();
    tracing::info!(splits = acc.splits(), "WER (main, mean): {:.2}%", mean.wer);
    tracing::info!(splits = acc.splits(), "WER (sub, mean): {:.2}%", mean.wer_sub);
    tracing::info!(splits = acc.splits(), "CER (sub, mean): {:.2}%", mean.cer_sub);

    if let Some(true_mean) = acc.mean() {
        tracing::debug!(
            wer = true_mean.wer,
            wer_sub = true_mean.wer_sub,
            cer_sub = true_mean.cer_sub,
            "unweighted mean over evaluated splits"
        );
    }

    Ok(())
}

fn build_model(
    config: &EvalConfig,
    model_config: ModelConfig,
    first: &DatasetBundle,
) -> Result<(AssembledModel, usize)> {
    tracing::info!(dir = ?config.model_path.display(), "loading model");

    let factory = OnnxFactory::new(session_builder()?);

    let request = AssemblyRequest {
        model_dir: config.model_path.clone(),
        epoch: config.epoch,
        fusion: config.fusion.clone(),
    };

    let start = Instant::now();
    let assembled = assemble(model_config, first, &request, &factory)
        .wrap_err("failed to assemble model")
        .suggestion("check --rnnlm-path, --rnnlm-weight and their -sub counterparts")?;

    tracing::info!(duration = %format_secs(start.elapsed().as_secs_f32()), "model loaded");

    Ok(assembled)
}

fn log_settings(config: &EvalConfig, model: &AssembledModel, epoch: usize) {
    for task in Task::ALL {
        if let Some(lm) = model.lm(task) {
            tracing::info!(%task, path = ?lm.path.display(), weight = lm.weight, "language model");
        }
    }

    // checkpoints store the epoch training would run next
    let completed = epoch.saturating_sub(1);

    tracing::info!(
        beam_width = config.decode.beam_width.main,
        beam_width_sub = config.decode.beam_width.sub,
        epoch = completed,
        "decoding"
    );
    tracing::info!(
        resolving_unk = config.decode.resolving_unk,
        a2c_oracle = config.decode.a2c_oracle,
        joint_decoding = config.decode.joint_decoding,
        score_sub_weight = config.decode.score_sub_weight,
        "modifiers"
    );
}

/// Per-utterance diagnostic table, one event per utterance.
fn log_rows(report: &EvaluationReport) {
    for (word, chars) in report.words.iter().zip(&report.chars_sub) {
        tracing::debug!(
            split = %report.split,
            utt_id = %word.utt_id,
            reference = %word.reference,
            hypothesis = %word.hypothesis,
            word_errors = word.errors.errors(),
            reference_sub = %chars.reference,
            hypothesis_sub = %chars.hypothesis,
            char_errors = chars.errors.errors(),
            truncated = word.truncated || chars.truncated,
            "utterance"
        );
    }
}

fn write_report(dir: &Path, report: &EvaluationReport) -> Result<()> {
    std::fs::create_dir_all(dir)
        .wrap_err_with(|| format!("failed to create report directory: {:?}", dir.display()))?;

    let path = dir.join(format!("{}.json", report.split));
    let file = std::fs::File::create(&path)
        .wrap_err_with(|| format!("failed to write report: {:?}", path.display()))?;

    serde_json::to_writer_pretty(file, report)
        .wrap_err_with(|| format!("failed to serialize report: {:?}", path.display()))?;

    tracing::info!(path = ?path.display(), "write report");

    Ok(())
}

/// Session builder with execution providers configured by Cargo features.
///
/// Providers are tried in order; CPU is always available as fallback.
///
/// # Execution Providers
///
/// Enabled via Cargo features:
/// - `cuda` - NVIDIA CUDA
/// - `tensorrt` - NVIDIA TensorRT
/// - `openvino` - Intel OpenVINO
/// - `directml` - DirectML (Windows)
/// - `coreml` - CoreML (macOS)
fn session_builder() -> Result<SessionBuilder> {
    let builder = Session::builder()?.with_execution_providers([
        #[cfg(feature = "cuda")]
        CUDAExecutionProvider::default().build(),
        #[cfg(feature = "tensorrt")]
        TensorRTExecutionProvider::default().build(),
        #[cfg(feature = "openvino")]
        OpenVINOExecutionProvider::default()
            .with_device_type("HETERO:GPU,CPU")
            .with_cache_dir(".cache/ort")
            .with_precision("FP16")
            .build(),
        #[cfg(feature = "directml")]
        DirectMLExecutionProvider::default().build(),
        #[cfg(feature = "coreml")]
        CoreMLExecutionProvider::default().build(),
    ])?;

    Ok(builder)
}

/// Format seconds as a string with two decimal places.
fn format_secs(secs: f32) -> String {
    format!("{:.2}s", secs)
}
