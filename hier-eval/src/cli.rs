//! CLI argument definitions using clap.

use clap::{ArgAction, Parser};
use eyre::{Result, ensure};
use hier_asr::checkpoint::EpochSelector;
use hier_asr::corpus::CorpusProfile;
use hier_asr::decode::DecodeRequest;
use hier_asr::lm::FusionRequest;
use hier_asr::types::{Task, TaskPair};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "hier-eval")]
#[command(about = "Evaluate a hierarchical word + character attention model (WER/CER)")]
#[command(version)]
pub struct Cli {
    /// Corpus identifier: csj, swbd, librispeech or wsj
    #[arg(long)]
    pub corpus: String,

    /// Evaluation splits under the data directory
    #[arg(long, num_args = 1.., required = true)]
    pub eval_sets: Vec<String>,

    /// Dataset root holding vocabularies and split manifests
    #[arg(long)]
    pub data_save_path: PathBuf,

    /// Trained model directory holding config.yml and checkpoints
    #[arg(long)]
    pub model_path: PathBuf,

    /// Checkpoint epoch to restore (-1 for the latest)
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub epoch: i64,

    #[arg(long, default_value_t = 1)]
    pub eval_batch_size: usize,

    #[arg(long, default_value_t = 1)]
    pub beam_width: usize,

    #[arg(long, default_value_t = 1)]
    pub beam_width_sub: usize,

    #[arg(long, default_value_t = 0.0)]
    pub length_penalty: f32,

    #[arg(long, default_value_t = 0.0)]
    pub coverage_penalty: f32,

    /// Weight of the word-level language model
    #[arg(long, default_value_t = 0.0)]
    pub rnnlm_weight: f32,

    /// Weight of the character-level language model
    #[arg(long, default_value_t = 0.0)]
    pub rnnlm_weight_sub: f32,

    /// Word-level language model for shallow fusion
    #[arg(long)]
    pub rnnlm_path: Option<PathBuf>,

    /// Character-level language model for shallow fusion
    #[arg(long)]
    pub rnnlm_path_sub: Option<PathBuf>,

    /// Spell unknown words with the character decoder
    #[arg(long, default_value = "false", value_parser = parse_bool, action = ArgAction::Set)]
    pub resolving_unk: bool,

    /// Decode characters along the word decoder's alignment
    #[arg(long, default_value = "false", value_parser = parse_bool, action = ArgAction::Set)]
    pub a2c_oracle: bool,

    /// Rescore word hypotheses with the character decoder during search
    #[arg(long, default_value = "false", value_parser = parse_bool, action = ArgAction::Set)]
    pub joint_decoding: bool,

    #[arg(long, default_value_t = 0.0)]
    pub score_sub_weight: f32,

    /// Also write each split's diagnostic tables as JSON here
    #[arg(long)]
    pub report_dir: Option<PathBuf>,
}

/// Parse a boolean the way Python's `strtobool` does.
pub fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
        _ => Err(format!("invalid truth value {s:?}")),
    }
}

/// Validated evaluation settings.
///
/// Converted from [`Cli`] via TryFrom before any file is read.
#[derive(Debug)]
pub struct EvalConfig {
    pub profile: CorpusProfile,
    pub eval_sets: Vec<String>,
    pub data_save_path: PathBuf,
    pub model_path: PathBuf,
    pub epoch: EpochSelector,
    pub batch_size: usize,
    pub fusion: TaskPair<FusionRequest>,
    pub decode: DecodeRequest,
    pub report_dir: Option<PathBuf>,
}

impl TryFrom<Cli> for EvalConfig {
    type Error = eyre::Error;

    fn try_from(cli: Cli) -> Result<Self> {
        let profile = CorpusProfile::resolve(&cli.corpus)?;
        let epoch = EpochSelector::try_from(cli.epoch)?;

        ensure!(cli.eval_batch_size > 0, "--eval-batch-size must be positive");

        let fusion = TaskPair::new(
            FusionRequest {
                weight: cli.rnnlm_weight,
                path: cli.rnnlm_path,
            },
            FusionRequest {
                weight: cli.rnnlm_weight_sub,
                path: cli.rnnlm_path_sub,
            },
        );
        for task in Task::ALL {
            fusion.get(task).check(task)?;
        }

        let decode = DecodeRequest {
            beam_width: TaskPair::new(cli.beam_width, cli.beam_width_sub),
            bounds: profile.bounds,
            length_penalty: cli.length_penalty,
            coverage_penalty: cli.coverage_penalty,
            lm_weight: TaskPair::new(cli.rnnlm_weight, cli.rnnlm_weight_sub),
            resolving_unk: cli.resolving_unk,
            a2c_oracle: cli.a2c_oracle,
            joint_decoding: cli.joint_decoding,
            score_sub_weight: cli.score_sub_weight,
        };
        decode.validate()?;

        Ok(Self {
            profile,
            eval_sets: cli.eval_sets,
            data_save_path: cli.data_save_path,
            model_path: cli.model_path,
            epoch,
            batch_size: cli.eval_batch_size,
            fusion,
            decode,
            report_dir: cli.report_dir,
        })
    }
}

/// Execute CLI command - separated for testing.
pub fn run(cli: Cli) -> Result<()> {
    tracing::debug!(?cli, "parsed arguments");

    crate::eval::execute(cli.try_into()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hier_asr::error::ConfigError;

    const REQUIRED: [&str; 9] = [
        "hier-eval",
        "--corpus",
        "csj",
        "--eval-sets",
        "eval1",
        "--data-save-path",
        "/data/csj",
        "--model-path",
        "/exp/hier",
    ];

    fn parse(extra: &[&str]) -> Cli {
        Cli::parse_from(REQUIRED.iter().chain(extra))
    }

    #[test]
    fn parses_defaults() {
        let cli = parse(&[]);

        assert_eq!(cli.eval_sets, vec!["eval1"]);
        assert_eq!(cli.epoch, -1);
        assert_eq!(cli.eval_batch_size, 1);
        assert_eq!((cli.beam_width, cli.beam_width_sub), (1, 1));
        assert!(!cli.resolving_unk && !cli.a2c_oracle && !cli.joint_decoding);
        assert!(cli.rnnlm_path.is_none() && cli.report_dir.is_none());

        let config = EvalConfig::try_from(cli).unwrap();
        assert_eq!(config.profile, CorpusProfile::CSJ);
        assert_eq!(config.epoch, EpochSelector::Latest);
        assert_eq!(config.decode, DecodeRequest::greedy(&CorpusProfile::CSJ));
    }

    #[test]
    fn parses_every_split_and_negative_epoch() {
        let cli = Cli::parse_from([
            "hier-eval",
            "--corpus",
            "csj",
            "--eval-sets",
            "eval1",
            "eval2",
            "eval3",
            "--data-save-path",
            "/data/csj",
            "--model-path",
            "/exp/hier",
            "--epoch",
            "-1",
        ]);

        assert_eq!(cli.eval_sets, vec!["eval1", "eval2", "eval3"]);
        assert_eq!(cli.epoch, -1);
    }

    #[test]
    fn accepts_strtobool_spellings() {
        let cli = parse(&[
            "--resolving-unk",
            "True",
            "--a2c-oracle",
            "0",
            "--joint-decoding",
            "yes",
            "--score-sub-weight",
            "0.3",
        ]);

        assert!(cli.resolving_unk);
        assert!(!cli.a2c_oracle);
        assert!(cli.joint_decoding);

        let config = EvalConfig::try_from(cli).unwrap();
        assert!(config.decode.joint_active());
    }

    #[test]
    fn rejects_unknown_truth_value() {
        let result = Cli::try_parse_from(REQUIRED.iter().chain(&["--joint-decoding", "maybe"]));
        assert!(result.is_err());
        assert!(parse_bool("maybe").is_err());
        assert_eq!(parse_bool("OFF"), Ok(false));
    }

    #[test]
    fn resolves_fusion_and_beam_settings() {
        let cli = parse(&[
            "--beam-width",
            "4",
            "--beam-width-sub",
            "8",
            "--rnnlm-weight",
            "0.3",
            "--rnnlm-path",
            "/exp/lm/word",
        ]);

        let config = EvalConfig::try_from(cli).unwrap();

        assert_eq!(config.decode.beam_width, TaskPair::new(4, 8));
        assert_eq!(config.decode.lm_weight, TaskPair::new(0.3, 0.0));
        assert_eq!(config.fusion.main.path, Some(PathBuf::from("/exp/lm/word")));
        assert!(config.fusion.sub.path.is_none());
    }

    #[test]
    fn rejects_unknown_corpus() {
        let mut cli = parse(&[]);
        cli.corpus = "timit".to_string();

        let err = EvalConfig::try_from(cli).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::UnknownCorpus(_))
        ));
    }

    #[test]
    fn rejects_lm_path_without_weight() {
        let cli = parse(&["--rnnlm-path-sub", "/exp/lm/char"]);

        let err = EvalConfig::try_from(cli).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::AsymmetricFusion { task: Task::Sub, .. })
        ));
    }

    #[test]
    fn rejects_zero_beam_width() {
        let cli = parse(&["--beam-width-sub", "0"]);
        assert!(EvalConfig::try_from(cli).is_err());
    }
}
