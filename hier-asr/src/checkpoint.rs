//! Checkpoint discovery on disk.

use crate::error::{AssemblyError, ConfigError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

const CHECKPOINT_PREFIX: &str = "model.epoch-";

/// Which checkpoint to restore.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EpochSelector {
    /// Highest epoch available
    Latest,
    /// Highest epoch not above the given one
    AtMost(usize),
}

impl TryFrom<i64> for EpochSelector {
    type Error = ConfigError;

    /// `-1` selects the latest checkpoint.
    fn try_from(epoch: i64) -> Result<Self, Self::Error> {
        match epoch {
            -1 => Ok(Self::Latest),
            n if n >= 0 => Ok(Self::AtMost(n as usize)),
            n => Err(ConfigError::InvalidEpoch(n)),
        }
    }
}

impl fmt::Display for EpochSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::AtMost(n) => write!(f, "<= {n}"),
        }
    }
}

/// A checkpoint directory `model.epoch-<N>` under a save path.
///
/// The stored epoch is the next epoch training would have run, so the last
/// completed epoch is `epoch - 1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub dir: PathBuf,
    pub epoch: usize,
}

impl Checkpoint {
    pub fn resolve(save_path: impl AsRef<Path>, selector: EpochSelector) -> Result<Self> {
        let save_path = save_path.as_ref();

        let not_found = || AssemblyError::CheckpointNotFound {
            dir: save_path.to_path_buf(),
            epoch: selector.to_string(),
        };

        let entries = std::fs::read_dir(save_path).map_err(|_| not_found())?;

        let mut best: Option<Self> = None;
        for entry in entries {
            let entry = entry?;
            let Some(epoch) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix(CHECKPOINT_PREFIX))
                .and_then(|n| n.parse::<usize>().ok())
            else {
                continue;
            };

            if let EpochSelector::AtMost(max) = selector
                && epoch > max
            {
                continue;
            }

            if best.as_ref().is_none_or(|b| epoch > b.epoch) {
                best = Some(Self {
                    dir: entry.path(),
                    epoch,
                });
            }
        }

        let checkpoint = best.ok_or_else(not_found)?;

        tracing::debug!(dir = ?checkpoint.dir.display(), epoch = checkpoint.epoch, "resolved checkpoint");

        Ok(checkpoint)
    }

    /// Path of a file the checkpoint must contain.
    pub fn require(&self, file: &'static str) -> Result<PathBuf> {
        let path = self.dir.join(file);
        if path.is_file() {
            Ok(path)
        } else {
            Err(AssemblyError::CheckpointIncomplete {
                dir: self.dir.clone(),
                file,
            }
            .into())
        }
    }
}
