use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{MinibatchError, Result, text_format::InputStream};

/// Threshold value that keeps a source out of distributed mode forever.
pub const INFINITE_SAMPLES: usize = usize::MAX;

/// The only deserializer type this crate knows how to build.
pub const TEXT_FORMAT_DESERIALIZER: &str = "CNTKTextFormatDeserializer";

const SPARSE: &str = "sparse";
const DENSE: &str = "dense";

/// How many samples make up one epoch of a minibatch source.
///
/// In JSON it is either a sample count or one of `"infinite"` / `"sweep"`.
/// `usize::MAX` as a count also means infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawEpochSize", into = "RawEpochSize")]
pub enum EpochSize {
    #[default]
    InfinitelyRepeat,
    /// Exactly one pass over the data.
    FullDataSweep,
    Samples(usize),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawEpochSize {
    Count(usize),
    Named(String),
}

impl TryFrom<RawEpochSize> for EpochSize {
    type Error = String;

    fn try_from(value: RawEpochSize) -> std::result::Result<Self, Self::Error> {
        match value {
            RawEpochSize::Count(0) => Err("epochSize must be > 0".into()),
            RawEpochSize::Count(usize::MAX) => Ok(Self::InfinitelyRepeat),
            RawEpochSize::Count(n) => Ok(Self::Samples(n)),
            RawEpochSize::Named(name) => match name.as_str() {
                "infinite" => Ok(Self::InfinitelyRepeat),
                "sweep" => Ok(Self::FullDataSweep),
                other => Err(format!("unknown epochSize: {other}")),
            },
        }
    }
}

impl From<EpochSize> for RawEpochSize {
    fn from(value: EpochSize) -> Self {
        match value {
            EpochSize::InfinitelyRepeat => Self::Named("infinite".into()),
            EpochSize::FullDataSweep => Self::Named("sweep".into()),
            EpochSize::Samples(n) => Self::Count(n),
        }
    }
}

impl EpochSize {
    /// Resolves the epoch to a sample count for a corpus of `sweep_len` samples.
    ///
    /// # Returns
    /// `None` for an epoch that never ends.
    pub fn resolve(self, sweep_len: usize) -> Option<usize> {
        match self {
            Self::InfinitelyRepeat => None,
            Self::FullDataSweep => Some(sweep_len),
            Self::Samples(n) => Some(n),
        }
    }
}

/// Per-stream settings of a deserializer's `input` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputStreamConfig {
    pub dim: usize,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

fn default_format() -> String {
    DENSE.to_string()
}

fn default_randomize() -> bool {
    true
}

/// One entry of the `deserializers` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeserializerConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub file: PathBuf,
    pub input: BTreeMap<String, InputStreamConfig>,
}

impl DeserializerConfig {
    /// Resolves the `input` section into the streams the deserializer reads.
    pub(crate) fn streams(&self) -> Result<Vec<InputStream>> {
        self.input
            .iter()
            .map(|(name, cfg)| {
                if cfg.dim == 0 {
                    return Err(MinibatchError::InvalidConfig(format!(
                        "stream '{name}' must have dim > 0"
                    )));
                }

                let is_sparse = match cfg.format.as_str() {
                    SPARSE => true,
                    DENSE => false,
                    other => {
                        return Err(MinibatchError::InvalidConfig(format!(
                            "stream '{name}' has unknown format: {other}"
                        )));
                    }
                };

                let alias = match cfg.alias.as_deref() {
                    Some(alias) if !alias.is_empty() => alias.to_string(),
                    _ => name.clone(),
                };

                Ok(InputStream {
                    name: name.clone(),
                    alias,
                    dim: cfg.dim,
                    is_sparse,
                })
            })
            .collect()
    }
}

/// The full configuration of a composite minibatch source.
///
/// Field names follow the source dictionary keys (`epochSize`,
/// `distributedAfterSampleCount`, ...), so a JSON file written for the
/// dictionary form loads as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinibatchSourceConfig {
    #[serde(default)]
    pub epoch_size: EpochSize,
    #[serde(default = "default_randomize")]
    pub randomize: bool,
    #[serde(default)]
    pub randomization_seed: u64,
    /// Global sample count after which the source starts sharding.
    #[serde(default)]
    pub distributed_after_sample_count: usize,
    pub deserializers: Vec<DeserializerConfig>,
}

impl MinibatchSourceConfig {
    /// Parses a configuration from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a configuration from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| MinibatchError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn with_epoch_size(mut self, epoch_size: EpochSize) -> Self {
        self.epoch_size = epoch_size;
        self
    }

    pub fn with_randomize(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.randomization_seed = seed;
        self
    }

    pub fn with_distributed_after(mut self, samples: usize) -> Self {
        self.distributed_after_sample_count = samples;
        self
    }

    /// Checks everything that can be checked without reading data.
    ///
    /// # Errors
    /// Returns `MinibatchError::InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.deserializers.is_empty() {
            return Err(MinibatchError::InvalidConfig(
                "deserializers must not be empty".into(),
            ));
        }

        if self.epoch_size == EpochSize::Samples(0) {
            return Err(MinibatchError::InvalidConfig("epochSize must be > 0".into()));
        }

        let mut names = HashSet::new();
        for deserializer in &self.deserializers {
            if deserializer.kind != TEXT_FORMAT_DESERIALIZER {
                return Err(MinibatchError::InvalidConfig(format!(
                    "unknown deserializer type: {}",
                    deserializer.kind
                )));
            }

            if deserializer.input.is_empty() {
                return Err(MinibatchError::InvalidConfig(format!(
                    "deserializer for '{}' has no input streams",
                    deserializer.file.display()
                )));
            }

            for stream in deserializer.streams()? {
                if !names.insert(stream.name.clone()) {
                    return Err(MinibatchError::InvalidConfig(format!(
                        "duplicate stream name: {}",
                        stream.name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Describes one input stream of a text-format file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfiguration {
    pub name: String,
    pub dim: usize,
    pub is_sparse: bool,
    /// Name used for the stream inside the file. Empty means `name`.
    pub alias: String,
}

impl StreamConfiguration {
    pub fn new(name: impl Into<String>, dim: usize) -> Self {
        Self {
            name: name.into(),
            dim,
            is_sparse: false,
            alias: String::new(),
        }
    }

    pub fn sparse(mut self) -> Self {
        self.is_sparse = true;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }
}

impl From<(&str, usize)> for StreamConfiguration {
    fn from((name, dim): (&str, usize)) -> Self {
        Self::new(name, dim)
    }
}

/// Builds the configuration of a source reading one text-format file.
///
/// The epoch repeats forever, samples are randomized and distribution starts
/// at sample 0; use the `with_*` setters to change any of those.
pub fn text_format_config(
    path: impl Into<PathBuf>,
    streams: &[StreamConfiguration],
) -> MinibatchSourceConfig {
    let input = streams
        .iter()
        .map(|s| {
            let cfg = InputStreamConfig {
                dim: s.dim,
                format: if s.is_sparse { SPARSE } else { DENSE }.to_string(),
                alias: (!s.alias.is_empty()).then(|| s.alias.clone()),
            };
            (s.name.clone(), cfg)
        })
        .collect();

    MinibatchSourceConfig {
        epoch_size: EpochSize::InfinitelyRepeat,
        randomize: true,
        randomization_seed: 0,
        distributed_after_sample_count: 0,
        deserializers: vec![DeserializerConfig {
            kind: TEXT_FORMAT_DESERIALIZER.to_string(),
            file: path.into(),
            input,
        }],
    }
}
