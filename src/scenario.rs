use std::{path::Path, sync::Arc};

use comms::{CommunicatorPtr, MockCommunicator};
use log::{debug, info};
use minibatch::{EpochSize, MinibatchSource, StreamConfiguration, text_format_config};
use serde::Serialize;

use crate::ScenarioError;

pub const FEATURES_STREAM: &str = "features";
pub const LABELS_STREAM: &str = "labels";

const INPUT_DIM: usize = 2;
const NUM_OUTPUT_CLASSES: usize = 2;
const NUM_WORKERS: usize = 2;

/// Parameters of one warm-start run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmStartParams {
    pub num_minibatches: usize,
    pub minibatch_size: usize,
    /// Global samples after which the source must report distributed mode.
    pub warm_start_samples: usize,
    /// Job size used to compute the expected shard size.
    pub num_workers: usize,
    /// Stream whose delivered sample count is checked.
    pub tracked_stream: String,
}

impl WarmStartParams {
    pub fn new(num_minibatches: usize, minibatch_size: usize, warm_start_samples: usize) -> Self {
        Self {
            num_minibatches,
            minibatch_size,
            warm_start_samples,
            num_workers: NUM_WORKERS,
            tracked_stream: FEATURES_STREAM.to_string(),
        }
    }

    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn tracking(mut self, stream: impl Into<String>) -> Self {
        self.tracked_stream = stream.into();
        self
    }
}

/// What one fetch of the run observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MinibatchRecord {
    pub iteration: usize,
    /// Global samples fetched before this minibatch.
    pub samples_before: usize,
    pub distributed: bool,
    pub delivered: usize,
}

/// The outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmStartReport {
    pub minibatches: Vec<MinibatchRecord>,
    /// First minibatch fetched in distributed mode, if any.
    pub distributed_from: Option<usize>,
    pub total_samples: usize,
}

/// Drives `source` through `params.num_minibatches` fetches, checking the
/// warm-start transition and the per-worker sample count of every one.
///
/// Before each fetch the source must be distributed exactly when the global
/// samples fetched so far reach `params.warm_start_samples`. Each fetch must
/// then deliver the whole minibatch in local mode, or
/// `minibatch_size / num_workers` samples in distributed mode. The running
/// total always grows by the whole minibatch size since it counts samples
/// consumed by the job, not by this worker.
///
/// # Errors
/// Fails on the first mismatch; there is no retry.
pub fn run_warm_start(
    source: &mut MinibatchSource,
    params: &WarmStartParams,
) -> Result<WarmStartReport, ScenarioError> {
    if params.minibatch_size == 0 {
        return Err(ScenarioError::InvalidParams(
            "minibatch_size must be > 0".into(),
        ));
    }
    if params.num_workers == 0 {
        return Err(ScenarioError::InvalidParams(
            "num_workers must be > 0".into(),
        ));
    }

    let tracked = source.stream_info(&params.tracked_stream)?.clone();
    let mut report = WarmStartReport::default();

    for iteration in 0..params.num_minibatches {
        let distributed = source.is_distributed();
        let expected = report.total_samples >= params.warm_start_samples;
        if distributed != expected {
            return Err(ScenarioError::DistributedState {
                iteration,
                expected,
                actual: distributed,
            });
        }

        let minibatch = source.get_next_minibatch(params.minibatch_size)?;

        let expected = if distributed {
            params.minibatch_size / params.num_workers
        } else {
            params.minibatch_size
        };
        let delivered = minibatch.get(&tracked).map_or(0, |data| data.num_samples);
        if delivered != expected {
            return Err(ScenarioError::SampleCount {
                iteration,
                expected,
                actual: delivered,
            });
        }

        debug!(
            iteration = iteration,
            distributed = distributed,
            delivered = delivered;
            "minibatch checked"
        );

        if distributed && report.distributed_from.is_none() {
            report.distributed_from = Some(iteration);
        }
        report.minibatches.push(MinibatchRecord {
            iteration,
            samples_before: report.total_samples,
            distributed,
            delivered,
        });
        report.total_samples += params.minibatch_size;
    }

    info!(
        minibatches = params.num_minibatches,
        total_samples = report.total_samples;
        "warm start verified"
    );
    Ok(report)
}

/// Builds a text-format source wired to an injected communicator.
///
/// # Arguments
/// * `data_file` - The text-format file to read.
/// * `streams` - The streams to read from it.
/// * `epoch_size` - Epoch length of the source.
/// * `randomize` - Whether sweeps are shuffled.
/// * `distributed_after` - Warm-start threshold in global samples.
/// * `communicator` - The (usually mock) job layout.
pub fn text_format_source_with_mock(
    data_file: &Path,
    streams: &[StreamConfiguration],
    epoch_size: EpochSize,
    randomize: bool,
    distributed_after: usize,
    communicator: CommunicatorPtr,
) -> Result<MinibatchSource, ScenarioError> {
    let config = text_format_config(data_file, streams)
        .with_epoch_size(epoch_size)
        .with_randomize(randomize)
        .with_distributed_after(distributed_after);

    Ok(MinibatchSource::builder(config)
        .communicator(communicator)
        .build()?)
}

/// Runs the standard warm-start check: a two-worker mock job reading
/// `features` and `labels` (both of dim 2) without randomization.
pub fn test_minibatch_source_warm_start(
    data_file: &Path,
    num_minibatches: usize,
    minibatch_size: usize,
    warm_start_samples: usize,
) -> Result<WarmStartReport, ScenarioError> {
    let mock = Arc::new(MockCommunicator::new(NUM_WORKERS));

    let mut source = text_format_source_with_mock(
        data_file,
        &[
            StreamConfiguration::new(FEATURES_STREAM, INPUT_DIM),
            StreamConfiguration::new(LABELS_STREAM, NUM_OUTPUT_CLASSES),
        ],
        EpochSize::InfinitelyRepeat,
        false,
        warm_start_samples,
        mock,
    )?;

    let params = WarmStartParams::new(num_minibatches, minibatch_size, warm_start_samples);
    run_warm_start(&mut source, &params)
}
