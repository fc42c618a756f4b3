use std::{collections::HashMap, fmt, sync::Arc};

use comms::{Communicator, CommunicatorPtr, LocalCommunicator};
use log::{debug, info};
use ndarray::Array2;

use crate::{
    MinibatchError, MinibatchSourceConfig, Result,
    randomizer::SweepOrder,
    shard::ShardSpec,
    text_format::{Corpus, TextFormatDeserializer},
};

/// Metadata of one stream produced by a minibatch source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamInformation {
    pub id: usize,
    pub name: String,
    pub dim: usize,
    pub is_sparse: bool,
}

/// The samples of one stream delivered by a fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct MinibatchData {
    pub num_samples: usize,
    pub num_sequences: usize,
    /// The global minibatch reached the end of a sweep over the data.
    pub sweep_end: bool,
    /// `[num_samples, dim]`, sparse streams densified.
    pub data: Array2<f32>,
}

/// Builds a [`MinibatchSource`], optionally with an injected communicator.
pub struct MinibatchSourceBuilder {
    config: MinibatchSourceConfig,
    communicator: Option<CommunicatorPtr>,
}

impl MinibatchSourceBuilder {
    pub fn new(config: MinibatchSourceConfig) -> Self {
        Self {
            config,
            communicator: None,
        }
    }

    /// Uses `communicator` to learn the job layout instead of a single-worker one.
    pub fn communicator(mut self, communicator: CommunicatorPtr) -> Self {
        self.communicator = Some(communicator);
        self
    }

    /// Validates the configuration and loads every deserializer's data.
    ///
    /// # Errors
    /// Returns a `MinibatchError` if the configuration is malformed or any
    /// data file cannot be read or parsed.
    pub fn build(self) -> Result<MinibatchSource> {
        let config = self.config;
        config.validate()?;

        let mut streams = Vec::new();
        let mut corpus: Option<Corpus> = None;
        for deserializer in &config.deserializers {
            let inputs = deserializer.streams()?;
            for input in &inputs {
                streams.push(StreamInformation {
                    id: streams.len(),
                    name: input.name.clone(),
                    dim: input.dim,
                    is_sparse: input.is_sparse,
                });
            }

            let loaded = TextFormatDeserializer::new(inputs).load(&deserializer.file)?;
            match corpus.as_mut() {
                Some(corpus) => corpus.merge(loaded)?,
                None => corpus = Some(loaded),
            }
        }

        let Some(corpus) = corpus else {
            return Err(MinibatchError::InvalidConfig(
                "deserializers must not be empty".into(),
            ));
        };

        let communicator = self
            .communicator
            .unwrap_or_else(|| Arc::new(LocalCommunicator::default()));

        info!(
            samples = corpus.len(),
            streams = streams.len(),
            workers = communicator.num_workers(),
            distributed_after = config.distributed_after_sample_count;
            "minibatch source ready"
        );

        let order = SweepOrder::new(
            corpus.len(),
            0,
            config.randomize,
            config.randomization_seed,
        );

        Ok(MinibatchSource {
            epoch_len: config.epoch_size.resolve(corpus.len()),
            corpus,
            streams,
            communicator,
            randomize: config.randomize,
            seed: config.randomization_seed,
            distributed_after: config.distributed_after_sample_count,
            position: 0,
            order,
        })
    }
}

/// Builds a composite minibatch source from `config`.
///
/// # Arguments
/// * `config` - The source configuration.
/// * `communicator` - The job layout, single-worker when `None`.
pub fn create_composite_minibatch_source(
    config: MinibatchSourceConfig,
    communicator: Option<CommunicatorPtr>,
) -> Result<MinibatchSource> {
    let builder = MinibatchSourceBuilder::new(config);
    match communicator {
        Some(c) => builder.communicator(c),
        None => builder,
    }
    .build()
}

/// Serves minibatches from an in-memory corpus.
///
/// The source walks one global sample stream shared by every worker: sweeps
/// over the corpus, each in its own (possibly shuffled) order, repeated until
/// the epoch ends. Until the global position reaches the warm-start threshold
/// every worker reads whole minibatches on its own. From then on the source
/// is distributed and each worker only receives its shard of every global
/// minibatch.
pub struct MinibatchSource {
    corpus: Corpus,
    streams: Vec<StreamInformation>,
    communicator: CommunicatorPtr,
    randomize: bool,
    seed: u64,
    epoch_len: Option<usize>,
    distributed_after: usize,
    /// Global samples consumed so far, across all workers.
    position: usize,
    order: SweepOrder,
}

impl fmt::Debug for MinibatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinibatchSource")
            .field("streams", &self.streams)
            .field("samples", &self.corpus.len())
            .field("epoch_len", &self.epoch_len)
            .field("distributed_after", &self.distributed_after)
            .field("position", &self.position)
            .field("worker", &self.communicator.current_worker())
            .finish_non_exhaustive()
    }
}

impl MinibatchSource {
    pub fn builder(config: MinibatchSourceConfig) -> MinibatchSourceBuilder {
        MinibatchSourceBuilder::new(config)
    }

    /// Returns the metadata of the stream called `name`.
    ///
    /// # Errors
    /// `MinibatchError::UnknownStream` if no such stream is configured.
    pub fn stream_info(&self, name: &str) -> Result<&StreamInformation> {
        self.streams
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| MinibatchError::UnknownStream(name.to_string()))
    }

    pub fn stream_infos(&self) -> &[StreamInformation] {
        &self.streams
    }

    pub fn communicator(&self) -> &CommunicatorPtr {
        &self.communicator
    }

    /// Whether fetches are currently sharded across workers.
    #[inline]
    pub fn is_distributed(&self) -> bool {
        self.position >= self.distributed_after
    }

    #[inline]
    pub fn distributed_after_sample_count(&self) -> usize {
        self.distributed_after
    }

    /// Global samples consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn current_sweep(&self) -> usize {
        self.position / self.corpus.len()
    }

    #[inline]
    pub fn sweep_len(&self) -> usize {
        self.corpus.len()
    }

    /// Moves the global position, as when resuming from a checkpoint.
    pub fn restore_position(&mut self, position: usize) {
        debug!(from = self.position, to = position; "restoring position");
        self.position = position;
    }

    /// Fetches the next minibatch of `size` global samples.
    ///
    /// In distributed mode only this worker's shard of those samples is
    /// delivered, but the global position still advances by the whole
    /// minibatch. Once the epoch is over an empty map is returned.
    ///
    /// # Errors
    /// `MinibatchError::ZeroMinibatch` for `size == 0`,
    /// `MinibatchError::PositionOverflow` when the global position cannot
    /// advance by `size`, `MinibatchError::MinibatchTooLarge` when the
    /// delivered rows cannot be allocated, and `MinibatchError::Comms` if the
    /// source is distributed and the communicator reports an empty job or a
    /// rank outside of it.
    pub fn get_next_minibatch(
        &mut self,
        size: usize,
    ) -> Result<HashMap<StreamInformation, MinibatchData>> {
        if size == 0 {
            return Err(MinibatchError::ZeroMinibatch);
        }

        let size = match self.epoch_len {
            Some(len) => size.min(len.saturating_sub(self.position)),
            None => size,
        };
        if size == 0 {
            debug!(position = self.position; "epoch is over");
            return Ok(HashMap::new());
        }

        let distributed = self.is_distributed();
        let local = if distributed {
            ShardSpec::from_communicator(self.communicator.as_ref())?.range(size)
        } else {
            0..size
        };

        let start = self.position;
        let Some(end) = start.checked_add(size) else {
            return Err(MinibatchError::PositionOverflow {
                position: start,
                size,
            });
        };

        let mut rows = Vec::new();
        rows.try_reserve_exact(local.len())
            .map_err(|_| MinibatchError::MinibatchTooLarge(size))?;
        rows.extend(local.map(|offset| self.row_at(start + offset)));

        let sweep_len = self.corpus.len();
        let sweep_end = (start % sweep_len).saturating_add(size) >= sweep_len;
        let num_sequences = self.corpus.count_sequences(&rows);

        self.position = end;

        debug!(
            position = start,
            size = size,
            delivered = rows.len(),
            distributed = distributed;
            "fetched minibatch"
        );
        if !distributed && self.is_distributed() {
            info!(
                position = self.position,
                rank = self.communicator.rank(),
                workers = self.communicator.num_workers();
                "warm start done, switching to distributed reading"
            );
        }

        Ok(self
            .streams
            .iter()
            .map(|info| {
                let data = MinibatchData {
                    num_samples: rows.len(),
                    num_sequences,
                    sweep_end,
                    data: self.corpus.gather(info.id, &rows),
                };
                (info.clone(), data)
            })
            .collect())
    }

    /// Maps a global position to a corpus row, reshuffling on a new sweep.
    fn row_at(&mut self, position: usize) -> usize {
        let sweep_len = self.corpus.len();
        let sweep = position / sweep_len;
        if self.order.sweep() != sweep {
            self.order = SweepOrder::new(sweep_len, sweep, self.randomize, self.seed);
        }
        self.order.row(position % sweep_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EpochSize, INFINITE_SAMPLES, StreamConfiguration, text_format_config};
    use comms::MockCommunicator;
    use ndarray::array;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn data_file(lines: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for i in 0..lines {
            writeln!(file, "|x {i} {i} |y {}:1", i % 2).unwrap();
        }
        file
    }

    fn config(file: &NamedTempFile) -> MinibatchSourceConfig {
        text_format_config(
            file.path(),
            &[
                StreamConfiguration::new("features", 2).with_alias("x"),
                StreamConfiguration::new("labels", 2).sparse().with_alias("y"),
            ],
        )
        .with_randomize(false)
    }

    #[test]
    fn stream_info_lookup() {
        let file = data_file(4);
        let source = MinibatchSource::builder(config(&file)).build().unwrap();

        let features = source.stream_info("features").unwrap();
        assert_eq!(features.dim, 2);
        assert!(!features.is_sparse);
        assert!(source.stream_info("labels").unwrap().is_sparse);
        assert!(matches!(
            source.stream_info("weights"),
            Err(MinibatchError::UnknownStream(_))
        ));
        assert_eq!(source.stream_infos().len(), 2);
    }

    #[test]
    fn local_mode_delivers_whole_minibatches_and_wraps_sweeps() {
        let file = data_file(3);
        let cfg = config(&file).with_distributed_after(INFINITE_SAMPLES);
        let mut source = MinibatchSource::builder(cfg).build().unwrap();
        let features = source.stream_info("features").unwrap().clone();

        let mb = source.get_next_minibatch(2).unwrap();
        assert_eq!(mb[&features].num_samples, 2);
        assert_eq!(mb[&features].data, array![[0.0, 0.0], [1.0, 1.0]]);
        assert!(!mb[&features].sweep_end);

        let mb = source.get_next_minibatch(2).unwrap();
        assert_eq!(mb[&features].data, array![[2.0, 2.0], [0.0, 0.0]]);
        assert!(mb[&features].sweep_end);
        assert_eq!(source.current_sweep(), 1);
        assert!(!source.is_distributed());
    }

    #[test]
    fn distributed_mode_delivers_the_rank_shard() {
        let file = data_file(8);
        let mock = Arc::new(MockCommunicator::new(2));
        let mut source = MinibatchSource::builder(config(&file))
            .communicator(mock.clone())
            .build()
            .unwrap();
        let features = source.stream_info("features").unwrap().clone();

        assert!(source.is_distributed());
        let mb = source.get_next_minibatch(4).unwrap();
        assert_eq!(mb[&features].num_samples, 2);
        assert_eq!(mb[&features].data, array![[0.0, 0.0], [1.0, 1.0]]);
        assert_eq!(source.position(), 4);

        mock.set_rank(1).unwrap();
        let mb = source.get_next_minibatch(4).unwrap();
        assert_eq!(mb[&features].data, array![[6.0, 6.0], [7.0, 7.0]]);
        assert_eq!(source.position(), 8);
    }

    #[test]
    fn finite_epoch_ends_with_an_empty_minibatch() {
        let file = data_file(4);
        let cfg = config(&file)
            .with_epoch_size(EpochSize::Samples(5))
            .with_distributed_after(INFINITE_SAMPLES);
        let mut source = MinibatchSource::builder(cfg).build().unwrap();
        let labels = source.stream_info("labels").unwrap().clone();

        assert_eq!(source.get_next_minibatch(3).unwrap()[&labels].num_samples, 3);
        assert_eq!(source.get_next_minibatch(3).unwrap()[&labels].num_samples, 2);
        assert!(source.get_next_minibatch(3).unwrap().is_empty());

        let cfg = config(&file)
            .with_epoch_size(EpochSize::FullDataSweep)
            .with_distributed_after(INFINITE_SAMPLES);
        let mut source = MinibatchSource::builder(cfg).build().unwrap();
        let mb = source.get_next_minibatch(10).unwrap();
        assert_eq!(mb[&labels].num_samples, 4);
        assert!(mb[&labels].sweep_end);
        assert!(source.get_next_minibatch(1).unwrap().is_empty());
    }

    #[test]
    fn zero_sized_minibatch_is_rejected() {
        let file = data_file(2);
        let mut source = MinibatchSource::builder(config(&file)).build().unwrap();
        assert!(matches!(
            source.get_next_minibatch(0),
            Err(MinibatchError::ZeroMinibatch)
        ));
    }

    #[test]
    fn empty_job_cannot_distribute() {
        let file = data_file(2);
        let mut source = create_composite_minibatch_source(
            config(&file),
            Some(Arc::new(MockCommunicator::new(0))),
        )
        .unwrap();
        assert!(matches!(
            source.get_next_minibatch(2),
            Err(MinibatchError::Comms(_))
        ));
    }

    #[test]
    fn restore_position_moves_across_the_threshold() {
        let file = data_file(4);
        let cfg = config(&file).with_distributed_after(8);
        let mut source = create_composite_minibatch_source(cfg, None).unwrap();

        assert!(!source.is_distributed());
        source.restore_position(8);
        assert!(source.is_distributed());
        assert_eq!(source.current_sweep(), 2);
    }

    #[test]
    fn oversized_requests_fail_without_moving() {
        let file = data_file(4);
        let cfg = config(&file).with_distributed_after(INFINITE_SAMPLES);
        let mut source = MinibatchSource::builder(cfg).build().unwrap();

        assert!(matches!(
            source.get_next_minibatch(usize::MAX),
            Err(MinibatchError::MinibatchTooLarge(usize::MAX))
        ));
        assert_eq!(source.position(), 0);

        source.restore_position(usize::MAX - 1);
        assert!(matches!(
            source.get_next_minibatch(4),
            Err(MinibatchError::PositionOverflow {
                position,
                size: 4
            }) if position == usize::MAX - 1
        ));
        assert_eq!(source.position(), usize::MAX - 1);

        let mb = source.get_next_minibatch(1).unwrap();
        let features = source.stream_info("features").unwrap();
        assert_eq!(mb[features].num_samples, 1);
        assert_eq!(source.position(), usize::MAX);
    }

    #[test]
    fn build_fails_on_unreadable_or_malformed_data() {
        let streams = [StreamConfiguration::new("features", 2)];
        let cfg = text_format_config("/no/such/file.txt", &streams);
        assert!(matches!(
            MinibatchSource::builder(cfg).build(),
            Err(MinibatchError::Io { .. })
        ));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "|features 1 2 3").unwrap();
        let cfg = text_format_config(file.path(), &streams);
        assert!(matches!(
            MinibatchSource::builder(cfg).build(),
            Err(MinibatchError::Parse { line: 1, .. })
        ));
    }
}
