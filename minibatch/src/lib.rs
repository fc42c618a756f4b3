pub mod config;
pub mod error;
pub mod randomizer;
pub mod shard;
pub mod source;
pub mod text_format;

pub use config::{
    DeserializerConfig, EpochSize, INFINITE_SAMPLES, InputStreamConfig, MinibatchSourceConfig,
    StreamConfiguration, TEXT_FORMAT_DESERIALIZER, text_format_config,
};
pub use error::{MinibatchError, Result};
pub use shard::{ShardSpec, shard_range};
pub use source::{
    MinibatchData, MinibatchSource, MinibatchSourceBuilder, StreamInformation,
    create_composite_minibatch_source,
};
