pub mod error;
pub mod scenario;

pub use error::ScenarioError;
pub use scenario::{
    FEATURES_STREAM, LABELS_STREAM, MinibatchRecord, WarmStartParams, WarmStartReport,
    run_warm_start, test_minibatch_source_warm_start, text_format_source_with_mock,
};
