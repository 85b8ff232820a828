use clap::{ArgAction, Args};
use std::convert::Infallible;
use std::path::PathBuf;

pub const DEFAULT_STREAM_NAME: &str = "ride-predictions";
pub const DEFAULT_RUN_ID: &str = "70123647ea1f49a2889fcff4d7032960";
pub const DEFAULT_MODEL_ID: &str = "m-b312b4c1155a4197af44793c03b32ad4";

/// `TEST_RUN` is on only for a case-insensitive `true`; anything else is off.
fn parse_test_run(s: &str) -> Result<bool, Infallible> {
    Ok(s.trim().eq_ignore_ascii_case("true"))
}

/// Serving settings, read from the environment with CLI overrides.
#[derive(Debug, Clone, Args)]
pub struct ServiceConfig {
    /// Stream that receives prediction envelopes
    #[arg(long, env = "PREDICTIONS_STREAM_NAME", default_value = DEFAULT_STREAM_NAME)]
    pub stream_name: String,

    /// Training run whose preprocessor is served; reported as `version`
    #[arg(long, env = "RUN_ID", default_value = DEFAULT_RUN_ID)]
    pub run_id: String,

    #[arg(long, env = "MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    /// Skip model loading and publishing
    #[arg(long, env = "TEST_RUN", default_value = "False", action = ArgAction::Set, value_parser = parse_test_run)]
    pub test_run: bool,

    #[arg(long, env = "EXPERIMENT_ID", default_value = "1")]
    pub experiment_id: String,

    /// Root directory of the artifact store
    #[arg(long, env = "ARTIFACT_ROOT", default_value = "artifacts")]
    pub artifact_root: PathBuf,

    /// Root directory of the record log
    #[arg(long, env = "STREAM_ROOT", default_value = "streams")]
    pub stream_root: PathBuf,

    #[arg(long, env = "STREAM_SHARDS", default_value_t = 1)]
    pub stream_shards: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            stream_name: DEFAULT_STREAM_NAME.to_string(),
            run_id: DEFAULT_RUN_ID.to_string(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            test_run: false,
            experiment_id: "1".to_string(),
            artifact_root: PathBuf::from("artifacts"),
            stream_root: PathBuf::from("streams"),
            stream_shards: 1,
        }
    }
}
