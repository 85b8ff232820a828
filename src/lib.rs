//! Taxi ride duration prediction served from stream records.
//!
//! A batch of base64 JSON ride events comes in, each ride is vectorized and
//! scored by a boosted-tree model, and every prediction envelope is published
//! to an output stream before the batch response is returned.

pub mod artifacts;
pub mod booster;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod features;
pub mod model;
pub mod server;
pub mod service;
pub mod sink;
pub mod stream;
pub mod types;

pub use error::{Result, ServiceError};
pub use event::{InvocationEvent, RideEvent, RideId, RideRecord};
pub use features::{DictVectorizer, FeatureVector, Preprocessor};
pub use model::{PredictionAdapter, Regressor};
pub use service::{init, ModelService};
pub use types::{InvocationResponse, PredictionEnvelope, MODEL_NAME};
