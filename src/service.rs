use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::artifacts::{load_adapter, ArtifactStore};
use crate::codec;
use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::event::{InvocationEvent, RideEvent, RideRecord};
use crate::features::FeatureVector;
use crate::model::PredictionAdapter;
use crate::sink::{PublishSink, StreamPublisher};
use crate::stream::RecordLog;
use crate::types::{InvocationResponse, PredictionEnvelope};

/// Turns batches of stream records into prediction envelopes.
///
/// Built once per process and never mutated afterwards. A batch is
/// all-or-nothing: the first failing record aborts the call and no
/// predictions are returned for the rest of the batch, including records
/// that were already published.
pub struct ModelService {
    adapter: Option<PredictionAdapter>,
    run_id: String,
    model_id: String,
    test_run: bool,
    sinks: Vec<Box<dyn PublishSink>>,
}

impl ModelService {
    pub fn new(
        adapter: Option<PredictionAdapter>,
        run_id: impl Into<String>,
        model_id: impl Into<String>,
        test_run: bool,
        sinks: Vec<Box<dyn PublishSink>>,
    ) -> Self {
        Self {
            adapter,
            run_id: run_id.into(),
            model_id: model_id.into(),
            test_run,
            sinks,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn test_run(&self) -> bool {
        self.test_run
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    fn adapter(&self) -> Result<&PredictionAdapter> {
        self.adapter.as_ref().ok_or(ServiceError::ModelNotLoaded)
    }

    pub fn process_features(&self, ride: &RideRecord) -> Result<FeatureVector> {
        self.adapter()?.process_features(ride)
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<f64> {
        self.adapter()?.predict(features)
    }

    /// Score one ride without publishing anything.
    pub fn predict_ride(&self, ride: &RideRecord) -> Result<f64> {
        let features = self.process_features(ride)?;
        self.predict(&features)
    }

    pub fn handle(&self, event: &InvocationEvent) -> Result<InvocationResponse> {
        let mut predictions = Vec::with_capacity(event.records.len());

        for (i, record) in event.records.iter().enumerate() {
            let payload = codec::decode(&record.kinesis.data)?;
            let RideEvent { ride, ride_id } = RideEvent::from_value(&payload)?;

            let features = self.process_features(&ride)?;
            let prediction = self.predict(&features)?;
            debug!(record = i, ride_id = %ride_id, nnz = features.nnz(), prediction, "scored ride");

            let envelope = PredictionEnvelope::new(&self.run_id, ride_id, prediction);
            for sink in &self.sinks {
                sink.publish(&envelope)?;
            }
            predictions.push(envelope);
        }

        Ok(InvocationResponse { predictions })
    }

    /// Same as [`handle`](Self::handle) for a payload that has not been
    /// checked against the invocation shape yet.
    pub fn handle_value(&self, event: &Value) -> Result<InvocationResponse> {
        let event: InvocationEvent = serde_json::from_value(event.clone())
            .map_err(|e| ServiceError::InvalidEvent(e.to_string()))?;
        self.handle(&event)
    }
}

/// One-time construction from configuration. A test run loads nothing and
/// publishes nowhere.
pub fn init(config: &ServiceConfig, store: &dyn ArtifactStore, log: Arc<dyn RecordLog>) -> Result<ModelService> {
    if config.test_run {
        warn!(run_id = %config.run_id, "test run: model loading and publishing disabled");
        return Ok(ModelService::new(
            None,
            &config.run_id,
            &config.model_id,
            true,
            Vec::new(),
        ));
    }

    let adapter = load_adapter(store, &config.experiment_id, &config.run_id, &config.model_id)?;
    let publisher = StreamPublisher::new(log, &config.stream_name);
    info!(
        run_id = %config.run_id,
        model_id = %config.model_id,
        stream = %publisher.stream_name(),
        "model service ready"
    );
    Ok(ModelService::new(
        Some(adapter),
        &config.run_id,
        &config.model_id,
        false,
        vec![Box::new(publisher)],
    ))
}
