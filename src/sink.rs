use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, ServiceError};
use crate::stream::RecordLog;
use crate::types::PredictionEnvelope;

/// Side effect run for every envelope, in registration order.
pub trait PublishSink: Send + Sync {
    fn publish(&self, envelope: &PredictionEnvelope) -> Result<()>;
}

/// Appends envelopes to the predictions stream, keyed by ride id so updates
/// for one ride stay ordered within a shard.
pub struct StreamPublisher {
    log: Arc<dyn RecordLog>,
    stream_name: String,
}

impl StreamPublisher {
    pub fn new(log: Arc<dyn RecordLog>, stream_name: impl Into<String>) -> Self {
        Self {
            log,
            stream_name: stream_name.into(),
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }
}

impl PublishSink for StreamPublisher {
    fn publish(&self, envelope: &PredictionEnvelope) -> Result<()> {
        let data = serde_json::to_vec(envelope)?;
        let partition_key = envelope.prediction.ride_id.to_string();
        let out = self
            .log
            .put_record(&self.stream_name, &data, &partition_key)
            .map_err(|e| ServiceError::Publish {
                stream: self.stream_name.clone(),
                message: e.to_string(),
            })?;
        debug!(
            stream = %self.stream_name,
            shard = %out.shard_id,
            seq = out.sequence_number,
            partition_key = %partition_key,
            "published prediction"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RideId;
    use crate::stream::{shard_for_key, shard_id, MemoryRecordLog};

    #[test]
    fn publishes_json_keyed_by_ride_id() {
        let log = Arc::new(MemoryRecordLog::new(4));
        let sink = StreamPublisher::new(log.clone(), "ride-predictions");
        let env = PredictionEnvelope::new("run", RideId::from(123), 21.0);
        sink.publish(&env).unwrap();
        sink.publish(&env).unwrap();

        let shard = shard_id(shard_for_key("123", 4));
        let got = log.get_records("ride-predictions", &shard, 0, 10).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].partition_key, "123");
        let back: PredictionEnvelope = serde_json::from_slice(&got[1].data).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn transport_failure_surfaces_as_publish_error() {
        let log = Arc::new(MemoryRecordLog::new(1));
        let sink = StreamPublisher::new(log, "bad/name");
        let env = PredictionEnvelope::new("run", RideId::from("r1"), 1.0);
        let err = sink.publish(&env).unwrap_err();
        assert!(matches!(err, ServiceError::Publish { ref stream, .. } if stream == "bad/name"));
    }
}
