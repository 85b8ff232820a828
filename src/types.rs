use serde::{Deserialize, Serialize};

use crate::event::RideId;

/// Name reported in every envelope's `model` field.
pub const MODEL_NAME: &str = "ride_duration_prediction_test";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub ride_id: RideId,
    pub predicted_duration: f64,
}

/// What gets returned and published for one ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEnvelope {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub model: String,
    pub version: String,
    pub prediction: Prediction,
}

impl PredictionEnvelope {
    pub fn new(version: &str, ride_id: RideId, predicted_duration: f64) -> Self {
        Self {
            status_code: 200,
            model: MODEL_NAME.to_string(),
            version: version.to_string(),
            prediction: Prediction {
                ride_id,
                predicted_duration,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub predictions: Vec<PredictionEnvelope>,
}

// Response of the direct /predict endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationOut {
    pub duration: f64,
    pub model_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_wire_shape() {
        let env = PredictionEnvelope::new("70123647ea1f49a2889fcff4d7032960", RideId::from(123), 41.28146743774414);
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({
                "statusCode": 200,
                "model": "ride_duration_prediction_test",
                "version": "70123647ea1f49a2889fcff4d7032960",
                "prediction": {"ride_id": 123, "predicted_duration": 41.28146743774414}
            })
        );
    }
}
