use tracing::{info, warn};

use crate::booster::XgbBooster;
use crate::error::{Result, ServiceError};
use crate::event::RideRecord;
use crate::features::{DictVectorizer, FeatureVector, Preprocessor};

/// Batch scorer over sparse rows. One output per input row.
pub trait Regressor: Send + Sync {
    fn predict_batch(&self, rows: &[FeatureVector]) -> Result<Vec<f32>>;
}

/// Fitted preprocessor plus trained model, as loaded for one serving run.
pub struct PredictionAdapter {
    preprocessor: Box<dyn Preprocessor>,
    model: Box<dyn Regressor>,
}

impl PredictionAdapter {
    pub fn new(preprocessor: impl Preprocessor + 'static, model: impl Regressor + 'static) -> Self {
        Self {
            preprocessor: Box::new(preprocessor),
            model: Box::new(model),
        }
    }

    /// Build from the raw bytes of the two stored artifacts: the booster's
    /// JSON model and the vectorizer state.
    pub fn from_artifacts(model_json: &[u8], preprocessor_json: &[u8]) -> Result<Self> {
        let booster = XgbBooster::from_json(model_json)?;
        let vectorizer = DictVectorizer::from_json(preprocessor_json)?;

        let in_dim = vectorizer.dimension();
        if booster.num_feature() != in_dim {
            warn!(
                "model num_feature ({}) != preprocessor dimension ({})",
                booster.num_feature(),
                in_dim
            );
        }
        // Probe with an empty row so a shape mismatch fails at load, not per request.
        booster.predict_row(&FeatureVector::from_entries(in_dim, Vec::new()))?;
        info!(trees = booster.num_trees(), in_dim, "loaded booster and preprocessor");

        Ok(Self::new(vectorizer, booster))
    }

    pub fn dimension(&self) -> usize {
        self.preprocessor.dimension()
    }

    /// Deterministic: the same ride always yields the same row.
    pub fn process_features(&self, ride: &RideRecord) -> Result<FeatureVector> {
        self.preprocessor.transform(ride)
    }

    /// Score one row as a single-row batch and return its only output.
    pub fn predict(&self, features: &FeatureVector) -> Result<f64> {
        let out = self.model.predict_batch(std::slice::from_ref(features))?;
        out.first()
            .map(|&p| p as f64)
            .ok_or(ServiceError::EmptyPrediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booster::tests::stump_model;
    use serde_json::json;

    struct Fixed(Vec<f32>);

    impl Regressor for Fixed {
        fn predict_batch(&self, _rows: &[FeatureVector]) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    fn vectorizer() -> DictVectorizer {
        DictVectorizer::fit(&[RideRecord::new("43_151", 18.4), RideRecord::new("1_2", 3.0)])
    }

    #[test]
    fn predict_takes_first_output_as_f64() {
        let adapter = PredictionAdapter::new(vectorizer(), Fixed(vec![15.5]));
        let row = adapter.process_features(&RideRecord::new("43_151", 18.4)).unwrap();
        let p = adapter.predict(&row).unwrap();
        assert_eq!(p, 15.5);
        assert_eq!(adapter.predict(&row).unwrap(), p);
    }

    #[test]
    fn empty_model_output_is_an_error() {
        let adapter = PredictionAdapter::new(vectorizer(), Fixed(vec![]));
        let row = adapter.process_features(&RideRecord::new("43_151", 18.4)).unwrap();
        assert!(matches!(adapter.predict(&row), Err(ServiceError::EmptyPrediction)));
    }

    #[test]
    fn loads_from_artifact_bytes() {
        // vocabulary: PU_DO=1_2, PU_DO=43_151, trip_distance
        let model = stump_model("reg:squarederror", json!(0.0));
        let dv = vectorizer();
        let adapter =
            PredictionAdapter::from_artifacts(model.to_string().as_bytes(), &dv.to_json().unwrap()).unwrap();
        assert_eq!(adapter.dimension(), 3);

        let row = adapter.process_features(&RideRecord::new("43_151", 18.4)).unwrap();
        // col2 = 18.4 → 20, col0 missing → default left 1
        assert_eq!(adapter.predict(&row).unwrap(), 21.0);
    }

    #[test]
    fn zero_distance_is_compared_against_the_split() {
        let model = stump_model("reg:squarederror", json!(0.0));
        let dv = vectorizer();
        let adapter =
            PredictionAdapter::from_artifacts(model.to_string().as_bytes(), &dv.to_json().unwrap()).unwrap();

        let row = adapter.process_features(&RideRecord::new("43_151", 0.0)).unwrap();
        assert_eq!(row.get(2), Some(0.0));
        // col2 = 0 < 10 → 5, col0 missing → default left 1
        assert_eq!(adapter.predict(&row).unwrap(), 6.0);
    }

    #[test]
    fn rejects_preprocessor_wider_than_model() {
        let model = stump_model("reg:squarederror", json!(0.0));
        let rides: Vec<RideRecord> = (0..5).map(|i| RideRecord::new(format!("{i}_{i}"), 1.0)).collect();
        let dv = DictVectorizer::fit(&rides);
        let err = PredictionAdapter::from_artifacts(model.to_string().as_bytes(), &dv.to_json().unwrap());
        assert!(matches!(err, Err(ServiceError::Model(_))));
    }
}
