use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Result, ServiceError};
use crate::features::FeatureValue;

// ---------- Invocation payload ----------

/// Batch of stream records handed to one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationEvent {
    #[serde(rename = "Records")]
    pub records: Vec<StreamRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    pub kinesis: StreamPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamPayload {
    /// base64 of the UTF-8 JSON ride event
    pub data: String,
}

impl InvocationEvent {
    /// Wrap already-encoded payloads into an invocation event.
    pub fn from_payloads<I, S>(payloads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let records = payloads
            .into_iter()
            .map(|data| StreamRecord {
                kinesis: StreamPayload { data: data.into() },
            })
            .collect();
        Self { records }
    }
}

// ---------- Ride event ----------

/// Ride id as sent by the publisher; echoed back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RideId {
    Text(String),
    Number(serde_json::Number),
}

impl fmt::Display for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RideId::Text(s) => f.write_str(s),
            RideId::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for RideId {
    fn from(s: &str) -> Self {
        RideId::Text(s.to_string())
    }
}

impl From<i64> for RideId {
    fn from(n: i64) -> Self {
        RideId::Number(n.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRecord {
    #[serde(rename = "PU_DO")]
    pub pu_do: String,
    pub trip_distance: f64,
}

impl RideRecord {
    pub fn new(pu_do: impl Into<String>, trip_distance: f64) -> Self {
        Self {
            pu_do: pu_do.into(),
            trip_distance,
        }
    }

    /// Build the zone-pair key from separate pickup and dropoff zones.
    pub fn from_locations(pickup: &LocationId, dropoff: &LocationId, trip_distance: f64) -> Self {
        Self::new(format!("{}_{}", pickup, dropoff), trip_distance)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value.as_object().ok_or(ServiceError::WrongType {
            field: "ride",
            expected: "object",
        })?;
        let pu_do = match obj.get("PU_DO") {
            None => return Err(ServiceError::MissingField("ride.PU_DO")),
            Some(Value::String(s)) => s.clone(),
            Some(_) => {
                return Err(ServiceError::WrongType {
                    field: "ride.PU_DO",
                    expected: "string",
                })
            }
        };
        // Negative distances are accepted as-is.
        let trip_distance = obj
            .get("trip_distance")
            .ok_or(ServiceError::MissingField("ride.trip_distance"))?
            .as_f64()
            .ok_or(ServiceError::WrongType {
                field: "ride.trip_distance",
                expected: "number",
            })?;
        Ok(Self {
            pu_do,
            trip_distance,
        })
    }

    /// Named feature inputs handed to the preprocessor.
    pub fn features(&self) -> Vec<(&'static str, FeatureValue<'_>)> {
        vec![
            ("PU_DO", FeatureValue::Category(&self.pu_do)),
            ("trip_distance", FeatureValue::Number(self.trip_distance)),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideEvent {
    pub ride: RideRecord,
    pub ride_id: RideId,
}

impl RideEvent {
    /// Validate a decoded payload. `ride` is checked before `ride_id`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj: &Map<String, Value> = value.as_object().ok_or(ServiceError::WrongType {
            field: "payload",
            expected: "object",
        })?;
        let ride = obj.get("ride").ok_or(ServiceError::MissingField("ride"))?;
        let ride_id = match obj.get("ride_id") {
            None => return Err(ServiceError::MissingField("ride_id")),
            Some(Value::String(s)) => RideId::Text(s.clone()),
            Some(Value::Number(n)) => RideId::Number(n.clone()),
            Some(_) => {
                return Err(ServiceError::WrongType {
                    field: "ride_id",
                    expected: "string or number",
                })
            }
        };
        Ok(Self {
            ride: RideRecord::from_value(ride)?,
            ride_id,
        })
    }
}

// ---------- Direct prediction request ----------

/// Taxi zone id; the web form sends numbers, some clients send strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocationId {
    Id(i64),
    Name(String),
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationId::Id(id) => write!(f, "{}", id),
            LocationId::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RideRequest {
    #[serde(rename = "PULocationID")]
    pub pickup: LocationId,
    #[serde(rename = "DOLocationID")]
    pub dropoff: LocationId,
    pub trip_distance: f64,
}

impl From<&RideRequest> for RideRecord {
    fn from(req: &RideRequest) -> Self {
        RideRecord::from_locations(&req.pickup, &req.dropoff, req.trip_distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validates_complete_event() {
        let v = json!({"ride": {"PU_DO": "43_151", "trip_distance": 18.4}, "ride_id": "abc"});
        let ev = RideEvent::from_value(&v).unwrap();
        assert_eq!(ev.ride, RideRecord::new("43_151", 18.4));
        assert_eq!(ev.ride_id, RideId::from("abc"));
    }

    #[test]
    fn missing_ride_is_reported_before_ride_id() {
        let err = RideEvent::from_value(&json!({})).unwrap_err();
        assert!(matches!(err, ServiceError::MissingField("ride")));

        let err = RideEvent::from_value(&json!({"ride_id": "test_123"})).unwrap_err();
        assert!(matches!(err, ServiceError::MissingField("ride")));

        let err = RideEvent::from_value(&json!({"ride": {"PU_DO": "1_2", "trip_distance": 1.0}})).unwrap_err();
        assert!(matches!(err, ServiceError::MissingField("ride_id")));
    }

    #[test]
    fn rejects_wrong_types() {
        let err = RideEvent::from_value(&json!("just a string")).unwrap_err();
        assert!(matches!(err, ServiceError::WrongType { field: "payload", .. }));

        let err = RideEvent::from_value(&json!({"ride": {"PU_DO": 43, "trip_distance": 1.0}, "ride_id": 1})).unwrap_err();
        assert!(matches!(err, ServiceError::WrongType { field: "ride.PU_DO", .. }));

        let err = RideEvent::from_value(&json!({"ride": {"PU_DO": "1_2", "trip_distance": 1.0}, "ride_id": [1]})).unwrap_err();
        assert!(matches!(err, ServiceError::WrongType { field: "ride_id", .. }));
    }

    #[test]
    fn missing_ride_fields_are_named() {
        let err = RideRecord::from_value(&json!({"PU_DO": "43_151"})).unwrap_err();
        assert!(matches!(err, ServiceError::MissingField("ride.trip_distance")));
    }

    #[test]
    fn negative_distance_passes_through() {
        let ride = RideRecord::from_value(&json!({"PU_DO": "43_151", "trip_distance": -5.0})).unwrap();
        assert_eq!(ride.trip_distance, -5.0);
    }

    #[test]
    fn numeric_ride_id_is_echoed_verbatim() {
        let v = json!({"ride": {"PU_DO": "1_2", "trip_distance": 3}, "ride_id": 123});
        let ev = RideEvent::from_value(&v).unwrap();
        assert_eq!(serde_json::to_value(&ev.ride_id).unwrap(), json!(123));
        assert_eq!(ev.ride_id.to_string(), "123");
    }

    #[test]
    fn ride_request_joins_zones() {
        let req: RideRequest =
            serde_json::from_value(json!({"PULocationID": 10, "DOLocationID": "54", "trip_distance": 40})).unwrap();
        let ride = RideRecord::from(&req);
        assert_eq!(ride.pu_do, "10_54");
        assert_eq!(ride.trip_distance, 40.0);
    }
}
