use crate::error::PredictError;
use crate::service::Prediction;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Body of `POST /api/predict`: a canvas as a data URL
#[derive(Deserialize, Serialize)]
pub struct PredictRequest {
    pub image: String,
}

impl Debug for PredictRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PredictRequest {{ image: <{} bytes> }}", self.image.len())
    }
}

/// Either a prediction or a flat error message. Clients tell them apart by
/// which keys are present
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PredictResponse {
    Prediction { predicted_number: u8, score: f64 },
    Error { error: String },
}

impl From<Prediction> for PredictResponse {
    fn from(p: Prediction) -> Self {
        PredictResponse::Prediction {
            predicted_number: p.predicted_number,
            score: p.score,
        }
    }
}

impl From<&PredictError> for PredictResponse {
    fn from(err: &PredictError) -> Self {
        PredictResponse::Error {
            error: err.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
}
