//! Everything that can go wrong between receiving an encoded canvas and
//! producing a prediction

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictError {
    /// The payload has no `,` between the mime prefix and the data
    #[error("malformed image payload: expected `<mime prefix>,<base64 data>`")]
    MalformedPayload,

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("cannot decode image: {0}")]
    UndecodableImage(#[from] image::ImageError),

    /// No pixel rises above the ink threshold. Existing clients match on
    /// this exact message
    #[error("blackboard")]
    BlankCanvas,

    #[error("inference failed: {0}")]
    Inference(String),
}

impl PredictError {
    /// Stable tag for the failure, independent of the message text
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::MalformedPayload => "malformed_payload",
            PredictError::InvalidBase64(_) => "invalid_base64",
            PredictError::UndecodableImage(_) => "undecodable_image",
            PredictError::BlankCanvas => "blank_canvas",
            PredictError::Inference(_) => "inference",
        }
    }
}

impl From<anyhow::Error> for PredictError {
    fn from(err: anyhow::Error) -> Self {
        PredictError::Inference(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, PredictError>;
