//! The prediction service: decode a canvas, normalize it, run the model and
//! report the most likely digit

use crate::config::NUM_CLASSES;
use crate::error::{PredictError, Result};
use crate::normalize;
use crate::torch::Classifier;
use base64::{engine::general_purpose, Engine as _};
use image::DynamicImage;
use tracing::debug;

/// A data URL such as `data:image/png;base64,iVBORw0...`, split into its
/// two halves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedImage<'a> {
    pub header: &'a str,
    pub payload: &'a str,
}

impl<'a> EncodedImage<'a> {
    /// Split on the first `,`
    pub fn parse(data: &'a str) -> Result<Self> {
        let (header, payload) = data.split_once(',').ok_or(PredictError::MalformedPayload)?;
        Ok(EncodedImage { header, payload })
    }

    /// The mime type named in the header, if it follows the data URL form
    pub fn mime_type(&self) -> Option<&'a str> {
        let mime = self.header.strip_prefix("data:")?;
        let mime = mime.split(';').next()?;
        (!mime.is_empty()).then_some(mime)
    }

    /// Base64-decode the payload and decode the image it carries. The format
    /// is sniffed from the bytes, not taken from the header
    pub fn decode(&self) -> Result<DynamicImage> {
        let bytes = general_purpose::STANDARD.decode(self.payload.trim())?;
        Ok(image::load_from_memory(&bytes)?)
    }
}

/// The most likely digit and its probability
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub predicted_number: u8,

    /// Probability of `predicted_number`, rounded to two decimals
    pub score: f64,
}

impl Prediction {
    /// Pick the arg-max class. Ties go to the lowest digit
    pub fn from_probabilities(probs: &[f32]) -> Result<Prediction> {
        if probs.len() != NUM_CLASSES {
            return Err(PredictError::Inference(format!(
                "model returned {} probabilities, expected {NUM_CLASSES}",
                probs.len()
            )));
        }
        if let Some(bad) = probs.iter().find(|p| !p.is_finite()) {
            return Err(PredictError::Inference(format!(
                "model returned a non-finite probability ({bad})"
            )));
        }

        let (class, prob) = probs
            .iter()
            .enumerate()
            .fold((0, probs[0]), |best, (i, &p)| if p > best.1 { (i, p) } else { best });

        Ok(Prediction {
            predicted_number: class as u8,
            score: round2(prob as f64),
        })
    }
}

/// Two decimals, halves to even. `x` comes from an `f32`, so `x * 100.0` is
/// exact and a tie like 0.625 stays a tie
fn round2(x: f64) -> f64 {
    (x * 100.0).round_ties_even() / 100.0
}

/// Owns the model for the lifetime of the process. Requests only ever
/// borrow it immutably
#[derive(Debug)]
pub struct PredictionService {
    model: Box<dyn Classifier>,
}

impl PredictionService {
    pub fn new(model: Box<dyn Classifier>) -> Self {
        PredictionService { model }
    }

    pub fn model_kind(&self) -> &'static str {
        self.model.kind()
    }

    /// Run one encoded canvas through decode, normalization and inference
    #[tracing::instrument(skip_all, fields(payload_len = data.len()))]
    pub fn predict(&self, data: &str) -> Result<Prediction> {
        let encoded = EncodedImage::parse(data)?;
        debug!("decoding {:?} image", encoded.mime_type().unwrap_or("unknown"));

        let image = encoded.decode()?;
        debug!("decoded {}x{} image", image.width(), image.height());

        let tensor = normalize::normalize(&image)?;
        let probs = self.model.probabilities(&tensor)?;
        Prediction::from_probabilities(&probs)
    }
}
