//! Handwritten-digit canvas and the prediction service client.

use crate::error::SessionError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Side length of the square canvas.
pub const CANVAS_SIZE: usize = 28;

/// A 28x28 grid of pixels, each 0 (empty) or 1 (filled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DigitCanvas {
    pixels: Vec<Vec<u8>>,
}

impl Default for DigitCanvas {
    fn default() -> Self {
        Self {
            pixels: vec![vec![0; CANVAS_SIZE]; CANVAS_SIZE],
        }
    }
}

impl DigitCanvas {
    /// An empty canvas.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a canvas from rows, checking shape and pixel values.
    pub fn from_rows(rows: Vec<Vec<u8>>) -> Result<Self, SessionError> {
        if rows.len() != CANVAS_SIZE {
            return Err(SessionError::InvalidCanvas(format!(
                "expected {} rows, got {}",
                CANVAS_SIZE,
                rows.len()
            )));
        }

        for (i, row) in rows.iter().enumerate() {
            if row.len() != CANVAS_SIZE {
                return Err(SessionError::InvalidCanvas(format!(
                    "row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    CANVAS_SIZE
                )));
            }
            if let Some(value) = row.iter().find(|v| **v > 1) {
                return Err(SessionError::InvalidCanvas(format!(
                    "row {} holds pixel value {}, expected 0 or 1",
                    i, value
                )));
            }
        }

        Ok(Self { pixels: rows })
    }

    /// Fill or clear one pixel. Out-of-range coordinates are ignored.
    pub fn set(&mut self, row: usize, col: usize, filled: bool) {
        if let Some(pixel) = self.pixels.get_mut(row).and_then(|r| r.get_mut(col)) {
            *pixel = u8::from(filled);
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Option<bool> {
        self.pixels
            .get(row)
            .and_then(|r| r.get(col))
            .map(|p| *p == 1)
    }

    pub fn clear(&mut self) {
        for row in &mut self.pixels {
            row.fill(0);
        }
    }

    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|row| row.iter().all(|p| *p == 0))
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.pixels
    }
}

#[derive(Debug, Deserialize)]
struct PredictionBody {
    prediction: Option<u8>,
    error: Option<String>,
}

/// HTTP client for the digit prediction service.
#[derive(Clone)]
pub struct PredictionClient {
    base_url: String,
    client: Client,
}

impl PredictionClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Classify the digit drawn on `canvas`.
    pub async fn predict(&self, canvas: &DigitCanvas) -> Result<u8, SessionError> {
        let url = format!("{}/predict", self.base_url);

        let response = self.client.post(&url).json(canvas).send().await?;
        let status = response.status();

        let body: PredictionBody = response.json().await.map_err(|e| {
            SessionError::Prediction(format!("unreadable response ({}): {}", status, e))
        })?;

        match (status.is_success(), body.prediction, body.error) {
            (true, Some(digit), _) => Ok(digit),
            (_, _, Some(error)) => Err(SessionError::Prediction(error)),
            _ => Err(SessionError::Prediction(format!(
                "prediction service answered {} without a prediction",
                status
            ))),
        }
    }
}
