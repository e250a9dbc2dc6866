//! ETA prediction.
//!
//! Two implementations behind one interface: an always-available heuristic
//! and an optional linear model fit offline on historical deliveries. The
//! model falls back to the heuristic until it has been trained. Both are
//! pure functions of their inputs.

use std::path::Path;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::VehicleKind;

/// Confidence bounds shared by both predictors.
const MIN_CONFIDENCE: f64 = 0.3;
const MAX_CONFIDENCE: f64 = 0.95;

/// Prediction method tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EtaMethod {
    Heuristic,
    Model,
}

/// Inputs to a single ETA prediction
#[derive(Debug, Clone)]
pub struct EtaRequest {
    pub distance_km: f64,
    /// Traffic multiplier: 1.0 = free flow, >1.0 = congestion
    pub traffic_factor: f64,
    pub depart_at: DateTime<Utc>,
    /// Driver experience on a 0-5 scale
    pub driver_experience: f64,
    pub vehicle_kind: VehicleKind,
    /// Order complexity: 1.0 = simple, >1.0 = complex
    pub complexity: f64,
    /// Weather multiplier: 1.0 = clear, >1.0 = degraded
    pub weather_factor: f64,
}

/// A single ETA prediction
#[derive(Debug, Clone)]
pub struct EtaPrediction {
    pub eta: DateTime<Utc>,
    pub minutes: f64,
    pub confidence: f64,
    pub method: EtaMethod,
}

/// ETA predictor interface. Implementations are registered at boot.
pub trait EtaPredictor: Send + Sync {
    fn predict(&self, request: &EtaRequest) -> EtaPrediction;
}

// ===========================================================================
// Heuristic predictor
// ===========================================================================

/// Heuristic ETA: base speed per vehicle kind, degraded by traffic and
/// weather, sped up by driver experience, plus complexity and service time.
pub struct HeuristicEta;

impl HeuristicEta {
    fn confidence(traffic_factor: f64, weather_factor: f64, complexity: f64) -> f64 {
        let mut confidence: f64 = 0.8;
        if traffic_factor > 1.5 {
            confidence -= 0.2;
        }
        if weather_factor > 1.3 {
            confidence -= 0.15;
        }
        if complexity > 2.0 {
            confidence -= 0.1;
        }
        confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
    }
}

impl EtaPredictor for HeuristicEta {
    fn predict(&self, request: &EtaRequest) -> EtaPrediction {
        let base_speed = request.vehicle_kind.base_speed_kmh();

        // Experienced drivers are faster: multiplier in [0.8, 1.2]
        let experience_multiplier = 0.8 + (request.driver_experience / 5.0) * 0.4;
        let adjusted_speed = base_speed / request.traffic_factor.max(0.1)
            / request.weather_factor.max(0.1)
            * experience_multiplier;

        let travel_minutes = request.distance_km / adjusted_speed * 60.0;
        let complexity_minutes = (request.complexity - 1.0).max(0.0) * 10.0;
        let service_minutes = 15.0 * request.complexity;
        let total_minutes = travel_minutes + complexity_minutes + service_minutes;

        EtaPrediction {
            eta: request.depart_at + Duration::seconds((total_minutes * 60.0) as i64),
            minutes: total_minutes,
            confidence: Self::confidence(
                request.traffic_factor,
                request.weather_factor,
                request.complexity,
            ),
            method: EtaMethod::Heuristic,
        }
    }
}

// ===========================================================================
// Linear model predictor
// ===========================================================================

pub const FEATURE_NAMES: [&str; 9] = [
    "distance_km",
    "traffic_factor",
    "hour_of_day",
    "day_of_week",
    "weather_factor",
    "driver_experience",
    "vehicle_kind",
    "order_complexity",
    "historical_avg_minutes",
];

/// One historical delivery used for training
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSample {
    pub request: EtaFeatures,
    pub actual_minutes: f64,
}

/// Feature vector of a delivery, shared between training and prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtaFeatures {
    pub distance_km: f64,
    pub traffic_factor: f64,
    pub hour_of_day: f64,
    pub day_of_week: f64,
    pub weather_factor: f64,
    pub driver_experience: f64,
    pub vehicle_code: f64,
    pub complexity: f64,
    pub historical_avg_minutes: f64,
}

impl EtaFeatures {
    pub fn from_request(request: &EtaRequest) -> Self {
        Self {
            distance_km: request.distance_km,
            traffic_factor: request.traffic_factor,
            hour_of_day: request.depart_at.hour() as f64,
            day_of_week: request.depart_at.weekday().num_days_from_monday() as f64,
            weather_factor: request.weather_factor,
            driver_experience: request.driver_experience,
            vehicle_code: vehicle_code(request.vehicle_kind),
            complexity: request.complexity,
            historical_avg_minutes: historical_average(request.distance_km),
        }
    }

    fn as_array(&self) -> [f64; 9] {
        [
            self.distance_km,
            self.traffic_factor,
            self.hour_of_day,
            self.day_of_week,
            self.weather_factor,
            self.driver_experience,
            self.vehicle_code,
            self.complexity,
            self.historical_avg_minutes,
        ]
    }
}

fn vehicle_code(kind: VehicleKind) -> f64 {
    match kind {
        VehicleKind::Motorcycle => 1.0,
        VehicleKind::Car => 2.0,
        VehicleKind::Van => 3.0,
        VehicleKind::Truck => 4.0,
    }
}

/// Historical average delivery time for a distance band.
fn historical_average(distance_km: f64) -> f64 {
    if distance_km < 5.0 {
        25.0
    } else if distance_km < 15.0 {
        45.0
    } else {
        75.0
    }
}

/// Fitted coefficients, persisted as JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FittedModel {
    intercept: f64,
    coefficients: [f64; 9],
    /// Training residual spread, drives the confidence estimate
    rmse: f64,
    mean_target: f64,
    samples_trained: usize,
}

/// Training metrics returned by `fit`
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub mae: f64,
    pub rmse: f64,
    pub samples_trained: usize,
}

/// Linear-regression ETA model. Thread-safe; untrained instances delegate to
/// the heuristic.
pub struct ModelEta {
    fitted: RwLock<Option<FittedModel>>,
    fallback: HeuristicEta,
}

impl Default for ModelEta {
    fn default() -> Self {
        Self {
            fitted: RwLock::new(None),
            fallback: HeuristicEta,
        }
    }
}

impl ModelEta {
    pub fn is_trained(&self) -> bool {
        self.fitted.read().is_some()
    }

    /// Fit ordinary least squares on the samples (normal equations with a
    /// small ridge term for numeric stability). Deterministic.
    pub fn fit(&self, samples: &[TrainingSample]) -> anyhow::Result<TrainingReport> {
        const DIM: usize = 10; // intercept + 9 features
        if samples.len() < DIM {
            anyhow::bail!("need at least {} samples, got {}", DIM, samples.len());
        }

        // Accumulate X^T X and X^T y
        let mut xtx = [[0.0f64; DIM]; DIM];
        let mut xty = [0.0f64; DIM];
        for sample in samples {
            let mut row = [0.0f64; DIM];
            row[0] = 1.0;
            row[1..].copy_from_slice(&sample.request.as_array());
            for i in 0..DIM {
                for j in 0..DIM {
                    xtx[i][j] += row[i] * row[j];
                }
                xty[i] += row[i] * sample.actual_minutes;
            }
        }
        for (i, row) in xtx.iter_mut().enumerate() {
            row[i] += 1e-6;
        }

        let solution = solve_linear_system(xtx, xty)
            .ok_or_else(|| anyhow::anyhow!("normal equations are singular"))?;

        let mut coefficients = [0.0f64; 9];
        coefficients.copy_from_slice(&solution[1..]);
        let intercept = solution[0];

        // Training metrics
        let mut abs_sum = 0.0;
        let mut sq_sum = 0.0;
        let mut target_sum = 0.0;
        for sample in samples {
            let features = sample.request.as_array();
            let predicted = intercept
                + features
                    .iter()
                    .zip(coefficients.iter())
                    .map(|(x, c)| x * c)
                    .sum::<f64>();
            let err = predicted - sample.actual_minutes;
            abs_sum += err.abs();
            sq_sum += err * err;
            target_sum += sample.actual_minutes;
        }
        let n = samples.len() as f64;
        let report = TrainingReport {
            mae: abs_sum / n,
            rmse: (sq_sum / n).sqrt(),
            samples_trained: samples.len(),
        };

        info!(
            "ETA model trained: {} samples, MAE {:.2}, RMSE {:.2}",
            report.samples_trained, report.mae, report.rmse
        );

        *self.fitted.write() = Some(FittedModel {
            intercept,
            coefficients,
            rmse: report.rmse,
            mean_target: target_sum / n,
            samples_trained: samples.len(),
        });
        Ok(report)
    }

    /// Relative weight of each feature, by absolute coefficient.
    pub fn feature_importance(&self) -> Vec<(&'static str, f64)> {
        let guard = self.fitted.read();
        let Some(model) = guard.as_ref() else {
            return vec![];
        };
        let total: f64 = model.coefficients.iter().map(|c| c.abs()).sum();
        if total == 0.0 {
            return vec![];
        }
        let mut importance: Vec<(&'static str, f64)> = FEATURE_NAMES
            .iter()
            .zip(model.coefficients.iter())
            .map(|(name, c)| (*name, c.abs() / total))
            .collect();
        importance.sort_by(|a, b| b.1.partial_cmp(&a.1).expect("importance is finite"));
        importance
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let guard = self.fitted.read();
        let model = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("model must be trained before saving"))?;
        std::fs::write(path, serde_json::to_vec_pretty(model)?)?;
        info!("ETA model saved to {}", path.display());
        Ok(())
    }

    pub fn load(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = std::fs::read(path)?;
        let model: FittedModel = serde_json::from_slice(&bytes)?;
        info!(
            "ETA model loaded from {} ({} samples)",
            path.display(),
            model.samples_trained
        );
        *self.fitted.write() = Some(model);
        Ok(())
    }

    fn model_confidence(model: &FittedModel) -> f64 {
        // Lower residual spread relative to the mean target = higher confidence
        let coefficient_of_variation = model.rmse / (model.mean_target + 1e-6);
        (1.0 - coefficient_of_variation).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
    }
}

impl EtaPredictor for ModelEta {
    fn predict(&self, request: &EtaRequest) -> EtaPrediction {
        let guard = self.fitted.read();
        let Some(model) = guard.as_ref() else {
            return self.fallback.predict(request);
        };

        let features = EtaFeatures::from_request(request).as_array();
        let minutes = model.intercept
            + features
                .iter()
                .zip(model.coefficients.iter())
                .map(|(x, c)| x * c)
                .sum::<f64>();
        // A fitted line can extrapolate below zero on out-of-range inputs
        let minutes = minutes.max(1.0);

        EtaPrediction {
            eta: request.depart_at + Duration::seconds((minutes * 60.0) as i64),
            minutes,
            confidence: Self::model_confidence(model),
            method: EtaMethod::Model,
        }
    }
}

/// Gaussian elimination with partial pivoting for the 10x10 normal equations.
fn solve_linear_system<const N: usize>(mut a: [[f64; N]; N], mut b: [f64; N]) -> Option<[f64; N]> {
    for col in 0..N {
        let pivot_row = (col..N).max_by(|&i, &j| {
            a[i][col].abs().partial_cmp(&a[j][col].abs()).expect("matrix entries are finite")
        })?;
        if a[pivot_row][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in col + 1..N {
            let factor = a[row][col] / a[col][col];
            for k in col..N {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0f64; N];
    for row in (0..N).rev() {
        let mut sum = b[row];
        for k in row + 1..N {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}

/// Build the predictor configured for this process: the model when a saved
/// fit exists, the heuristic otherwise.
pub fn create_predictor(model_path: Option<&Path>) -> std::sync::Arc<dyn EtaPredictor> {
    if let Some(path) = model_path {
        let model = ModelEta::default();
        if model.load(path).is_ok() {
            return std::sync::Arc::new(model);
        }
    }
    std::sync::Arc::new(HeuristicEta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_request() -> EtaRequest {
        EtaRequest {
            distance_km: 10.0,
            traffic_factor: 1.0,
            depart_at: Utc.with_ymd_and_hms(2026, 3, 16, 9, 0, 0).unwrap(),
            driver_experience: 2.5,
            vehicle_kind: VehicleKind::Van,
            complexity: 1.0,
            weather_factor: 1.0,
        }
    }

    #[test]
    fn test_heuristic_basic_prediction() {
        let prediction = HeuristicEta.predict(&base_request());

        // 10 km at 25 km/h × 1.0 experience multiplier = 24 min + 15 min service
        assert!(prediction.minutes > 30.0 && prediction.minutes < 50.0);
        assert_eq!(prediction.method, EtaMethod::Heuristic);
        assert!((prediction.confidence - 0.8).abs() < f64::EPSILON);
        assert!(prediction.eta > base_request().depart_at);
    }

    #[test]
    fn test_heuristic_traffic_slows_and_lowers_confidence() {
        let mut request = base_request();
        let clear = HeuristicEta.predict(&request);

        request.traffic_factor = 2.0;
        let jammed = HeuristicEta.predict(&request);

        assert!(jammed.minutes > clear.minutes);
        assert!(jammed.confidence < clear.confidence);
    }

    #[test]
    fn test_heuristic_experience_speeds_up() {
        let mut request = base_request();
        request.driver_experience = 0.0;
        let novice = HeuristicEta.predict(&request);
        request.driver_experience = 5.0;
        let expert = HeuristicEta.predict(&request);
        assert!(expert.minutes < novice.minutes);
    }

    #[test]
    fn test_heuristic_complexity_adds_time() {
        let mut request = base_request();
        let simple = HeuristicEta.predict(&request);
        request.complexity = 3.0;
        let complex = HeuristicEta.predict(&request);

        // +20 complexity minutes and +30 service minutes at complexity 3
        assert!(complex.minutes > simple.minutes + 40.0);
        assert!(complex.confidence < simple.confidence);
    }

    #[test]
    fn test_heuristic_confidence_floor() {
        let mut request = base_request();
        request.traffic_factor = 3.0;
        request.weather_factor = 2.0;
        request.complexity = 4.0;
        let prediction = HeuristicEta.predict(&request);
        assert!(prediction.confidence >= MIN_CONFIDENCE);
    }

    #[test]
    fn test_heuristic_is_deterministic() {
        let request = base_request();
        let a = HeuristicEta.predict(&request);
        let b = HeuristicEta.predict(&request);
        assert_eq!(a.minutes, b.minutes);
        assert_eq!(a.eta, b.eta);
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn test_untrained_model_falls_back_to_heuristic() {
        let model = ModelEta::default();
        let prediction = model.predict(&base_request());
        assert_eq!(prediction.method, EtaMethod::Heuristic);
        assert!(model.feature_importance().is_empty());
    }

    /// Synthetic corpus: actual time = 2×distance + 5×traffic + 10.
    fn synthetic_samples() -> Vec<TrainingSample> {
        let mut samples = Vec::new();
        for d in 1..30 {
            for t in 0..3 {
                let distance = d as f64;
                let traffic = 1.0 + t as f64 * 0.4;
                let features = EtaFeatures {
                    distance_km: distance,
                    traffic_factor: traffic,
                    hour_of_day: (8 + d % 10) as f64,
                    day_of_week: (d % 7) as f64,
                    weather_factor: 1.0,
                    driver_experience: 2.5,
                    vehicle_code: 3.0,
                    complexity: 1.0,
                    historical_avg_minutes: historical_average(distance),
                };
                samples.push(TrainingSample {
                    request: features,
                    actual_minutes: 2.0 * distance + 5.0 * traffic + 10.0,
                });
            }
        }
        samples
    }

    #[test]
    fn test_model_learns_linear_relationship() {
        let model = ModelEta::default();
        let report = model.fit(&synthetic_samples()).unwrap();

        assert!(model.is_trained());
        assert!(report.rmse < 1.0, "expected near-exact fit, RMSE {}", report.rmse);

        let mut request = base_request();
        request.distance_km = 12.0;
        request.traffic_factor = 1.4;
        let prediction = model.predict(&request);
        assert_eq!(prediction.method, EtaMethod::Model);

        let expected = 2.0 * 12.0 + 5.0 * 1.4 + 10.0;
        assert!(
            (prediction.minutes - expected).abs() < 2.0,
            "predicted {} expected {}",
            prediction.minutes,
            expected
        );
    }

    #[test]
    fn test_model_confidence_within_bounds() {
        let model = ModelEta::default();
        model.fit(&synthetic_samples()).unwrap();
        let prediction = model.predict(&base_request());
        assert!(prediction.confidence >= MIN_CONFIDENCE);
        assert!(prediction.confidence <= MAX_CONFIDENCE);
    }

    #[test]
    fn test_feature_importance_highlights_distance() {
        let model = ModelEta::default();
        model.fit(&synthetic_samples()).unwrap();

        let importance = model.feature_importance();
        assert_eq!(importance.len(), 9);
        // Distance dominates the synthetic relationship
        assert_eq!(importance[0].0, "distance_km");
        let total: f64 = importance.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_model_save_load_roundtrip() {
        let model = ModelEta::default();
        model.fit(&synthetic_samples()).unwrap();
        let before = model.predict(&base_request());

        let dir = std::env::temp_dir().join("fleetway-eta-model-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.json");
        model.save(&path).unwrap();

        let restored = ModelEta::default();
        restored.load(&path).unwrap();
        let after = restored.predict(&base_request());

        assert_eq!(before.minutes, after.minutes);
        assert_eq!(after.method, EtaMethod::Model);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_fit_rejects_tiny_corpus() {
        let model = ModelEta::default();
        let samples: Vec<TrainingSample> = synthetic_samples().into_iter().take(5).collect();
        assert!(model.fit(&samples).is_err());
        assert!(!model.is_trained());
    }

    #[test]
    fn test_create_predictor_without_model_path() {
        let predictor = create_predictor(None);
        let prediction = predictor.predict(&base_request());
        assert_eq!(prediction.method, EtaMethod::Heuristic);
    }
}
