//! Per-tile search for the most aggressive acceptable codec distance.
//!
//! The search is a bisection over `[dist_min, dist_max]` that keeps the
//! highest passing distance seen so far. It assumes similarity falls as the
//! distance grows. Real codecs are not strictly monotonic, so the result is
//! a passing point near the crossing, not a guaranteed global optimum.
//!
//! Cost is bounded: one probe at `dist_min`, then at most `max_iters`
//! midpoint evaluations, each one encode, one decode and one similarity
//! score.
//!
//! # Example
//!
//! ```rust,ignore
//! use tissue_tiler::search::{QualitySearch, SearchParams};
//!
//! let params = SearchParams::from_config(&config.encoder, &config.jxl);
//! let search = QualitySearch::new(&codec, &metric, params)?;
//! let outcome = search.run(&pixels)?;
//! println!("d={:.3} ssim={:.4}", outcome.distance, outcome.score);
//! ```

use std::time::Instant;

use crate::codec::TileCodec;
use crate::config::{EncoderConfig, JxlConfig};
use crate::error::{Result, TilerError};
use crate::metrics::SimilarityMetric;
use crate::PixelBuffer;

/// Bounds and stopping rules for one search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    /// Lowest distance (least compression).
    pub dist_min: f32,
    /// Highest distance (most compression).
    pub dist_max: f32,
    /// Stop once `hi - lo` drops below this.
    pub stop_eps: f32,
    /// Maximum bisection steps after the initial probe.
    pub max_iters: u32,
    /// Encoder effort passed through to the codec.
    pub effort: u8,
    /// Similarity target.
    pub target: f64,
    /// Accepted slack below the target.
    pub tolerance: f64,
}

impl SearchParams {
    /// Build parameters from configuration sections.
    pub fn from_config(encoder: &EncoderConfig, jxl: &JxlConfig) -> Self {
        Self {
            dist_min: jxl.dist_min,
            dist_max: jxl.dist_max,
            stop_eps: jxl.stop_eps,
            max_iters: jxl.max_iters,
            effort: jxl.effort,
            target: encoder.ssim_target,
            tolerance: encoder.ssim_tol,
        }
    }

    /// Lowest accepted score.
    pub fn threshold(&self) -> f64 {
        self.target - self.tolerance
    }

    /// Whether `score` satisfies the quality floor.
    pub fn accepts(&self, score: f64) -> bool {
        score >= self.threshold()
    }

    /// Reject parameters the search cannot terminate correctly with.
    pub fn validate(&self) -> Result<()> {
        if !(self.dist_min.is_finite() && self.dist_max.is_finite()) {
            return Err(TilerError::Config("Search bounds must be finite".into()));
        }
        if self.dist_min > self.dist_max {
            return Err(TilerError::Config(format!(
                "dist_min ({}) exceeds dist_max ({})",
                self.dist_min, self.dist_max
            )));
        }
        if !(self.stop_eps > 0.0) {
            return Err(TilerError::Config("stop_eps must be positive".into()));
        }
        if !self.target.is_finite() || !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(TilerError::Config(
                "Target must be finite and tolerance non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// One encode + decode + score at a fixed distance.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Distance used.
    pub distance: f32,
    /// Similarity of the round trip.
    pub score: f64,
    /// Encoded bytes.
    pub bytes: Vec<u8>,
    /// Encode wall time.
    pub encode_ms: f64,
    /// Decode wall time.
    pub decode_ms: f64,
}

/// Worker-local bisection state.
#[derive(Debug)]
pub struct SearchState {
    /// Lower bracket (known passing once the probe succeeded).
    pub lo: f32,
    /// Upper bracket.
    pub hi: f32,
    /// Highest-distance passing evaluation so far.
    pub best: Option<Evaluation>,
    /// Bisection steps taken.
    pub iterations: u32,
}

impl SearchState {
    /// Start with the full bracket.
    pub fn new(lo: f32, hi: f32) -> Self {
        Self {
            lo,
            hi,
            best: None,
            iterations: 0,
        }
    }

    /// Whether another bisection step is allowed.
    pub fn should_continue(&self, params: &SearchParams) -> bool {
        self.iterations < params.max_iters && self.hi - self.lo >= params.stop_eps
    }

    /// Midpoint of the current bracket.
    pub fn midpoint(&self) -> f32 {
        (self.lo + self.hi) / 2.0
    }

    /// Record a passing evaluation and move the lower bracket up.
    pub fn accept(&mut self, eval: Evaluation) {
        self.lo = eval.distance;
        let stronger = self
            .best
            .as_ref()
            .map_or(true, |best| eval.distance >= best.distance);
        if stronger {
            self.best = Some(eval);
        }
        debug_assert!(self.lo <= self.hi);
    }

    /// Record a failing distance and move the upper bracket down.
    pub fn reject(&mut self, distance: f32) {
        self.hi = distance;
        debug_assert!(self.lo <= self.hi);
    }
}

/// Final result of a search.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Chosen distance.
    pub distance: f32,
    /// Similarity at that distance.
    pub score: f64,
    /// Encoded tile.
    pub bytes: Vec<u8>,
    /// Encode wall time of the chosen candidate.
    pub encode_ms: f64,
    /// Decode wall time of the chosen candidate.
    pub decode_ms: f64,
    /// `false` when even `dist_min` missed the target (best-effort result).
    pub feasible: bool,
    /// Bisection steps taken.
    pub iterations: u32,
    /// Codec round trips performed (probe included).
    pub evaluations: u32,
}

impl SearchOutcome {
    fn from_evaluation(eval: Evaluation, feasible: bool, iterations: u32, evaluations: u32) -> Self {
        Self {
            distance: eval.distance,
            score: eval.score,
            bytes: eval.bytes,
            encode_ms: eval.encode_ms,
            decode_ms: eval.decode_ms,
            feasible,
            iterations,
            evaluations,
        }
    }
}

/// Quality-constrained distance search.
pub struct QualitySearch<'a> {
    codec: &'a dyn TileCodec,
    metric: &'a dyn SimilarityMetric,
    params: SearchParams,
}

impl<'a> QualitySearch<'a> {
    /// Create a search, validating the parameters.
    pub fn new(
        codec: &'a dyn TileCodec,
        metric: &'a dyn SimilarityMetric,
        params: SearchParams,
    ) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            codec,
            metric,
            params,
        })
    }

    /// Search parameters.
    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Find the highest distance whose round trip meets the threshold.
    ///
    /// Codec failures are returned immediately and never retried.
    pub fn run(&self, buffer: &PixelBuffer) -> Result<SearchOutcome> {
        let params = &self.params;
        let mut state = SearchState::new(params.dist_min, params.dist_max);
        let mut evaluations = 1;

        let floor = self.evaluate(buffer, params.dist_min)?;
        if !params.accepts(floor.score) {
            log::debug!(
                "Target {:.4} unreachable: {} {:.5} at d={:.3}",
                params.threshold(),
                self.metric.name(),
                floor.score,
                floor.distance
            );
            return Ok(SearchOutcome::from_evaluation(floor, false, 0, evaluations));
        }
        state.accept(floor);

        while state.should_continue(params) {
            let mid = state.midpoint();
            let eval = self.evaluate(buffer, mid)?;
            evaluations += 1;
            state.iterations += 1;

            if params.accepts(eval.score) {
                state.accept(eval);
            } else {
                state.reject(mid);
            }
        }

        let iterations = state.iterations;
        let best = state
            .best
            .ok_or_else(|| TilerError::Internal("Search ended without a candidate".into()))?;

        log::debug!(
            "Accepted d={:.3} ({} {:.5}, {} bytes) after {} evaluations",
            best.distance,
            self.metric.name(),
            best.score,
            best.bytes.len(),
            evaluations
        );

        Ok(SearchOutcome::from_evaluation(best, true, iterations, evaluations))
    }

    /// One encode + decode + score.
    pub fn evaluate(&self, buffer: &PixelBuffer, distance: f32) -> Result<Evaluation> {
        let start = Instant::now();
        let bytes = self.codec.encode(buffer, distance, self.params.effort)?;
        let encode_ms = start.elapsed().as_secs_f64() * 1000.0;

        let start = Instant::now();
        let decoded = self.codec.decode(&bytes)?;
        let decode_ms = start.elapsed().as_secs_f64() * 1000.0;

        let score = self.metric.score(buffer, &decoded)?;

        log::trace!("d={:.4} -> score {:.5}", distance, score);

        Ok(Evaluation {
            distance,
            score,
            bytes,
            encode_ms,
            decode_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecInfo;
    use crate::metrics::validate_buffers;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Encodes the distance itself; decoding writes it into the first pixels.
    struct DistanceCodec {
        calls: AtomicUsize,
        fail_encode: bool,
        fail_decode: bool,
    }

    impl DistanceCodec {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_encode: false,
                fail_decode: false,
            }
        }
    }

    impl TileCodec for DistanceCodec {
        fn encode(&self, buffer: &PixelBuffer, distance: f32, _effort: u8) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_encode {
                return Err(TilerError::Encode("no output".into()));
            }
            let mut bytes = distance.to_le_bytes().to_vec();
            bytes.extend_from_slice(&buffer.width.to_le_bytes());
            bytes.extend_from_slice(&buffer.height.to_le_bytes());
            Ok(bytes)
        }

        fn decode(&self, data: &[u8]) -> Result<PixelBuffer> {
            if self.fail_decode {
                return Err(TilerError::Decode("corrupt".into()));
            }
            let width = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
            let height = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
            let mut buf = PixelBuffer::filled(width, height, [0, 0, 0]);
            buf.data[..4].copy_from_slice(&data[..4]);
            Ok(buf)
        }

        fn info(&self) -> CodecInfo {
            CodecInfo {
                name: "distance-stub",
                extension: "bin",
            }
        }
    }

    fn decoded_distance(buffer: &PixelBuffer) -> f64 {
        f32::from_le_bytes([buffer.data[0], buffer.data[1], buffer.data[2], buffer.data[3]]) as f64
    }

    /// similarity = 1 - slope * distance.
    struct LinearMetric {
        slope: f64,
    }

    impl SimilarityMetric for LinearMetric {
        fn name(&self) -> &'static str {
            "linear"
        }

        fn score(&self, reference: &PixelBuffer, test: &PixelBuffer) -> Result<f64> {
            validate_buffers(reference, test)?;
            Ok(1.0 - self.slope * decoded_distance(test))
        }
    }

    /// Passes below 1.0 and inside [2.0, 2.5]; fails elsewhere.
    struct DippingMetric;

    impl SimilarityMetric for DippingMetric {
        fn name(&self) -> &'static str {
            "dipping"
        }

        fn score(&self, _reference: &PixelBuffer, test: &PixelBuffer) -> Result<f64> {
            let d = decoded_distance(test);
            Ok(if d <= 1.0 || (2.0..=2.5).contains(&d) { 1.0 } else { 0.5 })
        }
    }

    fn params(target: f64, tolerance: f64) -> SearchParams {
        SearchParams {
            dist_min: 0.3,
            dist_max: 3.0,
            stop_eps: 0.01,
            max_iters: 18,
            effort: 7,
            target,
            tolerance,
        }
    }

    fn tile() -> PixelBuffer {
        PixelBuffer::filled(4, 4, [200, 100, 50])
    }

    #[test]
    fn test_converges_to_crossing_point() {
        let codec = DistanceCodec::new();
        let metric = LinearMetric { slope: 0.005 };
        let p = params(0.995, 0.001);
        let search = QualitySearch::new(&codec, &metric, p.clone()).unwrap();

        let outcome = search.run(&tile()).unwrap();

        // Crossing at (1 - 0.994) / 0.005 = 1.2.
        assert!(outcome.feasible);
        assert!(outcome.distance <= 1.2 + 1e-4, "distance {}", outcome.distance);
        assert!(outcome.distance >= 1.2 - p.stop_eps, "distance {}", outcome.distance);
        assert!(outcome.score >= p.threshold());
        assert!(outcome.evaluations <= p.max_iters + 1);
        assert_eq!(outcome.evaluations as usize, codec.calls.load(Ordering::SeqCst));
    }

    #[test]
    fn test_iteration_count_follows_bracket_width() {
        let codec = DistanceCodec::new();
        let metric = LinearMetric { slope: 0.005 };
        let search = QualitySearch::new(&codec, &metric, params(0.995, 0.001)).unwrap();

        let outcome = search.run(&tile()).unwrap();

        // 2.7 / 2^8 >= 0.01 > 2.7 / 2^9
        assert_eq!(outcome.iterations, 9);
        assert_eq!(outcome.evaluations, 10);
    }

    #[test]
    fn test_max_iters_caps_evaluations() {
        let codec = DistanceCodec::new();
        let metric = LinearMetric { slope: 0.005 };
        let mut p = params(0.995, 0.001);
        p.max_iters = 3;
        p.stop_eps = 1e-6;
        let search = QualitySearch::new(&codec, &metric, p).unwrap();

        let outcome = search.run(&tile()).unwrap();
        assert_eq!(outcome.iterations, 3);
        assert_eq!(codec.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_infeasible_target_falls_back_to_dist_min() {
        // similarity = 1 - 0.05 * d crosses 0.994 at d = 0.12, below dist_min.
        let codec = DistanceCodec::new();
        let metric = LinearMetric { slope: 0.05 };
        let search = QualitySearch::new(&codec, &metric, params(0.995, 0.001)).unwrap();

        let outcome = search.run(&tile()).unwrap();

        assert!(!outcome.feasible);
        assert_eq!(outcome.distance, 0.3);
        assert!((outcome.score - 0.985).abs() < 1e-6);
        assert_eq!(outcome.evaluations, 1);
        assert_eq!(outcome.iterations, 0);
    }

    #[test]
    fn test_everything_passes_reaches_dist_max() {
        let codec = DistanceCodec::new();
        let metric = LinearMetric { slope: 0.0 };
        let p = params(0.995, 0.001);
        let search = QualitySearch::new(&codec, &metric, p.clone()).unwrap();

        let outcome = search.run(&tile()).unwrap();
        assert!(outcome.feasible);
        assert!(outcome.distance >= p.dist_max - p.stop_eps);
        assert!(outcome.distance <= p.dist_max);
    }

    #[test]
    fn test_result_always_within_bounds_and_passing_or_floor() {
        let p = params(0.99, 0.002);
        for step in 0..40 {
            let slope = step as f64 * 0.0025;
            let codec = DistanceCodec::new();
            let metric = LinearMetric { slope };
            let search = QualitySearch::new(&codec, &metric, p.clone()).unwrap();
            let outcome = search.run(&tile()).unwrap();

            assert!(outcome.distance >= p.dist_min && outcome.distance <= p.dist_max);
            assert!(
                outcome.score >= p.threshold() || outcome.distance == p.dist_min,
                "slope {} gave d={} score={}",
                slope,
                outcome.distance,
                outcome.score
            );
            assert_eq!(outcome.feasible, outcome.score >= p.threshold());
        }
    }

    #[test]
    fn test_search_is_deterministic() {
        let codec = DistanceCodec::new();
        let metric = LinearMetric { slope: 0.004 };
        let search = QualitySearch::new(&codec, &metric, params(0.995, 0.001)).unwrap();

        let first = search.run(&tile()).unwrap();
        let second = search.run(&tile()).unwrap();
        assert_eq!(first.distance, second.distance);
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.evaluations, second.evaluations);
    }

    #[test]
    fn test_non_monotonic_result_still_passes() {
        let codec = DistanceCodec::new();
        let p = params(0.9, 0.0);
        let search = QualitySearch::new(&codec, &DippingMetric, p.clone()).unwrap();

        let outcome = search.run(&tile()).unwrap();
        // First midpoint 1.65 fails, so the search settles near 1.0 and never
        // sees the passing window at [2.0, 2.5].
        assert!(outcome.score >= p.threshold());
        assert!(outcome.distance <= 1.0);
        assert!(outcome.distance >= 1.0 - p.stop_eps);
    }

    #[test]
    fn test_encode_failure_is_not_retried() {
        let mut codec = DistanceCodec::new();
        codec.fail_encode = true;
        let metric = LinearMetric { slope: 0.001 };
        let search = QualitySearch::new(&codec, &metric, params(0.99, 0.001)).unwrap();

        assert!(matches!(search.run(&tile()), Err(TilerError::Encode(_))));
        assert_eq!(codec.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_decode_failure_surfaces() {
        let mut codec = DistanceCodec::new();
        codec.fail_decode = true;
        let metric = LinearMetric { slope: 0.001 };
        let search = QualitySearch::new(&codec, &metric, params(0.99, 0.001)).unwrap();

        assert!(matches!(search.run(&tile()), Err(TilerError::Decode(_))));
    }

    #[test]
    fn test_degenerate_bracket() {
        let codec = DistanceCodec::new();
        let metric = LinearMetric { slope: 0.001 };
        let mut p = params(0.99, 0.001);
        p.dist_min = 1.0;
        p.dist_max = 1.0;
        let search = QualitySearch::new(&codec, &metric, p).unwrap();

        let outcome = search.run(&tile()).unwrap();
        assert_eq!(outcome.distance, 1.0);
        assert_eq!(outcome.evaluations, 1);
        assert!(outcome.feasible);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let codec = DistanceCodec::new();
        let metric = LinearMetric { slope: 0.001 };

        let mut inverted = params(0.99, 0.001);
        inverted.dist_min = 4.0;
        assert!(matches!(
            QualitySearch::new(&codec, &metric, inverted),
            Err(TilerError::Config(_))
        ));

        let mut zero_eps = params(0.99, 0.001);
        zero_eps.stop_eps = 0.0;
        assert!(QualitySearch::new(&codec, &metric, zero_eps).is_err());

        let negative_tol = params(0.99, -0.1);
        assert!(QualitySearch::new(&codec, &metric, negative_tol).is_err());
    }

    #[test]
    fn test_state_keeps_strongest_candidate() {
        let eval = |d: f32| Evaluation {
            distance: d,
            score: 1.0,
            bytes: vec![],
            encode_ms: 0.0,
            decode_ms: 0.0,
        };
        let mut state = SearchState::new(0.3, 3.0);
        state.accept(eval(0.3));
        state.accept(eval(1.65));
        state.reject(2.3);
        assert_eq!(state.best.as_ref().unwrap().distance, 1.65);
        assert_eq!((state.lo, state.hi), (1.65, 2.3));
    }

    #[test]
    fn test_params_from_config() {
        let p = SearchParams::from_config(&EncoderConfig::default(), &JxlConfig::default());
        assert_eq!(p.dist_min, 0.3);
        assert_eq!(p.max_iters, 18);
        assert!(p.accepts(0.99));
        assert!(!p.accepts(0.98));
    }
}
