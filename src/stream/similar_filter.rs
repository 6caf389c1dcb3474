// SYNOID Vid2Vid Similar Image Filter
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Skips near-duplicate frames to cut flicker and redundant denoising work.
// Skipping is probabilistic: the closer a frame is to the last passed frame,
// the likelier it is dropped, with a cap on consecutive drops.

use crate::config::SimilarFilterConfig;
use candle_core::Tensor;

pub struct SimilarImageFilter {
    threshold: f64,
    max_skip_frame: usize,
    reference: Option<Tensor>,
    skip_count: usize,
}

impl SimilarImageFilter {
    pub fn new(threshold: f64, max_skip_frame: usize) -> Self {
        Self {
            threshold,
            max_skip_frame,
            reference: None,
            skip_count: 0,
        }
    }

    pub fn from_config(config: &SimilarFilterConfig) -> Self {
        Self::new(config.threshold, config.max_skip_frame)
    }

    /// Probability of skipping a frame with cosine similarity `similarity`
    /// to the reference.
    pub fn skip_probability(&self, similarity: f64) -> f64 {
        if self.threshold >= 1.0 {
            return 0.0;
        }
        (1.0 - (1.0 - similarity) / (1.0 - self.threshold)).max(0.0)
    }

    /// Decides whether `frame` is skipped. `sample` is a uniform draw in
    /// `[0, 1)` supplied by the caller's RNG.
    pub fn should_skip(&mut self, frame: &Tensor, sample: f64) -> candle_core::Result<bool> {
        let Some(reference) = &self.reference else {
            self.reference = Some(frame.clone());
            return Ok(false);
        };

        let similarity = cosine_similarity(reference, frame)?;
        if self.skip_probability(similarity) < sample || self.skip_count >= self.max_skip_frame {
            self.reference = Some(frame.clone());
            self.skip_count = 0;
            return Ok(false);
        }

        self.skip_count += 1;
        Ok(true)
    }
}

/// Cosine similarity of two tensors viewed as flat vectors.
pub fn cosine_similarity(a: &Tensor, b: &Tensor) -> candle_core::Result<f64> {
    let a = a.flatten_all()?;
    let b = b.flatten_all()?;
    let dot = (&a * &b)?.sum_all()?.to_scalar::<f32>()? as f64;
    let norm_a = a.sqr()?.sum_all()?.to_scalar::<f32>()?.sqrt() as f64;
    let norm_b = b.sqr()?.sum_all()?.to_scalar::<f32>()?.sqrt() as f64;
    Ok(dot / (norm_a * norm_b).max(1e-8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn frame(values: &[f32]) -> Tensor {
        Tensor::new(values, &Device::Cpu).unwrap().reshape((1, 1, values.len())).unwrap()
    }

    #[test]
    fn test_cosine_similarity() {
        let a = frame(&[1.0, 0.0]);
        let b = frame(&[0.0, 1.0]);
        assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &b).unwrap().abs() < 1e-6);
        assert_eq!(cosine_similarity(&frame(&[0.0, 0.0]), &a).unwrap(), 0.0);
    }

    #[test]
    fn test_first_frame_always_passes() {
        let mut filter = SimilarImageFilter::new(0.98, 10);
        assert!(!filter.should_skip(&frame(&[0.5, 0.5]), 0.0).unwrap());
    }

    #[test]
    fn test_identical_frames_capped_by_max_skip() {
        let mut filter = SimilarImageFilter::new(0.98, 3);
        let f = frame(&[0.2, 0.4, 0.6]);
        assert!(!filter.should_skip(&f, 0.5).unwrap());

        let decisions: Vec<bool> = (0..8).map(|_| filter.should_skip(&f, 0.5).unwrap()).collect();
        assert_eq!(decisions, vec![true, true, true, false, true, true, true, false]);
    }

    #[test]
    fn test_dissimilar_frames_pass() {
        let mut filter = SimilarImageFilter::new(0.98, 10);
        assert!(!filter.should_skip(&frame(&[1.0, 0.0]), 0.5).unwrap());
        assert!(!filter.should_skip(&frame(&[0.0, 1.0]), 0.5).unwrap());
        assert!(!filter.should_skip(&frame(&[1.0, 0.0]), 0.5).unwrap());
    }

    #[test]
    fn test_threshold_one_never_skips() {
        let filter = SimilarImageFilter::new(1.0, 10);
        assert_eq!(filter.skip_probability(1.0), 0.0);
        let filter = SimilarImageFilter::new(0.9, 10);
        assert!((filter.skip_probability(1.0) - 1.0).abs() < 1e-9);
        assert_eq!(filter.skip_probability(0.5), 0.0);
    }
}
