use std::collections::{HashMap, VecDeque};

/// Hann-weighted moving window.
///
/// Every output is a normalized weighted mean of the last `window_size` inputs, so the
/// result only depends on the input sequence.
pub struct HannSmoother {
    window: VecDeque<f64>,
    window_size: usize,
    weights_cache: HashMap<usize, Vec<f64>>,
}

impl HannSmoother {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        HannSmoother {
            window: VecDeque::with_capacity(window_size),
            window_size,
            weights_cache: HashMap::new(),
        }
    }

    /// Push a value and return the smoothed window value
    pub fn apply(&mut self, value: f64) -> f64 {
        self.window.push_back(value);
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }

        let length = self.window.len();
        if length == 1 {
            return value;
        }

        let weights = self
            .weights_cache
            .entry(length)
            .or_insert_with(|| Self::compute_hann_weights(length));

        self.window
            .iter()
            .zip(weights.iter())
            .map(|(v, w)| v * w)
            .sum()
    }

    /// Hann weights `0.5 - 0.5 * cos(2πi / (n+1))` over i = 1..=n, normalized.
    ///
    /// The window is evaluated on its interior points so the oldest and newest samples
    /// keep a non-zero weight.
    fn compute_hann_weights(length: usize) -> Vec<f64> {
        if length <= 1 {
            return vec![1.0];
        }

        let span = length as f64 + 1.0;
        let mut weights: Vec<f64> = (1..=length)
            .map(|i| {
                let angle = 2.0 * std::f64::consts::PI * i as f64 / span;
                0.5 - 0.5 * angle.cos()
            })
            .collect();

        let sum: f64 = weights.iter().sum();
        let total = if sum > 0.0 { sum } else { 1.0 };
        weights.iter_mut().for_each(|w| *w /= total);
        weights
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}
