//! Shannon-entropy statistics used for chunk filtering, carve trimming
//! and damage detection.

/// Shannon entropy of `data` in bits per byte (0.0 ..= 8.0).
pub fn compute_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }
    let len = data.len() as f64;
    let mut entropy = 0.0;
    for &count in &counts {
        if count > 0 {
            let p = count as f64 / len;
            entropy -= p * p.log2();
        }
    }
    entropy
}

/// Entropy of a 4 KiB sample taken from the middle of `data`.
pub fn mid_sample_entropy(data: &[u8]) -> f64 {
    const SAMPLE: usize = 4096;
    if data.len() <= SAMPLE {
        return compute_entropy(data);
    }
    let start = (data.len() - SAMPLE) / 2;
    compute_entropy(&data[start..start + SAMPLE])
}

/// Entropy deltas between consecutive windows of `window_size` bytes.
pub fn compute_entropy_delta(data: &[u8], window_size: usize) -> Vec<f64> {
    if window_size == 0 || data.len() < window_size * 2 {
        return Vec::new();
    }
    let mut deltas = Vec::with_capacity(data.len() / window_size);
    let mut prev = compute_entropy(&data[..window_size]);
    let mut offset = window_size;
    while offset + window_size <= data.len() {
        let current = compute_entropy(&data[offset..offset + window_size]);
        deltas.push(prev - current);
        prev = current;
        offset += window_size;
    }
    deltas
}

/// First offset where entropy drops by more than `threshold` between
/// consecutive windows, rounded to a window boundary.
pub fn detect_entropy_boundary(data: &[u8], window_size: usize, threshold: f64) -> Option<usize> {
    compute_entropy_delta(data, window_size)
        .iter()
        .position(|&delta| delta > threshold)
        .map(|i| (i + 1) * window_size)
}

/// Classification of a scan chunk by its entropy profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    /// All (or almost all) zero; skip without searching.
    Empty,
    /// Plausible file content; search.
    Structured,
    /// Indistinguishable from random (encrypted or TRIM-wiped); skip.
    Random,
}

/// Entropy thresholds for [`classify_block`].
#[derive(Debug, Clone, Copy)]
pub struct EntropyThresholds {
    pub empty_below: f64,
    pub random_above: f64,
}

impl Default for EntropyThresholds {
    fn default() -> Self {
        Self {
            empty_below: 0.5,
            random_above: 7.995,
        }
    }
}

impl EntropyThresholds {
    /// Widened band for SSD-aggressive mode: wear-levelled flash shows
    /// near-uniform noise below the default random cutoff.
    pub fn ssd_aggressive() -> Self {
        Self {
            empty_below: 1.0,
            random_above: 7.99,
        }
    }
}

/// 4 KiB sample drawn from the start, middle and end of `data`, so a
/// chunk with sparse content still registers as non-empty.
pub fn sampled_entropy(data: &[u8]) -> f64 {
    const SAMPLE: usize = 4096;
    if data.len() <= SAMPLE {
        return compute_entropy(data);
    }
    let third = SAMPLE / 3;
    let mid = data.len() / 2;
    let mut sample = Vec::with_capacity(third * 3);
    sample.extend_from_slice(&data[..third]);
    sample.extend_from_slice(&data[mid..mid + third]);
    sample.extend_from_slice(&data[data.len() - third..]);
    compute_entropy(&sample)
}

/// Classifies a chunk from a 4 KiB sampled slice.
pub fn classify_block(data: &[u8], thresholds: EntropyThresholds) -> BlockClass {
    let entropy = sampled_entropy(data);
    if entropy < thresholds.empty_below {
        BlockClass::Empty
    } else if entropy > thresholds.random_above {
        BlockClass::Random
    } else {
        BlockClass::Structured
    }
}

/// Fraction of zero bytes in `data`, in [0.0, 1.0].
pub fn zero_fraction(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let zeros = data.iter().filter(|&&b| b == 0).count();
    zeros as f64 / data.len() as f64
}
