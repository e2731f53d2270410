use crate::config::FeatureConfig;

pub const SUPER_FEATURE_PER_CHUNK: usize = 3;
pub const FEATURE_PER_SUPER_FEATURE: usize = 4;
const FEATURES_PER_CHUNK: usize = SUPER_FEATURE_PER_CHUNK * FEATURE_PER_SUPER_FEATURE;

/// Similarity signature of one chunk.
pub type SuperFeatures = [u64; SUPER_FEATURE_PER_CHUNK];

// Seeds for the gear table and the per-feature linear transforms. Fixed so
// every site derives the same features for the same content.
const GEAR_SEED: u64 = 0x5844_4544_5550_4745;
const TRANSFORM_SEED: u64 = 0x5844_4544_5550_5446;
const ROLL_BASE: u64 = 0x100_0000_01b3;

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Computes super-features with a rolling hash over a sliding window.
///
/// For every window position the rolling hash `h` is mapped through twelve
/// linear transforms `m_j * h + a_j`; feature `j` keeps the maximum. Each
/// super-feature folds four consecutive features into one value.
#[derive(Debug, Clone)]
pub struct FeatureGenerator {
    window: usize,
    gear: [u64; 256],
    multipliers: [u64; FEATURES_PER_CHUNK],
    addends: [u64; FEATURES_PER_CHUNK],
    /// `ROLL_BASE^(window - 1)`, used to drop the outgoing byte.
    out_factor: u64,
}

impl FeatureGenerator {
    pub fn new(config: &FeatureConfig) -> Self {
        Self::with_window(config.window_size)
    }

    pub fn with_window(window: usize) -> Self {
        let window = window.max(1);
        let mut state = GEAR_SEED;
        let mut gear = [0u64; 256];
        for slot in gear.iter_mut() {
            *slot = splitmix64(&mut state);
        }
        let mut state = TRANSFORM_SEED;
        let mut multipliers = [0u64; FEATURES_PER_CHUNK];
        let mut addends = [0u64; FEATURES_PER_CHUNK];
        for j in 0..FEATURES_PER_CHUNK {
            multipliers[j] = splitmix64(&mut state) | 1;
            addends[j] = splitmix64(&mut state);
        }
        let out_factor = (1..window).fold(1u64, |acc, _| acc.wrapping_mul(ROLL_BASE));
        Self {
            window,
            gear,
            multipliers,
            addends,
            out_factor,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Super-features of one chunk. Chunks shorter than the window are
    /// sampled once over their whole length.
    pub fn compute(&self, data: &[u8]) -> SuperFeatures {
        let mut features = [0u64; FEATURES_PER_CHUNK];
        let mut seen = false;
        let mut h = 0u64;

        for (i, &byte) in data.iter().enumerate() {
            if i >= self.window {
                let outgoing = self.gear[data[i - self.window] as usize];
                h = h.wrapping_sub(outgoing.wrapping_mul(self.out_factor));
            }
            h = h.wrapping_mul(ROLL_BASE).wrapping_add(self.gear[byte as usize]);
            if i + 1 >= self.window {
                self.sample(h, &mut features, &mut seen);
            }
        }
        if !seen {
            self.sample(h, &mut features, &mut seen);
        }

        let mut out = [0u64; SUPER_FEATURE_PER_CHUNK];
        for (i, sf) in out.iter_mut().enumerate() {
            let group = &features[i * FEATURE_PER_SUPER_FEATURE..(i + 1) * FEATURE_PER_SUPER_FEATURE];
            let mut state = i as u64;
            for &f in group {
                state ^= f;
                *sf = splitmix64(&mut state);
            }
        }
        out
    }

    fn sample(&self, h: u64, features: &mut [u64; FEATURES_PER_CHUNK], seen: &mut bool) {
        for j in 0..FEATURES_PER_CHUNK {
            let v = self.multipliers[j]
                .wrapping_mul(h)
                .wrapping_add(self.addends[j]);
            if !*seen || v > features[j] {
                features[j] = v;
            }
        }
        *seen = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed;
        (0..len).map(|_| splitmix64(&mut state) as u8).collect()
    }

    #[test]
    fn identical_content_identical_features() {
        let generator = FeatureGenerator::with_window(48);
        let data = pseudo_random(8192, 1);
        assert_eq!(generator.compute(&data), generator.compute(&data));
    }

    #[test]
    fn small_edit_keeps_most_super_features() {
        let generator = FeatureGenerator::with_window(48);
        let base = pseudo_random(16 * 1024, 2);
        let mut edited = base.clone();
        edited[8000..8004].copy_from_slice(b"edit");

        let a = generator.compute(&base);
        let b = generator.compute(&edited);
        let shared = a.iter().zip(&b).filter(|(x, y)| x == y).count();
        assert!(shared >= 1, "expected at least one shared super-feature");
    }

    #[test]
    fn unrelated_content_differs() {
        let generator = FeatureGenerator::with_window(48);
        let a = generator.compute(&pseudo_random(8192, 3));
        let b = generator.compute(&pseudo_random(8192, 4));
        assert_ne!(a, b);
    }

    #[test]
    fn short_chunks_still_get_features() {
        let generator = FeatureGenerator::with_window(48);
        let a = generator.compute(b"tiny");
        let b = generator.compute(b"tinz");
        assert_ne!(a, b);
        assert_eq!(generator.compute(b""), generator.compute(b""));
    }

    #[test]
    fn window_is_truly_sliding() {
        // The same window contents at different positions hash identically,
        // so features depend only on the set of windows.
        let generator = FeatureGenerator::with_window(8);
        let tail = pseudo_random(64, 5);
        let mut a = vec![1u8; 16];
        a.extend_from_slice(&tail);
        let mut b = vec![1u8; 40];
        b.extend_from_slice(&tail);
        assert_eq!(generator.compute(&a), generator.compute(&b));
    }
}
