//! Seeded random number generation
//!
//! A Mersenne Twister (MT19937) seeded the way R's `set.seed()` seeds it
//! (69069 LCG scramble), so simulations and permutation nulls are
//! reproducible across runs for a given seed. Continuous draws use
//! inversion through `statrs` quantile functions.

use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};

const N: usize = 624;
const M: usize = 397;
const MATRIX_A: u32 = 0x9908_B0DF;
const UPPER_MASK: u32 = 0x8000_0000;
const LOWER_MASK: u32 = 0x7FFF_FFFF;
/// 2^-32
const I2_32M1: f64 = 2.328_306_436_538_696_3e-10;

pub struct SeededRng {
    state: [u32; N],
    index: usize,
}

impl SeededRng {
    pub fn new(seed: u32) -> Self {
        let mut state = [0u32; N];
        let mut lcg = seed;
        // 50 warm-up steps, one discarded value, then 624 state words
        for _ in 0..51 {
            lcg = lcg.wrapping_mul(69069).wrapping_add(1);
        }
        for word in state.iter_mut() {
            lcg = lcg.wrapping_mul(69069).wrapping_add(1);
            *word = lcg;
        }
        Self { state, index: N }
    }

    fn twist(&mut self) {
        for i in 0..N {
            let y = (self.state[i] & UPPER_MASK) | (self.state[(i + 1) % N] & LOWER_MASK);
            let mut next = self.state[(i + M) % N] ^ (y >> 1);
            if y & 1 != 0 {
                next ^= MATRIX_A;
            }
            self.state[i] = next;
        }
        self.index = 0;
    }

    pub fn next_u32(&mut self) -> u32 {
        if self.index >= N {
            self.twist();
        }
        let mut y = self.state[self.index];
        self.index += 1;
        y ^= y >> 11;
        y ^= (y << 7) & 0x9D2C_5680;
        y ^= (y << 15) & 0xEFC6_0000;
        y ^ (y >> 18)
    }

    /// Uniform draw strictly inside (0, 1)
    pub fn uniform(&mut self) -> f64 {
        let u = self.next_u32() as f64 * I2_32M1;
        if u <= 0.0 {
            0.5 * I2_32M1
        } else if u >= 1.0 {
            1.0 - 0.5 * I2_32M1
        } else {
            u
        }
    }

    /// Standard normal draw by inversion
    pub fn normal(&mut self) -> f64 {
        let u = self.uniform();
        Normal::new(0.0, 1.0).map(|d| d.inverse_cdf(u)).unwrap_or(0.0)
    }

    /// Chi-squared draw with `df` degrees of freedom. Small integer `df`
    /// sums squared normals, anything else goes through inversion.
    pub fn chi_squared(&mut self, df: f64) -> f64 {
        if df.fract() == 0.0 && (1.0..=30.0).contains(&df) {
            return (0..df as usize).map(|_| self.normal().powi(2)).sum();
        }
        let u = self.uniform();
        ChiSquared::new(df).map(|d| d.inverse_cdf(u)).unwrap_or(df)
    }

    /// Poisson draw by inversion, normal approximation for large means
    pub fn poisson(&mut self, lambda: f64) -> f64 {
        if lambda <= 0.0 {
            return 0.0;
        }
        if lambda > 500.0 {
            return (lambda + lambda.sqrt() * self.normal()).round().max(0.0);
        }
        let u = self.uniform();
        let mut k = 0.0;
        let mut p = (-lambda).exp();
        let mut cdf = p;
        while cdf < u && p > 0.0 {
            k += 1.0;
            p *= lambda / k;
            cdf += p;
        }
        k
    }

    /// Negative binomial draw with mean `mean` and dispersion `alpha`, as a
    /// gamma-Poisson mixture
    pub fn negative_binomial(&mut self, mean: f64, alpha: f64) -> f64 {
        let df = 2.0 / alpha;
        let lambda = mean * self.chi_squared(df) / df;
        self.poisson(lambda)
    }

    /// Uniform integer in `0..n`; `n` must be positive
    pub fn below(&mut self, n: usize) -> usize {
        ((self.uniform() * n as f64) as usize).min(n.saturating_sub(1))
    }

    /// In-place Fisher-Yates shuffle
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.below(i + 1);
            items.swap(i, j);
        }
    }

    /// `k` distinct indices drawn from `0..n` (partial Fisher-Yates)
    pub fn sample_indices(&mut self, n: usize, k: usize) -> Vec<usize> {
        let mut pool: Vec<usize> = (0..n).collect();
        let k = k.min(n);
        for i in 0..k {
            let j = i + self.below(n - i);
            pool.swap(i, j);
        }
        pool.truncate(k);
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = SeededRng::new(42);
        let mut b = SeededRng::new(42);
        for _ in 0..1000 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
        let mut c = SeededRng::new(43);
        let differs = (0..10).any(|_| a.next_u32() != c.next_u32());
        assert!(differs);
    }

    #[test]
    fn test_uniform_in_open_interval() {
        let mut rng = SeededRng::new(1);
        let draws: Vec<f64> = (0..10_000).map(|_| rng.uniform()).collect();
        assert!(draws.iter().all(|&u| u > 0.0 && u < 1.0));
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        assert!((mean - 0.5).abs() < 0.02);
    }

    #[test]
    fn test_normal_and_chi_squared_moments() {
        let mut rng = SeededRng::new(2);
        let n = 20_000;
        let normals: Vec<f64> = (0..n).map(|_| rng.normal()).collect();
        let mean = normals.iter().sum::<f64>() / n as f64;
        let var = normals.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.05);
        assert!((var - 1.0).abs() < 0.05);

        let chis: Vec<f64> = (0..n).map(|_| rng.chi_squared(4.0)).collect();
        let chi_mean = chis.iter().sum::<f64>() / n as f64;
        assert!((chi_mean - 4.0).abs() < 0.15);
    }

    #[test]
    fn test_count_draw_means() {
        let mut rng = SeededRng::new(3);
        let n = 5_000;
        let pois = (0..n).map(|_| rng.poisson(12.0)).sum::<f64>() / n as f64;
        assert!((pois - 12.0).abs() < 0.3);
        let draws: Vec<f64> = (0..n).map(|_| rng.negative_binomial(50.0, 0.2)).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 50.0).abs() < 2.0);
        // 50 + 0.2 * 50^2 = 550
        assert!(var > 400.0 && var < 700.0, "variance {}", var);
    }

    #[test]
    fn test_sample_indices_distinct() {
        let mut rng = SeededRng::new(7);
        let idx = rng.sample_indices(50, 20);
        assert_eq!(idx.len(), 20);
        let mut sorted = idx.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 20);
        assert!(idx.iter().all(|&i| i < 50));
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut rng = SeededRng::new(9);
        let mut v: Vec<usize> = (0..100).collect();
        rng.shuffle(&mut v);
        assert_ne!(v, (0..100).collect::<Vec<_>>());
        v.sort_unstable();
        assert_eq!(v, (0..100).collect::<Vec<_>>());
    }
}
