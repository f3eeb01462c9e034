// Small seeded PRNG (no external crates).
//
// Not cryptographically secure. Every random choice in the animation (split residuals,
// particle jitter) draws from one of these, seeded from the scene seed and the
// window being shown, so replays are bit-identical.

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        // Avoid a zero state.
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: seed }
    }

    /// Derive an independent stream from a base seed and a salt (splitmix64 finalizer).
    pub fn derive(base: u64, salt: u64) -> Self {
        let mut z = base ^ salt.wrapping_mul(0x9E3779B97F4A7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        Self::new(z ^ (z >> 31))
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    #[inline]
    pub fn next_f32_01(&mut self) -> f32 {
        // [0,1), 24 bits so the value never rounds up to 1.0.
        let x = self.next_u32() >> 8;
        (x as f32) / ((1u32 << 24) as f32)
    }

    #[inline]
    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32_01()
    }

    /// Uniform in `[-0.5, 0.5)`.
    #[inline]
    pub fn centered(&mut self) -> f32 {
        self.next_f32_01() - 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = Prng::derive(7, 3);
        let mut b = Prng::derive(7, 3);
        for _ in 0..16 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn centered_stays_in_half_open_unit_interval() {
        let mut r = Prng::new(0);
        for _ in 0..10_000 {
            let v = r.centered();
            assert!((-0.5..0.5).contains(&v));
        }
    }
}
