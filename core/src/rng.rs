use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

/// Construct a deterministic RNG from a fixed seed.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// A freshly shuffled `0..len` index ordering.
pub fn shuffled_indices<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(rng);
    indices
}
