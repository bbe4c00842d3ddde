use rand::Rng;
use uuid::Uuid;

/// Generate a deterministic v4-format UUID from a seeded RNG.
pub fn generate_uuid<R: Rng + ?Sized>(rng: &mut R) -> Uuid {
    let bytes: [u8; 16] = rng.gen();
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

/// True with probability `percent` / 100. Values at or above 100 always hit.
pub fn roll_percent<R: Rng + ?Sized>(rng: &mut R, percent: f64) -> bool {
    if percent <= 0.0 {
        return false;
    }
    rng.gen::<f64>() * 100.0 < percent
}

/// Picks one entry with probability proportional to its weight.
///
/// Non-positive weights are never chosen. When every weight is non-positive
/// the first entry is returned so callers always get a pick from a non-empty
/// slice.
pub fn choose_weighted<'a, T, R: Rng + ?Sized>(weights: &'a [(T, f64)], rng: &mut R) -> Option<&'a T> {
    let total: f64 = weights.iter().map(|(_, w)| w.max(0.0)).sum();
    if total <= 0.0 {
        return weights.first().map(|(item, _)| item);
    }
    let mut roll = rng.gen::<f64>() * total;
    for (item, weight) in weights {
        let weight = weight.max(0.0);
        if roll < weight {
            return Some(item);
        }
        roll -= weight;
    }
    // Rounding can leave a sliver past the last positive weight.
    weights
        .iter()
        .rev()
        .find(|(_, w)| *w > 0.0)
        .map(|(item, _)| item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn deterministic_uuid_from_same_seed() {
        let mut rng1 = ChaCha8Rng::seed_from_u64(42);
        let mut rng2 = ChaCha8Rng::seed_from_u64(42);
        let id1 = generate_uuid(&mut rng1);
        let id2 = generate_uuid(&mut rng2);
        assert_eq!(id1, id2);
        assert_eq!(id1.get_version(), Some(uuid::Version::Random));
    }

    #[test]
    fn roll_percent_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert!((0..100).all(|_| !roll_percent(&mut rng, 0.0)));
        assert!((0..100).all(|_| roll_percent(&mut rng, 100.0)));
    }

    #[test]
    fn choose_weighted_skips_zero_weights() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let weights = [("empty", 0.0), ("full", 5.0)];
        for _ in 0..50 {
            assert_eq!(choose_weighted(&weights, &mut rng), Some(&"full"));
        }
    }

    #[test]
    fn choose_weighted_empty_is_none() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let weights: [(u8, f64); 0] = [];
        assert!(choose_weighted(&weights, &mut rng).is_none());
    }
}
