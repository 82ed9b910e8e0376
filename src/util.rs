//! Shared hashing and vector helpers

/// FNV-1a 64-bit hash over a token's code points.
pub fn fnv1a64(token: &str) -> u64 {
    let mut h: u64 = 0xCBF2_9CE4_8422_2325;
    for c in token.chars() {
        h ^= c as u64;
        h = h.wrapping_mul(0x100_0000_01B3);
    }
    h
}

/// Compute a 64-bit SimHash over whitespace-split tokens.
///
/// SimHash is a locality-sensitive fingerprint: each token is hashed and its
/// bits vote into a 64-element accumulator; the final bit is set wherever the
/// accumulator ends up strictly positive. Similar texts produce fingerprints
/// with a small Hamming distance. Empty input hashes to 0.
pub fn compute_simhash(text: &str) -> u64 {
    let mut votes = [0i32; 64];
    let mut has_tokens = false;

    for token in text.split_whitespace() {
        has_tokens = true;
        let hash = fnv1a64(token);
        for (i, vote) in votes.iter_mut().enumerate() {
            if (hash >> i) & 1 == 1 {
                *vote += 1;
            } else {
                *vote -= 1;
            }
        }
    }

    if !has_tokens {
        return 0;
    }

    let mut fingerprint = 0u64;
    for (i, vote) in votes.iter().enumerate() {
        if *vote > 0 {
            fingerprint |= 1u64 << i;
        }
    }
    fingerprint
}

/// Hamming distance between two 64-bit fingerprints.
pub fn hamming64(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Cosine similarity between two equal-length vectors; 0.0 when either norm is zero.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// First 8 bytes of the MD5 digest interpreted big-endian.
pub fn md5_prefix64(data: &[u8]) -> u64 {
    let digest = md5::compute(data);
    digest
        .0
        .iter()
        .take(8)
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hamming_is_commutative_and_zero_on_equal() {
        assert_eq!(hamming64(0xDEAD_BEEF, 0xDEAD_BEEF), 0);
        assert_eq!(
            hamming64(0xDEAD_BEEF, 0xCAFE_BABE),
            hamming64(0xCAFE_BABE, 0xDEAD_BEEF)
        );
        assert_eq!(hamming64(0, u64::MAX), 64);
    }

    #[test]
    fn simhash_of_empty_is_zero() {
        assert_eq!(compute_simhash(""), 0);
        assert_eq!(compute_simhash("   \t\n"), 0);
    }

    #[test]
    fn simhash_of_single_token_is_its_hash() {
        // With one token every accumulator is +1 or -1, so bits set in the
        // token hash survive and all others become 0.
        let token = "fingerprint";
        assert_eq!(compute_simhash(token), fnv1a64(token));
    }

    #[test]
    fn simhash_is_stable_and_locality_sensitive() {
        let a = "the quick brown fox jumps over the lazy dog again and again";
        let b = "the quick brown fox jumps over the lazy cat again and again";
        let c = "completely unrelated words about distributed consensus protocols";

        assert_eq!(compute_simhash(a), compute_simhash(a));

        let near = hamming64(compute_simhash(a), compute_simhash(b));
        let far = hamming64(compute_simhash(a), compute_simhash(c));
        assert!(
            near < far,
            "one-word change ({near}) should be closer than unrelated text ({far})"
        );
    }

    #[test]
    fn cosine_similarity_basics() {
        let v = [3.0, 4.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn md5_prefix_matches_known_digest() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(md5_prefix64(b""), 0xd41d_8cd9_8f00_b204);
    }
}
