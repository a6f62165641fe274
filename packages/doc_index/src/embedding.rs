//! Embedding boundary.
//!
//! The real system computes sentence embeddings with an external model;
//! here that is a trait so the index never knows which backend produced
//! a vector. [`HashEmbedder`] is the built-in backend: deterministic
//! feature hashing, good enough for exact-term retrieval and for tests.

/// Turns text into a fixed-dimension vector.
///
/// Implementations must be deterministic: two processes sharing an index
/// directory must produce identical vectors for identical text.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    /// Embed `text` into an L2-normalized vector of `dimension()` length.
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Feature-hashing embedder (FNV-1a token hashing with signed buckets).
///
/// Vectors are L2-normalized, so the dot product of two embeddings is
/// their cosine similarity.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn fnv1a(token: &str) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = Self::fnv1a(&token.to_lowercase());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_deterministic() {
        let e = HashEmbedder::new(64);
        assert_eq!(e.embed("machine learning"), e.embed("machine learning"));
    }

    #[test]
    fn embeddings_are_normalized() {
        let e = HashEmbedder::new(64);
        let v = e.embed("some text to embed");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let e = HashEmbedder::new(8);
        assert!(e.embed("").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn identical_text_has_max_similarity() {
        let e = HashEmbedder::new(128);
        let a = e.embed("neural networks");
        let b = e.embed("neural networks");
        let dot: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!((dot - 1.0).abs() < 1e-5);
    }

    #[test]
    fn case_is_folded() {
        let e = HashEmbedder::new(128);
        assert_eq!(e.embed("Rust"), e.embed("rust"));
    }
}
