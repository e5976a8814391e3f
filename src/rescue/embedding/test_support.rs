//! Deterministic embedder for tests that must not load a model.

use sha2::{Digest, Sha256};

use crate::rescue::core::errors::RescueResult;
use crate::rescue::embedding::embedder::{EmbedFuture, Embedder, normalize};

/// Bag-of-words vectors: each lowercase token adds to one digest-picked bucket.
pub(crate) struct TokenEmbedder {
    ndims: usize,
}

impl TokenEmbedder {
    pub(crate) fn new(ndims: usize) -> Self {
        Self { ndims }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.ndims];
        for token in text
            .to_lowercase()
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut bytes = [0_u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            vector[(u64::from_le_bytes(bytes) % self.ndims as u64) as usize] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

impl Embedder for TokenEmbedder {
    fn embed_text(&self, text: &str) -> EmbedFuture<'_, RescueResult<Vec<f32>>> {
        let vector = self.embed(text);
        Box::pin(async move { Ok(vector) })
    }

    fn ndims(&self) -> usize {
        self.ndims
    }
}
