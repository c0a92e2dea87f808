// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local embedding inference.
//!
//! The ONNX backend runs all-MiniLM-L6-v2 on CPU with masked mean pooling
//! and L2 normalization, producing 384-dimensional vectors with no external
//! API calls. The [`Embedder`] trait keeps the index and search layers
//! testable without model files.

use bob_core::BobError;

/// Embedding dimensions for all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// A text-to-vector embedding backend.
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, BobError>;
}

/// Serializes an embedding as little-endian f32 bytes.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Deserializes an embedding from little-endian f32 bytes.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity between two equal-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Placeholder used when no local model is on disk: every embed fails,
/// which the indexer logs per chunk while lexical search keeps working.
pub struct UnavailableEmbedder;

impl Embedder for UnavailableEmbedder {
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>, BobError> {
        Err(BobError::Internal(
            "embedding model not available".to_string(),
        ))
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxEmbedder;

#[cfg(feature = "onnx")]
mod onnx {
    use std::path::Path;
    use std::sync::Mutex;

    use ndarray::Array2;
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::TensorRef;

    use bob_core::BobError;

    use super::{Embedder, EMBEDDING_DIM};

    /// ONNX-based embedder using all-MiniLM-L6-v2.
    ///
    /// Expects `model.onnx` and `tokenizer.json` side by side on disk.
    /// Inference runs on CPU with a single thread.
    pub struct OnnxEmbedder {
        /// ONNX Runtime session (not Sync, wrapped in Mutex).
        session: Mutex<Session>,
        tokenizer: tokenizers::Tokenizer,
    }

    impl OnnxEmbedder {
        pub fn new(model_path: &Path) -> Result<Self, BobError> {
            let model_dir = model_path
                .parent()
                .ok_or_else(|| BobError::Internal("invalid model path".to_string()))?;

            let tokenizer_path = model_dir.join("tokenizer.json");
            let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path).map_err(|e| {
                BobError::Internal(format!(
                    "failed to load tokenizer from {}: {e}",
                    tokenizer_path.display()
                ))
            })?;

            let session = Session::builder()
                .map_err(|e| BobError::Internal(format!("onnx session builder: {e}")))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| BobError::Internal(format!("onnx optimization level: {e}")))?
                .with_intra_threads(1)
                .map_err(|e| BobError::Internal(format!("onnx thread count: {e}")))?
                .commit_from_file(model_path)
                .map_err(|e| {
                    BobError::Internal(format!(
                        "failed to load model from {}: {e}",
                        model_path.display()
                    ))
                })?;

            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
            })
        }

        fn embed_text(&self, text: &str) -> Result<Vec<f32>, BobError> {
            let encoding = self
                .tokenizer
                .encode(text, true)
                .map_err(|e| BobError::Internal(format!("tokenization failed: {e}")))?;

            let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
            let attention_mask: Vec<i64> = encoding
                .get_attention_mask()
                .iter()
                .map(|&m| m as i64)
                .collect();
            let token_type_ids: Vec<i64> =
                encoding.get_type_ids().iter().map(|&t| t as i64).collect();
            let seq_len = input_ids.len();

            let input_ids_array = Array2::from_shape_vec((1, seq_len), input_ids)
                .map_err(|e| BobError::Internal(format!("input_ids tensor: {e}")))?;
            let attention_array =
                Array2::from_shape_vec((1, seq_len), attention_mask.clone())
                    .map_err(|e| BobError::Internal(format!("attention_mask tensor: {e}")))?;
            let token_type_array = Array2::from_shape_vec((1, seq_len), token_type_ids)
                .map_err(|e| BobError::Internal(format!("token_type_ids tensor: {e}")))?;

            let mut session = self
                .session
                .lock()
                .map_err(|e| BobError::Internal(format!("onnx session lock: {e}")))?;

            let input_ids_tensor = TensorRef::from_array_view(&input_ids_array)
                .map_err(|e| BobError::Internal(format!("input_ids view: {e}")))?;
            let attention_tensor = TensorRef::from_array_view(&attention_array)
                .map_err(|e| BobError::Internal(format!("attention_mask view: {e}")))?;
            let token_type_tensor = TensorRef::from_array_view(&token_type_array)
                .map_err(|e| BobError::Internal(format!("token_type_ids view: {e}")))?;

            let outputs = session
                .run(ort::inputs![
                    "input_ids" => input_ids_tensor,
                    "attention_mask" => attention_tensor,
                    "token_type_ids" => token_type_tensor
                ])
                .map_err(|e| BobError::Internal(format!("onnx inference failed: {e}")))?;

            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| BobError::Internal(format!("output tensor: {e}")))?;

            let hidden_size = shape[shape.len() - 1] as usize;
            let pooled = mean_pool_with_attention(data, &attention_mask, seq_len, hidden_size);
            Ok(l2_normalize(&pooled))
        }
    }

    // Safety: the session is only touched under the Mutex; the tokenizer is
    // thread-safe for encoding.
    unsafe impl Send for OnnxEmbedder {}
    unsafe impl Sync for OnnxEmbedder {}

    impl Embedder for OnnxEmbedder {
        fn dimensions(&self) -> usize {
            EMBEDDING_DIM
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, BobError> {
            self.embed_text(text)
        }
    }

    /// Attention-masked mean pooling over token embeddings.
    fn mean_pool_with_attention(
        embeddings: &[f32],
        attention_mask: &[i64],
        seq_len: usize,
        hidden_size: usize,
    ) -> Vec<f32> {
        let mut sum = vec![0.0f32; hidden_size];
        let mut count = 0.0f32;

        for i in 0..seq_len {
            if attention_mask[i] > 0 {
                for j in 0..hidden_size {
                    sum[j] += embeddings[i * hidden_size + j];
                }
                count += 1.0;
            }
        }

        if count > 0.0 {
            for value in &mut sum {
                *value /= count;
            }
        }
        sum
    }

    /// L2-normalize a vector.
    fn l2_normalize(vector: &[f32]) -> Vec<f32> {
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            vector.iter().map(|v| v / norm).collect()
        } else {
            vector.to_vec()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn l2_normalize_general_vector() {
            let n = l2_normalize(&[3.0, 4.0]);
            assert!((n[0] - 0.6).abs() < 0.001);
            assert!((n[1] - 0.8).abs() < 0.001);
        }

        #[test]
        fn l2_normalize_zero_vector() {
            assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
        }

        #[test]
        fn mean_pool_skips_padding() {
            // 2 tokens, hidden 3, first token is padding.
            let embeddings = vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0];
            let mask = vec![0, 1];
            assert_eq!(
                mean_pool_with_attention(&embeddings, &mask, 2, 3),
                vec![1.0, 2.0, 3.0]
            );
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let original: Vec<f32> = (0..16).map(|i| i as f32 / 7.0).collect();
        let blob = vec_to_blob(&original);
        assert_eq!(blob.len(), 64);
        let restored = blob_to_vec(&blob);
        assert_eq!(original, restored);
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
