use anyhow::Result;

/// Cosine similarity between two embedding vectors, clamped to [-1, 1].
/// A zero-magnitude vector scores 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.is_empty() || b.is_empty() {
        anyhow::bail!("vectors cannot be empty");
    }
    if a.len() != b.len() {
        anyhow::bail!("vector dimensions must match: {} != {}", a.len(), b.len());
    }

    // one pass accumulates the dot product and both squared norms
    let (dot, norm_a, norm_b) = a.iter().zip(b).fold(
        (0.0f32, 0.0f32, 0.0f32),
        |(dot, na, nb), (x, y)| (dot + x * y, na + x * x, nb + y * y),
    );

    let denominator = (norm_a * norm_b).sqrt();
    if denominator == 0.0 {
        return Ok(0.0);
    }

    // clamp guards against float drift on near-parallel vectors
    Ok((dot / denominator).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors() {
        let a = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &a).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_score_negative_one() {
        let a = vec![2.0, -1.0];
        let b = vec![-2.0, 1.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn dimension_mismatch_is_error() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!(cosine_similarity(&a, &b).is_err());
    }

    #[test]
    fn empty_vectors_are_an_error() {
        assert!(cosine_similarity(&[], &[]).is_err());
    }

    #[test]
    fn zero_vector_scores_zero() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b).unwrap(), 0.0);
    }
}
