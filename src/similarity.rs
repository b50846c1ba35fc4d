/// Cosine similarity of two vectors; 0 when lengths differ or a norm is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Coarse bucket of an embedding: sign pattern of its leading components.
///
/// Vectors pointing in similar directions tend to share a bucket, which keeps
/// the similarity candidate set small during a build.
pub fn bucket_key(embedding: &[f32], bits: usize) -> u32 {
    embedding
        .iter()
        .take(bits.min(32))
        .enumerate()
        .fold(0u32, |key, (i, value)| {
            if *value > 0.0 {
                key | (1 << i)
            } else {
                key
            }
        })
}
