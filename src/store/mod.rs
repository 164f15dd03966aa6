pub mod search;
pub mod types;
pub mod write;

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Decode a sqlite-vec blob back into an f32 vector.
pub fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
///
/// Every vector in the store is unit-length, so the vec0 L2 distance orders
/// results identically to cosine distance.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity recovered from the L2 distance of two unit vectors:
/// `d^2 = 2 - 2cos` so `cos = 1 - d^2/2`.
pub fn cosine_from_l2(distance: f64) -> f64 {
    1.0 - (distance * distance) / 2.0
}
