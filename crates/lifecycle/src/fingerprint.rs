//! Stable content hash per file. mtime is deliberately excluded from
//! the digest to avoid re-indexing on access-time churn.

use std::path::Path;

use vault_protocol::ReadError;

/// 64-bit FNV-1a, the same mixing function the corpus's embedding
/// templating code uses for its own stable hashes. Two hash lanes (one
/// seeded by the path, one by the size) are combined into a 128-bit hex
/// digest so path/size participate without just being concatenated
/// into the byte stream the hasher walks once.
fn fnv1a64(bytes: &[u8], seed: u64) -> u64 {
    const PRIME: u64 = 1_099_511_628_211;
    let mut hash = seed;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

const FNV_OFFSET: u64 = 14_695_981_039_346_656_037;

/// Produces the 128-bit hex digest over the absolute path, file bytes,
/// and file size.
pub fn fingerprint(absolute_path: &Path, bytes: &[u8], size: u64) -> String {
    let path_bytes = absolute_path.to_string_lossy();
    let low = fnv1a64(path_bytes.as_bytes(), FNV_OFFSET);
    let low = fnv1a64(bytes, low);
    let low = fnv1a64(&size.to_le_bytes(), low);

    let high = fnv1a64(&size.to_le_bytes(), FNV_OFFSET);
    let high = fnv1a64(path_bytes.as_bytes(), high);
    let high = fnv1a64(bytes, high);

    format!("{high:016x}{low:016x}")
}

/// Reads `path` and computes its fingerprint. A read failure surfaces
/// as `ReadError`; callers mark the file skipped and continue.
pub async fn fingerprint_file(
    fs: &dyn vault_protocol::FileSystem,
    path: &Path,
) -> Result<(String, u64), ReadError> {
    let bytes = fs.read(path).await?;
    let size = bytes.len() as u64;
    Ok((fingerprint(path, &bytes, size), size))
}
