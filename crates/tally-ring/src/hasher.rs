/// Stable 64-bit hash used to place keys and virtual nodes on the ring.
///
/// Implementations must be deterministic across processes and platforms:
/// two replicas hashing the same bytes must get the same value.
pub trait RingHasher: Send + Sync {
    fn sum64(&self, data: &[u8]) -> u64;
}

/// BLAKE3, truncated to its first eight bytes (little-endian).
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake3Hasher;

impl RingHasher for Blake3Hasher {
    fn sum64(&self, data: &[u8]) -> u64 {
        let digest = blake3::hash(data);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let h = Blake3Hasher;
        assert_eq!(h.sum64(b"ns/report-1"), h.sum64(b"ns/report-1"));
    }

    #[test]
    fn different_inputs_differ() {
        let h = Blake3Hasher;
        assert_ne!(h.sum64(b"10.0.0.10"), h.sum64(b"10.0.0.11"));
    }

    #[test]
    fn matches_blake3_prefix() {
        let expected = blake3::hash(b"abc");
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&expected.as_bytes()[..8]);
        assert_eq!(Blake3Hasher.sum64(b"abc"), u64::from_le_bytes(prefix));
    }
}
