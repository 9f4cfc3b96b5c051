/// MurmurHash3, x86 32-bit variant.
///
/// This is the hash the in-kernel classifier applies to the request key to
/// pick a destination socket, so the userspace rendition must produce
/// bit-identical results: a key must land on the same index whether the
/// decision is replayed here or made by the kernel program.
///
/// The seed is fixed so that the mapping is stable across restarts.
pub const KEY_HASH_SEED: u32 = 1;

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

/// Canonical MurmurHash3_x86_32 over `data` with the given seed.
#[inline]
pub fn murmur3_x86_32(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;

    let mut chunks = data.chunks_exact(4);
    for block in &mut chunks {
        let mut k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        if tail.len() >= 3 {
            k ^= u32::from(tail[2]) << 16;
        }
        if tail.len() >= 2 {
            k ^= u32::from(tail[1]) << 8;
        }
        k ^= u32::from(tail[0]);
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        h ^= k;
    }

    h ^= data.len() as u32;
    fmix32(h)
}

/// Hash a request key with the fixed classifier seed.
#[inline(always)]
pub fn key_hash(key: &[u8]) -> u32 {
    murmur3_x86_32(key, KEY_HASH_SEED)
}

#[inline(always)]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    // Published MurmurHash3_x86_32 verification vectors.
    #[test]
    fn matches_reference_vectors() {
        assert_eq!(murmur3_x86_32(b"", 0), 0x0000_0000);
        assert_eq!(murmur3_x86_32(b"", 1), 0x514e_28b7);
        assert_eq!(murmur3_x86_32(b"hello", 0), 0x248b_fa47);
        assert_eq!(
            murmur3_x86_32(b"The quick brown fox jumps over the lazy dog", 0),
            0x2e4f_f723
        );
    }

    #[test]
    fn key_hash_uses_fixed_seed() {
        assert_eq!(key_hash(b"hello"), murmur3_x86_32(b"hello", 1));
        assert_eq!(key_hash(b"hello"), 0xbb4a_bcad);
        assert_eq!(key_hash(b"key"), 0x09d5_65ac);
        assert_eq!(key_hash(b"abcd"), 0x9bf5_4592);
    }

    #[test]
    fn all_tail_lengths_are_covered() {
        // One hash per remainder length; values only need to be stable and
        // distinct, which guards the tail switch against regressions.
        let hashes: Vec<u32> = [&b"a"[..], b"ab", b"abc", b"abcd", b"abcde"]
            .iter()
            .map(|k| key_hash(k))
            .collect();
        for (i, a) in hashes.iter().enumerate() {
            for b in &hashes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn deterministic_across_calls() {
        let key = b"deterministic-key";
        assert_eq!(key_hash(key), key_hash(key));
    }
}
