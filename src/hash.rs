//! Path hashing for statement tree nodes.
//!
//! A node's path is the `>`-joined chain of qualified names from the first
//! node below the tree root down to the node itself. The root's path is the
//! empty string. Hashes are murmur3 x86 32-bit with a fixed seed, so they are
//! stable across runs and persisted files.

const SEED: u32 = 0;
const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

pub const PATH_SEPARATOR: char = '>';

/// murmur3 x86 32-bit over raw bytes
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;

    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h ^= mix_k(k);
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let k = tail
            .iter()
            .enumerate()
            .fold(0u32, |k, (i, b)| k | (u32::from(*b) << (8 * i)));
        h ^= mix_k(k);
    }

    h ^= data.len() as u32;
    fmix(h)
}

#[inline(always)]
fn mix_k(k: u32) -> u32 {
    k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

#[inline(always)]
fn fmix(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

#[inline]
pub fn path_hash(path: &str) -> u32 {
    murmur3_32(path.as_bytes(), SEED)
}

/// Hash every tree root carries.
#[inline]
pub fn root_hash() -> u32 {
    path_hash("")
}

/// Joins names outermost-first into a path string.
pub fn join_path<'a, I>(names: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut path = String::new();
    for name in names {
        push_segment(&mut path, name);
    }
    path
}

/// Extends a parent path with one more segment.
pub fn push_segment(path: &mut String, name: &str) {
    if !path.is_empty() {
        path.push(PATH_SEPARATOR);
    }
    path.push_str(name);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur3_known_vectors() {
        assert_eq!(murmur3_32(b"", 0), 0);
        assert_eq!(murmur3_32(b"", 1), 0x514e_28b7);
        assert_eq!(murmur3_32(b"hello", 0), 0x248b_fa47);
        assert_eq!(
            murmur3_32(b"The quick brown fox jumps over the lazy dog", 0),
            0x2e4f_f723
        );
    }

    #[test]
    fn test_path_hash_is_pure() {
        let path = join_path(["us-gaap:Revenues", "us-gaap:CostOfRevenue"]);
        assert_eq!(path, "us-gaap:Revenues>us-gaap:CostOfRevenue");
        assert_eq!(path_hash(&path), path_hash("us-gaap:Revenues>us-gaap:CostOfRevenue"));
        assert_ne!(path_hash(&path), path_hash("us-gaap:CostOfRevenue>us-gaap:Revenues"));
    }

    #[test]
    fn test_push_segment_matches_join() {
        let mut path = join_path(["a:A"]);
        push_segment(&mut path, "a:B");
        assert_eq!(path, join_path(["a:A", "a:B"]));

        let mut empty = String::new();
        push_segment(&mut empty, "a:A");
        assert_eq!(empty, "a:A");
        assert_eq!(root_hash(), path_hash(&join_path(std::iter::empty())));
    }
}
