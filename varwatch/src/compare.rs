//! Offset-aware memory comparison
//!
//! `offmemcmp` finds the first element-aligned byte offset at which two
//! equally sized images differ. Array diffing calls it once per remaining
//! tail on every breakpoint hit, so it is the hottest path in the whole
//! watcher; on x86-64 an AVX2 variant is selected at startup when the CPU
//! has it, with the word-sized generic as the portable fallback. Both
//! satisfy the same contract:
//!
//! - `None` iff the common whole-element prefix of `a` and `b` is equal;
//! - otherwise `Some(k)` with `k % element_size == 0`, `a[..k] == b[..k]`
//!   and `a[k..k + element_size] != b[k..k + element_size]`.

use std::sync::OnceLock;

/// Comparator function type shared by all implementations
pub type OffMemCmp = fn(&[u8], &[u8], usize) -> Option<usize>;

/// Compare through the comparator selected for this CPU
pub fn offmemcmp(a: &[u8], b: &[u8], element_size: usize) -> Option<usize> {
    static ACTIVE: OnceLock<OffMemCmp> = OnceLock::new();
    (ACTIVE.get_or_init(select))(a, b, element_size)
}

/// Pick the fastest comparator the running CPU supports
pub fn select() -> OffMemCmp {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") {
            tracing::debug!("using AVX2 memory comparator");
            return offmemcmp_avx2;
        }
    }
    tracing::debug!("using generic memory comparator");
    offmemcmp_generic
}

/// Portable comparator: 8-byte words first, byte-wise over the mismatching
/// word and the tail
pub fn offmemcmp_generic(a: &[u8], b: &[u8], element_size: usize) -> Option<usize> {
    debug_assert!(element_size > 0);
    let len = a.len().min(b.len());

    let mut first_diff = None;
    let mut offset = 0usize;
    const WORD: usize = 8;

    while offset + WORD <= len {
        let wa = u64::from_le_bytes(a[offset..offset + WORD].try_into().unwrap());
        let wb = u64::from_le_bytes(b[offset..offset + WORD].try_into().unwrap());
        if wa != wb {
            // Differing bytes sit at the trailing-zero end of the XOR in
            // little-endian order.
            let byte = ((wa ^ wb).trailing_zeros() / 8) as usize;
            first_diff = Some(offset + byte);
            break;
        }
        offset += WORD;
    }

    if first_diff.is_none() {
        for i in offset..len {
            if a[i] != b[i] {
                first_diff = Some(i);
                break;
            }
        }
    }

    align_down(first_diff?, element_size, len)
}

/// AVX2 comparator: 32 bytes per step, then the generic code over the
/// mismatching lane and the tail
#[cfg(target_arch = "x86_64")]
fn offmemcmp_avx2(a: &[u8], b: &[u8], element_size: usize) -> Option<usize> {
    debug_assert!(element_size > 0);
    let len = a.len().min(b.len());

    let mut offset = 0usize;
    const LANE: usize = 32;

    while offset + LANE <= len {
        // SAFETY: select() guarantees AVX2 is present, and both slices
        // cover offset..offset + LANE.
        let mask = unsafe { lane_diff_mask(&a[offset..], &b[offset..]) };
        if mask != 0 {
            let byte = mask.trailing_zeros() as usize;
            return align_down(offset + byte, element_size, len);
        }
        offset += LANE;
    }

    if offset < len {
        if let Some(i) = first_diff_within(&a[offset..len], &b[offset..len]) {
            return align_down(offset + i, element_size, len);
        }
    }

    None
}

/// Bitmask of differing byte positions within one 32-byte lane
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn lane_diff_mask(a: &[u8], b: &[u8]) -> u32 {
    use std::arch::x86_64::{
        _mm256_cmpeq_epi8, _mm256_loadu_si256, _mm256_movemask_epi8,
    };

    let va = _mm256_loadu_si256(a.as_ptr() as *const _);
    let vb = _mm256_loadu_si256(b.as_ptr() as *const _);
    let eq = _mm256_cmpeq_epi8(va, vb);
    !(_mm256_movemask_epi8(eq) as u32)
}

/// First differing byte index, if any
#[cfg(target_arch = "x86_64")]
fn first_diff_within(a: &[u8], b: &[u8]) -> Option<usize> {
    let len = a.len().min(b.len());
    (0..len).find(|&i| a[i] != b[i])
}

/// Round a raw differing byte down to its element start; a difference in a
/// trailing partial element is not reportable
fn align_down(diff: usize, element_size: usize, len: usize) -> Option<usize> {
    let aligned = diff - diff % element_size;
    if aligned + element_size > len {
        return None;
    }
    Some(aligned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_slices_compare_equal() {
        let a = [1u8; 40];
        let b = [1u8; 40];
        assert_eq!(offmemcmp_generic(&a, &b, 4), None);
        assert_eq!(offmemcmp(&a, &b, 4), None);
    }

    #[test]
    fn difference_reports_element_aligned_offset() {
        let mut a = [0u8; 40];
        let b = [0u8; 40];
        a[13] = 7; // inside element 3 for 4-byte elements
        let k = offmemcmp(&a, &b, 4).unwrap();
        assert_eq!(k, 12);
        assert_eq!(k % 4, 0);
        assert_eq!(a[..k], b[..k]);
        assert_ne!(a[k..k + 4], b[k..k + 4]);
    }

    #[test]
    fn difference_in_the_word_tail_is_found() {
        let mut a = [0u8; 19];
        let b = [0u8; 19];
        a[18] = 1; // past the last whole word and lane
        assert_eq!(offmemcmp_generic(&a, &b, 1), Some(18));
        assert_eq!(offmemcmp(&a, &b, 1), Some(18));
    }

    #[test]
    fn first_of_many_differences_wins() {
        let mut a = [0u8; 100];
        let b = [0u8; 100];
        a[5] = 1;
        a[70] = 1;
        assert_eq!(offmemcmp(&a, &b, 1), Some(5));
    }

    #[test]
    fn scan_over_a_whole_array_yields_every_element() {
        // Walk the comparator the way array diffing does and collect every
        // differing element of a 10-element i32 array.
        let old: Vec<u8> = (0..10i32).flat_map(|_| 0i32.to_le_bytes()).collect();
        let new: Vec<u8> = (0..10i32).flat_map(|v| (v + 1).to_le_bytes()).collect();

        let mut offsets = Vec::new();
        let mut base = 0;
        while let Some(k) = offmemcmp(&old[base..], &new[base..], 4) {
            offsets.push(base + k);
            base = base + k + 4;
        }
        let expected: Vec<usize> = (0..10).map(|i| i * 4).collect();
        assert_eq!(offsets, expected);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn avx2_agrees_with_the_generic_comparator() {
        if !std::arch::is_x86_feature_detected!("avx2") {
            eprintln!("skipping: no AVX2 on this CPU");
            return;
        }

        for len in [1usize, 7, 8, 31, 32, 33, 64, 100, 257] {
            for element in [1usize, 2, 4, 8, 16] {
                if element > len {
                    continue;
                }
                let a: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
                for flip in 0..len {
                    let mut b = a.clone();
                    b[flip] ^= 0x40;
                    assert_eq!(
                        offmemcmp_avx2(&a, &b, element),
                        offmemcmp_generic(&a, &b, element),
                        "len {len} element {element} flip {flip}"
                    );
                }
                let b = a.clone();
                assert_eq!(
                    offmemcmp_avx2(&a, &b, element),
                    offmemcmp_generic(&a, &b, element)
                );
            }
        }
    }
}
