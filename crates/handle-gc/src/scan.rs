//! Conservative scanning of object memory for embedded handles.

use std::mem;
use std::ptr::NonNull;

use crate::handles::HandleKey;

/// Scan `len` bytes starting at `region` for embedded handles of the heap
/// at `owner`, calling `found` for each key. Returns the number of
/// candidate words read.
///
/// Every word aligned to the key's alignment is a candidate. A candidate
/// counts only if it decodes as a key and the pointer-sized word right
/// after it equals `owner`, which is how a live handle lays out its key and
/// heap link. Slots a handle was moved out of through `Option::take` and
/// similar carry a zeroed link and are skipped. The scan is still
/// conservative: plain data that reproduces both words is
/// indistinguishable from a real handle.
///
/// # Safety
///
/// `region` must be valid for reading `len` bytes.
pub unsafe fn scan_region(
    region: NonNull<u8>,
    len: usize,
    owner: usize,
    mut found: impl FnMut(HandleKey),
) -> usize {
    let stride = mem::align_of::<HandleKey>();
    let width = mem::size_of::<HandleKey>();
    let link_width = mem::size_of::<usize>();

    let start = region.as_ptr() as usize;
    let mut offset = start.next_multiple_of(stride) - start;
    let mut words = 0;

    while offset + width <= len {
        // SAFETY: the caller guarantees the region is readable and the
        // word lies entirely inside it.
        let bits = unsafe { region.as_ptr().add(offset).cast::<u64>().read_unaligned() };
        words += 1;

        if let Some(key) = HandleKey::from_bits(bits) {
            let link_at = offset + width;
            if link_at + link_width <= len {
                // SAFETY: the link word lies inside the region as well.
                let link = unsafe { region.as_ptr().add(link_at).cast::<usize>().read_unaligned() };
                if link == owner {
                    found(key);
                }
            }
        }

        offset += stride;
    }

    words
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: u64 = 0x1234_5678;
    const KEY: u64 = 0x4800_0000_0000_0005;

    fn scan(words: &[u64], len: usize) -> (usize, Vec<HandleKey>) {
        let region = NonNull::from(words).cast::<u8>();
        let mut seen = Vec::new();
        // SAFETY: callers pass a `len` within `words`.
        let scanned = unsafe { scan_region(region, len, OWNER as usize, |k| seen.push(k)) };
        (scanned, seen)
    }

    #[test]
    fn test_finds_keys_followed_by_owner() {
        let words = [1, KEY, OWNER, 0x4700_0000_0000_0001, u64::MAX];
        let (scanned, seen) = scan(&words, mem::size_of_val(&words));

        assert_eq!(scanned, 5);
        assert_eq!(seen, vec![HandleKey::from_bits(KEY).unwrap()]);
    }

    #[test]
    fn test_key_without_owner_is_skipped() {
        // A zeroed link is what `None` leaves behind.
        let words = [KEY, 0, KEY, OWNER + 8];
        let (_, seen) = scan(&words, mem::size_of_val(&words));
        assert!(seen.is_empty());
    }

    #[test]
    fn test_key_in_last_word_is_skipped() {
        let words = [0, KEY];
        let (scanned, seen) = scan(&words, mem::size_of_val(&words));
        assert_eq!(scanned, 2);
        assert!(seen.is_empty());
    }

    #[test]
    fn test_partial_trailing_word_is_skipped() {
        let words = [0, KEY];
        let (scanned, _) = scan(&words, 12);
        assert_eq!(scanned, 1);
    }

    #[test]
    fn test_empty_region() {
        let word = 0u64;
        // SAFETY: zero bytes are read.
        let scanned = unsafe { scan_region(NonNull::from(&word).cast(), 0, 0, |_| unreachable!()) };
        assert_eq!(scanned, 0);
    }
}
