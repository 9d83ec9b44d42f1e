// Heap-number bitmap of a record lock
use super::types::HeapNo;

const WORD_BITS: usize = 64;

/// Fixed-capacity bitset indexed by heap number.
///
/// The capacity is chosen when the lock is created and never changes; a
/// request for a heap number beyond it needs a new lock object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockBitmap {
    words: Vec<u64>,
    n_bits: usize,
}

impl LockBitmap {
    pub fn new(n_bits: usize) -> Self {
        // Round up to whole bytes like an on-page bitmap would.
        let n_bits = (n_bits + 7) / 8 * 8;
        LockBitmap {
            words: vec![0; (n_bits + WORD_BITS - 1) / WORD_BITS],
            n_bits,
        }
    }

    /// Number of heap numbers this bitmap can describe.
    pub fn n_bits(&self) -> usize {
        self.n_bits
    }

    pub fn get(&self, heap_no: HeapNo) -> bool {
        if heap_no >= self.n_bits {
            return false;
        }
        self.words[heap_no / WORD_BITS] & (1 << (heap_no % WORD_BITS)) != 0
    }

    pub fn set(&mut self, heap_no: HeapNo) {
        assert!(
            heap_no < self.n_bits,
            "heap no {} beyond lock bitmap capacity {}",
            heap_no,
            self.n_bits
        );
        self.words[heap_no / WORD_BITS] |= 1 << (heap_no % WORD_BITS);
    }

    /// Clears the bit; returns whether it was set.
    pub fn reset(&mut self, heap_no: HeapNo) -> bool {
        if heap_no >= self.n_bits {
            return false;
        }
        let mask = 1 << (heap_no % WORD_BITS);
        let word = &mut self.words[heap_no / WORD_BITS];
        let was_set = *word & mask != 0;
        *word &= !mask;
        was_set
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Lowest set heap number.
    pub fn first_set(&self) -> Option<HeapNo> {
        self.iter_set().next()
    }

    pub fn iter_set(&self) -> impl Iterator<Item = HeapNo> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut w = word;
            std::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let bit = w.trailing_zeros() as usize;
                w &= w - 1;
                Some(i * WORD_BITS + bit)
            })
        })
    }
}
