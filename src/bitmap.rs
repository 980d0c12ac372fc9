//! Growable bit-vector used for round tracking and subtree membership.

const WORD_BITS: usize = u64::BITS as usize;

/// A bit-vector with a logical size that grows on demand.
///
/// Reads past the logical size return `false`; `set` grows the vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u64>,
    nbits: usize,
}

impl Bitmap {
    /// Create a bitmap able to hold `nbits` bits, all clear.
    pub fn new(nbits: usize) -> Self {
        Self {
            words: vec![0; nbits.div_ceil(WORD_BITS)],
            nbits,
        }
    }

    /// Logical size in bits.
    pub fn len(&self) -> usize {
        self.nbits
    }

    pub fn is_empty(&self) -> bool {
        self.nbits == 0
    }

    /// Grow the logical size to at least `nbits`. Never shrinks.
    pub fn expand(&mut self, nbits: usize) {
        if nbits > self.nbits {
            self.words.resize(nbits.div_ceil(WORD_BITS), 0);
            self.nbits = nbits;
        }
    }

    /// Set `bit`, growing if needed. Returns the previous value.
    pub fn set(&mut self, bit: usize) -> bool {
        self.expand(bit + 1);
        let (w, mask) = Self::locate(bit);
        let was = self.words[w] & mask != 0;
        self.words[w] |= mask;
        was
    }

    /// Clear `bit`. Out-of-range bits are already clear.
    pub fn clear(&mut self, bit: usize) {
        if bit < self.nbits {
            let (w, mask) = Self::locate(bit);
            self.words[w] &= !mask;
        }
    }

    /// Clear every bit, keeping the logical size.
    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    pub fn is_set(&self, bit: usize) -> bool {
        if bit >= self.nbits {
            return false;
        }
        let (w, mask) = Self::locate(bit);
        self.words[w] & mask != 0
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Lowest clear bit below the logical size, if any.
    pub fn first_unset(&self) -> Option<usize> {
        (0..self.nbits).find(|&b| !self.is_set(b))
    }

    /// OR `other` into `self`, growing to its size.
    pub fn union_with(&mut self, other: &Bitmap) {
        self.expand(other.nbits);
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst |= *src;
        }
    }

    /// Whether `self` and `other` share any set bit.
    pub fn intersects(&self, other: &Bitmap) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .any(|(a, b)| a & b != 0)
    }

    /// Iterate over set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nbits).filter(move |&b| self.is_set(b))
    }

    fn locate(bit: usize) -> (usize, u64) {
        (bit / WORD_BITS, 1u64 << (bit % WORD_BITS))
    }
}
