//! Bitset
//!
//! Fixed-length bitset over 64-bit words. Used for filter match candidates,
//! the aborted-row mask and the deleted-flag column of a data pack.
//!
//! Bits beyond `len` are always kept zero so that word-level operations
//! (`count`, `any`, `and_not`) never see stale tail bits.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitset {
    words: Vec<u64>,
    len: usize,
}

#[inline]
fn words_for(len: usize) -> usize {
    (len + 63) / 64
}

impl Bitset {
    /// Create a bitset of `len` zero bits
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; words_for(len)],
            len,
        }
    }

    /// Create a bitset of `len` one bits
    pub fn ones(len: usize) -> Self {
        let mut bits = Self::new(len);
        bits.set_all();
        bits
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Grow or shrink to `len` bits. New bits are zero.
    pub fn resize(&mut self, len: usize) {
        self.words.resize(words_for(len), 0);
        self.len = len;
        self.mask_tail();
    }

    /// Append one bit at the end
    pub fn push(&mut self, val: bool) {
        let i = self.len;
        self.resize(i + 1);
        if val {
            self.set(i);
        }
    }

    /// Zero all bits and set length to `len`
    pub fn reset(&mut self, len: usize) {
        self.words.clear();
        self.words.resize(words_for(len), 0);
        self.len = len;
    }

    #[inline]
    pub fn set(&mut self, i: usize) {
        debug_assert!(i < self.len, "bit {} out of range {}", i, self.len);
        self.words[i >> 6] |= 1 << (i & 63);
    }

    #[inline]
    pub fn unset(&mut self, i: usize) {
        debug_assert!(i < self.len, "bit {} out of range {}", i, self.len);
        self.words[i >> 6] &= !(1 << (i & 63));
    }

    #[inline]
    pub fn contains(&self, i: usize) -> bool {
        i < self.len && self.words[i >> 6] & (1 << (i & 63)) != 0
    }

    pub fn set_all(&mut self) {
        for w in self.words.iter_mut() {
            *w = u64::MAX;
        }
        self.mask_tail();
    }

    pub fn clear(&mut self) {
        for w in self.words.iter_mut() {
            *w = 0;
        }
    }

    /// Keep only bits also set in `other`
    pub fn and(&mut self, other: &Bitset) {
        for (i, w) in self.words.iter_mut().enumerate() {
            *w &= other.words.get(i).copied().unwrap_or(0);
        }
    }

    /// Remove all bits set in `other`
    pub fn and_not(&mut self, other: &Bitset) {
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w &= !o;
        }
    }

    /// Add all bits set in `other` (up to our own length)
    pub fn or(&mut self, other: &Bitset) {
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w |= o;
        }
        self.mask_tail();
    }

    /// Flip every bit
    pub fn negate(&mut self) {
        for w in self.words.iter_mut() {
            *w = !*w;
        }
        self.mask_tail();
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn any(&self) -> bool {
        self.words.iter().any(|w| *w != 0)
    }

    pub fn none(&self) -> bool {
        !self.any()
    }

    /// Iterate positions of set bits in ascending order
    pub fn iter_ones(&self) -> Ones<'_> {
        Ones {
            words: &self.words,
            idx: 0,
            cur: self.words.first().copied().unwrap_or(0),
        }
    }

    /// Write positions of set bits into `out` (cleared first)
    pub fn indexes(&self, out: &mut Vec<u32>) {
        out.clear();
        out.extend(self.iter_ones().map(|i| i as u32));
    }

    /// Raw little-endian byte view, `ceil(len / 8)` bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.words.len() * 8);
        for w in &self.words {
            buf.extend_from_slice(&w.to_le_bytes());
        }
        buf.truncate((self.len + 7) / 8);
        buf
    }

    /// Build from a little-endian byte view produced by `to_bytes`
    pub fn from_bytes(buf: &[u8], len: usize) -> Self {
        let mut bits = Self::new(len);
        for (i, b) in buf.iter().enumerate().take((len + 7) / 8) {
            bits.words[i / 8] |= (*b as u64) << ((i % 8) * 8);
        }
        bits.mask_tail();
        bits
    }

    pub fn heap_size(&self) -> usize {
        self.words.capacity() * 8
    }

    fn mask_tail(&mut self) {
        let rem = self.len & 63;
        if rem != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
    }
}

/// Iterator over set bit positions
pub struct Ones<'a> {
    words: &'a [u64],
    idx: usize,
    cur: u64,
}

impl Iterator for Ones<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.cur != 0 {
                let bit = self.cur.trailing_zeros() as usize;
                self.cur &= self.cur - 1;
                return Some(self.idx * 64 + bit);
            }
            self.idx += 1;
            if self.idx >= self.words.len() {
                return None;
            }
            self.cur = self.words[self.idx];
        }
    }
}
