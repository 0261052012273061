//! A single machine-word bitmap giving O(1) access to the highest set
//! priority level.
//!
//! Bit `i` tracks whether priority level `i` has a ready task. Unlike the
//! reference kernel this never grows beyond one word: priority levels above
//! `usize::BITS` simply aren't representable, matching the "numerically
//! higher value means higher priority" convention this crate uses (the
//! bitmap therefore scans from the most-significant end, not the least).
use core::fmt;

use super::Init;

/// Bits set to `1` mark priority levels with at least one ready task.
#[derive(Clone, Copy)]
pub(crate) struct PrioBitmap {
    bits: usize,
}

impl Init for PrioBitmap {
    const INIT: Self = Self { bits: 0 };
}

impl fmt::Debug for PrioBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries((0..usize::BITS as usize).filter(|&i| self.get(i)))
            .finish()
    }
}

impl PrioBitmap {
    /// The highest priority level this bitmap can represent.
    pub(crate) const MAX_LEN: usize = usize::BITS as usize;

    pub(crate) fn get(&self, i: usize) -> bool {
        debug_assert!(i < Self::MAX_LEN);
        self.bits & (1 << i) != 0
    }

    pub(crate) fn set(&mut self, i: usize) {
        debug_assert!(i < Self::MAX_LEN);
        self.bits |= 1 << i;
    }

    pub(crate) fn clear(&mut self, i: usize) {
        debug_assert!(i < Self::MAX_LEN);
        self.bits &= !(1 << i);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// The highest set priority level, or `None` if no task is ready.
    ///
    /// Implemented with `leading_zeros` rather than `trailing_zeros`
    /// because higher bit indices are higher priorities here.
    pub(crate) fn highest(&self) -> Option<usize> {
        if self.bits == 0 {
            None
        } else {
            Some(Self::MAX_LEN - 1 - self.bits.leading_zeros() as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::collections::BTreeSet;

    /// Reference model checked against the bit-twiddling implementation.
    struct Reference(BTreeSet<usize>);

    impl Reference {
        fn new() -> Self {
            Self(BTreeSet::new())
        }
        fn highest(&self) -> Option<usize> {
            self.0.iter().next_back().copied()
        }
    }

    #[derive(Debug, Clone)]
    enum Cmd {
        Set(usize),
        Clear(usize),
    }

    fn to_cmds(ops: Vec<(bool, u8)>) -> Vec<Cmd> {
        ops.into_iter()
            .map(|(set, bit)| {
                let bit = bit as usize % PrioBitmap::MAX_LEN;
                if set {
                    Cmd::Set(bit)
                } else {
                    Cmd::Clear(bit)
                }
            })
            .collect()
    }

    #[quickcheck]
    fn matches_btreeset_model(ops: Vec<(bool, u8)>) {
        let mut subject = PrioBitmap::INIT;
        let mut reference = Reference::new();

        for cmd in to_cmds(ops) {
            match cmd {
                Cmd::Set(bit) => {
                    subject.set(bit);
                    reference.0.insert(bit);
                }
                Cmd::Clear(bit) => {
                    subject.clear(bit);
                    reference.0.remove(&bit);
                }
            }
            assert_eq!(subject.highest(), reference.highest());
            assert_eq!(subject.is_empty(), reference.0.is_empty());
        }
    }

    #[test]
    fn highest_prefers_msb() {
        let mut bm = PrioBitmap::INIT;
        bm.set(3);
        bm.set(7);
        bm.set(1);
        assert_eq!(bm.highest(), Some(7));
        bm.clear(7);
        assert_eq!(bm.highest(), Some(3));
    }

    #[test]
    fn empty_has_no_highest() {
        assert_eq!(PrioBitmap::INIT.highest(), None);
        assert!(PrioBitmap::INIT.is_empty());
    }
}
