//! Block-based bump arena for the buffers that tape nodes point into.
//!
//! Memory is handed out as [`Span`]s (block, offset, length) rather than
//! references, so a node can store where its packed operands and primals
//! live without borrowing the arena. Blocks are never moved or freed one at a
//! time: the arena only grows, rewinds to an earlier [`ArenaMark`], or rewinds
//! completely. Rewound blocks are kept and reused by later allocations.

use log::debug;

/// A contiguous run of elements allocated from an [`Arena`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Span {
    block: u32,
    start: u32,
    len: u32,
}

impl Span {
    /// The zero-length span. Valid in every arena.
    pub const EMPTY: Span = Span {
        block: 0,
        start: 0,
        len: 0,
    };

    /// Number of elements in the span.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A high-water mark of an [`Arena`], used to discard everything allocated
/// after it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArenaMark {
    block: usize,
    offset: usize,
}

/// Bump allocator over fixed-size blocks of `T`.
///
/// Requests larger than the block length get a dedicated block of exactly
/// the requested size. Blocks are filled with `T::default()` once, when they
/// are created; [`alloc`](Arena::alloc) itself never clears memory, so a
/// reused span holds whatever was written there before.
pub struct Arena<T> {
    blocks: Vec<Box<[T]>>,
    block_len: usize,
    current: usize,
    offset: usize,
}

impl<T: Copy + Default> Arena<T> {
    /// Create an empty arena whose blocks hold `block_len` elements.
    /// No memory is reserved until the first allocation.
    pub fn new(block_len: usize) -> Self {
        Arena {
            blocks: Vec::new(),
            block_len: block_len.max(1),
            current: 0,
            offset: 0,
        }
    }

    fn new_block(&self, len: usize) -> Box<[T]> {
        debug!(
            "arena: new block of {} x {} bytes ({} blocks before)",
            len,
            std::mem::size_of::<T>(),
            self.blocks.len()
        );
        vec![T::default(); len].into_boxed_slice()
    }

    /// Allocate `len` elements. Contents are unspecified.
    pub fn alloc(&mut self, len: usize) -> Span {
        if len == 0 {
            return Span::EMPTY;
        }
        if self.blocks.is_empty() {
            let block = self.new_block(len.max(self.block_len));
            self.blocks.push(block);
            self.current = 0;
            self.offset = 0;
        } else if self.offset + len > self.blocks[self.current].len() {
            let next = self.current + 1;
            let reusable = self.blocks.get(next).is_some_and(|b| b.len() >= len);
            if !reusable {
                // Anything at `next` and beyond is past the high-water mark,
                // so an undersized block there can be replaced outright.
                let block = self.new_block(len.max(self.block_len));
                if next < self.blocks.len() {
                    self.blocks[next] = block;
                } else {
                    self.blocks.push(block);
                }
            }
            self.current = next;
            self.offset = 0;
        }
        let span = Span {
            block: self.current as u32,
            start: self.offset as u32,
            len: len as u32,
        };
        self.offset += len;
        span
    }

    /// Allocate a span holding a copy of `src`.
    pub fn alloc_copy(&mut self, src: &[T]) -> Span {
        let span = self.alloc(src.len());
        self.slice_mut(span).copy_from_slice(src);
        span
    }

    /// Allocate a span and fill it from an exact-size iterator.
    pub fn alloc_extend<I>(&mut self, iter: I) -> Span
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        let iter = iter.into_iter();
        let span = self.alloc(iter.len());
        for (slot, v) in self.slice_mut(span).iter_mut().zip(iter) {
            *slot = v;
        }
        span
    }

    #[inline]
    pub fn slice(&self, span: Span) -> &[T] {
        if span.len == 0 {
            return &[];
        }
        let start = span.start as usize;
        &self.blocks[span.block as usize][start..start + span.len as usize]
    }

    #[inline]
    pub fn slice_mut(&mut self, span: Span) -> &mut [T] {
        if span.len == 0 {
            return &mut [];
        }
        let start = span.start as usize;
        &mut self.blocks[span.block as usize][start..start + span.len as usize]
    }

    /// Current high-water mark.
    #[inline]
    pub fn mark(&self) -> ArenaMark {
        ArenaMark {
            block: self.current,
            offset: self.offset,
        }
    }

    /// Rewind to `mark`. Spans allocated before the mark stay valid and
    /// unchanged; spans allocated after it must no longer be used.
    pub fn restore(&mut self, mark: ArenaMark) {
        debug_assert!(
            mark <= self.mark(),
            "arena restored to a mark ahead of the current position"
        );
        self.current = mark.block;
        self.offset = mark.offset;
    }

    /// Invalidate every span. Blocks are retained for reuse.
    pub fn recover_all(&mut self) {
        self.current = 0;
        self.offset = 0;
    }

    /// Elements below the high-water mark, including block tails skipped
    /// when an allocation did not fit.
    pub fn used(&self) -> usize {
        if self.blocks.is_empty() {
            return 0;
        }
        self.blocks[..self.current]
            .iter()
            .map(|b| b.len())
            .sum::<usize>()
            + self.offset
    }

    /// Total elements reserved across all blocks.
    pub fn capacity(&self) -> usize {
        self.blocks.iter().map(|b| b.len()).sum()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_within_one_block() {
        let mut arena: Arena<f64> = Arena::new(16);
        let a = arena.alloc_copy(&[1.0, 2.0, 3.0]);
        let b = arena.alloc_copy(&[4.0]);
        assert_eq!(arena.slice(a), &[1.0, 2.0, 3.0]);
        assert_eq!(arena.slice(b), &[4.0]);
        assert_eq!(arena.num_blocks(), 1);
        assert_eq!(arena.used(), 4);
    }

    #[test]
    fn grows_with_new_blocks_without_moving_old_spans() {
        let mut arena: Arena<u32> = Arena::new(4);
        let a = arena.alloc_copy(&[1, 2, 3]);
        let b = arena.alloc_copy(&[7, 8]);
        let c = arena.alloc_copy(&[9; 10]);
        assert_eq!(arena.num_blocks(), 3);
        assert_eq!(arena.slice(a), &[1, 2, 3]);
        assert_eq!(arena.slice(b), &[7, 8]);
        assert_eq!(arena.slice(c).len(), 10);
    }

    #[test]
    fn empty_span_is_always_valid() {
        let mut arena: Arena<f64> = Arena::new(8);
        let e = arena.alloc(0);
        assert!(e.is_empty());
        assert!(arena.slice(e).is_empty());
        assert_eq!(arena.num_blocks(), 0);
    }

    #[test]
    fn restore_keeps_earlier_spans() {
        let mut arena: Arena<f64> = Arena::new(4);
        let keep = arena.alloc_copy(&[1.0, 2.0]);
        let mark = arena.mark();
        arena.alloc_copy(&[5.0; 3]);
        arena.alloc_copy(&[6.0; 3]);
        arena.restore(mark);
        assert_eq!(arena.mark(), mark);
        assert_eq!(arena.slice(keep), &[1.0, 2.0]);
        let again = arena.alloc_copy(&[3.0, 4.0]);
        assert_eq!(arena.slice(keep), &[1.0, 2.0]);
        assert_eq!(arena.slice(again), &[3.0, 4.0]);
    }

    #[test]
    fn recover_all_reuses_blocks() {
        let mut arena: Arena<f64> = Arena::new(4);
        for _ in 0..5 {
            arena.alloc(3);
        }
        let blocks = arena.num_blocks();
        arena.recover_all();
        assert_eq!(arena.used(), 0);
        for _ in 0..5 {
            arena.alloc(3);
        }
        assert_eq!(arena.num_blocks(), blocks);
    }

    #[test]
    fn oversized_request_after_rewind_replaces_block() {
        let mut arena: Arena<u32> = Arena::new(2);
        arena.alloc(2);
        arena.alloc(2);
        arena.recover_all();
        arena.alloc(1);
        let big = arena.alloc_extend(0..6u32);
        assert_eq!(arena.slice(big), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(arena.num_blocks(), 2);
        assert_eq!(arena.capacity(), 2 + 6);
    }

    #[test]
    fn growing_requests_across_rewinds_stay_bounded() {
        let mut arena: Arena<u32> = Arena::new(8);
        let keep = arena.alloc_copy(&[1, 2, 3]);
        let mark = arena.mark();
        for k in 0..500 {
            arena.alloc(9 + k);
            arena.restore(mark);
        }
        assert_eq!(arena.num_blocks(), 2);
        assert_eq!(arena.capacity(), 8 + 9 + 499);
        assert_eq!(arena.slice(keep), &[1, 2, 3]);
        assert_eq!(arena.used(), 3);
    }
}
