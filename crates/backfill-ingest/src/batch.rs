//! Fixed-size batching

use std::num::NonZeroUsize;

/// Split `items` into consecutive slices of at most `size` elements
///
/// Every slice but the last holds exactly `size` items. Order is preserved
/// and an empty input yields no batches.
pub fn batches<T>(items: &[T], size: NonZeroUsize) -> std::slice::Chunks<'_, T> {
    items.chunks(size.get())
}

/// Number of batches `batches` yields for `len` items
pub fn batch_count(len: usize, size: NonZeroUsize) -> usize {
    len.div_ceil(size.get())
}
