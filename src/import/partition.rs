//! Contiguous, size-bounded splitting of shaped rows.

/// A contiguous slice of the input owned by exactly one loader.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition<T> {
    /// Position of this partition in the input, starting at 0.
    pub index: usize,
    /// Input position of the first row, for log messages.
    pub first_row: usize,
    pub rows: Vec<T>,
}

impl<T> Partition<T> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Split `rows` into partitions of at most `size` rows, preserving order.
///
/// Only the last partition may be smaller than `size`. A `size` of zero is
/// treated as one.
pub fn partition<T>(rows: Vec<T>, size: usize) -> Vec<Partition<T>> {
    let size = size.max(1);
    let mut partitions = Vec::with_capacity(rows.len().div_ceil(size));
    let mut remaining = rows.into_iter().peekable();
    let mut first_row = 0;

    while remaining.peek().is_some() {
        let chunk: Vec<T> = remaining.by_ref().take(size).collect();
        let len = chunk.len();
        partitions.push(Partition {
            index: partitions.len(),
            first_row,
            rows: chunk,
        });
        first_row += len;
    }

    partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_sizes() {
        let parts = partition((0..10).collect::<Vec<_>>(), 4);
        let sizes: Vec<usize> = parts.iter().map(Partition::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(parts[2].first_row, 8);
        assert_eq!(parts[2].index, 2);
    }

    #[test]
    fn test_partition_covers_input_once_in_order() {
        for size in 1..8 {
            let input: Vec<usize> = (0..23).collect();
            let flattened: Vec<usize> = partition(input.clone(), size)
                .into_iter()
                .flat_map(|p| p.rows)
                .collect();
            assert_eq!(flattened, input);
        }
    }

    #[test]
    fn test_partition_edge_cases() {
        assert!(partition(Vec::<u8>::new(), 3).is_empty());
        assert_eq!(partition(vec![1, 2, 3], 0).len(), 3);
        assert_eq!(partition(vec![1, 2, 3], 100).len(), 1);
    }
}
