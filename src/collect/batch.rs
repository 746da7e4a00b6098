/// Contiguous slice of the point index space, processed as one durable
/// output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDescriptor {
    pub start_index: usize,
    /// Exclusive
    pub end_index: usize,
}

impl BatchDescriptor {
    pub fn new(start_index: usize, end_index: usize) -> Self {
        BatchDescriptor {
            start_index,
            end_index,
        }
    }

    /// Deterministic file name encoding the index range.
    pub fn file_name(&self) -> String {
        format!("Pnt_start{}_end{}.txt", self.start_index, self.end_index)
    }

    /// Recover the index range from a batch file name.
    ///
    /// Ordering between batches must go through these numbers, never through
    /// the raw string: lexicographic order breaks across index widths
    /// ("start9" sorts after "start10").
    pub fn parse_file_name(name: &str) -> Option<BatchDescriptor> {
        let rest = name.strip_prefix("Pnt_start")?;
        let rest = rest.strip_suffix(".txt")?;
        let (start, end) = rest.split_once("_end")?;
        Some(BatchDescriptor::new(
            start.parse().ok()?,
            end.parse().ok()?,
        ))
    }

    pub fn len(&self) -> usize {
        self.end_index.saturating_sub(self.start_index)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start_index && index < self.end_index
    }
}

/// Divide `total` sample points into fixed-size contiguous batches covering
/// `[0, total)` exactly once. Deterministic, so restarts never shift batch
/// boundaries. A batch size of zero is clamped to one.
pub fn partition(total: usize, batch_size: usize) -> Vec<BatchDescriptor> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(total.div_ceil(batch_size));
    let mut start = 0;
    while start < total {
        let end = (start + batch_size).min(total);
        batches.push(BatchDescriptor::new(start, end));
        start = end;
    }
    batches
}
