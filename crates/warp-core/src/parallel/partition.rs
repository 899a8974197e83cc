//! Splitting a buffer into overlapping segments

/// One segment of a partitioned buffer, in input frames
///
/// `core_start..core_end` is the part this segment is responsible for;
/// `start..end` extends it by the overlap on each side, clamped to the
/// signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    pub index: usize,
    pub core_start: usize,
    pub core_end: usize,
    pub start: usize,
    pub end: usize,
}

impl SegmentRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn core_len(&self) -> usize {
        self.core_end - self.core_start
    }
}

/// Split `len` frames into `count` contiguous cores of near-equal size,
/// each extended by `overlap` frames
///
/// The overlap is reduced to half the smallest core so that crossfades
/// around neighbouring boundaries never meet. Returns the ranges and the
/// overlap actually used.
pub fn partition(len: usize, count: usize, overlap: usize) -> (Vec<SegmentRange>, usize) {
    let count = count.clamp(1, len.max(1));
    let boundary = |i: usize| ((i as u128 * len as u128) / count as u128) as usize;

    let smallest_core = (0..count)
        .map(|i| boundary(i + 1) - boundary(i))
        .min()
        .unwrap_or(0);
    let overlap = overlap.min(smallest_core / 2);

    let ranges = (0..count)
        .map(|index| {
            let core_start = boundary(index);
            let core_end = boundary(index + 1);
            SegmentRange {
                index,
                core_start,
                core_end,
                start: core_start.saturating_sub(overlap),
                end: (core_end + overlap).min(len),
            }
        })
        .collect();

    (ranges, overlap)
}
