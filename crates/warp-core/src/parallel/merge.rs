//! Stitching independently stretched segments back together

use super::SegmentRange;
use crate::types::Sample;

/// Linear crossfade window between segment `k` and `k + 1`, in output frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossfade {
    pub start: usize,
    pub end: usize,
}

impl Crossfade {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Weight of the incoming segment at output frame `g` (0→1 across the window)
    fn incoming_weight(&self, g: usize) -> f32 {
        ((g - self.start) as f32 + 0.5) / self.len() as f32
    }
}

/// Result of [`merge_segments`]
#[derive(Debug)]
pub struct Merged {
    pub channels: Vec<Vec<Sample>>,
    pub crossfades: Vec<Crossfade>,
}

/// Merge stretched segment outputs strictly left to right
///
/// `outputs[i]` is the stretched audio of `ranges[i]` (planar). Segment `i`
/// is placed at output frame `round(start_i × ratio)`. Around each core
/// boundary a window of `overlap × ratio` frames, centred on the boundary,
/// is crossfaded linearly; everywhere else a single segment is copied
/// verbatim. Where only one of the two segments has a sample inside a
/// window, that sample is used alone.
///
/// Output length is `ceil(input_len × ratio)`, shortened if the last
/// segment doesn't reach that far.
pub fn merge_segments(
    ranges: &[SegmentRange],
    outputs: &[Vec<Vec<Sample>>],
    input_len: usize,
    ratio: f64,
    overlap: usize,
) -> Merged {
    let n = ranges.len().min(outputs.len());
    let channel_count = outputs.first().map_or(0, Vec::len);
    if n == 0 || channel_count == 0 {
        return Merged {
            channels: Vec::new(),
            crossfades: Vec::new(),
        };
    }

    let placed: Vec<(usize, usize)> = (0..n)
        .map(|i| {
            let start = (ranges[i].start as f64 * ratio).round() as usize;
            let len = outputs[i].first().map_or(0, Vec::len);
            (start, start + len)
        })
        .collect();

    let fade_len = (overlap as f64 * ratio).round() as usize;
    let crossfades: Vec<Crossfade> = (0..n - 1)
        .map(|k| {
            let centre = (ranges[k].core_end as f64 * ratio).round() as usize;
            let start = centre.saturating_sub(fade_len / 2).max(placed[k + 1].0);
            let end = (centre.saturating_sub(fade_len / 2) + fade_len)
                .min(placed[k].1)
                .max(start);
            Crossfade { start, end }
        })
        .collect();

    let target = (input_len as f64 * ratio).ceil() as usize;
    let total = target.min(placed[n - 1].1);

    let sample = |i: usize, c: usize, g: usize| -> Option<Sample> {
        g.checked_sub(placed[i].0)
            .and_then(|j| outputs[i][c].get(j).copied())
    };

    let mut channels: Vec<Vec<Sample>> = vec![Vec::with_capacity(total); channel_count];
    let mut k = 0;
    for g in 0..total {
        while k + 1 < n && g >= crossfades[k].end {
            k += 1;
        }
        let fade = (k + 1 < n && g >= crossfades[k].start).then(|| crossfades[k]);

        for (c, out) in channels.iter_mut().enumerate() {
            let outgoing = sample(k, c, g);
            let value = match fade {
                Some(fade) => {
                    let t = fade.incoming_weight(g);
                    match (outgoing, sample(k + 1, c, g)) {
                        (Some(a), Some(b)) => a * (1.0 - t) + b * t,
                        (Some(a), None) => a,
                        (None, Some(b)) => b,
                        (None, None) => 0.0,
                    }
                }
                None => outgoing.unwrap_or(0.0),
            };
            out.push(value);
        }
    }

    if total < target {
        log::warn!(
            "Merged output short by {} frames ({} of {})",
            target - total,
            total,
            target
        );
    }

    Merged {
        channels,
        crossfades,
    }
}
