//! Backlog-driven frame thinning for the detection stage.
//!
//! The detection stage discards a share of every batch even without backlog,
//! and discards more as pending batches pile up, so that it does not fall behind
//! real time.

/// Frames out of every [`PATTERN_LEN`] discarded when there is no backlog.
pub const DEFAULT_MIN_SKIP: u32 = 45;

/// Length of one discard pattern cycle.
pub const PATTERN_LEN: usize = 100;

/// Number of frames out of every 100 to discard for the given backlog
/// (pending batches still waiting for detection).
///
/// Reaches 50% quickly and saturates at 100 around a backlog of ~160 batches.
pub fn skip_rate(backlog: usize) -> u32 {
    if backlog <= 1 {
        return DEFAULT_MIN_SKIP;
    }
    let raw = (-6.0 + 21.0 * (backlog as f64 - 0.8).ln()).round();
    let clamped = raw.clamp(0.0, 100.0) as u32;
    clamped.max(DEFAULT_MIN_SKIP)
}

/// Cyclic keep/skip pattern with skip marks spread across the cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkipPattern {
    marks: Vec<bool>,
}

impl SkipPattern {
    /// Pattern of `length` slots with `n` of them marked as skipped.
    ///
    /// The minority value is placed at evenly spaced (truncated linear
    /// interpolation) positions so neither kept nor skipped frames cluster.
    pub fn new(n: u32, length: usize) -> Self {
        let n = n as usize;
        if length == 0 {
            return Self { marks: Vec::new() };
        }
        if n == 0 {
            return Self {
                marks: vec![false; length],
            };
        }
        if n >= length {
            return Self {
                marks: vec![true; length],
            };
        }

        // Place the minority value on `points` positions, then clear the first
        // slot so exactly `n` skips remain.
        let (points, minority, first) = if n * 2 < length {
            (n + 1, true, false)
        } else {
            (length - n + 1, false, true)
        };
        let mut placed = vec![false; length];
        let span = (length - 1) as f64;
        for i in 0..points {
            let k = (i as f64 * span / (points - 1) as f64) as usize;
            placed[k] = true;
        }
        let mut marks: Vec<bool> = (0..length)
            .rev()
            .map(|k| if placed[k] { minority } else { !minority })
            .collect();
        marks[0] = first;
        Self { marks }
    }

    /// Pattern for the current backlog.
    pub fn for_backlog(backlog: usize) -> Self {
        Self::new(skip_rate(backlog), PATTERN_LEN)
    }

    /// Whether the frame at `index` within a batch is discarded.
    pub fn skips(&self, index: usize) -> bool {
        if self.marks.is_empty() {
            return false;
        }
        self.marks[index % self.marks.len()]
    }

    pub fn skipped(&self) -> usize {
        self.marks.iter().filter(|m| **m).count()
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}
