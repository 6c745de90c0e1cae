// Circular history storage.
//
// Every stateful processor and every temporal driver shares one indexing
// scheme: for an example-relative tick `t`, the storage slot is
// `(t + example_history_start) % history_length`. The slot arithmetic and
// the retained-window check live on `Network`; the containers here are
// dumb fixed-length stores. Unrecorded slots read back as NaN.

/// Per-tick scalar ring (one value per retained tick).
#[derive(Debug, Clone)]
pub struct Ring {
    data: Vec<f32>,
}

impl Ring {
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![f32::NAN; len],
        }
    }

    pub fn empty() -> Self {
        Self { data: Vec::new() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Overwrites the slot; re-storing within a tick is idempotent.
    #[inline]
    pub fn store(&mut self, slot: usize, value: f32) {
        if !self.data.is_empty() {
            self.data[slot] = value;
        }
    }

    #[inline]
    pub fn restore(&self, slot: usize) -> f32 {
        if self.data.is_empty() {
            f32::NAN
        } else {
            self.data[slot]
        }
    }

    pub fn clear(&mut self) {
        self.data.fill(f32::NAN);
    }
}

/// Per-tick-per-unit matrix: `history_length` rows of `num_units` columns.
#[derive(Debug, Clone)]
pub struct HistoryMatrix {
    cols: usize,
    data: Vec<f32>,
}

impl HistoryMatrix {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            cols,
            data: vec![f32::NAN; rows * cols],
        }
    }

    pub fn empty() -> Self {
        Self {
            cols: 0,
            data: Vec::new(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn row(&self, slot: usize) -> &[f32] {
        let start = slot * self.cols;
        &self.data[start..start + self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, slot: usize) -> &mut [f32] {
        let start = slot * self.cols;
        &mut self.data[start..start + self.cols]
    }

    pub fn clear(&mut self) {
        self.data.fill(f32::NAN);
    }
}

/// Targets and clamps are `Option<f32>` on the unit record; ring slots are
/// plain floats, so absence is encoded as NaN at the storage boundary.
#[inline]
pub fn encode_opt(v: Option<f32>) -> f32 {
    v.unwrap_or(f32::NAN)
}

#[inline]
pub fn decode_opt(v: f32) -> Option<f32> {
    if v.is_nan() {
        None
    } else {
        Some(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_round_trip() {
        let mut r = Ring::new(4);
        r.store(2, 0.75);
        assert_eq!(r.restore(2), 0.75);
        // Re-store overwrites.
        r.store(2, -1.0);
        assert_eq!(r.restore(2), -1.0);
    }

    #[test]
    fn unrecorded_slot_reads_nan() {
        let r = Ring::new(4);
        assert!(r.restore(0).is_nan());
        let e = Ring::empty();
        assert!(e.restore(0).is_nan());
    }

    #[test]
    fn matrix_rows_are_independent() {
        let mut m = HistoryMatrix::new(3, 2);
        m.row_mut(1).copy_from_slice(&[1.0, 2.0]);
        assert_eq!(m.row(1), &[1.0, 2.0]);
        assert!(m.row(0).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn option_encoding() {
        assert!(encode_opt(None).is_nan());
        assert_eq!(decode_opt(encode_opt(Some(0.5))), Some(0.5));
        assert_eq!(decode_opt(f32::NAN), None);
    }
}
