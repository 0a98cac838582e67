//! Piecewise-linear key -> page-id locator (C3, `spec.md` \S4.3).
//!
//! Standard Sandwich/GreedySpline construction: a knot is only emitted when
//! the candidate line through the last two knots would mispredict the
//! pending point by more than `max_error`. Knots are stored in two parallel
//! `Vec`s rather than a struct-of-knots, mirroring the arena-plus-typed-view
//! style the rest of the crate uses for page buffers.

use alloc::vec::Vec;

/// A knot `(key, page_id)` in the spline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Knot {
    key: u64,
    page_id: u32,
}

/// Bounded-error piecewise-linear locator.
///
/// `max_error` bounds how far `estimate()` may be from the true page id for
/// any key that has been added. `locate()` turns that bound into a
/// `[lowPage, highPage]` bracket the caller binary-searches within.
#[derive(Debug, Clone)]
pub struct Spline {
    knots: Vec<Knot>,
    max_error: u32,
    // Lower/upper bound lines of the current "sandwich", tracked as
    // (key, page_id) pairs used to decide whether the pending point still
    // fits within max_error of a single line through the last knot.
    lower: Option<(u64, u32)>,
    upper: Option<(u64, u32)>,
    last_point: Option<(u64, u32)>,
}

impl Spline {
    pub fn new(max_error: u32) -> Self {
        Self {
            knots: Vec::new(),
            max_error,
            lower: None,
            upper: None,
            last_point: None,
        }
    }

    pub fn max_error(&self) -> u32 {
        self.max_error
    }

    pub fn is_empty(&self) -> bool {
        self.knots.is_empty()
    }

    pub fn knot_count(&self) -> usize {
        self.knots.len()
    }

    /// Append `(key, page_id)`. `key` must be strictly greater than any key
    /// added previously (the engine enforces insert-order monotonicity
    /// upstream; this only asserts it holds here too, cheaply).
    pub fn add_point(&mut self, key: u64, page_id: u32) {
        if self.knots.is_empty() {
            self.knots.push(Knot { key, page_id });
            self.last_point = Some((key, page_id));
            return;
        }

        let last_knot = *self.knots.last().unwrap();

        if self.lower.is_none() {
            // Second point ever: establish the initial sandwich against the
            // first knot.
            self.lower = Some((key, page_id.saturating_sub(self.max_error)));
            self.upper = Some((key, page_id + self.max_error));
            self.last_point = Some((key, page_id));
            return;
        }

        let (lk, lp) = self.lower.unwrap();
        let (uk, up) = self.upper.unwrap();

        // Does the existing sandwich (line from last_knot through lower and
        // through upper) still bracket `page_id` at `key` within max_error?
        let predicted_low = interpolate(last_knot.key, last_knot.page_id, lk, lp, key);
        let predicted_high = interpolate(last_knot.key, last_knot.page_id, uk, up, key);

        let fits = (page_id as i64) >= predicted_low - self.max_error as i64
            && (page_id as i64) <= predicted_high + self.max_error as i64;

        if fits {
            // Tighten the sandwich with the new point, keep going.
            let new_lower_slope_ok = interpolate(last_knot.key, last_knot.page_id, key, page_id.saturating_sub(self.max_error), uk)
                <= up as i64;
            let _ = new_lower_slope_ok;
            if (page_id as i64).saturating_sub(self.max_error as i64) > predicted_low {
                self.lower = Some((key, page_id.saturating_sub(self.max_error)));
            }
            if (page_id as i64) + self.max_error as i64 < predicted_high {
                self.upper = Some((key, page_id + self.max_error));
            }
            self.last_point = Some((key, page_id));
        } else {
            // Emit a new knot at the last accepted point, start a fresh
            // sandwich from there.
            let (pk, pp) = self.last_point.unwrap();
            self.knots.push(Knot {
                key: pk,
                page_id: pp,
            });
            self.lower = Some((key, page_id.saturating_sub(self.max_error)));
            self.upper = Some((key, page_id + self.max_error));
            self.last_point = Some((key, page_id));
        }
    }

    /// Ensure the most recently seen point is reflected as a knot; call
    /// before `estimate`/`locate` if inserts may still be pending a flush.
    pub fn finalize_pending(&mut self) {
        if let Some((k, p)) = self.last_point {
            if self.knots.last().map(|kn| kn.key) != Some(k) {
                self.knots.push(Knot { key: k, page_id: p });
            }
        }
    }

    /// Estimate the page id for `key`, clamped to the nearest knot if `key`
    /// falls outside the observed range.
    ///
    /// Committed knots only cover the range up to the last point that
    /// triggered a sandwich break; a monotonic key stream that never
    /// breaks the sandwich (the common timestamp workload) never commits
    /// past its first knot. Keys at or beyond the last committed knot are
    /// therefore extrapolated through `last_point`, the most recent point
    /// `add_point` accepted but hasn't promoted to a knot yet, so `locate`
    /// still brackets pages sealed since the last committed knot without
    /// requiring a `finalize_pending` call on every insert.
    pub fn estimate(&self, key: u64) -> u32 {
        if self.knots.is_empty() {
            return 0;
        }
        let last_knot = *self.knots.last().unwrap();
        if key >= last_knot.key {
            if let Some((lk, lp)) = self.last_point {
                if lk != last_knot.key {
                    return interpolate(last_knot.key, last_knot.page_id, lk, lp, key).max(0) as u32;
                }
            }
            return last_knot.page_id;
        }
        if self.knots.len() == 1 {
            return self.knots[0].page_id;
        }
        let idx = self.segment_index(key);
        let a = self.knots[idx];
        let b = self.knots[idx + 1];
        interpolate(a.key, a.page_id, b.key, b.page_id, key).max(0) as u32
    }

    /// `(low_page, high_page)` bracket such that `high_page - low_page <=
    /// 2*max_error + 1` and the true page for `key` lies in it.
    pub fn locate(&self, key: u64) -> (u32, u32) {
        let est = self.estimate(key) as i64;
        let low = (est - self.max_error as i64).max(0) as u32;
        let high = (est + self.max_error as i64).max(0) as u32;
        (low, high)
    }

    /// Binary search over knot keys for the segment containing `key`.
    fn segment_index(&self, key: u64) -> usize {
        match self.knots.binary_search_by_key(&key, |k| k.key) {
            Ok(i) => i.min(self.knots.len() - 2),
            Err(i) => {
                if i == 0 {
                    0
                } else {
                    (i - 1).min(self.knots.len() - 2)
                }
            }
        }
    }

    /// Drop leading knots strictly less than `min_live_key` (`spec.md`
    /// \S4.3's trim contract, invoked on wrap-around).
    pub fn trim(&mut self, min_live_key: u64) {
        let drop_to = match self.knots.binary_search_by_key(&min_live_key, |k| k.key) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        if drop_to > 0 {
            self.knots.drain(0..drop_to);
        }
    }
}

fn interpolate(x0: u64, y0: u32, x1: u64, y1: u32, x: u64) -> i64 {
    if x1 == x0 {
        return y0 as i64;
    }
    let dx = x1 as i64 - x0 as i64;
    let dy = y1 as i64 - y0 as i64;
    y0 as i64 + (dy * (x as i64 - x0 as i64)) / dx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_keys_stay_within_error_bound() {
        let mut spline = Spline::new(2);
        for page in 0u32..200 {
            // 10 keys per page, perfectly linear.
            for k in 0..10u64 {
                let key = page as u64 * 10 + k;
                spline.add_point(key, page);
            }
        }
        spline.finalize_pending();
        for page in 0u32..200 {
            let key = page as u64 * 10 + 5;
            let est = spline.estimate(key) as i64;
            assert!(
                (est - page as i64).unsigned_abs() <= 2,
                "page {page} key {key} estimate {est}"
            );
        }
    }

    #[test]
    fn knot_count_stays_small_for_linear_data() {
        let mut spline = Spline::new(1);
        for page in 0u32..1000 {
            spline.add_point(page as u64, page);
        }
        spline.finalize_pending();
        // A perfectly linear series should collapse to very few knots.
        assert!(spline.knot_count() < 10, "knots={}", spline.knot_count());
    }

    /// A page-per-record linear stream never breaks the sandwich, so
    /// `knots` stays at one entry no matter how many pages are sealed.
    /// `locate` must still bracket keys well past that single committed
    /// knot using the pending (not-yet-promoted) point, without the
    /// caller ever having to call `finalize_pending`.
    #[test]
    fn locate_tracks_pending_point_when_sandwich_never_breaks() {
        let mut spline = Spline::new(2);
        for page in 0u32..200 {
            spline.add_point(page as u64, page);
        }
        assert_eq!(spline.knot_count(), 1, "sandwich should not have broken yet");
        let (low, high) = spline.locate(190);
        assert!(low <= 190 && 190 <= high, "low={low} high={high}");
    }

    #[test]
    fn locate_bracket_width_matches_error_bound() {
        let mut spline = Spline::new(3);
        for page in 0u32..500 {
            spline.add_point(page as u64, page);
        }
        spline.finalize_pending();
        let (low, high) = spline.locate(250);
        assert!(high - low <= 2 * 3 + 1);
        assert!(low <= 250 && 250 <= high);
    }

    #[test]
    fn trim_drops_leading_knots_before_watermark() {
        let mut spline = Spline::new(1);
        for page in 0u32..100 {
            spline.add_point(page as u64 * 5, page);
        }
        spline.finalize_pending();
        let before = spline.knot_count();
        spline.trim(250);
        assert!(spline.knot_count() <= before);
        assert!(spline.estimate(250) <= 52);
    }
}
