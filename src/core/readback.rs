//! Double-buffered readback of a single scalar statistic.
//!
//! Reading a GPU-reduced 1x1 value back on the frame that produced it stalls
//! the pipeline. Instead the value requested on frame N is consumed on frame
//! N+1: `poll` returns last frame's request, `request` queues this frame's.
//! While a request is pending further requests are coalesced.

use log::warn;

/// Statistics for latency readback
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReadbackStats {
    pub requests: u64,
    pub coalesced: u64,
    pub rejected_non_finite: u64,
}

/// One-frame-latency scalar readback
#[derive(Debug, Clone)]
pub struct LatencyReadback {
    in_flight: Option<f32>,
    last_good: f32,
    stats: ReadbackStats,
}

impl LatencyReadback {
    pub fn new(initial: f32) -> Self {
        Self {
            in_flight: None,
            last_good: initial,
            stats: ReadbackStats::default(),
        }
    }

    /// True while a request issued earlier has not been consumed
    pub fn is_pending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Issue a non-blocking request. Returns false when coalesced into the
    /// request already in flight.
    pub fn request(&mut self, value: f32) -> bool {
        if self.in_flight.is_some() {
            self.stats.coalesced += 1;
            return false;
        }
        self.in_flight = Some(value);
        self.stats.requests += 1;
        true
    }

    /// Consume the value requested on a previous frame. Non-finite results
    /// are replaced with the last known-good value.
    pub fn poll(&mut self) -> f32 {
        if let Some(value) = self.in_flight.take() {
            if value.is_finite() {
                self.last_good = value;
            } else {
                self.stats.rejected_non_finite += 1;
                warn!(
                    "Readback returned non-finite value {}; keeping {}",
                    value, self.last_good
                );
            }
        }
        self.last_good
    }

    pub fn last_good(&self) -> f32 {
        self.last_good
    }

    pub fn stats(&self) -> ReadbackStats {
        self.stats
    }

    /// Drop the in-flight request and restore `initial`
    pub fn reset(&mut self, initial: f32) {
        self.in_flight = None;
        self.last_good = initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_arrives_one_frame_late() {
        let mut rb = LatencyReadback::new(1.0);
        assert_eq!(rb.poll(), 1.0);
        assert!(rb.request(2.0));
        assert_eq!(rb.last_good(), 1.0);
        assert_eq!(rb.poll(), 2.0);
        assert!(!rb.is_pending());
    }

    #[test]
    fn test_overlapping_requests_coalesce() {
        let mut rb = LatencyReadback::new(0.5);
        assert!(rb.request(1.0));
        assert!(!rb.request(3.0));
        assert_eq!(rb.poll(), 1.0);
        assert_eq!(rb.stats().coalesced, 1);
    }

    #[test]
    fn test_non_finite_replaced_with_last_good() {
        let mut rb = LatencyReadback::new(0.25);
        rb.request(f32::NAN);
        assert_eq!(rb.poll(), 0.25);
        rb.request(f32::INFINITY);
        assert_eq!(rb.poll(), 0.25);
        assert_eq!(rb.stats().rejected_non_finite, 2);
    }
}
