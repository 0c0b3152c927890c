/// Distance from the bottom under which new messages are followed.
pub const DEFAULT_FOLLOW_THRESHOLD: f32 = 50.0;
/// Arrivals larger than this jump instead of animating.
pub const DEFAULT_BULK_ARRIVAL_THRESHOLD: usize = 10;

/// One sample of the transcript viewport, in view units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    pub scroll_top: f32,
    pub scroll_height: f32,
    pub viewport_height: f32,
}

impl ScrollMetrics {
    pub fn new(scroll_top: f32, scroll_height: f32, viewport_height: f32) -> Self {
        Self {
            scroll_top,
            scroll_height,
            viewport_height,
        }
    }

    pub fn distance_from_bottom(&self) -> f32 {
        (self.scroll_height - (self.scroll_top + self.viewport_height)).max(0.0)
    }

    pub fn max_scroll_top(&self) -> f32 {
        (self.scroll_height - self.viewport_height).max(0.0)
    }

    /// Same content, scrolled to the newest message.
    pub fn scrolled_to_bottom(self) -> Self {
        Self {
            scroll_top: self.max_scroll_top(),
            ..self
        }
    }

    /// Content grew below the current position; the position itself stays.
    pub fn grown_by(self, extra_height: f32) -> Self {
        Self {
            scroll_height: self.scroll_height + extra_height.max(0.0),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScrollBehavior {
    /// Immediate jump, used after loading a long batch.
    Instant,
    Smooth,
}

/// Why the transcript grew.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    HistoryLoaded { count: usize },
    Arrival { count: usize },
}

/// Auto-follow policy for the transcript viewport.
#[derive(Debug, Clone)]
pub struct ScrollFollow {
    follow_threshold: f32,
    bulk_arrival_threshold: usize,
    auto_follow: bool,
    pending_scroll: Option<ScrollBehavior>,
    last_sample: Option<ScrollMetrics>,
}

impl ScrollFollow {
    pub fn new(follow_threshold: f32, bulk_arrival_threshold: usize) -> Self {
        Self {
            follow_threshold,
            bulk_arrival_threshold,
            auto_follow: true,
            pending_scroll: None,
            last_sample: None,
        }
    }

    pub fn is_following(&self) -> bool {
        self.auto_follow
    }

    /// The "jump to latest" control is offered only while not following.
    pub fn shows_jump_affordance(&self) -> bool {
        !self.auto_follow
    }

    pub fn follow_threshold(&self) -> f32 {
        self.follow_threshold
    }

    pub fn last_sample(&self) -> Option<ScrollMetrics> {
        self.last_sample
    }

    /// Recomputes the follow flag from a user scroll sample.
    pub fn update_follow_state(&mut self, sample: ScrollMetrics) {
        self.auto_follow = sample.distance_from_bottom() < self.follow_threshold;
        self.last_sample = Some(sample);
    }

    /// Reacts to transcript growth using the last scroll sample only.
    pub fn on_growth(&mut self, growth: Growth) -> Option<ScrollBehavior> {
        let count = match growth {
            Growth::HistoryLoaded { count } | Growth::Arrival { count } => count,
        };
        if count == 0 || !self.auto_follow {
            return None;
        }

        let behavior = match growth {
            Growth::HistoryLoaded { .. } => ScrollBehavior::Instant,
            Growth::Arrival { count } if count > self.bulk_arrival_threshold => {
                ScrollBehavior::Instant
            }
            Growth::Arrival { .. } => ScrollBehavior::Smooth,
        };
        self.request(behavior);
        Some(behavior)
    }

    /// Explicit jump to latest: always smooth, and following resumes.
    pub fn request_scroll_to_bottom(&mut self) -> ScrollBehavior {
        self.auto_follow = true;
        self.request(ScrollBehavior::Smooth);
        ScrollBehavior::Smooth
    }

    /// Hands the pending scroll to the view exactly once.
    pub fn take_pending_scroll(&mut self) -> Option<ScrollBehavior> {
        self.pending_scroll.take()
    }

    /// Fresh state for a new conversation.
    pub fn reset(&mut self) {
        self.auto_follow = true;
        self.pending_scroll = None;
        self.last_sample = None;
    }

    fn request(&mut self, behavior: ScrollBehavior) {
        // An instant jump already covers a smooth one queued in the same frame.
        self.pending_scroll = match (self.pending_scroll, behavior) {
            (Some(ScrollBehavior::Instant), _) | (_, ScrollBehavior::Instant) => {
                Some(ScrollBehavior::Instant)
            }
            _ => Some(ScrollBehavior::Smooth),
        };
    }
}

impl Default for ScrollFollow {
    fn default() -> Self {
        Self::new(DEFAULT_FOLLOW_THRESHOLD, DEFAULT_BULK_ARRIVAL_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROW_HEIGHT: f32 = 40.0;

    fn apply(metrics: ScrollMetrics, behavior: Option<ScrollBehavior>) -> ScrollMetrics {
        match behavior {
            Some(_) => metrics.scrolled_to_bottom(),
            None => metrics,
        }
    }

    #[test]
    fn following_viewport_ends_near_the_bottom_after_growth() {
        let mut follow = ScrollFollow::default();
        let at_bottom = ScrollMetrics::new(600.0, 1000.0, 400.0);
        follow.update_follow_state(at_bottom);

        let grown = at_bottom.grown_by(ROW_HEIGHT);
        let after = apply(grown, follow.on_growth(Growth::Arrival { count: 1 }));

        assert!(after.distance_from_bottom() < follow.follow_threshold());
    }

    #[test]
    fn scrolled_up_viewport_stays_put_and_offers_jump() {
        let mut follow = ScrollFollow::default();
        let scrolled_up = ScrollMetrics::new(100.0, 1000.0, 400.0);
        assert_eq!(scrolled_up.distance_from_bottom(), 500.0);
        follow.update_follow_state(scrolled_up);
        assert!(!follow.is_following());
        assert!(follow.shows_jump_affordance());

        let grown = scrolled_up.grown_by(ROW_HEIGHT);
        let decision = follow.on_growth(Growth::Arrival { count: 1 });
        assert_eq!(decision, None);
        assert_eq!(apply(grown, decision).scroll_top, scrolled_up.scroll_top);
        assert_eq!(follow.take_pending_scroll(), None);
    }

    #[test]
    fn threshold_boundary_is_exclusive() {
        let mut follow = ScrollFollow::new(50.0, 10);
        follow.update_follow_state(ScrollMetrics::new(550.0, 1000.0, 400.0));
        assert!(!follow.is_following());

        follow.update_follow_state(ScrollMetrics::new(551.0, 1000.0, 400.0));
        assert!(follow.is_following());
    }

    #[test]
    fn history_and_bulk_arrivals_jump_while_single_arrivals_animate() {
        let mut follow = ScrollFollow::new(50.0, 10);

        assert_eq!(
            follow.on_growth(Growth::HistoryLoaded { count: 3 }),
            Some(ScrollBehavior::Instant)
        );
        follow.take_pending_scroll();
        assert_eq!(
            follow.on_growth(Growth::Arrival { count: 11 }),
            Some(ScrollBehavior::Instant)
        );
        follow.take_pending_scroll();
        assert_eq!(
            follow.on_growth(Growth::Arrival { count: 1 }),
            Some(ScrollBehavior::Smooth)
        );
        assert_eq!(follow.on_growth(Growth::HistoryLoaded { count: 0 }), None);
    }

    #[test]
    fn jump_to_latest_resumes_following() {
        let mut follow = ScrollFollow::default();
        follow.update_follow_state(ScrollMetrics::new(0.0, 2000.0, 400.0));
        assert!(!follow.is_following());

        assert_eq!(follow.request_scroll_to_bottom(), ScrollBehavior::Smooth);
        assert!(follow.is_following());
        assert_eq!(follow.take_pending_scroll(), Some(ScrollBehavior::Smooth));
        assert_eq!(follow.take_pending_scroll(), None);
    }

    #[test]
    fn growth_does_not_rederive_follow_state_mid_scroll() {
        let mut follow = ScrollFollow::default();
        follow.update_follow_state(ScrollMetrics::new(100.0, 1000.0, 400.0));

        // Many arrivals while the user is still away from the tail.
        for _ in 0..5 {
            assert_eq!(follow.on_growth(Growth::Arrival { count: 1 }), None);
        }
        assert!(!follow.is_following());
    }

    #[test]
    fn pending_instant_scroll_is_not_downgraded() {
        let mut follow = ScrollFollow::default();
        follow.on_growth(Growth::HistoryLoaded { count: 20 });
        follow.on_growth(Growth::Arrival { count: 1 });

        assert_eq!(follow.take_pending_scroll(), Some(ScrollBehavior::Instant));
    }
}
