//! Pointer mirroring at a bounded rate.

use tokio::time::Instant;

use crate::config::{CursorConfig, SurfaceSize};
use crate::model::CursorPos;

/// Rate-limits outgoing cursor updates and maps local surface pixels to
/// percentages, so the two clients agree on positions regardless of their
/// surface sizes. No interpolation: the partner's marker moves exactly as
/// often as updates are published.
pub(crate) struct CursorRelay {
    min_interval: std::time::Duration,
    surface: SurfaceSize,
    last_emit: Option<Instant>,
}

impl CursorRelay {
    pub fn new(config: CursorConfig) -> Self {
        Self {
            min_interval: config.min_interval,
            surface: config.surface,
            last_emit: None,
        }
    }

    /// The renderer's bounding box changed; future positions map against it.
    pub fn surface_resized(&mut self, width: f64, height: f64) {
        if width > 0.0 && height > 0.0 {
            self.surface = SurfaceSize { width, height };
        }
    }

    /// Returns the position to publish, or `None` while inside the rate
    /// window. `now` is the local monotonic clock.
    pub fn on_pointer_move(&mut self, x: f64, y: f64, now: Instant) -> Option<CursorPos> {
        if let Some(last) = self.last_emit
            && now.duration_since(last) < self.min_interval
        {
            return None;
        }
        self.last_emit = Some(now);
        Some(self.to_percentages(x, y))
    }

    fn to_percentages(&self, x: f64, y: f64) -> CursorPos {
        CursorPos {
            x: (x / self.surface.width * 100.0).clamp(0.0, 100.0),
            y: (y / self.surface.height * 100.0).clamp(0.0, 100.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn relay() -> CursorRelay {
        CursorRelay::new(CursorConfig {
            min_interval: Duration::from_millis(50),
            surface: SurfaceSize {
                width: 200.0,
                height: 100.0,
            },
        })
    }

    #[test]
    fn burst_within_the_window_emits_at_most_once() {
        let mut relay = relay();
        let t0 = Instant::now();
        let mut emitted = 0;
        for ms in [0u64, 10, 20, 30, 49] {
            if relay
                .on_pointer_move(1.0, 1.0, t0 + Duration::from_millis(ms))
                .is_some()
            {
                emitted += 1;
            }
        }
        assert_eq!(emitted, 1);
    }

    #[test]
    fn emits_again_once_the_window_elapses() {
        let mut relay = relay();
        let t0 = Instant::now();
        assert!(relay.on_pointer_move(1.0, 1.0, t0).is_some());
        assert!(relay.on_pointer_move(1.0, 1.0, t0 + Duration::from_millis(49)).is_none());
        assert!(relay.on_pointer_move(1.0, 1.0, t0 + Duration::from_millis(50)).is_some());
    }

    #[test]
    fn positions_map_to_surface_percentages() {
        let mut relay = relay();
        let pos = relay.on_pointer_move(100.0, 25.0, Instant::now()).unwrap();
        assert_eq!(pos.x, 50.0);
        assert_eq!(pos.y, 25.0);
    }

    #[test]
    fn positions_clamp_to_the_surface() {
        let mut relay = relay();
        let pos = relay.on_pointer_move(-10.0, 500.0, Instant::now()).unwrap();
        assert_eq!(pos.x, 0.0);
        assert_eq!(pos.y, 100.0);
    }

    #[test]
    fn resize_changes_the_mapping() {
        let mut relay = relay();
        relay.surface_resized(400.0, 100.0);
        let pos = relay.on_pointer_move(100.0, 50.0, Instant::now()).unwrap();
        assert_eq!(pos.x, 25.0);
        assert_eq!(pos.y, 50.0);
    }

    #[test]
    fn degenerate_resize_is_ignored() {
        let mut relay = relay();
        relay.surface_resized(0.0, -5.0);
        let pos = relay.on_pointer_move(100.0, 50.0, Instant::now()).unwrap();
        assert_eq!(pos.x, 50.0); // mapping still uses the 200x100 box
    }
}
