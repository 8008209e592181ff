//! Turns raw pointer positions into axis-aligned swipe deltas.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TouchGesture {
    /// Movement since the previous position along its dominant axis.
    Swipe { axis: Axis, delta: f64 },
    End,
}

/// Tracks a single pointer. Extra fingers are ignored until the tracked one
/// lifts.
#[derive(Debug, Default)]
pub struct TouchTracker {
    active: Option<(u64, f64, f64)>,
}

impl TouchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, id: u64, x: f64, y: f64) {
        if self.active.is_none() {
            self.active = Some((id, x, y));
        }
    }

    pub fn moved(&mut self, id: u64, x: f64, y: f64) -> Option<TouchGesture> {
        let (active_id, last_x, last_y) = self.active.as_mut()?;
        if *active_id != id {
            return None;
        }

        let dx = x - *last_x;
        let dy = y - *last_y;
        *last_x = x;
        *last_y = y;

        if dx == 0.0 && dy == 0.0 {
            return None;
        }

        let gesture = if dx.abs() > dy.abs() {
            TouchGesture::Swipe {
                axis: Axis::X,
                delta: dx,
            }
        } else {
            TouchGesture::Swipe {
                axis: Axis::Y,
                delta: dy,
            }
        };
        Some(gesture)
    }

    /// A touch end for the tracked pointer. Always reported, even without a
    /// preceding move, so taps reach the double-tap detector.
    pub fn end(&mut self, id: u64) -> Option<TouchGesture> {
        match self.active {
            Some((active_id, ..)) if active_id == id => {
                self.active = None;
                Some(TouchGesture::End)
            }
            _ => None,
        }
    }

    pub fn cancel(&mut self, id: u64) {
        if matches!(self.active, Some((active_id, ..)) if active_id == id) {
            self.active = None;
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.active.is_some()
    }
}
