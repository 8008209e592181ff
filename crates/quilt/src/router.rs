use std::time::{Duration, Instant};

use tracing::debug;

use crate::params::{Parameter, SWIPE_SHUFFLE_STEP};
use crate::touch::Axis;

pub const DEFAULT_DOUBLE_TAP_WINDOW: Duration = Duration::from_millis(300);
pub const DEFAULT_SWIPE_THRESHOLD: f64 = 16.0;

/// Keys the router understands; everything else is dropped by the window layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Character(char),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Key(KeyInput),
    ShutterClick,
    Swipe { axis: Axis, delta: f64 },
    TouchEnd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Adjust { parameter: Parameter, delta: f32 },
    Export,
    ToggleFacing,
}

/// Maps input events to session actions and owns the double-tap timer.
#[derive(Debug, Clone)]
pub struct GestureRouter {
    last_tap: Option<Instant>,
    double_tap_window: Duration,
    swipe_threshold: f64,
}

impl Default for GestureRouter {
    fn default() -> Self {
        Self::new(DEFAULT_DOUBLE_TAP_WINDOW, DEFAULT_SWIPE_THRESHOLD)
    }
}

impl GestureRouter {
    pub fn new(double_tap_window: Duration, swipe_threshold: f64) -> Self {
        Self {
            last_tap: None,
            double_tap_window,
            swipe_threshold,
        }
    }

    pub fn route(&mut self, event: InputEvent, now: Instant) -> Option<Action> {
        match event {
            InputEvent::Key(key) => route_key(key),
            InputEvent::ShutterClick => Some(Action::Export),
            InputEvent::Swipe { axis, delta } => self.route_swipe(axis, delta),
            InputEvent::TouchEnd => self.route_touch_end(now),
        }
    }

    fn route_swipe(&mut self, axis: Axis, delta: f64) -> Option<Action> {
        if !delta.is_finite() {
            return None;
        }
        // A long drag is not a tap.
        if delta.abs() > self.swipe_threshold {
            self.last_tap = None;
        }
        if delta == 0.0 {
            return None;
        }

        let sign = delta.signum() as f32;
        let action = match axis {
            Axis::X => Action::Adjust {
                parameter: Parameter::ShuffleDepth,
                delta: sign * SWIPE_SHUFFLE_STEP,
            },
            Axis::Y => Action::Adjust {
                parameter: Parameter::StripCount,
                delta: -sign,
            },
        };
        Some(action)
    }

    fn route_touch_end(&mut self, now: Instant) -> Option<Action> {
        let double = self
            .last_tap
            .is_some_and(|last| now.saturating_duration_since(last) <= self.double_tap_window);
        self.last_tap = Some(now);
        if double {
            debug!("double tap");
            Some(Action::ToggleFacing)
        } else {
            None
        }
    }
}

fn route_key(key: KeyInput) -> Option<Action> {
    let action = match key {
        KeyInput::ArrowUp => Action::Adjust {
            parameter: Parameter::StripCount,
            delta: 1.0,
        },
        KeyInput::ArrowDown => Action::Adjust {
            parameter: Parameter::StripCount,
            delta: -1.0,
        },
        KeyInput::ArrowRight => Action::Adjust {
            parameter: Parameter::ShuffleDepth,
            delta: 1.0,
        },
        KeyInput::ArrowLeft => Action::Adjust {
            parameter: Parameter::ShuffleDepth,
            delta: -1.0,
        },
        KeyInput::Character('s') => Action::Export,
        KeyInput::Character(_) => return None,
    };
    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn arrow_keys_adjust_parameters() {
        let mut router = GestureRouter::default();
        let now = Instant::now();
        assert_eq!(
            router.route(InputEvent::Key(KeyInput::ArrowUp), now),
            Some(Action::Adjust {
                parameter: Parameter::StripCount,
                delta: 1.0
            })
        );
        assert_eq!(
            router.route(InputEvent::Key(KeyInput::ArrowLeft), now),
            Some(Action::Adjust {
                parameter: Parameter::ShuffleDepth,
                delta: -1.0
            })
        );
    }

    #[test]
    fn export_triggers() {
        let mut router = GestureRouter::default();
        let now = Instant::now();
        assert_eq!(
            router.route(InputEvent::Key(KeyInput::Character('s')), now),
            Some(Action::Export)
        );
        assert_eq!(router.route(InputEvent::ShutterClick, now), Some(Action::Export));
        assert_eq!(router.route(InputEvent::Key(KeyInput::Character('S')), now), None);
        assert_eq!(router.route(InputEvent::Key(KeyInput::Character('x')), now), None);
    }

    #[test]
    fn swipes_move_by_sign_only() {
        let mut router = GestureRouter::default();
        let now = Instant::now();
        assert_eq!(
            router.route(InputEvent::Swipe { axis: Axis::X, delta: 240.0 }, now),
            Some(Action::Adjust {
                parameter: Parameter::ShuffleDepth,
                delta: 0.125
            })
        );
        assert_eq!(
            router.route(InputEvent::Swipe { axis: Axis::Y, delta: 3.0 }, now),
            Some(Action::Adjust {
                parameter: Parameter::StripCount,
                delta: -1.0
            })
        );
        assert_eq!(
            router.route(InputEvent::Swipe { axis: Axis::Y, delta: 0.0 }, now),
            None
        );
    }

    #[test]
    fn double_tap_within_window_toggles_facing() {
        let mut router = GestureRouter::default();
        let start = Instant::now();
        assert_eq!(router.route(InputEvent::TouchEnd, start), None);
        assert_eq!(
            router.route(InputEvent::TouchEnd, start + ms(300)),
            Some(Action::ToggleFacing)
        );
    }

    #[test]
    fn slow_taps_do_not_toggle() {
        let mut router = GestureRouter::default();
        let start = Instant::now();
        assert_eq!(router.route(InputEvent::TouchEnd, start), None);
        assert_eq!(router.route(InputEvent::TouchEnd, start + ms(301)), None);
        // The second tap restarted the timer.
        assert_eq!(
            router.route(InputEvent::TouchEnd, start + ms(450)),
            Some(Action::ToggleFacing)
        );
    }

    #[test]
    fn long_swipe_resets_the_tap_timer() {
        let mut router = GestureRouter::default();
        let start = Instant::now();
        router.route(InputEvent::TouchEnd, start);
        router.route(InputEvent::Swipe { axis: Axis::X, delta: -17.0 }, start + ms(50));
        assert_eq!(router.route(InputEvent::TouchEnd, start + ms(100)), None);
    }

    #[test]
    fn short_swipe_keeps_the_tap_timer() {
        let mut router = GestureRouter::default();
        let start = Instant::now();
        router.route(InputEvent::TouchEnd, start);
        router.route(InputEvent::Swipe { axis: Axis::X, delta: 16.0 }, start + ms(50));
        assert_eq!(
            router.route(InputEvent::TouchEnd, start + ms(100)),
            Some(Action::ToggleFacing)
        );
    }
}
