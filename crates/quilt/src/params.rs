use std::fmt;

pub const MIN_STRIPS: u32 = 1;
pub const MAX_STRIPS: u32 = 1920;
pub const DEFAULT_STRIPS: u32 = 32;

pub const MIN_SHUFFLES: f32 = 1.0;
pub const MAX_SHUFFLES: f32 = 32.0;
pub const DEFAULT_SHUFFLES: f32 = MIN_SHUFFLES;

/// Step applied to the shuffle depth for continuous (swipe) input.
pub const SWIPE_SHUFFLE_STEP: f32 = 1.0 / 8.0;

/// The two tunable effect parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    /// Number of vertical slices the frame is cut into.
    StripCount,
    /// Recursion depth of the strip shuffle; also drives export scale.
    ShuffleDepth,
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::StripCount => f.write_str("strip count"),
            Parameter::ShuffleDepth => f.write_str("shuffle depth"),
        }
    }
}

/// Bounded effect parameters.
///
/// Every constructor and mutator clamps, so a value outside
/// `[MIN_STRIPS, MAX_STRIPS]` / `[MIN_SHUFFLES, MAX_SHUFFLES]` is never
/// observable and callers never need to validate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterState {
    strip_count: u32,
    shuffle_depth: f32,
}

impl Default for ParameterState {
    fn default() -> Self {
        Self {
            strip_count: DEFAULT_STRIPS,
            shuffle_depth: DEFAULT_SHUFFLES,
        }
    }
}

impl ParameterState {
    /// Builds a state from arbitrary values, clamping both into range.
    pub fn new(strip_count: u32, shuffle_depth: f32) -> Self {
        let shuffle_depth = if shuffle_depth.is_finite() {
            shuffle_depth.clamp(MIN_SHUFFLES, MAX_SHUFFLES)
        } else {
            DEFAULT_SHUFFLES
        };
        Self {
            strip_count: strip_count.clamp(MIN_STRIPS, MAX_STRIPS),
            shuffle_depth,
        }
    }

    pub fn strip_count(&self) -> u32 {
        self.strip_count
    }

    pub fn shuffle_depth(&self) -> f32 {
        self.shuffle_depth
    }

    /// Raises `parameter` by `step`; returns whether the value changed.
    pub fn increment(&mut self, parameter: Parameter, step: f32) -> bool {
        self.adjust(parameter, step)
    }

    /// Lowers `parameter` by `step`; returns whether the value changed.
    pub fn decrement(&mut self, parameter: Parameter, step: f32) -> bool {
        self.adjust(parameter, -step)
    }

    /// Applies a signed delta and clamps the result into range.
    ///
    /// Strip count is integral, so its delta is rounded first. Non-finite
    /// deltas are ignored.
    pub fn adjust(&mut self, parameter: Parameter, delta: f32) -> bool {
        if !delta.is_finite() {
            return false;
        }

        match parameter {
            Parameter::StripCount => {
                let next = (i64::from(self.strip_count) + delta.round() as i64)
                    .clamp(i64::from(MIN_STRIPS), i64::from(MAX_STRIPS))
                    as u32;
                let changed = next != self.strip_count;
                self.strip_count = next;
                changed
            }
            Parameter::ShuffleDepth => {
                let next = (self.shuffle_depth + delta).clamp(MIN_SHUFFLES, MAX_SHUFFLES);
                let changed = next != self.shuffle_depth;
                self.shuffle_depth = next;
                changed
            }
        }
    }
}
