/// Round shutter button drawn by the display shader near the bottom edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShutterButton {
    pub radius: f32,
    /// Gap between the ring and the bottom of the window.
    pub margin: f32,
}

impl Default for ShutterButton {
    fn default() -> Self {
        Self {
            radius: 32.0,
            margin: 24.0,
        }
    }
}

impl ShutterButton {
    /// Centre in physical pixels, origin top-left.
    pub fn center(&self, width: u32, height: u32) -> (f32, f32) {
        (
            width as f32 * 0.5,
            height as f32 - self.margin - self.radius,
        )
    }

    pub fn contains(&self, width: u32, height: u32, x: f64, y: f64) -> bool {
        let (cx, cy) = self.center(width, height);
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        dx * dx + dy * dy <= self.radius * self.radius
    }

    /// Value for the `uShutter` uniform.
    pub(crate) fn uniform(&self, width: u32, height: u32) -> [f32; 4] {
        let (cx, cy) = self.center(width, height);
        [cx, cy, self.radius, 1.0]
    }
}
