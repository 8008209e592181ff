use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::RgbaImage;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// A single RGBA image handed to the renderers.
///
/// Frames are cheap to clone; the pixel buffer is shared. Each frame gets a
/// process-unique sequence number so the session can tell whether the texture
/// on the GPU is already up to date.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbaImage>,
    sequence: u64,
}

impl Frame {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Tightly packed RGBA8 rows, top row first.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl From<RgbaImage> for Frame {
    fn from(image: RgbaImage) -> Self {
        Self::new(image)
    }
}
