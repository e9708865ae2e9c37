//! Back-buffer shared between the renderer and the window thread
//!
//! The renderer composites frames into [`BackBuffer`] from whatever thread it
//! runs on; only the window thread copies it onto the native surface.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

use super::native::NativeSurface;
use crate::error::OverlayError;
use crate::types::{Dimensions, Rect};

/// Off-screen frame in 0xAARRGGBB pixels, row-major
#[derive(Debug)]
pub struct BackBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
    disposed: bool,
}

impl BackBuffer {
    pub fn new(size: Dimensions) -> Self {
        Self {
            width: size.width,
            height: size.height,
            pixels: vec![0; size.width as usize * size.height as usize],
            disposed: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Replace the whole frame; the buffer takes the frame's size
    pub fn write(&mut self, width: u32, height: u32, pixels: &[u32]) -> Result<(), OverlayError> {
        if self.disposed {
            return Err(OverlayError::Render("back buffer is disposed".to_string()));
        }
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(OverlayError::Render(format!(
                "frame of {}x{} needs {} pixels, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }

        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels.extend_from_slice(pixels);
        Ok(())
    }

    /// Convert to little-endian BGRA bytes as expected by ZPixmap uploads
    pub fn to_bgra_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.pixels.len() * 4);
        for pixel in &self.pixels {
            bytes.push(*pixel as u8); // B
            bytes.push((pixel >> 8) as u8); // G
            bytes.push((pixel >> 16) as u8); // R
            bytes.push((pixel >> 24) as u8); // A
        }
        bytes
    }

    /// Release the pixel memory; every later write or paint is refused
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.pixels = Vec::new();
    }
}

/// State read and written from both sides of the window thread boundary
#[derive(Debug)]
pub struct SurfaceShared {
    back_buffer: Mutex<BackBuffer>,
    terminated: AtomicBool,
    frame_pending: AtomicBool,
    max_frame_rate: AtomicU32,
    geometry: Mutex<Rect>,
}

impl SurfaceShared {
    pub fn new(geometry: Rect, max_frame_rate: u32) -> Self {
        Self {
            back_buffer: Mutex::new(BackBuffer::new(geometry.dimensions())),
            terminated: AtomicBool::new(false),
            frame_pending: AtomicBool::new(false),
            max_frame_rate: AtomicU32::new(max_frame_rate.max(1)),
            geometry: Mutex::new(geometry),
        }
    }

    pub fn back_buffer(&self) -> &Mutex<BackBuffer> {
        &self.back_buffer
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
    }

    /// Mark a frame pending. Returns true when the caller must wake the window
    /// thread, false when a wake-up is already outstanding.
    pub fn mark_frame_pending(&self) -> bool {
        !self.frame_pending.swap(true, Ordering::AcqRel)
    }

    pub fn take_frame_pending(&self) -> bool {
        self.frame_pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_frame_pending(&self) -> bool {
        self.frame_pending.load(Ordering::Acquire)
    }

    pub fn max_frame_rate(&self) -> u32 {
        self.max_frame_rate.load(Ordering::Relaxed)
    }

    pub fn set_max_frame_rate(&self, fps: u32) {
        self.max_frame_rate.store(fps.max(1), Ordering::Relaxed);
    }

    /// Shortest allowed gap between two paints
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.max_frame_rate()
    }

    pub fn geometry(&self) -> Rect {
        *self.geometry.lock()
    }

    pub fn set_geometry(&self, geometry: Rect) {
        *self.geometry.lock() = geometry;
    }
}

/// Copy the back-buffer onto the native surface. Must run on the window thread.
///
/// Returns true when a copy was issued. Disposed buffers and terminated
/// windows are skipped, and copy failures are logged and swallowed.
pub fn paint(surface: &mut dyn NativeSurface, shared: &SurfaceShared) -> bool {
    if shared.is_terminated() {
        trace!("Skipping paint on terminated window");
        return false;
    }

    let buffer = shared.back_buffer.lock();
    if buffer.is_disposed() {
        trace!("Skipping paint of disposed back buffer");
        return false;
    }
    if buffer.dimensions().is_empty() {
        return false;
    }

    let handle = surface.handle();
    match surface.blit(&buffer) {
        Ok(()) => true,
        Err(e) => {
            debug!(window = handle, error = %e, "Failed to copy back buffer to window");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;

    #[test]
    fn test_write_replaces_frame_and_size() {
        let mut buffer = BackBuffer::new(Dimensions::new(2, 2));
        buffer.write(3, 1, &[1, 2, 3]).unwrap();
        assert_eq!(buffer.dimensions(), Dimensions::new(3, 1));
        assert_eq!(buffer.pixels(), &[1, 2, 3]);
    }

    #[test]
    fn test_write_rejects_wrong_pixel_count() {
        let mut buffer = BackBuffer::new(Dimensions::new(2, 2));
        assert!(matches!(buffer.write(2, 2, &[0; 3]), Err(OverlayError::Render(_))));
    }

    #[test]
    fn test_disposed_buffer_refuses_writes() {
        let mut buffer = BackBuffer::new(Dimensions::new(2, 2));
        buffer.dispose();
        assert!(buffer.is_disposed());
        assert!(buffer.pixels().is_empty());
        assert!(buffer.write(1, 1, &[0]).is_err());
    }

    #[test]
    fn test_bgra_byte_order() {
        let mut buffer = BackBuffer::new(Dimensions::new(1, 1));
        buffer.write(1, 1, &[0x80112233]).unwrap();
        assert_eq!(buffer.to_bgra_bytes(), vec![0x33, 0x22, 0x11, 0x80]);
    }

    #[test]
    fn test_frame_requests_coalesce() {
        let shared = SurfaceShared::new(Rect::new(Position::new(0, 0), Dimensions::new(4, 4)), 30);
        assert!(shared.mark_frame_pending());
        assert!(!shared.mark_frame_pending());
        assert!(shared.take_frame_pending());
        assert!(shared.mark_frame_pending());
    }

    #[test]
    fn test_frame_interval_follows_rate() {
        let shared = SurfaceShared::new(Rect::new(Position::new(0, 0), Dimensions::new(4, 4)), 0);
        assert_eq!(shared.max_frame_rate(), 1);
        assert_eq!(shared.frame_interval(), Duration::from_secs(1));
        shared.set_max_frame_rate(50);
        assert_eq!(shared.frame_interval(), Duration::from_millis(20));
    }
}
