//! Seam to the embedded web content renderer
//!
//! A renderer loads pages, runs scripts and pushes composited frames into the
//! window's back-buffer through a [`RendererHost`]. Page lifecycle
//! notifications travel back the same way.

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::debug;

use crate::error::OverlayError;
use crate::types::Dimensions;
use crate::window::FrameRequester;

/// Page lifecycle notifications raised by a renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendererEvent {
    LoadError { code: i32, text: String, url: String },
    LoadStart,
    LoadComplete { status_code: i32, url: String },
    ConsoleMessage { message: String, source: String, line: u32 },
}

pub type RendererEventHandler = Arc<dyn Fn(RendererEvent) + Send + Sync>;

pub trait Renderer: Send + Sync {
    fn load(&self, url: &str) -> Result<()>;

    fn reload(&self) -> Result<()>;

    fn execute_script(&self, code: &str) -> Result<()>;

    /// Output size changed; the next frame should match it
    fn resize(&self, _size: Dimensions) {}

    fn set_max_frame_rate(&self, _fps: u32) {}
}

/// Renderer-facing handle to the window: frame sink plus notification channel
#[derive(Clone)]
pub struct RendererHost {
    frames: FrameRequester,
    handler: Arc<RwLock<Option<RendererEventHandler>>>,
}

impl RendererHost {
    pub fn new(frames: FrameRequester) -> Self {
        Self {
            frames,
            handler: Arc::new(RwLock::new(None)),
        }
    }

    /// Install the handler receiving [`RendererEvent`]s, replacing any previous one
    pub fn set_event_handler(&self, handler: RendererEventHandler) {
        *self.handler.write() = Some(handler);
    }

    pub fn clear_event_handler(&self) {
        *self.handler.write() = None;
    }

    pub fn notify(&self, event: RendererEvent) {
        // Clone out so the handler may call back into the renderer
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler(event),
            None => debug!(event = ?event, "Renderer event without handler"),
        }
    }

    /// Current size of the back-buffer, the size frames should be rendered at
    pub fn frame_size(&self) -> Dimensions {
        self.frames.shared().geometry().dimensions()
    }

    /// Hand over a finished frame and schedule a repaint
    pub fn present(&self, width: u32, height: u32, pixels: &[u32]) -> Result<(), OverlayError> {
        self.frames
            .shared()
            .back_buffer()
            .lock()
            .write(width, height, pixels)?;
        self.frames.request_frame();
        Ok(())
    }
}

/// Renderer without a web engine: every page is a solid fill
///
/// Used by the headless backend and as the X11 fallback. It still raises the
/// full load lifecycle so everything wired to it behaves as with a real page.
pub struct SolidColorRenderer {
    host: RendererHost,
    color: u32,
    url: Mutex<Option<String>>,
}

impl SolidColorRenderer {
    pub fn new(host: RendererHost, color: u32) -> Self {
        Self {
            host,
            color,
            url: Mutex::new(None),
        }
    }

    fn paint(&self) -> Result<()> {
        let size = self.host.frame_size();
        let pixels = vec![self.color; size.width as usize * size.height as usize];
        self.host.present(size.width, size.height, &pixels)?;
        Ok(())
    }
}

impl Renderer for SolidColorRenderer {
    fn load(&self, url: &str) -> Result<()> {
        *self.url.lock() = Some(url.to_string());
        self.host.notify(RendererEvent::LoadStart);

        if let Err(e) = self.paint() {
            self.host.notify(RendererEvent::LoadError {
                code: -1,
                text: format!("{:#}", e),
                url: url.to_string(),
            });
            return Err(e);
        }

        self.host.notify(RendererEvent::LoadComplete {
            status_code: 200,
            url: url.to_string(),
        });
        Ok(())
    }

    fn reload(&self) -> Result<()> {
        let url = self.url.lock().clone();
        match url {
            Some(url) => self.load(&url),
            None => Ok(()),
        }
    }

    fn execute_script(&self, code: &str) -> Result<()> {
        debug!(script = %code, "Script ignored by solid color renderer");
        Ok(())
    }

    fn resize(&self, _size: Dimensions) {
        if let Err(e) = self.paint() {
            debug!(error = %e, "Failed to repaint after resize");
        }
    }
}
