//! Overlay window: native surface on its own thread plus the page renderer
//!
//! Property setters update an immediately readable mirror and post the native
//! call to the window thread; [`OverlayWindow::flush`] waits for them to land.
//! Setters that do not change the mirrored value post nothing.

pub mod headless;
mod native;
mod surface;
mod ui_thread;
pub mod x11;

pub use native::{NativeHandle, NativeSurface, Platform, SurfaceEvent, SurfaceParams};
pub use surface::{BackBuffer, SurfaceShared};
pub use ui_thread::{FrameRequester, UiContext, UiThread};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::error::OverlayError;
use crate::renderer::{Renderer, RendererEventHandler, RendererHost};
use crate::types::{self, Dimensions, Position, Rect};

/// What a window is created from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowOptions {
    pub title: String,
    pub url: String,
    pub position: Position,
    pub size: Dimensions,
    pub max_frame_rate: u32,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    visible: bool,
    locked: bool,
    click_through: bool,
    accept_focus: bool,
}

impl Default for WindowState {
    fn default() -> Self {
        Self {
            visible: false,
            locked: false,
            click_through: false,
            accept_focus: true,
        }
    }
}

pub struct OverlayWindow {
    name: String,
    handle: NativeHandle,
    ui: UiThread,
    shared: Arc<SurfaceShared>,
    host: RendererHost,
    renderer: Arc<dyn Renderer>,
    url: Mutex<String>,
    state: Mutex<WindowState>,
    closed: AtomicBool,
}

impl OverlayWindow {
    /// Create the native window and its renderer. The window starts hidden and
    /// no page is loaded until [`Self::navigate`].
    ///
    /// The configured position is used only when the configured rectangle
    /// touches an active display; otherwise the window system places it.
    pub fn create(platform: Arc<dyn Platform>, options: WindowOptions) -> Result<Self> {
        let bounds = Rect::new(options.position, options.size);
        let shared = Arc::new(SurfaceShared::new(bounds, options.max_frame_rate));
        let params = SurfaceParams {
            title: options.title.clone(),
            size: options.size,
            position: None,
        };
        let ui = UiThread::spawn(&options.title, platform.clone(), params, shared.clone())?;

        let name = options.title.clone();
        let (handle, placed) = ui.invoke(move |ctx| -> Result<(NativeHandle, bool)> {
            let displays = ctx.surface.displays()?;
            let on_screen = types::is_on_screen(bounds, &displays);
            if on_screen {
                ctx.surface.set_position(bounds.position())?;
            } else {
                ctx.shared.set_geometry(Rect::new(Position::default(), bounds.dimensions()));
            }
            Ok((ctx.surface.handle(), on_screen))
        })??;

        if placed {
            debug!(overlay = %name, x = bounds.x, y = bounds.y, "Placed window at configured position");
        } else {
            info!(overlay = %name, x = bounds.x, y = bounds.y, "Configured position is off-screen, using default placement");
        }

        let host = RendererHost::new(ui.frame_requester());
        let renderer = platform
            .create_renderer(host.clone())
            .with_context(|| format!("Failed to create renderer for overlay '{}'", name))?;
        renderer.set_max_frame_rate(shared.max_frame_rate());

        Ok(Self {
            name,
            handle,
            ui,
            shared,
            host,
            renderer,
            url: Mutex::new(options.url),
            state: Mutex::new(WindowState::default()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn set_event_handler(&self, handler: RendererEventHandler) {
        self.host.set_event_handler(handler);
    }

    pub fn url(&self) -> String {
        self.url.lock().clone()
    }

    pub fn navigate(&self, url: &str) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        *self.url.lock() = url.to_string();
        debug!(overlay = %self.name, url = %url, "Loading page");
        self.renderer
            .load(url)
            .with_context(|| format!("Failed to load {}", url))
    }

    /// Load the current url again
    pub fn load_current(&self) -> Result<()> {
        let url = self.url();
        self.navigate(&url)
    }

    pub fn reload(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.renderer.reload().context("Failed to reload page")
    }

    pub fn execute_script(&self, code: &str) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.renderer.execute_script(code).context("Failed to execute script")
    }

    fn post_native<F>(&self, operation: &'static str, f: F)
    where
        F: FnOnce(&mut dyn NativeSurface) -> Result<()> + Send + 'static,
    {
        if self.is_closed() {
            return;
        }
        let name = self.name.clone();
        self.ui.post(move |ctx| {
            if let Err(e) = f(ctx.surface.as_mut()) {
                warn!(overlay = %name, operation = operation, error = ?e, "Window operation failed");
            }
        });
    }

    /// Update one mirrored flag; returns true when it changed
    fn swap_state(&self, f: impl FnOnce(&mut WindowState) -> &mut bool, value: bool) -> bool {
        let mut state = self.state.lock();
        let slot = f(&mut state);
        let changed = *slot != value;
        *slot = value;
        changed
    }

    pub fn visible(&self) -> bool {
        self.state.lock().visible
    }

    pub fn set_visible(&self, visible: bool) {
        if self.swap_state(|s| &mut s.visible, visible) {
            self.post_native("set_visible", move |surface| surface.set_visible(visible));
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    pub fn set_locked(&self, locked: bool) {
        if self.swap_state(|s| &mut s.locked, locked) {
            self.post_native("set_locked", move |surface| surface.set_locked(locked));
        }
    }

    pub fn is_click_through(&self) -> bool {
        self.state.lock().click_through
    }

    pub fn set_click_through(&self, click_through: bool) {
        if self.swap_state(|s| &mut s.click_through, click_through) {
            self.post_native("set_click_through", move |surface| {
                surface.set_click_through(click_through)
            });
        }
    }

    pub fn accepts_focus(&self) -> bool {
        self.state.lock().accept_focus
    }

    pub fn set_accept_focus(&self, accept_focus: bool) {
        if self.swap_state(|s| &mut s.accept_focus, accept_focus) {
            self.post_native("set_accept_focus", move |surface| {
                surface.set_accept_focus(accept_focus)
            });
        }
    }

    pub fn max_frame_rate(&self) -> u32 {
        self.shared.max_frame_rate()
    }

    pub fn set_max_frame_rate(&self, fps: u32) {
        self.shared.set_max_frame_rate(fps);
        self.renderer.set_max_frame_rate(self.shared.max_frame_rate());
    }

    pub fn set_title(&self, title: &str) {
        let title = title.to_string();
        self.post_native("set_title", move |surface| surface.set_title(&title));
    }

    /// Live geometry as last reported by the window system
    pub fn position(&self) -> Position {
        self.shared.geometry().position()
    }

    pub fn size(&self) -> Dimensions {
        self.shared.geometry().dimensions()
    }

    pub fn set_position(&self, position: Position) {
        self.post_native("set_position", move |surface| surface.set_position(position));
    }

    pub fn set_size(&self, size: Dimensions) {
        let renderer = self.renderer.clone();
        self.post_native("set_size", move |surface| {
            surface.set_size(size)?;
            renderer.resize(size);
            Ok(())
        });
    }

    /// Schedule a repaint; callable from any thread
    pub fn request_frame(&self) {
        self.ui.frame_requester().request_frame();
    }

    /// Paint now on the window thread. Never fails; returns whether a copy was issued.
    pub fn paint(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.ui.invoke(|ctx| ctx.paint()) {
            Ok(painted) => painted,
            Err(e) => {
                debug!(overlay = %self.name, error = %e, "Paint skipped");
                false
            }
        }
    }

    /// Wait until every posted window operation has run
    pub fn flush(&self) -> Result<(), OverlayError> {
        if self.is_closed() {
            return Ok(());
        }
        self.ui.flush()
    }

    /// Terminate the window: stop painting, release the back-buffer and
    /// destroy the native window. Later calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.terminate();
        self.host.clear_event_handler();
        self.shared.back_buffer().lock().dispose();
        self.ui.shutdown();
        info!(overlay = %self.name, window = self.handle, "Closed overlay window");
    }
}

impl Drop for OverlayWindow {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::RendererEvent;
    use headless::{BlitFailure, HeadlessPlatform};
    use std::sync::mpsc;
    use std::time::Duration;

    fn options() -> WindowOptions {
        WindowOptions {
            title: "mini".to_string(),
            url: "about:blank".to_string(),
            position: Position::new(100, 100),
            size: Dimensions::new(64, 48),
            max_frame_rate: 30,
        }
    }

    fn create(platform: &Arc<HeadlessPlatform>, options: WindowOptions) -> OverlayWindow {
        let platform: Arc<dyn Platform> = platform.clone();
        OverlayWindow::create(platform, options).unwrap()
    }

    #[test]
    fn test_on_screen_position_is_applied() {
        let platform = Arc::new(HeadlessPlatform::new());
        let window = create(&platform, options());
        window.flush().unwrap();

        assert_eq!(platform.recorder().snapshot().positions, vec![Position::new(100, 100)]);
        assert_eq!(window.position(), Position::new(100, 100));
    }

    #[test]
    fn test_off_screen_position_uses_default_placement() {
        let platform = Arc::new(HeadlessPlatform::new());
        let window = create(
            &platform,
            WindowOptions {
                position: Position::new(5000, 5000),
                ..options()
            },
        );
        window.flush().unwrap();

        assert!(platform.recorder().snapshot().positions.is_empty());
    }

    #[test]
    fn test_failed_surface_creation_is_error() {
        let platform: Arc<dyn Platform> = Arc::new(HeadlessPlatform::failing());
        assert!(OverlayWindow::create(platform, options()).is_err());
    }

    #[test]
    fn test_setters_post_only_changes() {
        let platform = Arc::new(HeadlessPlatform::new());
        let window = create(&platform, options());

        window.set_visible(false);
        window.set_visible(true);
        window.set_visible(true);
        window.set_locked(true);
        window.flush().unwrap();

        let recorder = platform.recorder().snapshot();
        assert_eq!(recorder.visible_calls, vec![true]);
        assert_eq!(recorder.locked, vec![true]);
        assert!(window.visible());
    }

    #[test]
    fn test_navigate_raises_load_lifecycle_and_paints() {
        let platform = Arc::new(HeadlessPlatform::new());
        let window = create(&platform, options());
        let (tx, rx) = mpsc::channel();
        window.set_event_handler(Arc::new(move |event| {
            let _ = tx.send(event);
        }));

        window.navigate("https://example.invalid/").unwrap();

        assert_eq!(rx.try_recv().unwrap(), RendererEvent::LoadStart);
        assert!(matches!(rx.try_recv().unwrap(), RendererEvent::LoadComplete { status_code: 200, .. }));
        assert!(window.paint());
        assert!(platform.recorder().snapshot().blits >= 1);
    }

    #[test]
    fn test_requested_frame_is_painted_by_window_thread() {
        let platform = Arc::new(HeadlessPlatform::new());
        let window = create(&platform, options());
        window.request_frame();

        let recorder = platform.recorder();
        let mut painted = false;
        for _ in 0..100 {
            if recorder.snapshot().blits > 0 {
                painted = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(painted);
    }

    #[test]
    fn test_blit_error_is_suppressed() {
        let platform = Arc::new(HeadlessPlatform::new());
        let window = create(&platform, options());
        platform.recorder().set_blit_failure(Some(BlitFailure::Error));

        window.navigate("https://example.invalid/").unwrap();

        assert!(!window.paint());
        window.flush().unwrap();
        assert_eq!(platform.recorder().snapshot().blits, 0);
    }

    #[test]
    fn test_panicking_blit_keeps_window_thread_alive() {
        let platform = Arc::new(HeadlessPlatform::new());
        let window = create(&platform, options());
        platform.recorder().set_blit_failure(Some(BlitFailure::Panic));

        // Requested frame panics inside the paint loop
        window.navigate("https://example.invalid/").unwrap();
        window.flush().unwrap();
        assert!(!window.paint());

        platform.recorder().set_blit_failure(None);
        window.flush().unwrap();
        assert!(window.paint());
        assert_eq!(platform.recorder().snapshot().blits, 1);
    }

    #[test]
    fn test_paint_after_close_does_nothing() {
        let platform = Arc::new(HeadlessPlatform::new());
        let window = create(&platform, options());
        window.close();
        window.request_frame();

        assert!(!window.paint());
        assert_eq!(platform.recorder().snapshot().blits, 0);
    }

    #[test]
    fn test_close_twice_destroys_once() {
        let platform = Arc::new(HeadlessPlatform::new());
        let window = create(&platform, options());

        window.close();
        window.close();
        drop(window);

        assert_eq!(platform.recorder().snapshot().destroyed, 1);
    }

    #[test]
    fn test_invoke_from_window_thread_is_error() {
        let platform = Arc::new(HeadlessPlatform::new());
        let window = Arc::new(create(&platform, options()));
        let inner = window.clone();
        let (tx, rx) = mpsc::channel();

        window.ui.post(move |_| {
            let _ = tx.send(inner.ui.invoke(|_| ()).is_err());
        });

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }
}
