//! Window backend without a display server
//!
//! Records every call it receives in a shared [`HeadlessRecorder`], which makes
//! it the backend for `--headless` runs and for the overlay tests.

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

use super::native::{NativeHandle, NativeSurface, Platform, SurfaceEvent, SurfaceParams};
use super::surface::BackBuffer;
use crate::renderer::{Renderer, RendererEvent, RendererHost, SolidColorRenderer};
use crate::types::{Dimensions, Position, Rect};

static NEXT_HANDLE: AtomicU32 = AtomicU32::new(1);

const FILL_COLOR: u32 = 0xff20_2020;

/// Everything the headless backend was asked to do
#[derive(Debug, Default, Clone)]
pub struct RecordedCalls {
    pub titles: Vec<String>,
    pub visible_calls: Vec<bool>,
    pub positions: Vec<Position>,
    pub sizes: Vec<Dimensions>,
    pub click_through: Vec<bool>,
    pub locked: Vec<bool>,
    pub accept_focus: Vec<bool>,
    pub blits: usize,
    pub destroyed: usize,
    pub loads: Vec<String>,
    pub reloads: usize,
    pub scripts: Vec<String>,
    pub max_frame_rates: Vec<u32>,
}

/// How a headless blit misbehaves, for exercising paint error paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlitFailure {
    Error,
    Panic,
}

#[derive(Default)]
pub struct HeadlessRecorder {
    state: Mutex<RecordedCalls>,
    host: Mutex<Option<RendererHost>>,
    blit_failure: Mutex<Option<BlitFailure>>,
}

impl HeadlessRecorder {
    pub fn snapshot(&self) -> RecordedCalls {
        self.state.lock().clone()
    }

    fn record(&self, f: impl FnOnce(&mut RecordedCalls)) {
        f(&mut self.state.lock());
    }

    /// Make every later blit fail; `None` restores normal copies
    pub fn set_blit_failure(&self, failure: Option<BlitFailure>) {
        *self.blit_failure.lock() = failure;
    }

    /// Raise a renderer notification as if the page had produced it
    pub fn emit(&self, event: RendererEvent) {
        let host = self.host.lock().clone();
        if let Some(host) = host {
            host.notify(event);
        }
    }
}

pub struct HeadlessPlatform {
    displays: Vec<Rect>,
    recorder: Arc<HeadlessRecorder>,
    fail_surface: bool,
}

impl HeadlessPlatform {
    /// One 1920x1080 display at the origin
    pub fn new() -> Self {
        Self::with_displays(vec![Rect::new(Position::new(0, 0), Dimensions::new(1920, 1080))])
    }

    pub fn with_displays(displays: Vec<Rect>) -> Self {
        Self {
            displays,
            recorder: Arc::new(HeadlessRecorder::default()),
            fail_surface: false,
        }
    }

    /// Platform whose window creation always fails
    pub fn failing() -> Self {
        Self {
            fail_surface: true,
            ..Self::new()
        }
    }

    pub fn recorder(&self) -> Arc<HeadlessRecorder> {
        self.recorder.clone()
    }
}

impl Default for HeadlessPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HeadlessPlatform {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn create_surface(&self, params: &SurfaceParams) -> Result<Box<dyn NativeSurface>> {
        if self.fail_surface {
            anyhow::bail!("headless window creation disabled");
        }
        let mut surface = HeadlessSurface {
            handle: NEXT_HANDLE.fetch_add(1, Ordering::Relaxed),
            displays: self.displays.clone(),
            recorder: self.recorder.clone(),
            events: Vec::new(),
        };
        surface.set_title(&params.title)?;
        if let Some(position) = params.position {
            surface.set_position(position)?;
        }
        surface.events.push(SurfaceEvent::Resized(params.size));
        Ok(Box::new(surface))
    }

    fn create_renderer(&self, host: RendererHost) -> Result<Arc<dyn Renderer>> {
        *self.recorder.host.lock() = Some(host.clone());
        Ok(Arc::new(HeadlessRenderer {
            inner: SolidColorRenderer::new(host, FILL_COLOR),
            recorder: self.recorder.clone(),
        }))
    }
}

struct HeadlessSurface {
    handle: NativeHandle,
    displays: Vec<Rect>,
    recorder: Arc<HeadlessRecorder>,
    events: Vec<SurfaceEvent>,
}

impl NativeSurface for HeadlessSurface {
    fn handle(&self) -> NativeHandle {
        self.handle
    }

    fn displays(&self) -> Result<Vec<Rect>> {
        Ok(self.displays.clone())
    }

    fn set_title(&mut self, title: &str) -> Result<()> {
        self.recorder.record(|s| s.titles.push(title.to_string()));
        Ok(())
    }

    fn set_visible(&mut self, visible: bool) -> Result<()> {
        self.recorder.record(|s| s.visible_calls.push(visible));
        if visible {
            self.events.push(SurfaceEvent::Exposed);
        }
        Ok(())
    }

    fn set_position(&mut self, position: Position) -> Result<()> {
        self.recorder.record(|s| s.positions.push(position));
        self.events.push(SurfaceEvent::Moved(position));
        Ok(())
    }

    fn set_size(&mut self, size: Dimensions) -> Result<()> {
        self.recorder.record(|s| s.sizes.push(size));
        self.events.push(SurfaceEvent::Resized(size));
        Ok(())
    }

    fn set_click_through(&mut self, click_through: bool) -> Result<()> {
        self.recorder.record(|s| s.click_through.push(click_through));
        Ok(())
    }

    fn set_locked(&mut self, locked: bool) -> Result<()> {
        self.recorder.record(|s| s.locked.push(locked));
        Ok(())
    }

    fn set_accept_focus(&mut self, accept_focus: bool) -> Result<()> {
        self.recorder.record(|s| s.accept_focus.push(accept_focus));
        Ok(())
    }

    fn blit(&mut self, buffer: &BackBuffer) -> Result<()> {
        debug!(window = self.handle, width = buffer.width(), height = buffer.height(), "Headless blit");
        let failure = *self.recorder.blit_failure.lock();
        match failure {
            Some(BlitFailure::Error) => anyhow::bail!("headless blit refused"),
            Some(BlitFailure::Panic) => panic!("headless blit panicked"),
            None => {}
        }
        self.recorder.record(|s| s.blits += 1);
        Ok(())
    }

    fn pump_events(&mut self) -> Result<Vec<SurfaceEvent>> {
        Ok(std::mem::take(&mut self.events))
    }

    fn destroy(&mut self) {
        self.recorder.record(|s| s.destroyed += 1);
    }
}

struct HeadlessRenderer {
    inner: SolidColorRenderer,
    recorder: Arc<HeadlessRecorder>,
}

impl Renderer for HeadlessRenderer {
    fn load(&self, url: &str) -> Result<()> {
        self.recorder.record(|s| s.loads.push(url.to_string()));
        self.inner.load(url)
    }

    fn reload(&self) -> Result<()> {
        self.recorder.record(|s| s.reloads += 1);
        self.inner.reload()
    }

    fn execute_script(&self, code: &str) -> Result<()> {
        self.recorder.record(|s| s.scripts.push(code.to_string()));
        self.inner.execute_script(code)
    }

    fn resize(&self, size: Dimensions) {
        self.inner.resize(size);
    }

    fn set_max_frame_rate(&self, fps: u32) {
        self.recorder.record(|s| s.max_frame_rates.push(fps));
    }
}
