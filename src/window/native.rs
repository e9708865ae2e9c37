//! Seams to the native windowing system and the content renderer

use anyhow::Result;
use std::sync::Arc;

use super::surface::BackBuffer;
use crate::renderer::{Renderer, RendererHost};
use crate::types::{Dimensions, Position, Rect};

/// OS handle of a window, stable for the window's whole life
pub type NativeHandle = u32;

/// Things the window system reported since the last poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// Part of the window needs repainting
    Exposed,
    Moved(Position),
    Resized(Dimensions),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceParams {
    pub title: String,
    pub size: Dimensions,
    /// `None` keeps the window system's default placement
    pub position: Option<Position>,
}

/// A native window. Created on the window thread and never leaves it.
pub trait NativeSurface {
    fn handle(&self) -> NativeHandle;

    /// Extents of every active display
    fn displays(&self) -> Result<Vec<Rect>>;

    fn set_title(&mut self, title: &str) -> Result<()>;

    fn set_visible(&mut self, visible: bool) -> Result<()>;

    fn set_position(&mut self, position: Position) -> Result<()>;

    fn set_size(&mut self, size: Dimensions) -> Result<()>;

    /// Let pointer input fall through to whatever is below
    fn set_click_through(&mut self, click_through: bool) -> Result<()>;

    /// A locked window cannot be moved or resized by the user
    fn set_locked(&mut self, locked: bool) -> Result<()>;

    fn set_accept_focus(&mut self, accept_focus: bool) -> Result<()>;

    /// Opaque copy of the whole buffer to the window origin
    fn blit(&mut self, buffer: &BackBuffer) -> Result<()>;

    /// Drain pending window system events without blocking
    fn pump_events(&mut self) -> Result<Vec<SurfaceEvent>>;

    fn destroy(&mut self);
}

/// Factory for windows and renderers of one backend
pub trait Platform: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_surface(&self, params: &SurfaceParams) -> Result<Box<dyn NativeSurface>>;

    fn create_renderer(&self, host: RendererHost) -> Result<Arc<dyn Renderer>>;
}
