//! X11 overlay window
//!
//! Each surface opens its own connection on the window thread. The window is
//! created without a background pixmap so the server never clears it before a
//! copy, kept above other windows, and advertised to the window manager as
//! non-closable through `_MOTIF_WM_HINTS`.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, error, info};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::Event;
use x11rb::protocol::randr::ConnectionExt as RandrExt;
use x11rb::protocol::shape::{ConnectionExt as ShapeExt, SK, SO};
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as WrapperExt;

use super::native::{NativeHandle, NativeSurface, Platform, SurfaceEvent, SurfaceParams};
use super::surface::BackBuffer;
use crate::constants::x11;
use crate::renderer::{Renderer, RendererHost, SolidColorRenderer};
use crate::types::{Dimensions, Position, Rect};

const FILL_COLOR: u32 = 0xff00_0000;

/// `put_image` request header size in bytes
const PUT_IMAGE_HEADER: usize = 24;

/// How a back buffer is split into `put_image` requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UploadPlan {
    width: u16,
    row_bytes: usize,
    rows_per_chunk: usize,
}

/// Rejects buffers whose size does not fit the protocol's 16-bit fields
fn upload_plan(width: u32, height: u32, max_request_bytes: usize) -> Result<UploadPlan> {
    let width = u16::try_from(width)
        .with_context(|| format!("Back buffer width {} exceeds the X11 limit", width))?;
    anyhow::ensure!(
        height <= i16::MAX as u32,
        "Back buffer height {} exceeds the X11 limit",
        height
    );
    let row_bytes = (width as usize * x11::BYTES_PER_PIXEL).max(1);
    let max_bytes = max_request_bytes.saturating_sub(PUT_IMAGE_HEADER);
    Ok(UploadPlan {
        width,
        row_bytes,
        rows_per_chunk: (max_bytes / row_bytes).max(1),
    })
}

/// X11 backend; `display` of `None` uses `$DISPLAY`
#[derive(Debug, Default)]
pub struct X11Platform {
    display: Option<String>,
}

impl X11Platform {
    pub fn new(display: Option<String>) -> Self {
        Self { display }
    }
}

impl Platform for X11Platform {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn create_surface(&self, params: &SurfaceParams) -> Result<Box<dyn NativeSurface>> {
        Ok(Box::new(X11Surface::create(self.display.as_deref(), params)?))
    }

    fn create_renderer(&self, host: RendererHost) -> Result<Arc<dyn Renderer>> {
        Ok(Arc::new(SolidColorRenderer::new(host, FILL_COLOR)))
    }
}

struct Atoms {
    net_wm_name: Atom,
    utf8_string: Atom,
    wm_class: Atom,
    net_wm_state: Atom,
    net_wm_state_above: Atom,
    motif_wm_hints: Atom,
}

impl Atoms {
    fn new(conn: &RustConnection) -> Result<Self> {
        let intern = |name: &[u8]| -> Result<Atom> {
            let label = String::from_utf8_lossy(name);
            Ok(conn
                .intern_atom(false, name)
                .with_context(|| format!("Failed to intern {} atom", label))?
                .reply()
                .with_context(|| format!("Failed to get reply for {} atom", label))?
                .atom)
        };
        Ok(Self {
            net_wm_name: intern(b"_NET_WM_NAME")?,
            utf8_string: intern(b"UTF8_STRING")?,
            wm_class: intern(b"WM_CLASS")?,
            net_wm_state: intern(b"_NET_WM_STATE")?,
            net_wm_state_above: intern(b"_NET_WM_STATE_ABOVE")?,
            motif_wm_hints: intern(b"_MOTIF_WM_HINTS")?,
        })
    }
}

#[derive(Debug, Default)]
struct DragState {
    dragging: bool,
    drag_start: Position,
    win_start: Position,
}

struct X11Surface {
    conn: RustConnection,
    root: Window,
    depth: u8,
    screen_size: Dimensions,
    window: Window,
    gc: Gcontext,
    atoms: Atoms,
    locked: bool,
    geometry: Rect,
    drag: DragState,
    destroyed: bool,
}

impl X11Surface {
    fn create(display: Option<&str>, params: &SurfaceParams) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(display)
            .context("Failed to connect to X11 server. Is DISPLAY set correctly?")?;
        let screen = &conn.setup().roots[screen_num];
        let (root, depth, visual) = (screen.root, screen.root_depth, screen.root_visual);
        let screen_size = Dimensions::new(screen.width_in_pixels as u32, screen.height_in_pixels as u32);
        let atoms = Atoms::new(&conn)?;

        let position = params.position.unwrap_or_default();
        let window = conn.generate_id().context("Failed to generate X11 window ID")?;
        conn.create_window(
            depth,
            window,
            root,
            position.x as i16,
            position.y as i16,
            params.size.width as u16,
            params.size.height as u16,
            0,
            WindowClass::INPUT_OUTPUT,
            visual,
            &CreateWindowAux::new()
                .background_pixmap(x11rb::NONE)
                .bit_gravity(Gravity::NORTH_WEST)
                .event_mask(
                    EventMask::EXPOSURE
                        | EventMask::STRUCTURE_NOTIFY
                        | EventMask::BUTTON_PRESS
                        | EventMask::BUTTON_RELEASE
                        | EventMask::POINTER_MOTION,
                ),
        )
        .context(format!("Failed to create overlay window '{}'", params.title))?;

        // Destroys the window if any later setup step fails
        struct WindowGuard<'a> {
            conn: &'a RustConnection,
            window: Window,
            should_cleanup: bool,
        }

        impl Drop for WindowGuard<'_> {
            fn drop(&mut self) {
                if self.should_cleanup {
                    if let Err(e) = self.conn.destroy_window(self.window) {
                        error!(window = self.window, error = %e, "Failed to clean up window after setup failure");
                    }
                    let _ = self.conn.flush();
                }
            }
        }

        let mut guard = WindowGuard {
            conn: &conn,
            window,
            should_cleanup: true,
        };

        let gc = conn.generate_id().context("Failed to generate graphics context ID")?;
        conn.create_gc(gc, window, &CreateGCAux::new().graphics_exposures(0))
            .context("Failed to create graphics context for overlay window")?;

        conn.change_property8(PropMode::REPLACE, window, atoms.wm_class, AtomEnum::STRING, x11::WM_CLASS)
            .context("Failed to set WM_CLASS")?;
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms.net_wm_state,
            AtomEnum::ATOM,
            &[atoms.net_wm_state_above],
        )
        .context("Failed to set window always-on-top")?;
        conn.flush().context("Failed to flush X11 connection after window setup")?;

        guard.should_cleanup = false;
        drop(guard);

        let mut surface = Self {
            conn,
            root,
            depth,
            screen_size,
            window,
            gc,
            atoms,
            locked: false,
            geometry: Rect::new(position, params.size),
            drag: DragState::default(),
            destroyed: false,
        };
        surface.set_title(&params.title)?;
        surface.write_motif_hints()?;
        info!(window = window, title = %params.title, "Created overlay window");
        Ok(surface)
    }

    /// Move and resize functions only while unlocked; close is never offered
    fn write_motif_hints(&self) -> Result<()> {
        let functions = if self.locked {
            0
        } else {
            x11::MWM_FUNC_MOVE | x11::MWM_FUNC_RESIZE
        };
        let mut hints = [0u32; x11::MWM_HINTS_LEN];
        hints[0] = x11::MWM_HINTS_FUNCTIONS | x11::MWM_HINTS_DECORATIONS;
        hints[1] = functions;
        // hints[2]: no decorations
        let atom = self.atoms.motif_wm_hints;
        self.conn
            .change_property32(PropMode::REPLACE, self.window, atom, atom, &hints)
            .context("Failed to set _MOTIF_WM_HINTS")?;
        self.conn.flush().context("Failed to flush X11 connection after WM hints")?;
        Ok(())
    }

    fn root_position(&self) -> Result<Position> {
        let reply = self
            .conn
            .translate_coordinates(self.window, self.root, 0, 0)
            .context("Failed to translate window coordinates")?
            .reply()
            .context("Failed to get reply for window coordinates")?;
        Ok(Position::new(reply.dst_x as i32, reply.dst_y as i32))
    }

    fn handle_event(&mut self, event: Event, out: &mut Vec<SurfaceEvent>) -> Result<()> {
        match event {
            Event::Expose(expose) if expose.count == 0 => out.push(SurfaceEvent::Exposed),
            Event::ConfigureNotify(configure) if configure.window == self.window => {
                let size = Dimensions::new(configure.width as u32, configure.height as u32);
                if size != self.geometry.dimensions() {
                    self.geometry.width = size.width;
                    self.geometry.height = size.height;
                    out.push(SurfaceEvent::Resized(size));
                }
                let position = self.root_position()?;
                if position != self.geometry.position() {
                    self.geometry.x = position.x;
                    self.geometry.y = position.y;
                    out.push(SurfaceEvent::Moved(position));
                }
            }
            Event::ButtonPress(press) if press.detail == x11::BUTTON_LEFT && !self.locked => {
                self.drag = DragState {
                    dragging: true,
                    drag_start: Position::new(press.root_x as i32, press.root_y as i32),
                    win_start: self.geometry.position(),
                };
            }
            Event::MotionNotify(motion) if self.drag.dragging => {
                let target = Position::new(
                    self.drag.win_start.x + motion.root_x as i32 - self.drag.drag_start.x,
                    self.drag.win_start.y + motion.root_y as i32 - self.drag.drag_start.y,
                );
                self.set_position(target)?;
            }
            Event::ButtonRelease(release) if release.detail == x11::BUTTON_LEFT => {
                self.drag.dragging = false;
            }
            _ => {}
        }
        Ok(())
    }
}

impl NativeSurface for X11Surface {
    fn handle(&self) -> NativeHandle {
        self.window
    }

    fn displays(&self) -> Result<Vec<Rect>> {
        let monitors = self
            .conn
            .randr_get_monitors(self.root, true)
            .context("Failed to query RandR monitors")?
            .reply();
        match monitors {
            Ok(reply) if !reply.monitors.is_empty() => Ok(reply
                .monitors
                .iter()
                .map(|m| {
                    Rect::new(
                        Position::new(m.x as i32, m.y as i32),
                        Dimensions::new(m.width as u32, m.height as u32),
                    )
                })
                .collect()),
            other => {
                if let Err(e) = other {
                    debug!(error = %e, "RandR monitors unavailable, using screen size");
                }
                Ok(vec![Rect::new(Position::new(0, 0), self.screen_size)])
            }
        }
    }

    fn set_title(&mut self, title: &str) -> Result<()> {
        self.conn
            .change_property8(PropMode::REPLACE, self.window, AtomEnum::WM_NAME, AtomEnum::STRING, title.as_bytes())
            .context("Failed to set WM_NAME")?;
        self.conn
            .change_property8(
                PropMode::REPLACE,
                self.window,
                self.atoms.net_wm_name,
                self.atoms.utf8_string,
                title.as_bytes(),
            )
            .context("Failed to set _NET_WM_NAME")?;
        self.conn.flush().context("Failed to flush X11 connection after title change")?;
        Ok(())
    }

    fn set_visible(&mut self, visible: bool) -> Result<()> {
        if visible {
            self.conn.map_window(self.window).context("Failed to map overlay window")?;
        } else {
            self.conn.unmap_window(self.window).context("Failed to unmap overlay window")?;
        }
        self.conn.flush().context("Failed to flush X11 connection after visibility change")?;
        Ok(())
    }

    fn set_position(&mut self, position: Position) -> Result<()> {
        self.conn
            .configure_window(self.window, &ConfigureWindowAux::new().x(position.x).y(position.y))
            .context(format!("Failed to move overlay window to ({}, {})", position.x, position.y))?;
        self.conn.flush().context("Failed to flush X11 connection after move")?;
        Ok(())
    }

    fn set_size(&mut self, size: Dimensions) -> Result<()> {
        self.conn
            .configure_window(
                self.window,
                &ConfigureWindowAux::new().width(size.width).height(size.height),
            )
            .context(format!("Failed to resize overlay window to {}x{}", size.width, size.height))?;
        self.conn.flush().context("Failed to flush X11 connection after resize")?;
        Ok(())
    }

    fn set_click_through(&mut self, click_through: bool) -> Result<()> {
        if click_through {
            // Empty input region: pointer events go to the window below
            self.conn
                .shape_rectangles(SO::SET, SK::INPUT, ClipOrdering::UNSORTED, self.window, 0, 0, &[])
                .context("Failed to clear input shape")?;
        } else {
            self.conn
                .shape_mask(SO::SET, SK::INPUT, self.window, 0, 0, x11rb::NONE)
                .context("Failed to restore input shape")?;
        }
        self.conn.flush().context("Failed to flush X11 connection after input shape change")?;
        Ok(())
    }

    fn set_locked(&mut self, locked: bool) -> Result<()> {
        self.locked = locked;
        if locked {
            self.drag.dragging = false;
        }
        self.write_motif_hints()
    }

    fn set_accept_focus(&mut self, accept_focus: bool) -> Result<()> {
        // WM_HINTS: flags = InputHint, input = accept_focus
        let hints = [1u32, accept_focus as u32, 0, 0, 0, 0, 0, 0, 0];
        self.conn
            .change_property32(PropMode::REPLACE, self.window, AtomEnum::WM_HINTS, AtomEnum::WM_HINTS, &hints)
            .context("Failed to set WM_HINTS")?;
        self.conn.flush().context("Failed to flush X11 connection after WM_HINTS")?;
        Ok(())
    }

    fn blit(&mut self, buffer: &BackBuffer) -> Result<()> {
        let plan = upload_plan(buffer.width(), buffer.height(), self.conn.maximum_request_bytes())?;
        let data = buffer.to_bgra_bytes();

        for (index, chunk) in data.chunks(plan.rows_per_chunk * plan.row_bytes).enumerate() {
            let rows = u16::try_from(chunk.len() / plan.row_bytes).context("Upload chunk too tall")?;
            let dst_y = i16::try_from(index * plan.rows_per_chunk).context("Upload offset out of range")?;
            self.conn
                .put_image(
                    ImageFormat::Z_PIXMAP,
                    self.window,
                    self.gc,
                    plan.width,
                    rows,
                    0,
                    dst_y,
                    0,
                    self.depth,
                    chunk,
                )
                .context("Failed to upload back buffer")?;
        }
        self.conn.flush().context("Failed to flush X11 connection after paint")?;
        Ok(())
    }

    fn pump_events(&mut self) -> Result<Vec<SurfaceEvent>> {
        let mut out = Vec::new();
        while let Some(event) = self
            .conn
            .poll_for_event()
            .context("Failed to poll X11 events")?
        {
            self.handle_event(event, &mut out)?;
        }
        Ok(out)
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        if let Err(e) = self.conn.free_gc(self.gc) {
            error!(gc = self.gc, error = %e, "Failed to free graphics context");
        }
        if let Err(e) = self.conn.destroy_window(self.window) {
            error!(window = self.window, error = %e, "Failed to destroy overlay window");
        }
        let _ = self.conn.flush();
        info!(window = self.window, "Destroyed overlay window");
    }
}

impl Drop for X11Surface {
    fn drop(&mut self) {
        self.destroy();
    }
}
