//! Window-owning thread and its task queue
//!
//! The native surface is created on this thread and never leaves it. Other
//! threads reach it by submitting closures: [`UiThread::invoke`] waits for the
//! result, [`UiThread::post`] does not. Repaint requests are coalesced through
//! [`FrameRequester`] and rate-limited by the surface's max frame rate.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;
use tracing::{debug, error, info, trace};

use super::native::{NativeSurface, Platform, SurfaceEvent, SurfaceParams};
use super::surface::{self, SurfaceShared};
use crate::constants::timing;
use crate::error::OverlayError;

/// Unit of work executed on the window thread
pub type UiTask = Box<dyn FnOnce(&mut UiContext) + Send>;

enum UiMessage {
    Task(UiTask),
    Invalidate,
    Shutdown,
}

/// What a task sees while running on the window thread
pub struct UiContext {
    pub surface: Box<dyn NativeSurface>,
    pub shared: Arc<SurfaceShared>,
}

impl UiContext {
    /// Paint right away, ignoring the frame rate limit
    pub fn paint(&mut self) -> bool {
        surface::paint(self.surface.as_mut(), &self.shared)
    }

    fn apply(&mut self, event: SurfaceEvent) {
        let mut geometry = self.shared.geometry();
        match event {
            SurfaceEvent::Exposed => {
                self.shared.mark_frame_pending();
                return;
            }
            SurfaceEvent::Moved(position) => {
                geometry.x = position.x;
                geometry.y = position.y;
            }
            SurfaceEvent::Resized(size) => {
                geometry.width = size.width;
                geometry.height = size.height;
            }
        }
        trace!(x = geometry.x, y = geometry.y, width = geometry.width, height = geometry.height, "Window geometry changed");
        self.shared.set_geometry(geometry);
    }
}

/// Wakes the window thread for a repaint; cheap to clone, usable from any thread
#[derive(Clone)]
pub struct FrameRequester {
    shared: Arc<SurfaceShared>,
    sender: Sender<UiMessage>,
}

impl FrameRequester {
    pub fn shared(&self) -> &Arc<SurfaceShared> {
        &self.shared
    }

    /// Ask for a repaint; requests made before the next paint collapse into one
    pub fn request_frame(&self) {
        if self.shared.is_terminated() {
            return;
        }
        if self.shared.mark_frame_pending() {
            let _ = self.sender.send(UiMessage::Invalidate);
        }
    }
}

pub struct UiThread {
    name: String,
    sender: Sender<UiMessage>,
    shared: Arc<SurfaceShared>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl UiThread {
    /// Spawn the thread and create the surface on it. Fails when the surface
    /// cannot be created.
    pub fn spawn(
        name: &str,
        platform: Arc<dyn Platform>,
        params: SurfaceParams,
        shared: Arc<SurfaceShared>,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<UiMessage>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let thread_shared = shared.clone();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(format!("overlay-ui-{}", name))
            .spawn(move || {
                let surface = match platform.create_surface(&params) {
                    Ok(surface) => surface,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                info!(overlay = %thread_name, window = surface.handle(), backend = platform.name(), "Window thread started");

                let mut ctx = UiContext {
                    surface,
                    shared: thread_shared,
                };
                run_loop(&thread_name, &mut ctx, receiver);

                ctx.surface.destroy();
                info!(overlay = %thread_name, "Window thread stopped");
            })
            .context("Failed to spawn window thread")?;

        let thread_id = handle.thread().id();
        ready_rx
            .recv()
            .context("Window thread exited before creating the surface")?
            .with_context(|| format!("Failed to create window for overlay '{}'", name))?;

        Ok(Self {
            name: name.to_string(),
            sender,
            shared,
            thread_id,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn frame_requester(&self) -> FrameRequester {
        FrameRequester {
            shared: self.shared.clone(),
            sender: self.sender.clone(),
        }
    }

    /// Run `task` on the window thread and wait for its result
    pub fn invoke<R, F>(&self, task: F) -> Result<R, OverlayError>
    where
        R: Send + 'static,
        F: FnOnce(&mut UiContext) -> R + Send + 'static,
    {
        if self.is_owner_thread() {
            return Err(OverlayError::Render(
                "invoke called from the window thread itself".to_string(),
            ));
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let message = UiMessage::Task(Box::new(move |ctx: &mut UiContext| {
            let _ = tx.send(task(ctx));
        }));
        self.sender
            .send(message)
            .map_err(|_| OverlayError::WindowClosed(self.name.clone()))?;
        rx.recv().map_err(|_| OverlayError::WindowClosed(self.name.clone()))
    }

    /// Queue `task` without waiting. Returns false when the thread is gone.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut UiContext) + Send + 'static,
    {
        if self.sender.send(UiMessage::Task(Box::new(task))).is_err() {
            debug!(overlay = %self.name, "Dropping task for stopped window thread");
            return false;
        }
        true
    }

    /// Wait until every task posted so far has run
    pub fn flush(&self) -> Result<(), OverlayError> {
        if self.is_owner_thread() {
            return Ok(());
        }
        self.invoke(|_| ())
    }

    /// Stop the loop and join the thread. Safe to call more than once.
    pub fn shutdown(&self) {
        let _ = self.sender.send(UiMessage::Shutdown);
        if self.is_owner_thread() {
            return;
        }
        if let Some(handle) = self.handle.lock().take()
            && handle.join().is_err()
        {
            error!(overlay = %self.name, "Window thread panicked");
        }
    }
}

impl Drop for UiThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(name: &str, ctx: &mut UiContext, receiver: mpsc::Receiver<UiMessage>) {
    let mut last_paint: Option<Instant> = None;

    loop {
        match receiver.recv_timeout(timing::EVENT_POLL_INTERVAL) {
            Ok(UiMessage::Task(task)) => {
                if panic::catch_unwind(AssertUnwindSafe(|| task(ctx))).is_err() {
                    error!(overlay = %name, "Window task panicked");
                }
            }
            Ok(UiMessage::Invalidate) | Err(RecvTimeoutError::Timeout) => {}
            Ok(UiMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }

        match ctx.surface.pump_events() {
            Ok(events) => {
                for event in events {
                    ctx.apply(event);
                }
            }
            Err(e) => debug!(overlay = %name, error = %e, "Failed to poll window events"),
        }

        if !ctx.shared.is_frame_pending() {
            continue;
        }
        let due = last_paint.is_none_or(|at| at.elapsed() >= ctx.shared.frame_interval());
        if due && ctx.shared.take_frame_pending() {
            if panic::catch_unwind(AssertUnwindSafe(|| ctx.paint())).is_err() {
                error!(overlay = %name, "Paint panicked");
            }
            last_paint = Some(Instant::now());
        }
    }
}
