//! Periodic update timer, one thread per overlay
//!
//! The thread idles until [`UpdateTimer::start`] arms it. Re-arming restarts
//! the interval; [`UpdateTimer::stop`] disarms without ending the thread.

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Default)]
struct TimerState {
    armed: bool,
    /// Bumped on every start/stop so a waiting tick can tell it was superseded
    generation: u64,
    shutdown: bool,
}

#[derive(Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

pub struct UpdateTimer {
    name: String,
    shared: Arc<TimerShared>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateTimer {
    pub fn spawn<F>(name: &str, interval: Duration, tick: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(TimerShared::default());
        let thread_shared = shared.clone();

        let handle = thread::Builder::new()
            .name(format!("overlay-timer-{}", name))
            .spawn(move || run(&thread_shared, interval, tick))
            .context("Failed to spawn update timer thread")?;

        Ok(Self {
            name: name.to_string(),
            shared,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Arm the timer; the first tick follows one full interval from now
    pub fn start(&self) {
        let mut state = self.shared.state.lock();
        state.armed = true;
        state.generation += 1;
        self.shared.wake.notify_all();
        debug!(overlay = %self.name, "Update timer started");
    }

    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        if state.armed {
            debug!(overlay = %self.name, "Update timer stopped");
        }
        state.armed = false;
        state.generation += 1;
        self.shared.wake.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().armed
    }

    /// End the timer thread. Safe to call more than once, and from a tick.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.armed = false;
            state.shutdown = true;
            self.shared.wake.notify_all();
        }
        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(handle) = self.handle.lock().take()
            && handle.join().is_err()
        {
            error!(overlay = %self.name, "Update timer thread panicked");
        }
    }
}

impl Drop for UpdateTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<F: Fn()>(shared: &TimerShared, interval: Duration, tick: F) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        if !state.armed {
            shared.wake.wait(&mut state);
            continue;
        }

        let generation = state.generation;
        let timed_out = shared.wake.wait_for(&mut state, interval).timed_out();
        if state.shutdown {
            break;
        }
        if !timed_out || !state.armed || state.generation != generation {
            continue;
        }

        MutexGuard::unlocked(&mut state, &tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn counting_timer(interval: Duration) -> (UpdateTimer, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = count.clone();
        let timer = UpdateTimer::spawn("test", interval, move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        (timer, count)
    }

    fn wait_for(count: &AtomicUsize, at_least: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if count.load(Ordering::SeqCst) >= at_least {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_idle_until_started() {
        let (timer, count) = counting_timer(Duration::from_millis(5));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!timer.is_running());
    }

    #[test]
    fn test_ticks_while_running() {
        let (timer, count) = counting_timer(Duration::from_millis(5));
        timer.start();
        assert!(wait_for(&count, 3));
        assert!(timer.is_running());
    }

    #[test]
    fn test_stop_halts_ticks_and_start_resumes() {
        let (timer, count) = counting_timer(Duration::from_millis(5));
        timer.start();
        assert!(wait_for(&count, 1));

        timer.stop();
        // Let a tick that was already running finish
        thread::sleep(Duration::from_millis(20));
        let stopped_at = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);

        timer.start();
        assert!(wait_for(&count, stopped_at + 1));
    }

    #[test]
    fn test_shutdown_twice() {
        let (timer, _count) = counting_timer(Duration::from_millis(5));
        timer.start();
        timer.shutdown();
        timer.shutdown();
        assert!(!timer.is_running());
    }
}
