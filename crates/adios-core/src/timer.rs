//! Coalescing update timer.
//!
//! One background thread drives periodic latency-model recomputation.
//! Arming the timer only ever moves the pending deadline earlier, so a
//! burst of completions collapses into a single wakeup.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

#[derive(Debug)]
struct TimerShared {
    state: Mutex<TimerState>,
    cond: Condvar,
}

#[derive(Debug)]
pub(crate) struct UpdateTimer {
    shared: Arc<TimerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateTimer {
    /// Spawn the timer thread; `callback` runs on each expiry.
    pub(crate) fn spawn<F>(callback: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                deadline: None,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::spawn(move || loop {
            {
                let mut state = thread_shared.state.lock();
                loop {
                    if state.shutdown {
                        return;
                    }
                    match state.deadline {
                        None => {
                            thread_shared.cond.wait(&mut state);
                        }
                        Some(deadline) => {
                            if Instant::now() >= deadline {
                                state.deadline = None;
                                break;
                            }
                            let _ = thread_shared.cond.wait_until(&mut state, deadline);
                        }
                    }
                }
            }
            callback();
        });

        Self {
            shared,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Arm the timer `delay` from now; an earlier pending expiry wins.
    pub(crate) fn schedule_in(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        let sooner = state.deadline.map_or(true, |current| deadline < current);
        if sooner {
            state.deadline = Some(deadline);
            self.shared.cond.notify_one();
        }
    }

    /// Stop the thread and wait for it; idempotent.
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.cond.notify_one();
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for UpdateTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fires_after_delay() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let timer = UpdateTimer::spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        timer.schedule_in(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unarmed_timer_never_fires() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let _timer = UpdateTimer::spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_coalesces_to_earliest_deadline() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let timer = UpdateTimer::spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        timer.schedule_in(Duration::from_millis(200));
        timer.schedule_in(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 1, "both arms collapse into one expiry");
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::SeqCst), 1, "the later deadline was absorbed");
    }

    #[test]
    fn test_rearm_after_fire() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let timer = UpdateTimer::spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        timer.schedule_in(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(50));
        timer.schedule_in(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let timer = UpdateTimer::spawn(|| {});
        timer.schedule_in(Duration::from_secs(60));
        timer.shutdown();
        timer.shutdown();
    }
}
