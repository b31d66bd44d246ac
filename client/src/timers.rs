//! Background timers that pause, rather than stop, during a transition
//!
//! Every timer in a `TimerGroup` keeps running in its own task for the
//! whole session. A `TransitionScope` pauses the group when it is created
//! and resumes it once when dropped, on success, failure or early return.
//! Scopes nest; only the outermost one resumes.

use log::debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

struct GroupState {
    paused: watch::Sender<bool>,
    depth: Mutex<u32>,
    pauses: AtomicU64,
    resumes: AtomicU64,
}

#[derive(Clone)]
pub struct TimerGroup {
    state: Arc<GroupState>,
}

impl Default for TimerGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerGroup {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            state: Arc::new(GroupState {
                paused,
                depth: Mutex::new(0),
                pauses: AtomicU64::new(0),
                resumes: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.state.paused.borrow()
    }

    /// Times the group went from running to paused.
    pub fn pause_count(&self) -> u64 {
        self.state.pauses.load(Ordering::SeqCst)
    }

    /// Times the group went from paused to running.
    pub fn resume_count(&self) -> u64 {
        self.state.resumes.load(Ordering::SeqCst)
    }

    /// Pauses every timer until the returned scope is dropped.
    pub fn scope(&self) -> TransitionScope {
        self.pause();
        TransitionScope {
            group: self.clone(),
        }
    }

    fn pause(&self) {
        let mut depth = match self.state.depth.lock() {
            Ok(depth) => depth,
            Err(poisoned) => poisoned.into_inner(),
        };
        *depth += 1;
        if *depth == 1 {
            self.state.paused.send_replace(true);
            self.state.pauses.fetch_add(1, Ordering::SeqCst);
            debug!("Timers paused");
        }
    }

    fn resume(&self) {
        let mut depth = match self.state.depth.lock() {
            Ok(depth) => depth,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *depth == 0 {
            return;
        }
        *depth -= 1;
        if *depth == 0 {
            self.state.paused.send_replace(false);
            self.state.resumes.fetch_add(1, Ordering::SeqCst);
            debug!("Timers resumed");
        }
    }

    /// Runs `tick` every `every` while the group is not paused. The task
    /// lives until aborted; pausing never ends it.
    pub fn spawn<F, Fut>(&self, name: &'static str, every: Duration, mut tick: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut paused = self.state.paused.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                while *paused.borrow_and_update() {
                    if paused.changed().await.is_err() {
                        return;
                    }
                }

                debug!("Timer {} fired", name);
                tick().await;
            }
        })
    }
}

/// Pauses a `TimerGroup` for its lifetime.
pub struct TransitionScope {
    group: TimerGroup,
}

impl Drop for TransitionScope {
    fn drop(&mut self) {
        self.group.resume();
    }
}
