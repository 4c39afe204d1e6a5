//! Notification Registry
//!
//! Coordinates sessions waiting for data with the writers that produce it.
//! Two decoupled mechanisms are driven by the same wake event:
//!
//! - **Waiters** park until the buffer becomes readable. Synchronous waiters
//!   park on a condition variable, asynchronous waiters on a oneshot channel.
//!   A woken waiter gets no payload; it re-checks readiness itself.
//! - **Listeners** register an identity and receive [`Signal`]s through a
//!   broadcast channel, without ever blocking the writer.
//!
//! # Lost wake-ups
//!
//! A waiter checks the readiness predicate and parks while holding the
//! registry lock. A writer commits its data, releases the store lock, and only
//! then takes the registry lock to wake everyone. The wake therefore cannot
//! slip in between the waiter's check and its parking:
//!
//! ```ignore
//! let mut state = registry.lock();
//! while !is_ready() {          // store read lock taken and released here
//!     condvar.wait(&mut state); // registry lock released while parked
//! }
//! ```
//!
//! Lock order is always registry -> store. Writers never hold the store while
//! taking the registry lock.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tokio::sync::{broadcast, oneshot};

use crate::error::{Error, Result};
use crate::idgen::{ListenerId, SessionId};

/// Signal delivered to registered listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// A write increased the amount of data; `size` is the new size
    Readable { size: usize },
    /// A session that wrote data was closed
    WriterClosed { session: SessionId },
    /// The device is shutting down; no further signals follow
    Hangup,
}

/// Why a wait for readability returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The buffer holds data
    Ready,
    /// The caller's deadline passed first
    TimedOut,
    /// Abandoned through an [`crate::session::Interrupter`]
    Interrupted,
    /// The waiting session was closed
    Closed,
    /// The device was shut down
    Hangup,
}

/// An async waiter parked until the next wake event
struct AsyncWaiter {
    session: SessionId,
    sender: oneshot::Sender<()>,
}

impl std::fmt::Debug for AsyncWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncWaiter")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Broadcast channel for one listener identity (multiple receivers allowed)
struct Listener {
    sender: broadcast::Sender<Signal>,
    debug_hint: String,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("debug_hint", &self.debug_hint)
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Bumped on every wake event; only used for diagnostics
    generation: u64,
    hangup: bool,
    open_sessions: HashSet<SessionId>,
    interrupted: HashSet<SessionId>,
    async_waiters: Vec<AsyncWaiter>,
    listeners: HashMap<ListenerId, Listener>,
}

impl RegistryState {
    fn check(&mut self, session: SessionId, is_ready: &impl Fn() -> bool) -> Option<WaitOutcome> {
        if self.hangup {
            return Some(WaitOutcome::Hangup);
        }
        if !self.open_sessions.contains(&session) {
            return Some(WaitOutcome::Closed);
        }
        if self.interrupted.remove(&session) {
            return Some(WaitOutcome::Interrupted);
        }
        if is_ready() {
            return Some(WaitOutcome::Ready);
        }
        None
    }

    /// Wake async waiters, all of them or only those of one session
    fn wake_async(&mut self, only: Option<SessionId>) {
        let waiters = std::mem::take(&mut self.async_waiters);
        let (woken, kept): (Vec<_>, Vec<_>) = waiters
            .into_iter()
            .partition(|w| only.map_or(true, |session| w.session == session));
        self.async_waiters = kept;
        for waiter in woken {
            if waiter.sender.send(()).is_err() {
                log::debug!(
                    "registry.wake: async waiter of {} already gone",
                    waiter.session
                );
            }
        }
    }

    /// Send `signal` to every listener. A listener whose receivers are all
    /// gone is dropped.
    fn broadcast(&mut self, signal: Signal) {
        self.listeners.retain(|id, listener| {
            if listener.sender.send(signal).is_ok() {
                return true;
            }
            log::debug!(
                "registry.broadcast: {id} (hint: {}) has no receivers, dropping it",
                listener.debug_hint
            );
            false
        });
    }
}

/// Registry of waiters and listeners for one device
pub struct NotificationRegistry {
    state: Mutex<RegistryState>,
    readable: Condvar,
    channel_capacity: usize,
}

impl NotificationRegistry {
    /// `channel_capacity` bounds how far a listener may lag behind
    #[must_use]
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            readable: Condvar::new(),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Start tracking an open session. Fails after hang-up.
    pub(crate) fn register_session(&self, session: SessionId) -> Result<()> {
        let mut state = self.state.lock();
        if state.hangup {
            return Err(Error::BadDescriptor("device is shut down"));
        }
        if !state.open_sessions.insert(session) {
            log::warn!("registry.register_session: {session} already registered");
        }
        Ok(())
    }

    /// Stop tracking a session. Any wait it has pending returns `Closed`.
    pub(crate) fn unregister_session(&self, session: SessionId) {
        let mut state = self.state.lock();
        if !state.open_sessions.remove(&session) && !state.hangup {
            log::warn!("registry.unregister_session: {session} not registered");
        }
        state.interrupted.remove(&session);
        state.wake_async(Some(session));
        drop(state);
        self.readable.notify_all();
    }

    /// Abandon the session's pending wait, or its next one if none is
    /// pending. Returns `false` if the session is no longer open.
    pub fn interrupt(&self, session: SessionId) -> bool {
        let mut state = self.state.lock();
        if !state.open_sessions.contains(&session) {
            return false;
        }
        state.interrupted.insert(session);
        state.wake_async(Some(session));
        drop(state);
        self.readable.notify_all();
        true
    }

    /// Wake every waiter and signal every listener that data arrived.
    ///
    /// Called after the writer released the store lock.
    pub fn notify_readable(&self, size: usize) {
        let mut state = self.state.lock();
        state.generation += 1;

        log::debug!(
            "registry.notify: generation {}, size {size}, async waiters: {}, listeners: {}",
            state.generation,
            state.async_waiters.len(),
            state.listeners.len()
        );

        state.wake_async(None);
        state.broadcast(Signal::Readable { size });
        drop(state);
        self.readable.notify_all();
    }

    /// Tell listeners that a session which wrote data has closed
    pub fn notify_writer_closed(&self, session: SessionId) {
        let mut state = self.state.lock();
        state.broadcast(Signal::WriterClosed { session });
    }

    /// Wake everyone for good: waiters return `Hangup`, listeners get a
    /// final `Hangup` signal and are dropped.
    pub fn hangup(&self) {
        let mut state = self.state.lock();
        if state.hangup {
            log::warn!("registry.hangup: already hung up");
            return;
        }
        state.hangup = true;
        state.wake_async(None);
        state.broadcast(Signal::Hangup);
        let dropped = state.listeners.len();
        state.listeners.clear();
        state.interrupted.clear();
        drop(state);
        self.readable.notify_all();
        log::debug!("registry.hangup: dropped {dropped} listener(s)");
    }

    #[must_use]
    pub fn is_hung_up(&self) -> bool {
        self.state.lock().hangup
    }

    /// Register `listener` and return a receiver for its signals.
    ///
    /// Subscribing an identity twice returns another receiver on the same
    /// channel. Drop the receiver or call [`Self::unsubscribe`] to stop.
    ///
    /// # Errors
    ///
    /// `BadDescriptor` after hang-up.
    pub fn subscribe(
        &self,
        listener: ListenerId,
        debug_hint: &str,
    ) -> Result<broadcast::Receiver<Signal>> {
        let mut state = self.state.lock();
        if state.hangup {
            return Err(Error::BadDescriptor("device is shut down"));
        }
        let capacity = self.channel_capacity;
        let entry = state.listeners.entry(listener).or_insert_with(|| {
            let (sender, _rx) = broadcast::channel(capacity);
            Listener {
                sender,
                debug_hint: debug_hint.to_string(),
            }
        });
        Ok(entry.sender.subscribe())
    }

    /// Remove a listener registration. Returns whether it existed.
    pub fn unsubscribe(&self, listener: ListenerId) -> bool {
        let mut state = self.state.lock();
        if state.listeners.remove(&listener).is_none() {
            log::warn!("registry.unsubscribe: {listener} not subscribed");
            return false;
        }
        true
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    #[must_use]
    pub fn open_session_count(&self) -> usize {
        self.state.lock().open_sessions.len()
    }

    /// Block until `is_ready` holds, the session is interrupted or closed,
    /// the device hangs up, or `deadline` passes.
    ///
    /// `is_ready` is evaluated under the registry lock and must not block on
    /// anything but the store's shared lock.
    pub fn wait_readable(
        &self,
        session: SessionId,
        is_ready: impl Fn() -> bool,
        deadline: Option<Instant>,
    ) -> WaitOutcome {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = state.check(session, &is_ready) {
                return outcome;
            }
            match deadline {
                Some(deadline) => {
                    if self.readable.wait_until(&mut state, deadline).timed_out() {
                        return state
                            .check(session, &is_ready)
                            .unwrap_or(WaitOutcome::TimedOut);
                    }
                }
                None => self.readable.wait(&mut state),
            }
        }
    }

    /// Async counterpart of [`Self::wait_readable`]. Timeouts are left to the
    /// caller (e.g. `tokio::time::timeout`); dropping the future abandons the
    /// wait.
    pub async fn wait_readable_async(
        &self,
        session: SessionId,
        is_ready: impl Fn() -> bool,
    ) -> WaitOutcome {
        loop {
            let rx = {
                let mut state = self.state.lock();
                if let Some(outcome) = state.check(session, &is_ready) {
                    return outcome;
                }
                state.async_waiters.retain(|w| !w.sender.is_closed());
                let (tx, rx) = oneshot::channel();
                state.async_waiters.push(AsyncWaiter { session, sender: tx });
                rx
                // Lock released before awaiting
            };
            // A dropped sender only happens when the registry itself goes
            // away; re-checking handles that as well as a real wake.
            let _ = rx.await;
        }
    }
}

impl std::fmt::Debug for NotificationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("NotificationRegistry")
            .field("generation", &state.generation)
            .field("hangup", &state.hangup)
            .field("open_sessions", &state.open_sessions.len())
            .field("async_waiters", &state.async_waiters.len())
            .field("listeners", &state.listeners)
            .finish()
    }
}
