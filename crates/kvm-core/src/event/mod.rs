//! Event dispatch and the single-threaded run loop.
//!
//! [`EventLoop`] glues the [`Dispatcher`] to the socket
//! [`Reactor`](crate::net::reactor::Reactor):
//!
//! ```text
//! loop {
//!     handle the events queued when the turn began (and every due timer)
//!     poll sockets until the next timer is due, or not at all if the
//!     handlers posted more work
//! }
//! ```
//!
//! The orchestrators implement [`Handler`] and never see a socket or a thread.

pub mod dispatcher;

pub use dispatcher::{Dispatcher, Event, TimerId};

use std::io;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::net::reactor::Reactor;
use crate::net::Transport;

/// Reacts to one event at a time.
///
/// The handler gets the dispatcher (to post follow-up events, start or cancel
/// timers, or stop the loop) and the transport (to send or close) by
/// reference: there is no global state.
pub trait Handler<U> {
    fn handle(
        &mut self,
        event: Event<U>,
        dispatcher: &mut Dispatcher<U>,
        transport: &mut dyn Transport,
    );
}

/// Owns the reactor and dispatcher and drives them until a handler stops.
pub struct EventLoop<U> {
    pub reactor: Reactor,
    pub dispatcher: Dispatcher<U>,
}

impl<U> EventLoop<U> {
    /// # Errors
    ///
    /// Returns an error if the OS poller cannot be created.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            reactor: Reactor::new()?,
            dispatcher: Dispatcher::new(),
        })
    }

    /// Handles the events queued when the turn begins.  Events posted by
    /// the handler during the turn wait until sockets have been polled.
    /// Returns `false` once a handler has called [`Dispatcher::stop`].
    pub fn turn<H: Handler<U>>(&mut self, handler: &mut H) -> bool {
        let now = Instant::now();
        let budget = self.dispatcher.begin_turn(now);
        for _ in 0..budget {
            let Some(event) = self.dispatcher.next_event(now) else {
                break;
            };
            handler.handle(event, &mut self.dispatcher, &mut self.reactor);
            if self.dispatcher.is_stopped() {
                return false;
            }
        }
        !self.dispatcher.is_stopped()
    }

    /// Runs until a handler calls [`Dispatcher::stop`].
    ///
    /// # Errors
    ///
    /// Returns the poller's error; socket failures are delivered as events.
    pub fn run<H: Handler<U>>(&mut self, handler: &mut H) -> io::Result<()> {
        while self.turn(handler) {
            let timeout = if self.dispatcher.has_pending() {
                Some(Duration::ZERO)
            } else {
                self.dispatcher
                    .next_deadline()
                    .map(|due| due.saturating_duration_since(Instant::now()))
            };
            trace!(?timeout, sockets = self.reactor.len(), "polling");
            self.reactor.poll(&mut self.dispatcher, timeout)?;
        }
        Ok(())
    }
}
