//! FIFO event queue with cancellable timers.
//!
//! # Why a queue instead of callbacks? (for beginners)
//!
//! Everything in a session engine happens in response to *something*: bytes
//! arriving, a timer expiring, the capture backend reporting a key press.  If
//! each of those invoked handlers directly, a handler could be re-entered while
//! it is still running (a send fails, which closes the socket, which notifies
//! the handler that is doing the send...).  Instead, every source *posts* an
//! [`Event`] here and a single loop pops them one at a time.  Handlers never
//! run concurrently and always see events in arrival order.
//!
//! Timers are kept in a separate set and merged into the queue when they come
//! due, behind the events that were already waiting.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use crate::net::NetEvent;

/// Identifies a timer created by [`Dispatcher::adopt_timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// One unit of work for a [`Handler`](crate::event::Handler).
///
/// `U` is the orchestrator's own event type (local input, clipboard grabs,
/// session endings posted for the next turn).
#[derive(Debug)]
pub enum Event<U> {
    Net(NetEvent),
    Timer(TimerId),
    User(U),
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    due: Instant,
    interval: Duration,
    repeating: bool,
}

/// Single-threaded event queue plus timer set.
pub struct Dispatcher<U> {
    queue: VecDeque<Event<U>>,
    timers: HashMap<TimerId, Timer>,
    next_timer: u64,
    now: Instant,
    stopped: bool,
}

impl<U> Dispatcher<U> {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Creates a dispatcher whose clock starts at `now`.  Timers adopted before
    /// the first [`next_event`](Self::next_event) are due relative to it.
    pub fn starting_at(now: Instant) -> Self {
        Self {
            queue: VecDeque::new(),
            timers: HashMap::new(),
            next_timer: 0,
            now,
            stopped: false,
        }
    }

    /// Appends `event` to the queue.
    pub fn post(&mut self, event: Event<U>) {
        self.queue.push_back(event);
    }

    /// Shorthand for posting a [`Event::User`] event.
    pub fn post_user(&mut self, event: U) {
        self.post(Event::User(event));
    }

    /// Starts a timer that first fires `interval` after the dispatcher's
    /// current time, then every `interval` if `repeating`.
    pub fn adopt_timer(&mut self, interval: Duration, repeating: bool) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.timers.insert(
            id,
            Timer {
                due: self.now + interval,
                interval,
                repeating,
            },
        );
        id
    }

    /// Cancels a timer.  Takes effect immediately: a firing that was already
    /// merged into the queue is removed too.  Returns `true` if it existed.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        let before = self.queue.len();
        self.queue
            .retain(|event| !matches!(event, Event::Timer(t) if *t == id));
        self.timers.remove(&id).is_some() || self.queue.len() != before
    }

    /// Returns `true` while the timer is scheduled.
    pub fn is_timer_active(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    /// Advances the clock to `now`, queues every due timer, then pops the
    /// oldest event.
    pub fn next_event(&mut self, now: Instant) -> Option<Event<U>> {
        self.begin_turn(now);
        self.queue.pop_front()
    }

    /// Advances the clock to `now`, queues every due timer and returns how
    /// many events are queued.  A turn handles exactly that many; anything
    /// posted while they run waits for the next turn.
    pub fn begin_turn(&mut self, now: Instant) -> usize {
        if now > self.now {
            self.now = now;
        }
        self.fire_due_timers();
        self.queue.len()
    }

    /// The earliest instant a timer comes due, if any is scheduled.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.due).min()
    }

    /// The dispatcher's notion of the current time.
    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Asks the run loop to return after the current event.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn fire_due_timers(&mut self) {
        let now = self.now;
        let mut due: Vec<(Instant, TimerId)> = self
            .timers
            .iter()
            .filter(|(_, t)| t.due <= now)
            .map(|(id, t)| (t.due, *id))
            .collect();
        if due.is_empty() {
            return;
        }
        due.sort_unstable();

        for (_, id) in due {
            self.queue.push_back(Event::Timer(id));
            let Some(timer) = self.timers.get_mut(&id) else {
                continue;
            };
            if timer.repeating && !timer.interval.is_zero() {
                // Skip missed periods instead of firing a burst.
                timer.due += timer.interval;
                if timer.due <= now {
                    timer.due = now + timer.interval;
                }
            } else {
                self.timers.remove(&id);
            }
        }
    }
}

impl<U> Default for Dispatcher<U> {
    fn default() -> Self {
        Self::new()
    }
}
