//! Readiness-driven socket reactor.
//!
//! # How the reactor works (for beginners)
//!
//! All sockets are non-blocking and registered with one [`Poller`].  Each
//! registration has a *job*: a small state machine that knows what to do when
//! the socket becomes ready.
//!
//! | job            | socket            | on readiness                                   |
//! |----------------|-------------------|------------------------------------------------|
//! | [`AcceptJob`]  | listening socket  | accept every pending connection                |
//! | [`ConnectJob`] | connecting stream | report success and swap itself for a FrameJob  |
//! | [`FrameJob`]   | connected stream  | read bytes, post one `Frame` per complete body |
//!
//! Interest is registered in *oneshot* mode: after each readiness report the
//! socket is disarmed until [`Reactor`] re-arms it with the job's current
//! interest.  Writes go through [`Transport::send`]; whatever the socket does
//! not take immediately stays in the entry's outbox and write interest is armed
//! until it drains.
//!
//! Nothing here ever blocks except [`Reactor::poll`], and only for the timeout
//! the caller passes.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use polling::{Event, Events, Poller};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, trace, warn};

use crate::net::{CloseReason, NetEvent, NetSink, Token, Transport};
use crate::protocol::codec::FrameDecoder;

/// Upper bound on bytes read from one socket per readiness report, so one busy
/// peer cannot starve the others.
const MAX_READ_PER_TURN: usize = 256 * 1024;

const READ_BUFFER_SIZE: usize = 16 * 1024;

// ── Jobs ──────────────────────────────────────────────────────────────────────

/// A registered socket.
#[derive(Debug)]
pub enum Source {
    Listener(TcpListener),
    Stream(TcpStream),
}

/// Readiness the job wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READ: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const WRITE: Interest = Interest {
        readable: false,
        writable: true,
    };
}

/// What the reactor should do with a job after running it.
pub enum JobOutcome {
    /// Keep the job and re-arm its interest.
    Keep,
    /// Swap in a different job for the same socket.
    Replace(Box<dyn SocketJob>),
    /// Close the socket and post [`NetEvent::Closed`].
    Close(CloseReason),
}

/// Everything a job may touch while it runs.
pub struct JobContext<'a> {
    token: Token,
    source: &'a Source,
    readable: bool,
    writable: bool,
    events: &'a mut Vec<NetEvent>,
    accepted: &'a mut Vec<(TcpStream, SocketAddr)>,
}

impl<'a> JobContext<'a> {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn source(&self) -> &'a Source {
        self.source
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Posts an event.  Delivered to the dispatcher after the poll batch.
    pub fn post(&mut self, event: NetEvent) {
        self.events.push(event);
    }

    /// Hands an accepted stream to the reactor for registration.
    pub fn adopt(&mut self, stream: TcpStream, peer: SocketAddr) {
        self.accepted.push((stream, peer));
    }
}

/// Per-socket readiness handler.
pub trait SocketJob {
    /// Readiness this job waits for.
    fn interest(&self) -> Interest;

    /// Runs when the socket reports readiness.
    fn on_ready(&mut self, cx: &mut JobContext<'_>) -> JobOutcome;

    /// Short name for log lines.
    fn name(&self) -> &'static str;
}

/// Accepts pending connections on a listening socket.
#[derive(Debug, Default)]
pub struct AcceptJob;

impl SocketJob for AcceptJob {
    fn interest(&self) -> Interest {
        Interest::READ
    }

    fn on_ready(&mut self, cx: &mut JobContext<'_>) -> JobOutcome {
        let Source::Listener(listener) = cx.source() else {
            return JobOutcome::Close(CloseReason::Io(io::ErrorKind::InvalidInput));
        };
        loop {
            match listener.accept() {
                Ok((stream, peer)) => cx.adopt(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Per-connection failures (reset before accept, fd limits)
                    // must not take the listener down.
                    warn!(listener = %cx.token(), error = %e, "accept failed");
                    break;
                }
            }
        }
        JobOutcome::Keep
    }

    fn name(&self) -> &'static str {
        "accept"
    }
}

/// Completes a non-blocking connect.
#[derive(Debug, Default)]
pub struct ConnectJob;

impl SocketJob for ConnectJob {
    fn interest(&self) -> Interest {
        Interest::WRITE
    }

    fn on_ready(&mut self, cx: &mut JobContext<'_>) -> JobOutcome {
        let Source::Stream(stream) = cx.source() else {
            return JobOutcome::Close(CloseReason::Io(io::ErrorKind::InvalidInput));
        };
        match stream.take_error() {
            Ok(Some(e)) | Err(e) => return JobOutcome::Close(CloseReason::from_io(&e)),
            Ok(None) => {}
        }
        match stream.peer_addr() {
            Ok(peer) => {
                debug!(token = %cx.token(), %peer, "connected");
                cx.post(NetEvent::Connected(cx.token()));
                JobOutcome::Replace(Box::new(FrameJob::new()))
            }
            Err(e) => JobOutcome::Close(CloseReason::from_io(&e)),
        }
    }

    fn name(&self) -> &'static str {
        "connect"
    }
}

/// Reads a connected stream and splits it into frame bodies.
#[derive(Debug, Default)]
pub struct FrameJob {
    decoder: FrameDecoder,
    poisoned: bool,
}

impl FrameJob {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit_frames(&mut self, cx: &mut JobContext<'_>) {
        while !self.poisoned {
            match self.decoder.next_frame() {
                Ok(Some(body)) => cx.post(NetEvent::Frame {
                    token: cx.token(),
                    body,
                }),
                Ok(None) => break,
                Err(error) => {
                    self.poisoned = true;
                    cx.post(NetEvent::Malformed {
                        token: cx.token(),
                        error,
                    });
                }
            }
        }
    }
}

impl SocketJob for FrameJob {
    fn interest(&self) -> Interest {
        Interest::READ
    }

    fn on_ready(&mut self, cx: &mut JobContext<'_>) -> JobOutcome {
        let Source::Stream(stream) = cx.source() else {
            return JobOutcome::Close(CloseReason::Io(io::ErrorKind::InvalidInput));
        };
        let mut stream: &TcpStream = stream;
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut total = 0;
        let mut outcome = JobOutcome::Keep;
        while total < MAX_READ_PER_TURN {
            match stream.read(&mut buf) {
                Ok(0) => {
                    outcome = JobOutcome::Close(CloseReason::EndOfStream);
                    break;
                }
                Ok(n) => {
                    total += n;
                    if !self.poisoned {
                        self.decoder.extend(&buf[..n]);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    outcome = JobOutcome::Close(CloseReason::from_io(&e));
                    break;
                }
            }
        }
        // Frames that arrived before a close are still delivered.
        self.emit_frames(cx);
        outcome
    }

    fn name(&self) -> &'static str {
        "frame"
    }
}

// ── Reactor ───────────────────────────────────────────────────────────────────

struct Entry {
    source: Source,
    job: Box<dyn SocketJob>,
    outbox: Vec<u8>,
    backpressured: bool,
    /// Set by [`Transport::close`] while queued bytes are still flushing.
    closing: bool,
}

impl Entry {
    fn interest(&self) -> Interest {
        if self.closing {
            return Interest {
                readable: false,
                writable: true,
            };
        }
        let mut interest = self.job.interest();
        interest.writable |= !self.outbox.is_empty();
        interest
    }

    /// Writes as much of the outbox as the socket accepts.  Returns `true`
    /// when the outbox is empty afterwards.
    fn flush(&mut self) -> io::Result<bool> {
        let Source::Stream(stream) = &mut self.source else {
            self.outbox.clear();
            return Ok(true);
        };
        let mut written = 0;
        while written < self.outbox.len() {
            match stream.write(&self.outbox[written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.outbox.drain(..written);
        Ok(self.outbox.is_empty())
    }
}

/// Owns every socket and turns readiness into [`NetEvent`]s.
pub struct Reactor {
    poller: Poller,
    events: Events,
    entries: HashMap<Token, Entry>,
    next_token: usize,
    /// Events produced outside `poll` (send failures) or by jobs during it.
    pending: Vec<NetEvent>,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            events: Events::new(),
            entries: HashMap::new(),
            next_token: 0,
            pending: Vec::new(),
        })
    }

    /// Binds a listening socket and registers it with `job`.
    pub fn listen(&mut self, addr: SocketAddr, job: Box<dyn SocketJob>) -> io::Result<Token> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        self.insert(Source::Listener(listener), job)
    }

    /// Starts a non-blocking connect to `addr` and registers it with `job`
    /// (normally a [`ConnectJob`]).  Completion or failure arrives as an event.
    pub fn connect(&mut self, addr: SocketAddr, job: Box<dyn SocketJob>) -> io::Result<Token> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(e) if connect_in_progress(&e) => {}
            Err(e) => return Err(e),
        }
        let stream = TcpStream::from(socket);
        stream.set_nodelay(true)?;
        self.insert(Source::Stream(stream), job)
    }

    /// Registers an already connected stream.
    pub fn register(&mut self, stream: TcpStream, job: Box<dyn SocketJob>) -> io::Result<Token> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        self.insert(Source::Stream(stream), job)
    }

    /// Replaces the job of `token`.  Returns `false` for unknown tokens.
    pub fn set_job(&mut self, token: Token, job: Box<dyn SocketJob>) -> bool {
        let Some(entry) = self.entries.get_mut(&token) else {
            return false;
        };
        entry.job = job;
        self.rearm(token);
        true
    }

    /// Local address of a registered socket (useful after binding port 0).
    pub fn local_addr(&self, token: Token) -> Option<SocketAddr> {
        match &self.entries.get(&token)?.source {
            Source::Listener(l) => l.local_addr().ok(),
            Source::Stream(s) => s.local_addr().ok(),
        }
    }

    /// Number of registered sockets, including ones still flushing on close.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, token: Token) -> bool {
        self.entries.get(&token).is_some_and(|e| !e.closing)
    }

    /// Waits up to `timeout` for readiness, runs the jobs of ready sockets and
    /// hands every resulting event to `sink`.
    ///
    /// Returns immediately when events from earlier sends are waiting.
    ///
    /// # Errors
    ///
    /// Returns the poller's error.  Socket-level failures never surface here;
    /// they become [`NetEvent::Closed`].
    pub fn poll(&mut self, sink: &mut dyn NetSink, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = if self.pending.is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };
        self.events.clear();
        match self.poller.wait(&mut self.events, timeout) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|ev| (Token(ev.key), ev.readable, ev.writable))
            .collect();
        for (token, readable, writable) in ready {
            self.dispatch(token, readable, writable);
        }
        for event in self.pending.drain(..) {
            sink.post_net(event);
        }
        Ok(())
    }

    fn dispatch(&mut self, token: Token, readable: bool, writable: bool) {
        // Removed earlier in this batch, or a stale report for a closed socket.
        let Some(entry) = self.entries.get_mut(&token) else {
            trace!(%token, "readiness for unknown token ignored");
            return;
        };

        if writable && !entry.outbox.is_empty() {
            match entry.flush() {
                Ok(true) if entry.closing => {
                    self.remove(token);
                    return;
                }
                Ok(true) if entry.backpressured => {
                    entry.backpressured = false;
                    self.pending.push(NetEvent::Drained(token));
                }
                Ok(_) => {}
                Err(e) => {
                    let closing = entry.closing;
                    self.remove(token);
                    if !closing {
                        self.pending.push(NetEvent::Closed {
                            token,
                            reason: CloseReason::from_io(&e),
                        });
                    }
                    return;
                }
            }
        }
        if entry.closing {
            self.rearm(token);
            return;
        }

        let wanted = entry.job.interest();
        let outcome = if (readable && wanted.readable) || (writable && wanted.writable) {
            let mut accepted = Vec::new();
            let Entry { source, job, .. } = entry;
            let mut cx = JobContext {
                token,
                source,
                readable,
                writable,
                events: &mut self.pending,
                accepted: &mut accepted,
            };
            let outcome = job.on_ready(&mut cx);
            for (stream, peer) in accepted {
                self.adopt_accepted(token, stream, peer);
            }
            outcome
        } else {
            JobOutcome::Keep
        };

        match outcome {
            JobOutcome::Keep => self.rearm(token),
            JobOutcome::Replace(job) => {
                if let Some(entry) = self.entries.get_mut(&token) {
                    trace!(%token, from = entry.job.name(), to = job.name(), "job replaced");
                    entry.job = job;
                }
                self.rearm(token);
            }
            JobOutcome::Close(reason) => {
                debug!(%token, %reason, "socket closed");
                self.remove(token);
                self.pending.push(NetEvent::Closed { token, reason });
            }
        }
    }

    fn adopt_accepted(&mut self, listener: Token, stream: TcpStream, peer: SocketAddr) {
        match self.register(stream, Box::new(FrameJob::new())) {
            Ok(token) => {
                debug!(%listener, %token, %peer, "accepted connection");
                self.pending.push(NetEvent::Accepted {
                    listener,
                    token,
                    peer,
                });
            }
            Err(e) => warn!(%peer, error = %e, "could not register accepted connection"),
        }
    }

    fn insert(&mut self, source: Source, job: Box<dyn SocketJob>) -> io::Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;
        let interest = job.interest();
        let event = Event::new(token.0, interest.readable, interest.writable);
        // SAFETY: the source is owned by the entry inserted below, and
        // `remove` (also called from `Drop`) deletes it from the poller
        // before the entry and its socket are dropped.
        unsafe {
            match &source {
                Source::Listener(l) => self.poller.add(l, event)?,
                Source::Stream(s) => self.poller.add(s, event)?,
            }
        }
        self.entries.insert(
            token,
            Entry {
                source,
                job,
                outbox: Vec::new(),
                backpressured: false,
                closing: false,
            },
        );
        Ok(token)
    }

    fn rearm(&mut self, token: Token) {
        let Some(entry) = self.entries.get(&token) else {
            return;
        };
        let interest = entry.interest();
        let event = Event::new(token.0, interest.readable, interest.writable);
        let result = match &entry.source {
            Source::Listener(l) => self.poller.modify(l, event),
            Source::Stream(s) => self.poller.modify(s, event),
        };
        if let Err(e) = result {
            let closing = entry.closing;
            warn!(%token, error = %e, "could not re-arm socket");
            self.remove(token);
            if !closing {
                self.pending.push(NetEvent::Closed {
                    token,
                    reason: CloseReason::from_io(&e),
                });
            }
        }
    }

    fn remove(&mut self, token: Token) {
        if let Some(entry) = self.entries.remove(&token) {
            let result = match &entry.source {
                Source::Listener(l) => self.poller.delete(l),
                Source::Stream(s) => self.poller.delete(s),
            };
            if let Err(e) = result {
                debug!(%token, error = %e, "poller delete failed");
            }
        }
    }
}

impl Transport for Reactor {
    fn send(&mut self, token: Token, bytes: &[u8]) {
        let Some(entry) = self.entries.get_mut(&token) else {
            trace!(%token, len = bytes.len(), "send to unknown token dropped");
            return;
        };
        if entry.closing {
            return;
        }
        let was_empty = entry.outbox.is_empty();
        entry.outbox.extend_from_slice(bytes);
        if !was_empty {
            // Write interest is already armed.
            return;
        }
        match entry.flush() {
            Ok(true) => {}
            Ok(false) => {
                entry.backpressured = true;
                self.rearm(token);
            }
            Err(e) => {
                self.remove(token);
                self.pending.push(NetEvent::Closed {
                    token,
                    reason: CloseReason::from_io(&e),
                });
            }
        }
    }

    fn close(&mut self, token: Token) {
        let Some(entry) = self.entries.get_mut(&token) else {
            return;
        };
        let flushed = entry.outbox.is_empty() || matches!(entry.flush(), Ok(true) | Err(_));
        if flushed {
            self.remove(token);
        } else {
            entry.closing = true;
            self.rearm(token);
        }
    }

    fn backlog(&self, token: Token) -> usize {
        self.entries.get(&token).map_or(0, |e| e.outbox.len())
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        let tokens: Vec<Token> = self.entries.keys().copied().collect();
        for token in tokens {
            self.remove(token);
        }
    }
}

/// Returns `true` when a non-blocking connect is still in progress.
///
/// Unix reports `EINPROGRESS`; Windows reports `WSAEWOULDBLOCK`, which std
/// maps to [`io::ErrorKind::WouldBlock`].
fn connect_in_progress(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::EINPROGRESS)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    /// Polls until `done` holds for the collected events or two seconds pass.
    fn poll_until(
        reactor: &mut Reactor,
        events: &mut Vec<NetEvent>,
        done: impl Fn(&[NetEvent]) -> bool,
    ) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done(events) {
            assert!(Instant::now() < deadline, "timed out; events: {events:?}");
            reactor
                .poll(events, Some(Duration::from_millis(20)))
                .unwrap();
        }
    }

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut out = (body.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_accept_and_frame_delivery() {
        // Arrange
        let mut reactor = Reactor::new().unwrap();
        let listener = reactor.listen(loopback(), Box::new(AcceptJob)).unwrap();
        let addr = reactor.local_addr(listener).unwrap();
        let mut client = std::net::TcpStream::connect(addr).unwrap();
        let mut events = Vec::new();

        // Act – two frames, the second split across writes
        client.write_all(&frame(b"CNOP")).unwrap();
        let second = frame(b"COUT");
        client.write_all(&second[..3]).unwrap();
        client.flush().unwrap();
        poll_until(&mut reactor, &mut events, |evs| {
            evs.iter().any(|e| matches!(e, NetEvent::Frame { .. }))
        });
        client.write_all(&second[3..]).unwrap();
        poll_until(&mut reactor, &mut events, |evs| {
            evs.iter()
                .filter(|e| matches!(e, NetEvent::Frame { .. }))
                .count()
                == 2
        });

        // Assert
        let bodies: Vec<&[u8]> = events
            .iter()
            .filter_map(|e| match e {
                NetEvent::Frame { body, .. } => Some(body.as_slice()),
                _ => None,
            })
            .collect();
        assert_eq!(bodies, [b"CNOP".as_slice(), b"COUT".as_slice()]);
        assert!(matches!(events[0], NetEvent::Accepted { listener: l, .. } if l == listener));
    }

    #[test]
    fn test_peer_close_posts_end_of_stream() {
        // Arrange
        let mut reactor = Reactor::new().unwrap();
        let listener = reactor.listen(loopback(), Box::new(AcceptJob)).unwrap();
        let addr = reactor.local_addr(listener).unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let mut events = Vec::new();
        poll_until(&mut reactor, &mut events, |evs| !evs.is_empty());
        let token = events[0].token();

        // Act
        drop(client);
        poll_until(&mut reactor, &mut events, |evs| {
            evs.iter().any(|e| matches!(e, NetEvent::Closed { .. }))
        });

        // Assert
        assert!(events.contains(&NetEvent::Closed {
            token,
            reason: CloseReason::EndOfStream
        }));
        assert!(!reactor.contains(token));
    }

    #[test]
    fn test_oversized_frame_is_reported_as_malformed() {
        let mut reactor = Reactor::new().unwrap();
        let listener = reactor.listen(loopback(), Box::new(AcceptJob)).unwrap();
        let addr = reactor.local_addr(listener).unwrap();
        let mut client = std::net::TcpStream::connect(addr).unwrap();
        let mut events = Vec::new();

        client.write_all(&u32::MAX.to_be_bytes()).unwrap();
        poll_until(&mut reactor, &mut events, |evs| {
            evs.iter().any(|e| matches!(e, NetEvent::Malformed { .. }))
        });
    }

    #[test]
    fn test_connect_and_send_both_ways() {
        // Arrange – server and client inside the same reactor
        let mut reactor = Reactor::new().unwrap();
        let listener = reactor.listen(loopback(), Box::new(AcceptJob)).unwrap();
        let addr = reactor.local_addr(listener).unwrap();
        let outbound = reactor.connect(addr, Box::new(ConnectJob)).unwrap();
        let mut events = Vec::new();
        poll_until(&mut reactor, &mut events, |evs| {
            evs.contains(&NetEvent::Connected(outbound))
                && evs.iter().any(|e| matches!(e, NetEvent::Accepted { .. }))
        });
        let inbound = events
            .iter()
            .find_map(|e| match e {
                NetEvent::Accepted { token, .. } => Some(*token),
                _ => None,
            })
            .unwrap();
        events.clear();

        // Act
        reactor.send(outbound, &frame(b"QINF"));
        reactor.send(inbound, &frame(b"CIAK"));
        poll_until(&mut reactor, &mut events, |evs| evs.len() >= 2);

        // Assert
        assert!(events.contains(&NetEvent::Frame {
            token: inbound,
            body: b"QINF".to_vec()
        }));
        assert!(events.contains(&NetEvent::Frame {
            token: outbound,
            body: b"CIAK".to_vec()
        }));
        assert_eq!(reactor.backlog(outbound), 0);
    }

    #[test]
    fn test_connect_refused_posts_closed() {
        // Arrange – grab a free port, then release it
        let addr = {
            let l = std::net::TcpListener::bind(loopback()).unwrap();
            l.local_addr().unwrap()
        };
        let mut reactor = Reactor::new().unwrap();
        let mut events = Vec::new();

        // Act
        let token = match reactor.connect(addr, Box::new(ConnectJob)) {
            Ok(token) => token,
            // Some platforms refuse synchronously; nothing more to check.
            Err(_) => return,
        };
        poll_until(&mut reactor, &mut events, |evs| !evs.is_empty());

        // Assert
        assert!(matches!(
            events[0],
            NetEvent::Closed { token: t, .. } if t == token
        ));
    }

    #[test]
    fn test_closed_token_gets_no_more_events() {
        // Arrange
        let mut reactor = Reactor::new().unwrap();
        let listener = reactor.listen(loopback(), Box::new(AcceptJob)).unwrap();
        let addr = reactor.local_addr(listener).unwrap();
        let mut client = std::net::TcpStream::connect(addr).unwrap();
        let mut events = Vec::new();
        poll_until(&mut reactor, &mut events, |evs| !evs.is_empty());
        let token = events[0].token();
        events.clear();

        // Act
        reactor.close(token);
        let _ = client.write_all(&frame(b"CNOP"));
        for _ in 0..5 {
            reactor.poll(&mut events, Some(Duration::from_millis(10))).unwrap();
        }

        // Assert
        assert!(events.iter().all(|e| e.token() != token), "{events:?}");
        assert!(!reactor.contains(token));
        reactor.send(token, b"ignored");
        assert_eq!(reactor.backlog(token), 0);
    }

    #[test]
    fn test_set_job_on_unknown_token() {
        let mut reactor = Reactor::new().unwrap();
        assert!(!reactor.set_job(Token(99), Box::new(FrameJob::new())));
    }

    #[test]
    fn test_would_block_counts_as_connect_in_progress() {
        assert!(connect_in_progress(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!connect_in_progress(&io::Error::from(
            io::ErrorKind::ConnectionRefused
        )));
    }

    #[cfg(unix)]
    #[test]
    fn test_einprogress_counts_as_connect_in_progress() {
        let e = io::Error::from_raw_os_error(libc::EINPROGRESS);
        assert!(connect_in_progress(&e));
        assert!(!connect_in_progress(&io::Error::from_raw_os_error(
            libc::ECONNREFUSED
        )));
    }
}
