//! ClientRegistry: the server's table of client connections.
//!
//! Every accepted socket gets an entry keyed by its reactor [`Token`].  The
//! entry owns the connection's [`Session`] and what the server has learned
//! about the screen behind it.
//!
//! # Connection lifecycle (for beginners)
//!
//! ```text
//! Greeting  ──►  Admitted  ──►  Active
//!     │              │             │
//!     └──────────────┴─────────────┴──►  removed
//! ```
//!
//! - `Greeting`: the socket was accepted and `Hello` sent; the client has not
//!   answered yet.
//! - `Admitted`: the client's screen name is part of the topology and not in
//!   use; the server asked for its screen info.
//! - `Active`: the screen info arrived.  The screen can receive the cursor.
//! - removed: the session ended (goodbye, timeout, protocol violation or a
//!   dead socket).  Nothing is kept for reconnection; a returning client
//!   starts over at `Greeting`.

use std::collections::HashMap;

use kvm_core::domain::{ScreenName, ScreenShape};
use kvm_core::protocol::messages::{ClipboardId, ScreenInfo};
use kvm_core::{Session, Token};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Greeting,
    Admitted,
    Active,
}

/// One client connection.
#[derive(Debug)]
pub struct ClientEntry {
    pub session: Session,
    /// Screen name, set once the client is admitted.
    pub screen: Option<ScreenName>,
    /// Latest screen info reported by the client.
    pub info: Option<ScreenInfo>,
    /// Clipboard generation last streamed to this client, per clipboard.
    clipboard_sent: [Option<u64>; ClipboardId::ALL.len()],
}

impl ClientEntry {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            screen: None,
            info: None,
            clipboard_sent: [None; ClipboardId::ALL.len()],
        }
    }

    pub fn token(&self) -> Token {
        self.session.token()
    }

    pub fn connection_state(&self) -> ConnectionState {
        match (&self.screen, self.info.is_some() && self.session.is_active()) {
            (Some(_), true) => ConnectionState::Active,
            (Some(_), false) => ConnectionState::Admitted,
            (None, _) => ConnectionState::Greeting,
        }
    }

    pub fn is_active(&self) -> bool {
        self.connection_state() == ConnectionState::Active
    }

    /// The client's screen rectangle, once known.
    pub fn shape(&self) -> Option<ScreenShape> {
        self.info.map(ScreenShape::from)
    }

    /// `true` if clipboard `id` at `generation` was already streamed here.
    pub fn has_clipboard(&self, id: ClipboardId, generation: u64) -> bool {
        self.clipboard_sent
            .get(id.index())
            .is_some_and(|sent| *sent == Some(generation))
    }

    pub fn mark_clipboard_sent(&mut self, id: ClipboardId, generation: u64) {
        if let Some(sent) = self.clipboard_sent.get_mut(id.index()) {
            *sent = Some(generation);
        }
    }
}

/// In-memory table of every client connection.
///
/// # HashMap choice
///
/// A `HashMap<Token, ClientEntry>` gives O(1) lookup for the hot path: every
/// frame arrives tagged with its token.  Lookups by screen name only happen on
/// switches and admissions and scan the (small) table.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<Token, ClientEntry>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: ClientEntry) {
        self.clients.insert(entry.token(), entry);
    }

    pub fn get(&self, token: Token) -> Option<&ClientEntry> {
        self.clients.get(&token)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut ClientEntry> {
        self.clients.get_mut(&token)
    }

    pub fn remove(&mut self, token: Token) -> Option<ClientEntry> {
        self.clients.remove(&token)
    }

    pub fn contains(&self, token: Token) -> bool {
        self.clients.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Every token, in ascending order so iteration is repeatable.
    pub fn tokens(&self) -> Vec<Token> {
        let mut tokens: Vec<Token> = self.clients.keys().copied().collect();
        tokens.sort();
        tokens
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientEntry> {
        self.clients.values_mut()
    }

    /// The admitted or active connection using screen name `name`.
    pub fn find_by_name(&self, name: &ScreenName) -> Option<Token> {
        self.clients
            .values()
            .find(|entry| entry.screen.as_ref() == Some(name))
            .map(ClientEntry::token)
    }

    /// The active connection for screen `name`.
    pub fn find_active(&self, name: &ScreenName) -> Option<Token> {
        self.find_by_name(name)
            .filter(|token| self.get(*token).is_some_and(ClientEntry::is_active))
    }

    /// Names of the active screens, in no particular order.
    pub fn active_screens(&self) -> Vec<ScreenName> {
        self.clients
            .values()
            .filter(|entry| entry.is_active())
            .filter_map(|entry| entry.screen.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvm_core::SessionConfig;
    use std::time::Instant;

    fn make_entry(token: usize) -> ClientEntry {
        ClientEntry::new(Session::server(
            Token(token),
            SessionConfig::default(),
            Instant::now(),
        ))
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry = ClientRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.tokens().is_empty());
    }

    #[test]
    fn test_insert_and_remove_by_token() {
        // Arrange
        let mut registry = ClientRegistry::new();
        registry.insert(make_entry(7));

        // Act
        let removed = registry.remove(Token(7));

        // Assert
        assert_eq!(removed.map(|e| e.token()), Some(Token(7)));
        assert!(!registry.contains(Token(7)));
    }

    #[test]
    fn test_new_entry_is_greeting() {
        let entry = make_entry(1);
        assert_eq!(entry.connection_state(), ConnectionState::Greeting);
        assert!(entry.shape().is_none());
    }

    #[test]
    fn test_named_entry_is_admitted_until_session_is_active() {
        // Arrange
        let mut entry = make_entry(1);

        // Act
        entry.screen = Some(ScreenName::from("laptop"));

        // Assert
        assert_eq!(entry.connection_state(), ConnectionState::Admitted);
    }

    #[test]
    fn test_find_by_name_ignores_unnamed_entries() {
        // Arrange
        let mut registry = ClientRegistry::new();
        registry.insert(make_entry(1));
        let mut named = make_entry(2);
        named.screen = Some(ScreenName::from("laptop"));
        registry.insert(named);

        // Act / Assert
        assert_eq!(registry.find_by_name(&ScreenName::from("laptop")), Some(Token(2)));
        assert_eq!(registry.find_by_name(&ScreenName::from("desk")), None);
        assert_eq!(registry.find_active(&ScreenName::from("laptop")), None);
    }

    #[test]
    fn test_tokens_are_sorted() {
        let mut registry = ClientRegistry::new();
        for token in [5, 1, 3] {
            registry.insert(make_entry(token));
        }
        assert_eq!(registry.tokens(), [Token(1), Token(3), Token(5)]);
    }

    #[test]
    fn test_clipboard_generation_tracking() {
        // Arrange
        let mut entry = make_entry(1);

        // Act
        entry.mark_clipboard_sent(ClipboardId::SELECTION, 4);

        // Assert
        assert!(entry.has_clipboard(ClipboardId::SELECTION, 4));
        assert!(!entry.has_clipboard(ClipboardId::SELECTION, 5));
        assert!(!entry.has_clipboard(ClipboardId::CLIPBOARD, 4));
    }
}
