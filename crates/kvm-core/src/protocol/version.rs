//! Protocol versions, negotiated tiers and the tier capability table.
//!
//! # Tiers (for beginners)
//!
//! Every peer announces a `(major, minor)` version in its greeting.  The major
//! number must match exactly; the session then runs at the *lower* of the two
//! minor numbers.  That negotiated level is called a **tier**.
//!
//! Tiers are strictly additive: tier 1.6 can do everything tier 1.5 can, plus
//! chunked clipboard transfer.  Instead of one session type per tier, a single
//! session consults [`Tier::capabilities`], a static lookup table, whenever a
//! message form depends on the version:
//!
//! | tier | adds                                               |
//! |------|----------------------------------------------------|
//! | 1.0  | base protocol                                      |
//! | 1.1  | physical key button in key messages                |
//! | 1.2  | relative mouse motion (`DMRM`)                     |
//! | 1.3  | keep-alive (`CALV`), horizontal wheel              |
//! | 1.4  | crypto                                             |
//! | 1.5  | file transfer and drag-and-drop                    |
//! | 1.6  | chunked clipboard (`DCLP` mark byte)               |
//! | 1.7  | secure input notification (`SECN`)                |
//! | 1.8  | language sync (`LSYN`, `DKDL`)                     |

use std::fmt;

use crate::protocol::messages::MessageKind;

/// The only major version this engine speaks.
pub const PROTOCOL_MAJOR: i16 = 1;

/// A `(major, minor)` pair as carried in the greeting and in `EICV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion {
    pub major: i16,
    pub minor: i16,
}

impl ProtocolVersion {
    pub const fn new(major: i16, minor: i16) -> Self {
        Self { major, minor }
    }

    /// The version this engine announces.
    pub const fn local() -> Self {
        Tier::LATEST.version()
    }

    /// Computes the tier both sides can speak.
    ///
    /// Returns `None` when either side is not major version 1 or announces a
    /// negative minor.  Minors above the newest known tier clamp to it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use kvm_core::protocol::version::{ProtocolVersion, Tier};
    ///
    /// let local = ProtocolVersion::new(1, 6);
    /// assert_eq!(local.negotiate(ProtocolVersion::new(1, 4)), Some(Tier::V1_4));
    /// assert_eq!(local.negotiate(ProtocolVersion::new(2, 0)), None);
    /// ```
    pub fn negotiate(self, peer: ProtocolVersion) -> Option<Tier> {
        let valid = |v: ProtocolVersion| v.major == PROTOCOL_MAJOR && v.minor >= 0;
        if !valid(self) || !valid(peer) {
            return None;
        }
        Tier::from_minor(self.minor.min(peer.minor))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A negotiated protocol level of major version 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    V1_0,
    V1_1,
    V1_2,
    V1_3,
    V1_4,
    V1_5,
    V1_6,
    V1_7,
    V1_8,
}

impl Tier {
    /// The newest tier this engine implements.
    pub const LATEST: Tier = Tier::V1_8;

    const ALL: [Tier; 9] = [
        Tier::V1_0,
        Tier::V1_1,
        Tier::V1_2,
        Tier::V1_3,
        Tier::V1_4,
        Tier::V1_5,
        Tier::V1_6,
        Tier::V1_7,
        Tier::V1_8,
    ];

    /// Maps a minor version to its tier, clamping newer minors to [`Tier::LATEST`].
    pub fn from_minor(minor: i16) -> Option<Tier> {
        let index = usize::try_from(minor).ok()?;
        Some(Self::ALL[index.min(Self::ALL.len() - 1)])
    }

    pub const fn minor(self) -> i16 {
        self as i16
    }

    pub const fn version(self) -> ProtocolVersion {
        ProtocolVersion::new(PROTOCOL_MAJOR, self.minor())
    }

    pub fn capabilities(self) -> &'static Capabilities {
        &CAPABILITY_TABLE[self as usize]
    }

    /// Shorthand for `self.capabilities().allows(kind)`.
    pub fn supports(self, kind: MessageKind) -> bool {
        self.capabilities().allows(kind)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.version().fmt(f)
    }
}

/// Feature switches of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub key_button: bool,
    pub relative_motion: bool,
    pub keep_alive: bool,
    pub horizontal_wheel: bool,
    pub crypto: bool,
    pub file_transfer: bool,
    pub clipboard_chunking: bool,
    pub secure_input: bool,
    pub language_sync: bool,
}

impl Capabilities {
    /// Returns `true` when a message of `kind` may be sent or received.
    pub fn allows(&self, kind: MessageKind) -> bool {
        match kind {
            MessageKind::MouseRelMove => self.relative_motion,
            MessageKind::KeepAlive => self.keep_alive,
            MessageKind::SecureInput => self.secure_input,
            MessageKind::KeyDownLang | MessageKind::LanguageSync => self.language_sync,
            _ => true,
        }
    }
}

const fn caps(minor: usize) -> Capabilities {
    Capabilities {
        key_button: minor >= 1,
        relative_motion: minor >= 2,
        keep_alive: minor >= 3,
        horizontal_wheel: minor >= 3,
        crypto: minor >= 4,
        file_transfer: minor >= 5,
        clipboard_chunking: minor >= 6,
        secure_input: minor >= 7,
        language_sync: minor >= 8,
    }
}

/// Indexed by tier minor.
static CAPABILITY_TABLE: [Capabilities; 9] = [
    caps(0),
    caps(1),
    caps(2),
    caps(3),
    caps(4),
    caps(5),
    caps(6),
    caps(7),
    caps(8),
];
