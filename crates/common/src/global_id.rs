//! Global transaction identifiers
//!
//! A `GlobalId` combines the originating server's identity with physical time
//! and a logical counter, giving globally unique, totally ordered transaction
//! ids without any coordination between servers. The generator is a stripped
//! down hybrid-logical-clock: same physical microsecond, bump the counter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Logical identity of a server (the key under which its recovery log and
/// lease are stored).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        ServerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        ServerId(s.to_string())
    }
}

/// Globally unique transaction identifier.
///
/// Total ordering is: physical time, then logical counter, then server id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GlobalId {
    /// Physical time component (microseconds since Unix epoch)
    pub physical: u64,
    /// Logical counter for uniqueness within the same physical time
    pub counter: u32,
    /// Server that began the transaction
    pub server: ServerId,
}

impl GlobalId {
    pub fn new(physical: u64, counter: u32, server: ServerId) -> Self {
        Self {
            physical,
            counter,
            server,
        }
    }

    /// Parse from string format: "physical_counter_server"
    pub fn parse(s: &str) -> Result<Self, String> {
        let mut parts = s.splitn(3, '_');
        let physical = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| format!("Invalid global id: {}", s))?;
        let counter = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| format!("Invalid global id: {}", s))?;
        let server = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| format!("Invalid global id: {}", s))?;

        Ok(Self::new(physical, counter, ServerId::from(server)))
    }

    /// Stable byte representation, used as the log store key.
    pub fn key_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl PartialOrd for GlobalId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GlobalId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.physical.cmp(&other.physical) {
            std::cmp::Ordering::Equal => match self.counter.cmp(&other.counter) {
                std::cmp::Ordering::Equal => self.server.cmp(&other.server),
                other => other,
            },
            other => other,
        }
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.physical, self.counter, self.server)
    }
}

/// Generator for monotonic `GlobalId`s on one server.
pub struct GlobalIdGenerator {
    server: ServerId,
    last_physical: AtomicU64,
    counter: AtomicU32,
}

impl GlobalIdGenerator {
    pub fn new(server: ServerId) -> Self {
        Self {
            server,
            last_physical: AtomicU64::new(0),
            counter: AtomicU32::new(0),
        }
    }

    pub fn server(&self) -> &ServerId {
        &self.server
    }

    /// Generate the next id. Ids from one generator are strictly increasing.
    pub fn next_id(&self) -> GlobalId {
        let physical = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;

        let last = self.last_physical.load(Ordering::SeqCst);

        if physical > last {
            self.last_physical.store(physical, Ordering::SeqCst);
            self.counter.store(0, Ordering::SeqCst);
            GlobalId::new(physical, 0, self.server.clone())
        } else {
            let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            GlobalId::new(last, counter, self.server.clone())
        }
    }
}

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
