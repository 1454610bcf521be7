//! Change events and the host record decoded from their keys.
//!
//! Keys look like `/<root>/<domain>/<hostname>/<ip>`:
//!
//! ```text
//! /dns/ops.example.com/web1.ops.example.com/10.0.0.5
//!   → domain   ops.example.com
//!   → hostname web1.ops.example.com   (label "web1")
//!   → ip       10.0.0.5               (network "10.0.0", octet "5")
//! ```

use std::fmt;
use thiserror::Error;

/// What a change event asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Record created or its value changed.
    Upsert,
    /// Record removed.
    Delete,
}

impl Action {
    /// Map an etcd v2 action name onto an [`Action`].
    ///
    /// Returns `None` for actions that do not describe a record change
    /// (e.g. `get`), which the watcher drops.
    pub fn from_etcd(action: &str) -> Option<Self> {
        match action {
            "set" | "create" | "update" | "compareAndSwap" => Some(Self::Upsert),
            "delete" | "expire" | "compareAndDelete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Short name used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single notification from the key-value store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Full key path.
    pub key: String,
    /// What happened to it.
    pub action: Action,
}

impl ChangeEvent {
    /// Create a new change event.
    pub fn new(key: impl Into<String>, action: Action) -> Self {
        Self {
            key: key.into(),
            action,
        }
    }
}

/// Why a key could not be turned into a [`Record`].
///
/// Rejected keys are dropped for good; replaying them would fail the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectedKey {
    /// Wrong number of path segments.
    #[error("unexpected key {key}: {segments} segments, expected 5")]
    SegmentCount {
        /// The offending key.
        key: String,
        /// How many segments it had.
        segments: usize,
    },

    /// IP is not four all-digit octets.
    #[error("unexpected ip {ip}")]
    InvalidIp {
        /// The offending IP text.
        ip: String,
    },

    /// Hostname is not `<label>.<domain>`.
    #[error("unexpected hostname {hostname} for domain {domain}")]
    InvalidHostname {
        /// The offending hostname.
        hostname: String,
        /// Domain it was checked against.
        domain: String,
    },
}

/// A validated hostname → IPv4 binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    domain: String,
    hostname: String,
    ip: String,
}

impl Record {
    /// Decode a change-event key.
    pub fn parse(key: &str) -> Result<Self, RejectedKey> {
        let segments: Vec<&str> = key.split('/').collect();
        let &[_, _, domain, hostname, ip] = segments.as_slice() else {
            return Err(RejectedKey::SegmentCount {
                key: key.to_string(),
                segments: segments.len(),
            });
        };

        Self::new(domain, hostname, ip)
    }

    /// Build a record from its parts, applying the same checks as [`Record::parse`].
    pub fn new(domain: &str, hostname: &str, ip: &str) -> Result<Self, RejectedKey> {
        verify_ip(ip)?;
        verify_hostname(hostname, domain)?;

        Ok(Self {
            domain: domain.to_string(),
            hostname: hostname.to_string(),
            ip: ip.to_string(),
        })
    }

    /// Forward zone name.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Fully qualified hostname (without trailing dot).
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Dotted IPv4 text exactly as it appeared in the key.
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Hostname with the `.<domain>` suffix removed.
    pub fn short_label(&self) -> &str {
        &self.hostname[..self.hostname.len() - self.domain.len() - 1]
    }

    /// The four octets of the IP.
    pub fn octets(&self) -> [&str; 4] {
        let mut parts = self.ip.splitn(4, '.');
        // Four parts are guaranteed by verify_ip.
        std::array::from_fn(|_| parts.next().unwrap_or_default())
    }

    /// First three octets joined with dots (e.g. "10.0.0").
    pub fn network(&self) -> String {
        let [a, b, c, _] = self.octets();
        format!("{a}.{b}.{c}")
    }

    /// Last octet, the key of the PTR line.
    pub fn last_octet(&self) -> &str {
        self.octets()[3]
    }

    /// Reverse zone name (e.g. "0.0.10.in-addr.arpa" for 10.0.0.7).
    pub fn reverse_zone(&self) -> String {
        let [a, b, c, _] = self.octets();
        format!("{c}.{b}.{a}.in-addr.arpa")
    }
}

fn verify_ip(ip: &str) -> Result<(), RejectedKey> {
    let parts: Vec<&str> = ip.split('.').collect();
    let all_digits = parts
        .iter()
        .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));

    if parts.len() != 4 || !all_digits {
        return Err(RejectedKey::InvalidIp { ip: ip.to_string() });
    }
    Ok(())
}

fn verify_hostname(hostname: &str, domain: &str) -> Result<(), RejectedKey> {
    let suffix = format!(".{domain}");
    let parts: Vec<&str> = hostname.split(suffix.as_str()).collect();

    match parts.as_slice() {
        [label, ""] if is_host_label(label) && !domain.is_empty() => Ok(()),
        _ => Err(RejectedKey::InvalidHostname {
            hostname: hostname.to_string(),
            domain: domain.to_string(),
        }),
    }
}

/// Dot-separated letters, digits, `-` and `_`. Anything else (`@`, `$TTL`,
/// `*`, whitespace) would be read as zone file syntax rather than a name.
fn is_host_label(label: &str) -> bool {
    label.split('.').all(|part| {
        !part.is_empty()
            && part
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    })
}
