//! Where a record's zone lives on disk and what new files look like.

use std::fmt::Write;
use std::path::PathBuf;

use crate::config::SyncConfig;
use crate::record::Record;

/// The two zones every record lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneKind {
    /// hostname → A record, keyed by the short hostname label.
    Forward,
    /// last octet → PTR record, keyed by the octet.
    Reverse,
}

impl ZoneKind {
    /// Short name used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Reverse => "reverse",
        }
    }
}

/// A zone derived from a record plus the files that back it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneTarget {
    /// Forward or reverse.
    pub kind: ZoneKind,
    /// Zone name, e.g. "ops.example.com" or "0.0.10.in-addr.arpa".
    pub zone: String,
    /// Zone file name relative to the zone directory, e.g. "10.0.0.zone".
    pub file_name: String,
    /// Absolute zone file path.
    pub zone_file: PathBuf,
    /// Configuration fragment declaring the zone.
    pub fragment: PathBuf,
}

impl ZoneTarget {
    /// The forward zone for `record`.
    pub fn forward(config: &SyncConfig, record: &Record) -> Self {
        Self::build(config, ZoneKind::Forward, record.domain().to_string(), record.domain())
    }

    /// The reverse zone for `record`, keyed on disk by its /24 network.
    pub fn reverse(config: &SyncConfig, record: &Record) -> Self {
        Self::build(config, ZoneKind::Reverse, record.reverse_zone(), &record.network())
    }

    fn build(config: &SyncConfig, kind: ZoneKind, zone: String, stem: &str) -> Self {
        let file_name = format!("{stem}.zone");
        Self {
            kind,
            zone,
            zone_file: config.zone_dir.join(&file_name),
            fragment: config.conf_dir.join(format!("{stem}.conf")),
            file_name,
        }
    }

    /// Key of the record's line in this zone.
    pub fn key<'r>(&self, record: &'r Record) -> &'r str {
        match self.kind {
            ZoneKind::Forward => record.short_label(),
            ZoneKind::Reverse => record.last_octet(),
        }
    }

    /// Value the record's line carries in this zone.
    pub fn token<'r>(&self, record: &'r Record) -> &'r str {
        match self.kind {
            ZoneKind::Forward => record.ip(),
            ZoneKind::Reverse => record.hostname(),
        }
    }

    /// The record's line in this zone.
    pub fn line(&self, record: &Record) -> String {
        let rtype = match self.kind {
            ZoneKind::Forward => "A",
            ZoneKind::Reverse => "PTR",
        };
        format!("{} IN {} {}", self.key(record), rtype, self.token(record))
    }

    /// Zone declaration written to the fragment file.
    pub fn fragment_contents(&self) -> String {
        format!(
            "zone \"{zone}\" IN {{\n    type master;\n    file \"{file}\";\n    allow-update {{ none; }};\n}};\n",
            zone = self.zone,
            file = self.file_name,
        )
    }

    /// SOA/NS header (plus nameserver bootstrap records) for a new zone file.
    pub fn header(&self, config: &SyncConfig) -> String {
        let soa = &config.soa;
        let ns_zone = &config.ns_zone;
        let mut out = String::new();

        // Writing to a String cannot fail.
        let _ = writeln!(out, "$TTL {}", soa.ttl);
        let _ = writeln!(out, "@   IN  SOA  {}    root.{}. (", soa.mname, ns_zone);
        let _ = writeln!(out, "            {:<12};Serial", soa.serial);
        let _ = writeln!(out, "            {:<12};Refresh", soa.refresh);
        let _ = writeln!(out, "            {:<12};Retry", soa.retry);
        let _ = writeln!(out, "            {:<12};Expire", soa.expire);
        let _ = writeln!(out, "            {:<12};Minimum TTL", soa.minimum);
        let _ = writeln!(out, ")");

        for ns in &config.nameservers {
            let _ = writeln!(out, "@ IN NS {}.{}.", ns.label, ns_zone);
        }
        for ns in &config.nameservers {
            match self.kind {
                ZoneKind::Forward => {
                    let _ = writeln!(out, "{} IN A {}", ns.label, ns.address);
                }
                ZoneKind::Reverse => {
                    let _ = writeln!(
                        out,
                        "{} IN PTR {}.{}.",
                        ns.address.octets()[3],
                        ns.label,
                        ns_zone
                    );
                }
            }
        }

        out
    }
}
