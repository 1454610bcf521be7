//! Applies one record change to the forward and reverse zones.
//!
//! ## Upsert
//!
//! ```text
//! web1.ops.example.com → 10.0.0.5
//!   named/ops.example.com.conf   created once, included from named.conf
//!   zones/ops.example.com.zone   "web1 IN A 10.0.0.5"
//!   named/10.0.0.conf            created once, included from named.conf
//!   zones/10.0.0.zone            "5 IN PTR web1.ops.example.com"
//! ```
//!
//! ## Delete
//!
//! Removes the A line (matched by label and IP) and the PTR line (matched by
//! octet and hostname). Fragments and includes are left alone.
//!
//! Moving a hostname to a new IP rewrites its A line but leaves the PTR line
//! of the old address in its reverse zone.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::layout::ZoneTarget;
use crate::metrics::{self, ApplyResult};
use crate::record::{Action, Record};
use crate::zonefile::{self, UpsertOutcome};

/// Zones touched by one [`Synchronizer::apply`] call, as `(zone, file)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TouchedFiles {
    entries: Vec<(String, PathBuf)>,
}

impl TouchedFiles {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a zone, ignoring repeats.
    pub fn insert(&mut self, zone: impl Into<String>, file: impl Into<PathBuf>) {
        let entry = (zone.into(), file.into());
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
    }

    /// Whether nothing was touched.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of zones touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `(zone, file)` pairs in the order they were touched.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries.iter().map(|(z, f)| (z.as_str(), f.as_path()))
    }

    /// Zone file paths in the order they were touched.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|(_, f)| f.as_path())
    }
}

/// Turns validated records into zone file edits.
///
/// Not internally synchronized: the dispatcher is the only caller.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    config: Arc<SyncConfig>,
}

impl Synchronizer {
    /// Create a synchronizer writing into the directories named by `config`.
    pub fn new(config: Arc<SyncConfig>) -> Self {
        Self { config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Apply `action` for `record` to its forward and reverse zones.
    pub fn apply(&self, record: &Record, action: Action) -> Result<TouchedFiles, SyncError> {
        let forward = ZoneTarget::forward(&self.config, record);
        let reverse = ZoneTarget::reverse(&self.config, record);

        debug!(
            action = %action,
            hostname = record.hostname(),
            ip = record.ip(),
            forward = %forward.zone,
            reverse = %reverse.zone,
            "applying record"
        );

        let mut touched = TouchedFiles::new();
        for target in [&forward, &reverse] {
            touched.insert(target.zone.clone(), target.zone_file.clone());
            match action {
                Action::Upsert => self.upsert(target, record)?,
                Action::Delete => self.delete(target, record)?,
            }
        }

        Ok(touched)
    }

    fn upsert(&self, target: &ZoneTarget, record: &Record) -> Result<(), SyncError> {
        self.provision(target)?;

        let line = target.line(record);
        let key = target.key(record);
        let token = target.token(record);

        let result = match zonefile::upsert_line(&target.zone_file, key, &line, token) {
            Ok(UpsertOutcome::Duplicate) => ApplyResult::Duplicate,
            Ok(UpsertOutcome::Replaced { previous }) => {
                info!(zone = %target.zone, %previous, new = %line, "record updated");
                ApplyResult::Replaced
            }
            Ok(UpsertOutcome::Appended) => {
                info!(zone = %target.zone, new = %line, "record added");
                ApplyResult::Appended
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                zonefile::create_with_header(
                    &target.zone_file,
                    &target.header(&self.config),
                    &line,
                )?;
                info!(
                    zone = %target.zone,
                    file = %target.zone_file.display(),
                    new = %line,
                    "zone file created"
                );
                ApplyResult::Created
            }
            Err(e) => return Err(e.into()),
        };

        metrics::record_zone_update(target.kind, Action::Upsert, result);
        Ok(())
    }

    fn delete(&self, target: &ZoneTarget, record: &Record) -> Result<(), SyncError> {
        zonefile::delete_line(&target.zone_file, target.key(record), target.token(record))?;
        info!(zone = %target.zone, key = target.key(record), "record deleted");
        metrics::record_zone_update(target.kind, Action::Delete, ApplyResult::Deleted);
        Ok(())
    }

    /// Create the zone's fragment on first use and include it from the main configuration.
    fn provision(&self, target: &ZoneTarget) -> Result<(), SyncError> {
        if !target.fragment.try_exists()? {
            zonefile::create_file(&target.fragment, &target.fragment_contents())?;
            info!(
                zone = %target.zone,
                fragment = %target.fragment.display(),
                "zone declaration created"
            );
        }

        if zonefile::ensure_include(&self.config.main_conf, &target.fragment)? {
            info!(
                zone = %target.zone,
                conf = %self.config.main_conf.display(),
                "zone included from main configuration"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Log sink shared between a test and its subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    /// Run `f` with warnings and above written to the returned sink.
    fn capture_warnings<T>(f: impl FnOnce() -> T) -> (T, String) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        (result, logs.text())
    }

    fn setup() -> (TempDir, Synchronizer) {
        let dir = TempDir::new().unwrap();
        let config = SyncConfig::rooted_at(dir.path());
        fs::create_dir_all(&config.conf_dir).unwrap();
        fs::create_dir_all(&config.zone_dir).unwrap();
        fs::write(&config.main_conf, "").unwrap();
        (dir, Synchronizer::new(Arc::new(config)))
    }

    fn record(hostname: &str, ip: &str) -> Record {
        Record::new("ops.example.com", hostname, ip).unwrap()
    }

    fn zone(sync: &Synchronizer, name: &str) -> String {
        fs::read_to_string(sync.config().zone_dir.join(name)).unwrap()
    }

    fn record_lines(content: &str, key: &str) -> Vec<String> {
        content
            .lines()
            .filter(|l| l.starts_with(&format!("{key} ")))
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_first_upsert_provisions_both_zones() {
        let (_dir, sync) = setup();
        let touched = sync
            .apply(&record("web1.ops.example.com", "10.0.0.5"), Action::Upsert)
            .unwrap();

        let pairs: Vec<(&str, &Path)> = touched.iter().collect();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, "ops.example.com");
        assert_eq!(pairs[1].0, "0.0.10.in-addr.arpa");

        let forward = zone(&sync, "ops.example.com.zone");
        assert!(forward.starts_with("$TTL 86400\n"));
        assert!(forward.ends_with("ns4 IN A 10.0.0.4\nweb1 IN A 10.0.0.5\n"));

        let reverse = zone(&sync, "10.0.0.zone");
        assert!(reverse.ends_with("4 IN PTR ns4.pro.\n5 IN PTR web1.ops.example.com\n"));

        let conf_dir = &sync.config().conf_dir;
        assert!(conf_dir.join("ops.example.com.conf").exists());
        assert!(conf_dir.join("10.0.0.conf").exists());

        let main = fs::read_to_string(&sync.config().main_conf).unwrap();
        assert_eq!(main.lines().count(), 2);
        assert!(main.contains("ops.example.com.conf\";"));
        assert!(main.contains("10.0.0.conf\";"));
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (_dir, sync) = setup();
        let rec = record("web1.ops.example.com", "10.0.0.5");

        sync.apply(&rec, Action::Upsert).unwrap();
        let forward = zone(&sync, "ops.example.com.zone");
        let reverse = zone(&sync, "10.0.0.zone");
        let main = fs::read_to_string(&sync.config().main_conf).unwrap();

        let (result, logs) = capture_warnings(|| sync.apply(&rec, Action::Upsert));
        result.unwrap();
        let warnings: Vec<&str> = logs
            .lines()
            .filter(|l| l.contains("WARN") && l.contains("record already exists"))
            .collect();
        assert_eq!(warnings.len(), 2, "{logs}");
        assert!(warnings[0].contains("web1"));
        assert!(warnings[1].contains("10.0.0.zone"));

        assert_eq!(zone(&sync, "ops.example.com.zone"), forward);
        assert_eq!(zone(&sync, "10.0.0.zone"), reverse);
        assert_eq!(fs::read_to_string(&sync.config().main_conf).unwrap(), main);
    }

    #[test]
    fn test_fragment_is_not_rewritten() {
        let (_dir, sync) = setup();
        let fragment = sync.config().conf_dir.join("ops.example.com.conf");

        sync.apply(&record("a.ops.example.com", "10.0.0.1"), Action::Upsert)
            .unwrap();
        fs::write(&fragment, "// edited by hand\n").unwrap();
        sync.apply(&record("b.ops.example.com", "10.0.0.2"), Action::Upsert)
            .unwrap();

        assert_eq!(fs::read_to_string(&fragment).unwrap(), "// edited by hand\n");
    }

    #[test]
    fn test_ip_change_replaces_forward_line() {
        let (_dir, sync) = setup();
        sync.apply(&record("h.ops.example.com", "10.0.0.5"), Action::Upsert)
            .unwrap();
        sync.apply(&record("h.ops.example.com", "10.0.0.9"), Action::Upsert)
            .unwrap();

        let forward = zone(&sync, "ops.example.com.zone");
        assert_eq!(record_lines(&forward, "h"), vec!["h IN A 10.0.0.9"]);

        let reverse = zone(&sync, "10.0.0.zone");
        assert_eq!(record_lines(&reverse, "9"), vec!["9 IN PTR h.ops.example.com"]);
    }

    /// Known gap: the PTR line of the previous address is not cleaned up.
    #[test]
    fn test_ip_change_orphans_old_ptr() {
        let (_dir, sync) = setup();
        sync.apply(&record("h.ops.example.com", "10.0.0.5"), Action::Upsert)
            .unwrap();
        sync.apply(&record("h.ops.example.com", "10.0.0.9"), Action::Upsert)
            .unwrap();

        let reverse = zone(&sync, "10.0.0.zone");
        assert_eq!(record_lines(&reverse, "5"), vec!["5 IN PTR h.ops.example.com"]);
    }

    #[test]
    fn test_delete_removes_only_the_record() {
        let (_dir, sync) = setup();
        for (host, ip) in [("h1", "10.0.0.11"), ("h2", "10.0.0.12"), ("h3", "10.0.0.13")] {
            sync.apply(&record(&format!("{host}.ops.example.com"), ip), Action::Upsert)
                .unwrap();
        }

        sync.apply(&record("h2.ops.example.com", "10.0.0.12"), Action::Delete)
            .unwrap();

        let forward = zone(&sync, "ops.example.com.zone");
        assert!(forward.ends_with("h1 IN A 10.0.0.11\nh3 IN A 10.0.0.13\n"));
        let reverse = zone(&sync, "10.0.0.zone");
        assert!(reverse.ends_with("11 IN PTR h1.ops.example.com\n13 IN PTR h3.ops.example.com\n"));
    }

    #[test]
    fn test_delete_unknown_record_fails_without_changes() {
        let (_dir, sync) = setup();
        sync.apply(&record("h1.ops.example.com", "10.0.0.11"), Action::Upsert)
            .unwrap();
        let forward = zone(&sync, "ops.example.com.zone");

        let err = sync
            .apply(&record("ghost.ops.example.com", "10.0.0.99"), Action::Delete)
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { ref key, .. } if key == "ghost"));
        assert_eq!(zone(&sync, "ops.example.com.zone"), forward);
    }

    #[test]
    fn test_delete_in_unprovisioned_zone_is_not_found() {
        let (_dir, sync) = setup();
        let err = sync
            .apply(&record("h.ops.example.com", "10.9.9.9"), Action::Delete)
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
        assert!(!sync.config().conf_dir.join("ops.example.com.conf").exists());
    }

    #[test]
    fn test_missing_main_conf_is_fatal() {
        let (_dir, sync) = setup();
        fs::remove_file(&sync.config().main_conf).unwrap();

        let err = sync
            .apply(&record("h.ops.example.com", "10.0.0.1"), Action::Upsert)
            .unwrap_err();
        assert!(matches!(err, SyncError::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn test_touched_files_dedupes() {
        let mut touched = TouchedFiles::new();
        touched.insert("a", "/z/a.zone");
        touched.insert("a", "/z/a.zone");
        touched.insert("b", "/z/b.zone");
        assert_eq!(touched.len(), 2);
        assert_eq!(
            touched.paths().collect::<Vec<_>>(),
            vec![Path::new("/z/a.zone"), Path::new("/z/b.zone")]
        );
    }
}
