//! Line-oriented edits of zone files and the main nameserver configuration.
//!
//! A zone line "matches" a key when it starts with the key followed by
//! whitespace. Its value is the last whitespace-separated token.
//! Directives (`$TTL`), apex lines (`@`), comments and indented SOA
//! continuation lines are header material and never match:
//!
//! ```text
//! web1 IN A 10.0.0.5            key "web1", value "10.0.0.5"
//! 5 IN PTR web1.ops.example.com key "5",    value "web1.ops.example.com"
//! ```
//!
//! In-place edits never rewrite the head of a file. The tail after the
//! affected line is read, the file is truncated at the line's offset and the
//! replacement plus the saved tail is written back in one call. New files are
//! written to a temporary sibling and renamed into place.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::SyncError;

/// Result of [`upsert_line`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A line with the same key and value already exists; nothing written.
    Duplicate,
    /// A line with the same key but another value was replaced.
    Replaced {
        /// The line that was overwritten, without its newline.
        previous: String,
    },
    /// No line had the key; the new line was appended.
    Appended,
}

/// A line located inside a file's contents.
struct Located<'a> {
    /// Byte offset of the first character of the line.
    start: usize,
    /// Byte offset just past the line's newline (or end of content).
    end: usize,
    /// Line text without its newline.
    text: &'a str,
}

/// Whether `line` can hold a host record at all.
fn is_record_line(line: &str) -> bool {
    line.chars()
        .next()
        .is_some_and(|c| !c.is_whitespace() && !matches!(c, '$' | '@' | ';' | '(' | ')'))
}

fn line_has_key(line: &str, key: &str) -> bool {
    if !is_record_line(line) {
        return false;
    }
    line.strip_prefix(key)
        .and_then(|rest| rest.chars().next())
        .is_some_and(char::is_whitespace)
}

fn line_value(line: &str) -> Option<&str> {
    line.split_whitespace().last()
}

fn lines_with_offsets(content: &str) -> impl Iterator<Item = Located<'_>> {
    let mut offset = 0;
    content.split_inclusive('\n').map(move |raw| {
        let start = offset;
        offset += raw.len();
        Located {
            start,
            end: offset,
            text: raw.trim_end_matches(['\n', '\r']),
        }
    })
}

fn open_rw(file: &Path) -> io::Result<(File, String)> {
    let mut handle = OpenOptions::new().read(true).write(true).open(file)?;
    let mut content = String::new();
    handle.read_to_string(&mut content)?;
    Ok((handle, content))
}

/// Truncate at `offset` and write `replacement` followed by `tail`.
fn splice(handle: &mut File, offset: usize, replacement: &str, tail: &str) -> io::Result<()> {
    let offset = offset as u64;
    handle.set_len(offset)?;
    handle.seek(SeekFrom::Start(offset))?;
    handle.write_all(format!("{replacement}{tail}").as_bytes())?;
    handle.sync_data()
}

fn append(handle: &mut File, content: &str, line: &str) -> io::Result<()> {
    let separator = if content.is_empty() || content.ends_with('\n') {
        ""
    } else {
        "\n"
    };
    handle.seek(SeekFrom::End(0))?;
    handle.write_all(format!("{separator}{line}\n").as_bytes())?;
    handle.sync_data()
}

/// Insert or update the line for `key`.
///
/// `token` is the value the line should carry. A missing file is reported
/// as [`io::ErrorKind::NotFound`] so the caller can create it with a header.
pub fn upsert_line(file: &Path, key: &str, line: &str, token: &str) -> io::Result<UpsertOutcome> {
    let (mut handle, content) = open_rw(file)?;

    let mut first_match: Option<Located<'_>> = None;
    for located in lines_with_offsets(&content) {
        if !line_has_key(located.text, key) {
            continue;
        }
        if line_value(located.text) == Some(token) {
            warn!(
                file = %file.display(),
                key,
                existing = %located.text,
                "record already exists, leaving zone file unchanged"
            );
            return Ok(UpsertOutcome::Duplicate);
        }
        if first_match.is_none() {
            first_match = Some(located);
        }
    }

    match first_match {
        Some(located) => {
            let previous = located.text.to_string();
            let tail = &content[located.end..];
            splice(&mut handle, located.start, &format!("{line}\n"), tail)?;
            debug!(file = %file.display(), key, %previous, new = line, "replaced record");
            Ok(UpsertOutcome::Replaced { previous })
        }
        None => {
            append(&mut handle, &content, line)?;
            debug!(file = %file.display(), key, new = line, "appended record");
            Ok(UpsertOutcome::Appended)
        }
    }
}

/// Remove the line for `key` carrying `token`.
///
/// Fails with [`SyncError::NotFound`] when no such line exists, including
/// when the file itself does not exist. The file is untouched in that case.
pub fn delete_line(file: &Path, key: &str, token: &str) -> Result<(), SyncError> {
    let not_found = || SyncError::NotFound {
        file: file.to_path_buf(),
        key: key.to_string(),
        token: token.to_string(),
    };

    let (mut handle, content) = match open_rw(file) {
        Ok(opened) => opened,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(e.into()),
    };

    let located = lines_with_offsets(&content)
        .find(|l| line_has_key(l.text, key) && line_value(l.text) == Some(token))
        .ok_or_else(not_found)?;

    let tail = &content[located.end..];
    splice(&mut handle, located.start, "", tail)?;
    debug!(file = %file.display(), key, removed = %located.text, "deleted record");
    Ok(())
}

/// Make sure `main_conf` has an `include` line for `fragment`.
///
/// Returns `true` when a line was appended.
pub fn ensure_include(main_conf: &Path, fragment: &Path) -> io::Result<bool> {
    let (mut handle, content) = open_rw(main_conf)?;
    let wanted = fragment.to_string_lossy();

    let present = content
        .lines()
        .filter(|line| line.starts_with("include"))
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|target| {
            target
                .trim_end_matches(';')
                .trim_matches('"')
                .trim_matches('\'')
        })
        .any(|target| target == wanted);

    if present {
        return Ok(false);
    }

    append(&mut handle, &content, &include_directive(fragment))?;
    debug!(conf = %main_conf.display(), fragment = %wanted, "added include directive");
    Ok(true)
}

/// Render the include line for a configuration fragment.
pub fn include_directive(fragment: &Path) -> String {
    format!("include \"{}\";", fragment.display())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Create `path` with `contents`, failing if it already exists.
///
/// The data is written to a temporary sibling first and renamed into place
/// so a crash never leaves a half-written file behind.
pub fn create_file(path: &Path, contents: &str) -> io::Result<()> {
    if path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", path.display()),
        ));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_sibling(path);
    let mut file = File::create(&temp_path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)
}

/// Create a zone file holding `header` followed by the first record `line`.
pub fn create_with_header(file: &Path, header: &str, line: &str) -> io::Result<()> {
    create_file(file, &format!("{header}{line}\n"))?;
    debug!(file = %file.display(), new = line, "created zone file");
    Ok(())
}
