//! Result decoding: terminal payload → `{filename: document}`.
//!
//! A successful extraction arrives in one of three shapes (inline map,
//! base64 zip, or a handle to a zip fetched separately). The container as a
//! whole either opens or it doesn't ([`DecodeError`]); once open, each entry
//! is judged on its own and a bad entry becomes an [`EntryError`] without
//! affecting its siblings.
//!
//! ## Markup check
//!
//! An entry is accepted only if, after an optional byte-order mark and
//! leading whitespace, it starts with `<?xml` or an opening tag. The backend
//! occasionally writes plain-text error notes into the result set; those
//! must not be recorded as generated documents.

use crate::error::{DecodeError, EntryError, EntryFault};
use crate::job::Payload;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, warn};

/// `<?xml`, `<!DOCTYPE`, `<!--`, or an element name start.
static MARKUP_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*<(\?xml|!|[A-Za-z_])").unwrap());

/// Documents recovered from one payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecodedFiles {
    /// Accepted documents keyed by entry name.
    pub files: BTreeMap<String, String>,
    /// Entries that were present but rejected.
    pub errors: Vec<EntryError>,
    /// Handle for downloading the full archive later, if the backend kept one.
    pub download_handle: Option<String>,
    /// Per-file problems reported by the backend itself.
    pub warnings: Vec<String>,
}

impl DecodedFiles {
    /// Entries seen in the container, accepted or not.
    pub fn total_entries(&self) -> usize {
        self.files.len() + self.errors.len()
    }
}

/// Whether `content` starts with a markup declaration or opening tag.
pub fn looks_like_markup(content: &str) -> bool {
    MARKUP_START.is_match(content.trim_start_matches('\u{feff}'))
}

/// Decode a payload that carries its documents inline.
///
/// [`Payload::Reference`] must be fetched first and passed to
/// [`decode_archive`]; receipts and merged PDFs carry no markup documents.
pub fn decode(payload: &Payload) -> Result<DecodedFiles, DecodeError> {
    match payload {
        Payload::Inline {
            files,
            download_handle,
            warnings,
        } => {
            let mut out = decode_inline(files)?;
            out.download_handle = download_handle.clone();
            out.warnings = warnings.clone();
            Ok(out)
        }
        Payload::Archive { data } => decode_archive(&decode_base64(data)?),
        other => Err(DecodeError::Unsupported(other.kind_name().to_string())),
    }
}

/// Strip the transport encoding of a base64 field.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, DecodeError> {
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))
}

fn decode_inline(entries: &BTreeMap<String, Value>) -> Result<DecodedFiles, DecodeError> {
    if entries.is_empty() {
        return Err(DecodeError::EmptyContainer);
    }
    let mut out = DecodedFiles::default();
    for (name, value) in entries {
        match value {
            Value::String(text) => accept(&mut out, name.clone(), text.clone()),
            other => out.errors.push(EntryError::new(
                name.clone(),
                EntryFault::NotText(json_type(other).to_string()),
            )),
        }
    }
    Ok(out)
}

/// Open a zip container and check every file entry.
///
/// Directory entries are skipped. Entry names are reduced to their final
/// path component unless an earlier entry already took it, in which case
/// the full entry path is kept.
pub fn decode_archive(bytes: &[u8]) -> Result<DecodedFiles, DecodeError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| DecodeError::CorruptArchive(e.to_string()))?;

    let mut out = DecodedFiles::default();
    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Archive entry #{} unreadable: {}", i, e);
                out.errors.push(EntryError::new(
                    format!("#{i}"),
                    EntryFault::Unreadable(e.to_string()),
                ));
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        let name = entry_key(&out, entry.name());

        let mut buf = Vec::new();
        if let Err(e) = entry.read_to_end(&mut buf) {
            warn!("Archive entry '{}' unreadable: {}", name, e);
            out.errors
                .push(EntryError::new(name, EntryFault::Unreadable(e.to_string())));
            continue;
        }
        match String::from_utf8(buf) {
            Ok(text) => accept(&mut out, name, text),
            Err(_) => out.errors.push(EntryError::new(name, EntryFault::NotUtf8)),
        }
    }

    if out.total_entries() == 0 {
        return Err(DecodeError::EmptyContainer);
    }
    debug!(
        "Archive decoded: {} accepted, {} rejected",
        out.files.len(),
        out.errors.len()
    );
    Ok(out)
}

fn accept(out: &mut DecodedFiles, name: String, text: String) {
    if out.files.contains_key(&name) {
        warn!("Entry '{}' appears twice in the container", name);
        out.errors.push(EntryError::new(name, EntryFault::DuplicateName));
    } else if looks_like_markup(&text) {
        out.files.insert(name, text);
    } else {
        out.errors.push(EntryError::new(name, EntryFault::MissingMarker));
    }
}

fn entry_key(out: &DecodedFiles, entry_name: &str) -> String {
    let base = base_name(entry_name);
    if out.files.contains_key(&base) {
        entry_name.trim_start_matches("./").to_string()
    } else {
        base
    }
}

fn base_name(entry_name: &str) -> String {
    Path::new(entry_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| entry_name.to_string())
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
