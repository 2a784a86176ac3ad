//! Strict character decoding. A file that does not decode cleanly under its
//! resolved encoding fails the run with the filename attached, so the
//! override table can be corrected; silent replacement would corrupt the
//! combined output downstream.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

use crate::error::{Result, ScraperError};

/// Resolve an encoding label from the configuration. `latin-1` is served by
/// windows-1252, its superset on the web and in every COD export seen so far.
pub fn lookup(label: &str) -> Option<&'static Encoding> {
    match label.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "utf-8-sig" => Some(UTF_8),
        "latin-1" | "latin1" | "iso-8859-1" | "windows-1252" => Some(WINDOWS_1252),
        other => Encoding::for_label(other.as_bytes()),
    }
}

/// True when `label` names a latin-1 flavor, which gets mojibake repair on
/// admin names.
pub fn is_latin1(label: &str) -> bool {
    matches!(
        label.to_ascii_lowercase().as_str(),
        "latin-1" | "latin1" | "iso-8859-1" | "windows-1252"
    )
}

/// Decode `bytes` under the resolved encoding, without replacement. Invalid
/// byte sequences fail with the filename so the exception table can be fixed.
pub fn decode(filename: &str, bytes: &[u8], label: &str) -> Result<String> {
    let encoding = lookup(label).ok_or_else(|| {
        ScraperError::Config(format!("unknown encoding {label:?} for {filename}"))
    })?;
    let bytes = if encoding == UTF_8 {
        bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes)
    } else {
        bytes
    };
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
        .ok_or_else(|| ScraperError::Decoding {
            filename: filename.to_string(),
            encoding: label.to_string(),
        })
}

/// Repair admin names that were written as UTF-8 but served as latin-1:
/// re-encoding the decoded characters and reading the bytes back as UTF-8
/// recovers the intended text when it round-trips cleanly. Anything that
/// does not round-trip is returned untouched.
pub fn repair_latin1(name: &str) -> String {
    if name.is_ascii() {
        return name.to_string();
    }
    let (bytes, _, had_unmappable) = WINDOWS_1252.encode(name);
    if had_unmappable {
        return name.to_string();
    }
    match std::str::from_utf8(&bytes) {
        Ok(repaired) if repaired != name => repaired.to_string(),
        _ => name.to_string(),
    }
}
