use std::borrow::Cow;
use std::fs;
use std::io::Read;

use camino::Utf8Path;
use flate2::read::GzDecoder;

use crate::domain::SourceDocument;
use crate::error::OlmstedError;

pub fn is_gzip(path: &Utf8Path) -> bool {
    path.extension() == Some("gz")
}

/// Reads `path` as UTF-8 text, gunzipping `.gz` files on the fly.
pub fn read_text(path: &Utf8Path) -> Result<String, OlmstedError> {
    let bytes = fs::read(path.as_std_path())
        .map_err(|err| OlmstedError::Filesystem(format!("read {path}: {err}")))?;
    if !is_gzip(path) {
        return String::from_utf8(bytes)
            .map_err(|err| OlmstedError::InvalidInput(format!("{path} is not UTF-8: {err}")));
    }
    let mut decoder = GzDecoder::new(bytes.as_slice());
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .map_err(|err| OlmstedError::Filesystem(format!("gunzip {path}: {err}")))?;
    Ok(text)
}

/// `.csv` and `.csv.gz` files load as CSV text; everything else must be JSON.
pub fn load_document(path: &Utf8Path) -> Result<SourceDocument, OlmstedError> {
    let text = read_text(path)?;
    let stem = if is_gzip(path) {
        Utf8Path::new(path.file_stem().unwrap_or_default())
    } else {
        path
    };
    if stem.extension() == Some("csv") {
        return Ok(SourceDocument::Csv(text));
    }
    serde_json::from_str(&null_non_finite(&text))
        .map(SourceDocument::Json)
        .map_err(|err| OlmstedError::Json(format!("{path}: {err}")))
}

const NON_FINITE: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

/// Replaces bare `Infinity`, `-Infinity` and `NaN` tokens with `null`.
///
/// Float dumps from upstream tools may carry these tokens, which serde_json rejects.
/// Text inside string literals is left alone.
pub fn null_non_finite(text: &str) -> Cow<'_, str> {
    if !NON_FINITE.iter().any(|token| text.contains(token)) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = text;
    while let Some(ch) = rest.chars().next() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
        } else if ch == '"' {
            in_string = true;
        } else if let Some(token) = NON_FINITE.iter().find(|token| rest.starts_with(**token)) {
            out.push_str("null");
            rest = &rest[token.len()..];
            continue;
        }
        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    Cow::Owned(out)
}
