// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pure helpers of the two-stage resolution pipeline: extracting the content
//! location from a metadata response, and choosing the file name to store.

use serde_json::Value;

use super::store::{MARKER_FILE, PART_SUFFIX};
use crate::net::FetchResponse;

/// File name used when neither the server nor the metadata suggests one.
pub const FALLBACK_FILENAME: &str = "asset";

const SECURE_SCHEME: &str = "https://";

/// Content location extracted from a metadata response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub url: String,
    pub filename: String,
}

/// Extract the content URL and suggested file name from a metadata body.
///
/// The document is searched depth-first for the first string member named
/// `url` and the first named `filename` or `file_name`, so both flat and
/// nested (GraphQL style) responses work. Fails closed: on error the name of
/// the unusable field is returned.
pub fn parse_metadata(body: &str) -> Result<ResolvedAsset, &'static str> {
    let document: Value = serde_json::from_str(body).map_err(|_| "body")?;

    let url = find_string(&document, &["url"]).ok_or("url")?;
    if !url.starts_with(SECURE_SCHEME) || url.len() == SECURE_SCHEME.len() {
        return Err("url");
    }

    let filename = find_string(&document, &["filename", "file_name"])
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or("filename")?;

    Ok(ResolvedAsset {
        url: url.to_string(),
        filename: filename.to_string(),
    })
}

fn find_string<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    match value {
        Value::Object(map) => {
            for key in keys {
                if let Some(Value::String(found)) = map.get(*key) {
                    return Some(found.as_str());
                }
            }
            map.values().find_map(|child| find_string(child, keys))
        }
        Value::Array(items) => items.iter().find_map(|child| find_string(child, keys)),
        _ => None,
    }
}

/// File name to store fetched content under.
///
/// A name advertised in `Content-Disposition` wins over `hint`; unusable names
/// fall through to the next candidate and finally to [`FALLBACK_FILENAME`].
pub fn resolve_filename(response: &FetchResponse, hint: &str) -> String {
    response
        .header("content-disposition")
        .and_then(filename_from_content_disposition)
        .and_then(|name| sanitize_filename(&name))
        .or_else(|| sanitize_filename(hint))
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

/// Parse the file name out of a `Content-Disposition` header value.
///
/// `filename*=UTF-8''...` takes precedence over `filename=`.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in split_params(value) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                // charset'language'percent-encoded
                if let Some(encoded) = raw.trim().splitn(3, '\'').nth(2) {
                    extended = percent_decode(encoded);
                }
            }
            "filename" => plain = Some(unquote(raw.trim())),
            _ => {}
        }
    }

    extended.or(plain).filter(|name| !name.is_empty())
}

/// Split header parameters on `;`, ignoring separators inside quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (index, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                params.push(value[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    params.push(value[start..].trim());
    params
}

/// Strip surrounding quotes and resolve `\x` escapes of a quoted string.
fn unquote(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"') else {
        return raw.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

/// Reduce `name` to a safe single path component, or `None` if nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let last = name.rsplit(|c: char| c == '/' || c == '\\').next()?.trim();

    if last.is_empty()
        || last == "."
        || last == ".."
        || last == MARKER_FILE
        || last.ends_with(PART_SUFFIX)
        || last.chars().any(char::is_control)
    {
        return None;
    }
    Some(last.to_string())
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flat_metadata() {
        let body = r#"{"url": "https://cdn.example.com/a/b.glb?sig=1", "filename": "b.glb"}"#;
        let resolved = parse_metadata(body).unwrap();
        assert_eq!(resolved.url, "https://cdn.example.com/a/b.glb?sig=1");
        assert_eq!(resolved.filename, "b.glb");
    }

    #[test]
    fn test_parse_nested_metadata() {
        let body = r#"{
            "data": {
                "asset": {
                    "id": "1234",
                    "versions": [
                        {"file_name": "scene.usdz", "url": "https://cdn.example.com/scene"}
                    ]
                }
            }
        }"#;
        let resolved = parse_metadata(body).unwrap();
        assert_eq!(resolved.url, "https://cdn.example.com/scene");
        assert_eq!(resolved.filename, "scene.usdz");
    }

    #[test]
    fn test_parse_fails_closed() {
        assert_eq!(parse_metadata("not json"), Err("body"));
        assert_eq!(parse_metadata(r#"{"filename": "a"}"#), Err("url"));
        assert_eq!(parse_metadata(r#"{"url": "http://cdn/a", "filename": "a"}"#), Err("url"));
        assert_eq!(parse_metadata(r#"{"url": "https://", "filename": "a"}"#), Err("url"));
        assert_eq!(parse_metadata(r#"{"url": 5, "filename": "a"}"#), Err("url"));
        assert_eq!(parse_metadata(r#"{"url": "https://cdn/a"}"#), Err("filename"));
        assert_eq!(
            parse_metadata(r#"{"url": "https://cdn/a", "filename": "  "}"#),
            Err("filename")
        );
    }

    #[test]
    fn test_content_disposition_variants() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"model.glb\"").as_deref(),
            Some("model.glb")
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename=model.glb").as_deref(),
            Some("model.glb")
        );
        assert_eq!(
            filename_from_content_disposition(
                "attachment; filename=\"fallback.glb\"; filename*=UTF-8''mod%C3%A8le%20v2.glb"
            )
            .as_deref(),
            Some("modèle v2.glb")
        );
        assert_eq!(filename_from_content_disposition("inline"), None);
        assert_eq!(filename_from_content_disposition("attachment; filename=\"\""), None);
    }

    #[test]
    fn test_quoted_filename_may_contain_separators() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"a;b.glb\"").as_deref(),
            Some("a;b.glb")
        );
        assert_eq!(
            filename_from_content_disposition(r#"attachment; filename="say \"hi\";.txt"; size=3"#)
                .as_deref(),
            Some("say \"hi\";.txt")
        );

        let response = FetchResponse::success(b"x".to_vec())
            .with_header("Content-Disposition", "attachment; filename=\"report;v2.pdf\"");
        assert_eq!(resolve_filename(&response, "hint.pdf"), "report;v2.pdf");
    }

    #[test]
    fn test_percent_decoding_requires_hex_digits() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename*=UTF-8''a%+1b"),
            None
        );
        assert_eq!(
            filename_from_content_disposition(
                "attachment; filename=\"ok.bin\"; filename*=UTF-8''a%-1b"
            )
            .as_deref(),
            Some("ok.bin")
        );
        assert_eq!(percent_decode("a%41b").as_deref(), Some("aAb"));
        assert_eq!(percent_decode("a%4"), None);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("C:\\temp\\a.bin").as_deref(), Some("a.bin"));
        assert_eq!(sanitize_filename("dir/"), None);
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename("timestamp"), None);
        assert_eq!(sanitize_filename("file.part"), None);
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("a\u{1}b"), None);
        assert_eq!(sanitize_filename("line\nbreak.txt"), None);
    }

    #[test]
    fn test_header_filename_wins_over_hint() {
        let response = FetchResponse::success(b"x".to_vec())
            .with_header("Content-Disposition", "attachment; filename=\"server.glb\"");
        assert_eq!(resolve_filename(&response, "metadata.glb"), "server.glb");
    }

    #[test]
    fn test_hint_and_fallback() {
        let plain = FetchResponse::success(b"x".to_vec());
        assert_eq!(resolve_filename(&plain, "metadata.glb"), "metadata.glb");
        assert_eq!(resolve_filename(&plain, "timestamp"), FALLBACK_FILENAME);

        let unsafe_header = plain.with_header("content-disposition", "attachment; filename=\"..\"");
        assert_eq!(resolve_filename(&unsafe_header, "metadata.glb"), "metadata.glb");
    }
}
