//! Raw response header block parsing.

use indexmap::IndexMap;

use crate::{Error, Result};

/// Ordered header name -> value mapping. Later duplicates overwrite earlier ones.
pub type Headers = IndexMap<String, String>;

/// Parse a raw header block as received on the wire (status line included).
///
/// The block is decoded as UTF-8. Bytes that are not valid UTF-8 (for example a
/// Latin-1 `filename=` value) are replaced with U+FFFD and cannot be recovered from
/// the parsed map.
///
/// Line endings are normalized to LF and folded continuation lines are joined
/// with a single space before splitting. The first line is the status line and is
/// skipped, as is any later `HTTP/` line a transport leaves in after interim
/// responses (`100 Continue`, redirects).
///
/// # Errors
/// A non-empty line without a `": "` separator is reported as
/// [`Error::MalformedHeader`](crate::Error::MalformedHeader).
pub fn parse(raw: &[u8]) -> Result<Headers> {
    let text = String::from_utf8_lossy(raw)
        .replace("\r\n", "\n")
        .replace("\n ", " ")
        .replace("\n\t", " ");

    let mut headers = Headers::new();
    for line in text.split('\n').skip(1) {
        if line.is_empty() || line.starts_with("HTTP/") {
            continue;
        }
        match line.split_once(": ") {
            Some((name, value)) => {
                headers.insert(name.to_string(), value.to_string());
            }
            None => return Err(Error::MalformedHeader(line.to_string())),
        }
    }

    Ok(headers)
}

/// Case-insensitive header lookup
pub fn get<'h>(headers: &'h Headers, name: &str) -> Option<&'h str> {
    headers
        .iter()
        .rev()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_block() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nX-Count: 3\r\n\r\n";
        let headers = parse(raw).unwrap();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("Content-Type").unwrap(), "application/json");
        assert_eq!(headers.get("X-Count").unwrap(), "3");
        // insertion order is kept
        assert_eq!(headers.get_index(0).unwrap().0, "Content-Type");
    }

    #[test]
    fn test_folded_equals_unfolded() {
        let folded = b"HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: Digest realm=\"r\",\r\n\tnonce=\"n\"\r\nX-Long: part one\r\n  part two\r\n\r\n";
        let unfolded = b"HTTP/1.1 401 Unauthorized\nWWW-Authenticate: Digest realm=\"r\", nonce=\"n\"\nX-Long: part one  part two\n\n";

        assert_eq!(parse(folded).unwrap(), parse(unfolded).unwrap());
        assert_eq!(
            parse(folded).unwrap().get("WWW-Authenticate").unwrap(),
            "Digest realm=\"r\", nonce=\"n\""
        );
    }

    #[test]
    fn test_last_duplicate_wins() {
        let raw = b"HTTP/1.1 200 OK\nSet-Cookie: a=1\nSet-Cookie: b=2\n";
        let headers = parse(raw).unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Set-Cookie").unwrap(), "b=2");
    }

    #[test]
    fn test_value_keeps_later_separators() {
        let raw = b"HTTP/1.1 200 OK\nX-Note: a: b: c\n";
        assert_eq!(parse(raw).unwrap().get("X-Note").unwrap(), "a: b: c");
    }

    #[test]
    fn test_malformed_line() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type:application/json\r\n";
        assert_eq!(
            parse(raw),
            Err(Error::MalformedHeader("Content-Type:application/json".to_string()))
        );
    }

    #[test]
    fn test_interim_status_lines_skipped() {
        let raw = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nLocation: /items/7\r\n\r\n";
        let headers = parse(raw).unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Location").unwrap(), "/items/7");
    }

    #[test]
    fn test_status_line_only() {
        assert!(parse(b"HTTP/1.1 204 No Content\r\n\r\n").unwrap().is_empty());
        assert!(parse(b"").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Disposition: attachment; filename=caf\xe9.txt\r\n";
        assert_eq!(
            parse(raw).unwrap().get("Content-Disposition").unwrap(),
            "attachment; filename=caf\u{fffd}.txt"
        );
    }

    #[test]
    fn test_case_insensitive_get() {
        let headers = parse(b"HTTP/1.1 401 Unauthorized\nwww-authenticate: Digest x=y\n").unwrap();
        assert_eq!(get(&headers, "WWW-Authenticate"), Some("Digest x=y"));
        assert_eq!(get(&headers, "Location"), None);
    }
}
