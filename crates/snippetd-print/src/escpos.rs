// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ESC/POS framing for receipt printers.
//
// Two framings exist.  Raw snippets are passed through untouched between a
// printer reset and a newline; callers own any control codes in the body.
// Formatted snippets get a centred small-print timestamp, the body between
// two rules, a right-aligned `#id @ source` footer and enough feed for the
// cutter to clear the text.
//
// The opcodes below are the wire contract with the device and must stay
// byte-exact.

use chrono::{DateTime, Utc};
use snippetd_core::types::{Framing, Snippet};

/// ESC @: initialise printer.
pub const RESET: &[u8] = b"\x1b\x40";

/// ESC a 0: left justification.
pub const ALIGN_LEFT: &[u8] = b"\x1b\x61\x00";

/// ESC a 1: centred.
pub const ALIGN_CENTER: &[u8] = b"\x1b\x61\x01";

/// ESC a 2: right justification.
pub const ALIGN_RIGHT: &[u8] = b"\x1b\x61\x02";

/// ESC M 1: select font B (small).
pub const SMALL_ON: &[u8] = b"\x1b\x4d\x01";

/// ESC M 0: back to font A.
pub const SMALL_OFF: &[u8] = b"\x1b\x4d\x00";

/// Rule printed above and below the body; one full line on a 58 mm head.
pub const SEPARATOR: &[u8] = b"--------------------------------";

/// Blank lines fed after the footer so the cutter clears the print.
pub const CUTTER_FEED_LINES: usize = 3;

/// Header timestamp layout, e.g. `2026-01-02 15:04:05 UTC`.
pub const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

/// Render `snippet` into `out`, replacing its previous contents.
///
/// `out` is a scratch buffer owned by the caller so the worker can reuse one
/// allocation for every job.
pub fn render(snippet: &Snippet, out: &mut Vec<u8>) {
    out.clear();
    match snippet.framing() {
        Framing::Raw => render_raw(&snippet.body, out),
        Framing::Formatted => render_formatted(snippet, out),
    }
}

/// Convenience wrapper around [`render`] that allocates.
pub fn format(snippet: &Snippet) -> Vec<u8> {
    let mut out = Vec::with_capacity(snippet.body.len() + 128);
    render(snippet, &mut out);
    out
}

/// `RESET + body + "\n"`.
pub fn render_raw(body: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(RESET);
    out.extend_from_slice(body);
    out.push(b'\n');
}

/// Header, ruled body, footer and cutter feed.
pub fn render_formatted(snippet: &Snippet, out: &mut Vec<u8>) {
    out.extend_from_slice(RESET);
    out.extend_from_slice(ALIGN_CENTER);
    out.extend_from_slice(SMALL_ON);
    out.extend_from_slice(stamp(&snippet.timestamp).as_bytes());
    out.extend_from_slice(SMALL_OFF);
    out.push(b'\n');

    out.extend_from_slice(ALIGN_LEFT);
    out.extend_from_slice(SEPARATOR);
    out.push(b'\n');
    out.extend_from_slice(&snippet.body);
    out.push(b'\n');
    out.extend_from_slice(SEPARATOR);
    out.push(b'\n');

    out.extend_from_slice(ALIGN_RIGHT);
    out.extend_from_slice(SMALL_ON);
    out.extend_from_slice(footer(snippet).as_bytes());
    out.extend_from_slice(SMALL_OFF);
    out.push(b'\n');

    out.extend_from_slice(ALIGN_LEFT);
    out.extend(std::iter::repeat_n(b'\n', CUTTER_FEED_LINES));
}

/// Human-readable layout without control codes, for debug logs.
pub fn render_plain(snippet: &Snippet) -> String {
    let rule = String::from_utf8_lossy(SEPARATOR);
    format!(
        "{}\n{rule}\n{}\n{rule}\n{}\n",
        stamp(&snippet.timestamp),
        String::from_utf8_lossy(&snippet.body),
        footer(snippet),
    )
}

fn stamp(ts: &DateTime<Utc>) -> String {
    ts.format(STAMP_FORMAT).to_string()
}

fn footer(snippet: &Snippet) -> String {
    format!("#{} @ {}", snippet.id, snippet.source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use snippetd_core::types::SnippetId;

    fn snippet(body: &[u8], is_raw: bool) -> Snippet {
        Snippet {
            id: SnippetId(42),
            source: "192.168.1.20".into(),
            timestamp: DateTime::parse_from_rfc3339("2026-01-02T15:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
            body: body.to_vec(),
            is_raw,
            is_reprint: false,
        }
    }

    /// Position of `needle` in `haystack` at or after `from`.
    fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
        haystack[from..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|p| p + from)
    }

    #[test]
    fn opcodes_are_byte_exact() {
        assert_eq!(RESET, [0x1Bu8, 0x40]);
        assert_eq!(ALIGN_LEFT, [0x1Bu8, 0x61, 0x00]);
        assert_eq!(ALIGN_CENTER, [0x1Bu8, 0x61, 0x01]);
        assert_eq!(ALIGN_RIGHT, [0x1Bu8, 0x61, 0x02]);
        assert_eq!(SMALL_ON, [0x1Bu8, 0x4D, 0x01]);
        assert_eq!(SMALL_OFF, [0x1Bu8, 0x4D, 0x00]);
        assert_eq!(SEPARATOR.len(), 32);
    }

    #[test]
    fn raw_is_reset_body_newline() {
        let body = b"\x1b\x21\x30BIG\x0a\x1d\x56\x00";
        let out = format(&snippet(body, true));

        let mut expected = RESET.to_vec();
        expected.extend_from_slice(body);
        expected.push(b'\n');
        assert_eq!(out, expected);
    }

    #[test]
    fn formatted_layout_is_byte_exact() {
        let out = format(&snippet(b"hello world", false));

        let mut expected = Vec::new();
        expected.extend_from_slice(b"\x1b\x40\x1b\x61\x01\x1b\x4d\x01");
        expected.extend_from_slice(b"2026-01-02 15:04:05 UTC");
        expected.extend_from_slice(b"\x1b\x4d\x00\n\x1b\x61\x00");
        expected.extend_from_slice(b"--------------------------------\n");
        expected.extend_from_slice(b"hello world\n");
        expected.extend_from_slice(b"--------------------------------\n");
        expected.extend_from_slice(b"\x1b\x61\x02\x1b\x4d\x01#42 @ 192.168.1.20\x1b\x4d\x00\n");
        expected.extend_from_slice(b"\x1b\x61\x00\n\n\n");
        assert_eq!(out, expected);
    }

    #[test]
    fn formatted_sections_appear_in_order() {
        let out = format(&snippet(b"BODY", false));

        let mut pos = 0;
        for part in [
            RESET,
            ALIGN_CENTER,
            SMALL_ON,
            b"UTC".as_slice(),
            SMALL_OFF,
            ALIGN_LEFT,
            SEPARATOR,
            b"BODY".as_slice(),
            SEPARATOR,
            ALIGN_RIGHT,
            SMALL_ON,
            b"#42 @ 192.168.1.20".as_slice(),
            SMALL_OFF,
            ALIGN_LEFT,
        ] {
            pos = find_from(&out, part, pos).expect("section missing or out of order") + part.len();
        }
        assert_eq!(&out[pos..], b"\n\n\n");
    }

    #[test]
    fn render_reuses_and_clears_the_buffer() {
        let mut buf = Vec::with_capacity(4096);
        render(&snippet(b"first, much longer body", false), &mut buf);
        let capacity = buf.capacity();

        render(&snippet(b"2nd", true), &mut buf);
        assert_eq!(buf, b"\x1b\x402nd\n");
        assert_eq!(buf.capacity(), capacity);
    }

    #[test]
    fn plain_rendering_has_no_control_codes() {
        let text = render_plain(&snippet(b"tea", false));
        assert!(!text.contains('\x1b'));
        assert_eq!(
            text,
            "2026-01-02 15:04:05 UTC\n\
             --------------------------------\n\
             tea\n\
             --------------------------------\n\
             #42 @ 192.168.1.20\n"
        );
    }
}
