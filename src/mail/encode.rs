//! Text transforms for alert mail bodies and headers.

/// Escape `&`, `<`, `>` and `"` for inclusion in HTML.
pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Insert `<br />` before every line break, keeping the break itself.
pub fn nl2br(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' if chars.peek() == Some(&'\n') => {
                chars.next();
                out.push_str("<br />\r\n");
            }
            '\r' | '\n' => {
                out.push_str("<br />");
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Plain-text report rendered as an HTML fragment.
pub fn text_to_html(text: &str) -> String {
    nl2br(&html_escape(text))
}

/// Normalize every line ending to CRLF.
pub fn to_crlf(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\n', "\r\n")
}

/// Longest encoded line before a soft break, per RFC 2045.
const QP_LINE_LIMIT: usize = 76;

/// Quoted-printable encode a CRLF-delimited body.
///
/// Hard line breaks stay literal, trailing whitespace before a break is
/// encoded, and lines are soft-wrapped so none exceeds 76 characters.
pub fn quoted_printable(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut lines = text.split("\r\n").peekable();
    while let Some(line) = lines.next() {
        encode_qp_line(line, &mut out);
        if lines.peek().is_some() {
            out.push_str("\r\n");
        }
    }
    out
}

fn encode_qp_line(line: &str, out: &mut String) {
    let bytes = line.as_bytes();
    let mut width: usize = 0;
    for (index, &byte) in bytes.iter().enumerate() {
        let is_last = index.saturating_add(1) == bytes.len();
        let token = match byte {
            b' ' | b'\t' if is_last => format!("={byte:02X}"),
            b'=' => "=3D".to_owned(),
            b' ' | b'\t' | 33..=126 => char::from(byte).to_string(),
            _ => format!("={byte:02X}"),
        };
        // Leave room for the trailing '=' of a soft break.
        if width.saturating_add(token.len()) > QP_LINE_LIMIT.saturating_sub(1) {
            out.push_str("=\r\n");
            width = 0;
        }
        width = width.saturating_add(token.len());
        out.push_str(&token);
    }
}

/// Encode a header word as RFC 2047 `Q` encoding when it is not plain ASCII.
pub fn encode_header_word(word: &str) -> String {
    if word.bytes().all(|b| (32..127).contains(&b)) {
        return word.to_owned();
    }
    let mut out = String::from("=?UTF-8?Q?");
    for byte in word.bytes() {
        match byte {
            b' ' => out.push('_'),
            b'=' | b'?' | b'_' => out.push_str(&format!("={byte:02X}")),
            33..=126 => out.push(char::from(byte)),
            _ => out.push_str(&format!("={byte:02X}")),
        }
    }
    out.push_str("?=");
    out
}
