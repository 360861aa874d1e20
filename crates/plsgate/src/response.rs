//! Turning raw generated output into status, headers and body.
//!
//! Generated pages may open with a CGI-style header block (`Location:`,
//! `Set-Cookie:`, `Content-type:`, `Status:` or any `Name: value` line)
//! terminated by a blank line. Everything after it is the body.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};

use crate::output::GeneratedOutput;

/// Appended to every generated content type.
pub const CHARSET_SUFFIX: &str = "; charset=UTF-8";
pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_type: String,
    /// Extra headers in generated order, `Set-Cookie` possibly repeated.
    pub headers: Vec<(String, String)>,
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self {
            status: 200,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            headers: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub enum ResponseBody {
    /// Redirects carry no body.
    Empty,
    Bytes(Vec<u8>),
    /// `prefix` is what was read past the header block; the rest comes
    /// from `file`, positioned right after it.
    Spooled { prefix: Vec<u8>, file: File },
}

#[derive(Debug)]
pub struct ShapedResponse {
    pub head: ResponseHead,
    pub body: ResponseBody,
}

/// Split generated output into a response head and body.
pub fn shape(output: GeneratedOutput) -> io::Result<ShapedResponse> {
    let mut reader = BufReader::with_capacity(8192, output);
    let (head, prefix) = read_head(&mut reader)?;
    let Some(mut prefix) = prefix else {
        return Ok(ShapedResponse {
            head,
            body: ResponseBody::Empty,
        });
    };

    prefix.extend_from_slice(reader.buffer());
    let body = match reader.into_inner() {
        GeneratedOutput::Memory(mut rest) => {
            rest.read_to_end(&mut prefix)?;
            ResponseBody::Bytes(prefix)
        }
        GeneratedOutput::Spooled(file) => ResponseBody::Spooled { prefix, file },
    };
    Ok(ShapedResponse { head, body })
}

/// Parse the optional header block.
///
/// Returns the body bytes consumed so far, or `None` for a redirect.
fn read_head<R: BufRead>(reader: &mut R) -> io::Result<(ResponseHead, Option<Vec<u8>>)> {
    let mut head = ResponseHead::default();
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok((head, Some(Vec::new())));
    }
    if !is_header_line(&line) {
        return Ok((head, Some(line.into_bytes())));
    }

    loop {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if apply_header(&mut head, trimmed) == HeaderEffect::Redirect {
            return Ok((head, None));
        }
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
    }
    Ok((head, Some(Vec::new())))
}

fn is_header_line(line: &str) -> bool {
    match line.split_once(':') {
        Some((name, rest)) => is_header_name(name) && rest.starts_with(' '),
        None => false,
    }
}

fn is_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

#[derive(Debug, PartialEq, Eq)]
enum HeaderEffect {
    Continue,
    Redirect,
}

fn apply_header(head: &mut ResponseHead, line: &str) -> HeaderEffect {
    let Some((name, value)) = line.split_once(':').filter(|(n, _)| is_header_name(n)) else {
        tracing::warn!(line, "Ignoring malformed generated header");
        return HeaderEffect::Continue;
    };
    let value = value.trim();

    if name.eq_ignore_ascii_case("location") {
        tracing::trace!(location = value, "Generated redirect");
        head.status = 302;
        head.headers.push(("Location".to_string(), value.to_string()));
        return HeaderEffect::Redirect;
    }
    if name.eq_ignore_ascii_case("content-type") {
        head.content_type = format!("{value}{CHARSET_SUFFIX}");
    } else if name.eq_ignore_ascii_case("status") {
        match value
            .split_whitespace()
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .filter(|code| (100..=999).contains(code))
        {
            Some(code) => head.status = code,
            None => tracing::warn!(value, "Ignoring invalid generated Status header"),
        }
    } else if name.eq_ignore_ascii_case("set-cookie") {
        head.headers.push(("Set-Cookie".to_string(), value.to_string()));
    } else {
        head.headers.push((name.to_string(), value.to_string()));
    }
    HeaderEffect::Continue
}
