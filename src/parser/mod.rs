//! HAProxy HTTP access-log parser.
//!
//! The format is positional and separator-driven: every field is read by
//! scanning forward for its terminating byte. The whole line is rejected on
//! the first field that does not match; a partially parsed record is never
//! returned.

pub mod cursor;
pub mod retag;

pub use retag::{RetagError, TagRule, apply_rules, TAG_HTTP_URL};

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::domain::HttpLog;
use cursor::Cursor;

/// Timestamp layout used by HAProxy HTTP logs, e.g. `10/Oct/2020:13:55:36.000`.
const TIMESTAMP_FORMAT: &str = "%d/%b/%Y:%H:%M:%S%.3f";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty datagram")]
    EmptyPacket,
    #[error("unterminated syslog priority marker")]
    UnterminatedPriority,
    #[error("missing separator {0:?}")]
    MissingSeparator(char),
    #[error("field is not valid UTF-8")]
    InvalidUtf8,
    #[error("invalid integer field {0:?}")]
    InvalidNumber(String),
    #[error("invalid request timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("empty header capture group")]
    EmptyHeaderCapture,
    #[error("captured header count does not match configuration")]
    HeaderCountMismatch,
}

/// Strip the `<N>` syslog priority marker from a datagram, when present.
///
/// An empty datagram, or a `<` with no closing `>`, is rejected.
pub fn unwrap_packet(packet: &[u8]) -> Result<&[u8], ParseError> {
    if packet.is_empty() {
        return Err(ParseError::EmptyPacket);
    }
    if packet[0] == b'<' {
        let end = packet
            .iter()
            .position(|&b| b == b'>')
            .ok_or(ParseError::UnterminatedPriority)?;
        return Ok(&packet[end + 1..]);
    }
    Ok(packet)
}

/// Parse one UDP datagram: strip syslog framing, then parse the log line.
pub fn parse_packet(packet: &[u8], req_headers: &[String]) -> Result<HttpLog, ParseError> {
    parse(unwrap_packet(packet)?, req_headers)
}

/// Drop a leading `timestamp process[pid]: ` header added by systemd/rsyslog.
///
/// The header is recognized by its `]: ` delimiter after the first bracket
/// pair; a bare log line, whose first bracket is the request timestamp, is
/// returned unchanged. A line with no bracket at all cannot be valid.
fn strip_syslog_header(line: &[u8]) -> Result<&[u8], ParseError> {
    let start = line
        .iter()
        .position(|&b| b == b'[')
        .ok_or(ParseError::MissingSeparator('['))?;
    let end = line[start..]
        .iter()
        .position(|&b| b == b']')
        .map(|pos| start + pos)
        .ok_or(ParseError::MissingSeparator(']'))?;

    if line.get(end + 1..end + 3) == Some(b": ".as_slice()) {
        Ok(&line[end + 3..])
    } else {
        Ok(line)
    }
}

fn take_field<'a>(cur: &mut Cursor<'a>, sep: u8) -> Result<&'a str, ParseError> {
    let bytes = cur
        .take_until(sep)
        .ok_or(ParseError::MissingSeparator(sep as char))?;
    std::str::from_utf8(bytes).map_err(|_| ParseError::InvalidUtf8)
}

fn take_str(cur: &mut Cursor<'_>, sep: u8) -> Result<String, ParseError> {
    take_field(cur, sep).map(str::to_string)
}

fn take_i32(cur: &mut Cursor<'_>, sep: u8) -> Result<i32, ParseError> {
    let field = take_field(cur, sep)?;
    field
        .parse()
        .map_err(|_| ParseError::InvalidNumber(field.to_string()))
}

fn take_i64(cur: &mut Cursor<'_>, sep: u8) -> Result<i64, ParseError> {
    let field = take_field(cur, sep)?;
    field
        .parse()
        .map_err(|_| ParseError::InvalidNumber(field.to_string()))
}

/// Read the optional `{v1|v2|...}` capture group and zip it positionally
/// against the configured header names.
///
/// A missing group is not an error; a present group must close and must
/// carry exactly one value per configured name.
fn take_request_headers(
    cur: &mut Cursor<'_>,
    names: &[String],
) -> Result<BTreeMap<String, String>, ParseError> {
    if cur.peek() != Some(b'{') {
        return Ok(BTreeMap::new());
    }

    let rest = cur.rest();
    let end = rest
        .iter()
        .position(|&b| b == b'}')
        .ok_or(ParseError::MissingSeparator('}'))?;
    if end <= 1 {
        return Err(ParseError::EmptyHeaderCapture);
    }

    let raw = std::str::from_utf8(&rest[1..end]).map_err(|_| ParseError::InvalidUtf8)?;
    let values: Vec<&str> = raw.split('|').collect();
    if values.len() != names.len() {
        return Err(ParseError::HeaderCountMismatch);
    }

    let headers = names
        .iter()
        .zip(values)
        .map(|(name, value)| (name.clone(), value.to_string()))
        .collect();

    // Past `}` and the space before the quoted HTTP section.
    cur.skip(end + 2);

    Ok(headers)
}

/// Parse a single HAProxy HTTP log line.
///
/// `req_headers` is the ordered list of captured request-header names from
/// the HAProxy configuration; pass an empty slice when no capture is
/// configured.
pub fn parse(line: &[u8], req_headers: &[String]) -> Result<HttpLog, ParseError> {
    let line = strip_syslog_header(line)?;
    let mut cur = Cursor::new(line);

    let client_ip = take_str(&mut cur, b':')?;
    let client_port = take_i32(&mut cur, b' ')?;

    // Timestamp sits between `[` and `]`.
    cur.skip(1);
    let ts = take_field(&mut cur, b']')?;
    let timestamp = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
        .map_err(|_| ParseError::InvalidTimestamp(ts.to_string()))?
        .and_utc();

    cur.skip(1);
    let frontend_name = take_str(&mut cur, b' ')?;
    let backend_name = take_str(&mut cur, b'/')?;
    let server_name = take_str(&mut cur, b' ')?;

    let time_request = take_i32(&mut cur, b'/')?;
    let time_wait = take_i32(&mut cur, b'/')?;
    let time_connect = take_i32(&mut cur, b'/')?;
    let time_response = take_i32(&mut cur, b'/')?;
    let time_all = take_i32(&mut cur, b' ')?;

    let http_status = take_i32(&mut cur, b' ')?;
    let bytes_read = take_i64(&mut cur, b' ')?;

    let cookie_request = take_str(&mut cur, b' ')?;
    let cookie_response = take_str(&mut cur, b' ')?;
    let termination_state = take_str(&mut cur, b' ')?;

    let conn_active = take_i32(&mut cur, b'/')?;
    let conn_frontend = take_i32(&mut cur, b'/')?;
    let conn_backend = take_i32(&mut cur, b'/')?;
    let conn_server = take_i32(&mut cur, b'/')?;
    let retries = take_i32(&mut cur, b' ')?;

    let queue_server = take_i32(&mut cur, b'/')?;
    let queue_backend = take_i32(&mut cur, b' ')?;

    let request_headers = if req_headers.is_empty() {
        BTreeMap::new()
    } else {
        take_request_headers(&mut cur, req_headers)?
    };

    // Opening quote of the `"METHOD target PROTO"` section.
    cur.skip(1);
    let http_method = take_str(&mut cur, b' ')?;
    let target = take_str(&mut cur, b' ')?;
    let (http_url, http_query) = match target.split_once('?') {
        Some((url, query)) => (url.to_string(), query.to_string()),
        None => (target, String::new()),
    };
    let http_proto = take_str(&mut cur, b'"')?;

    Ok(HttpLog {
        timestamp,
        client_ip,
        client_port,
        frontend_name,
        backend_name,
        server_name,
        time_request,
        time_wait,
        time_connect,
        time_response,
        time_all,
        bytes_read,
        cookie_request,
        cookie_response,
        termination_state,
        conn_active,
        conn_frontend,
        conn_backend,
        conn_server,
        retries,
        queue_server,
        queue_backend,
        request_headers,
        http_status,
        http_method,
        http_url,
        http_query,
        http_proto,
        tag_http_url: String::new(),
    })
}
