//! Line-protocol encoding shared by the InfluxDB and QuestDB sinks.
//!
//! One line per record: measurement, comma-joined tag set, space,
//! comma-joined field set, space, Unix-nanosecond timestamp.

use std::fmt::Write as _;

use crate::domain::HttpLog;

pub const MEASUREMENT: &str = "haproxy";

/// Append one record as a single line, newline-terminated.
///
/// The `http_url` tag carries the normalized URL when the tag rules
/// produced one; every other value is written exactly as parsed.
pub fn write_record(buf: &mut String, hostname: &str, log: &HttpLog) -> std::fmt::Result {
    buf.push_str(MEASUREMENT);

    write!(
        buf,
        ",host={},server={},backend={},frontend={},http_method={},http_url={},http_query={:?},http_proto={},http_status={},term_state={},client_ip={},client_port={}",
        hostname,
        log.server_name,
        log.backend_name,
        log.frontend_name,
        log.http_method,
        log.tag_url(),
        log.http_query,
        log.http_proto,
        log.http_status,
        log.termination_state,
        log.client_ip,
        log.client_port,
    )?;

    for (name, value) in &log.request_headers {
        write!(buf, ",{name}={value}")?;
    }

    write!(
        buf,
        " time_req={},time_wait={},time_connect={},time_rsp={},time_all={},conn_active={},conn_frontend={},conn_backend={},conn_server={},conn_retries={},queue_server={},queue_backend={},bytes_read={}",
        log.time_request,
        log.time_wait,
        log.time_connect,
        log.time_response,
        log.time_all,
        log.conn_active,
        log.conn_frontend,
        log.conn_backend,
        log.conn_server,
        log.retries,
        log.queue_server,
        log.queue_backend,
        log.bytes_read,
    )?;

    writeln!(buf, " {}", log.unix_nanos())
}

/// Encode a whole batch into `buf`, clearing it first so sinks can reuse
/// their buffers across flushes.
pub fn encode_batch(buf: &mut String, hostname: &str, batch: &[HttpLog]) -> std::fmt::Result {
    buf.clear();
    for log in batch {
        write_record(buf, hostname, log)?;
    }
    Ok(())
}
