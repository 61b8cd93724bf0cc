//! HTTP/1.1 framing for text payloads.
//!
//! Requests are `POST /rpc` with a `text/plain` body; responses are `200 OK`
//! with the same content type. Bodies are delimited by `Content-Length` and
//! the connection stays open, so several calls can be in flight at once.

use crate::domain::error::RpcError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use tokio_util::codec::{Decoder, Encoder};

pub const RPC_PATH: &str = "/rpc";
pub const CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Largest accepted request or status line plus headers.
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Reads `head + Content-Length body` messages, remembering a parsed head
/// while the body is still arriving.
#[derive(Debug)]
struct BodyReader {
    max_body: usize,
    body_len: Option<usize>,
}

impl BodyReader {
    fn new(max_body: usize) -> Self {
        Self {
            max_body,
            body_len: None,
        }
    }

    fn read<F>(&mut self, src: &mut BytesMut, check_start_line: F) -> Result<Option<BytesMut>, RpcError>
    where
        F: FnOnce(&str) -> Result<(), RpcError>,
    {
        let body_len = match self.body_len {
            Some(len) => len,
            None => {
                let Some(head_end) = find_head_end(src) else {
                    if src.len() > MAX_HEAD_BYTES {
                        return Err(RpcError::Protocol("HTTP head too large".into()));
                    }
                    return Ok(None);
                };
                let head = std::str::from_utf8(&src[..head_end])
                    .map_err(|_| RpcError::Protocol("HTTP head is not UTF-8".into()))?;
                let mut lines = head.split("\r\n");
                check_start_line(lines.next().unwrap_or_default())?;
                let len = content_length(lines)?;
                if len > self.max_body {
                    return Err(RpcError::Protocol(format!(
                        "body of {len} bytes exceeds limit of {}",
                        self.max_body
                    )));
                }
                src.advance(head_end + 4);
                self.body_len = Some(len);
                len
            }
        };

        if src.len() < body_len {
            src.reserve(body_len - src.len());
            return Ok(None);
        }
        self.body_len = None;
        Ok(Some(src.split_to(body_len)))
    }
}

impl BodyReader {
    /// The peer enforces the same limit, so refuse to send what it would reject.
    fn check_outgoing(&self, body: &[u8]) -> Result<(), RpcError> {
        if body.len() > self.max_body {
            return Err(RpcError::Serialization(format!(
                "body of {} bytes exceeds limit of {}",
                body.len(),
                self.max_body
            )));
        }
        Ok(())
    }
}

fn find_head_end(src: &[u8]) -> Option<usize> {
    src.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length<'a>(headers: impl Iterator<Item = &'a str>) -> Result<usize, RpcError> {
    for line in headers {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value
                    .trim()
                    .parse()
                    .map_err(|_| RpcError::Protocol(format!("bad Content-Length: {value:?}")));
            }
        }
    }
    Ok(0)
}

fn write_message(dst: &mut BytesMut, start_line: &str, host: Option<&str>, body: &[u8]) {
    let mut head = format!("{start_line}\r\n");
    if let Some(host) = host {
        head.push_str(&format!("Host: {host}\r\n"));
    }
    head.push_str(&format!(
        "Connection: keep-alive\r\nContent-Type: {CONTENT_TYPE}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    ));
    dst.reserve(head.len() + body.len());
    dst.put_slice(head.as_bytes());
    dst.put_slice(body);
}

/// Client side: writes `POST /rpc` requests, reads `200 OK` responses.
#[derive(Debug)]
pub struct HttpClientFraming {
    host: String,
    reader: BodyReader,
}

impl HttpClientFraming {
    pub fn new(peer: SocketAddr, max_body: usize) -> Self {
        Self {
            host: peer.to_string(),
            reader: BodyReader::new(max_body),
        }
    }
}

impl Decoder for HttpClientFraming {
    type Item = BytesMut;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, RpcError> {
        self.reader.read(src, |line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(version), Some("200")) if version.starts_with("HTTP/1.") => Ok(()),
                _ => Err(RpcError::Protocol(format!("unexpected status line: {line:?}"))),
            }
        })
    }
}

impl Encoder<Bytes> for HttpClientFraming {
    type Error = RpcError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), RpcError> {
        self.reader.check_outgoing(&body)?;
        write_message(
            dst,
            &format!("POST {RPC_PATH} HTTP/1.1"),
            Some(&self.host),
            &body,
        );
        Ok(())
    }
}

/// Server side: reads `POST /rpc` requests, writes `200 OK` responses.
#[derive(Debug)]
pub struct HttpServerFraming {
    reader: BodyReader,
}

impl HttpServerFraming {
    pub fn new(max_body: usize) -> Self {
        Self {
            reader: BodyReader::new(max_body),
        }
    }
}

impl Decoder for HttpServerFraming {
    type Item = BytesMut;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, RpcError> {
        self.reader.read(src, |line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some("POST"), Some(RPC_PATH), Some(version)) if version.starts_with("HTTP/1.") => {
                    Ok(())
                }
                _ => Err(RpcError::Protocol(format!("unexpected request line: {line:?}"))),
            }
        })
    }
}

impl Encoder<Bytes> for HttpServerFraming {
    type Error = RpcError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), RpcError> {
        self.reader.check_outgoing(&body)?;
        write_message(dst, "HTTP/1.1 200 OK", None, &body);
        Ok(())
    }
}
