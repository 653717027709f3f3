//! HTTP/1.x message heads and body framing.
//!
//! Heads are parsed with `httparse`; this module only adds what a passive
//! observer needs on top of it: finding the end of a head on a byte stream and
//! walking the body so the next message starts at the right offset.

use serde::{Serialize, Serializer};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error_handling::types::DecodeError;

const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_HEADERS: usize = 96;

fn lossy<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(body))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub version: u8,
    pub headers: Vec<(String, String)>,
    /// Buffered body bytes, at most the configured bound.
    #[serde(serialize_with = "lossy")]
    pub body: Vec<u8>,
    /// Full body length seen on the wire.
    pub body_len: u64,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub version: u8,
    pub headers: Vec<(String, String)>,
    #[serde(serialize_with = "lossy")]
    pub body: Vec<u8>,
    pub body_len: u64,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.status)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn collect_headers(headers: &[httparse::Header<'_>]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect()
}

/// How the body following a head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

impl BodyFraming {
    fn from_headers(headers: &[(String, String)]) -> Result<Option<Self>, DecodeError> {
        if let Some(te) = find_header(headers, "transfer-encoding") {
            if te
                .rsplit(',')
                .next()
                .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
            {
                return Ok(Some(BodyFraming::Chunked));
            }
        }
        match find_header(headers, "content-length") {
            Some(v) => v
                .parse::<u64>()
                .map(|n| Some(BodyFraming::Length(n)))
                .map_err(|_| DecodeError::Http(format!("invalid content-length {:?}", v))),
            None => Ok(None),
        }
    }

    pub fn for_request(req: &HttpRequest) -> Result<Self, DecodeError> {
        Ok(Self::from_headers(&req.headers)?.unwrap_or(BodyFraming::Empty))
    }

    /// `request_method` is the method of the request this response answers, if known.
    pub fn for_response(resp: &HttpResponse, request_method: Option<&str>) -> Result<Self, DecodeError> {
        if request_method.is_some_and(|m| m.eq_ignore_ascii_case("HEAD"))
            || resp.is_informational()
            || resp.status == 204
            || resp.status == 304
        {
            return Ok(BodyFraming::Empty);
        }
        Ok(Self::from_headers(&resp.headers)?.unwrap_or(BodyFraming::UntilClose))
    }
}

/// Reads one head, up to and including the blank line.
async fn read_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, DecodeError> {
    let mut head = Vec::new();
    loop {
        let before = head.len();
        let n = reader.read_until(b'\n', &mut head).await?;
        if n == 0 {
            return Err(if head.is_empty() {
                DecodeError::Eof
            } else {
                DecodeError::Truncated
            });
        }
        let line = &head[before..];
        if before == 0 && (line == b"\r\n" || line == b"\n") {
            // stray line break between messages
            head.clear();
            continue;
        }
        if before > 0 && (line == b"\r\n" || line == b"\n") {
            return Ok(head);
        }
        if head.len() > MAX_HEAD_BYTES {
            return Err(DecodeError::Http("header section too large".to_string()));
        }
    }
}

pub async fn read_request_head<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<HttpRequest, DecodeError> {
    let head = read_head(reader).await?;
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(DecodeError::Http("incomplete request head".to_string()))
        }
        Err(e) => return Err(DecodeError::Http(e.to_string())),
    }

    Ok(HttpRequest {
        method: req.method.unwrap_or_default().to_string(),
        path: req.path.unwrap_or_default().to_string(),
        version: req.version.unwrap_or(1),
        headers: collect_headers(req.headers),
        body: Vec::new(),
        body_len: 0,
    })
}

pub async fn read_response_head<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<HttpResponse, DecodeError> {
    let head = read_head(reader).await?;
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);
    match resp.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(DecodeError::Http("incomplete response head".to_string()))
        }
        Err(e) => return Err(DecodeError::Http(e.to_string())),
    }

    Ok(HttpResponse {
        status: resp.code.unwrap_or_default(),
        reason: resp.reason.unwrap_or_default().to_string(),
        version: resp.version.unwrap_or(1),
        headers: collect_headers(resp.headers),
        body: Vec::new(),
        body_len: 0,
    })
}

/// Collects the first `limit` bytes of a body and skips the rest.
struct BodyBuffer {
    kept: Vec<u8>,
    seen: u64,
    limit: usize,
}

impl BodyBuffer {
    fn push(&mut self, data: &[u8]) {
        self.seen += data.len() as u64;
        let room = self.limit.saturating_sub(self.kept.len());
        self.kept.extend_from_slice(&data[..data.len().min(room)]);
    }
}

async fn copy_exact<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    mut left: u64,
    out: &mut BodyBuffer,
) -> Result<(), DecodeError> {
    let mut buf = [0u8; 8192];
    while left > 0 {
        let want = left.min(buf.len() as u64) as usize;
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(DecodeError::Truncated);
        }
        out.push(&buf[..n]);
        left -= n as u64;
    }
    Ok(())
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, DecodeError> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).await? == 0 {
        return Err(DecodeError::Truncated);
    }
    Ok(String::from_utf8_lossy(&line).trim().to_string())
}

/// Reads the body delimited by `framing`, keeping at most `limit` bytes.
///
/// Returns the kept bytes and the full body length.
pub async fn read_body<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    framing: BodyFraming,
    limit: usize,
) -> Result<(Vec<u8>, u64), DecodeError> {
    let mut body = BodyBuffer {
        kept: Vec::new(),
        seen: 0,
        limit,
    };

    match framing {
        BodyFraming::Empty => {}
        BodyFraming::Length(n) => copy_exact(reader, n, &mut body).await?,
        BodyFraming::Chunked => loop {
            let size_line = read_line(reader).await?;
            let size_str = size_line.split(';').next().unwrap_or_default().trim();
            let size = u64::from_str_radix(size_str, 16)
                .map_err(|_| DecodeError::Http(format!("invalid chunk size {:?}", size_str)))?;
            if size == 0 {
                // trailer section ends with an empty line
                while !read_line(reader).await?.is_empty() {}
                break;
            }
            copy_exact(reader, size, &mut body).await?;
            read_line(reader).await?;
        },
        BodyFraming::UntilClose => {
            let mut buf = [0u8; 8192];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                body.push(&buf[..n]);
            }
        }
    }

    Ok((body.kept, body.seen))
}
