//! Wire builders shared by the MySQL tests.

use super::packets::{CLIENT_CONNECT_WITH_DB, CLIENT_SECURE_CONNECTION};

pub(crate) fn frame(seq: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.extend_from_slice(&len.to_le_bytes()[..3]);
    out.push(seq);
    out.extend_from_slice(payload);
    out
}

pub(crate) fn server_handshake_payload(version: &str, capabilities: u32, status: u16) -> Vec<u8> {
    let caps = capabilities.to_le_bytes();
    let mut p = vec![10u8];
    p.extend_from_slice(version.as_bytes());
    p.push(0);
    p.extend_from_slice(&42u32.to_le_bytes()); // connection id
    p.extend_from_slice(b"abcdefgh"); // auth-plugin-data part 1
    p.push(0); // filler
    p.extend_from_slice(&caps[..2]);
    p.push(0xff); // charset
    p.extend_from_slice(&status.to_le_bytes());
    p.extend_from_slice(&caps[2..]);
    p.push(21);
    p.extend_from_slice(&[0u8; 10]);
    p.extend_from_slice(b"ijklmnopqrst\0");
    p.extend_from_slice(b"caching_sha2_password\0");
    p
}

pub(crate) fn client_handshake_payload(
    capabilities: u32,
    user: &str,
    database: Option<&str>,
) -> Vec<u8> {
    let mut caps = capabilities;
    if database.is_some() {
        caps |= CLIENT_CONNECT_WITH_DB;
    }
    let mut p = Vec::new();
    p.extend_from_slice(&caps.to_le_bytes());
    p.extend_from_slice(&16_777_216u32.to_le_bytes());
    p.push(0xff); // charset
    p.extend_from_slice(&[0u8; 23]);
    p.extend_from_slice(user.as_bytes());
    p.push(0);
    if caps & CLIENT_SECURE_CONNECTION != 0 {
        p.push(20);
        p.extend_from_slice(&[0x5au8; 20]);
    } else {
        p.extend_from_slice(b"secret\0");
    }
    if let Some(db) = database {
        p.extend_from_slice(db.as_bytes());
        p.push(0);
    }
    p.extend_from_slice(b"mysql_native_password\0");
    p
}

pub(crate) fn command_payload(code: u8, body: &[u8]) -> Vec<u8> {
    let mut p = vec![code];
    p.extend_from_slice(body);
    p
}
