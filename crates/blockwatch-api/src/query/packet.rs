// ── Query protocol framing ──
//
// Encoders and decoders for the two exchanges of the Minecraft query
// protocol (GameSpy4 over UDP): the challenge handshake and the full stat
// request. Pure functions over byte slices, no I/O.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;

const MAGIC: [u8; 2] = [0xFE, 0xFD];
const TYPE_HANDSHAKE: u8 = 0x09;
const TYPE_STAT: u8 = 0x00;

/// Only the low four bits of each byte are echoed back by servers.
const SESSION_MASK: u32 = 0x0F0F_0F0F;

/// Fixed padding between the stat header and the key/value section.
const KV_PREFIX: &[u8] = b"splitnum\x00\x80\x00";

/// Fixed marker between the key/value section and the player list.
const PLAYER_PREFIX: &[u8] = b"\x01player_\x00\x00";

/// Result of a full stat exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullStat {
    pub motd: String,
    pub version: Option<String>,
    pub map: Option<String>,
    pub online: u32,
    pub max: u32,
    pub players: Vec<String>,
    /// Every key/value pair the server sent, including the ones above.
    pub raw: HashMap<String, String>,
}

/// Derive a protocol-valid session id from an arbitrary seed.
pub fn session_id(seed: u32) -> u32 {
    seed & SESSION_MASK
}

pub fn handshake_request(session: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(7);
    buf.put_slice(&MAGIC);
    buf.put_u8(TYPE_HANDSHAKE);
    buf.put_u32(session);
    buf.freeze()
}

pub fn full_stat_request(session: u32, challenge: i32) -> Bytes {
    let mut buf = BytesMut::with_capacity(15);
    buf.put_slice(&MAGIC);
    buf.put_u8(TYPE_STAT);
    buf.put_u32(session);
    buf.put_i32(challenge);
    buf.put_slice(&[0, 0, 0, 0]);
    buf.freeze()
}

/// Parse a handshake reply into the challenge token.
///
/// The token arrives as a NUL-terminated ASCII decimal that may overflow
/// `i32`; only its low 32 bits are sent back.
pub fn parse_handshake(mut reply: &[u8], session: u32) -> Result<i32, Error> {
    expect_header(&mut reply, TYPE_HANDSHAKE, session)?;

    let text = read_cstring(&mut reply)?;
    let token: i64 = text
        .trim()
        .parse()
        .map_err(|_| Error::Protocol(format!("challenge token is not a number: {text:?}")))?;

    let [_, _, _, _, a, b, c, d] = token.to_be_bytes();
    Ok(i32::from_be_bytes([a, b, c, d]))
}

/// Parse a full stat reply.
pub fn parse_full_stat(mut reply: &[u8], session: u32) -> Result<FullStat, Error> {
    expect_header(&mut reply, TYPE_STAT, session)?;
    skip_literal(&mut reply, KV_PREFIX, "key/value prefix")?;

    let mut raw = HashMap::new();
    loop {
        let key = read_cstring(&mut reply)?;
        if key.is_empty() {
            break;
        }
        let value = read_cstring(&mut reply)?;
        raw.insert(key, value);
    }

    skip_literal(&mut reply, PLAYER_PREFIX, "player prefix")?;

    let mut players = Vec::new();
    while reply.has_remaining() {
        let name = read_cstring(&mut reply)?;
        if name.is_empty() {
            break;
        }
        players.push(name);
    }

    let online = numeric_field(&raw, "numplayers")?;
    let max = numeric_field(&raw, "maxplayers")?;

    Ok(FullStat {
        motd: raw.get("hostname").cloned().unwrap_or_default(),
        version: raw.get("version").cloned(),
        map: raw.get("map").cloned(),
        online,
        max,
        players,
        raw,
    })
}

// ── Helpers ──────────────────────────────────────────────────────────

fn expect_header(reply: &mut &[u8], kind: u8, session: u32) -> Result<(), Error> {
    if reply.remaining() < 5 {
        return Err(Error::Protocol(format!(
            "reply too short ({} bytes)",
            reply.remaining()
        )));
    }

    let got_kind = reply.get_u8();
    if got_kind != kind {
        return Err(Error::Protocol(format!(
            "unexpected packet type {got_kind:#04x}, expected {kind:#04x}"
        )));
    }

    let got_session = reply.get_u32();
    if got_session != session {
        return Err(Error::Protocol(format!(
            "session mismatch: sent {session:#010x}, got {got_session:#010x}"
        )));
    }

    Ok(())
}

fn skip_literal(reply: &mut &[u8], literal: &[u8], what: &str) -> Result<(), Error> {
    if !reply.starts_with(literal) {
        return Err(Error::Protocol(format!("missing {what}")));
    }
    reply.advance(literal.len());
    Ok(())
}

/// Read one NUL-terminated string, decoding bytes as Latin-1.
fn read_cstring(reply: &mut &[u8]) -> Result<String, Error> {
    let end = reply
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::Protocol("unterminated string".into()))?;

    let text = reply[..end].iter().copied().map(char::from).collect();
    reply.advance(end + 1);
    Ok(text)
}

fn numeric_field(raw: &HashMap<String, String>, key: &str) -> Result<u32, Error> {
    let value = raw
        .get(key)
        .ok_or_else(|| Error::Protocol(format!("missing field {key}")))?;
    value
        .trim()
        .parse()
        .map_err(|_| Error::Protocol(format!("field {key} is not a number: {value:?}")))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    /// Build a full stat reply the way a vanilla server lays it out.
    pub(crate) fn stat_reply(session: u32, pairs: &[(&str, &str)], players: &[&str]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(TYPE_STAT);
        buf.put_u32(session);
        buf.put_slice(KV_PREFIX);
        for (key, value) in pairs {
            buf.put_slice(key.as_bytes());
            buf.put_u8(0);
            buf.put_slice(value.as_bytes());
            buf.put_u8(0);
        }
        buf.put_u8(0);
        buf.put_slice(PLAYER_PREFIX);
        for name in players {
            buf.put_slice(name.as_bytes());
            buf.put_u8(0);
        }
        buf.put_u8(0);
        buf.to_vec()
    }

    pub(crate) fn handshake_reply(session: u32, token: &str) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(TYPE_HANDSHAKE);
        buf.put_u32(session);
        buf.put_slice(token.as_bytes());
        buf.put_u8(0);
        buf.to_vec()
    }

    #[test]
    fn session_id_is_masked() {
        assert_eq!(session_id(0xFFFF_FFFF), 0x0F0F_0F0F);
        assert_eq!(session_id(0x1234_5678), 0x0204_0608);
    }

    #[test]
    fn handshake_request_layout() {
        let req = handshake_request(0x0102_0304);
        assert_eq!(&req[..], &[0xFE, 0xFD, 0x09, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn full_stat_request_is_padded() {
        let req = full_stat_request(1, 9_513_307);
        assert_eq!(req.len(), 15);
        assert_eq!(&req[..3], &[0xFE, 0xFD, 0x00]);
        assert_eq!(&req[7..11], &9_513_307_i32.to_be_bytes());
        assert_eq!(&req[11..], &[0, 0, 0, 0]);
    }

    #[test]
    fn parses_handshake_token() {
        let reply = handshake_reply(7, "9513307");
        assert_eq!(parse_handshake(&reply, 7).unwrap(), 9_513_307);
    }

    #[test]
    fn handshake_token_wraps_to_32_bits() {
        let reply = handshake_reply(7, "4294967295");
        assert_eq!(parse_handshake(&reply, 7).unwrap(), -1);
    }

    #[test]
    fn handshake_rejects_wrong_session() {
        let reply = handshake_reply(7, "1");
        let err = parse_handshake(&reply, 8).unwrap_err();
        assert!(err.to_string().contains("session mismatch"), "{err}");
    }

    #[test]
    fn parses_full_stat() {
        let reply = stat_reply(
            3,
            &[
                ("hostname", "A Minecraft Server"),
                ("gametype", "SMP"),
                ("version", "1.20.4"),
                ("map", "world"),
                ("numplayers", "2"),
                ("maxplayers", "20"),
            ],
            &["Notch", "jeb_"],
        );

        let stat = parse_full_stat(&reply, 3).unwrap();
        assert_eq!(stat.motd, "A Minecraft Server");
        assert_eq!(stat.version.as_deref(), Some("1.20.4"));
        assert_eq!(stat.map.as_deref(), Some("world"));
        assert_eq!(stat.online, 2);
        assert_eq!(stat.max, 20);
        assert_eq!(stat.players, vec!["Notch".to_owned(), "jeb_".to_owned()]);
        assert_eq!(stat.raw.get("gametype").map(String::as_str), Some("SMP"));
    }

    #[test]
    fn parses_empty_server() {
        let reply = stat_reply(3, &[("numplayers", "0"), ("maxplayers", "8")], &[]);
        let stat = parse_full_stat(&reply, 3).unwrap();
        assert_eq!(stat.online, 0);
        assert!(stat.players.is_empty());
        assert_eq!(stat.motd, "");
    }

    #[test]
    fn decodes_latin1_motd() {
        let mut reply = stat_reply(3, &[("numplayers", "0"), ("maxplayers", "8")], &[]);
        // Splice a raw 0xA7 (section sign) hostname in before the empty key.
        let pos = reply.len() - PLAYER_PREFIX.len() - 2;
        reply.splice(pos..pos, b"hostname\x00\xA7aHi\x00".iter().copied());
        let stat = parse_full_stat(&reply, 3).unwrap();
        assert_eq!(stat.motd, "\u{a7}aHi");
    }

    #[test]
    fn rejects_missing_player_counts() {
        let reply = stat_reply(3, &[("hostname", "x")], &[]);
        let err = parse_full_stat(&reply, 3).unwrap_err();
        assert!(err.to_string().contains("numplayers"), "{err}");
    }

    #[test]
    fn rejects_truncated_reply() {
        let err = parse_full_stat(&[0x00, 0x00], 3).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
