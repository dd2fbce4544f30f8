use bytes::Bytes;

use crate::session::PlayerId;
use crate::wire;
use crate::wire::Reader;
use crate::ProtoError;

/// Compiled-in protocol version; `Identify` must carry exactly this.
pub const PROTOCOL_VERSION: i32 = 1;

/// Sentinel zone id: find an open zone by name/password criteria.
pub const ZONE_ID_SEARCH: i32 = -2;

pub const REQ_IDENTIFY: u8 = 0x01;
pub const REQ_SET_ALIAS: u8 = 0x02;
pub const REQ_JOIN_ZONE: u8 = 0x03;

pub const RESP_SESSION_ID: u8 = 0x81;
pub const RESP_PLAYER_CONNECTED: u8 = 0x82;
pub const RESP_JOIN_ZONE: u8 = 0x83;
pub const RESP_SERVER_OPTIONS: u8 = 0x84;

#[derive(Debug, Clone)]
pub enum LobbyReq {
    /// First message on a connection; promotes it to a player session.
    Identify { name: String },
    SetAlias { alias: String },
    JoinZone(JoinZone),
}

#[derive(Debug, Clone)]
pub struct JoinZone {
    /// Target zone id, or `ZONE_ID_SEARCH` to match by criteria.
    pub zone_id: i32,
    pub password: String,
    pub name: String,
    pub persistent: bool,
    pub max_players: u16,
}

/// Decode one frame payload (type byte + body) into a request.
///
/// The body must account for every byte of the payload.
pub fn parse_req(p: Bytes) -> Result<LobbyReq, ProtoError> {
    if p.is_empty() {
        return Err(ProtoError::TooShort { need: 1, got: 0 });
    }

    let t = p[0];
    let mut r = Reader::new(p.slice(1..));
    let req = match t {
        REQ_IDENTIFY => {
            let version = r.i32()?;
            if version != PROTOCOL_VERSION {
                return Err(ProtoError::VersionMismatch { got: version });
            }
            let name = r.string()?;
            LobbyReq::Identify {
                name: name.trim().to_string(),
            }
        }
        REQ_SET_ALIAS => LobbyReq::SetAlias { alias: r.string()? },
        REQ_JOIN_ZONE => LobbyReq::JoinZone(JoinZone {
            zone_id: r.i32()?,
            password: r.string()?,
            name: r.string()?,
            persistent: r.bool()?,
            max_players: r.u16()?,
        }),
        _ => {
            return Err(ProtoError::UnknownType {
                code: t,
                remaining: p.len(),
            })
        }
    };
    r.finish()?;
    Ok(req)
}

pub fn session_id_body(id: PlayerId) -> Bytes {
    let mut b = Vec::with_capacity(1 + PlayerId::LEN);
    wire::put_u8(&mut b, RESP_SESSION_ID);
    b.extend_from_slice(&id.to_le_bytes());
    Bytes::from(b)
}

pub fn player_connected_body(id: PlayerId) -> Bytes {
    let mut b = Vec::with_capacity(1 + PlayerId::LEN);
    wire::put_u8(&mut b, RESP_PLAYER_CONNECTED);
    b.extend_from_slice(&id.to_le_bytes());
    Bytes::from(b)
}

/// Join outcome for the client; `reason` is empty when `ok`.
pub fn join_zone_result_body(ok: bool, reason: &str) -> Bytes {
    let mut b = Vec::with_capacity(1 + 1 + 2 + reason.len());
    wire::put_u8(&mut b, RESP_JOIN_ZONE);
    wire::put_bool(&mut b, ok);
    wire::put_str(&mut b, reason);
    Bytes::from(b)
}

/// Server-wide game options, pushed right before a join completes.
pub fn server_options_body(options_json: &str) -> Bytes {
    let mut b = Vec::with_capacity(1 + 2 + options_json.len());
    wire::put_u8(&mut b, RESP_SERVER_OPTIONS);
    wire::put_str(&mut b, options_json);
    Bytes::from(b)
}

pub fn identify_body(version: i32, name: &str) -> Bytes {
    let mut b = Vec::with_capacity(1 + 4 + 2 + name.len());
    wire::put_u8(&mut b, REQ_IDENTIFY);
    wire::put_i32(&mut b, version);
    wire::put_str(&mut b, name);
    Bytes::from(b)
}

pub fn set_alias_body(alias: &str) -> Bytes {
    let mut b = Vec::with_capacity(1 + 2 + alias.len());
    wire::put_u8(&mut b, REQ_SET_ALIAS);
    wire::put_str(&mut b, alias);
    Bytes::from(b)
}

pub fn join_zone_body(req: &JoinZone) -> Bytes {
    let mut b = Vec::with_capacity(1 + 4 + 2 + req.password.len() + 2 + req.name.len() + 1 + 2);
    wire::put_u8(&mut b, REQ_JOIN_ZONE);
    wire::put_i32(&mut b, req.zone_id);
    wire::put_str(&mut b, &req.password);
    wire::put_str(&mut b, &req.name);
    wire::put_bool(&mut b, req.persistent);
    wire::put_u16(&mut b, req.max_players);
    Bytes::from(b)
}
