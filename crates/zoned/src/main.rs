use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};
use zoneio::frame::{encode_frame, FrameReader, Inbound};
use zoneproto::lobby::{self, JoinZone, LobbyReq};
use zoneproto::session::PlayerId;

mod player;
mod zone;

use player::{Player, Roster};
use zone::{join_zone, JoinOutcome, ZoneRegistry};

fn usage_and_exit() -> ! {
    eprintln!(
        "zoned (session server)\n\n\
USAGE:\n  zoned [--bind HOST:PORT] [--web-port PORT] [--game-config PATH]\n\n\
ENV:\n  ZONED_BIND              default 0.0.0.0:4530\n  ZONED_WEB_PORT          optional; default -1 (http probes get a 503)\n  ZONED_PUBLIC_HOST       optional; host used in the http redirect\n  ZONED_GAME_CONFIG_PATH  optional; JSON document pushed to joining players\n  ZONED_IDLE_TIMEOUT_S    optional; default 300 (0 disables)\n"
    );
    std::process::exit(2);
}

#[derive(Clone, Debug)]
struct Config {
    bind: SocketAddr,
    /// Auxiliary web endpoint port; non-positive means none is running.
    web_port: i32,
    public_host: Option<String>,
    game_config_path: Option<String>,
    /// Zero disables the read timeout.
    idle_timeout: Duration,
}

fn parse_args() -> Config {
    let mut bind: SocketAddr = std::env::var("ZONED_BIND")
        .unwrap_or_else(|_| "0.0.0.0:4530".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());

    let mut web_port: i32 = std::env::var("ZONED_WEB_PORT")
        .ok()
        .map(|v| v.parse().unwrap_or_else(|_| usage_and_exit()))
        .unwrap_or(-1);

    let public_host = std::env::var("ZONED_PUBLIC_HOST")
        .ok()
        .filter(|v| !v.trim().is_empty());

    let mut game_config_path = std::env::var("ZONED_GAME_CONFIG_PATH")
        .ok()
        .filter(|v| !v.trim().is_empty());

    let idle_timeout_s: u64 = std::env::var("ZONED_IDLE_TIMEOUT_S")
        .ok()
        .map(|v| v.parse().unwrap_or_else(|_| usage_and_exit()))
        .unwrap_or(300);

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--bind" => {
                bind = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage_and_exit());
            }
            "--web-port" => {
                web_port = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage_and_exit());
            }
            "--game-config" => {
                game_config_path = Some(it.next().unwrap_or_else(|| usage_and_exit()));
            }
            _ => usage_and_exit(),
        }
    }

    Config {
        bind,
        web_port,
        public_host,
        game_config_path,
        idle_timeout: Duration::from_secs(idle_timeout_s),
    }
}

struct Server {
    cfg: Config,
    /// Compact server-wide game options JSON, pushed on successful joins.
    game_options: Option<String>,
    // Lock order: players before zones, everywhere.
    players: Mutex<Roster>,
    zones: Mutex<ZoneRegistry>,
}

fn load_game_options(path: Option<&str>) -> anyhow::Result<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("read game config {path}"))?;
    let doc: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("parse game config {path}"))?;
    let compact = doc.to_string();
    if compact.len() > u16::MAX as usize {
        anyhow::bail!("game config {path} too large to push ({} bytes)", compact.len());
    }
    Ok(Some(compact))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,zoned=info".into()),
        )
        .with_target(false)
        .init();

    let cfg = parse_args();
    let game_options = load_game_options(cfg.game_config_path.as_deref())?;
    let listener = TcpListener::bind(cfg.bind).await?;

    info!(
        bind = %cfg.bind,
        web_port = cfg.web_port,
        game_options = game_options.is_some(),
        "session server listening"
    );

    let server = Arc::new(Server {
        cfg,
        game_options,
        players: Mutex::new(Roster::new()),
        zones: Mutex::new(ZoneRegistry::new()),
    });

    loop {
        let (stream, peer) = listener.accept().await?;
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_conn(server, stream, peer).await {
                warn!(peer = %peer, err = %e, "connection ended with error");
            }
        });
    }
}

/// Where dispatch routes a connection's messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    PendingHandshake,
    Authenticated(PlayerId),
}

enum Handshake {
    Player(PlayerId),
    Close,
}

async fn handle_conn<S>(server: Arc<Server>, stream: S, peer: SocketAddr) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    trace!(peer = %peer, "connection accepted");

    let (rd, mut wr) = tokio::io::split(stream);
    let mut fr = FrameReader::new(rd);

    let (write_tx, mut write_rx) = mpsc::channel::<Bytes>(64);
    let writer = tokio::spawn(async move {
        while let Some(b) = write_rx.recv().await {
            if wr.write_all(&b[..]).await.is_err() {
                break;
            }
        }
        let _ = wr.shutdown().await;
    });

    let (disconnect_tx, mut disconnect_rx) = watch::channel(false);

    let mut state = ConnState::PendingHandshake;
    'read: loop {
        let inbound = tokio::select! {
            r = read_next(&mut fr, server.cfg.idle_timeout) => match r {
                Ok(v) => v,
                Err(e) => {
                    warn!(peer = %peer, err = %e, "closing connection");
                    break 'read;
                }
            },
            _ = disconnect_rx.changed() => break 'read,
        };
        let Some(inbound) = inbound else {
            break 'read;
        };

        match state {
            ConnState::PendingHandshake => {
                match handshake(&server, &fr, inbound, peer, &write_tx, &disconnect_tx).await {
                    Handshake::Player(id) => state = ConnState::Authenticated(id),
                    Handshake::Close => break 'read,
                }
            }
            ConnState::Authenticated(id) => {
                if !dispatch_player(&server, id, inbound, peer).await {
                    break 'read;
                }
            }
        }
    }

    match state {
        ConnState::Authenticated(id) => {
            remove_player(&server, id).await;
        }
        ConnState::PendingHandshake => {
            trace!(peer = %peer, "connection closed before identify");
        }
    }

    drop(write_tx);
    let _ = writer.await;
    Ok(())
}

async fn read_next<R: AsyncRead + Unpin>(
    fr: &mut FrameReader<R>,
    idle: Duration,
) -> std::io::Result<Option<Inbound>> {
    if idle.is_zero() {
        return fr.read_inbound().await;
    }
    match tokio::time::timeout(idle, fr.read_inbound()).await {
        Ok(r) => r,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "idle timeout",
        )),
    }
}

/// Decide what a fresh connection is: an HTTP probe to answer and drop, or an
/// identify that promotes it to a player session. Anything else closes it.
async fn handshake<R: AsyncRead + Unpin>(
    server: &Arc<Server>,
    fr: &FrameReader<R>,
    inbound: Inbound,
    peer: SocketAddr,
    write_tx: &mpsc::Sender<Bytes>,
    disconnect_tx: &watch::Sender<bool>,
) -> Handshake {
    let frame = match inbound {
        Inbound::HttpProbe(raw) => {
            trace!(peer = %peer, len = raw.len(), "http probe on game port");
            let _ = write_tx.send(http_answer(&server.cfg)).await;
            return Handshake::Close;
        }
        Inbound::Frame(p) => p,
    };

    let msg = match lobby::parse_req(frame) {
        Ok(m) => m,
        Err(e) => {
            warn!(peer = %peer, err = %e, "bad packet on new connection");
            return Handshake::Close;
        }
    };
    trace!(peer = %peer, msg = ?msg, "handshake message");

    match msg {
        LobbyReq::Identify { name } => {
            let player = Player {
                name: name.clone(),
                alias: String::new(),
                proto_version: lobby::PROTOCOL_VERSION,
                zone: None,
                peer_ip: peer.ip(),
                write_tx: write_tx.clone(),
                disconnect_tx: disconnect_tx.clone(),
            };
            let id = {
                let mut players = server.players.lock().await;
                players.add(player)
            };

            let _ = write_tx
                .send(encode_frame(&lobby::session_id_body(id)))
                .await;
            let _ = write_tx
                .send(encode_frame(&lobby::player_connected_body(id)))
                .await;
            info!(player = %id, name = %name, peer = %peer, "new player connected");

            // The identify is expected to arrive alone; anything the client
            // packed after it is handled as ordinary session traffic.
            if fr.frame_buffered() {
                warn!(peer = %peer, "multiple messages on new connection");
            }
            Handshake::Player(id)
        }
        other => {
            warn!(peer = %peer, msg = ?other, "packet not expected on new connection");
            Handshake::Close
        }
    }
}

/// Route one decoded inbound for an identified player.
///
/// Returns `false` when the connection must close.
async fn dispatch_player(
    server: &Arc<Server>,
    id: PlayerId,
    inbound: Inbound,
    peer: SocketAddr,
) -> bool {
    let frame = match inbound {
        Inbound::HttpProbe(_) => {
            warn!(player = %id, peer = %peer, "unhandled http probe from player; dropped");
            return true;
        }
        Inbound::Frame(p) => p,
    };

    match lobby::parse_req(frame) {
        Ok(msg) => {
            trace!(player = %id, msg = ?msg, "player message");
            match msg {
                LobbyReq::SetAlias { alias } => {
                    let mut players = server.players.lock().await;
                    if let Some(p) = players.get_mut(id) {
                        p.alias = alias;
                        trace!(player = %id, alias = %p.alias, "alias updated");
                    }
                    true
                }
                LobbyReq::JoinZone(req) => handle_join(server, id, &req).await,
                LobbyReq::Identify { .. } => {
                    warn!(player = %id, "unhandled message type for an identified player");
                    true
                }
            }
        }
        Err(e) => {
            warn!(player = %id, peer = %peer, err = %e, "unrecognized packet from player");
            false
        }
    }
}

/// Queue a frame for a tracked player through its registered connection.
async fn send_to(server: &Arc<Server>, id: PlayerId, frame: Bytes) {
    let tx = {
        let players = server.players.lock().await;
        players.get(id).map(|p| p.write_tx.clone())
    };
    if let Some(tx) = tx {
        let _ = tx.send(frame).await;
    }
}

async fn handle_join(server: &Arc<Server>, id: PlayerId, req: &JoinZone) -> bool {
    let outcome = {
        let mut players = server.players.lock().await;
        let mut zones = server.zones.lock().await;
        join_zone(&mut players, &mut zones, id, req)
    };

    match outcome {
        JoinOutcome::NoOp => true,
        JoinOutcome::Rejected(reason) => {
            debug!(player = %id, reason, "join rejected");
            send_to(
                server,
                id,
                encode_frame(&lobby::join_zone_result_body(false, reason)),
            )
            .await;
            true
        }
        JoinOutcome::Outdated => {
            debug!(player = %id, reason = zone::REASON_OUTDATED, "player rejected");
            send_to(
                server,
                id,
                encode_frame(&lobby::join_zone_result_body(false, zone::REASON_OUTDATED)),
            )
            .await;
            remove_player(server, id).await;
            false
        }
        JoinOutcome::Joined { zone, created } => {
            if created {
                trace!(player = %id, zone, "new zone created");
            }
            if let Some(options) = &server.game_options {
                send_to(
                    server,
                    id,
                    encode_frame(&lobby::server_options_body(options)),
                )
                .await;
            }
            true
        }
    }
}

/// Untrack a player, detach it from its zone, then disconnect — in that order,
/// so no dispatch can race a half-removed session. Calling this twice is fine;
/// the second call is a no-op.
async fn remove_player(server: &Arc<Server>, id: PlayerId) -> bool {
    let (removed, online) = {
        let mut players = server.players.lock().await;
        let removed = players.remove(id);
        (removed, players.len())
    };
    let Some(p) = removed else {
        return false;
    };

    if let Some(zid) = p.zone {
        let mut zones = server.zones.lock().await;
        zones.leave(zid, id);
    }

    let _ = p.disconnect_tx.send(true);
    info!(player = %id, name = %p.name, peer = %p.peer_ip, online, "player disconnected");
    true
}

fn http_answer(cfg: &Config) -> Bytes {
    if cfg.web_port > 0 {
        let host = cfg
            .public_host
            .clone()
            .unwrap_or_else(|| cfg.bind.ip().to_string());
        let port = if cfg.web_port != 80 {
            format!(":{}", cfg.web_port)
        } else {
            String::new()
        };
        Bytes::from(format!(
            "HTTP/1.1 301 Moved Permanently\nLocation: http://{host}{port}\nConnection: close\n\n"
        ))
    } else {
        Bytes::from_static(
            b"HTTP/1.1 503 Service Unavailable\nConnection: close\n\nThis is not a web server",
        )
    }
}
