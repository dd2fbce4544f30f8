use std::collections::HashSet;

use indexmap::IndexMap;
use zoneproto::lobby::JoinZone;
use zoneproto::lobby::PROTOCOL_VERSION;
use zoneproto::lobby::ZONE_ID_SEARCH;
use zoneproto::session::PlayerId;

use crate::player::Roster;

pub const REASON_OUTDATED: &str = "Your client is outdated";
pub const REASON_NO_ZONES: &str = "No suitable zones found";
pub const REASON_CLOSED: &str = "The requested zone is closed";
pub const REASON_WRONG_PASSWORD: &str = "Wrong password";

#[derive(Debug)]
pub struct Zone {
    pub id: i32,
    /// May be empty (anonymous zone).
    pub name: String,
    /// Empty means no password.
    pub password: String,
    /// Stored for clients; membership is not capped here.
    #[allow(dead_code)]
    pub max_players: u16,
    /// Non-persistent zones are dropped once their last member leaves.
    pub persistent: bool,
    pub open: bool,
    pub members: HashSet<PlayerId>,
}

impl Zone {
    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }
}

/// The owning, insertion-ordered map of zones. Callers serialize access
/// through one mutex; criteria search scans in insertion order.
#[derive(Debug)]
pub struct ZoneRegistry {
    next_id: i32,
    zones: IndexMap<i32, Zone>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            zones: IndexMap::new(),
        }
    }

    pub fn get(&self, id: i32) -> Option<&Zone> {
        self.zones.get(&id)
    }

    pub fn get_mut(&mut self, id: i32) -> Option<&mut Zone> {
        self.zones.get_mut(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Create an open zone with a fresh id from the request fields.
    pub fn create(
        &mut self,
        name: String,
        password: String,
        max_players: u16,
        persistent: bool,
    ) -> i32 {
        let id = self.next_id;
        self.next_id += 1;
        self.zones.insert(
            id,
            Zone {
                id,
                name,
                password,
                max_players,
                persistent,
                open: true,
                members: HashSet::new(),
            },
        );
        id
    }

    /// First open zone matching the join criteria, in insertion order.
    ///
    /// An empty requested name matches any name; a zone without a password
    /// matches any request, otherwise the passwords must be equal.
    pub fn find_open(&self, name: &str, password: &str) -> Option<i32> {
        self.zones
            .values()
            .find(|z| {
                z.open
                    && (name.is_empty() || name == z.name)
                    && (!z.has_password() || password == z.password)
            })
            .map(|z| z.id)
    }

    /// Detach a member. A non-persistent zone vanishes when emptied.
    pub fn leave(&mut self, zone: i32, player: PlayerId) {
        let drop_zone = match self.zones.get_mut(&zone) {
            Some(z) => {
                z.members.remove(&player);
                z.members.is_empty() && !z.persistent
            }
            None => false,
        };
        if drop_zone {
            self.zones.shift_remove(&zone);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Already in the target zone (or the player vanished mid-dispatch):
    /// no state change, no response.
    NoOp,
    /// Response-only refusal; the session stays.
    Rejected(&'static str),
    /// Stale client: respond, then remove the session.
    Outdated,
    Joined { zone: i32, created: bool },
}

/// The zone join state machine.
///
/// The caller holds both registry locks (roster before zones) so the member
/// check stays consistent with concurrent joins and removals.
pub fn join_zone(
    roster: &mut Roster,
    zones: &mut ZoneRegistry,
    player: PlayerId,
    req: &JoinZone,
) -> JoinOutcome {
    let (cur_zone, proto_version) = match roster.get(player) {
        Some(p) => (p.zone, p.proto_version),
        None => return JoinOutcome::NoOp,
    };

    if proto_version != PROTOCOL_VERSION {
        return JoinOutcome::Outdated;
    }

    let resolved = if req.zone_id == ZONE_ID_SEARCH {
        match zones.find_open(&req.name, &req.password) {
            Some(id) => id,
            None if req.name.is_empty() => return JoinOutcome::Rejected(REASON_NO_ZONES),
            // A named search that matched nothing falls through to creation.
            None => -1,
        }
    } else {
        req.zone_id
    };

    if cur_zone == Some(resolved) {
        return JoinOutcome::NoOp;
    }

    let existing = match zones.get(resolved) {
        None => None,
        Some(z) if !z.open => return JoinOutcome::Rejected(REASON_CLOSED),
        Some(z) if z.password != req.password => return JoinOutcome::Rejected(REASON_WRONG_PASSWORD),
        Some(z) => Some(z.id),
    };
    let (target, created) = match existing {
        Some(id) => (id, false),
        None => {
            let id = zones.create(
                req.name.clone(),
                req.password.clone(),
                req.max_players,
                req.persistent,
            );
            (id, true)
        }
    };

    // Commit: at most one zone per player, both sides of the relation updated
    // under the held locks.
    if let Some(prev) = cur_zone {
        zones.leave(prev, player);
    }
    if let Some(z) = zones.get_mut(target) {
        z.members.insert(player);
    }
    if let Some(p) = roster.get_mut(player) {
        p.zone = Some(target);
    }

    JoinOutcome::Joined {
        zone: target,
        created,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Player;
    use tokio::sync::mpsc;
    use tokio::sync::watch;

    fn add_player(roster: &mut Roster, version: i32) -> PlayerId {
        let (write_tx, _write_rx) = mpsc::channel(1);
        let (disconnect_tx, _disconnect_rx) = watch::channel(false);
        roster.add(Player {
            name: "Alice".to_string(),
            alias: String::new(),
            proto_version: version,
            zone: None,
            peer_ip: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            write_tx,
            disconnect_tx,
        })
    }

    fn search(name: &str, password: &str) -> JoinZone {
        JoinZone {
            zone_id: ZONE_ID_SEARCH,
            password: password.to_string(),
            name: name.to_string(),
            persistent: false,
            max_players: 8,
        }
    }

    fn by_id(id: i32, password: &str) -> JoinZone {
        JoinZone {
            zone_id: id,
            password: password.to_string(),
            name: String::new(),
            persistent: false,
            max_players: 8,
        }
    }

    #[test]
    fn criteria_search_finds_open_passwordless_zone() {
        let mut roster = Roster::new();
        let mut zones = ZoneRegistry::new();
        let id = add_player(&mut roster, PROTOCOL_VERSION);
        let lobby = zones.create("Lobby".to_string(), String::new(), 8, true);
        assert_eq!(lobby, 1);

        let outcome = join_zone(&mut roster, &mut zones, id, &search("", ""));
        assert_eq!(
            outcome,
            JoinOutcome::Joined {
                zone: 1,
                created: false
            }
        );
        assert_eq!(roster.get(id).unwrap().zone, Some(1));
        assert!(zones.get(1).unwrap().members.contains(&id));
    }

    #[test]
    fn criteria_search_against_empty_registry_rejects() {
        let mut roster = Roster::new();
        let mut zones = ZoneRegistry::new();
        let id = add_player(&mut roster, PROTOCOL_VERSION);

        let outcome = join_zone(&mut roster, &mut zones, id, &search("", ""));
        assert_eq!(outcome, JoinOutcome::Rejected(REASON_NO_ZONES));
        assert_eq!(roster.get(id).unwrap().zone, None);
        assert!(zones.is_empty());
    }

    #[test]
    fn named_search_with_no_match_creates_the_zone() {
        let mut roster = Roster::new();
        let mut zones = ZoneRegistry::new();
        let id = add_player(&mut roster, PROTOCOL_VERSION);

        let outcome = join_zone(&mut roster, &mut zones, id, &search("Arena", ""));
        assert_eq!(
            outcome,
            JoinOutcome::Joined {
                zone: 1,
                created: true
            }
        );
        assert_eq!(zones.get(1).unwrap().name, "Arena");
    }

    #[test]
    fn criteria_search_skips_closed_and_password_mismatched_zones() {
        let mut roster = Roster::new();
        let mut zones = ZoneRegistry::new();
        let id = add_player(&mut roster, PROTOCOL_VERSION);

        let closed = zones.create("A".to_string(), String::new(), 8, true);
        zones.get_mut(closed).unwrap().open = false;
        let locked = zones.create("B".to_string(), "secret".to_string(), 8, true);
        let open = zones.create("C".to_string(), String::new(), 8, true);

        let outcome = join_zone(&mut roster, &mut zones, id, &search("", ""));
        assert_eq!(
            outcome,
            JoinOutcome::Joined {
                zone: open,
                created: false
            }
        );
        assert!(!zones.get(locked).unwrap().members.contains(&id));
    }

    #[test]
    fn wrong_password_rejects_and_leaves_membership_unchanged() {
        let mut roster = Roster::new();
        let mut zones = ZoneRegistry::new();
        let id = add_player(&mut roster, PROTOCOL_VERSION);
        let z = zones.create("Vault".to_string(), "secret".to_string(), 8, true);

        let outcome = join_zone(&mut roster, &mut zones, id, &by_id(z, "wrong"));
        assert_eq!(outcome, JoinOutcome::Rejected(REASON_WRONG_PASSWORD));
        assert!(zones.get(z).unwrap().members.is_empty());
        assert_eq!(roster.get(id).unwrap().zone, None);
    }

    #[test]
    fn closed_zone_rejects() {
        let mut roster = Roster::new();
        let mut zones = ZoneRegistry::new();
        let id = add_player(&mut roster, PROTOCOL_VERSION);
        let z = zones.create("Done".to_string(), String::new(), 8, true);
        zones.get_mut(z).unwrap().open = false;

        let outcome = join_zone(&mut roster, &mut zones, id, &by_id(z, ""));
        assert_eq!(outcome, JoinOutcome::Rejected(REASON_CLOSED));
    }

    #[test]
    fn unknown_id_creates_a_zone_with_a_fresh_id() {
        let mut roster = Roster::new();
        let mut zones = ZoneRegistry::new();
        let id = add_player(&mut roster, PROTOCOL_VERSION);

        let mut req = by_id(42, "");
        req.name = "Improvised".to_string();
        req.persistent = true;
        let outcome = join_zone(&mut roster, &mut zones, id, &req);
        // The requested id is not reused; the registry assigns its own.
        assert_eq!(
            outcome,
            JoinOutcome::Joined {
                zone: 1,
                created: true
            }
        );
        assert!(zones.get(42).is_none());
        let z = zones.get(1).unwrap();
        assert_eq!(z.name, "Improvised");
        assert_eq!(z.max_players, 8);
        assert!(z.persistent);
    }

    #[test]
    fn rejoining_the_current_zone_is_a_noop() {
        let mut roster = Roster::new();
        let mut zones = ZoneRegistry::new();
        let id = add_player(&mut roster, PROTOCOL_VERSION);
        let z = zones.create("Lobby".to_string(), String::new(), 8, true);

        assert!(matches!(
            join_zone(&mut roster, &mut zones, id, &by_id(z, "")),
            JoinOutcome::Joined { .. }
        ));
        let outcome = join_zone(&mut roster, &mut zones, id, &by_id(z, ""));
        assert_eq!(outcome, JoinOutcome::NoOp);
        assert_eq!(zones.get(z).unwrap().members.len(), 1);
        assert_eq!(roster.get(id).unwrap().zone, Some(z));
    }

    #[test]
    fn switching_zones_leaves_the_previous_one() {
        let mut roster = Roster::new();
        let mut zones = ZoneRegistry::new();
        let id = add_player(&mut roster, PROTOCOL_VERSION);
        let a = zones.create("A".to_string(), String::new(), 8, true);
        let b = zones.create("B".to_string(), String::new(), 8, true);

        join_zone(&mut roster, &mut zones, id, &by_id(a, ""));
        join_zone(&mut roster, &mut zones, id, &by_id(b, ""));
        assert!(zones.get(a).unwrap().members.is_empty());
        assert!(zones.get(b).unwrap().members.contains(&id));
        assert_eq!(roster.get(id).unwrap().zone, Some(b));
    }

    #[test]
    fn empty_non_persistent_zone_is_dropped_on_leave() {
        let mut roster = Roster::new();
        let mut zones = ZoneRegistry::new();
        let id = add_player(&mut roster, PROTOCOL_VERSION);

        let mut req = by_id(9, "");
        req.name = "Ephemeral".to_string();
        join_zone(&mut roster, &mut zones, id, &req);
        let z = roster.get(id).unwrap().zone.unwrap();

        zones.leave(z, id);
        assert!(zones.get(z).is_none());
    }

    #[test]
    fn empty_persistent_zone_survives_leave() {
        let mut roster = Roster::new();
        let mut zones = ZoneRegistry::new();
        let id = add_player(&mut roster, PROTOCOL_VERSION);
        let z = zones.create("Keep".to_string(), String::new(), 8, true);

        join_zone(&mut roster, &mut zones, id, &by_id(z, ""));
        zones.leave(z, id);
        assert!(zones.get(z).unwrap().members.is_empty());
    }

    #[test]
    fn outdated_client_is_rejected_before_anything_else() {
        let mut roster = Roster::new();
        let mut zones = ZoneRegistry::new();
        let id = add_player(&mut roster, PROTOCOL_VERSION - 1);
        zones.create("Lobby".to_string(), String::new(), 8, true);

        let outcome = join_zone(&mut roster, &mut zones, id, &search("", ""));
        assert_eq!(outcome, JoinOutcome::Outdated);
        assert!(zones.get(1).unwrap().members.is_empty());
    }
}
