use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::debug;

use super::client::{ClientId, Outbound, OutboundSender};
use crate::crdt::MergeDocument;
use crate::models::ServerMessage;

pub const PALETTE: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8",
    "#F7DC6F", "#BB8FCE", "#85C1E2", "#F8B739", "#52B788",
];

/// Random palette color, preferring ones no live member wears
pub fn pick_color(in_use: &HashSet<&str>) -> String {
    let mut rng = rand::thread_rng();
    let free: Vec<&str> = PALETTE.iter().copied().filter(|c| !in_use.contains(c)).collect();
    free.choose(&mut rng)
        .or_else(|| PALETTE.choose(&mut rng))
        .copied()
        .unwrap_or(PALETTE[0])
        .to_string()
}

/// A client currently joined to a session
#[derive(Debug, Clone)]
pub struct Member {
    pub client_id: ClientId,
    pub user_id: String,
    pub username: String,
    pub color: String,
    pub tx: OutboundSender,
}

/// In-memory state of one session: who is here and the live document.
/// Always accessed through its own mutex, which serializes every mutation
/// of the session.
pub struct SessionRoom {
    pub session_id: String,
    pub document_type: String,
    pub document_id: String,
    pub members: HashMap<ClientId, Member>,
    pub doc: Option<Box<dyn MergeDocument>>,
    /// Updates applied since the last successful snapshot
    pub dirty: bool,
    pub last_persisted: Option<Instant>,
}

impl SessionRoom {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            document_type: String::new(),
            document_id: String::new(),
            members: HashMap::new(),
            doc: None,
            dirty: false,
            last_persisted: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.members.is_empty() && self.doc.is_none()
    }

    pub fn colors_in_use(&self) -> HashSet<&str> {
        self.members.values().map(|m| m.color.as_str()).collect()
    }

    pub fn member_for_user(&self, user_id: &str) -> Option<&Member> {
        self.members.values().find(|m| m.user_id == user_id)
    }

    /// Send to every member except `except`. Returns the members whose
    /// writer has already gone away.
    pub fn broadcast(&self, msg: &ServerMessage, except: Option<&str>) -> Vec<ClientId> {
        let mut gone = Vec::new();
        for member in self.members.values() {
            if except == Some(member.client_id.as_str()) {
                continue;
            }
            if member.tx.send(Outbound::Message(msg.clone())).is_err() {
                debug!("Dropping message for departed client {} in session {}", member.client_id, self.session_id);
                gone.push(member.client_id.clone());
            }
        }
        gone
    }

    /// Rate limiter for update-triggered snapshots. Reserves the slot when due.
    pub fn take_snapshot_slot(&mut self, min_interval: Duration) -> bool {
        let due = match self.last_persisted {
            Some(at) => at.elapsed() >= min_interval,
            None => true,
        };
        if due {
            self.last_persisted = Some(Instant::now());
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn member(id: &str, color: &str) -> (Member, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let member = Member {
            client_id: id.to_string(),
            user_id: format!("user-{}", id),
            username: id.to_uppercase(),
            color: color.to_string(),
            tx,
        };
        (member, rx)
    }

    #[test]
    fn picks_an_unused_color_while_one_is_left() {
        let in_use: HashSet<&str> = PALETTE[..9].iter().copied().collect();
        for _ in 0..20 {
            assert_eq!(pick_color(&in_use), PALETTE[9]);
        }
        let all: HashSet<&str> = PALETTE.iter().copied().collect();
        assert!(PALETTE.contains(&pick_color(&all).as_str()));
    }

    #[test]
    fn broadcast_skips_the_sender() {
        let mut room = SessionRoom::new("S1");
        let (a, mut rx_a) = member("a", PALETTE[0]);
        let (b, mut rx_b) = member("b", PALETTE[1]);
        room.members.insert(a.client_id.clone(), a);
        room.members.insert(b.client_id.clone(), b);

        let gone = room.broadcast(&ServerMessage::error("hello"), Some("a"));
        assert!(gone.is_empty());
        assert!(rx_a.try_recv().is_err());
        assert!(matches!(rx_b.try_recv(), Ok(Outbound::Message(ServerMessage::Error(_)))));
    }

    #[test]
    fn broadcast_reports_departed_members() {
        let mut room = SessionRoom::new("S1");
        let (a, rx_a) = member("a", PALETTE[0]);
        room.members.insert(a.client_id.clone(), a);
        drop(rx_a);
        assert_eq!(room.broadcast(&ServerMessage::error("x"), None), vec!["a".to_string()]);
    }

    #[test]
    fn snapshot_slot_is_rate_limited() {
        let mut room = SessionRoom::new("S1");
        assert!(room.take_snapshot_slot(Duration::from_secs(60)));
        assert!(!room.take_snapshot_slot(Duration::from_secs(60)));
        assert!(room.take_snapshot_slot(Duration::ZERO));
    }
}
