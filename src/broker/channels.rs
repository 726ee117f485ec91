/// Channel membership table
///
/// A channel exists only while it has members: it is created by the first
/// join and removed when the last member leaves.
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

use super::connection::ClientId;

#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub members: BTreeSet<ClientId>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// False when the client was already a member
    pub newly_joined: bool,
    /// True when this join created the channel
    pub created: bool,
    pub member_count: usize,
}

/// Outcome of a leave by a current member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub remaining: Vec<ClientId>,
    /// True when the channel was released
    pub removed: bool,
}

#[derive(Debug, Default)]
pub struct ChannelTable {
    channels: HashMap<String, Channel>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, name: &str, client: &ClientId) -> JoinOutcome {
        let created = !self.channels.contains_key(name);
        let channel = self
            .channels
            .entry(name.to_string())
            .or_insert_with(|| Channel {
                name: name.to_string(),
                members: BTreeSet::new(),
                created_at: Utc::now(),
            });
        let newly_joined = channel.members.insert(client.clone());

        JoinOutcome {
            newly_joined,
            created,
            member_count: channel.members.len(),
        }
    }

    /// `None` when the client was not a member
    pub fn leave(&mut self, name: &str, client: &ClientId) -> Option<LeaveOutcome> {
        let channel = self.channels.get_mut(name)?;
        if !channel.members.remove(client) {
            return None;
        }

        let remaining: Vec<ClientId> = channel.members.iter().cloned().collect();
        let removed = remaining.is_empty();
        if removed {
            self.channels.remove(name);
        }
        Some(LeaveOutcome { remaining, removed })
    }

    pub fn is_member(&self, name: &str, client: &ClientId) -> bool {
        self.channels
            .get(name)
            .map(|c| c.members.contains(client))
            .unwrap_or(false)
    }

    pub fn members(&self, name: &str) -> Vec<ClientId> {
        self.channels
            .get(name)
            .map(|c| c.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channel name -> member count
    pub fn sizes(&self) -> HashMap<String, usize> {
        self.channels
            .iter()
            .map(|(name, c)| (name.clone(), c.members.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_is_idempotent() {
        let mut table = ChannelTable::new();
        let a = ClientId::from("a");

        let first = table.join("lobby", &a);
        assert!(first.created && first.newly_joined);
        let second = table.join("lobby", &a);
        assert!(!second.created && !second.newly_joined);
        assert_eq!(second.member_count, 1);
        assert_eq!(table.members("lobby"), vec![a]);
    }

    #[test]
    fn test_last_leave_releases_channel() {
        let mut table = ChannelTable::new();
        let a = ClientId::from("a");
        let b = ClientId::from("b");
        table.join("lobby", &a);
        table.join("lobby", &b);

        let outcome = table.leave("lobby", &a).unwrap();
        assert_eq!(outcome.remaining, vec![b.clone()]);
        assert!(!outcome.removed);

        assert!(table.leave("lobby", &a).is_none());
        assert!(table.leave("lobby", &b).unwrap().removed);
        assert!(table.is_empty());
        assert!(table.leave("lobby", &b).is_none());
    }
}
