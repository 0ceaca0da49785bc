use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::domain::{ChatId, Member, MemberId, Members, Message};

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
/// Rooms tracked at once; the least recently active room is forgotten first.
pub const DEFAULT_MAX_ROOMS: usize = 256;
/// Roster size that triggers pruning of members absent from the room's history.
pub const DEFAULT_MAX_MEMBERS: usize = 1000;

/// Bounded per-room message log, oldest first.
#[derive(Debug)]
pub struct ChatHistory {
    capacity: usize,
    messages: VecDeque<Message>,
}

impl ChatHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            messages: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, message: Message) {
        if self.messages.len() == self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    fn has_sender(&self, id: &MemberId) -> bool {
        self.messages.iter().any(|m| &m.sender == id)
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }
}

/// Histories and rosters for the rooms the bot has seen recently.
///
/// Both maps are bounded: at most `max_rooms` rooms are kept, and a roster
/// that grows past `max_members` keeps only bots and members who still have
/// a message in the room's history.
#[derive(Debug)]
pub struct RoomBook {
    capacity: usize,
    max_rooms: usize,
    max_members: usize,
    tick: u64,
    last_active: HashMap<ChatId, u64>,
    histories: HashMap<ChatId, ChatHistory>,
    rosters: HashMap<ChatId, Members>,
}

impl RoomBook {
    pub fn new(capacity: usize) -> Self {
        Self::with_limits(capacity, DEFAULT_MAX_ROOMS, DEFAULT_MAX_MEMBERS)
    }

    pub fn with_limits(capacity: usize, max_rooms: usize, max_members: usize) -> Self {
        Self {
            capacity,
            max_rooms: max_rooms.max(1),
            max_members: max_members.max(1),
            tick: 0,
            last_active: HashMap::new(),
            histories: HashMap::new(),
            rosters: HashMap::new(),
        }
    }

    /// Record a member, refreshing name and flags if already known.
    pub fn upsert_member(&mut self, chat: ChatId, member: Member) {
        self.touch(chat);
        let keep = member.id.clone();
        let roster = self.rosters.entry(chat).or_default();
        roster.insert(member.id.clone(), member);

        if roster.len() > self.max_members {
            let history = self.histories.get(&chat);
            roster.retain(|id, m| {
                m.is_bot || id == &keep || history.is_some_and(|h| h.has_sender(id))
            });
            debug!(chat_id = chat.0, remaining = roster.len(), "roster pruned");
        }
    }

    pub fn push(&mut self, chat: ChatId, message: Message) {
        self.touch(chat);
        let capacity = self.capacity;
        self.histories
            .entry(chat)
            .or_insert_with(|| ChatHistory::new(capacity))
            .push(message);
    }

    pub fn history(&self, chat: ChatId) -> Vec<Message> {
        self.histories
            .get(&chat)
            .map(ChatHistory::snapshot)
            .unwrap_or_default()
    }

    pub fn members(&self, chat: ChatId) -> Members {
        self.rosters.get(&chat).cloned().unwrap_or_default()
    }

    pub fn member(&self, chat: ChatId, id: &MemberId) -> Option<&Member> {
        self.rosters.get(&chat).and_then(|r| r.get(id))
    }

    fn touch(&mut self, chat: ChatId) {
        if !self.last_active.contains_key(&chat) && self.last_active.len() >= self.max_rooms {
            self.evict_idlest();
        }
        self.tick += 1;
        self.last_active.insert(chat, self.tick);
    }

    fn evict_idlest(&mut self) {
        let Some(idle) = self
            .last_active
            .iter()
            .min_by_key(|(_, tick)| **tick)
            .map(|(chat, _)| *chat)
        else {
            return;
        };
        self.last_active.remove(&idle);
        self.histories.remove(&idle);
        self.rosters.remove(&idle);
        debug!(chat_id = idle.0, "idle room forgotten");
    }
}
