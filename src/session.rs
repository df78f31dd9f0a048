//! Session manager: response-ID-addressable chat sessions for the OpenAI
//! Responses dialect's conversation resumption, plus per-session channel
//! affinity.
//!
//! Grounded on the teacher's `once_cell`-backed global-state idiom
//! generalized to own both the forward map (session id → session) and the
//! reverse map (response id → session id) behind one lock, so eviction can
//! wipe both sides atomically and a response id can never outlive its
//! message.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub response_id: Option<String>,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    pub created_at: SystemTime,
    pub last_access: SystemTime,
    pub token_count: usize,
    pub channel_affinity: Option<String>,
}

pub struct SessionManager {
    max_messages: usize,
    max_age: Duration,
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    sessions: HashMap<String, Session>,
    response_to_session: HashMap<String, String>,
}

impl SessionManager {
    pub fn new(max_messages: usize, max_age_hours: i64) -> Self {
        Self {
            max_messages: max_messages.max(1),
            max_age: Duration::from_secs((max_age_hours.max(0) as u64) * 3600),
            state: RwLock::new(State::default()),
        }
    }

    /// If `previous_response_id` maps to a live session, returns it (and
    /// bumps `last_access`); otherwise creates and registers a new one.
    /// Second element of the tuple is whether a new session was created.
    pub fn get_or_create_session(&self, previous_response_id: Option<&str>) -> (Session, bool) {
        let mut state = self.state.write().unwrap();

        if let Some(rid) = previous_response_id {
            if let Some(session_id) = state.response_to_session.get(rid).cloned() {
                if let Some(session) = state.sessions.get_mut(&session_id) {
                    session.last_access = SystemTime::now();
                    return (session.clone(), false);
                }
            }
        }

        let now = SystemTime::now();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            messages: Vec::new(),
            created_at: now,
            last_access: now,
            token_count: 0,
            channel_affinity: None,
        };
        state.sessions.insert(session.id.clone(), session.clone());
        (session, true)
    }

    /// Appends a message, allocates a fresh response id, and registers the
    /// reverse map entry. When the message count would exceed
    /// `max_messages`, oldest entries are dropped and their response ids
    /// are unmapped too, so a stale id can never resolve again.
    pub fn add_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
    ) -> Result<String, String> {
        let mut state = self.state.write().unwrap();
        let response_id = uuid::Uuid::new_v4().to_string();

        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| format!("no session {session_id}"))?;

        session.messages.push(Message {
            role: role.to_string(),
            content: content.to_string(),
            response_id: Some(response_id.clone()),
            timestamp: SystemTime::now(),
        });
        session.token_count += content.len() / 4;
        session.last_access = SystemTime::now();

        let mut evicted_response_ids = Vec::new();
        while session.messages.len() > self.max_messages {
            let dropped = session.messages.remove(0);
            if let Some(rid) = dropped.response_id {
                evicted_response_ids.push(rid);
            }
        }

        state.response_to_session.insert(response_id.clone(), session_id.to_string());
        for rid in evicted_response_ids {
            state.response_to_session.remove(&rid);
        }

        Ok(response_id)
    }

    pub fn get_messages(&self, session_id: &str) -> Vec<Message> {
        self.state
            .read()
            .unwrap()
            .sessions
            .get(session_id)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    pub fn set_channel_affinity(&self, session_id: &str, channel_id: &str) {
        if let Some(session) = self.state.write().unwrap().sessions.get_mut(session_id) {
            session.channel_affinity = Some(channel_id.to_string());
        }
    }

    pub fn get_channel_affinity(&self, session_id: &str) -> Option<String> {
        self.state
            .read()
            .unwrap()
            .sessions
            .get(session_id)
            .and_then(|s| s.channel_affinity.clone())
    }

    pub fn delete_session(&self, session_id: &str) {
        let mut state = self.state.write().unwrap();
        if let Some(session) = state.sessions.remove(session_id) {
            for message in session.messages {
                if let Some(rid) = message.response_id {
                    state.response_to_session.remove(&rid);
                }
            }
        }
    }

    pub fn get_session_by_response_id(&self, response_id: &str) -> Option<Session> {
        let state = self.state.read().unwrap();
        let session_id = state.response_to_session.get(response_id)?;
        state.sessions.get(session_id).cloned()
    }

    /// Evicts sessions whose `last_access` is older than `max_age`,
    /// wiping every response id they ever emitted. Intended to run every
    /// 5 minutes.
    pub fn sweep_expired(&self) {
        let mut state = self.state.write().unwrap();
        let now = SystemTime::now();
        let expired: Vec<String> = state
            .sessions
            .iter()
            .filter(|(_, s)| {
                now.duration_since(s.last_access).unwrap_or_default() > self.max_age
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(session) = state.sessions.remove(&id) {
                for message in session.messages {
                    if let Some(rid) = message.response_id {
                        state.response_to_session.remove(&rid);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_message_resolves_back_through_get_or_create() {
        let sessions = SessionManager::new(200, 24);
        let (session, created) = sessions.get_or_create_session(None);
        assert!(created);

        let rid = sessions.add_message(&session.id, "assistant", "hi").unwrap();
        let (resumed, created_again) = sessions.get_or_create_session(Some(&rid));
        assert!(!created_again);
        assert_eq!(resumed.id, session.id);
    }

    #[test]
    fn eviction_by_age_unmaps_response_id() {
        let sessions = SessionManager::new(200, 0); // max_age effectively zero
        let (session, _) = sessions.get_or_create_session(None);
        let rid = sessions.add_message(&session.id, "assistant", "hi").unwrap();

        sessions.sweep_expired();
        assert!(sessions.get_session_by_response_id(&rid).is_none());
    }

    #[test]
    fn overflow_drops_oldest_and_unmaps_its_response_id() {
        let sessions = SessionManager::new(2, 24);
        let (session, _) = sessions.get_or_create_session(None);
        let rid1 = sessions.add_message(&session.id, "user", "one").unwrap();
        let _rid2 = sessions.add_message(&session.id, "assistant", "two").unwrap();
        let _rid3 = sessions.add_message(&session.id, "user", "three").unwrap();

        assert_eq!(sessions.get_messages(&session.id).len(), 2);
        assert!(sessions.get_session_by_response_id(&rid1).is_none());
    }
}
