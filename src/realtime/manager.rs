/// Socket session and room manager.
///
/// Tracks:
/// - Sessions (sid -> remembered identity + joined rooms)
/// - Rooms (room_id -> [sids])
///
/// Membership is connection-scoped and never persisted; clients re-join
/// after every reconnect.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    /// Identity remembered at join-user time. This, not any client-supplied
    /// field, is what ownership checks compare against.
    pub user_id: Option<String>,
    pub rooms: HashSet<String>,
    pub connected_at: i64,
}

impl Session {
    pub fn new(id: String) -> Self {
        Self {
            id,
            user_id: None,
            rooms: HashSet::new(),
            connected_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Clone)]
pub struct SocketManager {
    /// Session pool: sid -> Session
    sessions: Arc<RwLock<HashMap<String, Session>>>,

    /// Room pool: room_id -> [sids]
    rooms: Arc<RwLock<HashMap<String, HashSet<String>>>>,
}

impl SocketManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn generate_sid() -> String {
        Uuid::new_v4().to_string()
    }

    pub async fn create_session(&self, sid: &str) -> Session {
        let session = Session::new(sid.to_string());
        let mut sessions = self.sessions.write().await;
        sessions.insert(sid.to_string(), session.clone());
        tracing::debug!("Created session: {}", sid);
        session
    }

    pub async fn get_session(&self, sid: &str) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions.get(sid).cloned()
    }

    /// Remember the identity for a connection. Set once per connection by
    /// the join-user event.
    pub async fn set_session_user(&self, sid: &str, user_id: &str) -> Result<(), String> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(sid)
            .ok_or_else(|| format!("Session not found: {}", sid))?;

        session.user_id = Some(user_id.to_string());
        tracing::debug!("Session {} identified as user {}", sid, user_id);
        Ok(())
    }

    pub async fn session_user(&self, sid: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        sessions.get(sid).and_then(|s| s.user_id.clone())
    }

    /// Remove a session and scrub it from every room.
    pub async fn remove_session(&self, sid: &str) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(sid).is_some() {
            drop(sessions); // Release lock before acquiring another

            let mut rooms = self.rooms.write().await;
            for (_room_id, sids) in rooms.iter_mut() {
                sids.remove(sid);
            }
            rooms.retain(|_, sids| !sids.is_empty());

            tracing::debug!("Removed session: {}", sid);
        }
    }

    /// Subscribe a connection to a room. Idempotent.
    pub async fn join_room(&self, sid: &str, room: &str) -> Result<(), String> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(sid)
            .ok_or_else(|| format!("Session not found: {}", sid))?;

        session.rooms.insert(room.to_string());
        drop(sessions);

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_insert_with(HashSet::new)
            .insert(sid.to_string());

        tracing::debug!("Session {} joined room {}", sid, room);
        Ok(())
    }

    pub async fn get_room_sessions(&self, room: &str) -> Vec<String> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room)
            .map(|sids| sids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for SocketManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_lifecycle() {
        let manager = SocketManager::new();
        let sid = "test-sid";

        manager.create_session(sid).await;
        assert!(manager.get_session(sid).await.is_some());

        manager.set_session_user(sid, "user-123").await.unwrap();
        assert_eq!(
            manager.session_user(sid).await,
            Some("user-123".to_string())
        );

        manager.remove_session(sid).await;
        assert!(manager.get_session(sid).await.is_none());
    }

    #[tokio::test]
    async fn test_rooms() {
        let manager = SocketManager::new();

        manager.create_session("sid-1").await;
        manager.create_session("sid-2").await;

        manager.join_room("sid-1", "1_2").await.unwrap();
        manager.join_room("sid-2", "1_2").await.unwrap();

        // Re-joining is a no-op
        manager.join_room("sid-1", "1_2").await.unwrap();

        let room_sessions = manager.get_room_sessions("1_2").await;
        assert_eq!(room_sessions.len(), 2);

        // Disconnect scrubs room membership
        manager.remove_session("sid-1").await;
        let room_sessions = manager.get_room_sessions("1_2").await;
        assert_eq!(room_sessions, vec!["sid-2".to_string()]);
    }

    #[tokio::test]
    async fn test_join_room_requires_session() {
        let manager = SocketManager::new();
        assert!(manager.join_room("ghost", "1_2").await.is_err());
    }
}
