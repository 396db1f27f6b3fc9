/// Presence registry: which users currently hold a live realtime connection.
///
/// Process-memory only; rebuilt empty on restart. At most one entry per user
/// is guaranteed by overwrite-on-reconnect. Only the event engine mutates
/// this map, so the RwLock reproduces the effectively-serialized semantics
/// the engine relies on.
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct PresenceRegistry {
    /// user_id -> connection sid
    online: Arc<RwLock<HashMap<String, String>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            online: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert or overwrite the mapping for a user. A reconnect replaces the
    /// previous handle rather than duplicating the entry.
    pub async fn register(&self, user_id: &str, sid: &str) {
        let mut online = self.online.write().await;
        if let Some(previous) = online.insert(user_id.to_string(), sid.to_string()) {
            tracing::debug!(
                "User {} reconnected: {} replaces {}",
                user_id,
                sid,
                previous
            );
        } else {
            tracing::debug!("User {} is online on {}", user_id, sid);
        }
    }

    /// Remove the entry owned by this connection handle. Returns the user id
    /// that went offline, or None when the handle owns no entry: either the
    /// connection never identified, or a reconnect already superseded it.
    pub async fn unregister(&self, sid: &str) -> Option<String> {
        let mut online = self.online.write().await;
        let user_id = online
            .iter()
            .find(|(_, handle)| handle.as_str() == sid)
            .map(|(user_id, _)| user_id.clone())?;

        online.remove(&user_id);
        tracing::debug!("User {} is offline", user_id);
        Some(user_id)
    }

    /// Snapshot of currently registered user ids. No ordering guarantee.
    pub async fn list_online(&self) -> Vec<String> {
        let online = self.online.read().await;
        online.keys().cloned().collect()
    }

    pub async fn handle_for(&self, user_id: &str) -> Option<String> {
        let online = self.online.read().await;
        online.get(user_id).cloned()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = PresenceRegistry::new();

        registry.register("user-1", "sid-a").await;
        assert_eq!(registry.list_online().await, vec!["user-1".to_string()]);

        let offline = registry.unregister("sid-a").await;
        assert_eq!(offline, Some("user-1".to_string()));
        assert!(registry.list_online().await.is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_overwrites() {
        let registry = PresenceRegistry::new();

        registry.register("user-1", "sid-old").await;
        registry.register("user-1", "sid-new").await;

        // Exactly one entry, mapped to the newest connection
        let online = registry.list_online().await;
        assert_eq!(online.len(), 1);
        assert_eq!(
            registry.handle_for("user-1").await,
            Some("sid-new".to_string())
        );

        // The superseded connection's disconnect must not knock the user
        // offline
        assert_eq!(registry.unregister("sid-old").await, None);
        assert_eq!(registry.list_online().await.len(), 1);

        assert_eq!(
            registry.unregister("sid-new").await,
            Some("user-1".to_string())
        );
        assert!(registry.list_online().await.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_unknown_handle() {
        let registry = PresenceRegistry::new();
        assert_eq!(registry.unregister("never-identified").await, None);
    }
}
