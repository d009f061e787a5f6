//! Persistent keyed configuration store (§6 "Persistent state layout").
//!
//! This is not a print-job queue — print jobs are never persisted, per the
//! daemon's Non-goals. It stores only the long-lived keys a daemon needs to
//! survive a restart: device/tenant identity, cloud coordinates, and the
//! printer/role configuration mirrored from the Registry.

use pbkdf2::pbkdf2_hmac;
use serde::{de::DeserializeOwned, Serialize};
use sha2::Sha256;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_rusqlite::Connection;
use tracing::info;

use crate::errors::{DaemonError, Result};

const PBKDF2_ROUNDS: u32 = 100_000;
const KEY_DERIVATION_SALT: &str = "hearth-bridge-daemon-store-v1";

/// Keys used by the persistent store, per §6. The store accepts any
/// string key — this is just the vocabulary the rest of the daemon uses.
pub mod keys {
    pub const DEVICE_ID: &str = "deviceId";
    pub const RESTAURANT_ID: &str = "restaurantId";
    pub const RESTAURANT_NAME: &str = "restaurantName";
    pub const SUPABASE_URL: &str = "supabaseUrl";
    pub const SUPABASE_KEY: &str = "supabaseKey";
    pub const FRONTEND_URL: &str = "frontendUrl";
    pub const PRINTER: &str = "printer";
    pub const LOCAL_PRINTERS: &str = "localPrinters";
    pub const PRINTER_ASSIGNMENTS: &str = "printerAssignments";
    pub const SYNC_WITH_DASHBOARD: &str = "syncWithDashboard";
    pub const SETUP_COMPLETED: &str = "setupCompleted";
    pub const LAST_HEARTBEAT: &str = "lastHeartbeat";
}

/// Derive a SQLCipher key from the tenant id using PBKDF2-HMAC-SHA256.
///
/// The daemon is restarted under the same restaurant id every time, so this
/// stays deterministic across restarts without needing its own persisted
/// salt.
pub fn derive_key(restaurant_id: &str) -> String {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(
        restaurant_id.as_bytes(),
        KEY_DERIVATION_SALT.as_bytes(),
        PBKDF2_ROUNDS,
        &mut out,
    );
    hex::encode(out)
}

pub struct ConfigStore {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigStore {
    pub async fn open(db_path: PathBuf, restaurant_id: &str) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path).await?;
        let key = derive_key(restaurant_id);
        conn.call(move |conn| {
            conn.pragma_update(None, "key", &key)?;
            Ok(())
        })
        .await
        .map_err(|e| DaemonError::Config(format!("failed to unlock config store: {e}")))?;

        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS kv_store (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
                [],
            )?;
            Ok(())
        })
        .await?;

        info!("config store opened");
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let key = key.to_string();
        let value = serde_json::to_string(value)?;
        let conn = self.conn.lock().await;
        conn.call(move |conn| {
            conn.execute(
                "INSERT INTO kv_store (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                rusqlite::params![key, value],
            )?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let key = key.to_string();
        let conn = self.conn.lock().await;
        let raw: Option<String> = conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT value FROM kv_store WHERE key = ?1")?;
                let mut rows = stmt.query(rusqlite::params![key])?;
                if let Some(row) = rows.next()? {
                    Ok(Some(row.get::<_, String>(0)?))
                } else {
                    Ok(None)
                }
            })
            .await?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        let conn = self.conn.lock().await;
        conn.call(move |conn| {
            conn.execute("DELETE FROM kv_store WHERE key = ?1", rusqlite::params![key])?;
            Ok(())
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_is_deterministic() {
        assert_eq!(derive_key("rest_1"), derive_key("rest_1"));
        assert_ne!(derive_key("rest_1"), derive_key("rest_2"));
    }

    #[tokio::test]
    async fn round_trips_typed_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("store.db"), "rest_1").await.unwrap();

        store.set(keys::RESTAURANT_ID, &"rest_1".to_string()).await.unwrap();
        let value: Option<String> = store.get(keys::RESTAURANT_ID).await.unwrap();
        assert_eq!(value, Some("rest_1".to_string()));

        store.set(keys::SETUP_COMPLETED, &true).await.unwrap();
        let done: Option<bool> = store.get(keys::SETUP_COMPLETED).await.unwrap();
        assert_eq!(done, Some(true));

        assert_eq!(store.get::<String>("missing").await.unwrap(), None);

        store.delete(keys::RESTAURANT_ID).await.unwrap();
        assert_eq!(store.get::<String>(keys::RESTAURANT_ID).await.unwrap(), None);
    }
}
