//! The single-row wallet session marker.

use chrono::{DateTime, Utc};
use rusqlite::params;

use cypherchat_shared::ChainAddress;

use crate::database::Database;
use crate::error::Result;
use crate::models::SessionMarker;

impl Database {
    /// Record the connected wallet, replacing any previous marker.
    pub fn save_session(&self, marker: &SessionMarker) -> Result<()> {
        self.conn().execute(
            "INSERT INTO wallet_session (id, wallet, account, connected_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                wallet = excluded.wallet,
                account = excluded.account,
                connected_at = excluded.connected_at",
            params![
                marker.wallet,
                marker.account.to_hex(),
                marker.connected_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_session(&self) -> Result<Option<SessionMarker>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT wallet, account, connected_at FROM wallet_session WHERE id = 1")?;
        let mut rows = stmt.query_map([], row_to_marker)?;
        Ok(rows.next().transpose()?)
    }

    /// Forget the marker. Returns `true` if one existed.
    pub fn clear_session(&self) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM wallet_session WHERE id = 1", [])?;
        Ok(affected > 0)
    }
}

fn row_to_marker(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionMarker> {
    let wallet: String = row.get(0)?;
    let account_str: String = row.get(1)?;
    let connected_str: String = row.get(2)?;

    let account = ChainAddress::parse(&account_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let connected_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&connected_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(SessionMarker {
        wallet,
        account,
        connected_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(account: &str) -> SessionMarker {
        SessionMarker {
            wallet: "http://127.0.0.1:8545".into(),
            account: ChainAddress::parse(account).unwrap(),
            connected_at: Utc::now(),
        }
    }

    #[test]
    fn test_session_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("session.db")).unwrap();

        assert!(db.load_session().unwrap().is_none());

        let first = marker("0x00000000000000000000000000000000000000aa");
        db.save_session(&first).unwrap();
        assert_eq!(db.load_session().unwrap().unwrap().account, first.account);

        let second = marker("0x00000000000000000000000000000000000000bb");
        db.save_session(&second).unwrap();
        let loaded = db.load_session().unwrap().unwrap();
        assert_eq!(loaded.account, second.account);

        assert!(db.clear_session().unwrap());
        assert!(db.load_session().unwrap().is_none());
        assert!(!db.clear_session().unwrap());
    }
}
