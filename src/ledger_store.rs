use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, params};

use crate::pick::Pick;

/// Emitted picks and their settlements, one row per pick key.
pub struct LedgerStore {
    conn: Connection,
}

impl LedgerStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create ledger dir {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open ledger db {}", path.display()))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory ledger db")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS picks (
                pick_key TEXT PRIMARY KEY,
                match_date TEXT NOT NULL,
                model_id TEXT NOT NULL,
                settled INTEGER NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_picks_date ON picks(match_date);
            CREATE INDEX IF NOT EXISTS idx_picks_settled ON picks(settled);
            "#,
        )
        .context("create ledger schema")?;
        Ok(Self { conn })
    }

    /// Inserts or replaces a pick. A settled row is never downgraded back to
    /// unsettled.
    pub fn upsert(&self, pick: &Pick) -> Result<()> {
        let body = serde_json::to_string(pick).context("serialize pick")?;
        self.conn
            .execute(
                r#"
                INSERT INTO picks (pick_key, match_date, model_id, settled, body, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(pick_key) DO UPDATE SET
                    model_id = excluded.model_id,
                    settled = excluded.settled,
                    body = excluded.body,
                    updated_at = excluded.updated_at
                WHERE picks.settled = 0
                "#,
                params![
                    pick.key.to_string(),
                    pick.key.match_date.to_string(),
                    pick.model_id,
                    pick.is_settled() as i64,
                    body,
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| format!("upsert pick {}", pick.key))?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn load_all(&self) -> Result<Vec<Pick>> {
        let mut stmt = self
            .conn
            .prepare("SELECT pick_key, body FROM picks ORDER BY match_date, pick_key")
            .context("prepare pick query")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .context("query picks")?;
        let mut out = Vec::new();
        for row in rows {
            let (key, body) = row.context("read pick row")?;
            let pick: Pick =
                serde_json::from_str(&body).with_context(|| format!("decode pick {key}"))?;
            out.push(pick);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<(usize, usize)> {
        self.conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(settled), 0) FROM picks",
                [],
                |row| Ok((row.get::<_, i64>(0)? as usize, row.get::<_, i64>(1)? as usize)),
            )
            .context("count picks")
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::LedgerStore;
    use crate::outcome::Outcome;
    use crate::pick::Settlement;
    use crate::test_support::pick;

    #[test]
    fn settled_rows_are_not_overwritten() {
        let store = LedgerStore::in_memory().unwrap();
        let open = pick("Team A", "Team B", 21, Some(2.0), true);
        store.upsert(&open).unwrap();
        assert_eq!(store.count().unwrap(), (1, 0));

        let mut settled = open.clone();
        settled.settlement = Some(Settlement {
            actual: Outcome::Home,
            home_goals: Some(1),
            away_goals: Some(0),
            correct: true,
            stake: 100.0,
            profit: 100.0,
            settled_at: Utc::now(),
        });
        store.upsert(&settled).unwrap();
        assert_eq!(store.count().unwrap(), (1, 1));

        // A stale unsettled copy must not reopen the row.
        store.upsert(&open).unwrap();
        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].settlement.as_ref().map(|s| s.actual), Some(Outcome::Home));
    }

    #[test]
    fn load_all_orders_by_date() {
        let store = LedgerStore::in_memory().unwrap();
        store.upsert(&pick("C", "D", 9, None, false)).unwrap();
        store.upsert(&pick("A", "B", 3, Some(1.8), true)).unwrap();
        let days: Vec<String> = store
            .load_all()
            .unwrap()
            .iter()
            .map(|p| p.key.match_date.to_string())
            .collect();
        assert_eq!(days, ["2026-02-03", "2026-02-09"]);
    }

    #[test]
    fn open_reports_unusable_parent_dir() {
        let blocker = std::env::temp_dir().join(format!("kicklab_blocker_{}", std::process::id()));
        std::fs::write(&blocker, b"not a directory").unwrap();
        let err = LedgerStore::open(&blocker.join("picks.sqlite"))
            .err()
            .expect("open under a regular file must fail");
        assert!(format!("{err:#}").contains("create ledger dir"), "{err:#}");
        std::fs::remove_file(&blocker).unwrap();
    }
}
