//! Save record repository implementation

use crate::error::{Error, Result};
use crate::models::{BatchPayload, PlayerId, SaveBatch, SaveRecord, SaveRecordId};
use rusqlite::{params, Connection, OptionalExtension};

/// A record as kept in the local store, with its current outbound payload
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSaveRecord {
    pub record: SaveRecord,
    /// Number of conflict rewrites applied to the payload
    pub revision: u32,
}

/// Trait for local save record storage
pub trait SaveRecordRepository {
    /// Write a sealed record; fails if the record has no finalized batch
    fn save(&self, record: &SaveRecord) -> Result<()>;

    /// Get a record by ID
    fn get(&self, id: &SaveRecordId) -> Result<Option<StoredSaveRecord>>;

    /// Replace the outbound payload after conflict resolution
    fn update_outbound(&self, id: &SaveRecordId, payload: &BatchPayload) -> Result<()>;

    /// Remember the latest server attempt
    fn mark_server_attempt(&self, id: &SaveRecordId, attempted_at: i64) -> Result<()>;

    /// Drop a confirmed or superseded record. Returns false if it was already gone.
    fn retire(&self, id: &SaveRecordId) -> Result<bool>;

    /// Records still waiting for confirmation, oldest batch first
    fn list_unconfirmed(&self, player: Option<&PlayerId>) -> Result<Vec<StoredSaveRecord>>;
}

/// `SQLite` implementation of `SaveRecordRepository`
pub struct SqliteSaveRecordRepository<'a> {
    conn: &'a Connection,
}

struct SaveRecordRow {
    id: String,
    player_id: String,
    payload_json: String,
    saved_locally: bool,
    local_saved_at: Option<i64>,
    last_attempted_server_save: Option<i64>,
    batch_populated_at: Option<i64>,
    revision: i64,
}

const SELECT_COLUMNS: &str = "SELECT id, player_id, payload_json, saved_locally, local_saved_at, \
     last_attempted_server_save, batch_populated_at, revision FROM save_records";

impl<'a> SqliteSaveRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SaveRecordRow> {
        Ok(SaveRecordRow {
            id: row.get(0)?,
            player_id: row.get(1)?,
            payload_json: row.get(2)?,
            saved_locally: row.get::<_, i32>(3)? != 0,
            local_saved_at: row.get(4)?,
            last_attempted_server_save: row.get(5)?,
            batch_populated_at: row.get(6)?,
            revision: row.get(7)?,
        })
    }

    fn into_stored(row: SaveRecordRow) -> Result<StoredSaveRecord> {
        let id: SaveRecordId = row
            .id
            .parse()
            .map_err(|_| Error::InvalidInput(format!("Invalid save record ID '{}'", row.id)))?;
        let payload: BatchPayload = serde_json::from_str(&row.payload_json)?;

        let mut record = SaveRecord::with_id(PlayerId::new(row.player_id), id);
        let populated_at = row.batch_populated_at.unwrap_or(payload.timestamp);
        record.populate_player_save_batch(SaveBatch::from_payload(payload), populated_at)?;
        record.saved_locally = row.saved_locally;
        record.last_local_save = row.local_saved_at;
        record.last_attempted_server_save = row.last_attempted_server_save;

        Ok(StoredSaveRecord {
            record,
            revision: u32::try_from(row.revision).unwrap_or(u32::MAX),
        })
    }

    fn ensure_updated(changed: usize, id: &SaveRecordId) -> Result<()> {
        if changed == 0 {
            return Err(Error::NotFound(format!("Save record {id} not found")));
        }
        Ok(())
    }
}

impl SaveRecordRepository for SqliteSaveRecordRepository<'_> {
    fn save(&self, record: &SaveRecord) -> Result<()> {
        let payload = record.payload().ok_or_else(|| {
            Error::invalid_state(format!(
                "save record {} has no finalized batch to store",
                record.save_record_id
            ))
        })?;

        self.conn.execute(
            "INSERT INTO save_records (id, player_id, session_batch_id, sequence, weight, payload_json,
                saved_locally, local_saved_at, last_attempted_server_save, batch_populated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.save_record_id.as_str(),
                record.player_id.as_str(),
                payload.session_batch_id.as_str(),
                i64::try_from(payload.sequence).unwrap_or(i64::MAX),
                payload.weight.as_str(),
                serde_json::to_string(payload)?,
                i32::from(record.saved_locally),
                record.last_local_save,
                record.last_attempted_server_save,
                record.batch_populated_at,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &SaveRecordId) -> Result<Option<StoredSaveRecord>> {
        let row = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?"),
                params![id.as_str()],
                Self::parse_row,
            )
            .optional()?;
        row.map(Self::into_stored).transpose()
    }

    fn update_outbound(&self, id: &SaveRecordId, payload: &BatchPayload) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE save_records SET payload_json = ?, revision = revision + 1 WHERE id = ?",
            params![serde_json::to_string(payload)?, id.as_str()],
        )?;
        Self::ensure_updated(changed, id)
    }

    fn mark_server_attempt(&self, id: &SaveRecordId, attempted_at: i64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE save_records SET last_attempted_server_save = ? WHERE id = ?",
            params![attempted_at, id.as_str()],
        )?;
        Self::ensure_updated(changed, id)
    }

    fn retire(&self, id: &SaveRecordId) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM save_records WHERE id = ?", params![id.as_str()])?;
        Ok(changed > 0)
    }

    fn list_unconfirmed(&self, player: Option<&PlayerId>) -> Result<Vec<StoredSaveRecord>> {
        let rows = if let Some(player) = player {
            let mut stmt = self.conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE player_id = ? ORDER BY sequence ASC"
            ))?;
            let rows = stmt
                .query_map(params![player.as_str()], Self::parse_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        } else {
            let mut stmt = self.conn.prepare(&format!(
                "{SELECT_COLUMNS} ORDER BY player_id ASC, sequence ASC"
            ))?;
            let rows = stmt
                .query_map([], Self::parse_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        rows.into_iter().map(Self::into_stored).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{PersistenceInstruction, WeightClass};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn sealed_record(player: &str, sequence: u64) -> SaveRecord {
        let mut batch = SaveBatch::new(PlayerId::new(player), sequence, WeightClass::Slim, 100);
        batch
            .add_instruction(PersistenceInstruction::new("coins", json!(sequence)))
            .unwrap();
        batch.finalize(150);
        let mut record = SaveRecord::new(PlayerId::new(player));
        record.populate_player_save_batch(batch, 150).unwrap();
        record.mark_saved_locally(160);
        record
    }

    #[test]
    fn test_save_and_get() {
        let db = setup();
        let repo = SqliteSaveRecordRepository::new(db.connection());
        let record = sealed_record("p1", 1);

        repo.save(&record).unwrap();
        let stored = repo.get(&record.save_record_id).unwrap().unwrap();

        assert_eq!(stored.record.save_record_id, record.save_record_id);
        assert_eq!(stored.record.player_id, record.player_id);
        assert_eq!(stored.record.payload(), record.payload());
        assert!(stored.record.saved_locally);
        assert_eq!(stored.record.last_local_save, Some(160));
        assert_eq!(stored.record.batch_populated_at, Some(150));
        assert_eq!(stored.revision, 0);
    }

    #[test]
    fn test_save_rejects_unpopulated_record() {
        let db = setup();
        let repo = SqliteSaveRecordRepository::new(db.connection());

        let result = repo.save(&SaveRecord::new(PlayerId::new("p1")));
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_update_outbound_bumps_revision() {
        let db = setup();
        let repo = SqliteSaveRecordRepository::new(db.connection());
        let record = sealed_record("p1", 1);
        repo.save(&record).unwrap();

        let revised = record
            .payload()
            .unwrap()
            .with_category_replaced(&"coins".into(), vec![PersistenceInstruction::new("coins", json!(9))]);
        repo.update_outbound(&record.save_record_id, &revised).unwrap();

        let stored = repo.get(&record.save_record_id).unwrap().unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.record.payload(), Some(&revised));
    }

    #[test]
    fn test_update_missing_record() {
        let db = setup();
        let repo = SqliteSaveRecordRepository::new(db.connection());

        let result = repo.mark_server_attempt(&SaveRecordId::new(), 10);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_mark_attempt_and_retire() {
        let db = setup();
        let repo = SqliteSaveRecordRepository::new(db.connection());
        let record = sealed_record("p1", 1);
        repo.save(&record).unwrap();

        repo.mark_server_attempt(&record.save_record_id, 500).unwrap();
        let stored = repo.get(&record.save_record_id).unwrap().unwrap();
        assert_eq!(stored.record.last_attempted_server_save, Some(500));

        assert!(repo.retire(&record.save_record_id).unwrap());
        assert!(!repo.retire(&record.save_record_id).unwrap());
        assert!(repo.get(&record.save_record_id).unwrap().is_none());
    }

    #[test]
    fn test_list_unconfirmed_orders_by_sequence() {
        let db = setup();
        let repo = SqliteSaveRecordRepository::new(db.connection());
        let second = sealed_record("p1", 2);
        let first = sealed_record("p1", 1);
        let other = sealed_record("p2", 1);
        repo.save(&second).unwrap();
        repo.save(&first).unwrap();
        repo.save(&other).unwrap();

        let player = PlayerId::new("p1");
        let ids: Vec<SaveRecordId> = repo
            .list_unconfirmed(Some(&player))
            .unwrap()
            .into_iter()
            .map(|stored| stored.record.save_record_id)
            .collect();
        assert_eq!(ids, vec![first.save_record_id, second.save_record_id]);
        assert_eq!(repo.list_unconfirmed(None).unwrap().len(), 3);
    }
}
