//! The local transactional store: a per-peer SQLite database of live
//! ranges, used to answer point lookups and to track which ranges have
//! changed since the replicated store was last synced.

mod journal;
mod pubkeys;
mod schema;
mod update;

use std::path::Path;

use chrono::NaiveDateTime;
use rusqlite::params;
use rusqlite::Connection;

use crate::error::Error;
use crate::key::PubKey;
use crate::record::Record;

pub use journal::ChangeEntry;
pub use journal::ChangeKind;
pub use pubkeys::key_id as pub_key_id;

/// The local store. Each async task that touches it should open its own
/// connection rather than share one across `.await` points.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Store, Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch(schema::SCHEMA)?;
        return Ok(Store { conn });
    }

    pub fn open_in_memory() -> Result<Store, Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::SCHEMA)?;
        return Ok(Store { conn });
    }

    /// Apply a batch of signed records, per the update algorithm.
    pub fn update(&mut self, batch: &[Record], now: NaiveDateTime) -> Result<(), Error> {
        return update::apply_update(&mut self.conn, batch, now);
    }

    /// All live records whose interval overlaps `[lo, hi]`.
    pub fn overlapping(&self, lo: i64, hi: i64) -> Result<Vec<Record>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT start, end, sip, mdate, sig, owner FROM ranges
             WHERE _s <= ?2 AND _e >= ?1
             ORDER BY _s",
        )?;
        let rows = stmt
            .query_map(params![lo, hi], |row| {
                let mdate_str: String = row.get(3)?;
                let mdate = crate::record::parse_mdate(&mdate_str).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
                })?;
                Ok(Record {
                    start: row.get(0)?,
                    end: row.get(1)?,
                    sip: row.get(2)?,
                    mdate,
                    sig: row.get(4)?,
                    owner: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(rows);
    }

    /// Point lookup: the record whose interval contains `number`, if any.
    pub fn lookup(&self, number: i64) -> Result<Option<Record>, Error> {
        let hits = self.overlapping(number, number)?;
        return Ok(hits.into_iter().next());
    }

    pub fn export_all(&self) -> Result<Vec<Record>, Error> {
        return self.overlapping(i64::MIN, i64::MAX);
    }

    pub fn export_since(&self, since: NaiveDateTime) -> Result<Vec<Record>, Error> {
        let mut stmt = self.conn.prepare(
            "SELECT r.start, r.end, r.sip, r.mdate, r.sig, r.owner
             FROM ranges r
             JOIN range_changes c ON c.start = r.start
             WHERE c.changed_at >= ?1 AND c.kind != 'D'
             GROUP BY r.start
             ORDER BY r._s",
        )?;
        let rows = stmt
            .query_map(params![crate::record::format_mdate(&since)], Store::row_with_owner)?
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(rows);
    }

    fn row_with_owner(row: &rusqlite::Row) -> rusqlite::Result<Record> {
        let mdate_str: String = row.get(3)?;
        let mdate = crate::record::parse_mdate(&mdate_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;
        return Ok(Record {
            start: row.get(0)?,
            end: row.get(1)?,
            sip: row.get(2)?,
            mdate,
            sig: row.get(4)?,
            owner: row.get(5)?,
        });
    }

    /// Whether any change has been journaled since `since`.
    pub fn has_changed_data(&self, since: NaiveDateTime) -> Result<bool, Error> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM range_changes WHERE changed_at >= ?1",
            params![crate::record::format_mdate(&since)],
            |row| row.get(0),
        )?;
        return Ok(count > 0);
    }

    pub fn ranges_empty(&self) -> Result<bool, Error> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM ranges", [], |row| row.get(0))?;
        return Ok(count == 0);
    }

    /// The live record keyed by its exact textual `start`, if any.
    pub fn get_range(&self, start: &str) -> Result<Option<Record>, Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT start, end, sip, mdate, sig, owner FROM ranges WHERE start = ?1")?;
        let mut rows = stmt.query_map(params![start], Store::row_with_owner)?;
        return rows.next().transpose().map_err(Error::from);
    }

    /// The live record whose interval contains `number`, if any. An alias
    /// for [`Store::lookup`] matching the external interface's naming.
    pub fn get_range_for(&self, number: i64) -> Result<Option<Record>, Error> {
        return self.lookup(number);
    }

    /// Every live record, ordered by `int(start)`.
    pub fn get_all(&self) -> Result<Vec<Record>, Error> {
        return self.export_all();
    }

    /// Every live record changed at or after `since`, ordered by `int(start)`.
    /// An alias for [`Store::export_since`] matching the external interface.
    pub fn get_since(&self, since: NaiveDateTime) -> Result<Vec<Record>, Error> {
        return self.export_since(since);
    }

    /// Live records with an empty `sig`: the output of a trim or split that
    /// has not yet been re-signed by its owner.
    pub fn get_unsigned(&self) -> Result<Vec<Record>, Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT start, end, sip, mdate, sig, owner FROM ranges WHERE sig = '' ORDER BY _s")?;
        let rows = stmt.query_map([], Store::row_with_owner)?.collect::<Result<Vec<_>, _>>()?;
        return Ok(rows);
    }

    /// Whether any mutation is pending export, i.e. the change journal is
    /// non-empty.
    pub fn has_changes(&self) -> Result<bool, Error> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM range_changes", [], |row| row.get(0))?;
        return Ok(count > 0);
    }

    /// The full change journal, oldest first.
    pub fn get_change_journal(&self) -> Result<Vec<ChangeEntry>, Error> {
        let mut stmt = self.conn.prepare("SELECT kind, start, changed_at FROM range_changes ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                let kind_str: String = row.get(0)?;
                let changed_at: String = row.get(2)?;
                Ok((kind_str, row.get::<_, String>(1)?, changed_at))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut entries = Vec::with_capacity(rows.len());
        for (kind_str, start, changed_at) in rows {
            let kind = ChangeKind::from_str(&kind_str).ok_or_else(|| {
                Error::Sqlite(rusqlite::Error::InvalidColumnType(0, "kind".to_string(), rusqlite::types::Type::Text))
            })?;
            let changed_at = crate::record::parse_mdate(&changed_at)?;
            entries.push(ChangeEntry { kind, start, changed_at });
        }
        return Ok(entries);
    }

    /// Atomically clear the change journal, as done after a successful
    /// export to the replicated store.
    pub fn clear_change_journal(&mut self) -> Result<(), Error> {
        self.conn.execute("DELETE FROM range_changes", [])?;
        return Ok(());
    }

    /// Register a public key for `owner`. Keys are additive: registering
    /// the same `(owner, pem)` pair twice is a no-op. Returns the key's id,
    /// usable later with [`Store::remove_public_key`].
    pub fn register_public_key(&self, owner: &str, pem: &str) -> Result<String, Error> {
        return pubkeys::register(&self.conn, owner, pem);
    }

    /// Every public key registered to `owner`.
    pub fn public_keys_for(&self, owner: &str) -> Result<Vec<PubKey>, Error> {
        return pubkeys::for_owner(&self.conn, owner);
    }

    /// Remove a registered public key by its id. Returns whether a key was
    /// removed.
    pub fn remove_public_key(&self, keyid: &str) -> Result<bool, Error> {
        return pubkeys::remove(&self.conn, keyid);
    }
}
