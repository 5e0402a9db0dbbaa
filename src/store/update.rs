//! The update algorithm: apply a batch of signed records to the local
//! store, splitting or trimming existing rows so that no two rows ever
//! overlap.
//!
//! Grounded on the legacy `Database.update_data`, which classifies each
//! existing/incoming overlap into one of four cases. A row that survives
//! a trim or split no longer corresponds to any signature its owner
//! produced, so its `sig` is cleared; such rows are local-only until
//! re-signed and must never be handed to the replicated store.

use chrono::NaiveDateTime;
use rusqlite::params;
use rusqlite::Connection;

use crate::error::Error;
use crate::interval::Interval;
use crate::interval::IntervalIndex;
use crate::record::Record;
use crate::store::journal::ChangeKind;

struct ExistingRow {
    start: String,
    end: String,
    start_num: i64,
    end_num: i64,
    sip: String,
    owner: String,
}

fn fetch_overlapping(conn: &Connection, lo: i64, hi: i64) -> Result<Vec<ExistingRow>, Error> {
    let mut stmt = conn.prepare(
        "SELECT start, end, _s, _e, sip, owner FROM ranges
         WHERE _s <= ?2 AND _e >= ?1",
    )?;
    let rows = stmt
        .query_map(params![lo, hi], |row| {
            Ok(ExistingRow {
                start: row.get(0)?,
                end: row.get(1)?,
                start_num: row.get(2)?,
                end_num: row.get(3)?,
                sip: row.get(4)?,
                owner: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    return Ok(rows);
}

fn delete_row(conn: &Connection, start: &str, now: NaiveDateTime) -> Result<(), Error> {
    conn.execute("DELETE FROM ranges WHERE start = ?1", params![start])?;
    journal(conn, ChangeKind::Deleted, start, now)?;
    return Ok(());
}

fn upsert_row(conn: &Connection, rec: &Record, kind: ChangeKind, now: NaiveDateTime) -> Result<(), Error> {
    conn.execute(
        "INSERT OR REPLACE INTO ranges (start, end, _s, _e, sip, owner, mdate, sig)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            rec.start,
            rec.end,
            rec.start_int()?,
            rec.end_int()?,
            rec.sip,
            rec.owner,
            crate::record::format_mdate(&rec.mdate),
            rec.sig,
        ],
    )?;
    journal(conn, kind, &rec.start, now)?;
    return Ok(());
}

fn journal(conn: &Connection, kind: ChangeKind, start: &str, now: NaiveDateTime) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO range_changes (kind, start, changed_at) VALUES (?1, ?2, ?3)",
        params![kind.as_str(), start, crate::record::format_mdate(&now)],
    )?;
    return Ok(());
}

/// Apply `batch` to the store inside a single transaction. The whole batch
/// is rejected (no partial effect) if it contains an internal overlap or
/// an owner mismatch against existing data.
pub fn apply_update(conn: &mut Connection, batch: &[Record], now: NaiveDateTime) -> Result<(), Error> {
    let mut sorted: Vec<&Record> = batch.iter().collect();
    sorted.sort_by_key(|r| r.start_int().unwrap_or(i64::MAX));

    let mut index: IntervalIndex<usize> = IntervalIndex::new();
    for (i, rec) in sorted.iter().enumerate() {
        index.insert(Interval::new(rec.start_int()?, rec.end_int()?), i);
    }
    let internal_overlaps = index.all_overlapping_pairs();
    if let Some((a, b)) = internal_overlaps.first() {
        return Err(Error::InvalidBatch((*a).min(*b), (*a).max(*b)));
    }

    let tx = conn.transaction()?;
    for rec in &sorted {
        let ns = rec.start_int()?;
        let ne = rec.end_int()?;
        let overlaps = fetch_overlapping(&tx, ns, ne)?;

        let mut exact_hit = false;
        for old in &overlaps {
            if old.owner != rec.owner {
                return Err(Error::OwnerMismatch {
                    start: rec.start.clone(),
                    end: rec.end.clone(),
                    claimed: rec.owner.clone(),
                    existing: old.owner.clone(),
                });
            }

            let os = old.start_num;
            let oe = old.end_num;

            if os == ns && oe == ne {
                // Exact: same extent as `old`. Whether this is a re-sign
                // (sip/owner/mdate unchanged, only `sig` differs) or a full
                // content replacement, the candidate is written in place of
                // `old` and the insert step below is skipped either way.
                upsert_row(&tx, rec, ChangeKind::Modified, now)?;
                exact_hit = true;
            } else if os >= ns && oe > ne {
                // Left-trim: old's start falls inside the new range but its
                // tail extends past it. Keep the tail, clear its sig.
                let tail = Record {
                    start: Record::format_number(ne + 1),
                    end: old.end.clone(),
                    sip: old.sip.clone(),
                    owner: old.owner.clone(),
                    mdate: now,
                    sig: String::new(),
                };
                delete_row(&tx, &old.start, now)?;
                upsert_row(&tx, &tail, ChangeKind::Modified, now)?;
            } else if os >= ns && oe <= ne {
                // Subsumed: old lies entirely within the new range. Drop it.
                delete_row(&tx, &old.start, now)?;
            } else if os < ns && oe > ne {
                // Split: the new range falls entirely within old. Shrink old
                // to the head before it, insert a fresh tail after it.
                let head = Record {
                    start: old.start.clone(),
                    end: Record::format_number(ns - 1),
                    sip: old.sip.clone(),
                    owner: old.owner.clone(),
                    mdate: now,
                    sig: String::new(),
                };
                let tail = Record {
                    start: Record::format_number(ne + 1),
                    end: old.end.clone(),
                    sip: old.sip.clone(),
                    owner: old.owner.clone(),
                    mdate: now,
                    sig: String::new(),
                };
                upsert_row(&tx, &head, ChangeKind::Modified, now)?;
                upsert_row(&tx, &tail, ChangeKind::Added, now)?;
            } else {
                // Right-trim: old's end falls inside the new range but its
                // head starts before it. Keep the head, clear its sig.
                debug_assert!(os < ns && oe <= ne);
                let head = Record {
                    start: old.start.clone(),
                    end: Record::format_number(ns - 1),
                    sip: old.sip.clone(),
                    owner: old.owner.clone(),
                    mdate: now,
                    sig: String::new(),
                };
                upsert_row(&tx, &head, ChangeKind::Modified, now)?;
            }
        }

        if !exact_hit {
            upsert_row(&tx, rec, ChangeKind::Added, now)?;
        }
    }
    tx.commit()?;
    return Ok(());
}
