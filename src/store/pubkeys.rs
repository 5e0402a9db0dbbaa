//! Owner public-key registry. Keys are additive: registering the same
//! `(owner, pem)` pair twice is a no-op, and no operation ever overwrites an
//! existing key — only `remove_pub_key` by its derived `keyid` retires one.

use rusqlite::params;
use rusqlite::Connection;

use crate::error::Error;
use crate::key;
use crate::key::PubKey;

/// Derive a stable id for a `(owner, pem)` key registration: the first 16
/// hex characters of its BLAKE3 digest. Used so `remove_public_key` can
/// address a specific registered key without re-sending the PEM body.
pub fn key_id(owner: &str, pem: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(owner.as_bytes());
    hasher.update(b"\0");
    hasher.update(pem.as_bytes());
    return hasher.finalize().to_hex()[..16].to_string();
}

pub fn register(conn: &Connection, owner: &str, pem: &str) -> Result<String, Error> {
    // Validate before storing; a malformed PEM never becomes a registered
    // key even transiently.
    key::parse_pub_key(pem)?;
    conn.execute("INSERT OR IGNORE INTO owners (name) VALUES (?1)", params![owner])?;
    let id = key_id(owner, pem);
    conn.execute(
        "INSERT OR IGNORE INTO pubkeys (keyid, owner, pem) VALUES (?1, ?2, ?3)",
        params![id, owner, pem],
    )?;
    return Ok(id);
}

pub fn for_owner(conn: &Connection, owner: &str) -> Result<Vec<PubKey>, Error> {
    let mut stmt = conn.prepare("SELECT pem FROM pubkeys WHERE owner = ?1")?;
    let pems = stmt
        .query_map(params![owner], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut keys = Vec::with_capacity(pems.len());
    for pem in pems {
        // A key that parsed at registration time always parses again.
        keys.push(key::parse_pub_key(&pem)?);
    }
    return Ok(keys);
}

/// Remove a registered key by its `keyid`. Returns whether a row was
/// removed.
pub fn remove(conn: &Connection, keyid: &str) -> Result<bool, Error> {
    let removed = conn.execute("DELETE FROM pubkeys WHERE keyid = ?1", params![keyid])?;
    return Ok(removed > 0);
}
