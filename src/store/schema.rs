//! Local store schema: one row per live range, plus a change journal.

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ranges (
    start       TEXT PRIMARY KEY,
    end         TEXT NOT NULL,
    _s          INTEGER NOT NULL,
    _e          INTEGER NOT NULL,
    sip         TEXT NOT NULL,
    owner       TEXT NOT NULL,
    mdate       TEXT NOT NULL,
    sig         TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ranges_s_idx ON ranges (_s);
CREATE UNIQUE INDEX IF NOT EXISTS ranges_e_idx ON ranges (_e);

CREATE TABLE IF NOT EXISTS range_changes (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    kind        TEXT NOT NULL,
    start       TEXT NOT NULL,
    changed_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS owners (
    name    TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS pubkeys (
    keyid       TEXT PRIMARY KEY,
    owner       TEXT NOT NULL,
    pem         TEXT NOT NULL,
    UNIQUE (owner, pem)
);

-- Carried forward from the persisted-state-layout contract; no operation
-- populates it yet (see DESIGN.md's Open Questions).
CREATE TABLE IF NOT EXISTS domains (
    name    TEXT PRIMARY KEY,
    owner   TEXT NOT NULL
);
";
