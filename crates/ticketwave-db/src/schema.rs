//! SQL schema definitions.

/// Base schema: recipients, waves, tickets and the ledger.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Recipients & operators
-- ============================================================

CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY,
    username TEXT,
    last_ticket_at INTEGER,
    registered_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);

CREATE TABLE IF NOT EXISTS admins (
    user_id INTEGER PRIMARY KEY,
    granted_at INTEGER NOT NULL
);

-- ============================================================
-- Waves
-- ============================================================

CREATE TABLE IF NOT EXISTS waves (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    created_by INTEGER NOT NULL,
    confirmed_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS wave_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    status TEXT NOT NULL DEFAULT 'idle',
    prepared_at INTEGER,
    wave_start INTEGER,
    wave_id INTEGER REFERENCES waves(id)
);

-- ============================================================
-- Tickets
-- ============================================================

CREATE TABLE IF NOT EXISTS tickets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    storage_name TEXT NOT NULL UNIQUE,
    fingerprint BLOB NOT NULL UNIQUE,
    original_name TEXT NOT NULL,
    uploaded_by INTEGER NOT NULL,
    uploaded_at INTEGER NOT NULL,
    assigned_to INTEGER,
    assigned_at INTEGER,
    archived_unused INTEGER NOT NULL DEFAULT 0,
    lost INTEGER NOT NULL DEFAULT 0,
    wave_id INTEGER REFERENCES waves(id),
    CHECK (lost = 0 OR assigned_to IS NULL)
);

CREATE INDEX IF NOT EXISTS idx_tickets_pool
    ON tickets(wave_id, assigned_to, archived_unused, lost);
CREATE INDEX IF NOT EXISTS idx_tickets_uploaded ON tickets(uploaded_at);

-- ============================================================
-- Pending-delivery ledger
-- ============================================================

CREATE TABLE IF NOT EXISTS pending_deliveries (
    user_id INTEGER PRIMARY KEY,
    ticket_id INTEGER NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
    reason TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_ticket ON pending_deliveries(ticket_id);
"#;

/// v2: single-use invite codes gating registration.
pub const SCHEMA_V2: &str = r#"
CREATE TABLE IF NOT EXISTS invite_codes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL,
    used INTEGER NOT NULL DEFAULT 0,
    used_at INTEGER,
    redeemed_by INTEGER,
    redeemed_username TEXT
);

CREATE INDEX IF NOT EXISTS idx_invites_unused ON invite_codes(used);
"#;
