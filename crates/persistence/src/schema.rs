//! Database schema definitions

/// SQL to create all tables.
/// Timestamps are unix milliseconds, report dates are `YYYY-MM-DD` text.
pub const CREATE_TABLES: &str = r#"
-- Append-only price observations
CREATE TABLE IF NOT EXISTS price_points (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instrument TEXT NOT NULL,
    value REAL NOT NULL,
    observed_at INTEGER NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- One "previous EMA" scalar per instrument, overwritten each pass
CREATE TABLE IF NOT EXISTS indicator_state (
    instrument TEXT PRIMARY KEY,
    previous_ema REAL NOT NULL,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Daily report snapshots
CREATE TABLE IF NOT EXISTS reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instrument TEXT NOT NULL,
    report_date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    moving_average REAL NOT NULL,
    relative_strength_index REAL NOT NULL,
    sentiment TEXT NOT NULL,
    bottoms INTEGER NOT NULL,
    tops INTEGER NOT NULL,
    initial_hour_movement REAL NOT NULL,
    power_hour_movement REAL NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now')),
    UNIQUE(instrument, report_date)
);

-- One row per day whose batch notification went out
CREATE TABLE IF NOT EXISTS report_batches (
    report_date TEXT PRIMARY KEY,
    records INTEGER NOT NULL,
    sent_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_price_points_instrument ON price_points(instrument, observed_at);
CREATE INDEX IF NOT EXISTS idx_reports_date ON reports(report_date)
"#;
