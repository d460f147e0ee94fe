//! Postgres schema for every table this crate reads or writes.
//!
//! Statements are idempotent, so `migrate` can run on every start.

use anyhow::{Context, Result};
use sqlx::PgPool;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    event_store     TEXT        NOT NULL,
    partition_key   TEXT        NOT NULL,
    sequence_id     BIGINT      NOT NULL CHECK (sequence_id > 0),
    event_id        UUID        NOT NULL UNIQUE,
    event_type      TEXT        NOT NULL,
    event_version   INTEGER     NOT NULL,
    content         JSONB       NOT NULL,
    created_by      TEXT        NOT NULL,
    created_time    TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (event_store, partition_key, sequence_id)
);

CREATE TABLE IF NOT EXISTS snapshots (
    snapshot_id           UUID        PRIMARY KEY,
    event_store           TEXT        NOT NULL,
    partition_key         TEXT        NOT NULL,
    aggregate_type        TEXT        NOT NULL,
    content               JSONB       NOT NULL,
    last_applied_event_id BIGINT      NOT NULL,
    status                TEXT        NOT NULL,
    created_time          TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS snapshots_latest_idx
    ON snapshots (event_store, partition_key, last_applied_event_id DESC, created_time DESC);

CREATE TABLE IF NOT EXISTS resources (
    event_store       TEXT        NOT NULL,
    partition_key     TEXT        NOT NULL,
    aggregate_type    TEXT        NOT NULL,
    status            TEXT        NOT NULL,
    created_by        TEXT        NOT NULL,
    created_time      TIMESTAMPTZ NOT NULL,
    last_updated_time TIMESTAMPTZ NOT NULL,
    deleted_time      TIMESTAMPTZ NULL,
    PRIMARY KEY (event_store, partition_key)
);

CREATE TABLE IF NOT EXISTS materialized_rows (
    consumer              TEXT        NOT NULL,
    unique_name           TEXT        NOT NULL,
    last_applied_event_id BIGINT      NOT NULL,
    is_enabled            BOOLEAN     NOT NULL DEFAULT FALSE,
    projected             JSONB       NULL,
    updated_time          TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (consumer, unique_name)
);

CREATE TABLE IF NOT EXISTS partition_leases (
    consumer      TEXT        NOT NULL,
    partition_key TEXT        NOT NULL,
    owner_token   UUID        NOT NULL,
    sequence_id   BIGINT      NOT NULL,
    expires_at    TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (consumer, partition_key)
);

CREATE TABLE IF NOT EXISTS dead_letters (
    consumer      TEXT        NOT NULL,
    partition_key TEXT        NOT NULL,
    sequence_id   BIGINT      NOT NULL,
    event_type    TEXT        NOT NULL,
    reason        TEXT        NOT NULL,
    recorded_at   TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (consumer, partition_key, sequence_id)
);
"#;

pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .context("failed to apply marketsync schema")?;
    Ok(())
}
