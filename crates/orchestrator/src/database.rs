use crate::record::{CommandRecord, CycleOutcome, CyclePhase, CycleRecord, CycleSummary, Trigger};
use anyhow::{Context, Result};
use async_trait::async_trait;
use autotrader_core::{
    EquitySnapshot, ExecutionMode, MarketBreadth, MarketSnapshot, MemoryNote, MemoryStore,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

pub const MAX_CYCLE_HISTORY: u32 = 500;
pub const MAX_EQUITY_HISTORY: u32 = 1000;

const SUMMARY_COLUMNS: &str = r"
    id, trigger, execution_mode, started_at, finished_at, outcome, failed_phase, error,
    provider, model, tokens_used, correction_rounds, reasoning, memory_updated,
    (SELECT COUNT(*) FROM cycle_commands c WHERE c.cycle_id = cycles.id) AS command_count,
    (SELECT COUNT(*) FROM execution_results r
        WHERE r.cycle_id = cycles.id AND r.status = 'FAILED') AS failed_count
";

/// `SQLite` store for the memory note, operator instructions and cycle history.
///
/// Everything except the memory note and settings rows is append-only.
#[derive(Clone)]
pub struct CycleDatabase {
    pool: SqlitePool,
}

impl CycleDatabase {
    /// Opens (creating if missing) the database at `database_url` and runs migrations.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid, the connection fails or migrations fail.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url {database_url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database {database_url}"))?;
        Self::migrate(pool).await
    }

    /// Creates an in-memory database for tests.
    ///
    /// A single connection that is never recycled keeps the data alive.
    ///
    /// # Errors
    ///
    /// Returns error if connection or migrations fail.
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        Ok(Self { pool })
    }

    // ==================== Memory note ====================

    /// Returns an empty note when nothing was ever written.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn memory(&self) -> Result<MemoryNote> {
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT content, updated_at FROM memory_note WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map_or_else(MemoryNote::default, |(content, updated_at)| MemoryNote {
            content,
            updated_at: DateTime::from_timestamp_millis(updated_at),
        }))
    }

    /// Replaces the note's content and timestamp in full.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    pub async fn replace_memory_note(&self, content: &str) -> Result<MemoryNote> {
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            r"
            INSERT INTO memory_note (id, content, updated_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at
            ",
        )
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(MemoryNote {
            content: content.to_string(),
            updated_at: DateTime::from_timestamp_millis(now),
        })
    }

    // ==================== Settings ====================

    /// Operator instructions appended to every context document.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn custom_instructions(&self) -> Result<String> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT custom_instructions FROM system_settings WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(text,)| text).unwrap_or_default())
    }

    /// # Errors
    ///
    /// Returns error if the write fails.
    pub async fn save_custom_instructions(&self, instructions: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO system_settings (id, custom_instructions, updated_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                custom_instructions = excluded.custom_instructions,
                updated_at = excluded.updated_at
            ",
        )
        .bind(instructions)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Cycle history ====================

    /// Persists a finished cycle with its commands, results and market snapshot.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or any insert fails; nothing is written then.
    pub async fn insert_cycle(&self, cycle: &CycleRecord) -> Result<()> {
        let summary = &cycle.summary;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO cycles (
                id, trigger, execution_mode, started_at, finished_at, outcome, failed_phase,
                error, provider, model, tokens_used, correction_rounds, raw_reply, reasoning,
                memory_updated
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ",
        )
        .bind(&summary.id)
        .bind(summary.trigger.as_str())
        .bind(summary.execution_mode.as_str())
        .bind(summary.started_at.timestamp_millis())
        .bind(summary.finished_at.timestamp_millis())
        .bind(summary.outcome.as_str())
        .bind(summary.failed_phase.map(|p| p.as_str()))
        .bind(summary.error.as_deref())
        .bind(summary.provider.as_deref())
        .bind(summary.model.as_deref())
        .bind(summary.tokens_used.map(i64::from))
        .bind(i64::from(summary.correction_rounds))
        .bind(&cycle.raw_reply)
        .bind(&summary.reasoning)
        .bind(summary.memory_updated)
        .execute(&mut *tx)
        .await
        .context("failed to insert cycle")?;

        for (seq, record) in cycle.commands.iter().enumerate() {
            let seq = i64::try_from(seq)?;
            let command = &record.command;

            sqlx::query(
                r"
                INSERT INTO cycle_commands (cycle_id, seq, round, position, kind, raw_kind, command_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
            )
            .bind(&summary.id)
            .bind(seq)
            .bind(i64::from(record.round))
            .bind(i64::try_from(command.position)?)
            .bind(command.kind.as_str())
            .bind(&command.raw_kind)
            .bind(serde_json::to_string(command)?)
            .execute(&mut *tx)
            .await
            .context("failed to insert command")?;

            if let Some(result) = &record.result {
                sqlx::query(
                    r"
                    INSERT INTO execution_results (
                        cycle_id, command_seq, status, kind, symbol, detail, error, simulated, result_json
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    ",
                )
                .bind(&summary.id)
                .bind(seq)
                .bind(result.status.as_str())
                .bind(&result.kind)
                .bind(result.symbol.as_deref())
                .bind(&result.detail)
                .bind(result.error.as_deref())
                .bind(result.simulated)
                .bind(serde_json::to_string(result)?)
                .execute(&mut *tx)
                .await
                .context("failed to insert execution result")?;
            }
        }

        if let Some(snapshot) = &cycle.snapshot {
            sqlx::query(
                r"
                INSERT INTO market_snapshots (
                    cycle_id, taken_at, advancing, declining, sample_size, ad_ratio, prices_json, changes_json
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ",
            )
            .bind(&summary.id)
            .bind(snapshot.taken_at.timestamp_millis())
            .bind(i64::from(snapshot.breadth.advancing))
            .bind(i64::from(snapshot.breadth.declining))
            .bind(i64::from(snapshot.breadth.sample_size))
            .bind(snapshot.ad_ratio.to_string())
            .bind(serde_json::to_string(&snapshot.prices)?)
            .bind(serde_json::to_string(&snapshot.changes_24h)?)
            .execute(&mut *tx)
            .await
            .context("failed to insert market snapshot")?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Most recent cycles first; `limit` is clamped to `1..=500`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or a row cannot be decoded.
    pub async fn recent_cycles(&self, limit: u32) -> Result<Vec<CycleSummary>> {
        let limit = limit.clamp(1, MAX_CYCLE_HISTORY);
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM cycles ORDER BY started_at DESC, rowid DESC LIMIT ?1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(summary_from_row).collect()
    }

    /// One cycle with its commands, results and market snapshot.
    ///
    /// # Errors
    ///
    /// Returns error if a query fails or stored JSON cannot be decoded.
    pub async fn cycle(&self, id: &str) -> Result<Option<CycleRecord>> {
        let sql = format!("SELECT {SUMMARY_COLUMNS}, raw_reply FROM cycles WHERE id = ?1");
        let Some(row) = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let summary = summary_from_row(&row)?;
        let raw_reply: String = row.try_get("raw_reply")?;

        let command_rows = sqlx::query_as::<_, (i64, String, Option<String>)>(
            r"
            SELECT c.round, c.command_json, r.result_json
            FROM cycle_commands c
            LEFT JOIN execution_results r
                ON r.cycle_id = c.cycle_id AND r.command_seq = c.seq
            WHERE c.cycle_id = ?1
            ORDER BY c.seq ASC
            ",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut commands = Vec::with_capacity(command_rows.len());
        for (round, command_json, result_json) in command_rows {
            commands.push(CommandRecord {
                round: u32::try_from(round)?,
                command: serde_json::from_str(&command_json)
                    .context("stored command is not valid JSON")?,
                result: result_json
                    .map(|json| serde_json::from_str(&json))
                    .transpose()
                    .context("stored execution result is not valid JSON")?,
            });
        }

        let snapshot = self.market_snapshot(id).await?;

        Ok(Some(CycleRecord {
            summary,
            raw_reply,
            commands,
            snapshot,
        }))
    }

    async fn market_snapshot(&self, cycle_id: &str) -> Result<Option<MarketSnapshot>> {
        let row = sqlx::query_as::<_, (i64, i64, i64, i64, String, String, String)>(
            r"
            SELECT taken_at, advancing, declining, sample_size, ad_ratio, prices_json, changes_json
            FROM market_snapshots
            WHERE cycle_id = ?1
            ORDER BY id DESC
            LIMIT 1
            ",
        )
        .bind(cycle_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((taken_at, advancing, declining, sample_size, ad_ratio, prices, changes)) = row
        else {
            return Ok(None);
        };

        Ok(Some(MarketSnapshot {
            taken_at: timestamp(taken_at)?,
            breadth: MarketBreadth {
                advancing: u32::try_from(advancing)?,
                declining: u32::try_from(declining)?,
                sample_size: u32::try_from(sample_size)?,
            },
            ad_ratio: decimal(&ad_ratio)?,
            prices: serde_json::from_str(&prices)?,
            changes_24h: serde_json::from_str(&changes)?,
        }))
    }

    // ==================== Equity ====================

    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn insert_equity_snapshot(
        &self,
        cycle_id: Option<&str>,
        snapshot: &EquitySnapshot,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO equity_snapshots (
                cycle_id, taken_at, total_equity, free_balance, unrealized_pnl, position_count
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(cycle_id)
        .bind(snapshot.taken_at.timestamp_millis())
        .bind(snapshot.total_equity.to_string())
        .bind(snapshot.free_balance.to_string())
        .bind(snapshot.unrealized_pnl.to_string())
        .bind(i64::from(snapshot.position_count))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The latest `limit` snapshots, oldest first; `limit` is clamped to `1..=1000`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails or a stored decimal is invalid.
    pub async fn equity_history(&self, limit: u32) -> Result<Vec<EquitySnapshot>> {
        let limit = limit.clamp(1, MAX_EQUITY_HISTORY);
        let rows = sqlx::query_as::<_, (i64, String, String, String, i64)>(
            r"
            SELECT taken_at, total_equity, free_balance, unrealized_pnl, position_count
            FROM (
                SELECT id, taken_at, total_equity, free_balance, unrealized_pnl, position_count
                FROM equity_snapshots
                ORDER BY taken_at DESC, id DESC
                LIMIT ?1
            )
            ORDER BY taken_at ASC, id ASC
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(taken_at, total, free, upnl, count)| {
                Ok(EquitySnapshot {
                    taken_at: timestamp(taken_at)?,
                    total_equity: decimal(&total)?,
                    free_balance: decimal(&free)?,
                    unrealized_pnl: decimal(&upnl)?,
                    position_count: u32::try_from(count)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl MemoryStore for CycleDatabase {
    async fn read_memory(&self) -> Result<MemoryNote> {
        self.memory().await
    }

    async fn replace_memory(&self, content: &str) -> Result<MemoryNote> {
        self.replace_memory_note(content).await
    }
}

fn summary_from_row(row: &SqliteRow) -> Result<CycleSummary> {
    let failed_phase: Option<String> = row.try_get("failed_phase")?;
    let tokens_used: Option<i64> = row.try_get("tokens_used")?;

    Ok(CycleSummary {
        id: row.try_get("id")?,
        trigger: row
            .try_get::<String, _>("trigger")?
            .parse::<Trigger>()
            .map_err(anyhow::Error::msg)?,
        execution_mode: row
            .try_get::<String, _>("execution_mode")?
            .parse::<ExecutionMode>()
            .map_err(anyhow::Error::msg)?,
        started_at: timestamp(row.try_get("started_at")?)?,
        finished_at: timestamp(row.try_get("finished_at")?)?,
        outcome: row
            .try_get::<String, _>("outcome")?
            .parse::<CycleOutcome>()
            .map_err(anyhow::Error::msg)?,
        failed_phase: failed_phase
            .map(|p| p.parse::<CyclePhase>())
            .transpose()
            .map_err(anyhow::Error::msg)?,
        error: row.try_get("error")?,
        provider: row.try_get("provider")?,
        model: row.try_get("model")?,
        tokens_used: tokens_used.map(u32::try_from).transpose()?,
        correction_rounds: u32::try_from(row.try_get::<i64, _>("correction_rounds")?)?,
        reasoning: row.try_get("reasoning")?,
        memory_updated: row.try_get("memory_updated")?,
        command_count: u32::try_from(row.try_get::<i64, _>("command_count")?)?,
        failed_count: u32::try_from(row.try_get::<i64, _>("failed_count")?)?,
    })
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .with_context(|| format!("timestamp {millis} out of range"))
}

fn decimal(text: &str) -> Result<Decimal> {
    Decimal::from_str(text).with_context(|| format!("invalid decimal '{text}'"))
}
