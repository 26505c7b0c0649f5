//! Chunked batch-upsert pipeline for imported wearable rows.
//!
//! Rows are partitioned into fixed-size chunks and each chunk is upserted by
//! natural key. Transient I/O failures are retried with exponential backoff
//! plus jitter; a permanent failure (constraint violation, bad data) fails
//! only its own chunk. A failed chunk never aborts the rest of the run.
//!
//! Per chunk: pending -> sending -> {success | retrying -> sending | failed}.
//! Re-running the pipeline on the same input produces the same stored state.

use rand::Rng;
use serde::Serialize;
use sqlx::{PgPool, QueryBuilder};
use std::time::Duration;

use crate::config::Config;
use crate::models::whoop::{RecoveryRow, SleepRow, WorkoutRow};

#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// Dropped connection, pool exhaustion: worth retrying.
    #[error("{0}")]
    Transient(String),
    /// Constraint violation or similar; retrying cannot help.
    #[error("{0}")]
    Permanent(String),
}

impl SinkError {
    fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }
}

/// Storage-side of the pipeline. Kept as a trait so tests can drive the
/// retry machinery with a fake that fails a set number of times.
pub trait ChunkSink {
    type Row;

    async fn upsert_chunk(&mut self, rows: &[Self::Row]) -> Result<(), SinkError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.sync_max_retries.max(1),
            base_delay: Duration::from_millis(config.sync_retry_base_ms),
            jitter: Duration::from_millis(config.sync_retry_jitter_ms),
        }
    }

    /// Backoff before retry number `attempt` (0-based): base doubled each
    /// attempt, plus a uniform random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.base_delay * 2u32.saturating_pow(attempt);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkState {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    pub index: usize,
    pub rows: usize,
    pub attempts: u32,
    pub state: ChunkState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub table: String,
    pub total_rows: usize,
    pub chunks: Vec<ChunkReport>,
}

impl SyncReport {
    pub fn rows_upserted(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.state == ChunkState::Success)
            .map(|c| c.rows)
            .sum()
    }

    pub fn failed_chunks(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.state == ChunkState::Failed)
            .count()
    }
}

/// Run the pipeline: chunk, upsert, retry transient failures, isolate
/// permanent ones. Always returns a report; never an error.
pub async fn run_batch_upsert<S: ChunkSink>(
    table: &str,
    sink: &mut S,
    rows: &[S::Row],
    chunk_size: usize,
    policy: &RetryPolicy,
) -> SyncReport {
    let mut chunks = Vec::new();

    for (index, chunk) in rows.chunks(chunk_size.max(1)).enumerate() {
        let mut attempts = 0;
        let (state, error) = loop {
            attempts += 1;
            match sink.upsert_chunk(chunk).await {
                Ok(()) => break (ChunkState::Success, None),
                Err(e @ SinkError::Permanent(_)) => {
                    tracing::warn!(
                        table,
                        chunk = index,
                        error = %e.message(),
                        "Chunk failed permanently"
                    );
                    break (ChunkState::Failed, Some(e.message().to_string()));
                }
                Err(e @ SinkError::Transient(_)) => {
                    if attempts >= policy.max_attempts {
                        tracing::warn!(
                            table,
                            chunk = index,
                            attempts,
                            error = %e.message(),
                            "Chunk failed after exhausting retries"
                        );
                        break (ChunkState::Failed, Some(e.message().to_string()));
                    }
                    let delay = policy.delay_for(attempts - 1);
                    tracing::debug!(
                        table,
                        chunk = index,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient chunk failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        chunks.push(ChunkReport {
            index,
            rows: chunk.len(),
            attempts,
            state,
            error,
        });
    }

    SyncReport {
        table: table.to_string(),
        total_rows: rows.len(),
        chunks,
    }
}

fn classify(e: sqlx::Error) -> SinkError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => SinkError::Transient(e.to_string()),
        other => SinkError::Permanent(other.to_string()),
    }
}

// ============================================================================
// sqlx-backed sinks, one per whoop_* table
// ============================================================================

pub struct RecoverySink<'a> {
    pub pool: &'a PgPool,
}

impl ChunkSink for RecoverySink<'_> {
    type Row = RecoveryRow;

    async fn upsert_chunk(&mut self, rows: &[RecoveryRow]) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::new(
            "INSERT INTO whoop_recovery \
             (cycle_id, recovery_score, resting_heart_rate, hrv_rmssd_milli, \
              spo2_percentage, skin_temp_celsius, record_date) ",
        );
        qb.push_values(rows, |mut b, row| {
            b.push_bind(&row.cycle_id)
                .push_bind(&row.recovery_score)
                .push_bind(&row.resting_heart_rate)
                .push_bind(&row.hrv_rmssd_milli)
                .push_bind(&row.spo2_percentage)
                .push_bind(&row.skin_temp_celsius)
                .push_bind(row.record_date);
        });
        qb.push(
            " ON CONFLICT (cycle_id, record_date) DO UPDATE SET \
             recovery_score = EXCLUDED.recovery_score, \
             resting_heart_rate = EXCLUDED.resting_heart_rate, \
             hrv_rmssd_milli = EXCLUDED.hrv_rmssd_milli, \
             spo2_percentage = EXCLUDED.spo2_percentage, \
             skin_temp_celsius = EXCLUDED.skin_temp_celsius",
        );
        qb.build().execute(self.pool).await.map_err(classify)?;
        Ok(())
    }
}

pub struct SleepSink<'a> {
    pub pool: &'a PgPool,
}

impl ChunkSink for SleepSink<'_> {
    type Row = SleepRow;

    async fn upsert_chunk(&mut self, rows: &[SleepRow]) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::new(
            "INSERT INTO whoop_sleep \
             (id, cycle_id, \"start\", \"end\", sleep_performance_percentage, \
              sleep_efficiency_percentage, rem_sleep_hours, deep_sleep_hours, \
              respiratory_rate, record_date) ",
        );
        qb.push_values(rows, |mut b, row| {
            b.push_bind(&row.id)
                .push_bind(&row.cycle_id)
                .push_bind(&row.start)
                .push_bind(&row.end)
                .push_bind(&row.sleep_performance_percentage)
                .push_bind(&row.sleep_efficiency_percentage)
                .push_bind(&row.rem_sleep_hours)
                .push_bind(&row.deep_sleep_hours)
                .push_bind(&row.respiratory_rate)
                .push_bind(row.record_date);
        });
        qb.push(
            " ON CONFLICT (id) DO UPDATE SET \
             cycle_id = EXCLUDED.cycle_id, \
             \"start\" = EXCLUDED.\"start\", \
             \"end\" = EXCLUDED.\"end\", \
             sleep_performance_percentage = EXCLUDED.sleep_performance_percentage, \
             sleep_efficiency_percentage = EXCLUDED.sleep_efficiency_percentage, \
             rem_sleep_hours = EXCLUDED.rem_sleep_hours, \
             deep_sleep_hours = EXCLUDED.deep_sleep_hours, \
             respiratory_rate = EXCLUDED.respiratory_rate, \
             record_date = EXCLUDED.record_date",
        );
        qb.build().execute(self.pool).await.map_err(classify)?;
        Ok(())
    }
}

pub struct WorkoutSink<'a> {
    pub pool: &'a PgPool,
}

impl ChunkSink for WorkoutSink<'_> {
    type Row = WorkoutRow;

    async fn upsert_chunk(&mut self, rows: &[WorkoutRow]) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut qb = QueryBuilder::new(
            "INSERT INTO whoop_workouts \
             (id, sport_name, strain, average_heart_rate, max_heart_rate, \
              kilojoule, distance_meter, altitude_gain_meter, record_date) ",
        );
        qb.push_values(rows, |mut b, row| {
            b.push_bind(&row.id)
                .push_bind(&row.sport_name)
                .push_bind(&row.strain)
                .push_bind(&row.average_heart_rate)
                .push_bind(&row.max_heart_rate)
                .push_bind(&row.kilojoule)
                .push_bind(&row.distance_meter)
                .push_bind(&row.altitude_gain_meter)
                .push_bind(row.record_date);
        });
        qb.push(
            " ON CONFLICT (id) DO UPDATE SET \
             sport_name = EXCLUDED.sport_name, \
             strain = EXCLUDED.strain, \
             average_heart_rate = EXCLUDED.average_heart_rate, \
             max_heart_rate = EXCLUDED.max_heart_rate, \
             kilojoule = EXCLUDED.kilojoule, \
             distance_meter = EXCLUDED.distance_meter, \
             altitude_gain_meter = EXCLUDED.altitude_gain_meter, \
             record_date = EXCLUDED.record_date",
        );
        qb.build().execute(self.pool).await.map_err(classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            jitter: Duration::ZERO,
        }
    }

    /// Fails with a transient error for the first `transient_failures`
    /// calls, and permanently for any chunk containing `poison`.
    struct FakeSink {
        transient_failures: u32,
        calls: u32,
        poison: Option<i32>,
        written: Vec<i32>,
    }

    impl FakeSink {
        fn new() -> Self {
            Self {
                transient_failures: 0,
                calls: 0,
                poison: None,
                written: Vec::new(),
            }
        }
    }

    impl ChunkSink for FakeSink {
        type Row = i32;

        async fn upsert_chunk(&mut self, rows: &[i32]) -> Result<(), SinkError> {
            self.calls += 1;
            if let Some(poison) = self.poison {
                if rows.contains(&poison) {
                    return Err(SinkError::Permanent("constraint violation".into()));
                }
            }
            if self.calls <= self.transient_failures {
                return Err(SinkError::Transient("connection dropped".into()));
            }
            self.written.extend_from_slice(rows);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_rows_partitioned_into_fixed_chunks() {
        let mut sink = FakeSink::new();
        let rows = vec![1, 2, 3, 4, 5];
        let report = run_batch_upsert("t", &mut sink, &rows, 2, &fast_policy(3)).await;

        assert_eq!(report.chunks.len(), 3);
        assert_eq!(report.total_rows, 5);
        assert_eq!(report.rows_upserted(), 5);
        assert_eq!(report.failed_chunks(), 0);
        // insertion order preserved
        assert_eq!(sink.written, rows);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_succeeds() {
        let mut sink = FakeSink::new();
        sink.transient_failures = 2;
        let rows = vec![1, 2];
        let report = run_batch_upsert("t", &mut sink, &rows, 10, &fast_policy(3)).await;

        assert_eq!(report.chunks.len(), 1);
        assert_eq!(report.chunks[0].state, ChunkState::Success);
        assert_eq!(report.chunks[0].attempts, 3);
        assert_eq!(sink.written, rows);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_fails_chunk() {
        let mut sink = FakeSink::new();
        sink.transient_failures = u32::MAX;
        let report = run_batch_upsert("t", &mut sink, &[1], 10, &fast_policy(3)).await;

        assert_eq!(report.chunks[0].state, ChunkState::Failed);
        assert_eq!(report.chunks[0].attempts, 3);
        assert!(report.chunks[0].error.is_some());
        assert!(sink.written.is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_isolated_to_one_chunk() {
        let mut sink = FakeSink::new();
        sink.poison = Some(13);
        let rows = vec![13, 1, 2, 3];
        let report = run_batch_upsert("t", &mut sink, &rows, 2, &fast_policy(3)).await;

        // chunk 0 = [13, 1] fails once without retrying; chunks after it commit
        assert_eq!(report.chunks[0].state, ChunkState::Failed);
        assert_eq!(report.chunks[0].attempts, 1);
        assert_eq!(report.chunks[1].state, ChunkState::Success);
        assert_eq!(sink.written, vec![2, 3]);
        assert_eq!(report.rows_upserted(), 2);
        assert_eq!(report.failed_chunks(), 1);
    }

    #[tokio::test]
    async fn test_empty_input_produces_empty_report() {
        let mut sink = FakeSink::new();
        let report = run_batch_upsert("t", &mut sink, &[], 200, &fast_policy(3)).await;
        assert!(report.chunks.is_empty());
        assert_eq!(report.total_rows, 0);
        assert_eq!(sink.calls, 0);
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            jitter: Duration::from_millis(50),
        };
        for _ in 0..100 {
            let d = policy.delay_for(1);
            assert!(d >= Duration::from_millis(200));
            assert!(d <= Duration::from_millis(250));
        }
    }
}
