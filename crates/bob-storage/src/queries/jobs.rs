// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job store: narrow data-access layer over the `jobs` table.
//!
//! `claim_due` is the only subtle operation: it selects due rows and, inside
//! the same transaction, disables one-shot (`at`) rows. That transactional
//! flip is the sole mechanism preventing duplicate delivery of one-shot
//! jobs across concurrent claimants.

use std::str::FromStr;

use chrono_tz::Tz;
use rusqlite::params;

use bob_core::{BobError, BOB_ID};
use bob_schedule::{next_run_of, ScheduleKind};

use crate::database::{map_tr_err, Database};
use crate::models::{Job, JobInput, JobRunUpdate};

const JOB_COLUMNS: &str = "id, chat_id, thread_id, schedule_kind, schedule_spec, job_type, \
                           payload, enabled, next_run_at, last_run_at, context_mode, created_at";

/// Insert a new job, computing its first `next_run_at` from the schedule.
///
/// Fails with [`BobError::InvalidSchedule`] when the spec cannot produce a
/// next run.
pub async fn add(db: &Database, input: JobInput, now_ms: i64, tz: Tz) -> Result<Job, BobError> {
    let next_run_at = next_run_of(input.schedule_kind, &input.schedule_spec, now_ms, &tz)?;

    let payload = serde_json::to_string(&input.payload)
        .unwrap_or_else(|_| "{}".to_string());

    let job = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO jobs (bob_id, chat_id, thread_id, schedule_kind, schedule_spec, \
                 job_type, payload, enabled, next_run_at, context_mode, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9, ?10)",
                params![
                    BOB_ID,
                    input.chat_id,
                    input.thread_id,
                    input.schedule_kind.to_string(),
                    input.schedule_spec,
                    input.job_type.to_string(),
                    payload,
                    next_run_at,
                    input.context_mode.to_string(),
                    now_ms,
                ],
            )?;
            let id = conn.last_insert_rowid();
            let mut stmt =
                conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))?;
            let job = stmt.query_row(params![id], row_to_job)?;
            Ok(job)
        })
        .await
        .map_err(map_tr_err)?;

    Ok(job)
}

/// All jobs ordered by id.
pub async fn list(db: &Database) -> Result<Vec<Job>, BobError> {
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY id ASC"))?;
            let jobs = stmt
                .query_map([], row_to_job)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(jobs)
        })
        .await
        .map_err(map_tr_err)
}

/// Jobs for one chat, soonest first.
pub async fn list_for_chat(db: &Database, chat_id: i64) -> Result<Vec<Job>, BobError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE chat_id = ?1 \
                 ORDER BY next_run_at ASC, id ASC"
            ))?;
            let jobs = stmt
                .query_map(params![chat_id], row_to_job)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(jobs)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete a job. Returns whether a row was removed.
pub async fn remove(db: &Database, id: i64) -> Result<bool, BobError> {
    db.connection()
        .call(move |conn| {
            let removed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
            Ok(removed > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Atomically claim due jobs.
///
/// Selects enabled rows with `next_run_at <= now`, ordered `next_run_at ASC,
/// id ASC`, limited; within the same transaction, `at` rows are flipped to
/// disabled so a concurrent claimant cannot return them again. Interval and
/// cron rows stay enabled; their rescheduling happens after execution via
/// [`update_after_run`].
pub async fn claim_due(db: &Database, now_ms: i64, limit: u32) -> Result<Vec<Job>, BobError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            let mut jobs = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs \
                     WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1 \
                     ORDER BY next_run_at ASC, id ASC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![now_ms, limit], row_to_job)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            for job in &mut jobs {
                if job.schedule_kind == ScheduleKind::At {
                    tx.execute("UPDATE jobs SET enabled = 0 WHERE id = ?1", params![job.id])?;
                    job.enabled = false;
                }
            }

            tx.commit()?;
            Ok(jobs)
        })
        .await
        .map_err(map_tr_err)
}

/// Idempotent writeback after a run (or a DND deferral).
pub async fn update_after_run(db: &Database, update: JobRunUpdate) -> Result<(), BobError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE jobs SET last_run_at = ?1, next_run_at = ?2, enabled = ?3 WHERE id = ?4",
                params![
                    update.last_run_at,
                    update.next_run_at,
                    update.enabled,
                    update.id
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// The soonest `next_run_at` across enabled jobs, if any.
pub async fn next_due_at(db: &Database) -> Result<Option<i64>, BobError> {
    db.connection()
        .call(move |conn| {
            let next: Option<i64> = conn.query_row(
                "SELECT MIN(next_run_at) FROM jobs WHERE enabled = 1",
                [],
                |row| row.get(0),
            )?;
            Ok(next)
        })
        .await
        .map_err(map_tr_err)
}

fn row_to_job(row: &rusqlite::Row) -> Result<Job, rusqlite::Error> {
    let kind_str: String = row.get(3)?;
    let type_str: String = row.get(5)?;
    let payload_str: String = row.get(6)?;
    let mode_str: String = row.get(10)?;

    Ok(Job {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        thread_id: row.get(2)?,
        schedule_kind: ScheduleKind::from_str(&kind_str)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        schedule_spec: row.get(4)?,
        job_type: crate::models::JobType::from_str(&type_str)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        payload: serde_json::from_str(&payload_str).unwrap_or_else(|_| serde_json::json!({})),
        enabled: row.get::<_, i64>(7)? != 0,
        next_run_at: row.get(8)?,
        last_run_at: row.get(9)?,
        context_mode: crate::models::ContextMode::from_str(&mode_str)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        created_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::StoreKind;
    use crate::models::{ContextMode, JobType};

    fn utc() -> Tz {
        "UTC".parse().unwrap()
    }

    async fn setup_db() -> Database {
        Database::open_in_memory(StoreKind::Jobs).await.unwrap()
    }

    fn one_shot(chat_id: i64, at_ms: i64) -> JobInput {
        JobInput {
            chat_id,
            thread_id: None,
            schedule_kind: ScheduleKind::At,
            schedule_spec: at_ms.to_string(),
            job_type: JobType::SendMessage,
            payload: serde_json::json!({"text": "ping"}),
            context_mode: ContextMode::Session,
        }
    }

    fn interval(chat_id: i64, every_ms: i64) -> JobInput {
        JobInput {
            chat_id,
            thread_id: None,
            schedule_kind: ScheduleKind::Every,
            schedule_spec: every_ms.to_string(),
            job_type: JobType::AgentTurn,
            payload: serde_json::json!({"prompt": "standup"}),
            context_mode: ContextMode::Session,
        }
    }

    #[tokio::test]
    async fn add_computes_next_run() {
        let db = setup_db().await;
        let now = 1_000_000;
        let job = add(&db, one_shot(5, now + 300_000), now, utc()).await.unwrap();
        assert_eq!(job.next_run_at, Some(now + 300_000));
        assert!(job.enabled);
        assert_eq!(job.chat_id, 5);
    }

    #[tokio::test]
    async fn add_rejects_invalid_spec() {
        let db = setup_db().await;
        let mut input = one_shot(5, 0);
        input.schedule_spec = "gibberish".into();
        let err = add(&db, input, 0, utc()).await.unwrap_err();
        assert!(matches!(err, BobError::InvalidSchedule(_)));
    }

    #[tokio::test]
    async fn claim_due_disables_one_shots_atomically() {
        let db = setup_db().await;
        let now = 1_000_000;
        let job = add(&db, one_shot(5, now), now - 10, utc()).await.unwrap();

        let claimed = claim_due(&db, now, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, job.id);
        assert!(!claimed[0].enabled);

        // A second claim must find nothing: the flip happened inside the
        // claiming transaction.
        let again = claim_due(&db, now + 1_000_000, 10).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn claim_due_keeps_interval_jobs_enabled() {
        let db = setup_db().await;
        let now = 1_000_000;
        add(&db, interval(5, 60_000), now, utc()).await.unwrap();

        let claimed = claim_due(&db, now + 60_000, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert!(claimed[0].enabled);
    }

    #[tokio::test]
    async fn claim_due_respects_order_and_limit() {
        let db = setup_db().await;
        let now = 1_000_000;
        let late = add(&db, one_shot(1, now + 2000), now, utc()).await.unwrap();
        let early = add(&db, one_shot(2, now + 1000), now, utc()).await.unwrap();

        let claimed = claim_due(&db, now + 5000, 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, early.id);

        let rest = claim_due(&db, now + 5000, 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, late.id);
    }

    #[tokio::test]
    async fn concurrent_claims_are_disjoint() {
        let db = setup_db().await;
        let now = 1_000_000;
        for i in 0..6 {
            add(&db, one_shot(i, now), now - 10, utc()).await.unwrap();
        }

        let (a, b) = tokio::join!(claim_due(&db, now, 10), claim_due(&db, now, 10));
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a.len() + b.len(), 6);
        for job in &a {
            assert!(!b.iter().any(|other| other.id == job.id));
        }
    }

    #[tokio::test]
    async fn disabled_jobs_are_never_selected() {
        let db = setup_db().await;
        let now = 1_000_000;
        let job = add(&db, interval(5, 60_000), now, utc()).await.unwrap();
        update_after_run(
            &db,
            JobRunUpdate {
                id: job.id,
                last_run_at: Some(now),
                next_run_at: None,
                enabled: false,
            },
        )
        .await
        .unwrap();

        assert!(claim_due(&db, now + 86_400_000, 10).await.unwrap().is_empty());
        assert_eq!(next_due_at(&db).await.unwrap(), None);
    }

    #[tokio::test]
    async fn next_due_at_is_minimum_enabled() {
        let db = setup_db().await;
        let now = 1_000_000;
        add(&db, one_shot(1, now + 5000), now, utc()).await.unwrap();
        add(&db, one_shot(2, now + 2000), now, utc()).await.unwrap();
        assert_eq!(next_due_at(&db).await.unwrap(), Some(now + 2000));
    }

    #[tokio::test]
    async fn remove_reports_whether_found() {
        let db = setup_db().await;
        let job = add(&db, one_shot(1, 5000), 0, utc()).await.unwrap();
        assert!(remove(&db, job.id).await.unwrap());
        assert!(!remove(&db, job.id).await.unwrap());
        assert!(list(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_for_chat_filters_and_orders() {
        let db = setup_db().await;
        let now = 1_000_000;
        add(&db, one_shot(7, now + 9000), now, utc()).await.unwrap();
        add(&db, one_shot(7, now + 1000), now, utc()).await.unwrap();
        add(&db, one_shot(8, now + 500), now, utc()).await.unwrap();

        let jobs = list_for_chat(&db, 7).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].next_run_at <= jobs[1].next_run_at);
    }
}
