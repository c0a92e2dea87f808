// SPDX-FileCopyrightText: 2026 Bob Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Status rendering for `/status` in chat and `bob status` on the CLI.

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;

use bob_core::BobError;
use bob_scheduler::SchedulerContext;
use bob_storage::queries::jobs;
use bob_storage::Job;

/// Status for one chat: its engine, DND state, and upcoming jobs.
pub async fn chat_status(ctx: &SchedulerContext, chat_id: i64) -> Result<String, BobError> {
    let engine = ctx
        .sessions
        .default_engine(chat_id)
        .unwrap_or_else(|| ctx.config.default_engine.clone());

    let now = Utc::now().timestamp_millis();
    let mut out = format!("engine: {engine}\n");

    let dnd = ctx.dnd.status(now);
    if dnd.active {
        out.push_str(&format!(
            "dnd: active until {}\n",
            dnd.ends_at.map_or("?".to_string(), |t| format_time(t, &ctx.tz))
        ));
    } else {
        out.push_str("dnd: off\n");
    }

    let upcoming = jobs::list_for_chat(&ctx.jobs_db, chat_id).await?;
    let enabled: Vec<&Job> = upcoming.iter().filter(|j| j.enabled).take(5).collect();
    if enabled.is_empty() {
        out.push_str("no scheduled jobs");
    } else {
        out.push_str("upcoming:\n");
        for job in enabled {
            out.push_str(&format!("  {}\n", format_job(job, &ctx.tz)));
        }
    }

    Ok(out.trim_end().to_string())
}

fn format_job(job: &Job, tz: &Tz) -> String {
    let when = job
        .next_run_at
        .map_or("-".to_string(), |t| format_time(t, tz));
    format!(
        "#{} {} {} -> {when}",
        job.id, job.job_type, job.schedule_kind
    )
}

fn format_time(ms: i64, tz: &Tz) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(t) => t.with_timezone(tz).format("%Y-%m-%d %H:%M").to_string(),
        None => ms.to_string(),
    }
}
