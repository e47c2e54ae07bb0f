//! Scheduled task queue rows.
//!
//! A logical due-time queue persisted so deferred work survives restarts.
//! One pending row per (deal, kind) — enforced by a partial unique index —
//! so re-enqueueing pending work is a no-op. Firing is at-least-once; every
//! downstream action re-checks deal state before acting.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::scheduled_tasks;

/// Deferred work kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    AutoPost,
    Verify,
    TimeoutSweep,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::AutoPost => "auto_post",
            TaskKind::Verify => "verify",
            TaskKind::TimeoutSweep => "timeout_sweep",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "auto_post" => TaskKind::AutoPost,
            "verify" => TaskKind::Verify,
            "timeout_sweep" => TaskKind::TimeoutSweep,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = scheduled_tasks)]
pub struct ScheduledTask {
    pub id: String,
    pub deal_id: String,
    pub kind: String,
    pub due_at: NaiveDateTime,
    pub attempts: i32,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = scheduled_tasks)]
struct NewScheduledTask {
    id: String,
    deal_id: String,
    kind: String,
    due_at: NaiveDateTime,
    attempts: i32,
    created_at: NaiveDateTime,
}

impl ScheduledTask {
    pub fn kind(&self) -> Option<TaskKind> {
        TaskKind::parse(&self.kind)
    }

    /// Enqueue a task. No-op when a pending task for the same (deal, kind)
    /// already exists.
    pub fn enqueue(
        conn: &mut SqliteConnection,
        deal_id: &str,
        kind: TaskKind,
        due_at: NaiveDateTime,
    ) -> Result<()> {
        let row = NewScheduledTask {
            id: Uuid::new_v4().to_string(),
            deal_id: deal_id.to_string(),
            kind: kind.as_str().to_string(),
            due_at,
            attempts: 0,
            created_at: chrono::Utc::now().naive_utc(),
        };
        diesel::insert_into(scheduled_tasks::table)
            .values(&row)
            .on_conflict_do_nothing()
            .execute(conn)
            .context("Failed to enqueue scheduled task")?;
        Ok(())
    }

    pub fn find_due(conn: &mut SqliteConnection, now: NaiveDateTime) -> Result<Vec<ScheduledTask>> {
        scheduled_tasks::table
            .filter(scheduled_tasks::completed_at.is_null())
            .filter(scheduled_tasks::due_at.le(now))
            .order(scheduled_tasks::due_at.asc())
            .load(conn)
            .context("Failed to load due tasks")
    }

    pub fn bump_attempts(conn: &mut SqliteConnection, task_id: &str) -> Result<()> {
        diesel::update(scheduled_tasks::table.filter(scheduled_tasks::id.eq(task_id)))
            .set(scheduled_tasks::attempts.eq(scheduled_tasks::attempts + 1))
            .execute(conn)
            .context("Failed to bump task attempts")?;
        Ok(())
    }

    pub fn mark_completed(conn: &mut SqliteConnection, task_id: &str) -> Result<()> {
        diesel::update(scheduled_tasks::table.filter(scheduled_tasks::id.eq(task_id)))
            .set(scheduled_tasks::completed_at.eq(chrono::Utc::now().naive_utc()))
            .execute(conn)
            .context("Failed to mark task completed")?;
        Ok(())
    }

    /// Push a pending task's due time forward (retry after transient failure,
    /// or the next check of a verification cadence).
    pub fn reschedule(
        conn: &mut SqliteConnection,
        task_id: &str,
        due_at: NaiveDateTime,
    ) -> Result<()> {
        diesel::update(scheduled_tasks::table.filter(scheduled_tasks::id.eq(task_id)))
            .set(scheduled_tasks::due_at.eq(due_at))
            .execute(conn)
            .context("Failed to reschedule task")?;
        Ok(())
    }

    pub fn find_pending(
        conn: &mut SqliteConnection,
        deal_id: &str,
        kind: TaskKind,
    ) -> Result<Option<ScheduledTask>> {
        scheduled_tasks::table
            .filter(scheduled_tasks::deal_id.eq(deal_id))
            .filter(scheduled_tasks::kind.eq(kind.as_str()))
            .filter(scheduled_tasks::completed_at.is_null())
            .first(conn)
            .optional()
            .context("Failed to query pending task")
    }
}
