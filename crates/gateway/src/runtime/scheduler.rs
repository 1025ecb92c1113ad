//! Named scheduled jobs: a cron expression, a prompt, and a target session.
//!
//! Jobs persist as one JSON document under the cron directory and are
//! evaluated by a 30-second tick. A firing job runs one elevated agent turn
//! against its target session (the main session when none is set).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use relay_domain::error::{Error, Result};

use crate::runtime::cron;
use crate::runtime::turn::{process_message, ToolAccess, TurnInput, TurnMode};
use crate::state::AppState;

const TICK: Duration = Duration::from_secs(30);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    /// 5-field cron expression.
    pub cron: String,
    #[serde(default = "d_utc")]
    pub timezone: String,
    pub prompt: String,
    /// Target session; `None` = the main session at fire time.
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn d_utc() -> String {
    "UTC".into()
}
fn d_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ScheduleStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ScheduleStore {
    path: PathBuf,
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl ScheduleStore {
    /// Load jobs from `directory/jobs.json` (created lazily on first save).
    pub fn new(directory: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(directory)?;
        let path = directory.join("jobs.json");

        let mut jobs: HashMap<Uuid, Job> = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        // Seed next_run_at for jobs saved before their first evaluation.
        let now = Utc::now();
        for job in jobs.values_mut() {
            if job.next_run_at.is_none() {
                job.next_run_at = cron::next_occurrence(&job.cron, &now, cron::parse_tz(&job.timezone));
            }
        }

        tracing::info!(jobs = jobs.len(), path = %path.display(), "schedule store loaded");
        Ok(Self {
            path,
            jobs: RwLock::new(jobs),
        })
    }

    pub fn create(
        &self,
        name: impl Into<String>,
        cron_expr: impl Into<String>,
        prompt: impl Into<String>,
        session: Option<String>,
    ) -> Result<Job> {
        let cron_expr = cron_expr.into();
        if !cron::is_valid(&cron_expr) {
            return Err(Error::Config(format!("invalid cron expression \"{cron_expr}\"")));
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            name: name.into(),
            next_run_at: cron::next_occurrence(&cron_expr, &now, chrono_tz::UTC),
            cron: cron_expr,
            timezone: d_utc(),
            prompt: prompt.into(),
            session,
            enabled: true,
            last_run_at: None,
            created_at: now,
        };
        self.jobs.write().insert(job.id, job.clone());
        self.flush();
        Ok(job)
    }

    pub fn get(&self, id: &Uuid) -> Option<Job> {
        self.jobs.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    pub fn update(&self, id: &Uuid, update: impl FnOnce(&mut Job)) -> bool {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(id) else {
            return false;
        };
        update(job);
        drop(jobs);
        self.flush();
        true
    }

    pub fn delete(&self, id: &Uuid) -> bool {
        let removed = self.jobs.write().remove(id).is_some();
        if removed {
            self.flush();
        }
        removed
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().len()
    }

    /// Enabled jobs whose `next_run_at` has passed.
    pub fn due_jobs(&self, now: &DateTime<Utc>) -> Vec<Job> {
        self.jobs
            .read()
            .values()
            .filter(|j| j.enabled && j.next_run_at.is_some_and(|t| t <= *now))
            .cloned()
            .collect()
    }

    /// Record a firing: stamp `last_run_at`, advance `next_run_at`.
    pub fn mark_fired(&self, id: &Uuid, now: &DateTime<Utc>) {
        self.update(id, |job| {
            job.last_run_at = Some(*now);
            job.next_run_at = cron::next_occurrence(&job.cron, now, cron::parse_tz(&job.timezone));
        });
    }

    fn flush(&self) {
        let jobs = self.jobs.read();
        match serde_json::to_string_pretty(&*jobs) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!(error = %e, "failed to persist schedules");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize schedules"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Long-running evaluation loop. Spawned once at startup when
/// `cron.enabled`.
pub async fn run_scheduler_loop(state: AppState) {
    let mut tick = tokio::time::interval(TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tick.tick().await;
        let now = Utc::now();

        for job in state.scheduler.due_jobs(&now) {
            state.scheduler.mark_fired(&job.id, &now);

            let target = job
                .session
                .clone()
                .or_else(|| state.sessions.main_session_id());
            let Some(target) = target else {
                tracing::debug!(job = %job.name, "no target session, skipping job");
                continue;
            };
            if !state.sessions.exists(&target) {
                tracing::warn!(job = %job.name, session = %target, "job target session missing");
                continue;
            }

            tracing::info!(job = %job.name, session = %target, "firing scheduled job");
            state.clients.data_update("cron", None);

            let job_state = state.clone();
            let prompt = job.prompt.clone();
            tokio::spawn(async move {
                let input = TurnInput {
                    session_key: target,
                    user_message: Some(prompt),
                    mode: TurnMode::NonStreaming,
                    access: ToolAccess::Full,
                    elevated_override: Some(true),
                };
                let response = process_message(&job_state, input).await;
                if let Some(error) = response.error {
                    tracing::warn!(error = %error, "scheduled job turn failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ScheduleStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn create_computes_next_run() {
        let (_dir, store) = store();
        let job = store.create("daily", "0 9 * * *", "do the rounds", None).unwrap();
        assert!(job.next_run_at.is_some());
        assert!(job.enabled);
    }

    #[test]
    fn invalid_cron_rejected() {
        let (_dir, store) = store();
        assert!(store.create("bad", "not a cron", "x", None).is_err());
    }

    #[test]
    fn due_jobs_and_mark_fired() {
        let (_dir, store) = store();
        let job = store.create("every-min", "* * * * *", "tick", None).unwrap();

        // A next_run_at in the future means not due yet.
        let before = Utc::now();
        assert!(store.due_jobs(&before).is_empty());

        // One minute past the scheduled time it becomes due.
        let later = job.next_run_at.unwrap() + chrono::Duration::seconds(1);
        let due = store.due_jobs(&later);
        assert_eq!(due.len(), 1);

        store.mark_fired(&job.id, &later);
        let updated = store.get(&job.id).unwrap();
        assert_eq!(updated.last_run_at, Some(later));
        assert!(updated.next_run_at.unwrap() > later);
        assert!(store.due_jobs(&later).is_empty());
    }

    #[test]
    fn disabled_jobs_never_due() {
        let (_dir, store) = store();
        let job = store.create("off", "* * * * *", "tick", None).unwrap();
        store.update(&job.id, |j| j.enabled = false);

        let far_future = Utc::now() + chrono::Duration::days(1);
        assert!(store.due_jobs(&far_future).is_empty());
    }

    #[test]
    fn persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = ScheduleStore::new(dir.path()).unwrap();
            store.create("persisted", "*/5 * * * *", "hello", Some("ws:a".into())).unwrap().id
        };
        let reloaded = ScheduleStore::new(dir.path()).unwrap();
        let job = reloaded.get(&id).unwrap();
        assert_eq!(job.name, "persisted");
        assert_eq!(job.session.as_deref(), Some("ws:a"));
    }
}
