//! Incremental pulls of courses, enrollments, assignments and submissions
//! into the local entity mirror.

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use futures::future::join;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lmsbridge_core::lms::{
    child_scope, courses_scope, resolve_parent_id, resolve_remote_id, EntityKind,
    EntityUpsertStore, SyncCursorStore,
};
use lmsbridge_core::config::MAX_SINCE_DAYS;
use lmsbridge_core::{Error, Result};

use crate::client::RemoteCollectionSource;

pub const DEFAULT_SINCE_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Lookback window for incremental pulls.
    pub since_days: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            since_days: DEFAULT_SINCE_DAYS,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.since_days < 0 {
            return Err(Error::config("since_days must not be negative"));
        }
        if self.since_days > MAX_SINCE_DAYS {
            return Err(Error::config(format!(
                "since_days must be <= {}",
                MAX_SINCE_DAYS
            )));
        }
        Ok(())
    }

    /// Start of the incremental window ending at `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        TimeDelta::try_days(self.since_days)
            .and_then(|lookback| now.checked_sub_signed(lookback))
            .ok_or_else(|| {
                Error::config(format!(
                    "since_days {} is out of range",
                    self.since_days
                ))
            })
    }
}

/// Result of one sync pass over one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub scope: String,
    pub count: usize,
    pub failed: usize,
    pub cursor: Option<String>,
    #[serde(skip)]
    pub remote_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAllReport {
    pub courses: usize,
    pub enrollments: usize,
    pub assignments: usize,
    pub submissions: usize,
    pub failed: usize,
    /// Scopes that could not be synced, with the reason.
    pub errors: Vec<String>,
}

impl SyncAllReport {
    fn absorb(&mut self, kind: EntityKind, outcome: &SyncOutcome) {
        match kind {
            EntityKind::Course => self.courses += outcome.count,
            EntityKind::Enrollment => self.enrollments += outcome.count,
            EntityKind::Assignment => self.assignments += outcome.count,
            EntityKind::Submission => self.submissions += outcome.count,
        }
        self.failed += outcome.failed;
    }
}

fn courses_path() -> String {
    "/api/v1/courses".to_string()
}

fn enrollments_path(course_id: &str) -> String {
    format!("/api/v1/courses/{}/enrollments", urlencoding::encode(course_id))
}

fn assignments_path(course_id: &str) -> String {
    format!("/api/v1/courses/{}/assignments", urlencoding::encode(course_id))
}

fn submissions_path(course_id: &str, assignment_id: &str) -> String {
    format!(
        "/api/v1/courses/{}/assignments/{}/submissions",
        urlencoding::encode(course_id),
        urlencoding::encode(assignment_id)
    )
}

/// Errors that end a whole `sync_all` run rather than one scope.
fn aborts_run(err: &Error) -> bool {
    matches!(
        err,
        Error::NotAuthorized { .. } | Error::Cancelled(_) | Error::Config(_)
    )
}

pub struct SyncOrchestrator {
    source: Arc<dyn RemoteCollectionSource>,
    entities: Arc<dyn EntityUpsertStore>,
    cursors: Arc<dyn SyncCursorStore>,
    config: SyncConfig,
    cancel: AtomicBool,
}

struct Pass<'a> {
    user_id: &'a str,
    kind: EntityKind,
    parent_remote_id: Option<&'a str>,
    path: String,
    scope: String,
    incremental: bool,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn RemoteCollectionSource>,
        entities: Arc<dyn EntityUpsertStore>,
        cursors: Arc<dyn SyncCursorStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            entities,
            cursors,
            config,
            cancel: AtomicBool::new(false),
        }
    }

    /// Ask running passes to stop at the next page boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn reset_cancel(&self) {
        self.cancel.store(false, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub async fn sync_courses(&self, user_id: &str) -> Result<SyncOutcome> {
        self.run_pass(Pass {
            user_id,
            kind: EntityKind::Course,
            parent_remote_id: None,
            path: courses_path(),
            scope: courses_scope(user_id),
            incremental: false,
        })
        .await
    }

    pub async fn sync_course_enrollments(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<SyncOutcome> {
        self.run_pass(Pass {
            user_id,
            kind: EntityKind::Enrollment,
            parent_remote_id: Some(course_id),
            path: enrollments_path(course_id),
            scope: child_scope(EntityKind::Enrollment, course_id),
            incremental: true,
        })
        .await
    }

    pub async fn sync_course_assignments(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<SyncOutcome> {
        self.run_pass(Pass {
            user_id,
            kind: EntityKind::Assignment,
            parent_remote_id: Some(course_id),
            path: assignments_path(course_id),
            scope: child_scope(EntityKind::Assignment, course_id),
            incremental: true,
        })
        .await
    }

    pub async fn sync_assignment_submissions(
        &self,
        user_id: &str,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<SyncOutcome> {
        self.run_pass(Pass {
            user_id,
            kind: EntityKind::Submission,
            parent_remote_id: Some(assignment_id),
            path: submissions_path(course_id, assignment_id),
            scope: child_scope(EntityKind::Submission, assignment_id),
            incremental: true,
        })
        .await
    }

    /// Courses, then enrollments and assignments per course side by side,
    /// then submissions for every assignment mirrored under the course. A
    /// failing scope is reported and
    /// skipped; authorization loss and cancellation end the run.
    pub async fn sync_all(&self, user_id: &str) -> Result<SyncAllReport> {
        let mut report = SyncAllReport::default();
        let courses = self.sync_courses(user_id).await?;
        report.absorb(EntityKind::Course, &courses);

        for course_id in &courses.remote_ids {
            let (enrollments, assignments) = join(
                self.sync_course_enrollments(user_id, course_id),
                self.sync_course_assignments(user_id, course_id),
            )
            .await;

            self.record(&mut report, EntityKind::Enrollment, course_id, enrollments)?;
            if self
                .record(&mut report, EntityKind::Assignment, course_id, assignments)?
                .is_none()
            {
                continue;
            }

            // Every mirrored assignment, not only those updated in the window,
            // can receive new submissions.
            let mirrored = self
                .entities
                .list_entities(EntityKind::Assignment, Some(course_id))?;
            for assignment in &mirrored {
                let assignment_id = assignment.remote_id.as_str();
                let submissions = self
                    .sync_assignment_submissions(user_id, course_id, assignment_id)
                    .await;
                self.record(
                    &mut report,
                    EntityKind::Submission,
                    assignment_id,
                    submissions,
                )?;
            }
        }

        log::info!(
            "[Sync] Full sync for user {}: {} courses, {} enrollments, {} assignments, {} submissions ({} failed items, {} failed scopes)",
            user_id,
            report.courses,
            report.enrollments,
            report.assignments,
            report.submissions,
            report.failed,
            report.errors.len()
        );
        Ok(report)
    }

    fn record(
        &self,
        report: &mut SyncAllReport,
        kind: EntityKind,
        parent_id: &str,
        result: Result<SyncOutcome>,
    ) -> Result<Option<SyncOutcome>> {
        match result {
            Ok(outcome) => {
                report.absorb(kind, &outcome);
                Ok(Some(outcome))
            }
            Err(e) if aborts_run(&e) => Err(e),
            Err(e) => {
                log::warn!("[Sync] {} sync under {} failed: {}", kind.plural(), parent_id, e);
                report
                    .errors
                    .push(format!("{} under {}: {}", kind.plural(), parent_id, e));
                Ok(None)
            }
        }
    }

    async fn run_pass(&self, pass: Pass<'_>) -> Result<SyncOutcome> {
        if self.is_cancelled() {
            return Err(Error::Cancelled(format!("sync of {} not started", pass.scope)));
        }

        let started_at = Utc::now();
        let since = self.config.window_start(started_at)?;
        let cancel_flag = Some(&self.cancel);

        let items = if pass.incremental {
            self.source
                .list_updated_since(&pass.path, pass.user_id, since, cancel_flag)
                .await
        } else {
            self.source
                .list_all(&pass.path, pass.user_id, Vec::new(), cancel_flag)
                .await
        }
        .map_err(Error::from)?;

        let remote_ids = items
            .iter()
            .filter_map(|item| {
                let parent = resolve_parent_id(pass.kind, item, pass.parent_remote_id);
                resolve_remote_id(pass.kind, item, parent.as_deref())
            })
            .collect::<Vec<_>>();

        let summary = self
            .entities
            .upsert_entities(
                pass.kind,
                pass.parent_remote_id.map(str::to_string),
                items,
            )
            .await?;

        let cursor = started_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut extra = Map::new();
        extra.insert("kind".to_string(), json!(pass.kind.as_str()));
        extra.insert("count".to_string(), json!(summary.count()));
        extra.insert("failed".to_string(), json!(summary.failed.len()));
        if pass.incremental {
            extra.insert(
                "since".to_string(),
                Value::String(since.to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
        }
        let saved = self
            .cursors
            .upsert_cursor(pass.scope.clone(), Some(cursor), extra)
            .await?;

        for failure in &summary.failed {
            log::warn!(
                "[Sync] {} item {} not stored: {}",
                pass.kind,
                failure.remote_id.as_deref().unwrap_or("<no id>"),
                failure.message
            );
        }
        log::info!(
            "[Sync] {}: {} {} synced ({} created, {} updated, {} failed)",
            pass.scope,
            summary.count(),
            pass.kind.plural(),
            summary.created,
            summary.updated,
            summary.failed.len()
        );

        Ok(SyncOutcome {
            scope: pass.scope,
            count: summary.count(),
            failed: summary.failed.len(),
            cursor: saved.cursor,
            remote_ids,
        })
    }
}
