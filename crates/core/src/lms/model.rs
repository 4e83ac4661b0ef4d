//! LMS integration domain models.

use serde::{Deserialize, Serialize};

/// Remote entity kinds mirrored locally by incremental sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Course,
    Enrollment,
    Assignment,
    Submission,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Course,
        EntityKind::Enrollment,
        EntityKind::Assignment,
        EntityKind::Submission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Enrollment => "enrollment",
            Self::Assignment => "assignment",
            Self::Submission => "submission",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            Self::Course => "courses",
            Self::Enrollment => "enrollments",
            Self::Assignment => "assignments",
            Self::Submission => "submissions",
        }
    }

    /// Kind whose remote id scopes this kind's `parent_remote_id`.
    pub fn parent_kind(&self) -> Option<EntityKind> {
        match self {
            Self::Course => None,
            Self::Enrollment | Self::Assignment => Some(Self::Course),
            Self::Submission => Some(Self::Assignment),
        }
    }

    /// Body field that carries the parent's remote id in live-event payloads.
    pub fn parent_field(&self) -> Option<&'static str> {
        match self.parent_kind()? {
            Self::Course => Some("course_id"),
            Self::Assignment => Some("assignment_id"),
            _ => None,
        }
    }

    /// Map a live-event name such as `submission_updated` to its entity kind.
    pub fn from_event_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| name.starts_with(&format!("{}_", kind.as_str())))
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OAuth tokens held for one local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthTokenRecord {
    pub local_user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Absolute expiry of the access token (unix seconds).
    pub expires_at: i64,
}

impl OAuthTokenRecord {
    pub fn seconds_remaining(&self, now_epoch: i64) -> i64 {
        self.expires_at - now_epoch
    }

    /// True when the access token stays valid for more than `min_secs`.
    pub fn is_valid_for(&self, now_epoch: i64, min_secs: i64) -> bool {
        self.seconds_remaining(now_epoch) > min_secs
    }
}

/// Raw remote entity stored as an opaque payload, keyed by remote id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntityRecord {
    pub local_id: i64,
    pub kind: EntityKind,
    pub remote_id: String,
    pub parent_remote_id: Option<String>,
    pub payload: serde_json::Value,
    pub updated_at: String,
}

/// Watermark state for one sync scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursorRecord {
    pub scope: String,
    pub cursor: Option<String>,
    pub extra: serde_json::Map<String, serde_json::Value>,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertFailure {
    pub remote_id: Option<String>,
    pub message: String,
}

/// Outcome of one batch upsert. Failed items never abort the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSummary {
    pub created: usize,
    pub updated: usize,
    pub failed: Vec<UpsertFailure>,
}

impl UpsertSummary {
    /// Number of items written (created or updated).
    pub fn count(&self) -> usize {
        self.created + self.updated
    }

    pub fn record_failure(&mut self, remote_id: Option<String>, message: impl Into<String>) {
        self.failed.push(UpsertFailure {
            remote_id,
            message: message.into(),
        });
    }
}

/// Cursor scope for a user's top-level course list.
pub fn courses_scope(user_id: &str) -> String {
    format!("user:{}:courses", user_id)
}

/// Cursor scope for a child collection, e.g. `course:123:assignments`.
pub fn child_scope(kind: EntityKind, parent_remote_id: &str) -> String {
    let parent = kind
        .parent_kind()
        .map(|k| k.as_str())
        .unwrap_or("root");
    format!("{}:{}:{}", parent, parent_remote_id, kind.plural())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_map_to_kinds() {
        assert_eq!(
            EntityKind::from_event_name("submission_created"),
            Some(EntityKind::Submission)
        );
        assert_eq!(
            EntityKind::from_event_name("Course_Updated"),
            Some(EntityKind::Course)
        );
        assert_eq!(EntityKind::from_event_name("grade_change"), None);
        assert_eq!(EntityKind::from_event_name("course"), None);
    }

    #[test]
    fn scopes_follow_parent_naming() {
        assert_eq!(
            child_scope(EntityKind::Assignment, "123"),
            "course:123:assignments"
        );
        assert_eq!(
            child_scope(EntityKind::Submission, "77"),
            "assignment:77:submissions"
        );
        assert_eq!(courses_scope("u-1"), "user:u-1:courses");
    }

    #[test]
    fn token_validity_uses_strict_margin() {
        let record = OAuthTokenRecord {
            local_user_id: "u".to_string(),
            access_token: "a".to_string(),
            refresh_token: None,
            expires_at: 1_000,
        };
        assert!(record.is_valid_for(900, 60));
        assert!(!record.is_valid_for(940, 60));
        assert!(!record.is_valid_for(1_200, 60));
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&EntityKind::Enrollment).unwrap();
        assert_eq!(json, "\"enrollment\"");
    }
}
