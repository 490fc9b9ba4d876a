//! Typed domain records carried by sync operations.

use crate::error::ValidationError;
use crate::operation::{Domain, Timestamp};
use serde::{Deserialize, Serialize};

/// Maximum length of a profile display name, in characters.
const MAX_DISPLAY_NAME_CHARS: usize = 64;

/// Progress through one course day.
///
/// `None` text fields mean "not touched by this edit"; a merge keeps the
/// other side's value for them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Course day, starting at 1.
    pub day: u32,
    /// Indices of completed tasks within the day.
    pub completed_tasks: Vec<u32>,
    /// Code editor contents.
    pub code: Option<String>,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Answer to the end-of-day recap question.
    pub recap_answer: Option<String>,
    /// Whether the whole day is done.
    pub completed: bool,
    /// Last modification time.
    pub updated_at: Timestamp,
}

impl ProgressRecord {
    /// Creates an empty record for `day`.
    pub fn new(day: u32) -> Self {
        Self {
            day,
            ..Self::default()
        }
    }
}

/// Monotonic learner counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserStats {
    /// Experience points.
    pub total_xp: u64,
    /// Current daily streak.
    pub current_streak: u64,
    /// Best daily streak.
    pub longest_streak: u64,
    /// Tasks completed overall.
    pub tasks_completed: u64,
    /// Days completed overall.
    pub days_completed: u64,
    /// Task attempts submitted overall.
    pub total_attempts: u64,
}

impl UserStats {
    /// Field-wise maximum; counters never regress.
    pub fn max(&self, other: &UserStats) -> UserStats {
        UserStats {
            total_xp: self.total_xp.max(other.total_xp),
            current_streak: self.current_streak.max(other.current_streak),
            longest_streak: self.longest_streak.max(other.longest_streak),
            tasks_completed: self.tasks_completed.max(other.tasks_completed),
            days_completed: self.days_completed.max(other.days_completed),
            total_attempts: self.total_attempts.max(other.total_attempts),
        }
    }
}

/// Unlocked achievements and learner stats. One per account.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AchievementRecord {
    /// Achievement identifiers.
    pub unlocked_achievements: Vec<String>,
    /// Learner counters.
    pub stats: UserStats,
    /// Last modification time.
    pub updated_at: Timestamp,
}

/// User profile. One per account.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// Name shown to other learners.
    pub display_name: Option<String>,
    /// Avatar image URL.
    pub avatar_url: Option<String>,
    /// Short biography.
    pub bio: Option<String>,
    /// IANA timezone name.
    pub timezone: Option<String>,
    /// Daily study goal.
    pub daily_goal_minutes: Option<u32>,
    /// Last modification time.
    pub updated_at: Timestamp,
}

/// One graded submission for a task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskAttemptRecord {
    /// Client-generated attempt identifier.
    pub attempt_id: String,
    /// Course day of the task.
    pub day: u32,
    /// Task index within the day.
    pub task_index: u32,
    /// Submitted code.
    pub code: String,
    /// Whether the submission passed.
    pub passed: bool,
    /// Grader score out of 100.
    pub score: Option<u32>,
    /// Submission time.
    pub updated_at: Timestamp,
}

/// Mastery estimate for a topic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopicMasteryRecord {
    /// Topic name.
    pub topic: String,
    /// Mastery percentage, 0 to 100.
    pub mastery: u8,
    /// Questions attempted.
    pub attempts: u32,
    /// Questions answered correctly.
    pub correct: u32,
    /// Last modification time.
    pub updated_at: Timestamp,
}

/// A domain record, tagged by domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "snake_case")]
pub enum SyncPayload {
    /// Course progress.
    Progress(ProgressRecord),
    /// Achievements and stats.
    Achievement(AchievementRecord),
    /// Profile.
    Profile(ProfileRecord),
    /// Task attempt.
    TaskAttempt(TaskAttemptRecord),
    /// Topic mastery.
    TopicMastery(TopicMasteryRecord),
}

impl SyncPayload {
    /// Domain of the record.
    pub fn domain(&self) -> Domain {
        match self {
            SyncPayload::Progress(_) => Domain::Progress,
            SyncPayload::Achievement(_) => Domain::Achievement,
            SyncPayload::Profile(_) => Domain::Profile,
            SyncPayload::TaskAttempt(_) => Domain::TaskAttempt,
            SyncPayload::TopicMastery(_) => Domain::TopicMastery,
        }
    }

    /// Stable business key of the record within its owner and domain.
    pub fn key(&self) -> String {
        match self {
            SyncPayload::Progress(r) => format!("day:{}", r.day),
            SyncPayload::Achievement(_) => "achievements".to_string(),
            SyncPayload::Profile(_) => "profile".to_string(),
            SyncPayload::TaskAttempt(r) => format!("attempt:{}", r.attempt_id),
            SyncPayload::TopicMastery(r) => format!("topic:{}", r.topic),
        }
    }

    /// Last modification time of the record.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            SyncPayload::Progress(r) => r.updated_at,
            SyncPayload::Achievement(r) => r.updated_at,
            SyncPayload::Profile(r) => r.updated_at,
            SyncPayload::TaskAttempt(r) => r.updated_at,
            SyncPayload::TopicMastery(r) => r.updated_at,
        }
    }

    /// Returns the record with `updated_at` replaced.
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        match &mut self {
            SyncPayload::Progress(r) => r.updated_at = timestamp,
            SyncPayload::Achievement(r) => r.updated_at = timestamp,
            SyncPayload::Profile(r) => r.updated_at = timestamp,
            SyncPayload::TaskAttempt(r) => r.updated_at = timestamp,
            SyncPayload::TopicMastery(r) => r.updated_at = timestamp,
        }
        self
    }

    /// Checks the record's shape before it is queued.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let domain = self.domain();
        match self {
            SyncPayload::Progress(r) => {
                if r.day == 0 {
                    return Err(ValidationError::new(domain, "day", "must be at least 1"));
                }
            }
            SyncPayload::Achievement(r) => {
                if r.unlocked_achievements.iter().any(|a| a.trim().is_empty()) {
                    return Err(ValidationError::new(
                        domain,
                        "unlocked_achievements",
                        "contains an empty identifier",
                    ));
                }
            }
            SyncPayload::Profile(r) => {
                if let Some(name) = &r.display_name {
                    if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
                        return Err(ValidationError::new(
                            domain,
                            "display_name",
                            format!("is longer than {MAX_DISPLAY_NAME_CHARS} characters"),
                        ));
                    }
                }
            }
            SyncPayload::TaskAttempt(r) => {
                if r.attempt_id.trim().is_empty() {
                    return Err(ValidationError::new(domain, "attempt_id", "is empty"));
                }
                if r.day == 0 {
                    return Err(ValidationError::new(domain, "day", "must be at least 1"));
                }
                if r.score.is_some_and(|s| s > 100) {
                    return Err(ValidationError::new(domain, "score", "exceeds 100"));
                }
            }
            SyncPayload::TopicMastery(r) => {
                if r.topic.trim().is_empty() {
                    return Err(ValidationError::new(domain, "topic", "is empty"));
                }
                if r.mastery > 100 {
                    return Err(ValidationError::new(domain, "mastery", "exceeds 100"));
                }
                if r.correct > r.attempts {
                    return Err(ValidationError::new(
                        domain,
                        "correct",
                        "exceeds the number of attempts",
                    ));
                }
            }
        }
        Ok(())
    }
}
