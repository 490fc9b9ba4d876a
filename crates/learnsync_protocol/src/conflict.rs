//! Conflict detection and resolution.
//!
//! A conflict exists when a queued local record and its remote counterpart
//! carry different timestamps. Timestamps are client wall-clock values, so
//! skew between devices can pick the wrong winner under last-write-wins.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::Timestamp;
use crate::records::{
    AchievementRecord, ProfileRecord, ProgressRecord, SyncPayload, TaskAttemptRecord,
    TopicMasteryRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;

/// A record that carries a modification time.
pub trait Versioned {
    /// Last modification time.
    fn timestamp(&self) -> Timestamp;
}

/// A record with a domain-aware merge.
pub trait Mergeable: Versioned + Clone {
    /// Combines both sides of a conflicting record.
    ///
    /// Only called when the timestamps differ.
    fn merge(local: &Self, remote: &Self) -> Self;
}

/// How to settle a conflict between a local and a remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Keep whichever side has the newer timestamp.
    LastWriteWins,
    /// Combine both sides field by field.
    Merge,
    /// Always keep the local side.
    LocalWins,
    /// Always keep the remote side.
    RemoteWins,
}

/// Outcome of resolving one record.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolution<T> {
    /// The record to write.
    pub resolved: T,
    /// Strategy that was requested.
    pub strategy: ConflictStrategy,
    /// Whether both sides existed with different timestamps.
    pub had_conflict: bool,
}

/// Returns true iff both sides exist and their timestamps differ.
pub fn detect_conflict<T: Versioned>(local: Option<&T>, remote: Option<&T>) -> bool {
    match (local, remote) {
        (Some(l), Some(r)) => l.timestamp() != r.timestamp(),
        _ => false,
    }
}

/// Resolves a local record against its remote counterpart.
///
/// - one side only: that side, no conflict
/// - neither side: `None`
/// - equal timestamps: remote, no conflict
/// - otherwise: `strategy` decides
pub fn resolve_conflict<T: Mergeable>(
    local: Option<&T>,
    remote: Option<&T>,
    strategy: ConflictStrategy,
) -> Option<ConflictResolution<T>> {
    let (local, remote) = match (local, remote) {
        (None, None) => return None,
        (Some(only), None) | (None, Some(only)) => {
            return Some(ConflictResolution {
                resolved: only.clone(),
                strategy,
                had_conflict: false,
            })
        }
        (Some(l), Some(r)) => (l, r),
    };

    if local.timestamp() == remote.timestamp() {
        return Some(ConflictResolution {
            resolved: remote.clone(),
            strategy,
            had_conflict: false,
        });
    }

    let resolved = match strategy {
        ConflictStrategy::LastWriteWins => newer(local, remote).clone(),
        ConflictStrategy::Merge => T::merge(local, remote),
        ConflictStrategy::LocalWins => local.clone(),
        ConflictStrategy::RemoteWins => remote.clone(),
    };

    Some(ConflictResolution {
        resolved,
        strategy,
        had_conflict: true,
    })
}

fn newer<'a, T: Versioned>(local: &'a T, remote: &'a T) -> &'a T {
    if local.timestamp() > remote.timestamp() {
        local
    } else {
        remote
    }
}

/// Union of two lists, deduplicated by an explicit identity key.
///
/// Keeps first-seen order: local items, then remote items not already present.
pub fn merge_unique_by<T, K, F>(local: &[T], remote: &[T], key: F) -> Vec<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::with_capacity(local.len() + remote.len());
    local
        .iter()
        .chain(remote)
        .filter(|item| seen.insert(key(item)))
        .cloned()
        .collect()
}

/// Union of two lists of values that are their own identity.
pub fn merge_unique<T: Clone + Eq + Hash>(local: &[T], remote: &[T]) -> Vec<T> {
    merge_unique_by(local, remote, |item| item.clone())
}

macro_rules! versioned {
    ($($ty:ty),* $(,)?) => {
        $(impl Versioned for $ty {
            fn timestamp(&self) -> Timestamp {
                self.updated_at
            }
        })*
    };
}

versioned!(
    ProgressRecord,
    AchievementRecord,
    ProfileRecord,
    TaskAttemptRecord,
    TopicMasteryRecord,
);

impl Versioned for SyncPayload {
    fn timestamp(&self) -> Timestamp {
        SyncPayload::timestamp(self)
    }
}

impl Mergeable for ProgressRecord {
    fn merge(local: &Self, remote: &Self) -> Self {
        let (newer, older) = if local.updated_at > remote.updated_at {
            (local, remote)
        } else {
            (remote, local)
        };

        let mut completed_tasks = merge_unique(&local.completed_tasks, &remote.completed_tasks);
        completed_tasks.sort_unstable();

        ProgressRecord {
            day: local.day,
            completed_tasks,
            code: newer.code.clone().or_else(|| older.code.clone()),
            notes: newer.notes.clone().or_else(|| older.notes.clone()),
            recap_answer: newer
                .recap_answer
                .clone()
                .or_else(|| older.recap_answer.clone()),
            completed: local.completed || remote.completed,
            updated_at: newer.updated_at,
        }
    }
}

impl Mergeable for AchievementRecord {
    fn merge(local: &Self, remote: &Self) -> Self {
        AchievementRecord {
            unlocked_achievements: merge_unique(
                &local.unlocked_achievements,
                &remote.unlocked_achievements,
            ),
            stats: local.stats.max(&remote.stats),
            updated_at: local.updated_at.max(remote.updated_at),
        }
    }
}

impl Mergeable for ProfileRecord {
    fn merge(local: &Self, remote: &Self) -> Self {
        newer(local, remote).clone()
    }
}

impl Mergeable for TaskAttemptRecord {
    fn merge(local: &Self, remote: &Self) -> Self {
        newer(local, remote).clone()
    }
}

impl Mergeable for TopicMasteryRecord {
    fn merge(local: &Self, remote: &Self) -> Self {
        let newer = newer(local, remote);
        TopicMasteryRecord {
            topic: local.topic.clone(),
            mastery: newer.mastery,
            attempts: local.attempts.max(remote.attempts),
            correct: local.correct.max(remote.correct),
            updated_at: newer.updated_at,
        }
    }
}

impl SyncPayload {
    /// Resolves this local payload against an optional remote counterpart.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::DomainMismatch`] if the remote record belongs
    /// to another domain.
    pub fn resolve(
        &self,
        remote: Option<&SyncPayload>,
        strategy: ConflictStrategy,
    ) -> ProtocolResult<ConflictResolution<SyncPayload>> {
        let Some(remote) = remote else {
            return Ok(ConflictResolution {
                resolved: self.clone(),
                strategy,
                had_conflict: false,
            });
        };

        fn lift<T: Mergeable>(
            local: &T,
            remote: &T,
            strategy: ConflictStrategy,
            wrap: fn(T) -> SyncPayload,
        ) -> ConflictResolution<SyncPayload> {
            // Both sides are present, so resolution always yields a record.
            let outcome = resolve_conflict(Some(local), Some(remote), strategy).unwrap_or(
                ConflictResolution {
                    resolved: remote.clone(),
                    strategy,
                    had_conflict: false,
                },
            );
            ConflictResolution {
                resolved: wrap(outcome.resolved),
                strategy: outcome.strategy,
                had_conflict: outcome.had_conflict,
            }
        }

        let outcome = match (self, remote) {
            (SyncPayload::Progress(l), SyncPayload::Progress(r)) => {
                lift(l, r, strategy, SyncPayload::Progress)
            }
            (SyncPayload::Achievement(l), SyncPayload::Achievement(r)) => {
                lift(l, r, strategy, SyncPayload::Achievement)
            }
            (SyncPayload::Profile(l), SyncPayload::Profile(r)) => {
                lift(l, r, strategy, SyncPayload::Profile)
            }
            (SyncPayload::TaskAttempt(l), SyncPayload::TaskAttempt(r)) => {
                lift(l, r, strategy, SyncPayload::TaskAttempt)
            }
            (SyncPayload::TopicMastery(l), SyncPayload::TopicMastery(r)) => {
                lift(l, r, strategy, SyncPayload::TopicMastery)
            }
            _ => {
                return Err(ProtocolError::DomainMismatch {
                    local: self.domain(),
                    remote: remote.domain(),
                })
            }
        };

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::UserStats;
    use proptest::prelude::*;

    fn progress(tasks: &[u32], ts: Timestamp) -> ProgressRecord {
        ProgressRecord {
            day: 1,
            completed_tasks: tasks.to_vec(),
            updated_at: ts,
            ..Default::default()
        }
    }

    fn profile(name: &str, ts: Timestamp) -> ProfileRecord {
        ProfileRecord {
            display_name: Some(name.into()),
            updated_at: ts,
            ..Default::default()
        }
    }

    #[test]
    fn conflict_needs_both_sides_and_different_clocks() {
        let a = profile("a", 1);
        let b = profile("b", 2);
        assert!(detect_conflict(Some(&a), Some(&b)));
        assert!(!detect_conflict(Some(&a), Some(&profile("c", 1))));
        assert!(!detect_conflict(Some(&a), None));
        assert!(!detect_conflict::<ProfileRecord>(None, None));
    }

    #[test]
    fn single_side_wins_without_conflict() {
        let local = profile("local", 5);
        let out = resolve_conflict(Some(&local), None, ConflictStrategy::RemoteWins).unwrap();
        assert_eq!(out.resolved, local);
        assert!(!out.had_conflict);

        let remote = profile("remote", 5);
        let out = resolve_conflict(None, Some(&remote), ConflictStrategy::LocalWins).unwrap();
        assert_eq!(out.resolved, remote);
        assert!(!out.had_conflict);

        assert!(resolve_conflict::<ProfileRecord>(None, None, ConflictStrategy::Merge).is_none());
    }

    #[test]
    fn equal_timestamps_return_remote() {
        let local = profile("local", 10);
        let remote = profile("remote", 10);
        let out = resolve_conflict(Some(&local), Some(&remote), ConflictStrategy::LocalWins)
            .unwrap();
        assert_eq!(out.resolved, remote);
        assert!(!out.had_conflict);
    }

    #[test]
    fn strategies() {
        let local = profile("local", 20);
        let remote = profile("remote", 10);

        let lww = resolve_conflict(Some(&local), Some(&remote), ConflictStrategy::LastWriteWins)
            .unwrap();
        assert_eq!(lww.resolved, local);
        assert!(lww.had_conflict);
        assert_eq!(lww.strategy, ConflictStrategy::LastWriteWins);

        let rw = resolve_conflict(Some(&local), Some(&remote), ConflictStrategy::RemoteWins)
            .unwrap();
        assert_eq!(rw.resolved, remote);

        let older_local = profile("local", 5);
        let lw = resolve_conflict(Some(&older_local), Some(&remote), ConflictStrategy::LocalWins)
            .unwrap();
        assert_eq!(lw.resolved, older_local);

        // Profiles have no semantic merge.
        let merged = resolve_conflict(Some(&older_local), Some(&remote), ConflictStrategy::Merge)
            .unwrap();
        assert_eq!(merged.resolved, remote);
    }

    #[test]
    fn progress_merge_unions_tasks_and_takes_newer_scalars() {
        let mut local = progress(&[1, 2], 100);
        local.code = Some("fn old() {}".into());
        local.notes = Some("local notes".into());
        local.completed = true;

        let mut remote = progress(&[2, 3], 200);
        remote.code = Some("fn new() {}".into());
        remote.recap_answer = Some("borrowing".into());

        let out = resolve_conflict(Some(&local), Some(&remote), ConflictStrategy::Merge).unwrap();
        let merged = out.resolved;

        assert!(out.had_conflict);
        assert_eq!(merged.completed_tasks, vec![1, 2, 3]);
        assert_eq!(merged.code.as_deref(), Some("fn new() {}"));
        assert_eq!(merged.recap_answer.as_deref(), Some("borrowing"));
        // Remote never touched the notes, so the local value survives.
        assert_eq!(merged.notes.as_deref(), Some("local notes"));
        assert!(merged.completed);
        assert_eq!(merged.updated_at, 200);
    }

    #[test]
    fn achievement_merge_unions_and_maxes() {
        let local = AchievementRecord {
            unlocked_achievements: vec!["a".into(), "b".into()],
            stats: UserStats {
                total_xp: 300,
                current_streak: 2,
                ..Default::default()
            },
            updated_at: 1,
        };
        let remote = AchievementRecord {
            unlocked_achievements: vec!["b".into(), "c".into()],
            stats: UserStats {
                total_xp: 250,
                current_streak: 5,
                ..Default::default()
            },
            updated_at: 2,
        };

        let merged = AchievementRecord::merge(&local, &remote);
        assert_eq!(merged.unlocked_achievements, vec!["a", "b", "c"]);
        assert_eq!(merged.stats.total_xp, 300);
        assert_eq!(merged.stats.current_streak, 5);
        assert_eq!(merged.updated_at, 2);
    }

    #[test]
    fn mastery_merge_keeps_counters() {
        let local = TopicMasteryRecord {
            topic: "traits".into(),
            mastery: 40,
            attempts: 10,
            correct: 4,
            updated_at: 9,
        };
        let remote = TopicMasteryRecord {
            topic: "traits".into(),
            mastery: 70,
            attempts: 8,
            correct: 6,
            updated_at: 3,
        };

        let merged = TopicMasteryRecord::merge(&local, &remote);
        assert_eq!(merged.mastery, 40);
        assert_eq!(merged.attempts, 10);
        assert_eq!(merged.correct, 6);
    }

    #[test]
    fn merge_unique_by_uses_identity_key() {
        let local = vec![("a", 1), ("b", 2)];
        let remote = vec![("b", 99), ("c", 3)];
        let merged = merge_unique_by(&local, &remote, |(k, _)| *k);
        assert_eq!(merged, vec![("a", 1), ("b", 2), ("c", 3)]);
    }

    #[test]
    fn payload_resolve_dispatches_by_domain() {
        let local = SyncPayload::Progress(progress(&[1], 1));
        let remote = SyncPayload::Progress(progress(&[2], 2));

        let out = local.resolve(Some(&remote), ConflictStrategy::Merge).unwrap();
        match out.resolved {
            SyncPayload::Progress(p) => assert_eq!(p.completed_tasks, vec![1, 2]),
            other => panic!("unexpected payload {other:?}"),
        }

        let untouched = local.resolve(None, ConflictStrategy::Merge).unwrap();
        assert_eq!(untouched.resolved, local);
        assert!(!untouched.had_conflict);
    }

    #[test]
    fn payload_resolve_rejects_mismatched_domains() {
        let local = SyncPayload::Progress(progress(&[1], 1));
        let remote = SyncPayload::Profile(profile("x", 2));
        assert!(matches!(
            local.resolve(Some(&remote), ConflictStrategy::Merge),
            Err(ProtocolError::DomainMismatch { .. })
        ));
    }

    proptest! {
        #[test]
        fn progress_merge_is_exact_union(
            local in proptest::collection::vec(0u32..20, 0..10),
            remote in proptest::collection::vec(0u32..20, 0..10),
            lt in 0u64..1000,
            rt in 0u64..1000,
        ) {
            prop_assume!(lt != rt);
            let merged = ProgressRecord::merge(&progress(&local, lt), &progress(&remote, rt));

            let expected: std::collections::BTreeSet<u32> =
                local.iter().chain(remote.iter()).copied().collect();
            let expected: Vec<u32> = expected.into_iter().collect();
            prop_assert_eq!(merged.completed_tasks, expected);
            prop_assert_eq!(merged.updated_at, lt.max(rt));
        }

        #[test]
        fn merge_is_order_independent_for_achievements(
            a in proptest::collection::vec("[a-d]", 0..5),
            b in proptest::collection::vec("[a-d]", 0..5),
            xa in 0u64..500,
            xb in 0u64..500,
        ) {
            let left = AchievementRecord {
                unlocked_achievements: a,
                stats: UserStats { total_xp: xa, ..Default::default() },
                updated_at: 1,
            };
            let right = AchievementRecord {
                unlocked_achievements: b,
                stats: UserStats { total_xp: xb, ..Default::default() },
                updated_at: 2,
            };

            let ab = AchievementRecord::merge(&left, &right);
            let ba = AchievementRecord::merge(&right, &left);

            let mut ab_ids = ab.unlocked_achievements.clone();
            let mut ba_ids = ba.unlocked_achievements.clone();
            ab_ids.sort();
            ba_ids.sort();
            prop_assert_eq!(ab_ids, ba_ids);
            prop_assert_eq!(ab.stats, ba.stats);
            prop_assert_eq!(ab.stats.total_xp, xa.max(xb));
        }
    }
}
