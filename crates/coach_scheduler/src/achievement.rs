//! C11 — achievement evaluator. A static catalog walked against current
//! state on every relevant event: newly-satisfied entries are recorded
//! and a matching unlock event emitted. Each predicate kind drives its
//! own `HealthRecordReader` history scan rather than one shared
//! in-memory snapshot, so evaluation stays correct across restarts.
//!
//! The ledger earn and the profile's achievement-set save land in two
//! separate stores, so there's no real cross-table transaction; instead
//! the reward reason (`achievement:{id}`) is lifetime-unique in the ledger
//! (`coach_core::is_lifetime_unique_reason`), so a crash between the earn
//! and the save just means the next evaluation re-inserts the id into the
//! profile's achievement set and finds the ledger entry already there
//! (`EarnOutcome::AlreadyAwardedToday`) instead of paying out twice (§7).

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use coach_core::{
    Achievement, AchievementEvaluator, AchievementPredicate, AchievementUnlock, CoreResult,
    HealthPayload, HealthRecord, HealthRecordKind, HealthRecordReader, LedgerStore, Rarity,
    UserId, UserProfileStore,
};
use std::collections::HashSet;
use std::sync::Arc;

/// How far back history is pulled for streak/total evaluation. Generous
/// relative to any catalog threshold (100-day streaks are the longest
/// defined) so a single scan covers every predicate.
const HISTORY_WINDOW_DAYS: i64 = 400;

pub fn catalog() -> Vec<Achievement> {
    vec![
        Achievement { id: "first_record".into(), name: "First Step".into(), category: "milestone".into(), icon: "star".into(), points_reward: 10, rarity: Rarity::Common, predicate: AchievementPredicate::FirstRecord },
        Achievement { id: "streak_7".into(), name: "Week Warrior".into(), category: "streak".into(), icon: "flame".into(), points_reward: 25, rarity: Rarity::Common, predicate: AchievementPredicate::Streak { days: 7 } },
        Achievement { id: "streak_30".into(), name: "Habit Formed".into(), category: "streak".into(), icon: "flame".into(), points_reward: 100, rarity: Rarity::Rare, predicate: AchievementPredicate::Streak { days: 30 } },
        Achievement { id: "streak_100".into(), name: "Lifestyle Change".into(), category: "streak".into(), icon: "flame".into(), points_reward: 400, rarity: Rarity::Legendary, predicate: AchievementPredicate::Streak { days: 100 } },
        Achievement { id: "total_records_50".into(), name: "Dedicated Logger".into(), category: "milestone".into(), icon: "book".into(), points_reward: 30, rarity: Rarity::Common, predicate: AchievementPredicate::TotalRecords { n: 50 } },
        Achievement { id: "total_records_500".into(), name: "Data Hoarder".into(), category: "milestone".into(), icon: "book".into(), points_reward: 150, rarity: Rarity::Epic, predicate: AchievementPredicate::TotalRecords { n: 500 } },
        Achievement { id: "total_exercise_20".into(), name: "Getting Moving".into(), category: "exercise".into(), icon: "dumbbell".into(), points_reward: 40, rarity: Rarity::Uncommon, predicate: AchievementPredicate::TotalOfKind { kind: HealthRecordKind::Exercise, n: 20 } },
        Achievement { id: "water_streak_7".into(), name: "Well Hydrated".into(), category: "hydration".into(), icon: "droplet".into(), points_reward: 25, rarity: Rarity::Common, predicate: AchievementPredicate::WaterStreak { days: 7 } },
        Achievement { id: "calorie_streak_7".into(), name: "Consistent Eater".into(), category: "nutrition".into(), icon: "utensils".into(), points_reward: 25, rarity: Rarity::Common, predicate: AchievementPredicate::CalorieStreak { days: 7 } },
        Achievement { id: "sleep_streak_7".into(), name: "Well Rested".into(), category: "sleep".into(), icon: "moon".into(), points_reward: 25, rarity: Rarity::Common, predicate: AchievementPredicate::SleepStreak { days: 7 } },
        Achievement { id: "early_riser_7".into(), name: "Early Riser".into(), category: "habit".into(), icon: "sunrise".into(), points_reward: 30, rarity: Rarity::Uncommon, predicate: AchievementPredicate::EarlyMorningStreak { days: 7 } },
        Achievement { id: "perfect_week".into(), name: "Perfect Week".into(), category: "milestone".into(), icon: "trophy".into(), points_reward: 75, rarity: Rarity::Rare, predicate: AchievementPredicate::PerfectWeek },
        Achievement { id: "goal_reached".into(), name: "Goal Reached".into(), category: "milestone".into(), icon: "target".into(), points_reward: 200, rarity: Rarity::Epic, predicate: AchievementPredicate::GoalReached },
        Achievement { id: "social_shares_5".into(), name: "Spreading the Word".into(), category: "social".into(), icon: "share".into(), points_reward: 20, rarity: Rarity::Uncommon, predicate: AchievementPredicate::SocialShares { n: 5 } },
    ]
}

pub struct StaticAchievementEvaluator {
    records: Arc<dyn HealthRecordReader>,
    ledger: Arc<dyn LedgerStore>,
    profiles: Arc<dyn UserProfileStore>,
    catalog: Vec<Achievement>,
}

impl StaticAchievementEvaluator {
    pub fn new(
        records: Arc<dyn HealthRecordReader>,
        ledger: Arc<dyn LedgerStore>,
        profiles: Arc<dyn UserProfileStore>,
    ) -> Self {
        Self { records, ledger, profiles, catalog: catalog() }
    }

    async fn history(&self, user: UserId, now: DateTime<Utc>) -> CoreResult<Vec<HealthRecord>> {
        self.records.records_since(user, now - ChronoDuration::days(HISTORY_WINDOW_DAYS)).await
    }

    async fn evaluate_against(
        &self,
        user: UserId,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<AchievementUnlock>> {
        let history = self.history(user, now).await?;
        let mut profile = self.profiles.get(user).await?;
        let mut unlocked = Vec::new();
        let mut profile_changed = false;

        for achievement in &self.catalog {
            if profile.achievements.contains(&achievement.id) {
                continue;
            }
            if predicate_satisfied(&achievement.predicate, &history, &profile, now) {
                profile.achievements.insert(achievement.id.clone());
                let outcome = self
                    .ledger
                    .earn(user, &format!("achievement:{}", achievement.id), achievement.points_reward, None, now)
                    .await?;
                // `AlreadyAwardedToday` here means a prior pass earned the
                // reward but crashed before the profile save below landed;
                // the achievement set still needs the id (handled above),
                // but no second unlock event is published.
                if matches!(outcome, coach_core::EarnOutcome::Earned { .. }) {
                    unlocked.push(AchievementUnlock {
                        user,
                        achievement: achievement.id.clone(),
                        reward_amount: achievement.points_reward,
                    });
                }
                profile_changed = true;
            }
        }

        if profile_changed {
            self.profiles.save(profile).await?;
        }

        Ok(unlocked)
    }
}

#[async_trait]
impl AchievementEvaluator for StaticAchievementEvaluator {
    async fn evaluate_on_record(
        &self,
        user: UserId,
        _record: &HealthRecord,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<AchievementUnlock>> {
        self.evaluate_against(user, now).await
    }

    async fn evaluate_daily(&self, user: UserId, now: DateTime<Utc>) -> CoreResult<Vec<AchievementUnlock>> {
        self.evaluate_against(user, now).await
    }
}

fn day_of(record: &HealthRecord) -> NaiveDate {
    record.timestamp.date_naive()
}

fn days_with<F: Fn(&HealthRecord) -> bool>(history: &[HealthRecord], pred: F) -> HashSet<NaiveDate> {
    history.iter().filter(|r| pred(r)).map(day_of).collect()
}

/// Longest unbroken run of days satisfying `has_day`, walking backward
/// from `today` (§4.11.1: a fixed "last N days ending today" window is
/// not used here since `Streak` has no fixed ceiling — this walks until
/// the first gap, which is the general form that `perfect_week`'s fixed
/// 7-day window specializes).
fn longest_streak_ending_today(days: &HashSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut streak = 0u32;
    let mut cursor = today;
    loop {
        if days.contains(&cursor) {
            streak += 1;
            cursor -= ChronoDuration::days(1);
        } else {
            break;
        }
    }
    streak
}

fn sleep_in_range(payload: &HealthPayload) -> bool {
    match payload {
        HealthPayload::Sleep { duration_seconds: Some(secs), .. } => {
            let hours = *secs as f64 / 3600.0;
            (7.0..=9.0).contains(&hours)
        }
        _ => false,
    }
}

fn predicate_satisfied(
    predicate: &AchievementPredicate,
    history: &[HealthRecord],
    profile: &coach_core::UserProfile,
    now: DateTime<Utc>,
) -> bool {
    let today = now.date_naive();

    match predicate {
        AchievementPredicate::FirstRecord => !history.is_empty(),
        AchievementPredicate::TotalRecords { n } => history.len() as u32 >= *n,
        AchievementPredicate::TotalOfKind { kind, n } => {
            history.iter().filter(|r| record_kind(r) == *kind).count() as u32 >= *n
        }
        AchievementPredicate::Streak { days } => {
            let active_days = days_with(history, |_| true);
            longest_streak_ending_today(&active_days, today) >= *days
        }
        AchievementPredicate::WaterStreak { days } => {
            let water_days = days_with(history, |r| matches!(r.payload, HealthPayload::Water { .. }));
            longest_streak_ending_today(&water_days, today) >= *days
        }
        AchievementPredicate::CalorieStreak { days } => {
            let meal_days = days_with(history, |r| matches!(r.payload, HealthPayload::Meal { .. }));
            longest_streak_ending_today(&meal_days, today) >= *days
        }
        AchievementPredicate::SleepStreak { days } => {
            let sleep_days = days_with(history, |r| matches!(r.payload, HealthPayload::Sleep { .. }) && sleep_in_range(&r.payload));
            longest_streak_ending_today(&sleep_days, today) >= *days
        }
        AchievementPredicate::EarlyMorningStreak { days } => {
            use chrono::Timelike;
            let early_days = days_with(history, |r| r.timestamp.hour() < 8);
            longest_streak_ending_today(&early_days, today) >= *days
        }
        AchievementPredicate::PerfectWeek => {
            let window_start = today - chrono::Duration::days(6);
            (0..7).all(|offset| {
                let day = window_start + chrono::Duration::days(offset);
                let kinds: HashSet<HealthRecordKind> = history
                    .iter()
                    .filter(|r| day_of(r) == day)
                    .map(record_kind)
                    .collect();
                kinds.len() >= 3
            })
        }
        AchievementPredicate::GoalReached => {
            let Some(target_kg) = profile.preferences["target_weight_kg"].as_f64() else { return false };
            history
                .iter()
                .rev()
                .find_map(|r| match r.payload {
                    HealthPayload::Weight { kg } => Some(kg),
                    _ => None,
                })
                .map(|latest| (latest as f64 - target_kg).abs() <= 0.5)
                .unwrap_or(false)
        }
        AchievementPredicate::SocialShares { .. } => {
            // No social-share event source exists in this core; always
            // unsatisfied until one is added.
            false
        }
    }
}

fn record_kind(record: &HealthRecord) -> HealthRecordKind {
    match record.payload {
        HealthPayload::Weight { .. } => HealthRecordKind::Weight,
        HealthPayload::Meal { .. } => HealthRecordKind::Meal,
        HealthPayload::Exercise { .. } => HealthRecordKind::Exercise,
        HealthPayload::Water { .. } => HealthRecordKind::Water,
        HealthPayload::Sleep { .. } => HealthRecordKind::Sleep,
    }
}
