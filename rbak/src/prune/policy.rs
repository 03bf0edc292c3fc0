//! Which rotations to keep.
//!
//! A [`PeriodicPolicy`] splits time into periods (hours, days, ...). Within a period
//! it keeps one rotation, the oldest or the newest, and it keeps that for the most
//! recent `count` periods that have any rotation. A rotation survives if any period
//! kind keeps it.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, Timelike, Utc};

use super::Rotation;

/// Which rotation represents a period.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Keep {
    /// The first rotation of the period
    #[default]
    Old,
    /// The last rotation of the period
    New,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Period {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Period {
    /// Identifies the period `time` falls in.
    #[must_use]
    pub fn key(self, time: &DateTime<Utc>) -> (i32, u32, u32, u32) {
        match self {
            Period::Hourly => (time.year(), time.month(), time.day(), time.hour()),
            Period::Daily => (time.year(), time.month(), time.day(), 0),
            Period::Weekly => {
                let week = time.iso_week();
                (week.year(), week.week(), 0, 0)
            }
            Period::Monthly => (time.year(), time.month(), 0, 0),
            Period::Quarterly => (time.year(), time.month0() / 3, 0, 0),
            Period::Yearly => (time.year(), 0, 0, 0),
        }
    }
}

pub trait RetentionPolicy: Send + Sync {
    /// Split `candidates` into `(retain, erase)`, both sorted newest first.
    fn filter(&self, candidates: Vec<Rotation>, keep: Keep) -> (Vec<Rotation>, Vec<Rotation>);
}

/// Keep a number of hourly, daily, ... rotations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeriodicPolicy {
    pub counts: Vec<(Period, usize)>,
}

impl Default for PeriodicPolicy {
    fn default() -> Self {
        Self {
            counts: vec![
                (Period::Hourly, 24),
                (Period::Daily, 7 * 4),
                (Period::Weekly, 52),
                (Period::Monthly, 12 * 3),
                (Period::Quarterly, 4 * 10),
                (Period::Yearly, 20),
            ],
        }
    }
}

impl PeriodicPolicy {
    /// Indexes of the rotations `period` keeps.
    fn select(candidates: &[Rotation], period: Period, count: usize, keep: Keep) -> Vec<usize> {
        let mut slots: HashMap<_, usize> = HashMap::new();
        for (index, candidate) in candidates.iter().enumerate() {
            let slot = slots.entry(period.key(&candidate.time)).or_insert(index);
            let current = &candidates[*slot].time;
            let better = match keep {
                Keep::Old => candidate.time < *current,
                Keep::New => candidate.time > *current,
            };
            if better {
                *slot = index;
            }
        }
        let mut chosen: Vec<usize> = slots.into_values().collect();
        chosen.sort_by(|a, b| candidates[*b].time.cmp(&candidates[*a].time));
        chosen.truncate(count);
        chosen
    }
}

impl RetentionPolicy for PeriodicPolicy {
    fn filter(&self, candidates: Vec<Rotation>, keep: Keep) -> (Vec<Rotation>, Vec<Rotation>) {
        let mut retained = BTreeSet::new();
        for &(period, count) in &self.counts {
            retained.extend(Self::select(&candidates, period, count, keep));
        }
        let (mut retain, mut erase): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .enumerate()
            .partition(|(index, _)| retained.contains(index));
        retain.sort_by(|a, b| a.1.cmp(&b.1));
        erase.sort_by(|a, b| a.1.cmp(&b.1));
        (
            retain.into_iter().map(|(_, rotation)| rotation).collect(),
            erase.into_iter().map(|(_, rotation)| rotation).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use strum::IntoEnumIterator;

    fn rotation(y: i32, m: u32, d: u32, h: u32) -> Rotation {
        let time = Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap();
        Rotation::new(time.format("%Y.%m.%d-%H").to_string(), time)
    }

    fn names(rotations: &[Rotation]) -> Vec<String> {
        rotations.iter().map(|r| r.path.display().to_string()).collect()
    }

    fn only(period: Period, count: usize) -> PeriodicPolicy {
        PeriodicPolicy {
            counts: vec![(period, count)],
        }
    }

    #[test]
    fn keys_group_by_period() {
        let a = Utc.with_ymd_and_hms(2024, 2, 28, 23, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap();
        assert_ne!(Period::Monthly.key(&a), Period::Monthly.key(&b));
        assert_eq!(Period::Quarterly.key(&a), Period::Quarterly.key(&b));
        assert_eq!(Period::Weekly.key(&a), Period::Weekly.key(&b));
        assert_eq!(Period::Yearly.key(&a), (2024, 0, 0, 0));
    }

    #[test]
    fn daily_keeps_oldest_of_each_day() {
        let candidates = vec![
            rotation(2024, 3, 2, 18),
            rotation(2024, 3, 2, 6),
            rotation(2024, 3, 1, 12),
            rotation(2024, 3, 1, 3),
        ];
        let (retain, erase) = only(Period::Daily, 10).filter(candidates.clone(), Keep::Old);
        assert_eq!(names(&retain), vec!["2024.03.02-06", "2024.03.01-03"]);
        assert_eq!(names(&erase), vec!["2024.03.02-18", "2024.03.01-12"]);

        let (retain, _) = only(Period::Daily, 10).filter(candidates, Keep::New);
        assert_eq!(names(&retain), vec!["2024.03.02-18", "2024.03.01-12"]);
    }

    #[test]
    fn count_limits_to_most_recent_periods() {
        let candidates = (1..=5).map(|day| rotation(2024, 3, day, 0)).collect();
        let (retain, erase) = only(Period::Daily, 2).filter(candidates, Keep::Old);
        assert_eq!(names(&retain), vec!["2024.03.05-00", "2024.03.04-00"]);
        assert_eq!(erase.len(), 3);
    }

    #[test]
    fn periods_combine() {
        let candidates = vec![
            rotation(2024, 3, 5, 10),
            rotation(2024, 3, 5, 9),
            rotation(2024, 2, 10, 0),
            rotation(2023, 6, 1, 0),
        ];
        let policy = PeriodicPolicy {
            counts: vec![(Period::Hourly, 1), (Period::Monthly, 2), (Period::Yearly, 5)],
        };
        let (retain, erase) = policy.filter(candidates, Keep::Old);
        assert_eq!(
            names(&retain),
            vec!["2024.03.05-10", "2024.03.05-09", "2024.02.10-00", "2023.06.01-00"]
        );
        assert!(erase.is_empty());
    }

    #[test]
    fn zero_counts_erase_everything() {
        let policy = PeriodicPolicy {
            counts: Period::iter().map(|period| (period, 0)).collect(),
        };
        let (retain, erase) = policy.filter(vec![rotation(2024, 1, 1, 0)], Keep::Old);
        assert!(retain.is_empty());
        assert_eq!(erase.len(), 1);
    }
}
