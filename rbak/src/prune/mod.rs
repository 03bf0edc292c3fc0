//! Erase old rotations according to a retention policy.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::methods::snapshot::LATEST_NAME;
use crate::rotate::BACKUP_NAME;

pub mod policy;

pub use policy::{Keep, PeriodicPolicy, RetentionPolicy};

/// A timestamped backup directory. Ordered newest first, equal by path.
#[derive(Clone, Debug)]
pub struct Rotation {
    pub path: PathBuf,
    pub time: DateTime<Utc>,
}

impl Rotation {
    pub fn new(path: impl Into<PathBuf>, time: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            time,
        }
    }
}

impl PartialEq for Rotation {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Rotation {}

impl PartialOrd for Rotation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rotation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl std::fmt::Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Time encoded in a rotation name; formats without a time of day give midnight.
#[must_use]
pub fn parse_time(name: &str, format: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(name, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(name, format)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|time| time.and_utc())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PruneSettings {
    pub format: String,
    pub latest: String,
    pub keep: Keep,
    /// Plan only, erase nothing
    pub dry: bool,
}

impl Default for PruneSettings {
    fn default() -> Self {
        Self {
            format: BACKUP_NAME.to_string(),
            latest: LATEST_NAME.to_string(),
            keep: Keep::default(),
            dry: false,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PrunePlan {
    pub retain: Vec<Rotation>,
    pub erase: Vec<Rotation>,
}

impl std::fmt::Display for PrunePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Keeping:")?;
        for rotation in &self.retain {
            writeln!(f, "\t{rotation}")?;
        }
        writeln!(f, "Erasing:")?;
        for rotation in &self.erase {
            writeln!(f, "\t{rotation}")?;
        }
        Ok(())
    }
}

/// Entries of `root` whose names parse as rotations, the latest link excluded.
pub async fn current_backups(root: &Path, settings: &PruneSettings) -> anyhow::Result<Vec<Rotation>> {
    let mut entries = tokio::fs::read_dir(root)
        .await
        .with_context(|| format!("cannot open {root:?}"))?;
    let mut backups = vec![];
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == settings.latest {
            continue;
        }
        match parse_time(&name, &settings.format) {
            Some(time) => backups.push(Rotation::new(name, time)),
            None => tracing::warn!("skipping {:?}, it does not match {:?}", name, settings.format),
        }
    }
    backups.sort();
    Ok(backups)
}

/// Decide what to keep; the rotation the latest link points at is always kept.
pub async fn plan(
    root: &Path,
    settings: &PruneSettings,
    policy: &dyn RetentionPolicy,
) -> anyhow::Result<PrunePlan> {
    let backups = current_backups(root, settings).await?;
    let (mut retain, mut erase) = policy.filter(backups, settings.keep);
    if let Ok(target) = tokio::fs::read_link(root.join(&settings.latest)).await
        && let Some(index) = erase.iter().position(|rotation| rotation.path == target)
    {
        let latest = erase.remove(index);
        tracing::info!("retaining latest backup {}", latest);
        retain.push(latest);
        retain.sort();
    }
    Ok(PrunePlan { retain, erase })
}

/// Erase one rotation, including read-only files inside it.
pub async fn erase(path: &Path) -> anyhow::Result<()> {
    common::make_writable(path)
        .await
        .with_context(|| format!("cannot make {path:?} writable"))?;
    common::rm(path)
        .await
        .with_context(|| format!("cannot remove {path:?}"))
}

/// Plan, then erase unless `settings.dry`. Returns the plan.
pub async fn prune(
    root: &Path,
    settings: &PruneSettings,
    policy: &dyn RetentionPolicy,
) -> anyhow::Result<PrunePlan> {
    let plan = plan(root, settings, policy).await?;
    if settings.dry {
        return Ok(plan);
    }
    for rotation in &plan.erase {
        tracing::info!("erasing {}", rotation);
        erase(&root.join(&rotation.path)).await?;
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn names_parse_with_and_without_time() {
        assert_eq!(
            parse_time("2024.03.01-12.30.00", BACKUP_NAME),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
        );
        assert_eq!(
            parse_time("2024-03-01", "%Y-%m-%d"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_time("latest.snapshot", BACKUP_NAME), None);
    }

    #[test]
    fn rotations_sort_newest_first_and_compare_by_path() {
        let old = Rotation::new("a", Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        let new = Rotation::new("b", Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap());
        let mut rotations = vec![old.clone(), new.clone()];
        rotations.sort();
        assert_eq!(rotations, vec![new, old.clone()]);
        assert_eq!(old, Rotation::new("a", Utc::now()));
    }

    fn tree(names: &[&str]) -> anyhow::Result<tempfile::TempDir> {
        let tmp = tempfile::tempdir()?;
        for name in names {
            std::fs::create_dir(tmp.path().join(name))?;
            std::fs::write(tmp.path().join(name).join("data"), name)?;
        }
        Ok(tmp)
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn unparsable_entries_are_skipped() -> anyhow::Result<()> {
        let tmp = tree(&["2024.03.01-00.00.00", "latest.snapshot", "notes"])?;
        std::os::unix::fs::symlink("2024.03.01-00.00.00", tmp.path().join("latest"))?;
        let backups = current_backups(tmp.path(), &PruneSettings::default()).await?;
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].path, PathBuf::from("2024.03.01-00.00.00"));
        assert!(logs_contain("skipping \"notes\""));
        Ok(())
    }

    #[tokio::test]
    async fn latest_survives_any_policy() -> anyhow::Result<()> {
        let tmp = tree(&["2024.03.01-00.00.00", "2024.03.02-00.00.00"])?;
        std::os::unix::fs::symlink("2024.03.01-00.00.00", tmp.path().join("latest"))?;
        let nothing = PeriodicPolicy { counts: vec![] };
        let plan = prune(tmp.path(), &PruneSettings::default(), &nothing).await?;
        assert_eq!(plan.retain.len(), 1);
        assert_eq!(plan.retain[0].path, PathBuf::from("2024.03.01-00.00.00"));
        assert!(tmp.path().join("2024.03.01-00.00.00").exists());
        assert!(!tmp.path().join("2024.03.02-00.00.00").exists());
        Ok(())
    }

    #[tokio::test]
    async fn dry_run_erases_nothing() -> anyhow::Result<()> {
        let tmp = tree(&["2024.03.01-00.00.00", "2024.03.01-06.00.00"])?;
        let settings = PruneSettings {
            dry: true,
            ..PruneSettings::default()
        };
        let policy = PeriodicPolicy {
            counts: vec![(policy::Period::Daily, 5)],
        };
        let plan = prune(tmp.path(), &settings, &policy).await?;
        assert_eq!(plan.erase.len(), 1);
        assert_eq!(plan.erase[0].path, PathBuf::from("2024.03.01-06.00.00"));
        assert!(tmp.path().join("2024.03.01-06.00.00").exists());
        assert_eq!(
            plan.to_string(),
            "Keeping:\n\t2024.03.01-00.00.00\nErasing:\n\t2024.03.01-06.00.00\n"
        );
        Ok(())
    }

    #[tokio::test]
    async fn read_only_rotations_are_erased() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tree(&["2024.03.01-00.00.00"])?;
        let rotation = tmp.path().join("2024.03.01-00.00.00");
        std::fs::set_permissions(rotation.join("data"), std::fs::Permissions::from_mode(0o444))?;
        std::fs::set_permissions(&rotation, std::fs::Permissions::from_mode(0o555))?;
        erase(&rotation).await?;
        assert!(!rotation.exists());
        Ok(())
    }
}
