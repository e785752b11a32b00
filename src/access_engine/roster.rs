//! Roster loading from the enrollment directory
//!
//! Layout: one sub-directory per identity, named after the identity label,
//! holding that identity's reference images.
//!
//! ```text
//! db/
//!   max/max.jpg
//!   laura/1.jpg
//!   laura/2.jpg
//! ```

use super::types::IdentityRecord;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;

/// Build the roster from `db_path`
///
/// Every identity gets `default_threshold` unless `overrides` names it.
/// Hidden directories are skipped. Records are sorted by label.
pub async fn load_roster(
    db_path: &Path,
    default_threshold: f64,
    overrides: &HashMap<String, f64>,
) -> Result<Vec<IdentityRecord>> {
    if !db_path.is_dir() {
        return Err(Error::Config(format!(
            "enrollment directory {} does not exist",
            db_path.display()
        )));
    }

    let mut labels = Vec::new();
    let mut entries = fs::read_dir(db_path).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let Some(label) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!(path = %entry.path().display(), "Skipping non UTF-8 enrollment directory");
            continue;
        };
        if label.starts_with('.') {
            continue;
        }
        labels.push(label);
    }
    labels.sort();

    if labels.is_empty() {
        return Err(Error::Config(format!(
            "no enrolled identities in {}",
            db_path.display()
        )));
    }

    for label in overrides.keys() {
        if !labels.contains(label) {
            tracing::warn!(identity = %label, "Threshold override for unknown identity ignored");
        }
    }

    let roster: Vec<IdentityRecord> = labels
        .into_iter()
        .map(|label| {
            let threshold = overrides.get(&label).copied().unwrap_or(default_threshold);
            IdentityRecord::new(label, threshold)
        })
        .collect();

    tracing::info!(
        db_path = %db_path.display(),
        identities = roster.len(),
        "Roster loaded"
    );

    Ok(roster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn enrollment_dir(name: &str, identities: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("facegate-roster-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir).await;
        fs::create_dir_all(&dir).await.unwrap();
        for id in identities {
            let person = dir.join(id);
            fs::create_dir_all(&person).await.unwrap();
            fs::write(person.join("ref.jpg"), b"\xFF\xD8\xFF\xD9").await.unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_load_roster_with_overrides() {
        let dir = enrollment_dir("overrides", &["max", "laura", ".cache"]).await;
        fs::write(dir.join("representations.pkl"), b"").await.unwrap();

        let overrides = HashMap::from([
            ("laura".to_string(), 0.30),
            ("ghost".to_string(), 0.10),
        ]);
        let roster = load_roster(&dir, 0.40, &overrides).await.unwrap();

        assert_eq!(
            roster,
            vec![IdentityRecord::new("laura", 0.30), IdentityRecord::new("max", 0.40)]
        );

        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_directory_is_config_error() {
        let dir = std::env::temp_dir().join("facegate-roster-does-not-exist");
        let err = load_roster(&dir, 0.40, &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_empty_directory_is_config_error() {
        let dir = enrollment_dir("empty", &[]).await;
        let err = load_roster(&dir, 0.40, &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        fs::remove_dir_all(&dir).await.unwrap();
    }
}
