use crate::dto::{HISTORY_ENTITY, HISTORY_SCHEMA_VERSION, create_history_migrator};
use crate::paths::DepotPaths;
use crate::storage::{Schema, VersionedTomlFile};
use async_trait::async_trait;
use depotctl_core::Result;
use depotctl_core::history::{HISTORY_LIMIT, HistoryRepository};
use depotctl_core::operation::OperationResult;
use std::path::PathBuf;

/// Operation history in `history.toml`, oldest entry first on disk.
pub struct TomlHistoryRepository {
    file: VersionedTomlFile<Vec<OperationResult>>,
    limit: usize,
}

impl TomlHistoryRepository {
    pub fn new(paths: &DepotPaths) -> Self {
        Self::with_path(paths.history_file())
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self {
            file: VersionedTomlFile::new(
                path,
                Schema {
                    entity: HISTORY_ENTITY,
                    version: HISTORY_SCHEMA_VERSION,
                    migrator: create_history_migrator,
                },
            ),
            limit: HISTORY_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }
}

#[async_trait]
impl HistoryRepository for TomlHistoryRepository {
    async fn append(&self, result: &OperationResult) -> Result<()> {
        let limit = self.limit;
        self.file.update(Vec::new(), |entries| {
            entries.push(result.clone());
            if entries.len() > limit {
                let excess = entries.len() - limit;
                entries.drain(..excess);
            }
            Ok(())
        })
    }

    async fn recent(&self, limit: usize) -> Result<Vec<OperationResult>> {
        let entries = self.file.load()?.unwrap_or_default();
        Ok(entries.into_iter().rev().take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use depotctl_core::operation::{OperationKind, Outcome};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn result(name: &str) -> OperationResult {
        OperationResult {
            id: Uuid::new_v4(),
            kind: OperationKind::Upload,
            profile_name: name.to_string(),
            outcome: Outcome::Succeeded,
            diagnostic: String::new(),
            build_id: Some(42),
            output_path: None,
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_newest_first() {
        let temp_dir = TempDir::new().unwrap();
        let repo =
            TomlHistoryRepository::with_path(temp_dir.path().join("history.toml")).with_limit(3);

        for i in 0..5 {
            repo.append(&result(&format!("p{}", i))).await.unwrap();
        }

        let recent = repo.recent(10).await.unwrap();
        let names: Vec<_> = recent.iter().map(|r| r.profile_name.as_str()).collect();
        assert_eq!(names, vec!["p4", "p3", "p2"]);
        assert_eq!(recent[0].build_id, Some(42));
    }
}
