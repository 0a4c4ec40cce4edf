//! Revision files on disk.
//!
//! A script directory holds one JSON file per revision, named
//! `<id>_<slug>.json`. Each file records the parent revision and the
//! operations of both steps.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MigrateError, Result};
use crate::graph::RevisionGraph;
use crate::operations::MigrationOperation;
use crate::revision::Revision;

/// Anything that can list revisions.
pub trait RevisionSource {
    /// Loads every revision.
    fn load_revisions(&self) -> Result<Vec<Revision>>;
}

impl RevisionSource for Vec<Revision> {
    fn load_revisions(&self) -> Result<Vec<Revision>> {
        Ok(self.clone())
    }
}

/// Contents of one revision file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionScript {
    /// Revision id.
    pub revision: String,
    /// Parent revision id.
    pub down_revision: Option<String>,
    /// Description.
    #[serde(default)]
    pub message: String,
    /// When the file was generated.
    pub create_date: DateTime<Utc>,
    /// Operations of the upgrade step.
    #[serde(default)]
    pub upgrade: Vec<MigrationOperation>,
    /// Operations of the downgrade step.
    #[serde(default)]
    pub downgrade: Vec<MigrationOperation>,
}

impl RevisionScript {
    /// File name for this script.
    #[must_use]
    pub fn file_name(&self) -> String {
        let slug = slug(&self.message);
        if slug.is_empty() {
            format!("{}.json", self.revision)
        } else {
            format!("{}_{slug}.json", self.revision)
        }
    }

    /// Turns the script into a graph node that replays its operations.
    #[must_use]
    pub fn into_revision(self) -> Revision {
        Revision::from_operations(
            self.revision,
            self.down_revision.as_deref(),
            self.upgrade,
            self.downgrade,
        )
        .doc(self.message)
    }
}

fn slug(message: &str) -> String {
    let mut slug = String::new();
    for ch in message.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
        if slug.len() >= 40 {
            break;
        }
    }
    slug.trim_end_matches('_').to_string()
}

/// A new random revision id: 12 hex digits.
#[must_use]
pub fn new_revision_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    hex[hex.len() - 12..].to_string()
}

/// A directory of revision files.
#[derive(Debug, Clone)]
pub struct ScriptDirectory {
    dir: PathBuf,
}

impl ScriptDirectory {
    /// Uses the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory path.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the directory.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        info!(path = %self.dir.display(), "Initialized script directory");
        Ok(())
    }

    /// Reads every revision file, in file name order.
    pub fn load_scripts(&self) -> Result<Vec<RevisionScript>> {
        if !self.dir.is_dir() {
            return Err(MigrateError::MigrationsDirNotFound(self.dir.clone()));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut scripts = Vec::with_capacity(paths.len());
        for path in paths {
            let content = fs::read_to_string(&path)?;
            let script: RevisionScript =
                serde_json::from_str(&content).map_err(|e| MigrateError::ParseError {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            debug!(revision = %script.revision, path = %path.display(), "Loaded revision");
            scripts.push(script);
        }
        Ok(scripts)
    }

    /// Builds the revision graph from the directory.
    pub fn graph(&self) -> Result<RevisionGraph> {
        RevisionGraph::from_source(self)
    }

    /// Writes a new revision on top of the current head and returns its path.
    ///
    /// Fails with [`MigrateError::MultipleHeads`] when there is no single
    /// head to build on.
    pub fn generate_revision(
        &self,
        message: &str,
        rev_id: Option<&str>,
        upgrade: Vec<MigrationOperation>,
        downgrade: Vec<MigrationOperation>,
    ) -> Result<PathBuf> {
        let graph = self.graph()?;
        let down_revision = graph.current_head()?.map(str::to_string);
        let revision = rev_id.map_or_else(new_revision_id, str::to_string);
        if graph.get(&revision).is_some() {
            return Err(MigrateError::DuplicateRevision(revision));
        }

        let script = RevisionScript {
            revision,
            down_revision,
            message: message.to_string(),
            create_date: Utc::now(),
            upgrade,
            downgrade,
        };
        let path = self.dir.join(script.file_name());
        if path.exists() {
            return Err(MigrateError::MigrationExists(path));
        }

        let mut content = serde_json::to_string_pretty(&script)?;
        content.push('\n');
        fs::write(&path, content)?;

        info!(
            revision = %script.revision,
            parent = script.down_revision.as_deref().unwrap_or("base"),
            path = %path.display(),
            "Generated revision"
        );
        Ok(path)
    }
}

impl RevisionSource for ScriptDirectory {
    fn load_revisions(&self) -> Result<Vec<Revision>> {
        Ok(self
            .load_scripts()?
            .into_iter()
            .map(RevisionScript::into_revision)
            .collect())
    }
}
