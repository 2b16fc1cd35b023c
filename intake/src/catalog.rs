//! Homework catalog.
//!
//! Assignments are owned by the course staff and loaded once at startup from a
//! JSON document. The catalog is immutable afterwards; swapping in a new
//! schedule means building a new catalog.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::deadline::DeadlineTier;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed catalog: {0}")]
    Json(#[from] serde_json::Error),

    #[error("assignment {slug}: invalid deadline scale {scale}")]
    InvalidScale { slug: String, scale: f64 },

    #[error("assignment {0}: no languages enabled")]
    NoLanguages(String),

    #[error("duplicate assignment slug: {0}")]
    DuplicateSlug(String),

    #[error("duplicate assignment uuid: {0}")]
    DuplicateUuid(String),
}

/// One homework as seen by the intake path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub uuid: String,
    pub slug: String,
    pub name: String,
    deadlines: Vec<DeadlineTier>,
    languages: Vec<String>,
    /// Grading metadata forwarded verbatim to workers.
    #[serde(default)]
    pub context: serde_json::Value,
}

impl Assignment {
    pub fn new(
        uuid: impl Into<String>,
        slug: impl Into<String>,
        name: impl Into<String>,
        deadlines: Vec<DeadlineTier>,
        languages: Vec<String>,
    ) -> Result<Self, CatalogError> {
        Self {
            uuid: uuid.into(),
            slug: slug.into(),
            name: name.into(),
            deadlines,
            languages,
            context: serde_json::Value::Null,
        }
        .normalized()
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// Sorts tiers ascending, lowercases language keys and checks scales.
    fn normalized(mut self) -> Result<Self, CatalogError> {
        if let Some(bad) = self
            .deadlines
            .iter()
            .find(|t| !t.scale.is_finite() || t.scale < 0.0)
        {
            return Err(CatalogError::InvalidScale {
                slug: self.slug.clone(),
                scale: bad.scale,
            });
        }
        self.deadlines.sort_by_key(|t| t.due);

        for lang in &mut self.languages {
            *lang = lang.trim().to_lowercase();
        }
        let mut seen = HashSet::new();
        self.languages.retain(|l| seen.insert(l.clone()));
        if self.languages.is_empty() {
            return Err(CatalogError::NoLanguages(self.slug));
        }
        Ok(self)
    }

    /// Deadline tiers, ascending by instant.
    pub fn deadlines(&self) -> &[DeadlineTier] {
        &self.deadlines
    }

    /// Enabled language keys, in the order the staff listed them.
    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    pub fn supports(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l == language)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    assignments: Vec<Assignment>,
}

#[derive(Debug, Default)]
pub struct AssignmentCatalog {
    assignments: Vec<Assignment>,
    by_slug: HashMap<String, usize>,
    by_uuid: HashMap<String, usize>,
}

impl AssignmentCatalog {
    pub fn from_assignments(assignments: Vec<Assignment>) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();
        for assignment in assignments {
            let assignment = assignment.normalized()?;
            let idx = catalog.assignments.len();
            if catalog.by_slug.insert(assignment.slug.clone(), idx).is_some() {
                return Err(CatalogError::DuplicateSlug(assignment.slug));
            }
            if catalog.by_uuid.insert(assignment.uuid.clone(), idx).is_some() {
                return Err(CatalogError::DuplicateUuid(assignment.uuid));
            }
            catalog.assignments.push(assignment);
        }
        Ok(catalog)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        Self::from_assignments(file.assignments)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn get_by_slug(&self, slug: &str) -> Option<&Assignment> {
        self.by_slug.get(slug).map(|&i| &self.assignments[i])
    }

    pub fn get_by_uuid(&self, uuid: &str) -> Option<&Assignment> {
        self.by_uuid.get(uuid).map(|&i| &self.assignments[i])
    }

    /// Uuids of every live assignment.
    pub fn uuids(&self) -> Vec<String> {
        self.assignments.iter().map(|a| a.uuid.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Assignment> {
        self.assignments.iter()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}
