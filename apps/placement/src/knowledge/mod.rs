//! Profile Knowledge Base boundary: a read-only view of the candidate's verified facts.
//!
//! Building the PKB from source documents happens elsewhere; this module only loads an
//! already-built `pkb.json` and answers queries against it. A KB is shared across
//! concurrent runs behind `Arc<dyn KnowledgeBase>` and never mutated after load.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::models::profile::{Candidate, ProfileDocument, ProfileFact, ProfileRole};
use crate::pipeline::rules::contains_term;

#[derive(Debug, Error)]
pub enum KnowledgeBaseError {
    #[error("failed to read knowledge base at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("knowledge base is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("knowledge base contains no facts")]
    Empty,

    #[error("knowledge base is malformed: {0}")]
    Malformed(String),
}

pub trait KnowledgeBase: Send + Sync {
    /// Opaque version; part of the mapping cache key.
    fn version(&self) -> &str;
    fn candidate(&self) -> &Candidate;
    fn roles(&self) -> &[ProfileRole];
    fn facts(&self) -> &[ProfileFact];
    fn education(&self) -> &[String];
    fn certifications(&self) -> &[String];

    fn fact(&self, id: &str) -> Option<&ProfileFact> {
        self.facts().iter().find(|f| f.id == id)
    }

    fn role(&self, id: &str) -> Option<&ProfileRole> {
        self.roles().iter().find(|r| r.id == id)
    }

    /// Roles ordered most recent first.
    fn roles_by_recency(&self) -> Vec<&ProfileRole> {
        let mut roles: Vec<&ProfileRole> = self.roles().iter().collect();
        roles.sort_by_key(|r| (Reverse(r.dates.recency_key()), r.id.clone()));
        roles
    }

    /// 0 for the most recent role. `None` for unknown ids.
    fn recency_rank(&self, role_id: &str) -> Option<usize> {
        self.roles_by_recency().iter().position(|r| r.id == role_id)
    }

    fn facts_mentioning(&self, term: &str) -> Vec<&ProfileFact> {
        self.facts()
            .iter()
            .filter(|f| contains_term(&f.text, term) || f.metrics.iter().any(|m| contains_term(m, term)))
            .collect()
    }

    /// True when the term appears anywhere in the recorded facts or credentials.
    fn grounds_term(&self, term: &str) -> bool {
        !self.facts_mentioning(term).is_empty()
            || self
                .certifications()
                .iter()
                .chain(self.education())
                .any(|c| contains_term(c, term))
    }
}

/// Structural integrity: non-empty, unique ids, facts pointing at known roles,
/// sane date ranges. Run on load and again before mapping.
pub fn check_integrity(kb: &dyn KnowledgeBase) -> Result<(), KnowledgeBaseError> {
    if kb.facts().is_empty() {
        return Err(KnowledgeBaseError::Empty);
    }
    if kb.version().trim().is_empty() {
        return Err(KnowledgeBaseError::Malformed("version is empty".to_string()));
    }

    let mut role_ids = HashSet::new();
    for role in kb.roles() {
        if !role_ids.insert(role.id.as_str()) {
            return Err(KnowledgeBaseError::Malformed(format!(
                "duplicate role id '{}'",
                role.id
            )));
        }
        if let Some(end) = role.dates.end {
            if end < role.dates.start {
                return Err(KnowledgeBaseError::Malformed(format!(
                    "role '{}' ends before it starts",
                    role.id
                )));
            }
        }
    }

    let mut fact_ids = HashSet::new();
    for fact in kb.facts() {
        if fact.id.trim().is_empty() || fact.text.trim().is_empty() {
            return Err(KnowledgeBaseError::Malformed(
                "fact with empty id or text".to_string(),
            ));
        }
        if !fact_ids.insert(fact.id.as_str()) {
            return Err(KnowledgeBaseError::Malformed(format!(
                "duplicate fact id '{}'",
                fact.id
            )));
        }
        if let Some(role_id) = &fact.role_id {
            if !role_ids.contains(role_id.as_str()) {
                return Err(KnowledgeBaseError::Malformed(format!(
                    "fact '{}' references unknown role '{}'",
                    fact.id, role_id
                )));
            }
        }
    }
    Ok(())
}

/// A validated PKB held in memory with id indexes.
#[derive(Debug, Clone)]
pub struct InMemoryKnowledgeBase {
    doc: ProfileDocument,
    fact_index: HashMap<String, usize>,
    role_index: HashMap<String, usize>,
}

impl InMemoryKnowledgeBase {
    pub fn from_document(doc: ProfileDocument) -> Result<Self, KnowledgeBaseError> {
        let fact_index = doc
            .facts
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id.clone(), i))
            .collect();
        let role_index = doc
            .roles
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        let kb = Self {
            doc,
            fact_index,
            role_index,
        };
        check_integrity(&kb)?;
        Ok(kb)
    }

    /// Loads and validates a `pkb.json` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KnowledgeBaseError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| KnowledgeBaseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let doc: ProfileDocument = serde_json::from_str(&raw)?;
        let kb = Self::from_document(doc)?;
        info!(
            "Loaded knowledge base {} (version {}, {} roles, {} facts)",
            path.display(),
            kb.doc.version,
            kb.doc.roles.len(),
            kb.doc.facts.len()
        );
        Ok(kb)
    }
}

impl KnowledgeBase for InMemoryKnowledgeBase {
    fn version(&self) -> &str {
        &self.doc.version
    }

    fn candidate(&self) -> &Candidate {
        &self.doc.candidate
    }

    fn roles(&self) -> &[ProfileRole] {
        &self.doc.roles
    }

    fn facts(&self) -> &[ProfileFact] {
        &self.doc.facts
    }

    fn education(&self) -> &[String] {
        &self.doc.education
    }

    fn certifications(&self) -> &[String] {
        &self.doc.certifications
    }

    fn fact(&self, id: &str) -> Option<&ProfileFact> {
        self.fact_index.get(id).and_then(|i| self.doc.facts.get(*i))
    }

    fn role(&self, id: &str) -> Option<&ProfileRole> {
        self.role_index.get(id).and_then(|i| self.doc.roles.get(*i))
    }
}
