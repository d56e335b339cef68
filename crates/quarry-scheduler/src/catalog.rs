//! The job definition catalog.
//!
//! A read-only table of job definitions, validated once at load. The
//! scheduler holds it behind an `Arc` and nothing mutates it afterwards, so
//! it needs no synchronization.

use std::collections::HashMap;

use crate::{ConfigError, JobDefinition};

/// Immutable catalog of job definitions, keyed by id, iterated in
/// declaration order.
#[derive(Debug)]
pub struct JobCatalog {
    jobs: Vec<JobDefinition>,
    index: HashMap<String, usize>,
}

impl JobCatalog {
    /// Build a catalog from already-validated definitions, failing fast on
    /// duplicate ids.
    pub fn new(jobs: Vec<JobDefinition>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(jobs.len());
        for (i, job) in jobs.iter().enumerate() {
            if index.insert(job.id.clone(), i).is_some() {
                return Err(ConfigError::DuplicateJobId(job.id.clone()));
            }
        }
        Ok(Self { jobs, index })
    }

    /// Look up a job by id.
    pub fn get(&self, id: &str) -> Option<&JobDefinition> {
        self.index.get(id).map(|&i| &self.jobs[i])
    }

    /// All jobs in declaration order.
    pub fn all(&self) -> impl Iterator<Item = &JobDefinition> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
