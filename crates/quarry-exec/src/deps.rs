//! Pre-launch dependency probing.

use quarry_scheduler::JobDefinition;

/// Return the declared dependencies that do not resolve on the host's PATH.
/// Read-only probe with no side effects; safe to call concurrently and
/// repeatedly.
pub fn missing_dependencies(job: &JobDefinition) -> Vec<String> {
    job.dependencies
        .iter()
        .filter(|tool| which::which(tool).is_err())
        .cloned()
        .collect()
}
