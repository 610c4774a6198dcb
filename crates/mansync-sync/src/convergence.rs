//! Convergence verification.
//!
//! Two data sources have converged when their manifest digests match.
//! When they don't, the manifest diff says exactly what each side lacks.

use mansync_core::{Digest, Manifest};
use mansync_store::DataSource;

use crate::error::Result;

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both sides hold the same set.
    Converged { digest: Digest },
    /// The sides differ (may need more sync rounds).
    Diverged {
        /// Digests only the remote side holds.
        missing_locally: Manifest,
        /// Digests only the local side holds.
        missing_remotely: Manifest,
    },
}

impl ConvergenceResult {
    /// Check if both sides have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged { .. })
    }

    /// Number of digests held by only one side.
    pub fn difference(&self) -> usize {
        match self {
            ConvergenceResult::Converged { .. } => 0,
            ConvergenceResult::Diverged {
                missing_locally,
                missing_remotely,
            } => missing_locally.len() + missing_remotely.len(),
        }
    }
}

/// Compare two data sources.
pub async fn verify_convergence<A, B>(local: &A, remote: &B) -> Result<ConvergenceResult>
where
    A: DataSource + ?Sized,
    B: DataSource + ?Sized,
{
    let ours = local.current_manifest().await?;
    let theirs = remote.current_manifest().await?;
    Ok(compare_manifests(&ours, &theirs))
}

/// Compare two manifests.
pub fn compare_manifests(local: &Manifest, remote: &Manifest) -> ConvergenceResult {
    if local == remote {
        return ConvergenceResult::Converged {
            digest: local.digest(),
        };
    }
    let diff = local.diff(remote);
    ConvergenceResult::Diverged {
        missing_locally: diff.removals,
        missing_remotely: diff.additions,
    }
}

/// Verify that every source in a group matches the first one.
///
/// Returns one result per source after the first.
pub async fn verify_group<D>(sources: &[&D]) -> Result<Vec<ConvergenceResult>>
where
    D: DataSource + ?Sized,
{
    let Some((first, rest)) = sources.split_first() else {
        return Ok(Vec::new());
    };

    let reference = first.current_manifest().await?;
    let mut results = Vec::with_capacity(rest.len());
    for source in rest {
        let manifest = source.current_manifest().await?;
        results.push(compare_manifests(&manifest, &reference));
    }
    Ok(results)
}
