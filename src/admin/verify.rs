use std::path::Path;

use serde::Serialize;

use crate::admin::options::CountsConfig;
use crate::admin::{AdminError, Result};
use crate::storage::counts::{GenericCountsStore, StoreState, EMPTY_REBUILD};

const MAX_FINDINGS: usize = 32;

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Non-critical issue that may indicate a problem.
    Warning,
    /// Critical issue indicating data corruption or integrity failure.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

impl VerifyFinding {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Warning,
            message: message.into(),
        }
    }
}

/// Statistics collected during verification.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Entries held by the tree, markers included.
    pub entries: u64,
    /// Count entries examined.
    pub counts_checked: u64,
    /// Checkpoint generation of the file.
    pub generation: u64,
    /// Highest gap-free transaction id recorded in the header.
    pub highest_gap_free_tx_id: u64,
    /// Transactions recorded as applied above the gap.
    pub stray_tx_ids: Vec<u64>,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// Whether verification passed without error findings.
    pub success: bool,
    /// Whether the file has no usable counts and would be rebuilt on start.
    pub needs_rebuild: bool,
    /// Issues discovered, at most 32.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the file.
    pub counts: VerifyCounts,
}

/// Verifies a counts or degrees store file without modifying it.
///
/// The store is opened read-only regardless of `config`, so a damaged file is reported
/// rather than recreated.
pub fn verify(path: impl AsRef<Path>, config: &CountsConfig) -> Result<VerifyReport> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(AdminError::missing_store(path));
    }
    let opts = config.store_options().read_only(true);
    let store = GenericCountsStore::open(path, Box::new(EMPTY_REBUILD), &opts)
        .map_err(AdminError::from_core)?;
    let check = store.consistency_check()?;
    let info = store.tx_id_information();
    let needs_rebuild = store.state() == StoreState::RebuildNeeded;

    let mut findings = Vec::new();
    if needs_rebuild {
        push(
            &mut findings,
            VerifyFinding::warning("header carries no transaction id; counts would be rebuilt"),
        );
    }
    for message in check.tree.findings.iter().chain(&check.invalid_entries) {
        push(&mut findings, VerifyFinding::error(message.clone()));
    }

    let counts = VerifyCounts {
        entries: check.tree.entries,
        counts_checked: check.counts_checked,
        generation: check.tree.generation,
        highest_gap_free_tx_id: info.highest_gap_free().0,
        stray_tx_ids: info.stray_tx_ids().map(|tx| tx.0).collect(),
    };
    store.close()?;

    Ok(VerifyReport {
        success: !findings
            .iter()
            .any(|finding| finding.severity == VerifySeverity::Error),
        needs_rebuild,
        findings,
        counts,
    })
}

fn push(findings: &mut Vec<VerifyFinding>, finding: VerifyFinding) {
    if findings.len() < MAX_FINDINGS {
        findings.push(finding);
    }
}
