//! Per-asset integrity decision.
//!
//! An asset can live in two places: the streaming copy under the install
//! tree and the persistent copy some assets are pinned to. The classifier
//! decides which copy is canonical, whether it is intact, and whether the
//! other copy is redundant. It never touches shared state besides the
//! per-file byte counter.

use crate::control::CancelToken;
use crate::error::Error;
use crate::hasher::{hash_file, BufferPool, DigestKind};
use crate::model::{
    AssetCategory, AssetDescriptor, AssetEntry, RepairKind, VerificationOutcome, VerificationState,
};
use crate::progress::ProgressCounters;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

pub struct ClassifyContext<'a> {
    pub game_root: &'a Path,
    pub fast_mode: bool,
    pub pool: &'a BufferPool,
    pub cancel: &'a CancelToken,
    pub counters: &'a ProgressCounters,
}

/// Outcome for the canonical copy plus an optional redundant copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub primary: VerificationOutcome,
    pub redundant: Option<VerificationOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CopyState {
    Absent,
    Matched,
    Mismatched,
}

#[derive(Debug, Clone)]
struct CopyCheck {
    state: CopyState,
    digest: Option<Vec<u8>>,
}

impl CopyCheck {
    fn absent() -> Self {
        Self {
            state: CopyState::Absent,
            digest: None,
        }
    }

    fn is_match(&self) -> bool {
        self.state == CopyState::Matched
    }
}

fn check_copy(
    path: &Path,
    asset: &AssetDescriptor,
    kind: Option<DigestKind>,
    ctx: &ClassifyContext<'_>,
) -> Result<CopyCheck, Error> {
    let metadata = match fs::metadata(path) {
        Ok(m) if m.is_file() => m,
        Ok(_) => return Ok(CopyCheck::absent()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CopyCheck::absent()),
        Err(e) => {
            warn!("Cannot stat {}: {}", path.display(), e);
            return Ok(CopyCheck {
                state: CopyState::Mismatched,
                digest: None,
            });
        }
    };

    let kind = match kind {
        Some(kind) if !ctx.fast_mode => kind,
        _ => {
            let state = if metadata.len() == asset.size {
                CopyState::Matched
            } else {
                CopyState::Mismatched
            };
            return Ok(CopyCheck { state, digest: None });
        }
    };

    match hash_file(path, kind, ctx.pool, ctx.cancel, |n| ctx.counters.bytes_read(n)) {
        Ok(digest) => {
            let state = if digest.as_slice() == asset.expected_digest() {
                CopyState::Matched
            } else {
                CopyState::Mismatched
            };
            trace!("{} -> {} ({:?})", path.display(), hex::encode(&digest), state);
            Ok(CopyCheck {
                state,
                digest: Some(digest),
            })
        }
        Err(Error::Io(e)) => {
            // locked or unreadable: repair it like a corrupt file
            warn!("Cannot read {}: {}", path.display(), e);
            Ok(CopyCheck {
                state: CopyState::Mismatched,
                digest: None,
            })
        }
        Err(e) => Err(e),
    }
}

fn outcome(
    state: VerificationState,
    asset: &AssetDescriptor,
    target: PathBuf,
    digest: Option<Vec<u8>>,
) -> VerificationOutcome {
    VerificationOutcome {
        state,
        asset: asset.clone(),
        target,
        computed_digest: digest,
    }
}

fn broken_state(check: &CopyCheck) -> VerificationState {
    if check.state == CopyState::Absent {
        VerificationState::Missing
    } else {
        VerificationState::Mismatched
    }
}

fn redundant_copy(asset: &AssetDescriptor, path: PathBuf, remote_name: &str) -> VerificationOutcome {
    let mut unused = asset.clone();
    unused.category = AssetCategory::Unused;
    unused.remote_name = remote_name.to_string();
    unused.local_path = Some(path.clone());
    outcome(VerificationState::Redundant, &unused, path, None)
}

/// Classify one asset.
///
/// Errors are reserved for cancellation and for manifest entries whose
/// digest can't be checked; unreadable files come back as `Mismatched`.
pub fn classify_asset(
    asset: &AssetDescriptor,
    ctx: &ClassifyContext<'_>,
) -> Result<Classification, Error> {
    ctx.cancel.check()?;

    let kind = if ctx.fast_mode {
        None
    } else {
        let expected = asset.expected_digest();
        Some(DigestKind::for_expected(expected).ok_or_else(|| {
            Error::format(
                asset.remote_name.as_str(),
                format!("unsupported digest length {}", expected.len()),
            )
        })?)
    };

    let streaming_path = asset.streaming_path(ctx.game_root);
    let persistent_path = asset.persistent_path(ctx.game_root);
    let distinct = streaming_path != persistent_path;
    let mut resolved = asset.clone();

    if !asset.force_persistent {
        let streaming = check_copy(&streaming_path, asset, kind, ctx)?;

        let redundant = (distinct && persistent_path.is_file()).then(|| {
            redundant_copy(asset, persistent_path.clone(), &asset.remote_name_persistent)
        });

        resolved.local_path = Some(streaming_path.clone());
        let primary = if streaming.is_match() {
            outcome(VerificationState::Verified, &resolved, streaming_path, streaming.digest)
        } else {
            resolved.force_streaming = true;
            resolved.force_persistent = false;
            outcome(broken_state(&streaming), &resolved, streaming_path, streaming.digest)
        };
        return Ok(Classification { primary, redundant });
    }

    let persistent = check_copy(&persistent_path, asset, kind, ctx)?;
    let streaming = if distinct {
        check_copy(&streaming_path, asset, kind, ctx)?
    } else {
        persistent.clone()
    };

    let redundant = (distinct && streaming.is_match() && persistent.is_match() && asset.is_patch)
        .then(|| redundant_copy(asset, streaming_path.clone(), &asset.remote_name));

    resolved.local_path = Some(persistent_path.clone());
    let primary = if !streaming.is_match() && !persistent.is_match() {
        resolved.force_persistent = true;
        resolved.force_streaming = false;
        outcome(broken_state(&persistent), &resolved, persistent_path, persistent.digest)
    } else {
        let digest = persistent.digest.or(streaming.digest);
        outcome(VerificationState::Verified, &resolved, persistent_path, digest)
    };

    Ok(Classification { primary, redundant })
}

impl VerificationOutcome {
    /// UI record for a non-verified outcome.
    pub fn to_entry(&self) -> AssetEntry {
        let relative = match self.state {
            VerificationState::Redundant => self.asset.remote_name.as_str(),
            _ if self.asset.force_persistent => self.asset.remote_name_persistent.as_str(),
            _ => self.asset.remote_name.as_str(),
        };
        let kind = if self.state == VerificationState::Redundant {
            RepairKind::Unused
        } else {
            RepairKind::from(self.asset.category)
        };

        let mut entry = AssetEntry::from_relative(relative, kind, self.asset.size);
        if self.state != VerificationState::Redundant {
            entry.computed_digest = self.computed_digest.clone();
            entry.expected_digest = Some(self.asset.expected_digest().to_vec());
        }
        entry
    }
}
