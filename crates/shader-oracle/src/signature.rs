//! Error-signature taxonomy and encoding.
//!
//! The signature is the unit of equality a reducer must preserve: a pure
//! function of the recorded outcomes, stable across re-execution for an
//! unchanged backend list. Internally it is a tagged value; the numeric
//! code-string form exists only for the process boundary, where external
//! reducers understand nothing richer.
//!
//! Code ranges: `0` no divergence, `1000`+mask crashes, `2000`+mask
//! timeouts, base+bit single-backend attribution, base+99 family split,
//! base+1000 ambiguous (with the group listing as diagnostic text), `9999`
//! encoding error. The base is `3000` for a fresh run and `5000` when
//! comparing against a stored reference buffer.

use serde::Serialize;

use crate::backend::{BackendSpec, find_backend};
use crate::divergence::{self, Attribution, Partition};
use crate::runner::{BackendRun, Outcome};

/// Sentinel handed to callers when the original run shows no divergence and
/// there is therefore nothing for a reducer to preserve.
pub const NO_DIVERGENCE_SENTINEL: &str = "0000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureBase {
    Fresh,
    Reference,
}

impl SignatureBase {
    pub const fn offset(self) -> u64 {
        match self {
            Self::Fresh => 3000,
            Self::Reference => 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ErrorSignature {
    NoDivergence,
    /// `mask` is the sum of `1 << code` over crashed backends; zero means
    /// every backend crashed.
    Crash { mask: u64 },
    Timeout { mask: u64 },
    Attributed {
        base: SignatureBase,
        backend: String,
        code: u32,
    },
    FamilySplit { base: SignatureBase },
    Ambiguous {
        base: SignatureBase,
        groups: Vec<Vec<String>>,
    },
    EncodingError { detail: String },
}

impl ErrorSignature {
    /// The process-boundary serialization compared by generated
    /// interestingness scripts.
    pub fn code_string(&self) -> String {
        match self {
            Self::NoDivergence => "0".to_string(),
            Self::Crash { mask } => (1000 + mask).to_string(),
            Self::Timeout { mask } => (2000 + mask).to_string(),
            Self::Attributed { base, code, .. } => (base.offset() + (1u64 << code)).to_string(),
            Self::FamilySplit { base } => (base.offset() + 99).to_string(),
            Self::Ambiguous { base, groups } => {
                let partition = Partition {
                    groups: groups.clone(),
                };
                format!("{} {}", base.offset() + 1000, partition.listing())
            }
            Self::EncodingError { .. } => "9999".to_string(),
        }
    }

    /// Whether a reduction attempt makes sense for this signature.
    /// Timeouts are reducible only on request; an encoding error signals a
    /// configuration mismatch, not a reducible defect.
    pub fn is_reduction_eligible(&self, reduce_timeout: bool) -> bool {
        match self {
            Self::Crash { .. } => true,
            Self::Timeout { .. } => reduce_timeout,
            Self::Attributed { .. } | Self::FamilySplit { .. } | Self::Ambiguous { .. } => true,
            Self::NoDivergence | Self::EncodingError { .. } => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl std::fmt::Display for ErrorSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code_string())
    }
}

/// Encode one shader's recorded outcomes into its signature.
///
/// Crash and timeout checks take priority over divergence checks; a shader
/// crashing on one backend is reported through the crash range even when
/// the surviving backends agree with each other. With a `reference` buffer
/// the comparison runs against that buffer instead of across peers and the
/// base offset moves to 5000.
pub fn encode(
    backends: &[BackendSpec],
    runs: &[BackendRun],
    reference: Option<&[u8]>,
) -> ErrorSignature {
    let mut crash_mask = 0u64;
    let mut crash_count = 0usize;
    let mut timeout_mask = 0u64;
    let mut timeout_count = 0usize;

    for run in runs {
        let Some(backend) = find_backend(backends, &run.backend) else {
            return ErrorSignature::EncodingError {
                detail: run.backend.clone(),
            };
        };
        match &run.outcome {
            Outcome::Crash { .. } => {
                crash_mask += backend.bit();
                crash_count += 1;
            }
            Outcome::Timeout => {
                timeout_mask += backend.bit();
                timeout_count += 1;
            }
            Outcome::Success { .. } => {}
        }
    }

    if crash_count == runs.len() && !runs.is_empty() {
        return ErrorSignature::Crash { mask: 0 };
    }
    if crash_count > 0 {
        return ErrorSignature::Crash { mask: crash_mask };
    }
    if timeout_count > 0 {
        return ErrorSignature::Timeout { mask: timeout_mask };
    }

    let buffers: Vec<(String, Vec<u8>)> = runs
        .iter()
        .filter_map(|run| match &run.outcome {
            Outcome::Success { buffer } => Some((run.backend.clone(), buffer.clone())),
            _ => None,
        })
        .collect();

    match reference {
        Some(reference) => encode_against_reference(backends, &buffers, reference),
        None => encode_across_peers(backends, &buffers),
    }
}

fn encode_across_peers(backends: &[BackendSpec], buffers: &[(String, Vec<u8>)]) -> ErrorSignature {
    let partition = divergence::classify(buffers);
    if partition.is_unanimous() {
        return ErrorSignature::NoDivergence;
    }
    match divergence::attribute(&partition, backends) {
        Ok(Attribution::Lone(name)) => match find_backend(backends, &name) {
            Some(backend) => ErrorSignature::Attributed {
                base: SignatureBase::Fresh,
                code: backend.code,
                backend: name,
            },
            None => ErrorSignature::EncodingError { detail: name },
        },
        Ok(Attribution::Family(_)) => ErrorSignature::FamilySplit {
            base: SignatureBase::Fresh,
        },
        Ok(Attribution::Ambiguous) => ErrorSignature::Ambiguous {
            base: SignatureBase::Fresh,
            groups: partition.groups,
        },
        Err(name) => ErrorSignature::EncodingError { detail: name },
    }
}

/// Against a stored reference the disagreeing set replaces the peer
/// analysis: one disagreeing backend is attributed, a clean family split
/// between the disagreeing and agreeing sets is a family divergence,
/// anything else is ambiguous.
fn encode_against_reference(
    backends: &[BackendSpec],
    buffers: &[(String, Vec<u8>)],
    reference: &[u8],
) -> ErrorSignature {
    let mut agreeing = Vec::new();
    let mut disagreeing = Vec::new();
    for (name, bytes) in buffers {
        if find_backend(backends, name).is_none() {
            return ErrorSignature::EncodingError { detail: name.clone() };
        }
        if bytes.as_slice() == reference {
            agreeing.push(name.clone());
        } else {
            disagreeing.push(name.clone());
        }
    }

    if disagreeing.is_empty() {
        return ErrorSignature::NoDivergence;
    }
    if disagreeing.len() == 1 {
        return match find_backend(backends, &disagreeing[0]) {
            Some(backend) => ErrorSignature::Attributed {
                base: SignatureBase::Reference,
                backend: disagreeing[0].clone(),
                code: backend.code,
            },
            None => ErrorSignature::EncodingError {
                detail: disagreeing[0].clone(),
            },
        };
    }

    let split = !agreeing.is_empty()
        && (pure_family_pair(&disagreeing, &agreeing, backends)
            || pure_family_pair(&agreeing, &disagreeing, backends));
    if split {
        return ErrorSignature::FamilySplit {
            base: SignatureBase::Reference,
        };
    }

    let partition = divergence::classify(buffers);
    ErrorSignature::Ambiguous {
        base: SignatureBase::Reference,
        groups: partition.groups,
    }
}

fn pure_family_pair(
    angle: &[String],
    independent: &[String],
    backends: &[BackendSpec],
) -> bool {
    use crate::backend::BackendFamily;
    let of = |group: &[String], family: BackendFamily| {
        group.iter().all(|name| {
            find_backend(backends, name).is_some_and(|backend| backend.family == family)
        })
    };
    of(angle, BackendFamily::Angle) && of(independent, BackendFamily::Independent)
}
