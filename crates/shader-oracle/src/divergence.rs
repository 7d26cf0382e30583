//! Output-divergence classification.
//!
//! Buffers are partitioned into byte-equality classes by a single forward
//! scan against one representative per existing group, so construction
//! order is deterministic given a fixed backend iteration order. Groups are
//! never merged after creation. n is the backend count (single digits), so
//! the quadratic scan is fine.

use serde::Serialize;

use crate::backend::{BackendFamily, BackendSpec, find_backend};

/// Ordered list of buffer groups. Groups are disjoint and their union is
/// exactly the set of backends that produced a buffer; a singleton group is
/// an outlier backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub groups: Vec<Vec<String>>,
}

impl Partition {
    pub fn is_unanimous(&self) -> bool {
        self.groups.len() == 1
    }

    /// Diagnostic form used in ambiguous signatures: `[[a], [b, c]]`.
    pub fn listing(&self) -> String {
        let groups: Vec<String> = self
            .groups
            .iter()
            .map(|group| format!("[{}]", group.join(", ")))
            .collect();
        format!("[{}]", groups.join(", "))
    }
}

/// Group backend names by byte-equality of their buffers.
pub fn classify(buffers: &[(String, Vec<u8>)]) -> Partition {
    let mut representatives: Vec<(&[u8], Vec<String>)> = Vec::new();
    for (name, bytes) in buffers {
        match representatives
            .iter_mut()
            .find(|(representative, _)| *representative == bytes.as_slice())
        {
            Some((_, members)) => members.push(name.clone()),
            None => representatives.push((bytes.as_slice(), vec![name.clone()])),
        }
    }
    Partition {
        groups: representatives
            .into_iter()
            .map(|(_, members)| members)
            .collect(),
    }
}

/// Qualitative attribution of a divergence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribution {
    /// A single backend disagrees with every other.
    Lone(String),
    /// A clean family-level split; always reported as the `angle` side.
    Family(BackendFamily),
    /// Cannot be pinned on one backend or one family.
    Ambiguous,
}

/// Attribute a non-unanimous partition. `Err` carries a backend name that
/// does not map back to a configured descriptor.
pub fn attribute(partition: &Partition, backends: &[BackendSpec]) -> Result<Attribution, String> {
    for group in &partition.groups {
        for name in group {
            if find_backend(backends, name).is_none() {
                return Err(name.clone());
            }
        }
    }

    if partition.groups.len() != 2 {
        return Ok(Attribution::Ambiguous);
    }

    let first = &partition.groups[0];
    let second = &partition.groups[1];
    match (first.len(), second.len()) {
        (1, 1) => return Ok(Attribution::Ambiguous),
        (1, _) => return Ok(Attribution::Lone(first[0].clone())),
        (_, 1) => return Ok(Attribution::Lone(second[0].clone())),
        _ => {}
    }

    if is_family_split(first, second, backends) || is_family_split(second, first, backends) {
        return Ok(Attribution::Family(BackendFamily::Angle));
    }
    Ok(Attribution::Ambiguous)
}

fn is_family_split(angle: &[String], independent: &[String], backends: &[BackendSpec]) -> bool {
    all_of_family(angle, BackendFamily::Angle, backends)
        && all_of_family(independent, BackendFamily::Independent, backends)
}

fn all_of_family(group: &[String], family: BackendFamily, backends: &[BackendSpec]) -> bool {
    group
        .iter()
        .all(|name| find_backend(backends, name).is_some_and(|backend| backend.family == family))
}
