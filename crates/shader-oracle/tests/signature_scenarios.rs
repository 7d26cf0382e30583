//! Signature laws over recorded outcomes, end to end through the public
//! API: classification, attribution and encoding without any process
//! execution.

use shader_oracle::backend::{BackendFamily, BackendSpec};
use shader_oracle::divergence::{self, Attribution, Partition};
use shader_oracle::runner::{BackendRun, Outcome};
use shader_oracle::signature::{self, ErrorSignature, SignatureBase};

fn spec(name: &str, family: BackendFamily, code: u32) -> BackendSpec {
    BackendSpec {
        name: name.to_string(),
        renderer: name.to_string(),
        family,
        code,
        ld_library_path: String::new(),
        vk_icd_filenames: String::new(),
        extra_envs: Vec::new(),
    }
}

/// The fixture backend set used throughout: two angle backends and two
/// independent ones, codes assigned in declaration order.
fn backends() -> Vec<BackendSpec> {
    vec![
        spec("a", BackendFamily::Angle, 1),
        spec("b", BackendFamily::Independent, 2),
        spec("c", BackendFamily::Angle, 3),
        spec("d_x", BackendFamily::Independent, 4),
    ]
}

fn success(backend: &str, buffer: &str) -> BackendRun {
    BackendRun {
        backend: backend.to_string(),
        outcome: Outcome::Success {
            buffer: buffer.as_bytes().to_vec(),
        },
    }
}

fn crash(backend: &str) -> BackendRun {
    BackendRun {
        backend: backend.to_string(),
        outcome: Outcome::Crash {
            message: "driver fault".to_string(),
        },
    }
}

fn timeout(backend: &str) -> BackendRun {
    BackendRun {
        backend: backend.to_string(),
        outcome: Outcome::Timeout,
    }
}

#[test]
fn scenario_a_identical_buffers_are_not_divergent() {
    let runs = vec![
        success("a", "0 0"),
        success("b", "0 0"),
        success("c", "0 0"),
        success("d_x", "0 0"),
    ];
    let sig = signature::encode(&backends(), &runs, None);
    assert_eq!(sig, ErrorSignature::NoDivergence);
    assert_eq!(sig.code_string(), "0");
}

#[test]
fn scenario_b_lone_outlier_carries_its_bit() {
    let runs = vec![
        success("a", "0 0"),
        success("b", "0 0"),
        success("c", "0 0"),
        success("d_x", "0 1"),
    ];
    let sig = signature::encode(&backends(), &runs, None);
    assert_eq!(
        sig,
        ErrorSignature::Attributed {
            base: SignatureBase::Fresh,
            backend: "d_x".to_string(),
            code: 4,
        }
    );
    assert_eq!(sig.code_string(), "3016");
}

#[test]
fn scenario_c_family_split_is_3099() {
    let runs = vec![
        success("a", "0 1"),
        success("b", "0 0"),
        success("c", "0 1"),
        success("d_x", "0 0"),
    ];
    assert_eq!(
        signature::encode(&backends(), &runs, None).code_string(),
        "3099"
    );
}

#[test]
fn scenario_d_three_way_split_lists_the_groups() {
    let runs = vec![
        success("a", "0 1"),
        success("b", "0 0"),
        success("c", "1 1"),
        success("d_x", "0 0"),
    ];
    let sig = signature::encode(&backends(), &runs, None);
    assert_eq!(sig.code_string(), "4000 [[a], [b, d_x], [c]]");
    assert!(matches!(sig, ErrorSignature::Ambiguous { .. }));
}

#[test]
fn single_crash_law() {
    let runs = vec![
        success("a", "0 0"),
        success("b", "0 0"),
        success("c", "0 0"),
        crash("d_x"),
    ];
    // 1000 + 2^4
    assert_eq!(
        signature::encode(&backends(), &runs, None).code_string(),
        "1016"
    );
}

#[test]
fn all_crash_law() {
    let runs = vec![crash("a"), crash("b"), crash("c"), crash("d_x")];
    assert_eq!(
        signature::encode(&backends(), &runs, None).code_string(),
        "1000"
    );
}

#[test]
fn single_timeout_law() {
    let runs = vec![
        success("a", "0 0"),
        success("b", "0 0"),
        success("c", "0 0"),
        timeout("d_x"),
    ];
    assert_eq!(
        signature::encode(&backends(), &runs, None).code_string(),
        "2016"
    );
}

#[test]
fn crash_outranks_timeout_and_divergence() {
    let runs = vec![
        success("a", "0 1"),
        timeout("b"),
        success("c", "0 0"),
        crash("d_x"),
    ];
    assert_eq!(
        signature::encode(&backends(), &runs, None).code_string(),
        "1016"
    );
}

#[test]
fn encoding_is_idempotent() {
    let runs = vec![
        success("a", "0 1"),
        success("b", "0 0"),
        success("c", "1 1"),
        timeout("d_x"),
    ];
    let first = signature::encode(&backends(), &runs, None);
    for _ in 0..5 {
        assert_eq!(signature::encode(&backends(), &runs, None), first);
    }
}

#[test]
fn family_split_law_is_order_independent() {
    let forward = Partition {
        groups: vec![
            vec!["a".to_string(), "c".to_string()],
            vec!["b".to_string(), "d_x".to_string()],
        ],
    };
    let backward = Partition {
        groups: vec![
            vec!["b".to_string(), "d_x".to_string()],
            vec!["a".to_string(), "c".to_string()],
        ],
    };
    for partition in [forward, backward] {
        assert_eq!(
            divergence::attribute(&partition, &backends()).expect("known backends"),
            Attribution::Family(BackendFamily::Angle)
        );
    }
}

#[test]
fn outlier_law_is_order_independent() {
    let first = Partition {
        groups: vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]],
    };
    let second = Partition {
        groups: vec![vec!["c".to_string()], vec!["a".to_string(), "b".to_string()]],
    };
    for partition in [first, second] {
        assert_eq!(
            divergence::attribute(&partition, &backends()).expect("known backends"),
            Attribution::Lone("c".to_string())
        );
    }
}

#[test]
fn unknown_backend_name_is_a_hard_encoding_error() {
    let runs = vec![success("a", "0 0"), success("ghost", "0 1")];
    let sig = signature::encode(&backends(), &runs, None);
    assert_eq!(sig.code_string(), "9999");
}

#[test]
fn reference_comparison_uses_the_5000_base() {
    let runs = vec![
        success("a", "0 0"),
        success("b", "0 0"),
        success("c", "0 0"),
        success("d_x", "0 1"),
    ];
    assert_eq!(
        signature::encode(&backends(), &runs, Some(b"0 0")).code_string(),
        "5016"
    );
    assert_eq!(
        signature::encode(&backends(), &runs, Some(b"0 1")).code_string(),
        "6000 [[a, b, c], [d_x]]"
    );
}

#[test]
fn timeout_markers_compare_like_ordinary_bytes() {
    // Two timed-out backends share the sentinel buffer, so they land in the
    // same group and the timeout mask covers exactly both.
    let runs = vec![
        success("a", "0 0"),
        success("b", "0 0"),
        timeout("c"),
        timeout("d_x"),
    ];
    assert_eq!(
        signature::encode(&backends(), &runs, None).code_string(),
        "2024"
    );
}
