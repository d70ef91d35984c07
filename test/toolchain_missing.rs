//! Failure-path test for a broken toolchain configuration.
//!
//! Lives in its own test binary: it mutates `CC` and `TMPDIR` for the whole
//! process and must not interleave with the end-to-end suite.

use annc::{Error, Network};

#[test]
fn test_missing_toolchain_fails_and_cleans_up() {
    let dir = std::env::temp_dir().join(format!("annc-nocc-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::env::set_var("TMPDIR", &dir);
    std::env::set_var("CC", "/nonexistent/bin/annc-no-such-cc");

    let e = Network::open(
        "sgd 0.1",
        "float",
        "cross_entropy",
        "1",
        "2",
        "2 softmax",
        &["2 relu"],
    )
    .unwrap_err();
    assert!(
        matches!(e, Error::System(_) | Error::Jitc(_)),
        "unexpected error: {e}"
    );

    // Every temporary (spec, source, header, artifact) must be gone.
    let leftovers: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
    assert!(leftovers.is_empty(), "leftover temporaries: {leftovers:?}");

    std::env::remove_var("CC");
    std::env::remove_var("TMPDIR");
    let _ = std::fs::remove_dir_all(&dir);
}
