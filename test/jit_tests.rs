//! End-to-end tests that build, load and run generated modules.
//!
//! Every test probes for a working C toolchain first and returns early when
//! none is installed, so the suite stays green on build hosts without one.

use annc::{dsl, emit, synthesize, Error, NativeModule, Network, VERSION};

fn have_cc() -> bool {
    let cc = std::env::var("CC")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "cc".to_string());
    which::which(&cc).is_ok() || std::path::Path::new(&cc).exists()
}

fn seed(n: u32) {
    unsafe { libc::srand(n) };
}

fn tiny() -> Network {
    Network::open(
        "sgd 0.1",
        "float",
        "cross_entropy",
        "1",
        "2",
        "2 softmax",
        &["2 relu"],
    )
    .unwrap()
}

fn cross_entropy(probs: &[f32], labels: &[f32]) -> f64 {
    probs
        .iter()
        .zip(labels)
        .map(|(&p, &y)| -(y as f64) * (p as f64).max(1e-12).ln())
        .sum()
}

#[test]
fn test_version_and_memory_constants() {
    if !have_cc() {
        eprintln!("skipping: no C toolchain");
        return;
    }
    seed(10);
    let net = tiny();
    assert_eq!(net.version(), VERSION);
    assert_eq!(net.memory_hard(), 4 * 12);
    assert!(net.memory_size() >= net.memory_hard());
    assert_eq!(net.memory_size() % 4, 0);
    assert_eq!(net.memory().len(), net.memory_size());
    assert_eq!(net.memory_hard_bytes().len(), net.memory_hard());
}

#[test]
fn test_initialize_weight_ranges() {
    if !have_cc() {
        eprintln!("skipping: no C toolchain");
        return;
    }
    seed(10);
    let net = tiny();

    // Same shape, so the same layout the loaded module was built with.
    let ir = dsl::parse_str(
        r#"
        .module "probe" ;
        .input 2 ;
        .hidden 2 relu ;
        .output 2 softmax ;
    "#,
    )
    .unwrap();
    let s = synthesize(&ir).unwrap();

    let bytes = net.memory();
    let floats: &[f32] = bytemuck::cast_slice(&bytes[..net.memory_hard()]);
    for l in 1..3 {
        let w0 = (s.layout.w[l] / 4) as usize;
        let b0 = (s.layout.b[l] / 4) as usize;
        // n = m = 2 for both layers, so |w| < 6/4.
        for &w in &floats[w0..w0 + 4] {
            assert!(w.abs() <= 1.5, "weight {w} out of range");
        }
        for &b in &floats[b0..b0 + 2] {
            assert_eq!(b, 0.0, "bias not cleared");
        }
    }
}

#[test]
fn test_activate_is_idempotent_on_frozen_arena() {
    if !have_cc() {
        eprintln!("skipping: no C toolchain");
        return;
    }
    seed(42);
    let mut net = tiny();
    let x = [0.25f32, 0.75];
    let first = net.activate_f32(&x).unwrap().to_vec();
    let second = net.activate_f32(&x).unwrap().to_vec();
    assert_eq!(first, second);
    // Softmax output is a distribution.
    let sum: f32 = first.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5);
    assert!(first.iter().all(|&p| (0.0..=1.0).contains(&p)));
}

#[test]
fn test_train_reduces_cross_entropy_on_one_sample() {
    if !have_cc() {
        eprintln!("skipping: no C toolchain");
        return;
    }
    seed(7);
    let mut net = Network::open(
        "sgd 0.1",
        "float",
        "cross_entropy",
        "1",
        "2",
        "2 softmax",
        &["4 sigmoid"],
    )
    .unwrap();

    let x = [0.25f32, 0.75];
    let y = [1.0f32, 0.0];
    let before = cross_entropy(net.activate_f32(&x).unwrap(), &y);
    for _ in 0..20 {
        net.train_f32(&x, &y).unwrap();
    }
    let after = cross_entropy(net.activate_f32(&x).unwrap(), &y);
    assert!(
        after < before,
        "loss did not decrease: {before} -> {after}"
    );
}

#[test]
fn test_batched_training_consumes_full_batch() {
    if !have_cc() {
        eprintln!("skipping: no C toolchain");
        return;
    }
    seed(3);
    let mut net = Network::open(
        "sgd 0.1",
        "float",
        "cross_entropy",
        "2",
        "2",
        "2 softmax",
        &["3 sigmoid"],
    )
    .unwrap();

    // Two samples back to back.
    let x = [0.0f32, 1.0, 1.0, 0.0];
    let y = [1.0f32, 0.0, 0.0, 1.0];
    net.train_f32(&x, &y).unwrap();

    // Batch-1-sized input must be refused.
    let e = net.train_f32(&x[..2], &y[..2]).unwrap_err();
    assert!(matches!(e, Error::Argument(_)));
}

#[test]
fn test_activate_length_validation() {
    if !have_cc() {
        eprintln!("skipping: no C toolchain");
        return;
    }
    seed(5);
    let mut net = tiny();
    assert!(matches!(
        net.activate_f32(&[1.0]),
        Err(Error::Argument(_))
    ));
    assert!(matches!(
        net.activate_f64(&[1.0, 2.0]),
        Err(Error::Argument(_))
    ));
}

#[test]
fn test_double_precision_module() {
    if !have_cc() {
        eprintln!("skipping: no C toolchain");
        return;
    }
    seed(11);
    let mut net = Network::open(
        "sgd 0.1",
        "double",
        "cross_entropy",
        "1",
        "2",
        "2 softmax",
        &["2 sigmoid"],
    )
    .unwrap();
    assert_eq!(net.memory_hard(), 8 * 12);
    let x = [0.5f64, 0.5];
    let out = net.activate_f64(&x).unwrap();
    let sum: f64 = out.iter().sum();
    assert!((sum - 1.0).abs() < 1e-9);
}

#[test]
fn test_driver_resolves_exports_directly() {
    if !have_cc() {
        eprintln!("skipping: no C toolchain");
        return;
    }
    let ir = dsl::parse_str(
        r#"
        .module "direct" ;
        .input 2 ;
        .hidden 2 relu ;
        .output 2 softmax ;
    "#,
    )
    .unwrap();
    let s = synthesize(&ir).unwrap();
    let dir = std::env::temp_dir().join(format!("annc-driver-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let (src, hdr) = emit::write_files(&s, &dir).unwrap();

    // Default prefix is "g".
    let module = NativeModule::open(&src, &s.prefix).unwrap();
    assert_eq!(module.version(), VERSION);
    assert_eq!(module.memory_size(), s.layout.size as usize);
    assert_eq!(module.memory_hard(), s.layout.hard as usize);

    let _ = std::fs::remove_file(src);
    let _ = std::fs::remove_file(hdr);
    let _ = std::fs::remove_dir_all(&dir);
}
