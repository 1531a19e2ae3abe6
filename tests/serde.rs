#![cfg(feature = "serde")]

use revtape::{Coupling, OdeConfig, Session, SessionConfig, TapeStats, TriangularView, Var};

#[test]
fn roundtrip_session_config_json() {
    let config = SessionConfig {
        initial_tape_capacity: 32,
        arena_block_len: 8,
    };
    let json = serde_json::to_string(&config).unwrap();
    let back: SessionConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);

    // A deserialized config drives a working session.
    let session = Session::with_config(back);
    let x = Var::new(3.0);
    let y = x * x;
    assert_eq!(y.grad_wrt(&[x]).unwrap(), vec![6.0]);
    drop(session);
}

#[test]
fn roundtrip_tape_stats_json() {
    let session = Session::with_config(SessionConfig {
        initial_tape_capacity: 16,
        arena_block_len: 4,
    });
    let xs = revtape::var::vars(&[1.0, 2.0, 3.0, 4.0, 5.0]);
    let _ = revtape::dot_product(&xs, &xs).unwrap();
    let stats = session.stats().unwrap();
    assert!(stats.refs_used > 0);

    let json = serde_json::to_string(&stats).unwrap();
    let back: TapeStats = serde_json::from_str(&json).unwrap();
    assert_eq!(back, stats);
}

#[test]
fn roundtrip_ode_config_json() {
    let config = OdeConfig {
        relative_tolerance: 1e-9,
        absolute_tolerance: 1e-11,
        initial_step: 0.05,
        max_num_steps: 2_000,
        minimum_step: 1e-12,
    };
    let json = serde_json::to_string(&config).unwrap();
    let back: OdeConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
    assert_eq!(back.validate(), Ok(()));
}

#[test]
fn roundtrip_enums_json() {
    for coupling in [Coupling::None, Coupling::Params, Coupling::Initial, Coupling::Both] {
        let json = serde_json::to_string(&coupling).unwrap();
        let back: Coupling = serde_json::from_str(&json).unwrap();
        assert_eq!(back, coupling);
    }
    for view in [TriangularView::Lower, TriangularView::Upper] {
        let json = serde_json::to_string(&view).unwrap();
        let back: TriangularView = serde_json::from_str(&json).unwrap();
        assert_eq!(back, view);
    }
}

#[test]
fn unknown_variant_is_rejected() {
    assert!(serde_json::from_str::<TriangularView>("\"Diagonal\"").is_err());
}
