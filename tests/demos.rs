//! End-to-end checks of the demonstrations.
//!
//! Tests marked `#[ignore]` need ngspice on PATH: `cargo test -- --ignored`.

use ndarray::array;

use spicelab::analysis::export_results;
use spicelab::cli::OutputFormat;
use spicelab::demos::{
    add_current_branches, default_capacitance, default_inductance, filter_sweep, four_rlc_filters, millman,
    millman_circuit, rlc_filter, MILLMAN_BRANCHES, MILLMAN_NODE,
};
use spicelab::ngspice::{is_ngspice_available, NgspiceConfig};
use spicelab::theory::{millman_current_shift, millman_voltage};
use spicelab::units::kilo;
use spicelab::{Engine, NgspiceEngine, ReplayEngine, SimulationError, Simulator, SimulatorConfig};

const MILLMAN_OP: &str = "Title: Millman's theorem
Date: Thu Oct 15 10:00:00  2026
Plotname: Operating Point
Flags: real
No. Variables: 7
No. Points: 1
Variables:
\t0\tv(1)\tvoltage
\t1\tv(2)\tvoltage
\t2\tv(3)\tvoltage
\t3\tv(a)\tvoltage
\t4\tvinput1#branch\tcurrent
\t5\tvinput2#branch\tcurrent
\t6\tvinput3#branch\tcurrent
Values:
 0\t1.000000000000000e+00
\t2.000000000000000e+00
\t3.000000000000000e+00
\t1.636363636363636e+00
\t6.363636363636364e-04
\t1.818181818181818e-04
\t-4.545454545454545e-04
";

fn ngspice() -> Option<NgspiceEngine> {
    let config = NgspiceConfig::default();
    if is_ngspice_available(&config) {
        Some(NgspiceEngine::new(config))
    } else {
        eprintln!("ngspice not found, skipping");
        None
    }
}

#[test]
fn test_replay_from_captured_file() {
    let dir = tempfile::tempdir().unwrap();
    let raw_path = dir.path().join("millman.raw");
    std::fs::write(&raw_path, MILLMAN_OP).unwrap();

    let circuit = millman_circuit(MILLMAN_BRANCHES);
    let engine = ReplayEngine::from_file(&raw_path).unwrap();
    let op = Simulator::with_engine(&circuit, SimulatorConfig::default(), &engine)
        .operating_point()
        .unwrap();

    assert!((op.node(MILLMAN_NODE).unwrap() - 18.0 / 11.0).abs() < 1e-12);
    assert!((op.branch("Vinput3").unwrap() + 4.545454545454545e-04).abs() < 1e-18);
    assert_eq!(op.node("gnd").unwrap(), 0.0);

    let deck = engine.last_deck().unwrap();
    assert!(deck.starts_with(".title Millman's theorem\n"));
    assert!(deck.contains("R3 3 A 3k\n"));
}

#[test]
fn test_export_operating_point_json() {
    let circuit = millman_circuit(MILLMAN_BRANCHES);
    let engine = ReplayEngine::new(MILLMAN_OP);
    let op = Simulator::with_engine(&circuit, SimulatorConfig::default(), &engine)
        .operating_point()
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("millman.json");
    let results = vec![("voltage-sources".to_string(), spicelab::AnalysisResult::OperatingPoint(op))];
    export_results(&results, &path, OutputFormat::Json).unwrap();

    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["voltage-sources"]["analysis"], "operating_point");
    assert_eq!(value["voltage-sources"]["nodes"]["2"], 2.0);
}

#[test]
fn test_missing_engine_is_reported() {
    let mut config = SimulatorConfig::default();
    config.engine.executable = "spicelab-no-such-ngspice".to_string();
    let engine = NgspiceEngine::new(config.engine.clone());

    let error = millman(&config, &engine).unwrap_err();
    let root = error.root_cause().downcast_ref::<SimulationError>();
    assert!(matches!(root, Some(SimulationError::EngineNotFound(_))), "{:#}", error);
}

#[test]
#[ignore] // Requires ngspice to be installed
fn test_millman_matches_theory() {
    let Some(engine) = ngspice() else { return };
    let report = millman(&SimulatorConfig::default(), &engine).unwrap();

    assert!(report.voltage_sources.relative_error() < 1e-6, "{}", report);
    assert!(report.with_current_sources.relative_error() < 1e-6, "{}", report);

    let shift = report.with_current_sources.simulated - report.voltage_sources.simulated;
    assert!(((shift - report.current_shift) / report.current_shift).abs() < 1e-6);
    assert_eq!(
        report.to_string(),
        "Node a:  1.64 V\nV(A) =  1.64 V\nNode a:  1.96 V\nV(A) =  1.96 V"
    );
}

#[test]
#[ignore] // Requires ngspice to be installed
fn test_current_branches_shift_node() {
    let Some(engine) = ngspice() else { return };
    let voltages = array![1.0, 2.0, 3.0];
    let resistances = voltages.mapv(kilo);
    let currents = array![100e-6, 200e-6, 300e-6];

    let mut circuit = millman_circuit(MILLMAN_BRANCHES);
    let before = Simulator::with_engine(&circuit, SimulatorConfig::default(), &engine)
        .operating_point()
        .unwrap()
        .node(MILLMAN_NODE)
        .unwrap();
    add_current_branches(&mut circuit, MILLMAN_BRANCHES);
    let after = Simulator::with_engine(&circuit, SimulatorConfig::default(), &engine)
        .operating_point()
        .unwrap()
        .node(MILLMAN_NODE)
        .unwrap();

    let expected = millman_current_shift(&resistances, &currents).unwrap().value();
    assert!(((after - before) - expected).abs() < 1e-6 * expected);
    let theory = millman_voltage(&voltages, &resistances, &currents).unwrap().value();
    assert!(((after - theory) / theory).abs() < 1e-6);
}

#[test]
#[ignore] // Requires ngspice to be installed
fn test_ac_sweep_is_log_spaced() {
    let Some(engine) = ngspice() else { return };
    let circuit = four_rlc_filters(default_inductance(), default_capacitance());
    let sweep = filter_sweep();
    let ac = Simulator::with_engine(&circuit, SimulatorConfig::default(), &engine)
        .ac(sweep)
        .unwrap();

    let frequency = &ac.frequency;
    assert_eq!(frequency.len(), sweep.expected_points());
    assert!((frequency[0] - 100.0).abs() < 1e-9);
    assert!((frequency[frequency.len() - 1] - 10_000.0).abs() < 1e-6);

    let ratios: Vec<f64> = frequency.windows(2).into_iter().map(|w| w[1] / w[0]).collect();
    assert!(ratios.iter().all(|&r| r > 1.0));
    let step = 10f64.powf(1.0 / 100.0);
    assert!(ratios.iter().all(|&r| (r - step).abs() < 1e-9));

    for node in ["out5", "out1", "out2", "out4"] {
        let gain = ac.gain_db(node).unwrap();
        assert!(gain[0].abs() < 0.5, "{} passes low frequencies", node);
        assert!(gain[gain.len() - 1] < -30.0, "{} rejects high frequencies", node);
    }
}

#[test]
#[ignore] // Requires ngspice to be installed
fn test_rlc_filter_report_against_ngspice() {
    let Some(engine) = ngspice() else { return };
    let report = rlc_filter(&SimulatorConfig::default(), &engine as &dyn Engine).unwrap();
    assert_eq!(report.to_string(), "Resonant frequency = 1591.5 Hz\nFactor of quality = 4.0");

    // Pass-band peak sits at the resonant frequency with unity gain.
    let gain = report.pass_band.gain_db("out").unwrap();
    let (peak, _) = gain
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &g)| if g > best.1 { (i, g) } else { best });
    let f_peak = report.pass_band.frequency[peak];
    assert!((f_peak / report.resonant_frequency.value()).log10().abs() < 0.01);
    assert!(gain[peak].abs() < 0.01);
}
