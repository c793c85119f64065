//! The two textbook demonstrations: RLC filter Bode diagrams and Millman's theorem.

use std::fmt;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::info;
use ndarray::Array1;

use crate::analysis::{AcAnalysis, AnalysisResult, OperatingPoint};
use crate::bode::{BodeDiagram, BodeSeries, LineStyle, Marker, PlotColor, SeriesStyle};
use crate::circuit::{Circuit, Sinusoid};
use crate::ngspice::NgspiceEngine;
use crate::simulator::{AcSweep, Analysis, Engine, Simulator, SimulatorConfig, Variation};
use crate::theory::{millman_current_shift, millman_voltage, quality_factor, resonant_frequency};
use crate::units::{kilo, micro, milli, Farads, Henries, Hertz, Ohms};

/// Series resistance and output node of each low-pass branch, Q = 0.5, 1, 2, 4.
pub const LOW_PASS_BRANCHES: [(f64, &str); 4] = [(200.0, "out5"), (100.0, "out1"), (50.0, "out2"), (25.0, "out4")];

/// Series resistance of the pass-band filter, Q = 4.
pub const PASS_BAND_RESISTANCE: f64 = 25.0;

pub const MILLMAN_BRANCHES: usize = 3;

/// Node shared by every Millman branch.
pub const MILLMAN_NODE: &str = "A";

/// Names accepted by [`demo_circuit`].
pub const DEMO_CIRCUITS: [&str; 4] = ["rlc-filter", "pass-band", "millman", "millman-current"];

pub fn default_inductance() -> Henries {
    Henries(milli(10.0))
}

pub fn default_capacitance() -> Farads {
    Farads(micro(1.0))
}

/// Four double-pole low-pass filters fed by one sinusoidal source.
pub fn four_rlc_filters(inductance: Henries, capacitance: Farads) -> Circuit {
    let mut circuit = Circuit::new("Four double-pole Low-Pass RLC Filter");
    let gnd = circuit.gnd();

    circuit.sinusoidal_source("input", "in", &gnd, Sinusoid::with_amplitude(1));
    for (k, &(resistance, output)) in LOW_PASS_BRANCHES.iter().enumerate() {
        let k = k + 1;
        circuit.resistor(k, "in", k.to_string(), resistance);
        circuit.inductor(k, k.to_string(), output, inductance);
        circuit.capacitor(k, output, &gnd, capacitance);
    }
    circuit
}

pub fn pass_band_filter(inductance: Henries, capacitance: Farads) -> Circuit {
    let mut circuit = Circuit::new("Pass-Band RLC Filter");
    let gnd = circuit.gnd();

    circuit.sinusoidal_source("input", "in", &gnd, Sinusoid::with_amplitude(1));
    circuit.inductor(1, "in", 2, inductance);
    circuit.capacitor(1, 2, "out", capacitance);
    circuit.resistor(1, "out", &gnd, PASS_BAND_RESISTANCE);
    circuit
}

/// 100 Hz to 10 kHz, 100 points per decade.
///
/// Both ends are included, so the sweep yields 201 samples.
pub fn filter_sweep() -> AcSweep {
    AcSweep::new(100, kilo(10.0), 100, Variation::Decade)
}

/// Branch `i` carries an `i` V source behind an `i` kΩ resistor into the shared node.
pub fn millman_circuit(branches: usize) -> Circuit {
    let mut circuit = Circuit::new("Millman's theorem");
    let gnd = circuit.gnd();

    for i in 1..=branches {
        circuit.voltage_source(format!("input{}", i), i.to_string(), &gnd, i as f64);
        circuit.resistor(i, i.to_string(), MILLMAN_NODE, kilo(i as f64));
    }
    circuit
}

/// Extend a Millman circuit with `branches` current-source branches.
///
/// Branch `i` pushes `100·i` µA from ground into node `branches + i`, which
/// reaches the shared node through an `i` kΩ resistor.
pub fn add_current_branches(circuit: &mut Circuit, branches: usize) {
    let gnd = circuit.gnd();
    for i in 1..=branches {
        let node = (branches + i).to_string();
        circuit.current_source(format!("input{}", i), &gnd, &node, micro(100.0 * i as f64));
        circuit.resistor(branches + i, &node, MILLMAN_NODE, kilo(i as f64));
    }
}

/// Build one of the demonstration circuits by name.
pub fn demo_circuit(name: &str) -> Result<Circuit> {
    match name {
        "rlc-filter" => Ok(four_rlc_filters(default_inductance(), default_capacitance())),
        "pass-band" => Ok(pass_band_filter(default_inductance(), default_capacitance())),
        "millman" => Ok(millman_circuit(MILLMAN_BRANCHES)),
        "millman-current" => {
            let mut circuit = millman_circuit(MILLMAN_BRANCHES);
            add_current_branches(&mut circuit, MILLMAN_BRANCHES);
            Ok(circuit)
        }
        _ => Err(anyhow!(
            "Unknown demo circuit '{}', expected one of: {}",
            name,
            DEMO_CIRCUITS.join(", ")
        )),
    }
}

/// Complete deck of a demonstration circuit with the analysis its demo runs.
pub fn demo_deck(name: &str, config: &SimulatorConfig) -> Result<String> {
    let circuit = demo_circuit(name)?;
    let analysis = match name {
        "rlc-filter" | "pass-band" => Analysis::Ac(filter_sweep()),
        _ => Analysis::OperatingPoint,
    };
    let deck = circuit.simulator(config.clone()).deck(&analysis);
    Ok(deck)
}

/// Outcome of the RLC filter demonstration.
#[derive(Debug, Clone)]
pub struct RlcFilterReport {
    pub resonant_frequency: Hertz,
    /// Q of the 25 Ω low-pass branch.
    pub quality_factor: f64,
    pub low_pass: AcAnalysis,
    pub pass_band: AcAnalysis,
}

impl RlcFilterReport {
    /// Low-pass outputs in blue, pass-band output in magenta, f0 marked in red.
    pub fn bode_diagram(&self) -> Result<BodeDiagram> {
        let mut diagram = BodeDiagram::new("Bode Diagrams of RLC Filters");
        for &(_, output) in LOW_PASS_BRANCHES.iter() {
            let style = SeriesStyle::new(Marker::Dot, PlotColor::Blue, LineStyle::Solid);
            diagram.add_series(BodeSeries::from_analysis(&self.low_pass, output, style)?);
        }
        let style = SeriesStyle::new(Marker::Dot, PlotColor::Magenta, LineStyle::Solid);
        diagram.add_series(BodeSeries::from_analysis(&self.pass_band, "out", style)?);
        diagram.add_reference_line(self.resonant_frequency.value());
        Ok(diagram)
    }

    pub fn results(&self) -> Vec<(String, AnalysisResult)> {
        vec![
            ("low-pass".to_string(), AnalysisResult::Ac(self.low_pass.clone())),
            ("pass-band".to_string(), AnalysisResult::Ac(self.pass_band.clone())),
        ]
    }
}

impl fmt::Display for RlcFilterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Resonant frequency = {:.1} Hz", self.resonant_frequency.value())?;
        write!(f, "Factor of quality = {:.1}", self.quality_factor)
    }
}

/// Run the RLC filter demonstration through `engine`.
pub fn rlc_filter(config: &SimulatorConfig, engine: &dyn Engine) -> Result<RlcFilterReport> {
    let inductance = default_inductance();
    let capacitance = default_capacitance();

    let low_pass_circuit = four_rlc_filters(inductance, capacitance);
    let low_pass = Simulator::with_engine(&low_pass_circuit, config.clone(), engine)
        .ac(filter_sweep())
        .with_context(|| format!("AC analysis of '{}' failed", low_pass_circuit.title))?;

    let r4 = low_pass_circuit
        .component("R4")
        .and_then(|component| component.resistance())
        .unwrap_or(Ohms(LOW_PASS_BRANCHES[3].0));

    let pass_band_circuit = pass_band_filter(inductance, capacitance);
    let pass_band = Simulator::with_engine(&pass_band_circuit, config.clone(), engine)
        .ac(filter_sweep())
        .with_context(|| format!("AC analysis of '{}' failed", pass_band_circuit.title))?;

    Ok(RlcFilterReport {
        resonant_frequency: resonant_frequency(inductance, capacitance),
        quality_factor: quality_factor(r4, inductance, capacitance),
        low_pass,
        pass_band,
    })
}

/// Run the RLC filter demonstration with ngspice, optionally saving the Bode diagram.
pub fn run_rlc_filter(config: &SimulatorConfig, plot: Option<&Path>) -> Result<RlcFilterReport> {
    let engine = NgspiceEngine::new(config.engine.clone());
    let report = rlc_filter(config, &engine)?;
    if let Some(path) = plot {
        report
            .bode_diagram()?
            .save_svg(path)
            .with_context(|| format!("Failed to save Bode diagram to {}", path.display()))?;
    }
    Ok(report)
}

/// One simulation of the Millman circuit next to its closed-form prediction.
#[derive(Debug, Clone)]
pub struct MillmanStage {
    pub simulated: f64,
    pub theoretical: f64,
    pub operating_point: OperatingPoint,
}

impl MillmanStage {
    pub fn relative_error(&self) -> f64 {
        ((self.simulated - self.theoretical) / self.theoretical).abs()
    }
}

impl fmt::Display for MillmanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Node {}: {:5.2} V", MILLMAN_NODE.to_lowercase(), self.simulated)?;
        write!(f, "V({}) = {:5.2} V", MILLMAN_NODE, self.theoretical)
    }
}

#[derive(Debug, Clone)]
pub struct MillmanReport {
    pub voltage_sources: MillmanStage,
    pub with_current_sources: MillmanStage,
    /// Shift the current sources should cause: Σ Ik / Σ 1/Ri.
    pub current_shift: f64,
}

impl MillmanReport {
    pub fn results(&self) -> Vec<(String, AnalysisResult)> {
        vec![
            (
                "voltage-sources".to_string(),
                AnalysisResult::OperatingPoint(self.voltage_sources.operating_point.clone()),
            ),
            (
                "current-sources".to_string(),
                AnalysisResult::OperatingPoint(self.with_current_sources.operating_point.clone()),
            ),
        ]
    }
}

impl fmt::Display for MillmanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.voltage_sources)?;
        write!(f, "{}", self.with_current_sources)
    }
}

/// Run Millman's theorem on voltage branches, then on the same circuit with
/// current branches added.
pub fn millman(config: &SimulatorConfig, engine: &dyn Engine) -> Result<MillmanReport> {
    let branch_voltages = Array1::from_iter((1..=MILLMAN_BRANCHES).map(|i| i as f64));
    let branch_resistances = branch_voltages.mapv(kilo);
    let source_currents = branch_voltages.mapv(|i| micro(100.0 * i));

    let mut circuit = millman_circuit(MILLMAN_BRANCHES);
    let operating_point = Simulator::with_engine(&circuit, config.clone(), engine)
        .operating_point()
        .context("Operating point of the voltage branches failed")?;
    let theoretical = millman_voltage(&branch_voltages, &branch_resistances, &Array1::zeros(0))?;
    let voltage_sources = MillmanStage {
        simulated: operating_point.node(MILLMAN_NODE)?,
        theoretical: theoretical.value(),
        operating_point,
    };

    add_current_branches(&mut circuit, MILLMAN_BRANCHES);
    let operating_point = Simulator::with_engine(&circuit, config.clone(), engine)
        .operating_point()
        .context("Operating point with current branches failed")?;
    let theoretical = millman_voltage(&branch_voltages, &branch_resistances, &source_currents)?;
    let with_current_sources = MillmanStage {
        simulated: operating_point.node(MILLMAN_NODE)?,
        theoretical: theoretical.value(),
        operating_point,
    };

    let current_shift = millman_current_shift(&branch_resistances, &source_currents)?.value();
    info!(
        "Millman node moved by {:.6} V, expected {:.6} V",
        with_current_sources.simulated - voltage_sources.simulated,
        current_shift
    );

    Ok(MillmanReport {
        voltage_sources,
        with_current_sources,
        current_shift,
    })
}

pub fn run_millman(config: &SimulatorConfig) -> Result<MillmanReport> {
    let engine = NgspiceEngine::new(config.engine.clone());
    millman(config, &engine)
}
