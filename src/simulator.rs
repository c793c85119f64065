use std::cell::RefCell;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::analysis::{AcAnalysis, OperatingPoint};
use crate::circuit::Circuit;
use crate::error::{Result, SimulationError};
use crate::ngspice::{NgspiceConfig, NgspiceEngine};
use crate::rawfile::{parse_rawfile, PlotKind, RawPlot};
use crate::units::{Celsius, Hertz};

/// Something that turns a complete SPICE deck into result plots.
pub trait Engine {
    fn name(&self) -> &str;

    /// Run the deck to completion and return every plot produced.
    fn run(&self, deck: &str) -> Result<Vec<RawPlot>>;
}

/// Serves previously captured rawfiles instead of running a simulator.
///
/// Each run returns the next rawfile in order; once they are used up the
/// last one is served again. Every deck it was asked to run is kept.
pub struct ReplayEngine {
    rawfiles: Vec<Vec<u8>>,
    decks: RefCell<Vec<String>>,
}

impl ReplayEngine {
    pub fn new(rawfile: impl Into<Vec<u8>>) -> Self {
        ReplayEngine::sequence(vec![rawfile.into()])
    }

    pub fn sequence(rawfiles: Vec<Vec<u8>>) -> Self {
        ReplayEngine {
            rawfiles,
            decks: RefCell::new(Vec::new()),
        }
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(ReplayEngine::new(std::fs::read(path)?))
    }

    pub fn last_deck(&self) -> Option<String> {
        self.decks.borrow().last().cloned()
    }

    pub fn decks(&self) -> Vec<String> {
        self.decks.borrow().clone()
    }
}

impl Engine for ReplayEngine {
    fn name(&self) -> &str {
        "replay"
    }

    fn run(&self, deck: &str) -> Result<Vec<RawPlot>> {
        let mut decks = self.decks.borrow_mut();
        let index = decks.len().min(self.rawfiles.len().saturating_sub(1));
        decks.push(deck.to_string());
        let rawfile = self
            .rawfiles
            .get(index)
            .ok_or_else(|| SimulationError::RawfileParse("replay engine holds no rawfile".to_string()))?;
        parse_rawfile(rawfile)
    }
}

impl<E: Engine + ?Sized> Engine for &E {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run(&self, deck: &str) -> Result<Vec<RawPlot>> {
        (**self).run(deck)
    }
}

/// Point spacing of an AC sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variation {
    /// `points` per decade.
    Decade,
    /// `points` per octave.
    Octave,
    /// `points` in total.
    Linear,
}

impl Variation {
    pub fn keyword(&self) -> &'static str {
        match self {
            Variation::Decade => "dec",
            Variation::Octave => "oct",
            Variation::Linear => "lin",
        }
    }
}

impl FromStr for Variation {
    type Err = SimulationError;

    fn from_str(text: &str) -> Result<Self> {
        match text.to_lowercase().as_str() {
            "dec" | "decade" => Ok(Variation::Decade),
            "oct" | "octave" => Ok(Variation::Octave),
            "lin" | "linear" => Ok(Variation::Linear),
            _ => Err(SimulationError::InvalidSweep(format!("unknown variation '{}'", text))),
        }
    }
}

impl fmt::Display for Variation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// Small-signal frequency sweep parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcSweep {
    pub start: Hertz,
    pub stop: Hertz,
    pub points: usize,
    pub variation: Variation,
}

impl AcSweep {
    pub fn new(start: impl Into<Hertz>, stop: impl Into<Hertz>, points: usize, variation: Variation) -> Self {
        AcSweep {
            start: start.into(),
            stop: stop.into(),
            points,
            variation,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let (start, stop) = (self.start.value(), self.stop.value());
        if !(start.is_finite() && start > 0.0) {
            return Err(SimulationError::InvalidSweep(format!("start frequency must be positive, got {}", start)));
        }
        if !(stop.is_finite() && stop > start) {
            return Err(SimulationError::InvalidSweep(format!(
                "stop frequency {} must be above start frequency {}",
                stop, start
            )));
        }
        if self.points == 0 {
            return Err(SimulationError::InvalidSweep("point count must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Number of samples the engine produces for this sweep.
    ///
    /// Logarithmic sweeps step by a constant ratio from `start` and include
    /// every point up to `stop`, so the count depends on the span.
    pub fn expected_points(&self) -> usize {
        let ratio = self.stop.value() / self.start.value();
        let intervals = match self.variation {
            Variation::Linear => return self.points,
            Variation::Decade => ratio.log10() * self.points as f64,
            Variation::Octave => ratio.log2() * self.points as f64,
        };
        (intervals + 1e-9).floor() as usize + 1
    }

    /// The `.ac` control card.
    pub fn card(&self) -> String {
        format!(
            ".ac {} {} {} {}",
            self.variation.keyword(),
            self.points,
            self.start.to_spice(),
            self.stop.to_spice()
        )
    }
}

/// Analysis requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Analysis {
    OperatingPoint,
    Ac(AcSweep),
}

impl Analysis {
    fn card(&self) -> String {
        match self {
            Analysis::OperatingPoint => ".op".to_string(),
            Analysis::Ac(sweep) => sweep.card(),
        }
    }

    fn plot_kind(&self) -> PlotKind {
        match self {
            Analysis::OperatingPoint => PlotKind::OperatingPoint,
            Analysis::Ac(_) => PlotKind::Ac,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub temperature: Celsius,
    pub nominal_temperature: Celsius,
    pub engine: NgspiceConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            temperature: Celsius(25.0),
            nominal_temperature: Celsius(25.0),
            engine: NgspiceConfig::default(),
        }
    }
}

/// Runs analyses of one circuit through an engine.
pub struct Simulator<'a> {
    circuit: &'a Circuit,
    config: SimulatorConfig,
    engine: Box<dyn Engine + 'a>,
}

impl<'a> Simulator<'a> {
    /// Create a simulator backed by ngspice.
    pub fn new(circuit: &'a Circuit, config: SimulatorConfig) -> Self {
        let engine = NgspiceEngine::new(config.engine.clone());
        Simulator::with_engine(circuit, config, engine)
    }

    pub fn with_engine(circuit: &'a Circuit, config: SimulatorConfig, engine: impl Engine + 'a) -> Self {
        Simulator {
            circuit,
            config,
            engine: Box::new(engine),
        }
    }

    pub fn circuit(&self) -> &Circuit {
        self.circuit
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// The complete deck handed to the engine for `analysis`.
    pub fn deck(&self, analysis: &Analysis) -> String {
        let mut deck = self.circuit.netlist();
        deck.push_str(&format!(
            ".options TEMP={} TNOM={}\n",
            self.config.temperature.to_spice(),
            self.config.nominal_temperature.to_spice()
        ));
        deck.push_str(&analysis.card());
        deck.push_str("\n.end\n");
        deck
    }

    /// Run a small-signal AC sweep.
    pub fn ac(&self, sweep: AcSweep) -> Result<AcAnalysis> {
        sweep.validate()?;
        info!(
            "Starting AC analysis of '{}': {} to {}, {} points ({})",
            self.circuit.title, sweep.start, sweep.stop, sweep.points, sweep.variation
        );

        let plot = self.run(&Analysis::Ac(sweep))?;
        let analysis = AcAnalysis::from_plot(&plot)?;
        analysis.ensure_nodes(self.circuit)?;

        if analysis.frequency.len() != sweep.expected_points() {
            warn!(
                "AC sweep returned {} points, expected {}",
                analysis.frequency.len(),
                sweep.expected_points()
            );
        }
        Ok(analysis)
    }

    /// Run a DC operating point analysis.
    pub fn operating_point(&self) -> Result<OperatingPoint> {
        info!("Starting operating point analysis of '{}'", self.circuit.title);

        let plot = self.run(&Analysis::OperatingPoint)?;
        let analysis = OperatingPoint::from_plot(&plot)?;
        analysis.ensure_nodes(self.circuit)?;
        Ok(analysis)
    }

    fn run(&self, analysis: &Analysis) -> Result<RawPlot> {
        self.circuit
            .validate()
            .map_err(|e| SimulationError::InvalidCircuit(e.to_string()))?;

        let deck = self.deck(analysis);
        debug!("Deck for {}:\n{}", self.engine.name(), deck);

        let start_time = Instant::now();
        let plots = self.engine.run(&deck)?;
        let wanted = analysis.plot_kind();
        let plot = plots
            .into_iter()
            .rev()
            .find(|plot| plot.kind() == wanted)
            .ok_or_else(|| {
                SimulationError::UnsupportedAnalysis(format!("{} returned no {:?} plot", self.engine.name(), wanted))
            })?;

        info!(
            "{:?} analysis completed in {:.3}ms",
            wanted,
            start_time.elapsed().as_secs_f64() * 1000.0
        );
        Ok(plot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Sinusoid;
    use crate::units::{kilo, micro, milli};

    fn divider() -> Circuit {
        let mut circuit = Circuit::new("Divider");
        circuit.voltage_source(1, "in", 0, 10);
        circuit.resistor(1, "in", "out", kilo(1.0));
        circuit.resistor(2, "out", 0, kilo(1.0));
        circuit
    }

    const DIVIDER_OP: &str = "Title: Divider
Plotname: Operating Point
Flags: real
No. Variables: 3
No. Points: 1
Variables:
\t0\tv(in)\tvoltage
\t1\tv(out)\tvoltage
\t2\tv1#branch\tcurrent
Values:
 0\t1.000000e+01
\t5.000000e+00
\t-5.000000e-03
";

    #[test]
    fn test_deck_layout() {
        let circuit = divider();
        let simulator = circuit.simulator(SimulatorConfig::default());
        let deck = simulator.deck(&Analysis::OperatingPoint);
        assert_eq!(
            deck,
            ".title Divider\nV1 in 0 DC 10\nR1 in out 1k\nR2 out 0 1k\n.options TEMP=25 TNOM=25\n.op\n.end\n"
        );
    }

    #[test]
    fn test_ac_card() {
        let sweep = AcSweep::new(100, kilo(10.0), 100, Variation::Decade);
        assert_eq!(sweep.card(), ".ac dec 100 100 10k");
        let sweep = AcSweep::new(1, 8, 4, "oct".parse().unwrap());
        assert_eq!(sweep.card(), ".ac oct 4 1 8");
    }

    #[test]
    fn test_expected_points() {
        assert_eq!(AcSweep::new(100, kilo(10.0), 100, Variation::Decade).expected_points(), 201);
        assert_eq!(AcSweep::new(100, kilo(10.0), 10, Variation::Decade).expected_points(), 21);
        assert_eq!(AcSweep::new(1, 8, 4, Variation::Octave).expected_points(), 13);
        assert_eq!(AcSweep::new(100, kilo(10.0), 100, Variation::Linear).expected_points(), 100);
    }

    #[test]
    fn test_sweep_validation() {
        assert!(AcSweep::new(0, 10, 10, Variation::Decade).validate().is_err());
        assert!(AcSweep::new(100, 10, 10, Variation::Decade).validate().is_err());
        assert!(AcSweep::new(10, 100, 0, Variation::Linear).validate().is_err());
        assert!(AcSweep::new(10, 100, 1, Variation::Linear).validate().is_ok());
        assert!("log".parse::<Variation>().is_err());
    }

    #[test]
    fn test_operating_point_through_replay() {
        let circuit = divider();
        let engine = ReplayEngine::new(DIVIDER_OP);
        let simulator = Simulator::with_engine(&circuit, SimulatorConfig::default(), &engine);
        let op = simulator.operating_point().unwrap();
        assert_eq!(op.node("out").unwrap(), 5.0);
        assert_eq!(op.node("0").unwrap(), 0.0);
        assert_eq!(op.branch("V1").unwrap(), -0.005);
        assert!(engine.last_deck().unwrap().contains("\n.op\n"));
    }

    #[test]
    fn test_wrong_plot_kind_is_rejected() {
        let circuit = divider();
        let simulator = Simulator::with_engine(&circuit, SimulatorConfig::default(), ReplayEngine::new(DIVIDER_OP));
        let result = simulator.ac(AcSweep::new(100, kilo(10.0), 10, Variation::Decade));
        assert!(matches!(result, Err(SimulationError::UnsupportedAnalysis(_))));
    }

    #[test]
    fn test_missing_node_is_an_error() {
        let mut circuit = divider();
        circuit.capacitor(1, "out", "tap", micro(1.0));
        let simulator = Simulator::with_engine(&circuit, SimulatorConfig::default(), ReplayEngine::new(DIVIDER_OP));
        assert!(matches!(
            simulator.operating_point(),
            Err(SimulationError::MissingSignal(_))
        ));
    }

    #[test]
    fn test_invalid_sweep_never_reaches_engine() {
        let mut circuit = Circuit::new("Filter");
        circuit.sinusoidal_source("input", "in", 0, Sinusoid::default());
        circuit.inductor(1, "in", "out", milli(10.0));
        let engine = ReplayEngine::new(DIVIDER_OP);
        let simulator = Simulator::with_engine(&circuit, SimulatorConfig::default(), &engine);
        assert!(simulator.ac(AcSweep::new(10, 1, 10, Variation::Linear)).is_err());
        assert!(engine.last_deck().is_none());
    }
}
