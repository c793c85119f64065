//! Analysis results addressable by node name.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;
use ndarray::Array1;
use num_complex::Complex64;
use serde::{Serialize, Serializer};

use crate::circuit::{node_key, Circuit, GROUND};
use crate::cli::OutputFormat;
use crate::error::{Result, SimulationError};
use crate::rawfile::{RawPlot, Signal};

fn missing(kind: &str, name: &str) -> SimulationError {
    SimulationError::MissingSignal(format!("{} '{}'", kind, name))
}

/// DC operating point: one real value per node and per branch.
#[derive(Debug, Clone, Serialize)]
pub struct OperatingPoint {
    pub title: String,
    nodes: BTreeMap<String, f64>,
    branches: BTreeMap<String, f64>,
}

impl OperatingPoint {
    pub fn from_plot(plot: &RawPlot) -> Result<Self> {
        if plot.num_points == 0 {
            return Err(SimulationError::RawfileParse("operating point plot has no data".to_string()));
        }

        let mut nodes = BTreeMap::new();
        let mut branches = BTreeMap::new();
        for (index, variable) in plot.variables.iter().enumerate() {
            let value = plot.real_column(index)[0];
            match variable.signal() {
                Signal::Node(name) => {
                    nodes.insert(name, value);
                }
                Signal::Branch(name) => {
                    branches.insert(name, value);
                }
                _ => {}
            }
        }
        nodes.insert(GROUND.to_string(), 0.0);

        Ok(OperatingPoint {
            title: plot.title.clone(),
            nodes,
            branches,
        })
    }

    /// Voltage of a node; ground aliases read as 0 V.
    pub fn node(&self, name: &str) -> Result<f64> {
        self.nodes
            .get(&node_key(name))
            .copied()
            .ok_or_else(|| missing("node", name))
    }

    /// Current through a voltage source or inductor, by SPICE name.
    pub fn branch(&self, name: &str) -> Result<f64> {
        self.branches
            .get(&name.to_lowercase())
            .copied()
            .ok_or_else(|| missing("branch", name))
    }

    pub fn nodes(&self) -> &BTreeMap<String, f64> {
        &self.nodes
    }

    pub fn branches(&self) -> &BTreeMap<String, f64> {
        &self.branches
    }

    /// Fail unless every node of `circuit` has a value.
    pub fn ensure_nodes(&self, circuit: &Circuit) -> Result<()> {
        for node in &circuit.nodes {
            self.node(&node.name)?;
        }
        Ok(())
    }

    fn write_csv<W: Write>(&self, writer: W) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_writer(writer);

        let mut header = Vec::new();
        let mut record = Vec::new();
        for (name, value) in &self.nodes {
            header.push(format!("V({})", name));
            record.push(value.to_string());
        }
        for (name, value) in &self.branches {
            header.push(format!("I({})", name));
            record.push(value.to_string());
        }
        writer.write_record(&header)?;
        writer.write_record(&record)?;
        writer.flush()?;
        Ok(())
    }
}

/// Small-signal AC sweep: a complex waveform per node over frequency.
#[derive(Debug, Clone)]
pub struct AcAnalysis {
    pub title: String,
    pub frequency: Array1<f64>,
    nodes: BTreeMap<String, Array1<Complex64>>,
    branches: BTreeMap<String, Array1<Complex64>>,
}

impl AcAnalysis {
    pub fn from_plot(plot: &RawPlot) -> Result<Self> {
        let scale = plot
            .scale_index()
            .ok_or_else(|| SimulationError::RawfileParse("AC plot has no frequency column".to_string()))?;
        let frequency = Array1::from(plot.real_column(scale).to_vec());

        let mut nodes = BTreeMap::new();
        let mut branches = BTreeMap::new();
        for (index, variable) in plot.variables.iter().enumerate() {
            match variable.signal() {
                Signal::Node(name) => {
                    nodes.insert(name, Array1::from(plot.complex_column(index)));
                }
                Signal::Branch(name) => {
                    branches.insert(name, Array1::from(plot.complex_column(index)));
                }
                _ => {}
            }
        }
        nodes.insert(
            GROUND.to_string(),
            Array1::from_elem(frequency.len(), Complex64::new(0.0, 0.0)),
        );

        Ok(AcAnalysis {
            title: plot.title.clone(),
            frequency,
            nodes,
            branches,
        })
    }

    /// Complex voltage of a node at every swept frequency.
    pub fn node(&self, name: &str) -> Result<&Array1<Complex64>> {
        self.nodes.get(&node_key(name)).ok_or_else(|| missing("node", name))
    }

    pub fn branch(&self, name: &str) -> Result<&Array1<Complex64>> {
        self.branches
            .get(&name.to_lowercase())
            .ok_or_else(|| missing("branch", name))
    }

    /// 20·log10|H| of a node.
    pub fn gain_db(&self, name: &str) -> Result<Array1<f64>> {
        Ok(self.node(name)?.mapv(|h| 20.0 * h.norm().log10()))
    }

    /// arg(H) of a node, in radians.
    pub fn phase(&self, name: &str) -> Result<Array1<f64>> {
        Ok(self.node(name)?.mapv(|h| h.arg()))
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Fail unless every node of `circuit` has a waveform.
    pub fn ensure_nodes(&self, circuit: &Circuit) -> Result<()> {
        for node in &circuit.nodes {
            self.node(&node.name)?;
        }
        Ok(())
    }

    fn write_csv<W: Write>(&self, writer: W) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_writer(writer);

        let mut header = vec!["frequency".to_string()];
        for name in self.nodes.keys() {
            for suffix in ["re", "im", "db", "phase"] {
                header.push(format!("V({})_{}", name, suffix));
            }
        }
        for name in self.branches.keys() {
            header.push(format!("I({})_re", name));
            header.push(format!("I({})_im", name));
        }
        writer.write_record(&header)?;

        for (i, &frequency) in self.frequency.iter().enumerate() {
            let mut record = vec![frequency.to_string()];
            for values in self.nodes.values() {
                let h = values[i];
                record.push(h.re.to_string());
                record.push(h.im.to_string());
                record.push((20.0 * h.norm().log10()).to_string());
                record.push(h.arg().to_string());
            }
            for values in self.branches.values() {
                record.push(values[i].re.to_string());
                record.push(values[i].im.to_string());
            }
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct ComplexSeries {
    re: Vec<f64>,
    im: Vec<f64>,
    gain_db: Vec<f64>,
    phase_rad: Vec<f64>,
}

impl ComplexSeries {
    fn new(values: &Array1<Complex64>) -> Self {
        ComplexSeries {
            re: values.iter().map(|h| h.re).collect(),
            im: values.iter().map(|h| h.im).collect(),
            gain_db: values.iter().map(|h| 20.0 * h.norm().log10()).collect(),
            phase_rad: values.iter().map(|h| h.arg()).collect(),
        }
    }
}

#[derive(Serialize)]
struct AcRecord<'a> {
    title: &'a str,
    frequency: Vec<f64>,
    nodes: BTreeMap<&'a str, ComplexSeries>,
    branches: BTreeMap<&'a str, ComplexSeries>,
}

impl Serialize for AcAnalysis {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        AcRecord {
            title: &self.title,
            frequency: self.frequency.to_vec(),
            nodes: self
                .nodes
                .iter()
                .map(|(name, values)| (name.as_str(), ComplexSeries::new(values)))
                .collect(),
            branches: self
                .branches
                .iter()
                .map(|(name, values)| (name.as_str(), ComplexSeries::new(values)))
                .collect(),
        }
        .serialize(serializer)
    }
}

/// Either kind of result, for export.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "analysis", rename_all = "snake_case")]
pub enum AnalysisResult {
    OperatingPoint(OperatingPoint),
    Ac(AcAnalysis),
}

impl AnalysisResult {
    fn write_csv<W: Write>(&self, writer: W) -> anyhow::Result<()> {
        match self {
            AnalysisResult::OperatingPoint(op) => op.write_csv(writer),
            AnalysisResult::Ac(ac) => ac.write_csv(writer),
        }
    }
}

/// CSV holds one table, so each labelled result gets `<stem>-<label>.csv`.
fn csv_path(path: &Path, label: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".to_string());
    path.with_file_name(format!("{}-{}.csv", stem, label))
}

/// Export labelled results; returns the files written.
pub fn export_results(results: &[(String, AnalysisResult)], path: &Path, format: OutputFormat) -> anyhow::Result<Vec<PathBuf>> {
    match format {
        OutputFormat::Csv => {
            let mut written = Vec::new();
            for (label, result) in results {
                let file_path = csv_path(path, label);
                result.write_csv(File::create(&file_path)?)?;
                info!("Results exported to CSV: {}", file_path.display());
                written.push(file_path);
            }
            Ok(written)
        }
        OutputFormat::Json => {
            let document: BTreeMap<&str, &AnalysisResult> =
                results.iter().map(|(label, result)| (label.as_str(), result)).collect();
            let file = File::create(path)?;
            serde_json::to_writer_pretty(file, &document)?;
            info!("Results exported to JSON: {}", path.display());
            Ok(vec![path.to_path_buf()])
        }
    }
}
