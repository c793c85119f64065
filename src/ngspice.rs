//! ngspice process runner.
//!
//! Decks are written to a private temp directory and run with
//! `ngspice -b -r <raw> <deck>`. The rawfile is requested in ASCII through
//! `SPICE_ASCIIRAWFILE`, though the reader accepts binary too. The call blocks
//! until ngspice exits unless a timeout is configured.

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;

use crate::error::{Result, SimulationError};
use crate::rawfile::{parse_rawfile, RawPlot};
use crate::simulator::Engine;

lazy_static! {
    static ref ERROR_LINE: Regex = Regex::new(r"(?im)^\s*(error\b.*)$").unwrap();
}

/// Lines of stderr kept in a failure message when ngspice printed no `Error` line.
const STDERR_TAIL: usize = 20;

/// Configuration for the ngspice runner.
#[derive(Debug, Clone)]
pub struct NgspiceConfig {
    /// Path to ngspice executable (default: "ngspice" in PATH).
    pub executable: String,
    /// Kill ngspice after this long. `None` waits for as long as it takes.
    pub timeout: Option<Duration>,
    /// Leave the deck, rawfile and logs on disk after the run.
    pub keep_files: bool,
}

impl Default for NgspiceConfig {
    fn default() -> Self {
        NgspiceConfig {
            executable: "ngspice".to_string(),
            timeout: None,
            keep_files: false,
        }
    }
}

/// Check if ngspice is available.
pub fn is_ngspice_available(config: &NgspiceConfig) -> bool {
    Command::new(&config.executable)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Get ngspice version string.
pub fn ngspice_version(config: &NgspiceConfig) -> Result<String> {
    let output = Command::new(&config.executable)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| SimulationError::EngineNotFound(format!("{}: {}", config.executable, e)))?;

    if !output.status.success() {
        return Err(SimulationError::EngineNotFound(format!(
            "{} --version exited with {}",
            config.executable, output.status
        )));
    }

    let version = String::from_utf8_lossy(&output.stdout);
    Ok(version
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("unknown")
        .trim()
        .to_string())
}

/// Extract `Error ...` lines from ngspice's console output.
pub fn error_lines(output: &str) -> Vec<String> {
    ERROR_LINE
        .captures_iter(output)
        .map(|captures| captures[1].trim().to_string())
        .collect()
}

fn diagnostics(stdout: &str, stderr: &str) -> String {
    let mut lines = error_lines(stderr);
    lines.extend(error_lines(stdout));
    if lines.is_empty() {
        let tail: Vec<&str> = stderr.lines().rev().take(STDERR_TAIL).collect();
        lines = tail.into_iter().rev().map(str::to_string).collect();
    }
    if lines.is_empty() {
        "no diagnostics".to_string()
    } else {
        lines.join("\n")
    }
}

fn read_log(path: &Path) -> String {
    fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Runs ngspice in batch mode and reads back its rawfile.
#[derive(Debug, Clone, Default)]
pub struct NgspiceEngine {
    config: NgspiceConfig,
}

impl NgspiceEngine {
    pub fn new(config: NgspiceConfig) -> Self {
        NgspiceEngine { config }
    }

    pub fn config(&self) -> &NgspiceConfig {
        &self.config
    }

    fn spawn(&self, deck_path: &Path, raw_path: &Path, stdout: File, stderr: File) -> Result<Child> {
        debug!(
            "Running {} -b -r {} {}",
            self.config.executable,
            raw_path.display(),
            deck_path.display()
        );

        Command::new(&self.config.executable)
            .arg("-b")
            .arg("-r")
            .arg(raw_path)
            .arg(deck_path)
            .env("SPICE_ASCIIRAWFILE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    SimulationError::EngineNotFound(format!("{}: {}", self.config.executable, e))
                }
                _ => SimulationError::Io(e),
            })
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus> {
        match self.config.timeout {
            None => Ok(child.wait()?),
            Some(timeout) => wait_with_timeout(child, timeout),
        }
    }
}

/// Wait for a child process with timeout.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<ExitStatus> {
    let start = Instant::now();
    let poll_interval = Duration::from_millis(50);

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SimulationError::Timeout(timeout));
        }
        thread::sleep(poll_interval);
    }
}

impl Engine for NgspiceEngine {
    fn name(&self) -> &str {
        "ngspice"
    }

    fn run(&self, deck: &str) -> Result<Vec<RawPlot>> {
        let workdir = tempfile::Builder::new().prefix("spicelab-").tempdir()?;
        let deck_path = workdir.path().join("deck.cir");
        let raw_path = workdir.path().join("output.raw");
        let stdout_path = workdir.path().join("stdout.log");
        let stderr_path = workdir.path().join("stderr.log");

        fs::write(&deck_path, deck)?;
        let stdout = File::create(&stdout_path)?;
        let stderr = File::create(&stderr_path)?;

        let start = Instant::now();
        let mut child = self.spawn(&deck_path, &raw_path, stdout, stderr)?;
        let status = self.wait(&mut child)?;
        debug!("ngspice exited with {} after {:.3}s", status, start.elapsed().as_secs_f64());

        let stdout_text = read_log(&stdout_path);
        let stderr_text = read_log(&stderr_path);
        for line in error_lines(&stdout_text).iter().chain(error_lines(&stderr_text).iter()) {
            warn!("ngspice: {}", line);
        }

        if self.config.keep_files {
            let kept = workdir.keep();
            info!("Kept ngspice files in {}", kept.display());
        }

        if !status.success() {
            return Err(SimulationError::EngineFailed {
                status: status.to_string(),
                diagnostics: diagnostics(&stdout_text, &stderr_text),
            });
        }

        let raw_data = fs::read(&raw_path).unwrap_or_default();
        if raw_data.is_empty() {
            return Err(SimulationError::EngineFailed {
                status: "no rawfile written".to_string(),
                diagnostics: diagnostics(&stdout_text, &stderr_text),
            });
        }

        parse_rawfile(&raw_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NgspiceConfig::default();
        assert_eq!(config.executable, "ngspice");
        assert!(config.timeout.is_none());
        assert!(!config.keep_files);
    }

    #[test]
    fn test_error_lines() {
        let output = "Circuit: bad\n\nError: unknown subckt: x1\n  error on line 3 : r1 a\nDone.\n";
        assert_eq!(
            error_lines(output),
            vec!["Error: unknown subckt: x1".to_string(), "error on line 3 : r1 a".to_string()]
        );
        assert!(error_lines("all good\n").is_empty());
    }

    #[test]
    fn test_diagnostics_fall_back_to_stderr_tail() {
        assert_eq!(diagnostics("", "warning one\nwarning two\n"), "warning one\nwarning two");
        assert_eq!(diagnostics("", ""), "no diagnostics");
    }

    #[test]
    fn test_missing_executable() {
        let engine = NgspiceEngine::new(NgspiceConfig {
            executable: "spicelab-no-such-ngspice".to_string(),
            ..NgspiceConfig::default()
        });
        assert!(!is_ngspice_available(engine.config()));
        assert!(matches!(
            engine.run(".title x\nR1 1 0 1\n.op\n.end\n"),
            Err(SimulationError::EngineNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_keep_files_survive_a_run() {
        let engine = NgspiceEngine::new(NgspiceConfig {
            executable: "true".to_string(),
            keep_files: true,
            ..NgspiceConfig::default()
        });
        let deck = format!(".title kept files {}\n.end\n", std::process::id());

        match engine.run(&deck) {
            Err(SimulationError::EngineFailed { status, .. }) => assert_eq!(status, "no rawfile written"),
            other => panic!("expected a missing rawfile, got {:?}", other),
        }

        let kept: Vec<_> = fs::read_dir(std::env::temp_dir())
            .unwrap()
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.file_name().map_or(false, |name| name.to_string_lossy().starts_with("spicelab-")))
            .filter(|path| fs::read_to_string(path.join("deck.cir")).map_or(false, |text| text == deck))
            .collect();
        assert_eq!(kept.len(), 1);
        fs::remove_dir_all(&kept[0]).unwrap();
    }

    #[test]
    #[ignore] // Requires ngspice to be installed
    fn test_ngspice_version() {
        let config = NgspiceConfig::default();
        if is_ngspice_available(&config) {
            let version = ngspice_version(&config).unwrap();
            assert!(!version.is_empty());
        }
    }

    #[test]
    #[ignore] // Requires ngspice to be installed
    fn test_run_voltage_divider() {
        let engine = NgspiceEngine::default();
        let deck = ".title Voltage Divider\nV1 1 0 DC 10\nR1 1 2 1k\nR2 2 0 1k\n.op\n.end\n";
        let plots = engine.run(deck).unwrap();
        let plot = plots.last().unwrap();
        let index = plot
            .variables
            .iter()
            .position(|v| v.signal() == crate::rawfile::Signal::Node("2".to_string()))
            .unwrap();
        assert!((plot.real_column(index)[0] - 5.0).abs() < 1e-9);
    }
}
