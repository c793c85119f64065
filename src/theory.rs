//! Closed-form results the simulations are checked against.

use std::f64::consts::PI;

use anyhow::{anyhow, Result};
use ndarray::Array1;

use crate::units::{Farads, Henries, Hertz, Ohms, Volts};

/// f0 = 1 / (2π√(LC)) of a series LC pair.
pub fn resonant_frequency(inductance: Henries, capacitance: Farads) -> Hertz {
    Hertz(1.0 / (2.0 * PI * (inductance.value() * capacitance.value()).sqrt()))
}

/// Q = (1/R)·√(L/C) of a series RLC branch.
pub fn quality_factor(resistance: Ohms, inductance: Henries, capacitance: Farads) -> f64 {
    1.0 / resistance.value() * (inductance.value() / capacitance.value()).sqrt()
}

fn conductances(resistances: &Array1<f64>) -> Result<Array1<f64>> {
    if resistances.is_empty() {
        return Err(anyhow!("Millman's theorem needs at least one resistive branch"));
    }
    if let Some(r) = resistances.iter().find(|&&r| r == 0.0) {
        return Err(anyhow!("Branch resistance of {} Ω has no conductance", r));
    }
    Ok(resistances.mapv(|r| 1.0 / r))
}

/// Voltage of the node shared by all branches.
///
/// V = (Σ Vi/Ri + Σ Ik) / Σ 1/Ri. Branches that only carry a current source
/// contribute to the numerator; their series resistance does not appear.
pub fn millman_voltage(
    branch_voltages: &Array1<f64>,
    branch_resistances: &Array1<f64>,
    source_currents: &Array1<f64>,
) -> Result<Volts> {
    if branch_voltages.len() != branch_resistances.len() {
        return Err(anyhow!(
            "{} branch voltages for {} branch resistances",
            branch_voltages.len(),
            branch_resistances.len()
        ));
    }
    let conductances = conductances(branch_resistances)?;
    let numerator = (branch_voltages * &conductances).sum() + source_currents.sum();
    Ok(Volts(numerator / conductances.sum()))
}

/// Shift of the Millman voltage caused by current sources alone: Σ Ik / Σ 1/Ri.
pub fn millman_current_shift(branch_resistances: &Array1<f64>, source_currents: &Array1<f64>) -> Result<Volts> {
    let conductances = conductances(branch_resistances)?;
    Ok(Volts(source_currents.sum() / conductances.sum()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{kilo, micro, milli};
    use ndarray::array;

    #[test]
    fn test_resonant_frequency() {
        let f0 = resonant_frequency(Henries(milli(10.0)), Farads(micro(1.0)));
        assert!((f0.value() - 1591.549430918953).abs() < 1e-6);
        assert_eq!(format!("{:.1}", f0.value()), "1591.5");
    }

    #[test]
    fn test_quality_factor() {
        let inductance = Henries(milli(10.0));
        let capacitance = Farads(micro(1.0));
        assert!((quality_factor(Ohms(25.0), inductance, capacitance) - 4.0).abs() < 1e-12);
        assert!((quality_factor(Ohms(50.0), inductance, capacitance) - 2.0).abs() < 1e-12);
        assert!((quality_factor(Ohms(100.0), inductance, capacitance) - 1.0).abs() < 1e-12);
        assert!((quality_factor(Ohms(200.0), inductance, capacitance) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_millman_voltage_sources_only() {
        let voltages = array![1.0, 2.0, 3.0];
        let resistances = voltages.mapv(kilo);
        let v = millman_voltage(&voltages, &resistances, &Array1::zeros(0)).unwrap();
        let expected = (1.0 / 1000.0 + 2.0 / 2000.0 + 3.0 / 3000.0) / (1.0 / 1000.0 + 1.0 / 2000.0 + 1.0 / 3000.0);
        assert!((v.value() - expected).abs() < 1e-12);
        assert_eq!(format!("{:5.2}", v.value()), " 1.64");
    }

    #[test]
    fn test_current_sources_shift() {
        let voltages = array![1.0, 2.0, 3.0];
        let resistances = voltages.mapv(kilo);
        let currents = array![1.0, 2.0, 3.0].mapv(|i: f64| micro(100.0 * i));

        let base = millman_voltage(&voltages, &resistances, &Array1::zeros(0)).unwrap();
        let with_currents = millman_voltage(&voltages, &resistances, &currents).unwrap();
        let shift = millman_current_shift(&resistances, &currents).unwrap();

        assert!((with_currents.value() - base.value() - shift.value()).abs() < 1e-12);
        assert!((shift.value() - 600e-6 / (11.0 / 6000.0)).abs() < 1e-12);
        assert_eq!(format!("{:5.2}", with_currents.value()), " 1.96");
    }

    #[test]
    fn test_domain_errors() {
        let zero = array![0.0, 1000.0];
        assert!(millman_voltage(&array![1.0, 2.0], &zero, &Array1::zeros(0)).is_err());
        assert!(millman_voltage(&array![1.0], &array![1.0, 2.0], &Array1::zeros(0)).is_err());
        assert!(millman_current_shift(&Array1::zeros(0), &array![1e-3]).is_err());
    }
}
