//! Unit-tagged circuit quantities and SPICE value notation.
//!
//! Component values travel through the builder as newtypes so a capacitance
//! can never be handed to a resistor by accident. Rendering into a deck uses
//! the SPICE scale suffixes (`10m`, `1u`, `1meg`) without unit letters, since
//! a trailing `F` would read as femto.

use std::fmt;

use anyhow::{anyhow, Result};
use nom::{
    bytes::complete::take_while,
    character::complete::space0,
    combinator::all_consuming,
    number::complete::double,
    sequence::{delimited, pair},
    IResult,
};
use serde::{Deserialize, Serialize};

/// SPICE scale suffixes, longest first so `meg` wins over `m`.
const SPICE_SCALES: &[(&str, f64)] = &[
    ("meg", 1e6),
    ("mil", 25.4e-6),
    ("f", 1e-15),
    ("p", 1e-12),
    ("n", 1e-9),
    ("u", 1e-6),
    ("µ", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("g", 1e9),
    ("t", 1e12),
];

/// Engineering exponents used when formatting, with SPICE and display prefixes.
const ENGINEERING: &[(i32, &str, &str)] = &[
    (12, "t", "T"),
    (9, "g", "G"),
    (6, "meg", "M"),
    (3, "k", "k"),
    (0, "", ""),
    (-3, "m", "m"),
    (-6, "u", "µ"),
    (-9, "n", "n"),
    (-12, "p", "p"),
    (-15, "f", "f"),
];

pub fn tera(value: f64) -> f64 {
    value * 1e12
}

pub fn giga(value: f64) -> f64 {
    value * 1e9
}

pub fn mega(value: f64) -> f64 {
    value * 1e6
}

pub fn kilo(value: f64) -> f64 {
    value * 1e3
}

pub fn milli(value: f64) -> f64 {
    value * 1e-3
}

pub fn micro(value: f64) -> f64 {
    value * 1e-6
}

pub fn nano(value: f64) -> f64 {
    value * 1e-9
}

pub fn pico(value: f64) -> f64 {
    value * 1e-12
}

macro_rules! quantity {
    ($(#[$meta:meta])* $name:ident, $symbol:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
        pub struct $name(pub f64);

        impl $name {
            pub const SYMBOL: &'static str = $symbol;

            pub fn value(self) -> f64 {
                self.0
            }

            /// Value in SPICE notation, without unit letters.
            pub fn to_spice(self) -> String {
                format_spice_value(self.0)
            }
        }

        impl From<f64> for $name {
            fn from(value: f64) -> Self {
                $name(value)
            }
        }

        impl From<i32> for $name {
            fn from(value: i32) -> Self {
                $name(f64::from(value))
            }
        }

        impl From<$name> for f64 {
            fn from(quantity: $name) -> f64 {
                quantity.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", format_si(self.0), $symbol)
            }
        }
    };
}

quantity!(
    /// Resistance.
    Ohms,
    "Ω"
);
quantity!(
    /// Inductance.
    Henries,
    "H"
);
quantity!(
    /// Capacitance.
    Farads,
    "F"
);
quantity!(
    /// Potential difference.
    Volts,
    "V"
);
quantity!(
    /// Current.
    Amperes,
    "A"
);
quantity!(Hertz, "Hz");
quantity!(Seconds, "s");
quantity!(
    /// Temperature, as SPICE's `TEMP`/`TNOM` options expect it.
    Celsius,
    "°C"
);

impl Ohms {
    pub fn conductance(self) -> f64 {
        1.0 / self.0
    }
}

/// Split a value into a mantissa and one of the engineering exponents.
fn engineering_split(value: f64) -> (f64, usize) {
    let unit_index = ENGINEERING.iter().position(|&(exp, _, _)| exp == 0).unwrap_or(0);
    if value == 0.0 || !value.is_finite() {
        return (value, unit_index);
    }

    let magnitude = value.abs();
    for (index, &(exp, _, _)) in ENGINEERING.iter().enumerate() {
        let scale = 10f64.powi(exp);
        // Rounding slack so 999.9999999999 lands in the upper decade.
        if magnitude >= scale * (1.0 - 1e-12) {
            return (value / scale, index);
        }
    }

    let last = ENGINEERING.len() - 1;
    (value / 10f64.powi(ENGINEERING[last].0), last)
}

/// Print a mantissa with at most 12 significant decimals and no trailing zeros.
fn trim_mantissa(mantissa: f64) -> String {
    let text = format!("{:.12}", mantissa);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Format a value with SPICE scale suffixes: `0.01` → `10m`, `1e6` → `1meg`.
pub fn format_spice_value(value: f64) -> String {
    let (mantissa, index) = engineering_split(value);
    format!("{}{}", trim_mantissa(mantissa), ENGINEERING[index].1)
}

/// Format a value for humans: `0.01` → `10 m`, `1e-6` → `1 µ`.
pub fn format_si(value: f64) -> String {
    let (mantissa, index) = engineering_split(value);
    format!("{} {}", trim_mantissa(mantissa), ENGINEERING[index].2)
}

fn spice_number(input: &str) -> IResult<&str, (f64, &str)> {
    delimited(
        space0,
        pair(double, take_while(|c: char| c.is_alphabetic())),
        space0,
    )(input)
}

/// Parse a SPICE-style value such as `10k`, `1.5meg`, `100uA` or `25`.
///
/// As in SPICE, letters after the scale suffix are unit decoration and are
/// ignored, and the suffix is case-insensitive (`1M` is milli, not mega).
pub fn parse_spice_value(text: &str) -> Result<f64> {
    let (_, (number, suffix)) = all_consuming(spice_number)(text)
        .map_err(|e| anyhow!("Invalid value '{}': {}", text, e))?;

    let suffix = suffix.to_lowercase();
    let multiplier = SPICE_SCALES
        .iter()
        .find(|(prefix, _)| suffix.starts_with(prefix))
        .map(|&(_, multiplier)| multiplier)
        .unwrap_or(1.0);

    Ok(number * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn test_prefix_helpers() {
        assert!(close(milli(10.0), 0.01));
        assert!(close(micro(1.0), 1e-6));
        assert!(close(kilo(3.0), 3000.0));
        assert!(close(mega(1.0), 1e6));
    }

    #[test]
    fn test_format_spice_value() {
        assert_eq!(format_spice_value(0.01), "10m");
        assert_eq!(format_spice_value(1e-6), "1u");
        assert_eq!(format_spice_value(200.0), "200");
        assert_eq!(format_spice_value(1000.0), "1k");
        assert_eq!(format_spice_value(2500.0), "2.5k");
        assert_eq!(format_spice_value(1e6), "1meg");
        assert_eq!(format_spice_value(0.0), "0");
        assert_eq!(format_spice_value(-1.5e-3), "-1.5m");
        assert_eq!(format_spice_value(micro(300.0)), "300u");
    }

    #[test]
    fn test_display_uses_unit_symbol() {
        assert_eq!(Henries(milli(10.0)).to_string(), "10 mH");
        assert_eq!(Farads(micro(1.0)).to_string(), "1 µF");
        assert_eq!(Ohms(kilo(2.0)).to_string(), "2 kΩ");
        assert_eq!(Volts(1.0).to_string(), "1 V");
    }

    #[test]
    fn test_parse_spice_value() {
        assert!(close(parse_spice_value("10k").unwrap(), 10e3));
        assert!(close(parse_spice_value("1.5meg").unwrap(), 1.5e6));
        assert!(close(parse_spice_value("100uA").unwrap(), 100e-6));
        assert!(close(parse_spice_value("10mH").unwrap(), 0.01));
        assert!(close(parse_spice_value("100Hz").unwrap(), 100.0));
        assert!(close(parse_spice_value(" 25 ").unwrap(), 25.0));
        assert!(close(parse_spice_value("1e3").unwrap(), 1000.0));
        assert!(close(parse_spice_value("1M").unwrap(), 1e-3));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_spice_value("abc").is_err());
        assert!(parse_spice_value("10k 5").is_err());
        assert!(parse_spice_value("").is_err());
    }

    #[test]
    fn test_spice_round_trip_of_demo_values() {
        for value in [milli(10.0), micro(1.0), 25.0, kilo(3.0), micro(100.0)] {
            let text = format_spice_value(value);
            assert!(close(parse_spice_value(&text).unwrap(), value), "{}", text);
        }
    }

    #[test]
    fn test_conductance() {
        assert!(close(Ohms(kilo(2.0)).conductance(), 0.0005));
    }
}
