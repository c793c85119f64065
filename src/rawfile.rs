//! Reader for the ngspice rawfile format.
//!
//! A rawfile is a sequence of plots. Each plot has a text header
//! (`Title:`, `Plotname:`, `Flags:`, `No. Variables:`, `No. Points:`,
//! `Variables:`) followed by either `Values:` and whitespace-separated ASCII
//! numbers, or `Binary:` and little-endian doubles. Complex plots store each
//! value as a (real, imaginary) pair; in ASCII that is written `re,im`.

use std::borrow::Cow;

use lazy_static::lazy_static;
use num_complex::Complex64;
use regex::Regex;

use crate::error::{Result, SimulationError};

lazy_static! {
    static ref VOLTAGE_VARIABLE: Regex = Regex::new(r"(?i)^v\((.+)\)$").unwrap();
    static ref CURRENT_VARIABLE: Regex = Regex::new(r"(?i)^i\((.+)\)$").unwrap();
    static ref BRANCH_VARIABLE: Regex = Regex::new(r"(?i)^(.+)#branch$").unwrap();
}

/// Analysis a plot belongs to, derived from its plot name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotKind {
    OperatingPoint,
    Ac,
    DcSweep,
    Transient,
    Other,
}

/// What a rawfile column measures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Sweep scale (frequency or time).
    Scale,
    /// Voltage of a node, lowercased.
    Node(String),
    /// Current through an element, lowercased.
    Branch(String),
    Other(String),
}

/// A variable in the rawfile (column in the data).
#[derive(Debug, Clone, PartialEq)]
pub struct RawVariable {
    pub index: usize,
    pub name: String,
    pub var_type: String,
}

impl RawVariable {
    pub fn signal(&self) -> Signal {
        let var_type = self.var_type.to_lowercase();
        if var_type == "frequency" || var_type == "time" {
            return Signal::Scale;
        }

        if let Some(captures) = VOLTAGE_VARIABLE.captures(&self.name) {
            return Signal::Node(captures[1].to_lowercase());
        }
        if let Some(captures) = CURRENT_VARIABLE.captures(&self.name) {
            return Signal::Branch(captures[1].to_lowercase());
        }
        if let Some(captures) = BRANCH_VARIABLE.captures(&self.name) {
            return Signal::Branch(captures[1].to_lowercase());
        }

        match var_type.as_str() {
            "voltage" => Signal::Node(self.name.to_lowercase()),
            "current" | "device_current" => Signal::Branch(self.name.to_lowercase()),
            _ => Signal::Other(self.name.clone()),
        }
    }
}

/// One plot of a rawfile, stored column by column.
#[derive(Debug, Clone)]
pub struct RawPlot {
    pub title: String,
    pub date: String,
    pub plotname: String,
    pub flags: String,
    pub variables: Vec<RawVariable>,
    pub num_points: usize,
    /// `real[variable][point]`; the real parts for complex plots.
    pub real: Vec<Vec<f64>>,
    /// Imaginary parts, present only for complex plots.
    pub imag: Option<Vec<Vec<f64>>>,
}

impl RawPlot {
    pub fn kind(&self) -> PlotKind {
        let plotname = self.plotname.to_lowercase();
        if plotname.contains("operating point") || plotname.contains("operation point") {
            PlotKind::OperatingPoint
        } else if plotname.contains("ac analysis") {
            PlotKind::Ac
        } else if plotname.contains("dc transfer") {
            PlotKind::DcSweep
        } else if plotname.contains("transient") {
            PlotKind::Transient
        } else {
            PlotKind::Other
        }
    }

    pub fn is_complex(&self) -> bool {
        self.imag.is_some()
    }

    pub fn real_column(&self, index: usize) -> &[f64] {
        &self.real[index]
    }

    pub fn complex_column(&self, index: usize) -> Vec<Complex64> {
        match &self.imag {
            Some(imag) => self.real[index]
                .iter()
                .zip(&imag[index])
                .map(|(&re, &im)| Complex64::new(re, im))
                .collect(),
            None => self.real[index].iter().map(|&re| Complex64::new(re, 0.0)).collect(),
        }
    }

    /// Column holding the sweep scale, if the plot has one.
    pub fn scale_index(&self) -> Option<usize> {
        self.variables
            .iter()
            .position(|var| var.signal() == Signal::Scale)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.data.len() && self.data[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn next_line(&mut self) -> Option<Cow<'a, str>> {
        if self.at_end() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        self.pos += (end + 1).min(rest.len());
        let line = &rest[..end];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        Some(String::from_utf8_lossy(line))
    }

    fn next_token(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        let start = self.pos;
        while self.pos < self.data.len() && !self.data[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        std::str::from_utf8(&self.data[start..self.pos]).ok()
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.data.len() - self.pos < len {
            return None;
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(bytes)
    }
}

enum Encoding {
    Ascii,
    Binary,
}

struct Header {
    title: String,
    date: String,
    plotname: String,
    flags: String,
    num_variables: usize,
    num_points: usize,
    variables: Vec<RawVariable>,
    encoding: Encoding,
}

fn parse_error(message: impl Into<String>) -> SimulationError {
    SimulationError::RawfileParse(message.into())
}

/// Parse every plot contained in a rawfile.
pub fn parse_rawfile(data: &[u8]) -> Result<Vec<RawPlot>> {
    let mut cursor = Cursor::new(data);
    let mut plots = Vec::new();

    loop {
        cursor.skip_whitespace();
        if cursor.at_end() {
            break;
        }
        plots.push(parse_plot(&mut cursor)?);
    }

    if plots.is_empty() {
        return Err(parse_error("rawfile contains no plots"));
    }
    Ok(plots)
}

fn parse_variable_line(line: &str) -> Result<Option<RawVariable>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 {
        return Ok(None);
    }
    let index = parts[0]
        .parse::<usize>()
        .map_err(|_| parse_error(format!("invalid variable index: {}", parts[0])))?;
    Ok(Some(RawVariable {
        index,
        name: parts[1].to_string(),
        var_type: parts[2].to_string(),
    }))
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| parse_error(format!("invalid {}: {}", key, value.trim())))
}

fn parse_header(cursor: &mut Cursor<'_>) -> Result<Header> {
    let mut title = String::new();
    let mut date = String::new();
    let mut plotname = String::new();
    let mut flags = String::new();
    let mut num_variables = None;
    let mut num_points = None;
    let mut variables = Vec::new();
    let mut in_variables = false;

    let encoding = loop {
        let line = cursor
            .next_line()
            .ok_or_else(|| parse_error("header ended before Values:/Binary:"))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (key, value) = match line.split_once(':') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => ("", line),
        };

        match key {
            "Title" => title = value.to_string(),
            "Date" => date = value.to_string(),
            "Plotname" => plotname = value.to_string(),
            "Flags" => flags = value.to_string(),
            "No. Variables" => num_variables = Some(parse_count(key, value)?),
            "No. Points" => num_points = Some(parse_count(key, value)?),
            "Variables" => {
                in_variables = true;
                if let Some(variable) = parse_variable_line(value)? {
                    variables.push(variable);
                }
            }
            "Values" => break Encoding::Ascii,
            "Binary" => break Encoding::Binary,
            _ if in_variables => {
                if let Some(variable) = parse_variable_line(line)? {
                    variables.push(variable);
                }
            }
            // Command:, Option: and friends carry nothing we use.
            _ => {}
        }
    };

    let num_variables = num_variables.ok_or_else(|| parse_error("missing No. Variables"))?;
    let num_points = num_points.ok_or_else(|| parse_error("missing No. Points"))?;
    if variables.len() != num_variables {
        return Err(parse_error(format!(
            "plot '{}' declares {} variables but lists {}",
            plotname,
            num_variables,
            variables.len()
        )));
    }

    Ok(Header {
        title,
        date,
        plotname,
        flags,
        num_variables,
        num_points,
        variables,
        encoding,
    })
}

fn parse_plot(cursor: &mut Cursor<'_>) -> Result<RawPlot> {
    let header = parse_header(cursor)?;
    let is_complex = header.flags.to_lowercase().contains("complex");

    let (real, imag) = match header.encoding {
        Encoding::Ascii => parse_ascii_values(cursor, &header, is_complex)?,
        Encoding::Binary => parse_binary_values(cursor, &header, is_complex)?,
    };

    Ok(RawPlot {
        title: header.title,
        date: header.date,
        plotname: header.plotname,
        flags: header.flags,
        variables: header.variables,
        num_points: header.num_points,
        real,
        imag: if is_complex { Some(imag) } else { None },
    })
}

/// Parse a complex value in ngspice format: "real,imag".
fn parse_complex_value(text: &str) -> Option<(f64, f64)> {
    match text.split_once(',') {
        Some((re, im)) => Some((re.trim().parse().ok()?, im.trim().parse().ok()?)),
        None => Some((text.trim().parse().ok()?, 0.0)),
    }
}

type Columns = (Vec<Vec<f64>>, Vec<Vec<f64>>);

/// Columns grow as values are read; the header's point count is not trusted for allocation.
fn empty_columns(header: &Header, is_complex: bool) -> Columns {
    let real = vec![Vec::new(); header.num_variables];
    let imag = if is_complex {
        vec![Vec::new(); header.num_variables]
    } else {
        Vec::new()
    };
    (real, imag)
}

fn parse_ascii_values(cursor: &mut Cursor<'_>, header: &Header, is_complex: bool) -> Result<Columns> {
    let (mut real, mut imag) = empty_columns(header, is_complex);
    let truncated = |point: usize| {
        parse_error(format!(
            "plot '{}' truncated at point {} of {}",
            header.plotname, point, header.num_points
        ))
    };

    for point in 0..header.num_points {
        let index = cursor.next_token().ok_or_else(|| truncated(point))?;
        if index.parse::<usize>().is_err() {
            return Err(parse_error(format!("expected point index, found '{}'", index)));
        }

        for var in 0..header.num_variables {
            let token = cursor.next_token().ok_or_else(|| truncated(point))?;
            if is_complex {
                // Tolerate "re, im" split across two tokens.
                let joined;
                let text = if token.ends_with(',') {
                    let im = cursor.next_token().ok_or_else(|| truncated(point))?;
                    joined = format!("{}{}", token, im);
                    joined.as_str()
                } else {
                    token
                };
                let (re, im) = parse_complex_value(text)
                    .ok_or_else(|| parse_error(format!("invalid complex value '{}'", text)))?;
                real[var].push(re);
                imag[var].push(im);
            } else {
                let value = token
                    .parse::<f64>()
                    .map_err(|_| parse_error(format!("invalid value '{}'", token)))?;
                real[var].push(value);
            }
        }
    }

    Ok((real, imag))
}

fn read_f64_le(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    f64::from_le_bytes(buf)
}

fn parse_binary_values(cursor: &mut Cursor<'_>, header: &Header, is_complex: bool) -> Result<Columns> {
    let (mut real, mut imag) = empty_columns(header, is_complex);
    let bytes_per_value: usize = if is_complex { 16 } else { 8 };
    let len = header
        .num_points
        .checked_mul(header.num_variables)
        .and_then(|values| values.checked_mul(bytes_per_value))
        .ok_or_else(|| {
            parse_error(format!(
                "plot '{}' truncated: {} points of {} variables exceed the data",
                header.plotname, header.num_points, header.num_variables
            ))
        })?;
    let data = cursor.take(len).ok_or_else(|| {
        parse_error(format!(
            "plot '{}' truncated: expected {} bytes of binary data",
            header.plotname, len
        ))
    })?;

    for (i, value) in data.chunks_exact(bytes_per_value).enumerate() {
        let var = i % header.num_variables;
        real[var].push(read_f64_le(&value[..8]));
        if is_complex {
            imag[var].push(read_f64_le(&value[8..]));
        }
    }

    Ok((real, imag))
}
