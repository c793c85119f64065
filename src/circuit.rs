use std::collections::HashMap;
use std::fmt;

use anyhow::{anyhow, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::simulator::{Simulator, SimulatorConfig};
use crate::units::{Amperes, Farads, Henries, Hertz, Ohms, Seconds, Volts};

/// Name SPICE reserves for the reference node.
pub const GROUND: &str = "0";

/// Represents a node in the circuit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Node { name: name.into() }
    }

    pub fn ground() -> Self {
        Node::new(GROUND)
    }

    pub fn is_ground(&self) -> bool {
        is_ground_name(&self.name)
    }

    /// Lookup key: SPICE folds node names to lowercase and every ground alias to `0`.
    pub fn key(&self) -> String {
        node_key(&self.name)
    }
}

pub(crate) fn is_ground_name(name: &str) -> bool {
    name == GROUND || name.eq_ignore_ascii_case("gnd") || name.eq_ignore_ascii_case("ground")
}

pub(crate) fn node_key(name: &str) -> String {
    if is_ground_name(name) {
        GROUND.to_string()
    } else {
        name.to_lowercase()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ground() {
            write!(f, "{}", GROUND)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

impl From<&str> for Node {
    fn from(name: &str) -> Self {
        Node::new(name)
    }
}

impl From<String> for Node {
    fn from(name: String) -> Self {
        Node::new(name)
    }
}

impl From<&String> for Node {
    fn from(name: &String) -> Self {
        Node::new(name.as_str())
    }
}

impl From<i32> for Node {
    fn from(label: i32) -> Self {
        Node::new(label.to_string())
    }
}

impl From<&Node> for Node {
    fn from(node: &Node) -> Self {
        node.clone()
    }
}

/// Types of circuit components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentType {
    Resistor,
    Inductor,
    Capacitor,
    VoltageSource,
    CurrentSource,
}

impl ComponentType {
    /// SPICE element letter.
    pub fn prefix(&self) -> char {
        match self {
            ComponentType::Resistor => 'R',
            ComponentType::Inductor => 'L',
            ComponentType::Capacitor => 'C',
            ComponentType::VoltageSource => 'V',
            ComponentType::CurrentSource => 'I',
        }
    }

    fn plural(&self) -> &'static str {
        match self {
            ComponentType::Resistor => "Resistors",
            ComponentType::Inductor => "Inductors",
            ComponentType::Capacitor => "Capacitors",
            ComponentType::VoltageSource => "Voltage Sources",
            ComponentType::CurrentSource => "Current Sources",
        }
    }
}

/// Parameters of a `SIN(...)` voltage source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sinusoid {
    pub dc_offset: Volts,
    pub offset: Volts,
    pub amplitude: Volts,
    pub frequency: Hertz,
    pub delay: Seconds,
    pub damping_factor: f64,
}

impl Default for Sinusoid {
    fn default() -> Self {
        Sinusoid {
            dc_offset: Volts(0.0),
            offset: Volts(0.0),
            amplitude: Volts(1.0),
            frequency: Hertz(50.0),
            delay: Seconds(0.0),
            damping_factor: 0.0,
        }
    }
}

impl Sinusoid {
    pub fn with_amplitude(amplitude: impl Into<Volts>) -> Self {
        Sinusoid {
            amplitude: amplitude.into(),
            ..Sinusoid::default()
        }
    }

    pub fn frequency(mut self, frequency: impl Into<Hertz>) -> Self {
        self.frequency = frequency.into();
        self
    }

    pub fn offset(mut self, offset: impl Into<Volts>) -> Self {
        self.offset = offset.into();
        self
    }

    /// Small-signal magnitude seen by an AC analysis.
    pub fn ac_magnitude(&self) -> Volts {
        self.amplitude
    }
}

/// Element payload: what the component is and its unit-tagged value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Element {
    Resistor(Ohms),
    Inductor(Henries),
    Capacitor(Farads),
    VoltageSource(Volts),
    SinusoidalSource(Sinusoid),
    CurrentSource(Amperes),
}

impl Element {
    pub fn component_type(&self) -> ComponentType {
        match self {
            Element::Resistor(_) => ComponentType::Resistor,
            Element::Inductor(_) => ComponentType::Inductor,
            Element::Capacitor(_) => ComponentType::Capacitor,
            Element::VoltageSource(_) | Element::SinusoidalSource(_) => ComponentType::VoltageSource,
            Element::CurrentSource(_) => ComponentType::CurrentSource,
        }
    }

    /// Value field of the SPICE card.
    fn spice_value(&self) -> String {
        match self {
            Element::Resistor(r) => r.to_spice(),
            Element::Inductor(l) => l.to_spice(),
            Element::Capacitor(c) => c.to_spice(),
            Element::VoltageSource(v) => format!("DC {}", v.to_spice()),
            Element::CurrentSource(i) => format!("DC {}", i.to_spice()),
            Element::SinusoidalSource(sin) => format!(
                "DC {} AC {} SIN({} {} {} {} {})",
                sin.dc_offset.to_spice(),
                sin.ac_magnitude().to_spice(),
                sin.offset.to_spice(),
                sin.amplitude.to_spice(),
                sin.frequency.to_spice(),
                sin.delay.to_spice(),
                crate::units::format_spice_value(sin.damping_factor),
            ),
        }
    }
}

/// Circuit component/element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    pub nodes: Vec<Node>,
    pub element: Element,
}

impl Component {
    pub fn new(id: impl fmt::Display, nodes: Vec<Node>, element: Element) -> Self {
        Component {
            id: id.to_string(),
            nodes,
            element,
        }
    }

    pub fn component_type(&self) -> ComponentType {
        self.element.component_type()
    }

    /// SPICE element name: type letter followed by the local identifier.
    pub fn name(&self) -> String {
        format!("{}{}", self.component_type().prefix(), self.id)
    }

    pub fn resistance(&self) -> Option<Ohms> {
        match self.element {
            Element::Resistor(r) => Some(r),
            _ => None,
        }
    }

    pub fn inductance(&self) -> Option<Henries> {
        match self.element {
            Element::Inductor(l) => Some(l),
            _ => None,
        }
    }

    pub fn capacitance(&self) -> Option<Farads> {
        match self.element {
            Element::Capacitor(c) => Some(c),
            _ => None,
        }
    }

    /// Get the conductance for resistive elements
    pub fn conductance(&self) -> Result<f64> {
        match self.element {
            Element::Resistor(r) => {
                if r.value() <= 0.0 {
                    Err(anyhow!("Resistor {} has non-positive resistance: {}", self.name(), r.value()))
                } else {
                    Ok(r.conductance())
                }
            }
            _ => Err(anyhow!("Component {} is not a resistor", self.name())),
        }
    }

    /// Passive values are expected to be positive; this is a convention the
    /// engine does not require, so it only warns.
    fn check_plausible(&self) {
        let value = match self.element {
            Element::Resistor(r) => r.value(),
            Element::Inductor(l) => l.value(),
            Element::Capacitor(c) => c.value(),
            _ => return,
        };
        if value <= 0.0 || !value.is_finite() {
            warn!("{} has an implausible value: {}", self.name(), value);
        }
    }

    /// One SPICE card, e.g. `R1 in 1 200`.
    pub fn spice_line(&self) -> String {
        let nodes: Vec<String> = self.nodes.iter().map(|node| node.to_string()).collect();
        format!("{} {} {}", self.name(), nodes.join(" "), self.element.spice_value())
    }
}

/// Complete circuit representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Circuit {
    pub title: String,
    pub nodes: Vec<Node>,
    pub components: Vec<Component>,
    pub node_map: HashMap<String, usize>,
}

impl Circuit {
    pub fn new(title: impl Into<String>) -> Self {
        Circuit {
            title: title.into(),
            nodes: Vec::new(),
            components: Vec::new(),
            node_map: HashMap::new(),
        }
    }

    /// The reference node.
    pub fn gnd(&self) -> Node {
        Node::ground()
    }

    /// Add a node to the circuit and return its index
    pub fn add_node(&mut self, node: Node) -> usize {
        let key = node.key();
        if let Some(&existing) = self.node_map.get(&key) {
            return existing;
        }

        let index = self.nodes.len();
        self.nodes.push(node);
        self.node_map.insert(key, index);
        index
    }

    /// Add a component to the circuit. Identifiers are not checked for
    /// uniqueness here; the engine rejects duplicates when it loads the deck.
    pub fn add_component(&mut self, component: Component) -> &Component {
        component.check_plausible();

        for node in &component.nodes {
            self.add_node(node.clone());
        }

        self.components.push(component);
        let last = self.components.len() - 1;
        &self.components[last]
    }

    fn add_two_terminal(
        &mut self,
        id: impl fmt::Display,
        positive: impl Into<Node>,
        negative: impl Into<Node>,
        element: Element,
    ) -> &Component {
        let component = Component::new(id, vec![positive.into(), negative.into()], element);
        self.add_component(component)
    }

    pub fn resistor(
        &mut self,
        id: impl fmt::Display,
        positive: impl Into<Node>,
        negative: impl Into<Node>,
        resistance: impl Into<Ohms>,
    ) -> &Component {
        self.add_two_terminal(id, positive, negative, Element::Resistor(resistance.into()))
    }

    pub fn inductor(
        &mut self,
        id: impl fmt::Display,
        positive: impl Into<Node>,
        negative: impl Into<Node>,
        inductance: impl Into<Henries>,
    ) -> &Component {
        self.add_two_terminal(id, positive, negative, Element::Inductor(inductance.into()))
    }

    pub fn capacitor(
        &mut self,
        id: impl fmt::Display,
        positive: impl Into<Node>,
        negative: impl Into<Node>,
        capacitance: impl Into<Farads>,
    ) -> &Component {
        self.add_two_terminal(id, positive, negative, Element::Capacitor(capacitance.into()))
    }

    pub fn voltage_source(
        &mut self,
        id: impl fmt::Display,
        positive: impl Into<Node>,
        negative: impl Into<Node>,
        voltage: impl Into<Volts>,
    ) -> &Component {
        self.add_two_terminal(id, positive, negative, Element::VoltageSource(voltage.into()))
    }

    /// Current flows from `positive` through the source into `negative`.
    pub fn current_source(
        &mut self,
        id: impl fmt::Display,
        positive: impl Into<Node>,
        negative: impl Into<Node>,
        current: impl Into<Amperes>,
    ) -> &Component {
        self.add_two_terminal(id, positive, negative, Element::CurrentSource(current.into()))
    }

    pub fn sinusoidal_source(
        &mut self,
        id: impl fmt::Display,
        positive: impl Into<Node>,
        negative: impl Into<Node>,
        sinusoid: Sinusoid,
    ) -> &Component {
        self.add_two_terminal(id, positive, negative, Element::SinusoidalSource(sinusoid))
    }

    /// Find a component by its SPICE name, e.g. `R4`.
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components
            .iter()
            .find(|comp| comp.name().eq_ignore_ascii_case(name))
    }

    /// Components in declaration order.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Distinct nodes in order of first use, ground included once referenced.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Get node by name
    pub fn get_node(&self, name: &str) -> Option<&Node> {
        self.node_map
            .get(&node_key(name))
            .and_then(|&index| self.nodes.get(index))
    }

    /// Get the number of non-ground nodes
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|node| !node.is_ground()).count()
    }

    /// Get components of a specific type
    pub fn components_of_type(&self, component_type: ComponentType) -> Vec<&Component> {
        self.components
            .iter()
            .filter(|comp| comp.component_type() == component_type)
            .collect()
    }

    /// Validate the entire circuit
    pub fn validate(&self) -> Result<()> {
        if self.components.is_empty() {
            return Err(anyhow!("Circuit '{}' has no components", self.title));
        }

        for component in &self.components {
            if component.nodes.len() < 2 {
                return Err(anyhow!(
                    "Component {} expects at least 2 nodes, but has {}",
                    component.name(),
                    component.nodes.len()
                ));
            }
            if let Some(node) = component.nodes.iter().find(|node| node.name.trim().is_empty()) {
                return Err(anyhow!("Component {} references an empty node name {:?}", component.name(), node.name));
            }
        }

        Ok(())
    }

    /// Element cards preceded by the title card, without analysis or `.end`.
    pub fn netlist(&self) -> String {
        let mut deck = format!(".title {}\n", self.title);
        for component in &self.components {
            deck.push_str(&component.spice_line());
            deck.push('\n');
        }
        deck
    }

    /// Create a simulator bound to this circuit.
    pub fn simulator(&self, config: SimulatorConfig) -> Simulator<'_> {
        Simulator::new(self, config)
    }

    /// Print circuit summary
    pub fn print_summary(&self) {
        println!("Circuit: {}", self.title);
        println!("Nodes: {}", self.node_count());
        println!("Components: {}", self.components.len());

        let mut type_counts: Vec<(ComponentType, usize)> = Vec::new();
        for component in &self.components {
            let component_type = component.component_type();
            match type_counts.iter_mut().find(|(t, _)| *t == component_type) {
                Some((_, count)) => *count += 1,
                None => type_counts.push((component_type, 1)),
            }
        }

        for (component_type, count) in type_counts {
            println!("  {}: {}", component_type.plural(), count);
        }
    }
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.netlist())
    }
}
