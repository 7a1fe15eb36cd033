//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::definition::{CombinerDef, ConnectionDef, ModelDefinition, ServerDef, SinkDef, SourceDef};
use crate::distribution::{Delay, Distribution};
use crate::entity::EntityRole;
use crate::routing::{CustomRule, RoutingRule};
use crate::station::{Arrivals, QueueDiscipline};
use crate::time::SimTime;

// ===========================================================================
// Scalar helpers
// ===========================================================================

pub fn time(v: f64) -> SimTime {
    SimTime::from_num(v)
}

pub fn constant(v: f64) -> Delay {
    Delay::steps(Distribution::Constant(v))
}

pub fn triangular(low: f64, high: f64, mode: f64) -> Delay {
    Delay::steps(Distribution::Triangular { low, high, mode })
}

pub fn uniform(min: f64, max: f64) -> Delay {
    Delay::steps(Distribution::Uniform { min, max })
}

pub fn exponential(mean: f64) -> Delay {
    Delay::steps(Distribution::Exponential { mean })
}

// ===========================================================================
// Definition builders
// ===========================================================================

pub fn source(name: &str, interarrival: Delay) -> SourceDef {
    SourceDef {
        name: name.to_string(),
        arrivals: Arrivals::Interval(interarrival),
        max_arrivals: None,
        emits: EntityRole::Parent,
        routing: RoutingRule::Probabilistic,
    }
}

/// A source whose entities join combiner batches.
pub fn member_source(name: &str, interarrival: Delay) -> SourceDef {
    SourceDef {
        emits: EntityRole::Member,
        ..source(name, interarrival)
    }
}

pub fn server(name: &str, processing: Delay) -> ServerDef {
    ServerDef {
        name: name.to_string(),
        processing,
        capacity: 1,
        discipline: QueueDiscipline::Fifo,
        breakdown: None,
        routing: RoutingRule::Probabilistic,
    }
}

pub fn combiner(name: &str, processing: Delay, batch_size: u32) -> CombinerDef {
    CombinerDef {
        name: name.to_string(),
        processing,
        batch_size,
        capacity: 1,
        discipline: QueueDiscipline::Fifo,
        breakdown: None,
        routing: RoutingRule::Probabilistic,
    }
}

pub fn sink(name: &str) -> SinkDef {
    SinkDef {
        name: name.to_string(),
    }
}

pub fn link(from: &str, to: &str, probability: Option<f64>) -> ConnectionDef {
    ConnectionDef {
        from: from.to_string(),
        to: to.to_string(),
        probability,
        travel: None,
    }
}

/// Source -> server -> sink with constant times.
pub fn line_definition(interarrival: f64, processing: f64) -> ModelDefinition {
    ModelDefinition {
        name: "line".into(),
        sources: vec![source("Src", constant(interarrival))],
        servers: vec![server("Srv", constant(processing))],
        sinks: vec![sink("Out")],
        connections: vec![link("Src", "Srv", None), link("Srv", "Out", None)],
        ..ModelDefinition::default()
    }
}

/// Packing line: a box every `box_every` steps, a part every step. The
/// combiner packs `batch_size` parts into each box and the separator
/// unpacks them again; boxes and parts share one sink.
pub fn packing_definition(box_every: f64, batch_size: u32) -> ModelDefinition {
    ModelDefinition {
        name: "packing".into(),
        sources: vec![
            source("Boxes", constant(box_every)),
            member_source("Parts", constant(1.0)),
        ],
        combiners: vec![combiner("Pack", constant(1.0), batch_size)],
        separators: vec![server("Unpack", constant(1.0))],
        sinks: vec![sink("Shipped")],
        connections: vec![
            link("Boxes", "Pack", None),
            link("Parts", "Pack", None),
            link("Pack", "Unpack", None),
            link("Unpack", "Shipped", None),
        ],
        ..ModelDefinition::default()
    }
}

/// Printed-circuit-board line: placement, three fine-pitch machines,
/// inspection with rework, good and bad sinks. Boards processed eleven
/// times are scrapped.
pub fn pcb_definition() -> ModelDefinition {
    let mut inspection = server("Inspection", uniform(2.0, 4.0));
    inspection.routing = RoutingRule::Custom(CustomRule::ReworkLimit {
        max_times_processed: 11,
        target: "BadParts".into(),
    });

    ModelDefinition {
        name: "pcb".into(),
        sources: vec![source("PCB", exponential(6.0))],
        servers: vec![
            server("Placement", triangular(3.0, 5.0, 4.0)),
            server("FinePitchFast", triangular(8.0, 10.0, 9.0)),
            server("FinePitchMedium", triangular(18.0, 22.0, 20.0)),
            server("FinePitchSlow", triangular(22.0, 26.0, 24.0)),
            inspection,
            server("Rework", triangular(2.0, 6.0, 4.0)),
        ],
        sinks: vec![sink("GoodParts"), sink("BadParts")],
        connections: vec![
            link("PCB", "Placement", None),
            link("Placement", "FinePitchFast", None),
            link("Placement", "FinePitchMedium", None),
            link("Placement", "FinePitchSlow", None),
            link("FinePitchFast", "Inspection", None),
            link("FinePitchMedium", "Inspection", None),
            link("FinePitchSlow", "Inspection", None),
            link("Rework", "Placement", None),
            link("Inspection", "GoodParts", Some(66.0)),
            link("Inspection", "BadParts", Some(8.0)),
            link("Inspection", "Rework", Some(26.0)),
        ],
        ..ModelDefinition::default()
    }
}
