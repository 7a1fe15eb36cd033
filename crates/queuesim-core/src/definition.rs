//! Serializable model definitions.
//!
//! A [`ModelDefinition`] is the plain-data description of a network that
//! crosses the job-dispatch boundary and is loaded from files. Each worker
//! calls [`ModelDefinition::build`] to get its own [`Model`].

use crate::distribution::Delay;
use crate::entity::EntityRole;
use crate::model::{Model, ModelError};
use crate::routing::RoutingRule;
use crate::station::{Arrivals, Breakdown, QueueDiscipline, ServerConfig, SourceConfig};
use serde::{Deserialize, Serialize};

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDef {
    pub name: String,
    pub arrivals: Arrivals,
    #[serde(default)]
    pub max_arrivals: Option<u64>,
    /// `Member` feeds the member queue of downstream combiners.
    #[serde(default)]
    pub emits: EntityRole,
    #[serde(default)]
    pub routing: RoutingRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDef {
    pub name: String,
    pub processing: Delay,
    #[serde(default = "one")]
    pub capacity: u32,
    #[serde(default)]
    pub discipline: QueueDiscipline,
    #[serde(default)]
    pub breakdown: Option<Breakdown>,
    #[serde(default)]
    pub routing: RoutingRule,
}

impl ServerDef {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            processing: self.processing.clone(),
            capacity: self.capacity,
            discipline: self.discipline,
            breakdown: self.breakdown.clone(),
        }
    }
}

/// A server that joins one parent with `batch_size` members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinerDef {
    pub name: String,
    pub processing: Delay,
    #[serde(default = "one")]
    pub batch_size: u32,
    #[serde(default = "one")]
    pub capacity: u32,
    #[serde(default)]
    pub discipline: QueueDiscipline,
    #[serde(default)]
    pub breakdown: Option<Breakdown>,
    #[serde(default)]
    pub routing: RoutingRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkDef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDef {
    pub from: String,
    pub to: String,
    /// Percentage; omitted connections share the remainder.
    #[serde(default)]
    pub probability: Option<f64>,
    #[serde(default)]
    pub travel: Option<Delay>,
}

/// Topology, distributions and routing of one network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sources: Vec<SourceDef>,
    #[serde(default)]
    pub servers: Vec<ServerDef>,
    #[serde(default)]
    pub combiners: Vec<CombinerDef>,
    /// Separators take the same fields as servers.
    #[serde(default)]
    pub separators: Vec<ServerDef>,
    #[serde(default)]
    pub sinks: Vec<SinkDef>,
    #[serde(default)]
    pub connections: Vec<ConnectionDef>,
}

impl ModelDefinition {
    /// Build and validate a model. Malformed probabilities fail here,
    /// before any replication starts.
    pub fn build(&self) -> Result<Model, ModelError> {
        let mut model = Model::new();
        for def in &self.sources {
            let id = model.add_source(
                def.name.clone(),
                SourceConfig {
                    arrivals: def.arrivals.clone(),
                    max_arrivals: def.max_arrivals,
                    emits: def.emits,
                },
            )?;
            model.set_routing_rule(id, def.routing.clone())?;
        }
        for def in &self.servers {
            let id = model.add_server(def.name.clone(), def.config())?;
            model.set_routing_rule(id, def.routing.clone())?;
        }
        for def in &self.combiners {
            let config = ServerConfig {
                processing: def.processing.clone(),
                capacity: def.capacity,
                discipline: def.discipline,
                breakdown: def.breakdown.clone(),
            };
            let id = model.add_combiner(def.name.clone(), config, def.batch_size)?;
            model.set_routing_rule(id, def.routing.clone())?;
        }
        for def in &self.separators {
            let id = model.add_separator(def.name.clone(), def.config())?;
            model.set_routing_rule(id, def.routing.clone())?;
        }
        for def in &self.sinks {
            model.add_sink(def.name.clone())?;
        }
        for conn in &self.connections {
            model.connect_named(&conn.from, &conn.to, conn.probability, conn.travel.clone())?;
        }
        model.validate()?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Distribution;
    use crate::routing::RoutingError;

    fn def() -> ModelDefinition {
        ModelDefinition {
            name: "line".into(),
            sources: vec![SourceDef {
                name: "Src".into(),
                arrivals: Arrivals::Interval(Delay::steps(Distribution::Constant(5.0))),
                max_arrivals: None,
                emits: EntityRole::Parent,
                routing: RoutingRule::Probabilistic,
            }],
            servers: vec![ServerDef {
                name: "Srv".into(),
                processing: Delay::steps(Distribution::Constant(1.0)),
                capacity: 1,
                discipline: QueueDiscipline::Fifo,
                breakdown: None,
                routing: RoutingRule::Probabilistic,
            }],
            sinks: vec![SinkDef { name: "Out".into() }],
            connections: vec![
                ConnectionDef {
                    from: "Src".into(),
                    to: "Srv".into(),
                    probability: None,
                    travel: None,
                },
                ConnectionDef {
                    from: "Srv".into(),
                    to: "Out".into(),
                    probability: None,
                    travel: None,
                },
            ],
            ..ModelDefinition::default()
        }
    }

    #[test]
    fn build_produces_validated_model() {
        let model = def().build().unwrap();
        assert!(model.is_validated());
        assert_eq!(model.len(), 3);
    }

    #[test]
    fn unknown_connection_endpoint_fails() {
        let mut d = def();
        d.connections[1].to = "Nowhere".into();
        assert_eq!(
            d.build().unwrap_err(),
            ModelError::UnknownStation("Nowhere".into())
        );
    }

    #[test]
    fn bad_probability_fails_before_run() {
        let mut d = def();
        d.connections[1].probability = Some(40.0);
        assert!(matches!(
            d.build().unwrap_err(),
            ModelError::Routing(RoutingError::ProbabilityMismatch { .. })
        ));
    }

    #[test]
    fn json_defaults_fill_optional_fields() {
        let json = r#"{
            "sources": [{ "name": "Src", "arrivals": { "Interval": { "distribution": { "Constant": 5.0 } } } }],
            "servers": [{ "name": "Srv", "processing": { "distribution": { "Uniform": { "min": 2.0, "max": 4.0 } }, "unit": "Minute" } }],
            "sinks": [{ "name": "Out" }],
            "connections": [{ "from": "Src", "to": "Srv" }, { "from": "Srv", "to": "Out" }]
        }"#;
        let d: ModelDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(d.servers[0].capacity, 1);
        assert_eq!(d.servers[0].discipline, QueueDiscipline::Fifo);
        assert_eq!(d.sources[0].emits, EntityRole::Parent);
        assert!(d.combiners.is_empty());
        assert!(d.build().is_ok());
    }

    #[test]
    fn combiners_and_separators_build() {
        let json = r#"{
            "sources": [
                { "name": "Boxes", "arrivals": { "Interval": { "distribution": { "Constant": 4.0 } } } },
                { "name": "Parts", "emits": "Member", "arrivals": { "Interval": { "distribution": { "Constant": 1.0 } } } }
            ],
            "combiners": [{ "name": "Pack", "batch_size": 4, "processing": { "distribution": { "Constant": 1.0 } } }],
            "separators": [{ "name": "Unpack", "processing": { "distribution": { "Constant": 1.0 } } }],
            "sinks": [{ "name": "Out" }],
            "connections": [
                { "from": "Boxes", "to": "Pack" }, { "from": "Parts", "to": "Pack" },
                { "from": "Pack", "to": "Unpack" }, { "from": "Unpack", "to": "Out" }
            ]
        }"#;
        let d: ModelDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(d.sources[1].emits, EntityRole::Member);
        assert_eq!(d.combiners[0].capacity, 1);
        let model = d.build().unwrap();
        assert_eq!(model.combiners().len(), 1);
        assert_eq!(model.separators().len(), 1);
    }

    #[test]
    fn zero_batch_combiner_fails_build() {
        let mut d = def();
        d.combiners.push(CombinerDef {
            name: "Pack".into(),
            processing: Delay::steps(Distribution::Constant(1.0)),
            batch_size: 0,
            capacity: 1,
            discipline: QueueDiscipline::Fifo,
            breakdown: None,
            routing: RoutingRule::Probabilistic,
        });
        assert_eq!(d.build().unwrap_err(), ModelError::ZeroBatch("Pack".into()));
    }
}
