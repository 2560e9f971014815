//! The physical execution graph handed to the external record runtime.
//!
//! A [`Vertex`] wraps the processor the runtime must instantiate plus a
//! local-parallelism count; an [`Edge`] carries the routing metadata
//! (local vs distributed, unicast vs broadcast vs key-partitioned) the
//! runtime needs to move items between vertices.

use std::fmt;

use weir_common::{Result, WeirError};

use crate::aggregate::DynAggregateOperation;
use crate::datamodel::{FilterFn, KeyFn, MapFn, MapToOutputFn, RollingOutputFn};
use crate::window::{KeyedWindowResultFn, WindowDefinition};

/// Index of a vertex inside its DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexId(pub usize);

/// Processor the external record runtime must instantiate for a vertex.
pub enum ProcessorSpec {
    /// Root processor instantiated from a registered source factory.
    Source { op_name: String },
    Map { map_fn: MapFn },
    Filter { filter_fn: FilterFn },
    /// Single-stage grouped aggregation: accumulate and export in one pass
    /// over key-partitioned input.
    AggregateByKey {
        key_fns: Vec<KeyFn>,
        op: DynAggregateOperation,
        output_fn: MapToOutputFn,
    },
    /// First stage of two-stage aggregation: local accumulation into keyed
    /// partial accumulators, emitted as entries.
    AccumulateByKey {
        key_fns: Vec<KeyFn>,
        op: DynAggregateOperation,
    },
    /// Second stage of two-stage aggregation: combine partial accumulators
    /// per key and export.
    CombineByKey {
        op: DynAggregateOperation,
        output_fn: MapToOutputFn,
    },
    /// Single-stage windowed aggregation.
    WindowAggregateByKey {
        window: WindowDefinition,
        key_fns: Vec<KeyFn>,
        op: DynAggregateOperation,
        output_fn: KeyedWindowResultFn,
    },
    /// First stage of two-stage windowed aggregation: accumulate into
    /// per-frame partial accumulators.
    AccumulateByFrame {
        window: WindowDefinition,
        key_fns: Vec<KeyFn>,
        op: DynAggregateOperation,
    },
    /// Second stage of two-stage windowed aggregation: combine frame partials
    /// into windows and export.
    CombineToWindow {
        window: WindowDefinition,
        op: DynAggregateOperation,
        output_fn: KeyedWindowResultFn,
    },
    /// Unwindowed per-record aggregation emitting one updated result per
    /// input record per key.
    RollingAggregateByKey {
        key_fn: KeyFn,
        op: DynAggregateOperation,
        output_fn: RollingOutputFn,
    },
    /// Joins the unicast primary stream against broadcast enriching streams.
    HashJoin { key_fns: Vec<KeyFn> },
    Merge,
    /// Processor instantiated via the runtime's custom factory registry.
    Custom { op_name: String },
}

impl ProcessorSpec {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ProcessorSpec::Source { .. } => "Source",
            ProcessorSpec::Map { .. } => "Map",
            ProcessorSpec::Filter { .. } => "Filter",
            ProcessorSpec::AggregateByKey { .. } => "AggregateByKey",
            ProcessorSpec::AccumulateByKey { .. } => "AccumulateByKey",
            ProcessorSpec::CombineByKey { .. } => "CombineByKey",
            ProcessorSpec::WindowAggregateByKey { .. } => "WindowAggregateByKey",
            ProcessorSpec::AccumulateByFrame { .. } => "AccumulateByFrame",
            ProcessorSpec::CombineToWindow { .. } => "CombineToWindow",
            ProcessorSpec::RollingAggregateByKey { .. } => "RollingAggregateByKey",
            ProcessorSpec::HashJoin { .. } => "HashJoin",
            ProcessorSpec::Merge => "Merge",
            ProcessorSpec::Custom { .. } => "Custom",
        }
    }
}

impl fmt::Debug for ProcessorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_name())
    }
}

/// One physical vertex: processor plus local parallelism.
#[derive(Debug)]
pub struct Vertex {
    pub name: String,
    pub local_parallelism: usize,
    pub processor: ProcessorSpec,
}

/// Edge routing policy.
pub enum Routing {
    /// Round-robin/any-path delivery to one downstream processor instance.
    Unicast,
    /// Every downstream processor instance receives every item.
    Broadcast,
    /// Items route by the declared partitioning function's key.
    Partitioned { key_fn: KeyFn },
}

impl Routing {
    pub fn is_partitioned(&self) -> bool {
        matches!(self, Routing::Partitioned { .. })
    }
}

impl fmt::Debug for Routing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Routing::Unicast => f.write_str("Unicast"),
            Routing::Broadcast => f.write_str("Broadcast"),
            Routing::Partitioned { .. } => f.write_str("Partitioned"),
        }
    }
}

/// Directed connection between two vertices with routing metadata.
#[derive(Debug)]
pub struct Edge {
    pub source: VertexId,
    pub source_ordinal: usize,
    pub dest: VertexId,
    pub dest_ordinal: usize,
    /// Distributed edges cross member boundaries; local edges stay on-node.
    pub distributed: bool,
    pub routing: Routing,
}

impl Edge {
    /// Local unicast edge between ordinals 0 and 0.
    pub fn between(source: VertexId, dest: VertexId) -> Self {
        Self {
            source,
            source_ordinal: 0,
            dest,
            dest_ordinal: 0,
            distributed: false,
            routing: Routing::Unicast,
        }
    }

    pub fn from_ordinal(mut self, ordinal: usize) -> Self {
        self.source_ordinal = ordinal;
        self
    }

    pub fn to_ordinal(mut self, ordinal: usize) -> Self {
        self.dest_ordinal = ordinal;
        self
    }

    pub fn distributed(mut self) -> Self {
        self.distributed = true;
        self
    }

    pub fn partitioned(mut self, key_fn: KeyFn) -> Self {
        self.routing = Routing::Partitioned { key_fn };
        self
    }

    pub fn broadcast(mut self) -> Self {
        self.routing = Routing::Broadcast;
        self
    }
}

/// The physical operator graph.
#[derive(Debug, Default)]
pub struct Dag {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_vertex(
        &mut self,
        name: impl Into<String>,
        local_parallelism: usize,
        processor: ProcessorSpec,
    ) -> VertexId {
        let id = VertexId(self.vertices.len());
        self.vertices.push(Vertex {
            name: name.into(),
            local_parallelism,
            processor,
        });
        id
    }

    /// Adds an edge, validating vertex ids and ordinal uniqueness on both
    /// endpoints.
    pub fn edge(&mut self, edge: Edge) -> Result<()> {
        for id in [edge.source, edge.dest] {
            if id.0 >= self.vertices.len() {
                return Err(WeirError::Planning(format!(
                    "edge references unknown vertex {}",
                    id.0
                )));
            }
        }
        if self
            .edges
            .iter()
            .any(|e| e.dest == edge.dest && e.dest_ordinal == edge.dest_ordinal)
        {
            return Err(WeirError::Planning(format!(
                "vertex '{}' already has an inbound edge at ordinal {}",
                self.vertices[edge.dest.0].name, edge.dest_ordinal
            )));
        }
        if self
            .edges
            .iter()
            .any(|e| e.source == edge.source && e.source_ordinal == edge.source_ordinal)
        {
            return Err(WeirError::Planning(format!(
                "vertex '{}' already has an outbound edge at ordinal {}",
                self.vertices[edge.source.0].name, edge.source_ordinal
            )));
        }
        self.edges.push(edge);
        Ok(())
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(id.0)
    }

    pub fn vertex_by_name(&self, name: &str) -> Option<(VertexId, &Vertex)> {
        self.vertices
            .iter()
            .enumerate()
            .find(|(_, v)| v.name == name)
            .map(|(i, v)| (VertexId(i), v))
    }

    pub fn inbound_edges(&self, dest: VertexId) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.edges.iter().filter(|e| e.dest == dest).collect();
        edges.sort_by_key(|e| e.dest_ordinal);
        edges
    }

    pub fn outbound_edges(&self, source: VertexId) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.edges.iter().filter(|e| e.source == source).collect();
        edges.sort_by_key(|e| e.source_ordinal);
        edges
    }
}
