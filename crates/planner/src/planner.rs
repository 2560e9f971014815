//! Lowers the transform graph into the physical DAG.
//!
//! Each transform kind has one compilation function; `create_dag` dispatches
//! over the closed kind enum in pipeline order, which is already topological.

use std::collections::HashMap;

use tracing::debug;
use weir_common::{global_metrics, Result, WeirError};

use crate::dag::{Dag, Edge, ProcessorSpec, VertexId};
use crate::datamodel::{entry_key_fn, KeyFn};
use crate::transform::{Optimization, Pipeline, Transform, TransformKind};

/// Name suffix of the first vertex of a two-stage aggregation.
pub const FIRST_STAGE_VERTEX_NAME_SUFFIX: &str = "-prepare";

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Vertex parallelism used when a transform carries no hint.
    pub default_local_parallelism: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_local_parallelism: 2,
        }
    }
}

/// Lower a transform pipeline into the physical execution DAG.
///
/// Contracts:
/// - every transform maps to at least one vertex;
/// - group/co-group lowering follows the single- vs two-stage decision rule:
///   memory preference or a missing combine function forces single-stage;
/// - key functions apply positionally: the i-th upstream edge partitions with
///   the i-th declared key function.
pub fn create_dag(pipeline: &Pipeline, cfg: &PlannerConfig) -> Result<Dag> {
    let mut planner = Planner {
        dag: Dag::new(),
        out_vertex: HashMap::new(),
        cfg,
    };
    for (index, transform) in pipeline.transforms().iter().enumerate() {
        planner.add_transform(index, transform)?;
    }
    global_metrics().inc_dags_compiled();
    debug!(
        transforms = pipeline.len(),
        vertices = planner.dag.vertices().len(),
        edges = planner.dag.edges().len(),
        operator = "PlannerCreateDag",
        "pipeline lowered"
    );
    Ok(planner.dag)
}

struct Planner<'a> {
    dag: Dag,
    /// Output vertex of each lowered transform, keyed by pipeline index.
    out_vertex: HashMap<usize, VertexId>,
    cfg: &'a PlannerConfig,
}

impl Planner<'_> {
    fn add_transform(&mut self, index: usize, t: &Transform) -> Result<()> {
        match &t.kind {
            TransformKind::Source { op_name } => {
                self.add_vertex(index, t, ProcessorSpec::Source {
                    op_name: op_name.clone(),
                });
                Ok(())
            }
            TransformKind::Map { map_fn } => self.add_unary(
                index,
                t,
                ProcessorSpec::Map {
                    map_fn: map_fn.clone(),
                },
            ),
            TransformKind::Filter { filter_fn } => self.add_unary(
                index,
                t,
                ProcessorSpec::Filter {
                    filter_fn: filter_fn.clone(),
                },
            ),
            TransformKind::GroupAggregate {
                key_fns,
                op,
                output_fn,
            } => {
                if t.optimization == Optimization::Memory || !op.has_combine() {
                    let v = self.add_vertex(index, t, ProcessorSpec::AggregateByKey {
                        key_fns: key_fns.clone(),
                        op: op.clone(),
                        output_fn: output_fn.clone(),
                    });
                    self.add_edges(t, v, |e, ord| {
                        e.distributed().partitioned(key_fns[ord].clone())
                    })
                } else {
                    self.add_two_stage(
                        index,
                        t,
                        key_fns,
                        ProcessorSpec::AccumulateByKey {
                            key_fns: key_fns.clone(),
                            op: op.clone(),
                        },
                        ProcessorSpec::CombineByKey {
                            op: op.clone(),
                            output_fn: output_fn.clone(),
                        },
                    )
                }
            }
            TransformKind::WindowAggregate {
                window,
                key_fns,
                op,
                output_fn,
            } => {
                if t.optimization == Optimization::Memory || !op.has_combine() {
                    let v = self.add_vertex(index, t, ProcessorSpec::WindowAggregateByKey {
                        window: *window,
                        key_fns: key_fns.clone(),
                        op: op.clone(),
                        output_fn: output_fn.clone(),
                    });
                    self.add_edges(t, v, |e, ord| {
                        e.distributed().partitioned(key_fns[ord].clone())
                    })
                } else {
                    self.add_two_stage(
                        index,
                        t,
                        key_fns,
                        ProcessorSpec::AccumulateByFrame {
                            window: *window,
                            key_fns: key_fns.clone(),
                            op: op.clone(),
                        },
                        ProcessorSpec::CombineToWindow {
                            window: *window,
                            op: op.clone(),
                            output_fn: output_fn.clone(),
                        },
                    )
                }
            }
            TransformKind::RollingAggregate {
                key_fn,
                op,
                output_fn,
            } => {
                let v = self.add_vertex(index, t, ProcessorSpec::RollingAggregateByKey {
                    key_fn: key_fn.clone(),
                    op: op.clone(),
                    output_fn: output_fn.clone(),
                });
                self.add_edges(t, v, |e, _ord| e.distributed().partitioned(key_fn.clone()))
            }
            TransformKind::HashJoin { key_fns } => {
                let v = self.add_vertex(index, t, ProcessorSpec::HashJoin {
                    key_fns: key_fns.clone(),
                });
                // primary stream stays local; enriching streams reach every member
                self.add_edges(t, v, |e, ord| {
                    if ord == 0 {
                        e
                    } else {
                        e.distributed().broadcast()
                    }
                })
            }
            TransformKind::Merge => {
                let v = self.add_vertex(index, t, ProcessorSpec::Merge);
                self.add_edges(t, v, |e, _ord| e)
            }
            TransformKind::Custom { op_name } => {
                let v = self.add_vertex(index, t, ProcessorSpec::Custom {
                    op_name: op_name.clone(),
                });
                self.add_edges(t, v, |e, _ord| e)
            }
        }
    }

    fn add_unary(&mut self, index: usize, t: &Transform, processor: ProcessorSpec) -> Result<()> {
        let v = self.add_vertex(index, t, processor);
        self.add_edges(t, v, |e, _ord| e)
    }

    // stage 1 accumulates locally per upstream key; the stage boundary is the
    // only distributed hop and carries already-keyed entries
    fn add_two_stage(
        &mut self,
        index: usize,
        t: &Transform,
        key_fns: &[KeyFn],
        first_stage: ProcessorSpec,
        second_stage: ProcessorSpec,
    ) -> Result<()> {
        let v1 = self.dag.new_vertex(
            format!("{}{FIRST_STAGE_VERTEX_NAME_SUFFIX}", t.name),
            self.parallelism(t),
            first_stage,
        );
        let v2 = self.add_vertex(index, t, second_stage);
        self.add_edges(t, v1, |e, ord| e.partitioned(key_fns[ord].clone()))?;
        self.dag
            .edge(Edge::between(v1, v2).distributed().partitioned(entry_key_fn()))
    }

    fn parallelism(&self, t: &Transform) -> usize {
        t.local_parallelism
            .unwrap_or(self.cfg.default_local_parallelism)
    }

    fn add_vertex(&mut self, index: usize, t: &Transform, processor: ProcessorSpec) -> VertexId {
        let v = self
            .dag
            .new_vertex(t.name.clone(), self.parallelism(t), processor);
        self.out_vertex.insert(index, v);
        v
    }

    /// Connects every upstream transform's output vertex to `dest`, applying
    /// `edge_fn` per ordinal. Source ordinals are assigned densely per source
    /// vertex so one vertex can feed several downstream transforms.
    fn add_edges(
        &mut self,
        t: &Transform,
        dest: VertexId,
        edge_fn: impl Fn(Edge, usize) -> Edge,
    ) -> Result<()> {
        for (ord, up) in t.upstream.iter().enumerate() {
            let source = self.out_vertex.get(&up.0).copied().ok_or_else(|| {
                WeirError::Planning(format!(
                    "upstream transform {} was not lowered before '{}'",
                    up.0, t.name
                ))
            })?;
            let from_ordinal = self.dag.outbound_edges(source).len();
            let edge = edge_fn(
                Edge::between(source, dest)
                    .from_ordinal(from_ordinal)
                    .to_ordinal(ord),
                ord,
            );
            self.dag.edge(edge)?;
        }
        Ok(())
    }
}
