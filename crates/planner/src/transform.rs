//! The transform graph: logical pipeline representation prior to physical
//! compilation.
//!
//! Transforms form a DAG by construction: a transform may only reference
//! upstream transforms already added to the pipeline, so pipeline order is a
//! topological order and the planner lowers transforms in one pass.

use weir_common::{Result, WeirError};

use crate::aggregate::DynAggregateOperation;
use crate::datamodel::{FilterFn, KeyFn, MapFn, MapToOutputFn, RollingOutputFn};
use crate::window::{KeyedWindowResultFn, WindowDefinition};

/// Index of a transform inside its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransformId(pub usize);

/// Planner preference for aggregation lowering.
///
/// `Memory` forces the single-stage plan (no local pre-aggregation buffer);
/// `NetworkTraffic` allows the two-stage plan, which pre-combines locally to
/// collapse many same-key inputs into one network message per member per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Optimization {
    Memory,
    #[default]
    NetworkTraffic,
}

/// Closed set of logical transform kinds the planner knows how to lower.
pub enum TransformKind {
    /// Root vertex instantiated from a registered source factory.
    Source { op_name: String },
    Map { map_fn: MapFn },
    Filter { filter_fn: FilterFn },
    /// Grouped (co-)aggregation. Key functions are positional: the i-th
    /// upstream always uses the i-th key function.
    GroupAggregate {
        key_fns: Vec<KeyFn>,
        op: DynAggregateOperation,
        output_fn: MapToOutputFn,
    },
    /// Grouped (co-)aggregation under a window definition.
    WindowAggregate {
        window: WindowDefinition,
        key_fns: Vec<KeyFn>,
        op: DynAggregateOperation,
        output_fn: KeyedWindowResultFn,
    },
    /// Unwindowed per-record aggregation: one updated result per input record
    /// per key.
    RollingAggregate {
        key_fn: KeyFn,
        op: DynAggregateOperation,
        output_fn: RollingOutputFn,
    },
    /// Upstream 0 is the primary stream; the remaining upstreams are
    /// broadcast enriching streams.
    HashJoin { key_fns: Vec<KeyFn> },
    Merge,
    /// Vertex instantiated from a registered custom processor factory.
    Custom { op_name: String },
}

/// One node of the transform graph. Immutable once added to a pipeline.
pub struct Transform {
    pub name: String,
    pub upstream: Vec<TransformId>,
    pub local_parallelism: Option<usize>,
    pub optimization: Optimization,
    pub kind: TransformKind,
}

impl Transform {
    fn new(name: String, upstream: Vec<TransformId>, kind: TransformKind) -> Self {
        Self {
            name,
            upstream,
            local_parallelism: None,
            optimization: Optimization::default(),
            kind,
        }
    }

    pub fn source(op_name: impl Into<String>) -> Self {
        let op_name = op_name.into();
        Self::new(op_name.clone(), Vec::new(), TransformKind::Source { op_name })
    }

    pub fn map(upstream: TransformId, map_fn: MapFn) -> Self {
        Self::new("map".to_string(), vec![upstream], TransformKind::Map { map_fn })
    }

    pub fn filter(upstream: TransformId, filter_fn: FilterFn) -> Self {
        Self::new(
            "filter".to_string(),
            vec![upstream],
            TransformKind::Filter { filter_fn },
        )
    }

    pub fn group_aggregate(
        upstream: Vec<TransformId>,
        key_fns: Vec<KeyFn>,
        op: DynAggregateOperation,
        output_fn: MapToOutputFn,
    ) -> Self {
        let name = group_name(upstream.len());
        Self::new(
            name,
            upstream,
            TransformKind::GroupAggregate {
                key_fns,
                op,
                output_fn,
            },
        )
    }

    pub fn window_aggregate(
        window: WindowDefinition,
        upstream: Vec<TransformId>,
        key_fns: Vec<KeyFn>,
        op: DynAggregateOperation,
        output_fn: KeyedWindowResultFn,
    ) -> Self {
        let name = windowed_group_name(upstream.len());
        Self::new(
            name,
            upstream,
            TransformKind::WindowAggregate {
                window,
                key_fns,
                op,
                output_fn,
            },
        )
    }

    pub fn rolling_aggregate(
        upstream: TransformId,
        key_fn: KeyFn,
        op: DynAggregateOperation,
        output_fn: RollingOutputFn,
    ) -> Self {
        Self::new(
            "rolling-aggregate".to_string(),
            vec![upstream],
            TransformKind::RollingAggregate {
                key_fn,
                op,
                output_fn,
            },
        )
    }

    pub fn hash_join(upstream: Vec<TransformId>, key_fns: Vec<KeyFn>) -> Self {
        let name = format!("{}-way hash-join", upstream.len());
        Self::new(name, upstream, TransformKind::HashJoin { key_fns })
    }

    pub fn merge(upstream: Vec<TransformId>) -> Self {
        Self::new("merge".to_string(), upstream, TransformKind::Merge)
    }

    pub fn custom(op_name: impl Into<String>, upstream: Vec<TransformId>) -> Self {
        let op_name = op_name.into();
        Self::new(op_name.clone(), upstream, TransformKind::Custom { op_name })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_local_parallelism(mut self, local_parallelism: usize) -> Self {
        self.local_parallelism = Some(local_parallelism);
        self
    }

    pub fn with_optimization(mut self, optimization: Optimization) -> Self {
        self.optimization = optimization;
        self
    }

    /// Number of declared upstream transforms.
    pub fn arity(&self) -> usize {
        self.upstream.len()
    }
}

fn group_name(upstream_count: usize) -> String {
    if upstream_count == 1 {
        "group-and-aggregate".to_string()
    } else {
        format!("{upstream_count}-way cogroup-and-aggregate")
    }
}

fn windowed_group_name(upstream_count: usize) -> String {
    if upstream_count == 1 {
        "windowed-group-and-aggregate".to_string()
    } else {
        format!("{upstream_count}-way windowed-cogroup-and-aggregate")
    }
}

/// The logical pipeline: an append-only DAG of transforms.
#[derive(Default)]
pub struct Pipeline {
    transforms: Vec<Transform>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transform. Upstream ids must reference transforms already in
    /// the pipeline, and the transform's declared functions must match its
    /// arity.
    pub fn add(&mut self, transform: Transform) -> Result<TransformId> {
        let id = TransformId(self.transforms.len());
        for up in &transform.upstream {
            if up.0 >= id.0 {
                return Err(WeirError::Planning(format!(
                    "transform '{}' references unknown upstream transform {}",
                    transform.name, up.0
                )));
            }
        }
        validate_arity(&transform)?;
        self.transforms.push(transform);
        Ok(id)
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

fn validate_arity(t: &Transform) -> Result<()> {
    let declared = t.arity();
    let fail = |detail: String| {
        Err(WeirError::Planning(format!(
            "transform '{}': {detail}",
            t.name
        )))
    };
    match &t.kind {
        TransformKind::Source { .. } => {
            if declared != 0 {
                return fail(format!("sources take no upstream, got {declared}"));
            }
        }
        TransformKind::Map { .. }
        | TransformKind::Filter { .. }
        | TransformKind::RollingAggregate { .. } => {
            if declared != 1 {
                return fail(format!("expected exactly one upstream, got {declared}"));
            }
        }
        TransformKind::GroupAggregate { key_fns, op, .. }
        | TransformKind::WindowAggregate { key_fns, op, .. } => {
            if declared == 0 {
                return fail("aggregation needs at least one upstream".to_string());
            }
            if key_fns.len() != declared {
                return fail(format!(
                    "{declared} upstreams need {declared} key functions, got {}",
                    key_fns.len()
                ));
            }
            if op.arity() != declared {
                return fail(format!(
                    "aggregate operation accumulates {} streams but {declared} upstreams are declared",
                    op.arity()
                ));
            }
        }
        TransformKind::HashJoin { key_fns } => {
            if declared < 2 {
                return fail(format!("hash-join needs at least two upstreams, got {declared}"));
            }
            if key_fns.len() != declared {
                return fail(format!(
                    "{declared} upstreams need {declared} key functions, got {}",
                    key_fns.len()
                ));
            }
        }
        TransformKind::Merge => {
            if declared < 2 {
                return fail(format!("merge needs at least two upstreams, got {declared}"));
            }
        }
        TransformKind::Custom { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Pipeline, Transform, TransformId};
    use crate::aggregate::counting;
    use crate::datamodel::{entry_output_fn, key_fn, Key};

    #[test]
    fn forward_upstream_reference_is_rejected() {
        let mut p = Pipeline::new();
        let err = p
            .add(Transform::map(
                TransformId(5),
                crate::datamodel::map_fn::<i64, i64>(|v| Some(*v)),
            ))
            .unwrap_err();
        assert!(err.to_string().contains("unknown upstream"));
    }

    #[test]
    fn cogroup_key_function_count_must_match_arity() {
        let mut p = Pipeline::new();
        let a = p.add(Transform::source("items-a")).unwrap();
        let b = p.add(Transform::source("items-b")).unwrap();
        // two upstreams but a single-input operation
        let err = p
            .add(Transform::group_aggregate(
                vec![a, b],
                vec![
                    key_fn::<i64>(|v| Key::I64(*v)),
                    key_fn::<i64>(|v| Key::I64(*v)),
                ],
                counting().erased(),
                entry_output_fn(),
            ))
            .unwrap_err();
        assert!(err.to_string().contains("accumulates 1 streams"));
    }

    #[test]
    fn group_names_follow_upstream_count() {
        let mut p = Pipeline::new();
        let a = p.add(Transform::source("items")).unwrap();
        let g = Transform::group_aggregate(
            vec![a],
            vec![key_fn::<i64>(|v| Key::I64(*v))],
            counting().erased(),
            entry_output_fn(),
        );
        assert_eq!(g.name, "group-and-aggregate");
        assert_eq!(
            Transform::hash_join(
                vec![a, a],
                vec![
                    key_fn::<i64>(|v| Key::I64(*v)),
                    key_fn::<i64>(|v| Key::I64(*v)),
                ],
            )
            .name,
            "2-way hash-join"
        );
    }
}
