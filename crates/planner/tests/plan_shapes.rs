use std::sync::Arc;

use weir_planner::{
    co_aggregate_operation_builder, counting, create_dag, entry_output_fn, key_fn, keyed_window_result_fn,
    summing_i64, AggregateOperation, Key, Optimization, Pipeline, PlannerConfig, ProcessorSpec,
    Routing, SlidingWindowDef, Transform, WindowDefinition, FIRST_STAGE_VERTEX_NAME_SUFFIX,
};

fn int_key_fn() -> weir_planner::KeyFn {
    key_fn::<i64>(|v| Key::I64(*v))
}

#[test]
fn combining_operation_lowers_to_two_stages() {
    let mut p = Pipeline::new();
    let src = p.add(Transform::source("items")).unwrap();
    let kf = int_key_fn();
    p.add(Transform::group_aggregate(
        vec![src],
        vec![kf.clone()],
        counting().erased(),
        entry_output_fn(),
    ))
    .unwrap();

    let dag = create_dag(&p, &PlannerConfig::default()).unwrap();

    let (prepare_id, prepare) = dag
        .vertex_by_name(&format!("group-and-aggregate{FIRST_STAGE_VERTEX_NAME_SUFFIX}"))
        .expect("prepare vertex");
    assert!(matches!(
        prepare.processor,
        ProcessorSpec::AccumulateByKey { .. }
    ));
    let (combine_id, combine) = dag.vertex_by_name("group-and-aggregate").expect("combine vertex");
    assert!(matches!(combine.processor, ProcessorSpec::CombineByKey { .. }));

    // upstream edge into stage 1 is local partitioned with the declared key fn
    let into_prepare = dag.inbound_edges(prepare_id);
    assert_eq!(into_prepare.len(), 1);
    assert!(!into_prepare[0].distributed);
    let Routing::Partitioned { key_fn: edge_kf } = &into_prepare[0].routing else {
        panic!("expected partitioned edge into stage 1");
    };
    assert!(Arc::ptr_eq(edge_kf, &kf));

    // stage boundary is distributed and partitioned on the entry key
    let into_combine = dag.inbound_edges(combine_id);
    assert_eq!(into_combine.len(), 1);
    assert!(into_combine[0].distributed);
    assert!(into_combine[0].routing.is_partitioned());
}

#[test]
fn memory_preference_forces_single_stage() {
    let mut p = Pipeline::new();
    let src = p.add(Transform::source("items")).unwrap();
    p.add(
        Transform::group_aggregate(
            vec![src],
            vec![int_key_fn()],
            counting().erased(),
            entry_output_fn(),
        )
        .with_optimization(Optimization::Memory),
    )
    .unwrap();

    let dag = create_dag(&p, &PlannerConfig::default()).unwrap();

    assert_eq!(dag.vertices().len(), 2);
    let (agg_id, agg) = dag.vertex_by_name("group-and-aggregate").unwrap();
    assert!(matches!(agg.processor, ProcessorSpec::AggregateByKey { .. }));
    let inbound = dag.inbound_edges(agg_id);
    assert!(inbound[0].distributed);
    assert!(inbound[0].routing.is_partitioned());
}

#[test]
fn missing_combine_forces_single_stage() {
    let no_combine = AggregateOperation::<i64, i64>::builder(|| 0)
        .and_accumulate::<i64>(|acc, item| *acc += item)
        .and_export(|acc| *acc)
        .unwrap();

    let mut p = Pipeline::new();
    let src = p.add(Transform::source("items")).unwrap();
    p.add(Transform::group_aggregate(
        vec![src],
        vec![int_key_fn()],
        no_combine.erased(),
        entry_output_fn(),
    ))
    .unwrap();

    let dag = create_dag(&p, &PlannerConfig::default()).unwrap();
    assert_eq!(dag.vertices().len(), 2);
    assert!(dag
        .vertex_by_name(&format!("group-and-aggregate{FIRST_STAGE_VERTEX_NAME_SUFFIX}"))
        .is_none());
}

#[test]
fn cogroup_applies_key_functions_positionally() {
    let mut b = co_aggregate_operation_builder();
    b.add(summing_i64::<i64>(|v| *v)).unwrap();
    b.add(summing_i64::<i64>(|v| *v)).unwrap();
    b.add(counting()).unwrap();
    let op = b.build().unwrap();

    let mut p = Pipeline::new();
    let s0 = p.add(Transform::source("orders")).unwrap();
    let s1 = p.add(Transform::source("payments")).unwrap();
    let s2 = p.add(Transform::source("refunds")).unwrap();
    let key_fns: Vec<weir_planner::KeyFn> = (0..3).map(|_| int_key_fn()).collect();
    p.add(
        Transform::group_aggregate(
            vec![s0, s1, s2],
            key_fns.clone(),
            op.erased(),
            entry_output_fn(),
        )
        .with_optimization(Optimization::Memory),
    )
    .unwrap();

    let dag = create_dag(&p, &PlannerConfig::default()).unwrap();
    let (agg_id, agg) = dag.vertex_by_name("3-way cogroup-and-aggregate").unwrap();
    assert!(matches!(agg.processor, ProcessorSpec::AggregateByKey { .. }));

    let inbound = dag.inbound_edges(agg_id);
    assert_eq!(inbound.len(), 3);
    for (ord, edge) in inbound.iter().enumerate() {
        assert_eq!(edge.dest_ordinal, ord);
        assert!(edge.distributed);
        let Routing::Partitioned { key_fn: edge_kf } = &edge.routing else {
            panic!("expected partitioned edge at ordinal {ord}");
        };
        assert!(Arc::ptr_eq(edge_kf, &key_fns[ord]));
    }
}

#[test]
fn hash_join_broadcasts_enriching_streams() {
    let mut p = Pipeline::new();
    let primary = p.add(Transform::source("trades")).unwrap();
    let lookup = p.add(Transform::source("products")).unwrap();
    let rates = p.add(Transform::source("rates")).unwrap();
    p.add(Transform::hash_join(
        vec![primary, lookup, rates],
        vec![int_key_fn(), int_key_fn(), int_key_fn()],
    ))
    .unwrap();

    let dag = create_dag(&p, &PlannerConfig::default()).unwrap();
    let (join_id, join) = dag.vertex_by_name("3-way hash-join").unwrap();
    assert!(matches!(join.processor, ProcessorSpec::HashJoin { .. }));

    let inbound = dag.inbound_edges(join_id);
    assert!(!inbound[0].distributed);
    assert!(matches!(inbound[0].routing, Routing::Unicast));
    for edge in &inbound[1..] {
        assert!(edge.distributed);
        assert!(matches!(edge.routing, Routing::Broadcast));
    }
}

#[test]
fn windowed_aggregation_follows_the_two_stage_rule() {
    let window = WindowDefinition::Sliding(SlidingWindowDef::tumbling(1_000).unwrap());
    let mut p = Pipeline::new();
    let src = p.add(Transform::source("events")).unwrap();
    p.add(Transform::window_aggregate(
        window,
        vec![src],
        vec![int_key_fn()],
        counting().erased(),
        keyed_window_result_fn::<i64, i64>(|_start, _end, _key, result| Some(*result)),
    ))
    .unwrap();

    let dag = create_dag(&p, &PlannerConfig::default()).unwrap();
    let (_, prepare) = dag
        .vertex_by_name(&format!(
            "windowed-group-and-aggregate{FIRST_STAGE_VERTEX_NAME_SUFFIX}"
        ))
        .expect("frame accumulation vertex");
    assert!(matches!(
        prepare.processor,
        ProcessorSpec::AccumulateByFrame { .. }
    ));
    let (combine_id, combine) = dag.vertex_by_name("windowed-group-and-aggregate").unwrap();
    assert!(matches!(
        combine.processor,
        ProcessorSpec::CombineToWindow { .. }
    ));
    assert!(dag.inbound_edges(combine_id)[0].distributed);
}

#[test]
fn one_source_can_feed_several_consumers() {
    let mut p = Pipeline::new();
    let src = p.add(Transform::source("items")).unwrap();
    let mapped = p
        .add(Transform::map(
            src,
            weir_planner::map_fn::<i64, i64>(|v| Some(v + 1)),
        ))
        .unwrap();
    let filtered = p
        .add(Transform::filter(
            src,
            weir_planner::filter_fn::<i64>(|v| *v > 0),
        ))
        .unwrap();
    p.add(Transform::merge(vec![mapped, filtered])).unwrap();

    let dag = create_dag(&p, &PlannerConfig::default()).unwrap();
    let (src_id, _) = dag.vertex_by_name("items").unwrap();
    let outbound = dag.outbound_edges(src_id);
    assert_eq!(outbound.len(), 2);
    assert_eq!(outbound[0].source_ordinal, 0);
    assert_eq!(outbound[1].source_ordinal, 1);

    let (merge_id, merge) = dag.vertex_by_name("merge").unwrap();
    assert!(matches!(merge.processor, ProcessorSpec::Merge));
    for edge in dag.inbound_edges(merge_id) {
        assert!(!edge.distributed);
        assert!(matches!(edge.routing, Routing::Unicast));
    }
}

#[test]
fn parallelism_hint_overrides_planner_default() {
    let mut p = Pipeline::new();
    let src = p
        .add(Transform::source("items").with_local_parallelism(7))
        .unwrap();
    p.add(Transform::map(
        src,
        weir_planner::map_fn::<i64, i64>(|v| Some(*v)),
    ))
    .unwrap();

    let cfg = PlannerConfig {
        default_local_parallelism: 3,
    };
    let dag = create_dag(&p, &cfg).unwrap();
    assert_eq!(dag.vertex_by_name("items").unwrap().1.local_parallelism, 7);
    assert_eq!(dag.vertex_by_name("map").unwrap().1.local_parallelism, 3);
}
