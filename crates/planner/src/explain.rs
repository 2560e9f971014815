use crate::dag::{Dag, Edge, Routing};

/// Render the physical DAG as human-readable multiline text.
pub fn explain_dag(dag: &Dag) -> String {
    let mut s = String::new();
    for (i, v) in dag.vertices().iter().enumerate() {
        s.push_str(&format!(
            "v{i} {} parallelism={} processor={}\n",
            v.name,
            v.local_parallelism,
            v.processor.kind_name()
        ));
    }
    for e in dag.edges() {
        s.push_str(&format!(
            "v{}:{} -> v{}:{} {} {}\n",
            e.source.0,
            e.source_ordinal,
            e.dest.0,
            e.dest_ordinal,
            if e.distributed { "distributed" } else { "local" },
            fmt_routing(e)
        ));
    }
    s
}

fn fmt_routing(e: &Edge) -> &'static str {
    match e.routing {
        Routing::Unicast => "unicast",
        Routing::Broadcast => "broadcast",
        Routing::Partitioned { .. } => "partitioned",
    }
}
