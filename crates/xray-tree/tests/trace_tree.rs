use std::collections::BTreeSet;
use xray_tree::{
    Error, MemoryTraceSource, OrphanPolicy, SegmentBuilder, TraceId, TreeClient, TreeOptions, UnresolvedReason,
};

fn ingest(source: &MemoryTraceSource, trace_id: &str, segments: Vec<SegmentBuilder>) {
    source.ingest(
        &TraceId::new(trace_id),
        segments.into_iter().map(SegmentBuilder::into_document),
    );
}

fn header(trace_id: &str) -> String {
    format!("Root={trace_id};Sampled=1")
}

fn branching_trace(source: &MemoryTraceSource) {
    ingest(
        source,
        "1-abc-001",
        vec![
            SegmentBuilder::new("A"),
            SegmentBuilder::new("B").parent("A").child_link(&TraceId::new("1-abc-00x")),
            SegmentBuilder::new("C").parent("A"),
        ],
    );
    ingest(source, "1-abc-00x", vec![SegmentBuilder::new("D")]);
}

#[test]
fn siblings_become_separate_paths() {
    let source = MemoryTraceSource::new();
    branching_trace(&source);
    let client = TreeClient::new(&source);

    let tree = client.get_trace_tree(&header("1-abc-001"), &TreeOptions::default()).unwrap();

    assert_eq!(tree.root().id, "A");
    assert_eq!(tree.path_segment_ids(), vec![vec!["A", "B"], vec!["A", "C"]]);
    assert!(tree.child_traces().is_empty());
    assert!(tree.unresolved_links().is_empty());
}

#[test]
fn child_traces_are_spliced_under_the_linking_segment() {
    let source = MemoryTraceSource::new();
    branching_trace(&source);
    let client = TreeClient::new(&source);

    let tree = client
        .get_trace_tree(&header("1-abc-001"), &TreeOptions::new().with_child_traces(true))
        .unwrap();

    assert_eq!(tree.path_segment_ids(), vec![vec!["A", "B", "D"], vec!["A", "C"]]);
    let visited: Vec<&str> = tree.child_traces().keys().map(TraceId::as_str).collect();
    assert_eq!(visited, ["1-abc-00x"]);
    assert!(!tree.link_limit_exceeded());
}

#[test]
fn links_on_subsegments_are_followed_once_per_target() {
    let source = MemoryTraceSource::new();
    let linked = TraceId::new("1-abc-002");
    ingest(
        &source,
        "1-abc-001",
        vec![SegmentBuilder::new("A")
            .child_link(&linked)
            .subsegment(SegmentBuilder::new("A-publish").child_link(&linked))],
    );
    ingest(&source, "1-abc-002", vec![SegmentBuilder::new("consumer")]);

    let tree = TreeClient::new(&source)
        .get_trace_tree(&header("1-abc-001"), &TreeOptions::new().with_child_traces(true))
        .unwrap();

    assert_eq!(tree.path_segment_ids(), vec![vec!["A", "consumer"]]);
}

#[test]
fn step_functions_fan_out_has_three_paths() {
    let source = MemoryTraceSource::new();
    let sns_consumer = TraceId::new("1-abc-sns");
    ingest(
        &source,
        "1-abc-sfn",
        vec![
            SegmentBuilder::new("sfn")
                .origin("AWS::StepFunctions::StateMachine")
                .timing(1.0, 9.0)
                .subsegment(SegmentBuilder::new("task-a"))
                .subsegment(SegmentBuilder::new("task-b"))
                .subsegment(SegmentBuilder::new("task-c")),
            SegmentBuilder::new("lambda-a").origin("AWS::Lambda").parent("task-a").timing(2.0, 3.0),
            SegmentBuilder::new("lambda-b").origin("AWS::Lambda").parent("task-b").timing(3.0, 4.0),
            SegmentBuilder::new("sns").origin("AWS::SNS").parent("task-c").timing(4.0, 4.1).child_link(&sns_consumer),
        ],
    );
    ingest(
        &source,
        "1-abc-sns",
        vec![SegmentBuilder::new("consumer").origin("AWS::Lambda").timing(4.2, 5.0)],
    );

    let tree = TreeClient::new(&source)
        .get_trace_tree(&header("1-abc-sfn"), &TreeOptions::new().with_child_traces(true))
        .unwrap();

    let sfn = Some("AWS::StepFunctions::StateMachine");
    let lambda = Some("AWS::Lambda");
    assert_eq!(
        tree.path_origins(),
        vec![
            vec![sfn, lambda],
            vec![sfn, lambda],
            vec![sfn, Some("AWS::SNS"), lambda],
        ]
    );
}

#[test]
fn assembly_is_deterministic_for_frozen_data() {
    let source = MemoryTraceSource::new();
    branching_trace(&source);
    let client = TreeClient::new(&source);
    let options = TreeOptions::new().with_child_traces(true);

    let first = client.get_trace_tree(&header("1-abc-001"), &options).unwrap();
    let second = client.get_trace_tree(&header("1-abc-001"), &options).unwrap();
    assert_eq!(first, second);
}

#[test]
fn path_count_matches_leaf_count_and_every_path_starts_at_root() {
    let source = MemoryTraceSource::new();
    ingest(
        &source,
        "1-abc-001",
        vec![
            SegmentBuilder::new("root").timing(1.0, 10.0),
            SegmentBuilder::new("a").parent("root").timing(2.0, 3.0),
            SegmentBuilder::new("b").parent("root").timing(3.0, 4.0),
            SegmentBuilder::new("a1").parent("a").timing(2.1, 2.2),
            SegmentBuilder::new("a2").parent("a").timing(2.3, 2.4),
            SegmentBuilder::new("b1").parent("b").timing(3.1, 3.2),
        ],
    );

    let tree = TreeClient::new(&source)
        .get_trace_tree(&header("1-abc-001"), &TreeOptions::default())
        .unwrap();

    let leaves = tree.nodes().iter().filter(|node| node.is_leaf()).count();
    assert_eq!(tree.leaf_count(), leaves);
    for path in tree.paths() {
        assert_eq!(path[0].id, "root");
        let last = path[path.len() - 1];
        assert!(tree.nodes().iter().any(|node| node.segment.id == last.id && node.is_leaf()));
    }
}

#[test]
fn linking_back_into_the_chain_is_a_cycle() {
    let source = MemoryTraceSource::new();
    ingest(
        &source,
        "1-abc-001",
        vec![SegmentBuilder::new("A").child_link(&TraceId::new("1-abc-002"))],
    );
    ingest(
        &source,
        "1-abc-002",
        vec![SegmentBuilder::new("B").child_link(&TraceId::new("1-abc-001"))],
    );

    let err = TreeClient::new(&source)
        .get_trace_tree(&header("1-abc-001"), &TreeOptions::new().with_child_traces(true))
        .unwrap_err();

    match err {
        Error::LinkCycleDetected { ref trace_id, ref chain } => {
            assert_eq!(trace_id.as_str(), "1-abc-001");
            assert_eq!(chain, &[TraceId::new("1-abc-001"), TraceId::new("1-abc-002")]);
        }
        other => panic!("expected a link cycle, got {other:?}"),
    }
    assert!(!err.is_transient());
    assert!(err.to_string().contains("1-abc-001 -> 1-abc-002"));
}

#[test]
fn the_same_child_trace_under_two_branches_is_not_a_cycle() {
    let source = MemoryTraceSource::new();
    let shared = TraceId::new("1-abc-shared");
    ingest(
        &source,
        "1-abc-001",
        vec![
            SegmentBuilder::new("A").timing(1.0, 5.0),
            SegmentBuilder::new("B").parent("A").timing(2.0, 3.0).child_link(&shared),
            SegmentBuilder::new("C").parent("A").timing(3.0, 4.0).child_link(&shared),
        ],
    );
    ingest(&source, "1-abc-shared", vec![SegmentBuilder::new("S")]);

    let tree = TreeClient::new(&source)
        .get_trace_tree(&header("1-abc-001"), &TreeOptions::new().with_child_traces(true))
        .unwrap();

    assert_eq!(tree.path_segment_ids(), vec![vec!["A", "B", "S"], vec!["A", "C", "S"]]);
    assert_eq!(tree.child_traces().len(), 1);
    // one request for the source trace, one for the shared child
    assert_eq!(source.request_count(), 2);
}

#[test]
fn link_depth_is_capped() {
    let source = MemoryTraceSource::new();
    for level in 0..8 {
        ingest(
            &source,
            &format!("1-abc-{level:03}"),
            vec![SegmentBuilder::new(format!("s{level}")).child_link(&TraceId::new(format!("1-abc-{:03}", level + 1)))],
        );
    }

    let tree = TreeClient::new(&source)
        .get_trace_tree(&header("1-abc-000"), &TreeOptions::new().with_child_traces(true))
        .unwrap();

    assert_eq!(
        tree.path_segment_ids(),
        vec![vec!["s0", "s1", "s2", "s3", "s4", "s5"]]
    );
    assert!(tree.link_limit_exceeded());
    assert!(tree.is_possibly_incomplete());
    let unresolved = tree.unresolved_links();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].segment_id, "s5");
    assert_eq!(unresolved[0].trace_id.as_str(), "1-abc-006");
    assert_eq!(unresolved[0].reason, UnresolvedReason::DepthLimit);

    let shallow = TreeClient::new(&source)
        .get_trace_tree(
            &header("1-abc-000"),
            &TreeOptions::new().with_child_traces(true).with_max_link_depth(2),
        )
        .unwrap();
    assert_eq!(shallow.path_segment_ids(), vec![vec!["s0", "s1", "s2"]]);
    let visited: BTreeSet<&str> = shallow.child_traces().keys().map(TraceId::as_str).collect();
    assert_eq!(visited, BTreeSet::from(["1-abc-001", "1-abc-002"]));
}

#[test]
fn missing_child_traces_are_left_unresolved() {
    let source = MemoryTraceSource::new();
    ingest(
        &source,
        "1-abc-001",
        vec![SegmentBuilder::new("A").child_link(&TraceId::new("1-abc-late"))],
    );

    let tree = TreeClient::new(&source)
        .get_trace_tree(&header("1-abc-001"), &TreeOptions::new().with_child_traces(true))
        .unwrap();

    assert_eq!(tree.path_segment_ids(), vec![vec!["A"]]);
    assert!(!tree.link_limit_exceeded());
    assert_eq!(tree.unresolved_links()[0].reason, UnresolvedReason::NotFound);
}

#[test]
fn orphans_in_child_traces_follow_the_policy() {
    let source = MemoryTraceSource::new();
    ingest(
        &source,
        "1-abc-001",
        vec![SegmentBuilder::new("A").child_link(&TraceId::new("1-abc-002"))],
    );
    ingest(
        &source,
        "1-abc-002",
        vec![SegmentBuilder::new("B"), SegmentBuilder::new("B-orphan").parent("gone")],
    );
    let client = TreeClient::new(&source);

    let options = TreeOptions::new()
        .with_child_traces(true)
        .with_orphan_policy(OrphanPolicy::Retry);
    let err = client.get_trace_tree(&header("1-abc-001"), &options).unwrap_err();
    assert!(matches!(err, Error::ParentNotIngested { ref trace_id, .. } if trace_id.as_str() == "1-abc-002"));
}

#[test]
fn header_problems_are_reported_before_fetching() {
    let source = MemoryTraceSource::new();
    let client = TreeClient::new(&source);

    let err = client.get_trace_tree("Sampled=1", &TreeOptions::default()).unwrap_err();
    assert!(matches!(err, Error::MalformedHeader(_)));
    assert!(!err.is_transient());
    assert_eq!(source.request_count(), 0);
}

#[test]
fn tree_output_serializes_paths_and_traces() {
    let source = MemoryTraceSource::new();
    branching_trace(&source);

    let tree = TreeClient::new(&source)
        .get_trace_tree(&header("1-abc-001"), &TreeOptions::new().with_child_traces(true))
        .unwrap();
    let json = serde_json::to_value(tree.output()).unwrap();

    assert_eq!(json["root"]["id"], "A");
    assert_eq!(json["paths"].as_array().map(Vec::len), Some(2));
    assert_eq!(json["paths"][0][2]["id"], "D");
    assert_eq!(json["source_trace"]["id"], "1-abc-001");
    assert!(json["child_traces"]["1-abc-00x"].is_object());
    assert_eq!(json["link_limit_exceeded"], false);
}
