use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use xray_tree::retry::{Predicate, RetryEvent};
use xray_tree::{
    Error, MemoryTraceSource, Retry, SegmentBuilder, Timeout, TraceId, TracingHeader, TreeClient, TreeOptions,
};

fn fast_client(source: Arc<MemoryTraceSource>) -> TreeClient<Arc<MemoryTraceSource>> {
    TreeClient::new(source).with_base_delay(Duration::from_millis(5))
}

#[test]
fn missing_trace_times_out_with_false() {
    let client = TreeClient::new(MemoryTraceSource::new());
    let start = Instant::now();

    let matched = client
        .retry_get_trace_tree_until(
            "Root=nonexistent;Sampled=1",
            &TreeOptions::default(),
            |_| Ok::<_, String>(()),
            2.0,
        )
        .unwrap();

    assert!(!matched);
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[test]
fn waits_for_segments_ingested_concurrently() {
    let source = Arc::new(MemoryTraceSource::new());
    let trace_id = TraceId::new("1-abc-001");
    source.ingest(&trace_id, [SegmentBuilder::new("A").timing(1.0, 5.0).into_document()]);

    let writer = {
        let source = Arc::clone(&source);
        let trace_id = trace_id.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            source.ingest(&trace_id, [SegmentBuilder::new("B").parent("A").timing(2.0, 3.0).into_document()]);
            thread::sleep(Duration::from_millis(50));
            source.ingest(&trace_id, [SegmentBuilder::new("C").parent("A").timing(3.0, 4.0).into_document()]);
        })
    };

    let matched = fast_client(Arc::clone(&source))
        .retry_get_trace_tree_until(
            "Root=1-abc-001;Sampled=1",
            &TreeOptions::default(),
            |tree| match tree.leaf_count() {
                2 => Ok(()),
                n => Err(format!("expected 2 paths, found {n}")),
            },
            10.0,
        )
        .unwrap();
    writer.join().unwrap();

    assert!(matched);
    assert!(source.request_count() > 1);
}

#[test]
fn in_progress_leaves_are_polled_until_closed() {
    let source = Arc::new(MemoryTraceSource::new());
    let trace_id = TraceId::new("1-abc-001");
    source.ingest(
        &trace_id,
        [
            SegmentBuilder::new("A").timing(1.0, 5.0).into_document(),
            SegmentBuilder::new("B").parent("A").in_progress().into_document(),
        ],
    );

    let writer = {
        let source = Arc::clone(&source);
        let trace_id = trace_id.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            source.ingest(&trace_id, [SegmentBuilder::new("B").parent("A").timing(2.0, 3.0).into_document()]);
        })
    };

    let matched = fast_client(Arc::clone(&source))
        .retry_get_trace_tree_until_matches(
            "Root=1-abc-001;Sampled=1",
            &TreeOptions::default(),
            |tree| tree.paths().iter().all(|path| path.iter().all(|s| !s.is_in_progress())),
            10.0,
        )
        .unwrap();
    writer.join().unwrap();

    assert!(matched);
}

#[test]
fn backend_failures_abort_without_retrying() {
    let source = Arc::new(MemoryTraceSource::new());
    source.fail_with("ThrottlingException: rate exceeded");

    let start = Instant::now();
    let err = fast_client(Arc::clone(&source))
        .retry_get_trace_tree_until_matches("Root=1-abc-001;Sampled=1", &TreeOptions::default(), |_| true, 0.0)
        .unwrap_err();

    assert!(matches!(err, Error::Backend(_)));
    assert_eq!(source.request_count(), 1);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn invalid_arguments_fail_before_any_fetch() {
    let source = Arc::new(MemoryTraceSource::new());
    let client = fast_client(Arc::clone(&source));

    let err = client
        .retry_get_trace_tree_until_matches("Root=1-abc-001", &TreeOptions::default(), |_| true, -1.0)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTimeout(secs) if secs == -1.0));

    let err = client
        .retry_get_trace_tree_until_matches("Parent=53995c3f42cd8ad8", &TreeOptions::default(), |_| true, 1.0)
        .unwrap_err();
    assert!(matches!(err, Error::MalformedHeader(_)));

    assert_eq!(source.request_count(), 0);
}

#[test]
fn custom_observers_see_every_attempt() {
    let source = Arc::new(MemoryTraceSource::new());
    let trace_id = TraceId::new("1-abc-001");
    source.ingest(&trace_id, [SegmentBuilder::new("A").into_document()]);
    source.defer(&trace_id, 1);

    let mut attempts = 0;
    let mut rejections = 0;
    let observer = |event: RetryEvent<'_>| match event {
        RetryEvent::Attempt { .. } => attempts += 1,
        RetryEvent::Rejected { .. } => rejections += 1,
        _ => {}
    };

    let client = TreeClient::new(Arc::clone(&source));
    let mut retry = Retry::with_observer(
        client
            .policy(Timeout::After(Duration::from_secs(5)))
            .with_base_delay(Duration::from_millis(1)),
        observer,
    );
    let calls = std::cell::Cell::new(0);
    let matched = client
        .retry_get_trace_tree_with(
            &TracingHeader::sampled(trace_id),
            &TreeOptions::default(),
            Predicate(|_: &xray_tree::Tree| {
                calls.set(calls.get() + 1);
                calls.get() == 2
            }),
            &mut retry,
        )
        .unwrap();
    drop(retry);

    assert!(matched);
    assert_eq!(attempts, 2);
    assert_eq!(rejections, 1);
}
