//! Poll for a trace tree while another thread ingests its segments.
//!
//! Run with `RUST_LOG=xray_tree=debug cargo run --example poll_tree` to watch
//! the retry loop back off.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use xray_tree::{MemoryTraceSource, SegmentBuilder, TraceId, TracingHeader, TreeClient, TreeOptions};

fn main() -> Result<(), xray_tree::Error> {
    tracing_subscriber::fmt::init();

    let header = TracingHeader::new_sampled();
    let source = Arc::new(MemoryTraceSource::new());

    let writer = {
        let source = Arc::clone(&source);
        let trace_id: TraceId = header.root.clone();
        thread::spawn(move || {
            let segments = [
                SegmentBuilder::new("api").origin("AWS::ApiGateway::Stage").timing(1.0, 2.0),
                SegmentBuilder::new("handler").origin("AWS::Lambda").parent("api").timing(1.1, 1.8),
                SegmentBuilder::new("audit").origin("AWS::Lambda").parent("api").timing(1.2, 1.5),
            ];
            for segment in segments {
                thread::sleep(Duration::from_millis(200));
                source.ingest(&trace_id, [segment.into_document()]);
            }
        })
    };

    let client = TreeClient::new(Arc::clone(&source));
    let options = TreeOptions::default();
    let found = client.retry_get_trace_tree_until(
        &header.to_string(),
        &options,
        |tree| match tree.leaf_count() {
            2 => Ok(()),
            n => Err(format!("{n} of 2 paths so far")),
        },
        10.0,
    )?;
    writer.join().expect("writer thread panicked");

    if found {
        let tree = client.get_trace_tree_for(&header, &options)?;
        for path in tree.path_origins() {
            let hops: Vec<&str> = path.iter().map(|origin| origin.unwrap_or("?")).collect();
            println!("{}", hops.join(" -> "));
        }
    } else {
        println!("gave up waiting for {header}");
    }
    Ok(())
}
