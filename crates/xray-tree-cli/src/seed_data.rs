//! Seed data for trying the tool without a tracing backend
//!
//! A Step Functions state machine fans out to two Lambda functions and an SNS
//! topic; the topic's subscriber runs in its own trace, linked from the SNS
//! segment.

use xray_tree::{MemoryTraceSource, SegmentBuilder, TraceId, TracingHeader};

pub const SEED_TRACE_ID: &str = "1-6530f1a0-9c2f4e6b8d1a3c5e7f902468";
pub const SEED_SUBSCRIBER_TRACE_ID: &str = "1-6530f1a1-2b4d6f8a0c1e3a5c7e9b1d3f";

/// Number of root-to-leaf paths in the seed trace once the subscriber trace is followed
pub const SEED_PATH_COUNT: usize = 3;

/// Header pointing at the seed state machine execution
pub fn seed_header() -> TracingHeader {
    TracingHeader::sampled(TraceId::new(SEED_TRACE_ID))
}

/// Build a source holding the seed traces
pub fn seed_source() -> MemoryTraceSource {
    let source = MemoryTraceSource::new();
    load_seed_data(&source);
    source
}

/// Load seed traces into the source
pub fn load_seed_data(source: &MemoryTraceSource) {
    let trace_id = TraceId::new(SEED_TRACE_ID);
    let subscriber = TraceId::new(SEED_SUBSCRIBER_TRACE_ID);
    let t0 = 1_697_706_400.0;

    // 1. State machine execution with one task per branch
    let state_machine = SegmentBuilder::new("4f2a9c1e7b3d5a08")
        .name("order-workflow")
        .origin("AWS::StepFunctions::StateMachine")
        .timing(t0, t0 + 1.250)
        .with_aws(serde_json::json!({
            "stepfunctions": {
                "arn": "arn:aws:states:us-east-1:123456789012:execution:order-workflow:5d1e"
            }
        }))
        .subsegment(
            SegmentBuilder::new("a1c3e5f7092b4d6f")
                .name("ValidateOrder")
                .timing(t0 + 0.010, t0 + 0.310)
                .subsegment(
                    SegmentBuilder::new("b2d4f6a8103c5e7a")
                        .name("Lambda")
                        .namespace("aws")
                        .timing(t0 + 0.012, t0 + 0.305),
                ),
        )
        .subsegment(
            SegmentBuilder::new("c3e5a7b9214d6f8b")
                .name("ChargeCard")
                .timing(t0 + 0.320, t0 + 0.910)
                .subsegment(
                    SegmentBuilder::new("d4f6b8c0325e7a9c")
                        .name("Lambda")
                        .namespace("aws")
                        .timing(t0 + 0.322, t0 + 0.900),
                ),
        )
        .subsegment(
            SegmentBuilder::new("e5a7c9d1436f8bad")
                .name("NotifyCustomer")
                .timing(t0 + 0.920, t0 + 1.240)
                .subsegment(
                    SegmentBuilder::new("f6b8d0e2547a9cbe")
                        .name("SNS")
                        .namespace("aws")
                        .timing(t0 + 0.921, t0 + 1.010),
                ),
        );

    // 2. Functions invoked by the first two tasks
    let validate = SegmentBuilder::new("0a2c4e6f8b1d3f5a")
        .name("validate-order")
        .origin("AWS::Lambda")
        .parent("b2d4f6a8103c5e7a")
        .timing(t0 + 0.020, t0 + 0.300)
        .with_annotation("order_id", "ord-8812");
    let charge = SegmentBuilder::new("1b3d5f7a9c2e4a6b")
        .name("charge-card")
        .origin("AWS::Lambda")
        .parent("d4f6b8c0325e7a9c")
        .timing(t0 + 0.330, t0 + 0.890)
        .subsegment(
            SegmentBuilder::new("2c4e6a8b0d3f5b7c")
                .name("payments.example.com")
                .namespace("remote")
                .timing(t0 + 0.400, t0 + 0.850),
        );

    // 3. The topic itself, linking to the subscriber trace
    let topic = SegmentBuilder::new("3d5f7b9c1e4a6c8d")
        .name("order-notifications")
        .origin("AWS::SNS")
        .parent("f6b8d0e2547a9cbe")
        .timing(t0 + 0.930, t0 + 1.000)
        .child_link(&subscriber);

    source.ingest(
        &trace_id,
        [state_machine, validate, charge, topic].map(SegmentBuilder::into_document),
    );

    // 4. Subscriber, traced separately
    let email = SegmentBuilder::new("4e6a8c0d2f5b7d9e")
        .name("send-confirmation-email")
        .origin("AWS::Lambda")
        .timing(t0 + 1.100, t0 + 1.450)
        .parent_link(&trace_id);
    source.ingest(&subscriber, [email.into_document()]);
    source.set_duration(&trace_id, 1.25);
    source.set_duration(&subscriber, 0.35);
}

#[cfg(test)]
mod tests {
    use super::*;
    use xray_tree::{TreeClient, TreeOptions};

    #[test]
    fn seed_trace_has_the_advertised_paths() {
        let client = TreeClient::new(seed_source());
        let tree = client
            .get_trace_tree_for(&seed_header(), &TreeOptions::new().with_child_traces(true))
            .unwrap();

        assert_eq!(tree.leaf_count(), SEED_PATH_COUNT);
        assert_eq!(tree.root().name, "order-workflow");
        let last = tree.paths().pop().unwrap();
        assert_eq!(last.last().map(|s| s.name.as_str()), Some("send-confirmation-email"));
    }

    #[test]
    fn without_links_the_subscriber_is_missing() {
        let client = TreeClient::new(seed_source());
        let tree = client.get_trace_tree_for(&seed_header(), &TreeOptions::default()).unwrap();
        assert_eq!(tree.leaf_count(), SEED_PATH_COUNT);
        assert!(tree.child_traces().is_empty());
    }
}
