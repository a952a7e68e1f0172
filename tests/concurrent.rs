use serde_json::json;
use std::sync::Arc;
use zipkin_trace_view::{api::decode_spans, trace_detail, trace_summaries, SortOrder, SummaryOptions};

#[tokio::test(flavor = "multi_thread")]
async fn independent_pipelines_agree() {
    let body = json!([
        {"traceId": "1", "id": "a", "kind": "CLIENT", "timestamp": 1_000_000, "duration": 100,
         "localEndpoint": {"serviceName": "frontend", "ipv4": "172.17.0.13"}},
        {"traceId": "1", "id": "b", "parentId": "a", "kind": "SERVER", "timestamp": 1_000_040, "duration": 50,
         "localEndpoint": {"serviceName": "backend", "ipv4": "172.17.0.9"}},
        {"traceId": "1", "id": "c", "parentId": "b", "name": "query", "timestamp": 1_000_045, "duration": 20,
         "localEndpoint": {"serviceName": "backend", "ipv4": "172.17.0.9"},
         "tags": {"error": "timeout"}}
    ]);
    let raw = Arc::new(decode_spans(body.to_string().as_bytes()).unwrap());
    let expected = trace_detail(&raw, None).unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let raw = raw.clone();
            tokio::spawn(async move {
                let detail = trace_detail(&raw, None);
                let summaries = trace_summaries(&[raw.to_vec()], &SummaryOptions::default(), SortOrder::default());
                (detail, summaries)
            })
        })
        .collect();

    for task in tasks {
        let (detail, summaries) = task.await.unwrap();
        assert_eq!(detail.as_ref(), Some(&expected));
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].info_class, "trace-error-critical");
    }
}
