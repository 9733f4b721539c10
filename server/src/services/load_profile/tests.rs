//! Load-profile parser and analyzer tests

use super::models::AttrValue;
use super::tree_parser::TreeParser;
use super::{ValueParser, analyze};
use crate::models::Severity;
use crate::services::rules::RuleLibrary;

const SINK_PROFILE: &str = r#"
OlapTableSink:
   - TotalTime: 20s
   - PrepareTime: 100ms
   - OpenTime: 400ms
  Index (id=10176):
     - AddChunkTime: 10s
     - WaitFlushTime: 6s
     - WaitWriterTime: 1s
     - WaitReplicaTime: 1s
    Channel (host=10.0.0.1):
       - AddChunkNum: 1,024
       - AddRowNum: 2,000,000
    Channel (host=10.0.0.2):
       - AddChunkNum: 980
       - AddRowNum: 1,900,000
"#;

#[test]
fn parses_tree_shape_in_document_order() {
    let tree = TreeParser::parse(SINK_PROFILE).unwrap();
    let shape = tree.shape();
    let labels: Vec<(usize, &str)> = shape.iter().map(|(d, l)| (*d, l.as_str())).collect();
    assert_eq!(labels, vec![
        (0, "OlapTableSink"),
        (1, "Index"),
        (2, "Channel"),
        (2, "Channel"),
    ]);
}

#[test]
fn header_params_become_attributes() {
    let tree = TreeParser::parse(SINK_PROFILE).unwrap();
    let index = &tree.roots[0].children[0];
    assert_eq!(index.param("id"), Some("10176"));
    let channel = &index.children[0];
    assert_eq!(channel.param("host"), Some("10.0.0.1"));
}

#[test]
fn attribute_values_are_normalized() {
    let tree = TreeParser::parse(SINK_PROFILE).unwrap();
    let sink = &tree.roots[0];
    assert_eq!(sink.time_ms("TotalTime"), Some(20_000.0));
    assert_eq!(sink.time_ms("PrepareTime"), Some(100.0));

    let channel = &tree.roots[0].children[0].children[0];
    assert_eq!(channel.attr("AddChunkNum").unwrap().value, AttrValue::Int(1024));
    assert_eq!(channel.attr("AddRowNum").unwrap().value, AttrValue::Int(2_000_000));
}

#[test]
fn min_max_variants_fold_onto_base_attribute() {
    let profile = r#"
Index (id=1):
   - AddChunkTime: 4s
   - __MAX_OF_AddChunkTime: 6s
   - __MIN_OF_AddChunkTime: 2s
"#;
    let tree = TreeParser::parse(profile).unwrap();
    let attr = tree.roots[0].attr("AddChunkTime").unwrap();
    assert_eq!(attr.value, AttrValue::TimeMs(4000.0));
    assert_eq!(attr.max, Some(AttrValue::TimeMs(6000.0)));
    assert_eq!(attr.min, Some(AttrValue::TimeMs(2000.0)));
}

#[test]
fn unknown_attributes_are_retained_verbatim() {
    let profile = r#"
Sink:
   - LoadMode: STREAM
"#;
    let tree = TreeParser::parse(profile).unwrap();
    let attr = tree.roots[0].attr("LoadMode").unwrap();
    assert_eq!(attr.value, AttrValue::Text("STREAM".to_string()));
}

#[test]
fn render_preserves_depth_label_sequence() {
    let tree = TreeParser::parse(SINK_PROFILE).unwrap();
    let rendered = TreeParser::render(&tree);
    let reparsed = TreeParser::parse(&rendered).unwrap();
    assert_eq!(tree.shape(), reparsed.shape());
}

#[test]
fn flush_bottleneck_detected_replica_not() {
    // AddChunkTime=10s, WaitFlush=6s (60% -> warning/high), WaitWriter=1s
    // (10% < 30%), WaitReplica=1s (10% < 20%).
    let rules = RuleLibrary::default();
    let analysis = analyze(SINK_PROFILE, &rules).unwrap();

    let flush = analysis
        .findings
        .iter()
        .find(|f| f.kind == "bottleneck_memtable_flush")
        .expect("flush bottleneck expected");
    assert_eq!(flush.severity, Severity::Warning);
    assert_eq!(flush.priority, crate::models::Priority::High);
    assert_eq!(flush.evidence["wait_ratio"].as_f64().unwrap(), 0.6);

    assert!(
        !analysis
            .findings
            .iter()
            .any(|f| f.kind == "bottleneck_replica_sync"),
        "replica ratio 10% is below the 20% bound"
    );
    assert!(
        !analysis
            .findings
            .iter()
            .any(|f| f.kind == "bottleneck_sink_writer")
    );
}

#[test]
fn dominant_wait_escalates_to_critical() {
    let profile = r#"
Index (id=2):
   - AddChunkTime: 10s
   - WaitFlushTime: 9s
"#;
    let rules = RuleLibrary::default();
    let analysis = analyze(profile, &rules).unwrap();
    let flush = analysis
        .findings
        .iter()
        .find(|f| f.kind == "bottleneck_memtable_flush")
        .unwrap();
    assert_eq!(flush.severity, Severity::Critical);
}

#[test]
fn profile_with_zero_channels_is_fine() {
    let profile = r#"
OlapTableSink:
   - TotalTime: 1s
  Index (id=3):
     - AddChunkTime: 900ms
     - WaitFlushTime: 10ms
"#;
    let rules = RuleLibrary::default();
    let analysis = analyze(profile, &rules).unwrap();
    assert!(
        analysis
            .findings
            .iter()
            .all(|f| !f.kind.starts_with("bottleneck_"))
    );
}

#[test]
fn unaccounted_time_is_reported() {
    // Total 60s, accounted phases sum to 10.5s -> ~82% unaccounted.
    let profile = r#"
OlapTableSink:
   - TotalTime: 60s
   - PrepareTime: 200ms
   - OpenTime: 300ms
  Index (id=4):
     - AddChunkTime: 10s
"#;
    let rules = RuleLibrary::default();
    let analysis = analyze(profile, &rules).unwrap();
    let missing = analysis
        .findings
        .iter()
        .find(|f| f.kind == "missing_time")
        .expect("missing_time expected");
    assert_eq!(missing.severity, Severity::Warning);
    let sources = missing.evidence["probable_sources"].as_array().unwrap();
    assert!(sources.iter().any(|s| s == "transaction publish"));
}

#[test]
fn summary_below_phase_sum_is_not_an_error() {
    // Overlapping timers can exceed wall time; that is covered, not missing.
    let profile = r#"
OlapTableSink:
   - TotalTime: 5s
  Index (id=5):
     - AddChunkTime: 8s
"#;
    let rules = RuleLibrary::default();
    let analysis = analyze(profile, &rules).unwrap();
    assert!(!analysis.findings.iter().any(|f| f.kind == "missing_time"));
}

#[test]
fn value_parser_round_trips_times() {
    for (text, ms) in [
        ("90ms", 90.0),
        ("1s90ms", 1090.0),
        ("2m", 120_000.0),
        ("1h2m3s", 3_723_000.0),
    ] {
        assert_eq!(ValueParser::parse_time_to_ms(text), Some(ms), "for {}", text);
    }
}
