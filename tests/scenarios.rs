//! End-to-end trace runs over small requirement sets.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::*;
use reqtrace::{
    DomainLexicon, EmbeddingChain, EmbeddingProvider, ExtraColumns, MatchingConfig, Method,
    Pipeline, RULE_SCORE, RequirementRecord, fuse,
};

fn groups(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn identical_text_scores_near_one() {
    let pipeline = pipeline_with(hashing_chain());
    let out = pipeline
        .run(
            records(&[("C1", "Adjust speaker volume during night mode")]),
            records(&[
                ("P1", "Adjust speaker volume during night mode"),
                ("P2", "Battery backup power"),
            ]),
        )
        .await
        .unwrap();

    let top = &out.matrix.get("C1").unwrap()[0];
    assert_eq!(top.parent_id, "P1");
    assert!(top.score_tfidf > 0.999, "tfidf {}", top.score_tfidf);
    assert!(top.score_embedding.unwrap() > 0.999);
    assert!(top.computed_score > 0.999);
    assert_eq!(top.score_rule, None);
    assert_eq!(top.method_used, Method::Embedding);
}

#[tokio::test]
async fn shared_lexicon_group_without_lexical_overlap() {
    let lexicon =
        DomainLexicon::from_groups([("SpO2", vec!["spo2", "oxygen saturation"])]).unwrap();
    let pipeline = Pipeline::new(MatchingConfig::default(), lexicon, hashing_chain()).unwrap();
    let out = pipeline
        .run(
            records(&[("C1", "SpO2 desaturation")]),
            records(&[("P1", "oxygen saturation")]),
        )
        .await
        .unwrap();

    let entry = &out.matrix.get("C1").unwrap()[0];
    assert_eq!(entry.parent_id, "P1");
    assert_eq!(entry.score_rule, Some(RULE_SCORE));
    assert_eq!(entry.score_tfidf, 0.0);
    assert_eq!(entry.method_used, Method::Fusion);
    assert_eq!(entry.matched_groups, groups(&["SpO2"]));
    assert!(entry.computed_score >= RULE_SCORE);
    assert_eq!(out.rows[0].to_record()[9], "SpO2");
}

#[tokio::test]
async fn child_empty_after_preprocessing_is_orphan() {
    let pipeline = pipeline_with(hashing_chain());
    let out = pipeline
        .run(
            records(&[
                ("C1", "The user shall be able to"),
                ("C2", "Display SpO2 trend"),
            ]),
            records(&[("P1", "SpO2 trend display")]),
        )
        .await
        .unwrap();

    assert!(out.matrix.get("C1").unwrap().is_empty());
    assert!(out.report.orphan_children.contains(&"C1".to_string()));
    assert!(!out.report.orphan_children.contains(&"C2".to_string()));

    let placeholder = out.rows.iter().find(|r| r.child_id == "C1").unwrap();
    assert!(placeholder.is_placeholder());
    assert_eq!(placeholder.computed_score, 0.0);
    assert_eq!(placeholder.score_tfidf, 0.0);
    assert_eq!(placeholder.score_embedding, None);
    assert_eq!(placeholder.score_rule, None);
    assert_eq!(placeholder.child_text, "The user shall be able to");
    assert_eq!(placeholder.method_label(), "N/A");
}

#[tokio::test]
async fn empty_child_not_orphan_at_zero_threshold() {
    let config = MatchingConfig {
        orphan_threshold: 0.0,
        ..MatchingConfig::default()
    };
    let pipeline = Pipeline::new(config, lexicon(), hashing_chain()).unwrap();
    let out = pipeline
        .run(
            records(&[
                ("C1", "The user shall be able to"),
                ("C2", "Display SpO2 trend"),
            ]),
            records(&[("P1", "SpO2 trend display")]),
        )
        .await
        .unwrap();

    assert!(out.matrix.get("C1").unwrap().is_empty());
    assert!(out.report.orphan_children.is_empty());
}

#[tokio::test]
async fn unmatched_parent_reported_childless() {
    let config = MatchingConfig {
        top_k: 2,
        ..MatchingConfig::default()
    };
    let pipeline = Pipeline::new(config, lexicon(), EmbeddingChain::disabled()).unwrap();
    let out = pipeline
        .run(
            records(&[
                ("C1", "Display oxygen saturation trend"),
                ("C2", "Oxygen saturation alarm limit"),
            ]),
            records(&[
                ("P1", "Oxygen saturation display"),
                ("P2", "Battery backup power"),
            ]),
        )
        .await
        .unwrap();

    assert_eq!(out.report.childless_parents, vec!["P2"]);
    assert_eq!(out.rows.len(), 2);
    assert!(out.rows.iter().all(|r| r.parent_id == "P1"));
    assert!(out.rows.iter().all(|r| !r.is_placeholder()));
    assert!(out.matrix.entries().all(|e| e.score_embedding.is_none()));
}

#[tokio::test]
async fn provider_failure_for_one_child_degrades_only_that_child() {
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(FailingFor::new("poison"));
    let pipeline = pipeline_with(EmbeddingChain::new(Some(provider), None));
    let out = pipeline
        .run(
            records(&[
                ("C1", "Display SpO2 trend"),
                ("C2", "Poison sensor check interval"),
            ]),
            records(&[
                ("P1", "SpO2 trend display"),
                ("P2", "Sensor check interval configuration"),
            ]),
        )
        .await
        .unwrap();

    let degraded = out.matrix.get("C2").unwrap();
    assert_eq!(degraded[0].parent_id, "P2");
    for entry in degraded {
        assert_eq!(entry.score_embedding, None);
        assert!(entry.embedding_degraded);
        let (expected, _) = fuse(entry.score_rule, None, entry.score_tfidf);
        assert_eq!(entry.computed_score, expected);
    }

    let healthy = out.matrix.get("C1").unwrap();
    assert!(healthy.iter().all(|e| e.score_embedding.is_some()));
    assert!(healthy.iter().all(|e| !e.embedding_degraded));
    assert_eq!(out.report.degraded_children, 1);
}

#[tokio::test]
async fn monitor_requirements_trace_to_expected_needs() {
    let pipeline = pipeline_with(hashing_chain())
        .with_extra_columns(ExtraColumns::new(Vec::new(), vec!["Owner".into()]));
    let parents: Vec<RequirementRecord> = monitor_parents()
        .into_iter()
        .map(|p| p.with_extra("Owner", "clinical"))
        .collect();
    let out = pipeline.run(monitor_children(), parents).await.unwrap();

    let c1 = out.matrix.get("C1").unwrap();
    assert_eq!(c1[0].parent_id, "P1");
    assert_eq!(c1[0].method_used, Method::Fusion);
    assert_eq!(c1[0].matched_groups, groups(&["ECG"]));

    let c2 = out.matrix.get("C2").unwrap();
    assert_eq!(c2[0].parent_id, "P2");
    assert_eq!(c2[0].matched_groups, groups(&["Alarms", "SpO2"]));
    assert_eq!(c2[0].score_rule, Some(RULE_SCORE));

    assert!(out.report.orphan_children.contains(&"C5".to_string()));
    assert_eq!(out.report.total_children, 5);
    assert_eq!(out.report.total_parents, 5);
    assert_eq!(out.report.total_traces, out.matrix.total_traces());

    // child input order, then rank order
    let order: Vec<&str> = out.rows.iter().map(|r| r.child_id.as_str()).collect();
    let mut sorted = order.clone();
    sorted.sort();
    assert_eq!(order, sorted);
    assert_eq!(out.header.last().map(String::as_str), Some("Parent_Owner"));
    let first = out.rows.iter().find(|r| !r.is_placeholder()).unwrap();
    assert_eq!(first.extras, vec![("Parent_Owner".to_string(), "clinical".to_string())]);
}

#[tokio::test]
async fn top_k_bounds_every_child() {
    for k in 1..=4 {
        let config = MatchingConfig {
            top_k: k,
            ..MatchingConfig::default()
        };
        let pipeline = Pipeline::new(config, lexicon(), hashing_chain()).unwrap();
        let out = pipeline
            .run(monitor_children(), monitor_parents())
            .await
            .unwrap();
        for row in out.matrix.rows() {
            assert!(row.entries.len() <= k);
            assert!(
                row.entries
                    .windows(2)
                    .all(|w| w[0].computed_score >= w[1].computed_score)
            );
        }
    }
}
