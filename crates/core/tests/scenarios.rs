//! End-to-end scoring against the shipped artifact bundle.

use cancelrisk_core::artifacts::{read_model, ArtifactPaths};
use cancelrisk_core::attribution::AttributionMethod;
use cancelrisk_core::encoding::EncodingSpec;
use cancelrisk_core::error::{
    ArtifactError, EncodingError, ErrorKind, ModelError, SchemaError, ScoringError,
};
use cancelrisk_core::model::{ModelArtifact, RiskModel};
use cancelrisk_core::scoring::{
    AttributionFallback, RiskTier, ScoringConfig, ScoringService, TierThresholds,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

fn bundle_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../artifacts")
}

fn paths() -> ArtifactPaths {
    ArtifactPaths {
        model: bundle_dir().join("model.json"),
        encoding_spec: bundle_dir().join("encoding_spec.json"),
    }
}

fn load() -> ScoringService {
    ScoringService::load(&paths(), ScoringConfig::default()).unwrap()
}

fn read_value(name: &str) -> Value {
    let text = std::fs::read_to_string(bundle_dir().join(name)).unwrap();
    serde_json::from_str(&text).unwrap()
}

fn high_risk() -> Value {
    json!({
        "lead_time": 200,
        "deposit_type": "Non Refund",
        "is_repeated_guest": false,
        "adr": 120.0,
        "arrival_month": 7
    })
}

fn low_risk() -> Value {
    json!({
        "lead_time": 10,
        "deposit_type": "Refundable",
        "is_repeated_guest": true,
        "adr": 80.0,
        "arrival_month": 2,
        "total_of_special_requests": 1,
        "market_segment": "Direct",
        "hotel": "City Hotel"
    })
}

fn assert_local_accuracy(result: &cancelrisk_core::scoring::ScoringResult) {
    let baseline = result.baseline.expect("attribution was produced");
    let total = baseline + result.attributions.iter().map(|c| c.contribution).sum::<f64>();
    assert!(
        (total - result.raw_score).abs() < 1e-6,
        "baseline {baseline} + contributions = {total}, raw = {}",
        result.raw_score
    );
}

#[test]
fn bundle_loads_and_layouts_agree() {
    let service = load();
    assert_eq!(service.encoder().version(), "hotel-bookings-2024.06");
    assert_eq!(service.model().version(), "gbt-cancel-2024.06.1");
    assert_eq!(service.model().kind_name(), "gradient_boosted_trees");
    assert_eq!(service.encoder().columns(), service.model().feature_names());
    assert_eq!(service.encoder().feature_count(), 17);
    assert!(service.model().trained_at().is_some());
}

#[test]
fn high_risk_booking_is_flagged_and_explained_by_deposit() {
    let service = load();
    let result = service.score(&high_risk()).unwrap();

    assert_eq!(result.tier, RiskTier::High);
    assert!((result.raw_score - 3.57).abs() < 1e-9);
    assert!((result.probability - 0.972_615_189).abs() < 1e-6);
    assert_eq!(result.attribution_method, AttributionMethod::Exact);
    assert_eq!(result.top_feature(), Some("deposit_type"));
    assert_eq!(result.recommended_action, RiskTier::High.recommended_action());
    assert_eq!(result.model_version, "gbt-cancel-2024.06.1");
    assert_local_accuracy(&result);

    // One entry per input field, never per one-hot column.
    assert!(result
        .attributions
        .iter()
        .all(|c| !c.feature.starts_with("deposit_type_")));
    let lead = result
        .attributions
        .iter()
        .find(|c| c.feature == "lead_time")
        .unwrap();
    assert!(lead.contribution > 0.0);
}

#[test]
fn low_risk_booking_stays_below_medium() {
    let service = load();
    let result = service.score(&low_risk()).unwrap();

    assert!(result.probability < TierThresholds::default().medium);
    assert!((result.raw_score + 3.87).abs() < 1e-9);
    assert_eq!(result.tier, RiskTier::Low);
    assert_local_accuracy(&result);

    let deposit = result
        .attributions
        .iter()
        .find(|c| c.feature == "deposit_type")
        .unwrap();
    assert!(deposit.contribution < 0.0);
}

#[test]
fn custom_thresholds_move_the_tier() {
    let service = ScoringService::load(
        &paths(),
        ScoringConfig {
            thresholds: TierThresholds::new(0.01, 0.99).unwrap(),
            ..ScoringConfig::default()
        },
    )
    .unwrap();
    assert_eq!(service.score(&high_risk()).unwrap().tier, RiskTier::Medium);
    assert_eq!(service.score(&low_risk()).unwrap().tier, RiskTier::Medium);
}

#[test]
fn missing_required_field_names_the_field() {
    let service = load();
    let mut record = high_risk();
    record.as_object_mut().unwrap().remove("lead_time");

    let err = service.score(&record).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(
        err,
        ScoringError::Schema(SchemaError::MissingField {
            field: "lead_time".to_string()
        })
    );
}

#[test]
fn wrong_type_and_range_are_input_errors() {
    let service = load();

    let mut record = high_risk();
    record["lead_time"] = json!("two hundred");
    let err = service.score(&record).unwrap_err();
    assert!(matches!(
        &err,
        ScoringError::Schema(SchemaError::TypeMismatch { field, .. }) if field == "lead_time"
    ));

    let mut record = high_risk();
    record["arrival_month"] = json!(13);
    let err = service.score(&record).unwrap_err();
    assert!(matches!(
        &err,
        ScoringError::Schema(SchemaError::InvalidValue { field, .. }) if field == "arrival_month"
    ));

    let mut record = high_risk();
    record["children"] = json!(2);
    let err = service.score(&record).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn booking_form_ranges_are_enforced() {
    let service = load();

    for (field, over, at) in [
        ("stay_length", 31, 30),
        ("previous_cancellations", 27, 26),
        ("total_of_special_requests", 6, 5),
    ] {
        let mut record = high_risk();
        record[field] = json!(over);
        let err = service.score(&record).unwrap_err();
        assert!(
            matches!(&err, ScoringError::Schema(SchemaError::InvalidValue { field: f, .. }) if f == field),
            "{field}: {err}"
        );

        record[field] = json!(at);
        assert!(service.score(&record).is_ok(), "{field} = {at} should score");
    }
}

#[test]
fn unseen_country_encodes_to_other_code_and_still_scores() {
    let service = load();
    let mut record = high_risk();
    record["country"] = json!("XKX");

    let parsed = service.registry().validate(&record).unwrap();
    let vector = service.encoder().encode(&parsed).unwrap();
    let column = service
        .encoder()
        .columns()
        .iter()
        .position(|c| c == "country")
        .unwrap();
    assert_eq!(vector.as_slice()[column], -1.0);

    let result = service.score(&record).unwrap();
    assert!((0.0..=1.0).contains(&result.probability));
}

#[test]
fn unseen_one_hot_category_is_all_zeros() {
    let service = load();
    let mut record = high_risk();
    record["deposit_type"] = json!("Partial");

    let parsed = service.registry().validate(&record).unwrap();
    let vector = service.encoder().encode(&parsed).unwrap();
    for (column, value) in service.encoder().columns().iter().zip(vector.as_slice()) {
        if column.starts_with("deposit_type_") {
            assert_eq!(*value, 0.0, "{column}");
        }
    }
    assert!(service.score(&record).is_ok());
}

#[test]
fn closed_vocabulary_rejects_unseen_hotel() {
    let service = load();
    let mut record = high_risk();
    record["hotel"] = json!("Airport Hotel");

    assert_eq!(
        service.score(&record).unwrap_err(),
        ScoringError::Schema(SchemaError::UnknownCategory {
            field: "hotel".to_string(),
            value: "Airport Hotel".to_string()
        })
    );
}

#[test]
fn wrong_length_vector_is_a_dimension_mismatch() {
    let service = load();
    let err = service.model().predict(&vec![1.0; 5].into()).unwrap_err();
    assert_eq!(
        err,
        ModelError::DimensionMismatch {
            expected: 17,
            actual: 5
        }
    );
}

#[test]
fn reordered_model_columns_refuse_to_load() {
    let spec: EncodingSpec = serde_json::from_value(read_value("encoding_spec.json")).unwrap();
    let (registry, encoder) = spec.compile().unwrap();

    let mut model = read_value("model.json");
    let names = model["feature_names"].as_array_mut().unwrap();
    names.swap(13, 14);
    let artifact: ModelArtifact = serde_json::from_value(model).unwrap();
    let model = RiskModel::from_artifact(artifact).unwrap();

    let err = ScoringService::new(registry, encoder, model, ScoringConfig::default()).unwrap_err();
    assert!(matches!(err, ArtifactError::SignatureMismatch(_)), "{err}");
}

#[test]
fn parity_drift_refuses_to_compile() {
    let mut raw = read_value("encoding_spec.json");
    raw["parity_samples"][0]["vector"][1] = json!(0.4000000000000001);
    let spec: EncodingSpec = serde_json::from_value(raw).unwrap();
    assert!(matches!(
        spec.compile(),
        Err(EncodingError::SpecMismatch(msg)) if msg.contains("parity sample 0")
    ));
}

#[test]
fn stale_layout_signature_refuses_to_compile() {
    let mut raw = read_value("encoding_spec.json");
    raw["layout_signature"] = json!(0);
    let spec: EncodingSpec = serde_json::from_value(raw).unwrap();
    assert!(spec.compile().is_err());
}

#[test]
fn missing_artifact_reports_its_path() {
    let err = read_model(&bundle_dir().join("does-not-exist.json")).unwrap_err();
    match err {
        ArtifactError::Io { path, .. } => assert!(path.ends_with("does-not-exist.json")),
        other => panic!("unexpected error {other}"),
    }
}

fn linear_service(fallback: AttributionFallback) -> ScoringService {
    let spec: EncodingSpec = serde_json::from_value(json!({
        "version": "lr-spec",
        "feature_count": 3,
        "columns": ["lead_time", "is_repeated_guest", "deposit_type_Non Refund"],
        "fields": [
            {"name": "lead_time", "kind": {"type": "numeric", "integer": true, "min": 0}, "encoding": {"type": "raw"}},
            {"name": "is_repeated_guest", "kind": {"type": "boolean"}, "default": false, "encoding": {"type": "flag"}},
            {"name": "deposit_type", "kind": {"type": "categorical", "vocabulary": ["No Deposit", "Non Refund"]},
             "encoding": {"type": "one_hot", "drop_first": true}}
        ]
    }))
    .unwrap();
    let (registry, encoder) = spec.compile().unwrap();
    let artifact: ModelArtifact = serde_json::from_value(json!({
        "model_version": "lr-1",
        "feature_names": ["lead_time", "is_repeated_guest", "deposit_type_Non Refund"],
        "reference": [100.0, 0.0, 0.0],
        "ensemble": {"kind": "logistic_regression", "intercept": -1.0, "coefficients": [0.01, -1.5, 2.0]}
    }))
    .unwrap();
    let model = RiskModel::from_artifact(artifact).unwrap();
    ScoringService::new(
        registry,
        encoder,
        model,
        ScoringConfig {
            fallback,
            ..ScoringConfig::default()
        },
    )
    .unwrap()
}

fn linear_record() -> Value {
    json!({"lead_time": 150, "deposit_type": "Non Refund", "is_repeated_guest": true})
}

#[test]
fn unsupported_attribution_fails_by_default() {
    let err = linear_service(AttributionFallback::Fail)
        .score(&linear_record())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExplanationUnavailable);
}

#[test]
fn omit_fallback_still_returns_the_probability() {
    let result = linear_service(AttributionFallback::Omit)
        .score(&linear_record())
        .unwrap();
    assert_eq!(result.attribution_method, AttributionMethod::Omitted);
    assert!(result.attributions.is_empty());
    assert_eq!(result.baseline, None);
    // -1 + 1.5 - 1.5 + 2 = 1
    assert!((result.raw_score - 1.0).abs() < 1e-12);
}

#[test]
fn sampled_fallback_is_labelled_and_additive() {
    let result = linear_service(AttributionFallback::Sampled {
        permutations: 32,
        seed: 11,
    })
    .score(&linear_record())
    .unwrap();

    assert_eq!(result.attribution_method, AttributionMethod::Sampled);
    assert_eq!(result.top_feature(), Some("deposit_type"));
    assert_local_accuracy(&result);
    let repeated = result
        .attributions
        .iter()
        .find(|c| c.feature == "is_repeated_guest")
        .unwrap();
    assert!((repeated.contribution + 1.5).abs() < 1e-9);
}

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn loaded_pipeline_is_shareable_across_threads() {
    assert_send_sync::<ScoringService>();
    assert_send_sync::<RiskModel>();
    assert_send_sync::<cancelrisk_core::encoding::FeatureEncoder>();

    let service = std::sync::Arc::new(load());
    let expected = service.score(&high_risk()).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = std::sync::Arc::clone(&service);
            std::thread::spawn(move || service.score(&high_risk()).unwrap())
        })
        .collect();

    for handle in handles {
        let result = handle.join().unwrap();
        assert_eq!(result.probability.to_bits(), expected.probability.to_bits());
        assert_eq!(result, expected);
    }
}
