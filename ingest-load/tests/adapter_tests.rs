use ingest_load::testing::{ScriptedEntity, ScriptedService, v1_set, v2_set};
use ingest_load::{AdapterSet, KeyComponents, LoadError, LoaderVersion, SubmitV1, reported_id};
use ingest_model::{KeyComponent, KeyComposition, KeyGraph, ModelError};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;

fn entity(name: &str, service: &Arc<ScriptedService>) -> ScriptedEntity {
    ScriptedEntity::new(name, &["ID"], Arc::clone(service))
}

fn is_config(result: Result<AdapterSet, LoadError>) -> bool {
    matches!(result, Err(LoadError::Configuration(_)))
}

// ── Capability checks ────────────────────────────────────────────

#[test]
fn v1_set_keeps_declared_order() {
    let svc = Arc::new(ScriptedService::new());
    let set = v1_set(&svc, vec![entity("study", &svc), entity("participant", &svc)]).unwrap();

    assert_eq!(set.version(), LoaderVersion::V1);
    assert_eq!(set.names().collect::<Vec<_>>(), vec!["study", "participant"]);
    assert_eq!(set.len(), 2);
    assert!(set.contains("participant"));
    assert!(set.get("diagnosis").is_none());
}

#[test]
fn unsupported_version_is_rejected() {
    let svc = Arc::new(ScriptedService::new());
    let result = AdapterSet::builder(3).v1_entity(Arc::new(entity("study", &svc))).build();
    assert!(is_config(result));
}

#[test]
fn v1_set_needs_a_submit_function() {
    let svc = Arc::new(ScriptedService::new());
    let result = AdapterSet::builder(1).v1_entity(Arc::new(entity("study", &svc))).build();
    assert!(is_config(result));
}

#[test]
fn v2_set_must_not_share_a_submit_function() {
    let svc = Arc::new(ScriptedService::new());
    let result = AdapterSet::builder(2)
        .v2_entity(Arc::new(entity("study", &svc)))
        .submitter(Arc::clone(&svc) as Arc<dyn SubmitV1>)
        .build();
    assert!(is_config(result));
}

#[test]
fn versions_cannot_be_mixed() {
    let svc = Arc::new(ScriptedService::new());
    let result = AdapterSet::builder(1)
        .v1_entity(Arc::new(entity("study", &svc)))
        .v2_entity(Arc::new(entity("participant", &svc)))
        .submitter(Arc::clone(&svc) as Arc<dyn SubmitV1>)
        .build();
    assert!(is_config(result));

    let result = AdapterSet::builder(2)
        .v1_entity(Arc::new(entity("study", &svc)))
        .v2_entity(Arc::new(entity("participant", &svc)))
        .build();
    assert!(is_config(result));
}

#[test]
fn empty_set_is_rejected() {
    assert!(is_config(v2_set(Vec::new())));
}

#[test]
fn duplicate_and_blank_names_are_rejected() {
    let svc = Arc::new(ScriptedService::new());
    assert!(is_config(v2_set(vec![entity("study", &svc), entity("study", &svc)])));
    assert!(is_config(v2_set(vec![entity(" ", &svc)])));
}

// ── Plan validation ──────────────────────────────────────────────

fn participant_needs_study() -> KeyGraph {
    KeyGraph::new([
        ("study".to_string(), KeyComposition::new(vec![KeyComponent::field("PROJECT|ID")])),
        (
            "participant".to_string(),
            KeyComposition::new(vec![
                KeyComponent::unique_key("study"),
                KeyComponent::field("PARTICIPANT|ID"),
            ]),
        ),
    ])
    .unwrap()
}

#[test]
fn plan_with_unknown_entity_is_rejected() {
    let svc = Arc::new(ScriptedService::new());
    let set = v2_set(vec![entity("study", &svc)]).unwrap();

    let wanted = vec!["study".to_string(), "diagnosis".to_string()];
    let err = set.validate_plan(Some(wanted.as_slice()), None).unwrap_err();
    assert!(matches!(err, LoadError::Configuration(ref msg) if msg.contains("diagnosis")));
}

#[test]
fn plan_must_respect_key_dependencies() {
    let svc = Arc::new(ScriptedService::new());
    let graph = participant_needs_study();

    let good = v2_set(vec![entity("study", &svc), entity("participant", &svc)]).unwrap();
    good.validate_plan(None, Some(&graph)).unwrap();

    let bad = v2_set(vec![entity("participant", &svc), entity("study", &svc)]).unwrap();
    let err = bad.validate_plan(None, Some(&graph)).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Model(ModelError::OrderViolation { ref entity, ref dependency })
            if entity == "participant" && dependency == "study"
    ));
}

#[test]
fn plan_may_omit_a_dependency() {
    let svc = Arc::new(ScriptedService::new());
    let set = v2_set(vec![entity("participant", &svc)]).unwrap();
    set.validate_plan(None, Some(&participant_needs_study())).unwrap();
}

// ── Key components ───────────────────────────────────────────────

#[test]
fn single_component_renders_its_value() {
    assert_eq!(KeyComponents::single("external_id", "P1").to_key_string(), "P1");
    assert_eq!(KeyComponents::single("age", 7.0).to_key_string(), "7");
}

#[test]
fn several_components_render_in_name_order() {
    let key = KeyComponents::new()
        .with("study_id", "SD_1")
        .with("external_id", "P1")
        .with("ethnicity", Value::Null);
    assert_eq!(key.to_key_string(), "ethnicity=Not Reported|external_id=P1|study_id=SD_1");
    assert_eq!(key.to_string(), key.to_key_string());
}

#[test]
fn filters_skip_missing_components() {
    let key = KeyComponents::new()
        .with("external_id", " P1 ")
        .with("ethnicity", "")
        .with("age", 12);
    assert_eq!(
        key.filters(),
        vec![
            ("age".to_string(), "12".to_string()),
            ("external_id".to_string(), "P1".to_string()),
        ]
    );
}

#[test]
fn reported_id_ignores_placeholders() {
    assert_eq!(reported_id(Some(&json!("PT_1"))), Some("PT_1".to_string()));
    assert_eq!(reported_id(Some(&json!("Not Reported"))), None);
    assert_eq!(reported_id(Some(&json!("  "))), None);
    assert_eq!(reported_id(Some(&Value::Null)), None);
    assert_eq!(reported_id(None), None);
}

// ── Loader version ───────────────────────────────────────────────

#[test]
fn loader_version_serializes_as_number() {
    assert_eq!(serde_json::from_str::<LoaderVersion>("2").unwrap(), LoaderVersion::V2);
    assert_eq!(serde_json::to_string(&LoaderVersion::V1).unwrap(), "1");
    assert!(serde_json::from_str::<LoaderVersion>("3").is_err());
    assert_eq!(LoaderVersion::V2.to_string(), "2");
}
