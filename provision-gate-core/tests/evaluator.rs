// provision-gate-core/tests/evaluator.rs
// ============================================================================
// Module: Evaluator Tests
// Description: End-to-end tests for the sequential policy fold.
// ============================================================================
//! ## Overview
//! Drives the evaluator over an in-memory catalog and a scripted rule
//! runtime, covering approval, modification, rejection, constraint
//! conflicts, provider threading, label gating, and pagination.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use std::collections::BTreeMap;

use common::ScriptedRuleRuntime;
use common::object;
use common::policy;
use provision_gate_core::EvaluationError;
use provision_gate_core::EvaluationRequest;
use provision_gate_core::EvaluationStatus;
use provision_gate_core::Evaluator;
use provision_gate_core::InMemoryPolicyStore;
use provision_gate_core::PolicyId;
use provision_gate_core::PolicyStore;
use provision_gate_core::PolicyType;
use provision_gate_core::extract_request_labels;
use serde_json::Value;
use serde_json::json;

fn request(spec: Value) -> EvaluationRequest {
    let service_instance = object(spec);
    let request_labels = extract_request_labels(&service_instance).expect("request labels");
    EvaluationRequest {
        service_instance,
        request_labels,
    }
}

// ============================================================================
// SECTION: Approval and Modification
// ============================================================================

/// Tests that an empty catalog approves the unchanged input.
#[test]
fn test_empty_catalog_approves() {
    let store = InMemoryPolicyStore::new();
    let evaluator = Evaluator::new(store, ScriptedRuleRuntime::new());

    let req = request(json!({"service_type": "x", "region": "us-east-1"}));
    let outcome = evaluator.evaluate(&req).expect("evaluation");

    assert_eq!(outcome.status, EvaluationStatus::Approved);
    assert_eq!(outcome.evaluated_service_instance, req.service_instance);
    assert_eq!(outcome.selected_provider, "");
}

/// Tests a single patching policy producing a modified instance.
#[test]
fn test_single_patching_policy_modifies() {
    let store = InMemoryPolicyStore::new();
    let p1 = policy("p1", PolicyType::Global, 100);
    let runtime = ScriptedRuleRuntime::new().with_decision(
        &p1.package_name,
        json!({
            "rejected": false,
            "patch": {"region": "us-west-2", "instance_type": "t3.medium"},
            "selected_provider": "aws"
        }),
    );
    store.create(p1).expect("create policy");

    let evaluator = Evaluator::new(store, runtime);
    let req = request(json!({"service_type": "x", "existing_field": "keep-me"}));
    let outcome = evaluator.evaluate(&req).expect("evaluation");

    assert_eq!(outcome.status, EvaluationStatus::Modified);
    assert_eq!(
        Value::Object(outcome.evaluated_service_instance),
        json!({
            "service_type": "x",
            "existing_field": "keep-me",
            "region": "us-west-2",
            "instance_type": "t3.medium"
        })
    );
    assert_eq!(outcome.selected_provider, "aws");
}

/// Tests that a constraints-only policy approves without changes.
#[test]
fn test_constraints_only_policy_approves() {
    let store = InMemoryPolicyStore::new();
    let p1 = policy("p1", PolicyType::Global, 100);
    let runtime = ScriptedRuleRuntime::new().with_decision(
        &p1.package_name,
        json!({"constraints": {"cpu_count": {"minimum": 1, "maximum": 8}}}),
    );
    store.create(p1).expect("create policy");

    let evaluator = Evaluator::new(store, runtime);
    let req = request(json!({"service_type": "x", "cpu_count": 2}));
    let outcome = evaluator.evaluate(&req).expect("evaluation");

    assert_eq!(outcome.status, EvaluationStatus::Approved);
    assert_eq!(outcome.selected_provider, "");
}

/// Tests that an undefined decision skips the policy entirely.
#[test]
fn test_undefined_decision_skips_policy() {
    let store = InMemoryPolicyStore::new();
    store.create(policy("p1", PolicyType::Global, 100)).expect("create policy");

    // No canned decision registered: the runtime reports undefined.
    let evaluator = Evaluator::new(store, ScriptedRuleRuntime::new());
    let req = request(json!({"service_type": "x"}));
    let outcome = evaluator.evaluate(&req).expect("evaluation");

    assert_eq!(outcome.status, EvaluationStatus::Approved);
}

// ============================================================================
// SECTION: Rejection
// ============================================================================

/// Tests the rejection outcome with policy id and reason.
#[test]
fn test_rejection_is_terminal() {
    let store = InMemoryPolicyStore::new();
    let p1 = policy("p1", PolicyType::Global, 100);
    let p2 = policy("p2", PolicyType::Global, 200);
    let runtime = ScriptedRuleRuntime::new()
        .with_decision(
            &p1.package_name,
            json!({"rejected": true, "rejection_reason": "Test security policy violation"}),
        )
        .with_decision(&p2.package_name, json!({"patch": {"region": "us-west-2"}}));
    store.create(p1).expect("create p1");
    store.create(p2).expect("create p2");

    let evaluator = Evaluator::new(store, runtime.clone());
    let req = request(json!({"service_type": "x"}));
    let error = evaluator.evaluate(&req).expect_err("rejection");

    match error {
        EvaluationError::Rejected {
            policy_id,
            reason,
        } => {
            assert_eq!(policy_id, PolicyId::new("p1"));
            assert_eq!(reason, "Test security policy violation");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    // The rejection aborted the fold before the second policy ran.
    assert_eq!(runtime.calls().len(), 1);
}

// ============================================================================
// SECTION: Constraint Conflicts
// ============================================================================

/// Tests a const conflict across priorities citing both policies.
#[test]
fn test_const_conflict_across_priorities() {
    let store = InMemoryPolicyStore::new();
    let p1 = policy("p1", PolicyType::Global, 100);
    let p2 = policy("p2", PolicyType::Global, 200);
    let runtime = ScriptedRuleRuntime::new()
        .with_decision(
            &p1.package_name,
            json!({
                "patch": {"region": "us-east-1"},
                "constraints": {"region": {"const": "us-east-1"}}
            }),
        )
        .with_decision(&p2.package_name, json!({"patch": {"region": "us-west-2"}}));
    store.create(p1).expect("create p1");
    store.create(p2).expect("create p2");

    let evaluator = Evaluator::new(store, runtime);
    let req = request(json!({"service_type": "x"}));
    let error = evaluator.evaluate(&req).expect_err("conflict");

    match error {
        EvaluationError::Conflict(conflict) => {
            assert_eq!(conflict.policy_id, PolicyId::new("p2"));
            assert_eq!(conflict.set_by, Some(PolicyId::new("p1")));
            assert_eq!(conflict.field_path.as_deref(), Some("region"));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

/// Tests a range constraint accepted and refined within bounds.
#[test]
fn test_range_refined_within_bounds() {
    let store = InMemoryPolicyStore::new();
    let p1 = policy("p1", PolicyType::Global, 100);
    let p2 = policy("p2", PolicyType::Global, 200);
    let runtime = ScriptedRuleRuntime::new()
        .with_decision(
            &p1.package_name,
            json!({
                "constraints": {"cpu_count": {"minimum": 1, "maximum": 4}},
                "patch": {"cpu_count": 2}
            }),
        )
        .with_decision(&p2.package_name, json!({"patch": {"cpu_count": 3}}));
    store.create(p1).expect("create p1");
    store.create(p2).expect("create p2");

    let evaluator = Evaluator::new(store, runtime);
    let req = request(json!({"service_type": "x"}));
    let outcome = evaluator.evaluate(&req).expect("evaluation");

    assert_eq!(outcome.status, EvaluationStatus::Modified);
    assert_eq!(outcome.evaluated_service_instance["cpu_count"], json!(3));
}

/// Tests that loosening an accumulated range is a conflict.
#[test]
fn test_loosening_constraint_conflicts() {
    let store = InMemoryPolicyStore::new();
    let p1 = policy("p1", PolicyType::Global, 100);
    let p2 = policy("p2", PolicyType::Global, 200);
    let runtime = ScriptedRuleRuntime::new()
        .with_decision(
            &p1.package_name,
            json!({"constraints": {"cpu_count": {"minimum": 2, "maximum": 4}}}),
        )
        .with_decision(
            &p2.package_name,
            json!({"constraints": {"cpu_count": {"minimum": 1, "maximum": 10}}}),
        );
    store.create(p1).expect("create p1");
    store.create(p2).expect("create p2");

    let evaluator = Evaluator::new(store, runtime);
    let req = request(json!({"service_type": "x"}));
    let error = evaluator.evaluate(&req).expect_err("conflict");

    match error {
        EvaluationError::Conflict(conflict) => {
            assert!(conflict.reason.contains("loosen"), "reason: {}", conflict.reason);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

/// Tests that a constraint and matching patch in one decision both apply.
#[test]
fn test_constraint_and_matching_patch_same_policy() {
    let store = InMemoryPolicyStore::new();
    let p1 = policy("p1", PolicyType::Global, 100);
    let runtime = ScriptedRuleRuntime::new().with_decision(
        &p1.package_name,
        json!({
            "constraints": {"region": {"const": "us-east-1"}},
            "patch": {"region": "us-east-1"}
        }),
    );
    store.create(p1).expect("create p1");

    let evaluator = Evaluator::new(store, runtime);
    let req = request(json!({"service_type": "x"}));
    let outcome = evaluator.evaluate(&req).expect("evaluation");
    assert_eq!(outcome.evaluated_service_instance["region"], json!("us-east-1"));
}

/// Tests that a constraint with a mismatched patch blames the same policy.
#[test]
fn test_constraint_with_mismatched_patch_blames_self() {
    let store = InMemoryPolicyStore::new();
    let p1 = policy("p1", PolicyType::Global, 100);
    let runtime = ScriptedRuleRuntime::new().with_decision(
        &p1.package_name,
        json!({
            "constraints": {"region": {"const": "us-east-1"}},
            "patch": {"region": "eu-west-1"}
        }),
    );
    store.create(p1).expect("create p1");

    let evaluator = Evaluator::new(store, runtime);
    let req = request(json!({"service_type": "x"}));
    let error = evaluator.evaluate(&req).expect_err("conflict");

    match error {
        EvaluationError::Conflict(conflict) => {
            assert_eq!(conflict.policy_id, PolicyId::new("p1"));
            assert_eq!(conflict.set_by, Some(PolicyId::new("p1")));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

// ============================================================================
// SECTION: Service Providers
// ============================================================================

/// Tests an allow-list violation by a later policy.
#[test]
fn test_provider_allow_list_violation() {
    let store = InMemoryPolicyStore::new();
    let p1 = policy("p1", PolicyType::Global, 100);
    let p2 = policy("p2", PolicyType::Global, 200);
    let runtime = ScriptedRuleRuntime::new()
        .with_decision(
            &p1.package_name,
            json!({"service_provider_constraints": {"allow_list": ["aws", "gcp"]}}),
        )
        .with_decision(&p2.package_name, json!({"selected_provider": "azure"}));
    store.create(p1).expect("create p1");
    store.create(p2).expect("create p2");

    let evaluator = Evaluator::new(store, runtime);
    let req = request(json!({"service_type": "x"}));
    let error = evaluator.evaluate(&req).expect_err("conflict");

    match error {
        EvaluationError::Conflict(conflict) => {
            assert_eq!(conflict.policy_id, PolicyId::new("p2"));
            assert!(
                conflict.reason.contains("not in the allowed list"),
                "reason: {}",
                conflict.reason
            );
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

/// Tests that the latest provider selection wins when admitted.
#[test]
fn test_latest_provider_selection_wins() {
    let store = InMemoryPolicyStore::new();
    let p1 = policy("p1", PolicyType::Global, 100);
    let p2 = policy("p2", PolicyType::User, 100);
    let runtime = ScriptedRuleRuntime::new()
        .with_decision(&p1.package_name, json!({"selected_provider": "aws"}))
        .with_decision(&p2.package_name, json!({"selected_provider": "gcp"}));
    store.create(p1).expect("create p1");
    store.create(p2).expect("create p2");

    let evaluator = Evaluator::new(store, runtime);
    let req = request(json!({"service_type": "x"}));
    let outcome = evaluator.evaluate(&req).expect("evaluation");
    assert_eq!(outcome.selected_provider, "gcp");
}

/// Tests pattern constraints against a selected provider.
#[test]
fn test_provider_pattern_enforced() {
    let store = InMemoryPolicyStore::new();
    let p1 = policy("p1", PolicyType::Global, 100);
    let p2 = policy("p2", PolicyType::Global, 200);
    let runtime = ScriptedRuleRuntime::new()
        .with_decision(
            &p1.package_name,
            json!({"service_provider_constraints": {"patterns": ["^aws-"]}}),
        )
        .with_decision(&p2.package_name, json!({"selected_provider": "gcp-west"}));
    store.create(p1).expect("create p1");
    store.create(p2).expect("create p2");

    let evaluator = Evaluator::new(store, runtime);
    let req = request(json!({"service_type": "x"}));
    let error = evaluator.evaluate(&req).expect_err("conflict");
    assert!(matches!(error, EvaluationError::Conflict(_)));
}

// ============================================================================
// SECTION: Label Gating
// ============================================================================

/// Tests that selector subsets gate policy execution.
#[test]
fn test_label_gating() {
    let store = InMemoryPolicyStore::new();
    let mut gated = policy("gated", PolicyType::Global, 100);
    gated.label_selector =
        [("env", "prod"), ("team", "backend")]
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
    let runtime = ScriptedRuleRuntime::new()
        .with_decision(&gated.package_name, json!({"patch": {"hardened": true}}));
    store.create(gated).expect("create policy");
    let evaluator = Evaluator::new(store, runtime);

    // Labels missing the selector entries: policy skipped, input approved.
    let req = request(json!({
        "service_type": "x",
        "metadata": {"labels": {"env": "dev"}}
    }));
    let outcome = evaluator.evaluate(&req).expect("evaluation");
    assert_eq!(outcome.status, EvaluationStatus::Approved);

    // Superset labels: policy applies.
    let req = request(json!({
        "service_type": "x",
        "metadata": {"labels": {"env": "prod", "team": "backend", "app": "web"}}
    }));
    let outcome = evaluator.evaluate(&req).expect("evaluation");
    assert_eq!(outcome.status, EvaluationStatus::Modified);
    assert_eq!(outcome.evaluated_service_instance["hardened"], json!(true));
}

// ============================================================================
// SECTION: Ordering and Pagination
// ============================================================================

/// Tests that global policies bind user policies regardless of priority.
#[test]
fn test_global_binds_user_across_types() {
    let store = InMemoryPolicyStore::new();
    // The user policy has a numerically lower priority but still runs later.
    let global = policy("global-policy", PolicyType::Global, 900);
    let user = policy("user-policy", PolicyType::User, 1);
    let runtime = ScriptedRuleRuntime::new()
        .with_decision(
            &global.package_name,
            json!({"constraints": {"region": {"const": "us-east-1"}}}),
        )
        .with_decision(&user.package_name, json!({"patch": {"region": "us-west-2"}}));
    store.create(global).expect("create global");
    store.create(user).expect("create user");

    let evaluator = Evaluator::new(store, runtime);
    let req = request(json!({"service_type": "x"}));
    let error = evaluator.evaluate(&req).expect_err("conflict");

    match error {
        EvaluationError::Conflict(conflict) => {
            assert_eq!(conflict.policy_id, PolicyId::new("user-policy"));
            assert_eq!(conflict.set_by, Some(PolicyId::new("global-policy")));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

/// Tests that the fold spans catalog pages without skipping policies.
#[test]
fn test_fold_spans_pages() {
    let store = InMemoryPolicyStore::new();
    let mut runtime = ScriptedRuleRuntime::new();
    for (index, id) in ["alpha", "bravo", "charlie"].iter().enumerate() {
        let entry = policy(id, PolicyType::Global, 100 + i64::try_from(index).unwrap());
        let mut patch = serde_json::Map::new();
        patch.insert((*id).to_string(), json!(true));
        runtime = runtime.with_decision(&entry.package_name, json!({"patch": patch}));
        store.create(entry).expect("create policy");
    }

    let evaluator = Evaluator::new(store, runtime.clone()).with_page_size(1);
    let req = request(json!({"service_type": "x"}));
    let outcome = evaluator.evaluate(&req).expect("evaluation");

    assert_eq!(outcome.status, EvaluationStatus::Modified);
    for id in ["alpha", "bravo", "charlie"] {
        assert_eq!(outcome.evaluated_service_instance[id], json!(true), "missing patch from {id}");
    }
    assert_eq!(runtime.calls().len(), 3);
}

/// Tests that disabled policies are excluded from the fold.
#[test]
fn test_disabled_policies_are_skipped() {
    let store = InMemoryPolicyStore::new();
    let mut disabled = policy("disabled", PolicyType::Global, 100);
    disabled.enabled = false;
    let runtime = ScriptedRuleRuntime::new()
        .with_decision(&disabled.package_name, json!({"patch": {"never": true}}));
    store.create(disabled).expect("create policy");

    let evaluator = Evaluator::new(store, runtime);
    let req = request(json!({"service_type": "x"}));
    let outcome = evaluator.evaluate(&req).expect("evaluation");
    assert_eq!(outcome.status, EvaluationStatus::Approved);
}

/// Tests that later policies observe accumulated constraint projections.
#[test]
fn test_rule_input_carries_projections() {
    let store = InMemoryPolicyStore::new();
    let p1 = policy("p1", PolicyType::Global, 100);
    let p2 = policy("p2", PolicyType::Global, 200);
    let runtime = ScriptedRuleRuntime::new()
        .with_decision(
            &p1.package_name,
            json!({
                "constraints": {"cpu_count": {"maximum": 8}},
                "service_provider_constraints": {"allow_list": ["aws"]},
                "selected_provider": "aws"
            }),
        )
        .with_decision(&p2.package_name, json!({}));
    store.create(p1).expect("create p1");
    store.create(p2).expect("create p2");

    let evaluator = Evaluator::new(store, runtime.clone());
    let req = request(json!({"service_type": "x"}));
    evaluator.evaluate(&req).expect("evaluation");

    let calls = runtime.calls();
    assert_eq!(calls.len(), 2);

    // First policy observes no accumulated state.
    let (_, first_input) = &calls[0];
    assert_eq!(first_input["provider"], json!(""));
    assert!(first_input.get("constraints").is_none());

    // Second policy observes the projections and threaded provider.
    let (_, second_input) = &calls[1];
    assert_eq!(second_input["provider"], json!("aws"));
    assert_eq!(second_input["constraints"]["cpu_count"]["maximum"], json!(8));
    assert_eq!(second_input["service_provider_constraints"]["allow_list"], json!(["aws"]));
}
