// provision-gate-core/tests/patch_validation.rs
// ============================================================================
// Module: Patch Validation Tests
// Description: Tests for patch validation against accumulated constraints.
// ============================================================================
//! ## Overview
//! Validates JSON Schema enforcement on merge patches, including nested
//! field paths and violation diagnostics naming the binding policy.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use provision_gate_core::ConstraintContext;
use provision_gate_core::PolicyId;
use serde_json::Value;
use serde_json::json;

fn object(value: Value) -> serde_json::Map<String, Value> {
    value.as_object().cloned().expect("json object")
}

// ============================================================================
// SECTION: Basic Validation
// ============================================================================

/// Tests that an unconstrained patch produces no violations.
#[test]
fn test_unconstrained_patch_passes() {
    let ctx = ConstraintContext::new();
    let violations = ctx.validate_patch(&object(json!({"region": "us-east-1", "size": 4})));
    assert!(violations.is_empty());
}

/// Tests a const violation with the binding policy in the diagnostic.
#[test]
fn test_const_violation_names_binding_policy() {
    let mut ctx = ConstraintContext::new();
    ctx.merge_constraints(
        &object(json!({"region": {"const": "us-east-1"}})),
        &PolicyId::new("region-pin"),
    )
    .expect("merge");

    let violations = ctx.validate_patch(&object(json!({"region": "us-west-2"})));
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].field_path, "region");
    assert_eq!(violations[0].set_by, PolicyId::new("region-pin"));
    assert!(violations[0].reason.contains("violates constraint"), "{}", violations[0].reason);
}

/// Tests that values satisfying the accumulated range pass.
#[test]
fn test_range_within_bounds_passes() {
    let mut ctx = ConstraintContext::new();
    ctx.merge_constraints(
        &object(json!({"cpu_count": {"minimum": 1, "maximum": 4}})),
        &PolicyId::new("p1"),
    )
    .expect("merge");

    assert!(ctx.validate_patch(&object(json!({"cpu_count": 3}))).is_empty());
    assert_eq!(ctx.validate_patch(&object(json!({"cpu_count": 9}))).len(), 1);
}

// ============================================================================
// SECTION: Nested Paths
// ============================================================================

/// Tests that nested patch mappings reach dotted constraint paths.
#[test]
fn test_nested_paths_are_validated() {
    let mut ctx = ConstraintContext::new();
    ctx.merge_constraints(
        &object(json!({"network.subnet.cidr": {"pattern": "^10\\."}})),
        &PolicyId::new("net-policy"),
    )
    .expect("merge");

    let ok = ctx.validate_patch(&object(json!({"network": {"subnet": {"cidr": "10.0.0.0/8"}}})));
    assert!(ok.is_empty());

    let bad = ctx.validate_patch(&object(json!({"network": {"subnet": {"cidr": "192.168.0.0/16"}}})));
    assert_eq!(bad.len(), 1);
    assert_eq!(bad[0].field_path, "network.subnet.cidr");
    assert_eq!(bad[0].set_by, PolicyId::new("net-policy"));
}

/// Tests that a constraint on an intermediate mapping validates the mapping.
#[test]
fn test_intermediate_mapping_constraint() {
    let mut ctx = ConstraintContext::new();
    ctx.merge_constraints(
        &object(json!({"metadata": {"minProperties": 2}})),
        &PolicyId::new("meta-policy"),
    )
    .expect("merge");

    let ok = ctx.validate_patch(&object(json!({"metadata": {"env": "prod", "team": "core"}})));
    assert!(ok.is_empty());

    let bad = ctx.validate_patch(&object(json!({"metadata": {"env": "prod"}})));
    assert_eq!(bad.len(), 1);
}

// ============================================================================
// SECTION: Multiple Violations
// ============================================================================

/// Tests that every violating field is reported.
#[test]
fn test_multiple_violations_reported() {
    let mut ctx = ConstraintContext::new();
    ctx.merge_constraints(
        &object(json!({
            "region": {"enum": ["us-east-1", "us-west-2"]},
            "cpu_count": {"maximum": 8}
        })),
        &PolicyId::new("p1"),
    )
    .expect("merge");

    let violations =
        ctx.validate_patch(&object(json!({"region": "eu-central-1", "cpu_count": 16})));
    assert_eq!(violations.len(), 2);
}

/// Tests that conjoined patterns all apply during validation.
#[test]
fn test_conjoined_patterns_enforced() {
    let mut ctx = ConstraintContext::new();
    ctx.merge_constraints(&object(json!({"name": {"pattern": "^svc-"}})), &PolicyId::new("p1"))
        .expect("merge");
    ctx.merge_constraints(&object(json!({"name": {"pattern": "-prod$"}})), &PolicyId::new("p2"))
        .expect("merge");

    assert!(ctx.validate_patch(&object(json!({"name": "svc-db-prod"}))).is_empty());
    assert_eq!(ctx.validate_patch(&object(json!({"name": "svc-db-dev"}))).len(), 1);
    assert_eq!(ctx.validate_patch(&object(json!({"name": "db-prod"}))).len(), 1);
}
