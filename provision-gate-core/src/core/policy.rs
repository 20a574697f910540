// provision-gate-core/src/core/policy.rs
// ============================================================================
// Module: Provision Gate Policy Record
// Description: Persistent policy catalog entry and selection helpers.
// Purpose: Define the catalog record and label-selector matching semantics.
// Dependencies: serde, crate::core::{identifiers, time}
// ============================================================================

//! ## Overview
//! A policy is a named, enabled/disabled rule program together with the
//! metadata controlling when it applies (label selector) and how it ranks
//! (policy type, priority). GLOBAL policies evaluate before USER policies;
//! within a type, lower priority values evaluate earlier and bind later
//! policies through the constraint context.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::PolicyId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Lowest admissible policy priority (highest precedence).
pub const MIN_PRIORITY: i64 = 1;
/// Highest admissible policy priority (lowest precedence).
pub const MAX_PRIORITY: i64 = 1_000;

// ============================================================================
// SECTION: Policy Type
// ============================================================================

/// Coarse policy partition; `Global` precedes `User` in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PolicyType {
    /// Administrator-scoped policy evaluated first.
    #[serde(rename = "GLOBAL")]
    Global,
    /// User-scoped policy evaluated after all global policies.
    #[serde(rename = "USER")]
    User,
}

impl PolicyType {
    /// Returns the canonical wire form of the policy type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "GLOBAL",
            Self::User => "USER",
        }
    }

    /// Parses the canonical wire form of the policy type.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "GLOBAL" => Some(Self::Global),
            "USER" => Some(Self::User),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Policy Record
// ============================================================================

/// Persistent policy catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy identifier (AEP-122 shape, unique).
    pub id: PolicyId,
    /// Policy partition; immutable after creation.
    pub policy_type: PolicyType,
    /// Display name, unique per `(display_name, policy_type)`.
    pub display_name: String,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Evaluation priority in `[MIN_PRIORITY, MAX_PRIORITY]`, unique per type.
    pub priority: i64,
    /// Whether the policy participates in evaluation.
    pub enabled: bool,
    /// Label selector; empty matches every request.
    pub label_selector: BTreeMap<String, String>,
    /// Rule program identifier in the external rule runtime.
    pub package_name: String,
    /// Record creation time stamped by the store.
    pub create_time: Timestamp,
    /// Record update time stamped by the store.
    pub update_time: Timestamp,
}

impl Policy {
    /// Returns the total-order catalog sort key `(policy_type, priority, id)`.
    #[must_use]
    pub fn sort_key(&self) -> (PolicyType, i64, &str) {
        (self.policy_type, self.priority, self.id.as_str())
    }
}

// ============================================================================
// SECTION: Label Selector Matching
// ============================================================================

/// Returns true when every selector entry is present in the request labels.
///
/// An empty selector matches all requests; the request may carry additional
/// labels beyond those the selector names.
#[must_use]
pub fn matches_label_selector(
    selector: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> bool {
    selector.iter().all(|(key, value)| labels.get(key) == Some(value))
}
