// provision-gate-core/src/core/mod.rs
// ============================================================================
// Module: Provision Gate Core Types
// Description: Canonical policy, decision, and service-instance structures.
// Purpose: Provide stable, serializable types for the evaluation pipeline.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Core types define the persistent policy record, the per-policy decision
//! document returned by the rule runtime, and the open service-instance
//! mapping that policies patch and constrain. These types are the canonical
//! source of truth for any derived API surfaces.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod decision;
pub mod identifiers;
pub mod instance;
pub mod policy;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use decision::PolicyDecision;
pub use decision::ServiceProviderConstraints;
pub use identifiers::PolicyId;
pub use instance::JsonObject;
pub use instance::LabelError;
pub use instance::extract_request_labels;
pub use instance::merge_patch;
pub use policy::MAX_PRIORITY;
pub use policy::MIN_PRIORITY;
pub use policy::Policy;
pub use policy::PolicyType;
pub use policy::matches_label_selector;
pub use time::Timestamp;
