// provision-gate-opa/src/lib.rs
// ============================================================================
// Module: Provision Gate OPA Client Library
// Description: Rule-runtime client for an OPA-compatible HTTP API.
// Purpose: Expose the OPA client and its configuration.
// Dependencies: crate::client
// ============================================================================

//! ## Overview
//! This crate implements the Provision Gate rule-runtime interfaces against
//! an OPA-compatible HTTP API: per-policy data-document evaluation for the
//! engine, and policy-module publish/delete for the CRUD surface.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod client;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use client::OpaClient;
pub use client::OpaClientError;
pub use client::OpaConfig;
