// provision-gate-server/src/query.rs
// ============================================================================
// Module: Listing Query Parsers
// Description: Filter-expression and order-by parsers for policy listing.
// Purpose: Turn the public listing parameters into typed store inputs.
// Dependencies: provision-gate-core, regex
// ============================================================================

//! ## Overview
//! The public listing surface accepts a small filter expression over
//! `policy_type` and `enabled` (optionally joined by one `AND`) and a
//! comma-separated `order_by` parameter over the sortable fields. Both
//! parse into the typed listing options consumed by the store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::LazyLock;

use provision_gate_core::CatalogFilter;
use provision_gate_core::OrderBy;
use provision_gate_core::OrderDirection;
use provision_gate_core::OrderField;
use provision_gate_core::PolicyType;
use regex::Regex;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Listing query parse errors.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Filter expression is not supported.
    #[error("{0}")]
    InvalidFilter(String),
    /// Order-by parameter is not supported.
    #[error("{0}")]
    InvalidOrderBy(String),
}

// ============================================================================
// SECTION: Filter Parsing
// ============================================================================

/// Matches a `policy_type='…'` condition.
static POLICY_TYPE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"policy_type\s*=\s*'(GLOBAL|USER)'").unwrap());
/// Matches an `enabled=…` condition.
static ENABLED_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"enabled\s*=\s*(true|false)").unwrap());

/// Parses a filter expression into a catalog filter.
///
/// Supported expressions: `policy_type='GLOBAL'`, `policy_type='USER'`,
/// `enabled=true`, `enabled=false`, and two conditions joined by one `AND`.
///
/// # Errors
///
/// Returns [`QueryError::InvalidFilter`] when the expression contains no
/// supported condition or more than one `AND`.
pub fn parse_filter(expression: &str) -> Result<CatalogFilter, QueryError> {
    if expression.is_empty() {
        return Ok(CatalogFilter::default());
    }

    let mut filter = CatalogFilter::default();
    if let Some(captures) = POLICY_TYPE_PATTERN.captures(expression) {
        filter.policy_type = PolicyType::parse(&captures[1]);
    }
    if let Some(captures) = ENABLED_PATTERN.captures(expression) {
        filter.enabled = Some(&captures[1] == "true");
    }

    if filter.policy_type.is_none() && filter.enabled.is_none() {
        return Err(QueryError::InvalidFilter(format!(
            "filter expression '{expression}' contains no valid conditions; supported fields: \
             policy_type, enabled"
        )));
    }

    if expression.contains(" AND ") && expression.split(" AND ").count() != 2 {
        return Err(QueryError::InvalidFilter(
            "multiple AND operators are not supported".to_string(),
        ));
    }

    Ok(filter)
}

// ============================================================================
// SECTION: Order-By Parsing
// ============================================================================

/// Parses an order-by parameter into typed ordering clauses.
///
/// Supported fields: `priority`, `display_name`, `create_time`, each with an
/// optional `asc`/`desc` direction. Multiple clauses are comma-separated.
/// Empty input selects the canonical catalog order.
///
/// # Errors
///
/// Returns [`QueryError::InvalidOrderBy`] on unknown fields, invalid
/// directions, or extra tokens.
pub fn parse_order_by(order_by: &str) -> Result<Vec<OrderBy>, QueryError> {
    let mut clauses = Vec::new();

    for part in order_by.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let mut tokens = part.split_whitespace();
        let Some(field_token) = tokens.next() else {
            continue;
        };
        let field = match field_token {
            "priority" => OrderField::Priority,
            "display_name" => OrderField::DisplayName,
            "create_time" => OrderField::CreateTime,
            other => {
                return Err(QueryError::InvalidOrderBy(format!(
                    "field '{other}' is not supported for ordering; supported fields: priority, \
                     display_name, create_time"
                )));
            }
        };

        let direction = match tokens.next() {
            None => OrderDirection::Asc,
            Some(token) => match token.to_ascii_lowercase().as_str() {
                "asc" => OrderDirection::Asc,
                "desc" => OrderDirection::Desc,
                other => {
                    return Err(QueryError::InvalidOrderBy(format!(
                        "direction '{other}' is not valid; use 'asc' or 'desc'"
                    )));
                }
            },
        };

        if tokens.next().is_some() {
            return Err(QueryError::InvalidOrderBy(format!(
                "too many tokens in order_by clause '{part}'; expected 'field [asc|desc]'"
            )));
        }

        clauses.push(OrderBy {
            field,
            direction,
        });
    }

    Ok(clauses)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Panic-based assertions are permitted in tests.")]

    use super::*;

    /// Tests supported filter expressions.
    #[test]
    fn test_parse_filter_expressions() {
        let filter = parse_filter("policy_type='GLOBAL'").unwrap();
        assert_eq!(filter.policy_type, Some(PolicyType::Global));
        assert_eq!(filter.enabled, None);

        let filter = parse_filter("enabled=true").unwrap();
        assert_eq!(filter.enabled, Some(true));

        let filter = parse_filter("policy_type='USER' AND enabled=false").unwrap();
        assert_eq!(filter.policy_type, Some(PolicyType::User));
        assert_eq!(filter.enabled, Some(false));

        let filter = parse_filter("enabled=true AND policy_type='GLOBAL'").unwrap();
        assert_eq!(filter.policy_type, Some(PolicyType::Global));
        assert_eq!(filter.enabled, Some(true));
    }

    /// Tests rejected filter expressions.
    #[test]
    fn test_parse_filter_rejects_invalid() {
        assert!(parse_filter("display_name='x'").is_err());
        assert!(parse_filter("policy_type='global'").is_err());
        assert!(parse_filter("enabled=true AND enabled=false AND policy_type='USER'").is_err());
    }

    /// Tests order-by parsing.
    #[test]
    fn test_parse_order_by() {
        assert!(parse_order_by("").unwrap().is_empty());

        let clauses = parse_order_by("priority asc").unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].field, OrderField::Priority);
        assert_eq!(clauses[0].direction, OrderDirection::Asc);

        let clauses = parse_order_by("create_time desc,priority").unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].field, OrderField::CreateTime);
        assert_eq!(clauses[0].direction, OrderDirection::Desc);
        assert_eq!(clauses[1].direction, OrderDirection::Asc);
    }

    /// Tests rejected order-by parameters.
    #[test]
    fn test_parse_order_by_rejects_invalid() {
        assert!(parse_order_by("id asc").is_err());
        assert!(parse_order_by("priority sideways").is_err());
        assert!(parse_order_by("priority asc extra").is_err());
    }
}
