//! Capability negotiation: deciding what a backend applies natively.
//!
//! # Invariants
//! - The filter is pushed down whole or not at all. With
//!   `narrow_top_level_and`, the native members of a top-level AND list may
//!   narrow the candidates, but the filter still counts as not applied.
//! - A sort is pushed down only if every key is natively sortable.
//! - A range is pushed down only after both filter and sort were.

use crate::config::NegotiationPolicy;
use crate::query::capability::Capabilities;
use crate::query::filter::{BooleanOp, FilterNode};
use crate::repo::{AppliedParts, FetchRequest};

/// Native part of a fetch, as decided by `negotiate`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Filter to evaluate in the backend, if any.
    pub native_filter: Option<FilterNode>,
    pub applied: AppliedParts,
}

impl QueryPlan {
    pub fn sort_native(&self) -> bool {
        self.applied.sort
    }

    pub fn range_native(&self) -> bool {
        self.applied.range
    }
}

/// Splits `request` into native work and what is left for memory.
pub fn negotiate(
    request: &FetchRequest<'_>,
    capabilities: &Capabilities,
    policy: NegotiationPolicy,
) -> QueryPlan {
    let (native_filter, filter_applied) = if request.filter.is_always_true() {
        (None, true)
    } else if request.filter.natively_supported_by(capabilities) {
        (Some(request.filter.clone()), true)
    } else if policy.narrow_top_level_and {
        (narrowing_subset(request.filter, capabilities), false)
    } else {
        (None, false)
    };

    let sort_applied = request
        .sort
        .keys()
        .iter()
        .all(|key| capabilities.supports_sort(&key.column));

    let range_applied = match request.range {
        Some(_) => filter_applied && sort_applied,
        None => true,
    };

    QueryPlan {
        native_filter,
        applied: AppliedParts {
            filter: filter_applied,
            sort: sort_applied,
            range: range_applied,
        },
    }
}

fn narrowing_subset(filter: &FilterNode, capabilities: &Capabilities) -> Option<FilterNode> {
    let FilterNode::Group {
        op: BooleanOp::And,
        children,
    } = filter
    else {
        return None;
    };
    let native: Vec<FilterNode> = children
        .iter()
        .filter(|child| child.natively_supported_by(capabilities))
        .cloned()
        .collect();
    if native.is_empty() {
        None
    } else {
        Some(FilterNode::and(native))
    }
}
