//! Human-review routing.

mod router;

pub use router::{
    Priority, ReviewReason, ReviewRouting, Severity, route_fusion, route_reconciliation,
};
