//! Metrics for lakegate runs.
//!
//! Events in [`events`] are recorded through the `metrics` facade; the
//! embedding application decides which recorder (if any) to install.

pub mod events;

/// Emit an internal event.
///
/// This macro calls the `InternalEvent::emit()` method on the given event,
/// which records the corresponding metric.
///
/// # Example
///
/// ```ignore
/// use lakegate::metrics::events::{BranchCreated, StageName};
///
/// emit!(BranchCreated { stage: StageName::Ingestion });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
