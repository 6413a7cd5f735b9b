use crate::models::audit::AuditEvent;
use crate::store::Store;

/// Writes an audit event to the `audit` log target and the store.
///
/// A store failure is logged and otherwise ignored; it never fails the request
/// being audited.
pub async fn record(store: &dyn Store, event: AuditEvent) {
    tracing::info!(
        target: "audit",
        actor = %event.actor,
        action = %event.action,
        resource = %event.resource,
        outcome = event.outcome.as_str(),
        patient_id = event.patient_id.as_deref().unwrap_or("-"),
        ip = event.ip.as_deref().unwrap_or("-"),
        "audit event"
    );

    if let Err(e) = store.record_audit(&event).await {
        tracing::error!(target: "audit", error = %e, action = %event.action, "Failed to persist audit event");
    }
}
