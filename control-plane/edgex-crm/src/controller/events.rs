use kube::Resource;
use kube::runtime::events::{Event, EventType, Recorder};
use tracing::debug;

use crate::crd::EdgeX;

pub const REASON_READY: &str = "Ready";
pub const REASON_RECONCILE_FAILED: &str = "ReconcileFailed";

pub async fn emit_event(
    recorder: Option<&Recorder>,
    edgex: &EdgeX,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    let Some(recorder) = recorder else {
        return;
    };
    if let Err(e) = recorder
        .publish(
            &Event {
                type_,
                reason: reason.into(),
                note,
                action: action.into(),
                secondary: None,
            },
            &edgex.object_ref(&()),
        )
        .await
    {
        debug!(error = %e, %reason, "event publish failed");
    }
}
