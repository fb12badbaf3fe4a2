use std::sync::Arc;

use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::database::store::Store;
use crate::error::{Error, Result};
use crate::models::attempt::{SecurityEvent, Severity};
use crate::models::identity::Identity;
use crate::utils::time::Clock;

/// Append-only anomaly log. Recording never changes an attempt's status or score.
#[derive(Clone)]
pub struct SecurityService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl SecurityService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn record_event(
        &self,
        attempt_id: Uuid,
        identity: &Identity,
        event_type: &str,
        severity: Severity,
        details: Option<JsonValue>,
    ) -> Result<SecurityEvent> {
        let attempt = self
            .store
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound("Attempt not found".into()))?;
        if attempt.student_id != identity.user_id && !identity.is_staff() {
            return Err(Error::NotFound("Attempt not found".into()));
        }

        let event_type = event_type.trim();
        if event_type.is_empty() {
            return Err(Error::BadRequest("event_type is required".into()));
        }

        let event = SecurityEvent {
            id: Uuid::new_v4(),
            attempt_id,
            event_type: event_type.to_string(),
            severity,
            details,
            occurred_at: self.clock.now(),
        };
        self.store.append_security_event(&event).await?;

        if severity >= Severity::High {
            tracing::warn!(
                %attempt_id,
                student_id = %attempt.student_id,
                event_type = %event.event_type,
                severity = severity.as_str(),
                "Security event recorded"
            );
        } else {
            tracing::debug!(%attempt_id, event_type = %event.event_type, "Security event recorded");
        }
        Ok(event)
    }
}
