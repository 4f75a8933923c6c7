use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use shared_utils::RetryPolicy;

use crate::error::AppointmentError;
use crate::models::Appointment;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub patient_id: Option<Uuid>,
    pub display_name: Option<String>,
}

/// Best-effort side channel. Callers never let a failure here fail a booking.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_appointment_scheduled(
        &self,
        appointment: &Appointment,
        recipient: &Recipient,
    ) -> Result<(), AppointmentError>;
}

pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify_appointment_scheduled(
        &self,
        appointment: &Appointment,
        recipient: &Recipient,
    ) -> Result<(), AppointmentError> {
        info!(
            appointment_id = %appointment.id,
            doctor_id = %appointment.doctor_id,
            recipient = recipient.display_name.as_deref().unwrap_or("unknown"),
            "Appointment scheduled for {}",
            appointment.start_time
        );
        Ok(())
    }
}

/// POSTs a JSON event to an external delivery service.
pub struct WebhookNotificationSink {
    client: Client,
    url: String,
    retry: RetryPolicy,
}

impl WebhookNotificationSink {
    pub fn new(url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            retry,
        }
    }

    async fn post_once(&self, body: &serde_json::Value) -> Result<(), AppointmentError> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppointmentError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppointmentError::Upstream(format!(
                "Notification webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify_appointment_scheduled(
        &self,
        appointment: &Appointment,
        recipient: &Recipient,
    ) -> Result<(), AppointmentError> {
        let body = json!({
            "event": "appointment_scheduled",
            "appointment": appointment,
            "recipient": recipient,
        });

        self.retry
            .run("appointment notification", || self.post_once(&body))
            .await
    }
}
