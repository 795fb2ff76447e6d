//! Liveness tracking shared by the accounting services.
//!
//! Both services run long-lived loops (the Kafka client poll loop, the batch
//! consume loop) next to their HTTP server. A process is only live when every
//! registered loop has checked in before its deadline:
//!   - no component registered yet: not live
//!   - any component `Starting`, `Unhealthy` or past its deadline: not live
//!   - every component reported healthy recently: live
//!
//! Keep one registry per probe kind; `/_liveness` renders `get_status()`.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let status = if self.healthy {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, format!("{:?}", self)).into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered, has not reported yet.
    Starting,
    HealthyUntil(OffsetDateTime),
    Unhealthy,
    /// Computed when a `HealthyUntil` deadline has passed.
    Stalled,
}

struct StatusUpdate {
    component: String,
    status: ComponentStatus,
}

/// Handed to a component so it can report on its own schedule.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<StatusUpdate>,
}

impl HealthHandle {
    /// Must be called more often than the deadline given at registration.
    pub async fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() + self.deadline,
        ))
        .await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        let update = self.update(status);
        if let Err(err) = self.sender.send(update).await {
            warn!("failed to report health status: {}", err)
        }
    }

    /// Blocking variant for callbacks running outside the runtime, such as
    /// rdkafka statistics callbacks.
    pub fn report_healthy_blocking(&self) {
        let update = self.update(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() + self.deadline,
        ));
        if let Err(err) = self.sender.blocking_send(update) {
            warn!("failed to report health status: {}", err)
        }
    }

    fn update(&self, status: ComponentStatus) -> StatusUpdate {
        StatusUpdate {
            component: self.component.clone(),
            status,
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<StatusUpdate>,
}

impl HealthRegistry {
    /// Must be called from within a tokio runtime: status updates are folded
    /// into the registry by a background task.
    pub fn new(name: &str) -> Self {
        let (sender, mut receiver) = mpsc::channel::<StatusUpdate>(16);
        let components: Arc<RwLock<HashMap<String, ComponentStatus>>> = Default::default();

        let shared = components.clone();
        tokio::spawn(async move {
            while let Some(update) = receiver.recv().await {
                match shared.write() {
                    Ok(mut map) => {
                        _ = map.insert(update.component, update.status);
                    }
                    // The probe will fail and the process gets restarted
                    Err(_) => warn!("poisoned HealthRegistry lock"),
                }
            }
        });

        Self {
            name: name.to_owned(),
            components,
            sender,
        }
    }

    pub async fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component,
            deadline,
            sender: self.sender.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    pub fn get_status(&self) -> HealthStatus {
        let now = OffsetDateTime::now_utc();
        let mut result = HealthStatus::default();

        let Ok(components) = self.components.read() else {
            warn!("{} health check failed: poisoned lock", self.name);
            return result;
        };

        result.healthy = !components.is_empty();
        for (name, status) in components.iter() {
            let effective = match status {
                ComponentStatus::HealthyUntil(until) if *until > now => status.clone(),
                ComponentStatus::HealthyUntil(_) => ComponentStatus::Stalled,
                other => other.clone(),
            };
            if !matches!(effective, ComponentStatus::HealthyUntil(_)) {
                result.healthy = false;
            }
            result.components.insert(name.clone(), effective);
        }

        if result.healthy {
            info!("{} health check ok", self.name);
        } else {
            warn!("{} health check failed: {:?}", self.name, result.components);
        }
        result
    }
}
