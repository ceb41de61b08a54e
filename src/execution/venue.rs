//! Venue capability and the simulated broker used in place of live routing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::ExecutionError;
use crate::market::QuoteBoard;
use crate::models::Platform;

use super::wire::{VenueAck, VenueRequest};

/// A broker platform that can execute encoded orders.
pub trait Venue: Send + Sync {
    fn platform(&self) -> Platform;

    fn submit(&self, request: VenueRequest) -> BoxFuture<'_, Result<VenueAck, ExecutionError>>;
}

#[derive(Debug, Default)]
struct SimState {
    latency_overrides: HashMap<String, Duration>,
    rejections: HashMap<String, String>,
    submissions: HashMap<String, usize>,
}

/// Fills market orders at the current board price after a fixed latency.
#[derive(Clone)]
pub struct SimulatedVenue {
    platform: Platform,
    board: QuoteBoard,
    latency: Duration,
    max_order_quantity: u32,
    state: Arc<RwLock<SimState>>,
}

impl SimulatedVenue {
    pub fn new(
        platform: Platform,
        board: QuoteBoard,
        latency: Duration,
        max_order_quantity: u32,
    ) -> Self {
        Self {
            platform,
            board,
            latency,
            max_order_quantity,
            state: Arc::new(RwLock::new(SimState::default())),
        }
    }

    /// Override latency for one account.
    pub async fn set_latency(&self, account_id: &str, latency: Duration) {
        self.state
            .write()
            .await
            .latency_overrides
            .insert(account_id.to_string(), latency);
    }

    /// Make the platform reject every order for one account.
    pub async fn reject_account(&self, account_id: &str, reason: impl Into<String>) {
        self.state
            .write()
            .await
            .rejections
            .insert(account_id.to_string(), reason.into());
    }

    pub async fn clear_overrides(&self, account_id: &str) {
        let mut state = self.state.write().await;
        state.latency_overrides.remove(account_id);
        state.rejections.remove(account_id);
    }

    /// Orders received for an account, including ones that later timed out.
    pub async fn submissions(&self, account_id: &str) -> usize {
        self.state
            .read()
            .await
            .submissions
            .get(account_id)
            .copied()
            .unwrap_or(0)
    }

    async fn fill(&self, request: VenueRequest) -> Result<VenueAck, ExecutionError> {
        let account_id = request.account_id().to_string();

        let (latency, rejection) = {
            let mut state = self.state.write().await;
            *state.submissions.entry(account_id.clone()).or_insert(0) += 1;
            (
                state
                    .latency_overrides
                    .get(&account_id)
                    .copied()
                    .unwrap_or(self.latency),
                state.rejections.get(&account_id).cloned(),
            )
        };

        debug!(
            platform = %self.platform,
            account = %account_id,
            tag = %request.client_tag(),
            latency_ms = latency.as_millis() as u64,
            "Simulated order received"
        );

        tokio::time::sleep(latency).await;

        if let Some(reason) = rejection {
            return Err(ExecutionError::RejectedByPlatform { reason });
        }
        if request.quantity() > self.max_order_quantity {
            return Err(ExecutionError::platform(format!(
                "order size {} exceeds platform maximum {}",
                request.quantity(),
                self.max_order_quantity
            )));
        }

        let quote = self
            .board
            .latest(request.symbol())
            .await
            .ok_or_else(|| ExecutionError::platform(format!("unknown contract {}", request.symbol())))?;

        Ok(VenueAck {
            order_id: Uuid::new_v4().to_string(),
            price: quote.price,
            filled_quantity: request.quantity(),
        })
    }
}

impl Venue for SimulatedVenue {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn submit(&self, request: VenueRequest) -> BoxFuture<'_, Result<VenueAck, ExecutionError>> {
        self.fill(request).boxed()
    }
}
