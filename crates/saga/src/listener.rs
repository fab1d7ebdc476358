//! Saga listeners: validation, the service's step, and dedup bookkeeping.

use std::sync::Arc;

use async_trait::async_trait;
use broker::Channel;
use message::Message;
use pipeline::{HandlerError, MessageHandler};

use crate::validator::{RollbackHandler, SagaValidator, ValidationRules};
use crate::{Result, SagaError};

/// One service's part in a saga.
///
/// `execute` typically decorates the message and republishes it with
/// [`pipeline::Publisher::publish`]. The [`RollbackHandler`] half compensates
/// that work when a later service reports an error.
#[async_trait]
pub trait SagaStep: RollbackHandler {
    async fn execute(&self, channel: &Arc<dyn Channel>, message: &Message) -> Result<()>;
}

/// A message handler that runs a [`SagaStep`] for admissible messages.
///
/// Only a plainly valid message runs the step. Once the step succeeds, the
/// correlation ID is recorded so a later error decoration on the same saga
/// triggers this step's rollback.
pub struct SagaListener<S> {
    rules: ValidationRules,
    validator: SagaValidator,
    step: S,
}

impl<S: SagaStep> SagaListener<S> {
    pub fn new(rules: ValidationRules, validator: SagaValidator, step: S) -> Self {
        Self {
            rules,
            validator,
            step,
        }
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    pub fn step(&self) -> &S {
        &self.step
    }
}

#[async_trait]
impl<S: SagaStep> MessageHandler for SagaListener<S> {
    fn name(&self) -> &str {
        &self.rules.listener_name
    }

    async fn handle(
        &self,
        channel: &Arc<dyn Channel>,
        message: &Message,
    ) -> std::result::Result<(), HandlerError> {
        let outcome = self
            .validator
            .validate_message(message, &self.rules, &self.step)
            .await
            .map_err(HandlerError::other)?;
        if !outcome.should_process() {
            return Ok(());
        }

        self.step
            .execute(channel, message)
            .await
            .map_err(HandlerError::other)?;
        self.validator
            .cache()
            .add_processed_message(message.correlation_id())
            .await
            .map_err(|e| HandlerError::other(SagaError::from(e)))?;

        tracing::info!(
            listener = %self.rules.listener_name,
            correlation_id = %message.correlation_id(),
            "saga step completed"
        );
        Ok(())
    }
}
