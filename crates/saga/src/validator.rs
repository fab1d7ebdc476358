//! Saga admissibility and rollback decisions.

use std::fmt;

use async_trait::async_trait;
use common::{ServiceId, format_error};
use dedup::DedupCache;
use message::Message;

use crate::Result;

/// What a listener requires of a message before it will act on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRules {
    /// The saga this listener handles; every other saga is ignored.
    pub interested_saga: String,
    /// Keys that must be present in the message context.
    pub required_context_props: Vec<String>,
    /// Properties at least one decoration must carry.
    pub required_decoration_props: Vec<String>,
    /// Listener name used in logs.
    pub listener_name: String,
}

impl ValidationRules {
    /// Creates rules for `listener_name` that accept any message of
    /// `interested_saga`.
    pub fn new(listener_name: impl Into<String>, interested_saga: impl Into<String>) -> Self {
        Self {
            interested_saga: interested_saga.into(),
            required_context_props: Vec::new(),
            required_decoration_props: Vec::new(),
            listener_name: listener_name.into(),
        }
    }

    /// Requires `prop` in the message context.
    pub fn require_context(mut self, prop: impl Into<String>) -> Self {
        self.required_context_props.push(prop.into());
        self
    }

    /// Requires `prop` on at least one decoration.
    pub fn require_decoration(mut self, prop: impl Into<String>) -> Self {
        self.required_decoration_props.push(prop.into());
        self
    }
}

/// Compensates this service's contribution to a failed saga.
#[async_trait]
pub trait RollbackHandler: Send + Sync {
    /// Undoes what this service did for `message`. An error means the
    /// rollback did not happen.
    async fn rollback(&self, message: &Message) -> Result<()>;
}

/// Why a message was turned away, or what was done with it instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationReason {
    NotInterested,
    LastDecoratedBySelf,
    RolledBack,
    /// The saga errored after this service handled it, and the rollback
    /// failed.
    ErrorAlreadyProcessed,
    ErrorPresent(String),
    AlreadyDecorated,
    MissingContextProperty(String),
    MissingDecorationProperty(String),
}

impl ValidationReason {
    /// Short label used as a metric dimension.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotInterested => "not_interested",
            Self::LastDecoratedBySelf => "last_decorated_by_self",
            Self::RolledBack => "rolled_back",
            Self::ErrorAlreadyProcessed => "error_already_processed",
            Self::ErrorPresent(_) => "error_present",
            Self::AlreadyDecorated => "already_decorated",
            Self::MissingContextProperty(_) => "missing_context_property",
            Self::MissingDecorationProperty(_) => "missing_decoration_property",
        }
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInterested => write!(f, "This Handler is not interested in this saga"),
            Self::LastDecoratedBySelf => write!(f, "Message last decorated by this service"),
            Self::RolledBack => write!(f, "Rolled back"),
            Self::ErrorAlreadyProcessed => write!(f, "Error present but already processed"),
            Self::ErrorPresent(error) => write!(f, "Error present: {error}"),
            Self::AlreadyDecorated => write!(f, "Already decorated"),
            Self::MissingContextProperty(prop) => {
                write!(f, "Missing required context property: {prop}")
            }
            Self::MissingDecorationProperty(prop) => {
                write!(f, "Missing required decoration property: {prop}")
            }
        }
    }
}

/// The result of validating one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub reason: Option<ValidationReason>,
}

impl ValidationOutcome {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: ValidationReason) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason),
        }
    }

    /// Returns true only for a plain valid outcome, one the listener should
    /// act on.
    pub fn should_process(&self) -> bool {
        self.is_valid && self.reason.is_none()
    }

    fn label(&self) -> &'static str {
        self.reason.as_ref().map_or("valid", ValidationReason::label)
    }
}

/// Decides whether a message is admissible for one of this service's
/// listeners.
#[derive(Debug, Clone)]
pub struct SagaValidator {
    service: ServiceId,
    cache: DedupCache,
}

impl SagaValidator {
    pub fn new(service: ServiceId, cache: DedupCache) -> Self {
        Self { service, cache }
    }

    pub fn service(&self) -> &ServiceId {
        &self.service
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    /// Validates `message` against `rules`.
    ///
    /// Checks run in a fixed order and the first that applies decides:
    /// 1. a different saga is not of interest
    /// 2. a message this service emitted last is its own echo
    /// 3. an error decoration either triggers `rollback` (when this service
    ///    already handled the message) or rejects the message
    /// 4. a message this service already decorated is not handled again
    /// 5. required context properties must be present
    /// 6. required decoration properties must be present on some decoration
    ///
    /// Only step 3 touches the cache or calls `rollback`. Cache failures are
    /// returned, never treated as "not processed".
    #[tracing::instrument(
        skip_all,
        fields(
            correlation_id = %message.correlation_id(),
            saga = message.saga(),
            listener = %rules.listener_name,
        )
    )]
    pub async fn validate_message(
        &self,
        message: &Message,
        rules: &ValidationRules,
        rollback: &dyn RollbackHandler,
    ) -> Result<ValidationOutcome> {
        tracing::debug!(interested_saga = %rules.interested_saga, "validating message");
        let outcome = self.check(message, rules, rollback).await?;
        metrics::counter!("saga_validation_total", "outcome" => outcome.label()).increment(1);
        match &outcome.reason {
            None => tracing::info!("message validation successful"),
            Some(reason) => tracing::info!(is_valid = outcome.is_valid, %reason, "message not admitted"),
        }
        Ok(outcome)
    }

    async fn check(
        &self,
        message: &Message,
        rules: &ValidationRules,
        rollback: &dyn RollbackHandler,
    ) -> Result<ValidationOutcome> {
        if message.saga() != rules.interested_saga {
            return Ok(ValidationOutcome::invalid(ValidationReason::NotInterested));
        }

        if message.last_service_decoration() == Some(self.service.as_str()) {
            return Ok(ValidationOutcome::invalid(
                ValidationReason::LastDecoratedBySelf,
            ));
        }

        if let Some(error) = message.error_decoration().and_then(|d| d.error()) {
            tracing::warn!(error = %error, "error present in message");
            let processed = self
                .cache
                .has_processed_message(message.correlation_id())
                .await?;
            if !processed {
                return Ok(ValidationOutcome::invalid(ValidationReason::ErrorPresent(
                    error.into_owned(),
                )));
            }

            tracing::warn!("errored message already processed, rolling back");
            metrics::counter!("saga_rollbacks_total").increment(1);
            return Ok(match rollback.rollback(message).await {
                Ok(()) => ValidationOutcome::invalid(ValidationReason::RolledBack),
                Err(e) => {
                    metrics::counter!("saga_rollback_failures_total").increment(1);
                    tracing::error!(error = %format_error(&e), "rollback failed");
                    ValidationOutcome {
                        is_valid: true,
                        reason: Some(ValidationReason::ErrorAlreadyProcessed),
                    }
                }
            });
        }

        if message.is_decorated_by(self.service.as_str()) {
            return Ok(ValidationOutcome::invalid(ValidationReason::AlreadyDecorated));
        }

        if let Some(prop) = rules
            .required_context_props
            .iter()
            .find(|prop| !message.has_context(prop))
        {
            return Ok(ValidationOutcome::invalid(
                ValidationReason::MissingContextProperty(prop.clone()),
            ));
        }

        if let Some(prop) = rules
            .required_decoration_props
            .iter()
            .find(|prop| !message.any_decoration_has(prop))
        {
            return Ok(ValidationOutcome::invalid(
                ValidationReason::MissingDecorationProperty(prop.clone()),
            ));
        }

        Ok(ValidationOutcome::valid())
    }
}
