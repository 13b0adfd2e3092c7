use crate::domain::{topic_from_subject, DualSinkDispatcher, IngestionRule, RuleTarget};
use common::{DomainError, DomainResult, RawPresenceNotification};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(30);

/// One stateless pass over a single inbound notification.
///
/// `targets` limits which of the rule's targets this invocation serves, so a
/// consumer dedicated to one target never re-runs the other.
pub struct PresenceInvocation {
    dispatcher: Arc<DualSinkDispatcher>,
    rule: Arc<IngestionRule>,
    targets: Vec<RuleTarget>,
    timeout: Duration,
}

impl PresenceInvocation {
    pub fn new(
        dispatcher: Arc<DualSinkDispatcher>,
        rule: Arc<IngestionRule>,
        targets: Vec<RuleTarget>,
        timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            rule,
            targets,
            timeout,
        }
    }

    /// Returns the targets that ran. A topic the rule does not select runs
    /// nothing and fails with [`DomainError::UnmatchedTopic`].
    #[instrument(skip(self, payload), fields(rule = %self.rule.name()))]
    pub async fn handle(&self, subject: &str, payload: &[u8]) -> DomainResult<Vec<RuleTarget>> {
        let topic = topic_from_subject(subject);

        let selected: Vec<RuleTarget> = match self.rule.select(&topic) {
            Some(rule_targets) => rule_targets
                .iter()
                .copied()
                .filter(|target| self.targets.contains(target))
                .collect(),
            None => {
                warn!(subject = %subject, topic = %topic, "topic not selected by rule");
                return Err(DomainError::UnmatchedTopic(topic));
            }
        };

        if selected.is_empty() {
            return Ok(selected);
        }

        // Rejected before either action runs
        let raw = RawPresenceNotification::from_json(payload)?;

        tokio::time::timeout(self.timeout, self.run(&raw, &selected))
            .await
            .map_err(|_| DomainError::InvocationTimeout(self.timeout))??;

        Ok(selected)
    }

    async fn run(&self, raw: &RawPresenceNotification, targets: &[RuleTarget]) -> DomainResult<()> {
        match targets {
            [RuleTarget::TimeSeries] => self.dispatcher.write_time_series(raw).await,
            [RuleTarget::DomainEvents] => self.dispatcher.publish_domain_event(raw).await,
            _ => self.dispatcher.dispatch(raw).await.into_result(),
        }
    }
}
