//! The decision oracle: situational context in, stratagem out
//!
//! `DecisionOracle` is the seam the scheduler talks to. `LlmOracle` is the
//! production implementation: it renders the prompt, dispatches to a
//! completion backend, retries rate limits per `RetryPolicy` and sanitizes
//! the reply.

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::error::{Result, SwarmError};
use crate::core::types::Swarm;
use crate::events::{EventLog, LogCategory};
use crate::llm::client::CompletionBackend;
use crate::llm::context::{DecisionContext, PromptPair};
use crate::llm::parser::{parse_stratagem, Stratagem};
use crate::llm::retry::RetryPolicy;

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Obtain one stratagem for the agent described by `context`
    ///
    /// Retry notices are written to `log`, authored by the agent.
    async fn get_action(&self, context: &DecisionContext, log: &EventLog) -> Result<Stratagem>;

    /// Human-readable label for status output
    fn describe(&self) -> String;

    /// False when calls are known to fail up front (e.g. missing credential)
    fn is_available(&self) -> bool {
        true
    }
}

pub struct LlmOracle {
    backend: Arc<dyn CompletionBackend>,
    policy: RetryPolicy,
    label: String,
}

impl LlmOracle {
    pub fn new(backend: Arc<dyn CompletionBackend>, label: impl Into<String>) -> Self {
        Self {
            backend,
            policy: RetryPolicy::default(),
            label: label.into(),
        }
    }

    /// Call the backend, retrying rate limits when the backend supports it
    async fn complete_with_backoff(
        &self,
        prompt: &PromptPair,
        context: &DecisionContext,
        log: &EventLog,
    ) -> Result<String> {
        let author = context.agent.id;
        let mut attempt = 1;
        loop {
            let err = match self.backend.complete(prompt).await {
                Ok(text) => return Ok(text),
                Err(err) => err,
            };

            if !err.is_rate_limit() || !self.backend.retries_rate_limits() {
                return Err(err);
            }
            let suggested = match &err {
                SwarmError::RateLimited { retry_after, .. } => *retry_after,
                _ => None,
            };

            if !self.policy.should_retry(attempt) {
                return Err(SwarmError::RetriesExhausted { attempts: attempt });
            }

            let wait = {
                let mut rng = rand::thread_rng();
                self.policy.delay_for(attempt, suggested, &mut rng)
            };
            log.agent(
                LogCategory::Retry,
                author,
                format!(
                    "{} rate limited; waiting {}ms before attempt {}/{}",
                    self.backend.name(),
                    wait.as_millis(),
                    attempt + 1,
                    self.policy.max_attempts
                ),
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl DecisionOracle for LlmOracle {
    async fn get_action(&self, context: &DecisionContext, log: &EventLog) -> Result<Stratagem> {
        let prompt = context.prompt();
        let reply = self.complete_with_backoff(&prompt, context, log).await?;
        tracing::debug!(agent = %context.agent.id, reply = %reply, "oracle reply");
        parse_stratagem(&reply)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    fn is_available(&self) -> bool {
        self.backend.is_available()
    }
}

/// One oracle per swarm
#[derive(Clone)]
pub struct OracleSet {
    red: Arc<dyn DecisionOracle>,
    blue: Arc<dyn DecisionOracle>,
}

impl OracleSet {
    pub fn new(red: Arc<dyn DecisionOracle>, blue: Arc<dyn DecisionOracle>) -> Self {
        Self { red, blue }
    }

    /// Same oracle for both swarms
    pub fn shared(oracle: Arc<dyn DecisionOracle>) -> Self {
        Self {
            red: Arc::clone(&oracle),
            blue: oracle,
        }
    }

    pub fn for_swarm(&self, swarm: Swarm) -> &Arc<dyn DecisionOracle> {
        match swarm {
            Swarm::Red => &self.red,
            Swarm::Blue => &self.blue,
        }
    }

    /// Swarms whose oracle cannot be called, with the oracle label
    pub fn unavailable(&self) -> Vec<(Swarm, String)> {
        Swarm::ALL
            .into_iter()
            .filter(|s| !self.for_swarm(*s).is_available())
            .map(|s| (s, self.for_swarm(s).describe()))
            .collect()
    }
}
