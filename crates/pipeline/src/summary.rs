//! Rolling summary service (spec.md §4.9).

use chrono::Utc;
use tf_domain::config::{ModelChoice, SummaryConfig};
use tf_domain::entities::{Interaction, SessionSummary};
use tf_domain::error::{Error, Result};
use tf_domain::message::{Message, MessageContent, Role};
use tf_providers::{ChatRequest, LlmRouter};
use uuid::Uuid;

pub struct SummaryService {
    router: std::sync::Arc<LlmRouter>,
    config: SummaryConfig,
    model_choice: ModelChoice,
}

impl SummaryService {
    pub fn new(router: std::sync::Arc<LlmRouter>, config: SummaryConfig, model_choice: ModelChoice) -> Self {
        Self { router, config, model_choice }
    }

    /// `SummaryState.turns_since / 2 >= threshold` (spec.md §4.9). Pure
    /// and idempotent: calling it twice with the same `turns_since`
    /// gives the same answer.
    pub fn should_trigger(&self, turns_since: u32) -> bool {
        turns_since / 2 >= self.config.turn_pair_threshold
    }

    /// Build the rolling-merge summary for a session.
    ///
    /// `previous` is the prior `SessionSummary` row, if any; `interactions`
    /// are every `Interaction` since `previous.created_at` (or the whole
    /// transcript on the first summary).
    pub async fn summarize(
        &self,
        session_id: Uuid,
        previous: Option<&SessionSummary>,
        interactions: &[Interaction],
    ) -> Result<SessionSummary> {
        let prompt = self.build_prompt(previous, interactions);
        let request = ChatRequest {
            messages: vec![Message { role: Role::User, content: MessageContent::Text(prompt) }],
            temperature: Some(0.0),
            max_tokens: Some(self.config.max_tokens),
            json_mode: false,
            model: None,
        };

        let response = self
            .router
            .chat_for_choice(self.model_choice, request)
            .await
            .map_err(|e| Error::Provider {
                provider: "summary".into(),
                message: format!("summary.error: {e}"),
            })?;

        let version = previous.map(|p| p.version + 1).unwrap_or(1);
        let cutoff_idx = interactions.last().map(|i| i.created_at.timestamp_millis() as u64).unwrap_or(0);

        Ok(SessionSummary {
            id: Uuid::new_v4(),
            session_id,
            version,
            text: response.content,
            cutoff_idx,
            token_count: response.usage.map(|u| u.completion_tokens).unwrap_or(0),
            created_at: Utc::now(),
        })
    }

    /// Transcript slice for the `status.update("summary", …)` UI snapshot
    /// (spec.md §4.9): the most recent `transcript_slice_len` interactions.
    pub fn transcript_slice<'a>(&self, interactions: &'a [Interaction]) -> &'a [Interaction] {
        let len = interactions.len();
        let start = len.saturating_sub(self.config.transcript_slice_len);
        &interactions[start..]
    }

    fn build_prompt(&self, previous: Option<&SessionSummary>, interactions: &[Interaction]) -> String {
        let mut prompt = String::new();
        prompt.push_str("Merge the prior summary with the new turns into one updated summary.\n\n");
        prompt.push_str("Prior summary:\n");
        prompt.push_str(previous.map(|p| p.text.as_str()).unwrap_or("(none)"));
        prompt.push_str("\n\nNew turns:\n");
        for interaction in interactions {
            prompt.push_str(&format!("{:?}: {}\n", interaction.role, interaction.content));
        }
        prompt
    }
}
