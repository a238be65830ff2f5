//! Chat orchestrator: one caller turn from audio to spoken answer.
//!
//! ```text
//! get_or_create ─► classify ─┬─ LocateByAttributes ─► merge ─► cascade ─┐
//!                            ├─ LocateNearest ───────► locator ──────────┤
//!                            ├─ Passthrough ─────────────────────────────┼─► second call ─► finalize ─► update
//!                            └─ NoCall ──────────────────────────────────┴───────────────► finalize ─► update
//! ```
//!
//! The session is written back only after the whole turn succeeded, so a
//! failed or abandoned turn leaves it as it was.

use std::sync::Arc;

use apteka_core::types::{Coordinates, Session, SlotSet};
use apteka_llm::{
    FunctionCall, LanguageService, LlmError, LlmReply, LlmRequest, ToolResult, UserInput,
};
use apteka_storage::NearbyLocator;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::intent::{tool_menu, Intent};
use crate::merge::{merge_context, MergeDecision};
use crate::prompt::system_instruction;
use crate::response::{finalize_answer, AnswerSource, COMPOSE_FAILED_APOLOGY, NOT_FOUND_APOLOGY};
use crate::retrieval::RetrievalCascade;
use crate::store::SessionStore;

/// Summary sent when the locator returns nothing.
const NO_NEARBY_SUMMARY: &str = "Поблизости аптек не найдено.";

/// Default MIME type for audio parts sent without one.
pub const DEFAULT_AUDIO_MIME: &str = "audio/m4a";

// =============================================================================
// Turn types
// =============================================================================

/// One caller turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnInput {
    pub audio: Vec<u8>,
    pub mime_type: String,
    pub coordinates: Option<Coordinates>,
    pub session_id: Option<String>,
}

impl TurnInput {
    pub fn audio(audio: Vec<u8>) -> Self {
        Self {
            audio,
            mime_type: DEFAULT_AUDIO_MIME.to_string(),
            coordinates: None,
            session_id: None,
        }
    }

    pub fn with_session(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }
}

/// Reply to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutput {
    pub transcription: String,
    pub assistant_response: String,
    pub session_id: String,
}

/// How the session's topic changes once the turn completes.
#[derive(Debug)]
enum SessionChange {
    /// Topic resolved or no tool called: fresh baseline.
    Reset,
    /// Append the exchange, keep the current topic.
    Append,
    /// Append the exchange and replace the topic.
    AppendWithTopic(SlotSet),
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct ChatOrchestrator {
    llm: Arc<dyn LanguageService>,
    cascade: RetrievalCascade,
    locator: Arc<dyn NearbyLocator>,
    sessions: Arc<dyn SessionStore>,
    history_cap: usize,
    nearby_limit: usize,
}

impl ChatOrchestrator {
    pub fn new(
        llm: Arc<dyn LanguageService>,
        cascade: RetrievalCascade,
        locator: Arc<dyn NearbyLocator>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            llm,
            cascade,
            locator,
            sessions,
            history_cap: 8,
            nearby_limit: 5,
        }
    }

    /// Override the history cap and the number of nearby places offered.
    pub fn with_limits(mut self, history_cap: usize, nearby_limit: usize) -> Self {
        self.history_cap = history_cap;
        self.nearby_limit = nearby_limit;
        self
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Handle one turn end to end.
    pub async fn handle_turn(&self, input: TurnInput) -> Result<TurnOutput, ChatError> {
        if input.audio.is_empty() {
            return Err(ChatError::EmptyAudio);
        }

        let mut session = self
            .sessions
            .get_or_create(input.session_id.as_deref())
            .await?;
        let has_coordinates = input.coordinates.is_some();

        let request = LlmRequest {
            system_instruction: system_instruction(has_coordinates),
            history: session.history.clone(),
            input: UserInput::Audio {
                mime_type: input.mime_type,
                data: input.audio,
            },
            tools: tool_menu(has_coordinates),
            tool_result: None,
        };

        let first = self.generate(&session.id, &request).await?;
        let intent = Intent::from_reply(&first, input.coordinates)?;
        info!(
            session_id = %session.id,
            tool = intent.tool_name().unwrap_or("none"),
            "Intent decided"
        );

        let transcription = intent.transcription().to_string();
        let (answer, change) = match &intent {
            Intent::NoCall { .. } => (
                finalize_answer(&first, AnswerSource::Direct),
                SessionChange::Reset,
            ),
            Intent::Passthrough { transcription } => {
                let response = json!({ "transcription": transcription });
                let answer = self.answer_with(&session.id, &request, &first, &intent, response).await?;
                (answer, SessionChange::Append)
            }
            Intent::LocateNearest { coordinates, .. } => {
                let response = self.nearby_summary(&session.id, *coordinates).await?;
                let answer = self.answer_with(&session.id, &request, &first, &intent, response).await?;
                (answer, SessionChange::Append)
            }
            Intent::LocateByAttributes(query) => {
                let (slots, decision) = merge_context(session.current_topic.as_ref(), &query.slots);
                debug!(
                    session_id = %session.id,
                    continuation = decision == MergeDecision::Continue,
                    attributes = slots.filled_count(),
                    "Context merged"
                );

                let outcome = self.cascade.run(&slots, &query.transcription).await?;
                if outcome.is_not_found() {
                    info!(session_id = %session.id, "No pharmacy matched, asking caller to refine");
                    (NOT_FOUND_APOLOGY.to_string(), SessionChange::AppendWithTopic(slots))
                } else {
                    let answer = self
                        .answer_with(&session.id, &request, &first, &intent, outcome.tool_response())
                        .await?;
                    if outcome.is_resolved() {
                        (answer, SessionChange::Reset)
                    } else {
                        (answer, SessionChange::AppendWithTopic(slots))
                    }
                }
            }
        };

        self.apply(&mut session, change, &transcription, &answer);
        let session_id = session.id.clone();
        self.sessions.update(session).await?;

        Ok(TurnOutput {
            transcription,
            assistant_response: answer,
            session_id,
        })
    }

    async fn generate(&self, session_id: &str, request: &LlmRequest) -> Result<LlmReply, ChatError> {
        self.llm.generate(request).await.map_err(|e| {
            warn!(session_id, error = %e, "Language service call failed");
            ChatError::Llm(e)
        })
    }

    /// Send the tool result back and finalize whatever text comes out.
    async fn answer_with(
        &self,
        session_id: &str,
        request: &LlmRequest,
        first: &LlmReply,
        intent: &Intent,
        response: Value,
    ) -> Result<String, ChatError> {
        let call = first.function_call.clone().unwrap_or_else(|| FunctionCall {
            name: intent.tool_name().unwrap_or_default().to_string(),
            args: Map::new(),
        });

        let mut follow_up = request.clone();
        follow_up.tool_result = Some(ToolResult { call, response });

        // An empty follow-up is recovered locally; the first call has no such fallback.
        let second = match self.llm.generate(&follow_up).await {
            Ok(reply) => reply,
            Err(LlmError::EmptyResponse) => {
                info!(session_id, "Language service returned no answer after tool result");
                return Ok(COMPOSE_FAILED_APOLOGY.to_string());
            }
            Err(e) => {
                warn!(session_id, error = %e, "Language service call failed");
                return Err(ChatError::Llm(e));
            }
        };
        Ok(finalize_answer(&second, AnswerSource::AfterTool))
    }

    async fn nearby_summary(
        &self,
        session_id: &str,
        coordinates: Coordinates,
    ) -> Result<Value, ChatError> {
        let places = self
            .locator
            .nearest(coordinates, self.nearby_limit)
            .await
            .map_err(|e| {
                warn!(session_id, error = %e, "Nearest lookup failed");
                ChatError::Locator(e.to_string())
            })?;

        debug!(session_id, candidates = places.len(), "Nearest lookup complete");
        let summary = if places.is_empty() {
            NO_NEARBY_SUMMARY.to_string()
        } else {
            places
                .iter()
                .take(self.nearby_limit)
                .map(|p| p.spoken_line())
                .collect::<Vec<_>>()
                .join("\n")
        };
        Ok(json!({ "nearby_pharmacies": summary }))
    }

    fn apply(&self, session: &mut Session, change: SessionChange, transcription: &str, answer: &str) {
        match change {
            SessionChange::Reset => session.reset_conversation(),
            SessionChange::Append => session.push_exchange(transcription, answer, self.history_cap),
            SessionChange::AppendWithTopic(topic) => {
                session.push_exchange(transcription, answer, self.history_cap);
                session.current_topic = Some(topic);
            }
        }
    }
}
