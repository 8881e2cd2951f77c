//! The retrieve / generate / execute loop that answers one question.
//!
//! ```text
//! Retrieving ──▶ Generating ──▶ Answered ──▶ Recording
//!                   ▲   │
//!                   │   ▼
//!              CodeRequested
//! ```
//!
//! A run embeds the question, pulls the closest chunks from the index and
//! builds a session: system preamble with the retrieved context, the recent
//! history window, then the question. Each generation is scanned for a
//! fenced code block; the first one is executed and its output is fed back
//! as a system message. A response without code is the answer. After
//! `max_loops` generations the last response is returned as-is, even if it
//! still asks for code.
//!
//! Only the question and the final answer reach the history log; the
//! intermediate assistant and feedback messages live and die with the run.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::completion::CompletionClient;
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::executor::CodeExecutor;
use crate::history::ConversationHistory;
use crate::index::SimilarityIndex;
use crate::models::{AgentStep, ChatMessage, HistoryRole};

/// Placed in the preamble when retrieval found nothing.
pub const NO_CONTEXT: &str = "none";

const CONTEXT_SEPARATOR: &str = "\n---\n";

/// Tuning knobs for one agent, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_loops: usize,
    pub top_k: usize,
    pub history_window: usize,
    pub code_fence: String,
    pub system_prompt: String,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        let code_fence = config.agent.code_fence.clone();
        let system_prompt = config
            .agent
            .system_prompt
            .clone()
            .unwrap_or_else(|| default_system_prompt(&code_fence));
        Self {
            max_loops: config.agent.max_loops,
            top_k: config.retrieval.top_k,
            history_window: config.retrieval.history_window,
            code_fence,
            system_prompt,
        }
    }
}

/// Instructions that teach the model the code-request convention.
pub fn default_system_prompt(fence: &str) -> String {
    format!(
        "You are a helpful assistant.\n\
         1. If the question can be answered from what you already know or from the reference documents, answer directly.\n\
         2. If you need to calculate, process text, or read system information such as the current time, write {fence} code.\n\
         3. Wrap the code between ```{fence} and ```. Use print() to output the values you need.\n\
         4. I will run the code and tell you its output. Global variables are kept between runs.\n\
         5. Once you see the output, answer the user based on it.\n"
    )
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Termination {
    /// The model produced a response without a code block.
    Answered,
    /// The iteration bound was reached.
    Exhausted,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentAnswer {
    pub run_id: String,
    pub answer: String,
    pub steps: Vec<AgentStep>,
    /// Number of completion calls made.
    pub iterations: usize,
    pub termination: Termination,
}

/// A code request found in a model response.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeRequest {
    /// Text before the opening fence, trimmed.
    pub thought: String,
    /// Body of the first fenced block, trimmed.
    pub code: String,
}

/// Find the first ```` ```<tag> ```` block in `response`.
///
/// The tag must be followed by whitespace, so ```` ```luau ```` does not
/// match `lua`. Later blocks are ignored. An opening fence without a
/// closing one is not a request.
pub fn extract_code_request(response: &str, tag: &str) -> Option<CodeRequest> {
    let opener = format!("```{}", tag);
    let (start, _) = response.match_indices(&opener).find(|(i, _)| {
        response[i + opener.len()..]
            .chars()
            .next()
            .is_some_and(char::is_whitespace)
    })?;
    let body_start = start + opener.len();
    let body_len = response[body_start..].find("```")?;

    Some(CodeRequest {
        thought: response[..start].trim().to_string(),
        code: response[body_start..body_start + body_len].trim().to_string(),
    })
}

/// Feedback message carrying an execution result back to the model.
pub fn feedback_message(result: &str) -> ChatMessage {
    ChatMessage::system(format!(
        "[system feedback] code execution result:\n{}\n\nPlease answer the user based on this result.",
        result
    ))
}

/// Initial message sequence for a run.
pub fn build_session(
    system_prompt: &str,
    context: &[String],
    recent: Vec<ChatMessage>,
    question: &str,
) -> Vec<ChatMessage> {
    let context = if context.is_empty() {
        NO_CONTEXT.to_string()
    } else {
        context.join(CONTEXT_SEPARATOR)
    };

    let mut messages = Vec::with_capacity(recent.len() + 2);
    messages.push(ChatMessage::system(format!(
        "{}\n\nReference documents:\n{}",
        system_prompt, context
    )));
    messages.extend(recent);
    messages.push(ChatMessage::user(question));
    messages
}

enum Phase {
    Generating,
    CodeRequested { response: String, request: CodeRequest },
    Answered(String),
}

pub struct Agent {
    embedder: Arc<dyn EmbeddingClient>,
    completer: Arc<dyn CompletionClient>,
    executor: Arc<dyn CodeExecutor>,
    index: Arc<RwLock<SimilarityIndex>>,
    history: Arc<Mutex<ConversationHistory>>,
    settings: AgentSettings,
}

impl Agent {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        completer: Arc<dyn CompletionClient>,
        executor: Arc<dyn CodeExecutor>,
        index: Arc<RwLock<SimilarityIndex>>,
        history: Arc<Mutex<ConversationHistory>>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            embedder,
            completer,
            executor,
            index,
            history,
            settings,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Answer `question` and record the exchange in history.
    pub async fn answer(&self, question: &str) -> AgentAnswer {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("agent_run", run_id = %run_id);
        self.run(run_id, question).instrument(span).await
    }

    async fn run(&self, run_id: String, question: &str) -> AgentAnswer {
        let mut messages = self.retrieve(question).await;

        let mut steps = Vec::new();
        let mut iterations = 0;
        let mut last_response = String::new();
        let mut phase = Phase::Generating;

        let (answer, termination) = loop {
            phase = match phase {
                Phase::Answered(text) => break (text, Termination::Answered),
                Phase::Generating if iterations >= self.settings.max_loops => {
                    info!(iterations, "iteration bound reached, returning last response");
                    break (std::mem::take(&mut last_response), Termination::Exhausted);
                }
                Phase::Generating => {
                    iterations += 1;
                    let response = self.completer.complete(&messages).await;
                    debug!(iteration = iterations, chars = response.len(), "model responded");
                    match extract_code_request(&response, &self.settings.code_fence) {
                        Some(request) => Phase::CodeRequested { response, request },
                        None => Phase::Answered(response),
                    }
                }
                Phase::CodeRequested { response, request } => {
                    info!(iteration = iterations, "executing requested code");
                    let result = self.executor.run(&request.code).await;
                    messages.push(ChatMessage::assistant(response.clone()));
                    messages.push(feedback_message(&result));
                    steps.push(AgentStep {
                        thought: request.thought,
                        code: request.code,
                        result,
                    });
                    last_response = response;
                    Phase::Generating
                }
            };
        };

        self.record(question, &answer).await;
        info!(iterations, steps = steps.len(), ?termination, "question answered");

        AgentAnswer {
            run_id,
            answer,
            steps,
            iterations,
            termination,
        }
    }

    async fn retrieve(&self, question: &str) -> Vec<ChatMessage> {
        let query = self.embedder.embed(question).await;
        let context = {
            let index = self.index.read().await;
            index.search(&query, self.settings.top_k)
        };
        debug!(chunks = context.len(), "retrieved context");

        let recent = {
            let history = self.history.lock().await;
            history.get_recent(self.settings.history_window)
        };

        build_session(&self.settings.system_prompt, &context, recent, question)
    }

    async fn record(&self, question: &str, answer: &str) {
        let mut history = self.history.lock().await;
        history.add(HistoryRole::User, question);
        history.add(HistoryRole::Assistant, answer);
    }
}
