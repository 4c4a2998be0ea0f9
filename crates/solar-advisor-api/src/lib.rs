use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use solar_advisor_core::{advise, Advice, RecordStore};
use solar_advisor_store_csv::{CsvDataset, DatasetInfo};

pub const API_CONTRACT_VERSION: &str = "api.v1";

pub const DEFAULT_LLM_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_LLM_MODEL: &str = "nvidia/llama-3.1-nemotron-ultra-253b-v1:free";
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AskResponse {
    pub response: String,
}

/// Produces free text for a prompt. Implementations may block.
pub trait TextGenerator: Send + Sync + fmt::Debug {
    /// Generate a completion for `prompt`.
    ///
    /// # Errors
    /// Returns an error when the backing service cannot produce a completion.
    fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key: None,
            timeout_secs: DEFAULT_LLM_TIMEOUT_SECS,
        }
    }
}

impl fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Blocking client for an OpenAI-compatible `chat/completions` endpoint.
pub struct ChatCompletionClient {
    agent: ureq::Agent,
    config: CompletionConfig,
}

impl fmt::Debug for ChatCompletionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionClient").field("config", &self.config).finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    error: Option<ChatErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatErrorBody {
    message: String,
}

impl ChatCompletionClient {
    #[must_use]
    pub fn new(config: CompletionConfig) -> Self {
        let agent =
            ureq::AgentBuilder::new().timeout(Duration::from_secs(config.timeout_secs)).build();
        Self { agent, config }
    }

    #[must_use]
    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

impl TextGenerator for ChatCompletionClient {
    fn complete(&self, prompt: &str) -> Result<String> {
        let mut request = self.agent.post(&self.endpoint()).set("Accept", "application/json");
        if let Some(api_key) = &self.config.api_key {
            request = request.set("Authorization", &format!("Bearer {api_key}"));
        }

        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
        };
        let response = match request.send_json(&body) {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                bail!("text generation endpoint returned HTTP {code}: {}", detail.trim());
            }
            Err(err) => bail!("text generation request failed: {err}"),
        };

        let parsed: ChatCompletionResponse =
            response.into_json().context("failed to decode text generation response")?;
        first_choice_content(parsed)
    }
}

fn first_choice_content(response: ChatCompletionResponse) -> Result<String> {
    if let Some(error) = response.error {
        bail!("text generation endpoint reported an error: {}", error.message);
    }
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| anyhow!("text generation response contained no message content"))
}

/// Embed the dataset summary and the user's question in the generation prompt.
#[must_use]
pub fn build_prompt(summary: &str, question: &str) -> String {
    format!(
        "Given the following data from our solar dataset:\n{summary}\n\n\
         The user asked: \"{question}\"\n\n\
         Please respond with a clear, helpful solar system recommendation."
    )
}

/// Remove every `*` so markdown emphasis does not leak into plain-text replies.
#[must_use]
pub fn strip_emphasis(text: &str) -> String {
    text.replace('*', "")
}

#[derive(Debug, Clone)]
pub struct SolarAdvisorApi {
    store: Arc<RecordStore>,
    info: Arc<DatasetInfo>,
    generator: Arc<dyn TextGenerator>,
}

impl SolarAdvisorApi {
    #[must_use]
    pub fn new(dataset: CsvDataset, generator: Arc<dyn TextGenerator>) -> Self {
        let (store, info) = dataset.into_parts();
        Self { store: Arc::new(store), info: Arc::new(info), generator }
    }

    /// Load the dataset at `dataset_path` and build an API over it.
    ///
    /// # Errors
    /// Returns an error when the dataset cannot be loaded or validated.
    pub fn open(dataset_path: &Path, generator: Arc<dyn TextGenerator>) -> Result<Self> {
        let dataset = CsvDataset::load(dataset_path)?;
        Ok(Self::new(dataset, generator))
    }

    #[must_use]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    #[must_use]
    pub fn dataset_info(&self) -> &DatasetInfo {
        &self.info
    }

    /// Extract constraints, filter the dataset and render the summary without text generation.
    #[must_use]
    pub fn summarize(&self, request: &AskRequest) -> Advice {
        advise(&request.question, &self.store)
    }

    /// Answer a question through the text-generation collaborator.
    ///
    /// # Errors
    /// Returns an error when the text-generation call fails.
    pub fn ask(&self, request: &AskRequest) -> Result<AskResponse> {
        let advice = self.summarize(request);
        let prompt = build_prompt(&advice.summary, &request.question);
        let generated = self.generator.complete(&prompt).context("text generation failed")?;
        tracing::info!(
            matched_records = advice.matched_records,
            response_chars = generated.chars().count(),
            "generated solar recommendation"
        );
        Ok(AskResponse { response: strip_emphasis(&generated) })
    }
}
