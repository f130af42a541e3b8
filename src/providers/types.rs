use serde::{Deserialize, Serialize};

/// Kind of inference a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Chat,
    Embed,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Embed => "embed",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic hint used by the model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    #[default]
    Chat,
    Reasoning,
    Embed,
}

/// Caller-declared classification of a request. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    #[default]
    Public,
    Internal,
    Restricted,
}

/// Subscription tier reported by the credit ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    #[default]
    Basic,
    Premium,
    Unlimited,
}

impl SubscriptionTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Premium => "premium",
            Self::Unlimited => "unlimited",
        }
    }

    /// Parse a tier name, treating anything unrecognised as `Basic`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "premium" => Self::Premium,
            "unlimited" => Self::Unlimited,
            _ => Self::Basic,
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Canonical envelope for one inference call.
///
/// `model` is left empty by callers and filled in by the model selector
/// right before dispatch. `user_id` is resolved to a concrete subject by the
/// gateway before the credit gate runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmRequest {
    pub task: TaskType,
    pub role: ModelRole,
    pub messages: Vec<ChatMessage>,
    pub system: Option<String>,
    /// Single-turn prompt (chat) or the text to embed (embed). Used only when
    /// `messages` is empty.
    pub input: Option<String>,
    pub tools: bool,
    pub json_mode: bool,
    pub tenant_id: Option<String>,
    pub sensitivity: Sensitivity,
    pub budget_cents: Option<u64>,
    pub latency_target_ms: Option<u64>,
    pub user_id: Option<String>,
    pub org_id: Option<String>,
    pub model: Option<String>,
    pub request_id: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl LlmRequest {
    /// A chat request over an explicit message list.
    pub fn chat(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// A single-turn chat request.
    pub fn prompt(input: impl Into<String>) -> Self {
        Self {
            input: Some(input.into()),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn with_budget_cents(mut self, budget_cents: u64) -> Self {
        self.budget_cents = Some(budget_cents);
        self
    }

    pub fn with_role(mut self, role: ModelRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Total characters of everything sent as prompt, for token estimation.
    pub fn prompt_chars(&self) -> usize {
        let chars = |s: &str| s.chars().count();
        let system = self.system.as_deref().map_or(0, chars);
        if self.messages.is_empty() {
            system + self.input.as_deref().map_or(0, chars)
        } else {
            let system_in_messages = self
                .messages
                .first()
                .is_some_and(|m| m.role == MessageRole::System);
            let messages: usize = self.messages.iter().map(|m| chars(&m.content)).sum();
            if system_in_messages {
                messages
            } else {
                messages + system
            }
        }
    }
}

/// Embedding request as accepted by the gateway facade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbedRequest {
    pub text: String,
    pub model: Option<String>,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub org_id: Option<String>,
    pub request_id: Option<String>,
}

impl EmbedRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

impl From<EmbedRequest> for LlmRequest {
    fn from(req: EmbedRequest) -> Self {
        Self {
            task: TaskType::Embed,
            role: ModelRole::Embed,
            input: Some(req.text),
            tenant_id: req.tenant_id,
            user_id: req.user_id,
            org_id: req.org_id,
            model: req.model,
            request_id: req.request_id,
            ..Self::default()
        }
    }
}

/// Prompt/completion token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u32,
    pub completion: u32,
}

impl TokenUsage {
    pub fn new(prompt: u32, completion: u32) -> Self {
        Self { prompt, completion }
    }

    pub fn total(&self) -> u32 {
        self.prompt.saturating_add(self.completion)
    }
}

/// What an adapter produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Output {
    Text(String),
    Embedding(Vec<f32>),
}

impl Output {
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s),
            Self::Embedding(_) => None,
        }
    }

    pub fn into_embedding(self) -> Option<Vec<f32>> {
        match self {
            Self::Embedding(v) => Some(v),
            Self::Text(_) => None,
        }
    }
}

/// Adapter output for one completed call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmResponse {
    pub output: Output,
    pub tokens: TokenUsage,
    pub cost_cents: u64,
    pub model: String,
    pub provider: String,
    pub latency_ms: u64,
}

/// One incremental piece of a streamed completion, as produced by an
/// adapter. `usage` is only present when the provider reports it on the
/// stream (normally on the final event).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// One content fragment handed to a streaming caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamFragment {
    pub content: String,
}
