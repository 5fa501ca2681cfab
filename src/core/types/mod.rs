use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::error::RegistryError;

/// Text returned when a backend answered successfully but without any
/// completion text in the expected place.
pub const NO_RESPONSE_SENTINEL: &str = "No response generated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderId {
    pub const ALL: [ProviderId; 4] = [
        ProviderId::Ollama,
        ProviderId::OpenAi,
        ProviderId::Anthropic,
        ProviderId::Gemini,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }

    pub fn is_local(self) -> bool {
        matches!(self, Self::Ollama)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = RegistryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" | "local" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            _ => Err(RegistryError::UnknownProvider {
                provider: value.to_string(),
            }),
        }
    }
}

/// Static description plus mutable state of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: ProviderId,
    pub display_name: String,
    pub is_local: bool,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(default)]
    pub available_models: Vec<String>,
    #[serde(default)]
    pub selected_model: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub is_detecting: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_detection_attempt_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ProviderConfig {
    pub fn new(id: ProviderId, display_name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            is_local: id.is_local(),
            base_url: base_url.into(),
            credential: None,
            available_models: Vec::new(),
            selected_model: String::new(),
            enabled: false,
            is_detecting: false,
            last_detection_attempt_at_ms: None,
            last_error: None,
        }
    }

    pub fn with_models(mut self, models: &[&str], selected: &str) -> Self {
        self.available_models = models.iter().map(|model| model.to_string()).collect();
        self.selected_model = selected.to_string();
        self
    }

    pub fn has_credential(&self) -> bool {
        self.credential
            .as_deref()
            .is_some_and(|credential| !credential.trim().is_empty())
    }

    pub fn is_usable(&self) -> bool {
        self.enabled && !self.selected_model.is_empty() && (self.is_local || self.has_credential())
    }
}

/// Partial update merged into a [`ProviderConfig`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// An empty string clears the stored credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2_000,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub options: CompletionOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub text: String,
    pub provider: ProviderId,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    #[serde(alias = "assistant")]
    Agent,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    #[serde(default)]
    pub role: TurnRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp_ms: None,
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Agent,
            content: content.into(),
            timestamp_ms: None,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.role != TurnRole::Unknown && !self.content.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl AgentSettings {
    pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);
    pub const MAX_TOKENS_RANGE: (u32, u32) = (500, 8_000);

    pub fn completion_options(&self) -> CompletionOptions {
        let temperature = if self.temperature.is_finite() {
            self.temperature
                .clamp(Self::TEMPERATURE_RANGE.0, Self::TEMPERATURE_RANGE.1)
        } else {
            Self::default().temperature
        };

        CompletionOptions {
            temperature,
            max_tokens: self
                .max_tokens
                .clamp(Self::MAX_TOKENS_RANGE.0, Self::MAX_TOKENS_RANGE.1),
            stream: false,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentPersona {
    pub system_prompt: String,
    pub capabilities: Vec<String>,
    pub settings: AgentSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Primary,
    #[default]
    Specialized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlueprintSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub internet_access: bool,
    pub knowledge_base: bool,
    pub memory_enabled: bool,
}

impl Default for BlueprintSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2_000,
            internet_access: false,
            knowledge_base: true,
            memory_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubAgentSuggestion {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
}

/// Agent configuration produced by the blueprint generator. Field names follow
/// the camelCase JSON the generation prompt asks the model for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentBlueprint {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub capabilities: Vec<String>,
    pub system_prompt: String,
    pub tools: Vec<String>,
    pub settings: BlueprintSettings,
    pub suggested_sub_agents: Vec<SubAgentSuggestion>,
}

impl AgentBlueprint {
    pub fn fallback(description: &str) -> Self {
        Self {
            name: "Custom Agent".to_string(),
            description: description.to_string(),
            agent_type: AgentType::Specialized,
            capabilities: vec!["General Assistance".to_string()],
            system_prompt: format!("You are a helpful AI assistant. {description}"),
            tools: Vec::new(),
            settings: BlueprintSettings::default(),
            suggested_sub_agents: Vec::new(),
        }
    }

    pub fn persona(&self) -> AgentPersona {
        AgentPersona {
            system_prompt: self.system_prompt.clone(),
            capabilities: self.capabilities.clone(),
            settings: AgentSettings {
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Checking,
    Connected {
        provider: ProviderId,
        model: String,
    },
    Disconnected {
        provider: Option<ProviderId>,
        reason: String,
    },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTestReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<ProviderId>,
    pub providers: Vec<ProviderConfig>,
}

/// Per-call context handed to adapters and the HTTP transport.
///
/// `metadata` carries transport directives (auth, extra headers, query
/// parameters); `cancellation` lets the caller abandon an in-flight call.
#[derive(Debug, Clone, Default)]
pub struct AdapterContext {
    pub metadata: BTreeMap<String, String>,
    pub cancellation: CancellationToken,
}

impl AdapterContext {
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            metadata: BTreeMap::new(),
            cancellation,
        }
    }
}
