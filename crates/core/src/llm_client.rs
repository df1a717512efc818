use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionTool, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;

/// Represents a tool call requested by the LLM.
pub type ToolCall = async_openai::types::ChatCompletionMessageToolCall;

/// Represents the two possible outcomes of a single LLM turn.
#[derive(Debug, Clone)]
pub enum LLMAction {
    /// The LLM decided to respond directly with text.
    TextResponse(String),
    /// The LLM decided to call one or more tools.
    ToolCall(Vec<ToolCall>),
}

/// Token accounting reported by the provider for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub action: LLMAction,
    pub usage: TokenUsage,
}

/// A generic client for interacting with an LLM.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Model identifier reported in metrics.
    fn model(&self) -> &str;

    /// Makes a single, non-streaming call to the LLM to decide on the next action.
    ///
    /// `tools` may be empty, in which case the model can only answer with text.
    async fn decide_action(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMResponse>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The specific model identifier to use for chat completions (e.g., "gpt-4.1").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }

    /// Completions are stored provider-side. `tool_choice` is only sent with tools.
    fn build_request(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<CreateChatCompletionRequest> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(messages).store(true);
        if !tools.is_empty() {
            args.tools(tools).tool_choice("auto");
        }
        Ok(args.build()?)
    }
}

/// Splits a completion into the action the model chose and its token usage.
pub fn action_from_response(response: CreateChatCompletionResponse) -> Result<LLMResponse> {
    let usage = response
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();
    let choice = response
        .choices
        .into_iter()
        .next()
        .context("No response choice from LLM")?;

    let action = match (choice.message.tool_calls, choice.message.content) {
        (Some(tool_calls), _) if !tool_calls.is_empty() => LLMAction::ToolCall(tool_calls),
        (_, Some(content)) => LLMAction::TextResponse(content),
        _ => {
            return Err(anyhow!(
                "LLM response had neither text content nor tool calls."
            ));
        }
    };
    Ok(LLMResponse { action, usage })
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn decide_action(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMResponse> {
        let request = self.build_request(messages, tools)?;
        let response: CreateChatCompletionResponse = self.client.chat().create(request).await?;
        action_from_response(response)
    }
}
