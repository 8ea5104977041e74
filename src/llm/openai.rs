// src/llm/openai.rs

use super::{Attachment, ExtractionOracle, OracleRequest, http_client, send_json};
use crate::config::EndpointConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const SYSTEM_PROMPT: &str = "You are an invoice and contract data extraction assistant. \
Return ONLY valid JSON, no markdown fences, no commentary.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Any OpenAI-compatible `/chat/completions` endpoint with vision support,
/// hosted or a local Ollama. Image input only.
pub struct OpenAiOracle {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    timeout_secs: u64,
}

impl OpenAiOracle {
    pub fn new(
        endpoint: &EndpointConfig,
        api_key: String,
        max_tokens: u32,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            model: endpoint.model.clone(),
            api_key,
            max_tokens,
            timeout_secs,
        })
    }

    fn body<'a>(&'a self, request: &OracleRequest<'a>) -> Result<ChatRequest<'a>> {
        let mut content = vec![ContentPart::Text {
            text: request.prompt,
        }];
        for attachment in request.attachments {
            match *attachment {
                Attachment::Image { mime_type, base64 } => content.push(ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:{mime_type};base64,{base64}"),
                    },
                }),
                Attachment::PdfBase64(_) | Attachment::DocumentUrl(_) => {
                    return Err(PipelineError::OracleUnsupported {
                        provider: "openai",
                        mode: attachment.mode(),
                    });
                }
            }
        }

        Ok(ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: vec![ContentPart::Text {
                        text: SYSTEM_PROMPT,
                    }],
                },
                ChatMessage {
                    role: "user",
                    content,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: 0.0,
        })
    }
}

#[async_trait]
impl ExtractionOracle for OpenAiOracle {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, request: OracleRequest<'_>) -> Result<String> {
        let body = self.body(&request)?;
        let http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);
        let response: ChatResponse = send_json(self.name(), http, self.timeout_secs).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PipelineError::Oracle("openai: empty response from LLM".to_string()))
    }
}
