// src/llm/anthropic.rs

use super::{Attachment, ExtractionOracle, OracleRequest, http_client, send_json};
use crate::config::EndpointConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Text { text: &'a str },
    Image { source: Source<'a> },
    Document { source: Source<'a> },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Source<'a> {
    Base64 { media_type: &'a str, data: &'a str },
    Url { url: &'a str },
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Messages API. Accepts images, inline PDFs and document URLs.
pub struct AnthropicOracle {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    timeout_secs: u64,
}

impl AnthropicOracle {
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
}

fn content_blocks<'a>(request: &OracleRequest<'a>) -> Vec<ContentBlock<'a>> {
    let mut blocks: Vec<ContentBlock<'a>> = request
        .attachments
        .iter()
        .map(|a| match *a {
            Attachment::Image { mime_type, base64 } => ContentBlock::Image {
                source: Source::Base64 {
                    media_type: mime_type,
                    data: base64,
                },
            },
            Attachment::PdfBase64(data) => ContentBlock::Document {
                source: Source::Base64 {
                    media_type: "application/pdf",
                    data,
                },
            },
            Attachment::DocumentUrl(url) => ContentBlock::Document {
                source: Source::Url { url },
            },
        })
        .collect();
    blocks.push(ContentBlock::Text {
        text: request.prompt,
    });
    blocks
}

fn reply_text(response: MessagesResponse) -> String {
    response
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect()
}

#[async_trait]
impl ExtractionOracle for AnthropicOracle {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, request: OracleRequest<'_>) -> Result<String> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: content_blocks(&request),
            }],
        };

        let http = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body);
        let response: MessagesResponse = send_json(self.name(), http, self.timeout_secs).await?;

        let text = reply_text(response);
        if text.trim().is_empty() {
            return Err(PipelineError::Oracle("anthropic: empty response".to_string()));
        }
        Ok(text)
    }
}
