// src/llm/gemini.rs

use super::{Attachment, ExtractionOracle, OracleRequest, http_client, send_json};
use crate::config::EndpointConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    Inline {
        inline_data: InlineData<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    max_output_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<&'a Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// Gemini `generateContent`. Images and PDFs go inline; structured output when
/// the request carries a schema.
pub struct GeminiOracle {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    timeout_secs: u64,
}

impl GeminiOracle {
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

    fn body<'a>(&self, request: &OracleRequest<'a>) -> Result<GenerateRequest<'a>> {
        let mut parts = Vec::with_capacity(request.attachments.len() + 1);
        for attachment in request.attachments {
            let inline = match *attachment {
                Attachment::Image { mime_type, base64 } => InlineData {
                    mime_type,
                    data: base64,
                },
                Attachment::PdfBase64(data) => InlineData {
                    mime_type: "application/pdf",
                    data,
                },
                Attachment::DocumentUrl(_) => {
                    return Err(PipelineError::OracleUnsupported {
                        provider: "gemini",
                        mode: attachment.mode(),
                    });
                }
            };
            parts.push(Part::Inline {
                inline_data: inline,
            });
        }
        parts.push(Part::Text {
            text: request.prompt,
        });

        Ok(GenerateRequest {
            contents: vec![Content { role: "user", parts }],
            generation_config: GenerationConfig {
                max_output_tokens: self.max_tokens,
                temperature: 0.0,
                response_mime_type: request.schema.map(|_| "application/json"),
                response_schema: request.schema,
            },
        })
    }
}

#[async_trait]
impl ExtractionOracle for GeminiOracle {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, request: OracleRequest<'_>) -> Result<String> {
        let body = self.body(&request)?;
        let http = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        let response: GenerateResponse = send_json(self.name(), http, self.timeout_secs).await?;

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(PipelineError::Oracle("gemini: no candidates in response".to_string()));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    fn oracle() -> GeminiOracle {
        GeminiOracle::new(&Config::default().llm.gemini, "k".into(), 2000, 60).unwrap()
    }

    #[test]
    fn pdf_and_schema_are_sent_inline() {
        let schema = json!({ "type": "OBJECT" });
        let attachments = [Attachment::PdfBase64("JVBER")];
        let body = oracle()
            .body(&OracleRequest {
                prompt: "extract",
                attachments: &attachments,
                schema: Some(&schema),
            })
            .unwrap();

        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(
            v["contents"][0]["parts"][0],
            json!({ "inlineData": { "mimeType": "application/pdf", "data": "JVBER" } })
        );
        assert_eq!(v["contents"][0]["parts"][1], json!({ "text": "extract" }));
        assert_eq!(v["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(v["generationConfig"]["responseSchema"], schema);
    }

    #[test]
    fn plain_prompt_has_no_structured_output() {
        let body = oracle()
            .body(&OracleRequest {
                prompt: "hi",
                attachments: &[],
                schema: None,
            })
            .unwrap();
        let v = serde_json::to_value(&body).unwrap();
        assert!(v["generationConfig"].get("responseMimeType").is_none());
        assert_eq!(v["generationConfig"]["maxOutputTokens"], 2000);
    }

    #[test]
    fn document_urls_are_unsupported() {
        let attachments = [Attachment::DocumentUrl("https://x/doc.pdf")];
        let err = oracle()
            .body(&OracleRequest {
                prompt: "extract",
                attachments: &attachments,
                schema: None,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::OracleUnsupported { provider: "gemini", .. }
        ));
    }
}
