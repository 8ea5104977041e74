//! Structured extraction through a multimodal LLM.
//!
//! The model is treated as an oracle: it gets a prompt plus page images or a whole
//! document and answers with free text that should contain one JSON object. A reply
//! without a parseable object is `Ok(None)`, never an error. Transport failures and
//! HTTP errors are `Err`.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod prompts;

use crate::config::{LlmBackend, LlmSection, require_env};
use crate::convert::EncodedImage;
use crate::error::{PipelineError, Result};
use crate::records::{
    ContractComparison, DocumentClassification, ExtractedContractRecord, ExtractedInvoiceRecord,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Something the model is asked to look at alongside the prompt.
#[derive(Debug, Clone, Copy)]
pub enum Attachment<'a> {
    Image { mime_type: &'a str, base64: &'a str },
    PdfBase64(&'a str),
    /// A remote document the provider fetches itself.
    DocumentUrl(&'a str),
}

impl<'a> Attachment<'a> {
    pub fn image(image: &'a EncodedImage) -> Self {
        Attachment::Image {
            mime_type: image.mime_type(),
            base64: &image.base64,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Attachment::Image { .. } => "image input",
            Attachment::PdfBase64(_) => "inline PDF documents",
            Attachment::DocumentUrl(_) => "document URLs",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OracleRequest<'a> {
    pub prompt: &'a str,
    pub attachments: &'a [Attachment<'a>],
    /// Response schema for providers with structured output; others ignore it.
    pub schema: Option<&'a Value>,
}

/// One multimodal completion: prompt and attachments in, reply text out.
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, request: OracleRequest<'_>) -> Result<String>;
}

/// The outermost `{ ... }` span of `reply`: first `{` to last `}`.
pub fn extract_json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

/// Parse the JSON object embedded in a free-text reply, or `None`.
pub fn parse_reply<T: DeserializeOwned>(reply: &str) -> Option<T> {
    let Some(json) = extract_json_object(reply) else {
        warn!(reply_len = reply.len(), "Could not extract JSON from response");
        return None;
    };
    match serde_json::from_str(json) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Failed to parse JSON from response");
            None
        }
    }
}

/// Typed extraction operations on top of an [`ExtractionOracle`].
pub struct ExtractionClient {
    oracle: Box<dyn ExtractionOracle>,
}

impl ExtractionClient {
    pub fn new(oracle: Box<dyn ExtractionOracle>) -> Self {
        Self { oracle }
    }

    pub fn provider(&self) -> &'static str {
        self.oracle.name()
    }

    async fn ask<T: DeserializeOwned>(&self, request: OracleRequest<'_>) -> Result<Option<T>> {
        let reply = self.oracle.complete(request).await?;
        debug!(provider = self.oracle.name(), reply = %reply, "Oracle reply");
        Ok(parse_reply(&reply))
    }

    pub async fn extract_invoice_from_image(
        &self,
        image: &EncodedImage,
    ) -> Result<Option<ExtractedInvoiceRecord>> {
        self.ask(OracleRequest {
            prompt: prompts::INVOICE_PROMPT,
            attachments: &[Attachment::image(image)],
            schema: None,
        })
        .await
    }

    /// Document-native mode: the provider downloads `uri` itself.
    pub async fn extract_invoice_from_uri(&self, uri: &str) -> Result<Option<ExtractedInvoiceRecord>> {
        self.ask(OracleRequest {
            prompt: prompts::INVOICE_PROMPT,
            attachments: &[Attachment::DocumentUrl(uri)],
            schema: None,
        })
        .await
    }

    pub async fn extract_invoice_from_pdf(
        &self,
        pdf_base64: &str,
    ) -> Result<Option<ExtractedInvoiceRecord>> {
        self.ask(OracleRequest {
            prompt: prompts::INVOICE_PROMPT,
            attachments: &[Attachment::PdfBase64(pdf_base64)],
            schema: None,
        })
        .await
    }

    pub async fn extract_contract_from_pdf(
        &self,
        pdf_base64: &str,
    ) -> Result<Option<ExtractedContractRecord>> {
        let schema = prompts::contract_schema();
        self.ask(OracleRequest {
            prompt: prompts::CONTRACT_PROMPT,
            attachments: &[Attachment::PdfBase64(pdf_base64)],
            schema: Some(&schema),
        })
        .await
    }

    /// Whole contract as page images in one request, for providers without PDF input.
    pub async fn extract_contract_from_images(
        &self,
        pages: &[EncodedImage],
    ) -> Result<Option<ExtractedContractRecord>> {
        let schema = prompts::contract_schema();
        let attachments: Vec<Attachment<'_>> = pages.iter().map(Attachment::image).collect();
        self.ask(OracleRequest {
            prompt: prompts::CONTRACT_PROMPT,
            attachments: &attachments,
            schema: Some(&schema),
        })
        .await
    }

    /// Fuzzy comparison of an extracted contract with the project's expected record.
    pub async fn compare_contract(
        &self,
        extracted: &ExtractedContractRecord,
        expected: &ExtractedContractRecord,
        tolerance_sar: f64,
        usd_to_sar: f64,
    ) -> Result<Option<ContractComparison>> {
        let prompt = prompts::comparison_prompt(
            &serde_json::to_value(extracted)?,
            &serde_json::to_value(expected)?,
            tolerance_sar,
            usd_to_sar,
        );
        let schema = prompts::comparison_schema();
        self.ask(OracleRequest {
            prompt: &prompt,
            attachments: &[],
            schema: Some(&schema),
        })
        .await
    }

    pub async fn classify_document(
        &self,
        image: &EncodedImage,
    ) -> Result<Option<DocumentClassification>> {
        self.ask(OracleRequest {
            prompt: prompts::CLASSIFY_PROMPT,
            attachments: &[Attachment::image(image)],
            schema: None,
        })
        .await
    }
}

/// Build the oracle selected in `[llm]`, reading its key from the environment.
pub fn build_oracle(llm: &LlmSection) -> Result<Box<dyn ExtractionOracle>> {
    let timeout = llm.request_timeout_secs;
    match llm.backend {
        LlmBackend::Anthropic => {
            let key = require_env(&["ANTHROPIC_API_KEY"])?;
            info!(url = %llm.anthropic.base_url, model = %llm.anthropic.model, "Using Anthropic backend");
            Ok(Box::new(anthropic::AnthropicOracle::new(
                &llm.anthropic,
                key,
                llm.max_tokens,
                timeout,
            )?))
        }
        LlmBackend::Gemini => {
            let key = require_env(&["GEMINI_API_KEY", "GEMENI_API_KEY"])?;
            info!(url = %llm.gemini.base_url, model = %llm.gemini.model, "Using Gemini backend");
            Ok(Box::new(gemini::GeminiOracle::new(
                &llm.gemini,
                key,
                llm.max_tokens,
                timeout,
            )?))
        }
        LlmBackend::Openai => {
            // Local servers accept any key.
            let key = std::env::var("LLM_API_KEY").unwrap_or_else(|_| "ollama".to_string());
            info!(url = %llm.openai.base_url, model = %llm.openai.model, "Using OpenAI-compatible backend");
            Ok(Box::new(openai::OpenAiOracle::new(
                &llm.openai,
                key,
                llm.max_tokens,
                timeout,
            )?))
        }
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::Config(format!("http client: {e}")))
}

/// Send a prepared request and decode the JSON body, mapping failures to oracle errors.
pub(crate) async fn send_json<R: DeserializeOwned>(
    provider: &'static str,
    request: RequestBuilder,
    timeout_secs: u64,
) -> Result<R> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::Timeout {
                what: format!("{provider} request"),
                secs: timeout_secs,
            }
        } else {
            PipelineError::Oracle(format!("{provider}: {e}"))
        }
    })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| PipelineError::Oracle(format!("{provider}: {e}")))?;
    if !status.is_success() {
        return Err(PipelineError::Oracle(format!("{provider} API error {status}: {body}")));
    }

    serde_json::from_str(&body)
        .map_err(|e| PipelineError::Oracle(format!("{provider}: unexpected response body: {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays canned replies in order and records every prompt it was sent.
    pub(crate) struct ScriptedOracle {
        replies: Mutex<VecDeque<Result<String>>>,
        /// Prompt text and attachment count of every request.
        pub(crate) seen: Arc<Mutex<Vec<(String, usize)>>>,
    }

    impl ScriptedOracle {
        pub(crate) fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub(crate) fn replying(replies: &[&str]) -> Self {
            Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
        }
    }

    #[async_trait]
    impl ExtractionOracle for ScriptedOracle {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, request: OracleRequest<'_>) -> Result<String> {
            self.seen
                .lock()
                .unwrap()
                .push((request.prompt.to_string(), request.attachments.len()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(PipelineError::Oracle("script exhausted".into())))
        }
    }

    fn page() -> EncodedImage {
        EncodedImage {
            base64: "AAAA".into(),
            byte_len: 3,
            width: 1,
            height: 1,
            quality: 95,
            attempts: 1,
        }
    }

    #[test]
    fn json_object_span() {
        assert_eq!(extract_json_object(r#"Sure! {"a": {"b": 1}} done"#), Some(r#"{"a": {"b": 1}}"#));
        assert_eq!(extract_json_object("```json\n{}\n```"), Some("{}"));
        assert_eq!(extract_json_object("no braces here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
        assert_eq!(extract_json_object("{ unterminated"), None);
    }

    #[test]
    fn unparseable_reply_is_none() {
        assert!(parse_reply::<Value>("{ not json }").is_none());
        assert!(parse_reply::<ContractComparison>(r#"{"reason": "x"}"#).is_none());
        let v: Value = parse_reply("<think>hmm</think> {\"ok\": true}").unwrap();
        assert_eq!(v["ok"], true);
    }

    #[tokio::test]
    async fn invoice_extraction_tolerates_prose() {
        let client = ExtractionClient::new(Box::new(ScriptedOracle::replying(&[
            r#"Here is the data: {"invoice_number": "INV-7", "vat_amount": "0"} Hope it helps."#,
            "I could not read this page.",
        ])));

        let first = client.extract_invoice_from_image(&page()).await.unwrap().unwrap();
        assert_eq!(first.invoice_number.value().unwrap(), "INV-7");

        let second = client.extract_invoice_from_image(&page()).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let client = ExtractionClient::new(Box::new(ScriptedOracle::new(vec![Err(
            PipelineError::Oracle("connection reset".into()),
        )])));
        let err = client.extract_invoice_from_uri("https://x/doc.pdf").await.unwrap_err();
        assert!(matches!(err, PipelineError::Oracle(_)));
    }

    #[tokio::test]
    async fn comparison_and_classification() {
        let oracle = ScriptedOracle::replying(&[
            r#"{"is_matching": false, "reason": "amount differs by 5000 SAR"}"#,
            r#"{"is_invoice": true, "is_contract_information": false}"#,
        ]);
        let client = ExtractionClient::new(Box::new(oracle));

        let cmp = client
            .compare_contract(
                &ExtractedContractRecord::default(),
                &ExtractedContractRecord::default(),
                1000.0,
                3.75,
            )
            .await
            .unwrap()
            .unwrap();
        assert!(!cmp.is_matching);
        assert!(cmp.reason.contains("5000"));

        let class = client.classify_document(&page()).await.unwrap().unwrap();
        assert!(class.is_invoice && !class.is_contract_information);
    }

    #[tokio::test]
    async fn contract_pages_go_in_one_request() {
        let oracle = ScriptedOracle::replying(&[r#"{"currency": "SAR"}"#]);
        let seen = oracle.seen.clone();
        let client = ExtractionClient::new(Box::new(oracle));
        let pages = vec![page(), page(), page()];
        let rec = client.extract_contract_from_images(&pages).await.unwrap().unwrap();
        assert_eq!(rec.currency.value().unwrap(), "SAR");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (prompts::CONTRACT_PROMPT.to_string(), 3));
    }
}
