// src/contract.rs

use crate::convert::{Converted, FileConverter};
use crate::error::{PipelineError, Result};
use crate::llm::ExtractionClient;
use crate::records::{
    ExtractedContractRecord, Field, ProjectRecord, VerdictPayload, VerificationVerdict,
};
use crate::sniff::{self, FileKind};
use crate::validate::contract::ContractValidator;
use base64::Engine;
use tracing::{info, warn};

/// Whole-document contract extraction and the three-step verdict.
pub struct ContractProcessor<'a> {
    client: &'a ExtractionClient,
    converter: &'a FileConverter,
    validator: ContractValidator,
}

impl<'a> ContractProcessor<'a> {
    pub fn new(
        client: &'a ExtractionClient,
        converter: &'a FileConverter,
        validator: ContractValidator,
    ) -> Self {
        Self {
            client,
            converter,
            validator,
        }
    }

    /// One extraction for the whole document.
    ///
    /// PDFs go to the provider as documents; providers without PDF input get the
    /// rendered pages in a single request instead. `Ok(None)` means the oracle
    /// answered without a usable record.
    pub async fn extract_contract(&self, bytes: &[u8]) -> Result<Option<ExtractedContractRecord>> {
        match sniff::detect(bytes) {
            FileKind::Pdf => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                match self.client.extract_contract_from_pdf(&encoded).await {
                    Err(PipelineError::OracleUnsupported { provider, mode }) => {
                        info!(provider, mode, "Falling back to page images");
                        self.extract_from_pages(bytes).await
                    }
                    other => other,
                }
            }
            FileKind::Image => self.extract_from_pages(bytes).await,
            FileKind::Unknown => Err(PipelineError::UnsupportedFile(
                "contract is neither a PDF nor an image".to_string(),
            )),
        }
    }

    async fn extract_from_pages(&self, bytes: &[u8]) -> Result<Option<ExtractedContractRecord>> {
        let pages = match self.converter.convert(bytes)? {
            Converted::Pages(pages) => pages,
            Converted::Unsupported => {
                return Err(PipelineError::UnsupportedFile("unknown file type".to_string()));
            }
        };
        if pages.is_empty() {
            return Err(PipelineError::Render("no contract page could be converted".to_string()));
        }
        self.client.extract_contract_from_images(&pages).await
    }

    /// Completeness, then the SAR amount check, then the oracle comparison.
    ///
    /// A failed check is an invalid verdict with that check's reason. Only a
    /// comparison the oracle could not answer is an error.
    pub async fn validate_contract(
        &self,
        extracted: ExtractedContractRecord,
        project: &ProjectRecord,
    ) -> Result<VerificationVerdict> {
        let missing = self.validator.missing_fields(&extracted);
        if !missing.is_empty() {
            for field in &missing {
                warn!(project_id = %project.id, field, "Contract field missing");
            }
            return Ok(invalid(
                format!("Invalid contract data: missing {}", missing.join(", ")),
                extracted,
            ));
        }

        let Some(expected_amount) = project.contract_value_sar else {
            return Ok(invalid(
                "Project has no contract value to compare against".to_string(),
                extracted,
            ));
        };
        if !self.validator.is_amount_matching(&extracted, expected_amount) {
            let found = self
                .validator
                .amount_in_sar(&extracted)
                .map(|a| format!("{a:.2} SAR"))
                .unwrap_or_else(|| {
                    format!(
                        "unreadable amount '{}' in {}",
                        extracted.contract_total_amount.raw().unwrap_or(""),
                        extracted.currency.raw().unwrap_or("")
                    )
                });
            return Ok(invalid(
                format!(
                    "Contract amount {found} does not match project value {expected_amount:.2} SAR (tolerance {} SAR)",
                    self.validator.tolerance_sar
                ),
                extracted,
            ));
        }

        let expected = expected_contract(project);
        let comparison = self
            .client
            .compare_contract(
                &extracted,
                &expected,
                self.validator.tolerance_sar,
                self.validator.usd_to_sar,
            )
            .await?
            .ok_or_else(|| {
                PipelineError::Oracle("contract comparison returned no verdict".to_string())
            })?;

        info!(
            project_id = %project.id,
            is_matching = comparison.is_matching,
            reason = %comparison.reason,
            "Contract comparison"
        );
        let reason = match (comparison.is_matching, comparison.reason.trim().is_empty()) {
            (true, true) => "Contract matches project record".to_string(),
            (false, true) => "Contract does not match project record".to_string(),
            _ => comparison.reason,
        };
        Ok(VerificationVerdict {
            is_valid: comparison.is_matching,
            reason,
            data: Some(VerdictPayload::Contract(extracted)),
        })
    }
}

/// The project row seen as a contract record, amounts always in SAR.
pub fn expected_contract(project: &ProjectRecord) -> ExtractedContractRecord {
    let text = |v: &Option<String>| v.as_deref().map(Field::text).unwrap_or_default();
    ExtractedContractRecord {
        contracted_company: text(&project.contracted_company),
        contracting_company: text(&project.contracting_company),
        contract_date: text(&project.contract_date),
        contract_total_amount: project
            .contract_value_sar
            .map(|v| Field::text(v.to_string()))
            .unwrap_or_default(),
        currency: Field::text("SAR"),
    }
}

fn invalid(reason: String, extracted: ExtractedContractRecord) -> VerificationVerdict {
    VerificationVerdict {
        is_valid: false,
        reason,
        data: Some(VerdictPayload::Contract(extracted)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::convert::rasterize::tests::scanned_pdf;
    use crate::convert::{Compressor, ContrastEnhancer, EmbeddedImageRenderer};
    use crate::llm::tests::ScriptedOracle;
    use crate::llm::{Attachment, ExtractionOracle, OracleRequest, prompts};
    use async_trait::async_trait;

    pub(crate) const CONTRACT_REPLY: &str = r#"{
        "Contracted_Company": "Al Noor Contracting",
        "Contracting_Company": "Riyadh Development Co",
        "Contract_Date": "2024-03-01",
        "Contract_Total_Amount": "10,500 SAR",
        "Currency": "SAR"
    }"#;

    pub(crate) fn converter() -> FileConverter {
        FileConverter::new(
            Box::new(EmbeddedImageRenderer {
                max_pixels: 4_000_000,
                target_pixels: 3_000_000,
            }),
            Box::new(ContrastEnhancer::default()),
            Compressor::default(),
            4_000_000,
            3_000_000,
        )
    }

    pub(crate) fn project() -> ProjectRecord {
        ProjectRecord {
            id: "7".into(),
            file_uri: None,
            contract_value_sar: Some(10_000.0),
            contracting_company: Some("Riyadh Development Company".into()),
            contracted_company: Some("Al-Noor Contracting Est.".into()),
            contract_date: Some("2024-03-15".into()),
            total_amount_including_vat: None,
        }
    }

    /// Rejects inline PDFs like an image-only provider, then replays a script.
    struct ImageOnly(ScriptedOracle);

    #[async_trait]
    impl ExtractionOracle for ImageOnly {
        fn name(&self) -> &'static str {
            "image-only"
        }

        async fn complete(&self, request: OracleRequest<'_>) -> Result<String> {
            if let Some(a) = request
                .attachments
                .iter()
                .find(|a| matches!(a, Attachment::PdfBase64(_)))
            {
                return Err(PipelineError::OracleUnsupported {
                    provider: "image-only",
                    mode: a.mode(),
                });
            }
            self.0.complete(request).await
        }
    }

    #[test]
    fn expected_record_is_in_sar() {
        let expected = expected_contract(&project());
        assert_eq!(expected.currency, Field::text("SAR"));
        assert_eq!(expected.contract_total_amount, Field::text("10000"));
        assert_eq!(expected.contracted_company, Field::text("Al-Noor Contracting Est."));

        let empty = expected_contract(&ProjectRecord::default());
        assert!(empty.contract_date.is_absent());
        assert_eq!(ContractValidator::default().missing_fields(&empty).len(), 4);
    }

    #[tokio::test]
    async fn pdf_goes_as_one_document() {
        let oracle = ScriptedOracle::replying(&[CONTRACT_REPLY]);
        let seen = oracle.seen.clone();
        let client = ExtractionClient::new(Box::new(oracle));
        let conv = converter();
        let processor = ContractProcessor::new(&client, &conv, ContractValidator::default());

        let pdf = scanned_pdf(&[Some((40, 60)), Some((40, 60))]);
        let record = processor.extract_contract(&pdf).await.unwrap().unwrap();
        assert_eq!(record.contract_total_amount, Field::text("10,500 SAR"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(prompts::CONTRACT_PROMPT.to_string(), 1)]);
    }

    #[tokio::test]
    async fn image_only_provider_gets_rendered_pages() {
        let scripted = ScriptedOracle::replying(&[CONTRACT_REPLY]);
        let seen = scripted.seen.clone();
        let client = ExtractionClient::new(Box::new(ImageOnly(scripted)));
        let conv = converter();
        let processor = ContractProcessor::new(&client, &conv, ContractValidator::default());

        let pdf = scanned_pdf(&[Some((40, 60)), None, Some((80, 20))]);
        let record = processor.extract_contract(&pdf).await.unwrap();
        assert!(record.is_some());
        // the page without an image is skipped by the converter
        assert_eq!(seen.lock().unwrap()[0].1, 2);
    }

    #[tokio::test]
    async fn unknown_bytes_are_unsupported() {
        let client = ExtractionClient::new(Box::new(ScriptedOracle::replying(&[])));
        let conv = converter();
        let processor = ContractProcessor::new(&client, &conv, ContractValidator::default());
        let err = processor.extract_contract(b"PK\x03\x04 docx").await.unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFile(_)));
    }

    #[tokio::test]
    async fn all_three_checks_pass() {
        let client = ExtractionClient::new(Box::new(ScriptedOracle::replying(&[
            r#"{"is_matching": true, "reason": ""}"#,
        ])));
        let conv = converter();
        let processor = ContractProcessor::new(&client, &conv, ContractValidator::default());
        let extracted: ExtractedContractRecord = serde_json::from_str(CONTRACT_REPLY).unwrap();

        let verdict = processor.validate_contract(extracted, &project()).await.unwrap();
        assert!(verdict.is_valid);
        assert_eq!(verdict.reason, "Contract matches project record");
        assert!(matches!(verdict.data, Some(VerdictPayload::Contract(_))));
    }

    #[tokio::test]
    async fn first_failing_check_gives_the_reason() {
        let oracle = ScriptedOracle::replying(&[]);
        let seen = oracle.seen.clone();
        let client = ExtractionClient::new(Box::new(oracle));
        let conv = converter();
        let processor = ContractProcessor::new(&client, &conv, ContractValidator::default());

        let mut incomplete: ExtractedContractRecord = serde_json::from_str(CONTRACT_REPLY).unwrap();
        incomplete.contract_date = Field::text("N/A");
        let verdict = processor.validate_contract(incomplete, &project()).await.unwrap();
        assert!(!verdict.is_valid);
        assert_eq!(verdict.reason, "Invalid contract data: missing contract_date");

        let mut too_low: ExtractedContractRecord = serde_json::from_str(CONTRACT_REPLY).unwrap();
        too_low.contract_total_amount = Field::text("5,000");
        let verdict = processor.validate_contract(too_low, &project()).await.unwrap();
        assert!(!verdict.is_valid);
        assert!(verdict.reason.starts_with("Contract amount 5000.00 SAR does not match"));

        // neither check reached the oracle
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn oracle_mismatch_and_silence() {
        let client = ExtractionClient::new(Box::new(ScriptedOracle::replying(&[
            r#"{"is_matching": false, "reason": "Contracted company differs"}"#,
            "I cannot compare these.",
        ])));
        let conv = converter();
        let processor = ContractProcessor::new(&client, &conv, ContractValidator::default());
        let extracted: ExtractedContractRecord = serde_json::from_str(CONTRACT_REPLY).unwrap();

        let verdict = processor
            .validate_contract(extracted.clone(), &project())
            .await
            .unwrap();
        assert!(!verdict.is_valid);
        assert_eq!(verdict.reason, "Contracted company differs");

        let err = processor.validate_contract(extracted, &project()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Oracle(_)));
    }
}
