// src/invoice.rs

use crate::convert::EncodedImage;
use crate::error::Result;
use crate::llm::ExtractionClient;
use crate::records::ExtractedInvoiceRecord;
use crate::validate::invoice::{filter_complete, validate_zatca_compliance};
use crate::validate::parse_amount;
use base64::Engine;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, info_span, warn, Instrument};

/// Page-by-page invoice extraction with ZATCA annotation.
pub struct InvoiceProcessor<'a> {
    client: &'a ExtractionClient,
}

impl<'a> InvoiceProcessor<'a> {
    pub fn new(client: &'a ExtractionClient) -> Self {
        Self { client }
    }

    /// Extract every page in order and annotate what came back.
    ///
    /// Pages where the oracle fails or answers without usable JSON are skipped.
    /// Nothing is filtered for completeness here.
    pub async fn extract_pages(&self, pages: &[EncodedImage]) -> Vec<ExtractedInvoiceRecord> {
        let mut results = Vec::with_capacity(pages.len());
        for (i, page) in pages.iter().enumerate() {
            let page_number = i as u32 + 1;
            let span = info_span!("invoice_page", page = page_number, total = pages.len());
            let extracted = self
                .client
                .extract_invoice_from_image(page)
                .instrument(span.clone())
                .await;

            let _guard = span.enter();
            match extracted {
                Ok(Some(record)) => {
                    let record = annotate(record, Some(page_number));
                    info!(
                        invoice_number = ?record.invoice_number.raw(),
                        supplier = ?record.supplier_name.raw(),
                        total = ?record.total_amount_including_vat.raw(),
                        "Extracted invoice"
                    );
                    results.push(record);
                }
                Ok(None) => warn!("Failed to extract data from page"),
                Err(e) => warn!(error = %e, "Extraction request failed, skipping page"),
            }
        }
        results
    }

    /// Extract, annotate and keep only complete invoices, in page order.
    pub async fn process_invoice_base64_images(
        &self,
        pages: &[EncodedImage],
    ) -> Vec<ExtractedInvoiceRecord> {
        info!(pages = pages.len(), "Processing invoice pages");
        filter_complete(self.extract_pages(pages).await)
    }

    /// Whole-document mode: the provider fetches `uri` itself.
    pub async fn process_invoice_uri(&self, uri: &str) -> Result<Vec<ExtractedInvoiceRecord>> {
        let record = self.client.extract_invoice_from_uri(uri).await?;
        Ok(filter_complete(record.map(|r| annotate(r, None)).into_iter().collect()))
    }

    /// Whole-document mode with the PDF sent inline.
    pub async fn process_invoice_pdf(&self, pdf: &[u8]) -> Result<Vec<ExtractedInvoiceRecord>> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(pdf);
        let record = self.client.extract_invoice_from_pdf(&encoded).await?;
        Ok(filter_complete(record.map(|r| annotate(r, None)).into_iter().collect()))
    }
}

/// Attach page number, timestamp and the ZATCA rule results.
pub fn annotate(mut record: ExtractedInvoiceRecord, page_number: Option<u32>) -> ExtractedInvoiceRecord {
    record.page_number = page_number;
    record.processed_at = OffsetDateTime::now_utc().format(&Rfc3339).ok();
    let validation = validate_zatca_compliance(&record);
    if !validation.is_compliant {
        warn!(page = ?page_number, errors = ?validation.errors, "Invoice is not ZATCA compliant");
    }
    record.zatca_validation = Some(validation);
    record
}

/// Sum of `total_amount_including_vat` over all invoices.
///
/// `None` when there are no invoices or any total does not parse.
pub fn total_including_vat(invoices: &[ExtractedInvoiceRecord]) -> Option<f64> {
    if invoices.is_empty() {
        return None;
    }
    invoices
        .iter()
        .map(|inv| inv.total_amount_including_vat.raw().and_then(parse_amount))
        .sum()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::tests::ScriptedOracle;
    use crate::records::Field;
    use serde_json::json;

    pub(crate) const COMPLETE_PAGE: &str = r#"```json
{
  "invoice_number": "INV-2024-001",
  "invoice_date": "2024-01-15",
  "supplier_name": "Acme Trading Co",
  "supplier_vat_number": "300123456700003",
  "customer_name": "Riyadh Development Co",
  "currency_code": "SAR",
  "total_amount_excluding_vat": "100.00",
  "vat_amount": "15.00",
  "total_amount_including_vat": "115.00",
  "qr_code_present": true
}
```"#;

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

    #[tokio::test]
    async fn failed_second_page_leaves_one_annotated_result() {
        let client = ExtractionClient::new(Box::new(ScriptedOracle::replying(&[
            COMPLETE_PAGE,
            "Sorry, this page is blank.",
        ])));
        let results = InvoiceProcessor::new(&client)
            .process_invoice_base64_images(&[page(), page()])
            .await;

        assert_eq!(results.len(), 1);
        let inv = &results[0];
        assert_eq!(inv.page_number, Some(1));
        assert!(inv.processed_at.as_deref().is_some_and(|t| t.contains('T')));
        let zatca = inv.zatca_validation.as_ref().unwrap();
        assert!(zatca.is_compliant);
        assert!(zatca.warnings.is_empty(), "{:?}", zatca.warnings);
    }

    #[tokio::test]
    async fn incomplete_pages_are_extracted_but_filtered() {
        let client = ExtractionClient::new(Box::new(ScriptedOracle::replying(&[
            r#"{"invoice_number": "N/A", "total_amount_including_vat": "0"}"#,
            COMPLETE_PAGE,
        ])));
        let processor = InvoiceProcessor::new(&client);
        let pages = [page(), page()];

        let all = processor.extract_pages(&pages).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].invoice_number, Field::Sentinel("N/A".into()));

        let complete = filter_complete(all);
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].page_number, Some(2));
    }

    #[tokio::test]
    async fn oracle_errors_skip_the_page() {
        let client = ExtractionClient::new(Box::new(ScriptedOracle::new(vec![
            Err(crate::error::PipelineError::Oracle("503".into())),
            Ok(COMPLETE_PAGE.to_string()),
        ])));
        let results = InvoiceProcessor::new(&client)
            .process_invoice_base64_images(&[page(), page()])
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].page_number, Some(2));
    }

    #[tokio::test]
    async fn document_mode_has_no_page_number() {
        let client = ExtractionClient::new(Box::new(ScriptedOracle::replying(&[COMPLETE_PAGE])));
        let results = InvoiceProcessor::new(&client)
            .process_invoice_uri("https://files.example/inv.pdf")
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].page_number, None);
        assert!(results[0].zatca_validation.is_some());
    }

    #[test]
    fn totals_sum_across_pages() {
        let inv = |total: &str| -> ExtractedInvoiceRecord {
            serde_json::from_value(json!({ "total_amount_including_vat": total })).unwrap()
        };
        assert_eq!(total_including_vat(&[inv("115.00")]), Some(115.0));
        assert_eq!(total_including_vat(&[inv("1,150 SAR"), inv("50.5")]), Some(1200.5));
        assert_eq!(total_including_vat(&[inv("115"), inv("N/A")]), None);
        assert_eq!(total_including_vat(&[]), None);
    }
}
