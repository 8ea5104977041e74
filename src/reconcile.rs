//! Batch reconciliation of unverified projects.
//!
//! Each project walks `Pending → Extracting → Validating` and ends in exactly one
//! terminal state. Every terminal state, `Failed` included, is written back to the
//! store once. Errors never leave a project: they become a failed verdict and the
//! batch moves on.

use crate::contract::ContractProcessor;
use crate::convert::{Converted, FileConverter};
use crate::error::{PipelineError, Result};
use crate::fetch::DocumentFetcher;
use crate::invoice::{InvoiceProcessor, total_including_vat};
use crate::llm::ExtractionClient;
use crate::records::{ExtractedInvoiceRecord, ProjectRecord, VerdictPayload, VerificationVerdict};
use crate::store::ProjectStore;
use crate::validate::contract::ContractValidator;
use crate::validate::invoice::filter_complete;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Invoice,
    Contract,
}

impl std::fmt::Display for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Flow::Invoice => write!(f, "invoice"),
            Flow::Contract => write!(f, "contract"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectState {
    Pending,
    Extracting,
    Validating,
    Reconciled { valid: bool },
    Failed,
}

/// Final state and verdict of one project.
#[derive(Debug)]
pub struct ProjectReport {
    pub project_id: String,
    pub state: ProjectState,
    pub verdict: VerificationVerdict,
    /// False when the store rejected the write-back.
    pub written: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub valid: usize,
    pub invalid: usize,
    pub failed: usize,
    pub write_errors: usize,
}

impl BatchSummary {
    fn record(&mut self, report: &ProjectReport) {
        match report.state {
            ProjectState::Reconciled { valid: true } => self.valid += 1,
            ProjectState::Reconciled { valid: false } => self.invalid += 1,
            _ => self.failed += 1,
        }
        if !report.written {
            self.write_errors += 1;
        }
    }
}

pub struct ReconciliationDriver {
    store: Box<dyn ProjectStore>,
    fetcher: DocumentFetcher,
    converter: FileConverter,
    client: ExtractionClient,
    validator: ContractValidator,
    invoice_total_tolerance: f64,
    delay: Duration,
}

impl ReconciliationDriver {
    pub fn new(
        store: Box<dyn ProjectStore>,
        fetcher: DocumentFetcher,
        converter: FileConverter,
        client: ExtractionClient,
        validator: ContractValidator,
        invoice_total_tolerance: f64,
        delay: Duration,
    ) -> Self {
        Self {
            store,
            fetcher,
            converter,
            client,
            validator,
            invoice_total_tolerance,
            delay,
        }
    }

    /// Reconcile every unverified project in store order, pausing between projects.
    ///
    /// Only a failure to list the projects is an error.
    pub async fn run_batch(&self, flow: Flow) -> Result<BatchSummary> {
        let projects = self.store.list_unverified_projects().await?;
        info!(
            flow = %flow,
            count = projects.len(),
            store = self.store.name(),
            provider = self.client.provider(),
            "Starting reconciliation batch"
        );

        let mut summary = BatchSummary::default();
        for (i, project) in projects.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                info!(secs = self.delay.as_secs(), "Waiting before next project");
                tokio::time::sleep(self.delay).await;
            }
            let report = self.reconcile_project(flow, project).await;
            debug!(
                project_id = %report.project_id,
                is_valid = report.verdict.is_valid,
                written = report.written,
                "Project done"
            );
            summary.record(&report);
        }

        info!(
            flow = %flow,
            total = projects.len(),
            valid = summary.valid,
            invalid = summary.invalid,
            failed = summary.failed,
            write_errors = summary.write_errors,
            "Reconciliation batch finished"
        );
        Ok(summary)
    }

    /// Run one project to a terminal state and write its verdict back.
    pub async fn reconcile_project(&self, flow: Flow, project: &ProjectRecord) -> ProjectReport {
        let span = info_span!("project", id = %project.id, flow = %flow);
        async {
            let mut state = ProjectState::Pending;
            let outcome = match flow {
                Flow::Invoice => self.reconcile_invoice(project, &mut state).await,
                Flow::Contract => self.reconcile_contract(project, &mut state).await,
            };

            let verdict = match outcome {
                Ok(verdict) => {
                    advance(&mut state, ProjectState::Reconciled { valid: verdict.is_valid });
                    verdict
                }
                Err(e) => {
                    error!(stage = ?state, error = %e, "Project failed");
                    advance(&mut state, ProjectState::Failed);
                    VerificationVerdict {
                        is_valid: false,
                        reason: format!("Processing failed: {e}"),
                        data: None,
                    }
                }
            };
            info!(state = ?state, reason = %verdict.reason, "Project verdict");

            let written = match self
                .store
                .set_verification(&project.id, verdict.is_valid, &verdict.reason)
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    error!(error = %e, "Failed to write verification");
                    false
                }
            };

            ProjectReport {
                project_id: project.id.clone(),
                state,
                verdict,
                written,
            }
        }
        .instrument(span)
        .await
    }

    async fn load_document(&self, project: &ProjectRecord) -> Result<Vec<u8>> {
        let uri = project
            .file_uri
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| PipelineError::Download("project has no file URI".to_string()))?;
        self.fetcher.load(uri).await
    }

    async fn reconcile_invoice(
        &self,
        project: &ProjectRecord,
        state: &mut ProjectState,
    ) -> Result<VerificationVerdict> {
        advance(state, ProjectState::Extracting);
        let bytes = self.load_document(project).await?;
        let pages = match self.converter.convert(&bytes)? {
            Converted::Pages(pages) if pages.is_empty() => {
                return Err(PipelineError::Render("no page could be converted".to_string()));
            }
            Converted::Pages(pages) => pages,
            Converted::Unsupported => {
                return Err(PipelineError::UnsupportedFile("unknown file type".to_string()));
            }
        };

        let extracted = InvoiceProcessor::new(&self.client).extract_pages(&pages).await;
        if extracted.is_empty() {
            return Err(PipelineError::Oracle(format!(
                "no invoice data extracted from {} page(s)",
                pages.len()
            )));
        }

        advance(state, ProjectState::Validating);
        let complete = filter_complete(extracted);
        if complete.is_empty() {
            return Ok(invoice_verdict(false, "No complete invoice found".to_string(), complete));
        }

        let Some(total) = total_including_vat(&complete) else {
            return Ok(invoice_verdict(
                false,
                "Invoice total including VAT could not be read".to_string(),
                complete,
            ));
        };
        let Some(expected) = project.total_amount_including_vat else {
            return Ok(invoice_verdict(
                false,
                format!("Project has no expected invoice total (invoices total {total:.2} SAR)"),
                complete,
            ));
        };

        let matching = (total - expected).abs() <= self.invoice_total_tolerance;
        info!(total, expected, invoices = complete.len(), matching, "Invoice total comparison");
        let reason = if matching {
            format!(
                "Invoice total {total:.2} SAR matches project total across {} invoice(s)",
                complete.len()
            )
        } else {
            format!("Invoice total {total:.2} SAR does not match project total {expected:.2} SAR")
        };
        Ok(invoice_verdict(matching, reason, complete))
    }

    async fn reconcile_contract(
        &self,
        project: &ProjectRecord,
        state: &mut ProjectState,
    ) -> Result<VerificationVerdict> {
        let processor = ContractProcessor::new(&self.client, &self.converter, self.validator);

        advance(state, ProjectState::Extracting);
        let bytes = self.load_document(project).await?;
        let extracted = processor
            .extract_contract(&bytes)
            .await?
            .ok_or_else(|| PipelineError::Oracle("no contract data extracted".to_string()))?;

        advance(state, ProjectState::Validating);
        processor.validate_contract(extracted, project).await
    }
}

fn advance(state: &mut ProjectState, next: ProjectState) {
    debug!(from = ?state, to = ?next, "State transition");
    *state = next;
}

fn invoice_verdict(
    is_valid: bool,
    reason: String,
    invoices: Vec<ExtractedInvoiceRecord>,
) -> VerificationVerdict {
    if !is_valid {
        warn!(reason = %reason, "Invoice verification failed");
    }
    VerificationVerdict {
        is_valid,
        reason,
        data: Some(VerdictPayload::Invoices(invoices)),
    }
}
