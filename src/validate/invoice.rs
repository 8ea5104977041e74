use super::{is_valid_vat, parse_amount};
use crate::records::{ExtractedInvoiceRecord, Field, ZatcaValidationResult, is_sentinel_text};
use tracing::{info, warn};

/// Largest accepted gap between `excl + vat` and `incl`.
const VAT_SUM_TOLERANCE: f64 = 0.01;

/// Apply the ZATCA rule set. Every rule runs; only errors clear `is_compliant`.
pub fn validate_zatca_compliance(invoice: &ExtractedInvoiceRecord) -> ZatcaValidationResult {
    let mut result = ZatcaValidationResult {
        is_compliant: true,
        warnings: Vec::new(),
        errors: Vec::new(),
    };

    // Missing VAT numbers are left to the completeness check.
    if let Field::Value(vat) = &invoice.supplier_vat_number {
        if !is_valid_vat(vat) {
            result.errors.push(format!("Invalid VAT number: {vat}"));
            result.is_compliant = false;
        }
    }

    if let Field::Value(currency) = &invoice.currency() {
        if !currency.trim().eq_ignore_ascii_case("SAR") {
            result
                .warnings
                .push(format!("Currency is {currency}, expected SAR"));
        }
    }

    if invoice.qr_code_present != Field::Value(true) {
        result
            .warnings
            .push("No QR code detected - required by ZATCA".to_string());
    }

    let amounts = (
        amount_of(&invoice.total_amount_excluding_vat),
        amount_of(&invoice.vat_amount),
        amount_of(&invoice.total_amount_including_vat),
    );
    match amounts {
        (Some(excl), Some(vat), Some(incl)) => {
            if ((excl + vat) - incl).abs() > VAT_SUM_TOLERANCE {
                result.warnings.push(format!(
                    "VAT calculation may be incorrect: {excl} + {vat} != {incl}"
                ));
            }
        }
        _ => result
            .warnings
            .push("Could not validate VAT calculations".to_string()),
    }

    result
}

fn amount_of(field: &Field<String>) -> Option<f64> {
    field.raw().and_then(parse_amount)
}

/// Why an invoice was excluded from the complete set.
#[derive(Debug, Clone, PartialEq)]
pub enum Incomplete {
    MissingField { field: &'static str, value: String },
    NoPositiveAmount,
    InvalidVat(String),
    SupplierNameTooShort(String),
    CustomerNameTooShort(String),
}

impl std::fmt::Display for Incomplete {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Incomplete::MissingField { field, value } => {
                write!(f, "missing required field: {field} = '{value}'")
            }
            Incomplete::NoPositiveAmount => write!(f, "no meaningful financial amounts found"),
            Incomplete::InvalidVat(v) => {
                write!(f, "invalid VAT number format: '{v}' (should be 15 digits)")
            }
            Incomplete::SupplierNameTooShort(v) => write!(f, "supplier name too short: '{v}'"),
            Incomplete::CustomerNameTooShort(v) => write!(f, "customer name too short: '{v}'"),
        }
    }
}

/// Every completeness rule the invoice fails. Empty means complete.
pub fn completeness_issues(invoice: &ExtractedInvoiceRecord) -> Vec<Incomplete> {
    let mut issues = Vec::new();

    let required: [(&'static str, &Field<String>); 5] = [
        ("invoice_number", &invoice.invoice_number),
        ("invoice_date", &invoice.invoice_date),
        ("supplier_name", &invoice.supplier_name),
        ("supplier_vat_number", &invoice.supplier_vat_number),
        ("customer_name", &invoice.customer_name),
    ];
    for (field, value) in required {
        let raw = value.raw().unwrap_or("");
        if is_sentinel_text(raw) {
            issues.push(Incomplete::MissingField {
                field,
                value: raw.trim().to_string(),
            });
        }
    }

    let has_positive_amount = [
        &invoice.total_amount_excluding_vat,
        &invoice.vat_amount,
        &invoice.total_amount_including_vat,
    ]
    .into_iter()
    .any(|f| amount_of(f).is_some_and(|a| a > 0.0));
    if !has_positive_amount {
        issues.push(Incomplete::NoPositiveAmount);
    }

    if let Some(vat) = invoice.supplier_vat_number.value() {
        if !is_valid_vat(vat) {
            issues.push(Incomplete::InvalidVat(vat.trim().to_string()));
        }
    }

    if let Some(name) = invoice.supplier_name.value() {
        if name.trim().chars().count() < 3 {
            issues.push(Incomplete::SupplierNameTooShort(name.trim().to_string()));
        }
    }

    if let Some(name) = invoice.customer_name.value() {
        if name.trim().chars().count() < 2 {
            issues.push(Incomplete::CustomerNameTooShort(name.trim().to_string()));
        }
    }

    issues
}

/// Conjunctive: any single failed rule makes the invoice incomplete.
pub fn is_complete(invoice: &ExtractedInvoiceRecord) -> bool {
    completeness_issues(invoice).is_empty()
}

/// Keep only complete invoices, in order, logging why each rejected one was dropped.
pub fn filter_complete(results: Vec<ExtractedInvoiceRecord>) -> Vec<ExtractedInvoiceRecord> {
    if results.is_empty() {
        return results;
    }

    let total = results.len();
    info!(count = total, "Filtering results for completeness");

    let mut complete = Vec::with_capacity(total);
    for (i, result) in results.into_iter().enumerate() {
        let issues = completeness_issues(&result);
        if issues.is_empty() {
            info!(result = i + 1, page = ?result.page_number, "Invoice data is complete and valid");
            complete.push(result);
        } else {
            for issue in &issues {
                warn!(result = i + 1, page = ?result.page_number, reason = %issue, "Incomplete invoice");
            }
            warn!(result = i + 1, "Result excluded due to incomplete data");
        }
    }

    info!(kept = complete.len(), total, "Results with complete data");
    complete
}
