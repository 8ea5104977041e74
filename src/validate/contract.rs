use super::parse_amount;
use crate::config::PipelineSection;
use crate::records::{ExtractedContractRecord, Field};
use tracing::{debug, warn};

/// Completeness and amount rules for extracted contracts.
#[derive(Debug, Clone, Copy)]
pub struct ContractValidator {
    pub tolerance_sar: f64,
    pub usd_to_sar: f64,
}

impl Default for ContractValidator {
    fn default() -> Self {
        Self {
            tolerance_sar: 1000.0,
            usd_to_sar: 3.75,
        }
    }
}

impl ContractValidator {
    pub fn from_config(cfg: &PipelineSection) -> Self {
        Self {
            tolerance_sar: cfg.contract_tolerance_sar,
            usd_to_sar: cfg.usd_to_sar,
        }
    }

    /// Names of required fields that are absent, empty or `N/A`.
    pub fn missing_fields(&self, contract: &ExtractedContractRecord) -> Vec<&'static str> {
        [
            ("contracted_company", &contract.contracted_company),
            ("contracting_company", &contract.contracting_company),
            ("contract_date", &contract.contract_date),
            ("contract_total_amount", &contract.contract_total_amount),
            ("currency", &contract.currency),
        ]
        .into_iter()
        .filter(|(_, f)| !has_real_value(f))
        .map(|(name, _)| name)
        .collect()
    }

    pub fn is_complete_contract_data(&self, contract: &ExtractedContractRecord) -> bool {
        self.missing_fields(contract).is_empty()
    }

    /// Contract total in SAR, converting USD at the fixed rate.
    ///
    /// `None` for unsupported currencies and unparseable amounts.
    pub fn amount_in_sar(&self, contract: &ExtractedContractRecord) -> Option<f64> {
        let currency = contract.currency.raw().unwrap_or("").trim().to_uppercase();
        let rate = match currency.as_str() {
            "SAR" => 1.0,
            "USD" => self.usd_to_sar,
            other => {
                warn!(currency = %other, "Unsupported contract currency");
                return None;
            }
        };
        let amount = contract.contract_total_amount.raw().and_then(parse_amount)?;
        Some(amount * rate)
    }

    /// `|amount_sar - expected| < tolerance`; never errors.
    pub fn is_amount_matching(&self, contract: &ExtractedContractRecord, expected: f64) -> bool {
        match self.amount_in_sar(contract) {
            Some(amount) => {
                let matching = (amount - expected).abs() < self.tolerance_sar;
                debug!(amount, expected, matching, "Contract amount comparison");
                matching
            }
            None => false,
        }
    }
}

fn has_real_value(field: &Field<String>) -> bool {
    field
        .raw()
        .map(str::trim)
        .is_some_and(|v| !v.is_empty() && !v.eq_ignore_ascii_case("N/A"))
}
