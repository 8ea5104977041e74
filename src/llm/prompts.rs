// src/llm/prompts.rs

use serde_json::{Value, json};

/// Field-by-field invoice extraction instruction, shared by every input mode.
pub const INVOICE_PROMPT: &str = r#"Please analyze this Saudi Arabian invoice and extract the following information in JSON format:

{
    "invoice_number": "unique invoice identifier",
    "invoice_date": "date in YYYY-MM-DD format",
    "invoice_time": "time if available",
    "supplier_name": "supplier business name",
    "supplier_vat_number": "15-digit VAT number",
    "supplier_cr_number": "commercial registration number",
    "supplier_address": "full supplier address",
    "customer_name": "customer name",
    "customer_vat_number": "customer VAT if available",
    "customer_address": "customer address",
    "invoice_type": "Tax Invoice, Simplified Tax Invoice, etc.",
    "currency_code": "usually SAR",
    "total_amount_excluding_vat": "pre-tax total",
    "vat_amount": "total VAT amount",
    "total_amount_including_vat": "final total",
    "vat_breakdown_15_percent": "VAT at 15%",
    "vat_breakdown_5_percent": "VAT at 5%",
    "vat_breakdown_zero_percent": "VAT at 0%",
    "taxable_amount_15_percent": "amount subject to 15% VAT",
    "taxable_amount_5_percent": "amount subject to 5% VAT",
    "taxable_amount_zero_percent": "amount subject to 0% VAT",
    "payment_terms": "payment conditions",
    "due_date": "payment due date",
    "qr_code_present": true/false,
    "additional_notes": "any special notes"
}

Important:
- Look for both Arabic and English text
- Saudi VAT numbers are 15 digits
- Standard VAT rate in Saudi Arabia is 15%
- Use "N/A" for missing text fields and "0" for missing amounts
- Return ONLY the JSON object, no other text"#;

pub const CONTRACT_PROMPT: &str = r#"Extract the following fields from the contract:
- contracted_company: the contractor carrying out the work
- contracting_company: the client awarding the contract
- contract_date: date the contract was signed, YYYY-MM-DD if possible
- contract_total_amount: total contract value as written, including any currency label
- currency: SAR or USD

Use "N/A" for anything you cannot find.
Return ONLY the JSON object, no other text."#;

pub const CLASSIFY_PROMPT: &str = r#"Please analyze this input and find out if it is a complete invoice or a part of a contract and return the following information in JSON format:

{
    "is_invoice": true/false,
    "is_contract_information": true/false
}

Important:
- Saudi VAT numbers are 15 digits
- for an invoice to be valid it must have the total amount including VAT and the total VAT
- Return ONLY the JSON object, no other text"#;

/// Ask the oracle whether `extracted` describes the same contract as `expected`.
pub fn comparison_prompt(extracted: &Value, expected: &Value, tolerance_sar: f64, usd_to_sar: f64) -> String {
    format!(
        "Compare the following extracted contract data with the expected data.\n\
         Extracted Data: {extracted}\n\
         Expected Data: {expected}\n\
         Check if the parties involved in the contract have a name matching within a reasonable similarity indicating that the same entities are involved.\n\
         Check if the contract date is within a year of the expected date.\n\
         Check if the contract total amount matches the expected amount within a tolerance of {tolerance_sar} SAR.\n\
         Check if the currency is SAR or USD (if USD, convert to SAR using a rate of 1 USD = {usd_to_sar} SAR for comparison).\n\
         If there is no match, then return the reason.\n\
         Return ONLY a JSON object of the form {{\"is_matching\": true/false, \"reason\": \"...\"}}."
    )
}

pub fn contract_schema() -> Value {
    let text = json!({ "type": "STRING" });
    json!({
        "type": "OBJECT",
        "properties": {
            "contracted_company": text,
            "contracting_company": text,
            "contract_date": text,
            "contract_total_amount": text,
            "currency": text,
        },
        "required": [
            "contracted_company",
            "contracting_company",
            "contract_date",
            "contract_total_amount",
            "currency"
        ]
    })
}

pub fn comparison_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "is_matching": { "type": "BOOLEAN" },
            "reason": { "type": "STRING" },
        },
        "required": ["is_matching", "reason"]
    })
}
