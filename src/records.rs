// src/records.rs

use crate::validate::parse_amount;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Literal written by the oracle for a text field it could not find.
pub const TEXT_SENTINEL: &str = "N/A";
/// Literal written by the oracle for an amount it could not find.
pub const AMOUNT_SENTINEL: &str = "0";

/// Spellings treated as "not found" for text fields (compared upper-cased, trimmed).
const SENTINEL_SPELLINGS: &[&str] = &["N/A", "NA", "NULL", "NONE", ""];

pub fn is_sentinel_text(s: &str) -> bool {
    let upper = s.trim().to_uppercase();
    SENTINEL_SPELLINGS.contains(&upper.as_str())
}

/// One extracted field.
///
/// `Absent` means the key was missing or `null`; `Sentinel` keeps the exact
/// placeholder the oracle wrote so the record serializes back unchanged.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Field<T> {
    #[default]
    Absent,
    Sentinel(String),
    Value(T),
}

impl<T> Field<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Field::Absent)
    }
}

impl Field<String> {
    pub fn text(s: impl Into<String>) -> Self {
        let s = s.into();
        if is_sentinel_text(&s) {
            Field::Sentinel(s)
        } else {
            Field::Value(s)
        }
    }

    /// The raw text as received, sentinel or not.
    pub fn raw(&self) -> Option<&str> {
        match self {
            Field::Absent => None,
            Field::Sentinel(s) | Field::Value(s) => Some(s.as_str()),
        }
    }
}

/// Scalars a [`Field`] can carry.
pub trait FieldScalar: Sized {
    fn from_json(v: &Value) -> Option<Self>;
    fn to_json(&self) -> Value;
}

impl FieldScalar for String {
    fn from_json(v: &Value) -> Option<Self> {
        match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        Value::String(self.clone())
    }
}

impl FieldScalar for bool {
    fn from_json(v: &Value) -> Option<Self> {
        match v {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        Value::Bool(*self)
    }
}

impl<T: FieldScalar> Field<T> {
    fn from_json(raw: Value) -> Self {
        match raw {
            Value::Null => Field::Absent,
            Value::String(ref s) if is_sentinel_text(s) => Field::Sentinel(s.clone()),
            other => match T::from_json(&other) {
                Some(v) => Field::Value(v),
                None => Field::Sentinel(match other {
                    Value::String(s) => s,
                    v => v.to_string(),
                }),
            },
        }
    }
}

impl<'de, T: FieldScalar> Deserialize<'de> for Field<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Ok(Field::from_json(raw))
    }
}

impl<T: FieldScalar> Serialize for Field<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Field::Absent => serializer.serialize_none(),
            Field::Sentinel(s) => serializer.serialize_str(s),
            Field::Value(v) => v.to_json().serialize(serializer),
        }
    }
}

fn absent<T>(f: &Field<T>) -> bool {
    f.is_absent()
}

/// Outcome of the ZATCA rule set for one invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZatcaValidationResult {
    pub is_compliant: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// One invoice as returned by the oracle, plus pipeline annotations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedInvoiceRecord {
    #[serde(default, skip_serializing_if = "absent")]
    pub invoice_number: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub invoice_date: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub invoice_time: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub invoice_type: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub supplier_name: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub supplier_vat_number: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub supplier_cr_number: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub supplier_address: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub customer_name: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub customer_vat_number: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub customer_address: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub currency_code: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub total_amount_excluding_vat: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub vat_amount: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub total_amount_including_vat: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub vat_breakdown_15_percent: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub vat_breakdown_5_percent: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub vat_breakdown_zero_percent: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub taxable_amount_15_percent: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub taxable_amount_5_percent: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub taxable_amount_zero_percent: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub payment_terms: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub due_date: Field<String>,
    #[serde(default, skip_serializing_if = "absent")]
    pub qr_code_present: Field<bool>,
    #[serde(default, skip_serializing_if = "absent")]
    pub additional_notes: Field<String>,

    // Added by the pipeline after extraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zatca_validation: Option<ZatcaValidationResult>,

    /// Keys the oracle returned that are not part of the schema.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ExtractedInvoiceRecord {
    /// `currency_code`, or the bare `currency` key when that is all the oracle sent.
    pub fn currency(&self) -> Field<String> {
        match (&self.currency_code, self.extra.get("currency")) {
            (Field::Absent, Some(raw)) => Field::from_json(raw.clone()),
            (code, _) => code.clone(),
        }
    }
}

/// One contract as returned by the oracle. Amounts stay text ("10,500 SAR").
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractedContractRecord {
    #[serde(skip_serializing_if = "absent")]
    pub contracted_company: Field<String>,
    #[serde(skip_serializing_if = "absent")]
    pub contracting_company: Field<String>,
    #[serde(skip_serializing_if = "absent")]
    pub contract_date: Field<String>,
    #[serde(skip_serializing_if = "absent")]
    pub contract_total_amount: Field<String>,
    #[serde(skip_serializing_if = "absent")]
    pub currency: Field<String>,
}

/// Accepted spellings per contract field, preferred first.
const CONTRACT_KEYS: [&[&str]; 5] = [
    &["contracted_company", "Contracted_Company"],
    &["contracting_company", "Contracting_Company"],
    &["contract_date", "Contract_Date", "contract_cate"],
    &["contract_total_amount", "Contract_Total_Amount", "total_amount"],
    &["currency", "Currency"],
];

// Replies may carry several spellings of one field at once; the first
// non-null one in CONTRACT_KEYS order wins and the rest are ignored.
impl<'de> Deserialize<'de> for ExtractedContractRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut map = serde_json::Map::<String, Value>::deserialize(deserializer)?;
        let mut take = |keys: &[&str]| -> Field<String> {
            keys.iter()
                .filter_map(|k| map.remove(*k))
                .find(|v| !v.is_null())
                .map(Field::from_json)
                .unwrap_or_default()
        };
        let [contracted, contracting, date, amount, currency] = CONTRACT_KEYS;
        Ok(Self {
            contracted_company: take(contracted),
            contracting_company: take(contracting),
            contract_date: take(date),
            contract_total_amount: take(amount),
            currency: take(currency),
        })
    }
}

/// Oracle verdict when comparing an extracted contract with the project record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractComparison {
    #[serde(alias = "isMatching")]
    pub is_matching: bool,
    #[serde(default)]
    pub reason: String,
}

/// Oracle answer to "is this page an invoice or part of a contract".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DocumentClassification {
    #[serde(default)]
    pub is_invoice: bool,
    #[serde(default)]
    pub is_contract_information: bool,
}

/// A project row from the external store. Read-only to the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectRecord {
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,
    #[serde(default)]
    pub file_uri: Option<String>,
    #[serde(default, deserialize_with = "amount_from_any")]
    pub contract_value_sar: Option<f64>,
    #[serde(default)]
    pub contracting_company: Option<String>,
    #[serde(default)]
    pub contracted_company: Option<String>,
    #[serde(default)]
    pub contract_date: Option<String>,
    #[serde(default, deserialize_with = "amount_from_any")]
    pub total_amount_including_vat: Option<f64>,
}

/// Store ids are integers in some deployments and uuids in others.
fn id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported project id: {other}"
        ))),
    }
}

/// Amount columns arrive as numbers, numeric strings ("10,000") or null.
/// Text that does not read as an amount becomes `None`.
fn amount_from_any<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => {
            let amount = parse_amount(&s);
            if amount.is_none() {
                warn!(value = %s, "Unreadable project amount");
            }
            Ok(amount)
        }
        other => Err(serde::de::Error::custom(format!(
            "unsupported project amount: {other}"
        ))),
    }
}

/// What was extracted for a project, attached to its verdict.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum VerdictPayload {
    Invoices(Vec<ExtractedInvoiceRecord>),
    Contract(ExtractedContractRecord),
}

/// Result of reconciling one project.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationVerdict {
    pub is_valid: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<VerdictPayload>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sentinel_round_trips_verbatim() {
        let rec: ExtractedInvoiceRecord = serde_json::from_value(json!({
            "invoice_number": "n/a",
            "vat_amount": "0",
            "supplier_name": "Acme Trading Co",
            "qr_code_present": "N/A"
        }))
        .unwrap();

        assert_eq!(rec.invoice_number, Field::Sentinel("n/a".into()));
        assert_eq!(rec.vat_amount, Field::Value("0".into()));
        assert_eq!(rec.qr_code_present, Field::Sentinel("N/A".into()));
        assert!(rec.customer_name.is_absent());

        let back = serde_json::to_value(&rec).unwrap();
        assert_eq!(back["invoice_number"], "n/a");
        assert_eq!(back["vat_amount"], "0");
        assert_eq!(back["qr_code_present"], "N/A");
        assert!(back.get("customer_name").is_none());
    }

    #[test]
    fn numbers_and_bools_are_accepted_for_text_and_flag_fields() {
        let rec: ExtractedInvoiceRecord = serde_json::from_value(json!({
            "total_amount_including_vat": 115.5,
            "qr_code_present": true,
            "currency": "SAR",
            "page_count_hint": 3
        }))
        .unwrap();
        assert_eq!(rec.total_amount_including_vat.value().unwrap(), "115.5");
        assert_eq!(rec.qr_code_present, Field::Value(true));
        assert!(rec.currency_code.is_absent());
        assert_eq!(rec.currency(), Field::text("SAR"));
        assert_eq!(rec.extra.get("page_count_hint"), Some(&json!(3)));
    }

    #[test]
    fn both_currency_keys_keep_the_record() {
        let rec: ExtractedInvoiceRecord = serde_json::from_value(json!({
            "invoice_number": "INV-9",
            "currency_code": "SAR",
            "currency": "USD"
        }))
        .unwrap();
        assert_eq!(rec.currency(), Field::text("SAR"));
        assert_eq!(rec.extra.get("currency"), Some(&json!("USD")));
        assert_eq!(rec.invoice_number.value().unwrap(), "INV-9");
    }

    #[test]
    fn several_spellings_of_a_contract_field() {
        let rec: ExtractedContractRecord = serde_json::from_value(json!({
            "total_amount": "9,000",
            "Contract_Total_Amount": "10,500 SAR",
            "contract_total_amount": null,
            "Currency": "SAR",
            "currency": "USD",
            "contract_date": "2024-03-01",
            "contract_cate": "2023-01-01"
        }))
        .unwrap();
        assert_eq!(rec.contract_total_amount, Field::text("10,500 SAR"));
        assert_eq!(rec.currency, Field::text("USD"));
        assert_eq!(rec.contract_date, Field::text("2024-03-01"));
        assert!(rec.contracted_company.is_absent());
    }

    #[test]
    fn null_is_absent_not_sentinel() {
        let rec: ExtractedContractRecord =
            serde_json::from_value(json!({ "currency": null, "contracted_company": "" }))
                .unwrap();
        assert!(rec.currency.is_absent());
        assert_eq!(rec.contracted_company, Field::Sentinel(String::new()));
    }

    #[test]
    fn contract_aliases() {
        let rec: ExtractedContractRecord = serde_json::from_value(json!({
            "Contracted_Company": "Al Noor Contracting",
            "Contracting_Company": "Riyadh Development Co",
            "contract_cate": "2024-03-01",
            "Contract_Total_Amount": "10,500 SAR",
            "Currency": "SAR"
        }))
        .unwrap();
        assert_eq!(rec.contract_date.value().unwrap(), "2024-03-01");
        assert_eq!(rec.contract_total_amount.value().unwrap(), "10,500 SAR");
        assert_eq!(rec.currency.value().unwrap(), "SAR");
    }

    #[test]
    fn project_id_accepts_numbers_and_strings() {
        let a: ProjectRecord = serde_json::from_value(json!({ "id": 42 })).unwrap();
        let b: ProjectRecord =
            serde_json::from_value(json!({ "id": "7f0c", "contract_value_sar": 10000 })).unwrap();
        assert_eq!(a.id, "42");
        assert_eq!(b.id, "7f0c");
        assert_eq!(b.contract_value_sar, Some(10000.0));
        assert!(serde_json::from_value::<ProjectRecord>(json!({ "id": [1] })).is_err());
    }

    #[test]
    fn project_amounts_accept_numeric_strings() {
        let rows: Vec<ProjectRecord> = serde_json::from_value(json!([
            { "id": 1, "contract_value_sar": 10000 },
            { "id": 2, "contract_value_sar": "10,000", "total_amount_including_vat": "11500.50" },
            { "id": 3, "contract_value_sar": "pending", "total_amount_including_vat": null }
        ]))
        .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].contract_value_sar, Some(10000.0));
        assert_eq!(rows[1].total_amount_including_vat, Some(11500.5));
        assert_eq!(rows[2].contract_value_sar, None);
        assert_eq!(rows[2].total_amount_including_vat, None);
    }

    #[test]
    fn comparison_accepts_camel_case() {
        let c: ContractComparison =
            serde_json::from_value(json!({ "isMatching": false, "reason": "date" })).unwrap();
        assert!(!c.is_matching);
        assert_eq!(c.reason, "date");
    }
}
