//! Entity records and the trait the store and write pipeline are generic over.

mod records;

pub use records::{
    BlotterCase, BlotterCaseInput, BlotterStatus, Business, BusinessInput, BusinessStatus,
    CertificateInput, CertificateIssuance, CertificateType, Official, PermitIssuance,
    PermitIssuanceInput, PrintLog, PrintLogInput, Resident, ResidentInput, Settings,
    SettingsInput,
};

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::store::Table;
use crate::sync::job::JobType;
use crate::tokenize::{fold, normalize_text};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Resident,
    BlotterCase,
    Business,
    PermitIssuance,
    CertificateIssuance,
    PrintLog,
    Settings,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Resident,
        EntityKind::BlotterCase,
        EntityKind::Business,
        EntityKind::PermitIssuance,
        EntityKind::CertificateIssuance,
        EntityKind::PrintLog,
        EntityKind::Settings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Resident => "resident",
            EntityKind::BlotterCase => "blotter_case",
            EntityKind::Business => "business",
            EntityKind::PermitIssuance => "permit_issuance",
            EntityKind::CertificateIssuance => "certificate_issuance",
            EntityKind::PrintLog => "print_log",
            EntityKind::Settings => "settings",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        EntityKind::ALL.into_iter().find(|k| k.as_str() == raw)
    }

    pub fn table(self) -> Table {
        match self {
            EntityKind::Resident => Table::Residents,
            EntityKind::BlotterCase => Table::BlotterCases,
            EntityKind::Business => Table::Businesses,
            EntityKind::PermitIssuance => Table::PermitIssuances,
            EntityKind::CertificateIssuance => Table::CertificateIssuances,
            EntityKind::PrintLog => Table::PrintLogs,
            EntityKind::Settings => Table::Settings,
        }
    }

    pub fn job_type(self) -> JobType {
        match self {
            EntityKind::Resident => JobType::ResidentUpsert,
            EntityKind::BlotterCase => JobType::BlotterUpsert,
            EntityKind::Business => JobType::BusinessUpsert,
            EntityKind::PermitIssuance => JobType::PermitIssuanceUpsert,
            EntityKind::CertificateIssuance => JobType::CertificateUpsert,
            EntityKind::PrintLog => JobType::PrintlogUpsert,
            EntityKind::Settings => JobType::SettingsUpsert,
        }
    }

    /// Typed columns kept next to the JSON document, in the order
    /// [`Entity::index_values`] returns them.
    pub fn index_columns(self) -> &'static [&'static str] {
        match self {
            EntityKind::Resident => &["last_name", "first_name", "birthdate"],
            EntityKind::BlotterCase => &["case_number", "incident_date", "status"],
            EntityKind::Business => &["name", "owner_name", "status"],
            EntityKind::PermitIssuance => &["business_id", "permit_year", "permit_number"],
            EntityKind::CertificateIssuance => &["resident_id", "certificate_type", "issued_date"],
            EntityKind::PrintLog => &["document_type", "ref_entity_id"],
            EntityKind::Settings => &[],
        }
    }

    /// Human label used in activity titles.
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Resident => "Resident",
            EntityKind::BlotterCase => "Blotter case",
            EntityKind::Business => "Business",
            EntityKind::PermitIssuance => "Business permit",
            EntityKind::CertificateIssuance => "Certificate",
            EntityKind::PrintLog => "Printed document",
            EntityKind::Settings => "Settings",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields every stored record carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordHeader {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub search_tokens: BTreeSet<String>,
}

/// Exact-match key for the duplicate guard: folded parts joined with `|`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DuplicateKey(String);

impl DuplicateKey {
    pub fn from_parts(parts: &[&str]) -> Option<Self> {
        let folded: Vec<String> = parts.iter().map(|p| fold(&normalize_text(p))).collect();
        if folded.iter().any(String::is_empty) {
            return None;
        }
        Some(DuplicateKey(folded.join("|")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A record type that lives in its own table and syncs to its own remote
/// collection.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Raw form input. Validated and normalized by [`Entity::from_input`].
    type Input: Send;

    const KIND: EntityKind;

    /// Validate and normalize form input into a record with an empty header.
    fn from_input(input: Self::Input) -> AppResult<Self>;

    fn header(&self) -> &RecordHeader;

    fn header_mut(&mut self) -> &mut RecordHeader;

    /// Field values the search tokens are computed from.
    fn search_fields(&self) -> Vec<&str>;

    fn duplicate_key(&self) -> Option<DuplicateKey> {
        None
    }

    /// Values for [`EntityKind::index_columns`], same order.
    fn index_values(&self) -> Vec<Option<String>>;

    /// Singleton records use a well-known id.
    fn fixed_id() -> Option<&'static str> {
        None
    }

    /// Meta counter key when the record needs a locally assigned number.
    fn sequence_key(&self) -> Option<String> {
        None
    }

    fn apply_sequence(&mut self, _value: u64) {}

    /// Keep values from the stored version that an edit did not supply.
    fn carry_over(&mut self, _previous: &Self) {}

    fn display_name(&self) -> String;

    fn id(&self) -> &str {
        &self.header().id
    }
}

/// Recompute search tokens for a stored document of the given kind.
pub fn tokens_for_document(
    kind: EntityKind,
    doc: serde_json::Value,
) -> AppResult<BTreeSet<String>> {
    fn tokens<E: Entity>(doc: serde_json::Value) -> AppResult<BTreeSet<String>> {
        let record: E = serde_json::from_value(doc)?;
        Ok(crate::tokenize::tokenize(record.search_fields()))
    }
    match kind {
        EntityKind::Resident => tokens::<Resident>(doc),
        EntityKind::BlotterCase => tokens::<BlotterCase>(doc),
        EntityKind::Business => tokens::<Business>(doc),
        EntityKind::PermitIssuance => tokens::<PermitIssuance>(doc),
        EntityKind::CertificateIssuance => tokens::<CertificateIssuance>(doc),
        EntityKind::PrintLog => tokens::<PrintLog>(doc),
        EntityKind::Settings => tokens::<Settings>(doc),
    }
}

pub(crate) fn required(field: &'static str, value: Option<String>) -> AppResult<String> {
    optional(value).ok_or_else(|| AppError::missing_field(field))
}

pub(crate) fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| normalize_text(&v)).filter(|v| !v.is_empty())
}

pub(crate) fn date(field: &'static str, value: String) -> AppResult<String> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| {
            AppError::invalid_field(field, format!("{field} must be a date (YYYY-MM-DD)."))
                .with_context("value", value)
        })
}

pub(crate) fn optional_date(
    field: &'static str,
    value: Option<String>,
) -> AppResult<Option<String>> {
    optional(value).map(|v| date(field, v)).transpose()
}

pub(crate) fn non_negative(field: &'static str, value: Option<f64>) -> AppResult<Option<f64>> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(AppError::invalid_field(
            field,
            format!("{field} must be zero or more."),
        )),
        other => Ok(other),
    }
}
