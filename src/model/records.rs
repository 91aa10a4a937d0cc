use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    date, non_negative, optional, optional_date, required, DuplicateKey, Entity, EntityKind,
    RecordHeader,
};
use crate::time::year_of;
use crate::{AppError, AppResult};

fn parse_choice<T: DeserializeOwned>(field: &'static str, raw: String) -> AppResult<T> {
    let wire = raw.trim().to_lowercase().replace([' ', '-'], "_");
    serde_json::from_value(Value::String(wire)).map_err(|_| {
        AppError::invalid_field(field, format!("{field} has an unsupported value."))
            .with_context("value", raw)
    })
}

fn optional_choice<T: DeserializeOwned>(
    field: &'static str,
    raw: Option<String>,
) -> AppResult<Option<T>> {
    optional(raw).map(|v| parse_choice(field, v)).transpose()
}

fn push_opt<'a>(fields: &mut Vec<&'a str>, value: &'a Option<String>) {
    if let Some(v) = value {
        fields.push(v);
    }
}

// ---------------------------------------------------------------------------
// Resident

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resident {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub first_name: String,
    pub middle_name: Option<String>,
    pub suffix: Option<String>,
    #[serde(default)]
    pub birthdate: String,
    pub sex: Option<String>,
    pub civil_status: Option<String>,
    pub purok: Option<String>,
    pub street: Option<String>,
    pub contact_number: Option<String>,
    #[serde(default)]
    pub is_voter: bool,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResidentInput {
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub suffix: Option<String>,
    pub birthdate: Option<String>,
    pub sex: Option<String>,
    pub civil_status: Option<String>,
    pub purok: Option<String>,
    pub street: Option<String>,
    pub contact_number: Option<String>,
    pub is_voter: Option<bool>,
    pub remarks: Option<String>,
}

impl Entity for Resident {
    type Input = ResidentInput;
    const KIND: EntityKind = EntityKind::Resident;

    fn from_input(input: ResidentInput) -> AppResult<Self> {
        let sex = optional(input.sex).map(|s| s.to_lowercase());
        if let Some(value) = &sex {
            if value != "male" && value != "female" {
                return Err(AppError::invalid_field("sex", "sex must be male or female.")
                    .with_context("value", value.clone()));
            }
        }
        Ok(Resident {
            header: RecordHeader::default(),
            last_name: required("lastName", input.last_name)?,
            first_name: required("firstName", input.first_name)?,
            middle_name: optional(input.middle_name),
            suffix: optional(input.suffix),
            birthdate: date("birthdate", required("birthdate", input.birthdate)?)?,
            sex,
            civil_status: optional(input.civil_status),
            purok: optional(input.purok),
            street: optional(input.street),
            contact_number: optional(input.contact_number),
            is_voter: input.is_voter.unwrap_or(false),
            remarks: optional(input.remarks),
        })
    }

    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.last_name.as_str(), self.first_name.as_str()];
        push_opt(&mut fields, &self.middle_name);
        push_opt(&mut fields, &self.suffix);
        push_opt(&mut fields, &self.purok);
        push_opt(&mut fields, &self.street);
        push_opt(&mut fields, &self.contact_number);
        fields
    }

    fn duplicate_key(&self) -> Option<DuplicateKey> {
        DuplicateKey::from_parts(&[&self.last_name, &self.first_name, &self.birthdate])
    }

    fn index_values(&self) -> Vec<Option<String>> {
        vec![
            Some(self.last_name.clone()),
            Some(self.first_name.clone()),
            Some(self.birthdate.clone()),
        ]
    }

    fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

// ---------------------------------------------------------------------------
// Blotter case

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlotterStatus {
    #[default]
    Open,
    UnderMediation,
    Settled,
    Referred,
    Closed,
}

impl BlotterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BlotterStatus::Open => "open",
            BlotterStatus::UnderMediation => "under_mediation",
            BlotterStatus::Settled => "settled",
            BlotterStatus::Referred => "referred",
            BlotterStatus::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlotterCase {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub case_number: Option<String>,
    #[serde(default)]
    pub complainant: String,
    pub respondent: Option<String>,
    #[serde(default)]
    pub incident_type: String,
    #[serde(default)]
    pub incident_date: String,
    pub location: Option<String>,
    pub narrative: Option<String>,
    #[serde(default)]
    pub status: BlotterStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlotterCaseInput {
    pub case_number: Option<String>,
    pub complainant: Option<String>,
    pub respondent: Option<String>,
    pub incident_type: Option<String>,
    pub incident_date: Option<String>,
    pub location: Option<String>,
    pub narrative: Option<String>,
    pub status: Option<String>,
}

impl Entity for BlotterCase {
    type Input = BlotterCaseInput;
    const KIND: EntityKind = EntityKind::BlotterCase;

    fn from_input(input: BlotterCaseInput) -> AppResult<Self> {
        Ok(BlotterCase {
            header: RecordHeader::default(),
            case_number: optional(input.case_number).map(|c| c.to_uppercase()),
            complainant: required("complainant", input.complainant)?,
            respondent: optional(input.respondent),
            incident_type: required("incidentType", input.incident_type)?,
            incident_date: date(
                "incidentDate",
                required("incidentDate", input.incident_date)?,
            )?,
            location: optional(input.location),
            narrative: optional(input.narrative),
            status: optional_choice("status", input.status)?.unwrap_or_default(),
        })
    }

    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        push_opt(&mut fields, &self.case_number);
        fields.push(self.complainant.as_str());
        push_opt(&mut fields, &self.respondent);
        fields.push(self.incident_type.as_str());
        push_opt(&mut fields, &self.location);
        push_opt(&mut fields, &self.narrative);
        fields
    }

    fn duplicate_key(&self) -> Option<DuplicateKey> {
        self.case_number
            .as_deref()
            .and_then(|n| DuplicateKey::from_parts(&[n]))
    }

    fn index_values(&self) -> Vec<Option<String>> {
        vec![
            self.case_number.clone(),
            Some(self.incident_date.clone()),
            Some(self.status.as_str().to_string()),
        ]
    }

    fn sequence_key(&self) -> Option<String> {
        if self.case_number.is_some() {
            return None;
        }
        Some(format!("blotterSeq:{}", year_of(&self.header.created_at)))
    }

    fn apply_sequence(&mut self, value: u64) {
        let year = year_of(&self.header.created_at);
        self.case_number = Some(format!("BLT-{year}-{value:04}"));
    }

    fn carry_over(&mut self, previous: &Self) {
        if self.case_number.is_none() {
            self.case_number = previous.case_number.clone();
        }
    }

    fn display_name(&self) -> String {
        match &self.case_number {
            Some(number) => format!("{number} {}", self.incident_type),
            None => self.incident_type.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Business

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessStatus {
    #[default]
    Active,
    Inactive,
    Closed,
}

impl BusinessStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BusinessStatus::Active => "active",
            BusinessStatus::Inactive => "inactive",
            BusinessStatus::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Business {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner_name: String,
    pub address: Option<String>,
    pub nature_of_business: Option<String>,
    #[serde(default)]
    pub status: BusinessStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessInput {
    pub name: Option<String>,
    pub owner_name: Option<String>,
    pub address: Option<String>,
    pub nature_of_business: Option<String>,
    pub status: Option<String>,
}

impl Entity for Business {
    type Input = BusinessInput;
    const KIND: EntityKind = EntityKind::Business;

    fn from_input(input: BusinessInput) -> AppResult<Self> {
        Ok(Business {
            header: RecordHeader::default(),
            name: required("name", input.name)?,
            owner_name: required("ownerName", input.owner_name)?,
            address: optional(input.address),
            nature_of_business: optional(input.nature_of_business),
            status: optional_choice("status", input.status)?.unwrap_or_default(),
        })
    }

    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.name.as_str(), self.owner_name.as_str()];
        push_opt(&mut fields, &self.nature_of_business);
        push_opt(&mut fields, &self.address);
        fields
    }

    fn duplicate_key(&self) -> Option<DuplicateKey> {
        DuplicateKey::from_parts(&[&self.name, &self.owner_name])
    }

    fn index_values(&self) -> Vec<Option<String>> {
        vec![
            Some(self.name.clone()),
            Some(self.owner_name.clone()),
            Some(self.status.as_str().to_string()),
        ]
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }
}

// ---------------------------------------------------------------------------
// Permit issuance

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitIssuance {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub business_id: String,
    pub business_name: Option<String>,
    pub permit_number: Option<String>,
    #[serde(default)]
    pub permit_year: i32,
    pub amount_paid: Option<f64>,
    pub or_number: Option<String>,
    #[serde(default)]
    pub issued_date: String,
    pub valid_until: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitIssuanceInput {
    pub business_id: Option<String>,
    pub business_name: Option<String>,
    pub permit_number: Option<String>,
    pub permit_year: Option<i32>,
    pub amount_paid: Option<f64>,
    pub or_number: Option<String>,
    pub issued_date: Option<String>,
    pub valid_until: Option<String>,
}

impl Entity for PermitIssuance {
    type Input = PermitIssuanceInput;
    const KIND: EntityKind = EntityKind::PermitIssuance;

    fn from_input(input: PermitIssuanceInput) -> AppResult<Self> {
        let permit_year = input
            .permit_year
            .ok_or_else(|| AppError::missing_field("permitYear"))?;
        if !(1900..=2200).contains(&permit_year) {
            return Err(AppError::invalid_field("permitYear", "permitYear is out of range.")
                .with_context("value", permit_year.to_string()));
        }
        let issued_date = date("issuedDate", required("issuedDate", input.issued_date)?)?;
        let valid_until = optional_date("validUntil", input.valid_until)?;
        if let Some(until) = &valid_until {
            if until.as_str() < issued_date.as_str() {
                return Err(AppError::invalid_field(
                    "validUntil",
                    "validUntil cannot be before issuedDate.",
                ));
            }
        }
        Ok(PermitIssuance {
            header: RecordHeader::default(),
            business_id: required("businessId", input.business_id)?,
            business_name: optional(input.business_name),
            permit_number: optional(input.permit_number),
            permit_year,
            amount_paid: non_negative("amountPaid", input.amount_paid)?,
            or_number: optional(input.or_number),
            issued_date,
            valid_until,
        })
    }

    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        push_opt(&mut fields, &self.permit_number);
        push_opt(&mut fields, &self.business_name);
        push_opt(&mut fields, &self.or_number);
        fields
    }

    fn duplicate_key(&self) -> Option<DuplicateKey> {
        let year = self.permit_year.to_string();
        DuplicateKey::from_parts(&[&self.business_id, &year])
    }

    fn index_values(&self) -> Vec<Option<String>> {
        vec![
            Some(self.business_id.clone()),
            Some(self.permit_year.to_string()),
            self.permit_number.clone(),
        ]
    }

    fn display_name(&self) -> String {
        match &self.business_name {
            Some(name) => format!("{name} ({})", self.permit_year),
            None => format!("Permit {}", self.permit_year),
        }
    }
}

// ---------------------------------------------------------------------------
// Certificate issuance

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateType {
    #[default]
    Clearance,
    Residency,
    Indigency,
    GoodMoral,
    Other,
}

impl CertificateType {
    pub fn as_str(self) -> &'static str {
        match self {
            CertificateType::Clearance => "clearance",
            CertificateType::Residency => "residency",
            CertificateType::Indigency => "indigency",
            CertificateType::GoodMoral => "good_moral",
            CertificateType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateIssuance {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub resident_id: String,
    pub resident_name: Option<String>,
    #[serde(default)]
    pub certificate_type: CertificateType,
    pub purpose: Option<String>,
    pub or_number: Option<String>,
    pub amount_paid: Option<f64>,
    #[serde(default)]
    pub issued_date: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInput {
    pub resident_id: Option<String>,
    pub resident_name: Option<String>,
    pub certificate_type: Option<String>,
    pub purpose: Option<String>,
    pub or_number: Option<String>,
    pub amount_paid: Option<f64>,
    pub issued_date: Option<String>,
}

impl Entity for CertificateIssuance {
    type Input = CertificateInput;
    const KIND: EntityKind = EntityKind::CertificateIssuance;

    fn from_input(input: CertificateInput) -> AppResult<Self> {
        let certificate_type = parse_choice(
            "certificateType",
            required("certificateType", input.certificate_type)?,
        )?;
        Ok(CertificateIssuance {
            header: RecordHeader::default(),
            resident_id: required("residentId", input.resident_id)?,
            resident_name: optional(input.resident_name),
            certificate_type,
            purpose: optional(input.purpose),
            or_number: optional(input.or_number),
            amount_paid: non_negative("amountPaid", input.amount_paid)?,
            issued_date: date("issuedDate", required("issuedDate", input.issued_date)?)?,
        })
    }

    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        push_opt(&mut fields, &self.resident_name);
        fields.push(self.certificate_type.as_str());
        push_opt(&mut fields, &self.purpose);
        push_opt(&mut fields, &self.or_number);
        fields
    }

    fn index_values(&self) -> Vec<Option<String>> {
        vec![
            Some(self.resident_id.clone()),
            Some(self.certificate_type.as_str().to_string()),
            Some(self.issued_date.clone()),
        ]
    }

    fn display_name(&self) -> String {
        let who = self.resident_name.as_deref().unwrap_or("resident");
        format!("{} for {who}", self.certificate_type.as_str())
    }
}

// ---------------------------------------------------------------------------
// Print log

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintLog {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub document_type: String,
    pub ref_entity_type: Option<String>,
    pub ref_entity_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default = "one")]
    pub copies: u32,
    pub printed_by: Option<String>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintLogInput {
    pub document_type: Option<String>,
    pub ref_entity_type: Option<String>,
    pub ref_entity_id: Option<String>,
    pub title: Option<String>,
    pub copies: Option<u32>,
    pub printed_by: Option<String>,
}

impl Entity for PrintLog {
    type Input = PrintLogInput;
    const KIND: EntityKind = EntityKind::PrintLog;

    fn from_input(input: PrintLogInput) -> AppResult<Self> {
        let copies = input.copies.unwrap_or(1);
        if copies == 0 {
            return Err(AppError::invalid_field("copies", "copies must be at least 1."));
        }
        let ref_entity_type = optional(input.ref_entity_type);
        if let Some(kind) = &ref_entity_type {
            if EntityKind::parse(kind).is_none() {
                return Err(AppError::invalid_field(
                    "refEntityType",
                    "refEntityType is not a known record type.",
                )
                .with_context("value", kind.clone()));
            }
        }
        Ok(PrintLog {
            header: RecordHeader::default(),
            document_type: required("documentType", input.document_type)?,
            ref_entity_type,
            ref_entity_id: optional(input.ref_entity_id),
            title: required("title", input.title)?,
            copies,
            printed_by: optional(input.printed_by),
        })
    }

    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.document_type.as_str(), self.title.as_str()];
        push_opt(&mut fields, &self.printed_by);
        fields
    }

    fn index_values(&self) -> Vec<Option<String>> {
        vec![Some(self.document_type.clone()), self.ref_entity_id.clone()]
    }

    fn display_name(&self) -> String {
        self.title.clone()
    }
}

// ---------------------------------------------------------------------------
// Settings

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Official {
    pub position: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub barangay_name: Option<String>,
    pub municipality: Option<String>,
    pub province: Option<String>,
    #[serde(default)]
    pub officials: Vec<Official>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsInput {
    pub barangay_name: Option<String>,
    pub municipality: Option<String>,
    pub province: Option<String>,
    pub officials: Option<Vec<Official>>,
    pub extra: Option<BTreeMap<String, Value>>,
}

impl Entity for Settings {
    type Input = SettingsInput;
    const KIND: EntityKind = EntityKind::Settings;

    fn from_input(input: SettingsInput) -> AppResult<Self> {
        let officials = input
            .officials
            .unwrap_or_default()
            .into_iter()
            .map(|o| {
                Ok(Official {
                    position: required("officials.position", Some(o.position))?,
                    name: required("officials.name", Some(o.name))?,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Settings {
            header: RecordHeader::default(),
            barangay_name: optional(input.barangay_name),
            municipality: optional(input.municipality),
            province: optional(input.province),
            officials,
            extra: input.extra.unwrap_or_default(),
        })
    }

    fn header(&self) -> &RecordHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        push_opt(&mut fields, &self.barangay_name);
        push_opt(&mut fields, &self.municipality);
        push_opt(&mut fields, &self.province);
        fields
    }

    fn index_values(&self) -> Vec<Option<String>> {
        Vec::new()
    }

    fn fixed_id() -> Option<&'static str> {
        Some("app")
    }

    fn carry_over(&mut self, previous: &Self) {
        if self.barangay_name.is_none() {
            self.barangay_name = previous.barangay_name.clone();
        }
        if self.municipality.is_none() {
            self.municipality = previous.municipality.clone();
        }
        if self.province.is_none() {
            self.province = previous.province.clone();
        }
        if self.officials.is_empty() {
            self.officials = previous.officials.clone();
        }
        for (key, value) in &previous.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    fn display_name(&self) -> String {
        self.barangay_name
            .clone()
            .unwrap_or_else(|| "Barangay settings".to_string())
    }
}
