use serde::{Deserialize, Serialize};

/// What a queued job writes remotely. Closed set; every variant has a
/// collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    ResidentUpsert,
    BlotterUpsert,
    BusinessUpsert,
    PermitIssuanceUpsert,
    CertificateUpsert,
    PrintlogUpsert,
    SettingsUpsert,
}

impl JobType {
    pub const ALL: [JobType; 7] = [
        JobType::ResidentUpsert,
        JobType::BlotterUpsert,
        JobType::BusinessUpsert,
        JobType::PermitIssuanceUpsert,
        JobType::CertificateUpsert,
        JobType::PrintlogUpsert,
        JobType::SettingsUpsert,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::ResidentUpsert => "RESIDENT_UPSERT",
            JobType::BlotterUpsert => "BLOTTER_UPSERT",
            JobType::BusinessUpsert => "BUSINESS_UPSERT",
            JobType::PermitIssuanceUpsert => "PERMIT_ISSUANCE_UPSERT",
            JobType::CertificateUpsert => "CERTIFICATE_UPSERT",
            JobType::PrintlogUpsert => "PRINTLOG_UPSERT",
            JobType::SettingsUpsert => "SETTINGS_UPSERT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        JobType::ALL.into_iter().find(|t| t.as_str() == raw)
    }

    /// Remote collection the job's document lives in.
    pub fn collection(self) -> &'static str {
        match self {
            JobType::ResidentUpsert => "residents",
            JobType::BlotterUpsert => "blotter_cases",
            JobType::BusinessUpsert => "businesses",
            JobType::PermitIssuanceUpsert => "permit_issuances",
            JobType::CertificateUpsert => "certificate_issuances",
            JobType::PrintlogUpsert => "print_logs",
            JobType::SettingsUpsert => "settings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Syncing,
    Failed,
    Synced,
    /// Gave up after too many attempts; waits for manual requeue.
    Dead,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Syncing,
        JobStatus::Failed,
        JobStatus::Synced,
        JobStatus::Dead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Syncing => "syncing",
            JobStatus::Failed => "failed",
            JobStatus::Synced => "synced",
            JobStatus::Dead => "dead",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        JobStatus::ALL.into_iter().find(|s| s.as_str() == raw)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::parse(s).ok_or_else(|| format!("unknown job status: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Upsert,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Upsert => "upsert",
            Operation::Delete => "delete",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "upsert" => Some(Operation::Upsert),
            "delete" => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// One row of `sync_outbox`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxJob {
    pub id: String,
    pub job_type: JobType,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: Operation,
    pub payload: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
    pub status: JobStatus,
    pub try_count: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_wire_names_match_serde() {
        for job_type in JobType::ALL {
            let wire = serde_json::to_value(job_type).unwrap();
            assert_eq!(wire, job_type.as_str());
            assert_eq!(JobType::parse(job_type.as_str()), Some(job_type));
        }
    }

    #[test]
    fn every_job_type_has_a_distinct_collection() {
        let mut collections: Vec<_> = JobType::ALL.iter().map(|t| t.collection()).collect();
        collections.sort_unstable();
        collections.dedup();
        assert_eq!(collections.len(), JobType::ALL.len());
    }

    #[test]
    fn status_parses_from_cli_input() {
        assert_eq!("dead".parse::<JobStatus>(), Ok(JobStatus::Dead));
        assert!("done".parse::<JobStatus>().is_err());
    }
}
