//! Domain types shared by the services, the store and the routes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Legal form code Enhetsregisteret and Altinn use for municipalities
pub const KOMMUNE_ORGANISASJONSFORM: &str = "KOMM";

/// An agreement between the service and one municipality.
///
/// At most one current agreement exists per `orgnr`; a new upsert replaces
/// the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Avtale {
    pub id: Uuid,
    pub orgnr: String,
    /// Display name of the organization
    pub navn: String,
    /// Full name of the person who signed
    pub navn_innsender: String,
    /// Template version, `None` until a template has been published
    pub avtaleversjon: Option<String>,
    pub er_signert: bool,
    pub opprettet: DateTime<Utc>,
}

/// A submitted signing job waiting for completion.
///
/// One per organization; a new submission replaces the old one.
#[derive(Debug, Clone, PartialEq)]
pub struct DigipostJobbData {
    pub orgnr: String,
    /// Organization display name at submission time
    pub navn: String,
    /// Job reference issued by the signature provider
    pub direct_job_reference: String,
    /// Where the job status is polled
    pub status_url: String,
    /// Supplied by the provider's callback, absent until then
    pub status_query_token: Option<String>,
    pub navn_innsender: String,
    pub avtaleversjon: Option<String>,
    /// When the job was submitted
    pub opprettet: DateTime<Utc>,
}

/// An organization the user holds delegated rights for, as reported by Altinn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Avgiver {
    #[serde(rename = "Name")]
    pub navn: String,
    #[serde(rename = "OrganizationNumber")]
    pub orgnr: String,
    #[serde(rename = "OrganizationForm", default)]
    pub organisasjonsform: String,
    #[serde(
        rename = "ParentOrganizationNumber",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_orgnr: Option<String>,
}

/// A municipality the user may sign for, merged with its current agreement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KommuneAvtale {
    pub orgnr: String,
    pub navn: String,
    pub er_signert: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avtaleversjon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navn_innsender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opprettet: Option<DateTime<Utc>>,
}

impl KommuneAvtale {
    pub fn new(avgiver: &Avgiver, avtale: Option<&Avtale>) -> Self {
        Self {
            orgnr: avgiver.orgnr.clone(),
            navn: avgiver.navn.clone(),
            er_signert: avtale.map(|a| a.er_signert).unwrap_or(false),
            avtaleversjon: avtale.and_then(|a| a.avtaleversjon.clone()),
            navn_innsender: avtale.map(|a| a.navn_innsender.clone()),
            opprettet: avtale.map(|a| a.opprettet),
        }
    }
}

impl Avgiver {
    pub fn is_kommune(&self) -> bool {
        self.organisasjonsform == KOMMUNE_ORGANISASJONSFORM
    }
}

/// Organization metadata from Enhetsregisteret
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kommune {
    pub orgnr: String,
    pub navn: String,
    pub organisasjonsform: String,
}

impl Kommune {
    pub fn is_kommune(&self) -> bool {
        self.organisasjonsform == KOMMUNE_ORGANISASJONSFORM
    }
}

/// Outcome of a lookup where absence is a valid answer.
///
/// Errors travel in the surrounding `Result`; `NotFound` is never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avgiver_parses_altinn_reportee() {
        let json = r#"{
            "Name": "OSLO KOMMUNE",
            "Type": "Enterprise",
            "OrganizationNumber": "456313701",
            "OrganizationForm": "KOMM",
            "Status": "Active"
        }"#;
        let avgiver: Avgiver = serde_json::from_str(json).unwrap();
        assert_eq!(avgiver.orgnr, "456313701");
        assert!(avgiver.is_kommune());
        assert_eq!(avgiver.parent_orgnr, None);
    }

    #[test]
    fn test_non_municipal_form_is_not_kommune() {
        let kommune = Kommune {
            orgnr: "123456789".into(),
            navn: "Aksjeselskap AS".into(),
            organisasjonsform: "AS".into(),
        };
        assert!(!kommune.is_kommune());
    }

    #[test]
    fn test_lookup_into_option() {
        assert_eq!(Lookup::Found(3).into_option(), Some(3));
        assert_eq!(Lookup::<u8>::NotFound.into_option(), None);
        assert!(!Lookup::<u8>::NotFound.is_found());
    }
}
