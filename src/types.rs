use serde::{Deserialize, Serialize};

/// Curated cancer study metadata as served by `/api/studies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancerStudy {
    pub study_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancer_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
}

impl CancerStudy {
    pub fn new(study_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            study_id: study_id.into(),
            name: name.into(),
            description: None,
            cancer_type_id: None,
            citation: None,
            pmid: None,
            short_name: None,
        }
    }
}

/// Public service description (`/api/info`).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalInfo {
    pub name: String,
    pub version: String,
    pub authenticate: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_study_serializes_camel_case() {
        let mut study = CancerStudy::new("brca_tcga_pub", "Breast Invasive Carcinoma");
        study.cancer_type_id = Some("brca".to_string());
        let json = serde_json::to_value(&study).unwrap();
        assert_eq!(json["studyId"], "brca_tcga_pub");
        assert_eq!(json["cancerTypeId"], "brca");
        assert!(json.get("pmid").is_none());
    }

    #[test]
    fn test_study_deserializes_with_optional_fields_missing() {
        let study: CancerStudy =
            serde_json::from_str(r#"{"studyId": "acc_tcga", "name": "Adrenocortical"}"#).unwrap();
        assert_eq!(study.study_id, "acc_tcga");
        assert!(study.description.is_none());
    }
}
