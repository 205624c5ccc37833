use super::StudyStore;
use crate::{Error, Result, types::CancerStudy};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

pub struct InMemoryStudyStore {
    studies: BTreeMap<String, CancerStudy>,
}

impl InMemoryStudyStore {
    pub fn new(studies: impl IntoIterator<Item = CancerStudy>) -> Self {
        let studies = studies
            .into_iter()
            .map(|s| (s.study_id.clone(), s))
            .collect();
        Self { studies }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Load a JSON array of studies.
    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read(path).await?;
        let studies: Vec<CancerStudy> = serde_json::from_slice(&raw).map_err(|e| {
            Error::InvalidInput(format!("invalid studies file {}: {}", path.display(), e))
        })?;
        tracing::info!("loaded {} studies from {:?}", studies.len(), path);
        Ok(Self::new(studies))
    }
}

#[async_trait]
impl StudyStore for InMemoryStudyStore {
    async fn list_studies(&self) -> Result<Vec<CancerStudy>> {
        Ok(self.studies.values().cloned().collect())
    }

    async fn get_study(&self, study_id: &str) -> Result<Option<CancerStudy>> {
        Ok(self.studies.get(study_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_list_is_ordered_by_id() {
        let store = InMemoryStudyStore::new(vec![
            CancerStudy::new("ucec_tcga", "Uterine"),
            CancerStudy::new("acc_tcga", "Adrenocortical"),
        ]);
        let ids: Vec<_> = store
            .list_studies()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.study_id)
            .collect();
        assert_eq!(ids, vec!["acc_tcga", "ucec_tcga"]);
    }

    #[tokio::test]
    async fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"studyId": "study_tcga_pub", "name": "TCGA", "pmid": "123"}}]"#
        )
        .unwrap();

        let store = InMemoryStudyStore::from_json_file(file.path()).await.unwrap();
        let study = store.get_study("study_tcga_pub").await.unwrap().unwrap();
        assert_eq!(study.pmid.as_deref(), Some("123"));
        assert!(store.get_study("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_from_invalid_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let result = InMemoryStudyStore::from_json_file(file.path()).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
