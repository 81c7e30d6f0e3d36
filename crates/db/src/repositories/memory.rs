use std::collections::HashMap;

use tokio::sync::RwLock;

use ladder_core::domain::hierarchy::{
    normalize_component, HierarchyDefinition, HierarchyId, HierarchyKey,
};
use ladder_core::domain::request::{RequestId, RequestInstance};
use ladder_core::domain::step::Step;

use super::{merge_history, HierarchyRepository, RepositoryError, RequestRepository};

#[derive(Default)]
pub struct InMemoryHierarchyRepository {
    definitions: RwLock<HashMap<String, HierarchyDefinition>>,
}

#[async_trait::async_trait]
impl HierarchyRepository for InMemoryHierarchyRepository {
    async fn find_by_id(
        &self,
        id: &HierarchyId,
    ) -> Result<Option<HierarchyDefinition>, RepositoryError> {
        let definitions = self.definitions.read().await;
        Ok(definitions.get(&id.0).cloned())
    }

    async fn find_by_key(
        &self,
        key: &HierarchyKey,
    ) -> Result<Option<HierarchyDefinition>, RepositoryError> {
        let storage_key = key.storage_key();
        let definitions = self.definitions.read().await;
        Ok(definitions
            .values()
            .find(|definition| definition.key.storage_key() == storage_key)
            .cloned())
    }

    async fn list_for_department(
        &self,
        department: &str,
    ) -> Result<Vec<HierarchyDefinition>, RepositoryError> {
        let wanted = normalize_component(department);
        let definitions = self.definitions.read().await;
        let mut matching: Vec<HierarchyDefinition> = definitions
            .values()
            .filter(|definition| {
                definition.key.department_key().as_deref() == Some(wanted.as_str())
            })
            .cloned()
            .collect();
        matching.sort_by_key(|definition| definition.key.storage_key());
        Ok(matching)
    }

    async fn save(&self, definition: HierarchyDefinition) -> Result<(), RepositoryError> {
        let storage_key = definition.key.storage_key();
        let mut definitions = self.definitions.write().await;
        let taken = definitions.values().any(|stored| {
            stored.id != definition.id && stored.key.storage_key() == storage_key
        });
        if taken {
            return Err(RepositoryError::Conflict { entity: "hierarchy", id: storage_key });
        }
        definitions.insert(definition.id.0.clone(), definition);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRequestRepository {
    requests: RwLock<HashMap<String, RequestInstance>>,
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<RequestInstance>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }

    async fn save(&self, mut request: RequestInstance) -> Result<u64, RepositoryError> {
        let mut requests = self.requests.write().await;
        let stored_version = requests.get(&request.id.0).map_or(0, |stored| stored.version);
        if stored_version != request.version {
            return Err(RepositoryError::Conflict { entity: "request", id: request.id.0.clone() });
        }
        if let Some(stored) = requests.get(&request.id.0) {
            request.history = merge_history(&stored.history, &request.history);
            request.created_at = stored.created_at;
        }
        request.version += 1;
        let version = request.version;
        requests.insert(request.id.0.clone(), request);
        Ok(version)
    }

    async fn delete(&self, id: &RequestId) -> Result<bool, RepositoryError> {
        let mut requests = self.requests.write().await;
        Ok(requests.remove(&id.0).is_some())
    }

    async fn list_steps(&self, id: &RequestId) -> Result<Vec<Step>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests
            .get(&id.0)
            .map(|request| request.history.steps().to_vec())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use serde_json::json;

    use ladder_core::domain::approver::ApproverRef;
    use ladder_core::domain::hierarchy::{HierarchyId, HierarchyKey, ValueBand};
    use ladder_core::domain::request::{RequestInstance, RequestKind};
    use ladder_core::hierarchy::HierarchyManager;

    use super::{InMemoryHierarchyRepository, InMemoryRequestRepository};
    use crate::repositories::{HierarchyRepository, RepositoryError, RequestRepository};

    #[tokio::test]
    async fn in_memory_hierarchy_lookup_by_key_and_band() {
        let repo = InMemoryHierarchyRepository::default();
        let manager = HierarchyManager::default();
        let band = ValueBand::new(Decimal::ZERO, None).expect("band");
        let capex = manager
            .default_skeleton(
                HierarchyId("H-capex".to_owned()),
                HierarchyKey::department_band("Supply Chain", band),
                Utc::now(),
            )
            .expect("skeleton");
        repo.save(capex.clone()).await.expect("save");

        let found = repo.find_by_key(&capex.key).await.expect("find").expect("present");
        assert_eq!(found.id, capex.id);

        let by_amount = repo
            .find_for_amount("supply chain", Decimal::new(42, 0))
            .await
            .expect("lookup")
            .expect("band");
        assert_eq!(by_amount.id, capex.id);
    }

    #[tokio::test]
    async fn in_memory_request_save_find_delete() {
        let repo = InMemoryRequestRepository::default();
        let request = RequestInstance::draft(
            HierarchyId("H-1".to_owned()),
            RequestKind::JournalVoucher,
            ApproverRef::new("u-req", "Req", "req@corp.example").expect("approver"),
            json!({"amount": 5}),
            Utc::now(),
        );

        let mut request = request;
        request.version = repo.save(request.clone()).await.expect("save");
        assert_eq!(repo.find_by_id(&request.id).await.expect("find"), Some(request.clone()));
        assert!(repo.list_steps(&request.id).await.expect("steps").is_empty());

        assert!(repo.delete(&request.id).await.expect("delete"));
        assert!(repo.find_by_id(&request.id).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn in_memory_request_rejects_stale_versions() {
        let repo = InMemoryRequestRepository::default();
        let mut request = RequestInstance::draft(
            HierarchyId("H-1".to_owned()),
            RequestKind::JournalVoucher,
            ApproverRef::new("u-req", "Req", "req@corp.example").expect("approver"),
            json!({"amount": 5}),
            Utc::now(),
        );
        let fresh_copy = request.clone();

        request.version = repo.save(request.clone()).await.expect("first save");
        assert!(matches!(
            repo.save(fresh_copy).await,
            Err(RepositoryError::Conflict { entity: "request", .. })
        ));

        let stale = request.clone();
        request.payload = json!({"amount": 7});
        assert_eq!(repo.save(request.clone()).await.expect("second save"), 2);
        assert!(matches!(repo.save(stale).await, Err(RepositoryError::Conflict { .. })));

        let stored = repo.find_by_id(&request.id).await.expect("find").expect("present");
        assert_eq!(stored.payload, json!({"amount": 7}));
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn in_memory_hierarchy_rejects_second_id_for_a_key() {
        let repo = InMemoryHierarchyRepository::default();
        let manager = HierarchyManager::default();
        let key = HierarchyKey::import_scope("sea", "local");
        let first = manager
            .default_skeleton(HierarchyId("H-sea-1".to_owned()), key.clone(), Utc::now())
            .expect("skeleton");
        let second = manager
            .default_skeleton(HierarchyId("H-sea-2".to_owned()), key.clone(), Utc::now())
            .expect("skeleton");

        repo.save(first.clone()).await.expect("first save");
        repo.save(first.clone()).await.expect("resave under the same id");
        assert!(matches!(
            repo.save(second).await,
            Err(RepositoryError::Conflict { entity: "hierarchy", .. })
        ));
        assert_eq!(repo.find_by_key(&key).await.expect("find").expect("present").id, first.id);
    }
}
