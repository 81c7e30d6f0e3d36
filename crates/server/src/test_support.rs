use std::sync::Mutex;

use ladder_core::domain::request::{RequestId, RequestInstance};
use ladder_core::domain::step::Step;
use ladder_db::{InMemoryRequestRepository, RepositoryError, RequestRepository};

/// Request store whose reads can be pinned to an older copy, the way a
/// handler that read just before a competing write would see it.
#[derive(Default)]
pub struct PinnedReads {
    inner: InMemoryRequestRepository,
    pinned: Mutex<Option<RequestInstance>>,
}

impl PinnedReads {
    /// Serves the currently stored copy of `id` from every later read.
    pub async fn pin(&self, id: &RequestId) {
        let current = self.inner.find_by_id(id).await.expect("find");
        *self.pinned.lock().expect("pin lock") = current;
    }

    pub async fn stored(&self, id: &RequestId) -> RequestInstance {
        self.inner.find_by_id(id).await.expect("find").expect("stored request")
    }
}

#[async_trait::async_trait]
impl RequestRepository for PinnedReads {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<RequestInstance>, RepositoryError> {
        let pinned = self.pinned.lock().expect("pin lock").clone();
        match pinned {
            Some(request) if &request.id == id => Ok(Some(request)),
            _ => self.inner.find_by_id(id).await,
        }
    }

    async fn save(&self, request: RequestInstance) -> Result<u64, RepositoryError> {
        self.inner.save(request).await
    }

    async fn delete(&self, id: &RequestId) -> Result<bool, RepositoryError> {
        self.inner.delete(id).await
    }

    async fn list_steps(&self, id: &RequestId) -> Result<Vec<Step>, RepositoryError> {
        self.inner.list_steps(id).await
    }
}
