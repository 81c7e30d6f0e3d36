use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use ladder_core::domain::approver::{ApproverId, ApproverRef};
use secrecy::SecretString;

use crate::error::ClientError;

/// Directory lists kept per session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectoryList {
    Approvers,
    Departments,
}

/// Approver and department lists fetched once and reused until a list is
/// explicitly invalidated.
#[derive(Debug, Default)]
pub struct DirectoryCache {
    approvers: Mutex<Option<Vec<ApproverRef>>>,
    departments: Mutex<Option<Vec<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl DirectoryCache {
    pub fn approvers(&self) -> Option<Vec<ApproverRef>> {
        lock(&self.approvers).clone()
    }

    pub fn store_approvers(&self, approvers: Vec<ApproverRef>) {
        *lock(&self.approvers) = Some(approvers);
    }

    pub fn departments(&self) -> Option<Vec<String>> {
        lock(&self.departments).clone()
    }

    pub fn store_departments(&self, departments: Vec<String>) {
        *lock(&self.departments) = Some(departments);
    }

    pub fn invalidate(&self, list: DirectoryList) {
        match list {
            DirectoryList::Approvers => *lock(&self.approvers) = None,
            DirectoryList::Departments => *lock(&self.departments) = None,
        }
    }

    pub fn invalidate_all(&self) {
        self.invalidate(DirectoryList::Approvers);
        self.invalidate(DirectoryList::Departments);
    }
}

/// Identity, roles and bearer token of the signed-in user. Built once at
/// login and shared by reference; after [`Session::logout`] every client
/// holding it fails with [`ClientError::SessionInvalidated`].
pub struct Session {
    user: ApproverRef,
    roles: Vec<String>,
    token: SecretString,
    active_tab: Mutex<Option<String>>,
    directory: DirectoryCache,
    active: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user.id)
            .field("roles", &self.roles)
            .field("token", &"[REDACTED]")
            .field("active", &self.is_active())
            .finish()
    }
}

impl Session {
    pub fn login(user: ApproverRef, roles: Vec<String>, token: SecretString) -> Self {
        let roles = roles
            .into_iter()
            .map(|role| role.trim().to_owned())
            .filter(|role| !role.is_empty())
            .collect();
        Self {
            user,
            roles,
            token,
            active_tab: Mutex::new(None),
            directory: DirectoryCache::default(),
            active: AtomicBool::new(true),
        }
    }

    pub fn user(&self) -> &ApproverRef {
        &self.user
    }

    pub fn actor(&self) -> &ApproverId {
        &self.user.id
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|held| held.eq_ignore_ascii_case(role.trim()))
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn token(&self) -> Result<&SecretString, ClientError> {
        if !self.is_active() {
            return Err(ClientError::SessionInvalidated);
        }
        Ok(&self.token)
    }

    pub fn directory(&self) -> &DirectoryCache {
        &self.directory
    }

    pub fn active_tab(&self) -> Option<String> {
        lock(&self.active_tab).clone()
    }

    /// Records a tab change. Moving to a different tab drops the list that
    /// tab depends on so it is refetched; returns whether the tab changed.
    pub fn switch_tab(&self, tab: &str, refreshes: DirectoryList) -> bool {
        let mut current = lock(&self.active_tab);
        if current.as_deref() == Some(tab) {
            return false;
        }
        *current = Some(tab.to_owned());
        self.directory.invalidate(refreshes);
        true
    }

    pub fn logout(&self) {
        self.active.store(false, Ordering::Release);
        self.directory.invalidate_all();
        *lock(&self.active_tab) = None;
    }
}

#[cfg(test)]
mod tests {
    use ladder_core::domain::approver::ApproverRef;
    use secrecy::{ExposeSecret, SecretString};

    use super::{DirectoryList, Session};
    use crate::error::ClientError;

    fn session() -> Session {
        Session::login(
            ApproverRef::new("u-7", "Anita", "anita@corp.example").expect("approver"),
            vec!["Approver".to_owned(), " ".to_owned(), "HierarchyAdmin".to_owned()],
            SecretString::from("token-123".to_owned()),
        )
    }

    #[test]
    fn login_keeps_identity_and_roles() {
        let session = session();

        assert_eq!(session.actor().as_str(), "u-7");
        assert_eq!(session.roles().len(), 2);
        assert!(session.has_role("hierarchyadmin"));
        assert_eq!(session.token().expect("active").expose_secret(), "token-123");
    }

    #[test]
    fn debug_output_redacts_token() {
        let rendered = format!("{:?}", session());
        assert!(!rendered.contains("token-123"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn tab_change_invalidates_only_the_named_list() {
        let session = session();
        let approver = ApproverRef::new("u-1", "Ops", "ops@corp.example").expect("approver");
        session.directory().store_approvers(vec![approver]);
        session.directory().store_departments(vec!["Finance".to_owned()]);

        assert!(session.switch_tab("capex", DirectoryList::Approvers));
        assert!(session.directory().approvers().is_none());
        assert_eq!(session.directory().departments(), Some(vec!["Finance".to_owned()]));

        assert!(!session.switch_tab("capex", DirectoryList::Departments));
        assert!(session.directory().departments().is_some());
    }

    #[test]
    fn logout_invalidates_token_and_cache() {
        let session = session();
        session.directory().store_departments(vec!["Finance".to_owned()]);

        session.logout();

        assert!(!session.is_active());
        assert!(matches!(session.token(), Err(ClientError::SessionInvalidated)));
        assert!(session.directory().departments().is_none());
        assert_eq!(session.active_tab(), None);
    }
}
