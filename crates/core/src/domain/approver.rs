use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApproverId(pub String);

impl ApproverId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApproverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single approver shape used everywhere past the API boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverRef {
    pub id: ApproverId,
    pub display_name: String,
    pub email: String,
}

impl ApproverRef {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let id = id.into().trim().to_owned();
        let email = email.into().trim().to_owned();
        if id.is_empty() {
            return Err(ValidationError::InvalidApprover {
                reason: "approver id is required".to_owned(),
            });
        }
        if email.is_empty() || !email.contains('@') {
            return Err(ValidationError::InvalidApprover {
                reason: format!("approver `{id}` has no usable email"),
            });
        }

        let display_name = display_name.into().trim().to_owned();
        let display_name = if display_name.is_empty() { email.clone() } else { display_name };

        Ok(Self { id: ApproverId(id), display_name, email })
    }

    pub fn is(&self, id: &ApproverId) -> bool {
        self.id.0.eq_ignore_ascii_case(&id.0)
    }
}

/// Approver payloads as the upstream directory services send them.
///
/// User-directory records carry `_id`, role assignments carry `userRoleId`.
/// Both are converted with [`ApproverRef::try_from`] and never passed further.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawApprover {
    RoleAssignment {
        #[serde(rename = "userRoleId")]
        user_role_id: String,
        username: String,
        email: String,
    },
    Directory {
        #[serde(rename = "_id")]
        id: String,
        email: String,
        #[serde(default)]
        name: Option<String>,
    },
    Canonical(ApproverRef),
}

impl TryFrom<RawApprover> for ApproverRef {
    type Error = ValidationError;

    fn try_from(raw: RawApprover) -> Result<Self, Self::Error> {
        match raw {
            RawApprover::RoleAssignment { user_role_id, username, email } => {
                ApproverRef::new(user_role_id, username, email)
            }
            RawApprover::Directory { id, email, name } => {
                ApproverRef::new(id, name.unwrap_or_default(), email)
            }
            RawApprover::Canonical(approver) => {
                ApproverRef::new(approver.id.0, approver.display_name, approver.email)
            }
        }
    }
}

pub fn approvers_from_raw(raw: Vec<RawApprover>) -> Result<Vec<ApproverRef>, ValidationError> {
    raw.into_iter().map(ApproverRef::try_from).collect()
}

/// Drops repeated ids while keeping first-seen order.
pub fn dedup_approvers(approvers: Vec<ApproverRef>) -> Vec<ApproverRef> {
    let mut unique: Vec<ApproverRef> = Vec::with_capacity(approvers.len());
    for approver in approvers {
        if !unique.iter().any(|existing| existing.is(&approver.id)) {
            unique.push(approver);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{approvers_from_raw, dedup_approvers, ApproverRef, RawApprover};
    use crate::errors::ValidationError;

    #[test]
    fn directory_shape_converts_and_falls_back_to_email_for_name() {
        let raw: RawApprover =
            serde_json::from_value(json!({"_id": "u-17", "email": "ops@corp.example"}))
                .expect("directory shape parses");

        let approver = ApproverRef::try_from(raw).expect("valid approver");
        assert_eq!(approver.id.as_str(), "u-17");
        assert_eq!(approver.display_name, "ops@corp.example");
    }

    #[test]
    fn role_assignment_shape_converts() {
        let raw: RawApprover = serde_json::from_value(json!({
            "userRoleId": "r-9",
            "username": "Dana Finance",
            "email": "dana@corp.example"
        }))
        .expect("role assignment shape parses");

        let approver = ApproverRef::try_from(raw).expect("valid approver");
        assert_eq!(approver.id.as_str(), "r-9");
        assert_eq!(approver.display_name, "Dana Finance");
    }

    #[test]
    fn rejects_missing_email() {
        let raw = vec![RawApprover::Directory {
            id: "u-1".to_owned(),
            email: "  ".to_owned(),
            name: None,
        }];

        let error = approvers_from_raw(raw).expect_err("empty email is not usable");
        assert!(matches!(error, ValidationError::InvalidApprover { .. }));
    }

    #[test]
    fn dedup_is_case_insensitive_on_id() {
        let first = ApproverRef::new("U-1", "One", "one@corp.example").expect("valid");
        let again = ApproverRef::new("u-1", "One again", "one@corp.example").expect("valid");
        let other = ApproverRef::new("u-2", "Two", "two@corp.example").expect("valid");

        let unique = dedup_approvers(vec![first.clone(), again, other.clone()]);
        assert_eq!(unique, vec![first, other]);
    }
}
