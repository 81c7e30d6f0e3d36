use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conditions::Predicate;
use crate::domain::approver::ApproverRef;
use crate::errors::ValidationError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HierarchyId(pub String);

impl HierarchyId {
    pub fn generate() -> Self {
        Self(format!("HIER-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for HierarchyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rank in a hierarchy. Level 0 is the requester and is never an editable level.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct LevelNumber(pub u32);

impl LevelNumber {
    pub const REQUESTER: LevelNumber = LevelNumber(0);

    pub fn is_requester(self) -> bool {
        self == Self::REQUESTER
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for LevelNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Half-open amount band `[min, max)`; an absent `max` is unbounded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueBand {
    pub min: Decimal,
    pub max: Option<Decimal>,
}

impl ValueBand {
    pub fn new(min: Decimal, max: Option<Decimal>) -> Result<Self, ValidationError> {
        if min < Decimal::ZERO {
            return Err(ValidationError::InvalidKey {
                reason: "value band minimum cannot be negative".to_owned(),
            });
        }
        if let Some(max) = max {
            if max <= min {
                return Err(ValidationError::InvalidKey {
                    reason: format!("value band maximum {max} must exceed minimum {min}"),
                });
            }
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, amount: Decimal) -> bool {
        amount >= self.min && self.max.map_or(true, |max| amount < max)
    }
}

/// The dimension a hierarchy is configured for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HierarchyKey {
    ImportScope { import_type: String, scope: String },
    DepartmentBand { department: String, band: ValueBand },
}

impl HierarchyKey {
    pub fn import_scope(import_type: impl Into<String>, scope: impl Into<String>) -> Self {
        Self::ImportScope { import_type: import_type.into(), scope: scope.into() }
    }

    pub fn department_band(department: impl Into<String>, band: ValueBand) -> Self {
        Self::DepartmentBand { department: department.into(), band }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ImportScope { .. } => "import",
            Self::DepartmentBand { .. } => "capex",
        }
    }

    /// Canonical form used for uniqueness in storage.
    pub fn storage_key(&self) -> String {
        match self {
            Self::ImportScope { import_type, scope } => {
                let (import_type, scope) =
                    (normalize_component(import_type), normalize_component(scope));
                format!("import:{import_type}:{scope}")
            }
            Self::DepartmentBand { department, band } => {
                let max =
                    band.max.map_or_else(|| "*".to_owned(), |max| max.normalize().to_string());
                let department = normalize_component(department);
                format!("capex:{department}:{}..{max}", band.min.normalize())
            }
        }
    }

    /// Department in its stored, normalized form.
    pub fn department_key(&self) -> Option<String> {
        match self {
            Self::DepartmentBand { department, .. } => Some(normalize_component(department)),
            Self::ImportScope { .. } => None,
        }
    }

    pub fn matches_amount(&self, department: &str, amount: Decimal) -> bool {
        match self {
            Self::DepartmentBand { department: own, band } => {
                normalize_component(own) == normalize_component(department) && band.contains(amount)
            }
            Self::ImportScope { .. } => false,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let missing = match self {
            Self::ImportScope { import_type, scope } => {
                import_type.trim().is_empty() || scope.trim().is_empty()
            }
            Self::DepartmentBand { department, .. } => department.trim().is_empty(),
        };
        if missing {
            return Err(ValidationError::InvalidKey {
                reason: format!("{} hierarchy key has empty components", self.kind()),
            });
        }
        if let Self::DepartmentBand { band, .. } = self {
            ValueBand::new(band.min, band.max)?;
        }
        Ok(())
    }
}

/// Lowercased, trimmed, inner whitespace folded to `_`.
pub fn normalize_component(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace(char::is_whitespace, "_")
}

/// Replaces the independent `conditionEnabled` + `condition` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LevelRule {
    #[default]
    NoCondition,
    Conditional { predicate: Predicate },
}

impl LevelRule {
    pub fn is_conditional(&self) -> bool {
        matches!(self, Self::Conditional { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub number: LevelNumber,
    pub position: String,
    pub approvers: Vec<ApproverRef>,
    pub enabled: bool,
    #[serde(default)]
    pub rule: LevelRule,
}

impl Level {
    pub fn placeholder(number: LevelNumber) -> Self {
        Self {
            number,
            position: format!("Level {number}"),
            approvers: Vec::new(),
            enabled: false,
            rule: LevelRule::NoCondition,
        }
    }

    pub fn has_approvers(&self) -> bool {
        !self.approvers.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyDefinition {
    pub id: HierarchyId,
    pub key: HierarchyKey,
    pub levels: Vec<Level>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HierarchyDefinition {
    pub fn level(&self, number: LevelNumber) -> Option<&Level> {
        self.levels.iter().find(|level| level.number == number)
    }

    pub fn level_mut(&mut self, number: LevelNumber) -> Option<&mut Level> {
        self.levels.iter_mut().find(|level| level.number == number)
    }

    pub fn highest_level(&self) -> LevelNumber {
        self.levels.iter().map(|level| level.number).max().unwrap_or(LevelNumber::REQUESTER)
    }

    /// Checks numbering plus the per-level invariants required before a
    /// hierarchy can route requests.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.key.validate()?;
        validate_numbering(&self.levels)?;

        for level in &self.levels {
            if level.enabled && !level.has_approvers() {
                return Err(ValidationError::EmptyApproverSet { level: level.number });
            }
            if let LevelRule::Conditional { predicate } = &level.rule {
                predicate.validate()?;
            }
        }

        Ok(())
    }

    pub fn snapshot(&self, taken_at: DateTime<Utc>) -> HierarchySnapshot {
        HierarchySnapshot {
            hierarchy_id: self.id.clone(),
            levels: self.levels.clone(),
            taken_at,
        }
    }
}

/// By-value copy of a hierarchy's levels taken when a request is submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchySnapshot {
    pub hierarchy_id: HierarchyId,
    pub levels: Vec<Level>,
    pub taken_at: DateTime<Utc>,
}

impl HierarchySnapshot {
    pub fn level(&self, number: LevelNumber) -> Option<&Level> {
        self.levels.iter().find(|level| level.number == number)
    }

    /// Levels above `current`, ascending.
    pub fn levels_after(&self, current: LevelNumber) -> Vec<&Level> {
        let mut later: Vec<&Level> =
            self.levels.iter().filter(|level| level.number > current).collect();
        later.sort_by_key(|level| level.number);
        later
    }
}

pub fn validate_numbering(levels: &[Level]) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(levels.len());
    for level in levels {
        if level.number.is_requester() {
            return Err(ValidationError::ReservedLevel);
        }
        if !seen.insert(level.number) {
            return Err(ValidationError::DuplicateLevel { level: level.number });
        }
    }

    let mut numbers: Vec<u32> = seen.into_iter().map(|number| number.0).collect();
    numbers.sort_unstable();
    for (index, number) in numbers.iter().enumerate() {
        let expected = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);
        if *number != expected {
            return Err(ValidationError::NonContiguousLevels {
                expected: LevelNumber(expected),
                found: LevelNumber(*number),
            });
        }
    }

    Ok(())
}
