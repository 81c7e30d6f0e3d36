//! Edits to a hierarchy definition.
//!
//! Every operation validates against a scratch copy first and only then
//! touches the definition, so a rejected edit leaves it unchanged.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approver::{dedup_approvers, ApproverRef};
use crate::domain::hierarchy::{
    HierarchyDefinition, HierarchyId, HierarchyKey, Level, LevelNumber, LevelRule,
};
use crate::errors::ValidationError;

pub const MAX_LEVELS: u32 = 10;
pub const DEFAULT_SKELETON_LEVELS: u32 = 5;

/// First half of the two-step enable/disable flow. Nothing changes until it
/// is handed back to [`HierarchyManager::confirm_level_toggle`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelToggle {
    pub hierarchy_id: HierarchyId,
    pub level: LevelNumber,
    pub enabled: bool,
    pub prompt: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum LevelChange {
    ApproversReplaced { level: LevelNumber, approvers: usize, enabled: bool },
    Toggled { level: LevelNumber, enabled: bool, changed: bool },
    ConditionSet { level: LevelNumber, conditional: bool },
    LevelAdded { level: LevelNumber },
}

impl LevelChange {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::ApproversReplaced { .. } => "hierarchy.approvers_replaced",
            Self::Toggled { .. } => "hierarchy.level_toggled",
            Self::ConditionSet { .. } => "hierarchy.condition_set",
            Self::LevelAdded { .. } => "hierarchy.level_added",
        }
    }

    pub fn level(&self) -> LevelNumber {
        match self {
            Self::ApproversReplaced { level, .. }
            | Self::Toggled { level, .. }
            | Self::ConditionSet { level, .. }
            | Self::LevelAdded { level } => *level,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HierarchyManager {
    skeleton_levels: u32,
}

impl Default for HierarchyManager {
    fn default() -> Self {
        Self { skeleton_levels: DEFAULT_SKELETON_LEVELS }
    }
}

impl HierarchyManager {
    pub fn new(skeleton_levels: u32) -> Result<Self, ValidationError> {
        if !(1..=MAX_LEVELS).contains(&skeleton_levels) {
            return Err(ValidationError::InvalidSkeletonSize {
                requested: skeleton_levels,
                max: MAX_LEVELS,
            });
        }
        Ok(Self { skeleton_levels })
    }

    pub fn skeleton_levels(&self) -> u32 {
        self.skeleton_levels
    }

    /// A fresh hierarchy with `Level 1..=N`, all disabled and unstaffed.
    pub fn default_skeleton(
        &self,
        id: HierarchyId,
        key: HierarchyKey,
        now: DateTime<Utc>,
    ) -> Result<HierarchyDefinition, ValidationError> {
        key.validate()?;
        let levels = (1..=self.skeleton_levels)
            .map(|number| Level::placeholder(LevelNumber(number)))
            .collect();
        Ok(HierarchyDefinition { id, key, levels, created_at: now, updated_at: now })
    }

    /// Replaces a level's approver set. `enabled` optionally flips the level
    /// in the same save; an enabled level may not end up empty.
    pub fn set_level_approvers(
        &self,
        definition: &mut HierarchyDefinition,
        level: LevelNumber,
        approvers: Vec<ApproverRef>,
        enabled: Option<bool>,
        now: DateTime<Utc>,
    ) -> Result<LevelChange, ValidationError> {
        let current = editable_level(definition, level)?;
        let approvers = dedup_approvers(approvers);
        let enabled = enabled.unwrap_or(current.enabled);
        if enabled && approvers.is_empty() {
            return Err(ValidationError::EmptyApproverSet { level });
        }

        let count = approvers.len();
        let target = editable_level_mut(definition, level)?;
        target.approvers = approvers;
        target.enabled = enabled;
        definition.updated_at = now;

        Ok(LevelChange::ApproversReplaced { level, approvers: count, enabled })
    }

    pub fn request_level_toggle(
        &self,
        definition: &HierarchyDefinition,
        level: LevelNumber,
        enabled: bool,
    ) -> Result<LevelToggle, ValidationError> {
        let current = editable_level(definition, level)?;
        if enabled && !current.has_approvers() {
            return Err(ValidationError::EmptyApproverSet { level });
        }

        let verb = if enabled { "enable" } else { "disable" };
        Ok(LevelToggle {
            hierarchy_id: definition.id.clone(),
            level,
            enabled,
            prompt: format!("Are you sure you want to {verb} {}?", current.position),
        })
    }

    /// Applies a confirmed toggle. Confirming the same toggle twice is a no-op.
    pub fn confirm_level_toggle(
        &self,
        definition: &mut HierarchyDefinition,
        toggle: &LevelToggle,
        now: DateTime<Utc>,
    ) -> Result<LevelChange, ValidationError> {
        if toggle.hierarchy_id != definition.id {
            return Err(ValidationError::InvalidKey {
                reason: format!(
                    "toggle was issued for hierarchy `{}`, not `{}`",
                    toggle.hierarchy_id, definition.id
                ),
            });
        }
        let current = editable_level(definition, toggle.level)?;
        if current.enabled == toggle.enabled {
            return Ok(LevelChange::Toggled {
                level: toggle.level,
                enabled: toggle.enabled,
                changed: false,
            });
        }
        if toggle.enabled && !current.has_approvers() {
            return Err(ValidationError::EmptyApproverSet { level: toggle.level });
        }

        editable_level_mut(definition, toggle.level)?.enabled = toggle.enabled;
        definition.updated_at = now;
        Ok(LevelChange::Toggled { level: toggle.level, enabled: toggle.enabled, changed: true })
    }

    pub fn set_level_condition(
        &self,
        definition: &mut HierarchyDefinition,
        level: LevelNumber,
        rule: LevelRule,
        now: DateTime<Utc>,
    ) -> Result<LevelChange, ValidationError> {
        editable_level(definition, level)?;
        if let LevelRule::Conditional { predicate } = &rule {
            predicate.validate()?;
        }

        let conditional = rule.is_conditional();
        editable_level_mut(definition, level)?.rule = rule;
        definition.updated_at = now;
        Ok(LevelChange::ConditionSet { level, conditional })
    }

    /// Appends a disabled level after the highest one. Levels are never
    /// removed; disabling takes their place.
    pub fn add_level(
        &self,
        definition: &mut HierarchyDefinition,
        position: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<LevelChange, ValidationError> {
        let number = definition.highest_level().next();
        if number.0 > MAX_LEVELS {
            return Err(ValidationError::InvalidSkeletonSize {
                requested: number.0,
                max: MAX_LEVELS,
            });
        }

        let mut level = Level::placeholder(number);
        let position = position.map(|raw| raw.trim().to_owned()).filter(|raw| !raw.is_empty());
        if let Some(position) = position {
            level.position = position;
        }
        definition.levels.push(level);
        definition.updated_at = now;
        Ok(LevelChange::LevelAdded { level: number })
    }
}

/// Picks the CAPEX hierarchy whose band holds `amount`. When bands overlap
/// the one with the highest minimum wins.
pub fn select_band<'a>(
    definitions: &'a [HierarchyDefinition],
    department: &str,
    amount: Decimal,
) -> Option<&'a HierarchyDefinition> {
    definitions
        .iter()
        .filter(|definition| definition.key.matches_amount(department, amount))
        .max_by_key(|definition| match &definition.key {
            HierarchyKey::DepartmentBand { band, .. } => band.min,
            HierarchyKey::ImportScope { .. } => Decimal::MIN,
        })
}

fn editable_level(
    definition: &HierarchyDefinition,
    level: LevelNumber,
) -> Result<&Level, ValidationError> {
    if level.is_requester() {
        return Err(ValidationError::ReservedLevel);
    }
    definition.level(level).ok_or(ValidationError::UnknownLevel { level })
}

fn editable_level_mut(
    definition: &mut HierarchyDefinition,
    level: LevelNumber,
) -> Result<&mut Level, ValidationError> {
    if level.is_requester() {
        return Err(ValidationError::ReservedLevel);
    }
    definition.level_mut(level).ok_or(ValidationError::UnknownLevel { level })
}
