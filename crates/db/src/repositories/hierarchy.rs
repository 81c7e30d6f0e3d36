use sqlx::sqlite::SqliteRow;

use ladder_core::domain::approver::ApproverRef;
use ladder_core::domain::hierarchy::{
    normalize_component, HierarchyDefinition, HierarchyId, HierarchyKey, Level, LevelNumber,
    LevelRule,
};

use super::{
    column, decode_json, encode_json, parse_timestamp, HierarchyRepository, RepositoryError,
};
use crate::DbPool;

const DEFINITION_COLUMNS: &str = "id, kind, storage_key, key_json, created_at, updated_at";

pub struct SqlHierarchyRepository {
    pool: DbPool,
}

impl SqlHierarchyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_levels(&self, id: &HierarchyId) -> Result<Vec<Level>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT level_number, position, approvers_json, enabled, rule_json
             FROM hierarchy_level WHERE hierarchy_id = ? ORDER BY level_number",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_level).collect()
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<HierarchyDefinition, RepositoryError> {
        let id = HierarchyId(column::<String>(row, "id")?);
        let key: HierarchyKey = decode_json(&column::<String>(row, "key_json")?, "hierarchy key")?;
        let levels = self.load_levels(&id).await?;

        Ok(HierarchyDefinition {
            id,
            key,
            levels,
            created_at: parse_timestamp(&column::<String>(row, "created_at")?, "created_at")?,
            updated_at: parse_timestamp(&column::<String>(row, "updated_at")?, "updated_at")?,
        })
    }
}

fn row_to_level(row: &SqliteRow) -> Result<Level, RepositoryError> {
    let number = column::<i64>(row, "level_number")?;
    let number = u32::try_from(number)
        .map_err(|_| RepositoryError::Decode(format!("level_number {number} out of range")))?;
    let approvers: Vec<ApproverRef> =
        decode_json(&column::<String>(row, "approvers_json")?, "level approvers")?;
    let rule: LevelRule = decode_json(&column::<String>(row, "rule_json")?, "level rule")?;

    Ok(Level {
        number: LevelNumber(number),
        position: column(row, "position")?,
        approvers,
        enabled: column::<i64>(row, "enabled")? != 0,
        rule,
    })
}

#[async_trait::async_trait]
impl HierarchyRepository for SqlHierarchyRepository {
    async fn find_by_id(
        &self,
        id: &HierarchyId,
    ) -> Result<Option<HierarchyDefinition>, RepositoryError> {
        let query = format!("SELECT {DEFINITION_COLUMNS} FROM hierarchy_definition WHERE id = ?");
        let row = sqlx::query(&query).bind(&id.0).fetch_optional(&self.pool).await?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_key(
        &self,
        key: &HierarchyKey,
    ) -> Result<Option<HierarchyDefinition>, RepositoryError> {
        let query =
            format!("SELECT {DEFINITION_COLUMNS} FROM hierarchy_definition WHERE storage_key = ?");
        let row = sqlx::query(&query).bind(key.storage_key()).fetch_optional(&self.pool).await?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_for_department(
        &self,
        department: &str,
    ) -> Result<Vec<HierarchyDefinition>, RepositoryError> {
        let query = format!(
            "SELECT {DEFINITION_COLUMNS} FROM hierarchy_definition
             WHERE kind = 'capex' AND department = ? ORDER BY storage_key"
        );
        let rows = sqlx::query(&query)
            .bind(normalize_component(department))
            .fetch_all(&self.pool)
            .await?;

        let mut definitions = Vec::with_capacity(rows.len());
        for row in &rows {
            definitions.push(self.hydrate(row).await?);
        }
        Ok(definitions)
    }

    async fn save(&self, definition: HierarchyDefinition) -> Result<(), RepositoryError> {
        let key_json = encode_json(&definition.key, "hierarchy key")?;
        let storage_key = definition.key.storage_key();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO hierarchy_definition
                 (id, kind, storage_key, key_json, department, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 kind = excluded.kind,
                 storage_key = excluded.storage_key,
                 key_json = excluded.key_json,
                 department = excluded.department,
                 updated_at = excluded.updated_at",
        )
        .bind(&definition.id.0)
        .bind(definition.key.kind())
        .bind(&storage_key)
        .bind(&key_json)
        .bind(definition.key.department_key())
        .bind(definition.created_at.to_rfc3339())
        .bind(definition.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|error| RepositoryError::from_write(error, "hierarchy", &storage_key))?;

        for level in &definition.levels {
            sqlx::query(
                "INSERT INTO hierarchy_level
                     (hierarchy_id, level_number, position, approvers_json, enabled, rule_json)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(hierarchy_id, level_number) DO UPDATE SET
                     position = excluded.position,
                     approvers_json = excluded.approvers_json,
                     enabled = excluded.enabled,
                     rule_json = excluded.rule_json",
            )
            .bind(&definition.id.0)
            .bind(i64::from(level.number.0))
            .bind(&level.position)
            .bind(encode_json(&level.approvers, "level approvers")?)
            .bind(i64::from(level.enabled))
            .bind(encode_json(&level.rule, "level rule")?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
