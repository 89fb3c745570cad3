// ABOUTME: SQLite-backed model storage with version-checked updates for mutable entities
// ABOUTME: Exposes per-entity collections (get, get_by_name, list, put, update, refresh)

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::error::{Result, StorageError};
use super::StorageDescriptor;
use crate::model::{
    Deployment, Execution, ExecutionStatus, Node, NodeInstance, Properties, Relationship,
    RelationshipInstance, TaskRecord, Topology, TopologyDocument,
};

pub const SQLITE_API: &str = "sqlite";

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CONNECTIONS: u32 = 4;

/// Handle to the entity model of one store
///
/// Cloning shares the underlying connection pool; opening from the same
/// descriptor in another process yields an independent handle to the same data.
#[derive(Debug, Clone)]
pub struct ModelStorage {
    pool: SqlitePool,
    descriptor: StorageDescriptor,
}

impl ModelStorage {
    /// Open a model storage handle for the given api and connection parameters
    pub async fn open(api: &str, connection: &Properties) -> Result<Self> {
        let descriptor = StorageDescriptor::new(api, connection.clone());
        match api {
            SQLITE_API => Self::open_sqlite(descriptor).await,
            other => Err(StorageError::UnknownApi(other.to_string())),
        }
    }

    pub async fn open_descriptor(descriptor: &StorageDescriptor) -> Result<Self> {
        Self::open(&descriptor.api, &descriptor.connection).await
    }

    /// Open (creating if needed) a SQLite database file
    pub async fn sqlite(path: impl AsRef<Path>) -> Result<Self> {
        let mut connection = Properties::new();
        connection.insert(
            "path".to_string(),
            json!(path.as_ref().to_string_lossy()),
        );
        Self::open(SQLITE_API, &connection).await
    }

    async fn open_sqlite(descriptor: StorageDescriptor) -> Result<Self> {
        let path = descriptor.required_str("path")?.to_string();

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let storage = Self { pool, descriptor };
        storage.init_schema().await?;

        debug!("Model storage ready: sqlite {}", path);
        Ok(storage)
    }

    pub fn descriptor(&self) -> &StorageDescriptor {
        &self.descriptor
    }

    pub fn api(&self) -> &str {
        &self.descriptor.api
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create tables if missing; safe to run from several processes
    async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS deployments (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                deployment_id TEXT NOT NULL,
                type_name TEXT NOT NULL,
                type_hierarchy TEXT NOT NULL,
                operations TEXT NOT NULL,
                plugins TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS node_instances (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                node_id TEXT NOT NULL,
                deployment_id TEXT NOT NULL,
                state TEXT NOT NULL,
                runtime_properties TEXT NOT NULL,
                version INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS relationships (
                id TEXT PRIMARY KEY,
                deployment_id TEXT NOT NULL,
                type_name TEXT NOT NULL,
                source_node_id TEXT NOT NULL,
                target_node_id TEXT NOT NULL,
                source_operations TEXT NOT NULL,
                target_operations TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS relationship_instances (
                id TEXT PRIMARY KEY,
                relationship_id TEXT NOT NULL,
                deployment_id TEXT NOT NULL,
                source_instance_id TEXT NOT NULL,
                target_instance_id TEXT NOT NULL,
                runtime_properties TEXT NOT NULL,
                version INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                deployment_id TEXT NOT NULL,
                workflow_name TEXT NOT NULL,
                status TEXT NOT NULL,
                parameters TEXT NOT NULL,
                created_at TEXT NOT NULL,
                ended_at TEXT,
                error TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                execution_id TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                operation_mapping TEXT NOT NULL,
                runs_on TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts_count INTEGER NOT NULL,
                max_attempts INTEGER,
                retry_interval_ms INTEGER NOT NULL,
                ignore_failure INTEGER NOT NULL,
                started_at TEXT,
                ended_at TEXT,
                error TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_node_instances_name ON node_instances(name)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_execution ON tasks(execution_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    pub fn deployments(&self) -> Deployments<'_> {
        Deployments { pool: &self.pool }
    }

    pub fn nodes(&self) -> Nodes<'_> {
        Nodes { pool: &self.pool }
    }

    pub fn node_instances(&self) -> NodeInstances<'_> {
        NodeInstances { pool: &self.pool }
    }

    pub fn relationships(&self) -> Relationships<'_> {
        Relationships { pool: &self.pool }
    }

    pub fn relationship_instances(&self) -> RelationshipInstances<'_> {
        RelationshipInstances { pool: &self.pool }
    }

    pub fn executions(&self) -> Executions<'_> {
        Executions { pool: &self.pool }
    }

    pub fn tasks(&self) -> Tasks<'_> {
        Tasks { pool: &self.pool }
    }

    /// Load a snapshot of everything stored for one deployment
    pub async fn topology(&self, deployment_id: &str) -> Result<Topology> {
        Ok(Topology {
            nodes: self.nodes().list_for_deployment(deployment_id).await?,
            node_instances: self
                .node_instances()
                .list_for_deployment(deployment_id)
                .await?,
            relationships: self
                .relationships()
                .list_for_deployment(deployment_id)
                .await?,
            relationship_instances: self
                .relationship_instances()
                .list_for_deployment(deployment_id)
                .await?,
        })
    }

    /// Store a deployment and its topology, stamping every entity with the deployment id
    pub async fn put_topology(&self, document: &TopologyDocument) -> Result<Deployment> {
        let deployment = document.deployment.clone();
        self.deployments().put(&deployment).await?;

        for node in &document.topology.nodes {
            let mut node = node.clone();
            node.deployment_id = deployment.id.clone();
            self.nodes().put(&node).await?;
        }
        for instance in &document.topology.node_instances {
            let mut instance = instance.clone();
            instance.deployment_id = deployment.id.clone();
            self.node_instances().put(&instance).await?;
        }
        for relationship in &document.topology.relationships {
            let mut relationship = relationship.clone();
            relationship.deployment_id = deployment.id.clone();
            self.relationships().put(&relationship).await?;
        }
        for instance in &document.topology.relationship_instances {
            let mut instance = instance.clone();
            instance.deployment_id = deployment.id.clone();
            self.relationship_instances().put(&instance).await?;
        }

        debug!(
            "Stored topology for deployment {}: {} node instances",
            deployment.name,
            document.topology.node_instances.len()
        );
        Ok(deployment)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn json_column<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}

fn timestamp_column(
    row: &SqliteRow,
    column: &str,
    entity: &'static str,
) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| {
        DateTime::parse_from_rfc3339(&value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StorageError::CorruptRecord {
                entity,
                id: row.try_get("id").unwrap_or_default(),
                reason: format!("invalid {} timestamp '{}': {}", column, value, e),
            })
    })
    .transpose()
}

fn parsed_column<T>(row: &SqliteRow, column: &str, entity: &'static str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|reason| StorageError::CorruptRecord {
        entity,
        id: row.try_get("id").unwrap_or_default(),
        reason,
    })
}

/// Build the error for a rejected version-checked write
async fn rejected_write(
    pool: &SqlitePool,
    table: &str,
    entity: &'static str,
    id: &str,
    expected: i64,
) -> StorageError {
    let query = format!("SELECT version FROM {} WHERE id = ?", table);
    match sqlx::query_scalar::<_, i64>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await
    {
        Ok(Some(actual)) => StorageError::VersionConflict {
            entity,
            id: id.to_string(),
            expected,
            actual,
        },
        Ok(None) => StorageError::NotFound {
            entity,
            id: id.to_string(),
        },
        Err(e) => StorageError::Database(e),
    }
}

fn not_found(entity: &'static str, id: &str) -> StorageError {
    StorageError::NotFound {
        entity,
        id: id.to_string(),
    }
}

pub struct Deployments<'a> {
    pool: &'a SqlitePool,
}

impl Deployments<'_> {
    const ENTITY: &'static str = "deployment";

    pub async fn put(&self, deployment: &Deployment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO deployments (id, name, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(&deployment.id)
        .bind(&deployment.name)
        .bind(deployment.created_at.to_rfc3339())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Deployment> {
        let row = sqlx::query("SELECT * FROM deployments WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| not_found(Self::ENTITY, id))?;
        Self::from_row(&row)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Deployment> {
        let row = sqlx::query("SELECT * FROM deployments WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| not_found(Self::ENTITY, name))?;
        Self::from_row(&row)
    }

    pub async fn list(&self) -> Result<Vec<Deployment>> {
        let rows = sqlx::query("SELECT * FROM deployments ORDER BY rowid")
            .fetch_all(self.pool)
            .await?;
        rows.iter().map(Self::from_row).collect()
    }

    fn from_row(row: &SqliteRow) -> Result<Deployment> {
        Ok(Deployment {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            created_at: timestamp_column(row, "created_at", Self::ENTITY)?.unwrap_or_else(Utc::now),
        })
    }
}

pub struct Nodes<'a> {
    pool: &'a SqlitePool,
}

impl Nodes<'_> {
    const ENTITY: &'static str = "node";

    /// Insert or replace a node template
    pub async fn put(&self, node: &Node) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nodes (id, deployment_id, type_name, type_hierarchy, operations, plugins)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                deployment_id = excluded.deployment_id,
                type_name = excluded.type_name,
                type_hierarchy = excluded.type_hierarchy,
                operations = excluded.operations,
                plugins = excluded.plugins
            "#,
        )
        .bind(&node.id)
        .bind(&node.deployment_id)
        .bind(&node.type_name)
        .bind(to_json(&node.type_hierarchy)?)
        .bind(to_json(&node.operations)?)
        .bind(to_json(&node.plugins)?)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Node> {
        let row = sqlx::query("SELECT * FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| not_found(Self::ENTITY, id))?;
        Self::from_row(&row)
    }

    pub async fn list_for_deployment(&self, deployment_id: &str) -> Result<Vec<Node>> {
        let rows = sqlx::query("SELECT * FROM nodes WHERE deployment_id = ? ORDER BY rowid")
            .bind(deployment_id)
            .fetch_all(self.pool)
            .await?;
        rows.iter().map(Self::from_row).collect()
    }

    fn from_row(row: &SqliteRow) -> Result<Node> {
        Ok(Node {
            id: row.try_get("id")?,
            deployment_id: row.try_get("deployment_id")?,
            type_name: row.try_get("type_name")?,
            type_hierarchy: json_column(row, "type_hierarchy")?,
            operations: json_column(row, "operations")?,
            plugins: json_column(row, "plugins")?,
        })
    }
}

pub struct NodeInstances<'a> {
    pool: &'a SqlitePool,
}

impl NodeInstances<'_> {
    const ENTITY: &'static str = "node_instance";

    /// Store a new node instance as-is, including its version
    pub async fn put(&self, instance: &NodeInstance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO node_instances
                (id, name, node_id, deployment_id, state, runtime_properties, version)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&instance.id)
        .bind(&instance.name)
        .bind(&instance.node_id)
        .bind(&instance.deployment_id)
        .bind(&instance.state)
        .bind(to_json(&instance.runtime_properties)?)
        .bind(instance.version)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<NodeInstance> {
        let row = sqlx::query("SELECT * FROM node_instances WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| not_found(Self::ENTITY, id))?;
        Self::from_row(&row)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<NodeInstance> {
        let row = sqlx::query("SELECT * FROM node_instances WHERE name = ? ORDER BY rowid LIMIT 1")
            .bind(name)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| not_found(Self::ENTITY, name))?;
        Self::from_row(&row)
    }

    pub async fn list(&self) -> Result<Vec<NodeInstance>> {
        let rows = sqlx::query("SELECT * FROM node_instances ORDER BY rowid")
            .fetch_all(self.pool)
            .await?;
        rows.iter().map(Self::from_row).collect()
    }

    pub async fn list_for_deployment(&self, deployment_id: &str) -> Result<Vec<NodeInstance>> {
        let rows =
            sqlx::query("SELECT * FROM node_instances WHERE deployment_id = ? ORDER BY rowid")
                .bind(deployment_id)
                .fetch_all(self.pool)
                .await?;
        rows.iter().map(Self::from_row).collect()
    }

    /// Write the instance back if nobody else has since the version it was read at
    ///
    /// On success the in-memory version is bumped to match the stored one.
    pub async fn update(&self, instance: &mut NodeInstance) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE node_instances
            SET name = ?, state = ?, runtime_properties = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&instance.name)
        .bind(&instance.state)
        .bind(to_json(&instance.runtime_properties)?)
        .bind(&instance.id)
        .bind(instance.version)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(rejected_write(
                self.pool,
                "node_instances",
                Self::ENTITY,
                &instance.id,
                instance.version,
            )
            .await);
        }

        instance.version += 1;
        Ok(())
    }

    /// Reload every field, discarding local changes
    pub async fn refresh(&self, instance: &mut NodeInstance) -> Result<()> {
        *instance = self.get(&instance.id).await?;
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<NodeInstance> {
        Ok(NodeInstance {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            node_id: row.try_get("node_id")?,
            deployment_id: row.try_get("deployment_id")?,
            state: row.try_get("state")?,
            runtime_properties: json_column(row, "runtime_properties")?,
            version: row.try_get("version")?,
        })
    }
}

pub struct Relationships<'a> {
    pool: &'a SqlitePool,
}

impl Relationships<'_> {
    const ENTITY: &'static str = "relationship";

    /// Insert or replace a relationship template
    pub async fn put(&self, relationship: &Relationship) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO relationships
                (id, deployment_id, type_name, source_node_id, target_node_id,
                 source_operations, target_operations)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                deployment_id = excluded.deployment_id,
                type_name = excluded.type_name,
                source_node_id = excluded.source_node_id,
                target_node_id = excluded.target_node_id,
                source_operations = excluded.source_operations,
                target_operations = excluded.target_operations
            "#,
        )
        .bind(&relationship.id)
        .bind(&relationship.deployment_id)
        .bind(&relationship.type_name)
        .bind(&relationship.source_node_id)
        .bind(&relationship.target_node_id)
        .bind(to_json(&relationship.source_operations)?)
        .bind(to_json(&relationship.target_operations)?)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Relationship> {
        let row = sqlx::query("SELECT * FROM relationships WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| not_found(Self::ENTITY, id))?;
        Self::from_row(&row)
    }

    pub async fn list_for_deployment(&self, deployment_id: &str) -> Result<Vec<Relationship>> {
        let rows =
            sqlx::query("SELECT * FROM relationships WHERE deployment_id = ? ORDER BY rowid")
                .bind(deployment_id)
                .fetch_all(self.pool)
                .await?;
        rows.iter().map(Self::from_row).collect()
    }

    fn from_row(row: &SqliteRow) -> Result<Relationship> {
        Ok(Relationship {
            id: row.try_get("id")?,
            deployment_id: row.try_get("deployment_id")?,
            type_name: row.try_get("type_name")?,
            source_node_id: row.try_get("source_node_id")?,
            target_node_id: row.try_get("target_node_id")?,
            source_operations: json_column(row, "source_operations")?,
            target_operations: json_column(row, "target_operations")?,
        })
    }
}

pub struct RelationshipInstances<'a> {
    pool: &'a SqlitePool,
}

impl RelationshipInstances<'_> {
    const ENTITY: &'static str = "relationship_instance";

    pub async fn put(&self, instance: &RelationshipInstance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO relationship_instances
                (id, relationship_id, deployment_id, source_instance_id, target_instance_id,
                 runtime_properties, version)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&instance.id)
        .bind(&instance.relationship_id)
        .bind(&instance.deployment_id)
        .bind(&instance.source_instance_id)
        .bind(&instance.target_instance_id)
        .bind(to_json(&instance.runtime_properties)?)
        .bind(instance.version)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<RelationshipInstance> {
        let row = sqlx::query("SELECT * FROM relationship_instances WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| not_found(Self::ENTITY, id))?;
        Self::from_row(&row)
    }

    pub async fn list_for_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Vec<RelationshipInstance>> {
        let rows = sqlx::query(
            "SELECT * FROM relationship_instances WHERE deployment_id = ? ORDER BY rowid",
        )
        .bind(deployment_id)
        .fetch_all(self.pool)
        .await?;
        rows.iter().map(Self::from_row).collect()
    }

    pub async fn update(&self, instance: &mut RelationshipInstance) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE relationship_instances
            SET runtime_properties = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(to_json(&instance.runtime_properties)?)
        .bind(&instance.id)
        .bind(instance.version)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(rejected_write(
                self.pool,
                "relationship_instances",
                Self::ENTITY,
                &instance.id,
                instance.version,
            )
            .await);
        }

        instance.version += 1;
        Ok(())
    }

    pub async fn refresh(&self, instance: &mut RelationshipInstance) -> Result<()> {
        *instance = self.get(&instance.id).await?;
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<RelationshipInstance> {
        Ok(RelationshipInstance {
            id: row.try_get("id")?,
            relationship_id: row.try_get("relationship_id")?,
            deployment_id: row.try_get("deployment_id")?,
            source_instance_id: row.try_get("source_instance_id")?,
            target_instance_id: row.try_get("target_instance_id")?,
            runtime_properties: json_column(row, "runtime_properties")?,
            version: row.try_get("version")?,
        })
    }
}

pub struct Executions<'a> {
    pool: &'a SqlitePool,
}

impl Executions<'_> {
    const ENTITY: &'static str = "execution";

    pub async fn put(&self, execution: &Execution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO executions
                (id, deployment_id, workflow_name, status, parameters, created_at, ended_at, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.deployment_id)
        .bind(&execution.workflow_name)
        .bind(execution.status.to_string())
        .bind(to_json(&execution.parameters)?)
        .bind(execution.created_at.to_rfc3339())
        .bind(execution.ended_at.map(|t| t.to_rfc3339()))
        .bind(&execution.error)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Execution> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| not_found(Self::ENTITY, id))?;
        Self::from_row(&row)
    }

    pub async fn list_for_deployment(&self, deployment_id: &str) -> Result<Vec<Execution>> {
        let rows = sqlx::query("SELECT * FROM executions WHERE deployment_id = ? ORDER BY rowid")
            .bind(deployment_id)
            .fetch_all(self.pool)
            .await?;
        rows.iter().map(Self::from_row).collect()
    }

    /// Move an execution to a new status; terminal statuses stamp `ended_at`
    pub async fn set_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<()> {
        let ended_at = match status {
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Cancelled => {
                Some(Utc::now().to_rfc3339())
            }
            ExecutionStatus::Pending | ExecutionStatus::Started => None,
        };

        let result =
            sqlx::query("UPDATE executions SET status = ?, ended_at = ?, error = ? WHERE id = ?")
                .bind(status.to_string())
                .bind(ended_at)
                .bind(error)
                .bind(id)
                .execute(self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(Self::ENTITY, id));
        }
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<Execution> {
        Ok(Execution {
            id: row.try_get("id")?,
            deployment_id: row.try_get("deployment_id")?,
            workflow_name: row.try_get("workflow_name")?,
            status: parsed_column(row, "status", Self::ENTITY)?,
            parameters: json_column(row, "parameters")?,
            created_at: timestamp_column(row, "created_at", Self::ENTITY)?.unwrap_or_else(Utc::now),
            ended_at: timestamp_column(row, "ended_at", Self::ENTITY)?,
            error: row.try_get("error")?,
        })
    }
}

pub struct Tasks<'a> {
    pool: &'a SqlitePool,
}

impl Tasks<'_> {
    const ENTITY: &'static str = "task";

    /// Insert a task record or overwrite its bookkeeping fields
    pub async fn upsert(&self, record: &TaskRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks
                (id, name, execution_id, actor_id, operation_mapping, runs_on, status,
                 attempts_count, max_attempts, retry_interval_ms, ignore_failure,
                 started_at, ended_at, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                attempts_count = excluded.attempts_count,
                started_at = COALESCE(tasks.started_at, excluded.started_at),
                ended_at = excluded.ended_at,
                error = excluded.error
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.execution_id)
        .bind(&record.actor_id)
        .bind(&record.operation_mapping)
        .bind(record.runs_on.to_string())
        .bind(record.status.to_string())
        .bind(i64::from(record.attempts_count))
        .bind(record.max_attempts.map(i64::from))
        .bind(record.retry_interval.as_millis() as i64)
        .bind(record.ignore_failure)
        .bind(record.started_at.map(|t| t.to_rfc3339()))
        .bind(record.ended_at.map(|t| t.to_rfc3339()))
        .bind(&record.error)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<TaskRecord> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| not_found(Self::ENTITY, id))?;
        Self::from_row(&row)
    }

    pub async fn list_for_execution(&self, execution_id: &str) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE execution_id = ? ORDER BY rowid")
            .bind(execution_id)
            .fetch_all(self.pool)
            .await?;
        rows.iter().map(Self::from_row).collect()
    }

    fn from_row(row: &SqliteRow) -> Result<TaskRecord> {
        let attempts_count: i64 = row.try_get("attempts_count")?;
        let max_attempts: Option<i64> = row.try_get("max_attempts")?;
        let retry_interval_ms: i64 = row.try_get("retry_interval_ms")?;

        Ok(TaskRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            execution_id: row.try_get("execution_id")?,
            actor_id: row.try_get("actor_id")?,
            operation_mapping: row.try_get("operation_mapping")?,
            runs_on: parsed_column(row, "runs_on", Self::ENTITY)?,
            status: parsed_column(row, "status", Self::ENTITY)?,
            attempts_count: attempts_count.max(0) as u32,
            max_attempts: max_attempts.map(|m| m.max(0) as u32),
            retry_interval: Duration::from_millis(retry_interval_ms.max(0) as u64),
            ignore_failure: row.try_get("ignore_failure")?,
            started_at: timestamp_column(row, "started_at", Self::ENTITY)?,
            ended_at: timestamp_column(row, "ended_at", Self::ENTITY)?,
            error: row.try_get("error")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OperationSpec, RunsOn, TaskStatus};
    use serde_json::json;
    use tempfile::TempDir;

    async fn create_test_storage() -> (TempDir, ModelStorage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = ModelStorage::sqlite(temp_dir.path().join("model.db"))
            .await
            .unwrap();
        (temp_dir, storage)
    }

    async fn create_instance(storage: &ModelStorage) -> NodeInstance {
        let deployment = Deployment::new("test_deployment");
        storage.deployments().put(&deployment).await.unwrap();

        let mut node = Node::new("web", "WebServer")
            .with_operation("deploy", OperationSpec::new("conductor.builtin.noop"));
        node.deployment_id = deployment.id.clone();
        storage.nodes().put(&node).await.unwrap();

        let mut instance = NodeInstance::new("web_1", "web");
        instance.deployment_id = deployment.id.clone();
        storage.node_instances().put(&instance).await.unwrap();
        instance
    }

    #[tokio::test]
    async fn test_unknown_api_is_rejected() {
        let result = ModelStorage::open("mongodb", &Properties::new()).await;
        assert!(matches!(result, Err(StorageError::UnknownApi(api)) if api == "mongodb"));
    }

    #[tokio::test]
    async fn test_missing_path_is_rejected() {
        let result = ModelStorage::open(SQLITE_API, &Properties::new()).await;
        assert!(matches!(
            result,
            Err(StorageError::InvalidConnection { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let (_dir, storage) = create_test_storage().await;
        let mut instance = create_instance(&storage).await;

        instance
            .runtime_properties
            .insert("ip".to_string(), json!("10.0.0.1"));
        storage.node_instances().update(&mut instance).await.unwrap();
        assert_eq!(instance.version, 2);

        let stored = storage.node_instances().get(&instance.id).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.runtime_properties["ip"], json!("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_stale_update_is_a_version_conflict() {
        let (_dir, storage) = create_test_storage().await;
        let instance = create_instance(&storage).await;

        let mut first = storage.node_instances().get(&instance.id).await.unwrap();
        let mut second = storage.node_instances().get(&instance.id).await.unwrap();

        first.state = "started".to_string();
        storage.node_instances().update(&mut first).await.unwrap();

        second.state = "stopped".to_string();
        let error = storage
            .node_instances()
            .update(&mut second)
            .await
            .unwrap_err();
        assert!(error.is_version_conflict());
        assert!(error.to_string().contains("Version conflict"));
        assert_eq!(second.version, 1);

        storage.node_instances().refresh(&mut second).await.unwrap();
        assert_eq!(second.state, "started");
        assert_eq!(second.version, 2);
    }

    #[tokio::test]
    async fn test_update_of_missing_entity_is_not_found() {
        let (_dir, storage) = create_test_storage().await;
        let mut ghost = NodeInstance::new("ghost", "web");

        let error = storage.node_instances().update(&mut ghost).await.unwrap_err();
        assert!(matches!(error, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order() {
        let (_dir, storage) = create_test_storage().await;
        let deployment = Deployment::new("ordered");
        storage.deployments().put(&deployment).await.unwrap();

        for name in ["c", "a", "b"] {
            let mut instance = NodeInstance::new(name, "web");
            instance.deployment_id = deployment.id.clone();
            storage.node_instances().put(&instance).await.unwrap();
        }

        let names: Vec<String> = storage
            .node_instances()
            .list_for_deployment(&deployment.id)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_execution_status_transitions() {
        let (_dir, storage) = create_test_storage().await;
        let execution = Execution::new("deployment", "install");
        storage.executions().put(&execution).await.unwrap();

        storage
            .executions()
            .set_status(&execution.id, ExecutionStatus::Failed, Some("boom".into()))
            .await
            .unwrap();

        let stored = storage.executions().get(&execution.id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
        assert!(stored.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_task_record_upsert_keeps_first_start() {
        let (_dir, storage) = create_test_storage().await;
        let started_at = Utc::now();
        let mut record = TaskRecord {
            id: "task-1".to_string(),
            name: "deploy.web_1".to_string(),
            execution_id: "execution-1".to_string(),
            actor_id: "web_1".to_string(),
            operation_mapping: "conductor.builtin.noop".to_string(),
            runs_on: RunsOn::NodeInstance,
            status: TaskStatus::Started,
            attempts_count: 1,
            max_attempts: Some(3),
            retry_interval: Duration::from_millis(250),
            ignore_failure: false,
            started_at: Some(started_at),
            ended_at: None,
            error: None,
        };
        storage.tasks().upsert(&record).await.unwrap();

        record.status = TaskStatus::Success;
        record.attempts_count = 2;
        record.started_at = Some(Utc::now() + chrono::Duration::seconds(5));
        storage.tasks().upsert(&record).await.unwrap();

        let stored = storage.tasks().get("task-1").await.unwrap();
        assert_eq!(stored.status, TaskStatus::Success);
        assert_eq!(stored.attempts_count, 2);
        assert_eq!(stored.max_attempts, Some(3));
        assert_eq!(stored.retry_interval, Duration::from_millis(250));
        assert_eq!(
            stored.started_at.unwrap().timestamp(),
            started_at.timestamp()
        );
    }
}
