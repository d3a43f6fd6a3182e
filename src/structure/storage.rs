/// SQLite persistence layer for the asset structure
///
/// Owns the durable copies of element types, thing nodes, sources and sinks.
/// Every structural mutation (replace, upsert, delete) runs inside a single
/// `BEGIN IMMEDIATE` transaction, so concurrent writers queue on the write
/// lock instead of failing. Dropping the transaction on an error rolls the
/// store back.

use crate::error::{StructureError, StructureResult};
use crate::structure::types::{
    ElementType, ExternalType, Filter, Sink, SinkSubmission, Source, SourceSubmission,
    StructureSubmission, ThingNode,
};
use crate::structure::validate::{validate, CompleteStructure};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::{Row, SqliteConnection, Transaction};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// An entity kind with its own table
pub trait StoredEntity: Sized + Send + Unpin {
    const TABLE: &'static str;
    /// Label used in not-found messages
    const KIND: &'static str;

    fn from_row(row: &SqliteRow) -> StructureResult<Self>;
}

/// Direct children of a thing node (or the roots) with the attached endpoints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructureChildren {
    pub thing_nodes: Vec<ThingNode>,
    pub sources: Vec<Source>,
    pub sinks: Vec<Sink>,
}

/// SQLite-based structure persistence service
#[derive(Debug, Clone)]
pub struct StructureService {
    pool: SqlitePool,
}

/// Bind variables per `IN (...)` lookup, well below SQLite's variable limit
const LOOKUP_CHUNK: usize = 500;

impl StructureService {
    /// Create a service over an open pool
    ///
    /// The schema is not touched; call `init_schema` before first use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the structure tables
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Whether no entity of any kind is stored
    pub async fn is_empty(&self) -> StructureResult<bool> {
        let mut conn = self.pool.acquire().await.map_err(StructureError::from_fetch)?;
        store_is_empty(&mut conn).await
    }

    /// Open a write transaction that holds the database write lock from the start
    ///
    /// A deferred transaction would read first and fail with SQLITE_BUSY when
    /// upgrading to a writer; `BEGIN IMMEDIATE` waits for the lock instead.
    async fn begin_write(&self) -> StructureResult<Transaction<'static, Sqlite>> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(StructureError::from_update)
    }

    /// Fetch one entity by its stored id
    ///
    /// Fails with `NotFound` naming the kind and the id when no row matches.
    pub async fn get_by_id<T: StoredEntity>(&self, id: Uuid) -> StructureResult<T> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", T::TABLE);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StructureError::from_fetch)?;

        match row {
            Some(row) => T::from_row(&row),
            None => Err(StructureError::NotFound(format!(
                "No {} found with id {}",
                T::KIND,
                id
            ))),
        }
    }

    /// Fetch several entities by stored id
    ///
    /// Ids are looked up in chunks of `IN (...)` queries, so the request size
    /// is not bounded by SQLite's bind variable limit. Fails with `NotFound`
    /// naming the missing ids if any id is absent; a partial map is never
    /// returned.
    pub async fn get_by_ids<T: StoredEntity>(
        &self,
        ids: &[Uuid],
    ) -> StructureResult<HashMap<Uuid, T>> {
        let wanted: Vec<Uuid> = ids
            .iter()
            .copied()
            .collect::<HashSet<Uuid>>()
            .into_iter()
            .collect();
        if wanted.is_empty() {
            return Ok(HashMap::new());
        }

        let mut found = HashMap::with_capacity(wanted.len());
        for chunk in wanted.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("SELECT * FROM {} WHERE id IN ({})", T::TABLE, placeholders);
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id.to_string());
            }
            let rows = query
                .fetch_all(&self.pool)
                .await
                .map_err(StructureError::from_fetch)?;

            for row in &rows {
                let id = uuid_column(row, "id")?;
                found.insert(id, T::from_row(row)?);
            }
        }

        if found.len() != wanted.len() {
            let missing: Vec<String> = ids
                .iter()
                .filter(|id| !found.contains_key(*id))
                .map(Uuid::to_string)
                .collect();
            return Err(StructureError::NotFound(format!(
                "No {} found with ids: {}",
                T::KIND,
                missing.join(", ")
            )));
        }

        Ok(found)
    }

    /// All stored entities of one kind in insertion order
    pub async fn get_all<T: StoredEntity>(&self) -> StructureResult<Vec<T>> {
        let sql = format!("SELECT * FROM {} ORDER BY rowid", T::TABLE);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(StructureError::from_fetch)?;

        rows.iter().map(T::from_row).collect()
    }

    /// Children of a thing node plus the sources and sinks attached to it
    ///
    /// `None` returns the root nodes only. An unknown parent id fails with
    /// `NotFound`; a known node without children yields empty lists.
    pub async fn get_children(&self, parent_id: Option<Uuid>) -> StructureResult<StructureChildren> {
        let Some(parent_id) = parent_id else {
            let rows = sqlx::query(
                "SELECT * FROM thing_node WHERE parent_node_id IS NULL ORDER BY rowid",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(StructureError::from_fetch)?;

            return Ok(StructureChildren {
                thing_nodes: rows
                    .iter()
                    .map(ThingNode::from_row)
                    .collect::<StructureResult<_>>()?,
                ..Default::default()
            });
        };

        let parent = parent_id.to_string();
        let known = sqlx::query("SELECT 1 FROM thing_node WHERE id = ?")
            .bind(&parent)
            .fetch_optional(&self.pool)
            .await
            .map_err(StructureError::from_fetch)?;
        if known.is_none() {
            return Err(StructureError::NotFound(format!(
                "No ThingNode found with id {}",
                parent_id
            )));
        }

        let node_rows = sqlx::query("SELECT * FROM thing_node WHERE parent_node_id = ? ORDER BY rowid")
            .bind(&parent)
            .fetch_all(&self.pool)
            .await
            .map_err(StructureError::from_fetch)?;
        let source_rows = self.attached_rows(&SOURCE_TABLE, &parent).await?;
        let sink_rows = self.attached_rows(&SINK_TABLE, &parent).await?;

        Ok(StructureChildren {
            thing_nodes: node_rows
                .iter()
                .map(ThingNode::from_row)
                .collect::<StructureResult<_>>()?,
            sources: source_rows
                .iter()
                .map(Source::from_row)
                .collect::<StructureResult<_>>()?,
            sinks: sink_rows
                .iter()
                .map(Sink::from_row)
                .collect::<StructureResult<_>>()?,
        })
    }

    async fn attached_rows(
        &self,
        table: &EndpointTable,
        thing_node_id: &str,
    ) -> StructureResult<Vec<SqliteRow>> {
        let sql = format!(
            "SELECT e.* FROM {table} e \
             JOIN {assoc} a ON a.{assoc_col} = e.id \
             WHERE a.thing_node_id = ? ORDER BY e.rowid",
            table = table.table,
            assoc = table.association,
            assoc_col = table.association_column,
        );
        sqlx::query(&sql)
            .bind(thing_node_id)
            .fetch_all(&self.pool)
            .await
            .map_err(StructureError::from_fetch)
    }

    /// Delete everything, then insert the given structure, in one transaction
    pub async fn replace(&self, structure: &CompleteStructure) -> StructureResult<()> {
        let mut tx = self.begin_write().await?;
        delete_all(&mut tx).await?;
        write_structure(&mut tx, structure).await?;
        tx.commit().await.map_err(StructureError::from_update)?;

        tracing::info!(
            "🔄 Replaced stored structure ({} thing nodes, {} sources, {} sinks)",
            structure.thing_nodes().len(),
            structure.sources().len(),
            structure.sinks().len()
        );
        Ok(())
    }

    /// Insert or update every entity of the structure in one transaction
    ///
    /// Entities are matched on (stakeholder key, external id); matched rows
    /// keep their stored id. Associations of each submitted source and sink
    /// are rewritten to the submitted attachments.
    pub async fn upsert(&self, structure: &CompleteStructure) -> StructureResult<()> {
        let mut tx = self.begin_write().await?;
        write_structure(&mut tx, structure).await?;
        tx.commit().await.map_err(StructureError::from_update)?;

        tracing::info!(
            "📥 Upserted structure ({} thing nodes, {} sources, {} sinks)",
            structure.thing_nodes().len(),
            structure.sources().len(),
            structure.sinks().len()
        );
        Ok(())
    }

    /// Replace the stored structure, or merge into it when `delete_existing` is off
    ///
    /// Replacing an empty store is the same as upserting into it. The
    /// emptiness check and the write share one transaction.
    pub async fn update_structure(
        &self,
        structure: &CompleteStructure,
        delete_existing: bool,
    ) -> StructureResult<()> {
        let mut tx = self.begin_write().await?;
        let replacing = delete_existing && !store_is_empty(&mut tx).await?;
        if replacing {
            delete_all(&mut tx).await?;
        }
        write_structure(&mut tx, structure).await?;
        tx.commit().await.map_err(StructureError::from_update)?;

        tracing::info!(
            "{} structure ({} thing nodes, {} sources, {} sinks)",
            if replacing { "🔄 Replaced stored" } else { "📥 Upserted" },
            structure.thing_nodes().len(),
            structure.sources().len(),
            structure.sinks().len()
        );
        Ok(())
    }

    /// Remove every tree bottom-up, then sweep unattached sources/sinks
    ///
    /// Deleting an empty store is a no-op.
    pub async fn delete(&self) -> StructureResult<()> {
        let mut tx = self.begin_write().await?;
        delete_all(&mut tx).await?;
        tx.commit().await.map_err(StructureError::from_update)?;

        tracing::info!("🗑️ Deleted stored structure");
        Ok(())
    }

    /// Read the whole stored structure back as a validated aggregate
    ///
    /// Fails with `NotFound` on an empty store. Stored rows are validated
    /// again, so the result satisfies the same checks as a submission.
    pub async fn load_structure(&self) -> StructureResult<CompleteStructure> {
        let element_types = self.get_all::<ElementType>().await?;
        if element_types.is_empty() {
            return Err(StructureError::NotFound(
                "No structure has been stored".to_string(),
            ));
        }

        let submission = StructureSubmission {
            element_types,
            thing_nodes: self.get_all::<ThingNode>().await?,
            sources: self
                .get_all::<Source>()
                .await?
                .into_iter()
                .map(SourceSubmission::from)
                .collect(),
            sinks: self
                .get_all::<Sink>()
                .await?
                .into_iter()
                .map(SinkSubmission::from)
                .collect(),
        };
        validate(submission)
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS element_type (
        id TEXT PRIMARY KEY,
        external_id TEXT NOT NULL,
        stakeholder_key TEXT NOT NULL,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        UNIQUE (stakeholder_key, external_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS thing_node (
        id TEXT PRIMARY KEY,
        external_id TEXT NOT NULL,
        stakeholder_key TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        parent_node_id TEXT REFERENCES thing_node (id),
        parent_external_node_id TEXT,
        element_type_id TEXT NOT NULL REFERENCES element_type (id),
        element_type_external_id TEXT NOT NULL,
        meta_data TEXT,
        UNIQUE (stakeholder_key, external_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_thing_node_parent
    ON thing_node (parent_node_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS source (
        id TEXT PRIMARY KEY,
        external_id TEXT NOT NULL,
        stakeholder_key TEXT NOT NULL,
        name TEXT NOT NULL,
        type TEXT NOT NULL,
        visible BOOLEAN NOT NULL DEFAULT 1,
        display_path TEXT NOT NULL DEFAULT '',
        preset_filters TEXT NOT NULL,
        passthrough_filters TEXT,
        adapter_key TEXT NOT NULL,
        source_id TEXT NOT NULL,
        ref_key TEXT,
        ref_id TEXT NOT NULL DEFAULT '',
        meta_data TEXT,
        thing_node_external_ids TEXT NOT NULL,
        UNIQUE (stakeholder_key, external_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sink (
        id TEXT PRIMARY KEY,
        external_id TEXT NOT NULL,
        stakeholder_key TEXT NOT NULL,
        name TEXT NOT NULL,
        type TEXT NOT NULL,
        visible BOOLEAN NOT NULL DEFAULT 1,
        display_path TEXT NOT NULL DEFAULT '',
        preset_filters TEXT NOT NULL,
        passthrough_filters TEXT,
        adapter_key TEXT NOT NULL,
        sink_id TEXT NOT NULL,
        ref_key TEXT,
        ref_id TEXT NOT NULL DEFAULT '',
        meta_data TEXT,
        thing_node_external_ids TEXT NOT NULL,
        UNIQUE (stakeholder_key, external_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS thingnode_source_association (
        thing_node_id TEXT NOT NULL REFERENCES thing_node (id),
        source_id TEXT NOT NULL REFERENCES source (id),
        PRIMARY KEY (thing_node_id, source_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS thingnode_sink_association (
        thing_node_id TEXT NOT NULL REFERENCES thing_node (id),
        sink_id TEXT NOT NULL REFERENCES sink (id),
        PRIMARY KEY (thing_node_id, sink_id)
    )
    "#,
];

/// Table names for one endpoint kind
struct EndpointTable {
    table: &'static str,
    ref_column: &'static str,
    association: &'static str,
    association_column: &'static str,
}

const SOURCE_TABLE: EndpointTable = EndpointTable {
    table: "source",
    ref_column: "source_id",
    association: "thingnode_source_association",
    association_column: "source_id",
};

const SINK_TABLE: EndpointTable = EndpointTable {
    table: "sink",
    ref_column: "sink_id",
    association: "thingnode_sink_association",
    association_column: "sink_id",
};

/// Stored ids keyed by natural key, with a fallback on the bare external id
#[derive(Default)]
struct StoredIds {
    by_key: HashMap<(String, String), Uuid>,
    by_external_id: HashMap<String, Uuid>,
}

impl StoredIds {
    fn insert(&mut self, stakeholder_key: &str, external_id: &str, id: Uuid) {
        self.by_key
            .insert((stakeholder_key.to_string(), external_id.to_string()), id);
        self.by_external_id.insert(external_id.to_string(), id);
    }

    fn lookup(&self, stakeholder_key: &str, external_id: &str) -> Option<Uuid> {
        self.by_key
            .get(&(stakeholder_key.to_string(), external_id.to_string()))
            .or_else(|| self.by_external_id.get(external_id))
            .copied()
    }
}

async fn store_is_empty(conn: &mut SqliteConnection) -> StructureResult<bool> {
    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT (SELECT COUNT(*) FROM element_type)
             + (SELECT COUNT(*) FROM thing_node)
             + (SELECT COUNT(*) FROM source)
             + (SELECT COUNT(*) FROM sink)
        "#,
    )
    .fetch_one(&mut *conn)
    .await
    .map_err(StructureError::from_fetch)?;

    Ok(total == 0)
}

async fn write_structure(
    conn: &mut SqliteConnection,
    structure: &CompleteStructure,
) -> StructureResult<()> {
    let mut element_type_ids = StoredIds::default();
    for element_type in structure.element_types() {
        let id = write_element_type(conn, element_type).await?;
        element_type_ids.insert(&element_type.stakeholder_key, &element_type.external_id, id);
    }

    let mut node_ids = StoredIds::default();
    for node in structure.thing_nodes_top_down() {
        let parent_id = node
            .parent_external_node_id
            .as_deref()
            .and_then(|parent| node_ids.lookup(&node.stakeholder_key, parent));
        let element_type_id = match element_type_ids
            .lookup(&node.stakeholder_key, &node.element_type_external_id)
        {
            Some(id) => id,
            None => stored_element_type_id(conn, node).await?,
        };

        let id = write_thing_node(conn, node, parent_id, element_type_id).await?;
        node_ids.insert(&node.stakeholder_key, &node.external_id, id);
        tracing::debug!("Stored ThingNode '{}' as {}", node.external_id, id);
    }

    for source in structure.sources() {
        write_endpoint(conn, &SOURCE_TABLE, &EndpointRow::from(source), &node_ids).await?;
    }
    for sink in structure.sinks() {
        write_endpoint(conn, &SINK_TABLE, &EndpointRow::from(sink), &node_ids).await?;
    }

    Ok(())
}

/// Id of an already stored row with the given natural key
async fn existing_id(
    conn: &mut SqliteConnection,
    table: &str,
    stakeholder_key: &str,
    external_id: &str,
) -> StructureResult<Option<Uuid>> {
    let sql = format!(
        "SELECT id FROM {} WHERE stakeholder_key = ? AND external_id = ?",
        table
    );
    let row = sqlx::query(&sql)
        .bind(stakeholder_key)
        .bind(external_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(StructureError::from_fetch)?;

    row.map(|row| uuid_column(&row, "id")).transpose()
}

async fn write_element_type(
    conn: &mut SqliteConnection,
    element_type: &ElementType,
) -> StructureResult<Uuid> {
    let existing = existing_id(
        conn,
        "element_type",
        &element_type.stakeholder_key,
        &element_type.external_id,
    )
    .await?;
    let id = existing.unwrap_or(element_type.id);

    let sql = if existing.is_some() {
        "UPDATE element_type SET name = ?, description = ? WHERE id = ?"
    } else {
        "INSERT INTO element_type (name, description, id, stakeholder_key, external_id) \
         VALUES (?, ?, ?, ?, ?)"
    };

    let mut query = sqlx::query(sql)
        .bind(&element_type.name)
        .bind(&element_type.description)
        .bind(id.to_string());
    if existing.is_none() {
        query = query
            .bind(&element_type.stakeholder_key)
            .bind(&element_type.external_id);
    }
    query
        .execute(&mut *conn)
        .await
        .map_err(StructureError::from_update)?;

    Ok(id)
}

/// Element type referenced by a node but not part of the submission
async fn stored_element_type_id(
    conn: &mut SqliteConnection,
    node: &ThingNode,
) -> StructureResult<Uuid> {
    let row = sqlx::query(
        "SELECT id FROM element_type WHERE external_id = ? \
         ORDER BY stakeholder_key = ? DESC LIMIT 1",
    )
    .bind(&node.element_type_external_id)
    .bind(&node.stakeholder_key)
    .fetch_optional(&mut *conn)
    .await
    .map_err(StructureError::from_fetch)?;

    match row {
        Some(row) => uuid_column(&row, "id"),
        None => Err(StructureError::Integrity(format!(
            "ThingNode '{}' references unknown element type '{}'",
            node.external_id, node.element_type_external_id
        ))),
    }
}

async fn write_thing_node(
    conn: &mut SqliteConnection,
    node: &ThingNode,
    parent_id: Option<Uuid>,
    element_type_id: Uuid,
) -> StructureResult<Uuid> {
    let existing = existing_id(conn, "thing_node", &node.stakeholder_key, &node.external_id).await?;
    let id = existing.unwrap_or(node.id);
    let meta_data = optional_json(&node.meta_data)?;

    let sql = if existing.is_some() {
        r#"
        UPDATE thing_node SET
            name = ?, description = ?, parent_node_id = ?, parent_external_node_id = ?,
            element_type_id = ?, element_type_external_id = ?, meta_data = ?
        WHERE id = ?
        "#
    } else {
        r#"
        INSERT INTO thing_node (
            name, description, parent_node_id, parent_external_node_id,
            element_type_id, element_type_external_id, meta_data,
            id, stakeholder_key, external_id
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    };

    let mut query = sqlx::query(sql)
        .bind(&node.name)
        .bind(&node.description)
        .bind(parent_id.map(|id| id.to_string()))
        .bind(&node.parent_external_node_id)
        .bind(element_type_id.to_string())
        .bind(&node.element_type_external_id)
        .bind(meta_data)
        .bind(id.to_string());
    if existing.is_none() {
        query = query.bind(&node.stakeholder_key).bind(&node.external_id);
    }
    query
        .execute(&mut *conn)
        .await
        .map_err(StructureError::from_update)?;

    Ok(id)
}

async fn write_endpoint(
    conn: &mut SqliteConnection,
    table: &EndpointTable,
    endpoint: &EndpointRow,
    node_ids: &StoredIds,
) -> StructureResult<Uuid> {
    let existing = existing_id(
        conn,
        table.table,
        &endpoint.stakeholder_key,
        &endpoint.external_id,
    )
    .await?;
    let id = existing.unwrap_or(endpoint.id);

    let sql = if existing.is_some() {
        format!(
            r#"
            UPDATE {table} SET
                name = ?, type = ?, visible = ?, display_path = ?, preset_filters = ?,
                passthrough_filters = ?, adapter_key = ?, {ref_column} = ?, ref_key = ?,
                ref_id = ?, meta_data = ?, thing_node_external_ids = ?
            WHERE id = ?
            "#,
            table = table.table,
            ref_column = table.ref_column,
        )
    } else {
        format!(
            r#"
            INSERT INTO {table} (
                name, type, visible, display_path, preset_filters,
                passthrough_filters, adapter_key, {ref_column}, ref_key,
                ref_id, meta_data, thing_node_external_ids,
                id, stakeholder_key, external_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            table = table.table,
            ref_column = table.ref_column,
        )
    };

    let mut query = sqlx::query(&sql)
        .bind(&endpoint.name)
        .bind(endpoint.endpoint_type.as_str())
        .bind(endpoint.visible)
        .bind(&endpoint.display_path)
        .bind(to_json(&endpoint.preset_filters)?)
        .bind(optional_json(&endpoint.passthrough_filters)?)
        .bind(&endpoint.adapter_key)
        .bind(&endpoint.adapter_ref_id)
        .bind(&endpoint.ref_key)
        .bind(&endpoint.ref_id)
        .bind(optional_json(&endpoint.meta_data)?)
        .bind(to_json(&endpoint.thing_node_external_ids)?)
        .bind(id.to_string());
    if existing.is_none() {
        query = query
            .bind(&endpoint.stakeholder_key)
            .bind(&endpoint.external_id);
    }
    query
        .execute(&mut *conn)
        .await
        .map_err(StructureError::from_update)?;

    // Reconcile attachments to exactly the submitted set
    let endpoint_id = id.to_string();
    let clear = format!(
        "DELETE FROM {} WHERE {} = ?",
        table.association, table.association_column
    );
    sqlx::query(&clear)
        .bind(&endpoint_id)
        .execute(&mut *conn)
        .await
        .map_err(StructureError::from_update)?;

    let attach = format!(
        "INSERT INTO {} (thing_node_id, {}) VALUES (?, ?)",
        table.association, table.association_column
    );
    for tn_external_id in &endpoint.thing_node_external_ids {
        let thing_node_id = node_ids
            .lookup(&endpoint.stakeholder_key, tn_external_id)
            .ok_or_else(|| {
                StructureError::Integrity(format!(
                    "{} '{}' is attached to ThingNode '{}' which was not stored",
                    table.table, endpoint.external_id, tn_external_id
                ))
            })?;
        sqlx::query(&attach)
            .bind(thing_node_id.to_string())
            .bind(&endpoint_id)
            .execute(&mut *conn)
            .await
            .map_err(StructureError::from_update)?;
    }

    Ok(id)
}

/// Post-order deletion of every tree followed by the orphan sweep
async fn delete_all(conn: &mut SqliteConnection) -> StructureResult<()> {
    let rows = sqlx::query("SELECT id, parent_node_id FROM thing_node")
        .fetch_all(&mut *conn)
        .await
        .map_err(StructureError::from_fetch)?;

    let mut roots = Vec::new();
    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    for row in &rows {
        let id: String = column(row, "id")?;
        match column::<Option<String>>(row, "parent_node_id")? {
            Some(parent) => children.entry(parent).or_default().push(id),
            None => roots.push(id),
        }
    }

    let mut deleted_nodes = 0usize;
    for root in roots {
        // (node, children already pushed)
        let mut stack = vec![(root, false)];
        while let Some((node_id, expanded)) = stack.pop() {
            if !expanded {
                let node_children = children.remove(&node_id).unwrap_or_default();
                stack.push((node_id, true));
                stack.extend(node_children.into_iter().map(|child| (child, false)));
                continue;
            }

            for statement in [
                "DELETE FROM thingnode_source_association WHERE thing_node_id = ?",
                "DELETE FROM thingnode_sink_association WHERE thing_node_id = ?",
                "DELETE FROM thing_node WHERE id = ?",
            ] {
                sqlx::query(statement)
                    .bind(&node_id)
                    .execute(&mut *conn)
                    .await
                    .map_err(StructureError::from_update)?;
            }
            deleted_nodes += 1;
        }
    }

    let mut orphans = 0u64;
    for table in [&SOURCE_TABLE, &SINK_TABLE] {
        let sweep = format!(
            "DELETE FROM {table} WHERE id NOT IN (SELECT {col} FROM {assoc})",
            table = table.table,
            col = table.association_column,
            assoc = table.association,
        );
        orphans += sqlx::query(&sweep)
            .execute(&mut *conn)
            .await
            .map_err(StructureError::from_update)?
            .rows_affected();
    }

    sqlx::query("DELETE FROM element_type")
        .execute(&mut *conn)
        .await
        .map_err(StructureError::from_update)?;

    tracing::debug!(
        "Deleted {} thing nodes and {} unattached sources/sinks",
        deleted_nodes,
        orphans
    );
    Ok(())
}

/// Storage shape shared by sources and sinks
struct EndpointRow {
    id: Uuid,
    external_id: String,
    stakeholder_key: String,
    name: String,
    endpoint_type: ExternalType,
    visible: bool,
    display_path: String,
    preset_filters: Map<String, Value>,
    passthrough_filters: Option<Vec<Filter>>,
    adapter_key: String,
    adapter_ref_id: String,
    ref_key: Option<String>,
    ref_id: String,
    meta_data: Option<Map<String, Value>>,
    thing_node_external_ids: Vec<String>,
}

impl EndpointRow {
    fn read(row: &SqliteRow, ref_column: &str) -> StructureResult<Self> {
        let type_name: String = column(row, "type")?;
        let endpoint_type: ExternalType = type_name.parse().map_err(StructureError::Fetch)?;

        Ok(Self {
            id: uuid_column(row, "id")?,
            external_id: column(row, "external_id")?,
            stakeholder_key: column(row, "stakeholder_key")?,
            name: column(row, "name")?,
            endpoint_type,
            visible: column(row, "visible")?,
            display_path: column(row, "display_path")?,
            preset_filters: json_column(row, "preset_filters")?,
            passthrough_filters: optional_json_column(row, "passthrough_filters")?,
            adapter_key: column(row, "adapter_key")?,
            adapter_ref_id: column(row, ref_column)?,
            ref_key: column(row, "ref_key")?,
            ref_id: column(row, "ref_id")?,
            meta_data: optional_json_column(row, "meta_data")?,
            thing_node_external_ids: json_column(row, "thing_node_external_ids")?,
        })
    }
}

impl From<&Source> for EndpointRow {
    fn from(source: &Source) -> Self {
        Self {
            id: source.id,
            external_id: source.external_id.clone(),
            stakeholder_key: source.stakeholder_key.clone(),
            name: source.name.clone(),
            endpoint_type: source.source_type,
            visible: source.visible,
            display_path: source.display_path.clone(),
            preset_filters: source.preset_filters.clone(),
            passthrough_filters: source.passthrough_filters.clone(),
            adapter_key: source.adapter_key.clone(),
            adapter_ref_id: source.source_id.clone(),
            ref_key: source.ref_key.clone(),
            ref_id: source.ref_id.clone(),
            meta_data: source.meta_data.clone(),
            thing_node_external_ids: source.thing_node_external_ids.clone(),
        }
    }
}

impl From<&Sink> for EndpointRow {
    fn from(sink: &Sink) -> Self {
        Self {
            id: sink.id,
            external_id: sink.external_id.clone(),
            stakeholder_key: sink.stakeholder_key.clone(),
            name: sink.name.clone(),
            endpoint_type: sink.sink_type,
            visible: sink.visible,
            display_path: sink.display_path.clone(),
            preset_filters: sink.preset_filters.clone(),
            passthrough_filters: sink.passthrough_filters.clone(),
            adapter_key: sink.adapter_key.clone(),
            adapter_ref_id: sink.sink_id.clone(),
            ref_key: sink.ref_key.clone(),
            ref_id: sink.ref_id.clone(),
            meta_data: sink.meta_data.clone(),
            thing_node_external_ids: sink.thing_node_external_ids.clone(),
        }
    }
}

impl StoredEntity for ElementType {
    const TABLE: &'static str = "element_type";
    const KIND: &'static str = "ElementType";

    fn from_row(row: &SqliteRow) -> StructureResult<Self> {
        Ok(Self {
            id: uuid_column(row, "id")?,
            external_id: column(row, "external_id")?,
            stakeholder_key: column(row, "stakeholder_key")?,
            name: column(row, "name")?,
            description: column(row, "description")?,
        })
    }
}

impl StoredEntity for ThingNode {
    const TABLE: &'static str = "thing_node";
    const KIND: &'static str = "ThingNode";

    fn from_row(row: &SqliteRow) -> StructureResult<Self> {
        let parent_node_id = column::<Option<String>>(row, "parent_node_id")?
            .map(|id| parse_uuid(&id))
            .transpose()?;

        Ok(Self {
            id: uuid_column(row, "id")?,
            external_id: column(row, "external_id")?,
            stakeholder_key: column(row, "stakeholder_key")?,
            name: column(row, "name")?,
            description: column(row, "description")?,
            parent_node_id,
            parent_external_node_id: column(row, "parent_external_node_id")?,
            element_type_id: uuid_column(row, "element_type_id")?,
            element_type_external_id: column(row, "element_type_external_id")?,
            meta_data: optional_json_column(row, "meta_data")?,
        })
    }
}

impl StoredEntity for Source {
    const TABLE: &'static str = "source";
    const KIND: &'static str = "Source";

    fn from_row(row: &SqliteRow) -> StructureResult<Self> {
        let r = EndpointRow::read(row, SOURCE_TABLE.ref_column)?;
        Ok(Self {
            id: r.id,
            external_id: r.external_id,
            stakeholder_key: r.stakeholder_key,
            name: r.name,
            source_type: r.endpoint_type,
            visible: r.visible,
            display_path: r.display_path,
            preset_filters: r.preset_filters,
            passthrough_filters: r.passthrough_filters,
            adapter_key: r.adapter_key,
            source_id: r.adapter_ref_id,
            ref_key: r.ref_key,
            ref_id: r.ref_id,
            meta_data: r.meta_data,
            thing_node_external_ids: r.thing_node_external_ids,
        })
    }
}

impl StoredEntity for Sink {
    const TABLE: &'static str = "sink";
    const KIND: &'static str = "Sink";

    fn from_row(row: &SqliteRow) -> StructureResult<Self> {
        let r = EndpointRow::read(row, SINK_TABLE.ref_column)?;
        Ok(Self {
            id: r.id,
            external_id: r.external_id,
            stakeholder_key: r.stakeholder_key,
            name: r.name,
            sink_type: r.endpoint_type,
            visible: r.visible,
            display_path: r.display_path,
            preset_filters: r.preset_filters,
            passthrough_filters: r.passthrough_filters,
            adapter_key: r.adapter_key,
            sink_id: r.adapter_ref_id,
            ref_key: r.ref_key,
            ref_id: r.ref_id,
            meta_data: r.meta_data,
            thing_node_external_ids: r.thing_node_external_ids,
        })
    }
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> StructureResult<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(StructureError::from_fetch)
}

fn parse_uuid(value: &str) -> StructureResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| StructureError::Fetch(format!("invalid stored id '{}': {}", value, e)))
}

fn uuid_column(row: &SqliteRow, name: &str) -> StructureResult<Uuid> {
    let value: String = column(row, name)?;
    parse_uuid(&value)
}

fn json_column<T: DeserializeOwned>(row: &SqliteRow, name: &str) -> StructureResult<T> {
    let raw: String = column(row, name)?;
    serde_json::from_str(&raw)
        .map_err(|e| StructureError::Fetch(format!("invalid JSON in column '{}': {}", name, e)))
}

fn optional_json_column<T: DeserializeOwned>(
    row: &SqliteRow,
    name: &str,
) -> StructureResult<Option<T>> {
    let raw: Option<String> = column(row, name)?;
    raw.map(|raw| {
        serde_json::from_str(&raw)
            .map_err(|e| StructureError::Fetch(format!("invalid JSON in column '{}': {}", name, e)))
    })
    .transpose()
}

fn to_json<T: serde::Serialize>(value: &T) -> StructureResult<String> {
    serde_json::to_string(value).map_err(|e| StructureError::Update(e.to_string()))
}

fn optional_json<T: serde::Serialize>(value: &Option<T>) -> StructureResult<Option<String>> {
    value.as_ref().map(to_json).transpose()
}
