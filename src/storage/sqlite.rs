use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::cmp::Ordering;
use std::str::FromStr;
use tracing::{debug, info};

use super::{
    entity_content, keyword_match_score, search_keywords, ChunkRecord, CommunityRecord,
    DocumentRecord, EntityRecord, GraphQuery, GraphRow, GraphSnapshot, GraphStore, NodeType,
    RelationshipRecord,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed knowledge graph
#[derive(Clone)]
pub struct SqliteGraphStore {
    pool: SqlitePool,
}

/// Row counts per table, reported after imports.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct GraphCounts {
    pub entities: i64,
    pub relationships: i64,
    pub documents: i64,
    pub chunks: i64,
    pub communities: i64,
}

impl SqliteGraphStore {
    /// Open (creating if needed) the graph database and run migrations
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        MIGRATOR.run(&pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;
        info!(path = %config.path.display(), "Graph database ready");

        Ok(Self { pool })
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or update an entity
    pub async fn upsert_entity(&self, entity: &EntityRecord) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_entity(&mut conn, entity).await
    }

    /// Insert or update a relationship; both ends must already exist
    pub async fn add_relationship(&self, relationship: &RelationshipRecord) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_relationship(&mut conn, relationship).await
    }

    /// Insert a document with its chunks and chunk-entity links
    pub async fn add_document(&self, document: &DocumentRecord) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_document(&mut tx, document).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Insert a community and its members
    pub async fn add_community(&self, community: &CommunityRecord) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_community(&mut tx, community).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Load a whole snapshot in one transaction
    pub async fn import_snapshot(&self, snapshot: &GraphSnapshot) -> StorageResult<GraphCounts> {
        let mut tx = self.pool.begin().await?;
        for entity in &snapshot.entities {
            insert_entity(&mut tx, entity).await?;
        }
        for relationship in &snapshot.relationships {
            insert_relationship(&mut tx, relationship).await?;
        }
        for document in &snapshot.documents {
            insert_document(&mut tx, document).await?;
        }
        for community in &snapshot.communities {
            insert_community(&mut tx, community).await?;
        }
        tx.commit().await?;

        let counts = self.counts().await?;
        info!(
            entities = counts.entities,
            relationships = counts.relationships,
            chunks = counts.chunks,
            "Graph snapshot imported"
        );
        Ok(counts)
    }

    /// Count rows per table
    pub async fn counts(&self) -> StorageResult<GraphCounts> {
        Ok(GraphCounts {
            entities: self.count_rows("entities").await?,
            relationships: self.count_rows("relationships").await?,
            documents: self.count_rows("documents").await?,
            chunks: self.count_rows("chunks").await?,
            communities: self.count_rows("communities").await?,
        })
    }

    async fn count_rows(&self, table: &str) -> StorageResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let count = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn neighbors(&self, entity_id: &str, limit: usize) -> StorageResult<Vec<GraphRow>> {
        let rows: Vec<EntityScoreRow> = sqlx::query_as(
            r#"
            SELECT e.id, e.name, e.description, r.weight AS score
            FROM relationships r
            JOIN entities e
              ON e.id = CASE WHEN r.source_id = ?1 THEN r.target_id ELSE r.source_id END
            WHERE r.source_id = ?1 OR r.target_id = ?1
            ORDER BY r.weight DESC
            LIMIT ?2
            "#,
        )
        .bind(entity_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EntityScoreRow::into_row).collect())
    }

    async fn document_entities(
        &self,
        document_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<GraphRow>> {
        let rows: Vec<EntityScoreRow> = sqlx::query_as(
            r#"
            SELECT DISTINCT e.id, e.name, e.description, e.rank AS score
            FROM chunks c
            JOIN chunk_entities ce ON ce.chunk_id = c.id
            JOIN entities e ON e.id = ce.entity_id
            WHERE c.document_id = ?
            ORDER BY score DESC
            LIMIT ?
            "#,
        )
        .bind(document_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EntityScoreRow::into_row).collect())
    }

    async fn community_entities(
        &self,
        community_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<GraphRow>> {
        let rows: Vec<EntityScoreRow> = sqlx::query_as(
            r#"
            SELECT e.id, e.name, e.description, e.rank AS score
            FROM community_members m
            JOIN entities e ON e.id = m.entity_id
            WHERE m.community_id = ?
            ORDER BY score DESC
            LIMIT ?
            "#,
        )
        .bind(community_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EntityScoreRow::into_row).collect())
    }

    /// Candidates match any keyword via LIKE; scoring happens here so that
    /// both stores rank identically.
    async fn search_chunks(&self, text: &str, limit: usize) -> StorageResult<Vec<GraphRow>> {
        let keywords = search_keywords(text);
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, text FROM chunks WHERE ");
        push_like_any(&mut builder, "text", &keywords);
        builder.push(" ORDER BY document_id, position");

        let candidates: Vec<ChunkRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        debug!(candidates = candidates.len(), "Chunk search candidates");

        let mut rows: Vec<GraphRow> = candidates
            .into_iter()
            .map(|chunk| GraphRow {
                relevance: keyword_match_score(&keywords, &chunk.text),
                id: chunk.id,
                node_type: NodeType::Chunk,
                content: chunk.text,
            })
            .collect();
        rows.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(Ordering::Equal));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn search_entities(&self, text: &str, limit: usize) -> StorageResult<Vec<GraphRow>> {
        let keywords = search_keywords(text);
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, name, description, rank AS score FROM entities WHERE ");
        push_like_any(&mut builder, "(name || ' ' || description)", &keywords);
        builder.push(" ORDER BY rank DESC");

        let candidates: Vec<EntityScoreRow> =
            builder.build_query_as().fetch_all(&self.pool).await?;

        let mut scored: Vec<(f64, f64, GraphRow)> = candidates
            .into_iter()
            .map(|row| {
                let haystack = format!("{} {}", row.name, row.description);
                let score = keyword_match_score(&keywords, &haystack);
                let rank = row.score;
                let mut graph_row = row.into_row();
                graph_row.relevance = score;
                (score, rank, graph_row)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal))
        });
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, _, row)| row)
            .collect())
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn query(&self, query: &GraphQuery) -> StorageResult<Vec<GraphRow>> {
        debug!(kind = query.kind(), "Graph query");
        match query {
            GraphQuery::EntityNeighbors { entity_id, limit } => {
                self.neighbors(entity_id, *limit).await
            }
            GraphQuery::DocumentEntities { document_id, limit } => {
                self.document_entities(document_id, *limit).await
            }
            GraphQuery::CommunityEntities {
                community_id,
                limit,
            } => self.community_entities(community_id, *limit).await,
            GraphQuery::SearchChunks { text, limit } => self.search_chunks(text, *limit).await,
            GraphQuery::SearchEntities { text, limit } => {
                self.search_entities(text, *limit).await
            }
        }
    }
}

fn push_like_any(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, keywords: &[String]) {
    builder.push("(");
    let mut clauses = builder.separated(" OR ");
    for keyword in keywords {
        clauses.push(format!("LOWER({}) LIKE ", column));
        clauses.push_bind_unseparated(format!("%{}%", keyword));
    }
    builder.push(")");
}

async fn entity_exists(conn: &mut SqliteConnection, id: &str) -> StorageResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count > 0)
}

async fn require_entity(conn: &mut SqliteConnection, id: &str) -> StorageResult<()> {
    if entity_exists(conn, id).await? {
        Ok(())
    } else {
        Err(StorageError::not_found("Entity", id))
    }
}

async fn insert_entity(conn: &mut SqliteConnection, entity: &EntityRecord) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO entities (id, name, entity_type, description, rank)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            entity_type = excluded.entity_type,
            description = excluded.description,
            rank = excluded.rank
        "#,
    )
    .bind(&entity.id)
    .bind(&entity.name)
    .bind(&entity.entity_type)
    .bind(&entity.description)
    .bind(entity.rank.clamp(0.0, 1.0))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_relationship(
    conn: &mut SqliteConnection,
    relationship: &RelationshipRecord,
) -> StorageResult<()> {
    require_entity(conn, &relationship.source).await?;
    require_entity(conn, &relationship.target).await?;

    sqlx::query(
        r#"
        INSERT INTO relationships (source_id, target_id, description, weight)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(source_id, target_id) DO UPDATE SET
            description = excluded.description,
            weight = excluded.weight
        "#,
    )
    .bind(&relationship.source)
    .bind(&relationship.target)
    .bind(&relationship.description)
    .bind(relationship.weight.clamp(0.0, 1.0))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_document(conn: &mut SqliteConnection, document: &DocumentRecord) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO documents (id, title) VALUES (?, ?) \
         ON CONFLICT(id) DO UPDATE SET title = excluded.title",
    )
    .bind(&document.id)
    .bind(&document.title)
    .execute(&mut *conn)
    .await?;

    for (position, chunk) in document.chunks.iter().enumerate() {
        insert_chunk(conn, &document.id, position as i64, chunk).await?;
    }
    Ok(())
}

async fn insert_chunk(
    conn: &mut SqliteConnection,
    document_id: &str,
    position: i64,
    chunk: &ChunkRecord,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO chunks (id, document_id, position, text)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            document_id = excluded.document_id,
            position = excluded.position,
            text = excluded.text
        "#,
    )
    .bind(&chunk.id)
    .bind(document_id)
    .bind(position)
    .bind(&chunk.text)
    .execute(&mut *conn)
    .await?;

    for entity_id in &chunk.entity_ids {
        require_entity(conn, entity_id).await?;
        sqlx::query("INSERT OR IGNORE INTO chunk_entities (chunk_id, entity_id) VALUES (?, ?)")
            .bind(&chunk.id)
            .bind(entity_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn insert_community(
    conn: &mut SqliteConnection,
    community: &CommunityRecord,
) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO communities (id, title, summary) VALUES (?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET title = excluded.title, summary = excluded.summary",
    )
    .bind(&community.id)
    .bind(&community.title)
    .bind(&community.summary)
    .execute(&mut *conn)
    .await?;

    for member in &community.members {
        require_entity(conn, member).await?;
        sqlx::query(
            "INSERT OR IGNORE INTO community_members (community_id, entity_id) VALUES (?, ?)",
        )
        .bind(&community.id)
        .bind(member)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct EntityScoreRow {
    id: String,
    name: String,
    description: String,
    score: f64,
}

impl EntityScoreRow {
    fn into_row(self) -> GraphRow {
        GraphRow {
            content: entity_content(&self.name, &self.description),
            id: self.id,
            node_type: NodeType::Entity,
            relevance: self.score.clamp(0.0, 1.0),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ChunkRow {
    id: String,
    text: String,
}
