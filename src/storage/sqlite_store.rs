//! `SQLite` implementation of the conversation store.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row};
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::core::config::StorageConfig;
use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::{ConversationId, MessageId, ProjectId, UserId};
use crate::core::model::{
    Conversation, ConversationStatus, Edge, Fork, Message, MessageRole, Position, Project,
};
use crate::storage::store::{ConversationStore, StoreFuture};
use crate::storage::transaction::{Transaction, WriteOp};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_projects_user ON projects (user_id, updated_at);

    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        parent_id TEXT,
        source_message_id TEXT,
        selection_id TEXT,
        title TEXT NOT NULL,
        status TEXT NOT NULL,
        summary TEXT,
        pos_x REAL NOT NULL,
        pos_y REAL NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_conversations_project
        ON conversations (project_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_conversations_source
        ON conversations (source_message_id);

    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL,
        parent_message_id TEXT,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        summary TEXT,
        source_conversation_id TEXT,
        pos_x REAL NOT NULL,
        pos_y REAL NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_conversation
        ON messages (conversation_id, created_at);

    CREATE TABLE IF NOT EXISTS selections (
        id TEXT PRIMARY KEY,
        text TEXT NOT NULL,
        range_start INTEGER NOT NULL,
        range_end INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS edges (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL,
        source_message_id TEXT NOT NULL,
        target_message_id TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_edges_conversation ON edges (conversation_id);
";

const PROJECT_COLUMNS: &str = "id, user_id, title, created_at, updated_at";
const CONVERSATION_COLUMNS: &str = "id, project_id, parent_id, source_message_id, selection_id, \
     title, status, summary, pos_x, pos_y, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, parent_message_id, role, content, summary, \
     source_conversation_id, pos_x, pos_y, created_at";
const EDGE_COLUMNS: &str = "id, conversation_id, source_message_id, target_message_id, created_at";

/// `SQLite` implementation of [`ConversationStore`].
pub struct SqliteConversationStore {
    conn: Connection,
}

impl SqliteConversationStore {
    /// Open the database file and create tables if needed.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> EngineResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        Self::init(conn).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> EngineResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    async fn query_conversation(
        &self,
        clause: &'static str,
        key: String,
    ) -> EngineResult<Option<Conversation>> {
        let conversation = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations {clause}"),
                        rusqlite::params![key],
                        conversation_from_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(conversation)
    }

    async fn query_message(
        &self,
        clause: &'static str,
        params: Vec<String>,
    ) -> EngineResult<Option<Message>> {
        let message = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {MESSAGE_COLUMNS} FROM messages {clause}"),
                        rusqlite::params_from_iter(params.iter()),
                        message_from_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(message)
    }
}

impl ConversationStore for SqliteConversationStore {
    fn find_project_by_id(&self, id: ProjectId) -> StoreFuture<'_, EngineResult<Option<Project>>> {
        Box::pin(async move {
            let project = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
                            rusqlite::params![id],
                            project_from_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            Ok(project)
        })
    }

    fn find_projects_by_user(&self, user: UserId) -> StoreFuture<'_, EngineResult<Vec<Project>>> {
        Box::pin(async move {
            let projects = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {PROJECT_COLUMNS} FROM projects
                         WHERE user_id = ?1
                         ORDER BY updated_at DESC, rowid DESC"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![user], project_from_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(projects)
        })
    }

    fn find_conversation_by_id(
        &self,
        id: ConversationId,
    ) -> StoreFuture<'_, EngineResult<Option<Conversation>>> {
        Box::pin(async move { self.query_conversation("WHERE id = ?1", id.to_string()).await })
    }

    fn find_oldest_conversation_by_project_id(
        &self,
        project: ProjectId,
    ) -> StoreFuture<'_, EngineResult<Option<Conversation>>> {
        Box::pin(async move {
            self.query_conversation(
                "WHERE project_id = ?1 ORDER BY created_at ASC, rowid ASC LIMIT 1",
                project.to_string(),
            )
            .await
        })
    }

    fn count_conversations_by_project_id(
        &self,
        project: ProjectId,
    ) -> StoreFuture<'_, EngineResult<u64>> {
        Box::pin(async move {
            let count: i64 = self
                .conn
                .call(move |conn| {
                    let count = conn.query_row(
                        "SELECT COUNT(*) FROM conversations WHERE project_id = ?1",
                        rusqlite::params![project],
                        |row| row.get(0),
                    )?;
                    Ok(count)
                })
                .await?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
    }

    fn find_messages_by_conversation_id(
        &self,
        conversation: ConversationId,
    ) -> StoreFuture<'_, EngineResult<Vec<Message>>> {
        Box::pin(async move {
            let messages = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE conversation_id = ?1
                         ORDER BY created_at ASC, rowid ASC"
                    ))?;
                    let mut messages = stmt
                        .query_map(rusqlite::params![conversation], message_from_row)?
                        .collect::<Result<Vec<_>, _>>()?;

                    let mut forks_stmt = conn.prepare(
                        "SELECT c.source_message_id, c.id,
                                COALESCE(s.text, ''),
                                COALESCE(s.range_start, 0),
                                COALESCE(s.range_end, 0)
                         FROM conversations c
                         JOIN messages m ON m.id = c.source_message_id
                         LEFT JOIN selections s ON s.id = c.selection_id
                         WHERE m.conversation_id = ?1
                         ORDER BY c.created_at ASC, c.rowid ASC",
                    )?;
                    let forks = forks_stmt
                        .query_map(rusqlite::params![conversation], |row| {
                            let source: MessageId = row.get(0)?;
                            let fork = Fork {
                                conversation_id: row.get(1)?,
                                selected_text: row.get(2)?,
                                range_start: usize_column(row, 3)?,
                                range_end: usize_column(row, 4)?,
                            };
                            Ok((source, fork))
                        })?
                        .collect::<Result<Vec<_>, _>>()?;

                    let mut by_source: HashMap<MessageId, Vec<Fork>> = HashMap::new();
                    for (source, fork) in forks {
                        by_source.entry(source).or_default().push(fork);
                    }
                    for message in &mut messages {
                        if let Some(forks) = by_source.remove(&message.id) {
                            message.forks = forks;
                        }
                    }
                    Ok(messages)
                })
                .await?;
            debug!(
                conversation_id = %conversation,
                count = messages.len(),
                "loaded messages"
            );
            Ok(messages)
        })
    }

    fn find_message_by_id(&self, id: MessageId) -> StoreFuture<'_, EngineResult<Option<Message>>> {
        Box::pin(async move { self.query_message("WHERE id = ?1", vec![id.to_string()]).await })
    }

    fn find_latest_message_with_summary(
        &self,
        conversation: ConversationId,
    ) -> StoreFuture<'_, EngineResult<Option<Message>>> {
        Box::pin(async move {
            self.query_message(
                "WHERE conversation_id = ?1 AND summary IS NOT NULL AND summary <> ''
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                vec![conversation.to_string()],
            )
            .await
        })
    }

    fn find_latest_message_by_role(
        &self,
        conversation: ConversationId,
        role: MessageRole,
    ) -> StoreFuture<'_, EngineResult<Option<Message>>> {
        Box::pin(async move {
            self.query_message(
                "WHERE conversation_id = ?1 AND role = ?2
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                vec![conversation.to_string(), role.as_str().to_string()],
            )
            .await
        })
    }

    fn count_messages_by_role(
        &self,
        conversation: ConversationId,
        role: MessageRole,
    ) -> StoreFuture<'_, EngineResult<u64>> {
        Box::pin(async move {
            let count: i64 = self
                .conn
                .call(move |conn| {
                    let count = conn.query_row(
                        "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1 AND role = ?2",
                        rusqlite::params![conversation, role.as_str()],
                        |row| row.get(0),
                    )?;
                    Ok(count)
                })
                .await?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
    }

    fn find_edges_by_conversation_id(
        &self,
        conversation: ConversationId,
    ) -> StoreFuture<'_, EngineResult<Vec<Edge>>> {
        Box::pin(async move {
            let edges = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {EDGE_COLUMNS} FROM edges
                         WHERE conversation_id = ?1
                         ORDER BY created_at ASC, rowid ASC"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![conversation], |row| {
                            Ok(Edge {
                                id: row.get(0)?,
                                conversation_id: row.get(1)?,
                                source_message_id: row.get(2)?,
                                target_message_id: row.get(3)?,
                                created_at: timestamp_column(row, 4)?,
                            })
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(edges)
        })
    }

    fn commit(&self, tx: Transaction) -> StoreFuture<'_, EngineResult<()>> {
        Box::pin(async move {
            let ops = tx.into_ops();
            let count = ops.len();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    for op in ops {
                        // Dropping `tx` on rejection rolls back earlier writes.
                        if let Err(rejected) = apply(&tx, op)? {
                            return Ok(Err(rejected));
                        }
                    }
                    tx.commit()?;
                    Ok(Ok(()))
                })
                .await??;
            debug!(writes = count, "transaction committed");
            Ok(())
        })
    }
}

/// Apply one write. The inner error rejects the whole batch.
fn apply(
    conn: &rusqlite::Connection,
    op: WriteOp,
) -> rusqlite::Result<Result<(), EngineError>> {
    match op {
        WriteOp::CreateProject(project) => {
            conn.execute(
                &format!("INSERT INTO projects ({PROJECT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                rusqlite::params![
                    project.id,
                    project.user_id,
                    project.title,
                    project.created_at.timestamp_millis(),
                    project.updated_at.timestamp_millis(),
                ],
            )?;
        }
        WriteOp::CreateConversation(conversation) => {
            conn.execute(
                &format!(
                    "INSERT INTO conversations ({CONVERSATION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                rusqlite::params![
                    conversation.id,
                    conversation.project_id,
                    conversation.parent_id,
                    conversation.source_message_id,
                    conversation.selection_id,
                    conversation.title,
                    conversation.status.as_str(),
                    conversation.summary,
                    conversation.position.x,
                    conversation.position.y,
                    conversation.created_at.timestamp_millis(),
                    conversation.updated_at.timestamp_millis(),
                ],
            )?;
        }
        WriteOp::CreateMessage(message) => {
            conn.execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                rusqlite::params![
                    message.id,
                    message.conversation_id,
                    message.parent_message_id,
                    message.role.as_str(),
                    message.content,
                    message.summary,
                    message.source_conversation_id,
                    message.position.x,
                    message.position.y,
                    message.created_at.timestamp_millis(),
                ],
            )?;
        }
        WriteOp::CreateSelection(selection) => {
            conn.execute(
                "INSERT INTO selections (id, text, range_start, range_end, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    selection.id,
                    selection.text,
                    to_i64(selection.range_start)?,
                    to_i64(selection.range_end)?,
                    selection.created_at.timestamp_millis(),
                ],
            )?;
        }
        WriteOp::CreateEdge(edge) => {
            conn.execute(
                &format!("INSERT INTO edges ({EDGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                rusqlite::params![
                    edge.id,
                    edge.conversation_id,
                    edge.source_message_id,
                    edge.target_message_id,
                    edge.created_at.timestamp_millis(),
                ],
            )?;
        }
        WriteOp::UpdateConversationStatus { id, status, at } => {
            // Merged is terminal.
            let changed = conn.execute(
                "UPDATE conversations SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status <> 'merged'",
                rusqlite::params![status.as_str(), at.timestamp_millis(), id],
            )?;
            if changed == 0 {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
                    rusqlite::params![id],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Err(rusqlite::Error::QueryReturnedNoRows);
                }
                return Ok(Err(EngineError::InvalidState(format!(
                    "conversation {id} is already merged"
                ))));
            }
        }
        WriteOp::UpdateMessageSummary { id, summary } => {
            let changed = conn.execute(
                "UPDATE messages SET summary = ?1 WHERE id = ?2",
                rusqlite::params![summary, id],
            )?;
            if changed == 0 {
                return Err(rusqlite::Error::QueryReturnedNoRows);
            }
        }
    }
    Ok(Ok(()))
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: timestamp_column(row, 3)?,
        updated_at: timestamp_column(row, 4)?,
    })
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let status: String = row.get(6)?;
    let status = status.parse::<ConversationStatus>().map_err(|value| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            format!("unknown conversation status: {value}").into(),
        )
    })?;
    Ok(Conversation {
        id: row.get(0)?,
        project_id: row.get(1)?,
        parent_id: row.get(2)?,
        source_message_id: row.get(3)?,
        selection_id: row.get(4)?,
        title: row.get(5)?,
        status,
        summary: row.get(7)?,
        position: Position::new(row.get(8)?, row.get(9)?),
        created_at: timestamp_column(row, 10)?,
        updated_at: timestamp_column(row, 11)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(3)?;
    let role = role.parse::<MessageRole>().map_err(|value| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown message role: {value}").into(),
        )
    })?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        parent_message_id: row.get(2)?,
        role,
        content: row.get(4)?,
        summary: row.get(5)?,
        source_conversation_id: row.get(6)?,
        position: Position::new(row.get(7)?, row.get(8)?),
        created_at: timestamp_column(row, 9)?,
        forks: Vec::new(),
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("invalid timestamp: {millis}").into(),
        )
    })
}

fn usize_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<usize> {
    let value: i64 = row.get(idx)?;
    usize::try_from(value)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(err)))
}

fn to_i64(value: usize) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Selection;
    use chrono::Duration;

    async fn store() -> SqliteConversationStore {
        SqliteConversationStore::open_in_memory().await.unwrap()
    }

    async fn commit(store: &SqliteConversationStore, build: impl FnOnce(&mut Transaction)) {
        let mut tx = Transaction::new();
        build(&mut tx);
        store.commit(tx).await.unwrap();
    }

    #[tokio::test]
    async fn messages_come_back_in_creation_order() {
        let store = store().await;
        let conversation = Conversation::root(ProjectId::new(), "root");
        let id = conversation.id;
        let base = Utc::now();
        let mut late = Message::user(id, "second");
        late.created_at = base + Duration::seconds(5);
        let mut early = Message::user(id, "first");
        early.created_at = base;
        let mut tied = Message::assistant(id, "third");
        tied.created_at = base + Duration::seconds(5);

        commit(&store, |tx| {
            tx.create_conversation(conversation);
            tx.create_message(late);
            tx.create_message(early);
            tx.create_message(tied);
        })
        .await;

        let contents: Vec<String> = store
            .find_messages_by_conversation_id(id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn forks_are_attached_to_their_source_message() {
        let store = store().await;
        let project = ProjectId::new();
        let parent = Conversation::root(project, "root");
        let anchor = Message::assistant(parent.id, "a long answer");
        let selection = Selection::new("long", 2, 6).unwrap();
        let mut child = Conversation::root(project, "child");
        child.parent_id = Some(parent.id);
        child.source_message_id = Some(anchor.id);
        child.selection_id = Some(selection.id);
        let (parent_id, anchor_id, child_id) = (parent.id, anchor.id, child.id);

        commit(&store, |tx| {
            tx.create_conversation(parent);
            tx.create_message(anchor);
            tx.create_selection(selection);
            tx.create_conversation(child);
        })
        .await;

        let messages = store.find_messages_by_conversation_id(parent_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, anchor_id);
        assert_eq!(
            messages[0].forks,
            vec![Fork {
                conversation_id: child_id,
                selected_text: "long".to_string(),
                range_start: 2,
                range_end: 6,
            }]
        );
    }

    #[tokio::test]
    async fn latest_summary_ignores_empty_values() {
        let store = store().await;
        let conversation = Conversation::root(ProjectId::new(), "root");
        let id = conversation.id;
        let base = Utc::now();
        let mut first = Message::assistant(id, "a1");
        first.summary = Some("S1".to_string());
        first.created_at = base;
        let mut second = Message::assistant(id, "a2");
        second.summary = Some(String::new());
        second.created_at = base + Duration::seconds(1);
        let first_id = first.id;

        commit(&store, |tx| {
            tx.create_conversation(conversation);
            tx.create_message(first);
            tx.create_message(second);
        })
        .await;

        let latest = store.find_latest_message_with_summary(id).await.unwrap().unwrap();
        assert_eq!(latest.id, first_id);
        assert_eq!(
            store
                .count_messages_by_role(id, MessageRole::Assistant)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn oldest_conversation_is_the_root_by_creation_time() {
        let store = store().await;
        let project = ProjectId::new();
        let mut older = Conversation::root(project, "older");
        older.created_at = Utc::now() - Duration::minutes(1);
        // A parentless conversation created later is still not the root.
        let newer = Conversation::root(project, "newer");
        let older_id = older.id;

        commit(&store, |tx| {
            tx.create_conversation(newer);
            tx.create_conversation(older);
        })
        .await;

        let root = store
            .find_oldest_conversation_by_project_id(project)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(root.id, older_id);
        assert_eq!(store.count_conversations_by_project_id(project).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn status_update_on_missing_row_fails() {
        let store = store().await;
        let mut tx = Transaction::new();
        tx.update_conversation_status(ConversationId::new(), ConversationStatus::Closed);
        assert!(store.commit(tx).await.is_err());
    }

    #[tokio::test]
    async fn merged_status_rejects_the_whole_batch() {
        let store = store().await;
        let conversation = Conversation::root(ProjectId::new(), "root");
        let id = conversation.id;
        commit(&store, |tx| {
            tx.create_conversation(conversation);
            tx.update_conversation_status(id, ConversationStatus::Merged);
        })
        .await;

        let mut tx = Transaction::new();
        tx.create_message(Message::user(id, "late"));
        tx.update_conversation_status(id, ConversationStatus::Open);
        let err = store.commit(tx).await.unwrap_err();

        assert!(matches!(err, EngineError::InvalidState(_)));
        assert!(store.find_messages_by_conversation_id(id).await.unwrap().is_empty());
        let stored = store.find_conversation_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ConversationStatus::Merged);
    }

    #[tokio::test]
    async fn projects_are_listed_newest_first() {
        let store = store().await;
        let user = UserId::new();
        let mut old = Project::new(user, "old");
        old.updated_at = Utc::now() - Duration::hours(1);
        let new = Project::new(user, "new");
        let other = Project::new(UserId::new(), "other");

        commit(&store, |tx| {
            tx.create_project(old);
            tx.create_project(new);
            tx.create_project(other);
        })
        .await;

        let titles: Vec<String> = store
            .find_projects_by_user(user)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(titles, vec!["new", "old"]);
    }
}
