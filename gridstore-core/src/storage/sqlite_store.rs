use super::{
    Collection, DocumentCursor, DocumentStore, Filter, FindOptions, IndexModel, SortOrder,
    VecCursor, evaluate_find, register_index, unique_violation,
};
use crate::document::{Document, ObjectId, Value};
use crate::error::{GridError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::SecondsFormat;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Document store persisted in a single SQLite database.
///
/// `_id`, `files_id` and `n` are lifted into indexed columns so chunk lookups
/// by `(files_id, n)` never decode unrelated rows. Top-level binary values
/// are kept as raw BLOBs next to a JSON body holding the remaining fields.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            files_id TEXT,
            n_rank INTEGER,
            n_key,
            body TEXT NOT NULL,
            UNIQUE (collection, doc_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_files_id_n
            ON documents (collection, files_id, n_rank, n_key)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS document_blobs (
            seq INTEGER NOT NULL,
            field TEXT NOT NULL,
            data BLOB NOT NULL,
            PRIMARY KEY (seq, field)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS indexes (
            collection TEXT NOT NULL,
            name TEXT NOT NULL,
            spec TEXT NOT NULL,
            PRIMARY KEY (collection, name)
        )",
        [],
    )?;

    Ok(())
}

/// Text form of a value stored in `doc_id` and `files_id`. Numbers that are
/// equal under `Value::matches` share one form.
fn key_text(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Int32(v) => format!("i:{}", v),
        Value::Int64(v) => format!("i:{}", v),
        Value::Double(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => format!("i:{}", *v as i64),
        Value::Double(v) => format!("d:{}", v),
        Value::String(v) => format!("s:{}", v),
        Value::ObjectId(id) => format!("o:{}", id),
        other => serde_json::to_string(other)?,
    })
}

/// `(n_rank, n_key)` for an `n` value. The rank mirrors the kind order of
/// `compare_values`; within a rank SQLite orders `n_key` the same way.
fn n_columns(value: &Value) -> (i64, SqlValue) {
    match value {
        Value::Null => (0, SqlValue::Null),
        Value::Int32(v) => (1, SqlValue::Integer(i64::from(*v))),
        Value::Int64(v) => (1, SqlValue::Integer(*v)),
        Value::Double(v) => (1, SqlValue::Real(*v)),
        Value::String(v) => (2, SqlValue::Text(v.clone())),
        Value::Document(v) => (3, SqlValue::Integer(v.len() as i64)),
        Value::Array(_) => (4, SqlValue::Null),
        Value::Binary(v) => (5, SqlValue::Blob(v.to_vec())),
        Value::ObjectId(v) => (6, SqlValue::Blob(v.bytes().to_vec())),
        Value::Bool(v) => (7, SqlValue::Integer(i64::from(*v))),
        Value::DateTime(v) => (
            8,
            SqlValue::Text(v.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        ),
    }
}

/// Whether equality on `value` can be answered from the lifted columns.
fn is_pushable(value: &Value) -> bool {
    match value {
        Value::Array(_) | Value::Document(_) => false,
        Value::Double(v) => !v.is_nan(),
        _ => true,
    }
}

/// Splits top-level binary values out of `doc`, leaving `Null` in their place.
fn split_blobs(doc: &Document) -> (Document, Vec<(String, Bytes)>) {
    let mut body = Document::new();
    let mut blobs = Vec::new();
    for (field, value) in doc.iter() {
        match value {
            Value::Binary(data) => {
                body.insert(field, Value::Null);
                blobs.push((field.to_string(), data.clone()));
            }
            other => body.insert(field, other.clone()),
        }
    }
    (body, blobs)
}

/// ORDER BY for sorts SQLite can evaluate itself: insertion order, or `n`.
fn sql_order(sort: &[(String, SortOrder)]) -> Option<String> {
    let mut terms = Vec::new();
    for (field, order) in sort {
        if field != "n" {
            return None;
        }
        let dir = match order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        terms.push(format!("n_rank {dir}, n_key {dir}"));
    }
    terms.push("seq ASC".to_string());
    Some(terms.join(", "))
}

fn sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// WHERE clause built from the filter clauses the lifted columns answer.
struct Query {
    conditions: Vec<&'static str>,
    params: Vec<SqlValue>,
}

impl Query {
    fn new(collection: &str) -> Self {
        Self {
            conditions: vec!["collection = ?"],
            params: vec![SqlValue::Text(collection.to_string())],
        }
    }

    /// Splits `filter` into SQL conditions and the clauses left for the
    /// in-memory matcher.
    fn plan(collection: &str, filter: &Filter) -> Result<(Self, Filter)> {
        let mut query = Self::new(collection);
        let mut residual = Filter::all();
        for (field, value) in filter.clauses() {
            if !query.push_eq(field, value)? {
                residual = residual.and_eq(field.clone(), value.clone());
            }
        }
        Ok((query, residual))
    }

    /// Returns false when `field == value` has to be checked on the decoded
    /// document instead.
    fn push_eq(&mut self, field: &str, value: &Value) -> Result<bool> {
        if !is_pushable(value) {
            return Ok(false);
        }
        match field {
            "_id" => {
                self.conditions.push("doc_id = ?");
                self.params.push(SqlValue::Text(key_text(value)?));
            }
            "files_id" => {
                self.conditions.push("files_id = ?");
                self.params.push(SqlValue::Text(key_text(value)?));
            }
            "n" => {
                let (rank, key) = n_columns(value);
                self.conditions.push("n_rank = ?");
                self.params.push(SqlValue::Integer(rank));
                if !matches!(key, SqlValue::Null) {
                    self.conditions.push("n_key = ?");
                    self.params.push(key);
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn where_clause(&self) -> String {
        self.conditions.join(" AND ")
    }
}

impl DocumentStore for SqliteStore {
    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(SqliteCollection {
            name: name.to_string(),
            conn: self.conn.clone(),
        })
    }
}

pub struct SqliteCollection {
    name: String,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCollection {
    /// Rows matching `query` in `order`, optionally windowed by
    /// `(limit, offset)`, with their binary fields restored.
    fn load(
        &self,
        conn: &Connection,
        query: &Query,
        order: &str,
        window: Option<(i64, i64)>,
    ) -> Result<Vec<(i64, Document)>> {
        let mut sql = format!(
            "SELECT seq, body FROM documents WHERE {} ORDER BY {}",
            query.where_clause(),
            order
        );
        let mut params = query.params.clone();
        if let Some((limit, offset)) = window {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(limit));
            params.push(SqlValue::Integer(offset));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut blobs = conn.prepare("SELECT field, data FROM document_blobs WHERE seq = ?1")?;

        let mut docs = Vec::new();
        for row in rows {
            let (seq, body) = row?;
            let mut doc: Document = serde_json::from_str(&body)?;
            let fields = blobs.query_map([seq], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            for field in fields {
                let (field, data) = field?;
                doc.insert(field, Bytes::from(data));
            }
            docs.push((seq, doc));
        }
        Ok(docs)
    }

    fn select(
        &self,
        conn: &Connection,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>> {
        let (query, residual) = Query::plan(&self.name, filter)?;

        let order = if residual.is_empty() {
            sql_order(&options.sort)
        } else {
            None
        };
        if let Some(order) = order {
            let limit = options.limit.map(sql_count).unwrap_or(-1);
            let window = (limit, sql_count(options.skip));
            let rows = self.load(conn, &query, &order, Some(window))?;
            return Ok(rows.into_iter().map(|(_, doc)| doc).collect());
        }

        let rows = self.load(conn, &query, "seq", None)?;
        Ok(evaluate_find(
            rows.into_iter().map(|(_, doc)| doc),
            &residual,
            options,
        ))
    }

    /// Describes the clash when `doc` repeats the key of the unique `index`.
    /// Only rows sharing the lifted key columns are decoded.
    fn find_clash(
        &self,
        conn: &Connection,
        index: &IndexModel,
        doc: &Document,
    ) -> Result<Option<String>> {
        let mut query = Query::new(&self.name);
        for (field, _) in &index.keys {
            if let Some(value) = doc.get(field).filter(|v| !matches!(v, Value::Null)) {
                query.push_eq(field, value)?;
            }
        }
        let candidates: Vec<Document> = self
            .load(conn, &query, "seq", None)?
            .into_iter()
            .map(|(_, doc)| doc)
            .collect();
        Ok(unique_violation(
            std::slice::from_ref(index),
            candidates.iter(),
            doc,
        ))
    }

    fn load_indexes(&self, conn: &Connection) -> Result<Vec<IndexModel>> {
        let mut stmt = conn.prepare("SELECT spec FROM indexes WHERE collection = ?1")?;
        let rows = stmt.query_map([&self.name], |row| row.get::<_, String>(0))?;

        let mut indexes = Vec::new();
        for row in rows {
            indexes.push(serde_json::from_str(&row?)?);
        }
        Ok(indexes)
    }
}

#[async_trait]
impl Collection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, mut doc: Document) -> Result<Value> {
        let id = match doc.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Value::ObjectId(ObjectId::new());
                doc.insert("_id", id.clone());
                id
            }
        };

        let mut conn = self.conn.lock().await;

        for index in self.load_indexes(&conn)?.iter().filter(|index| index.unique) {
            if let Some(violation) = self.find_clash(&conn, index, &doc)? {
                return Err(GridError::DuplicateKey(format!("{}: {}", self.name, violation)));
            }
        }

        let doc_id = key_text(&id)?;
        let files_id = doc.get("files_id").map(key_text).transpose()?;
        let (n_rank, n_key) = match doc.get("n") {
            Some(n) => {
                let (rank, key) = n_columns(n);
                (Some(rank), key)
            }
            None => (None, SqlValue::Null),
        };
        let (body, blobs) = split_blobs(&doc);
        let body = serde_json::to_string(&body)?;

        let tx = conn.transaction()?;
        match tx.execute(
            "INSERT INTO documents (collection, doc_id, files_id, n_rank, n_key, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![self.name, doc_id, files_id, n_rank, n_key, body],
        ) {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(GridError::DuplicateKey(format!("{}: _id {}", self.name, doc_id)));
            }
            Err(e) => return Err(e.into()),
        }

        let seq = tx.last_insert_rowid();
        for (field, data) in &blobs {
            tx.execute(
                "INSERT INTO document_blobs (seq, field, data) VALUES (?1, ?2, ?3)",
                params![seq, field, data.as_ref()],
            )?;
        }
        tx.commit()?;

        Ok(id)
    }

    async fn delete_many(&self, filter: Filter) -> Result<u64> {
        let mut conn = self.conn.lock().await;
        let (query, residual) = Query::plan(&self.name, &filter)?;
        let tx = conn.transaction()?;

        let removed = if residual.is_empty() {
            let where_clause = query.where_clause();
            tx.execute(
                &format!(
                    "DELETE FROM document_blobs WHERE seq IN
                        (SELECT seq FROM documents WHERE {})",
                    where_clause
                ),
                params_from_iter(query.params.iter()),
            )?;
            tx.execute(
                &format!("DELETE FROM documents WHERE {}", where_clause),
                params_from_iter(query.params.iter()),
            )? as u64
        } else {
            let targets: Vec<i64> = self
                .load(&tx, &query, "seq", None)?
                .into_iter()
                .filter(|(_, doc)| residual.matches(doc))
                .map(|(seq, _)| seq)
                .collect();
            for seq in &targets {
                tx.execute("DELETE FROM document_blobs WHERE seq = ?1", [seq])?;
                tx.execute("DELETE FROM documents WHERE seq = ?1", [seq])?;
            }
            targets.len() as u64
        };

        tx.commit()?;
        Ok(removed)
    }

    async fn find(&self, filter: Filter, options: FindOptions) -> Result<Box<dyn DocumentCursor>> {
        let conn = self.conn.lock().await;
        let docs = self.select(&conn, &filter, &options)?;
        Ok(Box::new(VecCursor::new(docs)))
    }

    async fn create_index(&self, index: IndexModel) -> Result<()> {
        let conn = self.conn.lock().await;

        let mut indexes = self.load_indexes(&conn)?;
        if indexes.iter().any(|existing| *existing == index) {
            return Ok(());
        }

        if index.unique {
            let docs: Vec<Document> = self
                .load(&conn, &Query::new(&self.name), "seq", None)?
                .into_iter()
                .map(|(_, doc)| doc)
                .collect();
            for (pos, doc) in docs.iter().enumerate() {
                if let Some(violation) =
                    unique_violation(std::slice::from_ref(&index), docs[..pos].iter(), doc)
                {
                    return Err(GridError::DuplicateKey(format!(
                        "{}: cannot build {}",
                        self.name, violation
                    )));
                }
            }
        }

        let spec = serde_json::to_string(&index)?;
        let name = index.name.clone();
        register_index(&mut indexes, index)?;
        conn.execute(
            "INSERT OR REPLACE INTO indexes (collection, name, spec) VALUES (?1, ?2, ?3)",
            params![self.name, name, spec],
        )?;
        Ok(())
    }

    async fn drop_collection(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM document_blobs WHERE seq IN
                (SELECT seq FROM documents WHERE collection = ?1)",
            [&self.name],
        )?;
        tx.execute("DELETE FROM documents WHERE collection = ?1", [&self.name])?;
        tx.execute("DELETE FROM indexes WHERE collection = ?1", [&self.name])?;
        tx.commit()?;
        Ok(())
    }
}
