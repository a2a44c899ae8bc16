//! libSQL persistence for the question/answer lifecycle.
//!
//! The pipeline reads questions with [`Store::find_question`] and writes a
//! terminal state exactly once: [`Store::save_answer`] applies the answer
//! row, its mode-shaped children, and the `SUCCESS` flip in one
//! transaction, and [`Store::mark_failure`] flips to `FAILURE`. Both only
//! transition a question out of `PENDING`, which keeps the status
//! monotonic even if a stale id is re-submitted.

mod migrations;

use askpipe_core::{AnswerPayload, Error, Mode, Question, Reference, Result, Status};
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Database, Transaction};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

fn db_err(e: impl std::fmt::Display) -> Error {
    Error::Persistence(e.to_string())
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Persistence(format!("bad timestamp {s:?}: {e}")))
}

/// An answer as read back for the polling collaborator: message plus the
/// mode-shaped children.
#[derive(Debug, Clone, Serialize)]
pub struct StoredAnswer {
    pub id: String,
    pub question_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub related_terms: Vec<String>,
    pub references: Vec<Reference>,
}

pub struct Store {
    db: Database,
    conn: Connection,
    // Serializes writers. Status flips run on the shared connection, but
    // `save_answer` opens its own connection for its transaction, so a
    // concurrent write can never join (or abort inside) another run's
    // transaction.
    write_lock: tokio::sync::Mutex<()>,
}

impl Store {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(db_err)?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let store = Self {
            db,
            conn,
            write_lock: tokio::sync::Mutex::new(()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;
        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    Error::Persistence(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;
        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Insert a new question in `PENDING` state.
    ///
    /// This is the collaborator web layer's write; it lives here so tests
    /// and embedders can drive the full lifecycle.
    pub async fn create_question(
        &self,
        message: &str,
        user_id: &str,
        mode: Mode,
    ) -> Result<Question> {
        let question = Question {
            id: Uuid::new_v4().to_string(),
            message: message.to_string(),
            user_id: user_id.to_string(),
            mode,
            status: Status::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let _writer = self.write_lock.lock().await;
        self.conn
            .execute(
                "INSERT INTO questions (id, message, user_id, mode, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    question.id.as_str(),
                    question.message.as_str(),
                    question.user_id.as_str(),
                    question.mode.as_str(),
                    question.status.as_str(),
                    question.created_at.to_rfc3339(),
                    question.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(question)
    }

    pub async fn find_question(&self, id: &str) -> Result<Option<Question>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, message, user_id, mode, status, created_at, updated_at
                 FROM questions WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };

        Ok(Some(Question {
            id: row.get::<String>(0).map_err(db_err)?,
            message: row.get::<String>(1).map_err(db_err)?,
            user_id: row.get::<String>(2).map_err(db_err)?,
            mode: row.get::<String>(3).map_err(db_err)?.parse()?,
            status: row.get::<String>(4).map_err(db_err)?.parse()?,
            created_at: parse_ts(&row.get::<String>(5).map_err(db_err)?)?,
            updated_at: parse_ts(&row.get::<String>(6).map_err(db_err)?)?,
        }))
    }

    /// Atomically persist a successful answer: the answer row, its
    /// mode-shaped children, and the `PENDING -> SUCCESS` flip. Rolls back
    /// entirely on any write error; rejects payloads whose variant
    /// contradicts the question mode and questions already in a terminal
    /// state.
    pub async fn save_answer(&self, question: &Question, payload: &AnswerPayload) -> Result<()> {
        if payload.mode() != question.mode {
            return Err(Error::Persistence(format!(
                "answer payload is {} but question {} is {}",
                payload.mode(),
                question.id,
                question.mode
            )));
        }

        let _writer = self.write_lock.lock().await;
        let conn = self.db.connect().map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;
        match Self::write_answer(&tx, question, payload).await {
            Ok(()) => tx.commit().await.map_err(db_err),
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn write_answer(
        tx: &Transaction,
        question: &Question,
        payload: &AnswerPayload,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let answer_id = Uuid::new_v4().to_string();

        tx.execute(
            "INSERT INTO answers (id, question_id, message, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                answer_id.as_str(),
                question.id.as_str(),
                payload.message(),
                now.as_str()
            ],
        )
        .await
        .map_err(db_err)?;

        match payload {
            AnswerPayload::Direct { related_terms, .. } => {
                for term in related_terms {
                    tx.execute(
                        "INSERT INTO related_terms (answer_id, term) VALUES (?1, ?2)",
                        params![answer_id.as_str(), term.as_str()],
                    )
                    .await
                    .map_err(db_err)?;
                }
            }
            AnswerPayload::Search { references, .. } => {
                for (position, r) in references.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO answer_references (answer_id, position, title, url)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            answer_id.as_str(),
                            position as i64,
                            r.title.as_str(),
                            r.url.as_str()
                        ],
                    )
                    .await
                    .map_err(db_err)?;
                }
            }
        }

        let changed = tx
            .execute(
                "UPDATE questions SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = ?4",
                params![
                    Status::Success.as_str(),
                    now.as_str(),
                    question.id.as_str(),
                    Status::Pending.as_str()
                ],
            )
            .await
            .map_err(db_err)?;
        if changed != 1 {
            return Err(Error::Persistence(format!(
                "question {} is no longer PENDING",
                question.id
            )));
        }
        Ok(())
    }

    /// Flip a `PENDING` question to `FAILURE`. Returns whether a row
    /// transitioned; a question already in a terminal state is untouched.
    pub async fn mark_failure(&self, question_id: &str) -> Result<bool> {
        let _writer = self.write_lock.lock().await;
        let changed = self
            .conn
            .execute(
                "UPDATE questions SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = ?4",
                params![
                    Status::Failure.as_str(),
                    Utc::now().to_rfc3339(),
                    question_id,
                    Status::Pending.as_str()
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// The stored answer for a question, with its children, if one exists.
    pub async fn find_answer(&self, question_id: &str) -> Result<Option<StoredAnswer>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, question_id, message, created_at
                 FROM answers WHERE question_id = ?1",
                params![question_id],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };

        let mut answer = StoredAnswer {
            id: row.get::<String>(0).map_err(db_err)?,
            question_id: row.get::<String>(1).map_err(db_err)?,
            message: row.get::<String>(2).map_err(db_err)?,
            created_at: parse_ts(&row.get::<String>(3).map_err(db_err)?)?,
            related_terms: Vec::new(),
            references: Vec::new(),
        };

        let mut term_rows = self
            .conn
            .query(
                "SELECT term FROM related_terms WHERE answer_id = ?1",
                params![answer.id.as_str()],
            )
            .await
            .map_err(db_err)?;
        while let Some(r) = term_rows.next().await.map_err(db_err)? {
            answer.related_terms.push(r.get::<String>(0).map_err(db_err)?);
        }

        let mut ref_rows = self
            .conn
            .query(
                "SELECT title, url FROM answer_references
                 WHERE answer_id = ?1 ORDER BY position",
                params![answer.id.as_str()],
            )
            .await
            .map_err(db_err)?;
        while let Some(r) = ref_rows.next().await.map_err(db_err)? {
            answer.references.push(Reference {
                title: r.get::<String>(0).map_err(db_err)?,
                url: r.get::<String>(1).map_err(db_err)?,
            });
        }

        Ok(Some(answer))
    }
}
