//! SQL migration definitions for the askpipe database.
//!
//! Migrations are applied in ascending version order on database open.

pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: questions, answers, related_terms, answer_references",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Questions. Status is monotonic: PENDING -> SUCCESS | FAILURE.
CREATE TABLE IF NOT EXISTS questions (
    id         TEXT PRIMARY KEY,
    message    TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    mode       TEXT NOT NULL,
    status     TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- At most one answer per question, written only on success.
CREATE TABLE IF NOT EXISTS answers (
    id          TEXT PRIMARY KEY,
    question_id TEXT NOT NULL UNIQUE REFERENCES questions(id),
    message     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

-- Direct-knowledge children, unordered.
CREATE TABLE IF NOT EXISTS related_terms (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    answer_id TEXT NOT NULL REFERENCES answers(id) ON DELETE CASCADE,
    term      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_related_terms_answer ON related_terms(answer_id);

-- Search-augmented children, ranking order kept in `position`.
CREATE TABLE IF NOT EXISTS answer_references (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    answer_id TEXT NOT NULL REFERENCES answers(id) ON DELETE CASCADE,
    position  INTEGER NOT NULL,
    title     TEXT NOT NULL,
    url       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_answer_references_answer ON answer_references(answer_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
