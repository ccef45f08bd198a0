//! SQLite-backed legacy store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};

use crate::core::{
    AccountId, ApprovalRow, Change, ChangeBundle, ChangeId, ChangeKey, ChangeStatus, CommentRow,
    CommentStatus, HashtagRow, LabelType, MessageRow, PatchSetId, PatchSetRow, RepoName, Timestamp,
};

use super::{ChangeFilter, ChangeWrite, LegacyError, LegacyStore, LegacyWrites};

const SCHEMA_VERSION: u32 = 1;
const BUSY_TIMEOUT_MS: u64 = 5_000;

const CHANGE_COLUMNS: &str = "change_id, repo, branch, subject, owner, status, current_patch_set, \
     created_on, last_updated_on, note_db_state, row_version";

pub struct SqliteLegacyStore {
    path: PathBuf,
    conn: Connection,
}

impl SqliteLegacyStore {
    /// Create the database (and parent directory) if needed and open it.
    pub fn create(path: &Path) -> Result<Self, LegacyError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| LegacyError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let conn = open_connection(path, true)?;
        if !table_exists(&conn, "meta")? {
            initialize_schema(&conn)?;
        }
        validate_schema(&conn)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    /// Open an existing database.
    pub fn open(path: &Path) -> Result<Self, LegacyError> {
        let conn = open_connection(path, false)?;
        validate_schema(&conn)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn define_label(&self, label: &LabelType) -> Result<(), LegacyError> {
        self.conn.execute(
            "INSERT INTO label_types (name, min_value, max_value) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET min_value = excluded.min_value, max_value = excluded.max_value",
            params![label.name, label.min, label.max],
        )?;
        Ok(())
    }

    fn read_rows<T>(
        &self,
        sql: &str,
        id: ChangeId,
        map: impl Fn(&Row<'_>) -> Result<T, LegacyError>,
    ) -> Result<Vec<T>, LegacyError> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params![id.get()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(map(row)?);
        }
        Ok(out)
    }
}

impl LegacyStore for SqliteLegacyStore {
    fn read_change(&self, id: ChangeId) -> Result<Option<Change>, LegacyError> {
        let sql = format!("SELECT {CHANGE_COLUMNS} FROM changes WHERE change_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id.get()], |row| Ok(RawChange::from_row(row)))
            .optional()?;
        row.map(|raw| raw?.decode()).transpose()
    }

    fn read_bundle(&self, id: ChangeId) -> Result<ChangeBundle, LegacyError> {
        let change = self
            .read_change(id)?
            .ok_or(LegacyError::NoSuchChange(id))?;

        let patch_sets = self.read_rows(
            "SELECT patch_set_id, revision, uploader, created_on FROM patch_sets
             WHERE change_id = ?1 ORDER BY patch_set_id",
            id,
            |row| {
                let ps: i64 = row.get(0)?;
                Ok(PatchSetRow {
                    change: id,
                    id: patch_set_id("patch_sets", ps, ps)?,
                    revision: row.get(1)?,
                    uploader: account_id("patch_sets", ps, row.get(2)?)?,
                    created_on: Timestamp::from_millis(row.get(3)?),
                })
            },
        )?;

        let approvals = self.read_rows(
            "SELECT row_id, patch_set_id, account_id, label, value, granted FROM approvals
             WHERE change_id = ?1 ORDER BY row_id",
            id,
            |row| {
                let row_id: i64 = row.get(0)?;
                let value: Option<i64> = row.get(4)?;
                let value = value
                    .map(|v| {
                        i16::try_from(v).map_err(|_| LegacyError::CorruptRow {
                            table: "approvals",
                            row: row_id,
                            reason: format!("vote value {v} out of range"),
                        })
                    })
                    .transpose()?;
                Ok(ApprovalRow {
                    row_id,
                    change: id,
                    patch_set: patch_set_id("approvals", row_id, row.get(1)?)?,
                    account: account_id("approvals", row_id, row.get(2)?)?,
                    label: row.get(3)?,
                    value,
                    granted: Timestamp::from_millis(row.get(5)?),
                })
            },
        )?;

        let messages = self.read_rows(
            "SELECT row_id, uuid, author, written_on, patch_set_id, message FROM messages
             WHERE change_id = ?1 ORDER BY row_id",
            id,
            |row| {
                let row_id: i64 = row.get(0)?;
                let author: Option<i64> = row.get(2)?;
                let patch_set: Option<i64> = row.get(4)?;
                Ok(MessageRow {
                    row_id,
                    change: id,
                    uuid: row.get(1)?,
                    author: author
                        .map(|a| account_id("messages", row_id, a))
                        .transpose()?,
                    written_on: Timestamp::from_millis(row.get(3)?),
                    patch_set: patch_set
                        .map(|ps| patch_set_id("messages", row_id, ps))
                        .transpose()?,
                    message: row.get(5)?,
                })
            },
        )?;

        let comments = self.read_rows(
            "SELECT row_id, patch_set_id, uuid, author, written_on, file, line, message, status
             FROM comments WHERE change_id = ?1 ORDER BY row_id",
            id,
            |row| {
                let row_id: i64 = row.get(0)?;
                let line: Option<i64> = row.get(6)?;
                let status: String = row.get(8)?;
                let status = match status.as_str() {
                    "published" => CommentStatus::Published,
                    "draft" => CommentStatus::Draft,
                    other => {
                        return Err(LegacyError::CorruptRow {
                            table: "comments",
                            row: row_id,
                            reason: format!("unknown comment status `{other}`"),
                        });
                    }
                };
                Ok(CommentRow {
                    row_id,
                    change: id,
                    patch_set: patch_set_id("comments", row_id, row.get(1)?)?,
                    uuid: row.get(2)?,
                    author: account_id("comments", row_id, row.get(3)?)?,
                    written_on: Timestamp::from_millis(row.get(4)?),
                    file: row.get(5)?,
                    line: line.and_then(|l| u32::try_from(l).ok()),
                    message: row.get(7)?,
                    status,
                })
            },
        )?;

        let hashtags = self.read_rows(
            "SELECT row_id, account_id, added_on, hashtag FROM hashtags
             WHERE change_id = ?1 ORDER BY row_id",
            id,
            |row| {
                let row_id: i64 = row.get(0)?;
                Ok(HashtagRow {
                    row_id,
                    change: id,
                    account: account_id("hashtags", row_id, row.get(1)?)?,
                    added_on: Timestamp::from_millis(row.get(2)?),
                    hashtag: row.get(3)?,
                })
            },
        )?;

        Ok(ChangeBundle {
            change,
            patch_sets,
            approvals,
            messages,
            comments,
            hashtags,
            label_types: self.label_types()?,
        })
    }

    fn list_changes(&self, filter: &ChangeFilter) -> Result<Vec<ChangeKey>, LegacyError> {
        let mut stmt = self
            .conn
            .prepare("SELECT change_id, repo FROM changes ORDER BY change_id")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let raw_id: i64 = row.get(0)?;
            let repo: String = row.get(1)?;
            let id = change_id("changes", raw_id, raw_id)?;
            let repo = RepoName::new(repo).map_err(|err| LegacyError::CorruptRow {
                table: "changes",
                row: raw_id,
                reason: err.to_string(),
            })?;
            let keep = match filter {
                ChangeFilter::All => true,
                ChangeFilter::Repos(repos) => repos.contains(&repo),
                ChangeFilter::Changes(ids) => ids.contains(&id),
            };
            if keep {
                out.push(ChangeKey::new(repo, id));
            }
        }
        Ok(out)
    }

    fn max_change_id(&self) -> Result<Option<ChangeId>, LegacyError> {
        let max: Option<i64> =
            self.conn
                .query_row("SELECT MAX(change_id) FROM changes", [], |row| row.get(0))?;
        max.map(|id| change_id("changes", id, id)).transpose()
    }

    fn label_types(&self) -> Result<Vec<LabelType>, LegacyError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, min_value, max_value FROM label_types ORDER BY name")?;
        let labels = stmt
            .query_map([], |row| {
                Ok(LabelType {
                    name: row.get(0)?,
                    min: row.get(1)?,
                    max: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    fn commit(&self, writes: &LegacyWrites) -> Result<(), LegacyError> {
        if writes.is_empty() {
            return Ok(());
        }
        let txn = Txn::begin(&self.conn)?;
        for write in &writes.changes {
            txn.write_change(write)?;
        }
        for ps in &writes.patch_sets {
            txn.conn.execute(
                "INSERT INTO patch_sets (change_id, patch_set_id, revision, uploader, created_on)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    ps.change.get(),
                    ps.id.get(),
                    ps.revision,
                    ps.uploader.get(),
                    ps.created_on.as_millis()
                ],
            )?;
        }
        for approval in &writes.approvals {
            txn.conn.execute(
                "INSERT INTO approvals (change_id, patch_set_id, account_id, label, value, granted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(change_id, patch_set_id, account_id, label)
                 DO UPDATE SET value = excluded.value, granted = excluded.granted",
                params![
                    approval.change.get(),
                    approval.patch_set.get(),
                    approval.account.get(),
                    approval.label,
                    approval.value,
                    approval.granted.as_millis()
                ],
            )?;
        }
        for message in &writes.messages {
            txn.conn.execute(
                "INSERT INTO messages (change_id, uuid, author, written_on, patch_set_id, message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.change.get(),
                    message.uuid,
                    message.author.map(AccountId::get),
                    message.written_on.as_millis(),
                    message.patch_set.map(PatchSetId::get),
                    message.message
                ],
            )?;
        }
        for comment in &writes.comments {
            txn.conn.execute(
                "INSERT INTO comments
                   (change_id, patch_set_id, uuid, author, written_on, file, line, message, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    comment.change.get(),
                    comment.patch_set.get(),
                    comment.uuid,
                    comment.author.get(),
                    comment.written_on.as_millis(),
                    comment.file,
                    comment.line,
                    comment.message,
                    comment.status.as_str()
                ],
            )?;
        }
        for hashtag in &writes.hashtags {
            txn.conn.execute(
                "INSERT INTO hashtags (change_id, account_id, added_on, hashtag)
                 VALUES (?1, ?2, ?3, ?4) ON CONFLICT(change_id, hashtag) DO NOTHING",
                params![
                    hashtag.change.get(),
                    hashtag.account.get(),
                    hashtag.added_on.as_millis(),
                    hashtag.hashtag
                ],
            )?;
        }
        txn.commit()
    }
}

/// `BEGIN IMMEDIATE` guard; rolls back on drop unless committed.
struct Txn<'c> {
    conn: &'c Connection,
    done: bool,
}

impl<'c> Txn<'c> {
    fn begin(conn: &'c Connection) -> Result<Self, LegacyError> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self { conn, done: false })
    }

    fn write_change(&self, write: &ChangeWrite) -> Result<(), LegacyError> {
        match write {
            ChangeWrite::Insert(change) => {
                let exists: Option<i64> = self
                    .conn
                    .query_row(
                        "SELECT 1 FROM changes WHERE change_id = ?1",
                        params![change.id.get()],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_some() {
                    return Err(LegacyError::ChangeExists(change.id));
                }
                let sql = format!(
                    "INSERT INTO changes ({CHANGE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)"
                );
                self.conn.execute(
                    &sql,
                    params![
                        change.id.get(),
                        change.repo.as_str(),
                        change.branch,
                        change.subject,
                        change.owner.get(),
                        change.status.as_str(),
                        change.current_patch_set.map(PatchSetId::get),
                        change.created_on.as_millis(),
                        change.last_updated_on.as_millis(),
                        change.note_db_state
                    ],
                )?;
            }
            ChangeWrite::Update {
                change,
                expected_version,
            } => {
                let expected = i64::try_from(*expected_version).unwrap_or(i64::MAX);
                let updated = self.conn.execute(
                    "UPDATE changes SET repo = ?2, branch = ?3, subject = ?4, owner = ?5,
                       status = ?6, current_patch_set = ?7, created_on = ?8,
                       last_updated_on = ?9, note_db_state = ?10, row_version = row_version + 1
                     WHERE change_id = ?1 AND row_version = ?11",
                    params![
                        change.id.get(),
                        change.repo.as_str(),
                        change.branch,
                        change.subject,
                        change.owner.get(),
                        change.status.as_str(),
                        change.current_patch_set.map(PatchSetId::get),
                        change.created_on.as_millis(),
                        change.last_updated_on.as_millis(),
                        change.note_db_state,
                        expected
                    ],
                )?;
                if updated == 0 {
                    let actual: Option<i64> = self
                        .conn
                        .query_row(
                            "SELECT row_version FROM changes WHERE change_id = ?1",
                            params![change.id.get()],
                            |row| row.get(0),
                        )
                        .optional()?;
                    return Err(match actual {
                        None => LegacyError::NoSuchChange(change.id),
                        Some(actual) => LegacyError::RowVersionConflict {
                            change: change.id,
                            expected: *expected_version,
                            actual: u64::try_from(actual).unwrap_or_default(),
                        },
                    });
                }
            }
        }
        Ok(())
    }

    fn commit(mut self) -> Result<(), LegacyError> {
        self.conn.execute_batch("COMMIT")?;
        self.done = true;
        Ok(())
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

struct RawChange {
    id: i64,
    repo: String,
    branch: String,
    subject: String,
    owner: i64,
    status: String,
    current_patch_set: Option<i64>,
    created_on: i64,
    last_updated_on: i64,
    note_db_state: Option<String>,
    row_version: i64,
}

impl RawChange {
    fn from_row(row: &Row<'_>) -> Result<Self, LegacyError> {
        Ok(Self {
            id: row.get(0)?,
            repo: row.get(1)?,
            branch: row.get(2)?,
            subject: row.get(3)?,
            owner: row.get(4)?,
            status: row.get(5)?,
            current_patch_set: row.get(6)?,
            created_on: row.get(7)?,
            last_updated_on: row.get(8)?,
            note_db_state: row.get(9)?,
            row_version: row.get(10)?,
        })
    }

    fn decode(self) -> Result<Change, LegacyError> {
        let corrupt = |reason: String| LegacyError::CorruptRow {
            table: "changes",
            row: self.id,
            reason,
        };
        Ok(Change {
            id: change_id("changes", self.id, self.id)?,
            repo: RepoName::new(self.repo.clone()).map_err(|err| corrupt(err.to_string()))?,
            branch: self.branch.clone(),
            subject: self.subject.clone(),
            owner: account_id("changes", self.id, self.owner)?,
            status: self
                .status
                .parse::<ChangeStatus>()
                .map_err(|err| corrupt(err.to_string()))?,
            current_patch_set: self
                .current_patch_set
                .map(|ps| patch_set_id("changes", self.id, ps))
                .transpose()?,
            created_on: Timestamp::from_millis(self.created_on),
            last_updated_on: Timestamp::from_millis(self.last_updated_on),
            note_db_state: self.note_db_state.clone(),
            row_version: u64::try_from(self.row_version)
                .map_err(|_| corrupt("negative row version".into()))?,
        })
    }
}

fn positive(table: &'static str, row: i64, raw: i64, what: &str) -> Result<u32, LegacyError> {
    u32::try_from(raw)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| LegacyError::CorruptRow {
            table,
            row,
            reason: format!("{what} {raw} is not a positive id"),
        })
}

fn change_id(table: &'static str, row: i64, raw: i64) -> Result<ChangeId, LegacyError> {
    let value = positive(table, row, raw, "change id")?;
    ChangeId::new(value).map_err(|err| LegacyError::CorruptRow {
        table,
        row,
        reason: err.to_string(),
    })
}

fn account_id(table: &'static str, row: i64, raw: i64) -> Result<AccountId, LegacyError> {
    let value = positive(table, row, raw, "account id")?;
    AccountId::new(value).map_err(|err| LegacyError::CorruptRow {
        table,
        row,
        reason: err.to_string(),
    })
}

fn patch_set_id(table: &'static str, row: i64, raw: i64) -> Result<PatchSetId, LegacyError> {
    let value = positive(table, row, raw, "patch set id")?;
    PatchSetId::new(value).map_err(|err| LegacyError::CorruptRow {
        table,
        row,
        reason: err.to_string(),
    })
}

fn open_connection(path: &Path, create: bool) -> Result<Connection, LegacyError> {
    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE;
    if create {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
    }
    let conn = Connection::open_with_flags(path, flags)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
    Ok(conn)
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, LegacyError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn validate_schema(conn: &Connection) -> Result<(), LegacyError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    let got = raw.and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
    if got != SCHEMA_VERSION {
        return Err(LegacyError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION,
            got,
        });
    }
    Ok(())
}

fn initialize_schema(conn: &Connection) -> Result<(), LegacyError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
           key TEXT PRIMARY KEY,
           value TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS changes (
           change_id INTEGER PRIMARY KEY,
           repo TEXT NOT NULL,
           branch TEXT NOT NULL,
           subject TEXT NOT NULL,
           owner INTEGER NOT NULL,
           status TEXT NOT NULL,
           current_patch_set INTEGER,
           created_on INTEGER NOT NULL,
           last_updated_on INTEGER NOT NULL,
           note_db_state TEXT,
           row_version INTEGER NOT NULL DEFAULT 0
         );
         CREATE TABLE IF NOT EXISTS patch_sets (
           change_id INTEGER NOT NULL REFERENCES changes(change_id),
           patch_set_id INTEGER NOT NULL,
           revision TEXT NOT NULL,
           uploader INTEGER NOT NULL,
           created_on INTEGER NOT NULL,
           PRIMARY KEY (change_id, patch_set_id)
         );
         CREATE TABLE IF NOT EXISTS approvals (
           row_id INTEGER PRIMARY KEY AUTOINCREMENT,
           change_id INTEGER NOT NULL REFERENCES changes(change_id),
           patch_set_id INTEGER NOT NULL,
           account_id INTEGER NOT NULL,
           label TEXT NOT NULL,
           value INTEGER,
           granted INTEGER NOT NULL,
           UNIQUE (change_id, patch_set_id, account_id, label)
         );
         CREATE TABLE IF NOT EXISTS messages (
           row_id INTEGER PRIMARY KEY AUTOINCREMENT,
           change_id INTEGER NOT NULL REFERENCES changes(change_id),
           uuid TEXT NOT NULL,
           author INTEGER,
           written_on INTEGER NOT NULL,
           patch_set_id INTEGER,
           message TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS comments (
           row_id INTEGER PRIMARY KEY AUTOINCREMENT,
           change_id INTEGER NOT NULL REFERENCES changes(change_id),
           patch_set_id INTEGER NOT NULL,
           uuid TEXT NOT NULL,
           author INTEGER NOT NULL,
           written_on INTEGER NOT NULL,
           file TEXT NOT NULL,
           line INTEGER,
           message TEXT NOT NULL,
           status TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS hashtags (
           row_id INTEGER PRIMARY KEY AUTOINCREMENT,
           change_id INTEGER NOT NULL REFERENCES changes(change_id),
           account_id INTEGER NOT NULL,
           added_on INTEGER NOT NULL,
           hashtag TEXT NOT NULL,
           UNIQUE (change_id, hashtag)
         );
         CREATE TABLE IF NOT EXISTS label_types (
           name TEXT PRIMARY KEY,
           min_value INTEGER NOT NULL,
           max_value INTEGER NOT NULL
         );",
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}
