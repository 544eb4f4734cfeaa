//! Embedded SQLite implementation of [`LedgerStore`].
use std::{path::PathBuf, str::FromStr};

use anyhow::Context;
use async_trait::async_trait;
use bitcoin::{Amount, OutPoint, ScriptBuf, TxOut, Txid};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::task;

use crate::store::{LedgerCommit, LedgerStore, StoredOutput};
use crate::types::{OutputState, ProposalId};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS state (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS outputs (
        txid       TEXT    NOT NULL,
        vout       INTEGER NOT NULL,
        state      INTEGER NOT NULL,
        value      INTEGER NOT NULL,
        script     BLOB    NOT NULL,
        height     INTEGER,
        generation INTEGER NOT NULL,
        PRIMARY KEY (txid, vout)
    );

    CREATE TABLE IF NOT EXISTS proposals (
        id   TEXT    NOT NULL,
        txid TEXT    NOT NULL,
        vout INTEGER NOT NULL,
        PRIMARY KEY (id, txid, vout)
    );
"#;

/// Tables:
///   state(key TEXT PRIMARY KEY, value TEXT NOT NULL)
///   outputs(txid, vout, state, value, script, height, generation)
///   proposals(id, txid, vout)
///
/// Keys used in `state`:
///  - last_scanned   : u32 decimal string
///  - best_height    : u32 decimal string, highest committed tip
///  - birth_height   : u32 decimal string (optional)
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Creates/initializes the SQLite file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let conn = Connection::open(&path)
            .with_context(|| format!("open sqlite at {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            "#,
        )?;
        conn.execute_batch(SCHEMA).context("create ledger schema")?;
        Ok(Self { path })
    }

    fn kv_get(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
        Ok(conn
            .query_row("SELECT value FROM state WHERE key = ?1", params![key], |r| {
                r.get(0)
            })
            .optional()?)
    }

    fn kv_set(conn: &Connection, key: &str, val: &str) -> anyhow::Result<()> {
        conn.execute(
            "INSERT INTO state(key,value) VALUES(?1,?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, val],
        )?;
        Ok(())
    }

    fn kv_height(conn: &Connection, key: &str) -> anyhow::Result<Option<u32>> {
        Self::kv_get(conn, key)?
            .map(|s| s.parse().with_context(|| format!("parse {key} {s:?}")))
            .transpose()
    }

    /// Raise the height stored under `key` to `h`; never lowers it.
    fn kv_raise(conn: &Connection, key: &str, h: u32) -> anyhow::Result<()> {
        let current = Self::kv_height(conn, key)?.unwrap_or(0);
        Self::kv_set(conn, key, &h.max(current).to_string())
    }

    fn outpoint(row: &Row<'_>, txid: usize, vout: usize) -> anyhow::Result<OutPoint> {
        let txid: String = row.get(txid)?;
        let txid = Txid::from_str(&txid).with_context(|| format!("parse txid {txid}"))?;
        Ok(OutPoint::new(txid, row.get(vout)?))
    }

    fn output_row(row: &Row<'_>) -> anyhow::Result<(OutPoint, StoredOutput)> {
        let outpoint = Self::outpoint(row, 0, 1)?;
        let code: u8 = row.get(2)?;
        let state = OutputState::from_code(code)
            .with_context(|| format!("unknown state code {code} for {outpoint}"))?;
        let value: i64 = row.get(3)?;
        let value = u64::try_from(value).with_context(|| format!("negative value for {outpoint}"))?;
        let script: Vec<u8> = row.get(4)?;
        Ok((
            outpoint,
            StoredOutput {
                state,
                output: TxOut {
                    value: Amount::from_sat(value),
                    script_pubkey: ScriptBuf::from_bytes(script),
                },
                height: row.get(5)?,
                generation: row.get(6)?,
            },
        ))
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn load_outputs(&self) -> anyhow::Result<Vec<(OutPoint, StoredOutput)>> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            let mut stmt = conn.prepare(
                "SELECT txid, vout, state, value, script, height, generation FROM outputs",
            )?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(Self::output_row(row)?);
            }
            Ok(out)
        })
        .await?
    }

    async fn load_proposals(&self) -> anyhow::Result<Vec<(ProposalId, OutPoint)>> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            let mut stmt = conn.prepare("SELECT id, txid, vout FROM proposals")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                let id = ProposalId::from_str(&id).with_context(|| format!("parse proposal {id}"))?;
                out.push((id, Self::outpoint(row, 1, 2)?));
            }
            Ok(out)
        })
        .await?
    }

    async fn save_proposal(
        &self,
        proposal: ProposalId,
        outpoints: &[OutPoint],
    ) -> anyhow::Result<()> {
        let path = self.path.clone();
        let outpoints = outpoints.to_vec();
        task::spawn_blocking(move || {
            let mut conn = Connection::open(path)?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO proposals(id, txid, vout) VALUES(?1, ?2, ?3)",
                )?;
                for op in &outpoints {
                    stmt.execute(params![proposal.to_string(), op.txid.to_string(), op.vout])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    async fn commit(&self, commit: LedgerCommit) -> anyhow::Result<()> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = Connection::open(path)?;
            let tx = conn.transaction()?;
            {
                let mut upsert = tx.prepare(
                    "INSERT INTO outputs(txid, vout, state, value, script, height, generation)
                     VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(txid, vout) DO UPDATE SET
                        state=excluded.state, value=excluded.value, script=excluded.script,
                        height=excluded.height, generation=excluded.generation",
                )?;
                for (op, o) in &commit.outputs {
                    let value = i64::try_from(o.output.value.to_sat())
                        .with_context(|| format!("value of {op} out of range"))?;
                    upsert.execute(params![
                        op.txid.to_string(),
                        op.vout,
                        o.state.code(),
                        value,
                        o.output.script_pubkey.as_bytes(),
                        o.height,
                        o.generation,
                    ])?;
                }

                let mut retire = tx.prepare("DELETE FROM proposals WHERE id = ?1")?;
                for id in &commit.retired_proposals {
                    retire.execute(params![id.to_string()])?;
                }
            }

            // rescans of older blocks never move progress backwards
            if let Some(h) = commit.last_scanned {
                Self::kv_raise(&tx, "last_scanned", h)?;
            }
            if let Some(h) = commit.tip {
                Self::kv_raise(&tx, "best_height", h)?;
            }

            tx.commit().context("commit ledger transaction")?;
            Ok(())
        })
        .await?
    }

    async fn get_last_scanned(&self) -> anyhow::Result<u32> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            Ok(Self::kv_height(&conn, "last_scanned")?.unwrap_or(0))
        })
        .await?
    }

    async fn get_tip_height(&self) -> anyhow::Result<u32> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            Ok(Self::kv_height(&conn, "best_height")?.unwrap_or(0))
        })
        .await?
    }

    async fn get_birth_height(&self) -> anyhow::Result<Option<u32>> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            Ok(Self::kv_height(&conn, "birth_height")?.filter(|&n| n > 0))
        })
        .await?
    }

    async fn set_birth_height(&self, h: u32) -> anyhow::Result<()> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(path)?;
            Self::kv_set(&conn, "birth_height", &h.to_string())
        })
        .await?
    }
}
