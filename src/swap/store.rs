use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};

use super::{EscrowSwap, SwapState, SwapType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexField {
    Id,
    EscrowHash,
    Type,
    Initiator,
    State,
    PaymentHash,
}

impl IndexField {
    fn column(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::EscrowHash => "escrow_hash",
            Self::Type => "type",
            Self::Initiator => "initiator",
            Self::State => "state",
            Self::PaymentHash => "payment_hash",
        }
    }

    fn value_of(self, swap: &EscrowSwap) -> Option<IndexValue> {
        match self {
            Self::Id => Some(IndexValue::Text(swap.id.clone())),
            Self::EscrowHash => swap.escrow.escrow_hash.clone().map(IndexValue::Text),
            Self::Type => Some(IndexValue::Text(swap.swap_type.as_str().to_string())),
            Self::Initiator => Some(IndexValue::Text(swap.initiator.clone())),
            Self::State => Some(IndexValue::Int(swap.state.code() as i64)),
            Self::PaymentHash => swap.payment_hash.clone().map(IndexValue::Text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    Text(String),
    Int(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    pub field: IndexField,
    pub value: IndexValue,
}

impl QueryParam {
    pub fn id(id: &str) -> Self {
        Self::text(IndexField::Id, id)
    }

    pub fn escrow_hash(hash: &str) -> Self {
        Self::text(IndexField::EscrowHash, hash)
    }

    pub fn swap_type(swap_type: SwapType) -> Self {
        Self::text(IndexField::Type, swap_type.as_str())
    }

    pub fn initiator(initiator: &str) -> Self {
        Self::text(IndexField::Initiator, initiator)
    }

    pub fn payment_hash(hash: &str) -> Self {
        Self::text(IndexField::PaymentHash, hash)
    }

    pub fn state(state: SwapState) -> Self {
        Self {
            field: IndexField::State,
            value: IndexValue::Int(state.code() as i64),
        }
    }

    fn text(field: IndexField, value: &str) -> Self {
        Self {
            field,
            value: IndexValue::Text(value.to_string()),
        }
    }

    fn matches(&self, swap: &EscrowSwap) -> bool {
        self.field.value_of(swap).as_ref() == Some(&self.value)
    }
}

/// Indexed record store for swaps.
///
/// `query` takes a disjunction of conjunctions: a swap matches when every
/// param of at least one inner slice matches. An empty outer slice matches
/// everything.
pub trait SwapStore: Send + Sync {
    fn save(&self, swap: &EscrowSwap) -> Result<()>;
    fn save_all(&self, swaps: &[EscrowSwap]) -> Result<()>;
    fn remove(&self, swap: &EscrowSwap) -> Result<()>;
    fn remove_all(&self, swaps: &[EscrowSwap]) -> Result<()>;
    fn query(&self, params: &[Vec<QueryParam>]) -> Result<Vec<EscrowSwap>>;
}

fn matches_any(params: &[Vec<QueryParam>], swap: &EscrowSwap) -> bool {
    params.is_empty() || params.iter().any(|and| and.iter().all(|p| p.matches(swap)))
}

#[derive(Debug, Default)]
pub struct MemorySwapStore {
    swaps: Mutex<BTreeMap<String, EscrowSwap>>,
}

impl MemorySwapStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(map: &mut BTreeMap<String, EscrowSwap>, swap: &EscrowSwap) -> Result<()> {
        if let Some(hash) = swap.escrow.escrow_hash.as_deref()
            && let Some(other) = map
                .values()
                .find(|s| s.id != swap.id && s.escrow.escrow_hash.as_deref() == Some(hash))
        {
            anyhow::bail!("escrow_hash {hash} already used by swap {}", other.id);
        }
        map.insert(swap.id.clone(), swap.clone());
        Ok(())
    }
}

impl SwapStore for MemorySwapStore {
    fn save(&self, swap: &EscrowSwap) -> Result<()> {
        let mut map = self.swaps.lock().expect("store mutex poisoned");
        Self::insert(&mut map, swap)
    }

    fn save_all(&self, swaps: &[EscrowSwap]) -> Result<()> {
        let mut map = self.swaps.lock().expect("store mutex poisoned");
        let mut staged = map.clone();
        for swap in swaps {
            Self::insert(&mut staged, swap)?;
        }
        *map = staged;
        Ok(())
    }

    fn remove(&self, swap: &EscrowSwap) -> Result<()> {
        self.swaps
            .lock()
            .expect("store mutex poisoned")
            .remove(&swap.id);
        Ok(())
    }

    fn remove_all(&self, swaps: &[EscrowSwap]) -> Result<()> {
        let mut map = self.swaps.lock().expect("store mutex poisoned");
        for swap in swaps {
            map.remove(&swap.id);
        }
        Ok(())
    }

    fn query(&self, params: &[Vec<QueryParam>]) -> Result<Vec<EscrowSwap>> {
        let map = self.swaps.lock().expect("store mutex poisoned");
        Ok(map
            .values()
            .filter(|s| matches_any(params, s))
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
pub struct SqliteSwapStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteSwapStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create swap store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn upsert(conn: &Connection, swap: &EscrowSwap) -> Result<()> {
    let data = serde_json::to_string(swap).context("encode swap")?;
    conn.execute(
        r#"
INSERT INTO swaps (id, escrow_hash, type, initiator, state, payment_hash, data)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(id) DO UPDATE SET
  escrow_hash = excluded.escrow_hash,
  type = excluded.type,
  initiator = excluded.initiator,
  state = excluded.state,
  payment_hash = excluded.payment_hash,
  data = excluded.data
"#,
        params![
            &swap.id,
            &swap.escrow.escrow_hash,
            swap.swap_type.as_str(),
            &swap.initiator,
            swap.state.code(),
            &swap.payment_hash,
            data,
        ],
    )
    .with_context(|| format!("upsert swap {}", swap.id))?;
    Ok(())
}

impl SwapStore for SqliteSwapStore {
    fn save(&self, swap: &EscrowSwap) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        upsert(&conn, swap)
    }

    fn save_all(&self, swaps: &[EscrowSwap]) -> Result<()> {
        let mut conn = self.conn.lock().expect("sqlite mutex poisoned");
        let tx = conn.transaction().context("begin save_all")?;
        for swap in swaps {
            upsert(&tx, swap)?;
        }
        tx.commit().context("commit save_all")
    }

    fn remove(&self, swap: &EscrowSwap) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute("DELETE FROM swaps WHERE id = ?1", params![&swap.id])
            .with_context(|| format!("delete swap {}", swap.id))?;
        Ok(())
    }

    fn remove_all(&self, swaps: &[EscrowSwap]) -> Result<()> {
        let mut conn = self.conn.lock().expect("sqlite mutex poisoned");
        let tx = conn.transaction().context("begin remove_all")?;
        for swap in swaps {
            tx.execute("DELETE FROM swaps WHERE id = ?1", params![&swap.id])
                .with_context(|| format!("delete swap {}", swap.id))?;
        }
        tx.commit().context("commit remove_all")
    }

    fn query(&self, params: &[Vec<QueryParam>]) -> Result<Vec<EscrowSwap>> {
        let mut sql = String::from("SELECT data FROM swaps");
        let mut values: Vec<Value> = Vec::new();
        if !params.is_empty() {
            let clauses: Vec<String> = params
                .iter()
                .map(|and| {
                    if and.is_empty() {
                        return "1 = 1".to_string();
                    }
                    let terms: Vec<String> = and
                        .iter()
                        .map(|p| {
                            values.push(match &p.value {
                                IndexValue::Text(s) => Value::Text(s.clone()),
                                IndexValue::Int(i) => Value::Integer(*i),
                            });
                            format!("{} = ?{}", p.field.column(), values.len())
                        })
                        .collect();
                    format!("({})", terms.join(" AND "))
                })
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" OR "));
        }
        sql.push_str(" ORDER BY id");

        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(&sql).context("prepare swap query")?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                let data: String = row.get(0)?;
                serde_json::from_str::<EscrowSwap>(&data).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        format!("invalid swap record: {e}").into(),
                    )
                })
            })
            .context("query swaps")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read swap row")?);
        }
        Ok(out)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swaps (
  id TEXT PRIMARY KEY,
  escrow_hash TEXT UNIQUE,
  type TEXT NOT NULL,
  initiator TEXT NOT NULL,
  state INTEGER NOT NULL,
  payment_hash TEXT,
  data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS swaps_type_idx ON swaps(type);
CREATE INDEX IF NOT EXISTS swaps_initiator_idx ON swaps(initiator);
CREATE INDEX IF NOT EXISTS swaps_state_idx ON swaps(state);
CREATE INDEX IF NOT EXISTS swaps_payment_hash_idx ON swaps(payment_hash);
CREATE INDEX IF NOT EXISTS swaps_initiator_id_idx ON swaps(initiator, id);
CREATE INDEX IF NOT EXISTS swaps_type_state_idx ON swaps(type, state);
CREATE INDEX IF NOT EXISTS swaps_type_payment_hash_idx ON swaps(type, payment_hash);
CREATE INDEX IF NOT EXISTS swaps_type_initiator_state_idx ON swaps(type, initiator, state);
"#,
    )
    .context("create tables")?;
    Ok(())
}
