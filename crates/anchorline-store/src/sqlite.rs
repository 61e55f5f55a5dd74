//! SQLite implementations of the client traits.
//!
//! These are the durable reference backends served by `anchorline serve`.
//! They use rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`. The content store and the ledger may share
//! one database file; each holds its own connection.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use anchorline_core::{
    ContentAddress, Label, LedgerRecord, ProductEvent, ProductEventKind, ShapeMetadata,
};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{
    AppendOutcome, ContentStore, Ledger, LedgerPolicy, Registry, RegistrySummary,
    REGISTRY_CONTRACT,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const KIND_DATA_ADDED: i64 = 0;
const KIND_PARTY_ASSOCIATED: i64 = 1;

/// A migrated connection shared across blocking tasks.
#[derive(Clone)]
struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {}", e)))?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {}", e)))?
    }
}

fn address_column(bytes: Vec<u8>, idx: usize) -> rusqlite::Result<ContentAddress> {
    ContentAddress::try_from(bytes.as_slice())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Blob, Box::new(e)))
}

fn shape_column(bytes: Option<Vec<u8>>, idx: usize) -> rusqlite::Result<Option<ShapeMetadata>> {
    bytes
        .map(|b| {
            ShapeMetadata::from_cbor(&b)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Blob, Box::new(e)))
        })
        .transpose()
}

fn label_column(text: String, idx: usize) -> rusqlite::Result<Label> {
    Label::new(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Content store
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed content store.
#[derive(Clone)]
pub struct SqliteContentStore {
    db: Database,
}

impl SqliteContentStore {
    /// Open (and migrate) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            db: Database::open(path)?,
        })
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_memory() -> Result<Self> {
        Ok(Self {
            db: Database::open_memory()?,
        })
    }
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn put(&self, payload: &[u8]) -> Result<ContentAddress> {
        let payload = payload.to_vec();
        self.db
            .run(move |conn| {
                let address = ContentAddress::of(&payload);
                conn.execute(
                    "INSERT OR IGNORE INTO blocks (address, payload, stored_at)
                     VALUES (?1, ?2, ?3)",
                    params![address.as_bytes().as_slice(), payload, now_millis()],
                )?;
                Ok(address)
            })
            .await
    }

    async fn get(&self, address: &ContentAddress) -> Result<Option<Bytes>> {
        let address = *address;
        self.db
            .run(move |conn| {
                let payload: Option<Vec<u8>> = conn
                    .query_row(
                        "SELECT payload FROM blocks WHERE address = ?1",
                        params![address.as_bytes().as_slice()],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(payload.map(Bytes::from))
            })
            .await
    }

    async fn contains(&self, address: &ContentAddress) -> Result<bool> {
        let address = *address;
        self.db
            .run(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM blocks WHERE address = ?1)",
                    params![address.as_bytes().as_slice()],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
    }

    async fn purge(&self, address: &ContentAddress) -> Result<bool> {
        let address = *address;
        self.db
            .run(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM blocks WHERE address = ?1",
                    params![address.as_bytes().as_slice()],
                )?;
                Ok(removed > 0)
            })
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ledger
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed ledger and registry.
#[derive(Clone)]
pub struct SqliteLedger {
    db: Database,
    policy: LedgerPolicy,
}

impl SqliteLedger {
    /// Open (and migrate) a database file with the default policy.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            db: Database::open(path)?,
            policy: LedgerPolicy::default(),
        })
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_memory() -> Result<Self> {
        Ok(Self {
            db: Database::open_memory()?,
            policy: LedgerPolicy::default(),
        })
    }

    /// Replace the ledger policy.
    pub fn with_policy(mut self, policy: LedgerPolicy) -> Self {
        self.policy = policy;
        self
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProductEvent> {
    let seq: i64 = row.get("seq")?;
    let label = label_column(row.get("label")?, 1)?;
    let kind = match row.get::<_, i64>("kind")? {
        KIND_DATA_ADDED => {
            let address = address_column(row.get("address")?, 3)?;
            let timestamp: i64 = row.get("timestamp")?;
            ProductEventKind::DataAdded {
                address,
                timestamp: timestamp as u64,
                shape: shape_column(row.get("shape")?, 6)?,
            }
        }
        KIND_PARTY_ASSOCIATED => ProductEventKind::PartyAssociated {
            party_id: row.get("party_id")?,
        },
        other => {
            return Err(rusqlite::Error::IntegralValueOutOfRange(2, other));
        }
    };
    Ok(ProductEvent {
        seq: seq as u64,
        label,
        kind,
    })
}

fn require_registry(conn: &Connection) -> Result<()> {
    let deployed: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM contracts WHERE contract_id = ?1)",
        params![REGISTRY_CONTRACT],
        |row| row.get(0),
    )?;
    if deployed {
        Ok(())
    } else {
        Err(StoreError::InvalidInput("registry not deployed".into()))
    }
}

fn exists(conn: &Connection, sql: &str, key: &str) -> Result<bool> {
    Ok(conn.query_row(sql, params![key], |row| row.get(0))?)
}

const EVENT_COLUMNS: &str = "seq, label, kind, address, timestamp, party_id, shape";

#[async_trait]
impl Ledger for SqliteLedger {
    async fn append(&self, record: &LedgerRecord) -> Result<AppendOutcome> {
        let record = record.clone();
        let policy = self.policy;
        let shape = record
            .shape
            .as_ref()
            .map(ShapeMetadata::to_cbor)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.db
            .run(move |conn| {
                let key = record.anchor_key();
                let tx = conn.transaction()?;

                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT seq FROM ledger_events WHERE anchor_key = ?1",
                        params![key.as_bytes().as_slice()],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(seq) = existing {
                    return Ok(AppendOutcome::AlreadyAnchored { seq: seq as u64 });
                }

                if policy.require_registered_products
                    && !exists(
                        &tx,
                        "SELECT EXISTS(SELECT 1 FROM products WHERE label = ?1)",
                        record.label.as_str(),
                    )?
                {
                    return Err(StoreError::InvalidInput(format!(
                        "product label {} not recognized",
                        record.label
                    )));
                }

                tx.execute(
                    "INSERT INTO ledger_events
                        (label, kind, address, timestamp, anchor_key, shape, appended_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        record.label.as_str(),
                        KIND_DATA_ADDED,
                        record.address.as_bytes().as_slice(),
                        record.timestamp as i64,
                        key.as_bytes().as_slice(),
                        shape,
                        now_millis(),
                    ],
                )?;
                let seq = tx.last_insert_rowid() as u64;
                tx.commit()?;
                Ok(AppendOutcome::Appended { seq })
            })
            .await
    }

    async fn latest(&self, label: &Label) -> Result<Option<LedgerRecord>> {
        let label = label.clone();
        self.db
            .run(move |conn| {
                let event = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM ledger_events
                             WHERE label = ?1 AND kind = ?2
                             ORDER BY seq DESC LIMIT 1",
                            EVENT_COLUMNS
                        ),
                        params![label.as_str(), KIND_DATA_ADDED],
                        row_to_event,
                    )
                    .optional()?;
                Ok(event.and_then(|e| e.as_record()))
            })
            .await
    }

    async fn history(&self, label: &Label) -> Result<Vec<LedgerRecord>> {
        let events = self.product_events(label).await?;
        Ok(events.iter().filter_map(ProductEvent::as_record).collect())
    }

    async fn product_events(&self, label: &Label) -> Result<Vec<ProductEvent>> {
        let label = label.clone();
        self.db
            .run(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM ledger_events WHERE label = ?1 ORDER BY seq",
                    EVENT_COLUMNS
                ))?;
                let events = stmt
                    .query_map(params![label.as_str()], row_to_event)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(events)
            })
            .await
    }
}

#[async_trait]
impl Registry for SqliteLedger {
    async fn deploy_contract(&self, contract_id: &str) -> Result<()> {
        if contract_id.is_empty() {
            return Err(StoreError::InvalidInput("contract id must not be empty".into()));
        }
        let contract_id = contract_id.to_string();
        self.db
            .run(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO contracts (contract_id, deployed_at) VALUES (?1, ?2)",
                    params![contract_id, now_millis()],
                )?;
                if inserted == 0 {
                    return Err(StoreError::AlreadyExists(format!("contract {}", contract_id)));
                }
                Ok(())
            })
            .await
    }

    async fn initialize(&self) -> Result<RegistrySummary> {
        self.db
            .run(|conn| {
                let mut stmt = conn.prepare("SELECT contract_id FROM contracts ORDER BY contract_id")?;
                let contracts = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                let count = |sql: &str| -> rusqlite::Result<i64> { conn.query_row(sql, [], |row| row.get(0)) };
                Ok(RegistrySummary {
                    contracts,
                    products: count("SELECT COUNT(*) FROM products")? as usize,
                    parties: count("SELECT COUNT(*) FROM parties")? as usize,
                    records: count("SELECT COUNT(*) FROM ledger_events WHERE kind = 0")? as u64,
                })
            })
            .await
    }

    async fn add_product(&self, label: &Label) -> Result<()> {
        let label = label.clone();
        self.db
            .run(move |conn| {
                require_registry(conn)?;
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO products (label, added_at) VALUES (?1, ?2)",
                    params![label.as_str(), now_millis()],
                )?;
                if inserted == 0 {
                    return Err(StoreError::AlreadyExists(format!("product {}", label)));
                }
                Ok(())
            })
            .await
    }

    async fn add_party(&self, party_id: &str, contact_info: &str) -> Result<()> {
        if party_id.is_empty() {
            return Err(StoreError::InvalidInput("party id must not be empty".into()));
        }
        let party_id = party_id.to_string();
        let contact_info = contact_info.to_string();
        self.db
            .run(move |conn| {
                require_registry(conn)?;
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO parties (party_id, contact_info, added_at)
                     VALUES (?1, ?2, ?3)",
                    params![party_id, contact_info, now_millis()],
                )?;
                if inserted == 0 {
                    let known: String = conn.query_row(
                        "SELECT contact_info FROM parties WHERE party_id = ?1",
                        params![party_id],
                        |row| row.get(0),
                    )?;
                    if known == contact_info {
                        return Err(StoreError::AlreadyExists(format!("party {}", party_id)));
                    }
                    return Err(StoreError::InvalidInput(format!(
                        "party {} already registered with other contact info",
                        party_id
                    )));
                }
                Ok(())
            })
            .await
    }

    async fn associate_party(&self, party_id: &str, product: &Label) -> Result<()> {
        let party_id = party_id.to_string();
        let product = product.clone();
        self.db
            .run(move |conn| {
                let tx = conn.transaction()?;
                if !exists(
                    &tx,
                    "SELECT EXISTS(SELECT 1 FROM products WHERE label = ?1)",
                    product.as_str(),
                )? {
                    return Err(StoreError::InvalidInput(format!("product {} does not exist", product)));
                }
                if !exists(
                    &tx,
                    "SELECT EXISTS(SELECT 1 FROM parties WHERE party_id = ?1)",
                    &party_id,
                )? {
                    return Err(StoreError::InvalidInput(format!("party {} does not exist", party_id)));
                }
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO party_products (party_id, label) VALUES (?1, ?2)",
                    params![party_id, product.as_str()],
                )?;
                if inserted == 0 {
                    return Err(StoreError::AlreadyExists(format!(
                        "party {} associated with {}",
                        party_id, product
                    )));
                }
                tx.execute(
                    "INSERT INTO ledger_events (label, kind, party_id, appended_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![product.as_str(), KIND_PARTY_ASSOCIATED, party_id, now_millis()],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }
}
