use crate::error::StoreError;
use crate::receipt::{ReceiptData, ReceiptItem};
use rusqlite::types::Value;
use rusqlite::{
    Connection, OptionalExtension, Transaction, TransactionBehavior, params, params_from_iter,
};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    /// The unique key was already present; nothing was written.
    Exists,
}

/// The three tables of the receipt tree, with their column whitelists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Receipts,
    ExtractedData,
    ReceiptItems,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Receipts => "receipts",
            Table::ExtractedData => "extracted_data",
            Table::ReceiptItems => "receipt_items",
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Table::Receipts => &["id", "file_path", "upload_date"],
            Table::ExtractedData => &[
                "id",
                "receipt_id",
                "purchase_date",
                "purchase_time",
                "store_name",
                "address",
                "city",
                "country",
                "total_price",
                "total_currency",
                "payment_method",
            ],
            Table::ReceiptItems => &[
                "id",
                "extracted_data_id",
                "name",
                "quantity",
                "price",
                "currency",
                "discount_percent",
                "discount_absolute",
                "discount_value",
            ],
        }
    }

    /// Map a caller-supplied column name onto the whitelist entry, so SQL
    /// text is only ever built from static strings.
    fn column(self, name: &str) -> StoreResult<&'static str> {
        self.columns()
            .iter()
            .copied()
            .find(|c| *c == name)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: self.name(),
                column: name.to_string(),
            })
    }

    fn where_clause(self, filter: &[(&str, Value)]) -> StoreResult<String> {
        if filter.is_empty() {
            return Ok(String::new());
        }
        let parts = filter
            .iter()
            .enumerate()
            .map(|(i, (col, _))| -> StoreResult<String> {
                Ok(format!("{} = ?{}", self.column(col)?, i + 1))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(format!(" WHERE {}", parts.join(" AND ")))
    }
}

/// Header fields of one receipt, as stored in `extracted_data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractedHeader {
    pub purchase_date: Option<String>,
    pub purchase_time: Option<String>,
    pub store_name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub total_price: Option<f64>,
    pub total_currency: Option<String>,
    pub payment_method: Option<String>,
}

impl From<&ReceiptData> for ExtractedHeader {
    fn from(r: &ReceiptData) -> Self {
        Self {
            purchase_date: r.purchase_date.clone(),
            purchase_time: r.purchase_time.clone(),
            store_name: r.store_name.clone(),
            address: r.address.clone(),
            city: r.city.clone(),
            country: r.country.clone(),
            total_price: r.total_price(),
            total_currency: r.total_currency().map(str::to_string),
            payment_method: r.payment_method.clone(),
        }
    }
}

/// One row of `receipt_items`, minus its keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemRow {
    pub name: String,
    pub quantity: i64,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub discount_percent: Option<f64>,
    pub discount_absolute: Option<f64>,
    pub discount_value: Option<f64>,
}

impl From<&ReceiptItem> for ItemRow {
    fn from(item: &ReceiptItem) -> Self {
        Self {
            name: item.name.clone().unwrap_or_default(),
            quantity: item.quantity.map_or(1, |q| (q.round() as i64).max(1)),
            price: item.price,
            currency: item.currency.clone(),
            discount_percent: item.discount_percent,
            discount_absolute: item.discount_absolute,
            discount_value: item.discount_value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReceipt {
    pub id: i64,
    pub file_path: String,
    pub upload_date: String,
    /// Whether an `extracted_data` row hangs off this receipt.
    pub extracted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredHeader {
    pub id: i64,
    pub receipt_id: i64,
    #[serde(flatten)]
    pub header: ExtractedHeader,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredItem {
    pub id: i64,
    pub extracted_data_id: i64,
    #[serde(flatten)]
    pub item: ItemRow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub receipts: usize,
    pub extracted: usize,
    pub items: usize,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS receipts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_path TEXT NOT NULL UNIQUE,
        upload_date TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS extracted_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        receipt_id INTEGER NOT NULL UNIQUE,
        purchase_date TEXT,
        purchase_time TEXT,
        store_name TEXT,
        address TEXT,
        city TEXT,
        country TEXT,
        total_price REAL CHECK (total_price >= 0),
        total_currency TEXT CHECK (length(total_currency) = 3),
        payment_method TEXT,
        FOREIGN KEY (receipt_id) REFERENCES receipts(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS receipt_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        extracted_data_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        quantity INTEGER NOT NULL DEFAULT 1 CHECK (quantity >= 1),
        price REAL CHECK (price >= 0),
        currency TEXT CHECK (length(currency) = 3),
        discount_percent REAL CHECK (discount_percent BETWEEN 0 AND 100),
        discount_absolute REAL CHECK (discount_absolute >= 0),
        discount_value REAL,
        FOREIGN KEY (extracted_data_id) REFERENCES extracted_data(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_receipt_items_extracted_data_id
        ON receipt_items(extracted_data_id);
";

pub struct ReceiptStore {
    conn: Connection,
}

impl ReceiptStore {
    /// Open (or create) the SQLite database and make sure the schema exists.
    pub fn open<P: AsRef<Path>>(db_path: P) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        // Cascades are only enforced with this pragma on, per connection.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn };
        store.create_schema()?;
        Ok(store)
    }

    /// Create the three tables if absent. Safe to call on every startup.
    pub fn create_schema(&self) -> StoreResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        info!("Database initialized successfully");
        Ok(())
    }

    /// Insert a receipt keyed by its file path. `Exists` if already there.
    pub fn insert_receipt(&self, file_path: &str) -> StoreResult<InsertOutcome> {
        let changed = self.conn.execute(
            "INSERT INTO receipts (file_path) VALUES (?1)
             ON CONFLICT(file_path) DO NOTHING",
            params![file_path],
        )?;
        let outcome = if changed == 0 {
            InsertOutcome::Exists
        } else {
            InsertOutcome::Inserted(self.conn.last_insert_rowid())
        };
        info!(file = %file_path, outcome = ?outcome, "Receipt insert");
        Ok(outcome)
    }

    /// Insert the header row for a receipt. `Exists` if the receipt already
    /// has one; callers treat that as an idempotent no-op.
    pub fn insert_extracted_data(
        &self,
        receipt_id: i64,
        header: &ExtractedHeader,
    ) -> StoreResult<InsertOutcome> {
        insert_header_on(&self.conn, receipt_id, header)
    }

    /// Insert all item rows of one header. Not deduplicated: only call it
    /// right after an `Inserted` header.
    pub fn insert_items(&self, extracted_data_id: i64, items: &[ItemRow]) -> StoreResult<usize> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Deferred)?;
        let n = insert_items_on(&tx, extracted_data_id, items)?;
        tx.commit()?;
        Ok(n)
    }

    /// Header and items in one immediate transaction. On `Exists` nothing is
    /// written; on any error the whole tree is rolled back.
    pub fn commit_extraction(
        &self,
        receipt_id: i64,
        header: &ExtractedHeader,
        items: &[ItemRow],
    ) -> StoreResult<InsertOutcome> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let outcome = insert_header_on(&tx, receipt_id, header)?;
        if let InsertOutcome::Inserted(id) = outcome {
            insert_items_on(&tx, id, items)?;
        }
        tx.commit()?;
        Ok(outcome)
    }

    /// Parameterised read. `columns` empty means all columns; the filter is
    /// an AND of equalities with bound values.
    pub fn get(
        &self,
        table: Table,
        columns: &[&str],
        filter: &[(&str, Value)],
    ) -> StoreResult<Vec<Vec<Value>>> {
        let cols = if columns.is_empty() {
            table.columns().to_vec()
        } else {
            columns
                .iter()
                .map(|c| table.column(c))
                .collect::<StoreResult<Vec<_>>>()?
        };
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY id",
            cols.join(", "),
            table.name(),
            table.where_clause(filter)?
        );
        debug!(sql = %sql, "get");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.iter().map(|(_, v)| v)), |row| {
            (0..cols.len())
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<Value>>>()
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Parameterised delete; receipts cascade to their header and items.
    pub fn delete(&self, table: Table, filter: &[(&str, Value)]) -> StoreResult<usize> {
        if filter.is_empty() {
            return Err(StoreError::EmptyFilter(table.name()));
        }
        let sql = format!("DELETE FROM {}{}", table.name(), table.where_clause(filter)?);
        let n = self
            .conn
            .execute(&sql, params_from_iter(filter.iter().map(|(_, v)| v)))?;
        info!(table = table.name(), rows = n, "Deleted");
        Ok(n)
    }

    pub fn delete_receipt(&self, file_path: &str) -> StoreResult<bool> {
        let n = self.delete(
            Table::Receipts,
            &[("file_path", Value::Text(file_path.to_string()))],
        )?;
        Ok(n > 0)
    }

    pub fn receipt_id(&self, file_path: &str) -> StoreResult<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM receipts WHERE file_path = ?1",
                params![file_path],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn list_receipts(&self) -> StoreResult<Vec<StoredReceipt>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.id, r.file_path, r.upload_date, e.id IS NOT NULL
             FROM receipts r
             LEFT JOIN extracted_data e ON e.receipt_id = r.id
             ORDER BY r.upload_date DESC, r.id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredReceipt {
                id: row.get(0)?,
                file_path: row.get(1)?,
                upload_date: row.get(2)?,
                extracted: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn extracted_data(&self, receipt_id: i64) -> StoreResult<Option<StoredHeader>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, receipt_id, purchase_date, purchase_time, store_name, address,
                        city, country, total_price, total_currency, payment_method
                 FROM extracted_data
                 WHERE receipt_id = ?1",
                params![receipt_id],
                Self::row_to_header,
            )
            .optional()?)
    }

    pub fn items(&self, extracted_data_id: i64) -> StoreResult<Vec<StoredItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, extracted_data_id, name, quantity, price, currency,
                    discount_percent, discount_absolute, discount_value
             FROM receipt_items
             WHERE extracted_data_id = ?1
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![extracted_data_id], Self::row_to_item)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Helper: map the 11-column header projection to `StoredHeader`.
    fn row_to_header(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredHeader> {
        Ok(StoredHeader {
            id: row.get(0)?,
            receipt_id: row.get(1)?,
            header: ExtractedHeader {
                purchase_date: row.get(2)?,
                purchase_time: row.get(3)?,
                store_name: row.get(4)?,
                address: row.get(5)?,
                city: row.get(6)?,
                country: row.get(7)?,
                total_price: row.get(8)?,
                total_currency: row.get(9)?,
                payment_method: row.get(10)?,
            },
        })
    }

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredItem> {
        Ok(StoredItem {
            id: row.get(0)?,
            extracted_data_id: row.get(1)?,
            item: ItemRow {
                name: row.get(2)?,
                quantity: row.get(3)?,
                price: row.get(4)?,
                currency: row.get(5)?,
                discount_percent: row.get(6)?,
                discount_absolute: row.get(7)?,
                discount_value: row.get(8)?,
            },
        })
    }

    pub fn counts(&self) -> StoreResult<StoreCounts> {
        let count = |table: &str| -> rusqlite::Result<usize> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        };
        Ok(StoreCounts {
            receipts: count("receipts")?,
            extracted: count("extracted_data")?,
            items: count("receipt_items")?,
        })
    }
}

fn insert_header_on(
    conn: &Connection,
    receipt_id: i64,
    h: &ExtractedHeader,
) -> StoreResult<InsertOutcome> {
    let changed = conn.execute(
        "INSERT INTO extracted_data
            (receipt_id, purchase_date, purchase_time, store_name, address, city, country,
             total_price, total_currency, payment_method)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(receipt_id) DO NOTHING",
        params![
            receipt_id,
            h.purchase_date,
            h.purchase_time,
            h.store_name,
            h.address,
            h.city,
            h.country,
            h.total_price,
            h.total_currency,
            h.payment_method,
        ],
    )?;
    let outcome = if changed == 0 {
        InsertOutcome::Exists
    } else {
        InsertOutcome::Inserted(conn.last_insert_rowid())
    };
    info!(receipt_id, outcome = ?outcome, "Extracted data insert");
    Ok(outcome)
}

fn insert_items_on(conn: &Connection, extracted_data_id: i64, items: &[ItemRow]) -> StoreResult<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO receipt_items
            (extracted_data_id, name, quantity, price, currency,
             discount_percent, discount_absolute, discount_value)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for item in items {
        stmt.execute(params![
            extracted_data_id,
            item.name,
            item.quantity,
            item.price,
            item.currency,
            item.discount_percent,
            item.discount_absolute,
            item.discount_value,
        ])?;
    }
    info!(extracted_data_id, count = items.len(), "Items stored");
    Ok(items.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(total: f64) -> ExtractedHeader {
        ExtractedHeader {
            store_name: Some("Coop".into()),
            total_price: Some(total),
            total_currency: Some("EUR".into()),
            ..Default::default()
        }
    }

    fn row(name: &str, price: f64) -> ItemRow {
        ItemRow {
            name: name.into(),
            quantity: 1,
            price: Some(price),
            currency: Some("EUR".into()),
            discount_percent: None,
            discount_absolute: None,
            discount_value: None,
        }
    }

    fn inserted(o: InsertOutcome) -> i64 {
        match o {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Exists => panic!("expected Inserted"),
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let db = ReceiptStore::open_in_memory().unwrap();
        db.create_schema().unwrap();
        db.create_schema().unwrap();
        assert_eq!(db.counts().unwrap(), StoreCounts { receipts: 0, extracted: 0, items: 0 });
    }

    #[test]
    fn test_insert_receipt_dedup() {
        let db = ReceiptStore::open_in_memory().unwrap();
        let id = inserted(db.insert_receipt("scontrino1.jpg").unwrap());
        assert_eq!(db.insert_receipt("scontrino1.jpg").unwrap(), InsertOutcome::Exists);
        assert_eq!(db.receipt_id("scontrino1.jpg").unwrap(), Some(id));
        assert_eq!(db.receipt_id("other.jpg").unwrap(), None);
        assert_eq!(db.counts().unwrap().receipts, 1);
    }

    #[test]
    fn test_extracted_data_once_per_receipt() {
        let db = ReceiptStore::open_in_memory().unwrap();
        let rid = inserted(db.insert_receipt("a.jpg").unwrap());
        inserted(db.insert_extracted_data(rid, &header(5.0)).unwrap());
        assert_eq!(
            db.insert_extracted_data(rid, &header(7.0)).unwrap(),
            InsertOutcome::Exists
        );
        let stored = db.extracted_data(rid).unwrap().unwrap();
        assert_eq!(stored.header.total_price, Some(5.0));
    }

    #[test]
    fn test_foreign_key_enforced() {
        let db = ReceiptStore::open_in_memory().unwrap();
        let err = db.insert_extracted_data(42, &header(1.0)).unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }

    #[test]
    fn test_check_constraints_surface_as_errors() {
        let db = ReceiptStore::open_in_memory().unwrap();
        let rid = inserted(db.insert_receipt("a.jpg").unwrap());
        let mut bad = header(1.0);
        bad.total_currency = Some("EU".into());
        assert!(db.insert_extracted_data(rid, &bad).is_err());
        let mut neg = header(1.0);
        neg.total_price = Some(-1.0);
        assert!(db.insert_extracted_data(rid, &neg).is_err());
        assert!(db.extracted_data(rid).unwrap().is_none());
    }

    #[test]
    fn test_commit_extraction_rolls_back_on_bad_item() {
        let db = ReceiptStore::open_in_memory().unwrap();
        let rid = inserted(db.insert_receipt("a.jpg").unwrap());
        let items = vec![row("Pane", 1.0), row("Rotto", -1.0)];
        assert!(db.commit_extraction(rid, &header(1.0), &items).is_err());
        assert_eq!(db.counts().unwrap(), StoreCounts { receipts: 1, extracted: 0, items: 0 });

        let ok = vec![row("Pane", 1.0)];
        let eid = inserted(db.commit_extraction(rid, &header(1.0), &ok).unwrap());
        assert_eq!(
            db.commit_extraction(rid, &header(1.0), &ok).unwrap(),
            InsertOutcome::Exists
        );
        assert_eq!(db.items(eid).unwrap().len(), 1);
        assert_eq!(db.counts().unwrap().items, 1);
    }

    #[test]
    fn test_get_with_filter_and_whitelist() {
        let db = ReceiptStore::open_in_memory().unwrap();
        inserted(db.insert_receipt("a.jpg").unwrap());
        let b = inserted(db.insert_receipt("b.jpg").unwrap());

        let rows = db
            .get(Table::Receipts, &["id"], &[("file_path", Value::Text("b.jpg".into()))])
            .unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(b)]]);

        let all = db.get(Table::Receipts, &[], &[]).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].len(), 3);

        let err = db
            .get(Table::Receipts, &["id; DROP TABLE receipts"], &[])
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { .. }));
        let err = db
            .get(Table::Receipts, &["id"], &[("1=1 OR file_path", Value::Null)])
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { .. }));
    }

    #[test]
    fn test_filter_value_is_bound_not_interpolated() {
        let db = ReceiptStore::open_in_memory().unwrap();
        inserted(db.insert_receipt("a.jpg").unwrap());
        let rows = db
            .get(
                Table::Receipts,
                &["id"],
                &[("file_path", Value::Text("x' OR '1'='1".into()))],
            )
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_delete_cascades() {
        let db = ReceiptStore::open_in_memory().unwrap();
        let rid = inserted(db.insert_receipt("a.jpg").unwrap());
        let keep = inserted(db.insert_receipt("b.jpg").unwrap());
        db.commit_extraction(rid, &header(3.0), &[row("Pane", 1.0), row("Latte", 2.0)])
            .unwrap();
        db.commit_extraction(keep, &header(1.0), &[row("Sale", 1.0)])
            .unwrap();
        assert_eq!(db.counts().unwrap(), StoreCounts { receipts: 2, extracted: 2, items: 3 });

        assert!(db.delete_receipt("a.jpg").unwrap());
        assert_eq!(db.counts().unwrap(), StoreCounts { receipts: 1, extracted: 1, items: 1 });
        assert!(!db.delete_receipt("a.jpg").unwrap());
    }

    #[test]
    fn test_delete_requires_filter() {
        let db = ReceiptStore::open_in_memory().unwrap();
        assert!(matches!(
            db.delete(Table::Receipts, &[]).unwrap_err(),
            StoreError::EmptyFilter("receipts")
        ));
    }

    #[test]
    fn test_list_receipts_flags_extracted() {
        let db = ReceiptStore::open_in_memory().unwrap();
        let a = inserted(db.insert_receipt("a.jpg").unwrap());
        inserted(db.insert_receipt("b.jpg").unwrap());
        db.insert_extracted_data(a, &header(1.0)).unwrap();
        let list = db.list_receipts().unwrap();
        assert_eq!(list.len(), 2);
        let a_row = list.iter().find(|r| r.file_path == "a.jpg").unwrap();
        let b_row = list.iter().find(|r| r.file_path == "b.jpg").unwrap();
        assert!(a_row.extracted);
        assert!(!b_row.extracted);
        assert!(!a_row.upload_date.is_empty());
    }

    #[test]
    fn test_item_row_from_reconciled_item() {
        let item = ReceiptItem {
            name: Some("Pane".into()),
            quantity: Some(2.0),
            price: Some(2.0),
            ..Default::default()
        };
        let row = ItemRow::from(&item);
        assert_eq!(row.quantity, 2);
        assert_eq!(row.price, Some(2.0));
        assert_eq!(ItemRow::from(&ReceiptItem::default()).quantity, 1);
    }

    #[test]
    fn test_concurrent_insert_same_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.db");
        ReceiptStore::open(&path).unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let db = ReceiptStore::open(&path).unwrap();
                    db.insert_receipt("same.jpg").unwrap()
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let inserted = outcomes
            .iter()
            .filter(|o| matches!(o, InsertOutcome::Inserted(_)))
            .count();
        assert_eq!(inserted, 1);
        assert!(outcomes.contains(&InsertOutcome::Exists));
    }
}
