//! SQLite persistence for tokens and their market records.
//!
//! All writes are idempotent upserts keyed by lower-cased contract address,
//! so overlapping passes converge (last write wins). Token rows are never
//! deleted.

use alloy_primitives::U256;
use chrono::Utc;
use eyre::Result;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::debug;

use crate::market::pricing::{MarketRecord, TokenMeta};
use crate::price_api::TokenQuote;

/// Persisted token identity and discovery metadata
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRow {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: String,
    pub factory: String,
    pub deployer: String,
    pub created_at: i64,
}

impl TokenRow {
    /// Calculator-facing view; `None` when the stored address or supply
    /// fails to parse (corrupt row - skipped, not fatal).
    pub fn to_meta(&self) -> Option<TokenMeta> {
        Some(TokenMeta {
            address: self.address.parse().ok()?,
            decimals: self.decimals,
            total_supply: U256::from_str(&self.total_supply).unwrap_or(U256::ZERO),
        })
    }
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tokens (
                address      TEXT PRIMARY KEY,
                name         TEXT NOT NULL DEFAULT '',
                symbol       TEXT NOT NULL DEFAULT '',
                decimals     INTEGER NOT NULL DEFAULT 18,
                total_supply TEXT NOT NULL DEFAULT '0',
                factory      TEXT NOT NULL DEFAULT '',
                deployer     TEXT NOT NULL DEFAULT '',
                created_at   INTEGER NOT NULL DEFAULT 0,
                first_seen   INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS market_records (
                address       TEXT PRIMARY KEY,
                price_usd     REAL NOT NULL DEFAULT 0,
                liquidity_usd REAL NOT NULL DEFAULT 0,
                volume_24h    REAL NOT NULL DEFAULT 0,
                market_cap    REAL NOT NULL DEFAULT 0,
                pool_count    INTEGER NOT NULL DEFAULT 0,
                main_pool     TEXT NOT NULL DEFAULT '',
                main_dex      TEXT NOT NULL DEFAULT '',
                priority      INTEGER NOT NULL DEFAULT 0,
                updated_at    INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_market_updated ON market_records(updated_at);
            CREATE INDEX IF NOT EXISTS idx_market_cap ON market_records(market_cap);",
        )?;
        Ok(())
    }

    // ============================================
    // TOKENS
    // ============================================

    pub async fn upsert_tokens(&self, rows: &[TokenRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().timestamp();
        for row in rows {
            tx.execute(
                "INSERT INTO tokens
                    (address, name, symbol, decimals, total_supply, factory, deployer, created_at, first_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(address) DO UPDATE SET
                    name = excluded.name,
                    symbol = excluded.symbol,
                    decimals = excluded.decimals,
                    total_supply = excluded.total_supply,
                    factory = excluded.factory,
                    deployer = excluded.deployer,
                    created_at = excluded.created_at",
                params![
                    row.address.to_lowercase(),
                    row.name,
                    row.symbol,
                    row.decimals,
                    row.total_supply,
                    row.factory,
                    row.deployer,
                    row.created_at,
                    now,
                ],
            )?;
        }
        tx.commit()?;

        debug!("upserted {} token row(s)", rows.len());
        Ok(rows.len())
    }

    pub async fn all_tokens(&self) -> Result<Vec<TokenRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT address, name, symbol, decimals, total_supply, factory, deployer, created_at
             FROM tokens ORDER BY first_seen ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_token)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn token_count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM tokens", [], |row| row.get(0))?;
        Ok(count)
    }

    // ============================================
    // MARKET RECORDS
    // ============================================

    pub async fn upsert_market_records(&self, records: &[MarketRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for record in records {
            tx.execute(
                "INSERT INTO market_records
                    (address, price_usd, liquidity_usd, volume_24h, market_cap,
                     pool_count, main_pool, main_dex, priority, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(address) DO UPDATE SET
                    price_usd = excluded.price_usd,
                    liquidity_usd = excluded.liquidity_usd,
                    volume_24h = excluded.volume_24h,
                    market_cap = excluded.market_cap,
                    pool_count = excluded.pool_count,
                    main_pool = excluded.main_pool,
                    main_dex = excluded.main_dex,
                    priority = excluded.priority,
                    updated_at = excluded.updated_at",
                params![
                    record.address.to_lowercase(),
                    record.price_usd,
                    record.liquidity_usd,
                    record.volume_24h,
                    record.market_cap,
                    record.pool_count,
                    record.main_pool,
                    record.main_dex,
                    record.priority as i32,
                    record.updated_at,
                ],
            )?;
        }
        tx.commit()?;

        debug!("upserted {} market record(s)", records.len());
        Ok(records.len())
    }

    /// Fold externally sourced quotes into the table. Pool-derived columns
    /// are left untouched for rows that already exist.
    pub async fn apply_quotes(&self, quotes: &[TokenQuote], priority: bool) -> Result<usize> {
        if quotes.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().timestamp();
        for quote in quotes {
            tx.execute(
                "INSERT INTO market_records
                    (address, price_usd, liquidity_usd, volume_24h, market_cap, priority, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(address) DO UPDATE SET
                    price_usd = excluded.price_usd,
                    liquidity_usd = excluded.liquidity_usd,
                    volume_24h = excluded.volume_24h,
                    market_cap = excluded.market_cap,
                    priority = excluded.priority,
                    updated_at = excluded.updated_at",
                params![
                    quote.address.to_lowercase(),
                    quote.price_usd,
                    quote.reserve_usd,
                    quote.volume_24h,
                    quote.fdv,
                    priority as i32,
                    now,
                ],
            )?;
        }
        tx.commit()?;

        Ok(quotes.len())
    }

    pub async fn get_market_record(&self, address: &str) -> Result<Option<MarketRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT address, price_usd, liquidity_usd, volume_24h, market_cap,
                    pool_count, main_pool, main_dex, priority, updated_at
             FROM market_records WHERE address = ?1",
        )?;

        let mut iter = stmt.query_map([address.to_lowercase()], row_to_record)?;
        match iter.next() {
            Some(record) => Ok(Some(record?)),
            None => Ok(None),
        }
    }

    pub async fn record_count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: u64 =
            conn.query_row("SELECT COUNT(*) FROM market_records", [], |row| row.get(0))?;
        Ok(count)
    }

    // ============================================
    // SCHEDULER QUERIES
    // ============================================

    /// Top-N addresses by market capitalization (ranking pass source).
    pub async fn top_by_market_cap(&self, n: usize) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT address FROM market_records ORDER BY market_cap DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([n as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Tracked addresses ordered oldest-refresh-first, excluding the
    /// priority set (rotation pass source). Tokens with no market record
    /// yet sort first.
    pub async fn stalest_addresses(&self, limit: usize, exclude: &[String]) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();

        let placeholders = exclude.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!(
            "SELECT t.address FROM tokens t
             LEFT JOIN market_records m ON m.address = t.address
             WHERE t.address NOT IN ({})
             ORDER BY COALESCE(m.updated_at, 0) ASC
             LIMIT {}",
            if placeholders.is_empty() { "''" } else { placeholders.as_str() },
            limit as i64,
        );

        let mut stmt = conn.prepare(&query)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(exclude.iter()), |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_token(row: &Row) -> rusqlite::Result<TokenRow> {
    Ok(TokenRow {
        address: row.get(0)?,
        name: row.get(1)?,
        symbol: row.get(2)?,
        decimals: row.get(3)?,
        total_supply: row.get(4)?,
        factory: row.get(5)?,
        deployer: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn row_to_record(row: &Row) -> rusqlite::Result<MarketRecord> {
    Ok(MarketRecord {
        address: row.get(0)?,
        price_usd: row.get(1)?,
        liquidity_usd: row.get(2)?,
        volume_24h: row.get(3)?,
        market_cap: row.get(4)?,
        pool_count: row.get(5)?,
        main_pool: row.get(6)?,
        main_dex: row.get(7)?,
        priority: row.get::<_, i32>(8)? == 1,
        updated_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(address: &str, created_at: i64) -> TokenRow {
        TokenRow {
            address: address.to_string(),
            name: "Example".to_string(),
            symbol: "EXM".to_string(),
            decimals: 18,
            total_supply: "1000000000000000000000000000".to_string(),
            factory: "0xfac".to_string(),
            deployer: "0xdep".to_string(),
            created_at,
        }
    }

    fn record(address: &str, market_cap: f64, updated_at: i64) -> MarketRecord {
        MarketRecord {
            address: address.to_string(),
            price_usd: 1.0,
            liquidity_usd: 100.0,
            volume_24h: 0.0,
            market_cap,
            pool_count: 1,
            main_pool: "0xpool".to_string(),
            main_dex: "uniswap_v3".to_string(),
            priority: false,
            updated_at,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let rec = record("0xaaaa", 5000.0, 100);

        db.upsert_market_records(&[rec.clone()]).await.unwrap();
        db.upsert_market_records(&[rec.clone()]).await.unwrap();

        assert_eq!(db.record_count().await.unwrap(), 1);
        let stored = db.get_market_record("0xAAAA").await.unwrap().unwrap();
        assert_eq!(stored, rec);
    }

    #[tokio::test]
    async fn test_token_upsert_keeps_first_seen() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_tokens(&[token("0xaaaa", 1)]).await.unwrap();
        db.upsert_tokens(&[token("0xaaaa", 2)]).await.unwrap();

        assert_eq!(db.token_count().await.unwrap(), 1);
        let rows = db.all_tokens().await.unwrap();
        assert_eq!(rows[0].created_at, 2);
    }

    #[tokio::test]
    async fn test_ranking_orders_by_market_cap() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_market_records(&[
            record("0xaaaa", 10.0, 1),
            record("0xbbbb", 9000.0, 1),
            record("0xcccc", 500.0, 1),
        ])
        .await
        .unwrap();

        let top = db.top_by_market_cap(2).await.unwrap();
        assert_eq!(top, vec!["0xbbbb".to_string(), "0xcccc".to_string()]);
    }

    #[tokio::test]
    async fn test_rotation_is_stalest_first_with_exclusions() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_tokens(&[token("0xaaaa", 1), token("0xbbbb", 1), token("0xcccc", 1)])
            .await
            .unwrap();
        db.upsert_market_records(&[record("0xaaaa", 1.0, 300), record("0xbbbb", 1.0, 100)])
            .await
            .unwrap();

        // 0xcccc has no record yet -> stalest; 0xbbbb older than 0xaaaa
        let order = db.stalest_addresses(10, &[]).await.unwrap();
        assert_eq!(order, vec!["0xcccc", "0xbbbb", "0xaaaa"]);

        let excluded = db
            .stalest_addresses(10, &["0xcccc".to_string()])
            .await
            .unwrap();
        assert_eq!(excluded, vec!["0xbbbb", "0xaaaa"]);
    }

    #[tokio::test]
    async fn test_quotes_preserve_pool_columns() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_market_records(&[record("0xaaaa", 100.0, 1)])
            .await
            .unwrap();

        let quote = TokenQuote {
            address: "0xAAAA".to_string(),
            price_usd: 2.5,
            fdv: 123_456.0,
            volume_24h: 777.0,
            reserve_usd: 9_000.0,
            total_supply: None,
        };
        db.apply_quotes(&[quote], true).await.unwrap();

        let stored = db.get_market_record("0xaaaa").await.unwrap().unwrap();
        assert_eq!(stored.price_usd, 2.5);
        assert_eq!(stored.volume_24h, 777.0);
        assert_eq!(stored.market_cap, 123_456.0);
        assert!(stored.priority);
        // Pool-derived columns survive the external update
        assert_eq!(stored.pool_count, 1);
        assert_eq!(stored.main_pool, "0xpool");
        assert_eq!(stored.main_dex, "uniswap_v3");
    }

    #[tokio::test]
    async fn test_on_disk_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poolwatch.db");

        {
            let db = Database::open(&path).unwrap();
            db.upsert_market_records(&[record("0xaaaa", 42.0, 7)])
                .await
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let stored = db.get_market_record("0xaaaa").await.unwrap().unwrap();
        assert_eq!(stored.market_cap, 42.0);
    }

    #[tokio::test]
    async fn test_zero_pool_record_is_visible() {
        let db = Database::open_in_memory().unwrap();
        let mut rec = record("0xdddd", 0.0, 1);
        rec.price_usd = 0.0;
        rec.liquidity_usd = 0.0;
        rec.pool_count = 0;
        rec.main_pool = String::new();
        rec.main_dex = String::new();

        db.upsert_market_records(&[rec]).await.unwrap();
        let stored = db.get_market_record("0xdddd").await.unwrap().unwrap();
        assert_eq!(stored.pool_count, 0);
        assert_eq!(stored.price_usd, 0.0);
    }
}
