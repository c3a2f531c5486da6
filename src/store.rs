use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::path::Path;

use crate::model::{ItemListing, MarketObservation, TrackedOrder};

pub const DB_FILE: &str = "gw2_market.db";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS items (
        id   TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        link TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS observations (
        item_id    TEXT NOT NULL REFERENCES items(id),
        scraped_at TEXT NOT NULL,
        buy_price  REAL NOT NULL,
        sell_price REAL NOT NULL,
        supply     INTEGER NOT NULL,
        demand     INTEGER NOT NULL,
        bought     INTEGER NOT NULL,
        sold       INTEGER NOT NULL,
        bids       INTEGER NOT NULL,
        offers     INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_observations_time ON observations(scraped_at);
    CREATE TABLE IF NOT EXISTS orders (
        item_id     TEXT PRIMARY KEY,
        qty_ordered INTEGER NOT NULL,
        buy_price   REAL NOT NULL,
        sell_price  REAL,
        buy_placed  INTEGER NOT NULL,
        sell_placed INTEGER NOT NULL,
        sold        INTEGER NOT NULL
    );
";

const LISTING_COLUMNS: &str = "i.id, i.name, i.link, o.scraped_at,
    o.buy_price, o.sell_price, o.supply, o.demand, o.bought, o.sold, o.bids, o.offers";

/// SQLite history of scrapes plus the orders the user is tracking.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Store { conn })
    }

    /// `scraped_at` is a UTC `YYYY-MM-DD HH:MM:SS` stamp shared by the whole batch.
    pub fn save_scrape(&mut self, listings: &[ItemListing], scraped_at: &str) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut item_stmt = tx.prepare(
                "INSERT INTO items (id, name, link) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, link = excluded.link",
            )?;
            let mut obs_stmt = tx.prepare(
                "INSERT INTO observations
                 (item_id, scraped_at, buy_price, sell_price, supply, demand, bought, sold, bids, offers)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;

            for l in listings {
                let o = &l.observation;
                item_stmt.execute(params![o.item_id, l.name, l.link])?;
                obs_stmt.execute(params![
                    o.item_id, scraped_at, o.buy_price, o.sell_price,
                    o.supply, o.demand, o.bought, o.sold, o.bids, o.offers
                ])?;
            }
        }
        tx.commit()?;
        Ok(listings.len())
    }

    /// Rows of the most recent scrape, in insertion order.
    pub fn load_latest_scrape(&self) -> Result<Vec<(ItemListing, String)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LISTING_COLUMNS}
             FROM observations o
             JOIN items i ON o.item_id = i.id
             WHERE o.scraped_at = (SELECT MAX(scraped_at) FROM observations)
             ORDER BY o.rowid"
        ))?;

        let rows = stmt.query_map([], listing_from_row)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn latest_listing(&self, item_id: &str) -> Result<Option<(ItemListing, String)>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {LISTING_COLUMNS}
                     FROM observations o
                     JOIN items i ON o.item_id = i.id
                     WHERE o.item_id = ?1
                     ORDER BY o.scraped_at DESC, o.rowid DESC
                     LIMIT 1"
                ),
                [item_id],
                listing_from_row,
            )
            .optional()
    }

    /// (scraped_at, buy, sell) for one item over the last `days` days, oldest first.
    pub fn load_item_history(&self, item_id: &str, days: u32) -> Result<Vec<(String, f64, f64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT o.scraped_at, o.buy_price, o.sell_price
             FROM observations o
             WHERE o.item_id = ?1
             AND o.scraped_at >= datetime('now', ?2)
             ORDER BY o.scraped_at",
        )?;

        let window = format!("-{days} days");
        let rows = stmt.query_map(params![item_id, window], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;

        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn upsert_order(&self, order: &TrackedOrder) -> Result<()> {
        self.conn.execute(
            "INSERT INTO orders (item_id, qty_ordered, buy_price, sell_price, buy_placed, sell_placed, sold)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(item_id) DO UPDATE SET
                qty_ordered = excluded.qty_ordered,
                buy_price   = excluded.buy_price,
                sell_price  = excluded.sell_price,
                buy_placed  = excluded.buy_placed,
                sell_placed = excluded.sell_placed,
                sold        = excluded.sold",
            params![
                order.item_id, order.qty_ordered, order.buy_price, order.sell_price,
                order.buy_placed, order.sell_placed, order.sold
            ],
        )?;
        Ok(())
    }

    pub fn load_orders(&self) -> Result<Vec<TrackedOrder>> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id, qty_ordered, buy_price, sell_price, buy_placed, sell_placed, sold
             FROM orders
             ORDER BY item_id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(TrackedOrder {
                item_id: row.get(0)?,
                qty_ordered: row.get(1)?,
                buy_price: row.get(2)?,
                sell_price: row.get(3)?,
                buy_placed: row.get(4)?,
                sell_placed: row.get(5)?,
                sold: row.get(6)?,
            })
        })?;

        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn remove_order(&self, item_id: &str) -> Result<bool> {
        Ok(self.conn.execute("DELETE FROM orders WHERE item_id = ?1", [item_id])? > 0)
    }
}

fn listing_from_row(row: &Row) -> Result<(ItemListing, String)> {
    let listing = ItemListing {
        name: row.get(1)?,
        link: row.get(2)?,
        observation: MarketObservation {
            item_id: row.get(0)?,
            buy_price: row.get(4)?,
            sell_price: row.get(5)?,
            supply: row.get(6)?,
            demand: row.get(7)?,
            bought: row.get(8)?,
            sold: row.get(9)?,
            bids: row.get(10)?,
            offers: row.get(11)?,
        },
    };
    Ok((listing, row.get(3)?))
}
