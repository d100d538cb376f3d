
// used for persistence
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

// our own stuff that we need
use crate::backend::{check_consistency, expired, now_micros, parse_statement, Backend, Cell, Mutation, SliceRange};
use crate::construct::ConsistencyLevel;
use crate::error::{IntraError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

/// A durable store over SQLite. Cells live in one table keyed by
/// keyspace, column family, row key and name.
pub struct SqliteBackend {
    db: Arc<Mutex<Connection>>,
    nodes: u32,
}

fn replication(conn: &Connection, keyspace: &str, table: &str) -> Result<u32> {
    let found: Option<(u32, Option<String>)> = conn
        .prepare_cached(
            "
            select k.Replication, c.ColumnFamily
                from Keyspace k
                left join ColumnFamily c
                on c.Keyspace = k.Keyspace
                and c.ColumnFamily = ?2
                where k.Keyspace = ?1
        ",
        )?
        .query_row(params![keyspace, table], |r| Ok((r.get(0)?, r.get(1)?)))
        .optional()?;
    match found {
        None => Err(IntraError::Backend(format!("Keyspace '{keyspace}' does not exist"))),
        Some((_, None)) => Err(IntraError::Backend(format!("Table '{keyspace}.{table}' does not exist"))),
        Some((rf, Some(_))) => Ok(rf),
    }
}

fn known_keyspace(conn: &Connection, keyspace: &str) -> Result<()> {
    let known: Option<String> = conn
        .prepare_cached("select Keyspace from Keyspace where Keyspace = ?1")?
        .query_row(params![keyspace], |r| r.get(0))
        .optional()?;
    match known {
        None => Err(IntraError::Backend(format!("Keyspace '{keyspace}' does not exist"))),
        Some(_) => Ok(()),
    }
}

fn upsert(conn: &Connection, mutation: &Mutation) -> Result<()> {
    conn.prepare_cached(
        "
        insert into Cell (
            Keyspace,
            ColumnFamily,
            RowKey,
            Name,
            Value,
            Timestamp,
            Ttl
        ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        on conflict (Keyspace, ColumnFamily, RowKey, Name) do update set
            Value = excluded.Value,
            Timestamp = excluded.Timestamp,
            Ttl = excluded.Ttl
        where excluded.Timestamp >= Cell.Timestamp
    ",
    )?
    .execute(params![
        mutation.keyspace,
        mutation.table,
        mutation.rowkey,
        mutation.name,
        mutation.value,
        mutation.timestamp,
        mutation.ttl
    ])?;
    Ok(())
}

fn cell_from_row(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<Cell> {
    Ok(Cell {
        name: row.get(offset)?,
        value: row.get(offset + 1)?,
        timestamp: row.get(offset + 2)?,
        ttl: row.get(offset + 3)?,
    })
}

impl SqliteBackend {
    pub fn new(mode: PersistenceMode, nodes: u32) -> Result<Self> {
        let connection = match &mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        connection.execute_batch(
            "
            create table if not exists Keyspace (
                Keyspace text not null,
                Replication integer not null,
                constraint referenceable_Keyspace primary key (
                    Keyspace
                )
            );
            create table if not exists ColumnFamily (
                Keyspace text not null,
                ColumnFamily text not null,
                constraint ColumnFamily_in_Keyspace foreign key (
                    Keyspace
                ) references Keyspace(Keyspace),
                constraint referenceable_ColumnFamily primary key (
                    Keyspace,
                    ColumnFamily
                )
            );
            create table if not exists Cell (
                Keyspace text not null,
                ColumnFamily text not null,
                RowKey blob not null,
                Name blob not null,
                Value blob not null,
                Timestamp integer not null,
                Ttl integer null,
                constraint Cell_in_ColumnFamily foreign key (
                    Keyspace,
                    ColumnFamily
                ) references ColumnFamily(Keyspace, ColumnFamily),
                constraint referenceable_Cell primary key (
                    Keyspace,
                    ColumnFamily,
                    RowKey,
                    Name
                )
            );
            ",
        )?;
        info!(?mode, nodes, "sqlite storage opened");
        Ok(Self {
            db: Arc::new(Mutex::new(connection)),
            nodes,
        })
    }

    // SQLite calls block, so every unit of work runs on the blocking pool
    // where the caller's timeout can still fire while it is in progress
    async fn with_connection<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock()?;
            work(&mut conn)
        })
        .await
        .map_err(|e| IntraError::Backend(format!("storage task failed: {e}")))?
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn read(
        &self,
        keyspace: &str,
        table: &str,
        rowkey: &[u8],
        names: &[Vec<u8>],
        level: ConsistencyLevel,
    ) -> Result<Vec<Cell>> {
        let (keyspace, table, rowkey, names) = (keyspace.to_string(), table.to_string(), rowkey.to_vec(), names.to_vec());
        let nodes = self.nodes;
        self.with_connection(move |conn| {
            check_consistency(level, replication(conn, &keyspace, &table)?, nodes, true)?;
            let now = now_micros();
            let mut statement = conn.prepare_cached(
                "
                select Name, Value, Timestamp, Ttl
                    from Cell
                    where Keyspace = ?1
                    and ColumnFamily = ?2
                    and RowKey = ?3
                    and Name = ?4
            ",
            )?;
            let mut cells = Vec::new();
            for name in &names {
                let found = statement
                    .query_row(params![keyspace, table, rowkey, name], |r| cell_from_row(r, 0))
                    .optional()?;
                if let Some(cell) = found.filter(|c| !expired(c.timestamp, c.ttl, now)) {
                    cells.push(cell);
                }
            }
            Ok(cells)
        })
        .await
    }

    async fn read_slice(
        &self,
        keyspace: &str,
        table: &str,
        rowkey: &[u8],
        range: &SliceRange,
        level: ConsistencyLevel,
    ) -> Result<Vec<Cell>> {
        let (keyspace, table, rowkey) = (keyspace.to_string(), table.to_string(), rowkey.to_vec());
        let (start, end, limit) = (range.start.clone(), range.end.clone(), range.limit);
        let nodes = self.nodes;
        self.with_connection(move |conn| {
            check_consistency(level, replication(conn, &keyspace, &table)?, nodes, true)?;
            let now = now_micros();
            let mut statement = conn.prepare_cached(
                "
                select Name, Value, Timestamp, Ttl
                    from Cell
                    where Keyspace = ?1
                    and ColumnFamily = ?2
                    and RowKey = ?3
                    and (length(?4) = 0 or Name >= ?4)
                    and (length(?5) = 0 or Name <= ?5)
                    order by Name
            ",
            )?;
            let rows = statement.query_map(params![keyspace, table, rowkey, start, end], |r| cell_from_row(r, 0))?;
            let mut cells = Vec::new();
            for cell in rows {
                let cell = cell?;
                if cells.len() >= limit {
                    break;
                }
                if !expired(cell.timestamp, cell.ttl, now) {
                    cells.push(cell);
                }
            }
            Ok(cells)
        })
        .await
    }

    async fn write(&self, mutation: Mutation, level: ConsistencyLevel) -> Result<()> {
        self.batch_write(vec![mutation], level).await
    }

    async fn batch_write(&self, mutations: Vec<Mutation>, level: ConsistencyLevel) -> Result<()> {
        let nodes = self.nodes;
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            for mutation in &mutations {
                check_consistency(level, replication(&tx, &mutation.keyspace, &mutation.table)?, nodes, false)?;
                upsert(&tx, mutation)?;
            }
            tx.commit()?;
            debug!(mutations = mutations.len(), "batch committed");
            Ok(())
        })
        .await
    }

    async fn increment_counter(
        &self,
        keyspace: &str,
        table: &str,
        rowkey: &[u8],
        name: &[u8],
        delta: i64,
        level: ConsistencyLevel,
    ) -> Result<()> {
        let (keyspace, table, rowkey, name) = (keyspace.to_string(), table.to_string(), rowkey.to_vec(), name.to_vec());
        let nodes = self.nodes;
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            check_consistency(level, replication(&tx, &keyspace, &table)?, nodes, false)?;
            let now = now_micros();
            let existing = tx
                .prepare_cached(
                    "
                    select Name, Value, Timestamp, Ttl
                        from Cell
                        where Keyspace = ?1
                        and ColumnFamily = ?2
                        and RowKey = ?3
                        and Name = ?4
                ",
                )?
                .query_row(params![keyspace, table, rowkey, name], |r| cell_from_row(r, 0))
                .optional()?;
            let current = match existing.filter(|c| !expired(c.timestamp, c.ttl, now)) {
                None => 0,
                Some(cell) => {
                    let raw: [u8; 8] = cell.value.as_slice().try_into().map_err(|_| {
                        IntraError::Backend(format!(
                            "column '{}' does not hold a counter",
                            String::from_utf8_lossy(&name)
                        ))
                    })?;
                    i64::from_be_bytes(raw)
                }
            };
            let total = current
                .checked_add(delta)
                .ok_or_else(|| IntraError::Backend("counter overflow".into()))?;
            tx.prepare_cached(
                "
                insert or replace into Cell (
                    Keyspace,
                    ColumnFamily,
                    RowKey,
                    Name,
                    Value,
                    Timestamp,
                    Ttl
                ) values (?1, ?2, ?3, ?4, ?5, ?6, null)
            ",
            )?
            .execute(params![keyspace, table, rowkey, name, total.to_be_bytes().to_vec(), now])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn create_keyspace(&self, name: &str, replication: u32) -> Result<()> {
        if replication == 0 {
            return Err(IntraError::Backend("replication factor must be at least 1".into()));
        }
        let name = name.to_string();
        self.with_connection(move |conn| {
            let inserted = conn
                .prepare_cached(
                    "
                    insert or ignore into Keyspace (
                        Keyspace,
                        Replication
                    ) values (?1, ?2)
                ",
                )?
                .execute(params![name, replication])?;
            if inserted == 0 {
                return Err(IntraError::Backend(format!("Keyspace '{name}' already exists")));
            }
            Ok(())
        })
        .await
    }

    async fn create_table(&self, keyspace: &str, name: &str) -> Result<()> {
        let (keyspace, name) = (keyspace.to_string(), name.to_string());
        self.with_connection(move |conn| {
            known_keyspace(conn, &keyspace)?;
            let inserted = conn
                .prepare_cached(
                    "
                    insert or ignore into ColumnFamily (
                        Keyspace,
                        ColumnFamily
                    ) values (?1, ?2)
                ",
                )?
                .execute(params![keyspace, name])?;
            if inserted == 0 {
                return Err(IntraError::Backend(format!("Table '{keyspace}.{name}' already exists")));
            }
            Ok(())
        })
        .await
    }

    async fn list_keyspaces(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut statement = conn.prepare_cached("select Keyspace from Keyspace order by Keyspace")?;
            let names = statement
                .query_map([], |r| r.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(names)
        })
        .await
    }

    async fn list_tables(&self, keyspace: &str) -> Result<Vec<String>> {
        let keyspace = keyspace.to_string();
        self.with_connection(move |conn| {
            known_keyspace(conn, &keyspace)?;
            let mut statement = conn.prepare_cached(
                "
                select ColumnFamily
                    from ColumnFamily
                    where Keyspace = ?1
                    order by ColumnFamily
            ",
            )?;
            let names = statement
                .query_map(params![keyspace], |r| r.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(names)
        })
        .await
    }

    async fn query(
        &self,
        keyspace: Option<&str>,
        statement: &str,
        version: &str,
        level: ConsistencyLevel,
    ) -> Result<Vec<Cell>> {
        let select = parse_statement(statement, version)?;
        let ks = select
            .keyspace
            .as_deref()
            .or(keyspace)
            .ok_or_else(|| IntraError::Backend(format!("no keyspace given for statement: {statement}")))?
            .to_string();
        let nodes = self.nodes;
        self.with_connection(move |conn| {
            check_consistency(level, replication(conn, &ks, &select.table)?, nodes, true)?;
            let now = now_micros();
            let mut prepared = conn.prepare_cached(
                "
                select RowKey, Name, Value, Timestamp, Ttl
                    from Cell
                    where Keyspace = ?1
                    and ColumnFamily = ?2
                    order by RowKey, Name
            ",
            )?;
            let rows = prepared.query_map(params![ks, select.table], |r| {
                Ok((r.get::<_, Vec<u8>>(0)?, cell_from_row(r, 1)?))
            })?;
            // group live cells by row key, keeping the ordering of the query
            let mut grouped: Vec<(Vec<u8>, Vec<Cell>)> = Vec::new();
            for row in rows {
                let (rowkey, cell) = row?;
                if expired(cell.timestamp, cell.ttl, now) {
                    continue;
                }
                match grouped.last_mut() {
                    Some((key, cells)) if *key == rowkey => cells.push(cell),
                    _ => grouped.push((rowkey, vec![cell])),
                }
            }
            let mut cells = Vec::new();
            for (rowkey, live) in grouped.into_iter().take(select.limit.unwrap_or(usize::MAX)) {
                let newest = live.iter().map(|c| c.timestamp).max().unwrap_or_default();
                cells.push(Cell {
                    name: b"key".to_vec(),
                    value: rowkey,
                    timestamp: newest,
                    ttl: None,
                });
                cells.extend(live);
            }
            Ok(cells)
        })
        .await
    }
}
