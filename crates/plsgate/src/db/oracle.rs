//! Oracle backend on top of the `oracle` crate (ODPI-C).

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use oracle::Connection;
use oracle::sql_type::{Clob, OracleType};

use super::statements;
use super::{
    ArgumentRow, BindValue, Breaker, Connector, DbError, DbResult, LobId, PageChunk, ResolvedName,
    Session,
};

impl From<oracle::Error> for DbError {
    fn from(err: oracle::Error) -> Self {
        let code = err.db_error().map(|db| db.code());
        let mut out = DbError::new(err.to_string());
        out.code = code;
        out
    }
}

/// Version of the linked Oracle client library, if it can be loaded.
pub fn client_version() -> Option<String> {
    oracle::Version::client().ok().map(|v| v.to_string())
}

/// Connects with a SID-addressed descriptor, autocommit off.
#[derive(Clone)]
pub struct OracleConnector {
    username: String,
    password: String,
    connect_string: String,
}

impl OracleConnector {
    pub fn new(host: &str, port: u16, sid: &str, username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            connect_string: format!(
                "(DESCRIPTION=(ADDRESS=(PROTOCOL=TCP)(HOST={host})(PORT={port}))(CONNECT_DATA=(SID={sid})))"
            ),
        }
    }
}

impl std::fmt::Debug for OracleConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleConnector")
            .field("username", &self.username)
            .field("connect_string", &self.connect_string)
            .finish_non_exhaustive()
    }
}

impl Connector for OracleConnector {
    fn connect(&self) -> DbResult<Box<dyn Session>> {
        let mut conn = Connection::connect(&self.username, &self.password, &self.connect_string)?;
        conn.set_autocommit(false);
        Ok(Box::new(OracleSession {
            conn: Arc::new(conn),
            lobs: HashMap::new(),
            next_lob: 0,
        }))
    }
}

pub struct OracleSession {
    conn: Arc<Connection>,
    lobs: HashMap<LobId, Clob>,
    next_lob: u64,
}

impl Session for OracleSession {
    fn execute_block(&mut self, sql: &str, binds: &[BindValue]) -> DbResult<()> {
        let mut stmt = self.conn.statement(sql).build()?;
        for (i, bind) in binds.iter().enumerate() {
            let idx = i + 1;
            match bind {
                BindValue::Text(value) => stmt.bind(idx, value)?,
                BindValue::Integer(value) => stmt.bind(idx, value)?,
                BindValue::Clob(lob) => {
                    let clob = self
                        .lobs
                        .get(lob)
                        .ok_or_else(|| DbError::new(format!("unknown temporary CLOB {lob}")))?;
                    stmt.bind(idx, clob)?;
                }
            }
        }
        stmt.execute(&[])?;
        Ok(())
    }

    fn resolve_name(&mut self, name: &str) -> DbResult<ResolvedName> {
        let name = name.to_string();
        let mut stmt = self.conn.statement(statements::NAME_RESOLVE).build()?;
        stmt.bind(1, &name)?;
        for idx in 2..=5 {
            stmt.bind(idx, &OracleType::Varchar2(128))?;
        }
        stmt.bind(6, &OracleType::Int64)?;
        stmt.bind(7, &OracleType::Int64)?;
        stmt.execute(&[])?;

        let owner: Option<String> = stmt.bind_value(2)?;
        let package: Option<String> = stmt.bind_value(3)?;
        let procedure: Option<String> = stmt.bind_value(4)?;
        Ok(ResolvedName {
            owner: owner.unwrap_or_default(),
            package,
            procedure: procedure.unwrap_or_default(),
        })
    }

    fn argument_rows(&mut self, name: &ResolvedName) -> DbResult<Vec<ArgumentRow>> {
        let sql = statements::argument_query(name.package.is_some());
        let rows = match &name.package {
            Some(package) => self
                .conn
                .query(&sql, &[&name.owner, package, &name.procedure])?,
            None => self.conn.query(&sql, &[&name.owner, &name.procedure])?,
        };

        let mut out = Vec::new();
        for row in rows {
            let row = row?;
            let overload: Option<String> = row.get(1)?;
            let overload = match overload {
                Some(s) => Some(s.trim().parse::<u32>().map_err(|e| {
                    DbError::new(format!("invalid overload number '{s}': {e}"))
                })?),
                None => None,
            };
            out.push(ArgumentRow {
                argument_name: row.get(0)?,
                overload,
                data_type: row.get(2)?,
                type_owner: row.get(3)?,
                type_name: row.get(4)?,
                type_subname: row.get(5)?,
            });
        }
        Ok(out)
    }

    fn fetch_page(&mut self, max_lines: u32) -> DbResult<PageChunk> {
        let mut stmt = self.conn.statement(statements::FETCH_PAGE).build()?;
        stmt.bind(1, &i64::from(max_lines))?;
        stmt.bind(2, &OracleType::Varchar2(32767))?;
        stmt.bind(3, &OracleType::Int64)?;
        stmt.execute(&[])?;

        let text: Option<String> = stmt.bind_value(2)?;
        let lines: i64 = stmt.bind_value(3)?;
        Ok(PageChunk {
            text,
            lines: u32::try_from(lines.max(0)).unwrap_or(u32::MAX),
        })
    }

    fn create_temp_clob(&mut self, content: &str) -> DbResult<LobId> {
        let mut clob = Clob::new(&self.conn)?;
        clob.write_all(content.as_bytes())
            .and_then(|_| clob.flush())
            .map_err(|e| DbError::new(format!("failed to write temporary CLOB: {e}")))?;

        self.next_lob += 1;
        let id = LobId(self.next_lob);
        self.lobs.insert(id, clob);
        Ok(id)
    }

    fn free_temp_clob(&mut self, lob: LobId) -> DbResult<()> {
        // Dropping the last locator releases the temporary LOB.
        match self.lobs.remove(&lob) {
            Some(clob) => {
                drop(clob);
                Ok(())
            }
            None => Err(DbError::new(format!("unknown temporary CLOB {lob}"))),
        }
    }

    fn ping(&mut self, timeout: Duration) -> DbResult<()> {
        self.conn.set_call_timeout(Some(timeout))?;
        let result = self
            .conn
            .query_row(statements::LIVENESS_PROBE, &[])
            .map(|_| ());
        if let Err(e) = self.conn.set_call_timeout(None) {
            tracing::warn!(error = %e, "Failed to clear call timeout after probe");
        }
        result.map_err(DbError::from)
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.conn.rollback()?;
        Ok(())
    }

    fn set_autocommit(&mut self, autocommit: bool) -> DbResult<()> {
        if self.conn.autocommit() == autocommit {
            return Ok(());
        }
        let conn = Arc::get_mut(&mut self.conn)
            .ok_or_else(|| DbError::new("cannot change autocommit while a breaker is held"))?;
        conn.set_autocommit(autocommit);
        Ok(())
    }

    fn breaker(&self) -> Arc<dyn Breaker> {
        Arc::new(OracleBreaker(Arc::clone(&self.conn)))
    }

    fn close(mut self: Box<Self>) -> DbResult<()> {
        self.lobs.clear();
        self.conn.close()?;
        Ok(())
    }
}

struct OracleBreaker(Arc<Connection>);

impl Breaker for OracleBreaker {
    fn break_execution(&self) -> DbResult<()> {
        self.0.break_execution()?;
        Ok(())
    }
}
