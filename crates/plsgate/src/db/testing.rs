//! Scripted in-memory database used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    ArgumentRow, BindValue, Breaker, Connector, DbError, DbResult, LobId, PageChunk, ResolvedName,
    Session,
};

#[derive(Default)]
pub(crate) struct Script {
    pub arguments: HashMap<String, Vec<ArgumentRow>>,
    pub pages: VecDeque<PageChunk>,
    /// Fail any block whose text contains the first string, with the second as message.
    pub fail_execute: Option<(String, String)>,
    pub fail_connect: bool,
    pub fail_ping: bool,
    pub fail_resolve: bool,
    pub connect_delay: Option<Duration>,
    pub close_delay: Option<Duration>,
}

#[derive(Default)]
pub(crate) struct Journal {
    pub connects: usize,
    pub executed: Vec<(String, Vec<BindValue>)>,
    pub resolved: Vec<String>,
    pub created_lobs: Vec<(LobId, String)>,
    pub freed_lobs: Vec<LobId>,
    pub pings: usize,
    pub rollbacks: usize,
    pub closed: usize,
    pub autocommit: Vec<bool>,
    pub interrupts: usize,
}

#[derive(Clone, Default)]
pub(crate) struct FakeDb {
    script: Arc<Mutex<Script>>,
    journal: Arc<Mutex<Journal>>,
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn journal(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap()
    }

    pub fn with_arguments(self, name: &str, rows: Vec<ArgumentRow>) -> Self {
        self.script().arguments.insert(name.to_lowercase(), rows);
        self
    }

    pub fn with_pages(self, pages: impl IntoIterator<Item = (Option<&'static str>, u32)>) -> Self {
        self.script().pages.extend(pages.into_iter().map(|(text, lines)| PageChunk {
            text: text.map(str::to_string),
            lines,
        }));
        self
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(FakeConnector { db: self.clone() })
    }

    pub fn session(&self) -> Box<dyn Session> {
        Box::new(FakeSession {
            db: self.clone(),
            next_lob: 0,
            broken: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Convenience constructor for a plain argument row.
pub(crate) fn arg(name: &str, overload: u32, data_type: &str) -> ArgumentRow {
    ArgumentRow {
        argument_name: Some(name.to_uppercase()),
        overload: Some(overload),
        data_type: Some(data_type.to_string()),
        ..Default::default()
    }
}

/// A `PL/SQL TABLE` row plus the element row the catalog emits after it.
pub(crate) fn table_arg(name: &str, overload: u32, owner: &str, package: &str, ty: &str) -> [ArgumentRow; 2] {
    [
        ArgumentRow {
            argument_name: Some(name.to_uppercase()),
            overload: Some(overload),
            data_type: Some("PL/SQL TABLE".to_string()),
            type_owner: Some(owner.to_string()),
            type_name: Some(package.to_string()),
            type_subname: Some(ty.to_string()),
        },
        ArgumentRow {
            argument_name: None,
            overload: Some(overload),
            data_type: Some("VARCHAR2".to_string()),
            ..Default::default()
        },
    ]
}

struct FakeConnector {
    db: FakeDb,
}

impl Connector for FakeConnector {
    fn connect(&self) -> DbResult<Box<dyn Session>> {
        let (fail, delay) = {
            let script = self.db.script();
            (script.fail_connect, script.connect_delay)
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.db.journal().connects += 1;
        if fail {
            return Err(DbError::new("ORA-12541: TNS:no listener").with_code(12541));
        }
        Ok(self.db.session())
    }
}

struct FakeSession {
    db: FakeDb,
    next_lob: u64,
    broken: Arc<AtomicBool>,
}

impl FakeSession {
    fn check_broken(&self) -> DbResult<()> {
        if self.broken.swap(false, Ordering::SeqCst) {
            return Err(
                DbError::new("ORA-01013: user requested cancel of current operation").with_code(1013),
            );
        }
        Ok(())
    }
}

struct FakeBreaker {
    db: FakeDb,
    broken: Arc<AtomicBool>,
}

impl Breaker for FakeBreaker {
    fn break_execution(&self) -> DbResult<()> {
        self.db.journal().interrupts += 1;
        self.broken.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Session for FakeSession {
    fn execute_block(&mut self, sql: &str, binds: &[BindValue]) -> DbResult<()> {
        self.check_broken()?;
        self.db
            .journal()
            .executed
            .push((sql.to_string(), binds.to_vec()));
        if let Some((fragment, message)) = &self.db.script().fail_execute
            && sql.contains(fragment.as_str())
        {
            return Err(DbError::new(message.clone()));
        }
        Ok(())
    }

    fn resolve_name(&mut self, name: &str) -> DbResult<ResolvedName> {
        self.db.journal().resolved.push(name.to_string());
        if self.db.script().fail_resolve {
            return Err(DbError::new("ORA-06564: object does not exist"));
        }
        let upper = name.to_uppercase();
        Ok(match upper.split_once('.') {
            Some((package, procedure)) => ResolvedName {
                owner: "WEB".to_string(),
                package: Some(package.to_string()),
                procedure: procedure.to_string(),
            },
            None => ResolvedName {
                owner: "WEB".to_string(),
                package: None,
                procedure: upper,
            },
        })
    }

    fn argument_rows(&mut self, name: &ResolvedName) -> DbResult<Vec<ArgumentRow>> {
        let key = match &name.package {
            Some(package) => format!("{package}.{}", name.procedure),
            None => name.procedure.clone(),
        }
        .to_lowercase();
        Ok(self
            .db
            .script()
            .arguments
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    fn fetch_page(&mut self, _max_lines: u32) -> DbResult<PageChunk> {
        self.check_broken()?;
        Ok(self.db.script().pages.pop_front().unwrap_or(PageChunk {
            text: None,
            lines: 0,
        }))
    }

    fn create_temp_clob(&mut self, content: &str) -> DbResult<LobId> {
        self.next_lob += 1;
        let id = LobId(self.next_lob);
        self.db
            .journal()
            .created_lobs
            .push((id, content.to_string()));
        Ok(id)
    }

    fn free_temp_clob(&mut self, lob: LobId) -> DbResult<()> {
        self.db.journal().freed_lobs.push(lob);
        Ok(())
    }

    fn ping(&mut self, _timeout: Duration) -> DbResult<()> {
        self.db.journal().pings += 1;
        if self.db.script().fail_ping {
            return Err(DbError::new("ORA-03113: end-of-file on communication channel"));
        }
        Ok(())
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.db.journal().rollbacks += 1;
        Ok(())
    }

    fn set_autocommit(&mut self, autocommit: bool) -> DbResult<()> {
        self.db.journal().autocommit.push(autocommit);
        Ok(())
    }

    fn breaker(&self) -> Arc<dyn Breaker> {
        Arc::new(FakeBreaker {
            db: self.db.clone(),
            broken: Arc::clone(&self.broken),
        })
    }

    fn close(self: Box<Self>) -> DbResult<()> {
        let delay = self.db.script().close_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.db.journal().closed += 1;
        Ok(())
    }
}
