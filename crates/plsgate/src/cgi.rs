//! CGI-style environment pushed into a session before every call.

use std::fmt::Write as _;
use std::net::IpAddr;

use axum::http::HeaderMap;

use crate::db::statements::RESET_PACKAGES;
use crate::db::{BindValue, DbResult, Session};
use crate::version::{GATEWAY_NAME, GATEWAY_VERSION};

const DOC_ACCESS_PATH: &str = "docs";
const DOCUMENT_TABLE: &str = "owa_public.wpg_document";

/// Request attributes the environment is derived from.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: String,
    /// Last path segment as requested, including any `!` marker.
    pub script_name: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub client_addr: IpAddr,
    /// e.g. `HTTP/1.1`.
    pub protocol: String,
    pub scheme: String,
}

/// Gateway-wide values that appear in every environment.
#[derive(Debug, Clone)]
pub struct CgiSettings {
    pub dad: String,
    pub charset: String,
    pub listen_port: u16,
    pub username: String,
    pub password: String,
}

/// Ordered name/value pairs in the legacy CGI vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CgiEnvironment {
    vars: Vec<(&'static str, String)>,
}

/// Pass-through request headers, in push order.
const FORWARDED_HEADERS: &[(&str, &str)] = &[
    ("referer", "HTTP_REFERER"),
    ("user-agent", "HTTP_USER_AGENT"),
    ("pragma", "HTTP_PRAGMA"),
    ("host", "HTTP_HOST"),
    ("accept", "HTTP_ACCEPT"),
    ("accept-encoding", "HTTP_ACCEPT_ENCODING"),
    ("accept-language", "HTTP_ACCEPT_LANGUAGE"),
    ("accept-charset", "HTTP_ACCEPT_CHARSET"),
    ("if-modified-since", "HTTP_IF_MODIFIED_SINCE"),
    ("cookie", "HTTP_COOKIE"),
];

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Client address in the form the database sees it; IPv4-mapped IPv6
/// addresses are unwrapped.
pub fn client_ip(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

impl CgiEnvironment {
    pub fn from_request(info: &RequestInfo, settings: &CgiSettings) -> Self {
        let mut vars: Vec<(&'static str, String)> = Vec::with_capacity(32);
        let headers = &info.headers;
        let remote = client_ip(info.client_addr).to_string();

        vars.push(("REQUEST_METHOD", info.method.clone()));
        vars.push(("QUERY_STRING", info.query.clone().unwrap_or_default()));
        vars.push(("SCRIPT_NAME", info.script_name.clone()));
        vars.push(("SERVER_SOFTWARE", GATEWAY_NAME.to_string()));
        vars.push((
            "CONTENT_LENGTH",
            header(headers, "content-length").unwrap_or("0").to_string(),
        ));
        if let Some(content_type) = header(headers, "content-type") {
            vars.push(("CONTENT_TYPE", content_type.to_string()));
        }
        vars.push(("SERVER_PROTOCOL", info.protocol.clone()));
        let request_protocol = header(headers, "x-forwarded-proto").unwrap_or(&info.scheme);
        vars.push(("REQUEST_PROTOCOL", request_protocol.to_uppercase()));
        if let Some(host) = header(headers, "host") {
            vars.push(("SERVER_NAME", host.to_string()));
        }
        vars.push(("SERVER_PORT", settings.listen_port.to_string()));
        vars.push(("REMOTE_ADDR", remote.clone()));
        vars.push(("REMOTE_HOST", remote));

        for &(name, var) in FORWARDED_HEADERS {
            if let Some(value) = header(headers, name) {
                vars.push((var, value.to_string()));
            }
        }
        if let Some(since) = header(headers, "if-modified-since") {
            log_if_modified_since(since);
        }

        vars.push(("DAD_NAME", settings.dad.clone()));
        vars.push(("DOC_ACCESS_PATH", DOC_ACCESS_PATH.to_string()));
        vars.push(("REQUEST_CHARSET", settings.charset.clone()));
        vars.push(("DOCUMENT_TABLE", DOCUMENT_TABLE.to_string()));
        vars.push(("PLSQL_GATEWAY", GATEWAY_NAME.to_string()));
        vars.push(("GATEWAY_IVERSION", GATEWAY_VERSION.to_string()));
        vars.push(("REQUEST_IANA_CHARSET", settings.charset.clone()));
        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.vars.iter().map(|(n, _)| *n)
    }
}

fn log_if_modified_since(value: &str) {
    match chrono::DateTime::parse_from_rfc2822(value) {
        Ok(at) => tracing::debug!(if_modified_since = at.timestamp(), "Conditional request"),
        Err(e) => tracing::warn!(value, error = %e, "Failed to parse If-Modified-Since header"),
    }
}

/// The environment-initialisation block and its binds.
pub fn init_block(
    env: &CgiEnvironment,
    client_addr: IpAddr,
    settings: &CgiSettings,
) -> (String, Vec<BindValue>) {
    let mut sql = String::from(
        "DECLARE\n  var_val owa.vc_arr;\n  var_name owa.vc_arr;\n  dummy_num_vals INTEGER;\nBEGIN\n  dummy_num_vals := owa.initialize;\n",
    );
    let mut binds = Vec::with_capacity(env.len() * 2 + 8);
    let mut bind = |sql: &mut String, target: &str, value: BindValue| {
        binds.push(value);
        let _ = writeln!(sql, "  {target} := :{};", binds.len());
    };

    let ip = client_ip(client_addr);
    if let IpAddr::V4(v4) = ip {
        for (i, octet) in v4.octets().iter().enumerate() {
            bind(&mut sql, &format!("owa.ip_address({})", i + 1), BindValue::Text(octet.to_string()));
        }
    }
    bind(&mut sql, "owa.user_id", BindValue::Text(settings.username.clone()));
    bind(&mut sql, "owa.password", BindValue::Text(settings.password.clone()));
    bind(&mut sql, "owa.hostname", BindValue::Text(ip.to_string()));
    sql.push_str("  htp.init;\n");
    for (i, (name, value)) in env.vars.iter().enumerate() {
        bind(&mut sql, &format!("var_name({})", i + 1), BindValue::Text(name.to_string()));
        bind(&mut sql, &format!("var_val({})", i + 1), BindValue::Text(value.clone()));
    }
    binds.push(BindValue::Integer(env.len() as i64));
    let _ = writeln!(sql, "  owa.init_cgi_env(:{}, var_name, var_val);", binds.len());
    sql.push_str("END;");
    (sql, binds)
}

/// Clear package state left by the previous user of this session.
pub fn reset_session(session: &mut dyn Session) -> DbResult<()> {
    session.execute_block(RESET_PACKAGES, &[])
}

/// Reset the session, then push a fresh environment into it.
pub fn prepare_session(
    session: &mut dyn Session,
    info: &RequestInfo,
    settings: &CgiSettings,
) -> DbResult<()> {
    reset_session(session)?;
    let env = CgiEnvironment::from_request(info, settings);
    let (sql, binds) = init_block(&env, info.client_addr, settings);
    tracing::debug!(vars = env.len(), "Initialising CGI environment");
    session.execute_block(&sql, &binds)
}
