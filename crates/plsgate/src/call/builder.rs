//! Synthesis of the anonymous block that invokes a procedure.
//!
//! Request values only ever travel as positional binds. Statement text is
//! assembled from the validated procedure name, catalog argument names,
//! catalog type names and generated local variable names.

use std::fmt::Write as _;

use super::request::CallRequest;
use crate::error::GatewayError;
use crate::procedure::ProcedureSignature;

/// Prefix the catalog adds to types granted to PUBLIC.
const PUBLIC_PREFIX: &str = "PUBLIC.";

/// A value to bind, before any session-side objects exist for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedBind {
    Text(String),
    /// Bound through a session-scoped temporary CLOB.
    Clob(String),
}

/// Statement text plus its binds in placeholder order (`:1`, `:2`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCall {
    pub statement: String,
    pub binds: Vec<PlannedBind>,
}

pub struct CallBuilder {
    excluded_prefixes: Vec<String>,
}

#[derive(Default)]
struct Block {
    declarations: Vec<String>,
    assignments: Vec<String>,
    arguments: Vec<String>,
    binds: Vec<PlannedBind>,
}

impl Block {
    fn next_local(&self) -> String {
        format!("l_arg{}", self.arguments.len() + 1)
    }

    fn assign(&mut self, target: String, value: PlannedBind) {
        self.binds.push(value);
        self.assignments
            .push(format!("{target} := :{};", self.binds.len()));
    }

    fn render(self, procedure: &str) -> PlannedCall {
        let mut statement = String::new();
        if !self.declarations.is_empty() {
            statement.push_str("DECLARE\n");
            for line in &self.declarations {
                let _ = writeln!(statement, "  {line}");
            }
        }
        statement.push_str("BEGIN\n");
        for line in &self.assignments {
            let _ = writeln!(statement, "  {line}");
        }
        if self.arguments.is_empty() {
            let _ = writeln!(statement, "  {procedure};");
        } else {
            let _ = writeln!(statement, "  {procedure}({});", self.arguments.join(", "));
        }
        statement.push_str("END;");
        PlannedCall {
            statement,
            binds: self.binds,
        }
    }
}

impl CallBuilder {
    pub fn new(excluded_prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            excluded_prefixes: excluded_prefixes
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .collect(),
        }
    }

    /// Reject reserved namespaces and names unfit for statement text.
    ///
    /// Runs before any catalog or database access.
    pub fn authorize(&self, call: &CallRequest) -> Result<(), GatewayError> {
        let name = call.name();
        let lower = name.to_lowercase();
        if self
            .excluded_prefixes
            .iter()
            .any(|prefix| lower.starts_with(prefix.as_str()))
        {
            tracing::warn!(procedure = %name, "Rejected call into reserved namespace");
            return Err(GatewayError::Authorization {
                procedure: name.to_string(),
            });
        }
        if !is_procedure_name(name) {
            return Err(GatewayError::invalid_name(name));
        }
        Ok(())
    }

    pub fn build(
        &self,
        call: &CallRequest,
        signature: &ProcedureSignature,
    ) -> Result<PlannedCall, GatewayError> {
        self.authorize(call)?;

        let mut block = Block::default();
        for key in call.keys() {
            let lower = key.to_lowercase();
            let base = lower.split_once('.').map_or(lower.as_str(), |(base, _)| base);

            // Every key must name an argument, dotted or not.
            let Some(declared) = signature.argument_type(base) else {
                tracing::warn!(parameter = %key, procedure = %call.name(), "Argument not in procedure description");
                return Err(GatewayError::no_matching_overload(call.name(), key));
            };
            if !is_identifier(base) {
                return Err(GatewayError::no_matching_overload(call.name(), key));
            }

            let point = if base.len() == lower.len() {
                false
            } else if lower.ends_with(".x") {
                true
            } else {
                // `.y` is consumed together with its `.x` twin.
                tracing::debug!(parameter = %key, "Skipping dotted parameter");
                continue;
            };

            let local = block.next_local();
            if declared.contains('.') {
                let declared = declared.strip_prefix(PUBLIC_PREFIX).unwrap_or(declared);
                block.declarations.push(format!("{local} {declared};"));
                if point {
                    let x = call.first(key).unwrap_or_default();
                    let y = call
                        .first_ignore_case(&format!("{base}.y"))
                        .unwrap_or_default();
                    block.assign(format!("{local}(1)"), PlannedBind::Text(x.to_string()));
                    block.assign(format!("{local}(2)"), PlannedBind::Text(y.to_string()));
                } else {
                    for (i, value) in call.values(key).iter().enumerate() {
                        block.assign(
                            format!("{local}({})", i + 1),
                            PlannedBind::Text(value.clone()),
                        );
                    }
                }
            } else {
                let value = call.first(key).unwrap_or_default().to_string();
                if declared.eq_ignore_ascii_case("CLOB") {
                    block.declarations.push(format!("{local} CLOB;"));
                    block.assign(local.clone(), PlannedBind::Clob(value));
                } else {
                    block.declarations.push(format!("{local} VARCHAR2(32767);"));
                    block.assign(local.clone(), PlannedBind::Text(value));
                }
            }
            block.arguments.push(format!("{base}=>{local}"));
        }

        let planned = block.render(call.name());
        tracing::debug!(statement = %planned.statement, binds = planned.binds.len(), "Built procedure call");
        Ok(planned)
    }
}

/// A dotted PL/SQL name such as `pkg.proc` or `owner.pkg.proc`.
fn is_procedure_name(name: &str) -> bool {
    !name.is_empty() && name.split('.').all(is_identifier)
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ArgumentRow;
    use crate::db::testing::{arg, table_arg};

    fn builder() -> CallBuilder {
        CallBuilder::new(["sys.", "owa", "dbms_", "htp."])
    }

    fn call(name: &str, items: &[(&str, &str)]) -> CallRequest {
        CallRequest::new(
            name,
            items.iter().map(|(k, v)| (k.to_string(), v.to_string())),
        )
    }

    fn signature(rows: Vec<ArgumentRow>) -> ProcedureSignature {
        ProcedureSignature::from_rows("shop.show", &rows)
    }

    #[test]
    fn reserved_namespaces_are_rejected_case_insensitively() {
        let b = builder();
        for name in ["SYS.dbms_lock", "owa_util.showsource", "DBMS_SQL.parse", "htp.p", "owa"] {
            let err = b.authorize(&call(name, &[])).unwrap_err();
            assert!(matches!(err, GatewayError::Authorization { .. }), "{name}");
        }
        assert!(b.authorize(&call("shop.show", &[])).is_ok());
    }

    #[test]
    fn names_with_statement_syntax_are_rejected() {
        let b = builder();
        for name in ["shop.show;drop", "shop show", "", "shop..show", "1shop.show"] {
            let err = b.authorize(&call(name, &[])).unwrap_err();
            assert!(matches!(err, GatewayError::CatalogResolution(_)), "{name:?}");
        }
        assert!(b.authorize(&call("web$pkg.show#2", &[])).is_ok());
    }

    #[test]
    fn zero_argument_call_omits_parentheses() {
        let planned = builder().build(&call("shop.home", &[]), &signature(vec![])).unwrap();
        insta::assert_snapshot!(planned.statement, @r"
        BEGIN
          shop.home;
        END;
        ");
        assert!(planned.binds.is_empty());
    }

    #[test]
    fn scalars_bind_as_bounded_strings() {
        let sig = signature(vec![arg("p_id", 1, "NUMBER"), arg("p_name", 1, "VARCHAR2")]);
        let planned = builder()
            .build(&call("shop.show", &[("P_ID", "42"), ("p_name", "o'brien")]), &sig)
            .unwrap();
        insta::assert_snapshot!(planned.statement, @r"
        DECLARE
          l_arg1 VARCHAR2(32767);
          l_arg2 VARCHAR2(32767);
        BEGIN
          l_arg1 := :1;
          l_arg2 := :2;
          shop.show(p_id=>l_arg1, p_name=>l_arg2);
        END;
        ");
        assert_eq!(
            planned.binds,
            vec![
                PlannedBind::Text("42".into()),
                PlannedBind::Text("o'brien".into())
            ]
        );
        assert!(!planned.statement.contains("o'brien"));
    }

    #[test]
    fn repeated_key_becomes_one_array_element_per_value() {
        let mut rows = vec![];
        rows.extend(table_arg("p_tags", 1, "PUBLIC", "OWA_UTIL", "IDENT_ARR"));
        let planned = builder()
            .build(
                &call("shop.show", &[("p_tags", "red"), ("p_tags", "green"), ("p_tags", "blue")]),
                &signature(rows),
            )
            .unwrap();
        insta::assert_snapshot!(planned.statement, @r"
        DECLARE
          l_arg1 OWA_UTIL.IDENT_ARR;
        BEGIN
          l_arg1(1) := :1;
          l_arg1(2) := :2;
          l_arg1(3) := :3;
          shop.show(p_tags=>l_arg1);
        END;
        ");
        assert_eq!(
            planned.binds,
            vec![
                PlannedBind::Text("red".into()),
                PlannedBind::Text("green".into()),
                PlannedBind::Text("blue".into()),
            ]
        );
    }

    #[test]
    fn point_pair_yields_one_two_field_parameter() {
        let mut rows = vec![];
        rows.extend(table_arg("p_pos", 1, "SYS", "OWA_IMAGE", "POINT"));
        let planned = builder()
            .build(
                &call("shop.show", &[("p_pos.x", "10"), ("p_pos.y", "20")]),
                &signature(rows),
            )
            .unwrap();
        insta::assert_snapshot!(planned.statement, @r"
        DECLARE
          l_arg1 SYS.OWA_IMAGE.POINT;
        BEGIN
          l_arg1(1) := :1;
          l_arg1(2) := :2;
          shop.show(p_pos=>l_arg1);
        END;
        ");
        assert_eq!(
            planned.binds,
            vec![PlannedBind::Text("10".into()), PlannedBind::Text("20".into())]
        );
    }

    #[test]
    fn point_on_scalar_binds_only_x() {
        let sig = signature(vec![arg("p_pos", 1, "VARCHAR2")]);
        let planned = builder()
            .build(&call("shop.show", &[("p_pos.X", "10"), ("p_pos.Y", "20")]), &sig)
            .unwrap();
        assert_eq!(planned.binds, vec![PlannedBind::Text("10".into())]);
        assert!(planned.statement.contains("shop.show(p_pos=>l_arg1);"));
    }

    #[test]
    fn clob_parameters_are_planned_as_clobs() {
        let sig = signature(vec![arg("p_doc", 1, "clob")]);
        let planned = builder()
            .build(&call("shop.show", &[("p_doc", "long text")]), &sig)
            .unwrap();
        assert!(planned.statement.contains("l_arg1 CLOB;"));
        assert_eq!(planned.binds, vec![PlannedBind::Clob("long text".into())]);
    }

    #[test]
    fn repeated_scalar_binds_first_value() {
        let sig = signature(vec![arg("p_id", 1, "NUMBER")]);
        let planned = builder()
            .build(&call("shop.show", &[("p_id", "1"), ("p_id", "2")]), &sig)
            .unwrap();
        assert_eq!(planned.binds, vec![PlannedBind::Text("1".into())]);
    }

    #[test]
    fn unknown_parameter_fails_with_diagnostic() {
        let sig = signature(vec![arg("p_id", 1, "NUMBER")]);
        let err = builder()
            .build(&call("shop.show", &[("p_id", "1"), ("p_bogus", "2")]), &sig)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("p_bogus"));
        assert!(message.contains("shop.show"));
    }

    #[test]
    fn flexible_call_passes_two_arrays() {
        let mut rows = vec![];
        rows.extend(table_arg("name_array", 1, "SYS", "OWA", "VC_ARR"));
        rows.extend(table_arg("value_array", 1, "SYS", "OWA", "VC_ARR"));
        let planned = builder()
            .build(&call("!shop.search", &[("q", "rust"), ("page", "2")]), &signature(rows))
            .unwrap();
        insta::assert_snapshot!(planned.statement, @r"
        DECLARE
          l_arg1 SYS.OWA.VC_ARR;
          l_arg2 SYS.OWA.VC_ARR;
        BEGIN
          l_arg1(1) := :1;
          l_arg1(2) := :2;
          l_arg2(1) := :3;
          l_arg2(2) := :4;
          shop.search(name_array=>l_arg1, value_array=>l_arg2);
        END;
        ");
        let texts: Vec<_> = planned
            .binds
            .iter()
            .map(|b| match b {
                PlannedBind::Text(t) | PlannedBind::Clob(t) => t.as_str(),
            })
            .collect();
        assert_eq!(texts, vec!["page", "q", "2", "rust"]);
    }

    #[test]
    fn other_dotted_keys_of_known_arguments_are_ignored() {
        let sig = signature(vec![arg("p_id", 1, "NUMBER")]);
        let planned = builder()
            .build(&call("shop.show", &[("p_id", "1"), ("p_id.z", "2")]), &sig)
            .unwrap();
        assert_eq!(planned.binds, vec![PlannedBind::Text("1".into())]);
    }

    #[test]
    fn dotted_key_without_matching_argument_is_rejected() {
        let sig = signature(vec![arg("p_id", 1, "NUMBER")]);
        for key in ["p_pos.y", "junk.z", "p_pos.x"] {
            let err = builder()
                .build(&call("shop.show", &[("p_id", "1"), (key, "2")]), &sig)
                .unwrap_err();
            assert!(matches!(err, GatewayError::CatalogResolution(_)), "{key}");
            assert!(err.to_string().contains(&format!("parameter name '{key}'")), "{key}");
        }
    }
}
