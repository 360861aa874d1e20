use super::builder::{PlannedBind, PlannedCall};
use super::request::CallRequest;
use crate::db::{BindValue, DbError, LobId, Session};
use crate::error::GatewayError;

/// Run a planned call in one round trip.
///
/// Temporary CLOBs created for the call are freed afterwards whatever the
/// outcome. Failures carry the full argument listing of `request`.
pub fn execute_call(
    session: &mut dyn Session,
    request: &CallRequest,
    planned: &PlannedCall,
) -> Result<(), GatewayError> {
    let mut lobs = Vec::new();
    let result = bind_and_execute(session, planned, &mut lobs);

    for lob in lobs {
        if let Err(e) = session.free_temp_clob(lob) {
            tracing::error!(lob = %lob, error = %e, "Failed to free temporary CLOB");
        }
    }

    result.map_err(|e| {
        tracing::warn!(procedure = %request.name(), error = %e, "Procedure call failed");
        GatewayError::Execution(format!("{}{}", e.message, request.listing()))
    })
}

fn bind_and_execute(
    session: &mut dyn Session,
    planned: &PlannedCall,
    lobs: &mut Vec<LobId>,
) -> Result<(), DbError> {
    let mut binds = Vec::with_capacity(planned.binds.len());
    for bind in &planned.binds {
        match bind {
            PlannedBind::Text(value) => binds.push(BindValue::Text(value.clone())),
            PlannedBind::Clob(value) => {
                let lob = session.create_temp_clob(value)?;
                lobs.push(lob);
                binds.push(BindValue::Clob(lob));
            }
        }
    }
    session.execute_block(&planned.statement, &binds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallBuilder;
    use crate::db::testing::{FakeDb, arg};
    use crate::procedure::ProcedureSignature;

    fn plan(request: &CallRequest) -> PlannedCall {
        let sig = ProcedureSignature::from_rows(
            "shop.save",
            &[arg("p_id", 1, "NUMBER"), arg("p_doc", 1, "CLOB")],
        );
        CallBuilder::new(["sys."]).build(request, &sig).unwrap()
    }

    fn request() -> CallRequest {
        CallRequest::new(
            "shop.save",
            [("p_doc", "body"), ("p_id", "7")].map(|(k, v)| (k.to_string(), v.to_string())),
        )
    }

    #[test]
    fn binds_clob_by_reference_and_frees_it() {
        let db = FakeDb::new();
        let mut session = db.session();
        let request = request();
        execute_call(session.as_mut(), &request, &plan(&request)).unwrap();

        let journal = db.journal();
        assert_eq!(journal.created_lobs, vec![(LobId(1), "body".to_string())]);
        assert_eq!(journal.freed_lobs, vec![LobId(1)]);
        let (_, binds) = journal.executed.last().unwrap();
        assert_eq!(
            binds,
            &vec![BindValue::Clob(LobId(1)), BindValue::Text("7".into())]
        );
    }

    #[test]
    fn failure_is_wrapped_with_listing_and_clobs_still_freed() {
        let db = FakeDb::new();
        db.script().fail_execute = Some((
            "shop.save".to_string(),
            "ORA-06550: line 1, column 7".to_string(),
        ));
        let mut session = db.session();
        let request = request();

        let err = execute_call(session.as_mut(), &request, &plan(&request)).unwrap_err();
        assert!(matches!(err, GatewayError::Execution(_)));
        let message = err.to_string();
        assert!(message.starts_with("PLSQL Adapter - PLSQL Error\nORA-06550"));
        assert!(message.contains("While trying to execute shop.save"));
        assert!(message.contains("\np_id:\n\t7"));
        assert_eq!(db.journal().freed_lobs, vec![LobId(1)]);
    }
}
