use std::collections::{BTreeMap, HashMap};

use crate::db::ArgumentRow;

/// Marks an argument whose catalog entry spans two rows.
const TABLE_TYPE: &str = "PL/SQL TABLE";

/// Parameter types of every overload of one procedure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcedureSignature {
    name: String,
    /// Overload number to lowercased argument name to declared type.
    overloads: BTreeMap<u32, HashMap<String, String>>,
}

impl ProcedureSignature {
    /// Group catalog rows, ordered by overload, into one map per overload.
    pub fn from_rows(name: impl Into<String>, rows: &[ArgumentRow]) -> Self {
        let mut overloads: BTreeMap<u32, HashMap<String, String>> = BTreeMap::new();
        let mut rows = rows.iter();
        while let Some(row) = rows.next() {
            let overload = row.overload.unwrap_or(1);
            let params = overloads.entry(overload).or_default();

            // Zero-argument overloads still get an (empty) entry.
            let Some(arg) = &row.argument_name else {
                continue;
            };

            let data_type = row.data_type.as_deref().unwrap_or_default();
            let declared = if data_type == TABLE_TYPE {
                // The element type row that follows is not a parameter.
                rows.next();
                table_type_path(row)
            } else {
                data_type.to_string()
            };
            params.insert(arg.to_lowercase(), declared);
        }
        Self {
            name: name.into(),
            overloads,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type of `arg` in the lowest-numbered overload that has it.
    ///
    /// Overloads are scanned upward from 1 and the scan stops at the first
    /// missing number. This is presence-based lookup, not signature matching.
    pub fn argument_type(&self, arg: &str) -> Option<&str> {
        let arg = arg.to_lowercase();
        (1u32..)
            .map_while(|n| self.overloads.get(&n))
            .find_map(|params| params.get(&arg))
            .map(String::as_str)
    }

    pub fn overload_count(&self) -> usize {
        self.overloads.len()
    }

    pub fn overload(&self, n: u32) -> Option<&HashMap<String, String>> {
        self.overloads.get(&n)
    }
}

fn table_type_path(row: &ArgumentRow) -> String {
    [&row.type_owner, &row.type_name, &row.type_subname]
        .into_iter()
        .filter_map(|part| part.as_deref())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{arg, table_arg};

    #[test]
    fn groups_rows_by_overload() {
        let rows = vec![
            arg("p_id", 1, "NUMBER"),
            arg("p_name", 1, "VARCHAR2"),
            arg("p_id", 2, "VARCHAR2"),
        ];
        let sig = ProcedureSignature::from_rows("shop.show", &rows);
        assert_eq!(sig.overload_count(), 2);
        assert_eq!(sig.overload(1).unwrap().len(), 2);
        assert_eq!(sig.overload(2).unwrap().len(), 1);
        assert_eq!(sig.name(), "shop.show");
    }

    #[test]
    fn first_overload_wins_on_conflicting_types() {
        let rows = vec![arg("p_id", 1, "NUMBER"), arg("p_id", 2, "CLOB")];
        let sig = ProcedureSignature::from_rows("p", &rows);
        assert_eq!(sig.argument_type("p_id"), Some("NUMBER"));
        assert_eq!(sig.argument_type("P_ID"), Some("NUMBER"));
    }

    #[test]
    fn later_overload_supplies_missing_names() {
        let rows = vec![arg("a", 1, "NUMBER"), arg("b", 2, "DATE")];
        let sig = ProcedureSignature::from_rows("p", &rows);
        assert_eq!(sig.argument_type("b"), Some("DATE"));
        assert_eq!(sig.argument_type("c"), None);
    }

    #[test]
    fn scan_stops_at_gap_in_overload_numbers() {
        let rows = vec![arg("a", 1, "NUMBER"), arg("b", 3, "DATE")];
        let sig = ProcedureSignature::from_rows("p", &rows);
        assert_eq!(sig.argument_type("b"), None);
    }

    #[test]
    fn table_argument_consumes_its_continuation_row() {
        let mut rows = vec![arg("p_mode", 1, "VARCHAR2")];
        rows.extend(table_arg("p_ids", 1, "WEB", "SHOP", "ID_LIST"));
        rows.push(arg("p_flag", 1, "CHAR"));

        let sig = ProcedureSignature::from_rows("shop.bulk", &rows);
        let params = sig.overload(1).unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(sig.argument_type("p_ids"), Some("WEB.SHOP.ID_LIST"));
        assert_eq!(sig.argument_type("p_flag"), Some("CHAR"));
    }

    #[test]
    fn null_argument_name_marks_zero_argument_overload() {
        let rows = vec![
            ArgumentRow {
                overload: None,
                data_type: None,
                ..Default::default()
            },
            arg("x", 2, "NUMBER"),
        ];
        let sig = ProcedureSignature::from_rows("p", &rows);
        assert_eq!(sig.overload_count(), 2);
        assert!(sig.overload(1).unwrap().is_empty());
        assert_eq!(sig.argument_type("x"), Some("NUMBER"));
    }
}
