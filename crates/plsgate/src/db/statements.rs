//! Fixed statement shapes understood by the database-side web toolkit.

/// Max lines requested per page fetch round trip.
pub const MAX_PAGE_LINES: u32 = 127;

/// Clears package state left behind by the previous request on this session.
pub const RESET_PACKAGES: &str = "BEGIN dbms_session.reset_package; END;";

/// `:1` name in, `:2..:7` out (schema, part1, part2, dblink, part1_type, object_number).
pub const NAME_RESOLVE: &str =
    "BEGIN dbms_utility.name_resolve(:1, 1, :2, :3, :4, :5, :6, :7); END;";

const ARGUMENT_COLUMNS: &str =
    "SELECT argument_name, overload, data_type, type_owner, type_name, type_subname \
     FROM all_arguments";

pub const LIVENESS_PROBE: &str = "select 1 from dual";

/// `:1` max lines in, `:2` text out, `:3` line count out.
pub const FETCH_PAGE: &str = "DECLARE
  nlns NUMBER;
  buf_t VARCHAR2(32767);
  lines htp.htbuf_arr;
BEGIN
  nlns := :1;
  owa.get_page(lines, nlns);
  IF nlns < 1 THEN
    buf_t := NULL;
  ELSE
    FOR i IN 1..nlns LOOP
      buf_t := buf_t || lines(i);
    END LOOP;
  END IF;
  :2 := buf_t;
  :3 := nlns;
END;";

/// Argument catalog query. Binds are owner, [package,] procedure.
pub fn argument_query(has_package: bool) -> String {
    if has_package {
        format!(
            "{ARGUMENT_COLUMNS} WHERE owner = :1 AND package_name = :2 AND object_name = :3 \
             ORDER BY overload, sequence"
        )
    } else {
        format!(
            "{ARGUMENT_COLUMNS} WHERE owner = :1 AND package_name IS NULL AND object_name = :2 \
             ORDER BY overload, sequence"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_query_binds_package_only_when_present() {
        let packaged = argument_query(true);
        assert!(packaged.contains("package_name = :2"));
        assert!(packaged.contains("object_name = :3"));

        let standalone = argument_query(false);
        assert!(standalone.contains("package_name IS NULL"));
        assert!(standalone.contains("object_name = :2"));
        assert!(standalone.ends_with("ORDER BY overload, sequence"));
    }
}
