use std::collections::BTreeMap;

/// Parameter names used by flexible (`!`-prefixed) invocations.
pub const NAME_ARRAY: &str = "name_array";
pub const VALUE_ARRAY: &str = "value_array";

/// A procedure invocation decoded from one HTTP request.
///
/// Distinct keys are ordered lexicographically; values under one key keep
/// their submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    name: String,
    flexible: bool,
    params: BTreeMap<String, Vec<String>>,
}

impl CallRequest {
    /// Build from the last path segment and the decoded form pairs.
    ///
    /// A leading `!` selects flexible mode: every submitted pair is passed
    /// through two parallel arrays, `name_array` and `value_array`.
    pub fn new(path_name: &str, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut form: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in pairs {
            form.entry(key).or_default().push(value);
        }

        let Some(name) = path_name.strip_prefix('!') else {
            return Self {
                name: path_name.to_string(),
                flexible: false,
                params: form,
            };
        };

        let mut names = Vec::new();
        let mut values = Vec::new();
        for (key, submitted) in form {
            for value in submitted {
                names.push(key.clone());
                values.push(value);
            }
        }
        let params = BTreeMap::from([
            (NAME_ARRAY.to_string(), names),
            (VALUE_ARRAY.to_string(), values),
        ]);
        Self {
            name: name.to_string(),
            flexible: true,
            params,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_flexible(&self) -> bool {
        self.flexible
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn values(&self, key: &str) -> &[String] {
        self.params.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.values(key).first().map(String::as_str)
    }

    /// First value of a key matched case-insensitively.
    pub fn first_ignore_case(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.first())
            .map(String::as_str)
    }

    /// Human-readable dump of the invocation for error reports.
    pub fn listing(&self) -> String {
        let mut out = format!("\n\n\n While trying to execute {}\n with args\n", self.name);
        for (key, values) in &self.params {
            let lower = key.to_lowercase();
            if values.len() > 1 {
                out.push_str(&format!("\n{key}:"));
                for value in values {
                    out.push_str(&format!("\n\t{value}"));
                }
            } else if lower.ends_with(".x") {
                let base = &key[..key.len() - 2];
                let x = values.first().map(String::as_str).unwrap_or_default();
                let y = self
                    .first_ignore_case(&format!("{base}.y"))
                    .unwrap_or_default();
                out.push_str(&format!("\n{base}:\n\t({x}:{y})"));
            } else if lower.ends_with(".y") {
                continue;
            } else {
                let value = values.first().map(String::as_str).unwrap_or_default();
                out.push_str(&format!("\n{key}:\n\t{value}"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn keys_sorted_and_values_in_submission_order() {
        let call = CallRequest::new(
            "shop.show",
            pairs(&[("zeta", "1"), ("alpha", "a"), ("zeta", "2"), ("Mid", "m")]),
        );
        assert_eq!(call.keys().collect::<Vec<_>>(), vec!["Mid", "alpha", "zeta"]);
        assert_eq!(call.values("zeta"), ["1", "2"]);
        assert_eq!(call.first("alpha"), Some("a"));
        assert!(call.values("missing").is_empty());
        assert!(!call.is_flexible());
    }

    #[test]
    fn flexible_mode_flattens_pairs_into_two_arrays() {
        let call = CallRequest::new(
            "!shop.search",
            pairs(&[("b", "2"), ("a", "1"), ("b", "3")]),
        );
        assert!(call.is_flexible());
        assert_eq!(call.name(), "shop.search");
        assert_eq!(call.keys().collect::<Vec<_>>(), vec![NAME_ARRAY, VALUE_ARRAY]);
        assert_eq!(call.values(NAME_ARRAY), ["a", "b", "b"]);
        assert_eq!(call.values(VALUE_ARRAY), ["1", "2", "3"]);
    }

    #[test]
    fn flexible_mode_without_pairs_has_empty_arrays() {
        let call = CallRequest::new("!shop.search", Vec::new());
        assert_eq!(call.keys().count(), 2);
        assert!(call.values(NAME_ARRAY).is_empty());
    }

    #[test]
    fn listing_shows_scalars_arrays_and_points() {
        let call = CallRequest::new(
            "shop.map",
            pairs(&[("p_id", "7"), ("tag", "x"), ("tag", "y"), ("pos.x", "10"), ("pos.y", "20")]),
        );
        assert_eq!(
            call.listing(),
            "\n\n\n While trying to execute shop.map\n with args\n\
             \np_id:\n\t7\
             \npos:\n\t(10:20)\
             \ntag:\n\tx\n\ty"
        );
    }
}
