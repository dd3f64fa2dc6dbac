use std::collections::BTreeMap;
use std::fmt::Display;
use std::ops::Bound;

/// Location inside a parameter name or value, used to point at the offending character
/// of a malformed request parameter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub offset: usize,
    pub line: u32,
    pub column: usize,
}

impl Position {
    pub fn new(offset: usize, line: u32, column: usize) -> Self {
        Position {
            offset,
            line,
            column,
        }
    }
    pub fn unknown() -> Position {
        Position {
            offset: 0,
            line: 0,
            column: 0,
        }
    }
    pub fn is_unknown(&self) -> bool {
        self.line == 0
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::unknown()
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.line == 0 {
            write!(f, "(unknown position)")
        } else if self.line > 1 {
            write!(f, "line {}, position {}", self.line, self.column)
        } else {
            write!(f, "position {}", self.column)
        }
    }
}

/// Read-only view of request parameters.
///
/// Names are kept sorted, so all parameters of a filter group can be found
/// with a single range scan over the group key prefix.
/// A parameter may carry several values (e.g. `f$status=new&f$status=open`).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(BTreeMap<String, Vec<String>>);

impl QueryParams {
    pub fn new() -> Self {
        QueryParams(BTreeMap::new())
    }

    /// Decode an `application/x-www-form-urlencoded` query string.
    /// A leading `?` is ignored.
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut params = QueryParams::new();
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params.add(name.into_owned(), value.into_owned());
        }
        params
    }

    pub fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        let mut params = QueryParams::new();
        for (name, value) in pairs {
            params.add(name, value);
        }
        params
    }

    pub fn add<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) -> &mut Self {
        self.0.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn with<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.add(name, value);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// First value of a parameter
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .and_then(|values| values.first())
            .map(|x| x.as_str())
    }

    /// First non-empty value of a parameter
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get_all(name)
            .iter()
            .map(|x| x.as_str())
            .find(|x| !x.is_empty())
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.0.get(name).map(|x| x.as_slice()).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Parameters whose name starts with `prefix`, in name order.
    pub fn with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a [String])> + 'a {
        self.0
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn encode(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, values) in self.0.iter() {
            for value in values {
                serializer.append_pair(name, value);
            }
        }
        serializer.finish()
    }
}

impl Display for QueryParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for QueryParams {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        QueryParams::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_query_string() {
        let p = QueryParams::parse("?f$status=active&f$age:min=18&f$status=new&order=name");
        assert_eq!(p.len(), 3);
        assert_eq!(p.get_all("f$status"), &["active".to_owned(), "new".to_owned()]);
        assert_eq!(p.get("f$age:min"), Some("18"));
        assert_eq!(p.get("missing"), None);
    }

    #[test]
    fn prefix_scan_is_sorted_and_bounded() {
        let p = QueryParams::new()
            .with("g$x", "1")
            .with("f.b$y", "2")
            .with("f$z", "3")
            .with("f.a$w", "4")
            .with("fields", "*");
        let names: Vec<_> = p.with_prefix("f$").map(|(k, _)| k).collect();
        assert_eq!(names, vec!["f$z"]);
        let names: Vec<_> = p.with_prefix("f.").map(|(k, _)| k).collect();
        assert_eq!(names, vec!["f.a$w", "f.b$y"]);
    }

    #[test]
    fn empty_values_are_kept() {
        let p = QueryParams::parse("f$email&f$name=");
        assert_eq!(p.get("f$email"), Some(""));
        assert_eq!(p.get_non_empty("f$name"), None);
    }
}
