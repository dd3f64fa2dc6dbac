//! Grammar of the query parameter mini-languages.
//!
//! The parsers here only recognize syntax: property paths stay unresolved text and
//! qualifiers stay names with raw parameters. [crate::compiler] gives them meaning
//! against a schema. Every syntactic element keeps its [Position] inside the
//! parameter text, so errors can point at the offending character.
//!
//! | parameter            | grammar                                                     |
//! |----------------------|-------------------------------------------------------------|
//! | filter name          | `group ( "$" [ paths (":" qualifier)* ["!"] ] \| "@" )`     |
//! | order value          | `( "$" key [":" direction] \| path (":" qualifier)* ) ("," ...)*` |
//! | projection value     | `( "*" \| "-" path \| path ".*" \| path "/" key \| path ) ("," ...)*` |
//! | references value     | `path ("," path)*`                                          |
//! | range value          | `first "," count`                                           |
//!
//! A qualifier is an action in the dash syntax: `lc`, `substr-1-3`, `lpad-8-0`.
//! Parameters consist of ASCII letters, digits, `_`, `+` and `.`.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, digit1, multispace0};
use nom::combinator::{eof, map, opt, value};
use nom::multi::{many0, separated_list0, separated_list1};
use nom::sequence::{delimited, preceded, terminated};
use nom::{IResult, Parser};
use nom_locate::LocatedSpan;

use crate::error::Error;
use crate::params::Position;
use crate::value_type::{ObjectType, ReferenceType, ScalarKind, ValueType, WILDCARD_TARGET};

type Span<'a> = LocatedSpan<&'a str>;

impl<'a> From<Span<'a>> for Position {
    fn from(span: Span<'a>) -> Position {
        Position {
            offset: span.location_offset(),
            line: span.location_line(),
            column: span.get_utf8_column(),
        }
    }
}

/// Dotted property path as written, not yet resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathText {
    pub path: String,
    pub position: Position,
}

/// Qualifier of a filter condition or an order element, e.g. `substr-1-3`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionText {
    pub name: String,
    pub parameters: Vec<String>,
    pub position: Position,
}

impl ActionText {
    pub fn encode(&self) -> String {
        let mut text = self.name.clone();
        for p in self.parameters.iter() {
            text.push('-');
            text.push_str(p);
        }
        text
    }
}

/// Dot-hierarchical address of a filter group, e.g. `f.1.a`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupKey(pub Vec<String>);

impl GroupKey {
    pub fn root(&self) -> &str {
        self.0.first().map(|s| s.as_str()).unwrap_or("")
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of leading segments shared with another key
    pub fn common_prefix(&self, other: &GroupKey) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    pub fn prefix(&self, len: usize) -> GroupKey {
        GroupKey(self.0[..len.min(self.0.len())].to_vec())
    }

    pub fn encode(&self) -> String {
        self.0.join(".")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionText {
    pub paths: Vec<PathText>,
    pub qualifiers: Vec<ActionText>,
    pub negated: bool,
}

/// Meaning of a filter parameter name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterParameter {
    /// `<group>$`: the value selects the junction of the group
    Junction(GroupKey),
    /// `<key>@`: the value is the base path of an additional filter
    BasePath(String),
    Condition(GroupKey, ConditionText),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderText {
    Segment {
        key: String,
        descending: bool,
        position: Position,
    },
    Property {
        path: PathText,
        qualifiers: Vec<ActionText>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionText {
    IncludeAll(Position),
    Include(PathText),
    Exclude(PathText),
    Fetch(PathText),
    /// Aggregate restricted by an additional filter
    Scoped { path: PathText, filter_key: String },
}

fn identifier(text: Span) -> IResult<Span, String> {
    let (text, a) = take_while1(|c: char| c.is_ascii_alphabetic() || c == '_').parse(text)?;
    let (text, b) = take_while(|c: char| c.is_ascii_alphanumeric() || c == '_').parse(text)?;
    Ok((text, format!("{}{}", a, b)))
}

fn group_segment(text: Span) -> IResult<Span, String> {
    let (text, s) = take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_').parse(text)?;
    Ok((text, s.to_string()))
}

fn dotted_path(text: Span) -> IResult<Span, PathText> {
    let position: Position = text.into();
    let (text, first) = identifier(text)?;
    let (text, rest) = many0(preceded(char('.'), identifier)).parse(text)?;
    let mut path = first;
    for segment in rest {
        path.push('.');
        path.push_str(&segment);
    }
    Ok((text, PathText { path, position }))
}

/// Characters allowed in a qualifier parameter. Separators of the surrounding syntax
/// (`-`, `:`, `,`, `!`, `$`, whitespace) can't be used, e.g. as a fill character.
pub fn is_action_parameter_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '+' || c == '.'
}

fn action_parameter(text: Span) -> IResult<Span, String> {
    let (text, p) = take_while1(is_action_parameter_char).parse(text)?;
    Ok((text, p.to_string()))
}

fn action(text: Span) -> IResult<Span, ActionText> {
    let position: Position = text.into();
    let (text, name) = identifier(text)?;
    let (text, parameters) = many0(preceded(char('-'), action_parameter)).parse(text)?;
    Ok((
        text,
        ActionText {
            name,
            parameters,
            position,
        },
    ))
}

fn qualifiers(text: Span) -> IResult<Span, Vec<ActionText>> {
    many0(preceded(char(':'), action)).parse(text)
}

/// Root identifier followed by nested group segments: `f`, `f.1`, `vip.1.a`
fn group_key(text: Span) -> IResult<Span, GroupKey> {
    let (text, root) = identifier(text)?;
    let (text, nested) = many0(preceded(char('.'), group_segment)).parse(text)?;
    let mut segments = vec![root];
    segments.extend(nested);
    Ok((text, GroupKey(segments)))
}

fn condition(text: Span) -> IResult<Span, ConditionText> {
    let (text, paths) = separated_list1(char(','), dotted_path).parse(text)?;
    let (text, qualifiers) = qualifiers(text)?;
    let (text, negated) = opt(char('!')).parse(text)?;
    Ok((
        text,
        ConditionText {
            paths,
            qualifiers,
            negated: negated.is_some(),
        },
    ))
}

fn filter_parameter(text: Span) -> IResult<Span, FilterParameter> {
    let (text, group) = group_key(text)?;
    let (text, marker) = alt((char('$'), char('@'))).parse(text)?;
    if marker == '@' {
        if group.depth() != 1 {
            return Err(nom::Err::Failure(nom::error::Error::new(
                text,
                nom::error::ErrorKind::Verify,
            )));
        }
        return Ok((text, FilterParameter::BasePath(group.root().to_owned())));
    }
    let (text, condition) = opt(condition).parse(text)?;
    Ok((
        text,
        match condition {
            Some(c) => FilterParameter::Condition(group, c),
            None => FilterParameter::Junction(group),
        },
    ))
}

fn direction(text: Span) -> IResult<Span, bool> {
    alt((value(false, tag("asc")), value(true, tag("desc")))).parse(text)
}

fn order_element(text: Span) -> IResult<Span, OrderText> {
    let position: Position = text.into();
    if let Ok((rest, key)) = preceded(char::<Span, nom::error::Error<Span>>('$'), identifier).parse(text) {
        let (rest, descending) = opt(preceded(char(':'), terminated(direction, peek_end))).parse(rest)?;
        return Ok((
            rest,
            OrderText::Segment {
                key,
                descending: descending.unwrap_or(false),
                position,
            },
        ));
    }
    let (text, path) = dotted_path(text)?;
    let (text, qualifiers) = qualifiers(text)?;
    Ok((text, OrderText::Property { path, qualifiers }))
}

/// Succeeds without consuming at an element boundary
fn peek_end(text: Span) -> IResult<Span, ()> {
    nom::combinator::peek(alt((value((), char(',')), value((), eof)))).parse(text)
}

fn projection_element(text: Span) -> IResult<Span, ProjectionText> {
    let position: Position = text.into();
    alt((
        value(ProjectionText::IncludeAll(position), char('*')),
        map(preceded(char('-'), dotted_path), ProjectionText::Exclude),
        projection_path,
    ))
    .parse(text)
}

fn projection_path(text: Span) -> IResult<Span, ProjectionText> {
    let (text, path) = dotted_path(text)?;
    if let (rest, Some(_)) = opt(tag(".*")).parse(text)? {
        return Ok((rest, ProjectionText::Fetch(path)));
    }
    if let (rest, Some(filter_key)) = opt(preceded(char('/'), identifier)).parse(text)? {
        return Ok((rest, ProjectionText::Scoped { path, filter_key }));
    }
    Ok((text, ProjectionText::Include(path)))
}

fn number(text: Span) -> IResult<Span, u64> {
    let (rest, digits) = digit1(text)?;
    match digits.fragment().parse::<u64>() {
        Ok(n) => Ok((rest, n)),
        Err(_) => Err(nom::Err::Failure(nom::error::Error::new(
            text,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

fn range(text: Span) -> IResult<Span, (u64, u64)> {
    let (text, first) = number(text)?;
    let (text, _) = char(',').parse(text)?;
    let (text, count) = number(text)?;
    Ok((text, (first, count)))
}

fn type_name(text: Span) -> IResult<Span, String> {
    alt((map(tag(WILDCARD_TARGET), |s: Span| s.to_string()), identifier)).parse(text)
}

fn ws<'a, O, P>(inner: P) -> impl Parser<Span<'a>, Output = O, Error = nom::error::Error<Span<'a>>>
where
    P: Parser<Span<'a>, Output = O, Error = nom::error::Error<Span<'a>>>,
{
    delimited(multispace0, inner, multispace0)
}

fn value_type(text: Span) -> IResult<Span, ValueType> {
    alt((
        map(delimited(tag("list<"), ws(value_type), char('>')), ValueType::list),
        map(delimited(tag("set<"), ws(value_type), char('>')), ValueType::set),
        map(
            delimited(
                tag("map<"),
                (ws(value_type), preceded(char(','), ws(value_type))),
                char('>'),
            ),
            |(k, v)| ValueType::map(k, v),
        ),
        map(delimited(tag("ref("), ws(type_name), char(')')), |t| {
            ValueType::Reference(ReferenceType { target: t })
        }),
        map(delimited(tag("object("), ws(identifier), char(')')), |t| {
            ValueType::Object(ObjectType { type_name: t })
        }),
        map(
            delimited(
                tag("enum("),
                separated_list1(char('|'), ws(identifier)),
                char(')'),
            ),
            ValueType::Enum,
        ),
        scalar_or_dynamic,
    ))
    .parse(text)
}

fn scalar_or_dynamic(text: Span) -> IResult<Span, ValueType> {
    let (rest, name) = identifier(text)?;
    if name == "dynamic" {
        return Ok((rest, ValueType::Dynamic));
    }
    match ScalarKind::from_name(&name) {
        Some(kind) => Ok((rest, ValueType::Scalar(kind))),
        None => Err(nom::Err::Error(nom::error::Error::new(
            text,
            nom::error::ErrorKind::Tag,
        ))),
    }
}

/// Run a parser over the whole text, mapping failures to positioned parse errors
fn parse_all<'a, O, P>(text: &'a str, what: &str, parser: P) -> Result<O, Error>
where
    P: Parser<Span<'a>, Output = O, Error = nom::error::Error<Span<'a>>>,
{
    let (remainder, result) = terminated(parser, eof)
        .parse(Span::new(text))
        .map_err(|e| match e {
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                let position: Position = e.input.into();
                Error::parse_error(text, &format!("invalid {}", what), &position)
            }
            nom::Err::Incomplete(_) => {
                Error::parse_error(text, &format!("incomplete {}", what), &Position::unknown())
            }
        })?;
    debug_assert!(remainder.fragment().is_empty());
    Ok(result)
}

/// Root key of a parameter name addressed to a filter, i.e. a name starting with a
/// group key followed by `$` or `@`. Any other name gives `None`.
pub fn filter_parameter_root(name: &str) -> Option<String> {
    let (_, group) = terminated(group_key, alt((char('$'), char('@'))))
        .parse(Span::new(name))
        .ok()?;
    Some(group.root().to_owned())
}

pub fn parse_filter_parameter(name: &str) -> Result<FilterParameter, Error> {
    parse_all(name, "filter parameter", filter_parameter)
}

pub fn parse_order(text: &str) -> Result<Vec<OrderText>, Error> {
    parse_all(text, "order", separated_list0(char(','), order_element))
}

pub fn parse_projection(text: &str) -> Result<Vec<ProjectionText>, Error> {
    parse_all(text, "projection", separated_list0(char(','), projection_element))
}

pub fn parse_references(text: &str) -> Result<Vec<PathText>, Error> {
    parse_all(text, "reference list", separated_list0(char(','), dotted_path))
}

pub fn parse_path(text: &str) -> Result<PathText, Error> {
    parse_all(text, "property path", dotted_path)
}

pub fn parse_range(text: &str) -> Result<(u64, u64), Error> {
    parse_all(text, "range", range)
}

/// Parse a type expression of a property declaration, e.g. `map<string,list<ref(User)>>`
pub fn parse_value_type(text: &str) -> Result<ValueType, Error> {
    parse_all(text.trim(), "type expression", value_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(qualifiers: &[ActionText]) -> Vec<String> {
        qualifiers.iter().map(|q| q.encode()).collect()
    }

    #[test]
    fn filter_parameter_roots() {
        assert_eq!(filter_parameter_root("f$name"), Some("f".to_owned()));
        assert_eq!(filter_parameter_root("f.1.a$=or"), Some("f".to_owned()));
        assert_eq!(filter_parameter_root("recent@"), Some("recent".to_owned()));
        assert_eq!(filter_parameter_root("a@b"), Some("a".to_owned()));
        assert_eq!(filter_parameter_root("1x$name"), None);
        assert_eq!(filter_parameter_root("$name"), None);
        assert_eq!(filter_parameter_root("f-x$name"), None);
        assert_eq!(filter_parameter_root("page"), None);
    }

    #[test]
    fn filter_condition_name() -> Result<(), Error> {
        match parse_filter_parameter("f.1$name,email:lc:prefix!")? {
            FilterParameter::Condition(group, condition) => {
                assert_eq!(group.encode(), "f.1");
                assert_eq!(
                    condition.paths.iter().map(|p| p.path.as_str()).collect::<Vec<_>>(),
                    vec!["name", "email"]
                );
                assert_eq!(names(&condition.qualifiers), vec!["lc", "prefix"]);
                assert!(condition.negated);
                assert_eq!(condition.paths[1].position.column, 10);
            }
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn junction_and_base_path() -> Result<(), Error> {
        assert_eq!(
            parse_filter_parameter("f.a$")?,
            FilterParameter::Junction(GroupKey(vec!["f".to_owned(), "a".to_owned()]))
        );
        assert_eq!(
            parse_filter_parameter("seg1@")?,
            FilterParameter::BasePath("seg1".to_owned())
        );
        assert!(parse_filter_parameter("f.1@").is_err());
        Ok(())
    }

    #[test]
    fn malformed_filter_name_has_position() {
        let e = parse_filter_parameter("f$name:lc:eq:x:").unwrap_err();
        assert_eq!(e.error_type, crate::error::ErrorType::ParseError);
        assert!(!e.position.is_unknown());
        assert!(parse_filter_parameter("f$name..x").is_err());
        assert!(parse_filter_parameter("status").is_err());
    }

    #[test]
    fn transform_parameters() -> Result<(), Error> {
        match parse_filter_parameter("f$code:substr-1-3:eq")? {
            FilterParameter::Condition(_, c) => {
                assert_eq!(c.qualifiers[0].name, "substr");
                assert_eq!(c.qualifiers[0].parameters, vec!["1", "3"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn order_elements() -> Result<(), Error> {
        let elements = parse_order("name:lc:asc,$seg1,age:desc,$seg2:desc")?;
        assert_eq!(elements.len(), 4);
        match &elements[0] {
            OrderText::Property { path, qualifiers } => {
                assert_eq!(path.path, "name");
                assert_eq!(names(qualifiers), vec!["lc", "asc"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&elements[1], OrderText::Segment { key, descending: false, .. } if key == "seg1"));
        assert!(matches!(&elements[3], OrderText::Segment { key, descending: true, .. } if key == "seg2"));
        assert!(parse_order("")?.is_empty());
        assert!(parse_order("name,").is_err());
        Ok(())
    }

    #[test]
    fn projection_elements() -> Result<(), Error> {
        let elements = parse_projection("*,-password,roles.*,order_count/recent,address.city")?;
        assert!(matches!(elements[0], ProjectionText::IncludeAll(_)));
        assert!(matches!(&elements[1], ProjectionText::Exclude(p) if p.path == "password"));
        assert!(matches!(&elements[2], ProjectionText::Fetch(p) if p.path == "roles"));
        assert!(
            matches!(&elements[3], ProjectionText::Scoped { path, filter_key } if path.path == "order_count" && filter_key == "recent")
        );
        assert!(matches!(&elements[4], ProjectionText::Include(p) if p.path == "address.city"));
        Ok(())
    }

    #[test]
    fn range_pair() -> Result<(), Error> {
        assert_eq!(parse_range("20,10")?, (20, 10));
        assert!(parse_range("20").is_err());
        assert!(parse_range("-1,10").is_err());
        Ok(())
    }

    #[test]
    fn type_expressions() -> Result<(), Error> {
        assert_eq!(
            parse_value_type("map<string, list<ref(User)>>")?,
            ValueType::map(
                ValueType::scalar(ScalarKind::String),
                ValueType::list(ValueType::reference("User"))
            )
        );
        assert_eq!(
            parse_value_type("enum(active|blocked)")?,
            ValueType::Enum(vec!["active".to_owned(), "blocked".to_owned()])
        );
        assert_eq!(parse_value_type("ref(*)")?, ValueType::reference("*"));
        assert_eq!(parse_value_type("set<object(Address)>")?.degree(), 1);
        assert_eq!(parse_value_type("dynamic")?, ValueType::Dynamic);
        assert!(parse_value_type("list<strin>").is_err());
        assert!(parse_value_type("list<long").is_err());
        Ok(())
    }
}
