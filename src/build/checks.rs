//! data checks: a small expression language run against built leaves
//!
//! a check is one or more lines, each a single expression. blank lines and `#`
//! comments are skipped. an expression is a literal (`true`, `false`, `null`, a
//! number, a quoted string or a `[list]`), `not <expr>`, or a helper call such as
//! `min_rows(10)` or `check_column_enum('kind', ['a', 'b'])`.
//!
//! a check fails when any line evaluates to `false`; `null` lines pass.

use std::collections::{BTreeMap, HashSet};

use chumsky::extra;
use chumsky::prelude::*;
use regex::Regex;

use crate::error::{Error, Result};
use crate::types::{ColumnData, Table};

/// named check snippets, from a checks file or inline in the build file
pub type CheckDefs = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("syntax error at column {column}: {message}")]
    Syntax { column: usize, message: String },

    #[error("unknown helper: {0}")]
    UnknownHelper(String),

    #[error("{helper}: {message}")]
    BadArguments { helper: String, message: String },

    #[error("no such column: {0}")]
    MissingColumn(String),

    #[error("{0} needs tabular data")]
    NeedsTable(String),

    #[error("{0} needs text data")]
    NeedsText(String),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

type CheckResult<T> = std::result::Result<T, CheckError>;

/// what a check runs against
#[derive(Debug, Clone, Copy)]
pub enum CheckData<'a> {
    Table(&'a Table),
    Text(&'a str),
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    fn truth(&self) -> Option<bool> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(*b),
            Value::Number(n) => Some(*n != 0.0),
            Value::Str(s) => Some(!s.is_empty()),
            Value::List(items) => Some(!items.is_empty()),
        }
    }

    /// the text a cell must equal to match this value
    fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Value::Number(n) => n.to_string(),
            Value::Str(s) => s.clone(),
            Value::List(items) => items.iter().map(Value::render).collect::<Vec<_>>().join(","),
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Not(Box<Expr>),
    Call(String, Vec<Expr>),
}

type Extra<'src> = extra::Err<Rich<'src, char>>;

fn ident<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    any()
        .filter(|c: &char| c.is_ascii_alphabetic() || *c == '_')
        .then(
            any()
                .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_')
                .repeated(),
        )
        .to_slice()
        .map(|s: &str| s.to_string())
        .labelled("helper name")
}

/// a quoted string; a backslash takes the next character literally
fn quoted<'src>(quote: char) -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    let escaped = just('\\').ignore_then(any());
    let plain = any().filter(move |c: &char| *c != quote && *c != '\\');
    just(quote)
        .ignore_then(plain.or(escaped).repeated().collect::<String>())
        .then_ignore(just(quote))
}

fn string_literal<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    quoted('\'').or(quoted('"')).labelled("string")
}

fn number<'src>() -> impl Parser<'src, &'src str, f64, Extra<'src>> + Clone {
    let digits = any()
        .filter(|c: &char| c.is_ascii_digit() || *c == '.' || *c == '_')
        .repeated()
        .at_least(1);
    let exponent = one_of("eE").then(one_of("+-").or_not()).then(text::digits(10));
    just('-')
        .or_not()
        .then(digits)
        .then(exponent.or_not())
        .to_slice()
        .try_map(|s: &str, span| {
            s.replace('_', "")
                .parse::<f64>()
                .map_err(|_| Rich::custom(span, format!("bad number {:?}", s)))
        })
        .labelled("number")
}

fn expr<'src>() -> impl Parser<'src, &'src str, Expr, Extra<'src>> + Clone {
    recursive(|expr| {
        let items = expr
            .clone()
            .separated_by(just(',').padded())
            .allow_trailing()
            .collect::<Vec<_>>();

        let list = items
            .clone()
            .delimited_by(just('[').padded(), just(']'))
            .map(Expr::List)
            .labelled("list");

        let not = text::keyword::<&str, _, Extra<'src>>("not")
            .padded()
            .ignore_then(expr)
            .map(|inner| Expr::Not(Box::new(inner)));

        // a bare word is a literal, anything else must be called
        let word = ident()
            .then(items.delimited_by(just('(').padded(), just(')')).or_not())
            .try_map(|(name, args), span| match args {
                Some(args) => Ok(Expr::Call(name, args)),
                None => match name.as_str() {
                    "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                    "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                    "null" | "None" => Ok(Expr::Literal(Value::Null)),
                    _ => Err(Rich::custom(span, format!("expected ( after {}", name))),
                },
            });

        not.or(list)
            .or(string_literal().map(|s| Expr::Literal(Value::Str(s))))
            .or(number().map(|n| Expr::Literal(Value::Number(n))))
            .or(word)
            .padded()
    })
}

fn parse_line(line: &str) -> CheckResult<Expr> {
    expr()
        .then_ignore(end())
        .parse(line)
        .into_result()
        .map_err(|errs| match errs.into_iter().next() {
            Some(e) => {
                let start = e.span().start;
                CheckError::Syntax {
                    column: line.get(..start).map_or(start, |s| s.chars().count()) + 1,
                    message: e.reason().to_string(),
                }
            }
            None => CheckError::Syntax {
                column: 1,
                message: "unparseable expression".to_string(),
            },
        })
}

struct Args<'a> {
    helper: &'a str,
    values: Vec<Value>,
}

impl<'a> Args<'a> {
    fn bad<T>(&self, message: impl Into<String>) -> CheckResult<T> {
        Err(CheckError::BadArguments {
            helper: self.helper.to_string(),
            message: message.into(),
        })
    }

    fn arity(&self, min: usize, max: usize) -> CheckResult<()> {
        let n = self.values.len();
        if n < min || n > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            };
            return self.bad(format!("expected {} arguments, got {}", expected, n));
        }
        Ok(())
    }

    fn string(&self, i: usize) -> CheckResult<&str> {
        match self.values.get(i) {
            Some(Value::Str(s)) => Ok(s),
            _ => self.bad(format!("argument {} must be a string", i + 1)),
        }
    }

    fn number(&self, i: usize) -> CheckResult<f64> {
        match self.values.get(i) {
            Some(Value::Number(n)) => Ok(*n),
            _ => self.bad(format!("argument {} must be a number", i + 1)),
        }
    }

    fn bound(&self, i: usize) -> CheckResult<Option<f64>> {
        match self.values.get(i) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(Some(*n)),
            _ => self.bad(format!("argument {} must be a number or null", i + 1)),
        }
    }

    fn list(&self, i: usize) -> CheckResult<&[Value]> {
        match self.values.get(i) {
            Some(Value::List(items)) => Ok(items),
            _ => self.bad(format!("argument {} must be a list", i + 1)),
        }
    }
}

fn table<'a>(data: &CheckData<'a>, helper: &str) -> CheckResult<&'a Table> {
    match data {
        CheckData::Table(table) => Ok(*table),
        CheckData::Text(_) => Err(CheckError::NeedsTable(helper.to_string())),
    }
}

fn text<'a>(data: &CheckData<'a>, helper: &str) -> CheckResult<&'a str> {
    match data {
        CheckData::Text(text) => Ok(*text),
        CheckData::Table(_) => Err(CheckError::NeedsText(helper.to_string())),
    }
}

fn column<'a>(data: &CheckData<'a>, args: &Args, i: usize) -> CheckResult<&'a ColumnData> {
    let name = args.string(i)?;
    table(data, args.helper)?
        .column(name)
        .map(|c| &c.data)
        .ok_or_else(|| CheckError::MissingColumn(name.to_string()))
}

/// every non-null cell, rendered as text
fn cells(data: &ColumnData) -> impl Iterator<Item = String> + '_ {
    (0..data.len()).filter_map(|row| data.display(row))
}

fn row_count(data: &CheckData) -> usize {
    match data {
        CheckData::Table(table) => table.num_rows(),
        CheckData::Text(text) => text.lines().count(),
    }
}

fn call(name: &str, values: Vec<Value>, data: &CheckData) -> CheckResult<Value> {
    let args = Args {
        helper: name,
        values,
    };
    let passed = match name {
        "has_column" => {
            if args.values.is_empty() {
                return args.bad("expected at least one column name");
            }
            let table = table(data, name)?;
            (0..args.values.len())
                .map(|i| args.string(i).map(|c| table.column(c).is_some()))
                .collect::<CheckResult<Vec<bool>>>()?
                .into_iter()
                .all(|present| present)
        }
        "min_rows" => {
            args.arity(1, 1)?;
            row_count(data) as f64 >= args.number(0)?
        }
        "max_rows" => {
            args.arity(1, 1)?;
            row_count(data) as f64 <= args.number(0)?
        }
        "not_null" => {
            args.arity(1, 1)?;
            column(data, &args, 0)?.null_count() == 0
        }
        "unique" => {
            args.arity(1, 1)?;
            let mut seen = HashSet::new();
            cells(column(data, &args, 0)?).all(|cell| seen.insert(cell))
        }
        "check_column_enum" => {
            args.arity(2, 2)?;
            let allowed: HashSet<String> = args.list(1)?.iter().map(Value::render).collect();
            cells(column(data, &args, 0)?).all(|cell| allowed.contains(&cell))
        }
        "check_column_regexp" => {
            args.arity(2, 2)?;
            let re = Regex::new(&format!("^(?:{})", args.string(1)?))?;
            cells(column(data, &args, 0)?).all(|cell| re.is_match(&cell))
        }
        "check_column_substr" => {
            args.arity(2, 2)?;
            let needle = args.string(1)?;
            cells(column(data, &args, 0)?).all(|cell| cell.contains(needle))
        }
        "check_column_valrange" => {
            args.arity(1, 3)?;
            let col = column(data, &args, 0)?;
            if !col.is_numeric() {
                return args.bad(format!("column {} is {}, not numeric", args.string(0)?, col.type_name()));
            }
            let min = args.bound(1)?;
            let max = args.bound(2)?;
            (0..col.len()).filter_map(|row| col.number(row)).all(|v| {
                min.map_or(true, |min| v >= min) && max.map_or(true, |max| v <= max)
            })
        }
        "contains" => {
            args.arity(1, 1)?;
            text(data, name)?.contains(args.string(0)?)
        }
        "matches" => {
            args.arity(1, 1)?;
            Regex::new(args.string(0)?)?.is_match(text(data, name)?)
        }
        other => return Err(CheckError::UnknownHelper(other.to_string())),
    };
    Ok(Value::Bool(passed))
}

fn eval(expr: &Expr, data: &CheckData) -> CheckResult<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::List(items) => Ok(Value::List(
            items.iter().map(|e| eval(e, data)).collect::<CheckResult<_>>()?,
        )),
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, data)?.truth().unwrap_or(false))),
        Expr::Call(name, args) => {
            let values = args
                .iter()
                .map(|e| eval(e, data))
                .collect::<CheckResult<Vec<_>>>()?;
            call(name, values, data)
        }
    }
}

/// run a check snippet
///
/// `Some(false)` means the check failed; `None` means every line evaluated to null.
pub fn evaluate(code: &str, data: &CheckData) -> CheckResult<Option<bool>> {
    let mut outcome = None;
    for line in code.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match eval(&parse_line(line)?, data)?.truth() {
            Some(false) => return Ok(Some(false)),
            Some(true) => outcome = Some(true),
            None => {}
        }
    }
    Ok(outcome)
}

/// run the named checks of a leaf, failing the build on the first failure
///
/// `names` is split on commas and whitespace.
pub fn run_checks(names: &str, defs: &CheckDefs, data: CheckData, source: &str, target: &str) -> Result<()> {
    for name in names.split(|c: char| c == ',' || c.is_whitespace()).filter(|s| !s.is_empty()) {
        let code = defs.get(name).ok_or_else(|| {
            Error::Build(format!("Unknown check '{}' for {} @ {}", name, source, target))
        })?;
        match evaluate(code, &data) {
            Ok(Some(false)) => {
                return Err(Error::Build(format!(
                    "Data check failed: {} on {} @ {}",
                    name, source, target
                )))
            }
            Ok(_) => {}
            Err(e) => {
                return Err(Error::Build(format!(
                    "Data check {} raised an error on {} @ {}: {}",
                    name, source, target, e
                )))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Column;

    fn sample() -> Table {
        Table::new(vec![
            Column {
                name: "id".into(),
                data: ColumnData::Int(vec![Some(1), Some(2), Some(3)]),
            },
            Column {
                name: "kind".into(),
                data: ColumnData::Str(vec![Some("a".into()), Some("b".into()), None]),
            },
            Column {
                name: "score".into(),
                data: ColumnData::Float(vec![Some(0.5), Some(1.5), Some(9.0)]),
            },
        ])
        .unwrap()
    }

    fn check(code: &str) -> Option<bool> {
        let table = sample();
        evaluate(code, &CheckData::Table(&table)).unwrap()
    }

    #[test]
    fn test_literals() {
        assert_eq!(check("true"), Some(true));
        assert_eq!(check("false"), Some(false));
        assert_eq!(check("null"), None);
        assert_eq!(check("not false"), Some(true));
        assert_eq!(check("# just a comment\n\n"), None);
    }

    #[test]
    fn test_table_helpers() {
        assert_eq!(check("has_column('id', 'kind')"), Some(true));
        assert_eq!(check("has_column('missing')"), Some(false));
        assert_eq!(check("min_rows(3)"), Some(true));
        assert_eq!(check("max_rows(2)"), Some(false));
        assert_eq!(check("not_null('id')"), Some(true));
        assert_eq!(check("not_null('kind')"), Some(false));
        assert_eq!(check("unique('id')"), Some(true));
        assert_eq!(check("check_column_enum('kind', ['a', 'b'])"), Some(true));
        assert_eq!(check("check_column_enum('id', [1, 2])"), Some(false));
        assert_eq!(check("check_column_regexp('kind', '[ab]')"), Some(true));
        assert_eq!(check("check_column_substr('kind', 'a')"), Some(false));
        assert_eq!(check("check_column_valrange('score', 0, 10)"), Some(true));
        assert_eq!(check("check_column_valrange('score', null, 5)"), Some(false));
    }

    #[test]
    fn test_regexp_is_anchored_at_start() {
        assert_eq!(check("check_column_regexp('kind', 'b')"), Some(false));
    }

    #[test]
    fn test_multiline_fails_on_any_false() {
        assert_eq!(check("min_rows(1)\nmax_rows(100)"), Some(true));
        assert_eq!(check("min_rows(1)\nmax_rows(1)\nnull"), Some(false));
    }

    #[test]
    fn test_text_helpers() {
        let data = CheckData::Text("hello world\nsecond line\n");
        assert_eq!(evaluate("contains('world')", &data).unwrap(), Some(true));
        assert_eq!(evaluate("matches('^hello')", &data).unwrap(), Some(true));
        assert_eq!(evaluate("min_rows(3)", &data).unwrap(), Some(false));
        assert!(matches!(
            evaluate("has_column('x')", &data),
            Err(CheckError::NeedsTable(_))
        ));
    }

    #[test]
    fn test_errors() {
        let table = sample();
        let data = CheckData::Table(&table);
        assert!(matches!(evaluate("bogus(1)", &data), Err(CheckError::UnknownHelper(_))));
        assert!(matches!(evaluate("min_rows(", &data), Err(CheckError::Syntax { .. })));
        assert!(matches!(evaluate("min_rows(1) 2", &data), Err(CheckError::Syntax { .. })));
        assert!(matches!(
            evaluate("not_null('nope')", &data),
            Err(CheckError::MissingColumn(_))
        ));
        assert!(matches!(
            evaluate("check_column_valrange('kind', 0, 1)", &data),
            Err(CheckError::BadArguments { .. })
        ));
    }

    #[test]
    fn test_quoting_and_lists() {
        assert_eq!(check("check_column_enum('kind', [\"a\", 'b', ])"), Some(true));
        assert_eq!(check("  not   check_column_valrange( 'score' , -1.5e1 , 1_000 )  "), Some(false));
        let data = CheckData::Text("it's here");
        assert_eq!(evaluate("contains('it\\'s')", &data).unwrap(), Some(true));
    }

    #[test]
    fn test_syntax_error_column() {
        let table = sample();
        let data = CheckData::Table(&table);
        match evaluate("min_rows(1) ]", &data) {
            Err(CheckError::Syntax { column, .. }) => assert_eq!(column, 13),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(evaluate("min_rows", &data), Err(CheckError::Syntax { .. })));
        assert!(matches!(evaluate("'open", &data), Err(CheckError::Syntax { .. })));
    }

    #[test]
    fn test_run_checks_messages() {
        let table = sample();
        let mut defs = CheckDefs::new();
        defs.insert("enough".into(), "min_rows(1)".into());
        defs.insert("too_many".into(), "min_rows(100)".into());

        run_checks("enough", &defs, CheckData::Table(&table), "data/t.csv", "table").unwrap();

        let err = run_checks("enough, too_many", &defs, CheckData::Table(&table), "data/t.csv", "table")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "build error: Data check failed: too_many on data/t.csv @ table"
        );

        let err = run_checks("missing", &defs, CheckData::Table(&table), "data/t.csv", "table")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown check 'missing'"));
    }
}
