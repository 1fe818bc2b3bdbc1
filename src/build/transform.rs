use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_yaml::Value;
use tracing::info;

use crate::error::{Error, IoResultExt, Result};
use crate::types::{Column, ColumnData, Table};

/// transform arguments, merged from ancestors with the child winning
pub type Kwargs = BTreeMap<String, Value>;

/// copy the source bytes verbatim
pub const ID_TRANSFORM: &str = "id";

/// parses a source file into a table
pub trait TableParser: Send + Sync {
    fn parse(&self, path: &Path, kwargs: &Kwargs) -> Result<Table>;
}

/// named table parsers available to a build
pub struct ParserRegistry {
    parsers: BTreeMap<String, Box<dyn TableParser>>,
}

impl Default for ParserRegistry {
    /// `csv`, `tsv` and `ssv`
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("csv", DelimitedParser::new(b','));
        registry.register("tsv", DelimitedParser::new(b'\t'));
        registry.register("ssv", DelimitedParser::new(b';'));
        registry
    }
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: BTreeMap::new(),
        }
    }

    /// add or replace a parser; names are case-insensitive
    pub fn register(&mut self, name: &str, parser: impl TableParser + 'static) {
        self.parsers.insert(name.to_ascii_lowercase(), Box::new(parser));
    }

    pub fn get(&self, name: &str) -> Option<&dyn TableParser> {
        self.parsers.get(name).map(|p| p.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parsers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parsers.keys().map(String::as_str)
    }

    /// pick the transform for a leaf
    ///
    /// an explicit name must be `id` or a registered parser. without one, the file
    /// extension is used when a parser is registered for it, `id` otherwise.
    pub fn resolve(&self, explicit: Option<&str>, file: &Path, node: &str, target: &str) -> Result<String> {
        if let Some(name) = explicit {
            let name = name.to_ascii_lowercase();
            if name == ID_TRANSFORM || self.contains(&name) {
                return Ok(name);
            }
            return Err(Error::Build(format!(
                "Unknown transform '{}' for {} @ {}",
                name, node, target
            )));
        }

        let ext = file
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let name = if self.contains(&ext) {
            ext
        } else {
            ID_TRANSFORM.to_string()
        };
        info!(node, transform = %name, "inferring transform from extension");
        Ok(name)
    }
}

/// delimited text: csv and friends
pub struct DelimitedParser {
    delimiter: u8,
}

impl DelimitedParser {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

#[derive(Debug)]
struct DelimitedOptions {
    sep: u8,
    header: bool,
    skiprows: usize,
    names: Option<Vec<String>>,
    quote: u8,
    comment: Option<u8>,
}

fn single_byte(key: &str, value: &Value) -> Result<u8> {
    let s = value
        .as_str()
        .ok_or_else(|| Error::Build(format!("{} must be a string", key)))?;
    let s = if s == "\\t" { "\t" } else { s };
    match s.as_bytes() {
        [b] => Ok(*b),
        _ => Err(Error::Build(format!("{} must be a single character, got {:?}", key, s))),
    }
}

impl DelimitedOptions {
    fn from_kwargs(kwargs: &Kwargs, default_sep: u8) -> Result<Self> {
        let mut opts = Self {
            sep: default_sep,
            header: true,
            skiprows: 0,
            names: None,
            quote: b'"',
            comment: None,
        };
        for (key, value) in kwargs {
            match key.as_str() {
                "sep" | "delimiter" => opts.sep = single_byte(key, value)?,
                "quotechar" => opts.quote = single_byte(key, value)?,
                "comment" => opts.comment = Some(single_byte(key, value)?),
                "header" => {
                    opts.header = match value {
                        Value::Null => false,
                        Value::Bool(b) => *b,
                        Value::Number(n) if n.as_u64() == Some(0) => true,
                        _ => {
                            return Err(Error::Build(
                                "header must be true, false, null or 0".to_string(),
                            ))
                        }
                    }
                }
                "skiprows" => {
                    opts.skiprows = value
                        .as_u64()
                        .ok_or_else(|| Error::Build("skiprows must be a non-negative integer".to_string()))?
                        as usize
                }
                "names" => {
                    let names = value
                        .as_sequence()
                        .ok_or_else(|| Error::Build("names must be a list".to_string()))?
                        .iter()
                        .map(|v| match v {
                            Value::String(s) => Ok(s.clone()),
                            Value::Number(n) => Ok(n.to_string()),
                            _ => Err(Error::Build("names must be strings".to_string())),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    opts.names = Some(names);
                }
                other => {
                    return Err(Error::Build(format!(
                        "unsupported argument {:?} for delimited text",
                        other
                    )))
                }
            }
        }
        Ok(opts)
    }
}

impl TableParser for DelimitedParser {
    fn parse(&self, path: &Path, kwargs: &Kwargs) -> Result<Table> {
        let opts = DelimitedOptions::from_kwargs(kwargs, self.delimiter)?;
        let text = fs::read_to_string(path).with_path(path)?;
        let body: String = text
            .split_inclusive('\n')
            .skip(opts.skiprows)
            .collect();

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(opts.sep)
            .quote(opts.quote)
            .comment(opts.comment)
            .has_headers(false)
            .from_reader(body.as_bytes());

        let mut records = reader.records();
        let header: Option<Vec<String>> = if opts.header {
            match records.next() {
                Some(record) => Some(record?.iter().map(|s| s.trim().to_string()).collect()),
                None => None,
            }
        } else {
            None
        };

        let mut cells: Vec<Vec<Option<String>>> = Vec::new();
        for record in records {
            let record = record?;
            if cells.is_empty() {
                cells = vec![Vec::new(); record.len()];
            }
            for (i, cell) in record.iter().enumerate() {
                let value = if cell.is_empty() {
                    None
                } else {
                    Some(cell.to_string())
                };
                if let Some(column) = cells.get_mut(i) {
                    column.push(value);
                }
            }
        }

        let width = opts
            .names
            .as_ref()
            .map(Vec::len)
            .or_else(|| header.as_ref().map(Vec::len))
            .unwrap_or(cells.len());
        if !cells.is_empty() && cells.len() != width {
            return Err(Error::Build(format!(
                "{}: {} columns named but rows have {}",
                path.display(),
                width,
                cells.len()
            )));
        }
        cells.resize(width, Vec::new());

        let names: Vec<String> = match (opts.names, header) {
            (Some(names), _) => names,
            (None, Some(header)) => header,
            (None, None) => (0..width).map(|i| i.to_string()).collect(),
        };

        let columns = names
            .into_iter()
            .zip(cells)
            .map(|(name, column)| Column {
                name,
                data: ColumnData::infer(column),
            })
            .collect();
        Table::new(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn kwargs(yaml: &str) -> Kwargs {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_csv_with_header() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "t.csv", "id,name,score\n1,ann,2.5\n2,,3\n");
        let table = DelimitedParser::new(b',').parse(&path, &Kwargs::new()).unwrap();

        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.num_columns(), 3);
        assert_eq!(
            table.column("id").unwrap().data,
            ColumnData::Int(vec![Some(1), Some(2)])
        );
        assert_eq!(
            table.column("name").unwrap().data,
            ColumnData::Str(vec![Some("ann".into()), None])
        );
        assert!(matches!(table.column("score").unwrap().data, ColumnData::Float(_)));
    }

    #[test]
    fn test_parse_kwargs() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "t.txt", "junk line\n1|x\n2|y\n");
        let args = kwargs("{sep: '|', skiprows: 1, header: null, names: [n, label]}");
        let table = DelimitedParser::new(b',').parse(&path, &args).unwrap();

        assert_eq!(table.num_rows(), 2);
        assert!(table.column("n").is_some());
        assert!(table.column("label").is_some());
    }

    #[test]
    fn test_parse_no_header_numbers_columns() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "t.tsv", "a\t1\nb\t2\n");
        let table = DelimitedParser::new(b'\t')
            .parse(&path, &kwargs("{header: false}"))
            .unwrap();
        assert!(table.column("0").is_some());
        assert!(table.column("1").is_some());
    }

    #[test]
    fn test_unknown_kwarg() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "t.csv", "a\n1\n");
        let err = DelimitedParser::new(b',')
            .parse(&path, &kwargs("{engine: fast}"))
            .unwrap_err();
        assert!(err.to_string().contains("engine"));
    }

    #[test]
    fn test_ragged_rows_fail() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "t.csv", "a,b\n1,2\n3\n");
        assert!(DelimitedParser::new(b',').parse(&path, &Kwargs::new()).is_err());
    }

    #[test]
    fn test_resolve_transform() {
        let registry = ParserRegistry::default();
        let csv = Path::new("data/FILE.CSV");
        let bin = Path::new("data/image.png");

        assert_eq!(registry.resolve(None, csv, "n", "t").unwrap(), "csv");
        assert_eq!(registry.resolve(None, bin, "n", "t").unwrap(), "id");
        assert_eq!(registry.resolve(Some("TSV"), bin, "n", "t").unwrap(), "tsv");
        assert_eq!(registry.resolve(Some("id"), csv, "n", "t").unwrap(), "id");

        let err = registry.resolve(Some("xls"), csv, "sheet", "alice/data").unwrap_err();
        assert_eq!(err.to_string(), "build error: Unknown transform 'xls' for sheet @ alice/data");
    }
}
