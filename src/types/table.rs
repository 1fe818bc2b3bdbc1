use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// typed column values; `None` marks a missing cell
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum ColumnData {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    Str(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnData::Int(_) => "int",
            ColumnData::Float(_) => "float",
            ColumnData::Bool(_) => "bool",
            ColumnData::Str(_) => "str",
        }
    }

    /// number of missing cells
    pub fn null_count(&self) -> usize {
        match self {
            ColumnData::Int(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::Float(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::Bool(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::Str(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }

    /// cell rendered as text, `None` for missing
    pub fn display(&self, row: usize) -> Option<String> {
        match self {
            ColumnData::Int(v) => v.get(row).copied().flatten().map(|x| x.to_string()),
            ColumnData::Float(v) => v.get(row).copied().flatten().map(|x| x.to_string()),
            ColumnData::Bool(v) => v.get(row).copied().flatten().map(|x| x.to_string()),
            ColumnData::Str(v) => v.get(row).cloned().flatten(),
        }
    }

    /// cell as a number, for numeric columns
    pub fn number(&self, row: usize) -> Option<f64> {
        match self {
            ColumnData::Int(v) => v.get(row).copied().flatten().map(|x| x as f64),
            ColumnData::Float(v) => v.get(row).copied().flatten(),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnData::Int(_) | ColumnData::Float(_))
    }

    fn slice(&self, start: usize, end: usize) -> ColumnData {
        match self {
            ColumnData::Int(v) => ColumnData::Int(v[start..end].to_vec()),
            ColumnData::Float(v) => ColumnData::Float(v[start..end].to_vec()),
            ColumnData::Bool(v) => ColumnData::Bool(v[start..end].to_vec()),
            ColumnData::Str(v) => ColumnData::Str(v[start..end].to_vec()),
        }
    }

    fn extend(&mut self, other: ColumnData) -> Result<()> {
        match (self, other) {
            (ColumnData::Int(a), ColumnData::Int(b)) => a.extend(b),
            (ColumnData::Float(a), ColumnData::Float(b)) => a.extend(b),
            (ColumnData::Bool(a), ColumnData::Bool(b)) => a.extend(b),
            (ColumnData::Str(a), ColumnData::Str(b)) => a.extend(b),
            (a, b) => {
                return Err(Error::TypeMismatch(format!(
                    "cannot append {} fragment to {} column",
                    b.type_name(),
                    a.type_name()
                )))
            }
        }
        Ok(())
    }

    /// infer the narrowest type that fits every non-empty cell
    ///
    /// int, then float, then bool (`true`/`false`, any case), falling back to strings.
    pub fn infer(cells: Vec<Option<String>>) -> ColumnData {
        let present = || cells.iter().flatten();

        if present().all(|c| c.trim().parse::<i64>().is_ok()) {
            return ColumnData::Int(
                cells
                    .iter()
                    .map(|c| c.as_ref().and_then(|c| c.trim().parse().ok()))
                    .collect(),
            );
        }
        if present().all(|c| c.trim().parse::<f64>().is_ok()) {
            return ColumnData::Float(
                cells
                    .iter()
                    .map(|c| c.as_ref().and_then(|c| c.trim().parse().ok()))
                    .collect(),
            );
        }
        if present().all(|c| parse_bool(c).is_some()) {
            return ColumnData::Bool(
                cells
                    .iter()
                    .map(|c| c.as_deref().and_then(parse_bool))
                    .collect(),
            );
        }
        ColumnData::Str(cells)
    }
}

fn parse_bool(cell: &str) -> Option<bool> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

/// an in-memory table, stored column by column
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    /// build a table; every column must have the same length and a unique name
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let rows = first.data.len();
            for column in &columns {
                if column.data.len() != rows {
                    return Err(Error::TypeMismatch(format!(
                        "column {} has {} rows, expected {}",
                        column.name,
                        column.data.len(),
                        rows
                    )));
                }
            }
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(Error::Build(format!("duplicate column name: {}", column.name)));
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.data.len()).unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// split into row slices of at most `rows` rows; an empty table yields one slice
    pub fn split_rows(&self, rows: usize) -> Vec<Table> {
        let total = self.num_rows();
        if total == 0 || rows == 0 || total <= rows {
            return vec![self.clone()];
        }
        (0..total)
            .step_by(rows)
            .map(|start| {
                let end = (start + rows).min(total);
                Table {
                    columns: self
                        .columns
                        .iter()
                        .map(|c| Column {
                            name: c.name.clone(),
                            data: c.data.slice(start, end),
                        })
                        .collect(),
                }
            })
            .collect()
    }

    /// append the rows of another table with the same schema
    pub fn append(&mut self, other: Table) -> Result<()> {
        if self.columns.is_empty() {
            self.columns = other.columns;
            return Ok(());
        }
        if other.columns.len() != self.columns.len() {
            return Err(Error::TypeMismatch(
                "fragments have different column counts".to_string(),
            ));
        }
        for (mine, theirs) in self.columns.iter_mut().zip(other.columns) {
            if mine.name != theirs.name {
                return Err(Error::TypeMismatch(format!(
                    "fragment column {} does not match {}",
                    theirs.name, mine.name
                )));
            }
            mine.data.extend(theirs.data)?;
        }
        Ok(())
    }
}
