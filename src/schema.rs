//! Table schemas: ordered column names, declared types and domains.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cell::DataCell;
use crate::error::{Error, Result};

/// Declared type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    /// 32-bit integers.
    Int,
    /// 64-bit integers (accepts ints).
    Long,
    /// Floats (accepts ints and longs).
    Double,
    /// Booleans.
    Boolean,
    /// Strings.
    String,
    /// Collections whose elements are compatible with the inner type.
    Collection(Box<DataType>),
    /// Blobs of the named type.
    Blob(String),
    /// Object cells of the named type.
    Object(String),
    /// Any cell.
    Any,
}

impl DataType {
    /// Returns true if `cell` may be stored in a column of this type.
    /// Missing cells are compatible with every type.
    pub fn is_compatible(&self, cell: &DataCell) -> bool {
        match (self, cell) {
            (_, DataCell::Missing) | (DataType::Any, _) => true,
            (DataType::Int, DataCell::Int(_)) => true,
            (DataType::Long, DataCell::Int(_) | DataCell::Long(_)) => true,
            (DataType::Double, DataCell::Int(_) | DataCell::Long(_) | DataCell::Double(_)) => true,
            (DataType::Boolean, DataCell::Boolean(_)) => true,
            (DataType::String, DataCell::String(_)) => true,
            (DataType::Collection(inner), DataCell::Collection(c)) => {
                c.element_type() == inner.as_ref()
                    || c.cells().iter().all(|element| inner.is_compatible(element))
            }
            (DataType::Blob(name), DataCell::Blob(b)) => b.type_name() == name,
            (DataType::Object(name), DataCell::Object(o)) => o.type_name() == name,
            _ => false,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int | DataType::Long | DataType::Double)
    }

    fn is_nominal(&self) -> bool {
        matches!(self, DataType::String | DataType::Boolean)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Int => f.write_str("int"),
            DataType::Long => f.write_str("long"),
            DataType::Double => f.write_str("double"),
            DataType::Boolean => f.write_str("boolean"),
            DataType::String => f.write_str("string"),
            DataType::Collection(inner) => write!(f, "collection<{}>", inner),
            DataType::Blob(name) => write!(f, "blob:{}", name),
            DataType::Object(name) => write!(f, "object:{}", name),
            DataType::Any => f.write_str("any"),
        }
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parsed = match s {
            "int" => DataType::Int,
            "long" => DataType::Long,
            "double" => DataType::Double,
            "boolean" => DataType::Boolean,
            "string" => DataType::String,
            "any" => DataType::Any,
            _ => {
                if let Some(inner) =
                    s.strip_prefix("collection<").and_then(|rest| rest.strip_suffix('>'))
                {
                    DataType::Collection(Box::new(inner.parse()?))
                } else if let Some(name) = s.strip_prefix("blob:") {
                    DataType::Blob(name.to_string())
                } else if let Some(name) = s.strip_prefix("object:") {
                    DataType::Object(name.to_string())
                } else {
                    return Err(Error::invalid_argument(format!("unknown data type: {}", s)));
                }
            }
        };
        Ok(parsed)
    }
}

impl TryFrom<String> for DataType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<DataType> for String {
    fn from(t: DataType) -> Self {
        t.to_string()
    }
}

/// A scalar value recorded in a column domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainValue {
    /// Integer bound.
    Int(i32),
    /// Long bound.
    Long(i64),
    /// Float bound.
    Double(f64),
    /// Boolean possible value.
    Boolean(bool),
    /// String possible value.
    String(String),
}

impl DomainValue {
    pub(crate) fn from_cell(cell: &DataCell) -> Option<Self> {
        match cell {
            DataCell::Int(v) => Some(DomainValue::Int(*v)),
            DataCell::Long(v) => Some(DomainValue::Long(*v)),
            DataCell::Double(v) if !v.is_nan() => Some(DomainValue::Double(*v)),
            DataCell::Boolean(v) => Some(DomainValue::Boolean(*v)),
            DataCell::String(v) => Some(DomainValue::String(v.to_string())),
            _ => None,
        }
    }

    /// Type-specific comparison. Numbers compare numerically across widths;
    /// values of unrelated kinds are unordered.
    pub fn compare(&self, other: &DomainValue) -> Option<Ordering> {
        use DomainValue::*;
        match (self, other) {
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Long(a), Long(b)) => Some(a.cmp(b)),
            (Int(a), Long(b)) => Some(i64::from(*a).cmp(b)),
            (Long(a), Int(b)) => Some(a.cmp(&i64::from(*b))),
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (String(a), String(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            DomainValue::Int(v) => Some(f64::from(*v)),
            DomainValue::Long(v) => Some(*v as f64),
            DomainValue::Double(v) => Some(*v),
            _ => None,
        }
    }
}

/// Domain statistics of a column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnDomain {
    /// Smallest value seen, for numeric columns.
    pub lower: Option<DomainValue>,
    /// Largest value seen, for numeric columns.
    pub upper: Option<DomainValue>,
    /// Distinct values in first-seen order, for nominal columns whose
    /// distinct count stayed within the cap.
    pub possible_values: Option<Vec<DomainValue>>,
}

/// One column of a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    name: String,
    data_type: DataType,
    #[serde(default)]
    domain: ColumnDomain,
}

impl ColumnSchema {
    /// Creates a column without domain information.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self { name: name.into(), data_type, domain: ColumnDomain::default() }
    }

    /// Column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type.
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Domain statistics.
    pub fn domain(&self) -> &ColumnDomain {
        &self.domain
    }

    /// Returns the column with `domain` attached.
    pub fn with_domain(mut self, domain: ColumnDomain) -> Self {
        self.domain = domain;
        self
    }

    /// Returns the column under another name.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub(crate) fn tracks_bounds(&self) -> bool {
        self.data_type.is_numeric()
    }

    pub(crate) fn tracks_values(&self) -> bool {
        self.data_type.is_nominal()
    }
}

/// Ordered list of uniquely named columns.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Creates a schema.
    ///
    /// # Errors
    ///
    /// Returns an error if two columns share a name.
    pub fn new(columns: Vec<ColumnSchema>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name()) {
                return Err(Error::invalid_argument(format!(
                    "duplicate column name \"{}\"",
                    column.name()
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Convenience constructor from `(name, type)` pairs.
    pub fn from_pairs(pairs: &[(&str, DataType)]) -> Result<Self> {
        Self::new(pairs.iter().map(|(name, t)| ColumnSchema::new(*name, t.clone())).collect())
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// All columns.
    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    /// Column at `index`.
    pub fn column(&self, index: usize) -> Option<&ColumnSchema> {
        self.columns.get(index)
    }

    /// Index of the column called `name`.
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Column names in order.
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(ColumnSchema::name).collect()
    }

    /// Appends the columns of `other`.
    ///
    /// # Errors
    ///
    /// Fails loudly if a column name occurs in both schemas.
    pub fn merge(&self, other: &TableSchema) -> Result<TableSchema> {
        if let Some(clash) = other.columns.iter().find(|c| self.find_column(c.name()).is_some()) {
            return Err(Error::invalid_argument(format!(
                "column name \"{}\" occurs in both tables",
                clash.name()
            )));
        }
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Ok(TableSchema { columns })
    }

    /// Same names and types, ignoring domains.
    pub fn is_structurally_equal(&self, other: &TableSchema) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.name == b.name && a.data_type == b.data_type)
    }

    /// Returns the schema with domains replaced column by column.
    pub(crate) fn with_domains(&self, domains: Vec<ColumnDomain>) -> TableSchema {
        let columns = self
            .columns
            .iter()
            .cloned()
            .zip(domains)
            .map(|(column, domain)| column.with_domain(domain))
            .collect();
        TableSchema { columns }
    }

    /// Returns the schema with each domain widened to cover `other`'s.
    pub(crate) fn with_merged_domains(&self, other: &TableSchema) -> TableSchema {
        let domains = self
            .columns
            .iter()
            .zip(&other.columns)
            .map(|(a, b)| a.domain.merge(&b.domain))
            .collect();
        self.with_domains(domains)
    }
}

impl ColumnDomain {
    /// Smallest domain containing both.
    pub fn merge(&self, other: &ColumnDomain) -> ColumnDomain {
        let pick = |a: &Option<DomainValue>, b: &Option<DomainValue>, keep: Ordering| match (a, b) {
            (Some(x), Some(y)) => match x.compare(y) {
                Some(ord) if ord == keep || ord == Ordering::Equal => Some(x.clone()),
                Some(_) => Some(y.clone()),
                None => None,
            },
            _ => None,
        };
        let possible_values = match (&self.possible_values, &other.possible_values) {
            (Some(a), Some(b)) => {
                let mut values = a.clone();
                for value in b {
                    if !values.contains(value) {
                        values.push(value.clone());
                    }
                }
                Some(values)
            }
            _ => None,
        };
        ColumnDomain {
            lower: pick(&self.lower, &other.lower, Ordering::Less),
            upper: pick(&self.upper, &other.upper, Ordering::Greater),
            possible_values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{BlobCell, CollectionCell};

    #[test]
    fn test_compatibility() {
        assert!(DataType::Double.is_compatible(&DataCell::Int(1)));
        assert!(DataType::Long.is_compatible(&DataCell::Int(1)));
        assert!(!DataType::Int.is_compatible(&DataCell::Long(1)));
        assert!(DataType::String.is_compatible(&DataCell::Missing));
        assert!(!DataType::String.is_compatible(&DataCell::Boolean(true)));
        assert!(DataType::Any.is_compatible(&DataCell::Double(0.5)));

        let blob = DataCell::Blob(BlobCell::new("image", vec![0u8]));
        assert!(DataType::Blob("image".into()).is_compatible(&blob));
        assert!(!DataType::Blob("audio".into()).is_compatible(&blob));

        let list = DataCell::Collection(CollectionCell::new(DataType::Int, vec![DataCell::Int(2)]));
        assert!(DataType::Collection(Box::new(DataType::Int)).is_compatible(&list));
        assert!(DataType::Collection(Box::new(DataType::Double)).is_compatible(&list));
        assert!(!DataType::Collection(Box::new(DataType::String)).is_compatible(&list));
    }

    #[test]
    fn test_data_type_parse_roundtrip() {
        let types = [
            DataType::Int,
            DataType::Collection(Box::new(DataType::Collection(Box::new(DataType::String)))),
            DataType::Blob("image/png".into()),
            DataType::Object("point".into()),
            DataType::Any,
        ];
        for t in types {
            assert_eq!(t.to_string().parse::<DataType>().unwrap(), t);
        }
        assert!("varchar".parse::<DataType>().is_err());
    }

    #[test]
    fn test_schema_rejects_duplicate_names() {
        let result = TableSchema::from_pairs(&[("a", DataType::Int), ("a", DataType::String)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_collision() {
        let left = TableSchema::from_pairs(&[("a", DataType::Int)]).unwrap();
        let right = TableSchema::from_pairs(&[("b", DataType::Int)]).unwrap();
        let merged = left.merge(&right).unwrap();
        assert_eq!(merged.names(), vec!["a", "b"]);

        let err = merged.merge(&right).unwrap_err();
        assert!(err.to_string().contains("\"b\""));
    }

    #[test]
    fn test_domain_compare() {
        let a = DomainValue::Int(3);
        let b = DomainValue::Double(2.5);
        assert_eq!(a.compare(&b), Some(Ordering::Greater));
        assert_eq!(DomainValue::Long(4).compare(&DomainValue::Int(4)), Some(Ordering::Equal));
        assert_eq!(DomainValue::String("x".into()).compare(&a), None);
    }

    #[test]
    fn test_domain_merge() {
        let a = ColumnDomain {
            lower: Some(DomainValue::Int(1)),
            upper: Some(DomainValue::Int(5)),
            possible_values: Some(vec![DomainValue::String("x".into())]),
        };
        let b = ColumnDomain {
            lower: Some(DomainValue::Int(-2)),
            upper: Some(DomainValue::Int(3)),
            possible_values: Some(vec![DomainValue::String("y".into()), DomainValue::String("x".into())]),
        };
        let merged = a.merge(&b);
        assert_eq!(merged.lower, Some(DomainValue::Int(-2)));
        assert_eq!(merged.upper, Some(DomainValue::Int(5)));
        assert_eq!(merged.possible_values.unwrap().len(), 2);
        assert_eq!(a.merge(&ColumnDomain::default()).lower, None);
    }
}
