use crate::data::CountryRecord;
use crate::sql::types::{Column, DataType, TableSchema, Value};

pub const TABLE_NAME: &str = "countries";

/// Fixed columns, in declaration order.
const BASE_COLUMNS: &[(&str, DataType)] = &[
    ("name", DataType::Text),
    ("ISO_A3", DataType::Text),
    ("ISO_A2", DataType::Text),
    ("population", DataType::Integer),
    ("languages", DataType::Text),
    ("area", DataType::Float),
    ("capital", DataType::Text),
    ("region", DataType::Text),
    ("subregion", DataType::Text),
    ("flagDescription", DataType::Text),
    ("currencies", DataType::Text),
    ("continents", DataType::Text),
    ("borders", DataType::Text),
];

/// Shape of the `countries` table shared by the prompt builder, validator and executor.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    schema: TableSchema,
}

impl SchemaCatalog {
    /// Catalog with only the fixed columns.
    pub fn standard() -> Self {
        let columns = BASE_COLUMNS
            .iter()
            .map(|(name, data_type)| Column::new(*name, *data_type))
            .collect();
        Self {
            schema: TableSchema {
                name: TABLE_NAME.to_string(),
                columns,
            },
        }
    }

    /// Fixed columns followed by the scalar extra attributes of `sample`.
    pub fn from_record(sample: &CountryRecord) -> Self {
        let mut catalog = Self::standard();
        for (key, value) in &sample.extra {
            if catalog.column(key).is_some() {
                continue;
            }
            let data_type = match Value::from(value) {
                Value::Integer(_) => DataType::Integer,
                Value::Float(_) => DataType::Float,
                Value::Boolean(_) => DataType::Boolean,
                Value::Null => continue,
                Value::Text(_) if value.is_object() => continue,
                Value::Text(_) => DataType::Text,
            };
            catalog.schema.columns.push(Column::new(key.clone(), data_type));
        }
        catalog
    }

    pub fn table_name(&self) -> &str {
        &self.schema.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.schema.columns
    }

    pub fn list_columns(&self) -> Vec<String> {
        self.schema.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Position and definition of a column; exact match wins over a case-insensitive one.
    pub fn column(&self, name: &str) -> Option<(usize, &Column)> {
        let columns = &self.schema.columns;
        columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| columns.iter().position(|c| c.name.eq_ignore_ascii_case(name)))
            .map(|idx| (idx, &columns[idx]))
    }

    /// Whether `identifier` names a column or the table itself.
    pub fn is_known_identifier(&self, identifier: &str) -> bool {
        identifier.eq_ignore_ascii_case(&self.schema.name)
            || self.schema.columns.iter().any(|c| c.name == identifier)
    }

    /// `TABLE countries (name Text, ...)` line for prompts.
    pub fn describe(&self) -> String {
        let columns: Vec<String> = self
            .schema
            .columns
            .iter()
            .map(|c| format!("{} {:?}", c.name, c.data_type))
            .collect();
        format!("TABLE {} ({})", self.schema.name, columns.join(", "))
    }
}

impl Default for SchemaCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
