//! Country dataset: record type, JSON document loading and the load-once guard.

use crate::error::DatasetError;
use crate::sql::types::Value;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// One country, keyed by its ISO 3166-1 alpha-3 code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryRecord {
    #[serde(rename = "ISO_A3")]
    pub iso_a3: String,
    pub name: String,
    #[serde(rename = "ISO_A2", default, skip_serializing_if = "Option::is_none")]
    pub iso_a2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<i64>,
    #[serde(
        default,
        deserialize_with = "text_or_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub languages: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    #[serde(
        default,
        deserialize_with = "text_or_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub capital: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subregion: Option<String>,
    #[serde(
        rename = "flagDescription",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub flag_description: Option<String>,
    #[serde(
        default,
        deserialize_with = "text_or_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub currencies: Option<String>,
    #[serde(
        default,
        deserialize_with = "text_or_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub continents: Option<String>,
    #[serde(
        default,
        deserialize_with = "text_or_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub borders: Option<String>,
    /// Attributes outside the fixed schema (flagUrl, customData, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CountryRecord {
    /// Minimal record, mostly for fixtures.
    pub fn new(iso_a3: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            iso_a3: iso_a3.into(),
            name: name.into(),
            iso_a2: None,
            population: None,
            languages: None,
            area: None,
            capital: None,
            region: None,
            subregion: None,
            flag_description: None,
            currencies: None,
            continents: None,
            borders: None,
            extra: BTreeMap::new(),
        }
    }

    /// Value of a schema column. Unknown names and missing attributes are NULL.
    pub fn value_of(&self, column: &str) -> Value {
        fn text(v: &Option<String>) -> Value {
            v.as_ref().map(|s| Value::Text(s.clone())).unwrap_or(Value::Null)
        }

        match column {
            "ISO_A3" => Value::Text(self.iso_a3.clone()),
            "name" => Value::Text(self.name.clone()),
            "ISO_A2" => text(&self.iso_a2),
            "population" => self.population.map(Value::Integer).unwrap_or(Value::Null),
            "languages" => text(&self.languages),
            "area" => self.area.map(Value::Float).unwrap_or(Value::Null),
            "capital" => text(&self.capital),
            "region" => text(&self.region),
            "subregion" => text(&self.subregion),
            "flagDescription" => text(&self.flag_description),
            "currencies" => text(&self.currencies),
            "continents" => text(&self.continents),
            "borders" => text(&self.borders),
            other => self.extra.get(other).map(Value::from).unwrap_or(Value::Null),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrList {
    Text(String),
    List(Vec<serde_json::Value>),
    Map(BTreeMap<String, serde_json::Value>),
}

fn join_json(items: impl Iterator<Item = serde_json::Value>) -> String {
    items
        .map(|item| match item {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn text_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let raw = Option::<TextOrList>::deserialize(deserializer)?;
    Ok(raw.map(|r| match r {
        TextOrList::Text(s) => s,
        TextOrList::List(items) => join_json(items.into_iter()),
        TextOrList::Map(map) => join_json(map.into_values()),
    }))
}

fn version_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(match raw {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    #[serde(default, deserialize_with = "version_string")]
    pub version: String,
    #[serde(rename = "lastUpdated", default)]
    pub last_updated: String,
}

#[derive(Deserialize)]
struct DatasetDocument {
    #[serde(default)]
    metadata: DatasetMetadata,
    countries: Option<Vec<CountryRecord>>,
}

/// Read-only mapping from country code to record, in document order.
#[derive(Debug, Clone, Default)]
pub struct CountryDataset {
    metadata: DatasetMetadata,
    records: Vec<CountryRecord>,
    index: HashMap<String, usize>,
}

impl CountryDataset {
    pub fn from_records(metadata: DatasetMetadata, records: Vec<CountryRecord>) -> Self {
        let mut dataset = Self {
            metadata,
            records: Vec::with_capacity(records.len()),
            index: HashMap::new(),
        };

        for record in records {
            // A repeated code replaces the earlier record in place.
            match dataset.index.get(&record.iso_a3) {
                Some(&pos) => dataset.records[pos] = record,
                None => {
                    dataset
                        .index
                        .insert(record.iso_a3.clone(), dataset.records.len());
                    dataset.records.push(record);
                }
            }
        }

        dataset
    }

    pub fn from_json_str(json: &str) -> Result<Self, DatasetError> {
        let document: DatasetDocument = serde_json::from_str(json)?;
        let countries = document
            .countries
            .ok_or_else(|| DatasetError::Format("countries array not found".to_string()))?;

        if countries.is_empty() {
            return Err(DatasetError::Empty);
        }

        Ok(Self::from_records(document.metadata, countries))
    }

    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&content)
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    pub fn get(&self, code: &str) -> Option<&CountryRecord> {
        self.index.get(code).map(|&pos| &self.records[pos])
    }

    pub fn contains(&self, code: &str) -> bool {
        self.index.contains_key(code)
    }

    pub fn records(&self) -> &[CountryRecord] {
        &self.records
    }

    pub fn first(&self) -> Option<&CountryRecord> {
        self.records.first()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Loads the dataset at most once per process; later calls return the same copy.
#[derive(Default)]
pub struct DatasetLoader {
    cell: OnceCell<Arc<CountryDataset>>,
}

impl DatasetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load<P: AsRef<Path>>(&self, path: P) -> Result<Arc<CountryDataset>, DatasetError> {
        if let Some(existing) = self.cell.get() {
            debug!("Country data already loaded");
            return Ok(existing.clone());
        }

        let dataset = self
            .cell
            .get_or_try_init(|| async {
                let dataset = CountryDataset::from_path(path.as_ref()).await?;
                info!(
                    countries = dataset.len(),
                    version = %dataset.metadata().version,
                    last_updated = %dataset.metadata().last_updated,
                    "Country data loaded"
                );
                Ok::<_, DatasetError>(Arc::new(dataset))
            })
            .await?;

        Ok(dataset.clone())
    }

    pub fn get(&self) -> Option<Arc<CountryDataset>> {
        self.cell.get().cloned()
    }
}
