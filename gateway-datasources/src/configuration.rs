//! Logic for loading data source configuration in to an object model.
//!
//! ```yaml
//! subgraphs:
//!   accounts: http://accounts.internal:4001/graphql
//!   products: https://products.example.com/graphql
//! datasources:
//!   all:
//!     apq: true
//!     max_connections: 50
//!     timeout: 5s
//!   subgraphs:
//!     products:
//!       transport: fetch
//! ```

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::time::Duration;

use displaydoc::Display;
use http::Uri;
use schemars::gen::SchemaSettings;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::de;
use serde::de::DeserializeOwned;
use serde::de::MapAccess;
use serde::de::Visitor;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
    /// subgraph '{subgraph}' has an invalid url '{url}': {error}
    InvalidSubgraphUrl {
        subgraph: String,
        url: String,
        error: String,
    },
    /// data source options are set for subgraph '{0}' which has no url
    UnknownSubgraph(String),
}

/// The configuration of the data sources of a gateway.
///
/// Can be created through `serde::Deserialize` from various formats, or parsed
/// and validated from YAML with [`str::parse`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Url of every subgraph, by subgraph name.
    #[serde(default)]
    pub subgraphs: HashMap<String, String>,

    /// Data source options.
    #[serde(default)]
    pub datasources: SubgraphConfiguration<DataSourceOptions>,
}

impl Configuration {
    /// The options of `subgraph_name`, falling back to the options of all subgraphs.
    pub fn options(&self, subgraph_name: &str) -> &DataSourceOptions {
        self.datasources.get(subgraph_name)
    }

    /// The parsed url of `subgraph_name`, if the subgraph is configured.
    pub fn subgraph_url(&self, subgraph_name: &str) -> Option<Result<Uri, ConfigurationError>> {
        self.subgraphs
            .get(subgraph_name)
            .map(|url| parse_subgraph_url(subgraph_name, url))
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (name, url) in &self.subgraphs {
            parse_subgraph_url(name, url)?;
        }
        if let Some(name) = self
            .datasources
            .subgraphs
            .keys()
            .find(|name| !self.subgraphs.contains_key(name.as_str()))
        {
            return Err(ConfigurationError::UnknownSubgraph(name.clone()));
        }
        for options in
            std::iter::once(&self.datasources.all).chain(self.datasources.subgraphs.values())
        {
            options.validate()?;
        }
        Ok(())
    }
}

impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Configuration::default());
        }
        let configuration: Configuration =
            serde_yaml::from_str(s).map_err(|e| ConfigurationError::InvalidConfiguration {
                message: "failed to parse yaml",
                error: e.to_string(),
            })?;
        configuration.validate()?;
        Ok(configuration)
    }
}

fn parse_subgraph_url(subgraph: &str, url: &str) -> Result<Uri, ConfigurationError> {
    let invalid = |error: String| ConfigurationError::InvalidSubgraphUrl {
        subgraph: subgraph.to_string(),
        url: url.to_string(),
        error,
    };
    let uri = Uri::from_str(url).map_err(|e| invalid(e.to_string()))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => return Err(invalid("the scheme must be http or https".to_string())),
    }
    if uri.host().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(uri)
}

/// Generate the JSON schema of the configuration.
pub fn generate_config_schema() -> RootSchema {
    let settings = SchemaSettings::draft07().with(|s| {
        s.option_nullable = true;
        s.option_add_null_type = false;
        s.inline_subschemas = true;
    });

    let gen = settings.into_generator();
    gen.into_root_schema_for::<Configuration>()
}

/// How requests reach a subgraph.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Pooled connections with connect retries.
    #[default]
    Pooling,
    /// Single-shot fetch, for runtimes without socket control.
    Fetch,
}

/// Options of the data source of one subgraph.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct DataSourceOptions {
    /// Send operations as automatic persisted queries. Defaults to false
    pub apq: bool,

    /// Which transport delivers the requests. Defaults to `pooling`
    pub transport: TransportKind,

    /// Maximum number of in-flight requests, and of idle pooled connections, per origin. Defaults to 100
    pub max_connections: usize,

    /// How many times a request that could not connect is tried again. Defaults to 0
    pub retry_count: usize,

    /// Timeout of one request, in human-readable format. Defaults to 30s
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub timeout: Duration,
}

pub(crate) const DEFAULT_MAX_CONNECTIONS: usize = 100;
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

impl Default for DataSourceOptions {
    fn default() -> Self {
        Self {
            apq: false,
            transport: TransportKind::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            retry_count: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl DataSourceOptions {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_connections == 0 {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "invalid data source options",
                error: "max_connections must be at least 1".to_string(),
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "invalid data source options",
                error: "timeout must not be zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Options applying to all subgraphs, with per subgraph overrides.
///
/// A subgraph entry only needs the fields it overrides: the others are taken
/// from `all`.
#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
pub struct SubgraphConfiguration<T>
where
    T: std::fmt::Debug + Default + Clone + Serialize + JsonSchema,
{
    /// options applying to all subgraphs
    #[serde(default)]
    pub all: T,
    /// per subgraph options
    #[serde(default)]
    pub subgraphs: HashMap<String, T>,
}

impl<T> SubgraphConfiguration<T>
where
    T: std::fmt::Debug + Default + Clone + Serialize + JsonSchema,
{
    pub fn get(&self, subgraph_name: &str) -> &T {
        self.subgraphs.get(subgraph_name).unwrap_or(&self.all)
    }
}

impl<'de, T> Deserialize<'de> for SubgraphConfiguration<T>
where
    T: DeserializeOwned,
    T: std::fmt::Debug + Default + Clone + Serialize + JsonSchema,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(SubgraphVisitor { t: PhantomData })
    }
}

struct SubgraphVisitor<T> {
    t: PhantomData<T>,
}

impl<'de, T> Visitor<'de> for SubgraphVisitor<T>
where
    T: DeserializeOwned,
    T: std::fmt::Debug + Default + Clone + Serialize + JsonSchema,
{
    type Value = SubgraphConfiguration<T>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("struct SubgraphConfiguration")
    }

    fn visit_map<V>(self, mut map: V) -> Result<SubgraphConfiguration<T>, V::Error>
    where
        V: MapAccess<'de>,
    {
        let mut all: Option<serde_yaml::Mapping> = None;
        let mut parsed_subgraphs: Option<HashMap<String, serde_yaml::Mapping>> = None;
        while let Some(key) = map.next_key()? {
            match key {
                Field::All => {
                    if all.is_some() {
                        return Err(de::Error::duplicate_field("all"));
                    }
                    all = Some(map.next_value()?);
                }
                Field::Subgraphs => {
                    if parsed_subgraphs.is_some() {
                        return Err(de::Error::duplicate_field("subgraphs"));
                    }
                    parsed_subgraphs = Some(map.next_value()?);
                }
            }
        }

        let mut subgraphs = HashMap::new();
        if let Some(subs) = parsed_subgraphs {
            for (subgraph_name, parsed_value) in subs {
                // if `all` was set, use the fields it set, then overwrite with the subgraph
                // specific values
                let value = if let Some(mut value) = all.clone() {
                    for (k, v) in parsed_value {
                        value.insert(k, v);
                    }

                    value
                } else {
                    parsed_value
                };

                let config = serde_yaml::from_value(serde_yaml::Value::Mapping(value))
                    .map_err(de::Error::custom)?;
                subgraphs.insert(subgraph_name, config);
            }
        }

        let all = serde_yaml::from_value(serde_yaml::Value::Mapping(all.unwrap_or_default()))
            .map_err(de::Error::custom)?;

        Ok(SubgraphConfiguration { all, subgraphs })
    }
}

enum Field {
    All,
    Subgraphs,
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_identifier(FieldVisitor)
    }
}

struct FieldVisitor;

impl<'de> Visitor<'de> for FieldVisitor {
    type Value = Field;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("`all` or `subgraphs`")
    }

    fn visit_str<E>(self, value: &str) -> Result<Field, E>
    where
        E: de::Error,
    {
        match value {
            "all" => Ok(Field::All),
            "subgraphs" => Ok(Field::Subgraphs),
            _ => Err(de::Error::unknown_field(value, FIELDS)),
        }
    }
}

const FIELDS: &[&str] = &["all", "subgraphs"];
