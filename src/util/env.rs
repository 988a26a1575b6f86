//! Process configuration.
//!
//! Values come from the process environment, with a `.env` file in the working directory
//! filling in anything not already set. Deserialization runs through a small serde deserializer
//! over `(name, value)` pairs so [`Config`] can use ordinary derive attributes for renames and
//! defaults.

use std::sync::LazyLock;

use serde::Deserialize;
use serde::de::value::MapDeserializer;
use serde::de::{self, IntoDeserializer};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::constants::{
    DEFAULT_CORS_ALLOW_ORIGINS, DEFAULT_PORT, DEFAULT_SERVICE_NAME, DEFAULT_STATUS_UPSTREAM,
    DEFAULT_STORE_DATABASE,
};

static CONFIG: LazyLock<OnceCell<Config>> = LazyLock::new(OnceCell::new);
pub async fn config() -> EnvResult<&'static Config> {
    CONFIG.get_or_try_init(|| async { Config::from_env() }).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Document store connection string; the gateway never connects when this is unset
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default = "default_store_database")]
    pub store_database: String,

    #[serde(default = "default_status_upstream")]
    pub status_upstream_url: String,

    #[serde(default = "default_cors_allow_origins")]
    pub cors_allow_origins: String,

    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Config {
    pub fn from_env() -> EnvResult<Self> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            return Err(e.into());
        }

        Ok(from_iter(std::env::vars())?)
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_store_database() -> String {
    DEFAULT_STORE_DATABASE.to_string()
}

fn default_status_upstream() -> String {
    DEFAULT_STATUS_UPSTREAM.to_string()
}

fn default_cors_allow_origins() -> String {
    DEFAULT_CORS_ALLOW_ORIGINS.to_string()
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

// ---
//  Deserializer implementation
// ---

/// A single variable's value, carrying its name for error messages
struct Val {
    name: String,
    value: String,
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Val {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

macro_rules! parse_then_visit {
    ($($ty:ident => $method:ident,)*) => {
        $(
            fn $method<V>(self, visitor: V) -> Result<V::Value, EnvDeserializeError>
            where
                V: de::Visitor<'de>,
            {
                match self.value.trim().parse::<$ty>() {
                    Ok(parsed) => parsed.into_deserializer().$method(visitor),
                    Err(e) => Err(de::Error::custom(format_args!(
                        "{e}: while parsing '{}' ({})",
                        self.value, self.name
                    ))),
                }
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for Val {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_string(self.value)
    }

    /// Blank values read as unset
    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        if self.value.trim().is_empty() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_newtype_struct<V>(
        self,
        _: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    parse_then_visit! {
        bool => deserialize_bool,
        u16 => deserialize_u16,
        u32 => deserialize_u32,
        u64 => deserialize_u64,
        i64 => deserialize_i64,
        f64 => deserialize_f64,
    }

    serde::forward_to_deserialize_any! {
        i8 i16 i32 u8 f32 char str string unit bytes byte_buf map seq
        unit_struct tuple_struct identifier tuple ignored_any struct enum
    }
}

pub fn from_iter<Iter, T>(iter: Iter) -> Result<T, EnvDeserializeError>
where
    T: de::DeserializeOwned,
    Iter: IntoIterator<Item = (String, String)>,
{
    let pairs = iter
        .into_iter()
        .map(|(name, value)| (name.clone(), Val { name, value }));

    T::deserialize(MapDeserializer::new(pairs))
}

impl de::Error for EnvDeserializeError {
    fn custom<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        EnvDeserializeError::Custom(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        EnvDeserializeError::MissingValue(field.into())
    }
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error(transparent)]
    DeserializationError(#[from] EnvDeserializeError),
}

#[derive(Debug, Error)]
pub enum EnvDeserializeError {
    #[error("env deserialization error: {0}")]
    Custom(String),

    #[error("missing environment variable {0}")]
    MissingValue(String),
}

#[cfg(test)]
mod test {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config: Config = from_iter(vars(&[("PATH", "/usr/bin")])).unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.redis_url, None);
        assert_eq!(config.store_database, DEFAULT_STORE_DATABASE);
        assert_eq!(config.status_upstream_url, DEFAULT_STATUS_UPSTREAM);
        assert_eq!(config.cors_allow_origins, "*");
        assert_eq!(config.otel_exporter_otlp_endpoint, None);
    }

    #[test]
    fn test_reads_values() {
        let config: Config = from_iter(vars(&[
            ("PORT", "8080"),
            ("REDIS_URL", "redis://127.0.0.1:6379"),
            ("STORE_DATABASE", "games"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.store_database, "games");
    }

    #[test]
    fn test_blank_optional_is_unset() {
        let config: Config = from_iter(vars(&[("REDIS_URL", "  ")])).unwrap();
        assert_eq!(config.redis_url, None);
    }

    #[test]
    fn test_bad_port_is_an_error() {
        let err = from_iter::<_, Config>(vars(&[("PORT", "three thousand")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
