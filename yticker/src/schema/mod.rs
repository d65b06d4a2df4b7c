//! # Schema Model
//!
//! The protobuf definition frames are read against. The `.proto` file is
//! compiled at runtime with `protox` into a `prost_reflect::DescriptorPool`,
//! focused on a single root message, and shared read-only (`Arc<Schema>`) by
//! every decode afterwards.
//!
//! Field names are exposed in lowerCamelCase the way JavaScript protobuf
//! tooling reports them: an underscore followed by a lowercase letter collapses
//! into the uppercase letter (`day_volume` -> `dayVolume`), any other underscore
//! is kept (`vol_24hr` stays `vol_24hr`). This differs from the descriptor's
//! `json_name`, which would yield `vol24hr`.

use std::collections::HashMap;
use std::path::Path;

use prost_reflect::{DescriptorPool, EnumDescriptor, FieldDescriptor, Kind, MessageDescriptor};

use crate::error::SchemaError;

/// Immutable, resolved schema for one root message.
#[derive(Debug, Clone)]
pub struct Schema {
    message: MessageDescriptor,
    /// Record name per field number.
    names: HashMap<u32, String>,
}

impl Schema {
    /// Compiles the `.proto` file at `path` and resolves `message_type` as the
    /// root message. Imports are looked up next to the file.
    pub fn load(path: &Path, message_type: &str) -> Result<Self, SchemaError> {
        std::fs::metadata(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let include = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let files = protox::compile([path], [include]).map_err(|e| SchemaError::Compile(e.to_string()))?;
        let pool = DescriptorPool::from_file_descriptor_set(files).map_err(|e| SchemaError::Compile(e.to_string()))?;
        Self::from_pool(&pool, message_type)
    }

    /// Resolves `message_type` in an already built pool. The name may be fully
    /// qualified (`feed.Trade`) or relative to its file's package (`Trade`).
    pub fn from_pool(pool: &DescriptorPool, message_type: &str) -> Result<Self, SchemaError> {
        let wanted = message_type.trim_start_matches('.');
        let message = pool
            .get_message_by_name(wanted)
            .or_else(|| {
                pool.all_messages().find(|m| {
                    !m.package_name().is_empty() && m.full_name() == format!("{}.{}", m.package_name(), wanted)
                })
            })
            .ok_or_else(|| SchemaError::MissingMessage(message_type.to_string()))?;

        let mut names = HashMap::new();
        for field in message.fields() {
            let construct = if field.is_map() {
                Some("a map")
            } else if field.is_list() {
                Some("repeated")
            } else if let Kind::Message(_) = field.kind() {
                Some("message-typed")
            } else {
                None
            };
            if let Some(construct) = construct {
                return Err(SchemaError::Unsupported(format!(
                    "field '{}' of '{}' is {}",
                    field.name(),
                    message.full_name(),
                    construct
                )));
            }
            names.insert(field.number(), camel_case(field.name()));
        }

        Ok(Self { message, names })
    }

    /// The root message frames are decoded as.
    pub fn message(&self) -> &MessageDescriptor {
        &self.message
    }

    /// Name `field` carries in decoded records.
    pub fn record_name<'a>(&'a self, field: &'a FieldDescriptor) -> &'a str {
        self.names.get(&field.number()).map_or(field.name(), String::as_str)
    }

    /// Root message field by its record name.
    pub fn field(&self, record_name: &str) -> Option<FieldDescriptor> {
        let (number, _) = self.names.iter().find(|(_, name)| name.as_str() == record_name)?;
        self.message.get_field(*number)
    }

    pub fn field_count(&self) -> usize {
        self.names.len()
    }

    /// Enum by full name, e.g. `yticker.QuoteType` for an enum nested in the
    /// `yticker` message.
    pub fn enum_def(&self, full_name: &str) -> Option<EnumDescriptor> {
        self.message.parent_pool().get_enum_by_name(full_name)
    }
}

fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '_' {
            if let Some(&next) = chars.peek() {
                if next.is_ascii_lowercase() {
                    out.push(next.to_ascii_uppercase());
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_schema_path;
    use std::path::PathBuf;

    fn write_proto(source: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.proto");
        std::fs::write(&path, source).unwrap();
        (dir, path)
    }

    #[test]
    fn test_bundled_schema_resolves() {
        let schema = Schema::load(&default_schema_path(), "yticker").unwrap();
        assert_eq!(schema.message().full_name(), "yticker");
        assert_eq!(schema.field_count(), 33);

        let day_volume = schema.field("dayVolume").unwrap();
        assert_eq!(day_volume.number(), 9);
        assert!(matches!(day_volume.kind(), Kind::Sint64));

        let quote_type = schema.field("quoteType").unwrap();
        assert!(matches!(quote_type.kind(), Kind::Enum(e) if e.full_name() == "yticker.QuoteType"));
        let table = schema.enum_def("yticker.QuoteType").unwrap();
        assert_eq!(table.get_value(8).unwrap().name(), "EQUITY");
        assert_eq!(table.get_value(1000).unwrap().name(), "INDUSTRY");
        assert!(table.get_value(1).is_none());
    }

    #[test]
    fn test_underscore_before_digit_is_kept() {
        let schema = Schema::load(&default_schema_path(), "yticker").unwrap();
        let field = schema.message().get_field(28).unwrap();
        assert_eq!(schema.record_name(&field), "vol_24hr");
        assert_eq!(camel_case("day_volume"), "dayVolume");
        assert_eq!(camel_case("a__b"), "a_B");
    }

    #[test]
    fn test_root_message_by_qualified_or_local_name() {
        let (_dir, path) = write_proto(
            r#"
            syntax = "proto3";
            package feed;
            enum Side { BUY = 0; SELL = 1; }
            message Trade { Side side = 1; .feed.Side other = 2; string trade_id = 3; }
        "#,
        );
        let qualified = Schema::load(&path, "feed.Trade").unwrap();
        let local = Schema::load(&path, "Trade").unwrap();
        assert_eq!(qualified.message().full_name(), "feed.Trade");
        assert_eq!(local.message().full_name(), "feed.Trade");

        assert!(matches!(qualified.field("side").unwrap().kind(), Kind::Enum(e) if e.full_name() == "feed.Side"));
        assert!(matches!(qualified.field("other").unwrap().kind(), Kind::Enum(e) if e.full_name() == "feed.Side"));
        assert_eq!(qualified.field("tradeId").unwrap().number(), 3);
    }

    #[test]
    fn test_missing_root_message() {
        let err = Schema::load(&default_schema_path(), "PricingData").unwrap_err();
        assert!(matches!(err, SchemaError::MissingMessage(name) if name == "PricingData"));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Schema::load(&dir.path().join("absent.proto"), "yticker").unwrap_err();
        assert!(matches!(err, SchemaError::Io { .. }));
    }

    #[test]
    fn test_invalid_sources_fail_to_compile() {
        let (_dir, path) = write_proto("syntax = \"proto3\"; message M { string id = ; }");
        assert!(matches!(Schema::load(&path, "M").unwrap_err(), SchemaError::Compile(_)));

        let (_dir, path) = write_proto("syntax = \"proto3\"; message M { Missing m = 1; }");
        assert!(matches!(Schema::load(&path, "M").unwrap_err(), SchemaError::Compile(_)));
    }

    #[test]
    fn test_non_scalar_fields_are_unsupported() {
        let (_dir, path) = write_proto("syntax = \"proto3\"; message M { message N { bool b = 1; } N n = 1; }");
        assert!(matches!(Schema::load(&path, "M").unwrap_err(), SchemaError::Unsupported(_)));

        let (_dir, path) = write_proto("syntax = \"proto3\"; message M { repeated string ids = 1; }");
        assert!(matches!(Schema::load(&path, "M").unwrap_err(), SchemaError::Unsupported(_)));

        let (_dir, path) = write_proto("syntax = \"proto3\"; message M { map<string, int32> sizes = 1; }");
        assert!(matches!(Schema::load(&path, "M").unwrap_err(), SchemaError::Unsupported(_)));
    }
}
