//! Schema builders and the schema-installation XML file format.
//!
//! # Design
//!
//! [`value::Schema`] itself is a plain data record (see that crate);
//! this crate adds the pieces spec.md calls out separately: copy-in
//! setters (§4.2) and the `--install-schema-file` XML format (§6),
//! grounded on `gconftool.c`'s `process_schema`/`process_locale_info`.
//!
//! A `<schema>` element describes one schema key across one or more
//! locales, plus a list of `<applyto>` keys the schema should be
//! associated with once installed. [`InstalledSchema::per_locale`]
//! expands that into one fully-populated [`value::Schema`] per
//! locale, ready to hand to a source stack.

use std::fs;
use std::path::Path;

use error::{ConfError, ErrorKind};
use serde::Deserialize;
use value::{Schema, Value, ValueType};

/// Builder-style setters over [`Schema`], matching spec.md §4.2's
/// "plain data record with setters that copy-in strings" contract.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn new(value_type: ValueType) -> Self {
        Self {
            schema: Schema::new(value_type),
        }
    }

    #[must_use]
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.schema.locale = locale.into();
        self
    }

    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.schema.owner = owner.into();
        self
    }

    #[must_use]
    pub fn short_desc(mut self, short: impl Into<String>) -> Self {
        self.schema.short_desc = short.into();
        self
    }

    #[must_use]
    pub fn long_desc(mut self, long: impl Into<String>) -> Self {
        self.schema.long_desc = long.into();
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.schema.default_value = Some(Box::new(value));
        self
    }

    #[must_use]
    pub fn list_element_type(mut self, element_type: ValueType) -> Self {
        self.schema.list_element_type = Some(element_type);
        self
    }

    #[must_use]
    pub fn pair_types(mut self, car: ValueType, cdr: ValueType) -> Self {
        self.schema.car_type = Some(car);
        self.schema.cdr_type = Some(cdr);
        self
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}

/// One `<locale>` block within a `<schema>` element.
#[derive(Debug, Clone)]
pub struct LocaleVariant {
    pub name: String,
    pub short_desc: String,
    pub long_desc: String,
    pub default: Option<Value>,
}

/// One fully-parsed `<schema>` element from a schema installation file.
#[derive(Debug, Clone)]
pub struct InstalledSchema {
    /// The key the schema itself is stored at.
    pub key: String,
    pub owner: String,
    pub value_type: ValueType,
    pub list_element_type: Option<ValueType>,
    pub car_type: Option<ValueType>,
    pub cdr_type: Option<ValueType>,
    /// Global default, used when a locale variant supplies none of its own.
    pub global_default: Option<Value>,
    /// Keys this schema should be associated with once installed.
    pub applyto: Vec<String>,
    pub locales: Vec<LocaleVariant>,
}

impl InstalledSchema {
    /// Expands this element into one [`Schema`] per locale variant,
    /// falling back to the global default when a locale supplies none.
    pub fn per_locale(&self) -> Vec<Schema> {
        self.locales
            .iter()
            .map(|l| Schema {
                value_type: self.value_type,
                list_element_type: self.list_element_type,
                car_type: self.car_type,
                cdr_type: self.cdr_type,
                locale: l.name.clone(),
                owner: self.owner.clone(),
                short_desc: l.short_desc.clone(),
                long_desc: l.long_desc.clone(),
                default_value: l
                    .default
                    .clone()
                    .or_else(|| self.global_default.clone())
                    .map(Box::new),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawFile {
    schemalist: RawSchemaList,
}

#[derive(Debug, Deserialize, Default)]
struct RawSchemaList {
    #[serde(rename = "schema", default)]
    schema: Vec<RawSchema>,
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    key: String,
    owner: Option<String>,
    #[serde(rename = "type")]
    value_type: Option<String>,
    list_type: Option<String>,
    car_type: Option<String>,
    cdr_type: Option<String>,
    default: Option<String>,
    #[serde(rename = "applyto", default)]
    applyto: Vec<String>,
    #[serde(rename = "locale", default)]
    locale: Vec<RawLocale>,
}

#[derive(Debug, Deserialize)]
struct RawLocale {
    #[serde(rename = "@name")]
    name: Option<String>,
    default: Option<String>,
    short: Option<String>,
    long: Option<String>,
}

fn parse_value_type(s: &str) -> Option<ValueType> {
    match s {
        "int" => Some(ValueType::Int),
        "float" => Some(ValueType::Float),
        "bool" => Some(ValueType::Bool),
        "string" => Some(ValueType::String),
        "list" => Some(ValueType::List),
        "pair" => Some(ValueType::Pair),
        "schema" => Some(ValueType::Schema),
        _ => None,
    }
}

/// Parses a bare (non-canonically-encoded) default-value string per
/// the schema's declared type, e.g. `"42"` for an `int` schema or
/// `"[1,2,3]"` for a `list` of `int`.
fn parse_plain_value(
    value_type: ValueType,
    element_type: Option<ValueType>,
    s: &str,
) -> Result<Value, ConfError> {
    match value_type {
        ValueType::Int => s
            .trim()
            .parse::<i32>()
            .map(Value::Int)
            .map_err(|e| ConfError::new(ErrorKind::ParseError, e.to_string())),
        ValueType::Float => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| ConfError::new(ErrorKind::ParseError, e.to_string())),
        ValueType::Bool => match s.trim() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            other => Err(ConfError::new(
                ErrorKind::ParseError,
                format!("invalid boolean default {other:?}"),
            )),
        },
        ValueType::String => Ok(Value::String(s.to_string())),
        ValueType::List => {
            let element_type = element_type.ok_or_else(|| {
                ConfError::new(ErrorKind::ParseError, "list schema missing list_type")
            })?;
            let inner = s.trim().trim_start_matches('[').trim_end_matches(']');
            let items = if inner.is_empty() {
                Vec::new()
            } else {
                inner
                    .split(',')
                    .map(|field| parse_plain_value(element_type, None, field.trim()))
                    .collect::<Result<Vec<_>, _>>()?
            };
            Ok(Value::List { element_type, items })
        }
        other => Err(ConfError::new(
            ErrorKind::ParseError,
            format!("unsupported default-value type {other:?}"),
        )),
    }
}

/// Parses a schema installation XML file, grounded on `gconftool.c`'s
/// `process_schema`/`process_locale_info`.
///
/// A `<schema>` is skipped (with a `tracing` warning when the
/// `tracing` feature is enabled) if it has no resolvable `<type>`. A
/// `<locale>` missing its `name` attribute, or duplicating an
/// already-seen locale name, is skipped. A `<schema>` with zero
/// surviving `<locale>` blocks is rejected outright: spec.md §6
/// requires at least one.
pub fn load_schema_file(path: impl AsRef<Path>) -> Result<Vec<InstalledSchema>, ConfError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| ConfError::new(ErrorKind::ParseError, format!("{}: {e}", path.display())))?;
    parse_schema_file(&text)
}

/// As [`load_schema_file`], but over an in-memory string (used by tests
/// and by callers that already have the document, e.g. fetched over
/// the network by a higher layer).
pub fn parse_schema_file(text: &str) -> Result<Vec<InstalledSchema>, ConfError> {
    let raw: RawFile = quick_xml::de::from_str(text)
        .map_err(|e| ConfError::new(ErrorKind::ParseError, e.to_string()))?;

    let mut out = Vec::new();
    for schema in raw.schemalist.schema {
        let Some(value_type) = schema.value_type.as_deref().and_then(parse_value_type) else {
            warn(&format!("schema {:?} has no resolvable <type>, skipping", schema.key));
            continue;
        };
        let list_element_type = schema.list_type.as_deref().and_then(parse_value_type);
        let car_type = schema.car_type.as_deref().and_then(parse_value_type);
        let cdr_type = schema.cdr_type.as_deref().and_then(parse_value_type);

        let global_default = match &schema.default {
            Some(s) => match parse_plain_value(value_type, list_element_type, s) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn(&format!("schema {:?} has invalid <default>: {e}", schema.key));
                    None
                }
            },
            None => None,
        };

        let mut seen_locales = std::collections::HashSet::new();
        let mut locales = Vec::new();
        for raw_locale in schema.locale {
            let Some(name) = raw_locale.name else {
                warn(&format!("schema {:?} has a <locale> with no name attribute, skipping", schema.key));
                continue;
            };
            if !seen_locales.insert(name.clone()) {
                warn(&format!("schema {:?} has duplicate locale {name:?}, skipping", schema.key));
                continue;
            }
            let default = match raw_locale.default {
                Some(s) => match parse_plain_value(value_type, list_element_type, &s) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        warn(&format!(
                            "schema {:?} locale {name:?} has invalid <default>: {e}",
                            schema.key
                        ));
                        None
                    }
                },
                None => None,
            };
            locales.push(LocaleVariant {
                name,
                short_desc: raw_locale.short.unwrap_or_default(),
                long_desc: raw_locale.long.unwrap_or_default(),
                default,
            });
        }

        if locales.is_empty() {
            return Err(ConfError::new(
                ErrorKind::ParseError,
                format!("schema {:?} has no valid <locale> block (at least one is required)", schema.key),
            ));
        }

        out.push(InstalledSchema {
            key: schema.key,
            owner: schema.owner.unwrap_or_default(),
            value_type,
            list_element_type,
            car_type,
            cdr_type,
            global_default,
            applyto: schema.applyto,
            locales,
        });
    }
    Ok(out)
}

#[cfg(feature = "tracing")]
fn warn(message: &str) {
    tracing::warn!("{message}");
}

#[cfg(not(feature = "tracing"))]
fn warn(_message: &str) {}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
<gconfschemafile>
  <schemalist>
    <schema>
      <key>/schemas/apps/foo/color</key>
      <owner>foo</owner>
      <type>string</type>
      <default>red</default>
      <applyto>/apps/foo/color</applyto>
      <locale name="C">
        <default>red</default>
        <short>Color</short>
        <long>The foreground color.</long>
      </locale>
      <locale name="fr">
        <default>rouge</default>
        <short>Couleur</short>
        <long>La couleur du premier plan.</long>
      </locale>
    </schema>
  </schemalist>
</gconfschemafile>
"#;

    #[test]
    fn parses_sample_file() {
        let schemas = parse_schema_file(SAMPLE).unwrap();
        assert_eq!(schemas.len(), 1);
        let s = &schemas[0];
        assert_eq!(s.key, "/schemas/apps/foo/color");
        assert_eq!(s.applyto, vec!["/apps/foo/color".to_string()]);
        assert_eq!(s.locales.len(), 2);
        let per_locale = s.per_locale();
        assert_eq!(per_locale.len(), 2);
        let en = per_locale.iter().find(|s| s.locale == "C").unwrap();
        assert_eq!(en.default_value.as_deref(), Some(&Value::String("red".into())));
        let fr = per_locale.iter().find(|s| s.locale == "fr").unwrap();
        assert_eq!(fr.default_value.as_deref(), Some(&Value::String("rouge".into())));
    }

    #[test]
    fn schema_without_locale_is_rejected() {
        let xml = r#"
<gconfschemafile><schemalist><schema>
  <key>/schemas/x</key>
  <type>int</type>
</schema></schemalist></gconfschemafile>
"#;
        let err = parse_schema_file(xml).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);
    }

    #[test]
    fn schema_without_type_is_skipped_not_fatal() {
        let xml = r#"
<gconfschemafile><schemalist>
<schema>
  <key>/schemas/bad</key>
  <locale name="C"><short>s</short><long>l</long></locale>
</schema>
<schema>
  <key>/schemas/good</key>
  <type>bool</type>
  <locale name="C"><short>s</short><long>l</long></locale>
</schema>
</schemalist></gconfschemafile>
"#;
        let schemas = parse_schema_file(xml).unwrap();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].key, "/schemas/good");
    }

    #[test]
    fn list_default_parses_elements() {
        let xml = r#"
<gconfschemafile><schemalist><schema>
  <key>/schemas/list</key>
  <type>list</type>
  <list_type>int</list_type>
  <locale name="C">
    <default>[1,2,3]</default>
    <short>s</short><long>l</long>
  </locale>
</schema></schemalist></gconfschemafile>
"#;
        let schemas = parse_schema_file(xml).unwrap();
        let per_locale = schemas[0].per_locale();
        match per_locale[0].default_value.as_deref().unwrap() {
            Value::List { items, .. } => assert_eq!(items.len(), 3),
            _ => panic!("expected list"),
        }
    }
}
