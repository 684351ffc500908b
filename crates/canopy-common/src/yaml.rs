//! YAML parsing into `serde_json::Value`
//!
//! Kubeconfig files are YAML; everything downstream works on JSON values so
//! documents can be edited structurally and handed to typed deserializers.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::Error;

/// Parse the first YAML document of `input` into a JSON value.
///
/// Returns `Value::Null` for empty input.
pub fn parse_yaml(input: &str) -> Result<Value, Error> {
    let docs = YamlLoader::load_from_str(input)
        .map_err(|e| Error::serialization(format!("invalid YAML: {}", e)))?;
    match docs.into_iter().next() {
        Some(doc) => to_json(doc),
        None => Ok(Value::Null),
    }
}

/// Parse a YAML document that must be a mapping (e.g. a kubeconfig)
pub fn parse_yaml_mapping(input: &str, kind: &str) -> Result<Value, Error> {
    let value = parse_yaml(input)?;
    if !value.is_object() {
        return Err(Error::serialization_for_kind(
            kind,
            "expected a YAML mapping at the document root",
        ));
    }
    Ok(value)
}

fn to_json(yaml: Yaml) -> Result<Value, Error> {
    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::Number(i.into()),
        Yaml::Real(raw) => {
            let f: f64 = raw
                .parse()
                .map_err(|_| Error::serialization(format!("invalid float '{}'", raw)))?;
            Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Array(items) => Value::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Yaml::Hash(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                let key = match k {
                    Yaml::String(s) | Yaml::Real(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Boolean(b) => b.to_string(),
                    _ => return Err(Error::serialization("unsupported YAML key type")),
                };
                map.insert(key, to_json(v)?);
            }
            Value::Object(map)
        }
        Yaml::Alias(_) => return Err(Error::serialization("YAML aliases not supported")),
        Yaml::BadValue => return Err(Error::serialization("bad YAML value")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kubeconfig_shape() {
        let yaml = r#"
apiVersion: v1
clusters:
- cluster:
    server: https://milo.example.com
    insecure-skip-tls-verify: true
  name: milo
current-context: milo
"#;
        let result = parse_yaml(yaml).unwrap();
        assert_eq!(result["clusters"][0]["name"], "milo");
        assert_eq!(
            result["clusters"][0]["cluster"]["server"],
            "https://milo.example.com"
        );
        assert_eq!(
            result["clusters"][0]["cluster"]["insecure-skip-tls-verify"],
            true
        );
        assert_eq!(result["current-context"], "milo");
    }

    #[test]
    fn test_parse_yaml_empty_is_null() {
        assert_eq!(parse_yaml("").unwrap(), Value::Null);
    }

    #[test]
    fn test_parse_yaml_invalid() {
        assert!(parse_yaml("not: valid: yaml: {{").is_err());
    }

    #[test]
    fn test_mapping_required() {
        let err = parse_yaml_mapping("- a\n- b\n", "kubeconfig").unwrap_err();
        match err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("kubeconfig")),
            other => panic!("expected Serialization, got {other:?}"),
        }
    }
}
