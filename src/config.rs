//! JSON overrides layered on top of config defaults.
//!
//! burn's `Config` deserializer requires every field to be present, so partial
//! documents are merged over the serialized defaults before they are parsed.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::error::{self, PsganError};

/// Parses `json` as a partial override of `defaults`.
///
/// Nested objects are merged key by key. Keys listed in `required` have no
/// usable default and must be supplied by `json`. Empty input counts as `{}`.
pub fn with_defaults<C>(defaults: &C, json: &str, required: &[&str]) -> error::Result<C>
where
    C: Serialize + DeserializeOwned,
{
    let mut base = serde_json::to_value(defaults)?;
    if let Value::Object(fields) = &mut base {
        for key in required {
            fields.remove(*key);
        }
    }

    let overrides = match json.trim() {
        "" => Value::Object(Map::new()),
        json => serde_json::from_str(json)?,
    };
    if !overrides.is_object() {
        return Err(PsganError::InvalidConfig(format!(
            "expected a JSON object, got `{overrides}`"
        )));
    }

    merge(&mut base, overrides);
    Ok(serde_json::from_value(base)?)
}

/// Reads a partial config file and merges it over `defaults`.
pub fn load_with_defaults<C, P>(defaults: &C, path: P) -> error::Result<C>
where
    C: Serialize + DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), "loading configuration");
    let json = std::fs::read_to_string(path)?;

    with_defaults(defaults, &json, &[])
}

fn merge(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overrides) => *base = overrides,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GeneratorPsganAttentionConfig, NLayerDiscriminatorConfig, PsganConfig};

    #[test]
    fn omitted_fields_take_their_defaults() {
        let config: NLayerDiscriminatorConfig =
            with_defaults(&NLayerDiscriminatorConfig::new(0), r#"{"input_nc": 3}"#, &["input_nc"])
                .unwrap();

        assert_eq!(config.input_nc, 3);
        assert_eq!(config.ndf, 64);
        assert_eq!(config.n_layers, 3);
    }

    #[test]
    fn required_fields_must_be_given() {
        let missing = with_defaults(&NLayerDiscriminatorConfig::new(0), "{}", &["input_nc"]);
        assert!(matches!(missing, Err(PsganError::Kwargs(_))));
    }

    #[test]
    fn nested_objects_merge_key_by_key() {
        let config = with_defaults(
            &PsganConfig::new(),
            r#"{"generator": {"conv_dim": 8}, "discriminator": {"n_layers": 2}}"#,
            &[],
        )
        .unwrap();

        assert_eq!(config.generator.conv_dim, 8);
        assert_eq!(config.generator.repeat_num, 3);
        assert_eq!(config.discriminator.input_nc, 3);
        assert_eq!(config.discriminator.ndf, 64);
        assert_eq!(config.discriminator.n_layers, 2);
    }

    #[test]
    fn empty_input_is_all_defaults() {
        let config = with_defaults(&GeneratorPsganAttentionConfig::new(), "  ", &[]).unwrap();
        assert_eq!(config.conv_dim, 64);
        assert_eq!(config.repeat_num, 3);
    }

    #[test]
    fn non_object_overrides_are_rejected() {
        let config = with_defaults(&GeneratorPsganAttentionConfig::new(), "[1, 2]", &[]);
        assert!(matches!(config, Err(PsganError::InvalidConfig(_))));
    }

    #[test]
    fn partial_file_loads_over_defaults() {
        let path = std::env::temp_dir().join(format!("psgan-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"generator": {"repeat_num": 1}}"#).unwrap();

        let config = load_with_defaults(&PsganConfig::new(), &path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.generator.repeat_num, 1);
        assert_eq!(config.generator.conv_dim, 64);
        assert_eq!(config.discriminator.n_layers, 3);
    }
}
