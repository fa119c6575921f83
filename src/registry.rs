//! Name-based model factories.
//!
//! Models are looked up by the names they are known under in experiment
//! configuration files and built from a JSON object of constructor keyword
//! arguments. Omitted arguments take their defaults.

use burn::prelude::*;

use crate::{
    config::with_defaults,
    error::{PsganError, Result},
    model::{
        discriminator::{NLayerDiscriminator, NLayerDiscriminatorConfig},
        generator::{GeneratorPsganAttention, GeneratorPsganAttentionConfig},
    },
};

pub const DISCRIMINATORS: &[&str] = &["NLayerDiscriminator"];
pub const GENERATORS: &[&str] = &["GeneratorPSGANAttention"];

pub fn build_discriminator<B: Backend>(
    name: &str,
    kwargs: &str,
    device: &B::Device,
) -> Result<NLayerDiscriminator<B>> {
    tracing::debug!(name, kwargs, "building discriminator");
    match name {
        "NLayerDiscriminator" => {
            // `input_nc` has no default.
            let config =
                with_defaults(&NLayerDiscriminatorConfig::new(0), kwargs, &["input_nc"])?;
            config.validate()?;
            Ok(config.init(device))
        }
        _ => Err(unknown("discriminator", name, DISCRIMINATORS)),
    }
}

pub fn build_generator<B: Backend>(
    name: &str,
    kwargs: &str,
    device: &B::Device,
) -> Result<GeneratorPsganAttention<B>> {
    tracing::debug!(name, kwargs, "building generator");
    match name {
        "GeneratorPSGANAttention" => {
            let config = with_defaults(&GeneratorPsganAttentionConfig::new(), kwargs, &[])?;
            config.validate()?;
            Ok(config.init(device))
        }
        _ => Err(unknown("generator", name, GENERATORS)),
    }
}

fn unknown(kind: &'static str, name: &str, available: &[&str]) -> PsganError {
    PsganError::UnknownModel {
        kind,
        name: name.to_string(),
        available: available.join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MyBackend;

    #[test]
    fn builds_registered_discriminator_with_kwargs() {
        let device = Default::default();
        let discriminator = build_discriminator::<MyBackend>(
            "NLayerDiscriminator",
            r#"{"input_nc": 3, "ndf": 4, "n_layers": 2}"#,
            &device,
        )
        .unwrap();

        let input = Tensor::<MyBackend, 4>::zeros([1, 3, 32, 32], &device);
        // 32 -> 16 -> 8 -> 7 -> 6
        assert_eq!(discriminator.forward(input).dims(), [1, 1, 6, 6]);
    }

    #[test]
    fn generator_kwargs_default_when_omitted() {
        let device = Default::default();
        let generator = build_generator::<MyBackend>(
            "GeneratorPSGANAttention",
            r#"{"conv_dim": 2, "repeat_num": 1}"#,
            &device,
        );
        assert!(generator.is_ok());

        let omitted = build_generator::<MyBackend>("GeneratorPSGANAttention", "", &device).unwrap();
        let default = GeneratorPsganAttentionConfig::new().init::<MyBackend>(&device);
        assert_eq!(omitted.num_params(), default.num_params());
    }

    #[test]
    fn discriminator_needs_only_input_channels() {
        let device = Default::default();
        let discriminator =
            build_discriminator::<MyBackend>("NLayerDiscriminator", r#"{"input_nc": 3}"#, &device)
                .unwrap();
        let default = NLayerDiscriminatorConfig::new(3).init::<MyBackend>(&device);

        assert_eq!(discriminator.num_params(), default.num_params());
    }

    #[test]
    fn unknown_name_lists_registered_models() {
        let device = Default::default();
        let err = build_generator::<MyBackend>("ResnetGenerator", "{}", &device).unwrap_err();

        match err {
            PsganError::UnknownModel { kind, available, .. } => {
                assert_eq!(kind, "generator");
                assert_eq!(available, "GeneratorPSGANAttention");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_kwargs_are_reported() {
        let device = Default::default();

        let missing_input = build_discriminator::<MyBackend>("NLayerDiscriminator", "{}", &device);
        assert!(matches!(missing_input, Err(PsganError::Kwargs(_))));

        let zero_depth = build_discriminator::<MyBackend>(
            "NLayerDiscriminator",
            r#"{"input_nc": 3, "n_layers": 0}"#,
            &device,
        );
        assert!(matches!(zero_depth, Err(PsganError::InvalidConfig(_))));
    }
}
