//! DCGAN wrapper combining Generator and Discriminator
//!
//! Each network owns its own `VarStore`; the stores are the explicit parameter
//! partitions each optimizer updates.

use std::collections::HashMap;

use tch::{nn, nn::OptimizerConfig, nn::VarStore, Device, Kind, Tensor};

use super::discriminator::{Discriminator, DiscriminatorConfig};
use super::generator::{Generator, GeneratorConfig};
use crate::error::{Error, Result};
use crate::utils::RunConfig;

/// Complete DCGAN model
pub struct DCGAN {
    /// Generator network
    pub generator: Generator,
    /// Discriminator network
    pub discriminator: Discriminator,
    /// Variable store for generator
    pub gen_vs: VarStore,
    /// Variable store for discriminator
    pub disc_vs: VarStore,
    /// Device (CPU/GPU)
    pub device: Device,
    z_dim: i64,
}

impl DCGAN {
    /// Create a new DCGAN model
    pub fn new(gen_config: GeneratorConfig, disc_config: DiscriminatorConfig, device: Device) -> Self {
        let gen_vs = VarStore::new(device);
        let disc_vs = VarStore::new(device);

        let z_dim = gen_config.z_dim;
        let generator = Generator::new(&gen_vs.root(), gen_config);
        let discriminator = Discriminator::new(&disc_vs.root(), disc_config);

        Self {
            generator,
            discriminator,
            gen_vs,
            disc_vs,
            device,
            z_dim,
        }
    }

    /// Build both networks from the run configuration
    ///
    /// The critic carries batch norm only for the classic variant.
    pub fn from_config(config: &RunConfig, device: Device) -> Self {
        let channels = config.data.image_depth_org as i64;
        let height = config.data.image_height as i64;
        let width = config.data.image_width as i64;

        let gen_config = GeneratorConfig {
            z_dim: config.model.z_dim,
            base_filters: config.model.gc_dim,
            image_height: height,
            image_width: width,
            channels,
        };

        let disc_config = DiscriminatorConfig {
            base_filters: config.model.dc_dim,
            image_height: height,
            image_width: width,
            channels,
            batch_norm: config.model.variant.uses_batch_norm_critic(),
        };

        Self::new(gen_config, disc_config, device)
    }

    /// Draw a latent batch uniformly from `[-1, 1)`
    pub fn sample_latent(&self, batch_size: i64) -> Tensor {
        Tensor::rand([batch_size, self.z_dim], (Kind::Float, self.device)) * 2.0 - 1.0
    }

    /// Latent vector size
    pub fn z_dim(&self) -> i64 {
        self.z_dim
    }

    /// Adam optimizer over the generator parameters
    pub fn gen_optimizer(&self, lr: f64, beta1: f64) -> Result<nn::Optimizer> {
        Ok(adam(beta1).build(&self.gen_vs, lr)?)
    }

    /// Adam optimizer over the discriminator parameters
    pub fn disc_optimizer(&self, lr: f64, beta1: f64) -> Result<nn::Optimizer> {
        Ok(adam(beta1).build(&self.disc_vs, lr)?)
    }

    /// Every variable of both stores, trainable weights and batch norm buffers alike
    pub fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let mut named: Vec<(String, Tensor)> = self
            .gen_vs
            .variables()
            .into_iter()
            .chain(self.disc_vs.variables())
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        named
    }

    /// Copy a full parameter snapshot into both stores
    ///
    /// Every variable must be present with a matching shape; partial restores
    /// are rejected.
    pub fn load_parameters(&mut self, named: Vec<(String, Tensor)>) -> Result<()> {
        let mut source: HashMap<String, Tensor> = named.into_iter().collect();
        let expected = self.gen_vs.variables().len() + self.disc_vs.variables().len();
        if source.len() != expected {
            return Err(Error::CheckpointError(format!(
                "snapshot holds {} tensors, model has {}",
                source.len(),
                expected
            )));
        }

        for (name, mut var) in self.gen_vs.variables().into_iter().chain(self.disc_vs.variables()) {
            let value = source
                .remove(&name)
                .ok_or_else(|| Error::CheckpointError(format!("missing variable {}", name)))?;
            if value.size() != var.size() {
                return Err(Error::CheckpointError(format!(
                    "variable {} has shape {:?}, snapshot has {:?}",
                    name,
                    var.size(),
                    value.size()
                )));
            }
            tch::no_grad(|| var.f_copy_(&value.to_device(self.device)))?;
        }
        Ok(())
    }
}

fn adam(beta1: f64) -> nn::Adam {
    nn::Adam {
        beta1,
        beta2: 0.999,
        wd: 0.0,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::LossVariant;

    fn tiny_config(variant: LossVariant) -> RunConfig {
        let mut config = RunConfig::default();
        config.model.variant = variant;
        config.model.z_dim = 8;
        config.model.gc_dim = 4;
        config.model.dc_dim = 4;
        config.data.image_height = 16;
        config.data.image_width = 16;
        config
    }

    #[test]
    fn test_dcgan_creation() {
        let model = DCGAN::from_config(&tiny_config(LossVariant::WassersteinGp), Device::Cpu);

        let z = model.sample_latent(2);
        assert_eq!(z.size(), vec![2, 8]);

        let fake = tch::no_grad(|| model.generator.forward_t(&z, false));
        assert_eq!(fake.size(), vec![2, 16, 16, 3]);
    }

    #[test]
    fn test_latent_range() {
        let model = DCGAN::from_config(&tiny_config(LossVariant::Classic), Device::Cpu);
        let z = model.sample_latent(64);
        assert!(z.min().double_value(&[]) >= -1.0);
        assert!(z.max().double_value(&[]) < 1.0);
    }

    #[test]
    fn test_parameter_partitions_are_disjoint() {
        let model = DCGAN::from_config(&tiny_config(LossVariant::Classic), Device::Cpu);
        let named = model.named_parameters();

        let gen = named.iter().filter(|(n, _)| n.starts_with("g_")).count();
        let disc = named.iter().filter(|(n, _)| n.starts_with("d_")).count();
        assert_eq!(gen + disc, named.len());
        assert_eq!(gen, model.gen_vs.variables().len());
        assert_eq!(disc, model.disc_vs.variables().len());
    }

    #[test]
    fn test_load_parameters_copies_values() {
        let config = tiny_config(LossVariant::WassersteinGp);
        let source = DCGAN::from_config(&config, Device::Cpu);
        let mut target = DCGAN::from_config(&config, Device::Cpu);

        let snapshot: Vec<(String, Tensor)> = source
            .named_parameters()
            .into_iter()
            .map(|(n, t)| (n, t.detach().copy()))
            .collect();
        target.load_parameters(snapshot).unwrap();

        let target_vars: HashMap<String, Tensor> = target.named_parameters().into_iter().collect();
        for (name, tensor) in source.named_parameters() {
            assert!(tensor.equal(&target_vars[&name]), "mismatch in {}", name);
        }
    }

    #[test]
    fn test_load_parameters_rejects_partial_snapshot() {
        let config = tiny_config(LossVariant::WassersteinGp);
        let source = DCGAN::from_config(&config, Device::Cpu);
        let mut target = DCGAN::from_config(&config, Device::Cpu);

        let mut snapshot = source.named_parameters();
        snapshot.pop();
        assert!(target.load_parameters(snapshot).is_err());
    }
}
