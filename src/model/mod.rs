//! Model module containing GAN architecture components
//!
//! This module provides:
//! - Generator network mapping latent vectors to face images
//! - Discriminator (critic) network with an intermediate feature tap
//! - DCGAN wrapper owning both parameter sets

mod dcgan;
mod discriminator;
mod generator;

use tch::Tensor;

pub use dcgan::DCGAN;
pub use discriminator::{Discriminator, DiscriminatorConfig};
pub use generator::{Generator, GeneratorConfig};

/// Output of one critic pass
#[derive(Debug)]
pub struct NetworkOutput {
    /// `sigmoid(logit)`, shape `[batch, 1]`
    pub probability: Tensor,
    /// Unbounded score, shape `[batch, 1]`
    pub logit: Tensor,
    /// Last hidden feature map, used for feature matching
    pub intermediate: Tensor,
}

/// Anything that scores a batch of NHWC images
pub trait Critic {
    fn inference(&self, images: &Tensor, train: bool) -> NetworkOutput;
}

/// Anything that maps `[batch, z_dim]` latents to NHWC images in `[-1, 1]`
pub trait ImageGenerator {
    fn inference(&self, z: &Tensor, train: bool) -> Tensor;

    /// Same parameters, evaluated deterministically (batch norm in inference mode)
    fn sampler(&self, z: &Tensor) -> Tensor {
        self.inference(z, false)
    }
}
