//! Generator network for DCGAN
//!
//! Projects a latent vector to a small feature map and upsamples it with four
//! stride-2 transposed convolutions to a full-size image.

use tch::{nn, nn::Module, Tensor};

use super::ImageGenerator;

/// Generator network configuration
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Size of the latent noise vector
    pub z_dim: i64,
    /// Base number of filters (`gc_dim`)
    pub base_filters: i64,
    /// Output image height
    pub image_height: i64,
    /// Output image width
    pub image_width: i64,
    /// Output channels (1 or 3)
    pub channels: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            z_dim: 100,
            base_filters: 64,
            image_height: 64,
            image_width: 64,
            channels: 3,
        }
    }
}

/// Generator network
///
/// Architecture:
/// 1. Dense projection to `[gc*8, H/16, W/16]` with BatchNorm and ReLU
/// 2. Three ConvTranspose2d(k5, s2) layers halving the filters, each with BatchNorm and ReLU
/// 3. Final ConvTranspose2d to the image channels with Tanh
#[derive(Debug)]
pub struct Generator {
    config: GeneratorConfig,
    fc: nn::Linear,
    bn0: nn::BatchNorm,
    deconv1: nn::ConvTranspose2D,
    bn1: nn::BatchNorm,
    deconv2: nn::ConvTranspose2D,
    bn2: nn::BatchNorm,
    deconv3: nn::ConvTranspose2D,
    bn3: nn::BatchNorm,
    deconv4: nn::ConvTranspose2D,
}

impl Generator {
    /// Create a new Generator network under `vs`
    pub fn new(vs: &nn::Path, config: GeneratorConfig) -> Self {
        let gf = config.base_filters;
        let (h0, w0) = (config.image_height / 16, config.image_width / 16);

        let fc = nn::linear(vs / "g_h0_lin", config.z_dim, gf * 8 * h0 * w0, Default::default());
        let bn0 = nn::batch_norm2d(vs / "g_bn0", gf * 8, Default::default());

        // k5 s2 p2 op1 doubles the spatial size exactly
        let up = nn::ConvTransposeConfig {
            stride: 2,
            padding: 2,
            output_padding: 1,
            ..Default::default()
        };

        let deconv1 = nn::conv_transpose2d(vs / "g_h1", gf * 8, gf * 4, 5, up);
        let bn1 = nn::batch_norm2d(vs / "g_bn1", gf * 4, Default::default());
        let deconv2 = nn::conv_transpose2d(vs / "g_h2", gf * 4, gf * 2, 5, up);
        let bn2 = nn::batch_norm2d(vs / "g_bn2", gf * 2, Default::default());
        let deconv3 = nn::conv_transpose2d(vs / "g_h3", gf * 2, gf, 5, up);
        let bn3 = nn::batch_norm2d(vs / "g_bn3", gf, Default::default());
        let deconv4 = nn::conv_transpose2d(vs / "g_h4", gf, config.channels, 5, up);

        Self {
            config,
            fc,
            bn0,
            deconv1,
            bn1,
            deconv2,
            bn2,
            deconv3,
            bn3,
            deconv4,
        }
    }

    /// Forward pass returning NHWC images in `[-1, 1]`
    pub fn forward_t(&self, z: &Tensor, train: bool) -> Tensor {
        let batch = z.size()[0];
        let gf = self.config.base_filters;
        let (h0, w0) = (self.config.image_height / 16, self.config.image_width / 16);

        let x = self
            .fc
            .forward(z)
            .view([batch, gf * 8, h0, w0])
            .apply_t(&self.bn0, train)
            .relu();

        let x = self.deconv1.forward(&x).apply_t(&self.bn1, train).relu();
        let x = self.deconv2.forward(&x).apply_t(&self.bn2, train).relu();
        let x = self.deconv3.forward(&x).apply_t(&self.bn3, train).relu();

        // NCHW -> NHWC
        self.deconv4.forward(&x).tanh().permute([0, 2, 3, 1])
    }
}

impl ImageGenerator for Generator {
    fn inference(&self, z: &Tensor, train: bool) -> Tensor {
        self.forward_t(z, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device, Kind};

    fn small_config() -> GeneratorConfig {
        GeneratorConfig {
            z_dim: 8,
            base_filters: 4,
            image_height: 32,
            image_width: 16,
            channels: 3,
        }
    }

    #[test]
    fn test_generator_output_shape() {
        let vs = VarStore::new(Device::Cpu);
        let gen = Generator::new(&vs.root(), small_config());

        let z = Tensor::randn([2, 8], (Kind::Float, Device::Cpu));
        let out = gen.inference(&z, true);

        assert_eq!(out.size(), vec![2, 32, 16, 3]);
    }

    #[test]
    fn test_generator_output_range() {
        let vs = VarStore::new(Device::Cpu);
        let gen = Generator::new(&vs.root(), small_config());

        let z = Tensor::rand([4, 8], (Kind::Float, Device::Cpu)) * 2.0 - 1.0;
        let out = gen.sampler(&z);

        let max = out.max().double_value(&[]);
        let min = out.min().double_value(&[]);
        assert!(max <= 1.0);
        assert!(min >= -1.0);
    }

    #[test]
    fn test_sampler_is_deterministic() {
        let vs = VarStore::new(Device::Cpu);
        let gen = Generator::new(&vs.root(), small_config());

        let z = Tensor::randn([3, 8], (Kind::Float, Device::Cpu));
        let a = gen.sampler(&z);
        let b = gen.sampler(&z);
        assert!(a.equal(&b));
    }

    #[test]
    fn test_variables_carry_generator_prefix() {
        let vs = VarStore::new(Device::Cpu);
        let _gen = Generator::new(&vs.root(), small_config());
        assert!(vs.variables().keys().all(|name| name.starts_with("g_")));
    }
}
