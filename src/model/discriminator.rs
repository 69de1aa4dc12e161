//! Discriminator (critic) network for DCGAN
//!
//! Four stride-2 convolutions with leaky ReLU followed by a linear head. The
//! batch-normalized form is used by the classic variant; the WGAN-GP variant
//! needs per-example gradients and runs without batch norm.

use tch::{nn, nn::Module, Kind, Tensor};

use super::{Critic, NetworkOutput};

/// Leaky ReLU slope used throughout the critic
const LEAK: f64 = 0.2;

/// Discriminator network configuration
#[derive(Debug, Clone)]
pub struct DiscriminatorConfig {
    /// Base number of filters (`dc_dim`)
    pub base_filters: i64,
    /// Input image height
    pub image_height: i64,
    /// Input image width
    pub image_width: i64,
    /// Input channels (1 or 3)
    pub channels: i64,
    /// Batch norm after conv stages 2-4
    pub batch_norm: bool,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            base_filters: 64,
            image_height: 64,
            image_width: 64,
            channels: 3,
            batch_norm: false,
        }
    }
}

/// Discriminator network
#[derive(Debug)]
pub struct Discriminator {
    config: DiscriminatorConfig,
    conv0: nn::Conv2D,
    conv1: nn::Conv2D,
    bn1: Option<nn::BatchNorm>,
    conv2: nn::Conv2D,
    bn2: Option<nn::BatchNorm>,
    conv3: nn::Conv2D,
    bn3: Option<nn::BatchNorm>,
    fc: nn::Linear,
}

impl Discriminator {
    /// Create a new Discriminator network under `vs`
    pub fn new(vs: &nn::Path, config: DiscriminatorConfig) -> Self {
        let df = config.base_filters;

        let down = nn::ConvConfig {
            stride: 2,
            padding: 2,
            ..Default::default()
        };

        let conv0 = nn::conv2d(vs / "d_h0_conv", config.channels, df, 5, down);
        let conv1 = nn::conv2d(vs / "d_h1_conv", df, df * 2, 5, down);
        let conv2 = nn::conv2d(vs / "d_h2_conv", df * 2, df * 4, 5, down);
        let conv3 = nn::conv2d(vs / "d_h3_conv", df * 4, df * 8, 5, down);

        let norm = |name: &str, channels: i64| {
            config
                .batch_norm
                .then(|| nn::batch_norm2d(vs / name, channels, Default::default()))
        };
        let bn1 = norm("d_bn1", df * 2);
        let bn2 = norm("d_bn2", df * 4);
        let bn3 = norm("d_bn3", df * 8);

        let flat = df * 8 * (config.image_height / 16) * (config.image_width / 16);
        let fc = nn::linear(vs / "d_h4_lin", flat, 1, Default::default());

        Self {
            config,
            conv0,
            conv1,
            bn1,
            conv2,
            bn2,
            conv3,
            bn3,
            fc,
        }
    }

    fn stage(x: &Tensor, conv: &nn::Conv2D, bn: Option<&nn::BatchNorm>, train: bool) -> Tensor {
        let x = conv.forward(x);
        let x = match bn {
            Some(bn) => x.apply_t(bn, train),
            None => x,
        };
        leaky_relu(&x)
    }

    /// Score NHWC images, returning probability, logit and the last feature map
    pub fn forward_all(&self, images: &Tensor, train: bool) -> NetworkOutput {
        let x = images.permute([0, 3, 1, 2]).to_kind(Kind::Float);

        let h0 = leaky_relu(&self.conv0.forward(&x));
        let h1 = Self::stage(&h0, &self.conv1, self.bn1.as_ref(), train);
        let h2 = Self::stage(&h1, &self.conv2, self.bn2.as_ref(), train);
        let h3 = Self::stage(&h2, &self.conv3, self.bn3.as_ref(), train);

        let logit = self.fc.forward(&h3.flatten(1, -1));

        NetworkOutput {
            probability: logit.sigmoid(),
            logit,
            intermediate: h3,
        }
    }
}

fn leaky_relu(x: &Tensor) -> Tensor {
    x.maximum(&(x * LEAK))
}

impl Critic for Discriminator {
    fn inference(&self, images: &Tensor, train: bool) -> NetworkOutput {
        self.forward_all(images, train)
    }
}
