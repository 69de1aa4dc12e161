//! Loss functions for the two adversarial variants
//!
//! Both variants share the same critic statistics (`d_loss_real`,
//! `d_loss_fake`, `g_loss`, `fm_loss`) and differ in how they are combined
//! into the two objectives and how the critic is kept Lipschitz.

use serde::{Deserialize, Serialize};
use tch::{Kind, Tensor};

use crate::error::{Error, Result};
use crate::model::{Critic, ImageGenerator, NetworkOutput};
use crate::utils::RunConfig;

/// Adversarial objective variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossVariant {
    /// Weight-clipped critic, generator loss plus feature matching
    Classic,
    /// Gradient-penalized critic, plain generator loss
    WassersteinGp,
}

impl LossVariant {
    /// Critic loss before any penalty: `R - F` (classic) or `F - R` (WGAN-GP)
    pub fn critic_loss(&self, d_loss_real: &Tensor, d_loss_fake: &Tensor) -> Tensor {
        match self {
            LossVariant::Classic => d_loss_real - d_loss_fake,
            LossVariant::WassersteinGp => d_loss_fake - d_loss_real,
        }
    }

    /// Quantity the discriminator optimizer minimizes
    ///
    /// The classic variant maximizes `d_loss`, so its objective is the negation.
    pub fn critic_objective(&self, bundle: &LossBundle) -> Tensor {
        match self {
            LossVariant::Classic => -&bundle.d_loss,
            LossVariant::WassersteinGp => bundle.d_loss.shallow_clone(),
        }
    }

    /// Quantity the generator optimizer minimizes
    pub fn generator_objective(&self, g_loss: &Tensor, fm_loss: &Tensor) -> Tensor {
        match self {
            LossVariant::Classic => g_loss + fm_loss,
            LossVariant::WassersteinGp => g_loss.shallow_clone(),
        }
    }

    pub fn uses_weight_clipping(&self) -> bool {
        matches!(self, LossVariant::Classic)
    }

    pub fn uses_gradient_penalty(&self) -> bool {
        matches!(self, LossVariant::WassersteinGp)
    }

    /// The classic critic is batch-normalized; the penalized one cannot be
    pub fn uses_batch_norm_critic(&self) -> bool {
        matches!(self, LossVariant::Classic)
    }

    /// Feature matching compares real statistics, so the generator update needs a real batch
    pub fn generator_needs_real_batch(&self) -> bool {
        matches!(self, LossVariant::Classic)
    }

    pub fn name(&self) -> &'static str {
        match self {
            LossVariant::Classic => "classic",
            LossVariant::WassersteinGp => "wasserstein_gp",
        }
    }
}

/// Scalar loss tensors of one evaluation
#[derive(Debug)]
pub struct LossBundle {
    /// `mean(logit_real)`
    pub d_loss_real: Tensor,
    /// `mean(logit_fake)`
    pub d_loss_fake: Tensor,
    /// Variant-specific critic loss, penalty included
    pub d_loss: Tensor,
    /// `-mean(logit_fake)`
    pub g_loss: Tensor,
    /// Feature matching term
    pub fm_loss: Tensor,
    /// Unweighted gradient penalty, WGAN-GP only
    pub gradient_penalty: Option<Tensor>,
}

impl LossBundle {
    /// Fold a gradient penalty into `d_loss` with weight `lambda`
    pub fn with_gradient_penalty(mut self, penalty: Tensor, lambda: f64) -> Self {
        self.d_loss = &self.d_loss + &penalty * lambda;
        self.gradient_penalty = Some(penalty);
        self
    }

    /// Read every loss back as `f64`
    pub fn values(&self) -> LossValues {
        LossValues {
            d_loss: self.d_loss.double_value(&[]),
            d_loss_real: self.d_loss_real.double_value(&[]),
            d_loss_fake: self.d_loss_fake.double_value(&[]),
            g_loss: self.g_loss.double_value(&[]),
            fm_loss: self.fm_loss.double_value(&[]),
            gradient_penalty: self.gradient_penalty.as_ref().map(|gp| gp.double_value(&[])),
        }
    }
}

/// Host-side copy of a [`LossBundle`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LossValues {
    pub d_loss: f64,
    pub d_loss_real: f64,
    pub d_loss_fake: f64,
    pub g_loss: f64,
    pub fm_loss: f64,
    pub gradient_penalty: Option<f64>,
}

impl LossValues {
    pub fn is_finite(&self) -> bool {
        [self.d_loss, self.d_loss_real, self.d_loss_fake, self.g_loss, self.fm_loss]
            .iter()
            .chain(self.gradient_penalty.iter())
            .all(|v| v.is_finite())
    }
}

impl std::fmt::Display for LossValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "d_loss={}, d_loss_real={}, d_loss_fake={}, g_loss={}, fm_loss={}",
            self.d_loss, self.d_loss_real, self.d_loss_fake, self.g_loss, self.fm_loss
        )?;
        if let Some(gp) = self.gradient_penalty {
            write!(f, ", gradient_penalty={}", gp)?;
        }
        Ok(())
    }
}

/// Feature matching loss
///
/// `rate * ||mean_b(real) - mean_b(fake)||^2 / 2`, where the means are taken
/// over the batch axis of the critic's intermediate activations.
pub fn feature_matching_loss(inter_real: &Tensor, inter_fake: &Tensor, rate: f64) -> Tensor {
    let real_mean = inter_real.mean_dim(&[0i64][..], false, Kind::Float);
    let fake_mean = inter_fake.mean_dim(&[0i64][..], false, Kind::Float);
    (real_mean - fake_mean).square().sum(Kind::Float) * 0.5 * rate
}

/// Critic statistics shared by both variants, without any gradient penalty
pub fn adversarial_losses(
    variant: LossVariant,
    real: &NetworkOutput,
    fake: &NetworkOutput,
    fm_rate: f64,
) -> LossBundle {
    let d_loss_real = real.logit.mean(Kind::Float);
    let d_loss_fake = fake.logit.mean(Kind::Float);
    let g_loss = -&d_loss_fake;
    let fm_loss = feature_matching_loss(&real.intermediate, &fake.intermediate, fm_rate);
    let d_loss = variant.critic_loss(&d_loss_real, &d_loss_fake);

    LossBundle {
        d_loss_real,
        d_loss_fake,
        d_loss,
        g_loss,
        fm_loss,
        gradient_penalty: None,
    }
}

/// Gradient penalty on random interpolates between real and fake images
///
/// One `alpha ~ U(0, 1)` per example. The penalty stays differentiable with
/// respect to the critic parameters.
pub fn gradient_penalty<C: Critic + ?Sized>(
    critic: &C,
    real: &Tensor,
    fake: &Tensor,
    train: bool,
) -> Tensor {
    let size = real.size();
    let mut alpha_shape = vec![size[0]];
    alpha_shape.resize(size.len(), 1);
    let alpha = Tensor::rand(alpha_shape.as_slice(), (Kind::Float, real.device()));

    let interpolates = (real + &alpha * (fake - real))
        .detach()
        .set_requires_grad(true);
    penalty_at(critic, &interpolates, train)
}

/// `mean((||d logit / d x||_2 - 1)^2)` with the norm taken per example over
/// every non-batch axis of `points`
pub fn penalty_at<C: Critic + ?Sized>(critic: &C, points: &Tensor, train: bool) -> Tensor {
    let logit = critic.inference(points, train).logit;
    let gradients = Tensor::run_backward(&[logit.sum(Kind::Float)], &[points], true, true);
    let slopes = gradients[0]
        .flatten(1, -1)
        .square()
        .sum_dim_intlist(&[1i64][..], false, Kind::Float)
        .sqrt();
    (slopes - 1.0).square().mean(Kind::Float)
}

/// Evaluates both objectives of the configured variant against a generator/critic pair
#[derive(Debug, Clone, Copy)]
pub struct LossEngine {
    variant: LossVariant,
    fm_rate: f64,
    grad_penalty_lambda: f64,
}

impl LossEngine {
    pub fn new(variant: LossVariant, fm_rate: f64, grad_penalty_lambda: f64) -> Self {
        Self {
            variant,
            fm_rate,
            grad_penalty_lambda,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(
            config.model.variant,
            config.training.fm_rate,
            config.training.grad_penalty_lambda,
        )
    }

    pub fn variant(&self) -> LossVariant {
        self.variant
    }

    /// Full loss bundle for a critic update (or a loss report)
    ///
    /// Fake images are detached, so only critic parameters receive gradients.
    pub fn critic_losses<G, C>(
        &self,
        generator: &G,
        critic: &C,
        real: &Tensor,
        z: &Tensor,
        train: bool,
    ) -> Result<LossBundle>
    where
        G: ImageGenerator + ?Sized,
        C: Critic + ?Sized,
    {
        check_batch(real, z)?;
        let fake = generator.inference(z, train).detach();
        let real_out = critic.inference(real, train);
        let fake_out = critic.inference(&fake, train);

        let bundle = adversarial_losses(self.variant, &real_out, &fake_out, self.fm_rate);
        if self.variant.uses_gradient_penalty() {
            let penalty = gradient_penalty(critic, real, &fake, train);
            Ok(bundle.with_gradient_penalty(penalty, self.grad_penalty_lambda))
        } else {
            Ok(bundle)
        }
    }

    /// Generator objective: `g_loss + fm_loss` (classic) or `g_loss` (WGAN-GP)
    ///
    /// `real` is required by the classic variant only.
    pub fn generator_objective<G, C>(
        &self,
        generator: &G,
        critic: &C,
        real: Option<&Tensor>,
        z: &Tensor,
        train: bool,
    ) -> Result<Tensor>
    where
        G: ImageGenerator + ?Sized,
        C: Critic + ?Sized,
    {
        let fake = generator.inference(z, train);
        let fake_out = critic.inference(&fake, train);
        let g_loss = -fake_out.logit.mean(Kind::Float);

        if !self.variant.generator_needs_real_batch() {
            return Ok(self.variant.generator_objective(&g_loss, &g_loss.zeros_like()));
        }

        let real = real.ok_or_else(|| {
            Error::config("classic generator update needs a real batch for feature matching")
        })?;
        check_batch(real, z)?;
        let real_out = critic.inference(real, train);
        let fm_loss =
            feature_matching_loss(&real_out.intermediate, &fake_out.intermediate, self.fm_rate);
        Ok(self.variant.generator_objective(&g_loss, &fm_loss))
    }
}

fn check_batch(real: &Tensor, z: &Tensor) -> Result<()> {
    let (real, latent) = (real.size()[0], z.size()[0]);
    if real != latent {
        return Err(Error::ShapeMismatch { real, latent });
    }
    Ok(())
}
