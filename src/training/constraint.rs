//! Lipschitz constraint on the critic
//!
//! The classic variant clips every critic parameter into `[-c, c]` after each
//! critic update. The WGAN-GP variant relies on its penalty term instead and
//! leaves the parameters alone.

use tch::{nn::VarStore, Tensor};

use super::LossVariant;
use crate::utils::RunConfig;

/// How the critic is kept Lipschitz
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LipschitzConstraint {
    /// Clamp every parameter into `[-c, c]`
    WeightClip { c: f64 },
    /// Enforced through the loss; nothing to do on the parameters
    GradientPenalty { lambda: f64 },
}

impl LipschitzConstraint {
    pub fn for_variant(variant: LossVariant, c_param: f64, lambda: f64) -> Self {
        if variant.uses_weight_clipping() {
            LipschitzConstraint::WeightClip { c: c_param }
        } else {
            LipschitzConstraint::GradientPenalty { lambda }
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::for_variant(
            config.model.variant,
            config.training.c_param,
            config.training.grad_penalty_lambda,
        )
    }

    /// Apply to the critic's parameter set
    pub fn enforce(&self, critic_vs: &VarStore) {
        if let LipschitzConstraint::WeightClip { c } = *self {
            clip_parameters(critic_vs, c);
        }
    }
}

/// Clamp every trainable variable of `vs` into `[-c, c]` in place
pub fn clip_parameters(vs: &VarStore, c: f64) {
    tch::no_grad(|| {
        for mut var in vs.trainable_variables() {
            clip_in_place(&mut var, c);
        }
    });
}

fn clip_in_place(tensor: &mut Tensor, c: f64) {
    let _ = tensor.clamp_(-c, c);
}
