//! Adam with classic (coupled) L2 weight decay.
//!
//! `candle_nn::AdamW` applies *decoupled* decay. The stage presets here were
//! tuned for the coupled form, where the decay term is folded into the
//! gradient before the moment updates:
//!
//! ```text
//! g  ← ∇θ + λ·θ
//! m  ← β1·m + (1 − β1)·g
//! v  ← β2·v + (1 − β2)·g²
//! θ  ← θ − lr · m̂ / (√v̂ + ε)
//! ```

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::Optimizer;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamsAdam {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for ParamsAdam {
    fn default() -> Self {
        Self { lr: 1e-3, beta1: 0.9, beta2: 0.999, eps: 1e-8, weight_decay: 0.0 }
    }
}

impl ParamsAdam {
    /// Head-only stage: `lr 1e-3`, `weight_decay 1e-5`.
    pub fn head_stage() -> Self {
        Self { lr: 1e-3, weight_decay: 1e-5, ..Self::default() }
    }

    /// Full fine-tuning stage: `lr 1e-4`, no weight decay.
    pub fn full_stage() -> Self {
        Self { lr: 1e-4, weight_decay: 0.0, ..Self::default() }
    }
}

#[derive(Debug)]
struct VarAdam {
    var: Var,
    first_moment: Tensor,
    second_moment: Tensor,
}

/// Adam optimiser over an explicit set of variables.
///
/// Variables that are not handed to the optimiser are never touched, which
/// is how the frozen stage keeps the backbone fixed.
#[derive(Debug)]
pub struct Adam {
    vars: Vec<VarAdam>,
    step_t: usize,
    params: ParamsAdam,
}

impl Adam {
    pub fn params(&self) -> &ParamsAdam {
        &self.params
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn steps_taken(&self) -> usize {
        self.step_t
    }
}

impl Optimizer for Adam {
    type Config = ParamsAdam;

    fn new(vars: Vec<Var>, params: ParamsAdam) -> candle_core::Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let first_moment = var.zeros_like()?;
                let second_moment = var.zeros_like()?;
                Ok(VarAdam { var, first_moment, second_moment })
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { vars, step_t: 0, params })
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr;
    }

    fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        self.step_t += 1;
        let ParamsAdam { lr, beta1, beta2, eps, weight_decay } = self.params;
        let scale_m = 1.0 / (1.0 - beta1.powi(self.step_t as i32));
        let scale_v = 1.0 / (1.0 - beta2.powi(self.step_t as i32));

        for state in self.vars.iter_mut() {
            let theta = state.var.as_tensor();
            let Some(grad) = grads.get(theta) else {
                continue;
            };
            let grad = if weight_decay != 0.0 {
                grad.add(&theta.affine(weight_decay, 0.0)?)?
            } else {
                grad.clone()
            };

            let m = state
                .first_moment
                .affine(beta1, 0.0)?
                .add(&grad.affine(1.0 - beta1, 0.0)?)?
                .detach();
            let v = state
                .second_moment
                .affine(beta2, 0.0)?
                .add(&grad.sqr()?.affine(1.0 - beta2, 0.0)?)?
                .detach();

            let m_hat = m.affine(scale_m, 0.0)?;
            let v_hat = v.affine(scale_v, 0.0)?;
            let update = m_hat.div(&v_hat.sqrt()?.affine(1.0, eps)?)?.affine(lr, 0.0)?;
            state.var.set(&theta.sub(&update)?)?;

            state.first_moment = m;
            state.second_moment = v;
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn var(values: &[f32]) -> Var {
        Var::new(values, &Device::Cpu).unwrap()
    }

    fn values(var: &Var) -> Vec<f32> {
        var.as_tensor().to_vec1().unwrap()
    }

    #[test]
    fn minimises_a_quadratic() {
        let x = var(&[3.0, -2.0]);
        let mut opt = Adam::new(vec![x.clone()], ParamsAdam { lr: 0.1, ..Default::default() }).unwrap();
        for _ in 0..300 {
            let loss = x.as_tensor().sqr().unwrap().sum_all().unwrap();
            opt.backward_step(&loss).unwrap();
        }
        for v in values(&x) {
            assert!(v.abs() < 0.05, "x did not converge: {v}");
        }
        assert_eq!(opt.steps_taken(), 300);
    }

    #[test]
    fn first_step_moves_by_learning_rate() {
        // With bias correction, |Δθ| on step one is lr regardless of gradient scale.
        let x = var(&[1.0]);
        let mut opt = Adam::new(vec![x.clone()], ParamsAdam { lr: 0.01, ..Default::default() }).unwrap();
        let loss = x.as_tensor().affine(50.0, 0.0).unwrap().sum_all().unwrap();
        opt.backward_step(&loss).unwrap();
        assert!((values(&x)[0] - 0.99).abs() < 1e-5);
    }

    #[test]
    fn variables_outside_the_optimizer_are_untouched() {
        let trained = var(&[1.0, 1.0]);
        let frozen = var(&[5.0, 5.0]);
        let mut opt = Adam::new(vec![trained.clone()], ParamsAdam::head_stage()).unwrap();

        let loss = trained
            .as_tensor()
            .mul(frozen.as_tensor())
            .unwrap()
            .sum_all()
            .unwrap();
        opt.backward_step(&loss).unwrap();

        assert_eq!(values(&frozen), vec![5.0, 5.0]);
        assert_ne!(values(&trained), vec![1.0, 1.0]);
    }

    #[test]
    fn weight_decay_pulls_towards_zero() {
        // Zero data gradient: the only force is λ·θ.
        let x = var(&[2.0]);
        let params = ParamsAdam { lr: 0.1, weight_decay: 1.0, ..Default::default() };
        let mut opt = Adam::new(vec![x.clone()], params).unwrap();
        let loss = x.as_tensor().affine(0.0, 0.0).unwrap().sum_all().unwrap();
        opt.backward_step(&loss).unwrap();
        assert!(values(&x)[0] < 2.0);
    }

    #[test]
    fn learning_rate_is_adjustable() {
        let mut opt = Adam::new(vec![var(&[0.0])], ParamsAdam::full_stage()).unwrap();
        assert_eq!(opt.learning_rate(), 1e-4);
        opt.set_learning_rate(2e-5);
        assert_eq!(opt.learning_rate(), 2e-5);
        assert_eq!(opt.num_vars(), 1);
    }

    #[test]
    fn stage_presets() {
        let head = ParamsAdam::head_stage();
        assert_eq!((head.lr, head.weight_decay), (1e-3, 1e-5));
        let full = ParamsAdam::full_stage();
        assert_eq!((full.lr, full.weight_decay), (1e-4, 0.0));
        assert_eq!((full.beta1, full.beta2, full.eps), (0.9, 0.999, 1e-8));
    }
}
