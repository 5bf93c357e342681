//! AdaDelta, which the training stack does not ship, expressed through its
//! `SimpleOptimizer` extension point so it plugs into the same `Optimizer`
//! seam as the built-in optimizers.

use burn::config::Config;
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::SimpleOptimizer;
use burn::record::Record;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use burn::LearningRate;

/// Configuration for [`AdaDelta`]. Defaults follow the common adadelta
/// parameterization (rho 0.95, epsilon 1e-7).
#[derive(Config)]
pub struct AdaDeltaConfig {
    /// Decay rate of the squared-gradient and squared-update averages.
    #[config(default = 0.95)]
    rho: f64,
    #[config(default = 1e-7)]
    epsilon: f64,
}

impl AdaDeltaConfig {
    pub fn init<B: AutodiffBackend, M: AutodiffModule<B>>(
        &self,
    ) -> OptimizerAdaptor<AdaDelta, M, B> {
        OptimizerAdaptor::from(AdaDelta {
            rho: self.rho,
            epsilon: self.epsilon,
        })
    }
}

#[derive(Clone)]
pub struct AdaDelta {
    rho: f64,
    epsilon: f64,
}

/// Running averages carried between steps, one pair per parameter tensor.
#[derive(Record, Clone)]
pub struct AdaDeltaState<B: Backend, const D: usize> {
    avg_sq_grad: Tensor<B, D>,
    avg_sq_update: Tensor<B, D>,
}

impl<B: Backend> SimpleOptimizer<B> for AdaDelta {
    type State<const D: usize> = AdaDeltaState<B, D>;

    fn step<const D: usize>(
        &self,
        lr: LearningRate,
        tensor: Tensor<B, D>,
        grad: Tensor<B, D>,
        state: Option<Self::State<D>>,
    ) -> (Tensor<B, D>, Self::State<D>) {
        let (avg_sq_grad, avg_sq_update) = match state {
            Some(state) => (state.avg_sq_grad, state.avg_sq_update),
            None => (grad.zeros_like(), grad.zeros_like()),
        };

        let avg_sq_grad = avg_sq_grad
            .mul_scalar(self.rho)
            .add(grad.clone().powf_scalar(2.0).mul_scalar(1.0 - self.rho));
        let update = grad
            .mul(avg_sq_update.clone().add_scalar(self.epsilon).sqrt())
            .div(avg_sq_grad.clone().add_scalar(self.epsilon).sqrt());
        let avg_sq_update = avg_sq_update
            .mul_scalar(self.rho)
            .add(update.clone().powf_scalar(2.0).mul_scalar(1.0 - self.rho));

        let tensor = tensor.sub(update.mul_scalar(lr));
        (
            tensor,
            AdaDeltaState {
                avg_sq_grad,
                avg_sq_update,
            },
        )
    }

    fn to_device<const D: usize>(state: Self::State<D>, device: &B::Device) -> Self::State<D> {
        AdaDeltaState {
            avg_sq_grad: state.avg_sq_grad.to_device(device),
            avg_sq_update: state.avg_sq_update.to_device(device),
        }
    }
}
