// ============================================================
// Layer 5 — Gradient Synchronization
// ============================================================
// Keeps model replicas on different ranks identical.
//
// Two moments need a collective:
//
//   1. Wrap time: every rank copies rank 0's parameters
//      (broadcast), so all replicas start from the same point
//      even if each rank initialised its own random weights.
//
//   2. Every batch: after the local backward pass, each rank's
//      gradients are replaced by the mean over all ranks
//      (all-reduce). Every rank then applies the same update,
//      so the replicas never drift apart.
//
// Doing (2) once per epoch instead of once per batch would let
// the replicas diverge inside the epoch.
//
// How the tensors travel:
//   Burn's ModuleVisitor walks the parameters in a fixed,
//   deterministic order. We flatten every gradient into one
//   Vec<f32>, hand it to the Collective, then walk the
//   parameters again in the same order to cut the averaged
//   Vec back into tensors.
//
// Reference: Burn Book §3 (Module visitors and mappers)
//            Li et al. (2020) PyTorch Distributed: Experiences
//            on Accelerating Data Parallel Training

use burn::{
    module::{AutodiffModule, ModuleMapper, ModuleVisitor, ParamId},
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::domain::error::{TrainError, TrainResult};
use crate::domain::traits::Collective;

// ─── GradientSync ─────────────────────────────────────────────────────────────
/// The trainer's only view of multi-process communication.
pub trait GradientSync<B: AutodiffBackend> {
    /// Make `model` identical on every rank (rank 0 wins).
    fn broadcast_parameters<M: AutodiffModule<B>>(&mut self, model: M) -> TrainResult<M>;

    /// Average `grads` across ranks. Called once per batch.
    fn synchronize_gradients<M: AutodiffModule<B>>(
        &mut self,
        model: &M,
        grads: GradientsParams,
    ) -> TrainResult<GradientsParams>;
}

/// GradientSync over any Collective transport.
pub struct AllReduceSync<'c> {
    collective: &'c mut dyn Collective,
}

impl<'c> AllReduceSync<'c> {
    pub fn new(collective: &'c mut dyn Collective) -> Self {
        Self { collective }
    }
}

impl<B: AutodiffBackend> GradientSync<B> for AllReduceSync<'_> {
    fn broadcast_parameters<M: AutodiffModule<B>>(&mut self, model: M) -> TrainResult<M> {
        if self.collective.world_size() == 1 {
            return Ok(model);
        }

        let mut flattener = ParamFlattener::default();
        model.visit(&mut flattener);
        let mut flat = flattener.finish()?;

        self.collective.broadcast_from_root(&mut flat)?;

        let mut writer = ParamWriter { flat: &flat, offset: 0 };
        let model = model.map(&mut writer);
        tracing::debug!(
            "Rank {} received {} parameters from rank 0",
            self.collective.rank(),
            flat.len()
        );
        Ok(model)
    }

    fn synchronize_gradients<M: AutodiffModule<B>>(
        &mut self,
        model: &M,
        grads: GradientsParams,
    ) -> TrainResult<GradientsParams> {
        if self.collective.world_size() == 1 {
            return Ok(grads);
        }

        let mut flattener = GradientFlattener { grads: &grads, flat: Vec::new(), error: None };
        model.visit(&mut flattener);
        let mut flat = flattener.finish()?;

        self.collective.all_reduce_mean(&mut flat)?;

        let mut rebuilder = GradientRebuilder {
            source: grads,
            flat:   &flat,
            offset: 0,
            out:    GradientsParams::new(),
        };
        model.visit(&mut rebuilder);
        Ok(rebuilder.out)
    }
}

fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, String> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| format!("{e:?}"))
}

// ─── Parameters ───────────────────────────────────────────────────────────────
#[derive(Default)]
struct ParamFlattener {
    flat:  Vec<f32>,
    error: Option<String>,
}

impl ParamFlattener {
    fn finish(self) -> TrainResult<Vec<f32>> {
        match self.error {
            Some(e) => Err(TrainError::transport(format!("cannot read parameter: {e}"))),
            None    => Ok(self.flat),
        }
    }
}

impl<B: Backend> ModuleVisitor<B> for ParamFlattener {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        match tensor_values(tensor.clone()) {
            Ok(values) => self.flat.extend(values),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
    }
}

struct ParamWriter<'a> {
    flat:   &'a [f32],
    offset: usize,
}

impl<B: Backend> ModuleMapper<B> for ParamWriter<'_> {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let dims = tensor.dims();
        let len: usize = dims.iter().product();
        let Some(values) = self.flat.get(self.offset..self.offset + len) else {
            return tensor;
        };
        self.offset += len;

        let require_grad = tensor.is_require_grad();
        Tensor::<B, D>::from_data(TensorData::new(values.to_vec(), dims), &tensor.device())
            .set_require_grad(require_grad)
    }
}

// ─── Gradients ────────────────────────────────────────────────────────────────
struct GradientFlattener<'a> {
    grads: &'a GradientsParams,
    flat:  Vec<f32>,
    error: Option<String>,
}

impl GradientFlattener<'_> {
    fn finish(self) -> TrainResult<Vec<f32>> {
        match self.error {
            Some(e) => Err(TrainError::transport(format!("cannot read gradient: {e}"))),
            None    => Ok(self.flat),
        }
    }
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientFlattener<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        // Parameters without a gradient are skipped on every rank alike
        let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) else {
            return;
        };
        match tensor_values(grad) {
            Ok(values) => self.flat.extend(values),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
    }
}

struct GradientRebuilder<'a> {
    source: GradientsParams,
    flat:   &'a [f32],
    offset: usize,
    out:    GradientsParams,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientRebuilder<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let Some(grad) = self.source.remove::<B::InnerBackend, D>(id) else {
            return;
        };
        let dims = grad.dims();
        let len: usize = dims.iter().product();
        let Some(values) = self.flat.get(self.offset..self.offset + len) else {
            // Shorter buffer than expected: keep the local gradient
            self.out.register::<B::InnerBackend, D>(id, grad);
            return;
        };
        self.offset += len;

        let averaged = Tensor::<B::InnerBackend, D>::from_data(
            TensorData::new(values.to_vec(), dims),
            &grad.device(),
        );
        self.out.register::<B::InnerBackend, D>(id, averaged);
    }
}
