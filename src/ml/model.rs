use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    prelude::*,
    tensor::activation::log_softmax,
};

use crate::data::batcher::MnistBatch;
use crate::data::dataset::{IMAGE_SIDE, NUM_CLASSES};
use crate::domain::error::{TrainError, TrainResult};

// Spatial size after conv(5) → pool(2) → conv(5) → pool(2) on 28×28
const FEATURE_SIDE: usize = 4;
const CONV2_CHANNELS: usize = 50;
const FLAT_FEATURES: usize = FEATURE_SIDE * FEATURE_SIDE * CONV2_CHANNELS;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct NetConfig {
    #[config(default = 20)]
    pub conv1_channels: usize,
    #[config(default = 500)]
    pub hidden: usize,
}

impl NetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Net<B> {
        Net {
            conv1: Conv2dConfig::new([1, self.conv1_channels], [5, 5]).init(device),
            conv2: Conv2dConfig::new([self.conv1_channels, CONV2_CHANNELS], [5, 5]).init(device),
            pool:  MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            fc1:   LinearConfig::new(FLAT_FEATURES, self.hidden).init(device),
            fc2:   LinearConfig::new(self.hidden, NUM_CLASSES).init(device),
            activation: Relu::new(),
        }
    }
}

/// Two conv/pool stages followed by two fully connected layers.
#[derive(Module, Debug)]
pub struct Net<B: Backend> {
    pub conv1:      Conv2d<B>,
    pub conv2:      Conv2d<B>,
    pub pool:       MaxPool2d,
    pub fc1:        Linear<B>,
    pub fc2:        Linear<B>,
    pub activation: Relu,
}

impl<B: Backend> Net<B> {
    /// images: [batch, 1, 28, 28] → log-probabilities [batch, 10]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, ..] = images.dims();

        let x = self.activation.forward(self.conv1.forward(images)); // [b, 20, 24, 24]
        let x = self.pool.forward(x);                                // [b, 20, 12, 12]
        let x = self.activation.forward(self.conv2.forward(x));      // [b, 50, 8, 8]
        let x = self.pool.forward(x);                                // [b, 50, 4, 4]

        let x = x.reshape([batch_size, FLAT_FEATURES]);
        let x = self.activation.forward(self.fc1.forward(x));
        let x = self.fc2.forward(x);

        log_softmax(x, 1)
    }

    /// Reject batches the forward pass cannot consume.
    pub fn check_batch(batch: &MnistBatch<B>) -> TrainResult<()> {
        let dims = batch.images.dims();
        let [n, ..] = dims;
        let expected = [n, 1, IMAGE_SIDE, IMAGE_SIDE];

        if n == 0 || dims != expected {
            return Err(TrainError::BatchShape {
                expected: expected.to_vec(),
                actual:   dims.to_vec(),
            });
        }
        let [targets] = batch.targets.dims();
        if targets != n {
            return Err(TrainError::BatchShape {
                expected: vec![n],
                actual:   vec![targets],
            });
        }
        Ok(())
    }

    /// Cross-entropy against integer class targets.
    pub fn forward_loss(&self, batch: MnistBatch<B>) -> TrainResult<Tensor<B, 1>> {
        Self::check_batch(&batch)?;
        let output = self.forward(batch.images);
        let ce = CrossEntropyLossConfig::new().init(&output.device());
        Ok(ce.forward(output, batch.targets))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{ndarray::NdArrayDevice, NdArray};

    type TestBackend = NdArray<f32>;

    fn batch(images: Tensor<TestBackend, 4>, n_targets: usize) -> MnistBatch<TestBackend> {
        let targets = Tensor::<TestBackend, 1, Int>::zeros([n_targets], &NdArrayDevice::Cpu);
        MnistBatch { images, targets }
    }

    #[test]
    fn test_forward_output_shape() {
        let device = NdArrayDevice::Cpu;
        let net: Net<TestBackend> = NetConfig::new().init(&device);
        let x = Tensor::<TestBackend, 4>::zeros([3, 1, IMAGE_SIDE, IMAGE_SIDE], &device);
        assert_eq!(net.forward(x).dims(), [3, NUM_CLASSES]);
    }

    #[test]
    fn test_output_rows_are_log_probabilities() {
        let device = NdArrayDevice::Cpu;
        let net: Net<TestBackend> = NetConfig::new().init(&device);
        let x = Tensor::<TestBackend, 4>::ones([2, 1, IMAGE_SIDE, IMAGE_SIDE], &device);
        let sums = net.forward(x).exp().sum_dim(1).into_data().to_vec::<f32>().unwrap();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_loss_is_finite_scalar() {
        let device = NdArrayDevice::Cpu;
        let net: Net<TestBackend> = NetConfig::new().init(&device);
        let x = Tensor::<TestBackend, 4>::zeros([2, 1, IMAGE_SIDE, IMAGE_SIDE], &device);
        let loss: f32 = net.forward_loss(batch(x, 2)).unwrap().into_scalar();
        assert!(loss.is_finite());
    }

    #[test]
    fn test_wrong_image_shape_rejected() {
        let device = NdArrayDevice::Cpu;
        let net: Net<TestBackend> = NetConfig::new().init(&device);
        let x = Tensor::<TestBackend, 4>::zeros([2, 1, 14, 14], &device);
        let err = net.forward_loss(batch(x, 2)).unwrap_err();
        assert!(matches!(err, TrainError::BatchShape { .. }));
    }

    #[test]
    fn test_target_count_mismatch_rejected() {
        let device = NdArrayDevice::Cpu;
        let x = Tensor::<TestBackend, 4>::zeros([2, 1, IMAGE_SIDE, IMAGE_SIDE], &device);
        assert!(Net::<TestBackend>::check_batch(&batch(x, 3)).is_err());
    }
}
