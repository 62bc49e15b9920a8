// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that touches autodiff lives here.
//
//   model.rs   — the MNIST convolutional network
//                • conv(1→20, 5×5) → ReLU → max-pool(2)
//                • conv(20→50, 5×5) → ReLU → max-pool(2)
//                • linear(800→500) → ReLU → linear(500→10)
//                • log-softmax output, cross-entropy loss
//
//   sync.rs    — keeps replicas identical across ranks
//                Broadcasts rank 0's weights once, then
//                averages gradients after every backward pass.
//
//   trainer.rs — the epoch loop
//                Resumes from a snapshot, runs the remaining
//                epochs, writes snapshots on rank 0.
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            LeCun et al. (1998) Gradient-Based Learning
//            Applied to Document Recognition

/// Convolutional MNIST classifier
pub mod model;

/// Parameter broadcast and gradient all-reduce
pub mod sync;

/// Epoch loop with snapshot resume
pub mod trainer;
