// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Wires the other layers together for one training run.
//
// Rules for this layer:
//   - No tensor math here (that's Layer 5)
//   - No argument parsing or printing (that's Layer 1)
//   - No sockets or file formats (that's Layer 6)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The distributed training workflow
pub mod train_use_case;
