mod local;
mod loss;
mod optimizer;

pub use local::{DEFAULT_LEARNING_RATE, DEFAULT_TOLERANCE, LocalTrainer};
pub use loss::{BinaryCrossEntropy, sigmoid};
pub use optimizer::{GradientDescent, Optimizer};
