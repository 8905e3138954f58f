pub mod cancellation;
pub mod config;
pub mod dispatch;
pub mod renderer;

pub use cancellation::Cancellation;
pub use config::WorkerConfig;
pub use dispatch::{DispatchOutcome, WorkerState};
pub use renderer::placeholder::PlaceholderRenderer;
pub use renderer::{MemoryResponse, Renderer, RendererRequest};
