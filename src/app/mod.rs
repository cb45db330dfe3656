mod controller;
mod orchestrator;

pub use controller::AppController;
pub use orchestrator::FallbackOrchestrator;
