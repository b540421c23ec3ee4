pub mod clustering;
pub mod element;
pub mod fanout;
pub mod fusion;
pub mod geometry;
pub mod grounding;
pub mod matching;
pub mod orchestrator;
pub mod prompts;
pub mod quorum;
pub mod zoom;

pub use element::{LocationResult, UiElement};
pub use fanout::StopSignal;
pub use orchestrator::ElementLocator;
