pub mod intent;
pub mod orchestrator;
pub mod presenter;
pub mod profile;
pub mod prompts;
pub mod sessions;
