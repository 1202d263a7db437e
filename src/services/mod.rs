pub mod brief;
pub mod image;
pub mod llm;
pub mod moderation;
pub mod retry;
pub mod script;
pub mod tts;
pub mod video;
pub mod workflow;
