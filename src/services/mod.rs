pub mod chunker;
pub mod extract;
pub mod llm;
pub mod script;
pub mod workflow;
