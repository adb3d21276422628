pub mod anthropic;
pub mod assembler;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod retry;
pub mod rubric;
pub mod source;
pub mod test_support;

pub use anthropic::AnthropicTransport;
pub use assembler::assemble;
pub use error::{DataUnavailable, GatewayError, PipelineError, PromptError, TransportError};
pub use gateway::{Completion, LlmGateway, ModelResponse, ModelTransport, StopReason};
pub use orchestrator::Orchestrator;
pub use prompts::{ContentPart, PromptCatalog, PromptContext, PromptPayload, SectionInput};
pub use retry::{AttemptState, Clock, RetryMachine, RetryPolicy, TokioClock};
pub use source::{SnapshotSource, StaticSnapshotSource};
