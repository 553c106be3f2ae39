pub mod claude;
pub mod gpt;
pub mod invocation;
pub mod llama;
pub mod pipeline;
pub mod rate_gate;
pub mod router;

pub use invocation::{
    InvocationError, InvocationReply, InvocationRequest, ModelInvoker, SamplingParams, ToolSpec, ToolUseCall,
};
pub use pipeline::LlmPipeline;
pub use rate_gate::RateGate;
pub use router::{AdapterRouter, AdapterSlot};

pub use claude::ClaudeAdapter;
pub use gpt::GptAdapter;
pub use llama::LlamaAdapter;
