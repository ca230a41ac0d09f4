mod openai;
pub mod prompts;
mod provider;

pub use openai::OpenAiCompatibleGateway;
pub use provider::{ModelGateway, TokenStream, VisionRequest, data_uri};

#[cfg(test)]
pub use provider::MockModelGateway;
