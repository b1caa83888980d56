//! Generation Adapters - 生成服务适配器

mod fake_generation_client;
mod http_generation_client;

pub use fake_generation_client::FakeGenerationClient;
pub use http_generation_client::{HttpGenerationClient, HttpGenerationClientConfig};
