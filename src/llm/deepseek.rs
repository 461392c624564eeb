//! DeepSeek 后端：OpenAI 兼容协议，只有端点与默认模型不同

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// `base_url` 为空时使用官方端点；模型未配置时使用 deepseek-chat
pub fn create_deepseek_client(
    model: Option<&str>,
    base_url: Option<&str>,
    api_key: &str,
) -> OpenAiClient {
    let model = model.filter(|m| !m.trim().is_empty()).unwrap_or(DEEPSEEK_CHAT);
    let base_url = base_url.unwrap_or(DEEPSEEK_BASE_URL);
    tracing::debug!(model, base_url, "creating DeepSeek client");
    OpenAiClient::new(Some(base_url), model, Some(api_key))
}
