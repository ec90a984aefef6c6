//! Provider-backed condense callback.
//!
//! The compressor and reflector take a [`Condenser`]; in production that
//! is a cheap provider invocation whose streamed text becomes the block
//! body.

use std::sync::Arc;

use futures_util::StreamExt;

use warden_context::Condenser;
use warden_domain::error::{Error, Result};
use warden_domain::event::AgentEvent;
use warden_providers::{Provider, ProviderTask};

const SYSTEM_PROMPT: &str =
    "You compress agent context. Reply with the compressed text only.";

pub struct ProviderCondenser {
    provider: Arc<dyn Provider>,
}

impl ProviderCondenser {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl Condenser for ProviderCondenser {
    async fn condense(&self, prompt: &str) -> Result<String> {
        let task = ProviderTask {
            job_id: format!("condense-{}", uuid::Uuid::new_v4()),
            system_prompt: SYSTEM_PROMPT.into(),
            prompt: prompt.to_owned(),
        };

        let mut stream = self.provider.execute(task).await;
        let mut text_buf = String::new();
        let mut done_text: Option<String> = None;
        let mut error: Option<String> = None;
        while let Some(event) = stream.next().await {
            match event.payload {
                AgentEvent::Text { text } => text_buf.push_str(&text),
                AgentEvent::Done { text, .. } => done_text = text,
                AgentEvent::Error { message, .. } => error = Some(message),
                _ => {}
            }
        }

        let text = done_text.unwrap_or(text_buf);
        match (text.is_empty(), error) {
            (false, _) => Ok(text),
            (true, Some(message)) => Err(Error::Provider {
                provider: self.provider.name().to_owned(),
                message,
            }),
            (true, None) => Err(Error::Provider {
                provider: self.provider.name().to_owned(),
                message: "condense call produced no text".into(),
            }),
        }
    }
}
