use warden_domain::error::Result;

/// The compression callback: typically a cheap model invocation.
///
/// The compressor and reflector hand it a fully-built prompt and use the
/// returned text as the block body. Implementations live in the runtime
/// (provider-backed) and in tests (closures).
#[async_trait::async_trait]
pub trait Condenser: Send + Sync {
    async fn condense(&self, prompt: &str) -> Result<String>;
}

/// Closure-backed condenser for tests and batch tools.
pub struct FnCondenser<F>(pub F);

#[async_trait::async_trait]
impl<F> Condenser for FnCondenser<F>
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    async fn condense(&self, prompt: &str) -> Result<String> {
        (self.0)(prompt)
    }
}
