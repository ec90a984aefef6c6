//! System prompt assembly.

use warden_domain::error::Result;
use warden_memory::MemoryManager;

/// Static preamble ahead of the memory index block.
const PREAMBLE: &str = "You are a long-running personal agent. Work toward the \
user's mandate, use tools when they help, and say plainly when you are done. \
Recall stored memory before asking the user for facts you may already hold.";

/// Build the system prompt: preamble + the progressive memory index.
pub fn build_system_prompt(memory: &MemoryManager) -> Result<String> {
    let context = memory.load_context()?;
    Ok(format!("{PREAMBLE}\n\n{context}"))
}
