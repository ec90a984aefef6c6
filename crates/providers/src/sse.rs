//! Shared SSE plumbing for HTTP back-ends.
//!
//! SSE events are `\n\n`-delimited blocks of `event:`/`data:`/`id:`
//! lines; only `data:` payloads matter here. The buffer is drained
//! in-place so a trailing partial event survives to the next chunk.

/// Extract complete `data:` payloads from an SSE buffer.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2); // the \n\n delimiter

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}
