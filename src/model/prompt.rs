use super::RawCompletion;

pub const ASSISTANT_MARKER: &str = "<|start_header_id|>assistant<|end_header_id|>";

/// Wraps user text in the Llama 3 instruct chat template.
pub fn format_prompt(prompt: &str) -> String {
    format!(
        "<|begin_of_text|><|start_header_id|>user<|end_header_id|>\n\n{prompt}<|eot_id|>{ASSISTANT_MARKER}\n\n"
    )
}

/// Pulls the assistant reply out of a decoded sequence.
///
/// Detokenization does not guarantee the decoded text starts with the exact
/// formatted prompt (special tokens are usually skipped), so the prefix strip
/// only applies on an exact match and the separately decoded continuation is
/// the last resort.
pub fn extract_reply(formatted_prompt: &str, completion: &RawCompletion) -> String {
    if let Some((_, reply)) = completion.full_text.rsplit_once(ASSISTANT_MARKER) {
        return reply.trim().to_string();
    }
    if let Some(reply) = completion.full_text.strip_prefix(formatted_prompt) {
        return reply.trim().to_string();
    }
    completion.continuation.trim().to_string()
}
