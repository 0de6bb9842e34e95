//! Pure transcript reducers keyed by message id

use super::state::Message;

/// Append `chunk` to the placeholder's text, in place
///
/// Messages other than the placeholder are untouched; an unknown id leaves
/// the transcript as it was.
pub fn apply_chunk(transcript: &[Message], placeholder_id: &str, chunk: &str) -> Vec<Message> {
    transcript
        .iter()
        .map(|m| {
            if m.id == placeholder_id {
                let mut updated = m.clone();
                updated.text.push_str(chunk);
                updated
            } else {
                m.clone()
            }
        })
        .collect()
}

/// Clear the streaming flag on the placeholder, keeping its text
pub fn finalize(transcript: &[Message], placeholder_id: &str) -> Vec<Message> {
    transcript
        .iter()
        .map(|m| {
            if m.id == placeholder_id {
                Message {
                    streaming: false,
                    ..m.clone()
                }
            } else {
                m.clone()
            }
        })
        .collect()
}

pub fn find<'a>(transcript: &'a [Message], id: &str) -> Option<&'a Message> {
    transcript.iter().find(|m| m.id == id)
}
