/// Length of the prefix of `bytes` that can be emitted now: everything
/// except a codepoint truncated at the very end. Invalid bytes in the middle
/// count as emittable (they decode to U+FFFD).
pub(super) fn utf8_valid_prefix_len(bytes: &[u8]) -> usize {
    let mut at = 0;
    loop {
        match std::str::from_utf8(&bytes[at..]) {
            Ok(_) => return bytes.len(),
            Err(e) => match e.error_len() {
                None => return at + e.valid_up_to(),
                Some(bad) => at += e.valid_up_to() + bad,
            },
        }
    }
}

/// Accumulates token pieces and hands out only complete UTF-8 text, so a
/// codepoint split across two tokens is emitted once, whole.
#[derive(Debug, Default)]
pub(super) struct Utf8Stager {
    staging: Vec<u8>,
}

impl Utf8Stager {
    pub(super) fn new() -> Self {
        Self {
            staging: Vec::with_capacity(64),
        }
    }

    /// Append `piece`; return the newly completed text, if any.
    pub(super) fn push(&mut self, piece: &[u8]) -> Option<String> {
        self.staging.extend_from_slice(piece);
        let valid = utf8_valid_prefix_len(&self.staging);
        if valid == 0 {
            return None;
        }

        let taken: Vec<u8> = self.staging.drain(..valid).collect();
        let text = String::from_utf8_lossy(&taken).into_owned();
        (!text.is_empty()).then_some(text)
    }

    /// Whatever is left at end of stream, lossily decoded.
    pub(super) fn flush(&mut self) -> Option<String> {
        if self.staging.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.staging).into_owned();
        self.staging.clear();
        Some(text)
    }
}
