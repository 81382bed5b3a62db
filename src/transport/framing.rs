//! Marker-line framing.

/// Line opening a frame
pub const FRAME_START: &str = "[== \"Build Server\" ==[";

/// Line closing a frame
pub const FRAME_END: &str = "]== \"Build Server\" ==]";

/// Wrap one JSON document in marker lines
pub fn encode_frame(json: &str) -> String {
    format!("\n{FRAME_START}\n{json}\n{FRAME_END}\n")
}

/// Line-oriented frame reassembly.
///
/// Text outside a frame is skipped. A start marker inside an open frame
/// discards the partial frame and starts over.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Option<String>,
    skipped: usize,
}

impl FrameDecoder {
    /// Create a decoder outside any frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its terminator); returns a completed frame body
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end_matches('\r');

        if line == FRAME_START {
            if self.buffer.replace(String::new()).is_some() {
                tracing::warn!("Frame start inside an open frame, discarding partial frame");
            }
            return None;
        }
        if line == FRAME_END {
            return match self.buffer.take() {
                Some(body) => Some(body),
                None => {
                    tracing::warn!("Frame end without a frame start");
                    None
                },
            };
        }

        match &mut self.buffer {
            Some(body) => {
                if !body.is_empty() {
                    body.push('\n');
                }
                body.push_str(line);
            },
            None if line.trim().is_empty() => {},
            None => {
                self.skipped += 1;
                tracing::debug!(line, "Ignoring text outside a frame");
            },
        }
        None
    }

    /// Whether a frame is open
    pub fn in_frame(&self) -> bool {
        self.buffer.is_some()
    }

    /// Non-blank lines dropped because they were outside a frame
    pub fn skipped_lines(&self) -> usize {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> (Vec<String>, FrameDecoder) {
        let mut decoder = FrameDecoder::new();
        let frames = text.lines().filter_map(|l| decoder.push_line(l)).collect();
        (frames, decoder)
    }

    #[test]
    fn test_encoded_frame_decodes() {
        let (frames, decoder) = decode(&encode_frame(r#"{"type":"compute"}"#));
        assert_eq!(frames, vec![r#"{"type":"compute"}"#.to_string()]);
        assert!(!decoder.in_frame());
    }

    #[test]
    fn test_multiline_body_and_crlf() {
        let text = format!("{FRAME_START}\r\n{{\r\n\"type\": \"x\"\r\n}}\r\n{FRAME_END}\r\n");
        let (frames, _) = decode(&text);
        assert_eq!(frames, vec!["{\n\"type\": \"x\"\n}".to_string()]);
    }

    #[test]
    fn test_noise_and_restarts() {
        let text = format!(
            "garbage\n{FRAME_END}\n{FRAME_START}\npartial\n{FRAME_START}\n{{}}\n{FRAME_END}\n"
        );
        let (frames, decoder) = decode(&text);
        assert_eq!(frames, vec!["{}".to_string()]);
        assert_eq!(decoder.skipped_lines(), 1);
    }

    #[test]
    fn test_unterminated_frame_stays_open() {
        let (frames, decoder) = decode(&format!("{FRAME_START}\n{{}}\n"));
        assert!(frames.is_empty());
        assert!(decoder.in_frame());
    }
}
