use log::error;

use super::types::{Emission, OutputSink};

/// Prints every emission on standard output, as a text line or as one JSON object.
pub struct StdoutSink {
    json: bool,
}

impl StdoutSink {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Renders an emission the way it is printed, without the trailing newline.
    pub fn render(&self, emission: &Emission) -> Option<String> {
        if self.json {
            return match serde_json::to_string(emission) {
                Ok(line) => Some(line),
                Err(e) => {
                    error!("[{}] unable to serialize emission: {}", emission.session(), e);
                    None
                }
            };
        }

        Some(match emission {
            Emission::Query {
                connection, sql, ..
            } => format!("{} {}", connection.client(), sql),
            Emission::Exchange {
                connection,
                request,
                response,
                ..
            } => format!(
                "{} {} {}{} -> {} ({} bytes)",
                connection.client(),
                request.method,
                request.host().unwrap_or_default(),
                request.path,
                response.status,
                response.body_len
            ),
        })
    }
}

impl OutputSink for StdoutSink {
    fn emit(&self, emission: Emission) {
        if let Some(line) = self.render(&emission) {
            println!("{}", line);
        }
    }
}
