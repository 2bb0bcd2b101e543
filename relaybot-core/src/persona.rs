use std::path::Path;

use tracing::{info, warn};

pub const FALLBACK_PERSONA: &str = "You are a helpful Twitch Chatbot.";

/// Reads the persona text from `path`, substituting [`FALLBACK_PERSONA`] when
/// the file is missing, unreadable or blank.
pub fn load_persona(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => {
            info!("Loaded persona from {} ({} chars)", path.display(), text.len());
            text.trim().to_string()
        }
        Ok(_) => {
            warn!("Persona file {} is empty, using fallback persona", path.display());
            FALLBACK_PERSONA.to_string()
        }
        Err(e) => {
            warn!("Could not read persona file {}: {}. Using fallback persona", path.display(), e);
            FALLBACK_PERSONA.to_string()
        }
    }
}
