//! Supported conversation languages.

use serde::{Deserialize, Serialize};

/// The language a resident talks to the concierge in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Es,
}

impl Locale {
    /// Parse a language code. Unknown or empty codes fall back to English.
    pub fn parse(code: &str) -> Self {
        let primary = code.trim().split(['-', '_']).next().unwrap_or_default();
        match primary.to_ascii_lowercase().as_str() {
            "es" => Locale::Es,
            _ => Locale::En,
        }
    }

    /// ISO 639-1 code, as expected by transcription services.
    pub fn code(&self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Es => "es",
        }
    }

    /// Said when the model finishes without producing any answer text.
    pub fn fallback_answer(&self) -> &'static str {
        match self {
            Locale::En => "I'm sorry, I wasn't able to finish that request. Could you try asking again?",
            Locale::Es => "Lo siento, no pude completar esa solicitud. ¿Podrías intentarlo de nuevo?",
        }
    }

    /// Appended when the model fails after the answer has started streaming.
    pub fn interruption_apology(&self) -> &'static str {
        match self {
            Locale::En => "Sorry, something went wrong on my end. Please try again in a moment.",
            Locale::Es => "Lo siento, algo salió mal de mi lado. Por favor, inténtalo de nuevo en un momento.",
        }
    }
}

impl std::fmt::Display for Locale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_and_regional_codes() {
        assert_eq!(Locale::parse("es"), Locale::Es);
        assert_eq!(Locale::parse("ES-mx"), Locale::Es);
        assert_eq!(Locale::parse("en_US"), Locale::En);
    }

    #[test]
    fn unknown_codes_fall_back_to_english() {
        assert_eq!(Locale::parse("fr"), Locale::En);
        assert_eq!(Locale::parse(""), Locale::En);
    }

    #[test]
    fn serde_uses_lowercase_codes() {
        let locale: Locale = serde_json::from_str("\"es\"").unwrap();
        assert_eq!(locale, Locale::Es);
        assert_eq!(serde_json::to_string(&Locale::En).unwrap(), "\"en\"");
    }
}
