//! Caption sanitization for media messages.
//!
//! Legacy upstream clients echoed the media type into the caption ("Imagem",
//! "'video'", "«Documento»"). When a message carries a media type, a caption
//! that is only such a placeholder is replaced by the empty string. Anything
//! else passes through untouched.
//!
//! `sanitize` is pure and deterministic so the write path and the repair job
//! agree on every row.

use std::collections::HashSet;

/// Built-in placeholder words (Portuguese, English, Spanish).
pub const DEFAULT_BLOCKED_PLACEHOLDERS: &[&str] = &[
    "image", "imagem", "imagen", "photo", "foto", "picture",
    "video", "vídeo", "vídeos", "videos",
    "audio", "áudio", "voice", "ptt", "mensagem de voz", "nota de voz",
    "document", "documento", "arquivo", "archivo", "file", "pdf",
    "sticker", "figurinha", "adesivo",
    "location", "localização", "localizacao", "ubicación",
    "contact", "contato", "contacto", "vcard",
    "media", "mídia", "midia",
];

/// Quote characters stripped from both ends before comparing.
const QUOTE_CHARS: &[char] = &[
    '"', '\'', '`', '«', '»', '“', '”', '‘', '’', '„', '‹', '›',
];

/// Result of running a caption through the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedContent {
    pub content: String,
    /// True if the caption was a blocked placeholder and has been cleared.
    pub rewritten: bool,
}

/// Case- and accent-insensitive blocked-placeholder matcher.
#[derive(Debug, Clone)]
pub struct MediaValidator {
    blocked: HashSet<String>,
}

impl Default for MediaValidator {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

impl MediaValidator {
    /// Built-in placeholders plus `extra` words from configuration.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let blocked = DEFAULT_BLOCKED_PLACEHOLDERS
            .iter()
            .map(|word| normalize(word))
            .chain(extra.into_iter().map(|word| normalize(word.as_ref())))
            .filter(|word| !word.is_empty())
            .collect();
        Self { blocked }
    }

    /// True if `content`, once trimmed, unquoted and folded, is a blocked
    /// placeholder.
    pub fn is_placeholder(&self, content: &str) -> bool {
        let candidate = normalize(content);
        !candidate.is_empty() && self.blocked.contains(&candidate)
    }

    /// Without a media type content passes through unchanged. With one, a
    /// placeholder caption becomes the empty string.
    pub fn sanitize(&self, media_type: Option<&str>, content: &str) -> SanitizedContent {
        if media_type.is_some() && self.is_placeholder(content) {
            SanitizedContent {
                content: String::new(),
                rewritten: true,
            }
        } else {
            SanitizedContent {
                content: content.to_string(),
                rewritten: false,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.blocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }
}

/// Trim, strip surrounding quotes (repeatedly, for `"'image'"`), lowercase
/// and fold accents, so "Vídeo" and "VIDEO" compare equal.
fn normalize(raw: &str) -> String {
    let mut current = raw.trim();
    loop {
        let stripped = current
            .trim_start_matches(QUOTE_CHARS)
            .trim_end_matches(QUOTE_CHARS)
            .trim();
        if stripped.len() == current.len() {
            break;
        }
        current = stripped;
    }
    current
        .chars()
        .flat_map(char::to_lowercase)
        .map(fold_accent)
        .collect()
}

/// Latin letter with its diacritic removed. Expects lowercase input.
pub(crate) fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_with_media_type_is_cleared() {
        let validator = MediaValidator::default();
        let result = validator.sanitize(Some("image"), "Imagem");
        assert_eq!(result.content, "");
        assert!(result.rewritten);
    }

    #[test]
    fn test_content_without_media_type_passes_through() {
        let validator = MediaValidator::default();
        let result = validator.sanitize(None, "Imagem");
        assert_eq!(result.content, "Imagem");
        assert!(!result.rewritten);
    }

    #[test]
    fn test_real_caption_is_kept_verbatim() {
        let validator = MediaValidator::default();
        let caption = "  Foto do contrato assinado ";
        let result = validator.sanitize(Some("image"), caption);
        assert_eq!(result.content, caption);
        assert!(!result.rewritten);
    }

    #[test]
    fn test_quoting_styles_and_case_are_ignored() {
        let validator = MediaValidator::default();
        for caption in [
            "VIDEO", "'vídeo'", "\"Vídeo\"", "`video`", "«Documento»", "“Áudio”", "‘sticker’",
            "  \"'image'\"  ",
        ] {
            assert!(
                validator.is_placeholder(caption),
                "{caption:?} should be treated as a placeholder"
            );
        }
    }

    #[test]
    fn test_accents_are_folded() {
        let validator = MediaValidator::default();
        for caption in ["Audio", "ÁUDIO", "Midia", "MÍDIA", "localizaçao", "Localização", "Vidéo"] {
            assert!(
                validator.is_placeholder(caption),
                "{caption:?} should be treated as a placeholder"
            );
        }

        // Configured words fold too
        let validator = MediaValidator::new(["Ícone"]);
        assert!(validator.is_placeholder("icone"));
        assert!(validator.is_placeholder("'ÍCONE'"));
    }

    #[test]
    fn test_media_type_value_is_not_compared_to_content() {
        // Any placeholder is cleared whatever media type is declared.
        let validator = MediaValidator::default();
        assert_eq!(validator.sanitize(Some("audio"), "Imagem").content, "");
    }

    #[test]
    fn test_empty_and_quote_only_content_is_not_a_placeholder() {
        let validator = MediaValidator::default();
        assert!(!validator.is_placeholder(""));
        assert!(!validator.is_placeholder("''"));
        let result = validator.sanitize(Some("image"), "");
        assert!(!result.rewritten);
    }

    #[test]
    fn test_configured_words_extend_the_builtin_list() {
        let validator = MediaValidator::new(["Anexo", " 'GIF' "]);
        assert!(validator.is_placeholder("anexo"));
        assert!(validator.is_placeholder("gif"));
        assert!(validator.is_placeholder("imagem"));
        assert_eq!(validator.len(), MediaValidator::default().len() + 2);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let validator = MediaValidator::default();
        for caption in ["Vídeo", "oi", "'Imagem'", ""] {
            let once = validator.sanitize(Some("video"), caption);
            let twice = validator.sanitize(Some("video"), &once.content);
            assert_eq!(once.content, twice.content);
            assert!(!twice.rewritten);
        }
    }
}
