//! Response finalizer.
//!
//! Turns the language service's text into something safe to hand to speech
//! synthesis, substituting fixed phrases for degenerate answers.

use apteka_llm::LlmReply;
use tracing::{debug, info};

/// Punctuation kept by [`sanitize`] besides letters, digits and whitespace.
pub const ALLOWED_PUNCTUATION: [char; 7] = ['.', ',', '!', '?', '"', ':', '-'];

pub const EMPTY_APOLOGY: &str =
    "Простите, я не смог обработать ваш запрос. Пожалуйста, попробуйте еще раз.";
pub const RESTRICTED_APOLOGY: &str =
    "Извините, я не могу обработать этот запрос из-за ограничений.";
pub const NOT_FOUND_APOLOGY: &str =
    "Простите, я не смог найти аптеку по вашему запросу. Пожалуйста, уточните информацию.";
pub const COMPOSE_FAILED_APOLOGY: &str =
    "Простите, я не смог сформировать ответ. Пожалуйста, попробуйте еще раз.";

/// Phrases that mean the service itself could not find anything.
const NOT_FOUND_MARKERS: [&str; 2] = ["не найден", "не могу найти"];

/// Which language-service call produced the text being finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSource {
    /// The first call answered without a tool.
    Direct,
    /// The second call, after a tool result was sent back.
    AfterTool,
}

/// Keep letters, digits, whitespace and [`ALLOWED_PUNCTUATION`].
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || ALLOWED_PUNCTUATION.contains(c))
        .collect()
}

/// True when the text reports that nothing was found.
pub fn says_not_found(text: &str) -> bool {
    let lower = text.to_lowercase();
    NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m))
}

/// Produce the final spoken answer for a reply.
pub fn finalize_answer(reply: &LlmReply, source: AnswerSource) -> String {
    let text = reply.text.trim();

    let chosen = if text.is_empty() {
        if !reply.finish_reason.is_normal() {
            info!(finish_reason = ?reply.finish_reason, "Language service stopped abnormally");
            RESTRICTED_APOLOGY
        } else {
            debug!(?source, "Language service returned empty text");
            match source {
                AnswerSource::Direct => EMPTY_APOLOGY,
                AnswerSource::AfterTool => COMPOSE_FAILED_APOLOGY,
            }
        }
    } else if says_not_found(text) {
        NOT_FOUND_APOLOGY
    } else {
        text
    };

    let clean = sanitize(chosen).trim().to_string();
    if clean.is_empty() {
        EMPTY_APOLOGY.to_string()
    } else {
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apteka_llm::FinishReason;

    // ---- sanitize ----

    #[test]
    fn test_sanitize_keeps_allowed() {
        let text = "Аптека Адель номер 5: Минск, ул. Ленина 10. Телефон - \"123\"! Верно?";
        assert_eq!(sanitize(text), text);
    }

    #[test]
    fn test_sanitize_strips_markup() {
        assert_eq!(sanitize("**Аптека** #5 (Минск)\n"), "Аптека 5 Минск\n");
        assert_eq!(sanitize("тел. +375 17 123-45-67"), "тел. 375 17 123-45-67");
        assert_eq!(sanitize("🙂*_~"), "");
    }

    #[test]
    fn test_sanitize_keeps_non_cyrillic_letters() {
        assert_eq!(sanitize("Café №7"), "Café 7");
    }

    // ---- finalize_answer ----

    #[test]
    fn test_plain_answer_passes_through() {
        let reply = LlmReply::text("Аптека Адель находится на улице Ленина, дом 10.");
        assert_eq!(
            finalize_answer(&reply, AnswerSource::AfterTool),
            "Аптека Адель находится на улице Ленина, дом 10."
        );
    }

    #[test]
    fn test_empty_text_apologies() {
        assert_eq!(finalize_answer(&LlmReply::text("  "), AnswerSource::Direct), EMPTY_APOLOGY);
        assert_eq!(
            finalize_answer(&LlmReply::text(""), AnswerSource::AfterTool),
            COMPOSE_FAILED_APOLOGY
        );
    }

    #[test]
    fn test_abnormal_finish_is_restricted() {
        let mut reply = LlmReply::text("");
        reply.finish_reason = FinishReason::Safety;
        assert_eq!(finalize_answer(&reply, AnswerSource::Direct), RESTRICTED_APOLOGY);

        // Text present wins over the finish reason.
        reply.text = "Ответ.".to_string();
        reply.finish_reason = FinishReason::MaxTokens;
        assert_eq!(finalize_answer(&reply, AnswerSource::Direct), "Ответ.");
    }

    #[test]
    fn test_not_found_phrases() {
        for text in ["Аптека не найдена.", "К сожалению, Я НЕ МОГУ НАЙТИ такую аптеку"] {
            assert_eq!(
                finalize_answer(&LlmReply::text(text), AnswerSource::AfterTool),
                NOT_FOUND_APOLOGY
            );
        }
    }

    #[test]
    fn test_only_disallowed_characters_becomes_apology() {
        assert_eq!(
            finalize_answer(&LlmReply::text("*** ###"), AnswerSource::Direct),
            EMPTY_APOLOGY
        );
    }

    #[test]
    fn test_apologies_survive_sanitize() {
        for phrase in [EMPTY_APOLOGY, RESTRICTED_APOLOGY, NOT_FOUND_APOLOGY, COMPOSE_FAILED_APOLOGY] {
            assert_eq!(sanitize(phrase), phrase);
        }
    }
}
