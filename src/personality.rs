//! Personality catalog: the closed set of reply styles a user can pick with `/mode`.
//!
//! Each mode owns a system prompt for the text provider, a display label, an emoji
//! marker used in captions and apologies, and a pool of canned replies used when no
//! provider is configured.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonalityMode {
    #[default]
    Friendly,
    Flirty,
    Playful,
    Spicy,
}

impl PersonalityMode {
    pub const ALL: [PersonalityMode; 4] = [
        PersonalityMode::Friendly,
        PersonalityMode::Flirty,
        PersonalityMode::Playful,
        PersonalityMode::Spicy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PersonalityMode::Friendly => "friendly",
            PersonalityMode::Flirty => "flirty",
            PersonalityMode::Playful => "playful",
            PersonalityMode::Spicy => "spicy",
        }
    }

    /// Strict parse for user input. Returns `None` for anything outside the catalog.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "friendly" => Some(PersonalityMode::Friendly),
            "flirty" => Some(PersonalityMode::Flirty),
            "playful" => Some(PersonalityMode::Playful),
            "spicy" => Some(PersonalityMode::Spicy),
            _ => None,
        }
    }

    /// Lenient parse for persisted values: an unknown mode fails closed to `friendly`.
    pub fn from_stored(value: &str) -> Self {
        Self::parse(value).unwrap_or_else(|| {
            tracing::warn!(stored = value, "unknown personality mode in store, using friendly");
            PersonalityMode::Friendly
        })
    }

    pub fn is_default(&self) -> bool {
        *self == PersonalityMode::Friendly
    }

    pub fn definition(&self) -> &'static PersonalityDefinition {
        match self {
            PersonalityMode::Friendly => &FRIENDLY,
            PersonalityMode::Flirty => &FLIRTY,
            PersonalityMode::Playful => &PLAYFUL,
            PersonalityMode::Spicy => &SPICY,
        }
    }
}

impl std::fmt::Display for PersonalityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct PersonalityDefinition {
    pub mode: PersonalityMode,
    pub system_prompt: &'static str,
    pub label: &'static str,
    pub emoji: &'static str,
    /// Canned replies; `{emoji}` is substituted with the mode's marker.
    pub fallback_replies: &'static [&'static str],
}

impl PersonalityDefinition {
    pub fn fallback_reply(&self, index: usize) -> String {
        let template = self
            .fallback_replies
            .get(index % self.fallback_replies.len().max(1))
            .copied()
            .unwrap_or("{emoji}");
        template.replace("{emoji}", self.emoji)
    }

    pub fn provider_error_reply(&self) -> String {
        format!("Ой, что-то с головой... {} Напиши ещё раз?", self.emoji)
    }

    pub fn transport_error_reply(&self) -> String {
        format!("Прости, задумалась на секунду {}", self.emoji)
    }
}

static FRIENDLY: PersonalityDefinition = PersonalityDefinition {
    mode: PersonalityMode::Friendly,
    system_prompt: "Ты Алина - дружелюбная, милая и поддерживающая девушка 25 лет. Общайся тепло, используй эмоджи 😊💕. Отвечай коротко, как в реальной переписке (1-3 предложения). Задавай встречные вопросы, проявляй интерес к собеседнику.",
    label: "Дружелюбная 😊",
    emoji: "😊💕",
    fallback_replies: &[
        "Привет, милый! {emoji} Как твои дела?",
        "Ой, интересно! Расскажи больше? {emoji}",
        "Понимаю тебя {emoji}",
    ],
};

static FLIRTY: PersonalityDefinition = PersonalityDefinition {
    mode: PersonalityMode::Flirty,
    system_prompt: "Ты Алина - кокетливая, игривая и флиртующая девушка 25 лет. Используй намеки, комплименты, эмоджи 😏💋. Отвечай коротко и заигрывающе (1-3 предложения). Будь немного загадочной.",
    label: "Кокетливая 😏",
    emoji: "😏💋",
    fallback_replies: &[
        "Ммм, интригующе... {emoji}",
        "Ты такой интересный {emoji}",
        "Мне нравится с тобой общаться {emoji}",
    ],
};

static PLAYFUL: PersonalityDefinition = PersonalityDefinition {
    mode: PersonalityMode::Playful,
    system_prompt: "Ты Алина - веселая, озорная и жизнерадостная девушка 25 лет. Используй шутки, эмоджи 😄✨. Отвечай энергично и позитивно (1-3 предложения). Будь спонтанной и веселой.",
    label: "Игривая 😄",
    emoji: "😄✨",
    fallback_replies: &[
        "Ха-ха! {emoji} Весело!",
        "Ого! {emoji} Давай ещё!",
        "Супер! {emoji}",
    ],
};

static SPICY: PersonalityDefinition = PersonalityDefinition {
    mode: PersonalityMode::Spicy,
    system_prompt: "Ты Алина - страстная, откровенная и пошлая девушка 25 лет. Используй сексуальные намеки, двусмысленности, эмоджи 🔥😈. Отвечай провокационно но игриво (1-3 предложения). Будь раскрепощенной.",
    label: "Пошлая 🔥",
    emoji: "🔥😈",
    fallback_replies: &[
        "Становится жарко... {emoji}",
        "Ты меня заводишь {emoji}",
        "Хочешь поиграть? {emoji}",
    ],
};
