//! Command dispatcher: turns one inbound chat message into store mutations and
//! outbound notifications.
//!
//! Classification is a case-sensitive prefix match on the first token in a fixed
//! priority order; the first match wins and anything else is a conversational turn.
//! The user record is upserted before classification, and every entitlement decision
//! uses that freshly loaded record (reads) or the requested value (writes).

use std::sync::Arc;

use crate::entitlement::{self, Denial};
use crate::notifier::Notifier;
use crate::personality::PersonalityMode;
use crate::photo::{PhotoPipeline, PhotoPipelineError};
use crate::prompting::{
    escape_html, render_premium, render_profile, render_settings, render_welcome,
};
use crate::responder::ResponseGenerator;
use crate::store::{Store, StoreError};
use crate::types::{InboundMessage, PhotoRequest, Role, SettingsPatch, UserRecord, MAX_SPICY_LEVEL};

/// Messages read back for the reply generator.
pub const HISTORY_WINDOW: usize = 10;

/// Variation sent with `/photo`.
const PHOTO_VARIATION: i64 = 1;

const PHOTO_ACK: &str = "📸 Генерирую фото для тебя, подожди немного...";
const PHOTO_REJECTED: &str = "😔 Извини, не смогла сгенерировать фото. Попробуй позже!";
const PHOTO_ERROR: &str = "😔 Извини, произошла ошибка. Попробуй позже!";
const INVALID_MODE: &str = "❌ Неизвестный режим. Используй: friendly, flirty, playful или spicy";
const INVALID_NSFW: &str = "❌ Неизвестное действие. Используй: /nsfw on или /nsfw off";
const INVALID_SPICY: &str = "❌ Укажи уровень от 0 до 100, например: /spicy 45";
const UPSELL_SUFFIX: &str = "\n\nИспользуй /premium чтобы узнать больше";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Photo,
    Settings,
    Profile,
    Premium,
    Mode(Option<String>),
    Nsfw(Option<String>),
    Spicy(Option<String>),
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    Start,
    Photo,
    Settings,
    Profile,
    Premium,
    Mode,
    Nsfw,
    Spicy,
}

const COMMANDS: [(&str, CommandKind); 8] = [
    ("/start", CommandKind::Start),
    ("/photo", CommandKind::Photo),
    ("/settings", CommandKind::Settings),
    ("/profile", CommandKind::Profile),
    ("/premium", CommandKind::Premium),
    ("/mode", CommandKind::Mode),
    ("/nsfw", CommandKind::Nsfw),
    ("/spicy", CommandKind::Spicy),
];

impl Command {
    pub fn parse(text: &str) -> Self {
        let mut tokens = text.split_whitespace();
        let head = tokens.next().unwrap_or_default();
        let Some(kind) = COMMANDS
            .iter()
            .find(|(prefix, _)| head.starts_with(prefix))
            .map(|(_, kind)| *kind)
        else {
            return Command::Chat;
        };
        let mut argument = || tokens.next().map(str::to_lowercase);
        match kind {
            CommandKind::Start => Command::Start,
            CommandKind::Photo => Command::Photo,
            CommandKind::Settings => Command::Settings,
            CommandKind::Profile => Command::Profile,
            CommandKind::Premium => Command::Premium,
            CommandKind::Mode => Command::Mode(argument()),
            CommandKind::Nsfw => Command::Nsfw(argument()),
            CommandKind::Spicy => Command::Spicy(argument()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Photo => "photo",
            Command::Settings => "settings",
            Command::Profile => "profile",
            Command::Premium => "premium",
            Command::Mode(_) => "mode",
            Command::Nsfw(_) => "nsfw",
            Command::Spicy(_) => "spicy",
            Command::Chat => "chat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Settings,
    Profile,
    Premium,
}

/// What a dispatch did, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Onboarded,
    PhotoRequested,
    PhotoFailed,
    Rendered(View),
    SettingsUpdated(SettingsPatch),
    Denied(Denial),
    InvalidArgument,
    Replied,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn denial_text(denial: Denial, mode: Option<PersonalityMode>) -> String {
    let head = match denial {
        Denial::NsfwPhoto => "🔒 Откровенные фото доступны только в Premium подписке!".to_string(),
        Denial::Mode => format!(
            "🔒 Режим '{}' доступен только в Premium!",
            mode.map(|mode| mode.as_str()).unwrap_or("?")
        ),
        Denial::Nsfw => "🔒 18+ режим доступен только в Premium подписке!".to_string(),
        Denial::SpicyLevel => {
            "🔒 Настройка уровня откровенности доступна только в Premium подписке!".to_string()
        }
    };
    format!("{head}{UPSELL_SUFFIX}")
}

fn parse_switch(value: &str) -> Option<bool> {
    match value {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

pub struct Dispatcher {
    store: Arc<dyn Store>,
    responder: ResponseGenerator,
    photos: Arc<dyn PhotoPipeline>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        responder: ResponseGenerator,
        photos: Arc<dyn PhotoPipeline>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            responder,
            photos,
            notifier,
        }
    }

    pub fn reply_strategy(&self) -> &'static str {
        self.responder.strategy_name()
    }

    pub async fn handle(&self, message: &InboundMessage) -> Result<Action, DispatchError> {
        let user = self
            .store
            .get_or_create_user(
                message.telegram_id,
                &message.first_name,
                message.username.as_deref(),
            )
            .await?;
        let command = Command::parse(&message.text);
        let command_name = command.name();
        let chat_id = message.chat_id;

        let action = match command {
            Command::Start => {
                self.say(chat_id, &render_welcome(&message.first_name)).await;
                Action::Onboarded
            }
            Command::Photo => self.photo(&user, chat_id).await,
            Command::Settings => {
                self.say(chat_id, &render_settings(&user)).await;
                Action::Rendered(View::Settings)
            }
            Command::Profile => {
                let text =
                    render_profile(&user, &message.first_name, message.username.as_deref());
                self.say(chat_id, &text).await;
                Action::Rendered(View::Profile)
            }
            Command::Premium => {
                self.say(chat_id, &render_premium()).await;
                Action::Rendered(View::Premium)
            }
            Command::Mode(argument) => self.set_mode(&user, chat_id, argument.as_deref()).await?,
            Command::Nsfw(argument) => self.set_nsfw(&user, chat_id, argument.as_deref()).await?,
            Command::Spicy(argument) => {
                self.set_spicy(&user, chat_id, argument.as_deref()).await?
            }
            Command::Chat => self.converse(&user, chat_id, &message.text).await?,
        };

        tracing::info!(
            telegram_id = user.telegram_id,
            command = command_name,
            action = ?action,
            "message dispatched"
        );
        Ok(action)
    }

    async fn say(&self, chat_id: i64, text: &str) {
        if !self.notifier.send_text(chat_id, text).await {
            tracing::warn!(chat_id, "reply not delivered");
        }
    }

    async fn photo(&self, user: &UserRecord, chat_id: i64) -> Action {
        if let Err(denial) = entitlement::check_photo(user) {
            self.say(chat_id, &denial_text(denial, None)).await;
            return Action::Denied(denial);
        }

        self.say(chat_id, PHOTO_ACK).await;
        let request = PhotoRequest {
            telegram_id: Some(user.telegram_id),
            chat_id: Some(chat_id),
            style_variation: Some(PHOTO_VARIATION),
        };
        match self.photos.request_photo(&request).await {
            Ok(()) => Action::PhotoRequested,
            Err(err) => {
                tracing::warn!(telegram_id = user.telegram_id, error = %err, "photo pipeline failed");
                let text = match err {
                    PhotoPipelineError::Rejected { .. } => PHOTO_REJECTED,
                    PhotoPipelineError::Transport(_) => PHOTO_ERROR,
                };
                self.say(chat_id, text).await;
                Action::PhotoFailed
            }
        }
    }

    /// Persists a patch that already passed the dispatcher's gate. A refusal from the store
    /// (the persisted premium flag changed underneath us) is reported as a denial.
    async fn apply(
        &self,
        user: &UserRecord,
        chat_id: i64,
        patch: SettingsPatch,
        confirmation: String,
    ) -> Result<Action, DispatchError> {
        match self.store.update_settings(user.telegram_id, &patch).await {
            Ok(_) => {
                self.say(chat_id, &confirmation).await;
                Ok(Action::SettingsUpdated(patch))
            }
            Err(StoreError::Entitlement(denial)) => {
                self.say(chat_id, &denial_text(denial, patch.personality_mode)).await;
                Ok(Action::Denied(denial))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn set_mode(
        &self,
        user: &UserRecord,
        chat_id: i64,
        argument: Option<&str>,
    ) -> Result<Action, DispatchError> {
        let Some(mode) = argument.and_then(PersonalityMode::parse) else {
            self.say(chat_id, INVALID_MODE).await;
            return Ok(Action::InvalidArgument);
        };
        let patch = SettingsPatch::mode(mode);
        if let Err(denial) = entitlement::check_patch(user.is_premium, &patch) {
            self.say(chat_id, &denial_text(denial, Some(mode))).await;
            return Ok(Action::Denied(denial));
        }
        let confirmation = format!("✅ Режим изменен на: {}", mode.definition().label);
        self.apply(user, chat_id, patch, confirmation).await
    }

    async fn set_nsfw(
        &self,
        user: &UserRecord,
        chat_id: i64,
        argument: Option<&str>,
    ) -> Result<Action, DispatchError> {
        if !user.is_premium {
            self.say(chat_id, &denial_text(Denial::Nsfw, None)).await;
            return Ok(Action::Denied(Denial::Nsfw));
        }
        let Some(enabled) = argument.and_then(parse_switch) else {
            self.say(chat_id, INVALID_NSFW).await;
            return Ok(Action::InvalidArgument);
        };
        let confirmation = format!(
            "✅ 18+ режим {}",
            if enabled { "включен 🔥" } else { "выключен" }
        );
        self.apply(user, chat_id, SettingsPatch::nsfw(enabled), confirmation)
            .await
    }

    async fn set_spicy(
        &self,
        user: &UserRecord,
        chat_id: i64,
        argument: Option<&str>,
    ) -> Result<Action, DispatchError> {
        if !user.is_premium {
            self.say(chat_id, &denial_text(Denial::SpicyLevel, None)).await;
            return Ok(Action::Denied(Denial::SpicyLevel));
        }
        let Some(level) = argument
            .and_then(|value| value.trim_end_matches('%').parse::<i32>().ok())
            .filter(|level| (0..=MAX_SPICY_LEVEL).contains(level))
        else {
            self.say(chat_id, INVALID_SPICY).await;
            return Ok(Action::InvalidArgument);
        };
        let confirmation = format!("✅ Уровень откровенности: {level}%");
        self.apply(user, chat_id, SettingsPatch::spicy(level), confirmation)
            .await
    }

    async fn converse(
        &self,
        user: &UserRecord,
        chat_id: i64,
        text: &str,
    ) -> Result<Action, DispatchError> {
        self.store
            .append_message(user.telegram_id, Role::User, text)
            .await?;
        let history = self
            .store
            .recent_messages(user.telegram_id, HISTORY_WINDOW)
            .await?;
        let reply = self
            .responder
            .reply(text, user.personality_mode, &history)
            .await;
        self.store
            .append_message(user.telegram_id, Role::Assistant, &reply)
            .await?;
        // Outbound text uses HTML parse mode; provider output is plain text.
        self.say(chat_id, &escape_html(&reply)).await;
        Ok(Action::Replied)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::notifier::recording::RecordingNotifier;
    use crate::notifier::LogNotifier;
    use crate::responder::scripted::{Script, ScriptedTextProvider};
    use crate::responder::{OpenAiChatProvider, ResponseStrategy, TextProvider, PROVIDER_HISTORY_TURNS};
    use crate::rng::fixed::FixedSequence;
    use crate::store::MemoryStore;

    enum PipelineOutcome {
        Ok,
        Rejected,
        Unreachable,
    }

    struct CountingPipeline {
        outcome: PipelineOutcome,
        calls: Mutex<Vec<PhotoRequest>>,
    }

    impl CountingPipeline {
        fn new(outcome: PipelineOutcome) -> Self {
            Self {
                outcome,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<PhotoRequest> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl PhotoPipeline for CountingPipeline {
        async fn request_photo(&self, request: &PhotoRequest) -> Result<(), PhotoPipelineError> {
            self.calls.lock().unwrap().push(request.clone());
            match self.outcome {
                PipelineOutcome::Ok => Ok(()),
                PipelineOutcome::Rejected => Err(PhotoPipelineError::Rejected { status: 500 }),
                PipelineOutcome::Unreachable => {
                    Err(PhotoPipelineError::Transport("connection refused".into()))
                }
            }
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        photos: Arc<CountingPipeline>,
        dispatcher: Dispatcher,
    }

    fn harness_with(strategy: ResponseStrategy, outcome: PipelineOutcome) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let photos = Arc::new(CountingPipeline::new(outcome));
        let responder =
            ResponseGenerator::new(strategy, Arc::new(FixedSequence::new(vec![0, 1, 2])));
        let dispatcher = Dispatcher::new(store.clone(), responder, photos.clone(), notifier.clone());
        Harness {
            store,
            notifier,
            photos,
            dispatcher,
        }
    }

    fn harness() -> Harness {
        harness_with(ResponseStrategy::CannedFallback, PipelineOutcome::Ok)
    }

    fn inbound(telegram_id: i64, text: &str) -> InboundMessage {
        InboundMessage {
            telegram_id,
            chat_id: telegram_id * 10,
            first_name: "Ann".to_string(),
            username: Some("ann".to_string()),
            text: text.to_string(),
        }
    }

    async fn seed(h: &Harness, telegram_id: i64, premium: bool, nsfw: bool) {
        let mut user = UserRecord::new(telegram_id, "Ann", Some("ann"));
        user.is_premium = premium;
        user.nsfw_enabled = nsfw;
        h.store.put_user(user).await;
    }

    async fn stored(h: &Harness, telegram_id: i64) -> UserRecord {
        h.store.get_user(telegram_id).await.unwrap().unwrap()
    }

    #[test]
    fn commands_match_by_prefix_in_priority_order() {
        assert_eq!(Command::parse("/start"), Command::Start);
        assert_eq!(Command::parse("/start@bot payload"), Command::Start);
        assert_eq!(Command::parse("/photo please"), Command::Photo);
        assert_eq!(Command::parse("/settings"), Command::Settings);
        assert_eq!(Command::parse("/profile"), Command::Profile);
        assert_eq!(Command::parse("/premium"), Command::Premium);
        assert_eq!(
            Command::parse("/mode Flirty extra"),
            Command::Mode(Some("flirty".into()))
        );
        assert_eq!(Command::parse("/mode"), Command::Mode(None));
        assert_eq!(Command::parse("/nsfw on"), Command::Nsfw(Some("on".into())));
        assert_eq!(Command::parse("/nsfw"), Command::Nsfw(None));
        assert_eq!(Command::parse("/spicy 45"), Command::Spicy(Some("45".into())));
        assert_eq!(Command::parse("/START"), Command::Chat);
        assert_eq!(Command::parse("  /start"), Command::Start);
        assert_eq!(Command::parse("hello /start"), Command::Chat);
        assert_eq!(Command::parse(""), Command::Chat);
    }

    #[tokio::test]
    async fn first_message_creates_a_default_record() {
        let h = harness();
        let action = h.dispatcher.handle(&inbound(1, "/start")).await.unwrap();
        assert_eq!(action, Action::Onboarded);
        let user = stored(&h, 1).await;
        assert_eq!(user.personality_mode, PersonalityMode::Friendly);
        assert!(!user.nsfw_enabled);
        assert_eq!(user.spicy_level, 30);
        assert!(!user.is_premium);
        let texts = h.notifier.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("Привет, Ann!"));
    }

    #[tokio::test]
    async fn free_accounts_cannot_switch_to_premium_modes() {
        let h = harness();
        for mode in ["flirty", "playful", "spicy"] {
            let action = h
                .dispatcher
                .handle(&inbound(2, &format!("/mode {mode}")))
                .await
                .unwrap();
            assert_eq!(action, Action::Denied(Denial::Mode));
            assert_eq!(stored(&h, 2).await.personality_mode, PersonalityMode::Friendly);
            assert_eq!(
                h.notifier.last_text().unwrap(),
                format!("🔒 Режим '{mode}' доступен только в Premium!{UPSELL_SUFFIX}")
            );
        }
    }

    #[tokio::test]
    async fn free_accounts_may_reselect_friendly() {
        let h = harness();
        let action = h.dispatcher.handle(&inbound(2, "/mode friendly")).await.unwrap();
        assert_eq!(
            action,
            Action::SettingsUpdated(SettingsPatch::mode(PersonalityMode::Friendly))
        );
        assert_eq!(h.notifier.last_text().unwrap(), "✅ Режим изменен на: Дружелюбная 😊");
    }

    #[tokio::test]
    async fn unknown_or_missing_modes_never_mutate() {
        for premium in [false, true] {
            let h = harness();
            seed(&h, 3, premium, false).await;
            for text in ["/mode bogus", "/mode", "/mode   "] {
                let action = h.dispatcher.handle(&inbound(3, text)).await.unwrap();
                assert_eq!(action, Action::InvalidArgument);
                assert_eq!(h.notifier.last_text().unwrap(), INVALID_MODE);
            }
            assert_eq!(stored(&h, 3).await.personality_mode, PersonalityMode::Friendly);
        }
    }

    #[tokio::test]
    async fn premium_mode_change_ignores_trailing_tokens() {
        let h = harness();
        seed(&h, 4, true, false).await;
        h.dispatcher
            .handle(&inbound(4, "/mode playful right now"))
            .await
            .unwrap();
        assert_eq!(stored(&h, 4).await.personality_mode, PersonalityMode::Playful);
    }

    #[tokio::test]
    async fn premium_nsfw_round_trips() {
        let h = harness();
        seed(&h, 5, true, false).await;

        h.dispatcher.handle(&inbound(5, "/nsfw on")).await.unwrap();
        assert!(stored(&h, 5).await.nsfw_enabled);
        assert_eq!(h.notifier.last_text().unwrap(), "✅ 18+ режим включен 🔥");

        h.dispatcher.handle(&inbound(5, "/nsfw off")).await.unwrap();
        assert!(!stored(&h, 5).await.nsfw_enabled);
        assert_eq!(h.notifier.last_text().unwrap(), "✅ 18+ режим выключен");
    }

    #[tokio::test]
    async fn nsfw_is_denied_to_free_accounts_whatever_the_argument() {
        let h = harness();
        for text in ["/nsfw on", "/nsfw off", "/nsfw", "/nsfw maybe"] {
            let action = h.dispatcher.handle(&inbound(6, text)).await.unwrap();
            assert_eq!(action, Action::Denied(Denial::Nsfw));
        }
        assert!(!stored(&h, 6).await.nsfw_enabled);
    }

    #[tokio::test]
    async fn premium_nsfw_with_bad_argument_is_invalid() {
        let h = harness();
        seed(&h, 7, true, true).await;
        for text in ["/nsfw", "/nsfw maybe"] {
            let action = h.dispatcher.handle(&inbound(7, text)).await.unwrap();
            assert_eq!(action, Action::InvalidArgument);
            assert_eq!(h.notifier.last_text().unwrap(), INVALID_NSFW);
        }
        assert!(stored(&h, 7).await.nsfw_enabled);
    }

    #[tokio::test]
    async fn spicy_level_is_premium_and_range_checked() {
        let h = harness();
        let action = h.dispatcher.handle(&inbound(8, "/spicy 80")).await.unwrap();
        assert_eq!(action, Action::Denied(Denial::SpicyLevel));
        assert_eq!(stored(&h, 8).await.spicy_level, 30);

        let h = harness();
        seed(&h, 8, true, false).await;
        for text in ["/spicy", "/spicy 101", "/spicy -1", "/spicy lots"] {
            let action = h.dispatcher.handle(&inbound(8, text)).await.unwrap();
            assert_eq!(action, Action::InvalidArgument);
        }
        let action = h.dispatcher.handle(&inbound(8, "/spicy 65%")).await.unwrap();
        assert_eq!(action, Action::SettingsUpdated(SettingsPatch::spicy(65)));
        assert_eq!(stored(&h, 8).await.spicy_level, 65);
    }

    #[tokio::test]
    async fn nsfw_photo_without_premium_never_reaches_the_pipeline() {
        let h = harness();
        // Premium lapsed after nsfw was enabled.
        seed(&h, 9, false, true).await;
        let action = h.dispatcher.handle(&inbound(9, "/photo")).await.unwrap();
        assert_eq!(action, Action::Denied(Denial::NsfwPhoto));
        assert!(h.photos.calls().is_empty());
        assert!(h
            .notifier
            .last_text()
            .unwrap()
            .starts_with("🔒 Откровенные фото"));
    }

    #[tokio::test]
    async fn photo_request_carries_identity_chat_and_first_variation() {
        let h = harness();
        let action = h.dispatcher.handle(&inbound(10, "/photo")).await.unwrap();
        assert_eq!(action, Action::PhotoRequested);
        assert_eq!(
            h.photos.calls(),
            vec![PhotoRequest {
                telegram_id: Some(10),
                chat_id: Some(100),
                style_variation: Some(1),
            }]
        );
        assert_eq!(h.notifier.texts(), vec![PHOTO_ACK.to_string()]);
    }

    #[tokio::test]
    async fn photo_pipeline_failures_become_messages() {
        let h = harness_with(ResponseStrategy::CannedFallback, PipelineOutcome::Rejected);
        let action = h.dispatcher.handle(&inbound(11, "/photo")).await.unwrap();
        assert_eq!(action, Action::PhotoFailed);
        assert_eq!(h.notifier.last_text().unwrap(), PHOTO_REJECTED);

        let h = harness_with(ResponseStrategy::CannedFallback, PipelineOutcome::Unreachable);
        let action = h.dispatcher.handle(&inbound(11, "/photo")).await.unwrap();
        assert_eq!(action, Action::PhotoFailed);
        assert_eq!(h.notifier.last_text().unwrap(), PHOTO_ERROR);
    }

    #[tokio::test]
    async fn read_only_views_do_not_mutate() {
        let h = harness();
        seed(&h, 12, false, false).await;
        let before = stored(&h, 12).await;
        for (text, view) in [
            ("/settings", View::Settings),
            ("/profile", View::Profile),
            ("/premium", View::Premium),
        ] {
            let action = h.dispatcher.handle(&inbound(12, text)).await.unwrap();
            assert_eq!(action, Action::Rendered(view));
        }
        let after = stored(&h, 12).await;
        assert_eq!(before.personality_mode, after.personality_mode);
        assert_eq!(before.nsfw_enabled, after.nsfw_enabled);
        assert_eq!(before.spicy_level, after.spicy_level);
        assert!(h.store.recent_messages(12, 10).await.unwrap().is_empty());
        assert_eq!(h.notifier.texts().len(), 3);
    }

    #[tokio::test]
    async fn free_text_records_both_turns_and_replies() {
        let h = harness();
        let action = h.dispatcher.handle(&inbound(13, "hi there")).await.unwrap();
        assert_eq!(action, Action::Replied);
        let history = h.store.recent_messages(13, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "hi there");
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(
            history[1].content,
            PersonalityMode::Friendly.definition().fallback_reply(0)
        );
        assert_eq!(h.notifier.last_text().unwrap(), history[1].content);
    }

    #[tokio::test]
    async fn provider_replies_are_escaped_for_html_delivery() {
        let provider = Arc::new(ScriptedTextProvider::new(Script::Reply(
            "I <3 Tom & Jerry".into(),
        )));
        let h = harness_with(
            ResponseStrategy::ProviderBacked(provider),
            PipelineOutcome::Ok,
        );
        h.dispatcher.handle(&inbound(18, "cartoons?")).await.unwrap();

        assert_eq!(
            h.notifier.last_text().unwrap(),
            "I &lt;3 Tom &amp; Jerry"
        );
        let history = h.store.recent_messages(18, 10).await.unwrap();
        assert_eq!(history[1].content, "I <3 Tom & Jerry");
    }

    #[tokio::test]
    async fn empty_text_is_a_conversational_turn() {
        let h = harness();
        let action = h.dispatcher.handle(&inbound(14, "")).await.unwrap();
        assert_eq!(action, Action::Replied);
        assert_eq!(h.store.recent_messages(14, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn long_conversations_forward_a_bounded_window() {
        let provider = Arc::new(ScriptedTextProvider::new(Script::Reply("ok".into())));
        let h = harness_with(
            ResponseStrategy::ProviderBacked(provider.clone()),
            PipelineOutcome::Ok,
        );
        for n in 0..8 {
            h.dispatcher
                .handle(&inbound(15, &format!("turn {n}")))
                .await
                .unwrap();
        }

        let window = h.store.recent_messages(15, HISTORY_WINDOW).await.unwrap();
        assert_eq!(window.len(), HISTORY_WINDOW);
        assert!(window.windows(2).all(|pair| pair[0].id < pair[1].id));
        assert_eq!(window.last().unwrap().content, "ok");
        assert_eq!(window[window.len() - 2].content, "turn 7");

        let calls = provider.calls();
        assert_eq!(calls.len(), 8);
        let (system, turns) = calls.last().unwrap();
        assert_eq!(system, PersonalityMode::Friendly.definition().system_prompt);
        assert_eq!(turns.len(), PROVIDER_HISTORY_TURNS + 1);
        // The window read for the last turn ends with "turn 7"; its last six entries are
        // forwarded, followed by the new message.
        assert_eq!(turns[PROVIDER_HISTORY_TURNS - 1].content, "turn 7");
        assert_eq!(turns[PROVIDER_HISTORY_TURNS].content, "turn 7");
        assert_eq!(turns[0].content, "ok");
        assert_eq!(turns[1].content, "turn 5");
    }

    #[tokio::test]
    async fn provider_transport_failure_still_records_one_reply() {
        let provider: Arc<dyn TextProvider> = Arc::new(OpenAiChatProvider::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            "sk-test",
            "gpt-4o-mini",
            Duration::from_millis(500),
        ));
        let h = harness_with(ResponseStrategy::ProviderBacked(provider), PipelineOutcome::Ok);
        let action = h.dispatcher.handle(&inbound(16, "hello?")).await.unwrap();
        assert_eq!(action, Action::Replied);

        let history = h.store.recent_messages(16, 10).await.unwrap();
        let assistant = history
            .iter()
            .filter(|message| message.role == Role::Assistant)
            .collect::<Vec<_>>();
        assert_eq!(assistant.len(), 1);
        assert_eq!(
            assistant[0].content,
            PersonalityMode::Friendly.definition().transport_error_reply()
        );
    }

    #[tokio::test]
    async fn undelivered_notifications_do_not_fail_the_dispatch() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            ResponseGenerator::new(
                ResponseStrategy::CannedFallback,
                Arc::new(FixedSequence::new(vec![0])),
            ),
            Arc::new(CountingPipeline::new(PipelineOutcome::Ok)),
            Arc::new(LogNotifier),
        );
        assert_eq!(
            dispatcher.handle(&inbound(17, "/start")).await.unwrap(),
            Action::Onboarded
        );
        assert_eq!(
            dispatcher.handle(&inbound(17, "hey")).await.unwrap(),
            Action::Replied
        );
        assert_eq!(store.recent_messages(17, 10).await.unwrap().len(), 2);
    }
}
