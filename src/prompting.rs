use minijinja::{context, Environment, Value};

use crate::personality::PersonalityMode;
use crate::types::UserRecord;

const WELCOME_TEMPLATE: &str = include_str!("prompts/welcome.j2");
const SETTINGS_TEMPLATE: &str = include_str!("prompts/settings.j2");
const PROFILE_TEMPLATE: &str = include_str!("prompts/profile.j2");
const PREMIUM_TEMPLATE: &str = include_str!("prompts/premium.j2");

const PREMIUM_PRICE: &str = "599 ₽/месяц";
const SUPPORT_CONTACT: &str = "@your_support";
const MISSING_USERNAME: &str = "не указан";

/// Telegram HTML parse mode treats these as markup.
pub fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn render(name: &'static str, source: &'static str, ctx: Value) -> Option<String> {
    let mut env = Environment::new();
    if let Err(err) = env.add_template(name, source) {
        tracing::error!(template = name, error = %err, "template failed to parse");
        return None;
    }
    let template = env.get_template(name).ok()?;
    match template.render(ctx) {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::error!(template = name, error = %err, "template failed to render");
            None
        }
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

pub fn render_welcome(first_name: &str) -> String {
    let first_name = escape_html(first_name);
    render(
        "welcome",
        WELCOME_TEMPLATE,
        context! { first_name => &first_name },
    )
    .unwrap_or_else(|| format!("Привет, {first_name}! 😊💕 Напиши мне что-нибудь, и я отвечу!"))
}

pub fn render_settings(user: &UserRecord) -> String {
    let modes = PersonalityMode::ALL
        .iter()
        .map(|mode| {
            context! {
                name => mode.as_str(),
                label => mode.definition().label,
                premium_only => !mode.is_default(),
            }
        })
        .collect::<Vec<_>>();
    render(
        "settings",
        SETTINGS_TEMPLATE,
        context! {
            mode => user.personality_mode.as_str(),
            is_premium => user.is_premium,
            modes => modes,
            nsfw_enabled => user.nsfw_enabled,
            spicy_level => user.spicy_level,
        },
    )
    .unwrap_or_else(|| {
        format!(
            "⚙️ mode: {}, 18+: {}, level: {}%",
            user.personality_mode,
            on_off(user.nsfw_enabled),
            user.spicy_level
        )
    })
}

pub fn render_profile(user: &UserRecord, first_name: &str, username: Option<&str>) -> String {
    let first_name = escape_html(first_name);
    let username = username
        .filter(|value| !value.is_empty())
        .map(escape_html)
        .unwrap_or_else(|| MISSING_USERNAME.to_string());
    let member_since = user.created_at.format("%d.%m.%Y").to_string();
    render(
        "profile",
        PROFILE_TEMPLATE,
        context! {
            first_name => &first_name,
            username => &username,
            is_premium => user.is_premium,
            member_since => &member_since,
            mode => user.personality_mode.as_str(),
            nsfw_enabled => user.nsfw_enabled,
        },
    )
    .unwrap_or_else(|| {
        format!(
            "👤 {first_name} (@{username}), {}, {member_since}, {}",
            if user.is_premium { "Premium" } else { "Free" },
            user.personality_mode
        )
    })
}

pub fn render_premium() -> String {
    render(
        "premium",
        PREMIUM_TEMPLATE,
        context! { price => PREMIUM_PRICE, support_contact => SUPPORT_CONTACT },
    )
    .unwrap_or_else(|| format!("👑 Premium: {PREMIUM_PRICE}, {SUPPORT_CONTACT}"))
}
