//! Premium gate shared by the dispatcher, the photo service and the stores.

use crate::types::{SettingsPatch, UserRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    NsfwPhoto,
    Mode,
    Nsfw,
    SpicyLevel,
}

/// Photo requests act on the persisted nsfw flag.
pub fn check_photo(user: &UserRecord) -> Result<(), Denial> {
    if user.nsfw_enabled && !user.is_premium {
        return Err(Denial::NsfwPhoto);
    }
    Ok(())
}

/// Checks a requested write against the account's persisted premium flag.
pub fn check_patch(is_premium: bool, patch: &SettingsPatch) -> Result<(), Denial> {
    if is_premium {
        return Ok(());
    }
    if patch.personality_mode.is_some_and(|mode| !mode.is_default()) {
        return Err(Denial::Mode);
    }
    if patch.nsfw_enabled == Some(true) {
        return Err(Denial::Nsfw);
    }
    if patch.spicy_level.is_some() {
        return Err(Denial::SpicyLevel);
    }
    Ok(())
}
