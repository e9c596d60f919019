//! Image prompt composition for the photo pipeline.

use crate::rng::RandomSource;

const CHARACTER: &str = "Beautiful 25-year-old woman named Alina, long dark brown hair, blue eyes, attractive face, natural makeup, realistic photo, high quality, professional photography, ";

const QUALITY_TAGS: &str =
    "4K resolution, sharp focus, bokeh background, instagram aesthetic, cinematic lighting";

const CASUAL_OUTFITS: [&str; 5] = [
    "wearing casual jeans and white t-shirt, outdoor park setting, natural daylight, candid pose",
    "in cozy oversized sweater and leggings, home interior, soft window light, relaxed mood",
    "wearing elegant summer dress, city street background, golden hour lighting, walking pose",
    "in sporty outfit, gym or outdoor fitness setting, energetic pose, healthy lifestyle",
    "wearing business casual blazer and pants, office environment, confident professional look",
];

const MEDIUM_OUTFITS: [&str; 5] = [
    "wearing elegant black cocktail dress, restaurant or bar setting, evening atmosphere, sophisticated look",
    "in tight jeans and crop top, rooftop terrace, sunset lighting, casual confidence",
    "wearing stylish swimsuit on beach, ocean background, summer vibes, vacation mood",
    "in short skirt and fitted top, nightclub interior, party atmosphere, dancing pose",
    "wearing silk robe, luxury bedroom, soft intimate lighting, morning mood",
];

const SPICY_OUTFITS: [&str; 5] = [
    "wearing beautiful lace lingerie, bedroom setting, sensual lighting, intimate atmosphere, artistic boudoir photography",
    "in elegant bikini, luxury pool background, seductive pose, vacation luxury mood",
    "wearing satin nightwear, bed with silk sheets, soft romantic lighting, intimate mood",
    "in revealing elegant dress, upscale lounge, dim lighting, confident seductive pose",
    "artistic implied nude style, wrapped in silk fabric, studio lighting, artistic photography",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Casual,
    Medium,
    Spicy,
}

impl Tier {
    pub fn select(nsfw_enabled: bool, spicy_level: i32) -> Self {
        if !nsfw_enabled || spicy_level < 30 {
            Tier::Casual
        } else if spicy_level < 60 {
            Tier::Medium
        } else {
            Tier::Spicy
        }
    }

    pub fn outfits(&self) -> &'static [&'static str] {
        match self {
            Tier::Casual => &CASUAL_OUTFITS,
            Tier::Medium => &MEDIUM_OUTFITS,
            Tier::Spicy => &SPICY_OUTFITS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Casual => "casual",
            Tier::Medium => "medium",
            Tier::Spicy => "spicy",
        }
    }
}

/// How the outfit inside a tier is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variation {
    /// 1-based index that cycles through the tier's list.
    Cycle(i64),
    Random,
}

impl Variation {
    fn index(&self, len: usize, rng: &dyn RandomSource) -> usize {
        match *self {
            Variation::Cycle(n) => {
                let len = len as i64;
                ((n.rem_euclid(len) + len - 1) % len) as usize
            }
            Variation::Random => rng.pick(len),
        }
    }
}

pub fn compose(
    nsfw_enabled: bool,
    spicy_level: i32,
    variation: Variation,
    rng: &dyn RandomSource,
) -> String {
    let outfits = Tier::select(nsfw_enabled, spicy_level).outfits();
    let outfit = outfits[variation.index(outfits.len(), rng)];
    format!("{CHARACTER}{outfit}, {QUALITY_TAGS}")
}
