//! Photo generation: the service behind `POST /generate-photo` and the seam the
//! dispatcher's `/photo` command calls it through.
//!
//! The service validates the request, re-reads the user's persisted settings, applies
//! the nsfw gate, composes the prompt, asks the image provider for a URL and relays it
//! to the chat. The image provider never fails; photo delivery is best effort.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::entitlement;
use crate::image::ImageProvider;
use crate::notifier::Notifier;
use crate::photo_prompt::{self, Tier, Variation};
use crate::rng::RandomSource;
use crate::store::{Store, StoreError};
use crate::types::{PhotoRequest, PhotoResponse};

const CAPTIONS: [&str; 4] = [
    "Вот моё фото для тебя {emoji}",
    "Специально для тебя {emoji}",
    "Как тебе? {emoji}",
    "Надеюсь понравится {emoji}",
];

#[derive(Debug, thiserror::Error)]
pub enum PhotoError {
    #[error("telegram_id and chat_id are required")]
    MissingFields,
    #[error("User not found")]
    UserNotFound,
    #[error("NSFW content requires premium subscription")]
    NsfwRequiresPremium,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PhotoError {
    pub fn status_code(&self) -> u16 {
        match self {
            PhotoError::MissingFields => 400,
            PhotoError::UserNotFound => 404,
            PhotoError::NsfwRequiresPremium => 403,
            PhotoError::Store(_) => 500,
        }
    }
}

pub struct PhotoService {
    store: Arc<dyn Store>,
    images: Arc<dyn ImageProvider>,
    notifier: Arc<dyn Notifier>,
    rng: Arc<dyn RandomSource>,
}

impl PhotoService {
    pub fn new(
        store: Arc<dyn Store>,
        images: Arc<dyn ImageProvider>,
        notifier: Arc<dyn Notifier>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            store,
            images,
            notifier,
            rng,
        }
    }

    pub async fn generate(&self, request: &PhotoRequest) -> Result<PhotoResponse, PhotoError> {
        let (telegram_id, chat_id) = match (request.telegram_id, request.chat_id) {
            (Some(telegram_id), Some(chat_id)) if telegram_id != 0 && chat_id != 0 => {
                (telegram_id, chat_id)
            }
            _ => return Err(PhotoError::MissingFields),
        };

        let user = self
            .store
            .get_user(telegram_id)
            .await?
            .ok_or(PhotoError::UserNotFound)?;
        entitlement::check_photo(&user).map_err(|_| PhotoError::NsfwRequiresPremium)?;

        let variation = request
            .style_variation
            .map(Variation::Cycle)
            .unwrap_or(Variation::Random);
        let prompt = photo_prompt::compose(
            user.nsfw_enabled,
            user.spicy_level,
            variation,
            self.rng.as_ref(),
        );
        let photo_url = self.images.generate(&prompt).await;

        let emoji = user.personality_mode.definition().emoji;
        let caption = CAPTIONS[self.rng.pick(CAPTIONS.len())].replace("{emoji}", emoji);
        if !self.notifier.send_photo(chat_id, &photo_url, &caption).await {
            tracing::warn!(telegram_id, chat_id, "photo was generated but not delivered");
        }
        tracing::info!(
            telegram_id,
            tier = Tier::select(user.nsfw_enabled, user.spicy_level).as_str(),
            spicy_level = user.spicy_level,
            "photo generated"
        );

        Ok(PhotoResponse {
            success: true,
            photo_url,
            prompt_used: prompt,
            nsfw_mode: user.nsfw_enabled,
            spicy_level: user.spicy_level,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PhotoPipelineError {
    #[error("photo service answered {status}")]
    Rejected { status: u16 },
    #[error("photo service unreachable: {0}")]
    Transport(String),
}

/// How the dispatcher asks for a photo.
#[async_trait]
pub trait PhotoPipeline: Send + Sync {
    async fn request_photo(&self, request: &PhotoRequest) -> Result<(), PhotoPipelineError>;
}

/// Calls a photo service deployed as its own endpoint.
pub struct HttpPhotoPipeline {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpPhotoPipeline {
    pub fn new(client: reqwest::Client, url: &str, timeout: Duration) -> Self {
        Self {
            client,
            url: url.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl PhotoPipeline for HttpPhotoPipeline {
    async fn request_photo(&self, request: &PhotoRequest) -> Result<(), PhotoPipelineError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|err| PhotoPipelineError::Transport(err.to_string()))?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(PhotoPipelineError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Runs the photo service in the same process.
pub struct LocalPhotoPipeline {
    service: Arc<PhotoService>,
}

impl LocalPhotoPipeline {
    pub fn new(service: Arc<PhotoService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl PhotoPipeline for LocalPhotoPipeline {
    async fn request_photo(&self, request: &PhotoRequest) -> Result<(), PhotoPipelineError> {
        self.service
            .generate(request)
            .await
            .map(|_| ())
            .map_err(|err| {
                tracing::warn!(error = %err, "in-process photo generation refused");
                PhotoPipelineError::Rejected {
                    status: err.status_code(),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::image::{PlaceholderImageProvider, PLACEHOLDER_NO_KEY};
    use crate::notifier::recording::{RecordingNotifier, Sent};
    use crate::personality::PersonalityMode;
    use crate::rng::fixed::FixedSequence;
    use crate::store::MemoryStore;
    use crate::types::UserRecord;

    async fn service_with(
        user: Option<UserRecord>,
    ) -> (PhotoService, Arc<RecordingNotifier>) {
        let store = Arc::new(MemoryStore::new());
        if let Some(user) = user {
            store.put_user(user).await;
        }
        let notifier = Arc::new(RecordingNotifier::default());
        let service = PhotoService::new(
            store,
            Arc::new(PlaceholderImageProvider),
            notifier.clone(),
            Arc::new(FixedSequence::new(vec![2])),
        );
        (service, notifier)
    }

    fn request(telegram_id: Option<i64>, chat_id: Option<i64>) -> PhotoRequest {
        PhotoRequest {
            telegram_id,
            chat_id,
            style_variation: Some(1),
        }
    }

    #[tokio::test]
    async fn missing_correlation_fields_are_rejected() {
        let (service, _) = service_with(None).await;
        for req in [request(None, Some(1)), request(Some(1), None), request(Some(0), Some(1))] {
            let err = service.generate(&req).await.unwrap_err();
            assert_eq!(err.status_code(), 400);
        }
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (service, notifier) = service_with(None).await;
        let err = service.generate(&request(Some(5), Some(5))).await.unwrap_err();
        assert!(matches!(err, PhotoError::UserNotFound));
        assert!(notifier.sent().is_empty());
    }

    #[derive(Default)]
    struct CountingImages {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageProvider for CountingImages {
        async fn generate(&self, _prompt: &str) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            PLACEHOLDER_NO_KEY.to_string()
        }
    }

    #[tokio::test]
    async fn nsfw_without_premium_is_forbidden() {
        let mut user = UserRecord::new(5, "A", None);
        user.nsfw_enabled = true;
        let store = Arc::new(MemoryStore::new());
        store.put_user(user).await;
        let images = Arc::new(CountingImages::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = PhotoService::new(
            store,
            images.clone(),
            notifier.clone(),
            Arc::new(FixedSequence::new(vec![0])),
        );

        let err = service.generate(&request(Some(5), Some(50))).await.unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(images.calls.load(Ordering::SeqCst), 0);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn generated_photo_is_relayed_with_a_mode_caption() {
        let mut user = UserRecord::new(5, "A", None);
        user.is_premium = true;
        user.nsfw_enabled = true;
        user.spicy_level = 75;
        user.personality_mode = PersonalityMode::Flirty;
        let (service, notifier) = service_with(Some(user)).await;

        let response = service.generate(&request(Some(5), Some(50))).await.unwrap();
        assert!(response.success);
        assert_eq!(response.photo_url, PLACEHOLDER_NO_KEY);
        assert!(response.nsfw_mode);
        assert_eq!(response.spicy_level, 75);
        assert!(response.prompt_used.contains("lace lingerie"));

        assert_eq!(
            notifier.sent(),
            vec![Sent::Photo {
                chat_id: 50,
                url: PLACEHOLDER_NO_KEY.to_string(),
                caption: "Как тебе? 😏💋".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn local_pipeline_maps_refusals_to_status_codes() {
        let (service, _) = service_with(None).await;
        let pipeline = LocalPhotoPipeline::new(Arc::new(service));
        let err = pipeline
            .request_photo(&request(Some(5), Some(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, PhotoPipelineError::Rejected { status: 404 }));
    }

    #[tokio::test]
    async fn unreachable_remote_pipeline_is_a_transport_error() {
        let pipeline = HttpPhotoPipeline::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/generate-photo",
            Duration::from_millis(500),
        );
        let err = pipeline
            .request_photo(&request(Some(5), Some(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, PhotoPipelineError::Transport(_)));
    }
}
