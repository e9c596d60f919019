mod app;
mod config;
mod db;
mod dispatcher;
mod entitlement;
mod error;
mod image;
mod notifier;
mod personality;
mod photo;
mod photo_prompt;
mod prompting;
mod responder;
mod rng;
mod store;
mod types;


#[tokio::main]
async fn main() {
    if let Err(err) = app::run().await {
        eprintln!("companion-bot failed to start: {err}");
        std::process::exit(1);
    }
}
